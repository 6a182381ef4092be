//! 进程内主题代理：消息、建群/邀请工作流与提醒各走一个主题
//! In-process topic broker: one topic each for messages, room workflow
//! commands and reminders

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::message::ChatMessage;
use crate::error::ImError;

/// 建群/邀请工作流请求 / Room creation & invite workflow requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RoomCommand {
    Create {
        session_id: String,
        requester: u64,
        members: Vec<u64>,
        name: String,
    },
    Invite {
        session_id: String,
        requester: u64,
        members: Vec<u64>,
    },
}

impl RoomCommand {
    pub fn requester(&self) -> u64 {
        match self {
            RoomCommand::Create { requester, .. } => *requester,
            RoomCommand::Invite { requester, .. } => *requester,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            RoomCommand::Create { session_id, .. } => session_id,
            RoomCommand::Invite { session_id, .. } => session_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderRequest {
    pub account_id: u64,
    pub content: String,
    /// 计划触达时间（毫秒）/ Scheduled delivery time in milliseconds
    pub remind_at: i64,
}

#[derive(Clone)]
pub struct Broker {
    msg_tx: mpsc::UnboundedSender<ChatMessage>,
    room_tx: mpsc::UnboundedSender<RoomCommand>,
    reminder_tx: mpsc::UnboundedSender<ReminderRequest>,
}

pub struct BrokerReceivers {
    pub messages: mpsc::UnboundedReceiver<ChatMessage>,
    pub rooms: mpsc::UnboundedReceiver<RoomCommand>,
    pub reminders: mpsc::UnboundedReceiver<ReminderRequest>,
}

pub fn channel() -> (Broker, BrokerReceivers) {
    let (msg_tx, messages) = mpsc::unbounded_channel();
    let (room_tx, rooms) = mpsc::unbounded_channel();
    let (reminder_tx, reminders) = mpsc::unbounded_channel();
    (
        Broker {
            msg_tx,
            room_tx,
            reminder_tx,
        },
        BrokerReceivers {
            messages,
            rooms,
            reminders,
        },
    )
}

impl Broker {
    pub fn publish_message(&self, msg: ChatMessage) -> Result<(), ImError> {
        self.msg_tx
            .send(msg)
            .map_err(|e| ImError::BrokerPublish(e.to_string()))
    }

    pub fn publish_room_command(&self, cmd: RoomCommand) -> Result<(), ImError> {
        self.room_tx
            .send(cmd)
            .map_err(|e| ImError::BrokerPublish(e.to_string()))
    }

    pub fn publish_reminder(&self, req: ReminderRequest) -> Result<(), ImError> {
        self.reminder_tx
            .send(req)
            .map_err(|e| ImError::BrokerPublish(e.to_string()))
    }
}
