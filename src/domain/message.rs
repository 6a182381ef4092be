use serde::{Deserialize, Serialize};

use crate::error::{RejectReason, CODE_OK};

/// 消息类型 / Message type
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    File,
    /// 系统通知，仅服务端产生 / System notice, server-originated only
    System,
}

/// 落库消息 / Persisted chat message
///
/// `created_at` 一律由接入服务端盖章，绝不信任客户端
/// `created_at` is always stamped by the ingesting server, never the client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: String,
    pub sender_id: u64,
    pub content: String,
    #[serde(rename = "messageType")]
    pub msg_type: MessageType,
    pub created_at: i64,
    pub client_sequence_id: i64,
}

/// 客户端上行消息帧 / Inbound message frame (client → server)
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    pub sequence_id: String,
    pub session_id: String,
    pub content: String,
    pub message_type: MessageType,
}

/// 控制帧（心跳等）/ Control frame (heartbeat etc.)
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ControlFrame {
    #[serde(rename = "type")]
    pub kind: String,
}

/// 上行帧总成 / Any inbound frame
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum ClientFrame {
    Message(InboundFrame),
    Control(ControlFrame),
}

/// 下行统一信封 / Uniform outbound envelope (server → client)
///
/// `sequence_id` 永远告知客户端下一个最小可用序列号
/// `sequence_id` always tells the client the minimum next usable value
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub code: i32,
    pub data: serde_json::Value,
    pub message: Option<String>,
    pub sequence_id: String,
}

impl Envelope {
    pub fn ok(data: serde_json::Value, message: &str, next_seq: i64) -> Self {
        Self {
            code: CODE_OK,
            data,
            message: Some(message.to_string()),
            sequence_id: next_seq.to_string(),
        }
    }

    pub fn reject(reason: RejectReason, next_seq: i64) -> Self {
        Self {
            code: reason.code(),
            data: serde_json::Value::Null,
            message: Some(reason.to_string()),
            sequence_id: next_seq.to_string(),
        }
    }

    pub fn error(code: i32, message: &str, next_seq: i64) -> Self {
        Self {
            code,
            data: serde_json::Value::Null,
            message: Some(message.to_string()),
            sequence_id: next_seq.to_string(),
        }
    }
}
