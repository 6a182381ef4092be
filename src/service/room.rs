//! 房间角色状态：快存中的 (房间, 成员) → 角色表，由排队的建群/邀请
//! 工作流异步填充，每次发消息时同步查询
//! Room role state: the (room, member) → role map in the fast store,
//! populated asynchronously by the queued create/invite workflow and
//! consulted synchronously on every send

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::broker::RoomCommand;
use crate::domain::message::{ChatMessage, MessageType};
use crate::domain::role::{Role, RoleEntry};
use crate::error::ImError;
use crate::graph::SocialGraph;
use crate::server::RelayImServer;
use crate::store::durable::DurableStore;
use crate::store::{keys, HotStore};
use crate::util::IdGenerator;

pub struct RoomService {
    hot: Arc<HotStore>,
    durable: Arc<dyn DurableStore>,
    ids: Arc<IdGenerator>,
    teardown_delay: Duration,
}

impl RoomService {
    pub fn new(
        hot: Arc<HotStore>,
        durable: Arc<dyn DurableStore>,
        ids: Arc<IdGenerator>,
        teardown_delay_secs: u64,
    ) -> Self {
        Self {
            hot,
            durable,
            ids,
            teardown_delay: Duration::from_secs(teardown_delay_secs),
        }
    }

    pub fn role_entry(&self, session_id: &str, account_id: u64) -> Option<RoleEntry> {
        self.hot
            .hget(&keys::room_roles(session_id), &account_id.to_string())
            .and_then(|raw| RoleEntry::decode(&raw))
    }

    pub fn role_of(&self, session_id: &str, account_id: u64) -> Option<Role> {
        self.role_entry(session_id, account_id).map(|e| e.role)
    }

    pub fn is_member(&self, session_id: &str, account_id: u64) -> bool {
        self.role_entry(session_id, account_id).is_some()
    }

    pub fn members(&self, session_id: &str) -> Vec<u64> {
        let mut members: Vec<u64> = self
            .hot
            .hgetall(&keys::room_roles(session_id))
            .into_iter()
            .filter_map(|(k, _)| k.parse().ok())
            .collect();
        members.sort_unstable();
        members
    }

    fn set_role(&self, session_id: &str, account_id: u64, entry: RoleEntry) {
        self.hot.hset(
            &keys::room_roles(session_id),
            &account_id.to_string(),
            &entry.encode(),
        );
    }

    fn system_notice(&self, session_id: &str, sender_id: u64, content: String) -> ChatMessage {
        ChatMessage {
            id: self.ids.next_id(),
            session_id: session_id.to_string(),
            sender_id,
            content,
            msg_type: MessageType::System,
            created_at: 0,
            client_sequence_id: 0,
        }
    }

    /// 执行排队的建群/邀请命令，成功时返回要进入消息管线的系统通知。
    /// 好友门禁在这里生效：非好友的受邀人被跳过。
    /// Executes a queued create/invite command, returning the system notice
    /// for the message pipeline. The friendship gate applies here:
    /// non-friend invitees are skipped.
    pub fn apply(&self, graph: &SocialGraph, cmd: &RoomCommand) -> Result<ChatMessage, ImError> {
        match cmd {
            RoomCommand::Create {
                session_id,
                requester,
                members,
                name,
            } => {
                let invitees: Vec<u64> = members
                    .iter()
                    .copied()
                    .filter(|m| *m != *requester && graph.are_friends(*requester, *m))
                    .collect();
                if invitees.len() < members.iter().filter(|m| **m != *requester).count() {
                    warn!("⛔ Skipping non-friend invitees for room {}", session_id);
                }
                self.enroll(session_id, *requester, Role::Owner)?;
                for m in &invitees {
                    self.enroll(session_id, *m, Role::Member)?;
                }
                Ok(self.system_notice(
                    session_id,
                    *requester,
                    format!("群聊「{}」已创建，共{}人", name, invitees.len() + 1),
                ))
            }
            RoomCommand::Invite {
                session_id,
                requester,
                members,
            } => {
                if !self
                    .role_of(session_id, *requester)
                    .map_or(false, |r| r.can_moderate())
                {
                    return Err(ImError::RoomWorkflow(
                        "inviter is not an admin of the room".to_string(),
                    ));
                }
                let mut joined = 0usize;
                for m in members {
                    if self.is_member(session_id, *m) {
                        continue;
                    }
                    if !graph.are_friends(*requester, *m) {
                        warn!("⛔ Invitee {} is not a friend of {}", m, requester);
                        continue;
                    }
                    self.enroll(session_id, *m, Role::Member)?;
                    joined += 1;
                }
                if joined == 0 {
                    return Err(ImError::RoomWorkflow("no invitee joined".to_string()));
                }
                Ok(self.system_notice(
                    session_id,
                    *requester,
                    format!("{joined}位新成员加入群聊"),
                ))
            }
        }
    }

    fn enroll(&self, session_id: &str, account_id: u64, role: Role) -> Result<(), ImError> {
        self.durable
            .upsert_member(session_id, account_id, role.level())
            .map_err(|e| ImError::RoomWorkflow(e.to_string()))?;
        self.set_role(session_id, account_id, RoleEntry::of(role));
        self.hot
            .sadd(&keys::account_sessions(account_id), session_id);
        Ok(())
    }

    /// 仅群主可在管理员与普通成员之间调整 / Owner-only admin↔member changes
    pub fn promote(&self, session_id: &str, actor: u64, target: u64) -> Result<ChatMessage, ImError> {
        self.change_role(session_id, actor, target, Role::Admin)
    }

    pub fn demote(&self, session_id: &str, actor: u64, target: u64) -> Result<ChatMessage, ImError> {
        self.change_role(session_id, actor, target, Role::Member)
    }

    fn change_role(
        &self,
        session_id: &str,
        actor: u64,
        target: u64,
        to: Role,
    ) -> Result<ChatMessage, ImError> {
        if self.role_of(session_id, actor) != Some(Role::Owner) {
            return Err(ImError::RoomWorkflow("only the owner may change roles".to_string()));
        }
        match self.role_of(session_id, target) {
            Some(Role::Admin) | Some(Role::Member) => {}
            _ => return Err(ImError::RoomWorkflow("target is not adjustable".to_string())),
        }
        self.durable
            .upsert_member(session_id, target, to.level())
            .map_err(|e| ImError::RoomWorkflow(e.to_string()))?;
        self.set_role(session_id, target, RoleEntry::of(to));
        let verb = if to == Role::Admin { "设为管理员" } else { "取消管理员" };
        Ok(self.system_notice(session_id, actor, format!("成员{target}被{verb}")))
    }

    /// 群主或管理员可禁言任意非群主成员 / Owner or admin may mute any non-owner
    pub fn mute(&self, session_id: &str, actor: u64, target: u64) -> Result<ChatMessage, ImError> {
        self.require_moderator(session_id, actor)?;
        let entry = self
            .role_entry(session_id, target)
            .ok_or_else(|| ImError::RoomWorkflow("target is not a member".to_string()))?;
        if entry.role == Role::Owner {
            return Err(ImError::RoomWorkflow("the owner cannot be muted".to_string()));
        }
        if entry.role != Role::Muted {
            self.set_role(session_id, target, RoleEntry::muted(entry.role));
        }
        Ok(self.system_notice(session_id, actor, format!("成员{target}已被禁言")))
    }

    pub fn unmute(&self, session_id: &str, actor: u64, target: u64) -> Result<ChatMessage, ImError> {
        self.require_moderator(session_id, actor)?;
        let entry = self
            .role_entry(session_id, target)
            .ok_or_else(|| ImError::RoomWorkflow("target is not a member".to_string()))?;
        if entry.role == Role::Muted {
            let restored = entry.prior.unwrap_or(Role::Member);
            self.set_role(session_id, target, RoleEntry::of(restored));
        }
        Ok(self.system_notice(session_id, actor, format!("成员{target}已解除禁言")))
    }

    /// 踢人：快存即刻移除（立断收发），冷存行删除延后执行
    /// Kick: immediate fast-store removal; the durable row delete is deferred
    pub fn kick(&self, session_id: &str, actor: u64, target: u64) -> Result<ChatMessage, ImError> {
        self.require_moderator(session_id, actor)?;
        if self.role_of(session_id, target) == Some(Role::Owner) {
            return Err(ImError::RoomWorkflow("the owner cannot be kicked".to_string()));
        }
        if !self.is_member(session_id, target) {
            return Err(ImError::RoomWorkflow("target is not a member".to_string()));
        }
        self.hot
            .hdel(&keys::room_roles(session_id), &target.to_string());
        self.hot
            .srem(&keys::account_sessions(target), session_id);
        let durable = self.durable.clone();
        let session = session_id.to_string();
        let delay = self.teardown_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = durable.delete_member(&session, target) {
                warn!("deferred member delete failed: {}", e);
            }
        });
        Ok(self.system_notice(session_id, actor, format!("成员{target}已被移出群聊")))
    }

    /// 解散：快存立刻全清（所有成员硬切断），冷存的房间、成员与消息
    /// 删除延后到刷盘之后，保证没有消息被拆除竞态“孤儿化”
    /// Dismiss: all fast-store entries cleared now (hard cutoff); durable
    /// teardown is deferred past the flush interval so no message is
    /// orphaned by a teardown racing ahead of the flush job
    pub fn dismiss(&self, session_id: &str, actor: u64) -> Result<(), ImError> {
        if self.role_of(session_id, actor) != Some(Role::Owner) {
            return Err(ImError::RoomWorkflow("only the owner may dismiss".to_string()));
        }
        for member in self.members(session_id) {
            self.hot.srem(&keys::account_sessions(member), session_id);
        }
        self.hot.hclear(&keys::room_roles(session_id));
        let durable = self.durable.clone();
        let session = session_id.to_string();
        let delay = self.teardown_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = durable.delete_session(&session) {
                warn!("deferred session teardown failed: {}", e);
            }
            info!("🧹 Session {} durably torn down", session);
        });
        Ok(())
    }

    fn require_moderator(&self, session_id: &str, actor: u64) -> Result<(), ImError> {
        if self
            .role_of(session_id, actor)
            .map_or(false, |r| r.can_moderate())
        {
            Ok(())
        } else {
            Err(ImError::RoomWorkflow(
                "actor may not moderate this room".to_string(),
            ))
        }
    }
}

impl RelayImServer {
    /// 角色调整走同步接口，系统通知照常进消息管线
    /// Role changes are synchronous; their system notices enter the
    /// normal message pipeline
    pub fn moderate(&self, result: Result<ChatMessage, ImError>) -> Result<(), ImError> {
        let notice = result?;
        self.broker.publish_message(notice)
    }
}

/// 建群/邀请工作流消费者：把缓慢的多行写操作挪出请求路径；
/// 失败时通知在线的发起者，不做自动重试
/// Room workflow consumer: moves slow multi-row writes off the request
/// path; failures notify the requester's live connections, no retry
pub fn spawn_room_workflow(
    server: RelayImServer,
    mut rx: mpsc::UnboundedReceiver<RoomCommand>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    match server.rooms.apply(&server.graph, &cmd) {
                        Ok(notice) => {
                            info!("🏠 Room workflow done for session {}", cmd.session_id());
                            if let Err(e) = server.broker.publish_message(notice) {
                                warn!("room notice publish failed: {}", e);
                            }
                        }
                        Err(e) => {
                            warn!("room workflow failed: {}", e);
                            for conn in server.registry.list(cmd.requester()) {
                                let env = crate::domain::message::Envelope {
                                    code: crate::error::CODE_PUBLISH,
                                    data: serde_json::json!({"sessionId": cmd.session_id()}),
                                    message: Some(format!("room workflow failed: {e}")),
                                    sequence_id: (conn
                                        .watermark
                                        .load(std::sync::atomic::Ordering::SeqCst)
                                        + 1)
                                    .to_string(),
                                };
                                let _ = server.send_envelope(&conn, &env);
                            }
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() { break; }
                }
            }
        }
    })
}
