//! 消息校验与接入：逐连接的序列号单调检查、成员/禁言/拉黑检查、
//! 内容治理、限速，通过后交给代理并同步回执
//! Message validation & ingest: per-connection sequence monotonicity,
//! membership/mute/block checks, moderation and throttling; accepted
//! messages hand off to the broker with a synchronous acknowledgment

use std::sync::atomic::Ordering;
use tracing::{debug, warn};

use crate::domain::message::{ChatMessage, Envelope, InboundFrame, MessageType};
use crate::domain::role::Role;
use crate::error::{ImError, RejectReason, CODE_PUBLISH};
use crate::registry::ConnectionHandle;
use crate::server::RelayImServer;

/// 校验通过的帧与放行时刻 / An admitted frame plus its admission instant
struct Admitted {
    seq: i64,
    peer: Option<u64>,
    content: String,
    now: i64,
}

impl RelayImServer {
    /// 处理一条稳态上行帧，返回必须回给发送方的唯一一份回执。
    /// 任何拒绝都不推进序列水位。
    /// Handles one steady-state inbound frame, returning the single
    /// acknowledgment owed to the sender. Rejections never advance the
    /// sequence watermark.
    pub async fn ingest_frame(&self, conn: &ConnectionHandle, frame: InboundFrame) -> Envelope {
        let watermark = conn.watermark.load(Ordering::SeqCst);
        let next = watermark + 1;

        let admitted = match self.admit(conn, &frame, watermark) {
            Ok(a) => a,
            Err(ImError::Validation(reason)) => {
                debug!(
                    "↩️  Rejecting frame from account {}: {}",
                    conn.account_id, reason
                );
                return Envelope::reject(reason, next);
            }
            Err(e) => {
                warn!("frame admission failed for account {}: {}", conn.account_id, e);
                return Envelope::error(CODE_PUBLISH, "send failed", next);
            }
        };

        let msg = ChatMessage {
            id: self.ids.next_id(),
            session_id: frame.session_id.clone(),
            sender_id: conn.account_id,
            content: admitted.content,
            msg_type: frame.message_type,
            created_at: 0, // 消费端盖权威时间戳 / Stamped by the fan-out consumer
            client_sequence_id: admitted.seq,
        };
        let message_id = msg.id;

        // 发布失败则本条丢弃且水位不动，客户端按原序列重发即可
        // On publish failure the message is dropped and the watermark stays,
        // so the client may resend with the same sequence
        if let Err(e) = self.broker.publish_message(msg) {
            warn!("broker publish failed for account {}: {}", conn.account_id, e);
            return Envelope::error(CODE_PUBLISH, "send failed", next);
        }

        conn.watermark.store(admitted.seq, Ordering::SeqCst);
        conn.last_send_at.store(admitted.now, Ordering::SeqCst);
        if let Some(peer) = admitted.peer {
            // 给对方回话会解除其陌生人限制 / Replying clears the peer's stranger mark
            self.stranger.on_reply(conn.account_id, peer);
        }

        Envelope::ok(
            serde_json::json!({ "messageId": message_id.to_string() }),
            "ok",
            admitted.seq + 1,
        )
    }

    /// 校验链，按序短路；所有拒绝都以类型化错误返回
    /// The validation chain, short-circuiting in order; every rejection
    /// surfaces as a typed error
    fn admit(
        &self,
        conn: &ConnectionHandle,
        frame: &InboundFrame,
        watermark: i64,
    ) -> Result<Admitted, ImError> {
        let seq: i64 = frame
            .sequence_id
            .parse()
            .map_err(|_| RejectReason::Malformed)?;
        // 回执永远携带seq+1，顶格序列无处可进 / Acks always carry seq+1,
        // a sequence at the numeric ceiling has nowhere to go
        if seq.checked_add(1).is_none() {
            return Err(RejectReason::Malformed.into());
        }
        // 重复或乱序 / Duplicate or out-of-order
        if seq <= watermark {
            return Err(RejectReason::SequenceNotMonotonic.into());
        }

        let Some(role) = self.rooms.role_of(&frame.session_id, conn.account_id) else {
            return Err(RejectReason::NotParticipant.into());
        };
        if role == Role::Muted {
            return Err(RejectReason::Muted.into());
        }

        // 单聊才有收件人级别的拉黑与陌生人策略
        // Recipient-level blocking and the stranger policy only apply to 1:1 rooms
        let members = self.rooms.members(&frame.session_id);
        let peer = if members.len() == 2 {
            members.iter().copied().find(|m| *m != conn.account_id)
        } else {
            None
        };
        if let Some(peer) = peer {
            if self.graph.has_blocked(peer, conn.account_id) {
                return Err(RejectReason::Blocked.into());
            }
        }

        let content = if frame.message_type == MessageType::Text {
            self.words.apply(&frame.content)
        } else {
            frame.content.clone()
        };

        // 限速检查在序列水位更新之前 / Rate limit precedes the watermark update
        let now = chrono::Utc::now().timestamp_millis();
        let last_send = conn.last_send_at.load(Ordering::SeqCst);
        if now - last_send < self.config.im.send_interval_ms {
            return Err(RejectReason::RateLimited.into());
        }

        if let Some(peer) = peer {
            if !self.stranger.allow_send(&self.graph, conn.account_id, peer) {
                return Err(RejectReason::StrangerThrottled.into());
            }
        }

        Ok(Admitted {
            seq,
            peer,
            content,
            now,
        })
    }
}
