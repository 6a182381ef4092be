//! 扇出与分层持久化消费者：盖权威时间戳、去重、在线推送、离线记账、
//! 热缓存写入与定时批量刷盘
//! Fan-out & tiered persistence consumer: authoritative timestamps, dedup,
//! online push, offline backlog bookkeeping, hot-cache writes and the
//! periodic batched flush

use anyhow::Result;
use std::sync::atomic::Ordering;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::domain::message::{ChatMessage, Envelope};
use crate::error::ImError;
use crate::server::RelayImServer;
use crate::store::keys;

impl RelayImServer {
    /// 消费一条已校验消息。幂等：重复投递被过滤环静默丢弃。
    /// Consumes one validated message. Idempotent: redeliveries are
    /// silently dropped by the dedup ring.
    pub async fn fan_out(&self, mut msg: ChatMessage) {
        // 权威时间戳由本端盖章 / The authoritative timestamp is stamped here
        msg.created_at = chrono::Utc::now().timestamp_millis();

        if !self.dedup.check(msg.id) {
            debug!("🔁 Dropping duplicate message {}", msg.id);
            return;
        }

        let body = match serde_json::to_string(&msg) {
            Ok(b) => b,
            Err(e) => {
                warn!("message {} serialization failed: {}", msg.id, e);
                return;
            }
        };
        let id_str = msg.id.to_string();
        // 先落热缓存，确保积压索引里的ID都能解析到消息体
        // Hot cache first, so any ID landing in a backlog resolves to a body
        self.hot.hset(keys::HOT_MSG, &id_str, &body);
        self.hot
            .zadd(&keys::hot_index(&msg.session_id), &id_str, msg.created_at);

        for member in self.rooms.members(&msg.session_id) {
            if member == msg.sender_id {
                continue;
            }
            let conns = self.registry.list(member);
            if conns.is_empty() {
                self.queue_offline(member, msg.id, msg.created_at);
            } else {
                for conn in conns {
                    let env = Envelope::ok(
                        serde_json::json!(msg),
                        "chat",
                        conn.watermark.load(Ordering::SeqCst) + 1,
                    );
                    if self.send_envelope(&conn, &env).is_err() {
                        debug!("⚠️  Push to {} failed, connection gone", conn.client_id);
                    }
                }
            }
        }
    }

    /// 离线记账：按服务端时间写入积压索引并登记触达账号
    /// Offline bookkeeping: backlog index entry plus the touched-account set
    fn queue_offline(&self, account_id: u64, message_id: i64, created_at: i64) {
        let key = keys::backlog(account_id);
        self.hot.zadd(&key, &message_id.to_string(), created_at);
        self.hot.sadd(keys::TOUCHED_SET, &account_id.to_string());
        let max = self.config.im.offline_max_per_account;
        if self.hot.zcard(&key) > max {
            let evicted = self
                .hot
                .zremrange_oldest(&key, self.config.im.offline_cleanup_batch);
            warn!(
                "🧹 Offline backlog of account {} over quota, evicted {}",
                account_id, evicted
            );
        }
    }

    /// 刷盘：把热缓存整体批量写入冷存，成功后清掉已刷的缓存条目、
    /// 会话热索引与触达集合。失败时什么都不清，等下一轮重试。
    /// Flush: batch-write the hot cache to the durable store; on success
    /// clear the flushed entries, the session hot indexes and the touched
    /// set. On failure nothing is cleared and the next run retries.
    pub fn flush_hot_cache(&self) -> Result<usize> {
        let entries = self.hot.hgetall(keys::HOT_MSG);
        if entries.is_empty() {
            return Ok(0);
        }
        let mut batch: Vec<ChatMessage> = Vec::with_capacity(entries.len());
        for (id, body) in &entries {
            match serde_json::from_str::<ChatMessage>(body) {
                Ok(m) => batch.push(m),
                Err(e) => warn!("dropping unparsable hot entry {}: {}", id, e),
            }
        }
        batch.sort_by_key(|m| m.id);
        self.durable
            .insert_messages(&batch)
            .map_err(|e| ImError::Persistence(e.to_string()))?;
        for m in &batch {
            let id_str = m.id.to_string();
            self.hot.hdel(keys::HOT_MSG, &id_str);
            self.hot.zrem(&keys::hot_index(&m.session_id), &id_str);
        }
        let touched = self.hot.sclear(keys::TOUCHED_SET);
        info!(
            "💾 Flushed {} hot messages to durable storage ({} accounts touched)",
            batch.len(),
            touched
        );
        Ok(batch.len())
    }
}

/// 扇出消费者任务 / Fan-out consumer task
pub fn spawn_fanout_consumer(
    server: RelayImServer,
    mut rx: mpsc::UnboundedReceiver<ChatMessage>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(msg) => server.fan_out(msg).await,
                        None => break,
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() { break; }
                }
            }
        }
    })
}
