//! 重连积压重放：未读清单、热缓存优先的消息体解析、回溯补偿窗口
//! 与离线提醒投递
//! Backlog replay on reconnect: unread list, hot-cache-first body
//! resolution, the recovery lookback window and offline reminders

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

use crate::broker::ReminderRequest;
use crate::domain::message::{ChatMessage, Envelope};
use crate::registry::ConnectionHandle;
use crate::server::RelayImServer;
use crate::store::keys;

const DAY_MS: i64 = 86_400_000;

impl RelayImServer {
    /// 进入重放阶段后执行；任何一步失败只记日志并跳过，消息仍可
    /// 经下次重连或普通查询找回
    /// Runs when the pipeline enters the replay stage; a failing step logs
    /// and is skipped, messages stay recoverable on the next reconnect
    pub async fn replay_backlog(&self, conn: &ConnectionHandle) {
        let account_id = conn.account_id;
        let next_seq = conn.watermark.load(Ordering::SeqCst) + 1;

        // 1. 原子读取并清空积压索引 / Atomically drain the backlog index
        let pending = self.hot.zdrain(&keys::backlog(account_id));
        let unread = Envelope::ok(
            serde_json::json!(pending.len()),
            "未读消息数量",
            next_seq,
        );
        if self.send_envelope(conn, &unread).is_err() {
            return;
        }
        let mut delivered: HashSet<i64> = HashSet::new();

        if !pending.is_empty() {
            // 2. 热缓存优先解析消息体，缺失的走冷存
            // Resolve bodies hot-cache-first, falling back to durable storage
            let ids: Vec<String> = pending.iter().map(|(id, _)| id.clone()).collect();
            let cached = self.hot.hget_many(keys::HOT_MSG, &ids);
            let mut bodies: Vec<ChatMessage> = Vec::with_capacity(ids.len());
            let mut missing: Vec<i64> = Vec::new();
            for (id, body) in ids.iter().zip(cached) {
                match body {
                    Some(raw) => match serde_json::from_str(&raw) {
                        Ok(m) => bodies.push(m),
                        Err(e) => warn!("unparsable hot body {}: {}", id, e),
                    },
                    None => {
                        if let Ok(id) = id.parse() {
                            missing.push(id);
                        }
                    }
                }
            }
            if !missing.is_empty() {
                match self.durable.fetch_messages(&missing) {
                    Ok(mut rows) => bodies.append(&mut rows),
                    Err(e) => warn!("durable fetch during replay failed: {}", e),
                }
            }
            bodies.sort_by_key(|m| (m.created_at, m.id));
            for msg in &bodies {
                delivered.insert(msg.id);
                let env = Envelope::ok(serde_json::json!(msg), "chat", next_seq);
                let _ = self.send_envelope(conn, &env);
            }

            // 3. 回溯补偿窗口：覆盖“最近一定已同步”到“最早未读”之间的空档
            // Recovery window between last-guaranteed-synced and the earliest unread
            let t_min = pending.first().map(|(_, ts)| *ts).unwrap_or(0);
            let from = t_min - self.config.im.backlog_lookback_days * DAY_MS;
            if from < t_min {
                self.replay_window(conn, account_id, from, t_min - 1, &mut delivered)
                    .await;
            }
        }

        // 4. 离线期间累计的提醒，按计划时间排序投递
        // Reminders accumulated while offline, sorted by scheduled time
        for (raw, _ts) in self.hot.zdrain(&keys::reminders(account_id)) {
            match serde_json::from_str::<ReminderRequest>(&raw) {
                Ok(req) => {
                    let env = Envelope::ok(
                        serde_json::json!({ "content": req.content, "remindAt": req.remind_at }),
                        "reminder",
                        next_seq,
                    );
                    let _ = self.send_envelope(conn, &env);
                }
                Err(e) => warn!("unparsable reminder: {}", e),
            }
        }
        debug!(
            "📦 Backlog replay finished for account {} ({} bodies)",
            account_id,
            delivered.len()
        );
    }

    async fn replay_window(
        &self,
        conn: &ConnectionHandle,
        account_id: u64,
        from: i64,
        to: i64,
        delivered: &mut HashSet<i64>,
    ) {
        let next_seq = conn.watermark.load(Ordering::SeqCst) + 1;
        let mut window: Vec<ChatMessage> = Vec::new();
        for session_id in self.sessions_of(account_id) {
            // 热索引与取体作为单次原子读，防止刷盘在两步之间抽走条目
            // One atomic index-then-fetch read against the concurrent flush job
            for (id, _score, body) in
                self.hot
                    .zrange_hget(&keys::hot_index(&session_id), from, to, keys::HOT_MSG)
            {
                match body {
                    Some(raw) => match serde_json::from_str(&raw) {
                        Ok(m) => window.push(m),
                        Err(e) => warn!("unparsable hot body {}: {}", id, e),
                    },
                    None => debug!("hot index entry {} already flushed", id),
                }
            }
            match self.durable.fetch_session_range(&session_id, from, to) {
                Ok(mut rows) => window.append(&mut rows),
                Err(e) => warn!("durable range fetch failed for {}: {}", session_id, e),
            }
        }
        window.sort_by_key(|m| (m.created_at, m.id));
        for msg in window {
            if !delivered.insert(msg.id) {
                continue;
            }
            let env = Envelope::ok(serde_json::json!(msg), "chat", next_seq);
            let _ = self.send_envelope(conn, &env);
        }
    }

    /// 账号参与的会话：快存索引优先，冷存兜底
    /// Sessions the account participates in: fast index first, durable fallback
    fn sessions_of(&self, account_id: u64) -> Vec<String> {
        let mut sessions = self.hot.smembers(&keys::account_sessions(account_id));
        if sessions.is_empty() {
            match self.durable.sessions_for(account_id) {
                Ok(rows) => sessions = rows,
                Err(e) => warn!("durable session lookup failed: {}", e),
            }
        }
        sessions.sort();
        sessions
    }
}
