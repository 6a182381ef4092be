//! 提醒投递：在线且到点直接推送，否则入离线提醒队列等重放
//! Reminder dispatch: push immediately when online and due, otherwise
//! queue for backlog replay

use std::sync::atomic::Ordering;
use tokio::sync::{mpsc, watch};
use tracing::warn;

use crate::broker::ReminderRequest;
use crate::domain::message::Envelope;
use crate::server::RelayImServer;
use crate::store::keys;

impl RelayImServer {
    pub fn dispatch_reminder(&self, req: ReminderRequest) {
        let now = chrono::Utc::now().timestamp_millis();
        let conns = self.registry.list(req.account_id);
        if req.remind_at <= now && !conns.is_empty() {
            for conn in conns {
                let env = Envelope::ok(
                    serde_json::json!({ "content": req.content, "remindAt": req.remind_at }),
                    "reminder",
                    conn.watermark.load(Ordering::SeqCst) + 1,
                );
                let _ = self.send_envelope(&conn, &env);
            }
            return;
        }
        match serde_json::to_string(&req) {
            Ok(raw) => {
                self.hot
                    .zadd(&keys::reminders(req.account_id), &raw, req.remind_at);
            }
            Err(e) => warn!("reminder serialization failed: {}", e),
        }
    }
}

pub fn spawn_reminder_consumer(
    server: RelayImServer,
    mut rx: mpsc::UnboundedReceiver<ReminderRequest>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                req = rx.recv() => {
                    match req {
                        Some(req) => server.dispatch_reminder(req),
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
