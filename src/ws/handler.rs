use anyhow::Result;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::debug;

use crate::domain::message::{ClientFrame, Envelope};
use crate::error::RejectReason;
use crate::pipeline::HandshakePipeline;
use crate::registry::ConnectionHandle;
use crate::server::RelayImServer;

/// 稳态帧分发：心跳直接应答，消息帧交给校验器，坏帧结构化拒绝
/// Steady-state frame dispatch: heartbeats answered inline, message frames
/// go to the validator, bad frames get a structured rejection
pub async fn dispatch_frame(
    server: &RelayImServer,
    pipeline: &HandshakePipeline,
    conn: &ConnectionHandle,
    text: &str,
) -> Result<()> {
    let next_seq = conn.watermark.load(Ordering::SeqCst) + 1;
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Control(ctrl)) if ctrl.kind == "ping" => {
            debug!("🏓 Ping from {}", conn.client_id);
            *conn.last_heartbeat.lock() = Instant::now();
            let pong = Envelope::ok(
                serde_json::json!({ "timestamp": chrono::Utc::now().timestamp_millis() }),
                "pong",
                next_seq,
            );
            server.send_envelope(conn, &pong)?;
        }
        Ok(ClientFrame::Control(ctrl)) => {
            debug!("Ignoring control frame '{}' from {}", ctrl.kind, conn.client_id);
        }
        Ok(ClientFrame::Message(frame)) => {
            if !pipeline.is_steady() {
                debug!("Dropping early frame from {}", conn.client_id);
                return Ok(());
            }
            let ack = server.ingest_frame(conn, frame).await;
            server.send_envelope(conn, &ack)?;
        }
        Err(_) => {
            server.send_envelope(conn, &Envelope::reject(RejectReason::Malformed, next_seq))?;
        }
    }
    Ok(())
}
