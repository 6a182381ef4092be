use anyhow::Result;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::domain::message::Envelope;
use crate::registry::ConnectionHandle;
use crate::server::RelayImServer;

impl RelayImServer {
    /// 向指定连接发送信封 / Send an envelope to a specific connection
    pub fn send_envelope(&self, conn: &ConnectionHandle, env: &Envelope) -> Result<()> {
        let text = serde_json::to_string(env)?;
        conn.sender
            .send(Message::Text(text))
            .map_err(|e| anyhow::anyhow!("failed to send to {}: {}", conn.client_id, e))?;
        debug!("📤 Sent envelope to client {}", conn.client_id);
        Ok(())
    }

    /// 发送关闭帧 / Send a close frame
    pub fn send_close(&self, conn: &ConnectionHandle, reason: &'static str) -> Result<()> {
        conn.sender
            .send(Message::Close(Some(
                tokio_tungstenite::tungstenite::protocol::CloseFrame {
                    code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal,
                    reason: std::borrow::Cow::Borrowed(reason),
                },
            )))
            .map_err(|e| anyhow::anyhow!("failed to close {}: {}", conn.client_id, e))?;
        debug!("🔒 Sent close frame to client {}", conn.client_id);
        Ok(())
    }
}
