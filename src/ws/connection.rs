use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use tracing::{error, info, warn};

use crate::domain::message::Envelope;
use crate::error::CODE_AUTH;
use crate::pipeline::HandshakePipeline;
use crate::registry::ConnectionHandle;
use crate::server::RelayImServer;
use crate::service::auth;

/// 升级请求查询串里的令牌 / Bearer token from the upgrade-request query string
fn token_from_query(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .find_map(|kv| kv.strip_prefix("token="))
        .map(|t| t.to_string())
}

/// 处理新连接：升级 → 鉴权 → 在线登记 → 积压重放 → 稳态收发
/// Handle new connection: upgrade → auth → presence → replay → steady state
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    server: RelayImServer,
) -> Result<()> {
    info!("📨 New connection from: {}", peer_addr);
    let mut pipeline = HandshakePipeline::new();
    pipeline.on_upgrade_request();

    let mut token: Option<String> = None;
    let ws_stream = accept_hdr_async(stream, |req: &Request, resp: Response| {
        token = token_from_query(req.uri().query());
        Ok(resp)
    })
    .await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(&msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                break;
            }
            if is_close {
                let _ = ws_sender.close().await;
                break;
            }
        }
    });
    pipeline.on_upgrade_complete();

    // 欢迎帧先于鉴权结果下发 / The welcome frame precedes the auth verdict
    let welcome = Envelope::ok(serde_json::json!({ "status": "connected" }), "welcome", 1);
    let _ = tx.send(Message::Text(serde_json::to_string(&welcome)?));

    // 鉴权失败立即拒绝，此时尚未登记任何在线状态，无需清理
    // A bad token rejects immediately; nothing was registered, nothing to clean
    let auth_result = match token.as_deref() {
        Some(t) => auth::validate_token(&server.config.auth.secret, t),
        None => Err(crate::error::ImError::Auth("missing token".to_string())),
    };
    let account_id = match auth_result {
        Ok(id) => id,
        Err(e) => {
            warn!("⛔ Rejecting {}: {}", peer_addr, e);
            pipeline.on_rejected();
            let env = Envelope::error(CODE_AUTH, &e.to_string(), 1);
            let _ = tx.send(Message::Text(serde_json::to_string(&env)?));
            let _ = tx.send(Message::Close(None));
            drop(tx);
            let _ = send_task.await;
            return Ok(());
        }
    };

    let conn = ConnectionHandle::new(account_id, tx.clone());
    let evicted = server.registry.register(conn.clone());
    for old in evicted {
        warn!(
            "📵 Device limit reached for account {}, evicting oldest client {}",
            account_id, old.client_id
        );
        let _ = server.send_close(&old, "device limit exceeded");
    }
    pipeline.on_authenticated(account_id);
    info!(
        "✅ Account {} authenticated as client {} from {}",
        account_id, conn.client_id, peer_addr
    );

    if pipeline.try_begin_replay() {
        server.replay_backlog(&conn).await;
        pipeline.on_replay_complete();
    }

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(e) =
                    crate::ws::handler::dispatch_frame(&server, &pipeline, &conn, &text).await
                {
                    error!("Error handling frame from {}: {}", conn.client_id, e);
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                error!("WebSocket error from {}: {}", conn.client_id, e);
                break;
            }
        }
    }

    server.registry.deregister(account_id, &conn.client_id);
    send_task.abort();
    info!("👋 Client {} disconnected", conn.client_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_extracted_from_query() {
        assert_eq!(
            token_from_query(Some("token=abc.1.ff")),
            Some("abc.1.ff".to_string())
        );
        assert_eq!(
            token_from_query(Some("v=1&token=t2")),
            Some("t2".to_string())
        );
        assert_eq!(token_from_query(Some("v=1")), None);
        assert_eq!(token_from_query(None), None);
    }
}
