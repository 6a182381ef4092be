//! 真实套接字上的握手测试：欢迎帧先行，鉴权结果随后
//! Handshake tests over a real socket: the welcome frame comes first,
//! the auth verdict follows

use futures_util::StreamExt;
use tokio::net::TcpListener;

use relay_im::config::AppConfig;
use relay_im::domain::message::Envelope;
use relay_im::error::{CODE_AUTH, CODE_OK};
use relay_im::service::auth;
use relay_im::ws::connection::handle_connection;
use relay_im::RelayImServer;

async fn serve_one(server: RelayImServer) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, peer) = listener.accept().await.unwrap();
        let _ = handle_connection(stream, peer, server).await;
    });
    addr
}

async fn next_env<S>(ws: &mut S) -> Envelope
where
    S: StreamExt<Item = Result<tokio_tungstenite::tungstenite::Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    loop {
        let msg = ws.next().await.expect("stream ended").expect("ws error");
        if let tokio_tungstenite::tungstenite::Message::Text(t) = msg {
            return serde_json::from_str(&t).unwrap();
        }
    }
}

#[tokio::test]
async fn welcome_frame_precedes_auth_verdict() {
    let (server, _receivers) = RelayImServer::new(AppConfig::default()).unwrap();
    let addr = serve_one(server).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/?token=bogus", addr))
        .await
        .unwrap();

    // 令牌无效也先收到欢迎帧 / Even a bad token sees the welcome frame first
    let welcome = next_env(&mut ws).await;
    assert_eq!(welcome.code, CODE_OK);
    assert_eq!(welcome.message.as_deref(), Some("welcome"));
    assert_eq!(welcome.data["status"], "connected");

    let verdict = next_env(&mut ws).await;
    assert_eq!(verdict.code, CODE_AUTH);
}

#[tokio::test]
async fn valid_token_gets_welcome_then_replay() {
    let cfg = AppConfig::default();
    let secret = cfg.auth.secret.clone();
    let ttl = cfg.auth.token_ttl_ms;
    let (server, _receivers) = RelayImServer::new(cfg).unwrap();
    let addr = serve_one(server).await;

    let token = auth::issue_token(&secret, 7, ttl).unwrap();
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/?token={}", addr, token))
        .await
        .unwrap();

    let welcome = next_env(&mut ws).await;
    assert_eq!(welcome.message.as_deref(), Some("welcome"));

    // 随后是重放阶段的未读清单 / The replay-phase unread count follows
    let unread = next_env(&mut ws).await;
    assert_eq!(unread.message.as_deref(), Some("未读消息数量"));
    assert_eq!(unread.data, serde_json::json!(0));
}
