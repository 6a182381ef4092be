//! 端到端投递链路测试：接入校验、扇出、离线积压与重连重放
//! End-to-end delivery tests: ingest validation, fan-out, offline backlog
//! and reconnect replay

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use std::sync::Arc;

use relay_im::broker::{BrokerReceivers, RoomCommand};
use relay_im::config::AppConfig;
use relay_im::domain::message::{ChatMessage, Envelope, InboundFrame, MessageType};
use relay_im::error::{RejectReason, CODE_OK};
use relay_im::graph::SocialGraph;
use relay_im::store::durable::DurableStore;
use relay_im::store::keys;
use relay_im::{ConnectionHandle, RelayImServer};

fn test_server() -> (RelayImServer, BrokerReceivers) {
    let mut cfg = AppConfig::default();
    cfg.im.send_interval_ms = 0;
    RelayImServer::new(cfg).unwrap()
}

fn connect(
    server: &RelayImServer,
    account: u64,
) -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = ConnectionHandle::new(account, tx);
    server.registry.register(conn.clone());
    (conn, rx)
}

fn next_env(rx: &mut mpsc::UnboundedReceiver<Message>) -> Envelope {
    match rx.try_recv().expect("expected a frame") {
        Message::Text(t) => serde_json::from_str(&t).unwrap(),
        other => panic!("unexpected frame: {:?}", other),
    }
}

fn make_room(server: &RelayImServer, session_id: &str, owner: u64, members: &[u64]) {
    for m in members {
        server.graph.follow(owner, *m);
        server.graph.follow(*m, owner);
    }
    server
        .rooms
        .apply(
            &server.graph,
            &RoomCommand::Create {
                session_id: session_id.to_string(),
                requester: owner,
                members: members.to_vec(),
                name: "测试群".to_string(),
            },
        )
        .unwrap();
}

fn frame(session_id: &str, seq: &str, content: &str) -> InboundFrame {
    InboundFrame {
        sequence_id: seq.to_string(),
        session_id: session_id.to_string(),
        content: content.to_string(),
        message_type: MessageType::Text,
    }
}

#[tokio::test]
async fn offline_backlog_replayed_on_reconnect() {
    let (server, mut receivers) = test_server();
    make_room(&server, "s1", 1, &[2]);

    // 账号2离线时账号1发消息 / Account 1 sends while account 2 is offline
    let (conn1, mut rx1) = connect(&server, 1);
    let ack = server.ingest_frame(&conn1, frame("s1", "1", "hello")).await;
    assert_eq!(ack.code, CODE_OK);
    assert_eq!(ack.sequence_id, "2");

    let msg = receivers.messages.recv().await.unwrap();
    server.fan_out(msg).await;
    assert_eq!(server.hot.zcard(&keys::backlog(2)), 1);
    assert!(rx1.try_recv().is_err()); // 发送方不收自己的消息 / No echo to sender

    // 重连重放 / Reconnect and replay
    let (conn2, mut rx2) = connect(&server, 2);
    server.replay_backlog(&conn2).await;

    let unread = next_env(&mut rx2);
    assert_eq!(unread.message.as_deref(), Some("未读消息数量"));
    assert_eq!(unread.data, serde_json::json!(1));

    let chat = next_env(&mut rx2);
    assert_eq!(chat.message.as_deref(), Some("chat"));
    assert_eq!(chat.data["content"], "hello");
    assert_eq!(chat.data["senderId"], 1);

    // 积压已清空，二次重连不再重复 / Backlog drained, a second replay is empty
    assert_eq!(server.hot.zcard(&keys::backlog(2)), 0);
}

#[tokio::test]
async fn duplicate_sequence_rejected_without_watermark_advance() {
    let (server, mut receivers) = test_server();
    make_room(&server, "s1", 1, &[2]);
    let (conn1, _rx1) = connect(&server, 1);

    let ack = server.ingest_frame(&conn1, frame("s1", "5", "first")).await;
    assert_eq!(ack.code, CODE_OK);
    assert_eq!(ack.sequence_id, "6");
    assert!(receivers.messages.recv().await.is_some());

    // 同序列重发被拒，回执仍指示下一个可用序列
    // A resend with the same sequence is rejected; the ack still names the
    // minimum next usable value
    let dup = server.ingest_frame(&conn1, frame("s1", "5", "again")).await;
    assert_eq!(dup.code, RejectReason::SequenceNotMonotonic.code());
    assert_eq!(dup.sequence_id, "6");
    assert!(receivers.messages.try_recv().is_err());

    // 更大的序列照常放行 / A higher sequence passes as usual
    let next = server.ingest_frame(&conn1, frame("s1", "6", "second")).await;
    assert_eq!(next.code, CODE_OK);
    assert_eq!(next.sequence_id, "7");
}

#[tokio::test]
async fn muted_member_cannot_send_until_unmuted() {
    let (server, mut receivers) = test_server();
    make_room(&server, "s1", 1, &[2, 3]);
    let (conn2, _rx2) = connect(&server, 2);

    server.rooms.mute("s1", 1, 2).unwrap();
    let rejected = server.ingest_frame(&conn2, frame("s1", "1", "hi")).await;
    assert_eq!(rejected.code, RejectReason::Muted.code());
    assert!(receivers.messages.try_recv().is_err());

    server.rooms.unmute("s1", 1, 2).unwrap();
    let accepted = server.ingest_frame(&conn2, frame("s1", "1", "hi")).await;
    assert_eq!(accepted.code, CODE_OK);
}

#[tokio::test]
async fn blocked_sender_rejected_in_direct_session() {
    let (server, _receivers) = test_server();
    make_room(&server, "d1", 1, &[2]);
    let (conn1, _rx1) = connect(&server, 1);

    server.graph.block(2, 1);
    let rejected = server.ingest_frame(&conn1, frame("d1", "1", "hey")).await;
    assert_eq!(rejected.code, RejectReason::Blocked.code());

    server.graph.unblock(2, 1);
    let accepted = server.ingest_frame(&conn1, frame("d1", "1", "hey")).await;
    assert_eq!(accepted.code, CODE_OK);
}

#[tokio::test]
async fn flushed_messages_replayed_from_durable_store() {
    let (server, mut receivers) = test_server();
    make_room(&server, "s1", 1, &[2]);
    let (conn1, _rx1) = connect(&server, 1);

    server.ingest_frame(&conn1, frame("s1", "1", "深水消息")).await;
    let msg = receivers.messages.recv().await.unwrap();
    server.fan_out(msg).await;

    // 刷盘把消息体从热缓存挪到冷存 / The flush moves the body to durable storage
    assert_eq!(server.flush_hot_cache().unwrap(), 1);
    assert_eq!(server.hot.hlen(keys::HOT_MSG), 0);

    let (conn2, mut rx2) = connect(&server, 2);
    server.replay_backlog(&conn2).await;

    let unread = next_env(&mut rx2);
    assert_eq!(unread.data, serde_json::json!(1));
    let chat = next_env(&mut rx2);
    assert_eq!(chat.data["content"], "深水消息");
}

#[tokio::test]
async fn flush_is_idempotent() {
    let (server, mut receivers) = test_server();
    make_room(&server, "s1", 1, &[2]);
    let (conn1, _rx1) = connect(&server, 1);

    server.ingest_frame(&conn1, frame("s1", "1", "once")).await;
    let msg = receivers.messages.recv().await.unwrap();
    server.fan_out(msg).await;

    assert_eq!(server.flush_hot_cache().unwrap(), 1);
    assert_eq!(server.flush_hot_cache().unwrap(), 0);
}

/// 写入必败的持久层 / A durable tier whose writes always fail
struct BrokenStore;

impl DurableStore for BrokenStore {
    fn insert_messages(&self, _batch: &[ChatMessage]) -> anyhow::Result<usize> {
        anyhow::bail!("disk detached")
    }
    fn fetch_messages(&self, _ids: &[i64]) -> anyhow::Result<Vec<ChatMessage>> {
        Ok(Vec::new())
    }
    fn fetch_session_range(
        &self,
        _session_id: &str,
        _from_ms: i64,
        _to_ms: i64,
    ) -> anyhow::Result<Vec<ChatMessage>> {
        Ok(Vec::new())
    }
    fn upsert_member(&self, _session_id: &str, _account_id: u64, _level: i8) -> anyhow::Result<()> {
        Ok(())
    }
    fn delete_member(&self, _session_id: &str, _account_id: u64) -> anyhow::Result<()> {
        Ok(())
    }
    fn delete_session(&self, _session_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
    fn sessions_for(&self, _account_id: u64) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn failed_flush_keeps_entries_hot_for_retry() {
    let mut cfg = AppConfig::default();
    cfg.im.send_interval_ms = 0;
    let (server, mut receivers) =
        RelayImServer::with_storage(cfg, Arc::new(BrokenStore), SocialGraph::new()).unwrap();
    make_room(&server, "s1", 1, &[2]);
    let (conn1, _rx1) = connect(&server, 1);

    server.ingest_frame(&conn1, frame("s1", "1", "重要")).await;
    let msg = receivers.messages.recv().await.unwrap();
    server.fan_out(msg).await;

    // 刷盘失败时热缓存与触达集合原样保留，下一轮重试
    // A failed flush leaves the hot cache and the touched set intact
    let err = server.flush_hot_cache().unwrap_err();
    assert!(err.to_string().contains("persistence failure"));
    assert_eq!(server.hot.hlen(keys::HOT_MSG), 1);
    assert!(server.hot.sismember(keys::TOUCHED_SET, "2"));
}

#[tokio::test]
async fn fan_out_drops_duplicate_message_ids() {
    let (server, mut receivers) = test_server();
    make_room(&server, "s1", 1, &[2]);
    let (conn1, _rx1) = connect(&server, 1);
    let (_conn2, mut rx2) = connect(&server, 2);

    server.ingest_frame(&conn1, frame("s1", "1", "solo")).await;
    let msg = receivers.messages.recv().await.unwrap();
    server.fan_out(msg.clone()).await;
    server.fan_out(msg).await;

    assert!(rx2.try_recv().is_ok());
    assert!(rx2.try_recv().is_err());
}

#[tokio::test]
async fn sequence_at_numeric_ceiling_rejected_as_malformed() {
    let (server, mut receivers) = test_server();
    make_room(&server, "s1", 1, &[2]);
    let (conn1, _rx1) = connect(&server, 1);

    // 回执要携带seq+1，顶格序列没有下一个值可报
    // The ack carries seq+1; a sequence at the ceiling has no next value
    let ceiling = i64::MAX.to_string();
    let rejected = server.ingest_frame(&conn1, frame("s1", &ceiling, "edge")).await;
    assert_eq!(rejected.code, RejectReason::Malformed.code());
    assert_eq!(rejected.sequence_id, "1");
    assert!(receivers.messages.try_recv().is_err());

    // 水位未动，正常序列照常放行 / Watermark untouched, a normal sequence passes
    let accepted = server.ingest_frame(&conn1, frame("s1", "1", "fine")).await;
    assert_eq!(accepted.code, CODE_OK);
    assert_eq!(accepted.sequence_id, "2");
}

#[tokio::test]
async fn rapid_sends_are_rate_limited() {
    let mut cfg = AppConfig::default();
    cfg.im.send_interval_ms = 60_000;
    let (server, mut receivers) = RelayImServer::new(cfg).unwrap();
    make_room(&server, "s1", 1, &[2]);
    let (conn1, _rx1) = connect(&server, 1);

    let first = server.ingest_frame(&conn1, frame("s1", "1", "快")).await;
    assert_eq!(first.code, CODE_OK);
    assert_eq!(first.sequence_id, "2");
    assert!(receivers.messages.recv().await.is_some());

    // 间隔内的第二条被限速且水位不动 / The second send inside the window is
    // throttled and the watermark stays put
    let second = server.ingest_frame(&conn1, frame("s1", "2", "更快")).await;
    assert_eq!(second.code, RejectReason::RateLimited.code());
    assert_eq!(second.sequence_id, "2");
    assert!(receivers.messages.try_recv().is_err());
}

#[tokio::test]
async fn non_participant_cannot_send() {
    let (server, _receivers) = test_server();
    make_room(&server, "s1", 1, &[2]);
    let (conn9, _rx9) = connect(&server, 9);

    let rejected = server.ingest_frame(&conn9, frame("s1", "1", "intruder")).await;
    assert_eq!(rejected.code, RejectReason::NotParticipant.code());
}
