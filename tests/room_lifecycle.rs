//! 房间工作流与提醒测试：建群好友门禁、角色调整、踢出/解散的快存
//! 即时生效，以及提醒的在线/离线两条路径
//! Room workflow & reminder tests: the friendship gate, role changes,
//! immediate fast-store effect of kick/dismiss, and both reminder paths

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use relay_im::broker::{BrokerReceivers, ReminderRequest, RoomCommand};
use relay_im::config::AppConfig;
use relay_im::domain::message::{Envelope, MessageType};
use relay_im::domain::role::Role;
use relay_im::store::keys;
use relay_im::{ConnectionHandle, RelayImServer};

fn test_server() -> (RelayImServer, BrokerReceivers) {
    let mut cfg = AppConfig::default();
    cfg.im.send_interval_ms = 0;
    cfg.im.teardown_delay_secs = 0;
    RelayImServer::new(cfg).unwrap()
}

fn befriend(server: &RelayImServer, a: u64, b: u64) {
    server.graph.follow(a, b);
    server.graph.follow(b, a);
}

fn create_room(server: &RelayImServer, session_id: &str, owner: u64, members: &[u64]) {
    for m in members {
        befriend(server, owner, *m);
    }
    server
        .rooms
        .apply(
            &server.graph,
            &RoomCommand::Create {
                session_id: session_id.to_string(),
                requester: owner,
                members: members.to_vec(),
                name: "群".to_string(),
            },
        )
        .unwrap();
}

#[tokio::test]
async fn create_skips_non_friend_invitees() {
    let (server, _receivers) = test_server();
    befriend(&server, 1, 2);
    // 3与1不是好友 / 3 is not a friend of 1
    server
        .rooms
        .apply(
            &server.graph,
            &RoomCommand::Create {
                session_id: "r1".to_string(),
                requester: 1,
                members: vec![2, 3],
                name: "群".to_string(),
            },
        )
        .unwrap();

    assert_eq!(server.rooms.members("r1"), vec![1, 2]);
    assert_eq!(server.rooms.role_of("r1", 1), Some(Role::Owner));
    assert!(!server.rooms.is_member("r1", 3));
}

#[tokio::test]
async fn invite_requires_moderator_and_friendship() {
    let (server, _receivers) = test_server();
    create_room(&server, "r1", 1, &[2]);
    befriend(&server, 2, 4);

    // 普通成员不能邀请 / A plain member may not invite
    let denied = server.rooms.apply(
        &server.graph,
        &RoomCommand::Invite {
            session_id: "r1".to_string(),
            requester: 2,
            members: vec![4],
        },
    );
    assert!(denied.is_err());
    assert!(!server.rooms.is_member("r1", 4));

    // 提升为管理员后放行 / Allowed once promoted to admin
    server.rooms.promote("r1", 1, 2).unwrap();
    server
        .rooms
        .apply(
            &server.graph,
            &RoomCommand::Invite {
                session_id: "r1".to_string(),
                requester: 2,
                members: vec![4],
            },
        )
        .unwrap();
    assert_eq!(server.rooms.role_of("r1", 4), Some(Role::Member));
}

#[tokio::test]
async fn only_owner_adjusts_admins_and_owner_is_protected() {
    let (server, _receivers) = test_server();
    create_room(&server, "r1", 1, &[2, 3]);

    server.rooms.promote("r1", 1, 2).unwrap();
    assert_eq!(server.rooms.role_of("r1", 2), Some(Role::Admin));
    // 管理员不能再提拔别人 / An admin may not promote others
    assert!(server.rooms.promote("r1", 2, 3).is_err());
    // 群主不可被禁言或踢出 / The owner may not be muted or kicked
    assert!(server.rooms.mute("r1", 2, 1).is_err());
    assert!(server.rooms.kick("r1", 2, 1).is_err());

    server.rooms.demote("r1", 1, 2).unwrap();
    assert_eq!(server.rooms.role_of("r1", 2), Some(Role::Member));
}

#[tokio::test]
async fn mute_restores_prior_role_on_unmute() {
    let (server, _receivers) = test_server();
    create_room(&server, "r1", 1, &[2]);
    server.rooms.promote("r1", 1, 2).unwrap();

    server.rooms.mute("r1", 1, 2).unwrap();
    assert_eq!(server.rooms.role_of("r1", 2), Some(Role::Muted));
    server.rooms.unmute("r1", 1, 2).unwrap();
    // 解禁恢复禁言前的角色 / Unmute restores the pre-mute role
    assert_eq!(server.rooms.role_of("r1", 2), Some(Role::Admin));
}

#[tokio::test]
async fn kick_takes_effect_in_fast_store_immediately() {
    let (server, _receivers) = test_server();
    create_room(&server, "r1", 1, &[2]);

    server.rooms.kick("r1", 1, 2).unwrap();
    assert!(!server.rooms.is_member("r1", 2));
    assert!(!server.hot.sismember(&keys::account_sessions(2), "r1"));
}

#[tokio::test]
async fn dismiss_clears_all_members_and_is_owner_only() {
    let (server, _receivers) = test_server();
    create_room(&server, "r1", 1, &[2, 3]);

    assert!(server.rooms.dismiss("r1", 2).is_err());
    server.rooms.dismiss("r1", 1).unwrap();
    assert!(server.rooms.members("r1").is_empty());
    assert!(!server.hot.sismember(&keys::account_sessions(3), "r1"));
}

#[tokio::test]
async fn moderation_notice_enters_message_pipeline() {
    let (server, mut receivers) = test_server();
    create_room(&server, "r1", 1, &[2]);

    // 角色调整的系统通知照常进消息管线，由扇出消费者投递
    // A role change's system notice travels the normal message pipeline
    // and is delivered by the fan-out consumer
    server.moderate(server.rooms.mute("r1", 1, 2)).unwrap();
    let notice = receivers.messages.recv().await.unwrap();
    assert_eq!(notice.msg_type, MessageType::System);
    assert_eq!(notice.session_id, "r1");

    // 失败的调整不产生通知 / A failed change publishes nothing
    assert!(server.moderate(server.rooms.promote("r1", 2, 1)).is_err());
    assert!(receivers.messages.try_recv().is_err());
}

#[tokio::test]
async fn due_reminder_pushes_to_live_connection() {
    let (server, _receivers) = test_server();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let conn = ConnectionHandle::new(7, tx);
    server.registry.register(conn);

    server.dispatch_reminder(ReminderRequest {
        account_id: 7,
        content: "开会".to_string(),
        remind_at: 0,
    });

    let Message::Text(t) = rx.try_recv().unwrap() else {
        panic!("expected text frame");
    };
    let env: Envelope = serde_json::from_str(&t).unwrap();
    assert_eq!(env.message.as_deref(), Some("reminder"));
    assert_eq!(env.data["content"], "开会");
}

#[tokio::test]
async fn offline_reminder_queues_for_replay() {
    let (server, _receivers) = test_server();
    server.dispatch_reminder(ReminderRequest {
        account_id: 8,
        content: "迟到提醒".to_string(),
        remind_at: 1,
    });
    assert_eq!(server.hot.zcard(&keys::reminders(8)), 1);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let conn = ConnectionHandle::new(8, tx);
    server.registry.register(conn.clone());
    server.replay_backlog(&conn).await;

    // 未读清单在前，提醒随后 / The unread count precedes the reminder
    let Message::Text(first) = rx.try_recv().unwrap() else {
        panic!("expected text frame");
    };
    let unread: Envelope = serde_json::from_str(&first).unwrap();
    assert_eq!(unread.data, serde_json::json!(0));

    let Message::Text(second) = rx.try_recv().unwrap() else {
        panic!("expected text frame");
    };
    let env: Envelope = serde_json::from_str(&second).unwrap();
    assert_eq!(env.message.as_deref(), Some("reminder"));
    assert_eq!(server.hot.zcard(&keys::reminders(8)), 0);
}
