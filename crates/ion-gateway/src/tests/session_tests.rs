use std::time::Duration;

use ion_types::events::{ClientCommand, ServerEvent};

use super::support::Harness;
use crate::connection::abort_and_wait;
use crate::error::ConnectError;
use crate::session::handle_command;

fn command(raw: &str) -> ClientCommand {
    serde_json::from_str(raw).unwrap()
}

#[tokio::test]
async fn joining_twice_keeps_a_single_membership() {
    let h = Harness::new();
    let mut s = h.client("sam").await;

    handle_command(&h.dispatcher, &mut s.session, command(r#"{"type":"joinRoom","data":"42"}"#)).await;
    handle_command(&h.dispatcher, &mut s.session, command(r#"{"type":"joinRoom","data":" 42 "}"#)).await;

    assert!(s.session.is_joined("42"));
    assert_eq!(s.session.rooms().len(), 1);
    assert_eq!(h.dispatcher.room_members("42").await, 1);

    // One membership means one delivery per message.
    h.dispatcher.send_message(&s.session, "42", "hi").await.unwrap();
    assert_eq!(s.drain().len(), 1);
}

#[tokio::test]
async fn leaving_stops_delivery() {
    let h = Harness::new();
    let mut s = h.client("sam").await;
    let mut t = h.client("tia").await;
    h.dispatcher.join_room(&mut t.session, "42").await;

    handle_command(&h.dispatcher, &mut t.session, command(r#"{"type":"leaveRoom","data":"42"}"#)).await;
    assert!(!t.session.is_joined("42"));
    assert_eq!(h.dispatcher.room_members("42").await, 0);

    h.dispatcher.send_message(&s.session, "42", "anyone?").await.unwrap();
    assert!(t.drain().is_empty());
    assert!(s.drain().is_empty());

    // Leaving a room never joined is a no-op.
    assert!(!h.dispatcher.leave_room(&mut t.session, "99").await);
}

#[tokio::test]
async fn blank_room_ids_are_not_joined() {
    let h = Harness::new();
    let mut s = h.client("sam").await;
    assert!(!h.dispatcher.join_room(&mut s.session, "  ").await);
    assert!(s.session.rooms().is_empty());
    assert_eq!(h.dispatcher.room_count().await, 0);
}

#[tokio::test]
async fn rejected_send_is_acknowledged_with_the_reason() {
    let h = Harness::new();
    let mut s = h.client("sam").await;
    handle_command(
        &h.dispatcher,
        &mut s.session,
        command(r#"{"type":"sendMessage","data":{"roomId":"42","content":"","requestId":"q"}}"#),
    )
    .await;

    match s.drain().as_slice() {
        [ServerEvent::Ack(ack)] => {
            assert!(!ack.ok);
            assert_eq!(ack.request_id.as_deref(), Some("q"));
            assert!(ack.message_id.is_none());
            assert!(ack.error.is_some());
        }
        other => panic!("unexpected events {:?}", other),
    }
    assert!(h.store.stored().is_empty());
}

#[tokio::test]
async fn non_image_refs_are_rejected() {
    let h = Harness::new();
    let mut s = h.client("sam").await;
    h.dispatcher.join_room(&mut s.session, "42").await;

    assert!(h.dispatcher.send_image(&s.session, "42", "not a link").await.is_err());
    assert!(h.store.stored().is_empty());
    assert!(s.drain().is_empty());
}

#[tokio::test]
async fn disconnect_removes_every_membership() {
    let h = Harness::new();
    let mut s = h.client("sam").await;
    let mut t = h.client("tia").await;
    h.dispatcher.join_room(&mut s.session, "1").await;
    h.dispatcher.join_room(&mut s.session, "2").await;
    h.dispatcher.join_room(&mut t.session, "2").await;

    h.dispatcher.disconnect(s.session.handle()).await;

    assert_eq!(h.dispatcher.room_members("1").await, 0);
    assert_eq!(h.dispatcher.room_members("2").await, 1);
    assert_eq!(h.dispatcher.room_count().await, 1);

    h.dispatcher.send_message(&t.session, "2", "still here").await.unwrap();
    assert!(s.drain().is_empty());
    assert_eq!(t.drain().len(), 1);
}

#[tokio::test]
async fn unknown_users_cannot_connect() {
    let h = Harness::new();
    let err = h.dispatcher.connect(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, ConnectError::UnknownUser(_)));
}

#[tokio::test]
async fn sessions_of_one_user_are_independent() {
    let h = Harness::new();
    let mut first = h.client("sam").await;
    let mut second = h.client_for(first.user_id()).await;
    assert_ne!(first.session.conn_id(), second.session.conn_id());

    h.dispatcher.join_room(&mut first.session, "42").await;
    h.dispatcher.send_message(&first.session, "42", "hi").await.unwrap();

    assert_eq!(first.drain().len(), 1);
    assert!(second.drain().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn teardown_waits_for_a_join_already_underway() {
    let h = Harness::new();
    let s = h.client("sam").await;
    let handle = s.session.handle().clone();

    let dispatcher = h.dispatcher.clone();
    let mut session = s.session;
    let reader = tokio::spawn(async move {
        // Busy inside a command when the socket drops.
        std::thread::sleep(Duration::from_millis(100));
        dispatcher.join_room(&mut session, "42").await;
        std::future::pending::<()>().await;
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    abort_and_wait(reader).await;
    h.dispatcher.disconnect(&handle).await;

    assert_eq!(h.dispatcher.room_count().await, 0);
    assert_eq!(h.dispatcher.room_members("42").await, 0);
}
