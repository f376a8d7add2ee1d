use std::time::Duration;

use tokio::time::Instant;

use ion_types::events::{ClientCommand, ServerEvent};

use super::support::{Client, Harness};
use crate::session::handle_command;

fn typing_events(client: &mut Client) -> Vec<(String, bool)> {
    client
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            ServerEvent::Typing(p) => Some((p.username, p.typing)),
            _ => None,
        })
        .collect()
}

async fn room_of_three(h: &Harness) -> (Client, Client, Client) {
    let mut s = h.client("sam").await;
    let mut t = h.client("tia").await;
    let mut u = h.client("uma").await;
    h.dispatcher.join_room(&mut s.session, "42").await;
    h.dispatcher.join_room(&mut t.session, "42").await;
    h.dispatcher.join_room(&mut u.session, "7").await;
    (s, t, u)
}

#[tokio::test]
async fn typing_reaches_others_but_not_the_typist() {
    let h = Harness::new();
    let (mut s, mut t, mut u) = room_of_three(&h).await;

    handle_command(
        &h.dispatcher,
        &mut s.session,
        serde_json::from_str::<ClientCommand>(r#"{"type":"typing","data":{"roomId":"42","typing":true}}"#).unwrap(),
    )
    .await;

    assert_eq!(typing_events(&mut t), vec![("sam".to_string(), true)]);
    assert!(s.drain().is_empty());
    assert!(u.drain().is_empty());

    h.dispatcher.typing(&s.session, "42", false).await;
    assert_eq!(typing_events(&mut t), vec![("sam".to_string(), false)]);
}

#[tokio::test]
async fn stale_indicators_expire_with_a_false_signal() {
    let h = Harness::new();
    let (s, mut t, _u) = room_of_three(&h).await;

    h.dispatcher.typing(&s.session, "42", true).await;
    t.drain();

    // Still inside the window.
    assert_eq!(h.dispatcher.sweep_typing(Instant::now()).await, 0);
    assert!(t.drain().is_empty());

    let later = Instant::now() + Duration::from_secs(6);
    assert_eq!(h.dispatcher.sweep_typing(later).await, 1);
    assert_eq!(typing_events(&mut t), vec![("sam".to_string(), false)]);

    // Nothing left to expire.
    assert_eq!(h.dispatcher.sweep_typing(later).await, 0);
}

#[tokio::test]
async fn explicit_stop_is_not_expired_again() {
    let h = Harness::new();
    let (s, mut t, _u) = room_of_three(&h).await;

    h.dispatcher.typing(&s.session, "42", true).await;
    h.dispatcher.typing(&s.session, "42", false).await;
    t.drain();

    assert_eq!(h.dispatcher.sweep_typing(Instant::now() + Duration::from_secs(60)).await, 0);
    assert!(t.drain().is_empty());
}

#[tokio::test]
async fn disconnect_clears_typing_for_the_room() {
    let h = Harness::new();
    let (s, mut t, _u) = room_of_three(&h).await;

    h.dispatcher.typing(&s.session, "42", true).await;
    t.drain();

    h.dispatcher.disconnect(s.session.handle()).await;
    assert_eq!(typing_events(&mut t), vec![("sam".to_string(), false)]);
}

#[tokio::test]
async fn leaving_clears_typing_for_the_room() {
    let h = Harness::new();
    let (mut s, mut t, _u) = room_of_three(&h).await;

    h.dispatcher.typing(&s.session, "42", true).await;
    t.drain();

    h.dispatcher.leave_room(&mut s.session, "42").await;
    assert_eq!(typing_events(&mut t), vec![("sam".to_string(), false)]);
    assert!(s.drain().is_empty());
}

#[tokio::test]
async fn typing_in_an_empty_room_goes_nowhere() {
    let h = Harness::new();
    let (s, mut t, mut u) = room_of_three(&h).await;

    h.dispatcher.typing(&s.session, "nobody-here", true).await;
    assert!(t.drain().is_empty());
    assert!(u.drain().is_empty());
}

#[tokio::test]
async fn a_user_stops_typing_only_when_every_tab_has_stopped() {
    let h = Harness::new();
    let (mut s, mut t, _u) = room_of_three(&h).await;
    let mut tab = h.client_for(s.user_id()).await;
    h.dispatcher.join_room(&mut tab.session, "42").await;

    h.dispatcher.typing(&s.session, "42", true).await;
    h.dispatcher.typing(&tab.session, "42", true).await;
    assert_eq!(
        typing_events(&mut t),
        vec![("sam".to_string(), true), ("sam".to_string(), true)]
    );

    h.dispatcher.typing(&s.session, "42", false).await;
    assert!(typing_events(&mut t).is_empty());

    h.dispatcher.typing(&tab.session, "42", false).await;
    assert_eq!(typing_events(&mut t), vec![("sam".to_string(), false)]);
    s.drain();
}

#[tokio::test]
async fn closing_one_tab_keeps_the_other_tabs_indicator() {
    let h = Harness::new();
    let (mut s, mut t, _u) = room_of_three(&h).await;
    let mut tab = h.client_for(s.user_id()).await;
    h.dispatcher.join_room(&mut tab.session, "42").await;

    h.dispatcher.typing(&s.session, "42", true).await;
    h.dispatcher.typing(&tab.session, "42", true).await;
    t.drain();

    h.dispatcher.disconnect(tab.session.handle()).await;
    assert!(typing_events(&mut t).is_empty());

    h.dispatcher.leave_room(&mut s.session, "42").await;
    assert_eq!(typing_events(&mut t), vec![("sam".to_string(), false)]);
}
