/// Tests for the channel lifecycle against an in-process backend.
use std::time::Duration;

use serde_json::json;
use tokio::net::TcpListener;

use crate::channel::{Channel, ConnectionState};
use crate::error::ChannelError;
use crate::tests::backend::{wait_until, MockBackend};
use crate::types::OutboundRequest;

const QUIET: Duration = Duration::from_millis(200);

async fn open_pair(backend: &mut MockBackend) -> (Channel, crate::tests::backend::BackendConn) {
    let channel = Channel::open(&backend.url).unwrap();
    let conn = backend.accept().await;
    assert_eq!(channel.ready().await, ConnectionState::Open);
    (channel, conn)
}

// ── open ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn malformed_address_fails_at_open() {
    assert!(matches!(
        Channel::open("not a url"),
        Err(ChannelError::InvalidAddress { .. })
    ));
    assert!(matches!(
        Channel::open("http://localhost:8765"),
        Err(ChannelError::UnsupportedScheme(s)) if s == "http"
    ));
}

#[tokio::test]
async fn refused_connection_ends_closed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let channel = Channel::open(&format!("ws://{addr}")).unwrap();
    assert_eq!(channel.ready().await, ConnectionState::Closed);
    assert!(channel.snapshot().is_empty());
}

#[tokio::test]
async fn opens_with_empty_log() {
    let mut backend = MockBackend::start().await;
    let (channel, _conn) = open_pair(&mut backend).await;
    assert!(channel.is_open());
    assert!(channel.snapshot().is_empty());
    assert_eq!(channel.address().scheme(), "ws");
}

// ── request / response ───────────────────────────────────────────────────────

#[tokio::test]
async fn accounts_round_trip_lands_last_in_log() {
    let mut backend = MockBackend::start().await;
    let (channel, mut conn) = open_pair(&mut backend).await;
    let mut log = channel.messages();

    channel.send(&OutboundRequest::new("accounts"));
    assert_eq!(conn.recv_json().await, json!({"action": "accounts"}));

    let reply = json!({
        "action": "accounts",
        "isError": false,
        "result": {"accounts": [{"segment": "a1", "title": "first@example.com"}]}
    });
    conn.send_json(reply.clone()).await;

    wait_until(&mut log, |l| l.len() == 1).await;
    let snapshot = channel.snapshot();
    let last = snapshot.last().unwrap();
    assert_eq!(last.action(), Some("accounts"));
    assert!(!last.is_error());
    assert_eq!(serde_json::to_value(last).unwrap(), reply);
}

#[tokio::test]
async fn each_send_is_transmitted_once() {
    let mut backend = MockBackend::start().await;
    let (channel, mut conn) = open_pair(&mut backend).await;

    channel.send(&OutboundRequest::new("bot_start"));
    channel.send(&OutboundRequest::new("bot_status"));

    assert_eq!(conn.recv_json().await["action"], json!("bot_start"));
    assert_eq!(conn.recv_json().await["action"], json!("bot_status"));
    assert!(conn.recv_json_within(QUIET).await.is_none());
}

#[tokio::test]
async fn frames_keep_arrival_order_and_all_fields() {
    let mut backend = MockBackend::start().await;
    let (channel, mut conn) = open_pair(&mut backend).await;
    let mut log = channel.messages();

    for n in 0..20 {
        conn.send_json(json!({"action": "log", "seq": n, "rowId": format!("r{n}"), "extra": {"n": n}}))
            .await;
    }
    wait_until(&mut log, |l| l.len() == 20).await;

    let snapshot = channel.snapshot();
    for (n, m) in snapshot.iter().enumerate() {
        assert_eq!(m.get("seq"), Some(&json!(n)));
        assert_eq!(m.get("rowId"), Some(&json!(format!("r{n}"))));
        assert_eq!(m.get("extra"), Some(&json!({"n": n})));
    }
}

#[tokio::test]
async fn application_errors_pass_through() {
    let mut backend = MockBackend::start().await;
    let (channel, mut conn) = open_pair(&mut backend).await;
    let mut log = channel.messages();

    conn.send_json(json!({"action": "set_config", "isError": true, "error": {"message": "invalid"}}))
        .await;
    wait_until(&mut log, |l| l.len() == 1).await;

    let snapshot = channel.snapshot();
    let m = snapshot.latest("set_config").unwrap();
    assert!(m.is_error());
    assert_eq!(m.error().unwrap().message, "invalid");
    assert!(channel.is_open());
}

#[tokio::test]
async fn undecodable_frames_are_skipped() {
    let mut backend = MockBackend::start().await;
    let (channel, mut conn) = open_pair(&mut backend).await;
    let mut log = channel.messages();

    conn.send_raw("definitely not json").await;
    conn.send_raw("[1, 2, 3]").await;
    conn.send_json(json!({"action": "ok"})).await;

    wait_until(&mut log, |l| l.received() == 1).await;
    let snapshot = channel.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.last().unwrap().action(), Some("ok"));
    assert!(channel.is_open());
}

// ── bounded reset ────────────────────────────────────────────────────────────

#[tokio::test]
async fn sixty_frames_leave_frames_51_to_60() {
    let mut backend = MockBackend::start().await;
    let (channel, mut conn) = open_pair(&mut backend).await;
    let mut log = channel.messages();

    for n in 1..=60 {
        conn.send_json(json!({"action": "tick", "result": n})).await;
    }
    wait_until(&mut log, |l| l.received() == 60).await;

    let snapshot = channel.snapshot();
    assert_eq!(snapshot.len(), 10);
    assert_eq!(snapshot.resets(), 1);
    let seqs: Vec<u64> = snapshot
        .iter()
        .map(|m| m.result().and_then(|r| r.as_u64()).unwrap())
        .collect();
    assert_eq!(seqs, (51..=60).collect::<Vec<_>>());
}

// ── not open ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn send_while_connecting_is_not_queued() {
    // Accept TCP but hold the websocket handshake back.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let channel = Channel::open(&format!("ws://{addr}")).unwrap();
    let (stream, _) = listener.accept().await.unwrap();
    assert_eq!(channel.state(), ConnectionState::Connecting);

    channel.send(&OutboundRequest::new("accounts"));
    assert!(channel.snapshot().is_empty());

    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
    assert_eq!(channel.ready().await, ConnectionState::Open);

    let early = tokio::time::timeout(QUIET, futures_util::StreamExt::next(&mut ws)).await;
    assert!(early.is_err(), "request sent while connecting must be dropped");
}

#[tokio::test]
async fn abrupt_peer_close_leaves_channel_closed() {
    let mut backend = MockBackend::start().await;
    let (channel, conn) = open_pair(&mut backend).await;
    let mut states = channel.states();

    drop(conn);
    wait_until(&mut states, |s| *s == ConnectionState::Closed).await;

    channel.send(&OutboundRequest::new("accounts"));
    channel.send(&OutboundRequest::new("bot_status"));
    assert_eq!(channel.state(), ConnectionState::Closed);
    assert!(channel.snapshot().is_empty());
    // no automatic reconnect
    assert!(backend.no_new_connection(QUIET).await);
}

// ── close / independence ─────────────────────────────────────────────────────

#[tokio::test]
async fn close_releases_transport() {
    let mut backend = MockBackend::start().await;
    let (channel, mut conn) = open_pair(&mut backend).await;

    channel.close().await;
    assert!(conn.closed_by_client().await);
}

#[tokio::test]
async fn drop_releases_transport() {
    let mut backend = MockBackend::start().await;
    let (channel, mut conn) = open_pair(&mut backend).await;

    drop(channel);
    assert!(conn.closed_by_client().await);
}

#[tokio::test]
async fn reopened_channel_is_independent_of_the_closed_one() {
    let mut backend = MockBackend::start().await;
    let (first, mut first_conn) = open_pair(&mut backend).await;
    let mut first_log = first.messages();
    first_conn.send_json(json!({"action": "old"})).await;
    wait_until(&mut first_log, |l| l.len() == 1).await;
    first.close().await;

    let (second, mut second_conn) = open_pair(&mut backend).await;
    let mut second_log = second.messages();
    assert!(second.snapshot().is_empty());

    second_conn.send_json(json!({"action": "new"})).await;
    wait_until(&mut second_log, |l| l.len() == 1).await;
    tokio::time::sleep(QUIET).await;

    let snapshot = second.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.latest("old").is_none());
    assert!(snapshot.latest("new").is_some());
}

#[tokio::test]
async fn two_consumers_on_one_address_do_not_share_logs() {
    let mut backend = MockBackend::start().await;
    let (a, mut a_conn) = open_pair(&mut backend).await;
    let (b, mut b_conn) = open_pair(&mut backend).await;

    a.send(&OutboundRequest::new("tickets").with("email", "a@x.com"));
    assert_eq!(a_conn.recv_json().await["email"], json!("a@x.com"));
    assert!(b_conn.recv_json_within(QUIET).await.is_none());

    let mut a_log = a.messages();
    a_conn.send_json(json!({"action": "tickets", "email": "a@x.com", "result": []})).await;
    wait_until(&mut a_log, |l| l.len() == 1).await;
    tokio::time::sleep(QUIET).await;

    assert!(b.snapshot().is_empty());
    assert_eq!(a.snapshot().len(), 1);
}
