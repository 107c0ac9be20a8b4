use super::*;
use crate::state::test_helpers;
use frames::{Envelope, Notice, encode_envelope};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type TestSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(addr: SocketAddr) -> TestSocket {
    let (socket, _) = connect_async(format!("ws://{addr}{}", crate::routes::WS_PATH))
        .await
        .expect("websocket connect");
    socket
}

/// Next text frame, skipping keepalive traffic.
async fn next_text(socket: &mut TestSocket) -> String {
    loop {
        let msg = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("receive timed out")
            .expect("stream ended unexpectedly")
            .expect("websocket error");
        match msg {
            WsMessage::Text(text) => return text.as_str().to_owned(),
            WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn assert_no_text(socket: &mut TestSocket) {
    let got = timeout(Duration::from_millis(150), socket.next()).await;
    assert!(
        !matches!(got, Ok(Some(Ok(WsMessage::Text(_))))),
        "expected no text frame, got {got:?}"
    );
}

/// Read until the server closes the connection. Returns whether a close
/// frame was seen before the stream ended.
async fn read_until_closed(socket: &mut TestSocket) -> bool {
    let deadline = Duration::from_secs(3);
    let mut saw_close = false;
    let result = timeout(deadline, async {
        while let Some(msg) = socket.next().await {
            match msg {
                Ok(WsMessage::Close(_)) => saw_close = true,
                Ok(_) => {}
                Err(_) => break,
            }
        }
    })
    .await;
    assert!(result.is_ok(), "server did not close the connection");
    saw_close
}

async fn send_text(socket: &mut TestSocket, text: &str) {
    socket
        .send(WsMessage::Text(text.into()))
        .await
        .expect("websocket send");
}

async fn welcome_id(socket: &mut TestSocket) -> String {
    match Notice::parse(&next_text(socket).await) {
        Some(Notice::Welcome { id }) => id,
        other => panic!("expected welcome notice first, got {other:?}"),
    }
}

async fn wait_until_absent(state: &AppState, id: &str) {
    timeout(Duration::from_secs(3), async {
        while state.hub.contains(id).await {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client was never unregistered");
}

// =============================================================================
// FRAME RELAY
// =============================================================================

#[tokio::test]
async fn relay_frame_forwards_raw_text() {
    let hub = Hub::new();
    let (client, mut rx) = Client::new("B", 8);
    hub.register(client).await.expect("register");
    let _welcome = rx.recv().await;

    let raw = r#"{"id":"B","message":"hi","note":"kept verbatim"}"#;
    assert_eq!(relay_frame(&hub, "A", raw).await, Some(RouteOutcome::Delivered));
    assert_eq!(rx.recv().await.as_deref(), Some(raw));
}

#[tokio::test]
async fn relay_frame_discards_malformed_input() {
    let hub = Hub::new();
    assert_eq!(relay_frame(&hub, "A", "not json").await, None);
    assert_eq!(relay_frame(&hub, "A", r#"{"id":"B"}"#).await, None);
    assert!(hub.is_empty().await);
}

#[tokio::test]
async fn relay_frame_to_unknown_target_reports_outcome() {
    let hub = Hub::new();
    let raw = encode_envelope(&Envelope::new("ghost", "boo"));
    assert_eq!(relay_frame(&hub, "A", &raw).await, Some(RouteOutcome::UnknownTarget));
}

// =============================================================================
// END TO END
// =============================================================================

#[tokio::test]
async fn two_client_scenario() {
    let state = test_helpers::test_app_state();
    let addr = test_helpers::spawn_server(state.clone()).await;

    let mut a = connect(addr).await;
    let a_id = welcome_id(&mut a).await;

    let mut b = connect(addr).await;
    let b_id = welcome_id(&mut b).await;
    assert_ne!(a_id, b_id);
    assert_eq!(Notice::parse(&next_text(&mut b).await), Some(Notice::Peers(vec![a_id.clone()])));
    assert_eq!(Notice::parse(&next_text(&mut a).await), Some(Notice::Peers(vec![b_id.clone()])));

    let hi = encode_envelope(&Envelope::new(b_id.clone(), "hi"));
    send_text(&mut a, &hi).await;
    assert_eq!(next_text(&mut b).await, hi);

    b.close(None).await.expect("close b");
    wait_until_absent(&state, &b_id).await;

    send_text(&mut a, &encode_envelope(&Envelope::new(b_id, "anyone?"))).await;
    assert_no_text(&mut a).await;

    // A's own connection is unaffected.
    let echo = encode_envelope(&Envelope::new(a_id.clone(), "still here"));
    send_text(&mut a, &echo).await;
    assert_eq!(next_text(&mut a).await, echo);
    assert!(state.hub.contains(&a_id).await);
}

#[tokio::test]
async fn messages_arrive_in_send_order() {
    let state = test_helpers::test_app_state();
    let addr = test_helpers::spawn_server(state).await;

    let mut b = connect(addr).await;
    let b_id = welcome_id(&mut b).await;
    let mut a = connect(addr).await;
    let _a_id = welcome_id(&mut a).await;
    let _peers = next_text(&mut a).await;
    let _join_notice = next_text(&mut b).await;

    let sent: Vec<String> = (0..20)
        .map(|i| encode_envelope(&Envelope::new(b_id.clone(), format!("m{i}"))))
        .collect();
    for frame in &sent {
        send_text(&mut a, frame).await;
    }
    for frame in &sent {
        assert_eq!(&next_text(&mut b).await, frame);
    }
}

#[tokio::test]
async fn malformed_frame_keeps_connection_open() {
    let state = test_helpers::test_app_state();
    let addr = test_helpers::spawn_server(state).await;

    let mut a = connect(addr).await;
    let a_id = welcome_id(&mut a).await;

    send_text(&mut a, "this is not an envelope").await;
    send_text(&mut a, r#"{"message":"no id"}"#).await;

    let echo = encode_envelope(&Envelope::new(a_id, "after garbage"));
    send_text(&mut a, &echo).await;
    assert_eq!(next_text(&mut a).await, echo);
}

#[tokio::test]
async fn binary_envelope_is_relayed_as_text() {
    let state = test_helpers::test_app_state();
    let addr = test_helpers::spawn_server(state).await;

    let mut a = connect(addr).await;
    let a_id = welcome_id(&mut a).await;

    let echo = encode_envelope(&Envelope::new(a_id, "via binary"));
    a.send(WsMessage::Binary(echo.clone().into_bytes().into()))
        .await
        .expect("send binary");
    assert_eq!(next_text(&mut a).await, echo);
}

#[tokio::test]
async fn oversized_frame_disconnects_client() {
    let state = test_helpers::test_app_state();
    let addr = test_helpers::spawn_server(state.clone()).await;

    let mut a = connect(addr).await;
    let a_id = welcome_id(&mut a).await;

    let big = encode_envelope(&Envelope::new(a_id.clone(), "x".repeat(600)));
    send_text(&mut a, &big).await;

    read_until_closed(&mut a).await;
    wait_until_absent(&state, &a_id).await;
}

#[tokio::test]
async fn keepalive_pings_keep_responsive_client_registered() {
    let state = test_helpers::test_app_state_with_timeouts(Duration::from_secs(1), Duration::from_millis(1000));
    let addr = test_helpers::spawn_server(state.clone()).await;

    let mut a = connect(addr).await;
    let a_id = welcome_id(&mut a).await;

    // Keep polling so tungstenite answers each ping with a pong.
    let mut pings = 0;
    let window = sleep(Duration::from_millis(2200));
    tokio::pin!(window);
    loop {
        tokio::select! {
            () = &mut window => break,
            msg = a.next() => match msg {
                Some(Ok(WsMessage::Ping(_))) => pings += 1,
                Some(Ok(_)) => {}
                other => panic!("connection dropped while answering pings: {other:?}"),
            },
        }
    }

    assert!(pings >= 2, "expected at least two pings, saw {pings}");
    assert!(state.hub.contains(&a_id).await);
}

#[tokio::test]
async fn silent_client_is_dropped_after_read_deadline() {
    let state = test_helpers::test_app_state_with_timeouts(Duration::from_millis(200), Duration::from_millis(200));
    let addr = test_helpers::spawn_server(state.clone()).await;

    let mut a = connect(addr).await;
    let a_id = welcome_id(&mut a).await;

    // Not polling the socket means no pongs go back.
    sleep(Duration::from_millis(600)).await;
    wait_until_absent(&state, &a_id).await;

    assert!(read_until_closed(&mut a).await, "server should send a close frame");
}

#[tokio::test]
async fn stalled_receiver_is_evicted_without_affecting_sender() {
    let mut config = crate::config::RelayConfig::default().with_queue_capacity(4);
    config.max_message_size = 4096;
    let state = AppState::new(config);
    let addr = test_helpers::spawn_server(state.clone()).await;

    let mut b = connect(addr).await;
    let b_id = welcome_id(&mut b).await;
    let mut a = connect(addr).await;
    let a_id = welcome_id(&mut a).await;
    let _peers = next_text(&mut a).await;

    // B never reads; eventually the socket buffers fill, B's writer stalls,
    // and its four-slot queue overflows.
    let payload = "y".repeat(3000);
    let flood = encode_envelope(&Envelope::new(b_id.clone(), payload));
    timeout(Duration::from_secs(10), async {
        while state.hub.contains(&b_id).await {
            send_text(&mut a, &flood).await;
        }
    })
    .await
    .expect("stalled receiver was never evicted");

    let echo = encode_envelope(&Envelope::new(a_id.clone(), "unaffected"));
    send_text(&mut a, &echo).await;
    assert_eq!(next_text(&mut a).await, echo);
    assert!(state.hub.contains(&a_id).await);
}
