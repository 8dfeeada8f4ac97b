use std::collections::HashSet;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::error::Error;
use crate::rendezvous::tracker::TrackerConnector;
use crate::rendezvous::tracker::TrackerOptions;
use crate::session::PeerSession;
use crate::session::SessionConfig;
use crate::tests::default::RecordedEvent;
use crate::tests::default::RecorderCallback;

fn options(url: String) -> TrackerOptions {
    TrackerOptions {
        url,
        info_hash: "00112233445566778899aabbccddeeff00112233".to_string(),
        peer_id: "aaaabbbbccccddddeeee".to_string(),
        invites: 10,
        max_reconnect_attempts: 1,
        is_required: false,
        session_config: SessionConfig::default(),
    }
}

/// A one-connection mock tracker: forwards every inbound JSON frame to
/// the test and sends whatever the test queues.
async fn mock_tracker() -> (
    String,
    mpsc::UnboundedReceiver<serde_json::Value>,
    mpsc::UnboundedSender<String>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut sink, mut stream) = ws.split();
        loop {
            tokio::select! {
                Some(frame) = outbound_rx.recv() => {
                    if sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(value) = serde_json::from_str(&text) {
                            let _ = inbound_tx.send(value);
                        }
                    }
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    });

    (url, inbound_rx, outbound_tx)
}

async fn next_announce(
    rx: &mut mpsc::UnboundedReceiver<serde_json::Value>,
    within: Duration,
) -> serde_json::Value {
    tokio::time::timeout(within, rx.recv())
        .await
        .expect("no announce within deadline")
        .expect("mock closed")
}

#[tokio::test]
async fn test_tracker_handshake_and_offer_batches() {
    let (url, mut inbound, outbound) = mock_tracker().await;
    let (recorder, mut events) = RecorderCallback::new();
    let handle = TrackerConnector::spawn(options(url), recorder);

    // The connector introduces itself with a completed announce.
    let intro = next_announce(&mut inbound, Duration::from_secs(2)).await;
    assert_eq!(intro["action"], "announce");
    assert_eq!(intro["event"], "completed");
    assert_eq!(intro["downloaded"], 0);
    assert_eq!(intro["left"], 0);
    assert_eq!(intro["numwant"], 50);
    assert_eq!(intro["peer_id"], "aaaabbbbccccddddeeee");
    // Latin-1 wire form of the 20 info-hash bytes.
    assert_eq!(intro["info_hash"].as_str().unwrap().chars().count(), 20);
    assert!(intro.get("offers").is_none());

    match events.recv().await {
        Some(RecordedEvent::Open(_)) => {}
        _ => panic!("expected open event"),
    }

    // Acknowledge with a dictated cadence; the first offer batch follows.
    outbound
        .send("{\"interval\":1,\"tracker id\":\"mock-1\"}".to_string())
        .unwrap();

    let started = next_announce(&mut inbound, Duration::from_secs(5)).await;
    assert_eq!(started["event"], "started");
    let offers = started["offers"].as_array().expect("offers array");
    assert_eq!(offers.len(), 10);
    let ids: HashSet<&str> = offers
        .iter()
        .map(|o| o["offer_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids.len(), 10);
    for id in &ids {
        assert_eq!(id.len(), 40);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    // The replaced cadence drives the next batch roughly a second later.
    let next = next_announce(&mut inbound, Duration::from_secs(5)).await;
    assert!(next.get("event").is_none());
    assert_eq!(next["trackerID"], "mock-1");
    assert_eq!(next["offers"].as_array().unwrap().len(), 10);

    handle.kill();
}

#[tokio::test]
async fn test_tracker_offer_answer_produces_a_peer() {
    let (url, mut inbound, outbound) = mock_tracker().await;
    let (recorder, mut events) = RecorderCallback::new();
    let mut opts = options(url);
    opts.invites = 2;
    let handle = TrackerConnector::spawn(opts, recorder);

    let _intro = next_announce(&mut inbound, Duration::from_secs(2)).await;
    outbound.send("{\"interval\":60}".to_string()).unwrap();
    let _started = next_announce(&mut inbound, Duration::from_secs(5)).await;

    // A remote peer, played by a real session, offers to us through the
    // tracker.
    let remote = PeerSession::new(SessionConfig {
        initiator: true,
        ..SessionConfig::default()
    })
    .await
    .unwrap();
    let offer_payload = remote.handshake(None).await.unwrap().unwrap();
    let offer: serde_json::Value = serde_json::from_str(&offer_payload).unwrap();
    let relayed = serde_json::json!({
        "offer": offer,
        "peer_id": "9999888877776666555a",
        "offer_id": "ab".repeat(20),
    });
    outbound.send(relayed.to_string()).unwrap();

    // The connector answers through the tracker.
    let answer_announce = next_announce(&mut inbound, Duration::from_secs(5)).await;
    assert_eq!(answer_announce["to_peer_id"], "9999888877776666555a");
    assert_eq!(answer_announce["offer_id"], "ab".repeat(20));
    let answer = answer_announce["answer"].clone();
    assert_eq!(answer["type"], "answer");

    // Feeding the answer back into the remote session completes ICE and
    // the connector hands the candidate upward.
    remote.handshake(Some(&answer.to_string())).await.unwrap();

    let peer = loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("no connector event")
            .expect("recorder closed")
        {
            RecordedEvent::Peer(peer) => break peer,
            _ => continue,
        }
    };
    assert_eq!(peer.peer_id().as_deref(), Some("9999888877776666555a"));
    assert!(!peer.is_closed());

    handle.kill();
}

#[tokio::test]
async fn test_tracker_failure_reason_is_fatal() {
    let (url, mut inbound, outbound) = mock_tracker().await;
    let (recorder, mut events) = RecorderCallback::new();
    let _handle = TrackerConnector::spawn(options(url), recorder);

    let _intro = next_announce(&mut inbound, Duration::from_secs(2)).await;
    match events.recv().await {
        Some(RecordedEvent::Open(_)) => {}
        _ => panic!("expected open event"),
    }

    outbound
        .send("{\"failure reason\":\"unregistered torrent\"}".to_string())
        .unwrap();

    match tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("no kill event")
    {
        Some(RecordedEvent::Kill(_, Error::ProtocolFailure(reason))) => {
            assert_eq!(reason, "unregistered torrent");
        }
        _ => panic!("expected protocol-failure kill"),
    }
}

#[tokio::test]
async fn test_unreachable_tracker_kills_with_connection_failed() {
    // Nothing listens here; the listener is dropped right away.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let (recorder, mut events) = RecorderCallback::new();
    let _handle = TrackerConnector::spawn(options(url), recorder);

    match tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no kill event")
    {
        Some(RecordedEvent::Kill(_, Error::ConnectionFailed(_))) => {}
        _ => panic!("expected connection-failed kill"),
    }
}

#[tokio::test]
async fn test_gate_rejects_before_answering() {
    let (url, mut inbound, outbound) = mock_tracker().await;
    let (recorder, _events) = RecorderCallback::new_blocking();
    let _handle = TrackerConnector::spawn(options(url), recorder.clone());

    let _intro = next_announce(&mut inbound, Duration::from_secs(2)).await;
    outbound.send("{\"interval\":60}".to_string()).unwrap();
    let _started = next_announce(&mut inbound, Duration::from_secs(5)).await;

    let remote = PeerSession::new(SessionConfig {
        initiator: true,
        ..SessionConfig::default()
    })
    .await
    .unwrap();
    let offer_payload = remote.handshake(None).await.unwrap().unwrap();
    let offer: serde_json::Value = serde_json::from_str(&offer_payload).unwrap();
    outbound
        .send(
            serde_json::json!({
                "offer": offer,
                "peer_id": "1111222233334444555a",
                "offer_id": "cd".repeat(20),
            })
            .to_string(),
        )
        .unwrap();

    // No answer announce may come back for a gated peer.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(inbound.try_recv().is_err());
    assert!(recorder
        .blocked
        .lock()
        .unwrap()
        .contains(&"1111222233334444555a".to_string()));
}
