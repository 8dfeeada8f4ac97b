use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::ecc::KeyPair;
use crate::ecc::Seed;
use crate::error::Error;
use crate::rendezvous::sps::SpsConnector;
use crate::rendezvous::sps::SpsOptions;
use crate::rendezvous::AnnounceRole;
use crate::session::PeerSession;
use crate::session::SessionConfig;
use crate::session::SessionEvent;
use crate::session::SessionEventKind;
use crate::tests::default::RecordedEvent;
use crate::tests::default::RecorderCallback;

fn options(url: String, role: AnnounceRole) -> SpsOptions {
    SpsOptions {
        url,
        role,
        pass_code: Some("hunter2".to_string()),
        max_reconnect_attempts: 1,
        is_required: false,
        session_config: SessionConfig::default(),
    }
}

/// A one-connection mock relay, mirroring frames to and from the test.
async fn mock_relay() -> (
    String,
    mpsc::UnboundedReceiver<String>,
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
                        let _ = inbound_tx.send(text);
                    }
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    });

    (url, inbound_rx, outbound_tx)
}

async fn next_frame(rx: &mut mpsc::UnboundedReceiver<String>, within: Duration) -> String {
    tokio::time::timeout(within, rx.recv())
        .await
        .expect("no frame within deadline")
        .expect("mock closed")
}

#[tokio::test]
async fn test_intro_packet_is_valid_and_scoped() {
    let (url, mut inbound, _outbound) = mock_relay().await;
    let (recorder, _events) = RecorderCallback::new();
    let keypair = KeyPair::from_seed(&Seed::from_bytes([21u8; 32]));
    let _handle = SpsConnector::spawn(
        options(url, AnnounceRole::Swarm("lobby".to_string())),
        keypair.clone(),
        recorder,
    );

    let intro = next_frame(&mut inbound, Duration::from_secs(2)).await;
    let intro: serde_json::Value = serde_json::from_str(&intro).unwrap();

    assert_eq!(intro["id"], keypair.full_id());
    assert_eq!(intro["swarmChannel"], "lobby");
    assert_eq!(intro["hosting"], false);
    assert_eq!(intro["passCode"], "hunter2");

    let pub_key: Vec<u8> = intro["pubKey"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_u64().unwrap() as u8)
        .collect();
    let signature: Vec<u8> = intro["signature"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_u64().unwrap() as u8)
        .collect();
    assert_eq!(pub_key, keypair.public_key());
    assert!(crate::ecc::verify(&pub_key, &pub_key, &signature));
}

#[tokio::test]
async fn test_join_drives_offer_and_peer_graduation() {
    let (url, mut inbound, outbound) = mock_relay().await;
    let (recorder, mut events) = RecorderCallback::new();
    let keypair = KeyPair::from_seed(&Seed::from_bytes([22u8; 32]));
    let _handle = SpsConnector::spawn(
        options(url, AnnounceRole::Host),
        keypair.clone(),
        recorder,
    );

    let _intro = next_frame(&mut inbound, Duration::from_secs(2)).await;

    // The joiner, played by a real session on the other side of the
    // relay.
    let joiner_id = "123456789a123456789a123456789a123456789a";
    let joiner = PeerSession::new(SessionConfig::default()).await.unwrap();
    let (answer_tx, mut answer_rx) = mpsc::unbounded_channel::<String>();
    joiner
        .events()
        .on(SessionEventKind::Handshake, move |event| {
            if let SessionEvent::Handshake(payload) = event {
                let _ = answer_tx.send(payload.clone());
            }
        });

    outbound
        .send(
            serde_json::json!({ "type": "JOIN", "data": { "id": joiner_id } }).to_string(),
        )
        .unwrap();

    // The connector initiates: its offer arrives as a MSG for the joiner.
    let msg = next_frame(&mut inbound, Duration::from_secs(5)).await;
    let msg: serde_json::Value = serde_json::from_str(&msg).unwrap();
    assert_eq!(msg["type"], "MSG");
    assert_eq!(msg["targetClient"], joiner_id);
    assert_eq!(msg["from"], keypair.full_id());
    assert_eq!(msg["data"]["type"], "offer");

    // Relay the offer into the joiner and its answer back.
    joiner
        .handshake(Some(&msg["data"].to_string()))
        .await
        .unwrap();
    let answer = tokio::time::timeout(Duration::from_secs(2), answer_rx.recv())
        .await
        .unwrap()
        .unwrap();
    outbound
        .send(
            serde_json::json!({
                "type": "MSG",
                "from": joiner_id,
                "data": serde_json::from_str::<serde_json::Value>(&answer).unwrap(),
            })
            .to_string(),
        )
        .unwrap();

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
    assert_eq!(peer.peer_id().as_deref(), Some(joiner_id));
    assert!(peer.is_initiator());
}

#[tokio::test]
async fn test_text_ping_is_answered_with_pong() {
    let (url, mut inbound, outbound) = mock_relay().await;
    let (recorder, _events) = RecorderCallback::new();
    let keypair = KeyPair::from_seed(&Seed::from_bytes([23u8; 32]));
    let _handle = SpsConnector::spawn(options(url, AnnounceRole::Host), keypair, recorder);

    let _intro = next_frame(&mut inbound, Duration::from_secs(2)).await;
    outbound.send("ping".to_string()).unwrap();
    let pong = next_frame(&mut inbound, Duration::from_secs(2)).await;
    assert_eq!(pong, "pong");
}

#[tokio::test]
async fn test_dc_token_kills_without_reconnect() {
    let (url, mut inbound, outbound) = mock_relay().await;
    let (recorder, mut events) = RecorderCallback::new();
    let keypair = KeyPair::from_seed(&Seed::from_bytes([24u8; 32]));
    let _handle = SpsConnector::spawn(options(url, AnnounceRole::Host), keypair, recorder);

    let _intro = next_frame(&mut inbound, Duration::from_secs(2)).await;
    match events.recv().await {
        Some(RecordedEvent::Open(_)) => {}
        _ => panic!("expected open event"),
    }

    outbound.send("dc".to_string()).unwrap();

    match tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("no kill event")
    {
        Some(RecordedEvent::Kill(_, Error::ProtocolFailure(reason))) => {
            assert_eq!(reason, "Invalid server credentials");
        }
        _ => panic!("expected credential kill"),
    }
}
