use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use switchboard_transport::core::transport::ConnectionInterface;
use switchboard_transport::core::transport::DataChannelInit;
use switchboard_transport::core::transport::SignalingState;

use crate::error::Error;
use crate::session::PeerSession;
use crate::session::SessionConfig;
use crate::session::SessionEvent;
use crate::session::SessionEventKind;
use crate::session::SessionState;
use crate::tests::establish_pair;

fn count_events(session: &PeerSession, kind: SessionEventKind) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let c = counter.clone();
    session.events().on(kind, move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    counter
}

#[tokio::test]
async fn test_handshake_reaches_signal_stable() {
    let a = PeerSession::new(SessionConfig {
        initiator: true,
        ..SessionConfig::default()
    })
    .await
    .unwrap();
    let b = PeerSession::new(SessionConfig::default()).await.unwrap();

    let a_connects = count_events(&a, SessionEventKind::Connect);
    let a_readies = count_events(&a, SessionEventKind::Ready);
    let b_connects = count_events(&b, SessionEventKind::Connect);

    let offer = a.handshake(None).await.unwrap().unwrap();
    assert!(offer.contains("\"offer\""));

    let answer = b.handshake(Some(&offer)).await.unwrap().unwrap();
    assert!(answer.contains("\"answer\""));

    a.handshake(Some(&answer)).await.unwrap();

    assert_eq!(a.state(), SessionState::SignalStable);
    assert_eq!(b.state(), SessionState::SignalStable);
    assert_eq!(a_connects.load(Ordering::SeqCst), 1);
    assert_eq!(b_connects.load(Ordering::SeqCst), 1);
    assert_eq!(a_readies.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_second_offer_attempt_is_rejected() {
    let a = PeerSession::new(SessionConfig {
        initiator: true,
        ..SessionConfig::default()
    })
    .await
    .unwrap();
    a.handshake(None).await.unwrap();
    assert!(matches!(
        a.handshake(None).await,
        Err(Error::HandshakeAlreadyStarted)
    ));
}

#[tokio::test]
async fn test_send_before_open_is_buffered_in_order() {
    let a = PeerSession::new(SessionConfig {
        initiator: true,
        ..SessionConfig::default()
    })
    .await
    .unwrap();
    let b = PeerSession::new(SessionConfig::default()).await.unwrap();

    let received: Arc<Mutex<Vec<Bytes>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    b.events().on(SessionEventKind::Message, move |event| {
        if let SessionEvent::Message(bytes) = event {
            sink.lock().unwrap().push(bytes.clone());
        }
    });

    // The channel is nowhere near open yet; both sends must still
    // succeed from the caller's viewpoint.
    a.send(&b"first"[..], None).await.unwrap();
    a.send(&b"second"[..], None).await.unwrap();

    let offer = a.handshake(None).await.unwrap().unwrap();
    let answer = b.handshake(Some(&offer)).await.unwrap().unwrap();
    a.handshake(Some(&answer)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let received = received.lock().unwrap();
    assert_eq!(received.as_slice(), [&b"first"[..], &b"second"[..]]);
}

#[tokio::test]
async fn test_double_close_emits_close_once() {
    let (a, _b) = establish_pair().await;

    let closes = count_events(&a, SessionEventKind::Close);
    let disconnects = count_events(&a, SessionEventKind::Disconnect);

    a.close(true).await;
    a.close(true).await;

    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(disconnects.load(Ordering::SeqCst), 0);
    assert!(a.is_closed());
    assert_eq!(a.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_remote_close_fires_disconnect() {
    let (a, b) = establish_pair().await;

    let closes = count_events(&b, SessionEventKind::Close);
    let disconnects = count_events(&b, SessionEventKind::Disconnect);

    a.close(true).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_control_channel_death_is_fatal() {
    let (a, _b) = establish_pair().await;

    let errors = count_events(&a, SessionEventKind::Error);
    a.connection().close_channel("_meta").await.unwrap();

    assert!(a.is_closed());
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_malformed_handshake_payload_is_fatal() {
    let a = PeerSession::new(SessionConfig::default()).await.unwrap();
    let result = a.handshake(Some("{\"neither\":\"nor\"}")).await;
    assert!(matches!(result, Err(Error::MalformedHandshakePayload)));
    assert!(a.is_closed());
}

#[tokio::test]
async fn test_renegotiation_runs_in_band() {
    let (a, b) = establish_pair().await;

    let a_readies = count_events(&a, SessionEventKind::Ready);
    let b_readies = count_events(&b, SessionEventKind::Ready);
    // The rendezvous must not be needed: no handshake events may fire.
    let a_handshakes = count_events(&a, SessionEventKind::Handshake);

    a.connection().trigger_negotiation_needed().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(a_readies.load(Ordering::SeqCst), 1);
    assert_eq!(b_readies.load(Ordering::SeqCst), 1);
    assert_eq!(a_handshakes.load(Ordering::SeqCst), 0);
    assert_eq!(a.connection().signaling_state(), SignalingState::Stable);
    assert_eq!(b.connection().signaling_state(), SignalingState::Stable);
}

#[tokio::test]
async fn test_glare_non_initiator_rolls_back() {
    let (a, b) = establish_pair().await;

    let a_errors = count_events(&a, SessionEventKind::Error);
    let b_errors = count_events(&b, SessionEventKind::Error);
    let a_readies = count_events(&a, SessionEventKind::Ready);
    let b_readies = count_events(&b, SessionEventKind::Ready);

    // B has its own offer pending when A's renegotiation offer lands.
    b.connection().create_offer().await.unwrap();
    assert_eq!(
        b.connection().signaling_state(),
        SignalingState::HaveLocalOffer
    );

    a.connection().trigger_negotiation_needed().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The non-initiator abandoned its offer and took A's.
    assert_eq!(a.connection().signaling_state(), SignalingState::Stable);
    assert_eq!(b.connection().signaling_state(), SignalingState::Stable);
    assert_eq!(a_errors.load(Ordering::SeqCst), 0);
    assert_eq!(b_errors.load(Ordering::SeqCst), 0);
    assert_eq!(a_readies.load(Ordering::SeqCst), 1);
    assert_eq!(b_readies.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_glare_initiator_ignores_remote_offer() {
    let (a, b) = establish_pair().await;

    let a_errors = count_events(&a, SessionEventKind::Error);

    // A has its own offer pending when B's offer lands; the initiator
    // lets its own offer win.
    a.connection().create_offer().await.unwrap();
    b.start_renegotiation().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        a.connection().signaling_state(),
        SignalingState::HaveLocalOffer
    );
    assert_eq!(a_errors.load(Ordering::SeqCst), 0);
    assert!(!a.is_closed());
}

#[tokio::test]
async fn test_additional_data_channels() {
    let (a, b) = establish_pair().await;

    let opened: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let messages: Arc<Mutex<Vec<(String, Bytes)>>> = Arc::new(Mutex::new(Vec::new()));
    let opened_sink = opened.clone();
    let message_sink = messages.clone();
    b.events().on(SessionEventKind::DataChannel, move |event| {
        if let SessionEvent::DataChannel { label, data } = event {
            match data {
                None => opened_sink.lock().unwrap().push(label.clone()),
                Some(bytes) => message_sink
                    .lock()
                    .unwrap()
                    .push((label.clone(), bytes.clone())),
            }
        }
    });

    a.add_data_channel("files", DataChannelInit::default())
        .await
        .unwrap();
    a.send(&b"chunk"[..], Some("files")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(opened.lock().unwrap().as_slice(), ["files"]);
    assert_eq!(messages.lock().unwrap().len(), 1);

    // Reserved channels are not removable.
    assert!(matches!(
        a.remove_data_channel("_meta").await,
        Err(Error::ReservedChannel(_))
    ));
    a.remove_data_channel("files").await.unwrap();
}

#[tokio::test]
async fn test_media_track_surfaces_as_stream() {
    let (a, b) = establish_pair().await;

    let streams: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = streams.clone();
    b.events().on(SessionEventKind::Stream, move |event| {
        if let SessionEvent::Stream(id) = event {
            sink.lock().unwrap().push(id.clone());
        }
    });

    a.add_media("camera-1".to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(streams.lock().unwrap().as_slice(), ["camera-1"]);
}

#[tokio::test]
async fn test_operations_after_close_are_noops() {
    let (a, _b) = establish_pair().await;
    a.close(true).await;

    assert!(matches!(
        a.send(&b"late"[..], None).await,
        Err(Error::SessionClosed)
    ));
    assert!(a.handshake(None).await.unwrap().is_none());
}
