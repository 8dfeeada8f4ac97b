//! The BitTorrent-style WebSocket tracker dialect.
//!
//! Speaks the WebTorrent tracker protocol: JSON announces carrying
//! batches of pre-generated WebRTC offers, answer relay keyed by
//! `offer_id`, and server-dictated announce cadence. The 40-hex info
//! hash travels as its 20 raw bytes re-read as Latin-1 code points,
//! which is bit-exact what the historical dialect expects.

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use rand::RngCore;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::consts::DEFAULT_ANNOUNCE_INTERVAL_MS;
use crate::consts::OFFER_ID_BYTES;
use crate::consts::TRACKER_NUMWANT;
use crate::error::Error;
use crate::rendezvous::reconnect_backoff;
use crate::rendezvous::ConnectorHandle;
use crate::rendezvous::SharedRendezvousCallback;
use crate::session::PeerSession;
use crate::session::SessionConfig;
use crate::session::SessionEvent;
use crate::session::SessionEventKind;

/// Configuration of one tracker connector.
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    /// Tracker WebSocket url.
    pub url: String,
    /// 40-hex rendezvous info hash.
    pub info_hash: String,
    /// Our ShortID, announced as `peer_id`.
    pub peer_id: String,
    /// Offers carried per announce.
    pub invites: usize,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Whether losing this tracker kills the supervisor.
    pub is_required: bool,
    /// Template for the sessions this connector creates.
    pub session_config: SessionConfig,
}

#[derive(Serialize)]
struct AnnounceOffer {
    offer: serde_json::Value,
    offer_id: String,
}

#[derive(Serialize)]
struct Announce {
    action: &'static str,
    info_hash: String,
    peer_id: String,
    downloaded: u64,
    left: u64,
    numwant: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offers: Option<Vec<AnnounceOffer>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    to_peer_id: Option<String>,
    #[serde(rename = "trackerID", skip_serializing_if = "Option::is_none")]
    tracker_id: Option<String>,
}

#[derive(Deserialize, Debug)]
struct TrackerMessage {
    #[serde(default, rename = "failure reason")]
    failure_reason: Option<String>,
    #[serde(default)]
    interval: Option<u64>,
    #[serde(default, rename = "min interval")]
    min_interval: Option<u64>,
    #[serde(default, rename = "tracker id")]
    tracker_id: Option<String>,
    #[serde(default)]
    offer: Option<serde_json::Value>,
    #[serde(default)]
    answer: Option<serde_json::Value>,
    #[serde(default)]
    offer_id: Option<String>,
    #[serde(default)]
    peer_id: Option<String>,
}

enum TaskEvent {
    Graduated(PeerSession),
    Pending(PeerSession),
    Outbound(String),
}

enum SocketOutcome {
    Shutdown,
    Disconnected(String),
    Fatal(Error),
}

/// Re-read an info hash as the Latin-1 string of its 20 raw bytes.
pub fn info_hash_to_wire(info_hash_hex: &str) -> String {
    match hex::decode(info_hash_hex) {
        Ok(bytes) => bytes.iter().map(|&b| b as char).collect(),
        Err(_) => info_hash_hex.to_string(),
    }
}

fn random_offer_id() -> String {
    let mut bytes = [0u8; OFFER_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Connector speaking the tracker dialect.
pub struct TrackerConnector;

impl TrackerConnector {
    /// Spawn the connector task and return its handle.
    pub fn spawn(opts: TrackerOptions, callback: SharedRendezvousCallback) -> ConnectorHandle {
        let is_open = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = ConnectorHandle::new(
            opts.url.clone(),
            opts.is_required,
            is_open.clone(),
            shutdown_tx,
        );
        tokio::spawn(run(opts, callback, is_open, shutdown_rx));
        handle
    }
}

async fn run(
    opts: TrackerOptions,
    callback: SharedRendezvousCallback,
    is_open: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let url = opts.url.clone();
    let mut connect_tries: u32 = 0;
    let mut did_ever_connect = false;

    loop {
        let connected = tokio::select! {
            _ = shutdown_rx.changed() => return,
            c = connect_async(&url) => c,
        };

        let ws = match connected {
            Err(e) => {
                if !did_ever_connect {
                    callback
                        .on_kill(&url, Error::ConnectionFailed(e.to_string()))
                        .await;
                    return;
                }
                connect_tries += 1;
                if connect_tries > opts.max_reconnect_attempts {
                    callback
                        .on_kill(&url, Error::ConnectionFailed(e.to_string()))
                        .await;
                    return;
                }
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    _ = tokio::time::sleep(reconnect_backoff(connect_tries)) => continue,
                }
            }
            Ok((ws, _)) => ws,
        };

        did_ever_connect = true;
        connect_tries += 1;
        is_open.store(true, Ordering::SeqCst);
        callback.on_open(&url).await;

        let outcome = announce_session(&opts, &callback, ws, &mut shutdown_rx).await;
        is_open.store(false, Ordering::SeqCst);

        match outcome {
            SocketOutcome::Shutdown => return,
            SocketOutcome::Fatal(err) => {
                callback.on_kill(&url, err).await;
                return;
            }
            SocketOutcome::Disconnected(reason) => {
                if connect_tries > opts.max_reconnect_attempts {
                    callback
                        .on_kill(&url, Error::ConnectionFailed(reason))
                        .await;
                    return;
                }
                callback
                    .on_warn(&url, format!("tracker disconnected: {reason}, reconnecting"))
                    .await;
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    _ = tokio::time::sleep(reconnect_backoff(connect_tries)) => {}
                }
            }
        }
    }
}

async fn announce_session(
    opts: &TrackerOptions,
    callback: &SharedRendezvousCallback,
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SocketOutcome {
    let (mut sink, mut stream) = ws.split();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<TaskEvent>();

    // offer_id -> half-open initiator session, FIFO for eviction
    let mut offer_table: VecDeque<(String, PeerSession)> = VecDeque::new();
    // answering sessions and accepted offers awaiting `connect`
    let mut pending: Vec<PeerSession> = Vec::new();
    let mut tracker_id: Option<String> = None;
    let mut cadence = Duration::from_millis(DEFAULT_ANNOUNCE_INTERVAL_MS);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + cadence, cadence);
    let mut sent_started = false;

    let wire_hash = info_hash_to_wire(&opts.info_hash);

    let intro = Announce {
        action: "announce",
        info_hash: wire_hash.clone(),
        peer_id: opts.peer_id.clone(),
        downloaded: 0,
        left: 0,
        numwant: TRACKER_NUMWANT,
        event: Some("completed"),
        offers: None,
        answer: None,
        offer_id: None,
        to_peer_id: None,
        tracker_id: None,
    };
    let intro = match serde_json::to_string(&intro) {
        Ok(s) => s,
        Err(e) => return SocketOutcome::Fatal(Error::Serialize(e)),
    };
    if let Err(e) = sink.send(Message::Text(intro)).await {
        return SocketOutcome::Disconnected(e.to_string());
    }

    let outcome = loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break SocketOutcome::Shutdown,

            Some(event) = event_rx.recv() => match event {
                TaskEvent::Outbound(frame) => {
                    if let Err(e) = sink.send(Message::Text(frame)).await {
                        break SocketOutcome::Disconnected(e.to_string());
                    }
                }
                TaskEvent::Pending(session) => pending.push(session),
                TaskEvent::Graduated(session) => {
                    pending.retain(|s| !s.same(&session));
                    offer_table.retain(|(_, s)| !s.same(&session));
                    callback.on_peer(&opts.url, session).await;
                }
            },

            _ = ticker.tick() => {
                let offers = fresh_offer_batch(
                    opts,
                    &event_tx,
                    &mut offer_table,
                ).await;
                let announce = Announce {
                    action: "announce",
                    info_hash: wire_hash.clone(),
                    peer_id: opts.peer_id.clone(),
                    downloaded: 0,
                    left: 0,
                    numwant: TRACKER_NUMWANT,
                    event: if sent_started { None } else { Some("started") },
                    offers: Some(offers),
                    answer: None,
                    offer_id: None,
                    to_peer_id: None,
                    tracker_id: tracker_id.clone(),
                };
                sent_started = true;
                match serde_json::to_string(&announce) {
                    Ok(frame) => {
                        if let Err(e) = sink.send(Message::Text(frame)).await {
                            break SocketOutcome::Disconnected(e.to_string());
                        }
                    }
                    Err(e) => break SocketOutcome::Fatal(Error::Serialize(e)),
                }
            }

            frame = stream.next() => {
                let text = match frame {
                    None => break SocketOutcome::Disconnected("socket closed".into()),
                    Some(Err(e)) => break SocketOutcome::Disconnected(e.to_string()),
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) => {
                        break SocketOutcome::Disconnected("close frame".into())
                    }
                    Some(Ok(_)) => continue,
                };

                let msg: TrackerMessage = match serde_json::from_str(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::debug!("unparseable tracker frame: {e}");
                        continue;
                    }
                };

                if let Some(reason) = msg.failure_reason {
                    break SocketOutcome::Fatal(Error::ProtocolFailure(reason));
                }

                if let Some(id) = msg.tracker_id {
                    tracker_id = Some(id);
                }

                let dictated = msg.min_interval.or(msg.interval);
                if let Some(seconds) = dictated {
                    let new_cadence = Duration::from_secs(seconds);
                    if new_cadence != cadence && !new_cadence.is_zero() {
                        cadence = new_cadence;
                        ticker = tokio::time::interval_at(
                            tokio::time::Instant::now() + cadence,
                            cadence,
                        );
                    }
                }

                if !sent_started {
                    // Intro acknowledged; advertise the first offer batch.
                    ticker.reset_immediately();
                    continue;
                }

                match (msg.offer, msg.answer, msg.peer_id, msg.offer_id) {
                    (Some(offer), _, Some(peer_id), Some(offer_id)) => {
                        if callback.should_block(&peer_id) {
                            tracing::debug!("gate rejected offer from {peer_id}");
                            continue;
                        }
                        answer_remote_offer(
                            opts,
                            &event_tx,
                            &wire_hash,
                            tracker_id.clone(),
                            offer,
                            peer_id,
                            offer_id,
                        ).await;
                    }
                    (None, Some(answer), peer_id, Some(offer_id)) => {
                        let Some(pos) = offer_table
                            .iter()
                            .position(|(id, _)| *id == offer_id)
                        else {
                            tracing::debug!("answer for unknown offer {offer_id}");
                            continue;
                        };
                        // The session is mid-handshake: it leaves the table
                        // but is not destroyed, it graduates on `connect`.
                        let (_, session) = offer_table.remove(pos).expect("indexed");
                        if let Some(peer_id) = peer_id {
                            if callback.should_block(&peer_id) {
                                session.close(true).await;
                                continue;
                            }
                            session.set_peer_id(&peer_id);
                        }
                        pending.push(session.clone());
                        tokio::spawn(async move {
                            let payload = answer.to_string();
                            if let Err(e) = session.handshake(Some(&payload)).await {
                                tracing::warn!("accepting tracker answer failed: {e}");
                                session.close(true).await;
                            }
                        });
                    }
                    _ => {}
                }
            }
        }
    };

    for (_, session) in offer_table {
        session.close(true).await;
    }
    for session in pending {
        session.close(true).await;
    }
    outcome
}

/// Spawn `invites` initiator sessions and collect their offers. The
/// table keeps at most twice the batch size; the oldest entries fall off
/// and their sessions are destroyed.
async fn fresh_offer_batch(
    opts: &TrackerOptions,
    event_tx: &mpsc::UnboundedSender<TaskEvent>,
    offer_table: &mut VecDeque<(String, PeerSession)>,
) -> Vec<AnnounceOffer> {
    let batch = futures::future::join_all((0..opts.invites).map(|_| async {
        let mut config = opts.session_config.clone();
        config.initiator = true;
        let session = PeerSession::new(config).await.ok()?;
        wire_graduation(&session, event_tx);
        let payload = match session.handshake(None).await {
            Ok(Some(payload)) => payload,
            _ => {
                session.close(true).await;
                return None;
            }
        };
        let offer: serde_json::Value = serde_json::from_str(&payload).ok()?;
        Some((random_offer_id(), session, offer))
    }))
    .await;

    let mut offers = Vec::with_capacity(opts.invites);
    for (offer_id, session, offer) in batch.into_iter().flatten() {
        offer_table.push_back((offer_id.clone(), session));
        offers.push(AnnounceOffer { offer, offer_id });
    }

    let cap = opts.invites * 2;
    while offer_table.len() > cap {
        if let Some((_, session)) = offer_table.pop_front() {
            session.close(true).await;
        }
    }

    offers
}

async fn answer_remote_offer(
    opts: &TrackerOptions,
    event_tx: &mpsc::UnboundedSender<TaskEvent>,
    wire_hash: &str,
    tracker_id: Option<String>,
    offer: serde_json::Value,
    peer_id: String,
    offer_id: String,
) {
    let mut config = opts.session_config.clone();
    config.initiator = false;
    let session = match PeerSession::new(config).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!("answer session construction failed: {e}");
            return;
        }
    };
    session.set_peer_id(&peer_id);
    wire_graduation(&session, event_tx);
    let _ = event_tx.send(TaskEvent::Pending(session.clone()));

    let announce_base = Announce {
        action: "announce",
        info_hash: wire_hash.to_string(),
        peer_id: opts.peer_id.clone(),
        downloaded: 0,
        left: 0,
        numwant: TRACKER_NUMWANT,
        event: None,
        offers: None,
        answer: None,
        offer_id: Some(offer_id),
        to_peer_id: Some(peer_id),
        tracker_id,
    };

    let tx = event_tx.clone();
    tokio::spawn(async move {
        let payload = offer.to_string();
        let answer_payload = match session.handshake(Some(&payload)).await {
            Ok(Some(answer)) => answer,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("answering tracker offer failed: {e}");
                session.close(true).await;
                return;
            }
        };
        let answer: serde_json::Value = match serde_json::from_str(&answer_payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("answer payload not JSON: {e}");
                session.close(true).await;
                return;
            }
        };
        let announce = Announce {
            answer: Some(answer),
            ..announce_base
        };
        match serde_json::to_string(&announce) {
            Ok(frame) => {
                let _ = tx.send(TaskEvent::Outbound(frame));
            }
            Err(e) => tracing::warn!("serializing answer announce: {e}"),
        }
    });
}

fn wire_graduation(session: &PeerSession, event_tx: &mpsc::UnboundedSender<TaskEvent>) {
    let tx = event_tx.clone();
    let graduate = session.clone();
    session.events().once(SessionEventKind::Connect, move |_: &SessionEvent| {
        let _ = tx.send(TaskEvent::Graduated(graduate.clone()));
    });
}
