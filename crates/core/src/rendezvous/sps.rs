//! The Switchboard Peering Server direct-relay dialect, client side.
//!
//! The client introduces itself with a self-signed witness (an Ed25519
//! signature over its own public key), gets placed into a channel by the
//! server, and from then on only sees `JOIN` notifications and opaque
//! `MSG` relays. All signaling payloads of a session are tunnelled as
//! `MSG` packets addressed by peer id.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::ecc::KeyPair;
use crate::error::Error;
use crate::rendezvous::reconnect_backoff;
use crate::rendezvous::AnnounceRole;
use crate::rendezvous::ConnectorHandle;
use crate::rendezvous::SharedRendezvousCallback;
use crate::session::PeerSession;
use crate::session::SessionConfig;
use crate::session::SessionEvent;
use crate::session::SessionEventKind;

/// Configuration of one SPS connector.
#[derive(Debug, Clone)]
pub struct SpsOptions {
    /// Relay WebSocket url.
    pub url: String,
    /// What to announce: host, join a host, or swarm.
    pub role: AnnounceRole,
    /// Access pass code, if the server demands one.
    pub pass_code: Option<String>,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Whether losing this relay kills the supervisor.
    pub is_required: bool,
    /// Template for the sessions this connector creates.
    pub session_config: SessionConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientIntro {
    id: String,
    pub_key: Vec<u8>,
    signature: Vec<u8>,
    hosting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    swarm_channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    host_target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pass_code: Option<String>,
}

#[derive(Serialize)]
struct MsgPacket {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "targetClient")]
    target_client: String,
    from: String,
    data: serde_json::Value,
}

#[derive(Deserialize, Debug)]
struct ServerPacket {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    from: Option<String>,
}

#[derive(Deserialize, Debug)]
struct JoinData {
    id: String,
}

enum TaskEvent {
    Graduated(PeerSession),
    Outbound(String),
}

enum SocketOutcome {
    Shutdown,
    Disconnected(String),
    Fatal(Error),
}

/// Connector speaking the SPS dialect.
pub struct SpsConnector;

impl SpsConnector {
    /// Spawn the connector task and return its handle. The key pair is
    /// needed to sign the intro witness and to address outbound relays.
    pub fn spawn(
        opts: SpsOptions,
        keypair: KeyPair,
        callback: SharedRendezvousCallback,
    ) -> ConnectorHandle {
        let is_open = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = ConnectorHandle::new(
            opts.url.clone(),
            opts.is_required,
            is_open.clone(),
            shutdown_tx,
        );
        tokio::spawn(run(opts, keypair, callback, is_open, shutdown_rx));
        handle
    }
}

fn make_intro(opts: &SpsOptions, keypair: &KeyPair) -> ClientIntro {
    let public_key = keypair.public_key();
    let signature = keypair.sign(&public_key);
    let (hosting, swarm_channel, host_target) = match &opts.role {
        AnnounceRole::Host => (true, None, None),
        AnnounceRole::JoinHost(target) => (false, None, Some(target.clone())),
        AnnounceRole::Swarm(group) => (false, Some(group.clone()), None),
    };
    ClientIntro {
        id: keypair.full_id(),
        pub_key: public_key.to_vec(),
        signature: signature.to_vec(),
        hosting,
        swarm_channel,
        host_target,
        pass_code: opts.pass_code.clone(),
    }
}

async fn run(
    opts: SpsOptions,
    keypair: KeyPair,
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

        let outcome = relay_session(&opts, &keypair, &callback, ws, &mut shutdown_rx).await;
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
                    .on_warn(&url, format!("relay disconnected: {reason}, reconnecting"))
                    .await;
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    _ = tokio::time::sleep(reconnect_backoff(connect_tries)) => {}
                }
            }
        }
    }
}

async fn relay_session(
    opts: &SpsOptions,
    keypair: &KeyPair,
    callback: &SharedRendezvousCallback,
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SocketOutcome {
    let (mut sink, mut stream) = ws.split();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<TaskEvent>();

    // peer id -> session awaiting handshake completion
    let mut peers: HashMap<String, PeerSession> = HashMap::new();
    let full_id = keypair.full_id();

    let intro = match serde_json::to_string(&make_intro(opts, keypair)) {
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
                TaskEvent::Graduated(session) => {
                    if let Some(id) = session.peer_id() {
                        peers.remove(&id);
                    }
                    callback.on_peer(&opts.url, session).await;
                }
            },

            frame = stream.next() => {
                let text = match frame {
                    None => break SocketOutcome::Disconnected("socket closed".into()),
                    Some(Err(e)) => break SocketOutcome::Disconnected(e.to_string()),
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break SocketOutcome::Disconnected("pong failed".into());
                        }
                        continue;
                    }
                    Some(Ok(Message::Close(_))) => {
                        break SocketOutcome::Disconnected("close frame".into())
                    }
                    Some(Ok(_)) => continue,
                };

                match text.as_str() {
                    "ping" => {
                        if sink.send(Message::Text("pong".into())).await.is_err() {
                            break SocketOutcome::Disconnected("pong failed".into());
                        }
                        continue;
                    }
                    "pong" => continue,
                    "dc" => {
                        break SocketOutcome::Fatal(Error::ProtocolFailure(
                            "Invalid server credentials".into(),
                        ));
                    }
                    _ => {}
                }

                let packet: ServerPacket = match serde_json::from_str(&text) {
                    Ok(packet) => packet,
                    Err(e) => {
                        tracing::debug!("unparseable relay frame: {e}");
                        continue;
                    }
                };

                match packet.kind.as_str() {
                    "JOIN" => {
                        let Some(join) = packet
                            .data
                            .and_then(|d| serde_json::from_value::<JoinData>(d).ok())
                        else {
                            continue;
                        };
                        if callback.should_block(&join.id) {
                            tracing::debug!("gate rejected join from {}", join.id);
                            continue;
                        }
                        if peers.contains_key(&join.id) {
                            continue;
                        }
                        match spawn_initiator(opts, &full_id, &event_tx, &join.id).await {
                            Some(session) => {
                                peers.insert(join.id, session);
                            }
                            None => continue,
                        }
                    }
                    "MSG" => {
                        let Some(from) = packet.from else { continue };
                        let Some(data) = packet.data else { continue };
                        if let Some(session) = peers.get(&from) {
                            feed_session(session.clone(), data);
                            continue;
                        }
                        if callback.should_block(&from) {
                            tracing::debug!("gate rejected message from {from}");
                            continue;
                        }
                        match spawn_answerer(opts, &full_id, &event_tx, &from).await {
                            Some(session) => {
                                feed_session(session.clone(), data);
                                peers.insert(from, session);
                            }
                            None => continue,
                        }
                    }
                    other => tracing::debug!("unknown relay packet type {other}"),
                }
            }
        }
    };

    for session in peers.into_values() {
        session.close(true).await;
    }
    outcome
}

/// Build a session whose `handshake` events are relayed as MSG packets
/// addressed to `peer_id`.
async fn build_session(
    opts: &SpsOptions,
    local_full_id: &str,
    event_tx: &mpsc::UnboundedSender<TaskEvent>,
    peer_id: &str,
    initiator: bool,
) -> Option<PeerSession> {
    let mut config = opts.session_config.clone();
    config.initiator = initiator;
    let session = match PeerSession::new(config).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!("relay session construction failed: {e}");
            return None;
        }
    };
    session.set_peer_id(peer_id);

    let tx = event_tx.clone();
    let target = peer_id.to_string();
    let from = local_full_id.to_string();
    session
        .events()
        .on(SessionEventKind::Handshake, move |event: &SessionEvent| {
            let SessionEvent::Handshake(payload) = event else {
                return;
            };
            let data: serde_json::Value = match serde_json::from_str(payload) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("handshake payload not JSON: {e}");
                    return;
                }
            };
            let packet = MsgPacket {
                kind: "MSG",
                target_client: target.clone(),
                from: from.clone(),
                data,
            };
            match serde_json::to_string(&packet) {
                Ok(frame) => {
                    let _ = tx.send(TaskEvent::Outbound(frame));
                }
                Err(e) => tracing::warn!("serializing MSG packet: {e}"),
            }
        });

    let tx = event_tx.clone();
    let graduate = session.clone();
    session
        .events()
        .once(SessionEventKind::Connect, move |_: &SessionEvent| {
            let _ = tx.send(TaskEvent::Graduated(graduate.clone()));
        });

    Some(session)
}

async fn spawn_initiator(
    opts: &SpsOptions,
    local_full_id: &str,
    event_tx: &mpsc::UnboundedSender<TaskEvent>,
    peer_id: &str,
) -> Option<PeerSession> {
    let session = build_session(opts, local_full_id, event_tx, peer_id, true).await?;
    let driver = session.clone();
    tokio::spawn(async move {
        if let Err(e) = driver.handshake(None).await {
            tracing::warn!("relay offer failed: {e}");
            driver.close(true).await;
        }
    });
    Some(session)
}

async fn spawn_answerer(
    opts: &SpsOptions,
    local_full_id: &str,
    event_tx: &mpsc::UnboundedSender<TaskEvent>,
    peer_id: &str,
) -> Option<PeerSession> {
    build_session(opts, local_full_id, event_tx, peer_id, false).await
}

fn feed_session(session: PeerSession, data: serde_json::Value) {
    tokio::spawn(async move {
        let payload = data.to_string();
        if let Err(e) = session.handshake(Some(&payload)).await {
            tracing::warn!("relay handshake payload rejected: {e}");
        }
    });
}
