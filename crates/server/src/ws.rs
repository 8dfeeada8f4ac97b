//! The axum WebSocket endpoint, one state machine per connection.

use std::sync::Arc;

use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::extract::State;
use axum::extract::WebSocketUpgrade;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::SinkExt;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::relay::ClientIntro;
use crate::relay::MsgPacket;
use crate::relay::Outbound;
use crate::relay::Relay;

/// Build the relay router.
pub fn router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .with_state(relay)
}

async fn ws_handler(State(relay): State<Arc<Relay>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(relay, socket))
}

/// Actual websocket statemachine (one will be spawned per connection).
async fn handle_socket(relay: Arc<Relay>, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();

    // The first message must be a valid intro, and it must come quickly.
    let intro = tokio::time::timeout(relay.config().intro_deadline, receiver.next()).await;
    let intro: Option<ClientIntro> = match intro {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str(&text).ok(),
        _ => None,
    };
    let intro = match intro {
        Some(intro) => intro,
        None => {
            tracing::debug!("connection presented no parseable intro");
            let _ = sender.send(Message::Text("dc".to_string())).await;
            return;
        }
    };

    if let Err(rejection) = relay.validate_intro(&intro) {
        tracing::info!("rejecting client {}: {rejection}", intro.id);
        let _ = sender.send(Message::Text("dc".to_string())).await;
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let client = relay.register(&intro, tx);
    tracing::info!("client {} connected", client.short_id);

    let ping_text = relay.config().ping_text;
    let mut ping_timer = tokio::time::interval(relay.config().ping_frequency);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_timer.tick().await; // immediate first tick
    let mut missed_pings: u8 = 0;

    loop {
        tokio::select! {
            queued = rx.recv() => match queued {
                Some(Outbound::Text(frame)) => {
                    if sender.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Disconnect) => {
                    let _ = sender.send(Message::Text("dc".to_string())).await;
                    break;
                }
                None => break,
            },

            _ = ping_timer.tick() => {
                if missed_pings >= 2 {
                    tracing::info!("client {} missed two pings, dropping", client.short_id);
                    break;
                }
                missed_pings += 1;
                let ping = if ping_text {
                    Message::Text("ping".to_string())
                } else {
                    Message::Ping(Vec::new())
                };
                if sender.send(ping).await.is_err() {
                    break;
                }
            }

            frame = receiver.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    _ => break,
                };
                match frame {
                    Message::Text(text) => match text.as_str() {
                        "pong" => missed_pings = 0,
                        "ping" => {
                            if sender.send(Message::Text("pong".to_string())).await.is_err() {
                                break;
                            }
                        }
                        _ => match serde_json::from_str::<MsgPacket>(&text) {
                            Ok(packet) if packet.kind == "MSG" => {
                                relay.relay_msg(&client, packet);
                            }
                            Ok(packet) => {
                                tracing::debug!("unknown packet type {} dropped", packet.kind);
                            }
                            Err(e) => tracing::debug!("unparseable client frame: {e}"),
                        },
                    },
                    Message::Pong(_) => missed_pings = 0,
                    Message::Ping(payload) => {
                        if sender.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    Message::Binary(_) => {}
                }
            }
        }
    }

    relay.unregister(&client);
    tracing::info!("client {} disconnected", client.short_id);
}

/// Log a stats line at the configured frequency.
pub async fn stats_task(relay: Arc<Relay>) {
    let mut timer = tokio::time::interval(relay.config().stat_frequency);
    timer.tick().await;
    loop {
        timer.tick().await;
        let (clients, channels) = relay.stats();
        tracing::info!("stats: {clients} clients across {channels} channels");
    }
}
