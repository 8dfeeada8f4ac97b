//! The relay hub: client registry, channel buckets, and packet routing.
//!
//! Clients are recorded under both their FullID and ShortID so a joiner
//! can target a host by either. A client belongs to at most one logical
//! channel: swarm members share `"#" + name`, hosts sit in
//! `"host-" + id` buckets where joiners look them up.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use serde::Serialize;
use switchboard_core::ecc;
use tokio::sync::mpsc;

use crate::config::RelayConfig;
use crate::error::IntroRejection;

/// First packet of every client, carrying the self-signed witness.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ClientIntro {
    /// The client's claimed FullID.
    pub id: String,
    /// Raw Ed25519 public key bytes.
    pub pub_key: Vec<u8>,
    /// Signature over the public key itself.
    pub signature: Vec<u8>,
    /// Whether the client accepts joiners.
    #[serde(default)]
    pub hosting: bool,
    /// Swarm channel to join.
    #[serde(default)]
    pub swarm_channel: Option<String>,
    /// Host id to look up.
    #[serde(default)]
    pub host_target: Option<String>,
    /// Access pass code.
    #[serde(default)]
    pub pass_code: Option<String>,
}

/// A message relayed between clients.
#[derive(Deserialize, Serialize, Debug)]
pub struct MsgPacket {
    /// Always `"MSG"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Recipient id; consumed by the relay, not forwarded.
    #[serde(rename = "targetClient", skip_serializing_if = "Option::is_none")]
    pub target_client: Option<String>,
    /// Authenticated sender id, overwritten by the relay.
    pub from: String,
    /// Opaque payload.
    pub data: serde_json::Value,
}

fn join_packet(id: &str) -> String {
    serde_json::json!({ "type": "JOIN", "data": { "id": id } }).to_string()
}

/// Frames queued for one client's socket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A text frame.
    Text(String),
    /// Credential rejection; the writer sends `"dc"` and hangs up.
    Disconnect,
}

/// One registered client.
pub struct Client {
    /// Verified FullID.
    pub full_id: String,
    /// First twenty chars of the FullID.
    pub short_id: String,
    /// Whether this client accepts joiners.
    pub hosting: bool,
    channels: Vec<String>,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Client {
    /// Queue a frame for this client.
    pub fn send(&self, frame: Outbound) {
        let _ = self.tx.send(frame);
    }
}

/// The shared relay state.
pub struct Relay {
    config: RelayConfig,
    /// FullID and ShortID both map to the same client entry.
    clients: DashMap<String, Arc<Client>>,
    /// Channel key -> member FullIDs.
    channels: DashMap<String, HashSet<String>>,
}

impl Relay {
    /// Create an empty relay.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            clients: DashMap::new(),
            channels: DashMap::new(),
        }
    }

    /// The relay configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Validate a client intro: pass code, self-signature, and the
    /// id/public-key binding.
    pub fn validate_intro(&self, intro: &ClientIntro) -> Result<(), IntroRejection> {
        if let Some(required) = &self.config.pass_code {
            if intro.pass_code.as_deref() != Some(required.as_str()) {
                return Err(IntroRejection::PassCode);
            }
        }
        if !ecc::verify(&intro.pub_key, &intro.pub_key, &intro.signature) {
            return Err(IntroRejection::Signature);
        }
        if ecc::make_full_id(&intro.pub_key) != intro.id {
            return Err(IntroRejection::IdMismatch);
        }
        Ok(())
    }

    /// Register a validated client and place it into its channel,
    /// emitting the JOIN notifications the placement implies.
    pub fn register(
        &self,
        intro: &ClientIntro,
        tx: mpsc::UnboundedSender<Outbound>,
    ) -> Arc<Client> {
        let full_id = intro.id.clone();
        let short_id = ecc::make_short_id(&intro.pub_key);

        // (channel key, announce our arrival to current members). A
        // joiner entering a host bucket stays silent; it is the one who
        // will initiate.
        let mut channels: Vec<(String, bool)> = Vec::new();
        if let Some(swarm) = &intro.swarm_channel {
            channels.push((format!("#{swarm}"), true));
        } else if let Some(target) = &intro.host_target {
            channels.push((format!("host-{target}"), false));
        } else if intro.hosting {
            channels.push((format!("host-{short_id}"), true));
            channels.push((format!("host-{full_id}"), true));
        }

        let client = Arc::new(Client {
            full_id: full_id.clone(),
            short_id: short_id.clone(),
            hosting: intro.hosting,
            channels: channels.iter().map(|(key, _)| key.clone()).collect(),
            tx,
        });

        self.clients.insert(full_id.clone(), client.clone());
        self.clients.insert(short_id, client.clone());

        for (key, announce) in &channels {
            if *announce {
                let members: Vec<String> = self
                    .channels
                    .entry(key.clone())
                    .or_default()
                    .iter()
                    .cloned()
                    .collect();
                for member in members {
                    if let Some(peer) = self.clients.get(&member) {
                        peer.send(Outbound::Text(join_packet(&full_id)));
                    }
                }
            }
            self.channels.entry(key.clone()).or_default().insert(full_id.clone());
        }

        // A joiner with a present, hosting target gets its JOIN at once.
        if let Some(target) = &intro.host_target {
            if let Some(host) = self.clients.get(target) {
                if host.hosting {
                    client.send(Outbound::Text(join_packet(&host.full_id)));
                }
            }
        }

        client
    }

    /// Relay a MSG packet, overwriting `from` with the authenticated
    /// sender. Unknown targets are silently dropped.
    pub fn relay_msg(&self, sender: &Client, packet: MsgPacket) {
        let Some(target) = packet.target_client else {
            return;
        };
        let Some(recipient) = self.clients.get(&target) else {
            tracing::debug!("MSG for unknown target {target} dropped");
            return;
        };
        let forwarded = MsgPacket {
            kind: "MSG".to_string(),
            target_client: None,
            from: sender.full_id.clone(),
            data: packet.data,
        };
        match serde_json::to_string(&forwarded) {
            Ok(frame) => recipient.send(Outbound::Text(frame)),
            Err(e) => tracing::warn!("serializing relayed MSG: {e}"),
        }
    }

    /// Remove a client from the registry and its channels.
    pub fn unregister(&self, client: &Client) {
        self.clients
            .remove_if(&client.full_id, |_, stored| stored.full_id == client.full_id);
        self.clients
            .remove_if(&client.short_id, |_, stored| stored.full_id == client.full_id);
        for key in &client.channels {
            if let Some(mut members) = self.channels.get_mut(key) {
                members.remove(&client.full_id);
            }
        }
        self.channels.retain(|_, members| !members.is_empty());
    }

    /// (clients, channels) currently tracked.
    pub fn stats(&self) -> (usize, usize) {
        let clients = self
            .clients
            .iter()
            .filter(|entry| entry.key() == &entry.value().full_id)
            .count();
        (clients, self.channels.len())
    }
}
