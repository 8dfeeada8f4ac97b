//! The rendezvous multiplexer.
//!
//! A [Switchboard] fans out over many untrusted rendezvous servers,
//! dedupes the peers sighted across them, and gates every candidate
//! session through the signed intro exchange before surfacing it. The
//! rendezvous only ever sees opaque signaling payloads; identity is
//! bound to the session's SDP by the intro signature, so a relay that
//! tampers with descriptions cannot impersonate anyone.

mod blacklist;
mod builder;

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
pub use blacklist::Blacklist;
pub use blacklist::BlacklistDuration;
pub use builder::SwitchboardBuilder;
use dashmap::DashMap;

use crate::auth;
use crate::bus::Emittable;
use crate::bus::Subscribable;
use crate::consts::SHORT_ID_LEN;
use crate::ecc;
use crate::ecc::KeyPair;
use crate::ecc::Seed;
use crate::error::Error;
use crate::error::Result;
use crate::rendezvous::AnnounceRole;
use crate::rendezvous::ConnectorHandle;
use crate::rendezvous::Dialect;
use crate::rendezvous::RendezvousCallback;
use crate::rendezvous::RendezvousOptions;
use crate::rendezvous::SharedRendezvousCallback;
use crate::rendezvous::sps::SpsConnector;
use crate::rendezvous::sps::SpsOptions;
use crate::rendezvous::tracker::TrackerConnector;
use crate::rendezvous::tracker::TrackerOptions;
use crate::session::PeerSession;
use crate::session::SessionConfig;
use crate::session::SessionEvent;
use crate::session::SessionEventKind;

/// What the supervisor was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Accept joiners.
    Host,
    /// Find one specific host.
    JoinHost,
    /// Mesh with a named group.
    Swarm,
}

/// Events surfaced by the supervisor.
#[derive(Clone)]
pub enum SwitchboardEvent {
    /// Every currently-tracked rendezvous reported open. Fired once.
    Connected,
    /// A peer passed authentication; ownership is the caller's to share.
    Peer(PeerSession),
    /// A peer id was sighted at a rendezvous and ran through the gate.
    PeerSeen(String),
    /// A peer crossed the failure threshold.
    PeerBlacklisted(String),
    /// A survivable problem.
    Warn(String),
    /// Terminal. Carries the fatal error, if any.
    Kill(Option<String>),
}

/// Discriminants of [SwitchboardEvent].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum SwitchboardEventKind {
    Connected,
    Peer,
    PeerSeen,
    PeerBlacklisted,
    Warn,
    Kill,
}

impl Emittable for SwitchboardEvent {
    type Kind = SwitchboardEventKind;

    fn kind(&self) -> SwitchboardEventKind {
        match self {
            SwitchboardEvent::Connected => SwitchboardEventKind::Connected,
            SwitchboardEvent::Peer(_) => SwitchboardEventKind::Peer,
            SwitchboardEvent::PeerSeen(_) => SwitchboardEventKind::PeerSeen,
            SwitchboardEvent::PeerBlacklisted(_) => SwitchboardEventKind::PeerBlacklisted,
            SwitchboardEvent::Warn(_) => SwitchboardEventKind::Warn,
            SwitchboardEvent::Kill(_) => SwitchboardEventKind::Kill,
        }
    }
}

/// Error type of callback methods.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Application-facing callback, an alternative to subscribing on the
/// event bus. All methods default to no-ops.
#[async_trait]
pub trait SwitchboardCallback {
    /// A peer authenticated.
    async fn on_peer(&self, _peer: &PeerSession) -> std::result::Result<(), CallbackError> {
        Ok(())
    }

    /// A survivable problem was reported.
    async fn on_warn(&self, _message: &str) -> std::result::Result<(), CallbackError> {
        Ok(())
    }

    /// The supervisor died.
    async fn on_kill(&self, _error: Option<&str>) -> std::result::Result<(), CallbackError> {
        Ok(())
    }
}

/// Shared callback trait object.
pub type SharedSwitchboardCallback = Arc<dyn SwitchboardCallback + Send + Sync>;

pub(crate) struct SwitchboardConfig {
    pub realm: String,
    pub user_key: String,
    pub rendezvous: Option<Vec<RendezvousOptions>>,
    pub skip_extra_trackers: bool,
    pub extra_tracker_list_url: String,
    pub ice_servers: String,
    pub external_address: Option<String>,
    pub invites: usize,
    pub client_timeout: Duration,
    pub trickle_timeout: Duration,
    pub max_reconnect_attempts: u32,
}

struct SwitchboardInner {
    config: SwitchboardConfig,
    seed: Seed,
    keypair: KeyPair,
    full_id: String,
    short_id: String,
    info_hash: String,
    events: Subscribable<SwitchboardEvent>,
    callback: std::sync::RwLock<Option<SharedSwitchboardCallback>>,
    /// ShortID -> authenticated session. First-wins per id.
    connected: DashMap<String, PeerSession>,
    blacklist: Blacklist,
    connectors: Mutex<Vec<ConnectorHandle>>,
    wanted_peer_count: AtomicUsize,
    wanted_specific_id: Mutex<Option<String>>,
    mode: Mutex<Option<ConnectionMode>>,
    killed: AtomicBool,
    connected_emitted: AtomicBool,
}

/// A peer-to-peer matchmaking supervisor. Cheap to clone; `kill` is the
/// single terminal operation.
#[derive(Clone)]
pub struct Switchboard {
    inner: Arc<SwitchboardInner>,
}

fn normalize_short(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

impl Switchboard {
    pub(crate) fn build(
        config: SwitchboardConfig,
        seed: Seed,
        blacklist: Blacklist,
        callback: Option<SharedSwitchboardCallback>,
    ) -> Self {
        let keypair = KeyPair::from_seed(&seed);
        let info_hash = ecc::make_info_hash(&config.realm, &config.user_key);
        let inner = Arc::new(SwitchboardInner {
            full_id: keypair.full_id(),
            short_id: keypair.short_id(),
            info_hash,
            config,
            seed,
            keypair,
            events: Subscribable::new(),
            callback: std::sync::RwLock::new(callback),
            connected: DashMap::new(),
            blacklist,
            connectors: Mutex::new(Vec::new()),
            wanted_peer_count: AtomicUsize::new(usize::MAX),
            wanted_specific_id: Mutex::new(None),
            mode: Mutex::new(None),
            killed: AtomicBool::new(false),
            connected_emitted: AtomicBool::new(false),
        });
        Self { inner }
    }

    /// The event bus of this supervisor.
    pub fn events(&self) -> &Subscribable<SwitchboardEvent> {
        &self.inner.events
    }

    /// Replace the application callback.
    pub fn set_callback(&self, callback: SharedSwitchboardCallback) {
        *self.inner.callback.write().unwrap() = Some(callback);
    }

    /// Our announced id, the ShortID.
    pub fn peer_id(&self) -> &str {
        &self.inner.short_id
    }

    /// Our ShortID.
    pub fn short_id(&self) -> &str {
        &self.inner.short_id
    }

    /// Our FullID.
    pub fn full_id(&self) -> &str {
        &self.inner.full_id
    }

    /// The Base58 seed, the only thing worth persisting.
    pub fn secret_seed(&self) -> String {
        self.inner.seed.to_base58()
    }

    /// The rendezvous namespace key of this realm and user key.
    pub fn info_hash(&self) -> &str {
        &self.inner.info_hash
    }

    /// Number of live rendezvous connectors.
    pub fn tracker_count(&self) -> usize {
        self.inner.connectors.lock().unwrap().len()
    }

    /// Snapshot of the authenticated sessions.
    pub fn connected_peers(&self) -> Vec<PeerSession> {
        self.inner.connected.iter().map(|e| e.value().clone()).collect()
    }

    /// Whether `kill` has run.
    pub fn is_killed(&self) -> bool {
        self.inner.killed.load(Ordering::SeqCst)
    }

    /// What the supervisor was asked to do, once started.
    pub fn connection_mode(&self) -> Option<ConnectionMode> {
        *self.inner.mode.lock().unwrap()
    }

    /// Accept any peers that find us, up to `max_peers`.
    pub async fn host(&self, max_peers: Option<usize>) -> Result<()> {
        self.start(
            ConnectionMode::Host,
            AnnounceRole::Host,
            max_peers.unwrap_or(usize::MAX),
            None,
        )
        .await
    }

    /// Hunt for one specific peer by id (ShortID or FullID).
    pub async fn find_host(&self, host_id: &str) -> Result<()> {
        self.start(
            ConnectionMode::JoinHost,
            AnnounceRole::JoinHost(host_id.to_string()),
            1,
            Some(host_id.to_string()),
        )
        .await
    }

    /// Mesh with everyone announcing the same group id.
    pub async fn swarm(&self, swarm_id: &str, max_peers: Option<usize>) -> Result<()> {
        self.start(
            ConnectionMode::Swarm,
            AnnounceRole::Swarm(swarm_id.to_string()),
            max_peers.unwrap_or(usize::MAX),
            None,
        )
        .await
    }

    async fn start(
        &self,
        mode: ConnectionMode,
        role: AnnounceRole,
        wanted_peer_count: usize,
        wanted_specific_id: Option<String>,
    ) -> Result<()> {
        if self.is_killed() {
            return Err(Error::Killed);
        }
        *self.inner.mode.lock().unwrap() = Some(mode);
        self.inner
            .wanted_peer_count
            .store(wanted_peer_count, Ordering::SeqCst);
        *self.inner.wanted_specific_id.lock().unwrap() = wanted_specific_id;

        let rendezvous = self.resolve_rendezvous().await;
        let callback: SharedRendezvousCallback = Arc::new(SupervisorRendezvousCallback {
            inner: Arc::downgrade(&self.inner),
        });

        let session_config = SessionConfig {
            ice_servers: self.inner.config.ice_servers.clone(),
            external_address: self.inner.config.external_address.clone(),
            initiator: false,
            trickle_ice: false,
            trickle_timeout: self.inner.config.trickle_timeout,
        };

        let mut handles = self.inner.connectors.lock().unwrap();
        for options in rendezvous {
            let handle = match options.dialect {
                Dialect::Tracker => TrackerConnector::spawn(
                    TrackerOptions {
                        url: options.url,
                        info_hash: self.inner.info_hash.clone(),
                        peer_id: self.inner.short_id.clone(),
                        invites: self.inner.config.invites,
                        max_reconnect_attempts: self.inner.config.max_reconnect_attempts,
                        is_required: options.is_required,
                        session_config: session_config.clone(),
                    },
                    callback.clone(),
                ),
                Dialect::Sps => SpsConnector::spawn(
                    SpsOptions {
                        url: options.url,
                        role: role.clone(),
                        pass_code: options.pass_code,
                        max_reconnect_attempts: self.inner.config.max_reconnect_attempts,
                        is_required: options.is_required,
                        session_config: session_config.clone(),
                    },
                    self.inner.keypair.clone(),
                    callback.clone(),
                ),
            };
            handles.push(handle);
        }
        Ok(())
    }

    /// Union the configured rendezvous list with the fetched auxiliary
    /// tracker list, deduped by url. Fetch failure is survivable.
    async fn resolve_rendezvous(&self) -> Vec<RendezvousOptions> {
        let mut list: Vec<RendezvousOptions> = match &self.inner.config.rendezvous {
            Some(explicit) => explicit.clone(),
            None => {
                let mut list: Vec<RendezvousOptions> = crate::consts::DEFAULT_TRACKERS
                    .iter()
                    .map(|url| RendezvousOptions::tracker(*url))
                    .collect();
                if !self.inner.config.skip_extra_trackers {
                    match fetch_tracker_list(&self.inner.config.extra_tracker_list_url).await {
                        Ok(extra) => list.extend(extra.into_iter().map(RendezvousOptions::tracker)),
                        Err(e) => {
                            self.emit_warn(format!("auxiliary tracker list unavailable: {e}"))
                                .await;
                        }
                    }
                }
                list
            }
        };

        let mut seen = HashSet::new();
        list.retain(|options| seen.insert(options.url.clone()));
        list
    }

    /// The admission gate. Consulted by connectors before any resources
    /// are spent on a sighted peer; true means reject.
    pub fn should_block_connection(&self, peer_id: &str) -> bool {
        self.inner.should_block_connection(peer_id)
    }

    /// Run a stabilized candidate session through the authentication
    /// gate, exactly as a connector sighting would.
    pub(crate) async fn admit_candidate(&self, rendezvous: &str, session: PeerSession) {
        self.inner
            .clone()
            .authenticate_candidate(rendezvous.to_string(), session)
            .await;
    }

    /// Whether a peer id is currently suppressed.
    pub fn is_blacklisted(&self, id: &str) -> bool {
        self.inner.blacklist.is_blacklisted(id)
    }

    /// Record failures for a peer. With `inc` of `None` the peer is
    /// blacklisted immediately.
    pub fn add_peer_failure(&self, peer: &PeerSession, inc: Option<u32>) {
        self.inner.add_peer_failure(peer, inc);
    }

    /// Tear the supervisor down: stop every connector, optionally close
    /// every authenticated peer, and emit `kill`. Idempotent.
    pub async fn kill(&self, error: Option<Error>, kill_peers: bool) {
        self.inner.kill(error, kill_peers).await;
    }

    async fn emit_warn(&self, message: String) {
        self.inner.emit_warn(message).await;
    }
}

impl SwitchboardInner {
    fn should_block_connection(&self, peer_id: &str) -> bool {
        self.events.emit(&SwitchboardEvent::PeerSeen(peer_id.to_string()));

        if self.killed.load(Ordering::SeqCst) {
            return true;
        }
        if self.blacklist.is_blacklisted(peer_id) {
            return true;
        }
        if let Some(wanted) = self.wanted_specific_id.lock().unwrap().as_deref() {
            if !ecc::id_prefix_match(peer_id, wanted) {
                return true;
            }
        }
        if self.connected.contains_key(&normalize_short(peer_id)) {
            return true;
        }
        // Defensive cap: a flood of failing peers must not grow state
        // beyond what the caller asked for.
        if self.blacklist.len() >= self.wanted_peer_count.load(Ordering::SeqCst) {
            return true;
        }
        false
    }

    fn add_peer_failure(self: &Arc<Self>, peer: &PeerSession, inc: Option<u32>) {
        let Some(id) = peer.verified_full_id().or_else(|| peer.peer_id()) else {
            return;
        };
        let crossed = self.blacklist.add_failure(&id, inc);
        if !crossed {
            return;
        }
        if let BlacklistDuration::Timed(duration) = self.blacklist.duration() {
            self.events
                .emit(&SwitchboardEvent::PeerBlacklisted(id.clone()));
            let weak = Arc::downgrade(self);
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                if let Some(inner) = weak.upgrade() {
                    inner.blacklist.remove(&id);
                }
            });
        }
    }

    async fn emit_warn(&self, message: String) {
        tracing::warn!("{message}");
        self.events.emit(&SwitchboardEvent::Warn(message.clone()));
        let callback = self.callback.read().unwrap().clone();
        if let Some(callback) = callback {
            if let Err(e) = callback.on_warn(&message).await {
                tracing::error!("Callback on_warn failed: {e:?}");
            }
        }
    }

    async fn kill(self: &Arc<Self>, error: Option<Error>, kill_peers: bool) {
        if self.killed.swap(true, Ordering::SeqCst) {
            return;
        }
        for handle in self.connectors.lock().unwrap().drain(..) {
            handle.kill();
        }
        if kill_peers {
            let sessions: Vec<PeerSession> = self
                .connected
                .iter()
                .map(|entry| entry.value().clone())
                .collect();
            self.connected.clear();
            for session in sessions {
                session.close(true).await;
            }
        }

        let error_text = error.map(|e| e.to_string());
        self.events
            .emit(&SwitchboardEvent::Kill(error_text.clone()));
        let callback = self.callback.read().unwrap().clone();
        if let Some(callback) = callback {
            if let Err(e) = callback.on_kill(error_text.as_deref()).await {
                tracing::error!("Callback on_kill failed: {e:?}");
            }
        }
    }

    /// Gate a stabilized candidate through the signed intro exchange.
    async fn authenticate_candidate(self: Arc<Self>, rendezvous: String, session: PeerSession) {
        if self.killed.load(Ordering::SeqCst) {
            session.close(true).await;
            return;
        }

        // First-wins per ShortID: a duplicate sighting from another
        // rendezvous is closed, not raced.
        if let Some(advertised) = session.peer_id() {
            if self.connected.contains_key(&normalize_short(&advertised)) {
                session.close(true).await;
                return;
            }
        }

        session.begin_authentication();

        let weak = Arc::downgrade(&self);
        let close_session = session.clone();
        session
            .events()
            .permanent(SessionEventKind::Close, move |_: &SessionEvent| {
                let Some(inner) = weak.upgrade() else { return };
                let key = close_session
                    .verified_full_id()
                    .or_else(|| close_session.peer_id())
                    .map(|id| normalize_short(&id));
                if let Some(key) = key {
                    inner
                        .connected
                        .remove_if(&key, |_, stored| stored.same(&close_session));
                }
            });

        let events = self.events.clone();
        session
            .events()
            .permanent(SessionEventKind::Error, move |event: &SessionEvent| {
                if let SessionEvent::Error(reason) = event {
                    events.emit(&SwitchboardEvent::Warn(format!("peer error: {reason}")));
                }
            });

        let inner = self.clone();
        let auth_session = session.clone();
        let task = tokio::spawn(async move {
            inner.run_authentication(rendezvous, auth_session).await;
        });
        session.register_timer(task.abort_handle());
    }

    async fn run_authentication(self: Arc<Self>, rendezvous: String, session: PeerSession) {
        let Some(local_sdp) = session.local_sdp().await else {
            self.emit_warn(format!("{rendezvous}: candidate has no local SDP"))
                .await;
            session.close(false).await;
            return;
        };
        let packet = auth::make_sig_packet(&self.keypair, &local_sdp);
        if let Err(e) = session.send(packet, None).await {
            self.emit_warn(format!("{rendezvous}: intro send failed: {e}"))
                .await;
            session.close(false).await;
            return;
        }

        // First inbound message on the application channel is the peer's
        // signed intro.
        let intro = match tokio::time::timeout(self.config.client_timeout, session.next_inbound())
            .await
        {
            Ok(Some(bytes)) => bytes,
            _ => {
                self.add_peer_failure(&session, Some(1));
                self.emit_warn(format!("{rendezvous}: peer never completed the handshake"))
                    .await;
                session.close(false).await;
                return;
            }
        };

        let remote_sdp = session.remote_sdp().await.unwrap_or_default();
        let advertised = session.peer_id();
        let wanted = self.wanted_specific_id.lock().unwrap().clone();

        let verified = match auth::verify_sig_packet(
            &intro,
            &remote_sdp,
            advertised.as_deref(),
            wanted.as_deref(),
        ) {
            Ok(verified) => verified,
            Err(e) => {
                self.add_peer_failure(&session, Some(1));
                self.emit_warn(format!("{rendezvous}: authentication rejected: {e}"))
                    .await;
                session.close(false).await;
                return;
            }
        };

        self.blacklist.remove(&verified.full_id);
        session.set_verified_full_id(&verified.full_id);

        let key = normalize_short(&verified.full_id);
        let inserted = match self.connected.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(session.clone());
                true
            }
        };
        if !inserted {
            // Lost the first-wins race while authenticating.
            session.close(true).await;
            return;
        }

        tracing::info!("{rendezvous}: authenticated peer {}", verified.full_id);
        self.events.emit(&SwitchboardEvent::Peer(session.clone()));
        let callback = self.callback.read().unwrap().clone();
        if let Some(callback) = callback {
            if let Err(e) = callback.on_peer(&session).await {
                tracing::error!("Callback on_peer failed: {e:?}");
            }
        }
    }

    async fn connector_opened(self: Arc<Self>, _rendezvous: &str) {
        let all_open = {
            let handles = self.connectors.lock().unwrap();
            !handles.is_empty() && handles.iter().all(|h| h.is_open())
        };
        if all_open && !self.connected_emitted.swap(true, Ordering::SeqCst) {
            self.events.emit(&SwitchboardEvent::Connected);
        }
    }

    async fn connector_killed(self: Arc<Self>, rendezvous: &str, error: Error) {
        let (removed_required, none_left) = {
            let mut handles = self.connectors.lock().unwrap();
            let removed_required = handles
                .iter()
                .find(|h| h.url == rendezvous)
                .map(|h| h.is_required)
                .unwrap_or(false);
            handles.retain(|h| h.url != rendezvous);
            (removed_required, handles.is_empty())
        };

        if removed_required || none_left {
            self.kill(
                Some(Error::ConnectionFailed(format!("{rendezvous}: {error}"))),
                false,
            )
            .await;
        } else {
            self.emit_warn(format!("rendezvous {rendezvous} lost: {error}"))
                .await;
        }
    }
}

struct SupervisorRendezvousCallback {
    inner: Weak<SwitchboardInner>,
}

#[async_trait]
impl RendezvousCallback for SupervisorRendezvousCallback {
    fn should_block(&self, peer_id: &str) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.should_block_connection(peer_id),
            None => true,
        }
    }

    async fn on_peer(&self, rendezvous: &str, peer: PeerSession) {
        match self.inner.upgrade() {
            Some(inner) => {
                inner
                    .authenticate_candidate(rendezvous.to_string(), peer)
                    .await
            }
            None => peer.close(true).await,
        }
    }

    async fn on_open(&self, rendezvous: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.connector_opened(rendezvous).await;
        }
    }

    async fn on_kill(&self, rendezvous: &str, error: Error) {
        if let Some(inner) = self.inner.upgrade() {
            inner.connector_killed(rendezvous, error).await;
        }
    }

    async fn on_warn(&self, rendezvous: &str, message: String) {
        if let Some(inner) = self.inner.upgrade() {
            inner.emit_warn(format!("{rendezvous}: {message}")).await;
        }
    }
}

async fn fetch_tracker_list(url: &str) -> Result<Vec<String>> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| Error::TrackerListFetch(e.to_string()))?;
    let body = response
        .text()
        .await
        .map_err(|e| Error::TrackerListFetch(e.to_string()))?;
    Ok(body
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("wss://"))
        .map(str::to_string)
        .collect())
}
