//! This module provides [SwitchboardBuilder] and its interface for
//! [Switchboard].

use std::time::Duration;

use crate::consts::DEFAULT_BLACKLIST_DURATION_MS;
use crate::consts::DEFAULT_CLIENT_MAX_RETRIES;
use crate::consts::DEFAULT_CLIENT_TIMEOUT_MS;
use crate::consts::DEFAULT_INVITES;
use crate::consts::DEFAULT_MAX_RECONNECT_ATTEMPTS;
use crate::consts::DEFAULT_TRICKLE_TIMEOUT_MS;
use crate::consts::EXTRA_TRACKER_LIST_URL;
use crate::ecc::Seed;
use crate::rendezvous::RendezvousOptions;
use crate::switchboard::Blacklist;
use crate::switchboard::BlacklistDuration;
use crate::switchboard::SharedSwitchboardCallback;
use crate::switchboard::Switchboard;
use crate::switchboard::SwitchboardConfig;

/// Creates a SwitchboardBuilder to configure a [Switchboard].
pub struct SwitchboardBuilder {
    realm: String,
    user_key: String,
    seed: Option<Seed>,
    rendezvous: Option<Vec<RendezvousOptions>>,
    skip_extra_trackers: bool,
    extra_tracker_list_url: String,
    ice_servers: String,
    external_address: Option<String>,
    invites: usize,
    client_timeout: Duration,
    client_max_retries: u32,
    blacklist_duration: BlacklistDuration,
    trickle_timeout: Duration,
    max_reconnect_attempts: u32,
    callback: Option<SharedSwitchboardCallback>,
}

impl SwitchboardBuilder {
    /// Creates a new instance of [SwitchboardBuilder]. The realm
    /// namespaces the user key so unrelated applications sharing a
    /// rendezvous can never match.
    pub fn new(realm: &str, user_key: &str) -> Self {
        Self {
            realm: realm.to_string(),
            user_key: user_key.to_string(),
            seed: None,
            rendezvous: None,
            skip_extra_trackers: false,
            extra_tracker_list_url: EXTRA_TRACKER_LIST_URL.to_string(),
            ice_servers: "stun://stun.l.google.com:19302".to_string(),
            external_address: None,
            invites: DEFAULT_INVITES,
            client_timeout: Duration::from_millis(DEFAULT_CLIENT_TIMEOUT_MS),
            client_max_retries: DEFAULT_CLIENT_MAX_RETRIES,
            blacklist_duration: BlacklistDuration::Timed(Duration::from_millis(
                DEFAULT_BLACKLIST_DURATION_MS,
            )),
            trickle_timeout: Duration::from_millis(DEFAULT_TRICKLE_TIMEOUT_MS),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            callback: None,
        }
    }

    /// Use a persisted seed instead of generating a fresh identity.
    pub fn seed(mut self, seed: Seed) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Dial exactly these rendezvous servers. Disables the default list
    /// and the auxiliary fetch.
    pub fn rendezvous(mut self, rendezvous: Vec<RendezvousOptions>) -> Self {
        self.rendezvous = Some(rendezvous);
        self
    }

    /// Skip fetching the auxiliary tracker list.
    pub fn skip_extra_trackers(mut self) -> Self {
        self.skip_extra_trackers = true;
        self
    }

    /// Fetch the auxiliary tracker list from a different url.
    pub fn extra_tracker_list_url(mut self, url: &str) -> Self {
        self.extra_tracker_list_url = url.to_string();
        self
    }

    /// Sets up the ICE servers used by every session.
    pub fn ice_servers(mut self, ice_servers: &str) -> Self {
        self.ice_servers = ice_servers.to_string();
        self
    }

    /// Sets up the external address for sessions in "HOST" network mode.
    pub fn external_address(mut self, external_address: String) -> Self {
        self.external_address = Some(external_address);
        self
    }

    /// Offers carried per tracker announce.
    pub fn invites(mut self, invites: usize) -> Self {
        self.invites = invites;
        self
    }

    /// How long a candidate may take to complete the signed handshake.
    pub fn client_timeout(mut self, timeout: Duration) -> Self {
        self.client_timeout = timeout;
        self
    }

    /// Failures beyond this count blacklist a peer.
    pub fn client_max_retries(mut self, retries: u32) -> Self {
        self.client_max_retries = retries;
        self
    }

    /// Lifetime policy of blacklist entries.
    pub fn blacklist_duration(mut self, duration: BlacklistDuration) -> Self {
        self.blacklist_duration = duration;
        self
    }

    /// Gathering wait bound for non-trickle sessions.
    pub fn trickle_timeout(mut self, timeout: Duration) -> Self {
        self.trickle_timeout = timeout;
        self
    }

    /// Reconnect attempts before a connector gives up.
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Bind an application callback.
    pub fn callback(mut self, callback: SharedSwitchboardCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Build the `Switchboard`. Nothing is dialed until one of `host`,
    /// `find_host` or `swarm` runs.
    pub fn build(self) -> Switchboard {
        let seed = self.seed.unwrap_or_else(Seed::random);
        let blacklist = Blacklist::new(self.client_max_retries, self.blacklist_duration);
        let config = SwitchboardConfig {
            realm: self.realm,
            user_key: self.user_key,
            rendezvous: self.rendezvous,
            skip_extra_trackers: self.skip_extra_trackers,
            extra_tracker_list_url: self.extra_tracker_list_url,
            ice_servers: self.ice_servers,
            external_address: self.external_address,
            invites: self.invites,
            client_timeout: self.client_timeout,
            trickle_timeout: self.trickle_timeout,
            max_reconnect_attempts: self.max_reconnect_attempts,
        };
        Switchboard::build(config, seed, blacklist, self.callback)
    }
}
