//! Constant variables.

/// Length of a short peer id, a FullID prefix.
pub const SHORT_ID_LEN: usize = 20;
/// Length of a full peer id, the hex SHA-1 of a public key.
pub const FULL_ID_LEN: usize = 40;
/// Separator between realm and user key when deriving the info hash.
pub const REALM_SEPARATOR: &str = "::";

/// Label of the reserved in-band control channel.
pub const META_CHANNEL: &str = "_meta";
/// Pre-negotiated id of the control channel.
pub const META_CHANNEL_ID: u16 = 0;
/// Label of the reserved application channel.
pub const DEFAULT_CHANNEL: &str = "default";
/// Pre-negotiated id of the application channel.
pub const DEFAULT_CHANNEL_ID: u16 = 1;

/// How long a non-trickle session waits for ICE gathering before
/// emitting the local description as-is, in ms.
pub const DEFAULT_TRICKLE_TIMEOUT_MS: u64 = 2000;
/// How long the supervisor waits for a candidate peer to complete the
/// signed handshake, in ms.
pub const DEFAULT_CLIENT_TIMEOUT_MS: u64 = 150 * 1000;
/// Failures beyond this count blacklist a peer.
pub const DEFAULT_CLIENT_MAX_RETRIES: u32 = 2;
/// Default lifetime of a blacklist entry, in ms.
pub const DEFAULT_BLACKLIST_DURATION_MS: u64 = 10 * 60 * 1000;

/// Offers carried per tracker announce.
pub const DEFAULT_INVITES: usize = 10;
/// `numwant` sent on every tracker announce.
pub const TRACKER_NUMWANT: u32 = 50;
/// Announce cadence before a tracker dictates its own, in ms.
pub const DEFAULT_ANNOUNCE_INTERVAL_MS: u64 = 50 * 1000;
/// Random bytes in an offer id; doubled in hex on the wire.
pub const OFFER_ID_BYTES: usize = 20;

/// Backoff unit between rendezvous reconnect attempts, in ms.
pub const RECONNECT_BACKOFF_UNIT_MS: u64 = 2000;
/// Backoff multiplier cap.
pub const RECONNECT_BACKOFF_CAP: u32 = 10;
/// Reconnect attempts before a connector gives up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Rendezvous servers dialed when the caller does not supply a list.
pub const DEFAULT_TRACKERS: &[&str] = &[
    "wss://tracker.openwebtorrent.com",
    "wss://tracker.webtorrent.dev",
    "wss://tracker.btorrent.xyz",
    "wss://tracker.files.fm:7073/announce",
];
/// Auxiliary tracker list fetched at startup, one url per line.
pub const EXTRA_TRACKER_LIST_URL: &str =
    "https://raw.githubusercontent.com/ngosang/trackerslist/master/trackers_all_ws.txt";
