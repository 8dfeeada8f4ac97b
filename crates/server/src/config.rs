//! Command line and environment configuration of the relay.

use std::time::Duration;

use clap::Parser;

/// Switchboard Peering Server, a self-hostable rendezvous relay.
#[derive(Parser, Debug, Clone)]
#[command(name = "sps", version, about)]
pub struct ServerArgs {
    /// Interface to bind.
    #[arg(long, default_value = "0.0.0.0", env = "SPS_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080, env = "SPS_PORT")]
    pub port: u16,

    /// Require this pass code in every client intro.
    #[arg(long, env = "SPS_PASS")]
    pub pass: Option<String>,

    /// Suppress the periodic stats line.
    #[arg(long, default_value_t = false, env = "SPS_QUIET")]
    pub quiet: bool,

    /// Stats print frequency in seconds.
    #[arg(long = "stats", default_value_t = 300, env = "SPS_STAT_FREQ")]
    pub stats: u64,

    /// Ping clients with text frames instead of protocol pings, for
    /// runtimes that cannot observe protocol-level pings.
    #[arg(
        long = "ping_text",
        default_value_t = false,
        env = "SPS_PING_TEXT",
        action = clap::ArgAction::Set,
        num_args = 1
    )]
    pub ping_text: bool,

    /// Ping frequency in seconds. A client missing two consecutive
    /// pings is terminated.
    #[arg(long = "ping", default_value_t = 30, env = "SPS_PING_FREQ")]
    pub ping: u64,
}

/// Runtime relay configuration derived from [ServerArgs].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Required intro pass code, if any.
    pub pass_code: Option<String>,
    /// Interval between liveness pings.
    pub ping_frequency: Duration,
    /// Send pings as text frames.
    pub ping_text: bool,
    /// Interval between stats lines.
    pub stat_frequency: Duration,
    /// Suppress stats.
    pub quiet: bool,
    /// How long a fresh connection may take to present its intro.
    pub intro_deadline: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            pass_code: None,
            ping_frequency: Duration::from_secs(30),
            ping_text: false,
            stat_frequency: Duration::from_secs(300),
            quiet: false,
            intro_deadline: Duration::from_secs(15),
        }
    }
}

impl From<&ServerArgs> for RelayConfig {
    fn from(args: &ServerArgs) -> Self {
        Self {
            pass_code: args.pass.clone(),
            ping_frequency: Duration::from_secs(args.ping.max(1)),
            ping_text: args.ping_text,
            stat_frequency: Duration::from_secs(args.stats.max(1)),
            quiet: args.quiet,
            intro_deadline: Duration::from_secs(15),
        }
    }
}
