use std::sync::Arc;

use clap::Parser;
use switchboard_server::config::RelayConfig;
use switchboard_server::config::ServerArgs;
use switchboard_server::error::Result;
use switchboard_server::logging;
use switchboard_server::relay::Relay;
use switchboard_server::ws;

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();
    logging::init_logging(logging::LogLevel::Info);

    let config = RelayConfig::from(&args);
    let quiet = config.quiet;
    let relay = Arc::new(Relay::new(config));

    if !quiet {
        tokio::spawn(ws::stats_task(relay.clone()));
    }

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("sps listening on {addr}");

    let app = ws::router(relay);
    tokio::select! {
        served = async { axum::serve(listener, app).await } => {
            served?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    Ok(())
}
