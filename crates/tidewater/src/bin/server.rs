//! # Tidewater Server
//!
//! Headless host for the ledger and the ambient scheduler.
//!
//! ```bash
//! # Default config path
//! ./tidewater_server
//!
//! # Explicit config, verbose ledger logs
//! RUST_LOG=tidewater_economy=debug ./tidewater_server config/tidewater.toml
//! ```

use std::process::ExitCode;

use tidewater::{Server, TidewaterConfig};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG: &str = "config/tidewater.toml";

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tidewater=info,tidewater_economy=info,tidewater_scheduler=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TIDEWATER_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());

    let config = if std::path::Path::new(&path).exists() {
        match TidewaterConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                error!(%path, error = %e, "failed to load configuration");
                return ExitCode::FAILURE;
            }
        }
    } else {
        warn!(%path, "config file not found, using in-memory defaults");
        TidewaterConfig::default()
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(serve(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: TidewaterConfig) -> tidewater::ServerResult<()> {
    let server = Server::start(&config)?;
    info!(
        durable = config.economy.store.path.is_some(),
        ambient_events = config.scheduler.events.len(),
        "tidewater server listening (press Ctrl+C to stop)"
    );

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown requested");
        if stop.send(true).is_err() {
            debug!("server already stopped");
        }
    });

    server.run(shutdown).await
}
