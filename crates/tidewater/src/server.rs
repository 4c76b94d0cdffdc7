//! # Server Host
//!
//! Owns the economy and the ambient scheduler for the lifetime of the
//! process.
//!
//! ```text
//! start()  ── open ledger (WAL replay) ── load catalogue ── build scheduler
//! run()    ── scheduler loop ──┐
//!                              ├── announcements ──> log
//!                              ├── completed event sweep
//! shutdown ────────────────────┘── checkpoint ledger
//! ```

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use tidewater_economy::{Boundaries, ChannelTelemetry, Counter, Economy, StaticCatalogue};
use tidewater_scheduler::{Scheduler, SchedulerEvent};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::TidewaterConfig;
use crate::error::{ServerError, ServerResult};

/// Capacity of the telemetry and announcement channels.
const CHANNEL_CAPACITY: usize = 1024;

/// A started server.
pub struct Server {
    economy: Economy,
    scheduler: Arc<Scheduler>,
    tick_interval: Duration,
    telemetry: Receiver<Counter>,
    announcements: Receiver<SchedulerEvent>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("economy", &self.economy)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Opens the ledger, loads content and builds the scheduler.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if the catalogue cannot be loaded,
    /// `ServerError::Ledger` if the WAL cannot be opened and
    /// `ServerError::Scheduler` for duplicate ambient event keys.
    pub fn start(config: &TidewaterConfig) -> ServerResult<Self> {
        let catalogue = match &config.catalogue {
            Some(path) => StaticCatalogue::load(path).map_err(|e| ServerError::Config(e.to_string()))?,
            None => StaticCatalogue::new(),
        };
        info!(events = catalogue.event_count(), "catalogue loaded");

        let (sink, telemetry) = ChannelTelemetry::bounded(CHANNEL_CAPACITY);
        let boundaries = Boundaries::new(Arc::new(catalogue)).with_telemetry(Arc::new(sink));
        let economy = Economy::open(&config.economy, boundaries)?;

        let scheduler = Arc::new(Scheduler::new(&config.scheduler)?);
        let announcements = scheduler.subscribe(CHANNEL_CAPACITY);

        Ok(Self {
            economy,
            scheduler,
            tick_interval: config.scheduler.tick_interval(),
            telemetry,
            announcements,
        })
    }

    /// The economy handle, for transports that accept player input.
    #[must_use]
    pub fn economy(&self) -> &Economy {
        &self.economy
    }

    /// The ambient scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Runs until `shutdown` flips to true, then checkpoints the ledger.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Ledger` if the final checkpoint fails.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> ServerResult<()> {
        let scheduler = Arc::clone(&self.scheduler);
        let interval = self.tick_interval;
        let ticks = tokio::spawn(async move { scheduler.run(interval, shutdown).await });

        let mut drain = tokio::time::interval(Duration::from_secs(1));
        while !ticks.is_finished() {
            drain.tick().await;
            self.drain_channels();
            let purged = self.economy.events().purge_completed();
            if purged > 0 {
                debug!(purged, "completed event instances purged");
            }
        }
        self.drain_channels();

        self.economy.shutdown()?;
        info!("server stopped");
        Ok(())
    }

    /// Forwards pending announcements and counters to the log.
    pub fn drain_channels(&self) {
        for notice in self.announcements.try_iter() {
            match notice {
                SchedulerEvent::Started { event, announcement } => {
                    info!(key = %event.key, ends = %event.ends, message = announcement.as_deref().unwrap_or(""), "ambient event announced");
                }
                SchedulerEvent::Expired { event, announcement } => {
                    info!(key = %event.key, message = announcement.as_deref().unwrap_or(""), "ambient event ended");
                }
            }
        }
        for counter in self.telemetry.try_iter() {
            debug!(entity = %counter.entity, key = %counter.key, delta = counter.delta, "counter");
        }
    }
}
