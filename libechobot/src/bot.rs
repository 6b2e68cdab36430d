//! Bot assembly
//!
//! Turns a [`Config`] into running workers: opens the store, builds the
//! platform and forecast clients, confirms the credentials and hands each
//! worker to the [`Supervisor`].

use std::future::Future;
use std::sync::Arc;
use tracing::info;

use crate::api::http::{HttpApi, HttpForecastFetcher};
use crate::api::{ForecastFetcher, RemoteApi};
use crate::config::{expand_path, Config};
use crate::db::Database;
use crate::engine::{Clock, CycleReport, LocalClock};
use crate::error::Result;
use crate::events::EventLog;
use crate::retry::{retry_forever, RetryPolicy};
use crate::shutdown::Shutdown;
use crate::supervisor::Supervisor;
use crate::{stats, watcher, weather};

/// Which optional workers to start
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub stats: bool,
    pub weather: bool,
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            stats: config.stats.enabled,
            weather: config.weather.enabled,
        }
    }
}

pub struct Bot {
    config: Config,
    api: Arc<dyn RemoteApi>,
    fetcher: Arc<dyn ForecastFetcher>,
    db: Database,
    events: EventLog,
    clock: Arc<dyn Clock>,
}

impl Bot {
    /// Build the production bot: HTTP clients, on-disk store and event log
    pub async fn from_config(config: Config) -> Result<Self> {
        let api = HttpApi::new(
            &config.api.base_url,
            config.api.bearer_token.clone(),
            config.api.user_id,
        )?;
        let fetcher = HttpForecastFetcher::new()?;
        let db = Database::new(&config.database.path).await?;
        let events = if config.files.event_log.is_empty() {
            EventLog::disabled()
        } else {
            EventLog::new(expand_path(&config.files.event_log))
        };

        Ok(Self::with_parts(
            config,
            Arc::new(api),
            Arc::new(fetcher),
            db,
            events,
            Arc::new(LocalClock),
        ))
    }

    pub fn with_parts(
        config: Config,
        api: Arc<dyn RemoteApi>,
        fetcher: Arc<dyn ForecastFetcher>,
        db: Database,
        events: EventLog,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            api,
            fetcher,
            db,
            events,
            clock,
        }
    }

    /// Confirm the credentials, retrying until they work.
    ///
    /// Returns the bot's own account id (the configured one wins), or `None`
    /// if stop was requested first.
    pub async fn authenticate(&self, shutdown: &Shutdown) -> Option<u64> {
        info!("Start authenticating");
        let api = &self.api;
        let retry = RetryPolicy::fixed(self.config.error_interval());
        let account = retry_forever(&retry, shutdown, "verify credentials", move || {
            api.verify_credentials()
        })
        .await?;

        let own_id = self.config.api.user_id.unwrap_or(account.id);
        info!(handle = %account.handle, own_id, "Authenticated");
        Some(own_id)
    }

    /// Run a single watcher cycle
    pub async fn run_once(&self, shutdown: &Shutdown) -> Result<Option<CycleReport>> {
        let Some(own_id) = self.authenticate(shutdown).await else {
            return Ok(None);
        };
        let mut worker = watcher::build(
            &self.config,
            Arc::clone(&self.api),
            self.db.clone(),
            own_id,
            self.events.clone(),
        );
        worker.run_cycle(shutdown).await
    }

    /// Start every enabled worker and supervise them until `signal` resolves
    pub async fn run<S>(self, options: RunOptions, signal: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let mut supervisor = Supervisor::new();
        let shutdown = supervisor.shutdown();

        tokio::pin!(signal);
        let own_id = tokio::select! {
            id = self.authenticate(&shutdown) => id,
            _ = &mut signal => None,
        };
        let Some(own_id) = own_id else {
            info!("Stopped before authentication finished");
            return Ok(());
        };

        let watcher = watcher::build(
            &self.config,
            Arc::clone(&self.api),
            self.db.clone(),
            own_id,
            self.events.clone(),
        );
        supervisor.spawn(watcher::WORKER_NAME, watcher.run(supervisor.shutdown()));

        if options.stats {
            let worker = stats::build(
                &self.config,
                Arc::clone(&self.api),
                self.db.clone(),
                own_id,
                self.events.clone(),
                Arc::clone(&self.clock),
            );
            supervisor.spawn(stats::WORKER_NAME, worker.run(supervisor.shutdown()));
        }

        if options.weather {
            let worker = weather::build(
                &self.config,
                Arc::clone(&self.api),
                Arc::clone(&self.fetcher),
                self.events.clone(),
                Arc::clone(&self.clock),
            );
            supervisor.spawn(weather::WORKER_NAME, worker.run(supervisor.shutdown()));
        }

        info!(workers = supervisor.len(), "Bot started");
        supervisor.run_until(signal).await
    }
}
