//! Worker supervision
//!
//! Every worker runs as its own tokio task and receives a [`Shutdown`] token
//! at construction. The supervisor waits for an external stop signal, or for
//! any worker to exit on its own, then requests stop and joins every task.
//! Worker errors and panics are surfaced as [`BotError::Worker`].

use std::future::Future;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use crate::error::{BotError, Result};
use crate::shutdown::{self, Shutdown, ShutdownTrigger};

type Outcome = (String, std::result::Result<Result<()>, JoinError>);

pub struct Supervisor {
    trigger: ShutdownTrigger,
    shutdown: Shutdown,
    workers: JoinSet<Outcome>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        let (trigger, shutdown) = shutdown::channel();
        Self {
            trigger,
            shutdown,
            workers: JoinSet::new(),
        }
    }

    /// Token to hand to a worker before spawning it
    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn spawn<F>(&mut self, name: impl Into<String>, worker: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        info!(worker = %name, "Starting worker");
        // The inner task turns a panic into a JoinError we can attribute
        let inner = tokio::spawn(worker);
        self.workers.spawn(async move { (name, inner.await) });
    }

    /// Run until `signal` resolves or a worker exits, then stop and join all.
    ///
    /// Returns the first worker failure, if any.
    pub async fn run_until<S>(mut self, signal: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let mut first_error = None;

        tokio::select! {
            _ = signal => {
                info!("Stop requested, stopping workers");
            }
            Some(joined) = self.workers.join_next() => {
                let outcome = flatten(joined);
                warn!("A worker exited before stop was requested, stopping the rest");
                first_error = outcome.err();
            }
        }

        self.trigger.trigger();

        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = flatten(joined) {
                first_error.get_or_insert(e);
            }
        }

        info!("All workers stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn flatten(joined: std::result::Result<Outcome, JoinError>) -> Result<()> {
    let (name, result) = joined.map_err(|e| BotError::Worker {
        name: "unknown".to_string(),
        reason: e.to_string(),
    })?;

    match result {
        Ok(Ok(())) => {
            info!(worker = %name, "Worker finished");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(worker = %name, error = %e, "Worker failed");
            Err(BotError::Worker {
                name,
                reason: e.to_string(),
            })
        }
        Err(e) => {
            let reason = if e.is_panic() {
                "panicked".to_string()
            } else {
                e.to_string()
            };
            error!(worker = %name, %reason, "Worker crashed");
            Err(BotError::Worker { name, reason })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_stops_and_joins_every_worker() {
        let mut supervisor = Supervisor::new();
        let stopped = Arc::new(AtomicUsize::new(0));

        for name in ["watcher", "stats", "weather"] {
            let shutdown = supervisor.shutdown();
            let stopped = Arc::clone(&stopped);
            supervisor.spawn(name, async move {
                shutdown.requested().await;
                stopped.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        assert_eq!(supervisor.len(), 3);

        supervisor
            .run_until(tokio::time::sleep(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(stopped.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failing_worker_stops_the_rest() {
        let mut supervisor = Supervisor::new();
        let shutdown = supervisor.shutdown();
        supervisor.spawn("watcher", async move {
            shutdown.requested().await;
            Ok(())
        });
        supervisor.spawn("stats", async {
            Err(RemoteError::Request("boom".to_string()).into())
        });

        let err = supervisor
            .run_until(std::future::pending())
            .await
            .unwrap_err();
        match err {
            BotError::Worker { name, reason } => {
                assert_eq!(name, "stats");
                assert!(reason.contains("boom"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_panicking_worker_is_reported() {
        let mut supervisor = Supervisor::new();
        async fn broken() -> Result<()> {
            panic!("bad feed")
        }
        supervisor.spawn("weather", broken());

        let err = supervisor
            .run_until(std::future::pending())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Worker weather failed: panicked");
    }

    #[tokio::test]
    async fn test_no_workers_waits_for_signal() {
        let supervisor = Supervisor::new();
        assert!(supervisor.is_empty());
        supervisor.run_until(async {}).await.unwrap();
    }
}
