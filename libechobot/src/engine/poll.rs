//! Poll-filter-act engine
//!
//! A [`PollWorker`] repeatedly asks its [`Feed`] for items newer than the
//! checkpoint, runs each one through an ordered chain of [`Filter`]s and, if
//! nothing objects, hands it to the [`Action`]. Items are handled in
//! increasing id order and the checkpoint is advanced and persisted after
//! every item, whatever the outcome, before the next one is looked at.
//!
//! Failures are split three ways:
//!
//! - a remote failure while fetching is retried after the cooldown until it
//!   succeeds;
//! - a remote failure inside the action is logged and the item counts as
//!   processed, so one bad item cannot stall the queue;
//! - a local failure (list file, database, checkpoint) aborts the cycle
//!   without moving the checkpoint; the next cycle starts over from the last
//!   persisted offset.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::api::RemoteResult;
use crate::checkpoint::Checkpoint;
use crate::error::{BotError, Result};
use crate::events::{Decision, EventLog};
use crate::retry::{retry_forever, RetryPolicy};
use crate::shutdown::Shutdown;
use crate::types::{Identified, SkipReason};

/// Where new items come from
#[async_trait]
pub trait Feed: Send + Sync {
    type Item: Identified + Serialize + Send + Sync;

    /// Id of the newest available item, used when there is no checkpoint yet
    async fn latest(&self) -> RemoteResult<u64>;

    /// Items newer than `offset`, in any order
    async fn since(&self, offset: u64) -> RemoteResult<Vec<Self::Item>>;
}

/// One exclusion rule
#[async_trait]
pub trait Filter<I>: Send + Sync {
    /// `Some(reason)` if the item must be skipped
    async fn check(&self, item: &I) -> Result<Option<SkipReason>>;
}

/// What to do with an item that passed every filter
#[async_trait]
pub trait Action<I>: Send + Sync {
    /// `Err(BotError::Remote)` marks the item as failed but processed; any
    /// other error aborts the cycle.
    async fn perform(&self, item: &I) -> Result<()>;
}

/// Counts for one pass over the feed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub acted: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct PollWorker<F: Feed> {
    name: String,
    feed: F,
    filters: Vec<Box<dyn Filter<F::Item>>>,
    action: Box<dyn Action<F::Item>>,
    checkpoint: Checkpoint,
    events: EventLog,
    retry: RetryPolicy,
    interval: Duration,
    offset: Option<u64>,
}

impl<F: Feed> PollWorker<F> {
    pub fn new(
        name: impl Into<String>,
        feed: F,
        action: impl Action<F::Item> + 'static,
        checkpoint: Checkpoint,
        events: EventLog,
        retry: RetryPolicy,
        interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            feed,
            filters: Vec::new(),
            action: Box::new(action),
            checkpoint,
            events,
            retry,
            interval,
            offset: None,
        }
    }

    /// Append a filter; filters run in the order they were added
    pub fn with_filter(mut self, filter: impl Filter<F::Item> + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Offset of the last processed item, once known
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Load the checkpoint, or discover and persist a starting point.
    ///
    /// Returns `None` if stop was requested while discovery was retrying.
    async fn start_offset(&mut self, shutdown: &Shutdown) -> Result<Option<u64>> {
        if let Some(offset) = self.checkpoint.read().await? {
            self.offset = Some(offset);
            return Ok(Some(offset));
        }

        info!(worker = %self.name, "Trying to get a new offset");
        let feed = &self.feed;
        let Some(latest) = retry_forever(&self.retry, shutdown, "discover latest", move || feed.latest()).await
        else {
            return Ok(None);
        };

        self.checkpoint.write(latest).await?;
        self.offset = Some(latest);
        info!(worker = %self.name, offset = latest, "Starting from the newest item");
        Ok(Some(latest))
    }

    async fn decide(&self, item: &F::Item) -> Result<Option<SkipReason>> {
        for filter in &self.filters {
            if let Some(reason) = filter.check(item).await? {
                return Ok(Some(reason));
            }
        }
        Ok(None)
    }

    /// Fetch and process everything currently available.
    ///
    /// Returns `None` if stop was requested while a remote call was retrying.
    pub async fn run_cycle(&mut self, shutdown: &Shutdown) -> Result<Option<CycleReport>> {
        let offset = match self.offset {
            Some(offset) => offset,
            None => match self.start_offset(shutdown).await? {
                Some(offset) => offset,
                None => return Ok(None),
            },
        };

        debug!(worker = %self.name, offset, "Making a new query");
        let feed = &self.feed;
        let Some(mut items) = retry_forever(&self.retry, shutdown, "search", move || feed.since(offset)).await
        else {
            return Ok(None);
        };

        items.retain(|item| item.id() > offset);
        items.sort_by_key(|item| item.id());
        items.dedup_by_key(|item| item.id());

        let mut report = CycleReport {
            fetched: items.len(),
            ..Default::default()
        };
        if items.is_empty() {
            debug!(worker = %self.name, "No new items found");
            return Ok(Some(report));
        }
        info!(worker = %self.name, count = items.len(), "Got new item(s)");

        for item in &items {
            if shutdown.is_requested() {
                info!(worker = %self.name, "Stop requested, leaving the rest of the batch");
                break;
            }

            let decision = match self.decide(item).await? {
                Some(reason) => {
                    report.skipped += 1;
                    Decision::Skipped { reason }
                }
                None => match self.action.perform(item).await {
                    Ok(()) => {
                        report.acted += 1;
                        Decision::Acted
                    }
                    Err(BotError::Remote(e)) => {
                        report.failed += 1;
                        Decision::ActionFailed {
                            error: e.to_string(),
                        }
                    }
                    Err(e) => return Err(e),
                },
            };

            if let Err(e) = self.events.record(&self.name, item.id(), &decision, item).await {
                warn!(worker = %self.name, error = %e, "Failed to append to the event log");
            }

            self.checkpoint.write(item.id()).await?;
            self.offset = Some(item.id());
        }

        Ok(Some(report))
    }

    /// Poll until stop is requested
    pub async fn run(mut self, shutdown: Shutdown) -> Result<()> {
        info!(worker = %self.name, interval_secs = self.interval.as_secs(), "Worker started");

        while !shutdown.is_requested() {
            match self.run_cycle(&shutdown).await {
                Ok(Some(report)) => {
                    debug!(
                        worker = %self.name,
                        fetched = report.fetched,
                        acted = report.acted,
                        skipped = report.skipped,
                        failed = report.failed,
                        "Cycle finished"
                    );
                }
                Ok(None) => break,
                Err(e) => {
                    error!(worker = %self.name, error = %e, "Cycle aborted, will retry from the last saved offset");
                    if shutdown.sleep(self.retry.delay).await {
                        break;
                    }
                    continue;
                }
            }

            if shutdown.sleep(self.interval).await {
                break;
            }
        }

        info!(worker = %self.name, "Worker stopped");
        Ok(())
    }
}
