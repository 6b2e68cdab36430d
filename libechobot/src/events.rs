//! Append-only audit log of worker decisions
//!
//! Every decision is written as one JSON object per line and mirrored to
//! `tracing`, so the file can be grepped or replayed independently of the
//! process logs.

use chrono::Local;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::{Result, StorageError};
use crate::types::SkipReason;

/// What a worker decided to do with one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Skipped { reason: SkipReason },
    Acted,
    ActionFailed { error: String },
    Posted { kind: String },
}

#[derive(Serialize)]
struct Entry<'a, T: Serialize> {
    at: String,
    worker: &'a str,
    #[serde(flatten)]
    decision: &'a Decision,
    item: &'a T,
}

#[derive(Clone)]
pub struct EventLog {
    path: Option<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl EventLog {
    /// Log to the given JSON-lines file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Only emit through `tracing`
    pub fn disabled() -> Self {
        Self {
            path: None,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Record a decision about `item`
    pub async fn record<T: Serialize>(
        &self,
        worker: &str,
        item_id: u64,
        decision: &Decision,
        item: &T,
    ) -> Result<()> {
        match decision {
            Decision::Skipped { reason } => {
                info!(worker, item_id, %reason, "Skipping item")
            }
            Decision::Acted => info!(worker, item_id, "Action performed"),
            Decision::ActionFailed { error } => {
                error!(worker, item_id, %error, "Action failed, skipping item")
            }
            Decision::Posted { kind } => info!(worker, %kind, "Posted"),
        }

        let Some(path) = &self.path else {
            return Ok(());
        };

        let entry = Entry {
            at: Local::now().naive_local().to_string(),
            worker,
            decision,
            item,
        };
        let mut line = serde_json::to_string(&entry).map_err(StorageError::Encode)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StorageError::io(parent, e))?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| StorageError::io(path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StorageError::io(path, e))?;
        file.flush().await.map_err(|e| StorageError::io(path, e))?;

        Ok(())
    }
}
