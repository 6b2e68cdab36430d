//! echobot - keyword watcher and scheduled poster for a regional account
//!
//! The library holds everything the `echobot` daemon runs: a poll-filter-act
//! engine that retweets matching posts, a clock-driven engine for the weekly
//! stats and weather posts, and the durable state both rely on (an offset
//! checkpoint, block lists and a SQLite store).

pub mod api;
pub mod bot;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod lists;
pub mod logging;
pub mod retry;
pub mod shutdown;
pub mod stats;
pub mod supervisor;
pub mod types;
pub mod watcher;
pub mod weather;

// Re-export commonly used types
pub use bot::{Bot, RunOptions};
pub use config::Config;
pub use db::Database;
pub use error::{BotError, Result};
pub use types::{ActionRecord, Item, SkipReason, StatsSnapshot};
