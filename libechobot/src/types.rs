//! Core types for echobot

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Timestamp layout used for `retweets.retweeted_at`; sorts correctly as text
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Date layout used for `stats.date`
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Author of a platform post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: u64,
    pub handle: String,
    pub name: String,
}

/// The authenticated account the bot runs as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: u64,
    pub handle: String,
}

/// A post returned by the platform search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: u64,
    pub created_at: String,
    pub author: Author,
    pub text: String,
    pub lang: Option<String>,
    /// Id of the wrapped post when this item is itself a reshare
    pub reshare_of: Option<u64>,
}

impl Item {
    pub fn is_reshare(&self) -> bool {
        self.reshare_of.is_some()
    }
}

/// Anything the poll engine can order and checkpoint by
pub trait Identified {
    fn id(&self) -> u64;
}

impl Identified for Item {
    fn id(&self) -> u64 {
        self.id
    }
}

/// Why an item was not acted on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyRetweeted,
    BlacklistedUser,
    BlacklistedWord,
    ExcludedLanguage,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::AlreadyRetweeted => write!(f, "already retweeted"),
            SkipReason::BlacklistedUser => write!(f, "user is in blacklist"),
            SkipReason::BlacklistedWord => write!(f, "contains blacklisted phrases"),
            SkipReason::ExcludedLanguage => write!(f, "excluded language"),
        }
    }
}

/// Row of the `retweets` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub retweeted_at: String,
    pub created_at: String,
    pub user_id: u64,
    pub user_handle: String,
    pub user_name: String,
    pub item_id: u64,
    pub item_text: String,
}

impl ActionRecord {
    pub fn new(item: &Item, retweeted_at: NaiveDateTime) -> Self {
        Self {
            retweeted_at: retweeted_at.format(TIMESTAMP_FORMAT).to_string(),
            created_at: item.created_at.clone(),
            user_id: item.author.id,
            user_handle: item.author.handle.clone(),
            user_name: item.author.name.clone(),
            item_id: item.id,
            item_text: item.text.clone(),
        }
    }
}

/// Row of the `stats` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub date: NaiveDate,
    pub followers: BTreeSet<String>,
}

impl StatsSnapshot {
    /// Comma-joined form stored in the database
    pub fn joined(&self) -> String {
        self.followers
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn split(joined: &str) -> BTreeSet<String> {
        joined
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}
