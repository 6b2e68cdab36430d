//! Keyword watcher: search, filter, retweet
//!
//! Items come from a keyword search that skips the bot's own posts. Before
//! anything is retweeted it goes through, in order: reshare check, blocked
//! users, blocked phrases and, when configured, excluded languages. Block
//! lists are re-read for every item so they can be edited while the bot runs.

use async_trait::async_trait;
use chrono::Local;
use std::sync::Arc;
use tracing::info;

use crate::api::{RemoteApi, RemoteResult};
use crate::checkpoint::Checkpoint;
use crate::config::{expand_path, Config};
use crate::db::Database;
use crate::engine::{Action, Feed, Filter, PollWorker};
use crate::error::Result;
use crate::events::EventLog;
use crate::lists::ListFile;
use crate::retry::RetryPolicy;
use crate::types::{ActionRecord, Item, SkipReason};

pub const WORKER_NAME: &str = "watcher";

/// Keyword search results, minus the bot's own posts
pub struct SearchFeed {
    api: Arc<dyn RemoteApi>,
    query: String,
    own_id: u64,
}

impl SearchFeed {
    pub fn new(api: Arc<dyn RemoteApi>, query: impl Into<String>, own_id: u64) -> Self {
        Self {
            api,
            query: query.into(),
            own_id,
        }
    }
}

#[async_trait]
impl Feed for SearchFeed {
    type Item = Item;

    async fn latest(&self) -> RemoteResult<u64> {
        Ok(self.api.discover_latest(&self.query).await?.id)
    }

    async fn since(&self, offset: u64) -> RemoteResult<Vec<Item>> {
        let items = self.api.search(&self.query, Some(offset)).await?;
        Ok(items
            .into_iter()
            .filter(|item| item.author.id != self.own_id)
            .collect())
    }
}

/// Skip reshares of someone else's post
pub struct ResharedFilter;

#[async_trait]
impl Filter<Item> for ResharedFilter {
    async fn check(&self, item: &Item) -> Result<Option<SkipReason>> {
        Ok(item.is_reshare().then_some(SkipReason::AlreadyRetweeted))
    }
}

/// Skip authors listed by id or by handle
pub struct BlockedUserFilter {
    list: ListFile,
}

impl BlockedUserFilter {
    pub fn new(list: ListFile) -> Self {
        Self { list }
    }
}

#[async_trait]
impl Filter<Item> for BlockedUserFilter {
    async fn check(&self, item: &Item) -> Result<Option<SkipReason>> {
        let blocked = self.list.load().await?;
        let id = item.author.id.to_string();
        let hit = blocked
            .iter()
            .any(|entry| *entry == id || *entry == item.author.handle);
        Ok(hit.then_some(SkipReason::BlacklistedUser))
    }
}

/// Skip items whose text contains a listed phrase
pub struct BlockedPhraseFilter {
    list: ListFile,
}

impl BlockedPhraseFilter {
    pub fn new(list: ListFile) -> Self {
        Self { list }
    }
}

#[async_trait]
impl Filter<Item> for BlockedPhraseFilter {
    async fn check(&self, item: &Item) -> Result<Option<SkipReason>> {
        let phrases = self.list.load().await?;
        let hit = phrases.iter().any(|phrase| item.text.contains(phrase.as_str()));
        Ok(hit.then_some(SkipReason::BlacklistedWord))
    }
}

/// Skip items tagged with one of the excluded language codes
pub struct LanguageFilter {
    excluded: Vec<String>,
}

impl LanguageFilter {
    pub fn new(excluded: Vec<String>) -> Self {
        Self { excluded }
    }
}

#[async_trait]
impl Filter<Item> for LanguageFilter {
    async fn check(&self, item: &Item) -> Result<Option<SkipReason>> {
        let hit = item
            .lang
            .as_deref()
            .is_some_and(|lang| self.excluded.iter().any(|ex| ex.eq_ignore_ascii_case(lang)));
        Ok(hit.then_some(SkipReason::ExcludedLanguage))
    }
}

/// Retweet and remember it
pub struct RetweetAction {
    api: Arc<dyn RemoteApi>,
    db: Database,
}

impl RetweetAction {
    pub fn new(api: Arc<dyn RemoteApi>, db: Database) -> Self {
        Self { api, db }
    }
}

#[async_trait]
impl Action<Item> for RetweetAction {
    async fn perform(&self, item: &Item) -> Result<()> {
        info!(
            item_id = item.id,
            user_id = item.author.id,
            user_handle = %item.author.handle,
            created_at = %item.created_at,
            text = %item.text,
            "Retweeting"
        );
        self.api.retweet(item.id).await?;

        let record = ActionRecord::new(item, Local::now().naive_local());
        if self.db.record_retweet(&record).await? {
            info!(item_id = item.id, "Saved to database");
        } else {
            info!(item_id = item.id, retweeted_at = %record.retweeted_at, "Record already present");
        }
        Ok(())
    }
}

/// Assemble the watcher worker from configuration
pub fn build(
    config: &Config,
    api: Arc<dyn RemoteApi>,
    db: Database,
    own_id: u64,
    events: EventLog,
) -> PollWorker<SearchFeed> {
    let feed = SearchFeed::new(Arc::clone(&api), config.search_query(), own_id);
    let action = RetweetAction::new(api, db);

    let mut worker = PollWorker::new(
        WORKER_NAME,
        feed,
        action,
        Checkpoint::new(expand_path(&config.files.offset)),
        events,
        RetryPolicy::fixed(config.error_interval()),
        config.check_interval(),
    )
    .with_filter(ResharedFilter)
    .with_filter(BlockedUserFilter::new(ListFile::new(expand_path(
        &config.files.blocked_users,
    ))))
    .with_filter(BlockedPhraseFilter::new(ListFile::new(expand_path(
        &config.files.blocked_phrases,
    ))));

    if !config.watcher.excluded_languages.is_empty() {
        worker = worker.with_filter(LanguageFilter::new(config.watcher.excluded_languages.clone()));
    }
    worker
}
