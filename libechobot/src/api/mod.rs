//! Remote API facade
//!
//! The bot only needs a handful of platform capabilities. They are collected
//! in the [`RemoteApi`] trait so workers can be driven by the HTTP client in
//! production and by [`mock::MockApi`] in tests.
//!
//! Every method fails with a [`RemoteError`]; callers never distinguish
//! network trouble from API rejections and simply retry or skip.

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::error::RemoteError;
use crate::types::{Account, Item};

pub mod http;

// Mock API is available for all builds (not just tests) to support integration tests
pub mod mock;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Platform capabilities used by the workers
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Check the credentials and return the account they belong to
    async fn verify_credentials(&self) -> RemoteResult<Account>;

    /// All items matching `query` that are newer than `since_id`, newest first
    async fn search(&self, query: &str, since_id: Option<u64>) -> RemoteResult<Vec<Item>>;

    /// The newest item matching `query`, used to seed an empty checkpoint
    async fn discover_latest(&self, query: &str) -> RemoteResult<Item>;

    /// Reshare the item with the given id
    async fn retweet(&self, item_id: u64) -> RemoteResult<()>;

    /// Publish a new text post
    async fn post(&self, text: &str) -> RemoteResult<()>;

    /// Ids of every account following `user_id`
    async fn follower_ids(&self, user_id: u64) -> RemoteResult<BTreeSet<String>>;
}

/// Source of raw forecast documents
#[async_trait]
pub trait ForecastFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> RemoteResult<String>;
}
