//! Mock remote API for testing
//!
//! Holds an in-memory timeline and can be told to fail a number of calls, so
//! worker behaviour under transient errors can be exercised without network
//! access. Clones share state, which lets a test keep a handle while the
//! worker owns an `Arc<dyn RemoteApi>`.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use super::{ForecastFetcher, RemoteApi, RemoteResult};
use crate::error::RemoteError;
use crate::types::{Account, Author, Item};

#[derive(Debug, Default)]
struct MockState {
    account: Option<Account>,
    timeline: Vec<Item>,
    followers: BTreeSet<String>,
    /// Remaining forced failures per operation name
    failures: HashMap<&'static str, usize>,
    /// Items whose retweet always fails
    rejected: HashSet<u64>,
    search_calls: usize,
    retweeted: Vec<u64>,
    posted: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MockApi {
    state: Arc<Mutex<MockState>>,
}

impl MockApi {
    pub fn new(account: Account) -> Self {
        let api = Self::default();
        api.state.lock().unwrap().account = Some(account);
        api
    }

    /// Add items to the searchable timeline
    pub fn push_items(&self, items: impl IntoIterator<Item = Item>) {
        self.state.lock().unwrap().timeline.extend(items);
    }

    pub fn set_followers<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.lock().unwrap().followers = ids.into_iter().map(Into::into).collect();
    }

    /// Make the next `times` calls of `operation` fail
    pub fn fail_next(&self, operation: &'static str, times: usize) {
        self.state.lock().unwrap().failures.insert(operation, times);
    }

    /// Make every retweet of `item_id` fail
    pub fn reject_retweet(&self, item_id: u64) {
        self.state.lock().unwrap().rejected.insert(item_id);
    }

    pub fn search_calls(&self) -> usize {
        self.state.lock().unwrap().search_calls
    }

    pub fn retweeted(&self) -> Vec<u64> {
        self.state.lock().unwrap().retweeted.clone()
    }

    pub fn posted(&self) -> Vec<String> {
        self.state.lock().unwrap().posted.clone()
    }

    fn check(&self, operation: &'static str) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.failures.get_mut(operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(RemoteError::Request(format!("mock {} failure", operation)))
            }
            _ => Ok(()),
        }
    }

    fn matching(&self, query: &str) -> Vec<Item> {
        let words: Vec<String> = query
            .split(" OR ")
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        let state = self.state.lock().unwrap();
        let mut items: Vec<Item> = state
            .timeline
            .iter()
            .filter(|item| {
                let text = item.text.to_lowercase();
                words.is_empty() || words.iter().any(|w| text.contains(w.as_str()))
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.id.cmp(&a.id));
        items
    }
}

#[async_trait]
impl RemoteApi for MockApi {
    async fn verify_credentials(&self) -> RemoteResult<Account> {
        self.check("verify_credentials")?;
        self.state
            .lock()
            .unwrap()
            .account
            .clone()
            .ok_or_else(|| RemoteError::Response("HTTP 401: Unauthorized".to_string()))
    }

    async fn search(&self, query: &str, since_id: Option<u64>) -> RemoteResult<Vec<Item>> {
        self.state.lock().unwrap().search_calls += 1;
        self.check("search")?;
        Ok(self
            .matching(query)
            .into_iter()
            .filter(|item| since_id.map_or(true, |since| item.id > since))
            .collect())
    }

    async fn discover_latest(&self, query: &str) -> RemoteResult<Item> {
        self.check("discover_latest")?;
        self.matching(query)
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Response("no posts match".to_string()))
    }

    async fn retweet(&self, item_id: u64) -> RemoteResult<()> {
        self.check("retweet")?;
        let mut state = self.state.lock().unwrap();
        if state.rejected.contains(&item_id) {
            return Err(RemoteError::Response(format!(
                "HTTP 403: retweet of {} rejected",
                item_id
            )));
        }
        state.retweeted.push(item_id);
        Ok(())
    }

    async fn post(&self, text: &str) -> RemoteResult<()> {
        self.check("post")?;
        self.state.lock().unwrap().posted.push(text.to_string());
        Ok(())
    }

    async fn follower_ids(&self, _user_id: u64) -> RemoteResult<BTreeSet<String>> {
        self.check("follower_ids")?;
        Ok(self.state.lock().unwrap().followers.clone())
    }
}

/// Serves fixed documents by URL
#[derive(Debug, Clone, Default)]
pub struct MockForecast {
    documents: Arc<Mutex<HashMap<String, String>>>,
    failures: Arc<Mutex<usize>>,
    calls: Arc<Mutex<usize>>,
}

impl MockForecast {
    pub fn with_document(self, url: &str, body: &str) -> Self {
        self.documents
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
        self
    }

    pub fn fail_next(&self, times: usize) {
        *self.failures.lock().unwrap() = times;
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ForecastFetcher for MockForecast {
    async fn fetch(&self, url: &str) -> RemoteResult<String> {
        *self.calls.lock().unwrap() += 1;
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(RemoteError::Request("mock feed failure".to_string()));
            }
        }
        self.documents
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| RemoteError::Response(format!("HTTP 404 from {}", url)))
    }
}

/// Build a plain (non-reshare) item for tests
pub fn item(id: u64, author_id: u64, handle: &str, text: &str) -> Item {
    Item {
        id,
        created_at: format!("2024-03-01T10:{:02}:00Z", id % 60),
        author: Author {
            id: author_id,
            handle: handle.to_string(),
            name: handle.to_uppercase(),
        },
        text: text.to_string(),
        lang: Some("ru".to_string()),
        reshare_of: None,
    }
}
