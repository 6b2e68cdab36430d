//! HTTP implementation of the remote API and forecast fetcher
//!
//! Talks to the platform's v2 JSON endpoints with a bearer token obtained out
//! of band. Search and follower listings follow `next_token` pagination until
//! the platform reports no more pages. A listing still paginating after
//! `MAX_PAGES` is an error, never a partial result.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

use super::{ForecastFetcher, RemoteApi, RemoteResult};
use crate::error::RemoteError;
use crate::types::{Account, Author, Item};

const SEARCH_PAGE_SIZE: u32 = 100;
const FOLLOWERS_PAGE_SIZE: u32 = 1000;
const MAX_PAGES: usize = 100;
const TWEET_FIELDS: &str = "created_at,lang,referenced_tweets,author_id";
const USER_FIELDS: &str = "username,name";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    includes: Includes,
    meta: Option<Meta>,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<UserData>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
    text: String,
    author_id: Option<String>,
    created_at: Option<String>,
    lang: Option<String>,
    #[serde(default)]
    referenced_tweets: Vec<Reference>,
}

#[derive(Debug, Deserialize)]
struct Reference {
    #[serde(rename = "type")]
    kind: String,
    id: String,
}

#[derive(Debug, Deserialize)]
struct UserData {
    id: String,
    username: String,
    #[serde(default)]
    name: String,
}

fn parse_id(raw: &str) -> RemoteResult<u64> {
    raw.parse()
        .map_err(|_| RemoteError::Response(format!("invalid id '{}'", raw)))
}

fn to_item(tweet: TweetData, users: &HashMap<String, &UserData>) -> RemoteResult<Item> {
    let author_id = tweet
        .author_id
        .ok_or_else(|| RemoteError::Response(format!("post {} has no author", tweet.id)))?;
    let user = users.get(&author_id);

    Ok(Item {
        id: parse_id(&tweet.id)?,
        created_at: tweet.created_at.unwrap_or_default(),
        author: Author {
            id: parse_id(&author_id)?,
            handle: user.map(|u| u.username.clone()).unwrap_or_default(),
            name: user.map(|u| u.name.clone()).unwrap_or_default(),
        },
        text: tweet.text,
        lang: tweet.lang,
        reshare_of: tweet
            .referenced_tweets
            .iter()
            .find(|r| r.kind == "retweeted")
            .map(|r| parse_id(&r.id))
            .transpose()?,
    })
}

fn items_from_page(page: Page<TweetData>) -> RemoteResult<Vec<Item>> {
    let users: HashMap<String, &UserData> = page
        .includes
        .users
        .iter()
        .map(|u| (u.id.clone(), u))
        .collect();
    page.data
        .into_iter()
        .map(|tweet| to_item(tweet, &users))
        .collect()
}

fn too_many_pages(what: &str) -> RemoteError {
    RemoteError::Response(format!("{} still has more pages after {}", what, MAX_PAGES))
}

async fn read_json<T: DeserializeOwned>(response: Response) -> RemoteResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RemoteError::Response(format!("HTTP {}: {}", status, body.trim())));
    }
    Ok(response.json::<T>().await?)
}

fn build_client() -> RemoteResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("echobot/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| RemoteError::Request(e.to_string()))
}

/// Platform client authenticated with a bearer token
pub struct HttpApi {
    client: Client,
    base_url: String,
    token: SecretString,
    user_id: OnceLock<u64>,
}

impl HttpApi {
    pub fn new(base_url: &str, token: SecretString, user_id: Option<u64>) -> RemoteResult<Self> {
        let cell = OnceLock::new();
        if let Some(id) = user_id {
            let _ = cell.set(id);
        }
        Ok(Self {
            client: build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            user_id: cell,
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(self.token.expose_secret())
    }

    fn post_to(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(self.token.expose_secret())
    }

    fn own_id(&self) -> RemoteResult<u64> {
        self.user_id.get().copied().ok_or_else(|| {
            RemoteError::Request("own account id is unknown; verify credentials first".to_string())
        })
    }

    async fn search_page(
        &self,
        query: &str,
        since_id: Option<u64>,
        max_results: u32,
        next_token: Option<&str>,
    ) -> RemoteResult<Page<TweetData>> {
        let mut params: Vec<(&str, String)> = vec![
            ("query", query.to_string()),
            ("max_results", max_results.to_string()),
            ("tweet.fields", TWEET_FIELDS.to_string()),
            ("expansions", "author_id".to_string()),
            ("user.fields", USER_FIELDS.to_string()),
        ];
        if let Some(since) = since_id {
            params.push(("since_id", since.to_string()));
        }
        if let Some(token) = next_token {
            params.push(("next_token", token.to_string()));
        }

        let response = self
            .get("/2/tweets/search/recent")
            .query(&params)
            .send()
            .await?;
        read_json(response).await
    }
}

#[async_trait]
impl RemoteApi for HttpApi {
    async fn verify_credentials(&self) -> RemoteResult<Account> {
        let response = self.get("/2/users/me").send().await?;
        let envelope: Envelope<UserData> = read_json(response).await?;
        let account = Account {
            id: parse_id(&envelope.data.id)?,
            handle: envelope.data.username,
        };
        let _ = self.user_id.set(account.id);
        Ok(account)
    }

    async fn search(&self, query: &str, since_id: Option<u64>) -> RemoteResult<Vec<Item>> {
        let mut items = Vec::new();
        let mut next_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut page = self
                .search_page(query, since_id, SEARCH_PAGE_SIZE, next_token.as_deref())
                .await?;
            next_token = page.meta.take().and_then(|m| m.next_token);
            items.extend(items_from_page(page)?);
            if next_token.is_none() {
                debug!(count = items.len(), "Search finished");
                return Ok(items);
            }
        }

        Err(too_many_pages("search"))
    }

    async fn discover_latest(&self, query: &str) -> RemoteResult<Item> {
        let page = self.search_page(query, None, 10, None).await?;
        items_from_page(page)?
            .into_iter()
            .max_by_key(|item| item.id)
            .ok_or_else(|| RemoteError::Response(format!("no posts match '{}'", query)))
    }

    async fn retweet(&self, item_id: u64) -> RemoteResult<()> {
        let me = self.own_id()?;
        let response = self
            .post_to(&format!("/2/users/{}/retweets", me))
            .json(&serde_json::json!({ "tweet_id": item_id.to_string() }))
            .send()
            .await?;
        let _: serde_json::Value = read_json(response).await?;
        Ok(())
    }

    async fn post(&self, text: &str) -> RemoteResult<()> {
        let response = self
            .post_to("/2/tweets")
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;
        let _: serde_json::Value = read_json(response).await?;
        Ok(())
    }

    async fn follower_ids(&self, user_id: u64) -> RemoteResult<BTreeSet<String>> {
        let mut ids = BTreeSet::new();
        let mut next_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut request = self
                .get(&format!("/2/users/{}/followers", user_id))
                .query(&[("max_results", FOLLOWERS_PAGE_SIZE.to_string())]);
            if let Some(token) = &next_token {
                request = request.query(&[("pagination_token", token)]);
            }

            let mut page: Page<UserData> = read_json(request.send().await?).await?;
            next_token = page.meta.take().and_then(|m| m.next_token);
            ids.extend(page.data.into_iter().map(|u| u.id));
            if next_token.is_none() {
                return Ok(ids);
            }
        }

        Err(too_many_pages("follower listing"))
    }
}

/// Plain GET fetcher for the weather feed
pub struct HttpForecastFetcher {
    client: Client,
}

impl HttpForecastFetcher {
    pub fn new() -> RemoteResult<Self> {
        Ok(Self {
            client: build_client()?,
        })
    }
}

#[async_trait]
impl ForecastFetcher for HttpForecastFetcher {
    async fn fetch(&self, url: &str) -> RemoteResult<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Response(format!("HTTP {} from {}", status, url)));
        }
        Ok(response.text().await?)
    }
}
