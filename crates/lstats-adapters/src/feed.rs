//! External match feed: newest-first match history per tracked entity, and
//! full raw records by key.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lstats_core::{Continent, MatchIdentity, TrackedEntity};
use lstats_storage::{FetchError, HttpFetcher};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Provider's cap on ids per history request.
pub const MAX_HISTORY_PAGE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchRef {
    /// Provider match key, e.g. `NA1_12345`.
    pub key: String,
    pub continent: Continent,
}

impl MatchRef {
    pub fn parse(key: &str) -> Result<Self, FeedError> {
        let identity = MatchIdentity::parse_key(key).map_err(|err| FeedError::Malformed(err.to_string()))?;
        Ok(Self {
            key: key.to_string(),
            continent: identity.continent,
        })
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("match {0} not found upstream")]
    NotFound(String),
    #[error("match history for {0} is unavailable")]
    Unavailable(String),
    #[error(transparent)]
    Fetch(FetchError),
    #[error("malformed feed data: {0}")]
    Malformed(String),
}

impl FeedError {
    /// Per-match condition; the caller skips the match and carries on.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FeedError::NotFound(_))
    }
}

#[async_trait]
pub trait MatchFeed: Send + Sync {
    fn feed_id(&self) -> &'static str;

    /// One page of match keys, newest first. A short page means the history
    /// is exhausted.
    async fn history_page(
        &self,
        entity: &TrackedEntity,
        start: usize,
        count: usize,
    ) -> Result<Vec<MatchRef>, FeedError>;

    async fn load_match(&self, match_ref: &MatchRef) -> Result<Value, FeedError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedFixture {
    /// Account id to match keys, newest first.
    #[serde(default)]
    pub histories: BTreeMap<String, Vec<String>>,
    /// Match key to raw provider record.
    #[serde(default)]
    pub matches: BTreeMap<String, Value>,
    /// Accounts whose history requests fail.
    #[serde(default)]
    pub unavailable_accounts: BTreeSet<String>,
}

pub fn load_feed_fixture(path: impl AsRef<Path>) -> Result<FeedFixture> {
    read_json_file(path)
}

pub(crate) fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Serves history and records from a captured fixture. Counts calls so tests
/// can assert on laziness.
#[derive(Debug, Default)]
pub struct FixtureMatchFeed {
    fixture: FeedFixture,
    history_calls: AtomicUsize,
    load_calls: AtomicUsize,
}

impl FixtureMatchFeed {
    pub fn new(fixture: FeedFixture) -> Self {
        Self {
            fixture,
            ..Default::default()
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load_feed_fixture(path)?))
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MatchFeed for FixtureMatchFeed {
    fn feed_id(&self) -> &'static str {
        "fixtures"
    }

    async fn history_page(
        &self,
        entity: &TrackedEntity,
        start: usize,
        count: usize,
    ) -> Result<Vec<MatchRef>, FeedError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if self.fixture.unavailable_accounts.contains(&entity.account_id) {
            return Err(FeedError::Unavailable(entity.account_id.clone()));
        }
        let Some(history) = self.fixture.histories.get(&entity.account_id) else {
            return Ok(Vec::new());
        };
        history
            .iter()
            .skip(start)
            .take(count.min(MAX_HISTORY_PAGE))
            .map(|key| MatchRef::parse(key))
            .collect()
    }

    async fn load_match(&self, match_ref: &MatchRef) -> Result<Value, FeedError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        self.fixture
            .matches
            .get(&match_ref.key)
            .cloned()
            .ok_or_else(|| FeedError::NotFound(match_ref.key.clone()))
    }
}

/// Current match API over the shared HTTP client. The API key travels as a
/// default header configured on the client.
#[derive(Debug, Clone)]
pub struct RiotMatchFeed {
    http: Arc<HttpFetcher>,
    run_id: Uuid,
    base_url: Option<String>,
}

impl RiotMatchFeed {
    pub const API_KEY_HEADER: &'static str = "X-Riot-Token";

    pub fn new(http: Arc<HttpFetcher>) -> Self {
        Self {
            http,
            run_id: Uuid::new_v4(),
            base_url: None,
        }
    }

    /// Sends every request to `base_url` instead of the continent hosts.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn host(&self, continent: Continent) -> String {
        match &self.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}.api.riotgames.com", continent.as_str().to_ascii_lowercase()),
        }
    }

    pub fn history_url(&self, entity: &TrackedEntity, start: usize, count: usize) -> String {
        format!(
            "{}/lol/match/v5/matches/by-puuid/{}/ids?start={start}&count={}",
            self.host(entity.platform.continent()),
            entity.account_id,
            count.min(MAX_HISTORY_PAGE)
        )
    }

    pub fn match_url(&self, match_ref: &MatchRef) -> String {
        format!("{}/lol/match/v5/matches/{}", self.host(match_ref.continent), match_ref.key)
    }
}

#[async_trait]
impl MatchFeed for RiotMatchFeed {
    fn feed_id(&self) -> &'static str {
        "riot"
    }

    async fn history_page(
        &self,
        entity: &TrackedEntity,
        start: usize,
        count: usize,
    ) -> Result<Vec<MatchRef>, FeedError> {
        let continent = entity.platform.continent();
        let url = self.history_url(entity, start, count);
        let response = self
            .http
            .fetch_bytes(self.run_id, continent.as_str(), &url)
            .await
            .map_err(|err| match err {
                FetchError::NotFound { .. } => FeedError::Unavailable(entity.account_id.clone()),
                other => FeedError::Fetch(other),
            })?;
        let keys: Vec<String> = response.json().map_err(FeedError::Fetch)?;
        keys.iter().map(|key| MatchRef::parse(key)).collect()
    }

    async fn load_match(&self, match_ref: &MatchRef) -> Result<Value, FeedError> {
        let url = self.match_url(match_ref);
        let response = self
            .http
            .fetch_bytes(self.run_id, match_ref.continent.as_str(), &url)
            .await
            .map_err(|err| match err {
                FetchError::NotFound { .. } => FeedError::NotFound(match_ref.key.clone()),
                other => FeedError::Fetch(other),
            })?;
        response.json().map_err(FeedError::Fetch)
    }
}
