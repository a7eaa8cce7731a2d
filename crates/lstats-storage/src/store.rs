//! Idempotent match store. Uniqueness over the natural identity is enforced by
//! the storage layer itself; a duplicate insert is an outcome, not an error.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use lstats_core::{CanonicalMatch, MatchIdentity, Platform, TrackedEntity};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Postgres `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    DuplicateIgnored,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("undecodable row: {0}")]
    Decode(String),
    #[error("tracked entity {0} does not exist")]
    UnknownEntity(i64),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn insert(&self, record: &CanonicalMatch) -> Result<InsertOutcome, StoreError>;

    async fn exists(&self, identity: &MatchIdentity) -> Result<bool, StoreError>;

    async fn tracked_entities(&self) -> Result<Vec<TrackedEntity>, StoreError>;

    /// Only the ingestion engine calls this; registration owns every other column.
    async fn advance_watermark(&self, entity_id: i64, match_key: &str) -> Result<(), StoreError>;

    /// Stored canonical documents with row id greater than `after`, oldest first.
    async fn corpus_page(&self, after: i64, limit: usize) -> Result<Vec<(i64, Value)>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgMatchStore {
    pool: PgPool,
}

impl PgMatchStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

#[async_trait]
impl MatchStore for PgMatchStore {
    async fn insert(&self, record: &CanonicalMatch) -> Result<InsertOutcome, StoreError> {
        let document = Value::Object(record.document.clone());
        let result = sqlx::query("INSERT INTO matches (match_data) VALUES ($1)")
            .bind(&document)
            .execute(&self.pool)
            .await;
        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(err) if is_unique_violation(&err) => {
                debug!(match_key = %record.key(), "duplicate insert ignored");
                Ok(InsertOutcome::DuplicateIgnored)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, identity: &MatchIdentity) -> Result<bool, StoreError> {
        let found: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1
                  FROM matches
                 WHERE match_data ->> 'platform' = $1
                   AND match_data ->> 'continent' = $2
                   AND match_data -> 'matchId' = to_jsonb($3::bigint)
                   AND match_data -> 'id' = to_jsonb($4::bigint)
            )
            "#,
        )
        .bind(identity.platform.as_str())
        .bind(identity.continent.as_str())
        .bind(identity.match_id)
        .bind(identity.id)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn tracked_entities(&self) -> Result<Vec<TrackedEntity>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, platform, profile, last_seen_match_identity
              FROM tracked_entities
             ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let platform: String = row.try_get("platform")?;
            let platform = platform
                .parse::<Platform>()
                .map_err(|err| StoreError::Decode(format!("tracked_entities.id={id}: {err}")))?;
            out.push(TrackedEntity {
                id,
                account_id: row.try_get("account_id")?,
                platform,
                profile: row.try_get("profile")?,
                last_seen_match_identity: row.try_get("last_seen_match_identity")?,
            });
        }
        Ok(out)
    }

    async fn advance_watermark(&self, entity_id: i64, match_key: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE tracked_entities SET last_seen_match_identity = $1 WHERE id = $2")
            .bind(match_key)
            .bind(entity_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownEntity(entity_id));
        }
        Ok(())
    }

    async fn corpus_page(&self, after: i64, limit: usize) -> Result<Vec<(i64, Value)>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query("SELECT id, match_data FROM matches WHERE id > $1 ORDER BY id LIMIT $2")
            .bind(after)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| -> Result<(i64, Value), StoreError> { Ok((row.try_get("id")?, row.try_get("match_data")?)) })
            .collect()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    entities: BTreeMap<i64, TrackedEntity>,
    rows: Vec<(i64, Value)>,
    identities: BTreeSet<MatchIdentity>,
    unavailable: bool,
}

impl MemoryState {
    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }
}

/// In-process store with the same uniqueness contract as the Postgres index.
/// Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryMatchStore {
    state: Mutex<MemoryState>,
}

impl MemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entities(entities: impl IntoIterator<Item = TrackedEntity>) -> Self {
        let entities = entities.into_iter().map(|e| (e.id, e)).collect();
        Self {
            state: Mutex::new(MemoryState {
                entities,
                ..Default::default()
            }),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn entity(&self, entity_id: i64) -> Option<TrackedEntity> {
        self.state.lock().await.entities.get(&entity_id).cloned()
    }

    pub async fn documents(&self) -> Vec<Value> {
        self.state
            .lock()
            .await
            .rows
            .iter()
            .map(|(_, doc)| doc.clone())
            .collect()
    }

    /// Makes every subsequent call fail, simulating lost connectivity.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }
}

#[async_trait]
impl MatchStore for MemoryMatchStore {
    async fn insert(&self, record: &CanonicalMatch) -> Result<InsertOutcome, StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        if !state.identities.insert(record.identity) {
            return Ok(InsertOutcome::DuplicateIgnored);
        }
        let row_id = i64::try_from(state.rows.len()).unwrap_or(i64::MAX) + 1;
        state.rows.push((row_id, Value::Object(record.document.clone())));
        Ok(InsertOutcome::Inserted)
    }

    async fn exists(&self, identity: &MatchIdentity) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state.identities.contains(identity))
    }

    async fn tracked_entities(&self) -> Result<Vec<TrackedEntity>, StoreError> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state.entities.values().cloned().collect())
    }

    async fn advance_watermark(&self, entity_id: i64, match_key: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        let entity = state
            .entities
            .get_mut(&entity_id)
            .ok_or(StoreError::UnknownEntity(entity_id))?;
        entity.last_seen_match_identity = Some(match_key.to_string());
        Ok(())
    }

    async fn corpus_page(&self, after: i64, limit: usize) -> Result<Vec<(i64, Value)>, StoreError> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state
            .rows
            .iter()
            .filter(|(id, _)| *id > after)
            .take(limit)
            .cloned()
            .collect())
    }
}
