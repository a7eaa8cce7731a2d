//! One ingestion sweep: every tracked entity, watermark to watermark.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lstats_adapters::{Canonicalizer, MatchFeed, NormalizeError};
use lstats_core::TrackedEntity;
use lstats_storage::{InsertOutcome, MatchStore};
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cursor::HistoryCursor;

#[derive(Debug, Clone, Default, Serialize)]
pub struct EntityOutcome {
    pub entity_id: i64,
    pub account_id: String,
    pub observed: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub garbage: usize,
    pub drifted: usize,
    pub not_found: usize,
    /// Set when the entity's walk was abandoned; its watermark did not move.
    pub error: Option<String>,
    pub new_watermark: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entities: Vec<EntityOutcome>,
}

impl SweepReport {
    pub fn stored(&self) -> usize {
        self.entities.iter().map(|e| e.stored).sum()
    }

    pub fn duplicates(&self) -> usize {
        self.entities.iter().map(|e| e.duplicates).sum()
    }

    pub fn rejected(&self) -> usize {
        self.entities.iter().map(|e| e.garbage + e.drifted).sum()
    }

    pub fn failed_entities(&self) -> usize {
        self.entities.iter().filter(|e| e.error.is_some()).count()
    }
}

pub struct IngestPipeline {
    store: Arc<dyn MatchStore>,
    feed: Arc<dyn MatchFeed>,
    canonicalizer: Arc<Canonicalizer>,
    page_size: usize,
    history_max: usize,
}

impl IngestPipeline {
    pub fn new(store: Arc<dyn MatchStore>, feed: Arc<dyn MatchFeed>, canonicalizer: Arc<Canonicalizer>) -> Self {
        Self {
            store,
            feed,
            canonicalizer,
            page_size: 20,
            history_max: 100,
        }
    }

    pub fn with_history_limits(mut self, page_size: usize, history_max: usize) -> Self {
        self.page_size = page_size.max(1);
        self.history_max = history_max;
        self
    }

    pub fn store(&self) -> &Arc<dyn MatchStore> {
        &self.store
    }

    /// Fails only when the entity list itself cannot be read. Per-entity
    /// failures are recorded on the report and the sweep moves on.
    pub async fn run_sweep(&self) -> Result<SweepReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let entities = self
            .store
            .tracked_entities()
            .await
            .context("listing tracked entities")?;
        info!(%run_id, feed = self.feed.feed_id(), entities = entities.len(), "sweep started");

        let mut outcomes = Vec::with_capacity(entities.len());
        for entity in &entities {
            let span = info_span!("entity", entity_id = entity.id, name = %entity.display_name());
            outcomes.push(self.process_entity(entity).instrument(span).await);
        }

        let report = SweepReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            entities: outcomes,
        };
        info!(
            %run_id,
            stored = report.stored(),
            duplicates = report.duplicates(),
            rejected = report.rejected(),
            failed_entities = report.failed_entities(),
            "sweep finished"
        );
        Ok(report)
    }

    pub async fn process_entity(&self, entity: &TrackedEntity) -> EntityOutcome {
        let mut outcome = EntityOutcome {
            entity_id: entity.id,
            account_id: entity.account_id.clone(),
            ..Default::default()
        };
        if let Err(err) = self.walk_entity(entity, &mut outcome).await {
            warn!(error = %format!("{err:#}"), "entity skipped for this sweep");
            outcome.error = Some(format!("{err:#}"));
            outcome.new_watermark = None;
        }
        outcome
    }

    async fn walk_entity(&self, entity: &TrackedEntity, outcome: &mut EntityOutcome) -> Result<()> {
        let mut cursor = HistoryCursor::new(self.feed.as_ref(), entity, self.page_size, self.history_max);
        while let Some(match_ref) = cursor.next().await.context("reading match history")? {
            let raw = match self.feed.load_match(&match_ref).await {
                Ok(raw) => raw,
                Err(err) if err.is_not_found() => {
                    warn!(match_key = %match_ref.key, "match missing upstream; skipped");
                    outcome.not_found += 1;
                    continue;
                }
                Err(err) => return Err(err).with_context(|| format!("loading {}", match_ref.key)),
            };

            let record = match self.canonicalizer.canonicalize(&raw) {
                Ok(record) => record,
                Err(NormalizeError::Garbage(err)) => {
                    warn!(match_key = %match_ref.key, error = %err, "garbage record rejected");
                    outcome.garbage += 1;
                    continue;
                }
                Err(NormalizeError::Drift(err)) => {
                    warn!(match_key = %match_ref.key, error = %err, "schema drift; record rejected");
                    outcome.drifted += 1;
                    continue;
                }
            };

            match self
                .store
                .insert(&record)
                .await
                .with_context(|| format!("storing {}", match_ref.key))?
            {
                InsertOutcome::Inserted => {
                    debug!(match_key = %match_ref.key, "stored");
                    outcome.stored += 1;
                }
                InsertOutcome::DuplicateIgnored => outcome.duplicates += 1,
            }
        }
        outcome.observed = cursor.observed();

        if let Some(candidate) = cursor.candidate_watermark() {
            self.store
                .advance_watermark(entity.id, &candidate.key)
                .await
                .context("advancing watermark")?;
            outcome.new_watermark = Some(candidate.key.clone());
            info!(
                watermark = %candidate.key,
                stored = outcome.stored,
                observed = outcome.observed,
                "entity caught up"
            );
        }
        Ok(())
    }
}
