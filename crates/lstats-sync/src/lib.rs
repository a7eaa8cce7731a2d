//! Ingestion engine: sweeps, the scheduler that drives them, operator
//! alerts, legacy import and schema derivation.

mod config;
mod cursor;
mod legacy;
mod notify;
mod pipeline;
mod scheduler;
mod schema_job;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::{Context, Result};
use lstats_adapters::{
    AllowLists, Canonicalizer, ChampionCatalog, ExpectedSchema, FixtureMatchFeed, MatchFeed, Normalizer, Reconciler,
    RiotMatchFeed,
};
use lstats_storage::{HttpClientConfig, HttpFetcher, MatchStore};
use tracing::{info, warn};

pub use config::{FeedKind, IngestConfig};
pub use cursor::HistoryCursor;
pub use legacy::{LegacyImportReport, LegacyImporter};
pub use notify::{FailureNotifier, LogNotifier, NotifiarrNotifier, Notification, Severity, NOTIFIARR_EVENT};
pub use pipeline::{EntityOutcome, IngestPipeline, SweepReport};
pub use scheduler::{IngestScheduler, SchedulerState, SweepGate, SweepPermit, TriggerOutcome};
pub use schema_job::derive_schema;

pub const CRATE_NAME: &str = "lstats-sync";

/// Normalizer plus reconciler from the workspace rules, the champion catalog
/// and the frozen schema. A missing schema file leaves reconciliation
/// permissive until `derive-schema` has run.
pub fn build_canonicalizer(config: &IngestConfig) -> Result<Canonicalizer> {
    let allowlists = AllowLists::from_workspace_root(&config.workspace_root)?;

    let champions = match &config.champions_path {
        Some(path) => ChampionCatalog::load(config.resolve(path))?,
        None => ChampionCatalog::default(),
    };

    let schema_path = config.resolve(&config.schema_path);
    let schema = if schema_path.exists() {
        Some(ExpectedSchema::load(&schema_path)?)
    } else {
        None
    };
    let reconciler = Reconciler::new(schema, allowlists);
    if reconciler.is_enforcing() {
        info!(path = %schema_path.display(), "expected schema loaded");
    } else {
        warn!(
            path = %schema_path.display(),
            "no expected schema; records are not reconciled until derive-schema runs"
        );
    }

    Ok(Canonicalizer::new(Normalizer::new(champions), reconciler))
}

pub fn build_feed(config: &IngestConfig) -> Result<Arc<dyn MatchFeed>> {
    match config.feed {
        FeedKind::Fixtures => {
            let feed = FixtureMatchFeed::from_path(config.resolve(&config.feed_fixture_path))?;
            Ok(Arc::new(feed))
        }
        FeedKind::Riot => {
            if config.riot_api_key.is_none() {
                warn!("RIOT_API_KEY is not set; match API requests will be rejected");
            }
            let http = HttpFetcher::new(config.http_client_config()).context("building match API client")?;
            Ok(Arc::new(RiotMatchFeed::new(Arc::new(http))))
        }
    }
}

/// Notifiarr when both key and channel are configured, logs otherwise. The
/// alert client never carries the match API key.
pub fn build_notifier(config: &IngestConfig, dry_run: bool) -> Result<Arc<dyn FailureNotifier>> {
    match (&config.notifiarr_api_key, config.notifiarr_channel_id) {
        (Some(key), Some(channel)) => {
            let http = HttpFetcher::new(HttpClientConfig {
                timeout: std::time::Duration::from_secs(config.http_timeout_secs),
                user_agent: Some(config.user_agent.clone()),
                ..Default::default()
            })
            .context("building alert client")?;
            Ok(Arc::new(NotifiarrNotifier::new(Arc::new(http), key.clone(), channel).dry_run(dry_run)))
        }
        _ => Ok(Arc::new(LogNotifier)),
    }
}

pub fn build_pipeline(config: &IngestConfig, store: Arc<dyn MatchStore>) -> Result<IngestPipeline> {
    let canonicalizer = build_canonicalizer(config)?;
    let feed = build_feed(config)?;
    Ok(IngestPipeline::new(store, feed, Arc::new(canonicalizer))
        .with_history_limits(config.history_page_size, config.history_max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lstats_storage::MemoryMatchStore;
    use std::path::{Path, PathBuf};

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap()
    }

    fn fixture_config(schema_dir: &Path) -> IngestConfig {
        let root = workspace_root();
        IngestConfig::from_lookup(|key| match key {
            "LSTATS_WORKSPACE_ROOT" => Some(root.display().to_string()),
            "LSTATS_FEED" => Some("fixtures".to_string()),
            "LSTATS_SCHEMA_PATH" => Some(schema_dir.join("expected_schema.json").display().to_string()),
            _ => None,
        })
    }

    #[test]
    fn missing_schema_leaves_reconciliation_permissive() {
        let dir = tempfile::tempdir().unwrap();
        let canonicalizer = build_canonicalizer(&fixture_config(dir.path())).unwrap();
        assert!(!canonicalizer.reconciler().is_enforcing());
    }

    #[tokio::test]
    async fn fixture_bundle_sweeps_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture_config(dir.path());
        let entities: Vec<lstats_core::TrackedEntity> = serde_json::from_str(
            &std::fs::read_to_string(workspace_root().join("fixtures/tracked_entities.json")).unwrap(),
        )
        .unwrap();
        let store = Arc::new(MemoryMatchStore::with_entities(entities));

        let pipeline = build_pipeline(&config, store.clone()).unwrap();
        let report = pipeline.run_sweep().await.unwrap();
        assert!(report.stored() > 0);
        assert_eq!(report.failed_entities(), 0);

        let schema = derive_schema(store.as_ref(), 50, &config.resolve(&config.schema_path))
            .await
            .unwrap();
        assert_eq!(schema.derived_from_records(), store.len().await);

        let enforcing = build_canonicalizer(&config).unwrap();
        assert!(enforcing.reconciler().is_enforcing());
    }

    #[test]
    fn notifier_falls_back_to_logs_without_credentials() {
        let dir = tempfile::tempdir().unwrap();
        assert!(build_notifier(&fixture_config(dir.path()), false).is_ok());
    }
}
