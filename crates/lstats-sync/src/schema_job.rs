use std::path::Path;

use anyhow::{Context, Result};
use lstats_adapters::{ExpectedSchema, SchemaDeriver};
use lstats_storage::MatchStore;
use tracing::info;

/// Scans the stored corpus page by page and freezes the observed field types
/// into `path`. The store is only read.
pub async fn derive_schema(store: &dyn MatchStore, page_size: usize, path: &Path) -> Result<ExpectedSchema> {
    let mut deriver = SchemaDeriver::new();
    let mut after = 0i64;
    loop {
        let page = store
            .corpus_page(after, page_size.max(1))
            .await
            .context("reading stored matches")?;
        let Some((last_id, _)) = page.last() else {
            break;
        };
        after = *last_id;
        for (_, document) in &page {
            deriver.observe(document);
        }
        info!(scanned = deriver.records() + deriver.skipped(), "schema derivation progress");
    }

    let skipped = deriver.skipped();
    let schema = deriver.finish();
    schema.save(path)?;
    info!(
        records = schema.derived_from_records(),
        skipped,
        fingerprint = %schema.fingerprint(),
        path = %path.display(),
        "expected schema written"
    );
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::api_match;
    use lstats_adapters::Canonicalizer;
    use lstats_core::RecordKind;
    use lstats_storage::MemoryMatchStore;

    #[tokio::test]
    async fn derives_and_saves_a_loadable_schema() {
        let store = MemoryMatchStore::new();
        let canonicalizer = Canonicalizer::default();
        for n in 1..=5 {
            let record = canonicalizer.canonicalize(&api_match(n)).unwrap();
            store.insert(&record).await.unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema").join("expected_schema.json");
        let schema = derive_schema(&store, 2, &path).await.unwrap();

        assert_eq!(schema.derived_from_records(), 5);
        assert!(schema.fields(RecordKind::Match).contains_key("queue"));
        assert!(schema.fields(RecordKind::Stats).contains_key("kills"));
        let loaded = ExpectedSchema::load(&path).unwrap();
        assert_eq!(loaded.fingerprint(), schema.fingerprint());
    }

    #[tokio::test]
    async fn empty_corpus_yields_an_empty_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("expected_schema.json");
        let schema = derive_schema(&MemoryMatchStore::new(), 10, &path).await.unwrap();
        assert!(schema.is_empty());
    }
}
