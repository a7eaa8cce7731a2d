//! One-shot import of a historical document-store export (one JSON document
//! per line) through the same canonicalization path as sweeps.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use lstats_adapters::{Canonicalizer, NormalizeError};
use lstats_core::MatchIdentity;
use lstats_storage::{InsertOutcome, MatchStore};
use serde::Serialize;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const PROGRESS_EVERY: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LegacyImportReport {
    pub processed: usize,
    pub stored: usize,
    /// Already present in the store.
    pub duplicates: usize,
    /// Seen earlier in the same export.
    pub repeated: usize,
    pub garbage: usize,
    pub drifted: usize,
    /// Lines that were not UTF-8 JSON at all.
    pub unreadable: usize,
}

pub struct LegacyImporter {
    store: Arc<dyn MatchStore>,
    canonicalizer: Arc<Canonicalizer>,
}

impl LegacyImporter {
    pub fn new(store: Arc<dyn MatchStore>, canonicalizer: Arc<Canonicalizer>) -> Self {
        Self { store, canonicalizer }
    }

    /// Store failures abort the import; everything else is counted and skipped.
    pub async fn import_file(&self, path: &Path) -> Result<LegacyImportReport> {
        let file = File::open(path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        let mut reader = BufReader::new(file);
        let mut report = LegacyImportReport::default();
        let mut seen: HashSet<MatchIdentity> = HashSet::new();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            if read == 0 {
                break;
            }
            if buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            report.processed += 1;
            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line,
                Err(err) => {
                    warn!(line = report.processed, error = %err, "export line is not UTF-8");
                    report.unreadable += 1;
                    continue;
                }
            };
            self.import_line(line, &mut seen, &mut report).await?;
            if report.processed % PROGRESS_EVERY == 0 {
                info!(
                    processed = report.processed,
                    stored = report.stored,
                    duplicates = report.duplicates + report.repeated,
                    "legacy import progress"
                );
            }
        }

        info!(?report, "legacy import finished");
        Ok(report)
    }

    async fn import_line(
        &self,
        line: &str,
        seen: &mut HashSet<MatchIdentity>,
        report: &mut LegacyImportReport,
    ) -> Result<()> {
        let raw: Value = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(line = report.processed, error = %err, "unreadable export line");
                report.unreadable += 1;
                return Ok(());
            }
        };

        let record = match self.canonicalizer.canonicalize(&raw) {
            Ok(record) => record,
            Err(NormalizeError::Garbage(err)) => {
                warn!(line = report.processed, error = %err, "garbage document skipped");
                report.garbage += 1;
                return Ok(());
            }
            Err(NormalizeError::Drift(err)) => {
                warn!(line = report.processed, error = %err, "document does not match the expected schema");
                report.drifted += 1;
                return Ok(());
            }
        };

        if !seen.insert(record.identity) {
            report.repeated += 1;
            return Ok(());
        }
        match self
            .store
            .insert(&record)
            .await
            .with_context(|| format!("storing {}", record.key()))?
        {
            InsertOutcome::Inserted => report.stored += 1,
            InsertOutcome::DuplicateIgnored => report.duplicates += 1,
        }
        Ok(())
    }
}
