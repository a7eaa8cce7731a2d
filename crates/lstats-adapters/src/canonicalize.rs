use lstats_core::CanonicalMatch;
use serde_json::Value;
use thiserror::Error;

use crate::normalize::{GarbageInputError, Normalizer};
use crate::reconcile::{ReconcileError, Reconciler};

/// Why a raw record was not turned into a storable canonical match. Both
/// variants are resolved locally: the record is skipped, never retried.
#[derive(Debug, Clone, Error)]
pub enum NormalizeError {
    #[error(transparent)]
    Garbage(#[from] GarbageInputError),
    #[error(transparent)]
    Drift(#[from] ReconcileError),
}

/// Normalizer followed by the reconciler: the contract every ingestion path
/// (sweeps and legacy import) applies before touching the store.
#[derive(Debug, Clone, Default)]
pub struct Canonicalizer {
    normalizer: Normalizer,
    reconciler: Reconciler,
}

impl Canonicalizer {
    pub fn new(normalizer: Normalizer, reconciler: Reconciler) -> Self {
        Self { normalizer, reconciler }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn canonicalize(&self, raw: &Value) -> Result<CanonicalMatch, NormalizeError> {
        let record = self.normalizer.normalize(raw)?;
        self.reconciler.reconcile(&record)?;
        Ok(record)
    }
}
