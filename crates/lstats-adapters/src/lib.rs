//! Feed collaborators and the record contract: normalization of every
//! historical provider shape into canonical matches, and schema
//! reconciliation against the frozen expected schema.

mod canonicalize;
pub mod encode;
mod feed;
mod normalize;
pub mod reconcile;
pub mod rules;

pub use canonicalize::{Canonicalizer, NormalizeError};
pub use feed::{
    load_feed_fixture, FeedError, FeedFixture, FixtureMatchFeed, MatchFeed, MatchRef, RiotMatchFeed,
    MAX_HISTORY_PAGE,
};
pub use normalize::{GarbageInputError, Normalizer};
pub use reconcile::{
    AllowLists, ExpectedSchema, FieldSpec, KindAllowList, ReconcileError, Reconciler, SchemaDeriver,
    SchemaViolation,
};
pub use rules::{ChampionCatalog, Vintage};

pub const CRATE_NAME: &str = "lstats-adapters";
