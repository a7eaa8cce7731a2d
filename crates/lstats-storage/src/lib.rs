//! HTTP fetch utilities and the idempotent match store.

mod http;
mod store;

pub use http::{
    classify_reqwest_error, classify_status, retry_after, BackoffPolicy, FetchError, FetchedResponse, HttpClientConfig,
    HttpFetcher, RetryDisposition, SimpleTokenBucket, TokenBucketConfig,
};
pub use store::{InsertOutcome, MatchStore, MemoryMatchStore, PgMatchStore, StoreError};

pub const CRATE_NAME: &str = "lstats-storage";
