//! Rate limiting and retry services shared by every feed

pub mod backoff;
pub mod rate_limiter;

pub use backoff::BackoffSequencer;
pub use rate_limiter::{
    QuotaTable, RateGovernor, RateLimitObservation, RateLimitSnapshotRow, TimeWindowBucket,
    APP_SCOPE,
};
