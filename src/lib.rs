//! TFT Harvester Library
//!
//! A resumable extractor for Teamfight Tactics match data from the Riot
//! Games API. Two pieces carry the weight:
//!
//! 1. **Adaptive rate governing**: Riot reports its sliding-window quotas
//!    in response headers on every call. The governor tracks every
//!    reported window per routing value and scope and computes how long to
//!    sleep before the next request.
//!
//! 2. **Resumable extraction**: page offsets, time watermarks and a
//!    processed-match dedup set are checkpointed to SQLite on every
//!    record, so an interrupted run picks up exactly where it stopped.

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod pagination;
pub mod services;
pub mod state;
pub mod streams;
pub mod types;

pub use client::RiotClient;
pub use config::{Config, RiotApi};
pub use db::Database;
pub use error::ApiError;
pub use pagination::{ExtractionWindow, PageParams, PaginationCursor};
pub use services::{BackoffSequencer, RateGovernor};
pub use state::{CursorState, ExtractionState, PartitionProgress, StateError};
pub use streams::{Harvester, JsonlSink, RecordSink};
pub use types::{FollowedPlayer, HarvestRecord, LeagueEntry, LeaguePartition, PlayerPartition};
