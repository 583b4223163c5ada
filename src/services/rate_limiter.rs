//! Adaptive rate-limit governor driven by server-reported quota headers
//!
//! Riot reports `X-App-Rate-Limit`/`X-App-Rate-Limit-Count` (shared across
//! every endpoint for one routing value) and `X-Method-Rate-Limit`/`-Count`
//! (scoped to one endpoint) on every response, as comma-separated
//! `value:window_seconds` pairs. Buckets are created lazily from those
//! headers, and the server-reported count is authoritative over local
//! tracking. A request must simultaneously satisfy its app-wide scope and
//! its endpoint scope.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Scope key for the app-wide quota shared by all endpoints
pub const APP_SCOPE: &str = "app";

/// A cap/count header pair failed to parse; the bucket update for that
/// response is skipped and prior state retained.
#[derive(Debug, Clone, Error)]
#[error("malformed quota header: {0}")]
pub struct QuotaHeaderError(pub String);

/// Parse a comma-separated list of `value:window_seconds` pairs
fn parse_quota_pairs(raw: &str) -> Result<Vec<(i64, i64)>, QuotaHeaderError> {
    let mut pairs = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (value, window) = item
            .split_once(':')
            .ok_or_else(|| QuotaHeaderError(raw.to_string()))?;
        let value: i64 = value
            .trim()
            .parse()
            .map_err(|_| QuotaHeaderError(raw.to_string()))?;
        let window: i64 = window
            .trim()
            .parse()
            .map_err(|_| QuotaHeaderError(raw.to_string()))?;
        if window <= 0 || value < 0 {
            return Err(QuotaHeaderError(raw.to_string()));
        }
        pairs.push((value, window));
    }
    if pairs.is_empty() {
        return Err(QuotaHeaderError(raw.to_string()));
    }
    Ok(pairs)
}

/// One sliding-window request counter with a capacity
#[derive(Debug)]
pub struct TimeWindowBucket {
    window_seconds: i64,
    capacity: i64,
    reported_count: i64,
    timestamps: VecDeque<DateTime<Utc>>,
}

impl TimeWindowBucket {
    pub fn new(window_seconds: i64, capacity: i64) -> Self {
        Self {
            window_seconds,
            capacity,
            reported_count: 0,
            timestamps: VecDeque::with_capacity(capacity.max(0) as usize),
        }
    }

    pub fn window_seconds(&self) -> i64 {
        self.window_seconds
    }

    pub fn capacity(&self) -> i64 {
        self.capacity
    }

    pub fn reported_count(&self) -> i64 {
        self.reported_count
    }

    /// Record one issued request. The timestamp log is bounded to the
    /// bucket capacity; the oldest entry is evicted when full.
    pub fn log_request(&mut self, at: DateTime<Utc>) {
        if self.timestamps.len() as i64 >= self.capacity {
            self.timestamps.pop_front();
        }
        self.timestamps.push_back(at);
        self.reported_count += 1;
    }

    /// Server counts are authoritative and override local tracking
    pub fn set_reported_count(&mut self, count: i64) {
        self.reported_count = count;
    }

    /// Widen the capacity if the server now reports a larger one. Never
    /// shrinks an existing bucket.
    pub fn widen(&mut self, capacity: i64) {
        if capacity > self.capacity {
            self.capacity = capacity;
        }
    }

    /// Evict timestamps that have left the window, decrementing the count
    /// correspondingly. Idempotent.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - ChronoDuration::seconds(self.window_seconds);
        while matches!(self.timestamps.front(), Some(ts) if *ts < cutoff) {
            self.timestamps.pop_front();
            self.reported_count -= 1;
        }
        if self.reported_count < 0 {
            self.reported_count = 0;
        }
    }

    pub fn remaining(&self) -> i64 {
        self.capacity - self.reported_count
    }

    /// Time until the next request fits in this bucket. Zero when quota
    /// remains or when nothing has been logged yet.
    pub fn wait(&self, now: DateTime<Utc>) -> Duration {
        if self.remaining() > 0 {
            return Duration::ZERO;
        }
        let Some(oldest) = self.timestamps.front() else {
            return Duration::ZERO;
        };
        let ready_at = *oldest + ChronoDuration::seconds(self.window_seconds);
        if ready_at <= now {
            return Duration::ZERO;
        }
        (ready_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Persisted form of one bucket, keyed by routing value, scope and window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshotRow {
    pub routing_value: String,
    pub scope: String,
    pub window_seconds: i64,
    pub capacity: i64,
    pub reported_count: i64,
    pub observed_at: DateTime<Utc>,
}

/// Per-scope bucket collection for one routing value
#[derive(Debug, Default)]
pub struct QuotaTable {
    scopes: HashMap<String, HashMap<i64, TimeWindowBucket>>,
    last_observed: Option<DateTime<Utc>>,
}

impl QuotaTable {
    /// Apply one response's cap/count header pair for a scope. Both header
    /// values are parsed in full before any bucket is touched, so a
    /// malformed header skips the whole update.
    pub fn log_response(
        &mut self,
        scope: &str,
        cap_header: &str,
        count_header: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<(), QuotaHeaderError> {
        let caps = parse_quota_pairs(cap_header)?;
        let counts = parse_quota_pairs(count_header)?;

        let buckets = self.scopes.entry(scope.to_string()).or_default();
        for (capacity, window) in caps {
            buckets
                .entry(window)
                .and_modify(|b| b.widen(capacity))
                .or_insert_with(|| TimeWindowBucket::new(window, capacity));
        }

        for (count, window) in counts {
            let Some(bucket) = buckets.get_mut(&window) else {
                debug!(
                    "Count reported for unknown {}s window in scope {}",
                    window, scope
                );
                continue;
            };
            bucket.log_request(observed_at);
            bucket.set_reported_count(count);
            bucket.prune(observed_at);
        }

        self.last_observed = Some(observed_at);
        Ok(())
    }

    /// Longest wait demanded by any bucket in the endpoint scope or the
    /// app scope. Zero when no buckets are registered yet.
    pub fn request_wait(&mut self, endpoint: &str, now: DateTime<Utc>) -> Duration {
        let mut wait = Duration::ZERO;
        for scope in [endpoint, APP_SCOPE] {
            if let Some(buckets) = self.scopes.get_mut(scope) {
                for bucket in buckets.values_mut() {
                    bucket.prune(now);
                    wait = wait.max(bucket.wait(now));
                }
            }
        }
        wait
    }

    fn snapshot(&self, routing_value: &str) -> Vec<RateLimitSnapshotRow> {
        let observed_at = self.last_observed.unwrap_or_else(Utc::now);
        let mut rows = Vec::new();
        for (scope, buckets) in &self.scopes {
            for bucket in buckets.values() {
                rows.push(RateLimitSnapshotRow {
                    routing_value: routing_value.to_string(),
                    scope: scope.clone(),
                    window_seconds: bucket.window_seconds(),
                    capacity: bucket.capacity(),
                    reported_count: bucket.reported_count(),
                    observed_at,
                });
            }
        }
        rows
    }

    fn restore_row(&mut self, row: &RateLimitSnapshotRow) {
        let buckets = self.scopes.entry(row.scope.clone()).or_default();
        let bucket = buckets
            .entry(row.window_seconds)
            .or_insert_with(|| TimeWindowBucket::new(row.window_seconds, row.capacity));
        bucket.widen(row.capacity);
        // One synthetic entry stands in for the lost timestamp log; the
        // server-reported count is authoritative anyway.
        bucket.log_request(row.observed_at);
        bucket.set_reported_count(row.reported_count);
        self.last_observed = Some(row.observed_at);
    }
}

/// Quota observation lifted from one response's headers
#[derive(Debug, Clone)]
pub struct RateLimitObservation {
    /// Response-observed-at instant from the Date header, authoritative
    /// over the local clock
    pub observed_at: DateTime<Utc>,
    pub app_cap: String,
    pub app_count: String,
    pub method_cap: Option<String>,
    pub method_count: Option<String>,
}

impl RateLimitObservation {
    /// Lift the quota headers out of a response. Returns None when the
    /// app-scope pair is absent (error responses from intermediaries).
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let observed_at = header("date")
            .and_then(|raw| DateTime::parse_from_rfc2822(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let app_cap = header("x-app-rate-limit")?;
        let app_count = header("x-app-rate-limit-count")?;

        Some(Self {
            observed_at,
            app_cap,
            app_count,
            method_cap: header("x-method-rate-limit"),
            method_count: header("x-method-rate-limit-count"),
        })
    }
}

/// Shared rate-limit governor. One instance per process; every feed using a
/// routing value shares that routing value's quota table, because the
/// upstream quota is shared, not per-feed. All reads and mutations are
/// serialized behind one lock so interleaved prune-and-log cannot corrupt
/// counts.
pub struct RateGovernor {
    tables: Mutex<HashMap<String, QuotaTable>>,
}

impl RateGovernor {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// Ingest one response's quota headers: the app-scope pair always, the
    /// endpoint-scope pair when present. Malformed headers are logged and
    /// skipped; prior bucket state is retained.
    pub async fn record_response(
        &self,
        routing_value: &str,
        observation: &RateLimitObservation,
        endpoint: Option<&str>,
    ) {
        let mut tables = self.tables.lock().await;
        let table = tables.entry(routing_value.to_string()).or_default();

        if let Err(err) = table.log_response(
            APP_SCOPE,
            &observation.app_cap,
            &observation.app_count,
            observation.observed_at,
        ) {
            warn!("Skipping app quota update for {}: {}", routing_value, err);
        }

        if let (Some(endpoint), Some(cap), Some(count)) = (
            endpoint,
            observation.method_cap.as_deref(),
            observation.method_count.as_deref(),
        ) {
            if let Err(err) = table.log_response(endpoint, cap, count, observation.observed_at) {
                warn!("Skipping method quota update for {}: {}", endpoint, err);
            }
        }
    }

    /// How long the caller must fully sleep before issuing the next request
    /// against this routing value and endpoint. Never fails; zero when the
    /// quotas are still unknown.
    pub async fn wait_before(&self, routing_value: &str, endpoint: &str) -> Duration {
        self.wait_before_at(routing_value, endpoint, Utc::now())
            .await
    }

    /// As wait_before, with an explicit clock
    pub async fn wait_before_at(
        &self,
        routing_value: &str,
        endpoint: &str,
        now: DateTime<Utc>,
    ) -> Duration {
        let mut tables = self.tables.lock().await;
        match tables.get_mut(routing_value) {
            Some(table) => table.request_wait(endpoint, now),
            None => Duration::ZERO,
        }
    }

    /// Export every bucket for persistence
    pub async fn snapshot(&self) -> Vec<RateLimitSnapshotRow> {
        let tables = self.tables.lock().await;
        tables
            .iter()
            .flat_map(|(routing, table)| table.snapshot(routing))
            .collect()
    }

    /// Rebuild bucket state from a persisted snapshot
    pub async fn restore(&self, rows: &[RateLimitSnapshotRow]) {
        let mut tables = self.tables.lock().await;
        for row in rows {
            tables
                .entry(row.routing_value.clone())
                .or_default()
                .restore_row(row);
        }
    }
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new()
    }
}
