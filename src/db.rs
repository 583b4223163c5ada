//! SQLite persistence for the resumable state document
//!
//! Holds everything a restart needs: the rate-limit snapshot, per-partition
//! progress (watermark + games-played counter), the dedup set of processed
//! match ids, and transient per-partition cursor state. Progress rows are
//! written on every processed record, not only at page boundaries.

use crate::pagination::PageParams;
use crate::services::rate_limiter::RateLimitSnapshotRow;
use crate::state::{CursorState, ExtractionState, PartitionProgress};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use tracing::info;

/// Counts shown by the stats command
#[derive(Debug, Clone)]
pub struct HarvestStats {
    pub partitions: i64,
    pub processed_matches: i64,
    pub open_cursors: i64,
    pub quota_buckets: i64,
}

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.initialize().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rate_limit_state (
                routing_value TEXT NOT NULL,
                scope TEXT NOT NULL,
                window_seconds INTEGER NOT NULL,
                capacity INTEGER NOT NULL,
                reported_count INTEGER NOT NULL,
                observed_at TEXT NOT NULL,
                PRIMARY KEY (routing_value, scope, window_seconds)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS partition_progress (
                partition_key TEXT PRIMARY KEY,
                last_watermark TEXT,
                matches_played INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_matches (
                match_id TEXT PRIMARY KEY,
                processed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cursor_state (
                partition_key TEXT PRIMARY KEY,
                session_record_count INTEGER NOT NULL,
                page_count INTEGER,
                page_start INTEGER,
                page_start_time INTEGER,
                page_end_time INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Replace the persisted rate-limit snapshot
    pub async fn save_rate_limit_snapshot(&self, rows: &[RateLimitSnapshotRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM rate_limit_state")
            .execute(&mut *tx)
            .await?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO rate_limit_state
                    (routing_value, scope, window_seconds, capacity, reported_count, observed_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.routing_value)
            .bind(&row.scope)
            .bind(row.window_seconds)
            .bind(row.capacity)
            .bind(row.reported_count)
            .bind(row.observed_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await.context("Failed to save rate snapshot")?;
        Ok(())
    }

    /// Load the persisted rate-limit snapshot
    pub async fn load_rate_limit_snapshot(&self) -> Result<Vec<RateLimitSnapshotRow>> {
        let rows: Vec<(String, String, i64, i64, i64, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT routing_value, scope, window_seconds, capacity, reported_count, observed_at
            FROM rate_limit_state
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(routing_value, scope, window_seconds, capacity, reported_count, observed_at)| {
                    RateLimitSnapshotRow {
                        routing_value,
                        scope,
                        window_seconds,
                        capacity,
                        reported_count,
                        observed_at,
                    }
                },
            )
            .collect())
    }

    /// Upsert one partition's long-lived progress
    pub async fn save_partition_progress(
        &self,
        partition: &str,
        progress: &PartitionProgress,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO partition_progress (partition_key, last_watermark, matches_played)
            VALUES (?, ?, ?)
            ON CONFLICT(partition_key) DO UPDATE SET
                last_watermark = excluded.last_watermark,
                matches_played = excluded.matches_played
            "#,
        )
        .bind(partition)
        .bind(progress.last_watermark)
        .bind(progress.matches_played.map(|m| m as i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Upsert one partition's transient cursor state. Called on every
    /// processed record so a mid-page kill can resume.
    pub async fn save_cursor(&self, partition: &str, cursor: &CursorState) -> Result<()> {
        let params = cursor.last_page_params;
        sqlx::query(
            r#"
            INSERT INTO cursor_state
                (partition_key, session_record_count, page_count, page_start, page_start_time, page_end_time)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(partition_key) DO UPDATE SET
                session_record_count = excluded.session_record_count,
                page_count = excluded.page_count,
                page_start = excluded.page_start,
                page_start_time = excluded.page_start_time,
                page_end_time = excluded.page_end_time
            "#,
        )
        .bind(partition)
        .bind(cursor.session_record_count as i64)
        .bind(params.map(|p| p.count as i64))
        .bind(params.map(|p| p.start as i64))
        .bind(params.map(|p| p.start_time))
        .bind(params.map(|p| p.end_time))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drop a partition's cursor once it is fully drained
    pub async fn clear_cursor(&self, partition: &str) -> Result<()> {
        sqlx::query("DELETE FROM cursor_state WHERE partition_key = ?")
            .bind(partition)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Add a match id to the dedup set. Idempotent.
    pub async fn insert_processed_match(&self, match_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO processed_matches (match_id, processed_at) VALUES (?, ?)",
        )
        .bind(match_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load the whole resumable state document into memory
    pub async fn load_extraction_state(&self) -> Result<ExtractionState> {
        let progress_rows: Vec<(String, Option<DateTime<Utc>>, Option<i64>)> =
            sqlx::query_as("SELECT partition_key, last_watermark, matches_played FROM partition_progress")
                .fetch_all(&self.pool)
                .await?;

        let mut partitions = HashMap::new();
        for (partition, last_watermark, matches_played) in progress_rows {
            partitions.insert(
                partition,
                PartitionProgress {
                    last_watermark,
                    matches_played: matches_played.map(|m| m as u64),
                },
            );
        }

        let cursor_rows: Vec<(String, i64, Option<i64>, Option<i64>, Option<i64>, Option<i64>)> =
            sqlx::query_as(
                r#"
                SELECT partition_key, session_record_count, page_count, page_start,
                       page_start_time, page_end_time
                FROM cursor_state
                "#,
            )
            .fetch_all(&self.pool)
            .await?;

        let mut cursors = HashMap::new();
        for (partition, session_record_count, count, start, start_time, end_time) in cursor_rows {
            let last_page_params = match (count, start, start_time, end_time) {
                (Some(count), Some(start), Some(start_time), Some(end_time)) => Some(PageParams {
                    count: count as u64,
                    start: start as u64,
                    start_time,
                    end_time,
                }),
                _ => None,
            };
            cursors.insert(
                partition,
                CursorState {
                    session_record_count: session_record_count as u64,
                    last_page_params,
                },
            );
        }

        let id_rows: Vec<(String,)> = sqlx::query_as("SELECT match_id FROM processed_matches")
            .fetch_all(&self.pool)
            .await?;
        let processed_ids: HashSet<String> = id_rows.into_iter().map(|(id,)| id).collect();

        info!(
            "Loaded state: {} partitions, {} cursors, {} processed matches",
            partitions.len(),
            cursors.len(),
            processed_ids.len()
        );

        Ok(ExtractionState::from_parts(partitions, cursors, processed_ids))
    }

    /// Aggregate counts for the stats command
    pub async fn stats(&self) -> Result<HarvestStats> {
        let (partitions,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM partition_progress")
            .fetch_one(&self.pool)
            .await?;
        let (processed_matches,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM processed_matches")
            .fetch_one(&self.pool)
            .await?;
        let (open_cursors,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cursor_state")
            .fetch_one(&self.pool)
            .await?;
        let (quota_buckets,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM rate_limit_state")
            .fetch_one(&self.pool)
            .await?;

        Ok(HarvestStats {
            partitions,
            processed_matches,
            open_cursors,
            quota_buckets,
        })
    }
}
