//! Resumable extraction state: per-partition progress, cursor state for
//! partially drained pages, and the global dedup set of match ids already
//! expanded into detail fetches.
//!
//! This is the in-memory view; the database checkpoints it on every
//! processed record so an interruption loses at most the unflushed delta.

use crate::pagination::{ExtractionWindow, PageParams};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Progress state is internally inconsistent. Silent continuation risks
/// re-processing or permanent loss of progress, so this always propagates.
#[derive(Debug, Clone, Error)]
pub enum StateError {
    #[error("no cursor state recorded for partition {0}")]
    UnknownPartition(String),
}

/// Long-lived progress for one partition; survives across runs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionProgress {
    /// Latest fully-processed instant along the extraction window
    pub last_watermark: Option<DateTime<Utc>>,
    /// Monotone games-played counter last observed for this player
    pub matches_played: Option<u64>,
}

/// Transient cursor state for one partition; discarded once the partition
/// is fully drained
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CursorState {
    /// Records processed in the current extraction session
    pub session_record_count: u64,
    /// Parameters of the most recent page request
    pub last_page_params: Option<PageParams>,
}

/// The full resumable state document
#[derive(Debug, Default)]
pub struct ExtractionState {
    partitions: HashMap<String, PartitionProgress>,
    cursors: HashMap<String, CursorState>,
    processed_ids: HashSet<String>,
}

impl ExtractionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted rows
    pub fn from_parts(
        partitions: HashMap<String, PartitionProgress>,
        cursors: HashMap<String, CursorState>,
        processed_ids: HashSet<String>,
    ) -> Self {
        Self {
            partitions,
            cursors,
            processed_ids,
        }
    }

    pub fn progress(&self, partition: &str) -> Option<&PartitionProgress> {
        self.partitions.get(partition)
    }

    pub fn processed_count(&self) -> usize {
        self.processed_ids.len()
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Register a partition for this session, creating empty cursor state
    /// unless a prior run left some to resume from. Returns the cursor
    /// state the pagination should resume with.
    pub fn begin_partition(&mut self, partition: &str) -> CursorState {
        self.cursors
            .entry(partition.to_string())
            .or_default()
            .clone()
    }

    /// Whether a list-page record should be expanded into a detail fetch.
    /// Already-processed ids and blank ids carry no new information.
    pub fn should_expand_match(&self, match_id: &str) -> bool {
        !match_id.is_empty() && !self.processed_ids.contains(match_id)
    }

    /// Whether a player's match history is worth fetching at all. An
    /// unchanged games-played counter means no new matches since the last
    /// observation: a conservative skip.
    pub fn should_fetch_history(&self, partition: &str, matches_played: Option<u64>) -> bool {
        let (Some(current), Some(progress)) = (matches_played, self.partitions.get(partition))
        else {
            return true;
        };
        progress.matches_played != Some(current)
    }

    /// Count one drained list-page record against the partition cursor
    pub fn record_page_record(&mut self, partition: &str, params: PageParams) -> CursorState {
        let cursor = self.cursors.entry(partition.to_string()).or_default();
        cursor.session_record_count += 1;
        cursor.last_page_params = Some(params);
        cursor.clone()
    }

    /// Drop a partition's transient cursor without finalizing, for the
    /// no-data skip path. Watermark and dedup membership are untouched.
    pub fn abandon_partition(&mut self, partition: &str) {
        self.cursors.remove(partition);
    }

    /// Mark a match id as expanded. Idempotent; the set only grows.
    pub fn mark_processed(&mut self, match_id: &str) -> bool {
        self.processed_ids.insert(match_id.to_string())
    }

    /// Finish a fully drained partition: advance the watermark to the
    /// window end (never regressing), remember the games-played counter,
    /// and discard the transient cursor. Finalizing a partition that was
    /// never begun is an inconsistency and fails loudly.
    pub fn finalize_partition(
        &mut self,
        partition: &str,
        window: &ExtractionWindow,
        matches_played: Option<u64>,
    ) -> Result<PartitionProgress, StateError> {
        if self.cursors.remove(partition).is_none() {
            return Err(StateError::UnknownPartition(partition.to_string()));
        }

        let progress = self.partitions.entry(partition.to_string()).or_default();
        progress.last_watermark = Some(match progress.last_watermark {
            Some(existing) => existing.max(window.end),
            None => window.end,
        });
        if matches_played.is_some() {
            progress.matches_played = matches_played;
        }
        Ok(progress.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window(start: i64, end: i64) -> ExtractionWindow {
        ExtractionWindow {
            start: Utc.timestamp_opt(start, 0).unwrap(),
            end: Utc.timestamp_opt(end, 0).unwrap(),
        }
    }

    fn page(count: u64, start: u64) -> PageParams {
        PageParams {
            count,
            start,
            start_time: 0,
            end_time: 1000,
        }
    }

    #[test]
    fn test_dedup_suppresses_expansion() {
        let mut state = ExtractionState::new();
        assert!(state.should_expand_match("NA1_100"));

        assert!(state.mark_processed("NA1_100"));
        assert!(!state.should_expand_match("NA1_100"));

        // idempotent insertion
        assert!(!state.mark_processed("NA1_100"));
        assert_eq!(state.processed_count(), 1);
    }

    #[test]
    fn test_blank_id_never_expands() {
        let state = ExtractionState::new();
        assert!(!state.should_expand_match(""));
    }

    #[test]
    fn test_unchanged_matches_played_skips_history() {
        let mut state = ExtractionState::new();
        // never-seen player always fetches
        assert!(state.should_fetch_history("puuid-1", Some(75)));

        state.begin_partition("puuid-1");
        state
            .finalize_partition("puuid-1", &window(0, 1000), Some(75))
            .unwrap();

        assert!(!state.should_fetch_history("puuid-1", Some(75)));
        assert!(state.should_fetch_history("puuid-1", Some(76)));
        // no counter on the record: conservative fetch
        assert!(state.should_fetch_history("puuid-1", None));
    }

    #[test]
    fn test_record_page_record_tracks_cursor() {
        let mut state = ExtractionState::new();
        state.begin_partition("p");
        state.record_page_record("p", page(20, 0));
        let cursor = state.record_page_record("p", page(20, 0));
        assert_eq!(cursor.session_record_count, 2);
        assert_eq!(cursor.last_page_params, Some(page(20, 0)));
    }

    #[test]
    fn test_finalize_discards_cursor_keeps_watermark_and_dedup() {
        let mut state = ExtractionState::new();
        state.begin_partition("p");
        state.record_page_record("p", page(20, 0));
        state.mark_processed("NA1_1");

        let progress = state
            .finalize_partition("p", &window(0, 1000), Some(10))
            .unwrap();
        assert_eq!(
            progress.last_watermark,
            Some(Utc.timestamp_opt(1000, 0).unwrap())
        );
        assert_eq!(progress.matches_played, Some(10));

        // cursor is gone, so the next session starts clean
        let resumed = state.begin_partition("p");
        assert_eq!(resumed.session_record_count, 0);
        assert!(resumed.last_page_params.is_none());

        // dedup membership survives
        assert!(!state.should_expand_match("NA1_1"));
    }

    #[test]
    fn test_unemitted_record_is_refetched_on_resume() {
        use crate::pagination::PaginationCursor;

        // A record counts against the cursor only after it has been
        // emitted and expanded. A kill between emission and checkpoint
        // must leave the resume offset pointing at that record, never
        // past it.
        let mut state = ExtractionState::new();
        let before_emit = state.begin_partition("p");
        let cursor = PaginationCursor::from_progress(&before_emit, 20);
        assert_eq!(cursor.current_offset(), 0);

        let checkpoint = state.record_page_record("p", page(20, 0));
        let resumed = PaginationCursor::from_progress(&checkpoint, 20);
        assert_eq!(resumed.current_offset(), 1);
    }

    #[test]
    fn test_abandon_partition_discards_cursor_only() {
        let mut state = ExtractionState::new();
        state.begin_partition("p");
        state.record_page_record("p", page(20, 0));
        state.mark_processed("NA1_1");

        state.abandon_partition("p");

        // next session starts clean; long-lived state is untouched
        assert_eq!(state.begin_partition("p").session_record_count, 0);
        assert!(!state.should_expand_match("NA1_1"));
    }

    #[test]
    fn test_finalize_unknown_partition_fails_loudly() {
        let mut state = ExtractionState::new();
        let err = state.finalize_partition("ghost", &window(0, 1000), None);
        assert!(matches!(err, Err(StateError::UnknownPartition(_))));
    }

    #[test]
    fn test_watermark_never_regresses() {
        let mut state = ExtractionState::new();
        state.begin_partition("p");
        state
            .finalize_partition("p", &window(0, 2000), None)
            .unwrap();

        state.begin_partition("p");
        let progress = state
            .finalize_partition("p", &window(0, 1500), None)
            .unwrap();
        assert_eq!(
            progress.last_watermark,
            Some(Utc.timestamp_opt(2000, 0).unwrap())
        );
    }
}
