//! Offset pagination with resume-from-partial-page, plus the incremental
//! time window each match-history request carries.
//!
//! The match id list endpoint has no next-page token: a page holding
//! exactly the requested count means more pages may follow, and a short
//! page (including an empty one) always ends pagination.

use crate::state::CursorState;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Query parameters of one match-history page request. Persisted so a
/// restart can rebuild the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageParams {
    pub count: u64,
    pub start: u64,
    /// Window start, epoch seconds (inclusive)
    pub start_time: i64,
    /// Window end, epoch seconds (exclusive)
    pub end_time: i64,
}

/// Offset cursor over one partition's match id list
#[derive(Debug, Clone)]
pub struct PaginationCursor {
    offset: u64,
    page_size: u64,
    finished: bool,
}

impl PaginationCursor {
    pub fn new(start: u64, page_size: u64) -> Self {
        Self {
            offset: start,
            page_size,
            finished: false,
        }
    }

    /// Rebuild the cursor from persisted progress. A recorded partial page
    /// (session count not a multiple of the recorded page size) resumes
    /// just past the drained records; a clean page boundary resumes at the
    /// last recorded start; no recorded page starts from zero.
    pub fn from_progress(cursor: &CursorState, page_size: u64) -> Self {
        let offset = match &cursor.last_page_params {
            Some(params) if params.count > 0 => {
                params.start + cursor.session_record_count % params.count
            }
            Some(params) => params.start,
            None => 0,
        };
        Self::new(offset, page_size)
    }

    pub fn current_offset(&self) -> u64 {
        self.offset
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    /// More pages exist only when the page came back completely full
    pub fn has_more(&self, records_in_page: usize) -> bool {
        records_in_page as u64 == self.page_size
    }

    /// Note a page of `records_in_page` records: either advance to the
    /// next offset or finish.
    pub fn observe_page(&mut self, records_in_page: usize) {
        if self.has_more(records_in_page) {
            self.advance();
        } else {
            self.finished = true;
        }
    }

    /// Step the offset one full page forward
    pub fn advance(&mut self) {
        self.offset += self.page_size;
    }
}

/// The `[start, end)` instant window every page request carries. `end` is
/// fixed to the run's configured end instant; `start` advances from the
/// persisted watermark across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ExtractionWindow {
    /// Pick the window start for a partition. A watermark more than
    /// `staleness` behind the run's configured start is discarded and
    /// extraction restarts from the configured start: a deliberate
    /// bounded-loss policy, not an error.
    pub fn resolve(
        configured_start: DateTime<Utc>,
        run_end: DateTime<Utc>,
        watermark: Option<DateTime<Utc>>,
        staleness: Duration,
    ) -> Self {
        let start = match watermark {
            Some(mark) if configured_start - mark > staleness => configured_start,
            Some(mark) => mark,
            None => configured_start,
        };
        Self {
            start,
            end: run_end,
        }
    }

    /// Materialize the query parameters for a page at `offset`
    pub fn page_params(&self, offset: u64, page_size: u64) -> PageParams {
        PageParams {
            count: page_size,
            start: offset,
            start_time: self.start.timestamp(),
            end_time: self.end.timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cursor_state(session_record_count: u64, last: Option<PageParams>) -> CursorState {
        CursorState {
            session_record_count,
            last_page_params: last,
        }
    }

    fn params(count: u64, start: u64) -> PageParams {
        PageParams {
            count,
            start,
            start_time: 0,
            end_time: 100,
        }
    }

    #[test]
    fn test_resume_from_partial_page() {
        // 13 records drained from a 20-record page starting at 0
        let state = cursor_state(13, Some(params(20, 0)));
        let cursor = PaginationCursor::from_progress(&state, 20);
        assert_eq!(cursor.current_offset(), 13);
    }

    #[test]
    fn test_resume_on_page_boundary() {
        let state = cursor_state(40, Some(params(20, 20)));
        let cursor = PaginationCursor::from_progress(&state, 20);
        assert_eq!(cursor.current_offset(), 20);
    }

    #[test]
    fn test_resume_without_state_starts_at_zero() {
        let state = cursor_state(0, None);
        let cursor = PaginationCursor::from_progress(&state, 20);
        assert_eq!(cursor.current_offset(), 0);
    }

    #[test]
    fn test_full_page_continues() {
        let mut cursor = PaginationCursor::new(0, 20);
        cursor.observe_page(20);
        assert!(!cursor.finished());
        assert_eq!(cursor.current_offset(), 20);
    }

    #[test]
    fn test_short_page_ends_pagination() {
        let mut cursor = PaginationCursor::new(0, 20);
        cursor.observe_page(7);
        assert!(cursor.finished());
    }

    #[test]
    fn test_empty_page_ends_pagination() {
        let mut cursor = PaginationCursor::new(40, 20);
        cursor.observe_page(0);
        assert!(cursor.finished());
        assert_eq!(cursor.current_offset(), 40);
    }

    #[test]
    fn test_stale_watermark_discarded() {
        let configured = Utc.with_ymd_and_hms(2025, 8, 20, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 8, 21, 0, 0, 0).unwrap();
        let stale_mark = configured - Duration::days(4);

        let window =
            ExtractionWindow::resolve(configured, end, Some(stale_mark), Duration::days(3));
        assert_eq!(window.start, configured);
        assert_eq!(window.end, end);
    }

    #[test]
    fn test_fresh_watermark_used() {
        let configured = Utc.with_ymd_and_hms(2025, 8, 20, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 8, 21, 0, 0, 0).unwrap();
        let mark = configured + Duration::hours(12);

        let window = ExtractionWindow::resolve(configured, end, Some(mark), Duration::days(3));
        assert_eq!(window.start, mark);
    }

    #[test]
    fn test_no_watermark_uses_configured_start() {
        let configured = Utc.with_ymd_and_hms(2025, 8, 20, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 8, 21, 0, 0, 0).unwrap();

        let window = ExtractionWindow::resolve(configured, end, None, Duration::days(3));
        assert_eq!(window.start, configured);
    }

    #[test]
    fn test_page_params_materialization() {
        let window = ExtractionWindow {
            start: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            end: Utc.timestamp_opt(1_700_086_400, 0).unwrap(),
        };
        let page = window.page_params(13, 20);
        assert_eq!(page.count, 20);
        assert_eq!(page.start, 13);
        assert_eq!(page.start_time, 1_700_000_000);
        assert_eq!(page.end_time, 1_700_086_400);
    }
}
