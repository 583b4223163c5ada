//! Feed controllers: ranked ladders and followed players fan out into
//! per-player match-history partitions, which expand into match-detail
//! fetches gated by the dedup set.
//!
//! Every drained record checkpoints the partition cursor to the database,
//! so an interrupted run resumes mid-page instead of re-fetching or
//! skipping records.

use crate::client::RiotClient;
use crate::config::{Config, RiotApi};
use crate::db::Database;
use crate::error::ApiError;
use crate::pagination::{ExtractionWindow, PaginationCursor};
use crate::services::RateGovernor;
use crate::state::ExtractionState;
use crate::types::{FollowedPlayer, HarvestRecord, LeagueEntry, LeaguePartition, PlayerPartition};
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Destination for extracted records. Delivery downstream of this seam is
/// not the harvester's concern.
pub trait RecordSink {
    fn emit(&mut self, record: HarvestRecord) -> Result<()>;
}

/// Writes one JSON document per line to stdout
#[derive(Debug, Default)]
pub struct JsonlSink;

impl RecordSink for JsonlSink {
    fn emit(&mut self, record: HarvestRecord) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        serde_json::to_writer(&mut stdout, &record)?;
        writeln!(stdout)?;
        Ok(())
    }
}

/// Collects records in memory; used by tests
#[derive(Debug, Default)]
pub struct VecSink(pub Vec<HarvestRecord>);

impl RecordSink for VecSink {
    fn emit(&mut self, record: HarvestRecord) -> Result<()> {
        self.0.push(record);
        Ok(())
    }
}

/// Drives the whole extraction run
pub struct Harvester<S: RecordSink> {
    client: RiotClient,
    db: Database,
    state: ExtractionState,
    config: Config,
    sink: S,
}

impl<S: RecordSink> Harvester<S> {
    /// Build a harvester, restoring governor and extraction state from the
    /// database so the run resumes where the last one stopped.
    pub async fn new(config: Config, db: Database, sink: S) -> Result<Self> {
        let governor = Arc::new(RateGovernor::new());
        let snapshot = db.load_rate_limit_snapshot().await?;
        if !snapshot.is_empty() {
            governor.restore(&snapshot).await;
            info!("Restored {} rate-limit buckets", snapshot.len());
        }

        let state = db.load_extraction_state().await?;
        let client = RiotClient::new(&config, governor)?;

        Ok(Self {
            client,
            db,
            state,
            config,
            sink,
        })
    }

    /// Run every configured feed to completion
    pub async fn run(&mut self) -> Result<()> {
        let players = self.config.followed_players.clone();
        for followed in &players {
            if let Some(partition) = self.resolve_player(followed).await? {
                self.sync_player(&partition).await?;
            }
        }

        let leagues = self.config.followed_leagues.clone();
        for league in &leagues {
            self.sync_league(league).await?;
        }

        self.persist_rate_snapshot().await?;
        info!(
            "Run complete: {} partitions tracked, {} matches in dedup set",
            self.state.partition_count(),
            self.state.processed_count()
        );
        Ok(())
    }

    /// Resolve a configured Riot id to a puuid partition. A missing
    /// account is no data, not a failure.
    async fn resolve_player(&mut self, followed: &FollowedPlayer) -> Result<Option<PlayerPartition>> {
        let url =
            RiotApi::account_by_riot_id_url(&followed.region, &followed.game_name, &followed.tag_line);
        let body = match self
            .client
            .get_json(&followed.region, RiotApi::ACCOUNT_ENDPOINT, &url, &[])
            .await
        {
            Ok(body) => body,
            Err(ApiError::NotFound) => {
                warn!(
                    "No account for {}#{}; skipping",
                    followed.game_name, followed.tag_line
                );
                return Ok(None);
            }
            Err(err) => return Err(err).context("Account lookup failed"),
        };

        let puuid = body
            .get("puuid")
            .and_then(|v| v.as_str())
            .context("Account response missing puuid")?
            .to_string();

        self.sink.emit(HarvestRecord {
            stream: "player_account".into(),
            partition: puuid.clone(),
            extracted_at: Utc::now(),
            data: body,
        })?;

        Ok(Some(PlayerPartition {
            puuid,
            platform: followed.platform.clone(),
            region: followed.region.clone(),
            matches_played: None,
        }))
    }

    /// Pull one ranked ladder and fan out into its players
    async fn sync_league(&mut self, league: &LeaguePartition) -> Result<()> {
        let entries = match self.fetch_ladder(league).await {
            Ok(entries) => entries,
            Err(ApiError::NotFound) => {
                // Happens at the start of a new set when a tier is empty
                warn!("No ladder data for {}; skipping", league);
                return Ok(());
            }
            Err(err) => return Err(err).context("Ladder fetch failed"),
        };

        info!("{}: {} ladder entries", league, entries.len());

        for entry in entries {
            let Some(puuid) = entry.puuid.clone() else {
                continue;
            };

            self.sink.emit(HarvestRecord {
                stream: "ranked_ladder".into(),
                partition: league.to_string(),
                extracted_at: Utc::now(),
                data: serde_json::json!({
                    "puuid": puuid,
                    "leaguePoints": entry.league_points,
                    "matchesPlayed": entry.matches_played(),
                }),
            })?;

            let partition = PlayerPartition {
                puuid,
                platform: league.platform.clone(),
                region: league.region.clone(),
                matches_played: Some(entry.matches_played()),
            };
            self.sync_player(&partition).await?;
        }
        Ok(())
    }

    async fn fetch_ladder(&mut self, league: &LeaguePartition) -> Result<Vec<LeagueEntry>, ApiError> {
        let query = [("queue", "RANKED_TFT".to_string())];
        let (endpoint, url) = match &league.division {
            None => (
                RiotApi::APEX_LEAGUE_ENDPOINT,
                RiotApi::apex_league_url(&league.platform, &league.tier),
            ),
            Some(division) => (
                RiotApi::LEAGUE_ENTRIES_ENDPOINT,
                RiotApi::league_entries_url(&league.platform, &league.tier, division),
            ),
        };

        let body = self
            .client
            .get_json(&league.platform, endpoint, &url, &query)
            .await?;

        // Apex leagues wrap their entries; the per-division endpoint
        // returns a bare array.
        let entries = match body.get("entries") {
            Some(entries) => entries.clone(),
            None => body,
        };
        serde_json::from_value(entries).map_err(|e| ApiError::Upstream {
            status: 200,
            body: format!("unparseable ladder response: {}", e),
        })
    }

    /// Drain one player's match history, expanding unseen matches into
    /// detail fetches, checkpointing after every record.
    async fn sync_player(&mut self, partition: &PlayerPartition) -> Result<()> {
        let key = partition.key().to_string();

        if !self
            .state
            .should_fetch_history(&key, partition.matches_played)
        {
            debug!("{}: no new matches, skipping history", key);
            return Ok(());
        }

        let watermark = self
            .state
            .progress(&key)
            .and_then(|p| p.last_watermark);
        let window = ExtractionWindow::resolve(
            self.config.initial_timestamp,
            self.config.end_timestamp,
            watermark,
            ChronoDuration::days(self.config.watermark_staleness_days),
        );

        let cursor_state = self.state.begin_partition(&key);
        self.db.save_cursor(&key, &cursor_state).await?;
        let mut cursor = PaginationCursor::from_progress(&cursor_state, self.config.page_size);

        debug!(
            "{}: window [{}, {}), resuming at offset {}",
            key,
            window.start,
            window.end,
            cursor.current_offset()
        );

        while !cursor.finished() {
            let params = window.page_params(cursor.current_offset(), self.config.page_size);
            let query = [
                ("count", params.count.to_string()),
                ("start", params.start.to_string()),
                ("startTime", params.start_time.to_string()),
                ("endTime", params.end_time.to_string()),
            ];
            let url = RiotApi::match_ids_url(&partition.region, &partition.puuid);

            let body = match self
                .client
                .get_json(&partition.region, RiotApi::MATCH_IDS_ENDPOINT, &url, &query)
                .await
            {
                Ok(body) => body,
                Err(ApiError::NotFound) => {
                    warn!("{}: no match history; skipping partition", key);
                    self.state.abandon_partition(&key);
                    self.db.clear_cursor(&key).await?;
                    return Ok(());
                }
                Err(err) => return Err(err).context("Match history fetch failed"),
            };

            let ids: Vec<String> = serde_json::from_value(body)
                .context("Match history response was not a list of match ids")?;

            for match_id in &ids {
                self.sink.emit(HarvestRecord {
                    stream: "match_history".into(),
                    partition: key.clone(),
                    extracted_at: Utc::now(),
                    data: serde_json::json!({ "matchId": match_id }),
                })?;

                if self.state.should_expand_match(match_id) {
                    self.fetch_match_detail(partition, match_id).await?;
                }

                // Checkpoint only once the record is emitted and expanded;
                // a kill before this point re-processes the record on
                // resume instead of skipping it.
                let checkpoint = self.state.record_page_record(&key, params);
                self.db.save_cursor(&key, &checkpoint).await?;
            }

            cursor.observe_page(ids.len());
        }

        let progress = self
            .state
            .finalize_partition(&key, &window, partition.matches_played)?;
        self.db.save_partition_progress(&key, &progress).await?;
        self.db.clear_cursor(&key).await?;
        self.persist_rate_snapshot().await?;

        info!(
            "{}: partition drained, watermark now {:?}",
            key, progress.last_watermark
        );
        Ok(())
    }

    async fn fetch_match_detail(
        &mut self,
        partition: &PlayerPartition,
        match_id: &str,
    ) -> Result<()> {
        let url = RiotApi::match_detail_url(&partition.region, match_id);
        let detail = match self
            .client
            .get_json(&partition.region, RiotApi::MATCH_DETAIL_ENDPOINT, &url, &[])
            .await
        {
            Ok(body) => body,
            Err(ApiError::NotFound) => {
                warn!("Match {} not found; skipping", match_id);
                return Ok(());
            }
            Err(err) => return Err(err).context("Match detail fetch failed"),
        };

        self.sink.emit(HarvestRecord {
            stream: "match_detail".into(),
            partition: partition.puuid.clone(),
            extracted_at: Utc::now(),
            data: detail,
        })?;

        // Only a completed fetch-and-emit earns dedup membership
        self.state.mark_processed(match_id);
        self.db.insert_processed_match(match_id).await?;
        Ok(())
    }

    async fn persist_rate_snapshot(&self) -> Result<()> {
        let snapshot = self.client.governor().snapshot().await;
        self.db.save_rate_limit_snapshot(&snapshot).await
    }
}
