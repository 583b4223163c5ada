//! Configuration management for the TFT harvester

use crate::types::{
    region_for_platform, FollowedPlayer, LeaguePartition, APEX_TIERS, DIVISIONS, NON_APEX_TIERS,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::env;

/// Harvester configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Static bearer token sent as X-Riot-Token
    pub api_token: String,

    /// Path to SQLite state database
    pub database_path: String,

    /// First instant of the extraction window when no watermark applies
    pub initial_timestamp: DateTime<Utc>,

    /// Fixed end instant for every request window in this run
    pub end_timestamp: DateTime<Utc>,

    /// Match-history page size (count parameter)
    pub page_size: u64,

    /// Discard a persisted watermark older than this relative to the
    /// configured start. Bounded-loss policy, not an invariant.
    pub watermark_staleness_days: i64,

    /// Base delay for exponential backoff in milliseconds
    pub backoff_base_ms: u64,

    /// Retry ceiling for soft failures (enforced by the client, not the
    /// backoff sequencer)
    pub max_retries: u32,

    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,

    /// Individually followed players
    pub followed_players: Vec<FollowedPlayer>,

    /// Followed ranked ladders
    pub followed_leagues: Vec<LeaguePartition>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let api_token = env::var("RIOT_API_TOKEN")
            .ok()
            .filter(|s| !s.is_empty())
            .context("RIOT_API_TOKEN is required")?;

        let database_path =
            env::var("DATABASE_PATH").unwrap_or_else(|_| "tft-harvester.db".to_string());

        let now = Utc::now();

        let initial_timestamp = match env::var("START_DATE") {
            Ok(raw) if !raw.is_empty() => {
                let date = NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                    .with_context(|| format!("Invalid START_DATE: {}", raw))?;
                Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap())
            }
            _ => {
                let yesterday = (now - Duration::days(1)).date_naive();
                Utc.from_utc_datetime(&yesterday.and_hms_opt(0, 0, 0).unwrap())
            }
        };

        let page_size = env::var("PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(20);

        let watermark_staleness_days = env::var("WATERMARK_STALENESS_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let backoff_base_ms = env::var("BACKOFF_BASE_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000);

        let max_retries = env::var("MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let request_timeout_secs = env::var("REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let followed_players = env::var("FOLLOWED_PLAYERS")
            .map(|v| parse_followed_players(&v))
            .unwrap_or_else(|_| Ok(Vec::new()))?;

        let followed_leagues = env::var("FOLLOWED_LEAGUES")
            .map(|v| parse_followed_leagues(&v))
            .unwrap_or_else(|_| Ok(Vec::new()))?;

        if followed_players.is_empty() && followed_leagues.is_empty() {
            anyhow::bail!("No feeds configured: set FOLLOWED_PLAYERS and/or FOLLOWED_LEAGUES");
        }

        Ok(Self {
            api_token,
            database_path,
            initial_timestamp,
            end_timestamp: now,
            page_size,
            watermark_staleness_days,
            backoff_base_ms,
            max_retries,
            request_timeout_secs,
            followed_players,
            followed_leagues,
        })
    }
}

/// Parse "Name#Tag@platform" entries, comma-separated
fn parse_followed_players(raw: &str) -> Result<Vec<FollowedPlayer>> {
    let mut players = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (riot_id, platform) = item
            .split_once('@')
            .with_context(|| format!("Expected Name#Tag@platform, got: {}", item))?;
        let (game_name, tag_line) = riot_id
            .split_once('#')
            .with_context(|| format!("Expected Name#Tag@platform, got: {}", item))?;
        let platform = platform.trim().to_lowercase();
        let region = region_for_platform(&platform)
            .with_context(|| format!("Unknown platform routing value: {}", platform))?;
        players.push(FollowedPlayer {
            game_name: game_name.trim().to_string(),
            tag_line: tag_line.trim().to_string(),
            platform,
            region: region.to_string(),
        });
    }
    Ok(players)
}

/// Parse "platform:tier" or "platform:tier:division" entries,
/// comma-separated. A non-apex tier without a division expands to all four.
fn parse_followed_leagues(raw: &str) -> Result<Vec<LeaguePartition>> {
    let mut leagues = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let mut parts = item.split(':');
        let platform = parts
            .next()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .with_context(|| format!("Expected platform:tier[:division], got: {}", item))?;
        let tier = parts
            .next()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .with_context(|| format!("Expected platform:tier[:division], got: {}", item))?;
        let division = parts.next().map(|d| d.trim().to_uppercase());

        let region = region_for_platform(&platform)
            .with_context(|| format!("Unknown platform routing value: {}", platform))?;

        if APEX_TIERS.contains(&tier.as_str()) {
            leagues.push(LeaguePartition {
                platform,
                region: region.to_string(),
                tier,
                division: None,
            });
        } else if NON_APEX_TIERS.contains(&tier.as_str()) {
            match division {
                Some(div) => leagues.push(LeaguePartition {
                    platform,
                    region: region.to_string(),
                    tier: tier.to_uppercase(),
                    division: Some(div),
                }),
                None => {
                    for div in DIVISIONS {
                        leagues.push(LeaguePartition {
                            platform: platform.clone(),
                            region: region.to_string(),
                            tier: tier.to_uppercase(),
                            division: Some(div.to_string()),
                        });
                    }
                }
            }
        } else {
            anyhow::bail!("Unknown ranked tier: {}", tier);
        }
    }
    Ok(leagues)
}

/// Riot API endpoint configuration
pub struct RiotApi;

impl RiotApi {
    /// Endpoint-scope key for the match id list method
    pub const MATCH_IDS_ENDPOINT: &'static str = "/tft/match/v1/matches/by-puuid/{puuid}/ids";
    /// Endpoint-scope key for the match detail method
    pub const MATCH_DETAIL_ENDPOINT: &'static str = "/tft/match/v1/matches/{matchId}";
    /// Endpoint-scope key for the account lookup method
    pub const ACCOUNT_ENDPOINT: &'static str =
        "/riot/account/v1/accounts/by-riot-id/{gameName}/{tagLine}";
    /// Endpoint-scope key for the apex league method
    pub const APEX_LEAGUE_ENDPOINT: &'static str = "/tft/league/v1/{tier}";
    /// Endpoint-scope key for the league entries method
    pub const LEAGUE_ENTRIES_ENDPOINT: &'static str = "/tft/league/v1/entries/{tier}/{division}";

    pub fn base_url(routing_value: &str) -> String {
        format!("https://{}.api.riotgames.com", routing_value)
    }

    pub fn account_by_riot_id_url(region: &str, game_name: &str, tag_line: &str) -> String {
        format!(
            "{}/riot/account/v1/accounts/by-riot-id/{}/{}",
            Self::base_url(region),
            game_name,
            tag_line
        )
    }

    pub fn apex_league_url(platform: &str, tier: &str) -> String {
        format!("{}/tft/league/v1/{}", Self::base_url(platform), tier)
    }

    pub fn league_entries_url(platform: &str, tier: &str, division: &str) -> String {
        format!(
            "{}/tft/league/v1/entries/{}/{}",
            Self::base_url(platform),
            tier,
            division
        )
    }

    pub fn match_ids_url(region: &str, puuid: &str) -> String {
        format!(
            "{}/tft/match/v1/matches/by-puuid/{}/ids",
            Self::base_url(region),
            puuid
        )
    }

    pub fn match_detail_url(region: &str, match_id: &str) -> String {
        format!(
            "{}/tft/match/v1/matches/{}",
            Self::base_url(region),
            match_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_followed_players() {
        let players = parse_followed_players("SupremeKitteh#NA1@na1, Other#EUW@euw1").unwrap();
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].game_name, "SupremeKitteh");
        assert_eq!(players[0].tag_line, "NA1");
        assert_eq!(players[0].platform, "na1");
        assert_eq!(players[0].region, "americas");
        assert_eq!(players[1].region, "europe");
    }

    #[test]
    fn test_parse_followed_players_rejects_bad_shape() {
        assert!(parse_followed_players("NoTagOrPlatform").is_err());
        assert!(parse_followed_players("Name#Tag@atlantis").is_err());
    }

    #[test]
    fn test_parse_followed_leagues_apex() {
        let leagues = parse_followed_leagues("na1:challenger").unwrap();
        assert_eq!(leagues.len(), 1);
        assert_eq!(leagues[0].tier, "challenger");
        assert_eq!(leagues[0].division, None);
    }

    #[test]
    fn test_parse_followed_leagues_expands_divisions() {
        let leagues = parse_followed_leagues("euw1:gold").unwrap();
        assert_eq!(leagues.len(), 4);
        assert_eq!(leagues[0].tier, "GOLD");
        assert_eq!(leagues[0].division.as_deref(), Some("I"));
        assert_eq!(leagues[3].division.as_deref(), Some("IV"));
    }

    #[test]
    fn test_parse_followed_leagues_explicit_division() {
        let leagues = parse_followed_leagues("na1:platinum:II").unwrap();
        assert_eq!(leagues.len(), 1);
        assert_eq!(leagues[0].division.as_deref(), Some("II"));
    }

    #[test]
    fn test_parse_followed_leagues_rejects_unknown_tier() {
        assert!(parse_followed_leagues("na1:wood").is_err());
    }

    #[test]
    fn test_riot_api_urls() {
        assert_eq!(
            RiotApi::match_detail_url("americas", "NA1_123"),
            "https://americas.api.riotgames.com/tft/match/v1/matches/NA1_123"
        );
        assert_eq!(
            RiotApi::league_entries_url("na1", "GOLD", "II"),
            "https://na1.api.riotgames.com/tft/league/v1/entries/GOLD/II"
        );
    }
}
