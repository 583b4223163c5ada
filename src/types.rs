//! Core types for the TFT harvester

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform routing values (server shards) mapped to their regional
/// routing value. Ladder endpoints use the platform value, match
/// endpoints the regional one.
pub const REGION_ROUTING_MAP: &[(&str, &str)] = &[
    ("na1", "americas"),
    ("br1", "americas"),
    ("la1", "americas"),
    ("la2", "americas"),
    ("jp1", "asia"),
    ("kr", "asia"),
    ("sg2", "sea"),
    ("tw2", "sea"),
    ("vn2", "sea"),
    ("oc1", "sea"),
    ("me1", "europe"),
    ("eun1", "europe"),
    ("euw1", "europe"),
    ("tr1", "europe"),
    ("ru", "europe"),
];

/// Ranked tiers served by the per-division entries endpoint
pub const NON_APEX_TIERS: &[&str] = &[
    "diamond", "emerald", "platinum", "gold", "silver", "bronze", "iron",
];

/// Ranked tiers served by the single-league apex endpoint
pub const APEX_TIERS: &[&str] = &["challenger", "grandmaster", "master"];

/// Division ordinals as the API spells them
pub const DIVISIONS: &[&str] = &["I", "II", "III", "IV"];

/// Resolve the regional routing value for a platform routing value
pub fn region_for_platform(platform: &str) -> Option<&'static str> {
    REGION_ROUTING_MAP
        .iter()
        .find(|(p, _)| *p == platform)
        .map(|(_, r)| *r)
}

/// One player whose match history is tracked: a single extraction partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerPartition {
    /// Globally unique Riot account identifier
    pub puuid: String,
    /// Platform the player queues on (e.g. na1)
    pub platform: String,
    /// Regional routing value for match endpoints (e.g. americas)
    pub region: String,
    /// Total ranked games observed on the ladder entry, when known.
    /// Monotone per player; used to skip players with no new matches.
    pub matches_played: Option<u64>,
}

impl PlayerPartition {
    /// Stable key for progress tracking
    pub fn key(&self) -> &str {
        &self.puuid
    }
}

/// One ranked-ladder feed: a tier (and division for non-apex tiers) on a
/// specific platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaguePartition {
    pub platform: String,
    pub region: String,
    pub tier: String,
    pub division: Option<String>,
}

impl LeaguePartition {
    pub fn is_apex(&self) -> bool {
        APEX_TIERS.contains(&self.tier.to_lowercase().as_str())
    }
}

impl fmt::Display for LeaguePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.division {
            Some(div) => write!(f, "{}/{} {}", self.platform, self.tier, div),
            None => write!(f, "{}/{}", self.platform, self.tier),
        }
    }
}

/// A followed player as configured, before puuid resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowedPlayer {
    pub game_name: String,
    pub tag_line: String,
    pub platform: String,
    pub region: String,
}

/// One entry from a ranked ladder response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeagueEntry {
    #[serde(default)]
    pub puuid: Option<String>,
    #[serde(default)]
    pub summoner_id: Option<String>,
    #[serde(default)]
    pub league_points: u64,
    #[serde(default)]
    pub wins: u64,
    #[serde(default)]
    pub losses: u64,
}

impl LeagueEntry {
    /// Total completed games: the monotone counter used for the
    /// no-new-matches skip condition.
    pub fn matches_played(&self) -> u64 {
        self.wins + self.losses
    }
}

/// An emitted record, tagged with the feed it came from
#[derive(Debug, Clone, Serialize)]
pub struct HarvestRecord {
    pub stream: String,
    pub partition: String,
    pub extracted_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_for_platform() {
        assert_eq!(region_for_platform("na1"), Some("americas"));
        assert_eq!(region_for_platform("euw1"), Some("europe"));
        assert_eq!(region_for_platform("oc1"), Some("sea"));
        assert_eq!(region_for_platform("nosuch"), None);
    }

    #[test]
    fn test_matches_played() {
        let entry = LeagueEntry {
            puuid: Some("p".into()),
            summoner_id: None,
            league_points: 120,
            wins: 40,
            losses: 35,
        };
        assert_eq!(entry.matches_played(), 75);
    }

    #[test]
    fn test_league_partition_display() {
        let apex = LeaguePartition {
            platform: "na1".into(),
            region: "americas".into(),
            tier: "challenger".into(),
            division: None,
        };
        assert!(apex.is_apex());
        assert_eq!(apex.to_string(), "na1/challenger");

        let normal = LeaguePartition {
            platform: "euw1".into(),
            region: "europe".into(),
            tier: "GOLD".into(),
            division: Some("II".into()),
        };
        assert!(!normal.is_apex());
        assert_eq!(normal.to_string(), "euw1/GOLD II");
    }
}
