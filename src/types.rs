//! Core types used throughout GolBot
//!
//! Defines common data structures for matches, results, odds and markets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Team identifier (assigned by the data importer)
pub type TeamId = i64;
/// Competition identifier
pub type CompetitionId = i64;
/// Season (starting year, e.g. 2024)
pub type Season = i32;
/// Match identifier
pub type MatchId = i64;

/// Competition (domestic league or continental tournament)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Competition {
    pub id: CompetitionId,
    /// Short code (PL, PD, BL1, CL, ...)
    pub code: String,
    pub name: String,
    /// Continental tournaments have a group stage plus knockout rounds
    pub continental: bool,
    /// Total matchdays (38 for domestic leagues, 13 for CL)
    pub total_matchdays: u32,
}

impl Competition {
    pub fn domestic(id: CompetitionId, code: &str, name: &str) -> Self {
        Self {
            id,
            code: code.to_string(),
            name: name.to_string(),
            continental: false,
            total_matchdays: 38,
        }
    }

    pub fn continental(id: CompetitionId, code: &str, name: &str) -> Self {
        Self {
            id,
            code: code.to_string(),
            name: name.to_string(),
            continental: true,
            total_matchdays: 13,
        }
    }
}

/// Team identity and competition association
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    /// Display name; may be corrected by data cleanup without changing the id
    pub name: String,
    pub competition_id: CompetitionId,
}

/// Match lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    Scheduled,
    InPlay,
    Finished,
    Postponed,
}

/// 1X2 outcome of a finished match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchResult {
    Home,
    Draw,
    Away,
}

impl MatchResult {
    pub fn from_scores(home: u32, away: u32) -> Self {
        if home > away {
            MatchResult::Home
        } else if home < away {
            MatchResult::Away
        } else {
            MatchResult::Draw
        }
    }

    /// Numeric scores for Elo updates: (home, away) as 1.0/0.5/0.0
    pub fn actual_scores(&self) -> (f64, f64) {
        match self {
            MatchResult::Home => (1.0, 0.0),
            MatchResult::Draw => (0.5, 0.5),
            MatchResult::Away => (0.0, 1.0),
        }
    }

    /// Class index for the ML models (H=0, D=1, A=2)
    pub fn class_index(&self) -> i64 {
        match self {
            MatchResult::Home => 0,
            MatchResult::Draw => 1,
            MatchResult::Away => 2,
        }
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchResult::Home => write!(f, "H"),
            MatchResult::Draw => write!(f, "D"),
            MatchResult::Away => write!(f, "A"),
        }
    }
}

/// Detailed statistics of a finished match. All fields are optional because
/// lower-tier data sources only carry scores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchStats {
    pub shots_home: Option<u32>,
    pub shots_away: Option<u32>,
    pub shots_on_target_home: Option<u32>,
    pub shots_on_target_away: Option<u32>,
    pub corners_home: Option<u32>,
    pub corners_away: Option<u32>,
    pub possession_home: Option<f64>,
    pub possession_away: Option<f64>,
    pub yellow_cards_home: Option<u32>,
    pub yellow_cards_away: Option<u32>,
    pub red_cards_home: Option<u32>,
    pub red_cards_away: Option<u32>,
}

impl MatchStats {
    pub fn total_corners(&self) -> Option<u32> {
        Some(self.corners_home? + self.corners_away?)
    }

    pub fn total_shots(&self) -> Option<u32> {
        Some(self.shots_home? + self.shots_away?)
    }

    pub fn total_shots_on_target(&self) -> Option<u32> {
        Some(self.shots_on_target_home? + self.shots_on_target_away?)
    }
}

/// Decimal bookmaker odds per market. A missing quote only skips the
/// value-bet evaluation of that market, never the prediction itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchOdds {
    pub home: Option<f64>,
    pub draw: Option<f64>,
    pub away: Option<f64>,
    pub over_25: Option<f64>,
    pub under_25: Option<f64>,
    pub btts_yes: Option<f64>,
    pub btts_no: Option<f64>,
}

impl MatchOdds {
    /// Complete 1X2 triple, or None if any leg is missing
    pub fn result_triple(&self) -> Option<(f64, f64, f64)> {
        Some((self.home?, self.draw?, self.away?))
    }
}

/// Match record: created when scheduled, mutated when the result arrives,
/// never deleted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub competition_id: CompetitionId,
    pub season: Season,
    pub matchday: Option<u32>,
    pub utc_date: DateTime<Utc>,
    pub home_team: TeamId,
    pub away_team: TeamId,
    pub status: MatchStatus,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
    pub home_score_ht: Option<u32>,
    pub away_score_ht: Option<u32>,
    #[serde(default)]
    pub stats: MatchStats,
    #[serde(default)]
    pub odds: MatchOdds,
}

impl MatchRecord {
    pub fn is_finished(&self) -> bool {
        self.status == MatchStatus::Finished
            && self.home_score.is_some()
            && self.away_score.is_some()
    }

    pub fn result(&self) -> Option<MatchResult> {
        if !self.is_finished() {
            return None;
        }
        Some(MatchResult::from_scores(self.home_score?, self.away_score?))
    }

    pub fn total_goals(&self) -> Option<u32> {
        Some(self.home_score? + self.away_score?)
    }

    pub fn both_teams_scored(&self) -> Option<bool> {
        Some(self.home_score? > 0 && self.away_score? > 0)
    }

    pub fn involves(&self, team: TeamId) -> bool {
        self.home_team == team || self.away_team == team
    }

    /// Goals (for, against) from the perspective of `team`
    pub fn goals_for_against(&self, team: TeamId) -> Option<(u32, u32)> {
        let (h, a) = (self.home_score?, self.away_score?);
        if self.home_team == team {
            Some((h, a))
        } else if self.away_team == team {
            Some((a, h))
        } else {
            None
        }
    }

    /// League points for `team` (3/1/0)
    pub fn points_for(&self, team: TeamId) -> Option<u32> {
        let (gf, ga) = self.goals_for_against(team)?;
        Some(if gf > ga {
            3
        } else if gf == ga {
            1
        } else {
            0
        })
    }
}

/// Markets the engine predicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketKind {
    Result,
    Over25,
    Over35,
    Btts,
    TotalCorners,
    Over95Corners,
    Over105Corners,
    TotalShots,
    TotalShotsOnTarget,
}

impl MarketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketKind::Result => "result",
            MarketKind::Over25 => "over_25",
            MarketKind::Over35 => "over_35",
            MarketKind::Btts => "btts",
            MarketKind::TotalCorners => "total_corners",
            MarketKind::Over95Corners => "over_95_corners",
            MarketKind::Over105Corners => "over_105_corners",
            MarketKind::TotalShots => "total_shots",
            MarketKind::TotalShotsOnTarget => "total_shots_on_target",
        }
    }

    /// Count markets predicted by regression instead of classification
    pub fn is_regression(&self) -> bool {
        matches!(
            self,
            MarketKind::TotalCorners | MarketKind::TotalShots | MarketKind::TotalShotsOnTarget
        )
    }
}

impl fmt::Display for MarketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cooperative cancellation flag for batch jobs (rating backfills, parameter
/// fitting, retraining). Jobs poll the flag at partition/match checkpoints
/// and keep partial progress when cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_from_scores() {
        assert_eq!(MatchResult::from_scores(2, 0), MatchResult::Home);
        assert_eq!(MatchResult::from_scores(1, 1), MatchResult::Draw);
        assert_eq!(MatchResult::from_scores(0, 3), MatchResult::Away);
    }

    #[test]
    fn test_actual_scores_sum_to_one() {
        for result in [MatchResult::Home, MatchResult::Draw, MatchResult::Away] {
            let (h, a) = result.actual_scores();
            assert_eq!(h + a, 1.0);
        }
    }

    #[test]
    fn test_points_perspective() {
        let record = MatchRecord {
            id: 1,
            competition_id: 1,
            season: 2024,
            matchday: Some(5),
            utc_date: Utc::now(),
            home_team: 10,
            away_team: 20,
            status: MatchStatus::Finished,
            home_score: Some(3),
            away_score: Some(1),
            home_score_ht: Some(1),
            away_score_ht: Some(0),
            stats: MatchStats::default(),
            odds: MatchOdds::default(),
        };
        assert_eq!(record.points_for(10), Some(3));
        assert_eq!(record.points_for(20), Some(0));
        assert_eq!(record.goals_for_against(20), Some((1, 3)));
        assert_eq!(record.result(), Some(MatchResult::Home));
    }

    #[test]
    fn test_cancel_flag_shared() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
