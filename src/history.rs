//! Match history store and query seam
//!
//! Everything downstream (ratings, goal model, feature engineering) reads
//! matches through [`HistoryProvider`], which enforces the before-kickoff
//! contract: queries only ever return finished matches strictly before the
//! requested cutoff. That keeps training features leak-free by construction.

use crate::types::{
    Competition, CompetitionId, MatchId, MatchRecord, Season, TeamId,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Read-side contract over the match store.
///
/// All methods return finished matches strictly before `as_of`. Methods
/// documented "descending" return most-recent-first; "ascending" return
/// oldest-first.
pub trait HistoryProvider: Send + Sync {
    /// Finished matches of one competition/season partition, ascending.
    fn competition_matches_before(
        &self,
        competition: CompetitionId,
        season: Season,
        as_of: DateTime<Utc>,
    ) -> Vec<MatchRecord>;

    /// Most recent finished matches of a team across competitions, descending.
    fn recent_team_matches(
        &self,
        team: TeamId,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Vec<MatchRecord>;

    /// Venue-filtered variant: `home == true` restricts to matches the team
    /// played at home. Descending.
    fn recent_venue_matches(
        &self,
        team: TeamId,
        home: bool,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Vec<MatchRecord>;

    /// Previous meetings between two teams regardless of venue, descending.
    fn head_to_head(
        &self,
        team_a: TeamId,
        team_b: TeamId,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Vec<MatchRecord>;

    /// A team's matches inside one partition, ascending.
    fn team_season_matches(
        &self,
        team: TeamId,
        competition: CompetitionId,
        season: Season,
        as_of: DateTime<Utc>,
    ) -> Vec<MatchRecord>;

    /// Every finished match in the store, ascending. Used by rating backfills.
    fn all_finished_matches(&self, as_of: DateTime<Utc>) -> Vec<MatchRecord>;

    /// Competition metadata, if registered.
    fn competition(&self, id: CompetitionId) -> Option<Competition>;

    /// Distinct (competition, season) partitions present in the store.
    fn partitions(&self) -> Vec<(CompetitionId, Season)>;
}

/// In-memory match store backing the engine.
///
/// Matches are kept sorted by kickoff date so every provider query is a
/// single filtered scan. Upserts keep the invariant.
pub struct MatchHistory {
    inner: RwLock<HistoryInner>,
}

struct HistoryInner {
    matches: Vec<MatchRecord>,
    by_id: HashMap<MatchId, usize>,
    competitions: HashMap<CompetitionId, Competition>,
}

impl MatchHistory {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HistoryInner {
                matches: Vec::new(),
                by_id: HashMap::new(),
                competitions: HashMap::new(),
            }),
        }
    }

    pub fn register_competition(&self, competition: Competition) {
        self.inner
            .write()
            .competitions
            .insert(competition.id, competition);
    }

    /// Insert a new match or replace an existing one by id (result arrivals,
    /// postponement reschedules). Matches are never deleted.
    pub fn upsert(&self, record: MatchRecord) {
        let mut inner = self.inner.write();
        if let Some(&pos) = inner.by_id.get(&record.id) {
            inner.matches[pos] = record;
            // A reschedule can move the kickoff, so restore date order.
            inner.matches.sort_by_key(|m| m.utc_date);
            let index: HashMap<MatchId, usize> = inner
                .matches
                .iter()
                .enumerate()
                .map(|(i, m)| (m.id, i))
                .collect();
            inner.by_id = index;
        } else {
            let pos = inner
                .matches
                .partition_point(|m| m.utc_date <= record.utc_date);
            inner.matches.insert(pos, record);
            let index: HashMap<MatchId, usize> = inner
                .matches
                .iter()
                .enumerate()
                .map(|(i, m)| (m.id, i))
                .collect();
            inner.by_id = index;
        }
    }

    pub fn upsert_all(&self, records: impl IntoIterator<Item = MatchRecord>) {
        for record in records {
            self.upsert(record);
        }
    }

    pub fn get(&self, id: MatchId) -> Option<MatchRecord> {
        let inner = self.inner.read();
        inner.by_id.get(&id).map(|&pos| inner.matches[pos].clone())
    }

    pub fn len(&self) -> usize {
        self.inner.read().matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().matches.is_empty()
    }

    fn filter_descending<F>(&self, as_of: DateTime<Utc>, limit: usize, pred: F) -> Vec<MatchRecord>
    where
        F: Fn(&MatchRecord) -> bool,
    {
        let inner = self.inner.read();
        inner
            .matches
            .iter()
            .rev()
            .filter(|m| m.is_finished() && m.utc_date < as_of && pred(m))
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for MatchHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryProvider for MatchHistory {
    fn competition_matches_before(
        &self,
        competition: CompetitionId,
        season: Season,
        as_of: DateTime<Utc>,
    ) -> Vec<MatchRecord> {
        let inner = self.inner.read();
        inner
            .matches
            .iter()
            .filter(|m| {
                m.is_finished()
                    && m.utc_date < as_of
                    && m.competition_id == competition
                    && m.season == season
            })
            .cloned()
            .collect()
    }

    fn recent_team_matches(
        &self,
        team: TeamId,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Vec<MatchRecord> {
        self.filter_descending(as_of, limit, |m| m.involves(team))
    }

    fn recent_venue_matches(
        &self,
        team: TeamId,
        home: bool,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Vec<MatchRecord> {
        self.filter_descending(as_of, limit, |m| {
            if home {
                m.home_team == team
            } else {
                m.away_team == team
            }
        })
    }

    fn head_to_head(
        &self,
        team_a: TeamId,
        team_b: TeamId,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Vec<MatchRecord> {
        self.filter_descending(as_of, limit, |m| {
            m.involves(team_a) && m.involves(team_b)
        })
    }

    fn team_season_matches(
        &self,
        team: TeamId,
        competition: CompetitionId,
        season: Season,
        as_of: DateTime<Utc>,
    ) -> Vec<MatchRecord> {
        let inner = self.inner.read();
        inner
            .matches
            .iter()
            .filter(|m| {
                m.is_finished()
                    && m.utc_date < as_of
                    && m.competition_id == competition
                    && m.season == season
                    && m.involves(team)
            })
            .cloned()
            .collect()
    }

    fn all_finished_matches(&self, as_of: DateTime<Utc>) -> Vec<MatchRecord> {
        let inner = self.inner.read();
        inner
            .matches
            .iter()
            .filter(|m| m.is_finished() && m.utc_date < as_of)
            .cloned()
            .collect()
    }

    fn competition(&self, id: CompetitionId) -> Option<Competition> {
        self.inner.read().competitions.get(&id).cloned()
    }

    fn partitions(&self) -> Vec<(CompetitionId, Season)> {
        let inner = self.inner.read();
        let mut seen: Vec<(CompetitionId, Season)> = Vec::new();
        for m in &inner.matches {
            let key = (m.competition_id, m.season);
            if !seen.contains(&key) {
                seen.push(key);
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MatchOdds, MatchStats, MatchStatus};
    use chrono::TimeZone;

    fn finished(id: MatchId, day: u32, home: TeamId, away: TeamId, hs: u32, als: u32) -> MatchRecord {
        MatchRecord {
            id,
            competition_id: 1,
            season: 2024,
            matchday: Some(day),
            utc_date: Utc.with_ymd_and_hms(2024, 8, day, 16, 0, 0).unwrap(),
            home_team: home,
            away_team: away,
            status: MatchStatus::Finished,
            home_score: Some(hs),
            away_score: Some(als),
            home_score_ht: None,
            away_score_ht: None,
            stats: MatchStats::default(),
            odds: MatchOdds::default(),
        }
    }

    #[test]
    fn test_queries_exclude_cutoff_and_unfinished() {
        let history = MatchHistory::new();
        history.upsert(finished(1, 1, 10, 20, 2, 0));
        history.upsert(finished(2, 8, 10, 30, 1, 1));
        let mut scheduled = finished(3, 15, 10, 40, 0, 0);
        scheduled.status = MatchStatus::Scheduled;
        scheduled.home_score = None;
        scheduled.away_score = None;
        history.upsert(scheduled);

        // Cutoff exactly at the second match kickoff: strictly before.
        let as_of = Utc.with_ymd_and_hms(2024, 8, 8, 16, 0, 0).unwrap();
        let recent = history.recent_team_matches(10, as_of, 10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, 1);

        // Later cutoff sees both finished matches, never the scheduled one.
        let later = Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap();
        assert_eq!(history.recent_team_matches(10, later, 10).len(), 2);
    }

    #[test]
    fn test_descending_order_and_limit() {
        let history = MatchHistory::new();
        for day in 1..=6 {
            history.upsert(finished(day as i64, day, 10, 20 + day as i64, 1, 0));
        }
        let as_of = Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap();
        let recent = history.recent_team_matches(10, as_of, 3);
        assert_eq!(recent.len(), 3);
        assert!(recent[0].utc_date > recent[1].utc_date);
        assert!(recent[1].utc_date > recent[2].utc_date);
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let history = MatchHistory::new();
        let mut record = finished(1, 1, 10, 20, 0, 0);
        record.status = MatchStatus::Scheduled;
        record.home_score = None;
        record.away_score = None;
        history.upsert(record);
        assert_eq!(history.len(), 1);

        history.upsert(finished(1, 1, 10, 20, 3, 2));
        assert_eq!(history.len(), 1);
        assert_eq!(history.get(1).unwrap().home_score, Some(3));
    }

    #[test]
    fn test_venue_filter() {
        let history = MatchHistory::new();
        history.upsert(finished(1, 1, 10, 20, 2, 0));
        history.upsert(finished(2, 2, 20, 10, 1, 1));
        let as_of = Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap();
        let at_home = history.recent_venue_matches(10, true, as_of, 10);
        assert_eq!(at_home.len(), 1);
        assert_eq!(at_home[0].id, 1);
    }

    #[test]
    fn test_partitions_discovered() {
        let history = MatchHistory::new();
        history.upsert(finished(1, 1, 10, 20, 1, 0));
        let mut other = finished(2, 2, 30, 40, 0, 0);
        other.competition_id = 2;
        other.season = 2023;
        history.upsert(other);
        let partitions = history.partitions();
        assert_eq!(partitions.len(), 2);
        assert!(partitions.contains(&(1, 2024)));
        assert!(partitions.contains(&(2, 2023)));
    }
}
