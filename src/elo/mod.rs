//! Sistema de rating Elo con doble alcance
//!
//! Cada equipo mantiene dos ratings por competición: uno persistente que
//! cruza temporadas y uno estacional que arranca en el rating inicial al
//! empezar cada temporada. Las escrituras son versionadas (compare-and-swap
//! por fila) para detectar actualizaciones concurrentes o fuera de orden.

use crate::config::EloConfig;
use crate::error::{EngineError, EngineResult};
use crate::history::HistoryProvider;
use crate::types::{
    CancelFlag, Competition, CompetitionId, MatchId, MatchRecord, Season, TeamId,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Clave de una fila de rating: equipo + competición + temporada
/// (`None` = rating persistente entre temporadas)
pub type EloKey = (TeamId, CompetitionId, Option<Season>);

/// Probabilidad esperada de victoria del lado local.
///
/// E = 1 / (1 + 10^(-((Ra + H) - Rb) / 400)) con H sumado al rating local.
pub fn expected_score(home_rating: f64, away_rating: f64, home_advantage: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf(-((home_rating + home_advantage) - away_rating) / 400.0))
}

/// Multiplicador por margen de goles: las goleadas mueven más rating.
pub fn goal_margin_multiplier(goal_diff: u32) -> f64 {
    match goal_diff {
        0 | 1 => 1.0,
        2 => 1.5,
        3 => 1.75,
        d => 1.75 + (d as f64 - 3.0) / 8.0,
    }
}

/// K-factor según contexto del partido.
///
/// La K base depende del torneo (liga, o fase de grupos/eliminatorias en
/// continental); encima se aplica el ajuste por progreso de temporada: el
/// inicio amortigua (ratings aún ruidosos) y el final amplifica (partidos
/// decisivos).
pub fn k_factor(cfg: &EloConfig, competition: &Competition, matchday: Option<u32>) -> f64 {
    let base = if competition.continental {
        match matchday {
            Some(day) if day > cfg.knockout_matchday_from => cfg.continental_knockout_k,
            _ => cfg.continental_group_k,
        }
    } else {
        cfg.base_k
    };
    match season_progress(competition, matchday) {
        Some(p) if p < cfg.early_season_cutoff => cfg.early_season_k,
        Some(p) if p > cfg.late_season_cutoff => cfg.late_season_k,
        _ => base,
    }
}

/// Progreso de temporada (0.0 - 1.0) a partir de la jornada
pub fn season_progress(competition: &Competition, matchday: Option<u32>) -> Option<f64> {
    let day = matchday?;
    if competition.total_matchdays == 0 {
        return None;
    }
    Some(day as f64 / competition.total_matchdays as f64)
}

/// Instantánea de rating de un equipo en un alcance concreto
#[derive(Debug, Clone)]
pub struct EloSnapshot {
    pub rating: f64,
    pub matches_played: u32,
    pub peak_rating: f64,
    pub lowest_rating: f64,
    /// FIFO acotado con los últimos ratings (para momentum)
    pub last_ratings: Vec<f64>,
    pub last_match_date: Option<DateTime<Utc>>,
}

impl EloSnapshot {
    fn fresh(initial: f64) -> Self {
        Self {
            rating: initial,
            matches_played: 0,
            peak_rating: initial,
            lowest_rating: initial,
            last_ratings: Vec::new(),
            last_match_date: None,
        }
    }

    /// Momentum = rating más reciente - más antiguo de la ventana.
    /// Positivo indica tendencia al alza.
    pub fn momentum(&self) -> f64 {
        match (self.last_ratings.last(), self.last_ratings.first()) {
            (Some(newest), Some(oldest)) => newest - oldest,
            _ => 0.0,
        }
    }

    fn record_rating(&mut self, rating: f64, date: DateTime<Utc>, window: usize) {
        self.rating = rating;
        self.matches_played += 1;
        self.peak_rating = self.peak_rating.max(rating);
        self.lowest_rating = self.lowest_rating.min(rating);
        self.last_ratings.push(rating);
        while self.last_ratings.len() > window {
            self.last_ratings.remove(0);
        }
        self.last_match_date = Some(date);
    }
}

#[derive(Debug, Clone)]
struct EloRow {
    snap: EloSnapshot,
    version: u64,
}

/// Escritura preparada de un alcance: instantáneas nuevas y versiones
/// leídas, pendientes de confirmar
struct PreparedScope {
    home_key: EloKey,
    away_key: EloKey,
    home_version: u64,
    away_version: u64,
    home_snap: EloSnapshot,
    away_snap: EloSnapshot,
    home_change: RatingChange,
    away_change: RatingChange,
}

/// Cambio de rating aplicado a un equipo en un alcance
#[derive(Debug, Clone, Copy)]
pub struct RatingChange {
    pub before: f64,
    pub after: f64,
    pub expected: f64,
    pub k: f64,
    pub margin_multiplier: f64,
}

impl RatingChange {
    pub fn delta(&self) -> f64 {
        self.after - self.before
    }
}

/// Resultado de procesar un partido: cambios en ambos alcances
#[derive(Debug, Clone)]
pub struct EloUpdate {
    pub match_id: MatchId,
    pub home_persistent: RatingChange,
    pub away_persistent: RatingChange,
    pub home_seasonal: RatingChange,
    pub away_seasonal: RatingChange,
}

/// Informe de un backfill de ratings
#[derive(Debug, Clone, Default)]
pub struct BackfillReport {
    pub processed: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

/// Motor Elo: mantiene todas las filas de rating y aplica partidos
pub struct EloEngine {
    cfg: EloConfig,
    rows: RwLock<HashMap<EloKey, EloRow>>,
}

impl EloEngine {
    pub fn new(cfg: EloConfig) -> Self {
        Self {
            cfg,
            rows: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EloConfig {
        &self.cfg
    }

    /// Rating actual de un equipo en un alcance, si existe la fila
    pub fn rating(
        &self,
        team: TeamId,
        competition: CompetitionId,
        season: Option<Season>,
    ) -> Option<EloSnapshot> {
        self.rows
            .read()
            .get(&(team, competition, season))
            .map(|row| row.snap.clone())
    }

    /// Rating visible antes de `as_of`.
    ///
    /// Si la fila ya incluye un partido en o después del corte se descarta
    /// (el llamador usa valores neutros); esto evita fugas temporales al
    /// construir features de entrenamiento.
    pub fn rating_before(
        &self,
        team: TeamId,
        competition: CompetitionId,
        season: Option<Season>,
        as_of: DateTime<Utc>,
    ) -> Option<EloSnapshot> {
        let snap = self.rating(team, competition, season)?;
        match snap.last_match_date {
            Some(last) if last >= as_of => None,
            _ => Some(snap),
        }
    }

    /// Borra todas las filas (replay completo de historial)
    pub fn clear(&self) {
        self.rows.write().clear();
    }

    /// Procesa un partido terminado actualizando los cuatro ratings
    /// (local/visitante x persistente/estacional).
    pub fn process_match(
        &self,
        record: &MatchRecord,
        competition: &Competition,
    ) -> EngineResult<EloUpdate> {
        let result = record.result().ok_or_else(|| {
            EngineError::data_insufficient(format!("match {} has no final result", record.id))
        })?;
        let (home_goals, away_goals) = (
            record.home_score.unwrap_or(0),
            record.away_score.unwrap_or(0),
        );
        let goal_diff = home_goals.abs_diff(away_goals);
        let g = goal_margin_multiplier(goal_diff);
        let k = k_factor(&self.cfg, competition, record.matchday);
        let (s_home, s_away) = result.actual_scores();

        for attempt in 0..2 {
            let persistent = self.prepare_scope(record, None, k, g, s_home, s_away)?;
            let seasonal =
                self.prepare_scope(record, Some(record.season), k, g, s_home, s_away)?;

            // Los dos alcances se confirman bajo el mismo write lock, con
            // chequeo conjunto de versiones: un choque nunca deja el
            // persistente escrito sin el estacional.
            let mut rows = self.rows.write();
            let stale = [&persistent, &seasonal].into_iter().any(|scope| {
                rows.get(&scope.home_key).map(|r| r.version).unwrap_or(0) != scope.home_version
                    || rows.get(&scope.away_key).map(|r| r.version).unwrap_or(0)
                        != scope.away_version
            });
            if stale {
                drop(rows);
                if attempt == 0 {
                    continue;
                }
                break;
            }

            let update = EloUpdate {
                match_id: record.id,
                home_persistent: persistent.home_change,
                away_persistent: persistent.away_change,
                home_seasonal: seasonal.home_change,
                away_seasonal: seasonal.away_change,
            };
            for scope in [persistent, seasonal] {
                rows.insert(
                    scope.home_key,
                    EloRow {
                        snap: scope.home_snap,
                        version: scope.home_version + 1,
                    },
                );
                rows.insert(
                    scope.away_key,
                    EloRow {
                        snap: scope.away_snap,
                        version: scope.away_version + 1,
                    },
                );
            }
            drop(rows);

            debug!(
                "⚽ Elo match {}: home {:+.1} / away {:+.1} (K={:.0}, G={:.2})",
                record.id,
                update.home_persistent.delta(),
                update.away_persistent.delta(),
                k,
                g
            );
            return Ok(update);
        }

        Err(EngineError::RatingUpdateConflict {
            team: record.home_team,
            competition: record.competition_id,
            season: Some(record.season),
        })
    }

    /// Prepara la escritura de un alcance sin confirmarla: lee las filas,
    /// rechaza partidos más antiguos que el último procesado y calcula las
    /// instantáneas nuevas junto a las versiones leídas.
    fn prepare_scope(
        &self,
        record: &MatchRecord,
        season: Option<Season>,
        k: f64,
        g: f64,
        s_home: f64,
        s_away: f64,
    ) -> EngineResult<PreparedScope> {
        let home_key = (record.home_team, record.competition_id, season);
        let away_key = (record.away_team, record.competition_id, season);

        let (home_row, away_row) = {
            let rows = self.rows.read();
            (
                rows.get(&home_key)
                    .cloned()
                    .unwrap_or(EloRow {
                        snap: EloSnapshot::fresh(self.cfg.initial_rating),
                        version: 0,
                    }),
                rows.get(&away_key)
                    .cloned()
                    .unwrap_or(EloRow {
                        snap: EloSnapshot::fresh(self.cfg.initial_rating),
                        version: 0,
                    }),
            )
        };

        for (key, row) in [(&home_key, &home_row), (&away_key, &away_row)] {
            if let Some(last) = row.snap.last_match_date {
                if last > record.utc_date {
                    warn!(
                        "⚠️ Out-of-order match {} for team {} (scope season={:?})",
                        record.id, key.0, season
                    );
                    return Err(EngineError::RatingUpdateConflict {
                        team: key.0,
                        competition: key.1,
                        season,
                    });
                }
            }
        }

        let e_home = expected_score(
            home_row.snap.rating,
            away_row.snap.rating,
            self.cfg.home_advantage,
        );
        let e_away = 1.0 - e_home;

        let new_home = home_row.snap.rating + k * g * (s_home - e_home);
        let new_away = away_row.snap.rating + k * g * (s_away - e_away);

        let home_change = RatingChange {
            before: home_row.snap.rating,
            after: new_home,
            expected: e_home,
            k,
            margin_multiplier: g,
        };
        let away_change = RatingChange {
            before: away_row.snap.rating,
            after: new_away,
            expected: e_away,
            k,
            margin_multiplier: g,
        };

        let mut home_snap = home_row.snap;
        home_snap.record_rating(new_home, record.utc_date, self.cfg.momentum_window);
        let mut away_snap = away_row.snap;
        away_snap.record_rating(new_away, record.utc_date, self.cfg.momentum_window);

        Ok(PreparedScope {
            home_key,
            away_key,
            home_version: home_row.version,
            away_version: away_row.version,
            home_snap,
            away_snap,
            home_change,
            away_change,
        })
    }

    /// Reconstruye ratings desde cero reproduciendo el historial en orden
    /// cronológico. Comprueba cancelación en cada partido y conserva el
    /// progreso parcial.
    pub fn backfill(
        &self,
        history: &dyn HistoryProvider,
        as_of: DateTime<Utc>,
        cancel: &CancelFlag,
    ) -> EngineResult<BackfillReport> {
        self.clear();
        let matches = history.all_finished_matches(as_of);
        info!("🔄 Elo backfill over {} finished matches", matches.len());

        let mut report = BackfillReport::default();
        for record in &matches {
            if cancel.is_cancelled() {
                report.cancelled = true;
                info!(
                    "🛑 Elo backfill cancelled after {} matches (partial progress kept)",
                    report.processed
                );
                return Ok(report);
            }
            let competition = history
                .competition(record.competition_id)
                .unwrap_or_else(|| Competition::domestic(record.competition_id, "?", "unknown"));
            match self.process_match(record, &competition) {
                Ok(_) => report.processed += 1,
                Err(EngineError::DataInsufficient { .. }) => report.skipped += 1,
                Err(e) => return Err(e),
            }
        }

        info!(
            "✅ Elo backfill complete: {} processed, {} skipped",
            report.processed, report.skipped
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MatchOdds, MatchStats, MatchStatus};
    use chrono::TimeZone;

    fn test_match(id: MatchId, day: u32, hs: u32, als: u32) -> MatchRecord {
        MatchRecord {
            id,
            competition_id: 1,
            season: 2024,
            matchday: Some(19),
            utc_date: Utc.with_ymd_and_hms(2024, 8, day, 16, 0, 0).unwrap(),
            home_team: 10,
            away_team: 20,
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
    fn test_expected_score_formula() {
        // Equal ratings + 100 points of home advantage
        let e = expected_score(1500.0, 1500.0, 100.0);
        assert!((e - 0.640065).abs() < 1e-5);
    }

    #[test]
    fn test_expected_scores_sum_to_one() {
        // Complementary perspectives without home advantage
        let e_ab = expected_score(1620.0, 1480.0, 0.0);
        let e_ba = expected_score(1480.0, 1620.0, 0.0);
        assert!((e_ab + e_ba - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_goal_margin_multiplier_ladder() {
        assert_eq!(goal_margin_multiplier(0), 1.0);
        assert_eq!(goal_margin_multiplier(1), 1.0);
        assert_eq!(goal_margin_multiplier(2), 1.5);
        assert_eq!(goal_margin_multiplier(3), 1.75);
        assert!((goal_margin_multiplier(5) - 2.0).abs() < 1e-12);
        // Monotonic in the margin
        for d in 1..10u32 {
            assert!(goal_margin_multiplier(d + 1) >= goal_margin_multiplier(d));
        }
    }

    #[test]
    fn test_k_factor_contexts() {
        let cfg = EloConfig::default();
        let league = Competition::domestic(1, "PL", "Premier League");
        let cl = Competition::continental(2, "CL", "Champions League");

        assert_eq!(k_factor(&cfg, &league, Some(19)), 30.0);
        assert_eq!(k_factor(&cfg, &league, Some(3)), 25.0);
        assert_eq!(k_factor(&cfg, &league, Some(36)), 35.0);
        assert_eq!(k_factor(&cfg, &league, None), 30.0);
        assert_eq!(k_factor(&cfg, &cl, Some(4)), 35.0);
        assert_eq!(k_factor(&cfg, &cl, Some(9)), 40.0);
    }

    #[test]
    fn test_continental_k_follows_season_progress() {
        let cfg = EloConfig::default();
        let cl = Competition::continental(2, "CL", "Champions League");

        // El ajuste por progreso se aplica también sobre la base continental
        assert_eq!(k_factor(&cfg, &cl, Some(1)), 25.0);
        assert_eq!(k_factor(&cfg, &cl, Some(12)), 35.0);
        // La jornada 8 todavía es fase de grupos; eliminatoria desde la 9
        assert_eq!(k_factor(&cfg, &cl, Some(8)), 35.0);
    }

    #[test]
    fn test_known_update_scenario() {
        // Both teams at 1500, home wins 2-0 with K=30:
        // delta = 30 * 1.5 * (1 - 0.640065) = 16.197
        let engine = EloEngine::new(EloConfig::default());
        let league = Competition::domestic(1, "PL", "Premier League");
        let update = engine.process_match(&test_match(1, 1, 2, 0), &league).unwrap();

        assert!((update.home_persistent.after - 1516.197).abs() < 0.01);
        assert!((update.away_persistent.after - 1483.803).abs() < 0.01);
        // Zero-sum within a scope
        assert!(
            (update.home_persistent.delta() + update.away_persistent.delta()).abs() < 1e-9
        );
    }

    #[test]
    fn test_dual_scope_rows() {
        let engine = EloEngine::new(EloConfig::default());
        let league = Competition::domestic(1, "PL", "Premier League");
        engine.process_match(&test_match(1, 1, 1, 0), &league).unwrap();

        let persistent = engine.rating(10, 1, None).unwrap();
        let seasonal = engine.rating(10, 1, Some(2024)).unwrap();
        assert_eq!(persistent.matches_played, 1);
        assert_eq!(seasonal.matches_played, 1);
        // Fresh rows in both scopes start from the same initial rating
        assert!((persistent.rating - seasonal.rating).abs() < 1e-9);
        // No row for other seasons
        assert!(engine.rating(10, 1, Some(2023)).is_none());
    }

    #[test]
    fn test_out_of_order_match_rejected() {
        let engine = EloEngine::new(EloConfig::default());
        let league = Competition::domestic(1, "PL", "Premier League");
        engine.process_match(&test_match(2, 10, 1, 1), &league).unwrap();

        let older = test_match(1, 5, 2, 0);
        let err = engine.process_match(&older, &league).unwrap_err();
        assert!(matches!(err, EngineError::RatingUpdateConflict { .. }));
    }

    #[test]
    fn test_rejected_match_leaves_both_scopes_untouched() {
        let engine = EloEngine::new(EloConfig::default());
        let league = Competition::domestic(1, "PL", "Premier League");
        engine.process_match(&test_match(2, 10, 1, 1), &league).unwrap();
        let persistent = engine.rating(10, 1, None).unwrap();
        let seasonal = engine.rating(10, 1, Some(2024)).unwrap();

        engine.process_match(&test_match(1, 5, 2, 0), &league).unwrap_err();

        // La rama de error no deja escrituras parciales en ningún alcance
        let persistent_after = engine.rating(10, 1, None).unwrap();
        let seasonal_after = engine.rating(10, 1, Some(2024)).unwrap();
        assert_eq!(persistent_after.matches_played, persistent.matches_played);
        assert_eq!(seasonal_after.matches_played, seasonal.matches_played);
        assert_eq!(persistent_after.rating, persistent.rating);
        assert_eq!(seasonal_after.rating, seasonal.rating);
    }

    #[test]
    fn test_momentum_window_bounded() {
        let cfg = EloConfig::default();
        let window = cfg.momentum_window;
        let engine = EloEngine::new(cfg);
        let league = Competition::domestic(1, "PL", "Premier League");
        for day in 1..=8u32 {
            engine
                .process_match(&test_match(day as i64, day, 2, 0), &league)
                .unwrap();
        }
        let snap = engine.rating(10, 1, None).unwrap();
        assert_eq!(snap.last_ratings.len(), window);
        // Winning streak: momentum positive and equals newest - oldest
        assert!(snap.momentum() > 0.0);
        assert!(
            (snap.momentum() - (snap.last_ratings[window - 1] - snap.last_ratings[0])).abs()
                < 1e-12
        );
    }

    #[test]
    fn test_rating_before_leak_guard() {
        let engine = EloEngine::new(EloConfig::default());
        let league = Competition::domestic(1, "PL", "Premier League");
        let record = test_match(1, 10, 2, 0);
        engine.process_match(&record, &league).unwrap();

        // A cutoff before (or at) the processed match must not see the row
        assert!(engine.rating_before(10, 1, None, record.utc_date).is_none());
        let after = Utc.with_ymd_and_hms(2024, 8, 11, 0, 0, 0).unwrap();
        assert!(engine.rating_before(10, 1, None, after).is_some());
    }

    #[test]
    fn test_peak_and_lowest_track() {
        let engine = EloEngine::new(EloConfig::default());
        let league = Competition::domestic(1, "PL", "Premier League");
        engine.process_match(&test_match(1, 1, 3, 0), &league).unwrap();
        engine.process_match(&test_match(2, 8, 0, 3), &league).unwrap();

        let snap = engine.rating(10, 1, None).unwrap();
        assert!(snap.peak_rating > snap.rating);
        assert!(snap.peak_rating >= snap.lowest_rating);
    }
}
