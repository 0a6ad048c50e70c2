//! Modelo de goles Poisson con corrección Dixon-Coles
//!
//! Cada partición (competición, temporada) se ajusta de forma independiente:
//! fuerzas de ataque/defensa por equipo vía máxima verosimilitud (ascenso por
//! coordenadas con forma cerrada) y media de goles de la liga. La predicción
//! construye la matriz de marcadores truncada y deriva los mercados por sumas
//! triangulares.

use crate::config::GoalModelConfig;
use crate::error::{EngineError, EngineResult};
use crate::history::HistoryProvider;
use crate::types::{CancelFlag, CompetitionId, MatchRecord, Season, TeamId};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Discrete, Poisson};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tasa mínima para mantener la Poisson bien definida
const MIN_RATE: f64 = 1e-6;

/// Fuerzas ofensiva/defensiva de un equipo dentro de una partición.
/// 1.0 = media de la liga; ataque alto y defensa baja es mejor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TeamStrength {
    pub attack: f64,
    pub defense: f64,
    pub matches_played: usize,
    pub avg_scored: f64,
    pub avg_conceded: f64,
}

/// Parámetros ajustados de una partición completa
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionFit {
    pub competition: CompetitionId,
    pub season: Season,
    /// Goles medios por equipo y partido en la partición
    pub league_avg_goals: f64,
    pub teams: HashMap<TeamId, TeamStrength>,
    pub matches_used: usize,
    /// Momento del ajuste, para auditar la frescura de los parámetros
    pub fitted_at: DateTime<Utc>,
}

/// Probabilidades de mercado derivadas de la matriz de marcadores
#[derive(Debug, Clone, Copy)]
pub struct GoalMarketProbs {
    pub home_win: f64,
    pub draw: f64,
    pub away_win: f64,
    pub over_05: f64,
    pub over_15: f64,
    pub over_25: f64,
    pub over_35: f64,
    pub btts: f64,
    pub expected_total_goals: f64,
    pub lambda_home: f64,
    pub lambda_away: f64,
}

/// Modelo Dixon-Coles parametrizado para una partición
#[derive(Debug, Clone, Copy)]
pub struct DixonColesModel {
    pub home_advantage: f64,
    pub rho: f64,
    pub league_avg_goals: f64,
    pub max_goals: u32,
}

impl DixonColesModel {
    pub fn new(cfg: &GoalModelConfig, league_avg_goals: f64) -> Self {
        Self {
            home_advantage: cfg.home_advantage,
            rho: cfg.rho,
            league_avg_goals,
            max_goals: cfg.max_goals,
        }
    }

    /// Tasas esperadas de gol (local, visitante)
    pub fn expected_goals(&self, home: &TeamStrength, away: &TeamStrength) -> (f64, f64) {
        let lambda_home =
            home.attack * away.defense * self.home_advantage * self.league_avg_goals;
        let lambda_away = away.attack * home.defense * self.league_avg_goals;
        (lambda_home.max(MIN_RATE), lambda_away.max(MIN_RATE))
    }

    /// Corrección de dependencia en marcadores bajos.
    /// Con rho negativo sube el 0-0 y el 1-1 y baja el 1-0 y el 0-1.
    fn tau(&self, home_goals: u32, away_goals: u32, lambda_home: f64, lambda_away: f64) -> f64 {
        match (home_goals, away_goals) {
            (0, 0) => 1.0 - lambda_home * lambda_away * self.rho,
            (1, 0) => 1.0 + lambda_away * self.rho,
            (0, 1) => 1.0 + lambda_home * self.rho,
            (1, 1) => 1.0 - self.rho,
            _ => 1.0,
        }
    }

    /// Probabilidad de un marcador exacto antes de renormalizar la matriz
    pub fn score_probability(
        &self,
        lambda_home: f64,
        lambda_away: f64,
        home_goals: u32,
        away_goals: u32,
    ) -> f64 {
        let p_home = poisson_pmf(lambda_home, home_goals);
        let p_away = poisson_pmf(lambda_away, away_goals);
        p_home * p_away * self.tau(home_goals, away_goals, lambda_home, lambda_away)
    }

    /// Matriz (max_goals+1)x(max_goals+1) de marcadores, renormalizada para
    /// que sume 1 tras el truncamiento y la corrección tau.
    pub fn score_matrix(&self, lambda_home: f64, lambda_away: f64) -> Array2<f64> {
        let n = (self.max_goals + 1) as usize;
        let mut matrix = Array2::<f64>::zeros((n, n));
        for hg in 0..n {
            for ag in 0..n {
                matrix[[hg, ag]] =
                    self.score_probability(lambda_home, lambda_away, hg as u32, ag as u32);
            }
        }
        let total: f64 = matrix.iter().sum();
        if total > 0.0 {
            matrix.mapv_inplace(|p| p / total);
        }
        matrix
    }

    /// Deriva todos los mercados de la matriz de marcadores
    pub fn predict(&self, lambda_home: f64, lambda_away: f64) -> GoalMarketProbs {
        let matrix = self.score_matrix(lambda_home, lambda_away);
        let n = matrix.nrows();

        let mut home_win = 0.0;
        let mut draw = 0.0;
        let mut away_win = 0.0;
        let mut under = [0.0f64; 4]; // masa con total de goles <= 0, 1, 2, 3
        for hg in 0..n {
            for ag in 0..n {
                let p = matrix[[hg, ag]];
                if hg > ag {
                    home_win += p;
                } else if hg == ag {
                    draw += p;
                } else {
                    away_win += p;
                }
                let total = hg + ag;
                for (line, slot) in under.iter_mut().enumerate() {
                    if total <= line {
                        *slot += p;
                    }
                }
            }
        }

        // BTTS por inclusión-exclusión sobre las líneas en blanco
        let home_blank: f64 = matrix.row(0).sum();
        let away_blank: f64 = matrix.column(0).sum();
        let btts = (1.0 - home_blank - away_blank + matrix[[0, 0]]).clamp(0.0, 1.0);

        GoalMarketProbs {
            home_win,
            draw,
            away_win,
            over_05: 1.0 - under[0],
            over_15: 1.0 - under[1],
            over_25: 1.0 - under[2],
            over_35: 1.0 - under[3],
            btts,
            expected_total_goals: lambda_home + lambda_away,
            lambda_home,
            lambda_away,
        }
    }
}

fn poisson_pmf(lambda: f64, k: u32) -> f64 {
    match Poisson::new(lambda.max(MIN_RATE)) {
        Ok(dist) => dist.pmf(k as u64),
        // Unreachable: the rate is clamped strictly positive
        Err(_) => 0.0,
    }
}

/// Ajusta una partición por máxima verosimilitud.
///
/// El ascenso por coordenadas usa las actualizaciones en forma cerrada del
/// modelo Poisson multiplicativo: ataque_i = goles_i / suma de tasas
/// esperadas por unidad de ataque. Cada barrido renormaliza la media de
/// ataques y defensas a 1 y aplica el suelo de fuerza.
pub fn fit_partition(
    cfg: &GoalModelConfig,
    competition: CompetitionId,
    season: Season,
    matches: &[MatchRecord],
) -> EngineResult<PartitionFit> {
    let finished: Vec<&MatchRecord> = matches.iter().filter(|m| m.is_finished()).collect();
    if finished.len() < cfg.min_matches {
        return Err(EngineError::data_insufficient(format!(
            "partition {}/{} has {} finished matches (need {})",
            competition,
            season,
            finished.len(),
            cfg.min_matches
        )));
    }

    let mut team_ids: Vec<TeamId> = Vec::new();
    for m in &finished {
        if !team_ids.contains(&m.home_team) {
            team_ids.push(m.home_team);
        }
        if !team_ids.contains(&m.away_team) {
            team_ids.push(m.away_team);
        }
    }

    let mut scored: HashMap<TeamId, f64> = HashMap::new();
    let mut conceded: HashMap<TeamId, f64> = HashMap::new();
    let mut played: HashMap<TeamId, usize> = HashMap::new();
    let mut total_goals = 0.0;
    for m in &finished {
        let (hg, ag) = (
            m.home_score.unwrap_or(0) as f64,
            m.away_score.unwrap_or(0) as f64,
        );
        *scored.entry(m.home_team).or_default() += hg;
        *conceded.entry(m.home_team).or_default() += ag;
        *scored.entry(m.away_team).or_default() += ag;
        *conceded.entry(m.away_team).or_default() += hg;
        *played.entry(m.home_team).or_default() += 1;
        *played.entry(m.away_team).or_default() += 1;
        total_goals += hg + ag;
    }

    let league_avg = if finished.is_empty() {
        cfg.league_avg_goals_default
    } else {
        (total_goals / (2.0 * finished.len() as f64)).max(MIN_RATE)
    };

    // Arranque por momentos: ratio frente a la media de la liga
    let mut attack: HashMap<TeamId, f64> = HashMap::new();
    let mut defense: HashMap<TeamId, f64> = HashMap::new();
    for &id in &team_ids {
        let n = *played.get(&id).unwrap_or(&0) as f64;
        let avg_scored = scored.get(&id).copied().unwrap_or(0.0) / n.max(1.0);
        let avg_conceded = conceded.get(&id).copied().unwrap_or(0.0) / n.max(1.0);
        attack.insert(id, (avg_scored / league_avg).max(cfg.strength_floor));
        defense.insert(id, (avg_conceded / league_avg).max(cfg.strength_floor));
    }

    for sweep in 0..cfg.mle_iterations {
        let mut max_delta = 0.0f64;

        // Actualización cerrada de ataques con defensas fijas
        let mut attack_new = attack.clone();
        for &id in &team_ids {
            let mut denom = 0.0;
            for m in &finished {
                if m.home_team == id {
                    denom += defense[&m.away_team] * cfg.home_advantage * league_avg;
                } else if m.away_team == id {
                    denom += defense[&m.home_team] * league_avg;
                }
            }
            if denom > 0.0 {
                attack_new.insert(id, scored.get(&id).copied().unwrap_or(0.0) / denom);
            }
        }

        // Actualización cerrada de defensas con los ataques nuevos
        let mut defense_new = defense.clone();
        for &id in &team_ids {
            let mut denom = 0.0;
            for m in &finished {
                if m.home_team == id {
                    denom += attack_new[&m.away_team] * league_avg;
                } else if m.away_team == id {
                    denom += attack_new[&m.home_team] * cfg.home_advantage * league_avg;
                }
            }
            if denom > 0.0 {
                defense_new.insert(id, conceded.get(&id).copied().unwrap_or(0.0) / denom);
            }
        }

        // Renormalizar media a 1 para fijar la escala de la factorización
        normalize_mean(&mut attack_new, &team_ids);
        normalize_mean(&mut defense_new, &team_ids);
        for &id in &team_ids {
            let a = attack_new[&id].max(cfg.strength_floor);
            let d = defense_new[&id].max(cfg.strength_floor);
            max_delta = max_delta
                .max((a - attack[&id]).abs())
                .max((d - defense[&id]).abs());
            attack.insert(id, a);
            defense.insert(id, d);
        }

        if max_delta < cfg.mle_tolerance {
            debug!(
                "Partition {}/{} converged after {} sweeps (delta {:.2e})",
                competition, season, sweep + 1, max_delta
            );
            break;
        }
    }

    let teams: HashMap<TeamId, TeamStrength> = team_ids
        .iter()
        .map(|&id| {
            let n = *played.get(&id).unwrap_or(&0);
            (
                id,
                TeamStrength {
                    attack: attack[&id],
                    defense: defense[&id],
                    matches_played: n,
                    avg_scored: scored.get(&id).copied().unwrap_or(0.0) / (n.max(1)) as f64,
                    avg_conceded: conceded.get(&id).copied().unwrap_or(0.0) / (n.max(1)) as f64,
                },
            )
        })
        .collect();

    Ok(PartitionFit {
        competition,
        season,
        league_avg_goals: league_avg,
        teams,
        matches_used: finished.len(),
        fitted_at: Utc::now(),
    })
}

fn normalize_mean(values: &mut HashMap<TeamId, f64>, ids: &[TeamId]) {
    if ids.is_empty() {
        return;
    }
    let mean: f64 = ids.iter().map(|id| values[id]).sum::<f64>() / ids.len() as f64;
    if mean > 0.0 {
        for id in ids {
            if let Some(v) = values.get_mut(id) {
                *v /= mean;
            }
        }
    }
}

/// Informe del ajuste de todas las particiones
#[derive(Debug, Clone, Default)]
pub struct FitAllReport {
    pub fitted: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

/// Almacén de parámetros ajustados con predicción por partido
pub struct GoalModelStore {
    cfg: GoalModelConfig,
    fits: RwLock<HashMap<(CompetitionId, Season), PartitionFit>>,
}

impl GoalModelStore {
    pub fn new(cfg: GoalModelConfig) -> Self {
        Self {
            cfg,
            fits: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &GoalModelConfig {
        &self.cfg
    }

    pub fn apply_fit(&self, fit: PartitionFit) {
        self.fits.write().insert((fit.competition, fit.season), fit);
    }

    pub fn strengths(
        &self,
        team: TeamId,
        competition: CompetitionId,
        season: Season,
    ) -> Option<TeamStrength> {
        self.fits
            .read()
            .get(&(competition, season))
            .and_then(|fit| fit.teams.get(&team).copied())
    }

    pub fn league_avg(&self, competition: CompetitionId, season: Season) -> Option<f64> {
        self.fits
            .read()
            .get(&(competition, season))
            .map(|fit| fit.league_avg_goals)
    }

    /// Ajusta una partición leyendo del historial (corte en `as_of`)
    pub fn fit_partition_from(
        &self,
        history: &dyn HistoryProvider,
        competition: CompetitionId,
        season: Season,
        as_of: DateTime<Utc>,
    ) -> EngineResult<usize> {
        let matches = history.competition_matches_before(competition, season, as_of);
        let fit = fit_partition(&self.cfg, competition, season, &matches)?;
        let teams = fit.teams.len();
        self.apply_fit(fit);
        Ok(teams)
    }

    /// Ajusta todas las particiones en paralelo (una tarea bloqueante por
    /// partición). La cancelación se comprueba antes de lanzar cada tarea;
    /// los ajustes ya aplicados se conservan.
    pub async fn fit_all(
        &self,
        history: Arc<dyn HistoryProvider>,
        as_of: DateTime<Utc>,
        cancel: &CancelFlag,
    ) -> anyhow::Result<FitAllReport> {
        let partitions = history.partitions();
        info!("📐 Fitting goal model over {} partitions", partitions.len());

        let mut handles = Vec::new();
        let mut report = FitAllReport::default();
        for (competition, season) in partitions {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let matches = history.competition_matches_before(competition, season, as_of);
            let cfg = self.cfg.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                fit_partition(&cfg, competition, season, &matches)
            }));
        }

        for handle in handles {
            match handle.await? {
                Ok(fit) => {
                    debug!(
                        "Partition {}/{}: {} teams, league avg {:.2}",
                        fit.competition,
                        fit.season,
                        fit.teams.len(),
                        fit.league_avg_goals
                    );
                    self.apply_fit(fit);
                    report.fitted += 1;
                }
                Err(EngineError::DataInsufficient { context }) => {
                    warn!("⏭️ Skipping partition: {}", context);
                    report.skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            "✅ Goal model fit: {} partitions, {} skipped{}",
            report.fitted,
            report.skipped,
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    /// Predice los mercados de goles de un cruce. Falla con datos
    /// insuficientes si alguno de los equipos no tiene parámetros ajustados:
    /// nunca se inventan fuerzas neutras en inferencia.
    pub fn predict_match(
        &self,
        home: TeamId,
        away: TeamId,
        competition: CompetitionId,
        season: Season,
    ) -> EngineResult<GoalMarketProbs> {
        let fits = self.fits.read();
        let fit = fits.get(&(competition, season)).ok_or_else(|| {
            EngineError::data_insufficient(format!(
                "no fitted parameters for partition {}/{}",
                competition, season
            ))
        })?;
        let home_strength = fit.teams.get(&home).ok_or_else(|| {
            EngineError::data_insufficient(format!("no fitted parameters for team {}", home))
        })?;
        let away_strength = fit.teams.get(&away).ok_or_else(|| {
            EngineError::data_insufficient(format!("no fitted parameters for team {}", away))
        })?;

        let model = DixonColesModel::new(&self.cfg, fit.league_avg_goals);
        let (lambda_home, lambda_away) = model.expected_goals(home_strength, away_strength);
        Ok(model.predict(lambda_home, lambda_away))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MatchOdds, MatchStats, MatchStatus};
    use chrono::TimeZone;

    fn model() -> DixonColesModel {
        DixonColesModel::new(&GoalModelConfig::default(), 1.35)
    }

    fn finished(id: i64, day: u32, home: TeamId, away: TeamId, hs: u32, als: u32) -> MatchRecord {
        MatchRecord {
            id,
            competition_id: 1,
            season: 2024,
            matchday: Some(day),
            utc_date: Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap()
                + chrono::Duration::days(day as i64),
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
    fn test_score_matrix_sums_to_one() {
        let matrix = model().score_matrix(1.5, 1.1);
        let total: f64 = matrix.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_tau_boosts_low_draws() {
        let m = model();
        // rho negativo: el 0-0 gana masa frente a la Poisson independiente
        let raw = poisson_pmf(1.2, 0) * poisson_pmf(0.9, 0);
        let corrected = m.score_probability(1.2, 0.9, 0, 0);
        assert!(corrected > raw);
        // y el 1-0 pierde masa
        let raw_10 = poisson_pmf(1.2, 1) * poisson_pmf(0.9, 0);
        assert!(m.score_probability(1.2, 0.9, 1, 0) < raw_10);
    }

    #[test]
    fn test_market_probabilities_consistent() {
        let probs = model().predict(1.6, 1.2);
        assert!((probs.home_win + probs.draw + probs.away_win - 1.0).abs() < 1e-9);
        // Las lineas de over son decrecientes en la línea
        assert!(probs.over_05 >= probs.over_15);
        assert!(probs.over_15 >= probs.over_25);
        assert!(probs.over_25 >= probs.over_35);
        assert!(probs.btts > 0.0 && probs.btts < 1.0);
        assert!((probs.expected_total_goals - 2.8).abs() < 1e-9);
    }

    #[test]
    fn test_home_advantage_shifts_lambdas() {
        let cfg = GoalModelConfig::default();
        let m = DixonColesModel::new(&cfg, 1.35);
        let even = TeamStrength {
            attack: 1.0,
            defense: 1.0,
            matches_played: 10,
            avg_scored: 1.35,
            avg_conceded: 1.35,
        };
        let (lh, la) = m.expected_goals(&even, &even);
        assert!((lh / la - cfg.home_advantage).abs() < 1e-9);
    }

    #[test]
    fn test_fit_requires_min_matches() {
        let cfg = GoalModelConfig::default();
        let matches: Vec<MatchRecord> = (0..5)
            .map(|i| finished(i, i as u32 + 1, 10 + i, 20 + i, 1, 1))
            .collect();
        let err = fit_partition(&cfg, 1, 2024, &matches).unwrap_err();
        assert!(matches!(err, EngineError::DataInsufficient { .. }));
    }

    #[test]
    fn test_fit_separates_strong_and_weak() {
        let cfg = GoalModelConfig::default();
        // Equipo 1 golea a todos; equipo 4 pierde siempre
        let mut matches = Vec::new();
        let mut id = 0;
        for round in 0..3u32 {
            for (home, away, hs, als) in [
                (1, 2, 3, 0),
                (1, 3, 4, 1),
                (4, 1, 0, 3),
                (2, 4, 2, 0),
                (3, 4, 2, 1),
                (2, 3, 1, 1),
            ] {
                id += 1;
                matches.push(finished(id, round * 7 + id as u32 % 7 + 1, home, away, hs, als));
            }
        }
        let fit = fit_partition(&cfg, 1, 2024, &matches).unwrap();
        let strong = fit.teams[&1];
        let weak = fit.teams[&4];
        assert!(strong.attack > weak.attack);
        assert!(strong.defense < weak.defense);
        // Suelo respetado
        for s in fit.teams.values() {
            assert!(s.attack >= cfg.strength_floor);
            assert!(s.defense >= cfg.strength_floor);
        }
    }

    #[test]
    fn test_predict_match_requires_fit() {
        let store = GoalModelStore::new(GoalModelConfig::default());
        let err = store.predict_match(1, 2, 1, 2024).unwrap_err();
        assert!(matches!(err, EngineError::DataInsufficient { .. }));
    }

    #[test]
    fn test_store_predicts_after_fit() {
        let cfg = GoalModelConfig::default();
        let store = GoalModelStore::new(cfg.clone());
        let matches: Vec<MatchRecord> = (0..12)
            .map(|i| finished(i, i as u32 + 1, 1 + (i % 4), 1 + ((i + 1) % 4), 2, 1))
            .collect();
        let fit = fit_partition(&cfg, 1, 2024, &matches).unwrap();
        store.apply_fit(fit);

        let probs = store.predict_match(1, 2, 1, 2024).unwrap();
        assert!((probs.home_win + probs.draw + probs.away_win - 1.0).abs() < 1e-9);
        assert!(probs.lambda_home > 0.0 && probs.lambda_away > 0.0);
    }

    #[test]
    fn test_fit_all_respects_cancellation() {
        use crate::history::MatchHistory;
        use crate::types::CancelFlag;
        use std::sync::Arc;

        let history = Arc::new(MatchHistory::new());
        history.upsert_all((0..12).map(|i| finished(i, i as u32 + 1, 1 + (i % 4), 1 + ((i + 1) % 4), 2, 1)));

        let store = GoalModelStore::new(GoalModelConfig::default());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let history_dyn: Arc<dyn crate::history::HistoryProvider> = history;
        let as_of = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let report =
            tokio_test::block_on(store.fit_all(history_dyn, as_of, &cancel)).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.fitted, 0);
    }
}
