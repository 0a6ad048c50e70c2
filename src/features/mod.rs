//! Ingeniería de features para los modelos ML
//!
//! Todo se calcula con lecturas estrictamente anteriores al pitido inicial
//! ([`HistoryProvider`] lo garantiza y el Elo aplica su propia guarda), así
//! el mismo código sirve para entrenar y para inferir sin fugas temporales.
//! Los equipos sin historial reciben valores neutros en vez de fallar.

use crate::config::FeatureConfig;
use crate::elo::{expected_score, EloEngine};
use crate::history::HistoryProvider;
use crate::types::{MatchRecord, TeamId};
use chrono::{DateTime, Utc};

/// Vector de features con orden fijo.
///
/// El orden de `feature_names()` y `to_vec()` es el esquema del artefacto de
/// modelos: cambiarlo invalida los artefactos guardados.
#[derive(Debug, Clone, Default)]
pub struct MatchFeatures {
    // Forma reciente (ventana form_window, cualquier estadio)
    pub home_avg_points: f64,
    pub home_avg_goals_for: f64,
    pub home_avg_goals_against: f64,
    pub home_win_rate: f64,
    pub away_avg_points: f64,
    pub away_avg_goals_for: f64,
    pub away_avg_goals_against: f64,
    pub away_win_rate: f64,

    // Forma ultra-reciente (ventana short_window)
    pub home_recent_points: f64,
    pub home_recent_goals_for: f64,
    pub home_recent_goals_against: f64,
    pub away_recent_points: f64,
    pub away_recent_goals_for: f64,
    pub away_recent_goals_against: f64,

    // Momentum por puntos: últimos 3 menos los 3 anteriores
    pub home_momentum: f64,
    pub away_momentum: f64,
    pub momentum_diff: f64,

    // Forma por estadio (local en casa, visitante fuera)
    pub home_home_ppg: f64,
    pub home_home_goals_for: f64,
    pub home_home_win_rate: f64,
    pub away_away_ppg: f64,
    pub away_away_goals_for: f64,
    pub away_away_win_rate: f64,

    // Splits de temporada por estadio
    pub home_season_home_ppg: f64,
    pub home_season_home_goals_for: f64,
    pub home_season_home_goals_against: f64,
    pub home_season_clean_sheet_rate: f64,
    pub home_season_btts_rate: f64,
    pub away_season_away_ppg: f64,
    pub away_season_away_goals_for: f64,
    pub away_season_away_goals_against: f64,
    pub away_season_clean_sheet_rate: f64,
    pub away_season_btts_rate: f64,

    // Enfrentamientos directos
    pub h2h_matches: f64,
    pub h2h_home_win_rate: f64,
    pub h2h_btts_rate: f64,
    pub h2h_over25_rate: f64,

    // Eficiencia ofensiva (tiros y córners)
    pub home_avg_corners: f64,
    pub away_avg_corners: f64,
    pub home_avg_shots: f64,
    pub away_avg_shots: f64,
    pub home_shot_accuracy: f64,
    pub away_shot_accuracy: f64,

    // Ratings Elo (persistente y estacional)
    pub home_elo: f64,
    pub away_elo: f64,
    pub elo_diff: f64,
    pub elo_expected_home: f64,
    pub home_elo_momentum: f64,
    pub away_elo_momentum: f64,
    pub home_seasonal_elo: f64,
    pub away_seasonal_elo: f64,

    // Interacciones
    pub attack_vs_defense: f64,
    pub defense_vs_attack: f64,
    pub form_diff: f64,
    pub quality_ratio: f64,
    pub total_goals_expectation: f64,
    pub btts_signal: f64,
    pub over25_signal: f64,
}

impl MatchFeatures {
    pub const NUM_FEATURES: usize = 58;

    /// Convertir a vector para los modelos (mismo orden que feature_names)
    pub fn to_vec(&self) -> Vec<f64> {
        vec![
            self.home_avg_points,
            self.home_avg_goals_for,
            self.home_avg_goals_against,
            self.home_win_rate,
            self.away_avg_points,
            self.away_avg_goals_for,
            self.away_avg_goals_against,
            self.away_win_rate,
            self.home_recent_points,
            self.home_recent_goals_for,
            self.home_recent_goals_against,
            self.away_recent_points,
            self.away_recent_goals_for,
            self.away_recent_goals_against,
            self.home_momentum,
            self.away_momentum,
            self.momentum_diff,
            self.home_home_ppg,
            self.home_home_goals_for,
            self.home_home_win_rate,
            self.away_away_ppg,
            self.away_away_goals_for,
            self.away_away_win_rate,
            self.home_season_home_ppg,
            self.home_season_home_goals_for,
            self.home_season_home_goals_against,
            self.home_season_clean_sheet_rate,
            self.home_season_btts_rate,
            self.away_season_away_ppg,
            self.away_season_away_goals_for,
            self.away_season_away_goals_against,
            self.away_season_clean_sheet_rate,
            self.away_season_btts_rate,
            self.h2h_matches,
            self.h2h_home_win_rate,
            self.h2h_btts_rate,
            self.h2h_over25_rate,
            self.home_avg_corners,
            self.away_avg_corners,
            self.home_avg_shots,
            self.away_avg_shots,
            self.home_shot_accuracy,
            self.away_shot_accuracy,
            self.home_elo,
            self.away_elo,
            self.elo_diff,
            self.elo_expected_home,
            self.home_elo_momentum,
            self.away_elo_momentum,
            self.home_seasonal_elo,
            self.away_seasonal_elo,
            self.attack_vs_defense,
            self.defense_vs_attack,
            self.form_diff,
            self.quality_ratio,
            self.total_goals_expectation,
            self.btts_signal,
            self.over25_signal,
        ]
    }

    /// Nombres de las features (esquema del artefacto e importancia)
    pub fn feature_names() -> Vec<&'static str> {
        vec![
            "home_avg_points",
            "home_avg_goals_for",
            "home_avg_goals_against",
            "home_win_rate",
            "away_avg_points",
            "away_avg_goals_for",
            "away_avg_goals_against",
            "away_win_rate",
            "home_recent_points",
            "home_recent_goals_for",
            "home_recent_goals_against",
            "away_recent_points",
            "away_recent_goals_for",
            "away_recent_goals_against",
            "home_momentum",
            "away_momentum",
            "momentum_diff",
            "home_home_ppg",
            "home_home_goals_for",
            "home_home_win_rate",
            "away_away_ppg",
            "away_away_goals_for",
            "away_away_win_rate",
            "home_season_home_ppg",
            "home_season_home_goals_for",
            "home_season_home_goals_against",
            "home_season_clean_sheet_rate",
            "home_season_btts_rate",
            "away_season_away_ppg",
            "away_season_away_goals_for",
            "away_season_away_goals_against",
            "away_season_clean_sheet_rate",
            "away_season_btts_rate",
            "h2h_matches",
            "h2h_home_win_rate",
            "h2h_btts_rate",
            "h2h_over25_rate",
            "home_avg_corners",
            "away_avg_corners",
            "home_avg_shots",
            "away_avg_shots",
            "home_shot_accuracy",
            "away_shot_accuracy",
            "home_elo",
            "away_elo",
            "elo_diff",
            "elo_expected_home",
            "home_elo_momentum",
            "away_elo_momentum",
            "home_seasonal_elo",
            "away_seasonal_elo",
            "attack_vs_defense",
            "defense_vs_attack",
            "form_diff",
            "quality_ratio",
            "total_goals_expectation",
            "btts_signal",
            "over25_signal",
        ]
    }
}

/// Resumen de forma sobre una ventana de partidos
#[derive(Debug, Clone, Copy, Default)]
struct FormSummary {
    matches: usize,
    avg_points: f64,
    avg_goals_for: f64,
    avg_goals_against: f64,
    win_rate: f64,
}

fn summarize_form(team: TeamId, matches: &[MatchRecord]) -> FormSummary {
    if matches.is_empty() {
        return FormSummary::default();
    }
    let mut points = 0u32;
    let mut gf = 0u32;
    let mut ga = 0u32;
    let mut wins = 0usize;
    for m in matches {
        if let Some((f, a)) = m.goals_for_against(team) {
            gf += f;
            ga += a;
            if f > a {
                wins += 1;
            }
        }
        points += m.points_for(team).unwrap_or(0);
    }
    let n = matches.len() as f64;
    FormSummary {
        matches: matches.len(),
        avg_points: points as f64 / n,
        avg_goals_for: gf as f64 / n,
        avg_goals_against: ga as f64 / n,
        win_rate: wins as f64 / n,
    }
}

/// Split de temporada por estadio
#[derive(Debug, Clone, Copy, Default)]
struct SeasonVenueSplit {
    ppg: f64,
    avg_goals_for: f64,
    avg_goals_against: f64,
    clean_sheet_rate: f64,
    btts_rate: f64,
    over25_rate: f64,
}

fn summarize_season_venue(team: TeamId, matches: &[MatchRecord], home: bool) -> SeasonVenueSplit {
    let venue: Vec<&MatchRecord> = matches
        .iter()
        .filter(|m| if home { m.home_team == team } else { m.away_team == team })
        .collect();
    if venue.is_empty() {
        return SeasonVenueSplit::default();
    }
    let mut points = 0u32;
    let mut gf = 0u32;
    let mut ga = 0u32;
    let mut clean_sheets = 0usize;
    let mut btts = 0usize;
    let mut over25 = 0usize;
    for m in &venue {
        if let Some((f, a)) = m.goals_for_against(team) {
            gf += f;
            ga += a;
            if a == 0 {
                clean_sheets += 1;
            }
        }
        points += m.points_for(team).unwrap_or(0);
        if m.both_teams_scored() == Some(true) {
            btts += 1;
        }
        if m.total_goals().map(|g| g > 2).unwrap_or(false) {
            over25 += 1;
        }
    }
    let n = venue.len() as f64;
    SeasonVenueSplit {
        ppg: points as f64 / n,
        avg_goals_for: gf as f64 / n,
        avg_goals_against: ga as f64 / n,
        clean_sheet_rate: clean_sheets as f64 / n,
        btts_rate: btts as f64 / n,
        over25_rate: over25 as f64 / n,
    }
}

/// Eficiencia ofensiva media sobre la ventana de forma
#[derive(Debug, Clone, Copy, Default)]
struct EfficiencySummary {
    avg_corners: f64,
    avg_shots: f64,
    shot_accuracy: f64,
}

fn summarize_efficiency(team: TeamId, matches: &[MatchRecord]) -> EfficiencySummary {
    let mut corners = 0u32;
    let mut corner_n = 0usize;
    let mut shots = 0u32;
    let mut on_target = 0u32;
    let mut shot_n = 0usize;
    for m in matches {
        let is_home = m.home_team == team;
        let c = if is_home { m.stats.corners_home } else { m.stats.corners_away };
        if let Some(c) = c {
            corners += c;
            corner_n += 1;
        }
        let s = if is_home { m.stats.shots_home } else { m.stats.shots_away };
        let sot = if is_home {
            m.stats.shots_on_target_home
        } else {
            m.stats.shots_on_target_away
        };
        if let (Some(s), Some(sot)) = (s, sot) {
            shots += s;
            on_target += sot;
            shot_n += 1;
        }
    }
    EfficiencySummary {
        avg_corners: if corner_n > 0 { corners as f64 / corner_n as f64 } else { 0.0 },
        avg_shots: if shot_n > 0 { shots as f64 / shot_n as f64 } else { 0.0 },
        shot_accuracy: if shots > 0 { on_target as f64 / shots as f64 } else { 0.0 },
    }
}

/// Momentum por puntos: suma de los últimos `half` menos los `half`
/// anteriores (0 si no hay 2*half partidos). `matches` viene descendente.
fn points_momentum(team: TeamId, matches: &[MatchRecord], half: usize) -> f64 {
    if matches.len() < half * 2 {
        return 0.0;
    }
    let recent: u32 = matches[..half]
        .iter()
        .filter_map(|m| m.points_for(team))
        .sum();
    let previous: u32 = matches[half..half * 2]
        .iter()
        .filter_map(|m| m.points_for(team))
        .sum();
    recent as f64 - previous as f64
}

/// Calculadora de features de partido
pub struct FeatureEngineer {
    cfg: FeatureConfig,
}

impl FeatureEngineer {
    pub fn new(cfg: FeatureConfig) -> Self {
        Self { cfg }
    }

    /// Calcula el vector completo para un partido con corte en su kickoff.
    /// Para entrenamiento el corte es el kickoff histórico; para inferencia
    /// es el kickoff programado.
    pub fn compute(
        &self,
        history: &dyn HistoryProvider,
        elo: &EloEngine,
        record: &MatchRecord,
    ) -> MatchFeatures {
        self.compute_as_of(history, elo, record, record.utc_date)
    }

    pub fn compute_as_of(
        &self,
        history: &dyn HistoryProvider,
        elo: &EloEngine,
        record: &MatchRecord,
        as_of: DateTime<Utc>,
    ) -> MatchFeatures {
        let home = record.home_team;
        let away = record.away_team;

        // Ventana ampliada para poder calcular el momentum (2x short_window)
        let lookback = self.cfg.form_window.max(self.cfg.short_window * 2);
        let home_recent = history.recent_team_matches(home, as_of, lookback);
        let away_recent = history.recent_team_matches(away, as_of, lookback);

        let home_form =
            summarize_form(home, &home_recent[..home_recent.len().min(self.cfg.form_window)]);
        let away_form =
            summarize_form(away, &away_recent[..away_recent.len().min(self.cfg.form_window)]);
        let home_short =
            summarize_form(home, &home_recent[..home_recent.len().min(self.cfg.short_window)]);
        let away_short =
            summarize_form(away, &away_recent[..away_recent.len().min(self.cfg.short_window)]);

        let home_momentum = points_momentum(home, &home_recent, self.cfg.short_window);
        let away_momentum = points_momentum(away, &away_recent, self.cfg.short_window);

        let home_venue = history.recent_venue_matches(home, true, as_of, self.cfg.venue_window);
        let away_venue = history.recent_venue_matches(away, false, as_of, self.cfg.venue_window);
        let home_venue_form = summarize_form(home, &home_venue);
        let away_venue_form = summarize_form(away, &away_venue);

        let home_season =
            history.team_season_matches(home, record.competition_id, record.season, as_of);
        let away_season =
            history.team_season_matches(away, record.competition_id, record.season, as_of);
        let home_split = summarize_season_venue(home, &home_season, true);
        let away_split = summarize_season_venue(away, &away_season, false);

        let h2h = history.head_to_head(home, away, as_of, self.cfg.h2h_window);
        let (h2h_home_win_rate, h2h_btts_rate, h2h_over25_rate) = if h2h.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let n = h2h.len() as f64;
            let home_wins = h2h
                .iter()
                .filter_map(|m| m.goals_for_against(home))
                .filter(|(f, a)| f > a)
                .count() as f64;
            let btts = h2h
                .iter()
                .filter(|m| m.both_teams_scored() == Some(true))
                .count() as f64;
            let over25 = h2h
                .iter()
                .filter(|m| m.total_goals().map(|g| g > 2).unwrap_or(false))
                .count() as f64;
            (home_wins / n, btts / n, over25 / n)
        };

        let home_eff = summarize_efficiency(home, &home_recent);
        let away_eff = summarize_efficiency(away, &away_recent);

        // Elo con guarda temporal: filas que ya incluyen el corte se
        // sustituyen por el rating inicial neutro
        let elo_cfg = elo.config();
        let initial = elo_cfg.initial_rating;
        let home_persistent = elo.rating_before(home, record.competition_id, None, as_of);
        let away_persistent = elo.rating_before(away, record.competition_id, None, as_of);
        let home_seasonal =
            elo.rating_before(home, record.competition_id, Some(record.season), as_of);
        let away_seasonal =
            elo.rating_before(away, record.competition_id, Some(record.season), as_of);

        let home_elo = home_persistent.as_ref().map(|s| s.rating).unwrap_or(initial);
        let away_elo = away_persistent.as_ref().map(|s| s.rating).unwrap_or(initial);
        let home_elo_momentum = home_persistent.as_ref().map(|s| s.momentum()).unwrap_or(0.0);
        let away_elo_momentum = away_persistent.as_ref().map(|s| s.momentum()).unwrap_or(0.0);

        let form_diff = home_form.avg_points - away_form.avg_points;
        let total_goals_expectation = (home_form.avg_goals_for
            + away_form.avg_goals_for
            + home_form.avg_goals_against
            + away_form.avg_goals_against)
            / 2.0;

        MatchFeatures {
            home_avg_points: home_form.avg_points,
            home_avg_goals_for: home_form.avg_goals_for,
            home_avg_goals_against: home_form.avg_goals_against,
            home_win_rate: home_form.win_rate,
            away_avg_points: away_form.avg_points,
            away_avg_goals_for: away_form.avg_goals_for,
            away_avg_goals_against: away_form.avg_goals_against,
            away_win_rate: away_form.win_rate,

            home_recent_points: home_short.avg_points * home_short.matches as f64,
            home_recent_goals_for: home_short.avg_goals_for,
            home_recent_goals_against: home_short.avg_goals_against,
            away_recent_points: away_short.avg_points * away_short.matches as f64,
            away_recent_goals_for: away_short.avg_goals_for,
            away_recent_goals_against: away_short.avg_goals_against,

            home_momentum,
            away_momentum,
            momentum_diff: home_momentum - away_momentum,

            home_home_ppg: home_venue_form.avg_points,
            home_home_goals_for: home_venue_form.avg_goals_for,
            home_home_win_rate: home_venue_form.win_rate,
            away_away_ppg: away_venue_form.avg_points,
            away_away_goals_for: away_venue_form.avg_goals_for,
            away_away_win_rate: away_venue_form.win_rate,

            home_season_home_ppg: home_split.ppg,
            home_season_home_goals_for: home_split.avg_goals_for,
            home_season_home_goals_against: home_split.avg_goals_against,
            home_season_clean_sheet_rate: home_split.clean_sheet_rate,
            home_season_btts_rate: home_split.btts_rate,
            away_season_away_ppg: away_split.ppg,
            away_season_away_goals_for: away_split.avg_goals_for,
            away_season_away_goals_against: away_split.avg_goals_against,
            away_season_clean_sheet_rate: away_split.clean_sheet_rate,
            away_season_btts_rate: away_split.btts_rate,

            h2h_matches: h2h.len() as f64,
            h2h_home_win_rate,
            h2h_btts_rate,
            h2h_over25_rate,

            home_avg_corners: home_eff.avg_corners,
            away_avg_corners: away_eff.avg_corners,
            home_avg_shots: home_eff.avg_shots,
            away_avg_shots: away_eff.avg_shots,
            home_shot_accuracy: home_eff.shot_accuracy,
            away_shot_accuracy: away_eff.shot_accuracy,

            home_elo,
            away_elo,
            elo_diff: home_elo - away_elo,
            elo_expected_home: expected_score(home_elo, away_elo, elo_cfg.home_advantage),
            home_elo_momentum,
            away_elo_momentum,
            home_seasonal_elo: home_seasonal.map(|s| s.rating).unwrap_or(initial),
            away_seasonal_elo: away_seasonal.map(|s| s.rating).unwrap_or(initial),

            attack_vs_defense: home_form.avg_goals_for * away_form.avg_goals_against,
            defense_vs_attack: away_form.avg_goals_for * home_form.avg_goals_against,
            form_diff,
            // Ratio PPG local/visitante con suelo para detectar desajustes
            quality_ratio: home_split.ppg.max(0.01) / away_split.ppg.max(0.01),
            total_goals_expectation,
            // Probabilidades combinadas de tendencia de mercado
            btts_signal: home_split.btts_rate * away_split.btts_rate,
            over25_signal: home_split.over25_rate * away_split.over25_rate,
        }
    }
}
