//! Ensamblador de predicciones
//!
//! Combina el lado ML con el modelo estadístico de goles por mercado, con
//! pesos configurables. Si el modelo estadístico no cubre el cruce, degrada
//! a solo-ML con confianza reducida en vez de fallar.

use crate::config::EnsembleConfig;
use crate::goal_model::GoalMarketProbs;
use crate::ml::MlPrediction;
use crate::types::{MarketKind, MatchId, MatchResult};
use crate::value::ValueBet;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Cómo se produjo la predicción
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionMethod {
    /// ML + modelo estadístico combinados
    Ensemble,
    /// Solo ML (el modelo estadístico no cubría el cruce)
    MlOnly,
}

impl PredictionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionMethod::Ensemble => "ensemble",
            PredictionMethod::MlOnly => "ml_only",
        }
    }
}

/// Tripleta 1X2 normalizada
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResultProbs {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

impl ResultProbs {
    pub fn new(home: f64, draw: f64, away: f64) -> Self {
        let total = home + draw + away;
        if total > 0.0 {
            Self {
                home: home / total,
                draw: draw / total,
                away: away / total,
            }
        } else {
            Self {
                home: 1.0 / 3.0,
                draw: 1.0 / 3.0,
                away: 1.0 / 3.0,
            }
        }
    }

    pub fn most_likely(&self) -> MatchResult {
        if self.home >= self.draw && self.home >= self.away {
            MatchResult::Home
        } else if self.away >= self.draw {
            MatchResult::Away
        } else {
            MatchResult::Draw
        }
    }

    pub fn max_prob(&self) -> f64 {
        self.home.max(self.draw).max(self.away)
    }

    pub fn prob_of(&self, result: MatchResult) -> f64 {
        match result {
            MatchResult::Home => self.home,
            MatchResult::Draw => self.draw,
            MatchResult::Away => self.away,
        }
    }
}

/// Mercado omitido en una predicción, con el motivo
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSkip {
    pub market: MarketKind,
    pub reason: String,
}

/// Predicción completa de un partido
#[derive(Debug, Clone, PartialEq)]
pub struct MatchPrediction {
    pub match_id: MatchId,
    pub method: PredictionMethod,
    /// Confianza 0-100 derivada del acuerdo entre modelos
    pub confidence: u8,
    pub result: ResultProbs,
    pub over25: f64,
    /// Solo disponible con el modelo estadístico
    pub over35: Option<f64>,
    pub btts: f64,
    /// Goles esperados (local, visitante) del modelo estadístico
    pub expected_goals: Option<(f64, f64)>,
    pub over95_corners: Option<f64>,
    pub over105_corners: Option<f64>,
    pub total_corners: Option<f64>,
    pub total_shots: Option<f64>,
    pub total_shots_on_target: Option<f64>,
    pub skipped: Vec<MarketSkip>,
    pub value_bets: Vec<ValueBet>,
}

/// Confianza 0-100 a partir del acuerdo entre los dos lados del ensemble.
///
/// Base 50 si ambos señalan el mismo resultado (30 si no), más un bono por
/// probabilidad máxima media y otro por cercanía de las distribuciones.
pub fn agreement_confidence(ml: &ResultProbs, statistical: &ResultProbs) -> u8 {
    let mut confidence: i32 = if ml.most_likely() == statistical.most_likely() {
        50
    } else {
        30
    };

    let avg_max = (ml.max_prob() + statistical.max_prob()) / 2.0;
    if avg_max > 0.5 {
        confidence += (((avg_max - 0.5) * 60.0) as i32).min(30);
    }

    let avg_diff = ((ml.home - statistical.home).abs()
        + (ml.draw - statistical.draw).abs()
        + (ml.away - statistical.away).abs())
        / 3.0;
    if avg_diff < 0.10 {
        confidence += 20;
    } else if avg_diff < 0.20 {
        confidence += 10;
    }

    confidence.clamp(0, 100) as u8
}

/// Busca el peso ML del mercado 1X2 que maximiza la log-verosimilitud de
/// resultados observados. Cada muestra es (probs ML, probs estadísticas,
/// resultado real).
pub fn calibrate_result_weight(samples: &[(ResultProbs, ResultProbs, MatchResult)]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut best: Option<(f64, f64)> = None;
    let mut w = 0.0;
    while w <= 1.0 + 1e-9 {
        let mut log_likelihood = 0.0;
        for (ml, stat, actual) in samples {
            let p = w * ml.prob_of(*actual) + (1.0 - w) * stat.prob_of(*actual);
            log_likelihood += p.max(1e-9).ln();
        }
        match best {
            Some((_, best_ll)) if best_ll >= log_likelihood => {}
            _ => best = Some((w, log_likelihood)),
        }
        w += 0.05;
    }
    best.map(|(w, _)| w)
}

/// Combinador de los dos lados del motor
pub struct PredictionEnsembler {
    cfg: EnsembleConfig,
}

impl PredictionEnsembler {
    pub fn new(cfg: EnsembleConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.cfg
    }

    /// Reajusta el peso 1X2 con resultados observados
    pub fn fit_result_weight(
        &mut self,
        samples: &[(ResultProbs, ResultProbs, MatchResult)],
    ) -> Option<f64> {
        let weight = calibrate_result_weight(samples)?;
        debug!(
            "Result weight recalibrated: {:.2} -> {:.2} ({} samples)",
            self.cfg.result_ml_weight,
            weight,
            samples.len()
        );
        self.cfg.result_ml_weight = weight;
        Some(weight)
    }

    /// Combina los dos lados en una predicción completa
    pub fn combine(
        &self,
        match_id: MatchId,
        ml: &MlPrediction,
        statistical: Option<&GoalMarketProbs>,
    ) -> MatchPrediction {
        let ml_result = ResultProbs::new(ml.result.0, ml.result.1, ml.result.2);
        let mut skipped = Vec::new();

        let (method, confidence, result, over25, over35, btts, expected_goals) = match statistical
        {
            Some(stat) => {
                let stat_result = ResultProbs::new(stat.home_win, stat.draw, stat.away_win);
                let w = self.cfg.result_ml_weight;
                let result = ResultProbs::new(
                    w * ml_result.home + (1.0 - w) * stat_result.home,
                    w * ml_result.draw + (1.0 - w) * stat_result.draw,
                    w * ml_result.away + (1.0 - w) * stat_result.away,
                );
                let w_over = self.cfg.over25_ml_weight;
                let over25 = w_over * ml.over25 + (1.0 - w_over) * stat.over_25;
                let w_btts = self.cfg.btts_ml_weight;
                let btts = w_btts * ml.btts + (1.0 - w_btts) * stat.btts;
                let confidence = agreement_confidence(&ml_result, &stat_result);
                (
                    PredictionMethod::Ensemble,
                    confidence,
                    result,
                    over25,
                    Some(stat.over_35),
                    btts,
                    Some((stat.lambda_home, stat.lambda_away)),
                )
            }
            None => {
                skipped.push(MarketSkip {
                    market: MarketKind::Over35,
                    reason: "statistical goal model unavailable".to_string(),
                });
                (
                    PredictionMethod::MlOnly,
                    self.cfg.ml_only_confidence,
                    ml_result,
                    ml.over25,
                    None,
                    ml.btts,
                    None,
                )
            }
        };

        for (market, present) in [
            (MarketKind::Over95Corners, ml.over95_corners.is_some()),
            (MarketKind::Over105Corners, ml.over105_corners.is_some()),
            (MarketKind::TotalCorners, ml.total_corners.is_some()),
            (MarketKind::TotalShots, ml.total_shots.is_some()),
            (
                MarketKind::TotalShotsOnTarget,
                ml.total_shots_on_target.is_some(),
            ),
        ] {
            if !present {
                skipped.push(MarketSkip {
                    market,
                    reason: "model not trained for this market".to_string(),
                });
            }
        }

        debug!(
            "🎯 Match {}: {} conf={} result=({:.2}/{:.2}/{:.2})",
            match_id,
            method.as_str(),
            confidence,
            result.home,
            result.draw,
            result.away
        );

        MatchPrediction {
            match_id,
            method,
            confidence,
            result,
            over25,
            over35,
            btts,
            expected_goals,
            over95_corners: ml.over95_corners,
            over105_corners: ml.over105_corners,
            total_corners: ml.total_corners,
            total_shots: ml.total_shots,
            total_shots_on_target: ml.total_shots_on_target,
            skipped,
            value_bets: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ml_prediction(result: (f64, f64, f64)) -> MlPrediction {
        MlPrediction {
            result,
            over25: 0.6,
            btts: 0.5,
            over95_corners: None,
            over105_corners: None,
            total_corners: None,
            total_shots: None,
            total_shots_on_target: None,
        }
    }

    fn statistical(home: f64, draw: f64, away: f64, over25: f64, btts: f64) -> GoalMarketProbs {
        GoalMarketProbs {
            home_win: home,
            draw,
            away_win: away,
            over_05: 0.95,
            over_15: 0.8,
            over_25: over25,
            over_35: 0.3,
            btts,
            expected_total_goals: 2.7,
            lambda_home: 1.6,
            lambda_away: 1.1,
        }
    }

    #[test]
    fn test_result_probs_normalized_and_argmax() {
        let probs = ResultProbs::new(2.0, 1.0, 1.0);
        assert!((probs.home + probs.draw + probs.away - 1.0).abs() < 1e-12);
        assert_eq!(probs.most_likely(), MatchResult::Home);
        assert!((probs.max_prob() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_ensemble_weighting() {
        let ensembler = PredictionEnsembler::new(EnsembleConfig::default());
        let ml = ml_prediction((0.6, 0.25, 0.15));
        let stat = statistical(0.5, 0.3, 0.2, 0.5, 0.4);
        let prediction = ensembler.combine(1, &ml, Some(&stat));

        assert_eq!(prediction.method, PredictionMethod::Ensemble);
        // 0.7 * 0.6 + 0.3 * 0.5 = 0.57 antes de renormalizar (ya suma 1)
        assert!((prediction.result.home - 0.57).abs() < 1e-9);
        // over25 a partes iguales: (0.6 + 0.5) / 2
        assert!((prediction.over25 - 0.55).abs() < 1e-9);
        assert!((prediction.btts - 0.45).abs() < 1e-9);
        assert_eq!(prediction.over35, Some(0.3));
        assert_eq!(prediction.expected_goals, Some((1.6, 1.1)));
        assert!((prediction.result.home + prediction.result.draw + prediction.result.away - 1.0)
            .abs()
            < 1e-9);
    }

    #[test]
    fn test_ml_only_degradation() {
        let cfg = EnsembleConfig::default();
        let expected_conf = cfg.ml_only_confidence;
        let ensembler = PredictionEnsembler::new(cfg);
        let ml = ml_prediction((0.6, 0.25, 0.15));
        let prediction = ensembler.combine(7, &ml, None);

        assert_eq!(prediction.method, PredictionMethod::MlOnly);
        assert_eq!(prediction.confidence, expected_conf);
        assert!(prediction.over35.is_none());
        assert!(prediction
            .skipped
            .iter()
            .any(|s| s.market == MarketKind::Over35));
        // Mercados de conteo sin modelo quedan registrados como omitidos
        assert!(prediction
            .skipped
            .iter()
            .any(|s| s.market == MarketKind::TotalCorners));
    }

    #[test]
    fn test_confidence_agreement_bands() {
        // Acuerdo fuerte y distribuciones casi idénticas
        let a = ResultProbs::new(0.62, 0.23, 0.15);
        let b = ResultProbs::new(0.60, 0.25, 0.15);
        let high = agreement_confidence(&a, &b);
        // 50 + min(30, (0.61-0.5)*60=6) + 20 = 76
        assert_eq!(high, 76);

        // Desacuerdo sobre el ganador
        let c = ResultProbs::new(0.30, 0.25, 0.45);
        let low = agreement_confidence(&a, &c);
        assert!(low < high);
        assert!(low >= 30);
    }

    #[test]
    fn test_confidence_clamped() {
        let certain = ResultProbs::new(0.97, 0.02, 0.01);
        let conf = agreement_confidence(&certain, &certain);
        assert_eq!(conf, 100);
    }

    #[test]
    fn test_calibrate_result_weight_prefers_better_side() {
        // El lado estadístico siempre acierta; el ML siempre se equivoca
        let ml = ResultProbs::new(0.2, 0.2, 0.6);
        let stat = ResultProbs::new(0.7, 0.2, 0.1);
        let samples: Vec<_> = (0..30)
            .map(|_| (ml, stat, MatchResult::Home))
            .collect();
        let weight = calibrate_result_weight(&samples).unwrap();
        assert!(weight < 0.1);
    }
}
