//! Detección de apuestas de valor
//!
//! Compara las probabilidades del motor contra las implícitas en las cuotas
//! del mercado. En el 1X2 se elimina primero el margen de la casa
//! normalizando la tripleta implícita; el edge se calcula sobre la
//! probabilidad sin margen.

use crate::config::ValueBetConfig;
use crate::ensemble::{MarketSkip, MatchPrediction};
use crate::error::{EngineError, EngineResult};
use crate::types::{MarketKind, MatchOdds};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Calificación del edge encontrado
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BetGrade {
    APlus,
    A,
    B,
    C,
    D,
    F,
}

impl BetGrade {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetGrade::APlus => "A+",
            BetGrade::A => "A",
            BetGrade::B => "B",
            BetGrade::C => "C",
            BetGrade::D => "D",
            BetGrade::F => "F",
        }
    }
}

impl fmt::Display for BetGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Califica un edge con umbrales estrictos
pub fn grade_edge(edge: f64) -> BetGrade {
    if edge > 0.10 {
        BetGrade::APlus
    } else if edge > 0.07 {
        BetGrade::A
    } else if edge > 0.05 {
        BetGrade::B
    } else if edge > 0.03 {
        BetGrade::C
    } else if edge > 0.02 {
        BetGrade::D
    } else {
        BetGrade::F
    }
}

/// Probabilidad implícita de una cuota decimal
pub fn implied_probability(market: MarketKind, odds: f64) -> EngineResult<f64> {
    if !odds.is_finite() || odds < 1.0 {
        return Err(EngineError::InvalidOdds {
            market,
            reason: format!("decimal odds must be >= 1.0, got {odds}"),
        });
    }
    Ok(1.0 / odds)
}

/// Kelly fraccional: f = (b·p − q) / b escalado por la fracción configurada.
/// Devuelve 0 cuando el edge no es positivo.
pub fn fractional_kelly(model_prob: f64, odds: f64, fraction: f64, cap: f64) -> f64 {
    let b = odds - 1.0;
    if b <= 0.0 {
        return 0.0;
    }
    let q = 1.0 - model_prob;
    let full = (b * model_prob - q) / b;
    if full <= 0.0 {
        return 0.0;
    }
    (full * fraction).min(cap)
}

/// Apuesta de valor detectada
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueBet {
    pub market: MarketKind,
    /// Selección dentro del mercado ("home", "over_25", "btts_yes"...)
    pub outcome: String,
    pub odds: f64,
    pub model_prob: f64,
    /// Probabilidad implícita ya sin margen cuando el mercado lo permite
    pub implied_prob: f64,
    pub edge: f64,
    pub grade: BetGrade,
    /// Fracción del bankroll sugerida (Kelly fraccional con tope)
    pub stake_fraction: f64,
    /// Valor esperado por unidad apostada
    pub expected_value: f64,
}

/// Detector de valor sobre una predicción completa
pub struct ValueBetDetector {
    cfg: ValueBetConfig,
}

impl ValueBetDetector {
    pub fn new(cfg: ValueBetConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &ValueBetConfig {
        &self.cfg
    }

    /// Evalúa todos los mercados con cuota disponible. Una cuota inválida
    /// descarta solo su mercado y lo deja anotado como omitido.
    pub fn detect(
        &self,
        prediction: &MatchPrediction,
        odds: &MatchOdds,
    ) -> (Vec<ValueBet>, Vec<MarketSkip>) {
        let mut bets = Vec::new();
        let mut skipped = Vec::new();

        if let Some((home, draw, away)) = odds.result_triple() {
            match self.result_implied(home, draw, away) {
                Ok((implied_home, implied_draw, implied_away)) => {
                    let selections = [
                        ("home", home, prediction.result.home, implied_home),
                        ("draw", draw, prediction.result.draw, implied_draw),
                        ("away", away, prediction.result.away, implied_away),
                    ];
                    for (outcome, price, model_prob, implied) in selections {
                        self.evaluate(
                            &mut bets,
                            MarketKind::Result,
                            outcome,
                            price,
                            model_prob,
                            implied,
                        );
                    }
                }
                Err(err) => self.skip(&mut skipped, MarketKind::Result, err),
            }
        }

        if let Some(price) = odds.over_25 {
            match self.binary_implied(MarketKind::Over25, price, odds.under_25) {
                Ok(implied) => self.evaluate(
                    &mut bets,
                    MarketKind::Over25,
                    "over_25",
                    price,
                    prediction.over25,
                    implied,
                ),
                Err(err) => self.skip(&mut skipped, MarketKind::Over25, err),
            }
        }

        if let Some(price) = odds.btts_yes {
            match self.binary_implied(MarketKind::Btts, price, odds.btts_no) {
                Ok(implied) => self.evaluate(
                    &mut bets,
                    MarketKind::Btts,
                    "btts_yes",
                    price,
                    prediction.btts,
                    implied,
                ),
                Err(err) => self.skip(&mut skipped, MarketKind::Btts, err),
            }
        }

        bets.sort_by(|a, b| b.edge.total_cmp(&a.edge));
        (bets, skipped)
    }

    fn skip(&self, skipped: &mut Vec<MarketSkip>, market: MarketKind, err: EngineError) {
        warn!("⚠️ Skipping {} value evaluation: {}", market.as_str(), err);
        skipped.push(MarketSkip {
            market,
            reason: err.to_string(),
        });
    }

    /// Tripleta implícita del 1X2 con el overround eliminado
    fn result_implied(&self, home: f64, draw: f64, away: f64) -> EngineResult<(f64, f64, f64)> {
        let implied_home = implied_probability(MarketKind::Result, home)?;
        let implied_draw = implied_probability(MarketKind::Result, draw)?;
        let implied_away = implied_probability(MarketKind::Result, away)?;
        // Overround: la suma implícita supera 1 por el margen de la casa
        let overround = implied_home + implied_draw + implied_away;
        Ok((
            implied_home / overround,
            implied_draw / overround,
            implied_away / overround,
        ))
    }

    /// Implícita de un mercado a dos bandas, sin margen si la contraparte
    /// está cotizada
    fn binary_implied(
        &self,
        market: MarketKind,
        price: f64,
        counterpart: Option<f64>,
    ) -> EngineResult<f64> {
        let implied = implied_probability(market, price)?;
        match counterpart {
            Some(other) => {
                let implied_other = implied_probability(market, other)?;
                Ok(implied / (implied + implied_other))
            }
            None => Ok(implied),
        }
    }

    fn evaluate(
        &self,
        bets: &mut Vec<ValueBet>,
        market: MarketKind,
        outcome: &str,
        odds: f64,
        model_prob: f64,
        implied_prob: f64,
    ) {
        let edge = model_prob - implied_prob;
        if edge < self.cfg.min_edge {
            return;
        }
        let stake_fraction = fractional_kelly(
            model_prob,
            odds,
            self.cfg.kelly_fraction,
            self.cfg.max_stake_fraction,
        );
        let grade = grade_edge(edge);
        debug!(
            "💰 Value bet {}/{}: edge {:.4} grade {} stake {:.3}",
            market.as_str(),
            outcome,
            edge,
            grade,
            stake_fraction
        );
        bets.push(ValueBet {
            market,
            outcome: outcome.to_string(),
            odds,
            model_prob,
            implied_prob,
            edge,
            grade,
            stake_fraction,
            expected_value: model_prob * odds - 1.0,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::{MatchPrediction, PredictionMethod, ResultProbs};

    fn prediction(home: f64, draw: f64, away: f64, over25: f64, btts: f64) -> MatchPrediction {
        MatchPrediction {
            match_id: 1,
            method: PredictionMethod::Ensemble,
            confidence: 70,
            result: ResultProbs::new(home, draw, away),
            over25,
            over35: None,
            btts,
            expected_goals: None,
            over95_corners: None,
            over105_corners: None,
            total_corners: None,
            total_shots: None,
            total_shots_on_target: None,
            skipped: Vec::new(),
            value_bets: Vec::new(),
        }
    }

    fn odds_1x2(home: f64, draw: f64, away: f64) -> MatchOdds {
        MatchOdds {
            home: Some(home),
            draw: Some(draw),
            away: Some(away),
            over_25: None,
            under_25: None,
            btts_yes: None,
            btts_no: None,
        }
    }

    #[test]
    fn test_implied_probability_rejects_bad_odds() {
        assert!(implied_probability(MarketKind::Result, 0.95).is_err());
        assert!(implied_probability(MarketKind::Result, f64::NAN).is_err());
        let p = implied_probability(MarketKind::Result, 2.0).unwrap();
        assert!((p - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_grade_thresholds_are_strict() {
        assert_eq!(grade_edge(0.101), BetGrade::APlus);
        assert_eq!(grade_edge(0.10), BetGrade::A);
        assert_eq!(grade_edge(0.07), BetGrade::B);
        assert_eq!(grade_edge(0.05), BetGrade::C);
        assert_eq!(grade_edge(0.03), BetGrade::D);
        assert_eq!(grade_edge(0.02), BetGrade::F);
        assert_eq!(grade_edge(-0.05), BetGrade::F);
    }

    #[test]
    fn test_kelly_zero_on_negative_edge() {
        assert_eq!(fractional_kelly(0.40, 2.0, 0.25, 0.10), 0.0);
        assert_eq!(fractional_kelly(0.50, 1.0, 0.25, 0.10), 0.0);
    }

    #[test]
    fn test_kelly_scaled_and_capped() {
        // Kelly completo: (1·0.6 − 0.4) / 1 = 0.2 → 0.05 con fracción 0.25
        let stake = fractional_kelly(0.60, 2.0, 0.25, 0.10);
        assert!((stake - 0.05).abs() < 1e-12);

        // Edge enorme se topa en el máximo
        let capped = fractional_kelly(0.90, 3.0, 0.50, 0.10);
        assert_eq!(capped, 0.10);
    }

    #[test]
    fn test_kelly_monotone_in_edge_at_fixed_odds() {
        // A cuota fija, más edge nunca puede reducir el stake sugerido
        let mut previous = 0.0;
        for step in 0..=40 {
            let model_prob = 0.40 + step as f64 * 0.01;
            let stake = fractional_kelly(model_prob, 2.0, 0.25, 0.10);
            assert!(
                stake >= previous,
                "stake fell from {previous} to {stake} at p={model_prob}"
            );
            previous = stake;
        }
    }

    #[test]
    fn test_home_value_bet_with_overround_removed() {
        let detector = ValueBetDetector::new(ValueBetConfig::default());
        let prediction = prediction(0.55, 0.25, 0.20, 0.5, 0.5);
        let odds = odds_1x2(2.10, 3.40, 4.00);
        let (bets, skipped) = detector.detect(&prediction, &odds);
        assert!(skipped.is_empty());

        let home = bets
            .iter()
            .find(|b| b.market == MarketKind::Result && b.outcome == "home")
            .unwrap();
        // Implícitas 0.4762/0.2941/0.2500, suma 1.0203; sin margen 0.4667
        assert!((home.implied_prob - 0.4667).abs() < 1e-3);
        assert!((home.edge - 0.0833).abs() < 1e-3);
        assert_eq!(home.grade, BetGrade::A);
        assert!(home.stake_fraction > 0.0);
        assert!(home.expected_value > 0.0);
    }

    #[test]
    fn test_no_bet_below_min_edge() {
        let detector = ValueBetDetector::new(ValueBetConfig::default());
        // Probabilidades alineadas con el mercado, sin valor en ninguna banda
        let prediction = prediction(0.46, 0.29, 0.25, 0.5, 0.5);
        let odds = odds_1x2(2.10, 3.40, 4.00);
        let (bets, _) = detector.detect(&prediction, &odds);
        assert!(bets.is_empty());
    }

    #[test]
    fn test_binary_market_demargin() {
        let detector = ValueBetDetector::new(ValueBetConfig::default());
        let prediction = prediction(0.4, 0.3, 0.3, 0.60, 0.5);
        let odds = MatchOdds {
            home: None,
            draw: None,
            away: None,
            over_25: Some(1.90),
            under_25: Some(1.90),
            btts_yes: None,
            btts_no: None,
        };
        let (bets, _) = detector.detect(&prediction, &odds);
        let over = bets.iter().find(|b| b.market == MarketKind::Over25).unwrap();
        // Dos bandas iguales → implícita sin margen exactamente 0.5
        assert!((over.implied_prob - 0.5).abs() < 1e-12);
        assert!((over.edge - 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_odds_skip_only_that_market() {
        let detector = ValueBetDetector::new(ValueBetConfig::default());
        let prediction = prediction(0.5, 0.3, 0.2, 0.70, 0.5);
        let mut odds = odds_1x2(0.90, 3.40, 4.00);
        odds.over_25 = Some(1.90);
        odds.under_25 = Some(1.90);

        let (bets, skipped) = detector.detect(&prediction, &odds);
        // El 1X2 se descarta, el over 2.5 sigue evaluándose
        assert!(skipped.iter().any(|s| s.market == MarketKind::Result));
        assert!(bets.iter().all(|b| b.market != MarketKind::Result));
        assert!(bets.iter().any(|b| b.market == MarketKind::Over25));
    }
}
