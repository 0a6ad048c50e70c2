//! Fachada del motor de predicción
//!
//! Une historial, Elo, modelo de goles, features, ML, ensemble y detección
//! de valor detrás de una sola superficie. Los binarios y los tests de
//! integración hablan con el motor a través de este tipo.

use crate::elo::{BackfillReport, EloEngine};
use crate::ensemble::{MatchPrediction, PredictionEnsembler};
use crate::error::{EngineError, EngineResult};
use crate::features::FeatureEngineer;
use crate::goal_model::{FitAllReport, GoalModelStore};
use crate::history::HistoryProvider;
use crate::ml::MlPredictor;
use crate::types::{CancelFlag, MatchRecord};
use crate::value::ValueBetDetector;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct PredictorRegistry {
    history: Arc<dyn HistoryProvider>,
    elo: Arc<EloEngine>,
    goal_model: Arc<GoalModelStore>,
    engineer: FeatureEngineer,
    predictor: MlPredictor,
    ensembler: PredictionEnsembler,
    detector: ValueBetDetector,
}

impl PredictorRegistry {
    pub fn new(
        history: Arc<dyn HistoryProvider>,
        elo: Arc<EloEngine>,
        goal_model: Arc<GoalModelStore>,
        engineer: FeatureEngineer,
        predictor: MlPredictor,
        ensembler: PredictionEnsembler,
        detector: ValueBetDetector,
    ) -> Self {
        Self {
            history,
            elo,
            goal_model,
            engineer,
            ensembler,
            predictor,
            detector,
        }
    }

    pub fn model_version(&self) -> &str {
        self.predictor.version()
    }

    /// Reconstruye el estado estadístico hasta `as_of`: backfill de Elo y
    /// ajuste Dixon-Coles por partición
    pub async fn warm_up(
        &self,
        as_of: DateTime<Utc>,
        cancel: &CancelFlag,
    ) -> anyhow::Result<(BackfillReport, FitAllReport)> {
        info!("🔄 Warming up engine state as of {}", as_of);
        let elo_report = self.elo.backfill(self.history.as_ref(), as_of, cancel)?;
        let fit_report = self
            .goal_model
            .fit_all(self.history.clone(), as_of, cancel)
            .await?;
        info!(
            "✅ Warm-up done: {} matches rated, {} partitions fitted",
            elo_report.processed, fit_report.fitted
        );
        Ok((elo_report, fit_report))
    }

    /// Predicción completa de un partido, con apuestas de valor si hay
    /// cuotas en el registro
    pub fn predict_match(&self, record: &MatchRecord) -> EngineResult<MatchPrediction> {
        let features = self
            .engineer
            .compute(self.history.as_ref(), &self.elo, record);
        let ml = self.predictor.predict(&features)?;

        let statistical = match self.goal_model.predict_match(
            record.home_team,
            record.away_team,
            record.competition_id,
            record.season,
        ) {
            Ok(probs) => Some(probs),
            Err(EngineError::DataInsufficient { context }) => {
                debug!("⏭️ Match {}: no statistical model ({})", record.id, context);
                None
            }
            Err(err) => return Err(err),
        };

        let mut prediction = self
            .ensembler
            .combine(record.id, &ml, statistical.as_ref());
        let (bets, skipped) = self.detector.detect(&prediction, &record.odds);
        prediction.value_bets = bets;
        prediction.skipped.extend(skipped);
        Ok(prediction)
    }

    /// Predicción en lote; los fallos por partido se registran y se omiten
    pub fn predict_matches(&self, records: &[MatchRecord]) -> Vec<MatchPrediction> {
        let mut predictions = Vec::with_capacity(records.len());
        for record in records {
            match self.predict_match(record) {
                Ok(prediction) => predictions.push(prediction),
                Err(err) => warn!("⚠️ Match {}: prediction failed: {}", record.id, err),
            }
        }
        predictions
    }
}
