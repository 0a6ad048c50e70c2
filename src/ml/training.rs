//! Pipeline de entrenamiento
//!
//! Entrena los ocho mercados contra el mismo split reproducible y empaqueta
//! todo en un artefacto inmutable. Los mercados de conteo se omiten (no
//! fallan) cuando el dataset no trae suficientes estadísticas detalladas.

use super::artifact::{ModelArtifact, TrainingStats, ARTIFACT_FORMAT_VERSION};
use super::dataset::Dataset;
use super::models::{
    CalibratedBinary, CountModel, EstimatorFamily, LogisticFamily, RandomForestFamily,
    ResultModel, ShallowForestFamily,
};
use crate::config::TrainingConfig;
use crate::error::EngineError;
use crate::types::{CancelFlag, MatchResult};
use anyhow::{bail, Result};
use chrono::Utc;
use std::collections::HashMap;
use tracing::{info, warn};

/// Muestras mínimas (train) para intentar un mercado de conteo
const MIN_COUNT_MARKET_SAMPLES: usize = 50;

pub struct TrainingPipeline {
    cfg: TrainingConfig,
}

impl TrainingPipeline {
    pub fn new(cfg: TrainingConfig) -> Self {
        Self { cfg }
    }

    fn candidates(&self) -> Vec<Box<dyn EstimatorFamily>> {
        vec![
            Box::new(RandomForestFamily {
                n_trees: self.cfg.forest_trees,
                max_depth: self.cfg.forest_max_depth,
            }),
            Box::new(ShallowForestFamily { n_trees: 150 }),
            Box::new(LogisticFamily),
        ]
    }

    /// Entrena el artefacto completo. La cancelación se comprueba entre
    /// mercados y aborta sin artefacto parcial.
    pub fn train(&self, dataset: &Dataset, cancel: &CancelFlag) -> Result<ModelArtifact> {
        if dataset.len() < self.cfg.min_samples {
            return Err(EngineError::data_insufficient(format!(
                "{} samples available, {} required for training",
                dataset.len(),
                self.cfg.min_samples
            ))
            .into());
        }

        let (train_idx, test_idx) = dataset.shuffled_split(self.cfg.test_fraction, self.cfg.seed);
        info!(
            "🎓 Training on {} samples ({} train / {} test, seed {})",
            dataset.len(),
            train_idx.len(),
            test_idx.len(),
            self.cfg.seed
        );

        let x_train = dataset.matrix(&train_idx)?;
        let x_test = dataset.matrix(&test_idx)?;
        let candidates = self.candidates();
        let bins = self.cfg.calibration_bins;
        let mut validation_summary: HashMap<String, f64> = HashMap::new();

        // --- 1X2 como tres binarios uno-contra-resto ---
        let mut ovr = Vec::with_capacity(3);
        for (name, target) in [
            ("result_home", MatchResult::Home),
            ("result_draw", MatchResult::Draw),
            ("result_away", MatchResult::Away),
        ] {
            if cancel.is_cancelled() {
                bail!("training cancelled before {name}");
            }
            let y_train = dataset.binary_targets(&train_idx, |l| l.result == target);
            let y_test = dataset.binary_targets(&test_idx, |l| l.result == target);
            ovr.push(CalibratedBinary::train(
                name, &x_train, &y_train, &x_test, &y_test, bins, &candidates,
            )?);
        }
        let away = ovr.pop();
        let draw = ovr.pop();
        let home = ovr.pop();
        let (Some(home), Some(draw), Some(away)) = (home, draw, away) else {
            bail!("one-vs-rest training produced incomplete result model");
        };

        // Accuracy multiclase por argmax de las tres probabilidades
        let h_raw = home.model.predict(&x_test)?;
        let d_raw = draw.model.predict(&x_test)?;
        let a_raw = away.model.predict(&x_test)?;
        let actual = dataset.result_targets(&test_idx);
        let mut correct = 0usize;
        for i in 0..actual.len() {
            let probs = [
                home.calibration.calibrate(h_raw[i] as f64),
                draw.calibration.calibrate(d_raw[i] as f64),
                away.calibration.calibrate(a_raw[i] as f64),
            ];
            let predicted = probs
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(k, _)| k as i64)
                .unwrap_or(0);
            if predicted == actual[i] {
                correct += 1;
            }
        }
        let result_accuracy = if actual.is_empty() {
            0.0
        } else {
            correct as f64 / actual.len() as f64
        };
        info!("  1X2 validation accuracy: {:.3}", result_accuracy);
        validation_summary.insert("result_accuracy".to_string(), result_accuracy);

        let result = ResultModel {
            home,
            draw,
            away,
            validation_accuracy: result_accuracy,
        };

        // --- Binarios de goles ---
        if cancel.is_cancelled() {
            bail!("training cancelled before goal markets");
        }
        let over25 = {
            let y_train = dataset.binary_targets(&train_idx, |l| l.over25);
            let y_test = dataset.binary_targets(&test_idx, |l| l.over25);
            CalibratedBinary::train("over_25", &x_train, &y_train, &x_test, &y_test, bins, &candidates)?
        };
        validation_summary.insert("over_25_accuracy".to_string(), over25.validation_accuracy);

        let btts = {
            let y_train = dataset.binary_targets(&train_idx, |l| l.btts);
            let y_test = dataset.binary_targets(&test_idx, |l| l.btts);
            CalibratedBinary::train("btts", &x_train, &y_train, &x_test, &y_test, bins, &candidates)?
        };
        validation_summary.insert("btts_accuracy".to_string(), btts.validation_accuracy);

        // --- Mercados de conteo (opcionales) ---
        if cancel.is_cancelled() {
            bail!("training cancelled before count markets");
        }
        let over95_corners = self.optional_binary(
            dataset, &train_idx, &test_idx, "over_95_corners",
            |l| l.over95_corners, &candidates, &mut validation_summary,
        )?;
        let over105_corners = self.optional_binary(
            dataset, &train_idx, &test_idx, "over_105_corners",
            |l| l.over105_corners, &candidates, &mut validation_summary,
        )?;
        let total_corners = self.optional_count(
            dataset, &train_idx, &test_idx, "total_corners",
            |l| l.total_corners, &mut validation_summary,
        )?;
        let total_shots = self.optional_count(
            dataset, &train_idx, &test_idx, "total_shots",
            |l| l.total_shots, &mut validation_summary,
        )?;
        let total_shots_on_target = self.optional_count(
            dataset, &train_idx, &test_idx, "total_shots_on_target",
            |l| l.total_shots_on_target, &mut validation_summary,
        )?;

        let training_stats = TrainingStats {
            samples: dataset.len(),
            avg_total_goals: dataset.label_mean(|l| Some(l.total_goals)).unwrap_or(0.0),
            avg_total_corners: dataset.label_mean(|l| l.total_corners),
            avg_total_shots: dataset.label_mean(|l| l.total_shots),
            avg_total_shots_on_target: dataset.label_mean(|l| l.total_shots_on_target),
        };

        let artifact = ModelArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            version: ModelArtifact::new_version(),
            created_at: Utc::now(),
            feature_columns: crate::features::MatchFeatures::feature_names()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            result,
            over25,
            btts,
            over95_corners,
            over105_corners,
            total_corners,
            total_shots,
            total_shots_on_target,
            training_stats,
            validation_summary,
        };

        info!("✅ Training complete: artifact {}", artifact.version);
        Ok(artifact)
    }

    fn optional_binary<F>(
        &self,
        dataset: &Dataset,
        train_idx: &[usize],
        test_idx: &[usize],
        market: &str,
        selector: F,
        candidates: &[Box<dyn EstimatorFamily>],
        summary: &mut HashMap<String, f64>,
    ) -> Result<Option<CalibratedBinary>>
    where
        F: Fn(&super::dataset::MatchLabels) -> Option<bool> + Copy,
    {
        let (train_keep, y_train) = dataset.binary_subset(train_idx, selector);
        let (test_keep, y_test) = dataset.binary_subset(test_idx, selector);
        if train_keep.len() < MIN_COUNT_MARKET_SAMPLES || test_keep.is_empty() {
            warn!(
                "⏭️ Skipping {}: {} labelled train samples (need {})",
                market,
                train_keep.len(),
                MIN_COUNT_MARKET_SAMPLES
            );
            return Ok(None);
        }
        let x_train = dataset.matrix(&train_keep)?;
        let x_test = dataset.matrix(&test_keep)?;
        let model = CalibratedBinary::train(
            market,
            &x_train,
            &y_train,
            &x_test,
            &y_test,
            self.cfg.calibration_bins,
            candidates,
        )?;
        summary.insert(format!("{market}_accuracy"), model.validation_accuracy);
        Ok(Some(model))
    }

    fn optional_count<F>(
        &self,
        dataset: &Dataset,
        train_idx: &[usize],
        test_idx: &[usize],
        market: &str,
        selector: F,
        summary: &mut HashMap<String, f64>,
    ) -> Result<Option<CountModel>>
    where
        F: Fn(&super::dataset::MatchLabels) -> Option<f64> + Copy,
    {
        let (train_keep, y_train) = dataset.regression_subset(train_idx, selector);
        let (test_keep, y_test) = dataset.regression_subset(test_idx, selector);
        if train_keep.len() < MIN_COUNT_MARKET_SAMPLES || test_keep.is_empty() {
            warn!(
                "⏭️ Skipping {}: {} labelled train samples (need {})",
                market,
                train_keep.len(),
                MIN_COUNT_MARKET_SAMPLES
            );
            return Ok(None);
        }
        let x_train = dataset.matrix(&train_keep)?;
        let x_test = dataset.matrix(&test_keep)?;
        let model = CountModel::train(market, &x_train, &y_train, &x_test, &y_test)?;
        summary.insert(format!("{market}_r2"), model.validation_r2);
        summary.insert(format!("{market}_mae"), model.validation_mae);
        Ok(Some(model))
    }
}
