//! Construcción del dataset de entrenamiento
//!
//! Cada partido terminado produce una muestra con las features calculadas al
//! corte de su propio kickoff y las etiquetas sacadas del resultado final.
//! El Elo se reconstruye partido a partido sobre un motor interno de replay,
//! así las columnas de rating de cada muestra son exactamente las que la
//! inferencia habría visto antes de ese kickoff. Los primeros partidos de
//! cada partición se saltan: las features de arranque de temporada son puro
//! ruido.

use crate::config::EloConfig;
use crate::elo::EloEngine;
use crate::features::{FeatureEngineer, MatchFeatures};
use crate::history::HistoryProvider;
use crate::types::{Competition, CompetitionId, MatchId, MatchRecord, MatchResult, Season};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use smartcore::linalg::basic::matrix::DenseMatrix;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Etiquetas de todos los mercados de un partido terminado.
/// Las de conteo son opcionales porque dependen de estadísticas detalladas.
#[derive(Debug, Clone)]
pub struct MatchLabels {
    pub result: MatchResult,
    pub total_goals: f64,
    pub over25: bool,
    pub btts: bool,
    pub total_corners: Option<f64>,
    pub over95_corners: Option<bool>,
    pub over105_corners: Option<bool>,
    pub total_shots: Option<f64>,
    pub total_shots_on_target: Option<f64>,
}

impl MatchLabels {
    /// Extrae etiquetas de un partido; None si no está terminado
    pub fn from_record(record: &MatchRecord) -> Option<Self> {
        let result = record.result()?;
        let total_goals = record.total_goals()?;
        let btts = record.both_teams_scored()?;
        let corners = record.stats.total_corners().map(|c| c as f64);
        Some(Self {
            result,
            total_goals: total_goals as f64,
            over25: total_goals > 2,
            btts,
            total_corners: corners,
            over95_corners: corners.map(|c| c > 9.5),
            over105_corners: corners.map(|c| c > 10.5),
            total_shots: record.stats.total_shots().map(|s| s as f64),
            total_shots_on_target: record.stats.total_shots_on_target().map(|s| s as f64),
        })
    }
}

/// Una muestra etiquetada del dataset
#[derive(Debug, Clone)]
pub struct LabeledSample {
    pub match_id: MatchId,
    pub utc_date: DateTime<Utc>,
    pub features: Vec<f64>,
    pub labels: MatchLabels,
}

/// Dataset completo de entrenamiento
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub samples: Vec<LabeledSample>,
}

impl Dataset {
    /// Construye el dataset reproduciendo el historial en orden cronológico.
    ///
    /// Las features de cada muestra se calculan ANTES de aplicar su propio
    /// partido al motor de replay: cada fila de rating contiene solo pasado
    /// estricto y las columnas Elo de entrenamiento siguen la misma
    /// distribución que las de inferencia.
    pub fn build(
        history: &dyn HistoryProvider,
        elo_cfg: &EloConfig,
        engineer: &FeatureEngineer,
        skip_first: usize,
        as_of: DateTime<Utc>,
    ) -> Self {
        let replay = EloEngine::new(elo_cfg.clone());
        let matches = history.all_finished_matches(as_of);
        let mut position: HashMap<(CompetitionId, Season), usize> = HashMap::new();

        let mut samples = Vec::new();
        let mut cold_skipped = 0usize;
        for record in &matches {
            let seen = position
                .entry((record.competition_id, record.season))
                .or_insert(0);
            let warm = *seen >= skip_first;
            *seen += 1;

            if warm {
                if let Some(labels) = MatchLabels::from_record(record) {
                    let features = engineer.compute(history, &replay, record);
                    samples.push(LabeledSample {
                        match_id: record.id,
                        utc_date: record.utc_date,
                        features: features.to_vec(),
                        labels,
                    });
                }
            } else {
                cold_skipped += 1;
            }

            // El partido entra al replay después de extraer sus features
            let competition = history
                .competition(record.competition_id)
                .unwrap_or_else(|| Competition::domestic(record.competition_id, "?", "unknown"));
            if let Err(err) = replay.process_match(record, &competition) {
                debug!("Replay skipped match {}: {}", record.id, err);
            }
        }

        info!(
            "📊 Dataset built: {} labelled samples ({} cold-start matches skipped)",
            samples.len(),
            cold_skipped
        );
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Partición train/test reproducible por semilla
    pub fn shuffled_split(&self, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
        let mut indices: Vec<usize> = (0..self.samples.len()).collect();
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);
        let test_size = ((self.samples.len() as f64) * test_fraction).round() as usize;
        let test = indices[..test_size.min(indices.len())].to_vec();
        let train = indices[test_size.min(indices.len())..].to_vec();
        (train, test)
    }

    /// Matriz de features para un subconjunto de índices
    pub fn matrix(&self, indices: &[usize]) -> Result<DenseMatrix<f64>> {
        let rows: Vec<&[f64]> = indices
            .iter()
            .map(|&i| self.samples[i].features.as_slice())
            .collect();
        DenseMatrix::from_2d_array(&rows).map_err(|e| anyhow!("matrix build failed: {e}"))
    }

    /// Clases 1X2 (H=0, D=1, A=2) para un subconjunto
    pub fn result_targets(&self, indices: &[usize]) -> Vec<i64> {
        indices
            .iter()
            .map(|&i| self.samples[i].labels.result.class_index())
            .collect()
    }

    /// Objetivo binario derivado de las etiquetas (1/0)
    pub fn binary_targets<F>(&self, indices: &[usize], f: F) -> Vec<i64>
    where
        F: Fn(&MatchLabels) -> bool,
    {
        indices
            .iter()
            .map(|&i| if f(&self.samples[i].labels) { 1 } else { 0 })
            .collect()
    }

    /// Subconjunto binario de un mercado opcional: descarta muestras sin
    /// etiqueta y devuelve (índices, objetivos)
    pub fn binary_subset<F>(&self, indices: &[usize], f: F) -> (Vec<usize>, Vec<i64>)
    where
        F: Fn(&MatchLabels) -> Option<bool>,
    {
        let mut keep = Vec::new();
        let mut targets = Vec::new();
        for &i in indices {
            if let Some(value) = f(&self.samples[i].labels) {
                keep.push(i);
                targets.push(if value { 1 } else { 0 });
            }
        }
        (keep, targets)
    }

    /// Subconjunto de regresión de un mercado opcional
    pub fn regression_subset<F>(&self, indices: &[usize], f: F) -> (Vec<usize>, Vec<f64>)
    where
        F: Fn(&MatchLabels) -> Option<f64>,
    {
        let mut keep = Vec::new();
        let mut targets = Vec::new();
        for &i in indices {
            if let Some(value) = f(&self.samples[i].labels) {
                keep.push(i);
                targets.push(value);
            }
        }
        (keep, targets)
    }

    /// Media de una etiqueta de conteo sobre las muestras que la tienen
    pub fn label_mean<F>(&self, f: F) -> Option<f64>
    where
        F: Fn(&MatchLabels) -> Option<f64>,
    {
        let values: Vec<f64> = self.samples.iter().filter_map(|s| f(&s.labels)).collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }

    /// Exporta el dataset a CSV (features + etiquetas principales) para
    /// análisis fuera del motor
    pub fn export_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("cannot create {}", path.display()))?;

        let mut header: Vec<String> = vec!["match_id".to_string(), "utc_date".to_string()];
        header.extend(MatchFeatures::feature_names().iter().map(|s| s.to_string()));
        header.extend(
            ["result", "over_25", "btts", "total_corners", "total_shots"]
                .iter()
                .map(|s| s.to_string()),
        );
        writer.write_record(&header)?;

        for sample in &self.samples {
            let mut row: Vec<String> = vec![
                sample.match_id.to_string(),
                sample.utc_date.to_rfc3339(),
            ];
            row.extend(sample.features.iter().map(|v| format!("{:.6}", v)));
            row.push(sample.labels.result.to_string());
            row.push((sample.labels.over25 as i32).to_string());
            row.push((sample.labels.btts as i32).to_string());
            row.push(
                sample
                    .labels
                    .total_corners
                    .map(|v| format!("{:.1}", v))
                    .unwrap_or_default(),
            );
            row.push(
                sample
                    .labels
                    .total_shots
                    .map(|v| format!("{:.1}", v))
                    .unwrap_or_default(),
            );
            writer.write_record(&row)?;
        }
        writer.flush()?;
        info!("💾 Dataset exported to {} ({} rows)", path.display(), self.samples.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EloConfig, FeatureConfig};
    use crate::history::MatchHistory;
    use crate::types::{MatchOdds, MatchStats, MatchStatus, TeamId};
    use chrono::TimeZone;

    fn finished(id: i64, day: u32, home: TeamId, away: TeamId, hs: u32, als: u32) -> MatchRecord {
        MatchRecord {
            id,
            competition_id: 1,
            season: 2024,
            matchday: Some(day),
            utc_date: Utc.with_ymd_and_hms(2024, 8, 1, 16, 0, 0).unwrap()
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
    fn test_labels_from_record() {
        let mut record = finished(1, 1, 10, 20, 2, 1);
        record.stats.corners_home = Some(6);
        record.stats.corners_away = Some(5);
        let labels = MatchLabels::from_record(&record).unwrap();

        assert_eq!(labels.result, MatchResult::Home);
        assert!(labels.over25);
        assert!(labels.btts);
        assert_eq!(labels.total_corners, Some(11.0));
        assert_eq!(labels.over95_corners, Some(true));
        assert_eq!(labels.over105_corners, Some(true));
        assert_eq!(labels.total_shots, None);
    }

    #[test]
    fn test_unfinished_match_has_no_labels() {
        let mut record = finished(1, 1, 10, 20, 0, 0);
        record.status = MatchStatus::Scheduled;
        record.home_score = None;
        record.away_score = None;
        assert!(MatchLabels::from_record(&record).is_none());
    }

    #[test]
    fn test_build_skips_cold_start() {
        let history = MatchHistory::new();
        for day in 1..=20u32 {
            history.upsert(finished(day as i64, day, 10 + (day as i64 % 4), 20 + (day as i64 % 4), 1, 0));
        }
        let engineer = FeatureEngineer::new(FeatureConfig::default());
        let as_of = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        let dataset = Dataset::build(&history, &EloConfig::default(), &engineer, 15, as_of);
        assert_eq!(dataset.len(), 5);
    }

    #[test]
    fn test_training_elo_features_track_replay() {
        let history = MatchHistory::new();
        // El equipo 10 gana todos sus partidos: su Elo de replay sube
        for day in 1..=12u32 {
            history.upsert(finished(day as i64, day, 10, 20, 2, 0));
        }
        let engineer = FeatureEngineer::new(FeatureConfig::default());
        let as_of = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let dataset = Dataset::build(&history, &EloConfig::default(), &engineer, 4, as_of);
        assert_eq!(dataset.len(), 8);

        let names = MatchFeatures::feature_names();
        let home_elo = names.iter().position(|n| *n == "home_elo").unwrap();
        let elo_diff = names.iter().position(|n| *n == "elo_diff").unwrap();
        for sample in &dataset.samples {
            // Ninguna muestra cae al rating inicial neutro
            assert!(
                sample.features[home_elo] > 1500.0,
                "match {} got neutral elo",
                sample.match_id
            );
            assert!(sample.features[elo_diff] > 0.0);
        }
        // Y la columna evoluciona partido a partido, no es constante
        let first = dataset.samples.first().unwrap().features[home_elo];
        let last = dataset.samples.last().unwrap().features[home_elo];
        assert!(last > first);
    }

    #[test]
    fn test_split_reproducible_and_disjoint() {
        let history = MatchHistory::new();
        for day in 1..=20u32 {
            history.upsert(finished(day as i64, day, 10, 20, 1, 0));
        }
        let engineer = FeatureEngineer::new(FeatureConfig::default());
        let as_of = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let dataset = Dataset::build(&history, &EloConfig::default(), &engineer, 0, as_of);

        let (train_a, test_a) = dataset.shuffled_split(0.25, 42);
        let (train_b, test_b) = dataset.shuffled_split(0.25, 42);
        assert_eq!(train_a, train_b);
        assert_eq!(test_a, test_b);
        assert_eq!(train_a.len() + test_a.len(), dataset.len());
        for i in &test_a {
            assert!(!train_a.contains(i));
        }
    }

    #[test]
    fn test_binary_subset_drops_missing() {
        let mut with_corners = finished(1, 16, 10, 20, 1, 0);
        with_corners.stats.corners_home = Some(7);
        with_corners.stats.corners_away = Some(4);
        let without = finished(2, 17, 10, 20, 2, 2);

        let dataset = Dataset {
            samples: vec![
                LabeledSample {
                    match_id: 1,
                    utc_date: with_corners.utc_date,
                    features: vec![0.0; 3],
                    labels: MatchLabels::from_record(&with_corners).unwrap(),
                },
                LabeledSample {
                    match_id: 2,
                    utc_date: without.utc_date,
                    features: vec![0.0; 3],
                    labels: MatchLabels::from_record(&without).unwrap(),
                },
            ],
        };

        let all: Vec<usize> = vec![0, 1];
        let (idx, targets) = dataset.binary_subset(&all, |l| l.over95_corners);
        assert_eq!(idx, vec![0]);
        assert_eq!(targets, vec![1]);
    }

    #[test]
    fn test_export_csv_roundtrip_header() {
        let dataset = Dataset::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.csv");
        dataset.export_csv(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("match_id,utc_date,home_avg_points"));
    }
}
