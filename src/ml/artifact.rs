//! Artefacto de modelos versionado
//!
//! Un entrenamiento produce un artefacto inmutable: modelos por mercado,
//! el esquema de columnas con el que se entrenaron y estadísticas del
//! dataset. El cargador falla en duro si el esquema no coincide con el
//! código actual; un artefacto viejo nunca puntúa features desalineadas.

use super::models::{CalibratedBinary, CountModel, ResultModel};
use crate::error::{EngineError, EngineResult};
use crate::features::MatchFeatures;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Versión del formato de serialización del artefacto
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Medias del dataset de entrenamiento, usadas como referencia de liga en
/// los mercados de conteo
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingStats {
    pub samples: usize,
    pub avg_total_goals: f64,
    pub avg_total_corners: Option<f64>,
    pub avg_total_shots: Option<f64>,
    pub avg_total_shots_on_target: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    /// Identificador único del entrenamiento
    pub version: String,
    pub created_at: DateTime<Utc>,
    /// Esquema de features en el orden exacto de entrenamiento
    pub feature_columns: Vec<String>,
    pub result: ResultModel,
    pub over25: CalibratedBinary,
    pub btts: CalibratedBinary,
    /// Mercados de conteo: solo presentes si hubo estadísticas suficientes
    pub over95_corners: Option<CalibratedBinary>,
    pub over105_corners: Option<CalibratedBinary>,
    pub total_corners: Option<CountModel>,
    pub total_shots: Option<CountModel>,
    pub total_shots_on_target: Option<CountModel>,
    pub training_stats: TrainingStats,
    /// Métricas de validación por mercado
    pub validation_summary: HashMap<String, f64>,
}

impl ModelArtifact {
    pub fn new_version() -> String {
        Uuid::new_v4().to_string()
    }

    /// Comprueba que el esquema del artefacto coincide con el código actual
    pub fn validate_columns(&self) -> EngineResult<()> {
        let current: Vec<String> = MatchFeatures::feature_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        if self.feature_columns != current {
            return Err(EngineError::model_unavailable(format!(
                "artifact {} has {} feature columns, current schema has {}; retrain required",
                self.version,
                self.feature_columns.len(),
                current.len()
            )));
        }
        if self.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(EngineError::model_unavailable(format!(
                "artifact format {} unsupported (expected {})",
                self.format_version, ARTIFACT_FORMAT_VERSION
            )));
        }
        Ok(())
    }

    /// Guarda el artefacto como JSON
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let json = serde_json::to_string(self)
            .map_err(|e| EngineError::Storage(format!("serialize artifact: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| EngineError::Storage(format!("write {}: {e}", path.display())))?;
        info!("💾 Model artifact {} saved to {}", self.version, path.display());
        Ok(())
    }

    /// Carga y valida un artefacto. Cualquier fallo (E/S, parseo, esquema)
    /// se reporta como modelo no disponible.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::model_unavailable(format!("cannot read {}: {e}", path.display()))
        })?;
        let artifact: ModelArtifact = serde_json::from_str(&content).map_err(|e| {
            EngineError::model_unavailable(format!("cannot parse {}: {e}", path.display()))
        })?;
        artifact.validate_columns()?;
        info!(
            "📦 Model artifact {} loaded ({} markets with counts: corners={}, shots={})",
            artifact.version,
            artifact.feature_columns.len(),
            artifact.total_corners.is_some(),
            artifact.total_shots.is_some()
        );
        Ok(artifact)
    }
}
