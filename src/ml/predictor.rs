//! Predictor ML: puntúa un vector de features contra el artefacto cargado
//!
//! El predictor es inmutable y seguro de compartir: cada predicción es una
//! lectura pura del artefacto.

use super::artifact::ModelArtifact;
use crate::error::{EngineError, EngineResult};
use crate::features::MatchFeatures;
use smartcore::linalg::basic::matrix::DenseMatrix;
use std::path::Path;

/// Salida del lado ML para todos los mercados
#[derive(Debug, Clone)]
pub struct MlPrediction {
    /// (local, empate, visitante), normalizadas a 1
    pub result: (f64, f64, f64),
    pub over25: f64,
    pub btts: f64,
    pub over95_corners: Option<f64>,
    pub over105_corners: Option<f64>,
    pub total_corners: Option<f64>,
    pub total_shots: Option<f64>,
    pub total_shots_on_target: Option<f64>,
}

pub struct MlPredictor {
    artifact: ModelArtifact,
}

impl MlPredictor {
    /// Valida el esquema del artefacto antes de aceptar predicciones
    pub fn new(artifact: ModelArtifact) -> EngineResult<Self> {
        artifact.validate_columns()?;
        Ok(Self { artifact })
    }

    pub fn from_path(path: &Path) -> EngineResult<Self> {
        Self::new(ModelArtifact::load(path)?)
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    pub fn version(&self) -> &str {
        &self.artifact.version
    }

    /// Puntúa un partido. Los mercados de conteo ausentes en el artefacto
    /// salen como None y el ensamblador los reporta como omitidos.
    pub fn predict(&self, features: &MatchFeatures) -> EngineResult<MlPrediction> {
        let vec = features.to_vec();
        let row = DenseMatrix::from_2d_array(&[vec.as_slice()])
            .map_err(|e| EngineError::model_unavailable(format!("feature row rejected: {e}")))?;

        let score_err =
            |e: anyhow::Error| EngineError::model_unavailable(format!("scoring failed: {e}"));

        let result = self.artifact.result.predict_probs(&row).map_err(score_err)?;
        let over25 = self.artifact.over25.predict_prob(&row).map_err(score_err)?;
        let btts = self.artifact.btts.predict_prob(&row).map_err(score_err)?;

        let over95_corners = match &self.artifact.over95_corners {
            Some(m) => Some(m.predict_prob(&row).map_err(score_err)?),
            None => None,
        };
        let over105_corners = match &self.artifact.over105_corners {
            Some(m) => Some(m.predict_prob(&row).map_err(score_err)?),
            None => None,
        };
        let total_corners = match &self.artifact.total_corners {
            Some(m) => Some(m.predict_value(&row).map_err(score_err)?),
            None => None,
        };
        let total_shots = match &self.artifact.total_shots {
            Some(m) => Some(m.predict_value(&row).map_err(score_err)?),
            None => None,
        };
        let total_shots_on_target = match &self.artifact.total_shots_on_target {
            Some(m) => Some(m.predict_value(&row).map_err(score_err)?),
            None => None,
        };

        Ok(MlPrediction {
            result,
            over25,
            btts,
            over95_corners,
            over105_corners,
            total_corners,
            total_shots,
            total_shots_on_target,
        })
    }
}
