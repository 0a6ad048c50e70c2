//! Lado ML del motor de predicción
//!
//! Dataset → entrenamiento con selección de candidatos → artefacto
//! inmutable → predictor. El artefacto viaja con su esquema de columnas y
//! el cargador falla en duro si no coincide con el código.

pub mod artifact;
pub mod calibration;
pub mod dataset;
pub mod models;
pub mod predictor;
pub mod training;

pub use artifact::{ModelArtifact, TrainingStats, ARTIFACT_FORMAT_VERSION};
pub use calibration::CalibrationCurve;
pub use dataset::{Dataset, LabeledSample, MatchLabels};
pub use models::{CalibratedBinary, CountModel, ResultModel};
pub use predictor::{MlPredictor, MlPrediction};
pub use training::TrainingPipeline;
