//! Script de entrenamiento del artefacto ML
//!
//! Uso: cargo run --bin train_model -- <matches.json>
//!
//! Carga el historial de partidos desde un JSON, ajusta el modelo de goles,
//! construye el dataset sin fugas temporales (el Elo se reconstruye dentro
//! del propio replay del dataset) y entrena el artefacto completo. El
//! artefacto se guarda bajo el data_dir configurado.

use chrono::Utc;
use golbot::config::EngineConfig;
use golbot::features::FeatureEngineer;
use golbot::goal_model::GoalModelStore;
use golbot::history::{HistoryProvider, MatchHistory};
use golbot::ml::{Dataset, TrainingPipeline};
use golbot::types::{CancelFlag, Competition, MatchRecord};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(serde::Deserialize)]
struct HistoryFile {
    competitions: Vec<Competition>,
    matches: Vec<MatchRecord>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt::init();

    let cfg = EngineConfig::load()?;
    info!("⚙️ Config loaded: {}", cfg.digest());

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "data/matches.json".to_string());
    info!("📦 Loading match history from {}", path);

    // 1. Cargar historial
    let file: HistoryFile = serde_json::from_str(&fs::read_to_string(&path)?)?;
    let history = Arc::new(MatchHistory::new());
    for competition in file.competitions {
        history.register_competition(competition);
    }
    let total = file.matches.len();
    history.upsert_all(file.matches);
    info!("✅ {} matches loaded", total);

    let as_of = Utc::now();
    let cancel = CancelFlag::new();

    // 2. Ajustar el modelo de goles por partición
    let goal_model = GoalModelStore::new(cfg.goal_model.clone());
    let history_dyn: Arc<dyn HistoryProvider> = history.clone();
    let fit_report = goal_model.fit_all(history_dyn, as_of, &cancel).await?;
    info!(
        "✅ Goal model: {} partitions fitted, {} skipped",
        fit_report.fitted, fit_report.skipped
    );

    // 3. Construir dataset (con replay de Elo interno) y entrenar
    let engineer = FeatureEngineer::new(cfg.features.clone());
    let dataset = Dataset::build(
        history.as_ref(),
        &cfg.elo,
        &engineer,
        cfg.training.skip_first_matches,
        as_of,
    );
    let pipeline = TrainingPipeline::new(cfg.training.clone());
    let artifact = pipeline.train(&dataset, &cancel)?;

    // 4. Guardar artefacto
    fs::create_dir_all(&cfg.engine.data_dir)?;
    let out = Path::new(&cfg.engine.data_dir).join("model_artifact.json");
    artifact.save(&out)?;

    info!("");
    info!("🎓 TRAINING COMPLETE");
    info!("============================");
    info!("Artifact version: {}", artifact.version);
    info!("Samples: {}", dataset.len());
    info!("Saved to: {}", out.display());

    Ok(())
}
