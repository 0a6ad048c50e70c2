//! Configuration management for GolBot
//!
//! Loads from YAML files + environment variables via .env

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub engine: CoreConfig,
    pub elo: EloConfig,
    pub goal_model: GoalModelConfig,
    pub features: FeatureConfig,
    pub training: TrainingConfig,
    pub ensemble: EnsembleConfig,
    pub value: ValueBetConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    /// Engine version tag for logging and artifacts
    pub tag: String,
    /// Directory where model artifacts and exports live
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EloConfig {
    /// Rating assigned to unseen teams and at each seasonal reset
    pub initial_rating: f64,
    /// Rating points added to the home side inside the expected-score formula
    pub home_advantage: f64,
    /// K-factor for domestic league matches at mid-season
    pub base_k: f64,
    /// K-factor for continental group-stage matches
    pub continental_group_k: f64,
    /// K-factor for continental knockout matches
    pub continental_knockout_k: f64,
    /// Matchday above which a continental tie counts as knockout
    pub knockout_matchday_from: u32,
    /// K-factor when season progress is below `early_season_cutoff`
    pub early_season_k: f64,
    /// K-factor when season progress is above `late_season_cutoff`
    pub late_season_k: f64,
    pub early_season_cutoff: f64,
    pub late_season_cutoff: f64,
    /// FIFO window for the momentum signal
    pub momentum_window: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoalModelConfig {
    /// Multiplicative home advantage applied to the home scoring rate
    pub home_advantage: f64,
    /// Dixon-Coles low-score correlation parameter
    pub rho: f64,
    /// Fallback league average when a partition has no finished matches
    pub league_avg_goals_default: f64,
    /// Score matrix is truncated at this many goals per side (inclusive)
    pub max_goals: u32,
    /// Partitions with fewer finished matches are skipped entirely
    pub min_matches: usize,
    /// Attack/defense strengths are floored here to keep rates positive
    pub strength_floor: f64,
    /// Coordinate-ascent sweeps for the likelihood fit
    pub mle_iterations: usize,
    /// Early-exit tolerance on the largest per-sweep parameter delta
    pub mle_tolerance: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureConfig {
    /// Recent-form lookback in matches
    pub form_window: usize,
    /// Ultra-recent lookback in matches
    pub short_window: usize,
    /// Head-to-head lookback in meetings
    pub h2h_window: usize,
    /// Venue-specific lookback in matches
    pub venue_window: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    /// Fraction of samples held out for candidate selection and calibration
    pub test_fraction: f64,
    /// Shuffle seed so training runs are reproducible
    pub seed: u64,
    /// Matches skipped at the start of each partition (cold-start noise)
    pub skip_first_matches: usize,
    /// Minimum labelled samples required to train at all
    pub min_samples: usize,
    /// Bins used by the isotonic calibration fit
    pub calibration_bins: usize,
    pub forest_trees: u16,
    pub forest_max_depth: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnsembleConfig {
    /// ML weight for the 1X2 market (statistical model gets the complement)
    pub result_ml_weight: f64,
    /// ML weight for the over 2.5 market
    pub over25_ml_weight: f64,
    /// ML weight for the BTTS market
    pub btts_ml_weight: f64,
    /// Confidence reported when only the ML side is available
    pub ml_only_confidence: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValueBetConfig {
    /// Minimum edge (model prob - implied prob) to report a value bet
    pub min_edge: f64,
    /// Fractional Kelly multiplier
    pub kelly_fraction: f64,
    /// Hard cap on the recommended stake as a bankroll fraction
    pub max_stake_fraction: f64,
}

impl EngineConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Core defaults
            .set_default("engine.tag", env!("CARGO_PKG_VERSION"))?
            .set_default("engine.data_dir", "./data")?
            // Elo defaults
            .set_default("elo.initial_rating", 1500.0)?
            .set_default("elo.home_advantage", 100.0)?
            .set_default("elo.base_k", 30.0)?
            .set_default("elo.continental_group_k", 35.0)?
            .set_default("elo.continental_knockout_k", 40.0)?
            .set_default("elo.knockout_matchday_from", 8)?
            .set_default("elo.early_season_k", 25.0)?
            .set_default("elo.late_season_k", 35.0)?
            .set_default("elo.early_season_cutoff", 0.20)?
            .set_default("elo.late_season_cutoff", 0.80)?
            .set_default("elo.momentum_window", 5)?
            // Goal model defaults
            .set_default("goal_model.home_advantage", 1.3)?
            .set_default("goal_model.rho", -0.13)?
            .set_default("goal_model.league_avg_goals_default", 1.35)?
            .set_default("goal_model.max_goals", 10)?
            .set_default("goal_model.min_matches", 10)?
            .set_default("goal_model.strength_floor", 0.3)?
            .set_default("goal_model.mle_iterations", 25)?
            .set_default("goal_model.mle_tolerance", 1e-6)?
            // Feature defaults
            .set_default("features.form_window", 5)?
            .set_default("features.short_window", 3)?
            .set_default("features.h2h_window", 10)?
            .set_default("features.venue_window", 5)?
            // Training defaults
            .set_default("training.test_fraction", 0.2)?
            .set_default("training.seed", 42)?
            .set_default("training.skip_first_matches", 15)?
            .set_default("training.min_samples", 200)?
            .set_default("training.calibration_bins", 10)?
            .set_default("training.forest_trees", 300)?
            .set_default("training.forest_max_depth", 20)?
            // Ensemble defaults
            .set_default("ensemble.result_ml_weight", 0.70)?
            .set_default("ensemble.over25_ml_weight", 0.50)?
            .set_default("ensemble.btts_ml_weight", 0.50)?
            .set_default("ensemble.ml_only_confidence", 60)?
            // Value bet defaults
            .set_default("value.min_edge", 0.03)?
            .set_default("value.kelly_fraction", 0.25)?
            .set_default("value.max_stake_fraction", 0.10)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (GOLBOT_*)
            .add_source(Environment::with_prefix("GOLBOT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let engine_config: EngineConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(engine_config)
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "tag={} elo_k={:.0} home_adv={:.2} rho={:.2} min_edge={:.2} result_w={:.2}",
            self.engine.tag,
            self.elo.base_k,
            self.goal_model.home_advantage,
            self.goal_model.rho,
            self.value.min_edge,
            self.ensemble.result_ml_weight
        )
    }
}

impl std::fmt::Display for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            tag: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: "./data".to_string(),
        }
    }
}

impl Default for EloConfig {
    fn default() -> Self {
        Self {
            initial_rating: 1500.0,
            home_advantage: 100.0,
            base_k: 30.0,
            continental_group_k: 35.0,
            continental_knockout_k: 40.0,
            knockout_matchday_from: 8,
            early_season_k: 25.0,
            late_season_k: 35.0,
            early_season_cutoff: 0.20,
            late_season_cutoff: 0.80,
            momentum_window: 5,
        }
    }
}

impl Default for GoalModelConfig {
    fn default() -> Self {
        Self {
            home_advantage: 1.3,
            rho: -0.13,
            league_avg_goals_default: 1.35,
            max_goals: 10,
            min_matches: 10,
            strength_floor: 0.3,
            mle_iterations: 25,
            mle_tolerance: 1e-6,
        }
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            form_window: 5,
            short_window: 3,
            h2h_window: 10,
            venue_window: 5,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
            skip_first_matches: 15,
            min_samples: 200,
            calibration_bins: 10,
            forest_trees: 300,
            forest_max_depth: 20,
        }
    }
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            result_ml_weight: 0.70,
            over25_ml_weight: 0.50,
            btts_ml_weight: 0.50,
            ml_only_confidence: 60,
        }
    }
}

impl Default for ValueBetConfig {
    fn default() -> Self {
        Self {
            min_edge: 0.03,
            kelly_fraction: 0.25,
            max_stake_fraction: 0.10,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine: CoreConfig::default(),
            elo: EloConfig::default(),
            goal_model: GoalModelConfig::default(),
            features: FeatureConfig::default(),
            training: TrainingConfig::default(),
            ensemble: EnsembleConfig::default(),
            value: ValueBetConfig::default(),
        }
    }
}
