//! Error taxonomy of the prediction engine
//!
//! Recoverable, expected conditions get their own variants so callers can
//! degrade per market instead of failing a whole prediction batch.

use crate::types::{CompetitionId, MarketKind, Season, TeamId};
use thiserror::Error;

/// Result alias used across the engine
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Not enough history to produce a statistically meaningful output.
    /// Callers skip the affected team/partition and continue.
    #[error("insufficient data: {context}")]
    DataInsufficient { context: String },

    /// No trained model artifact is available, or the artifact is
    /// incompatible with the current feature schema.
    #[error("model unavailable: {reason}")]
    ModelUnavailable { reason: String },

    /// Bookmaker odds that cannot be interpreted as probabilities
    #[error("invalid odds for {market}: {reason}")]
    InvalidOdds { market: MarketKind, reason: String },

    /// Concurrent or out-of-order rating update detected by the versioned
    /// write path; the caller decides whether to replay history.
    #[error("rating update conflict for team {team} in competition {competition} (season {season:?})")]
    RatingUpdateConflict {
        team: TeamId,
        competition: CompetitionId,
        season: Option<Season>,
    },

    /// Artifact or export I/O failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn data_insufficient(context: impl Into<String>) -> Self {
        EngineError::DataInsufficient {
            context: context.into(),
        }
    }

    pub fn model_unavailable(reason: impl Into<String>) -> Self {
        EngineError::ModelUnavailable {
            reason: reason.into(),
        }
    }
}
