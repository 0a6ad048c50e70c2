//! GolBot Library
//!
//! ML-powered football match prediction engine

pub mod config;
pub mod elo;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod goal_model;
pub mod history;
pub mod ml;
pub mod registry;
pub mod types;
pub mod value;
