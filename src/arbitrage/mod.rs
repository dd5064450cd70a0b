//! Arbitrage module for detecting and executing opportunities.
//!
//! This module handles:
//! - Profit and sizing calculations
//! - Opportunity detection from price snapshots
//! - The open/close lifecycle of the single position

pub mod calculator;
pub mod detector;
pub mod orchestrator;

pub use calculator::{evaluate, order_amount, price_extremes, should_close, Opportunity, StrategyParams};
pub use detector::{check_arbitrage, diagnose_no_opportunity, NoOpportunityDiagnosis};
pub use orchestrator::{
    EngineState, Orchestrator, OrchestratorSettings, OrchestratorStatus, StatsSnapshot,
};
