//! Telemetry Fetcher
//!
//! Pulls per-worker performance samples from an external metrics source. A
//! fetch is all-or-nothing: the scoring pass either gets one consistent
//! snapshot for every worker or an error and skips the cycle.

pub mod prometheus;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub use prometheus::{PrometheusTelemetry, uptime_fraction};

/// Performance of one worker over the lookback window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSample {
    pub worker_name: String,
    pub valid_shares: u64,
    /// Average difficulty per valid share
    pub difficulty: f64,
    /// Fraction of the window the worker was up, in [0, 1]
    pub uptime_fraction: f64,
}

impl WorkerSample {
    pub fn new(
        worker_name: impl Into<String>,
        valid_shares: u64,
        difficulty: f64,
        uptime_fraction: f64,
    ) -> Self {
        Self {
            worker_name: worker_name.into(),
            valid_shares,
            difficulty,
            uptime_fraction,
        }
    }

    /// `valid_shares × difficulty`
    pub fn effective_work(&self) -> f64 {
        self.valid_shares as f64 * self.difficulty
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry source unreachable: {0}")]
    Unreachable(String),

    #[error("telemetry query failed: {0}")]
    QueryFailed(String),

    #[error("malformed telemetry response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Samples for the requested workers; workers without data are omitted
    async fn fetch_samples(
        &self,
        worker_names: &[String],
    ) -> Result<HashMap<String, WorkerSample>, TelemetryError>;
}
