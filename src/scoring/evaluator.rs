//! Evaluation Loop
//!
//! Drives fetch → score → publish on a fixed interval, independently of the
//! registrar. Transient failures skip the pass and wait for the next tick;
//! invariant violations stop the loop.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, error, info, warn};

use crate::database::{MappingStore, group_by_identity};
use crate::scoring::engine::{ScoringEngine, ScoringError};
use crate::scoring::publisher::WeightPublisher;
use crate::telemetry::TelemetrySource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    StoreUnavailable(String),
    TelemetryFailed(String),
    TelemetryTimeout,
    PublishFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StoreUnavailable(e) => write!(f, "mapping store unavailable: {}", e),
            Self::TelemetryFailed(e) => write!(f, "telemetry fetch failed: {}", e),
            Self::TelemetryTimeout => write!(f, "telemetry fetch timed out"),
            Self::PublishFailed(e) => write!(f, "weight publish failed: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// Scores were handed to the publisher
    Published { scores: BTreeMap<String, f64> },
    /// No bound identities, or every score was zero
    NothingToPublish,
    /// Transient failure; retried on the next tick
    Skipped(SkipReason),
}

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Scoring(#[from] ScoringError),
}

pub struct EvaluationLoop {
    store: Arc<dyn MappingStore>,
    telemetry: Arc<dyn TelemetrySource>,
    publisher: Arc<dyn WeightPublisher>,
    engine: ScoringEngine,
    interval: Duration,
    fetch_timeout: Duration,
}

impl EvaluationLoop {
    pub fn new(
        store: Arc<dyn MappingStore>,
        telemetry: Arc<dyn TelemetrySource>,
        publisher: Arc<dyn WeightPublisher>,
        engine: ScoringEngine,
        interval: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            telemetry,
            publisher,
            engine,
            interval,
            fetch_timeout,
        }
    }

    /// Run one evaluation pass
    pub async fn run_pass(&self) -> Result<PassOutcome, EvaluationError> {
        let mappings = match self.store.snapshot().await {
            Ok(mappings) => mappings,
            Err(e) => {
                error!(error = %e, "Mapping snapshot failed");
                return Ok(PassOutcome::Skipped(SkipReason::StoreUnavailable(e.to_string())));
            }
        };

        let workers_by_identity = group_by_identity(mappings);

        if workers_by_identity.is_empty() {
            info!("No bound workers, nothing to score");
            return Ok(PassOutcome::NothingToPublish);
        }

        let worker_names: Vec<String> = workers_by_identity.values().flatten().cloned().collect();

        // One snapshot for every identity in the pass
        let samples = match timeout(self.fetch_timeout, self.telemetry.fetch_samples(&worker_names))
            .await
        {
            Ok(Ok(samples)) => samples,
            Ok(Err(e)) => {
                error!(error = %e, "Telemetry fetch failed, skipping pass");
                return Ok(PassOutcome::Skipped(SkipReason::TelemetryFailed(e.to_string())));
            }
            Err(_) => {
                error!(
                    timeout_secs = self.fetch_timeout.as_secs(),
                    "Telemetry fetch timed out, skipping pass"
                );
                return Ok(PassOutcome::Skipped(SkipReason::TelemetryTimeout));
            }
        };

        let report = self.engine.score(&workers_by_identity, &samples).inspect_err(|e| {
            error!(error = %e, "Scoring invariant violated");
        })?;

        for (identity, detail) in &report.identities {
            debug!(
                identity = %identity,
                effective_work = detail.effective_work,
                avg_uptime = detail.avg_uptime,
                sampled = detail.sampled_workers,
                bound = detail.bound_workers,
                score = detail.score,
                "Identity scored"
            );
        }

        if report.all_zero() {
            warn!(
                identities = report.identities.len(),
                "All scores are zero, skipping weight publish"
            );
            return Ok(PassOutcome::NothingToPublish);
        }

        let scores = report.scores();
        if let Err(e) = self.publisher.publish(&scores).await {
            error!(error = %format!("{:#}", e), "Weight publish failed");
            return Ok(PassOutcome::Skipped(SkipReason::PublishFailed(format!("{:#}", e))));
        }

        info!(
            identities = scores.len(),
            max_work = report.max_work,
            "Evaluation pass published"
        );
        Ok(PassOutcome::Published { scores })
    }

    /// Run passes forever; returns only on an invariant violation
    pub async fn run(self) -> Result<(), EvaluationError> {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = self.interval.as_secs(), "Evaluation loop started");

        loop {
            ticker.tick().await;
            match self.run_pass().await? {
                PassOutcome::Skipped(reason) => {
                    warn!(reason = %reason, "Evaluation pass skipped, retrying next cycle")
                }
                PassOutcome::NothingToPublish | PassOutcome::Published { .. } => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MemoryMappingStore, WorkerMapping};
    use crate::scoring::engine::ScoringParams;
    use crate::telemetry::{TelemetryError, WorkerSample};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    struct FixedTelemetry(HashMap<String, WorkerSample>);

    #[async_trait]
    impl TelemetrySource for FixedTelemetry {
        async fn fetch_samples(
            &self,
            _: &[String],
        ) -> Result<HashMap<String, WorkerSample>, TelemetryError> {
            Ok(self.0.clone())
        }
    }

    struct SlowTelemetry;

    #[async_trait]
    impl TelemetrySource for SlowTelemetry {
        async fn fetch_samples(
            &self,
            _: &[String],
        ) -> Result<HashMap<String, WorkerSample>, TelemetryError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(HashMap::new())
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<BTreeMap<String, f64>>>,
    }

    #[async_trait]
    impl WeightPublisher for RecordingPublisher {
        async fn publish(&self, weights: &BTreeMap<String, f64>) -> anyhow::Result<()> {
            self.published.lock().await.push(weights.clone());
            Ok(())
        }
    }

    async fn store_with(pairs: &[(&str, &str)]) -> Arc<MemoryMappingStore> {
        let store = Arc::new(MemoryMappingStore::new());
        for (identity, worker) in pairs {
            store
                .insert(&WorkerMapping {
                    identity: identity.to_string(),
                    worker_name: worker.to_string(),
                    bound_at: Utc::now(),
                    validator_scope: "test".to_string(),
                    signed_at: 0,
                    signature: String::new(),
                })
                .await
                .unwrap();
        }
        store
    }

    fn evaluation(
        store: Arc<MemoryMappingStore>,
        telemetry: Arc<dyn TelemetrySource>,
        publisher: Arc<RecordingPublisher>,
    ) -> EvaluationLoop {
        EvaluationLoop::new(
            store,
            telemetry,
            publisher,
            ScoringEngine::new(ScoringParams::default()),
            Duration::from_secs(60),
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn test_pass_publishes_scores() {
        let store = store_with(&[("X", "X.1"), ("Y", "Y.1")]).await;
        let telemetry = Arc::new(FixedTelemetry(HashMap::from([
            ("X.1".to_string(), WorkerSample::new("X.1", 100, 50.0, 0.9)),
            ("Y.1".to_string(), WorkerSample::new("Y.1", 50, 50.0, 1.0)),
        ])));
        let publisher = Arc::new(RecordingPublisher::default());

        let outcome = evaluation(store, telemetry, publisher.clone())
            .run_pass()
            .await
            .unwrap();

        let expected = BTreeMap::from([("X".to_string(), 0.81), ("Y".to_string(), 0.5)]);
        assert_eq!(outcome, PassOutcome::Published { scores: expected.clone() });
        assert_eq!(*publisher.published.lock().await, vec![expected]);
    }

    #[tokio::test]
    async fn test_empty_store_publishes_nothing() {
        let publisher = Arc::new(RecordingPublisher::default());
        let outcome = evaluation(
            store_with(&[]).await,
            Arc::new(FixedTelemetry(HashMap::new())),
            publisher.clone(),
        )
        .run_pass()
        .await
        .unwrap();

        assert_eq!(outcome, PassOutcome::NothingToPublish);
        assert!(publisher.published.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_all_zero_scores_not_published() {
        let publisher = Arc::new(RecordingPublisher::default());
        let outcome = evaluation(
            store_with(&[("X", "X.1")]).await,
            Arc::new(FixedTelemetry(HashMap::new())),
            publisher.clone(),
        )
        .run_pass()
        .await
        .unwrap();

        assert_eq!(outcome, PassOutcome::NothingToPublish);
        assert!(publisher.published.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_skips_pass() {
        let publisher = Arc::new(RecordingPublisher::default());
        let outcome = evaluation(
            store_with(&[("X", "X.1")]).await,
            Arc::new(SlowTelemetry),
            publisher.clone(),
        )
        .run_pass()
        .await
        .unwrap();

        assert_eq!(outcome, PassOutcome::Skipped(SkipReason::TelemetryTimeout));
        assert!(publisher.published.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_invariant_violation_is_fatal() {
        let telemetry = Arc::new(FixedTelemetry(HashMap::from([(
            "X.1".to_string(),
            WorkerSample::new("X.1", 1, f64::NAN, 1.0),
        )])));
        let result = evaluation(
            store_with(&[("X", "X.1")]).await,
            telemetry,
            Arc::new(RecordingPublisher::default()),
        )
        .run_pass()
        .await;

        assert!(matches!(result, Err(EvaluationError::Scoring(_))));
    }
}
