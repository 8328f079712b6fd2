//! Trust Scoring Engine
//!
//! One batch pass over every identity with a bound worker:
//!
//! 1. effective work = Σ valid_shares × difficulty over sampled workers
//! 2. normalized = work / max_work (0 for everyone when max_work is 0)
//! 3. penalized = normalized × avg_uptime^alpha
//! 4. final = clamp(penalized, 0, 1), rounded to the configured precision
//!
//! The maximum is a local of the pass; nothing carries over between passes.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::config::ScoringConfig;
use crate::telemetry::WorkerSample;

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("scoring invariant violated: {0}")]
    InvariantViolation(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringParams {
    pub uptime_alpha: f64,
    pub precision_digits: u32,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            uptime_alpha: 2.0,
            precision_digits: 8,
        }
    }
}

impl From<&ScoringConfig> for ScoringParams {
    fn from(config: &ScoringConfig) -> Self {
        Self {
            uptime_alpha: config.uptime_alpha,
            precision_digits: config.precision_digits,
        }
    }
}

/// Per-identity breakdown of one pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityScore {
    pub effective_work: f64,
    pub normalized: f64,
    pub avg_uptime: f64,
    pub score: f64,
    pub bound_workers: usize,
    pub sampled_workers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreReport {
    pub max_work: f64,
    pub identities: BTreeMap<String, IdentityScore>,
}

impl ScoreReport {
    /// Identity → final score
    pub fn scores(&self) -> BTreeMap<String, f64> {
        self.identities
            .iter()
            .map(|(identity, s)| (identity.clone(), s.score))
            .collect()
    }

    /// `true` if there is nothing worth publishing
    pub fn all_zero(&self) -> bool {
        self.identities.values().all(|s| s.score == 0.0)
    }
}

/// Round to `digits` decimal places, correctly rounded with ties to even
///
/// Goes through the decimal expansion of the exact binary value, so
/// `0.125` at 2 digits is `0.12` and `2.675` (stored just below) is `2.67`.
pub fn round_to(value: f64, digits: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    format!("{:.*}", digits as usize, value)
        .parse()
        .unwrap_or(value)
}

pub struct ScoringEngine {
    params: ScoringParams,
}

impl ScoringEngine {
    pub fn new(params: ScoringParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> ScoringParams {
        self.params
    }

    /// Score every identity in `workers_by_identity` against one telemetry snapshot
    pub fn score(
        &self,
        workers_by_identity: &BTreeMap<String, Vec<String>>,
        samples: &HashMap<String, WorkerSample>,
    ) -> Result<ScoreReport, ScoringError> {
        // Effective work and uptime must all be materialized before the maximum is known
        let mut partials = Vec::with_capacity(workers_by_identity.len());
        for (identity, workers) in workers_by_identity {
            let sampled: Vec<&WorkerSample> =
                workers.iter().filter_map(|w| samples.get(w)).collect();

            let effective_work: f64 = sampled.iter().map(|s| s.effective_work()).sum();
            if !effective_work.is_finite() || effective_work < 0.0 {
                return Err(ScoringError::InvariantViolation(format!(
                    "effective work {} for identity {} is not a finite non-negative number",
                    effective_work, identity
                )));
            }
            let avg_uptime = if sampled.is_empty() {
                0.0
            } else {
                sampled
                    .iter()
                    .map(|s| s.uptime_fraction.clamp(0.0, 1.0))
                    .sum::<f64>()
                    / sampled.len() as f64
            };

            partials.push((identity, effective_work, avg_uptime, workers.len(), sampled.len()));
        }

        // Every work value is finite and non-negative here, so the maximum is too
        let max_work = partials
            .iter()
            .map(|(_, work, ..)| *work)
            .fold(0.0_f64, f64::max);

        let mut identities = BTreeMap::new();
        for (identity, effective_work, avg_uptime, bound_workers, sampled_workers) in partials {
            let normalized = if max_work == 0.0 {
                0.0
            } else {
                effective_work / max_work
            };
            let penalized = normalized * avg_uptime.powf(self.params.uptime_alpha);
            let score = round_to(penalized.clamp(0.0, 1.0), self.params.precision_digits);

            if !(0.0..=1.0).contains(&score) {
                return Err(ScoringError::InvariantViolation(format!(
                    "score {} for identity {} is outside [0, 1]",
                    score, identity
                )));
            }

            identities.insert(
                identity.clone(),
                IdentityScore {
                    effective_work,
                    normalized,
                    avg_uptime,
                    score,
                    bound_workers,
                    sampled_workers,
                },
            );
        }

        Ok(ScoreReport {
            max_work,
            identities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ScoringEngine {
        ScoringEngine::new(ScoringParams::default())
    }

    fn setup(
        entries: &[(&str, &[&str])],
        samples: &[WorkerSample],
    ) -> (BTreeMap<String, Vec<String>>, HashMap<String, WorkerSample>) {
        let workers = entries
            .iter()
            .map(|(id, ws)| (id.to_string(), ws.iter().map(|w| w.to_string()).collect()))
            .collect();
        let samples = samples
            .iter()
            .map(|s| (s.worker_name.clone(), s.clone()))
            .collect();
        (workers, samples)
    }

    #[test]
    fn test_reference_scores() {
        let (workers, samples) = setup(
            &[("X", &["X.1"]), ("Y", &["Y.1"])],
            &[
                WorkerSample::new("X.1", 100, 50.0, 0.9),
                WorkerSample::new("Y.1", 50, 50.0, 1.0),
            ],
        );

        let report = engine().score(&workers, &samples).unwrap();
        assert_eq!(report.max_work, 5000.0);
        assert_eq!(report.identities["X"].score, 0.81);
        assert_eq!(report.identities["Y"].score, 0.5);
    }

    #[test]
    fn test_zero_work_scores_zero() {
        let (workers, samples) = setup(
            &[("A", &["A.1"]), ("B", &["B.1"])],
            &[
                WorkerSample::new("A.1", 0, 0.0, 1.0),
                WorkerSample::new("B.1", 0, 12.0, 0.5),
            ],
        );

        let report = engine().score(&workers, &samples).unwrap();
        assert!(report.all_zero());
        assert!(report.identities.values().all(|s| s.score == 0.0 && !s.normalized.is_nan()));
    }

    #[test]
    fn test_unsampled_workers_excluded_from_uptime() {
        let (workers, samples) = setup(
            &[("A", &["A.1", "A.2"]), ("B", &["B.1"])],
            &[
                WorkerSample::new("A.1", 10, 10.0, 1.0),
                WorkerSample::new("B.1", 10, 10.0, 1.0),
            ],
        );

        let report = engine().score(&workers, &samples).unwrap();
        let a = &report.identities["A"];
        assert_eq!(a.avg_uptime, 1.0);
        assert_eq!(a.bound_workers, 2);
        assert_eq!(a.sampled_workers, 1);
        assert_eq!(a.score, 1.0);
    }

    #[test]
    fn test_identity_without_samples_scores_zero() {
        let (workers, samples) = setup(
            &[("A", &["A.1"]), ("ghost", &["ghost.1"])],
            &[WorkerSample::new("A.1", 10, 10.0, 1.0)],
        );

        let report = engine().score(&workers, &samples).unwrap();
        assert_eq!(report.identities["ghost"].score, 0.0);
        assert_eq!(report.identities["ghost"].avg_uptime, 0.0);
    }

    #[test]
    fn test_work_sums_across_workers() {
        let (workers, samples) = setup(
            &[("A", &["A.1", "A.2"]), ("B", &["B.1"])],
            &[
                WorkerSample::new("A.1", 10, 10.0, 1.0),
                WorkerSample::new("A.2", 30, 10.0, 0.5),
                WorkerSample::new("B.1", 20, 10.0, 1.0),
            ],
        );

        let report = engine().score(&workers, &samples).unwrap();
        assert_eq!(report.identities["A"].effective_work, 400.0);
        assert_eq!(report.identities["A"].avg_uptime, 0.75);
        assert_eq!(report.identities["A"].score, 0.5625);
        assert_eq!(report.identities["B"].score, 0.5);
    }

    #[test]
    fn test_out_of_range_uptime_is_clamped() {
        let (workers, samples) = setup(
            &[("A", &["A.1"])],
            &[WorkerSample::new("A.1", 10, 10.0, 1.7)],
        );

        let report = engine().score(&workers, &samples).unwrap();
        assert_eq!(report.identities["A"].score, 1.0);
    }

    #[test]
    fn test_non_finite_work_is_invariant_violation() {
        let (workers, samples) = setup(
            &[("A", &["A.1"])],
            &[WorkerSample::new("A.1", 10, f64::NAN, 1.0)],
        );
        assert!(matches!(
            engine().score(&workers, &samples),
            Err(ScoringError::InvariantViolation(_))
        ));

        let (workers, samples) = setup(
            &[("A", &["A.1"])],
            &[WorkerSample::new("A.1", 10, f64::INFINITY, 1.0)],
        );
        assert!(engine().score(&workers, &samples).is_err());
    }

    #[test]
    fn test_negative_work_is_invariant_violation() {
        // Every identity negative: would otherwise collapse into an all-zero pass
        let (workers, samples) = setup(
            &[("A", &["A.1"]), ("B", &["B.1"])],
            &[
                WorkerSample::new("A.1", 10, -5.0, 1.0),
                WorkerSample::new("B.1", 10, -1.0, 1.0),
            ],
        );
        assert!(matches!(
            engine().score(&workers, &samples),
            Err(ScoringError::InvariantViolation(_))
        ));

        // One negative identity next to a positive one must not be clamped away
        let (workers, samples) = setup(
            &[("A", &["A.1"]), ("B", &["B.1"])],
            &[
                WorkerSample::new("A.1", 10, -5.0, 1.0),
                WorkerSample::new("B.1", 10, 3.0, 1.0),
            ],
        );
        let err = engine().score(&workers, &samples).unwrap_err();
        assert!(err.to_string().contains("identity A"));
    }

    #[test]
    fn test_scores_always_in_unit_interval() {
        let (workers, samples) = setup(
            &[("A", &["A.1"]), ("B", &["B.1"]), ("C", &["C.1"])],
            &[
                WorkerSample::new("A.1", 7, 3.3, 0.33),
                WorkerSample::new("B.1", 1_000_000, 1e9, 0.999),
                WorkerSample::new("C.1", 1, 1e-9, 0.0),
            ],
        );

        let report = engine().score(&workers, &samples).unwrap();
        assert!(report.scores().values().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round_to(0.123456789, 8), 0.12345679);
        assert_eq!(round_to(0.8100000000000001, 8), 0.81);
    }

    #[test]
    fn test_rounding_ties_to_even() {
        // Exact binary ties
        assert_eq!(round_to(0.125, 2), 0.12);
        assert_eq!(round_to(0.375, 2), 0.38);
        assert_eq!(round_to(0.5, 0), 0.0);
        assert_eq!(round_to(2.5, 0), 2.0);
        // Stored just below the decimal tie
        assert_eq!(round_to(2.675, 2), 2.67);
        assert!(round_to(f64::NAN, 8).is_nan());
    }
}
