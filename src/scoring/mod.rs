//! Trust scoring
//!
//! Turns per-worker telemetry into one bounded score per identity and hands
//! the vector to the weight publisher.
//!
//! ```text
//! ┌──────────────┐   snapshot   ┌────────────────┐   scores   ┌─────────────────┐
//! │ MappingStore │─────────────►│ ScoringEngine  │───────────►│ WeightPublisher │
//! └──────────────┘              └────────────────┘            └─────────────────┘
//!                                      ▲
//!                   ┌──────────────────┴─┐
//!                   │ TelemetrySource    │ (one fetch per pass, under timeout)
//!                   └────────────────────┘
//! ```

pub mod engine;
pub mod evaluator;
pub mod publisher;

pub use engine::{IdentityScore, ScoreReport, ScoringEngine, ScoringError, ScoringParams, round_to};
pub use evaluator::{EvaluationError, EvaluationLoop, PassOutcome, SkipReason};
pub use publisher::{HttpWeightPublisher, LogWeightPublisher, WeightPublisher};
