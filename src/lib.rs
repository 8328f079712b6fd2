//! Silica Validator
//!
//! Validator node that binds mining workers to network identities (hotkeys)
//! through signed requests, scores each identity from pool telemetry, and
//! hands the scores to the weight-setting layer.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs         - Crate root with re-exports
//! ├── main.rs        - Server entrypoint
//! ├── bin/worker_cli.rs - Signing client for miners
//! ├── config.rs      - Configuration management
//! ├── crypto/        - Identity decoding and signatures
//! │   ├── identity.rs - SS58 / hex public keys
//! │   └── signing.rs  - sr25519/ed25519 verification and local signing
//! ├── registrar/     - Bind / unbind / list with per-identity locking
//! ├── database/      - Mapping store (SQLite and in-memory)
//! ├── telemetry/     - Worker samples from Prometheus
//! ├── scoring/       - Scoring engine, evaluation loop, weight publisher
//! ├── federation/    - Fan-out client over several validators
//! └── api/           - HTTP API, middleware and secure HTTP client
//! ```

pub mod api;
pub mod config;
pub mod crypto;
pub mod database;
pub mod federation;
pub mod registrar;
pub mod scoring;
pub mod telemetry;

// Re-export main types for convenience
pub use config::ValidatorConfig;
pub use crypto::{LocalSigner, SignatureScheme, SignatureVerifier, SignedAction};
pub use database::{
    DatabasePool, InsertOutcome, MappingStore, MemoryMappingStore, SqliteMappingStore, StoreError,
    WorkerMapping,
};
pub use federation::{PeerClient, PeerResult};
pub use registrar::{
    BindOutcome, BindRequest, Registrar, RejectReason, UnbindAllRequest, UnbindRequest,
};
pub use scoring::{
    EvaluationLoop, HttpWeightPublisher, LogWeightPublisher, PassOutcome, ScoringEngine,
    ScoringParams, WeightPublisher,
};
pub use telemetry::{PrometheusTelemetry, TelemetrySource, WorkerSample};

// Re-export API types
pub use api::{
    HttpSecurityConfig, RegistrationApiState, SecureHttpClient, SecurityMiddlewareConfig,
    SecurityState, build_app,
};
