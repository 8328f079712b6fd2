//! Worker Registration Registrar
//!
//! Maintains the identity → worker bindings of this validator.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌────────────────┐
//! │ BindRequest  │────►│  Registrar   │────►│  MappingStore  │
//! │ (signed)     │     │ (validation) │     │ (sqlite / mem) │
//! └──────────────┘     └──────────────┘     └────────────────┘
//!                             │
//!                     ┌───────┴────────┐
//!                     ▼                ▼
//!          ┌──────────────────┐ ┌──────────────┐
//!          │ SignatureVerifier│ │ IdentityLocks│
//!          └──────────────────┘ └──────────────┘
//! ```
//!
//! ## Rules
//!
//! - A worker name must contain the identity that claims it
//! - Requests must be signed and carry a fresh timestamp
//! - A worker name belongs to at most one identity; first bind wins
//! - Re-binding the same pair is a no-op success

mod locks;
mod manager;
mod types;

pub use locks::{IdentityGuard, IdentityLocks};
pub use manager::{Registrar, check_freshness, check_naming};
pub use types::{BindOutcome, BindRequest, RejectReason, UnbindAllRequest, UnbindRequest};
