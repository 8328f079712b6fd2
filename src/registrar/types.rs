//! Request envelopes and outcomes for the registrar

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Signed request binding a worker to an identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindRequest {
    pub identity: String,
    pub worker_name: String,
    /// Unix seconds
    pub timestamp: i64,
    pub signature: String,
}

/// Signed request releasing one worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnbindRequest {
    pub identity: String,
    pub worker_name: String,
    pub timestamp: i64,
    pub signature: String,
}

/// Signed request releasing every worker of an identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnbindAllRequest {
    pub identity: String,
    pub timestamp: i64,
    pub signature: String,
    /// Must be `true`; previews are the caller's job
    #[serde(default)]
    pub confirm: bool,
}

/// Successful bind result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindOutcome {
    /// A new mapping was written
    Bound,
    /// The identity already held this worker
    AlreadyBound,
}

/// Why the registrar refused a request
///
/// Every failure a caller can see is one of these; internal errors never
/// escape the registrar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RejectReason {
    #[error("worker name must contain the identity")]
    NamingViolation,

    #[error("timestamp is outside the freshness window")]
    StaleTimestamp,

    #[error("signature does not authenticate the identity")]
    InvalidSignature,

    #[error("worker is already bound to another identity")]
    WorkerTaken,

    #[error("no binding exists for this identity and worker")]
    NotFound,

    #[error("bulk unbind requires confirm=true")]
    ConfirmationRequired,

    #[error("mapping store is unavailable, retry later")]
    Unavailable,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NamingViolation => "NamingViolation",
            Self::StaleTimestamp => "StaleTimestamp",
            Self::InvalidSignature => "InvalidSignature",
            Self::WorkerTaken => "WorkerTaken",
            Self::NotFound => "NotFound",
            Self::ConfirmationRequired => "ConfirmationRequired",
            Self::Unavailable => "Unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_serializes_as_name() {
        let json = serde_json::to_string(&RejectReason::WorkerTaken).unwrap();
        assert_eq!(json, "\"WorkerTaken\"");
        assert_eq!(RejectReason::WorkerTaken.as_str(), "WorkerTaken");
    }

    #[test]
    fn test_confirm_defaults_to_false() {
        let request: UnbindAllRequest =
            serde_json::from_str(r#"{"identity":"x","timestamp":1,"signature":"00"}"#).unwrap();
        assert!(!request.confirm);
    }
}
