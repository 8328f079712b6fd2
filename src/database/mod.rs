//! Mapping Store
//!
//! Durable table of identity → worker bindings. Two implementations share the
//! [`MappingStore`] trait:
//! - [`SqliteMappingStore`] backed by sqlx/SQLite (survives restarts)
//! - [`MemoryMappingStore`] for tests and persistence-disabled deployments
//!
//! Uniqueness of `worker_name` is enforced inside the store, so two identities
//! racing for the same name resolve to exactly one winner.

pub mod mappings;
pub mod memory;
pub mod pool;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub use mappings::SqliteMappingStore;
pub use memory::MemoryMappingStore;
pub use pool::DatabasePool;

/// One row of the mapping table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMapping {
    pub identity: String,
    pub worker_name: String,
    pub bound_at: DateTime<Utc>,
    /// Validator instance that accepted the binding
    pub validator_scope: String,
    /// Timestamp carried by the signed bind request
    pub signed_at: i64,
    /// Hex signature of the accepted bind request (audit only)
    pub signature: String,
}

/// Result of an insert attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New row written
    Inserted,
    /// Same identity already holds this worker; nothing written
    AlreadyBound,
    /// Worker is held by another identity
    Taken { owner: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("mapping store unavailable: {0}")]
    Unavailable(String),

    #[error("mapping store returned corrupt data: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Corrupt(err.to_string())
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Worker names per identity, keeping the snapshot's order within each identity
pub fn group_by_identity(mappings: Vec<WorkerMapping>) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for mapping in mappings {
        grouped
            .entry(mapping.identity)
            .or_default()
            .push(mapping.worker_name);
    }
    grouped
}

#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Insert a mapping unless the worker name is already bound
    async fn insert(&self, mapping: &WorkerMapping) -> Result<InsertOutcome, StoreError>;

    /// Remove one mapping; returns `false` if `(identity, worker_name)` was not bound
    async fn remove(&self, identity: &str, worker_name: &str) -> Result<bool, StoreError>;

    /// Remove every mapping owned by `identity`, returning the number removed
    async fn remove_all(&self, identity: &str) -> Result<u64, StoreError>;

    /// Mappings for one identity, ordered by bind time then worker name
    async fn workers_for(&self, identity: &str) -> Result<Vec<WorkerMapping>, StoreError>;

    /// Point-in-time copy of every mapping
    async fn snapshot(&self) -> Result<Vec<WorkerMapping>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(identity: &str, worker: &str) -> WorkerMapping {
        WorkerMapping {
            identity: identity.to_string(),
            worker_name: worker.to_string(),
            bound_at: Utc::now(),
            validator_scope: "test".to_string(),
            signed_at: 0,
            signature: String::new(),
        }
    }

    #[test]
    fn test_group_by_identity_keeps_order() {
        let grouped = group_by_identity(vec![
            mapping("B", "B.2"),
            mapping("A", "A.1"),
            mapping("B", "B.1"),
        ]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["A"], vec!["A.1".to_string()]);
        assert_eq!(grouped["B"], vec!["B.2".to_string(), "B.1".to_string()]);
        assert!(group_by_identity(Vec::new()).is_empty());
    }
}
