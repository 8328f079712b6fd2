//! Registrar - binds workers to identities
//!
//! Validation order for a bind is naming → freshness → signature → uniqueness,
//! short-circuiting on the first failure. Mutations hold the per-identity lock
//! so a bind and a bulk unbind for the same identity never interleave.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::RegistrarConfig;
use crate::crypto::{SignatureVerifier, SignedAction};
use crate::database::{InsertOutcome, MappingStore, StoreError, WorkerMapping};
use crate::registrar::locks::IdentityLocks;
use crate::registrar::types::{
    BindOutcome, BindRequest, RejectReason, UnbindAllRequest, UnbindRequest,
};

/// `true` if `timestamp` is within `window_secs` of `now`, in either direction
pub fn check_freshness(timestamp: i64, now: DateTime<Utc>, window_secs: u64) -> bool {
    let skew = now.timestamp().saturating_sub(timestamp).saturating_abs();
    u64::try_from(skew).is_ok_and(|skew| skew <= window_secs)
}

/// A worker name is acceptable only if it embeds the identity
pub fn check_naming(identity: &str, worker_name: &str) -> bool {
    !identity.is_empty() && worker_name.contains(identity)
}

pub struct Registrar {
    store: Arc<dyn MappingStore>,
    verifier: SignatureVerifier,
    locks: IdentityLocks,
    freshness_window_secs: u64,
    validator_scope: String,
}

impl Registrar {
    pub fn new(store: Arc<dyn MappingStore>, config: &RegistrarConfig) -> Self {
        Self {
            store,
            verifier: SignatureVerifier::new(config.signature_scheme),
            locks: IdentityLocks::new(),
            freshness_window_secs: config.freshness_window_secs,
            validator_scope: config.validator_scope.clone(),
        }
    }

    pub fn store(&self) -> &Arc<dyn MappingStore> {
        &self.store
    }

    /// Bind a worker to an identity
    pub async fn bind(&self, request: &BindRequest) -> Result<BindOutcome, RejectReason> {
        self.bind_at(request, Utc::now()).await
    }

    /// Bind, judging freshness against `now`
    pub async fn bind_at(
        &self,
        request: &BindRequest,
        now: DateTime<Utc>,
    ) -> Result<BindOutcome, RejectReason> {
        let identity = request.identity.as_str();
        let worker = request.worker_name.as_str();

        if !check_naming(identity, worker) {
            return Err(self.reject("bind", identity, worker, RejectReason::NamingViolation));
        }

        if !check_freshness(request.timestamp, now, self.freshness_window_secs) {
            return Err(self.reject("bind", identity, worker, RejectReason::StaleTimestamp));
        }

        if !self.verifier.verify_action(
            identity,
            SignedAction::Bind,
            worker,
            request.timestamp,
            &request.signature,
        ) {
            return Err(self.reject("bind", identity, worker, RejectReason::InvalidSignature));
        }

        let mapping = WorkerMapping {
            identity: identity.to_string(),
            worker_name: worker.to_string(),
            bound_at: now,
            validator_scope: self.validator_scope.clone(),
            signed_at: request.timestamp,
            signature: request.signature.clone(),
        };

        let _guard = self.locks.acquire(identity).await;
        match self.store.insert(&mapping).await {
            Ok(InsertOutcome::Inserted) => {
                info!(identity = %identity, worker = %worker, "Worker bound");
                Ok(BindOutcome::Bound)
            }
            Ok(InsertOutcome::AlreadyBound) => {
                debug!(identity = %identity, worker = %worker, "Worker already bound to identity");
                Ok(BindOutcome::AlreadyBound)
            }
            Ok(InsertOutcome::Taken { owner }) => {
                debug!(worker = %worker, owner = %owner, "Worker held by another identity");
                Err(self.reject("bind", identity, worker, RejectReason::WorkerTaken))
            }
            Err(e) => Err(self.store_failure("bind", identity, e)),
        }
    }

    /// Release one worker
    pub async fn unbind(&self, request: &UnbindRequest) -> Result<(), RejectReason> {
        self.unbind_at(request, Utc::now()).await
    }

    pub async fn unbind_at(
        &self,
        request: &UnbindRequest,
        now: DateTime<Utc>,
    ) -> Result<(), RejectReason> {
        let identity = request.identity.as_str();
        let worker = request.worker_name.as_str();

        if !check_freshness(request.timestamp, now, self.freshness_window_secs) {
            return Err(self.reject("unbind", identity, worker, RejectReason::StaleTimestamp));
        }

        if !self.verifier.verify_action(
            identity,
            SignedAction::Unbind,
            worker,
            request.timestamp,
            &request.signature,
        ) {
            return Err(self.reject("unbind", identity, worker, RejectReason::InvalidSignature));
        }

        let _guard = self.locks.acquire(identity).await;
        match self.store.remove(identity, worker).await {
            Ok(true) => {
                info!(identity = %identity, worker = %worker, "Worker unbound");
                Ok(())
            }
            Ok(false) => Err(self.reject("unbind", identity, worker, RejectReason::NotFound)),
            Err(e) => Err(self.store_failure("unbind", identity, e)),
        }
    }

    /// Release every worker of an identity, returning how many were removed
    pub async fn unbind_all(&self, request: &UnbindAllRequest) -> Result<u64, RejectReason> {
        self.unbind_all_at(request, Utc::now()).await
    }

    pub async fn unbind_all_at(
        &self,
        request: &UnbindAllRequest,
        now: DateTime<Utc>,
    ) -> Result<u64, RejectReason> {
        let identity = request.identity.as_str();

        if !request.confirm {
            return Err(self.reject("unbind_all", identity, "*", RejectReason::ConfirmationRequired));
        }

        if !check_freshness(request.timestamp, now, self.freshness_window_secs) {
            return Err(self.reject("unbind_all", identity, "*", RejectReason::StaleTimestamp));
        }

        if !self.verifier.verify_action(
            identity,
            SignedAction::UnbindAll,
            identity,
            request.timestamp,
            &request.signature,
        ) {
            return Err(self.reject("unbind_all", identity, "*", RejectReason::InvalidSignature));
        }

        let _guard = self.locks.acquire(identity).await;
        match self.store.remove_all(identity).await {
            Ok(removed) => {
                info!(identity = %identity, removed = removed, "All workers unbound");
                Ok(removed)
            }
            Err(e) => Err(self.store_failure("unbind_all", identity, e)),
        }
    }

    /// Worker names bound to an identity, oldest binding first
    pub async fn list_workers(&self, identity: &str) -> Result<Vec<String>, RejectReason> {
        self.store
            .workers_for(identity)
            .await
            .map(|rows| rows.into_iter().map(|m| m.worker_name).collect())
            .map_err(|e| self.store_failure("list_workers", identity, e))
    }

    /// Every current binding on this validator
    pub async fn mappings(&self) -> Result<Vec<WorkerMapping>, RejectReason> {
        self.store
            .snapshot()
            .await
            .map_err(|e| self.store_failure("mappings", "*", e))
    }

    fn reject(&self, op: &str, identity: &str, worker: &str, reason: RejectReason) -> RejectReason {
        warn!(
            op = op,
            identity = %identity,
            worker = %worker,
            reason = reason.as_str(),
            "Registration request rejected"
        );
        reason
    }

    fn store_failure(&self, op: &str, identity: &str, err: StoreError) -> RejectReason {
        error!(op = op, identity = %identity, error = %err, "Mapping store failure");
        RejectReason::Unavailable
    }
}
