//! Mapping Repository - SQLite operations for worker bindings using sqlx

use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::database::{InsertOutcome, MappingStore, StoreError, WorkerMapping};

/// Attempts before an insert gives up on a name that keeps changing hands
const INSERT_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct SqliteMappingStore {
    pool: SqlitePool,
}

impl SqliteMappingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn owner_of(&self, worker_name: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT identity FROM worker_mappings WHERE worker_name = ?")
            .bind(worker_name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row.try_get::<String, _>("identity"))
            .transpose()
            .map_err(StoreError::from)
    }
}

fn row_to_mapping(row: &SqliteRow) -> Result<WorkerMapping, StoreError> {
    let micros: i64 = row.try_get("bound_at_micros")?;
    let bound_at = DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::Corrupt(format!("bound_at_micros out of range: {}", micros)))?;

    Ok(WorkerMapping {
        identity: row.try_get("identity")?,
        worker_name: row.try_get("worker_name")?,
        bound_at,
        validator_scope: row.try_get("validator_scope")?,
        signed_at: row.try_get("signed_at")?,
        signature: row.try_get("signature")?,
    })
}

#[async_trait]
impl MappingStore for SqliteMappingStore {
    async fn insert(&self, mapping: &WorkerMapping) -> Result<InsertOutcome, StoreError> {
        for _ in 0..INSERT_ATTEMPTS {
            let result = sqlx::query(
                r#"
                INSERT INTO worker_mappings
                (worker_name, identity, bound_at_micros, signed_at, signature, validator_scope)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (worker_name) DO NOTHING
                "#,
            )
            .bind(&mapping.worker_name)
            .bind(&mapping.identity)
            .bind(mapping.bound_at.timestamp_micros())
            .bind(mapping.signed_at)
            .bind(&mapping.signature)
            .bind(&mapping.validator_scope)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                debug!(worker = %mapping.worker_name, identity = %mapping.identity, "Mapping inserted");
                return Ok(InsertOutcome::Inserted);
            }

            // Row existed; it may have been removed again before this lookup
            match self.owner_of(&mapping.worker_name).await? {
                Some(owner) if owner == mapping.identity => return Ok(InsertOutcome::AlreadyBound),
                Some(owner) => return Ok(InsertOutcome::Taken { owner }),
                None => continue,
            }
        }

        Err(StoreError::Unavailable(format!(
            "worker {} changed owner repeatedly during insert",
            mapping.worker_name
        )))
    }

    async fn remove(&self, identity: &str, worker_name: &str) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM worker_mappings WHERE identity = ? AND worker_name = ?")
                .bind(identity)
                .bind(worker_name)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_all(&self, identity: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM worker_mappings WHERE identity = ?")
            .bind(identity)
            .execute(&self.pool)
            .await?;

        debug!(identity = %identity, removed = result.rows_affected(), "Mappings removed");
        Ok(result.rows_affected())
    }

    async fn workers_for(&self, identity: &str) -> Result<Vec<WorkerMapping>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT worker_name, identity, bound_at_micros, signed_at, signature, validator_scope
            FROM worker_mappings
            WHERE identity = ?
            ORDER BY bound_at_micros ASC, worker_name ASC
            "#,
        )
        .bind(identity)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_mapping).collect()
    }

    async fn snapshot(&self) -> Result<Vec<WorkerMapping>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT worker_name, identity, bound_at_micros, signed_at, signature, validator_scope
            FROM worker_mappings
            ORDER BY identity ASC, bound_at_micros ASC, worker_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_mapping).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabasePool;
    use chrono::{Duration, Utc};

    async fn store() -> SqliteMappingStore {
        let db = DatabasePool::new("sqlite::memory:", 1).await.unwrap();
        db.init_schema().await.unwrap();
        db.mappings().clone()
    }

    fn mapping(identity: &str, worker: &str, offset_secs: i64) -> WorkerMapping {
        WorkerMapping {
            identity: identity.to_string(),
            worker_name: worker.to_string(),
            bound_at: Utc::now() + Duration::seconds(offset_secs),
            validator_scope: "validator-test".to_string(),
            signed_at: 1_700_000_000,
            signature: "ab".repeat(64),
        }
    }

    #[tokio::test]
    async fn test_insert_outcomes() {
        let store = store().await;

        assert_eq!(store.insert(&mapping("alice", "alice.1", 0)).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert(&mapping("alice", "alice.1", 1)).await.unwrap(), InsertOutcome::AlreadyBound);
        assert_eq!(
            store.insert(&mapping("bob", "alice.1", 2)).await.unwrap(),
            InsertOutcome::Taken { owner: "alice".to_string() }
        );
        assert_eq!(store.snapshot().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_workers_ordered_by_bind_time() {
        let store = store().await;
        store.insert(&mapping("alice", "alice.b", 10)).await.unwrap();
        store.insert(&mapping("alice", "alice.a", 20)).await.unwrap();
        store.insert(&mapping("alice", "alice.c", 0)).await.unwrap();

        let names: Vec<_> = store
            .workers_for("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.worker_name)
            .collect();
        assert_eq!(names, vec!["alice.c", "alice.b", "alice.a"]);
    }

    #[tokio::test]
    async fn test_remove_and_remove_all() {
        let store = store().await;
        store.insert(&mapping("alice", "alice.1", 0)).await.unwrap();
        store.insert(&mapping("alice", "alice.2", 0)).await.unwrap();
        store.insert(&mapping("bob", "bob.1", 0)).await.unwrap();

        assert!(!store.remove("bob", "alice.1").await.unwrap());
        assert!(store.remove("alice", "alice.1").await.unwrap());
        assert!(!store.remove("alice", "alice.1").await.unwrap());

        assert_eq!(store.remove_all("alice").await.unwrap(), 1);
        assert_eq!(store.remove_all("alice").await.unwrap(), 0);
        assert_eq!(store.workers_for("bob").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_audit_fields() {
        let store = store().await;
        let original = mapping("alice", "alice.rig", 0);
        store.insert(&original).await.unwrap();

        let loaded = store.workers_for("alice").await.unwrap().remove(0);
        assert_eq!(loaded.signature, original.signature);
        assert_eq!(loaded.signed_at, original.signed_at);
        assert_eq!(loaded.validator_scope, original.validator_scope);
        assert_eq!(loaded.bound_at.timestamp_micros(), original.bound_at.timestamp_micros());
    }
}
