//! In-memory Mapping Store
//!
//! Used when persistence is disabled and throughout the tests. A single write
//! lock over the table gives the same first-bind-wins semantics as the SQLite
//! primary key.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::database::{InsertOutcome, MappingStore, StoreError, WorkerMapping};

#[derive(Default)]
pub struct MemoryMappingStore {
    // worker_name -> mapping
    rows: RwLock<HashMap<String, WorkerMapping>>,
}

impl MemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_mappings(mappings: &mut [WorkerMapping]) {
    mappings.sort_by(|a, b| {
        a.identity
            .cmp(&b.identity)
            .then(a.bound_at.cmp(&b.bound_at))
            .then_with(|| a.worker_name.cmp(&b.worker_name))
    });
}

#[async_trait]
impl MappingStore for MemoryMappingStore {
    async fn insert(&self, mapping: &WorkerMapping) -> Result<InsertOutcome, StoreError> {
        let mut rows = self.rows.write().await;
        match rows.get(&mapping.worker_name) {
            Some(existing) if existing.identity == mapping.identity => {
                Ok(InsertOutcome::AlreadyBound)
            }
            Some(existing) => Ok(InsertOutcome::Taken {
                owner: existing.identity.clone(),
            }),
            None => {
                rows.insert(mapping.worker_name.clone(), mapping.clone());
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn remove(&self, identity: &str, worker_name: &str) -> Result<bool, StoreError> {
        let mut rows = self.rows.write().await;
        if rows.get(worker_name).is_some_and(|m| m.identity == identity) {
            rows.remove(worker_name);
            return Ok(true);
        }
        Ok(false)
    }

    async fn remove_all(&self, identity: &str) -> Result<u64, StoreError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, m| m.identity != identity);
        Ok((before - rows.len()) as u64)
    }

    async fn workers_for(&self, identity: &str) -> Result<Vec<WorkerMapping>, StoreError> {
        let rows = self.rows.read().await;
        let mut owned: Vec<_> = rows
            .values()
            .filter(|m| m.identity == identity)
            .cloned()
            .collect();
        sort_mappings(&mut owned);
        Ok(owned)
    }

    async fn snapshot(&self) -> Result<Vec<WorkerMapping>, StoreError> {
        let rows = self.rows.read().await;
        let mut all: Vec<_> = rows.values().cloned().collect();
        sort_mappings(&mut all);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn mapping(identity: &str, worker: &str) -> WorkerMapping {
        WorkerMapping {
            identity: identity.to_string(),
            worker_name: worker.to_string(),
            bound_at: Utc::now(),
            validator_scope: "local".to_string(),
            signed_at: 0,
            signature: String::new(),
        }
    }

    #[tokio::test]
    async fn test_first_bind_wins() {
        let store = MemoryMappingStore::new();
        assert_eq!(store.insert(&mapping("a", "a.w")).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert(&mapping("a", "a.w")).await.unwrap(), InsertOutcome::AlreadyBound);
        assert_eq!(
            store.insert(&mapping("b", "a.w")).await.unwrap(),
            InsertOutcome::Taken { owner: "a".to_string() }
        );
    }

    #[tokio::test]
    async fn test_racing_inserts_resolve_to_one_owner() {
        let store = Arc::new(MemoryMappingStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert(&mapping(&format!("id{}", i), "shared")).await.unwrap()
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() == InsertOutcome::Inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(store.snapshot().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ordering_and_removal() {
        let store = MemoryMappingStore::new();
        let mut late = mapping("a", "a.early-name");
        late.bound_at = Utc::now() + Duration::seconds(5);
        store.insert(&late).await.unwrap();
        store.insert(&mapping("a", "a.z")).await.unwrap();
        store.insert(&mapping("b", "b.1")).await.unwrap();

        let names: Vec<_> = store
            .workers_for("a")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.worker_name)
            .collect();
        assert_eq!(names, vec!["a.z", "a.early-name"]);

        assert!(!store.remove("b", "a.z").await.unwrap());
        assert_eq!(store.remove_all("a").await.unwrap(), 2);
        assert_eq!(store.snapshot().await.unwrap().len(), 1);
    }
}
