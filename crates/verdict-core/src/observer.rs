use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, VerdictError};
use crate::snapshot::ResourceSnapshot;

/// Which part of the external system a clause reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Selector {
    List { collection: String },
    Inspect { collection: String, id: String },
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::List { collection } => write!(f, "list {collection}"),
            Selector::Inspect { collection, id } => write!(f, "inspect {collection}/{id}"),
        }
    }
}

/// Read-only view of one resource provider.
///
/// Implementations must be idempotent and side-effect free. "Nothing there" is
/// never an error: `list` returns an empty `Records`, `inspect` returns
/// `Absent`. `Err` is reserved for a backend that could not answer.
#[async_trait]
pub trait ResourceObserver: Send + Sync {
    fn name(&self) -> &str;

    async fn list(&self, collection: &str) -> Result<ResourceSnapshot>;

    async fn inspect(&self, collection: &str, id: &str) -> Result<ResourceSnapshot>;

    async fn fetch(&self, selector: &Selector) -> Result<ResourceSnapshot> {
        match selector {
            Selector::List { collection } => self.list(collection).await,
            Selector::Inspect { collection, id } => self.inspect(collection, id).await,
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryObserver
// ---------------------------------------------------------------------------

/// In-process resource store. Records are identified for `inspect` by their
/// `name` field. Useful for offline runs and for exercising contracts.
#[derive(Debug)]
pub struct MemoryObserver {
    name: String,
    collections: Mutex<HashMap<String, Vec<Value>>>,
    fetches: AtomicU32,
}

impl MemoryObserver {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: Mutex::new(HashMap::new()),
            fetches: AtomicU32::new(0),
        }
    }

    pub fn insert(&self, collection: &str, record: Value) {
        if let Ok(mut map) = self.collections.lock() {
            map.entry(collection.to_string()).or_default().push(record);
        }
    }

    /// Remove every record in `collection` whose `name` equals `id`.
    pub fn remove(&self, collection: &str, id: &str) {
        if let Ok(mut map) = self.collections.lock() {
            if let Some(records) = map.get_mut(collection) {
                records.retain(|r| r.get("name").and_then(Value::as_str) != Some(id));
            }
        }
    }

    /// Number of `list`/`inspect` calls served so far.
    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    fn records(&self, collection: &str) -> Result<Vec<Value>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let map = self
            .collections
            .lock()
            .map_err(|_| VerdictError::observer(&self.name, "store lock poisoned"))?;
        Ok(map.get(collection).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ResourceObserver for MemoryObserver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self, collection: &str) -> Result<ResourceSnapshot> {
        Ok(ResourceSnapshot::Records(self.records(collection)?))
    }

    async fn inspect(&self, collection: &str, id: &str) -> Result<ResourceSnapshot> {
        let found = self
            .records(collection)?
            .into_iter()
            .find(|r| r.get("name").and_then(Value::as_str) == Some(id));
        Ok(found.map_or(ResourceSnapshot::Absent, ResourceSnapshot::Record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn list_of_unknown_collection_is_empty_not_error() {
        let observer = MemoryObserver::new("mem");
        let snap = observer.list("target-pools").await.unwrap();
        assert_eq!(snap, ResourceSnapshot::Records(vec![]));
    }

    #[tokio::test]
    async fn inspect_distinguishes_absent() {
        let observer = MemoryObserver::new("mem");
        observer.insert("instances", json!({"name": "vm-1", "status": "RUNNING"}));

        let hit = observer
            .fetch(&Selector::Inspect {
                collection: "instances".into(),
                id: "vm-1".into(),
            })
            .await
            .unwrap();
        assert!(matches!(hit, ResourceSnapshot::Record(_)));

        let miss = observer.inspect("instances", "vm-2").await.unwrap();
        assert!(miss.is_absent());
        assert_eq!(observer.fetch_count(), 2);
    }

    #[tokio::test]
    async fn remove_drops_named_records() {
        let observer = MemoryObserver::new("mem");
        observer.insert("instances", json!({"name": "vm-1"}));
        observer.insert("instances", json!({"name": "vm-2"}));
        observer.remove("instances", "vm-1");
        let snap = observer.list("instances").await.unwrap();
        assert_eq!(snap.members().len(), 1);
    }

    #[test]
    fn selector_display() {
        let s = Selector::Inspect {
            collection: "managed-instance-groups".into(),
            id: "app-v000".into(),
        };
        assert_eq!(s.to_string(), "inspect managed-instance-groups/app-v000");
    }
}
