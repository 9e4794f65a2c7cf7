//! Typed access to records in the task store.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tierd_id::TaskId;
use tracing::warn;

use super::{StoreResult, TaskStore};
use crate::framework::{FrameworkIdentity, PersistedConfig};
use crate::kind::TaskKind;
use crate::task::{parse_task_key, task_key, TaskRecord};

/// Namespaced, JSON-encoded view of the task store.
#[derive(Clone)]
pub struct TaskRepository {
    store: Arc<dyn TaskStore>,
    prefix: String,
}

impl TaskRepository {
    pub fn new(store: Arc<dyn TaskStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full key for a suffix under this framework's namespace.
    pub fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }

    pub async fn ping(&self) -> StoreResult<()> {
        self.store.ping().await
    }

    /// All task records. Undecodable values are logged and skipped.
    pub async fn list(&self) -> StoreResult<Vec<TaskRecord>> {
        self.list_matching(&self.key("*")).await
    }

    /// Task records of one tier.
    pub async fn list_kind(&self, kind: TaskKind) -> StoreResult<Vec<TaskRecord>> {
        self.list_matching(&format!("{}:{}:*", self.prefix, kind))
            .await
    }

    async fn list_matching(&self, pattern: &str) -> StoreResult<Vec<TaskRecord>> {
        let mut records = Vec::new();
        for key in self.store.scan(pattern).await? {
            if parse_task_key(&self.prefix, &key).is_none() {
                continue;
            }
            if let Some(record) = self.get_json::<TaskRecord>(&key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub async fn load(&self, kind: TaskKind, task_id: &TaskId) -> StoreResult<Option<TaskRecord>> {
        self.get_json(&task_key(&self.prefix, kind, task_id)).await
    }

    /// Look a task up without knowing its tier.
    pub async fn find(&self, task_id: &TaskId) -> StoreResult<Option<TaskRecord>> {
        for kind in TaskKind::DEPENDENCY_ORDER {
            if let Some(record) = self.load(kind, task_id).await? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    pub async fn save(&self, record: &TaskRecord) -> StoreResult<()> {
        self.set_json(&record.key(&self.prefix), record).await
    }

    pub async fn delete(&self, record: &TaskRecord) -> StoreResult<u64> {
        self.store.delete(&record.key(&self.prefix)).await
    }

    pub async fn load_identity(&self) -> StoreResult<Option<FrameworkIdentity>> {
        self.get_json(&self.key("framework")).await
    }

    pub async fn save_identity(&self, identity: &FrameworkIdentity) -> StoreResult<()> {
        self.set_json(&self.key("framework"), identity).await
    }

    pub async fn load_config(&self) -> StoreResult<Option<PersistedConfig>> {
        self.get_json(&self.key("framework_config")).await
    }

    pub async fn save_config(&self, config: &PersistedConfig) -> StoreResult<()> {
        self.set_json(&self.key("framework_config"), config).await
    }

    /// Bootstrap client configuration, verbatim.
    pub async fn kubeconfig(&self) -> StoreResult<Option<String>> {
        self.store.get(&self.key("kubernetes_config")).await
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping undecodable store value");
                Ok(None)
            }
        }
    }

    pub(crate) async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let raw = serde_json::to_string(value)?;
        self.store.set(key, &raw).await
    }
}
