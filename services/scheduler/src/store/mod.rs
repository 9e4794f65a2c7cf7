//! Task store: the scheduler's single source of truth.
//!
//! The key-value store is an external collaborator. The core only relies on
//! the small [`TaskStore`] surface; [`TaskRepository`] layers key
//! namespacing and JSON encoding on top.
//!
//! ## Keys
//!
//! - `{framework}:{kind}:{task_id}`: one task record
//! - `{framework}:framework`: framework identity
//! - `{framework}:framework_config`: desired topology and server endpoint
//! - `{framework}:kubernetes:{node}`: node mirror, written by the node controller
//! - `{framework}:kubernetes_config`: bootstrap client configuration

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

mod memory;
mod redis_store;
mod repository;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use repository::TaskRepository;

/// Errors from task store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unsupported store url: {0}")]
    UnsupportedUrl(String),

    #[error("invalid key pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Key-value operations the scheduler needs from its store.
///
/// Missing keys are `Ok(None)`, never an error.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Keys matching a Redis glob pattern (`*`, `?`, `[...]`, `\` escapes).
    async fn scan(&self, pattern: &str) -> StoreResult<Vec<String>>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Returns the number of keys removed.
    async fn delete(&self, key: &str) -> StoreResult<u64>;

    async fn ping(&self) -> StoreResult<()>;
}

/// Open the store named by `url`.
pub async fn connect(url: &str) -> StoreResult<Arc<dyn TaskStore>> {
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        return Ok(Arc::new(RedisStore::connect(url).await?));
    }
    if url == "memory://" || url.is_empty() {
        return Ok(Arc::new(MemoryStore::new()));
    }
    Err(StoreError::UnsupportedUrl(url.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_memory() {
        let store = connect("memory://").await.unwrap();
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_scheme() {
        let result = connect("etcd://localhost:2379").await;
        assert!(matches!(result, Err(StoreError::UnsupportedUrl(_))));
    }
}
