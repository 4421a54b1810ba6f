// SPDX-License-Identifier: Apache-2.0

//! State adapter SPI.
//!
//! Components hold no implicit global state: anything shared or persistent
//! flows through a [`StateAdapter`] keyed by component id. Adapters serialize
//! access internally (SQLite has a single writer behind a `RefCell`; Redis
//! relies on per-command atomicity), so components never coordinate with each
//! other directly.

use async_trait::async_trait;
use serde_json::Value;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod sqlite;

/// Errors raised by state adapters.
#[derive(thiserror::Error, Debug)]
pub enum StateError {
    /// The stored payload could not be serialized or deserialized.
    #[error("State serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An SQLite-level failure.
    #[error("SQLite state adapter error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A Redis-level failure.
    #[cfg(feature = "redis")]
    #[error("Redis state adapter error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// Any other adapter failure.
    #[error("State adapter error: {message}")]
    Other {
        /// A description of the failure.
        message: String,
    },
}

/// Pluggable key/value state store, keyed by component id.
///
/// `save`/`load`/`delete` operate on a component's whole state document;
/// `get`/`set` operate transactionally on individual keys within it.
/// `snapshot`/`restore` are document-level aliases used by supervisors to
/// checkpoint a component across restarts.
#[async_trait(?Send)]
pub trait StateAdapter {
    /// Persists a component's state document.
    async fn save(&self, component_id: &str, state: &Value) -> Result<(), StateError>;

    /// Loads a component's state document, if present.
    async fn load(&self, component_id: &str) -> Result<Option<Value>, StateError>;

    /// Deletes all state for a component.
    async fn delete(&self, component_id: &str) -> Result<(), StateError>;

    /// Reads one key from a component's keyed state.
    async fn get(&self, component_id: &str, key: &str) -> Result<Option<Value>, StateError>;

    /// Writes one key in a component's keyed state.
    async fn set(&self, component_id: &str, key: &str, value: Value) -> Result<(), StateError>;

    /// Lists the keys present in a component's keyed state, sorted.
    async fn keys(&self, component_id: &str) -> Result<Vec<String>, StateError>;

    /// Captures the component's state document for checkpointing.
    async fn snapshot(&self, component_id: &str) -> Result<Option<Value>, StateError> {
        self.load(component_id).await
    }

    /// Restores a previously captured state document.
    async fn restore(&self, component_id: &str, snapshot: &Value) -> Result<(), StateError> {
        self.save(component_id, snapshot).await
    }
}
