// SPDX-License-Identifier: Apache-2.0

//! Redis snapshot state adapter (enterprise deployments).
//!
//! Keyed state lives in a Redis hash per component; the state document is a
//! plain string key. Atomicity relies on Redis single-command semantics, so
//! no client-side locking is needed.

use crate::{StateAdapter, StateError};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde_json::Value;

fn document_key(component_id: &str) -> String {
    format!("acdf:state:{component_id}:document")
}

fn hash_key(component_id: &str) -> String {
    format!("acdf:state:{component_id}:kv")
}

/// A state adapter backed by Redis.
#[derive(Clone)]
pub struct RedisStateAdapter {
    manager: ConnectionManager,
}

impl RedisStateAdapter {
    /// Connects to Redis at the given URL (e.g. `redis://127.0.0.1/`).
    ///
    /// # Errors
    ///
    /// Returns a [`StateError`] if the connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self, StateError> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }
}

/// A Redis adapter that defers connecting until first use, so components can
/// be instantiated without touching the network.
pub struct LazyRedisStateAdapter {
    url: String,
    inner: std::cell::RefCell<Option<RedisStateAdapter>>,
}

impl LazyRedisStateAdapter {
    /// Creates an adapter that will connect to `url` on first access.
    #[must_use]
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            inner: std::cell::RefCell::new(None),
        }
    }

    async fn connected(&self) -> Result<RedisStateAdapter, StateError> {
        if self.inner.borrow().is_none() {
            let adapter = RedisStateAdapter::connect(&self.url).await?;
            *self.inner.borrow_mut() = Some(adapter);
        }
        self.inner
            .borrow()
            .clone()
            .ok_or_else(|| StateError::Other {
                message: "redis connection lost during initialization".to_owned(),
            })
    }
}

#[async_trait(?Send)]
impl StateAdapter for LazyRedisStateAdapter {
    async fn save(&self, component_id: &str, state: &Value) -> Result<(), StateError> {
        self.connected().await?.save(component_id, state).await
    }

    async fn load(&self, component_id: &str) -> Result<Option<Value>, StateError> {
        self.connected().await?.load(component_id).await
    }

    async fn delete(&self, component_id: &str) -> Result<(), StateError> {
        self.connected().await?.delete(component_id).await
    }

    async fn get(&self, component_id: &str, key: &str) -> Result<Option<Value>, StateError> {
        self.connected().await?.get(component_id, key).await
    }

    async fn set(&self, component_id: &str, key: &str, value: Value) -> Result<(), StateError> {
        self.connected().await?.set(component_id, key, value).await
    }

    async fn keys(&self, component_id: &str) -> Result<Vec<String>, StateError> {
        self.connected().await?.keys(component_id).await
    }
}

#[async_trait(?Send)]
impl StateAdapter for RedisStateAdapter {
    async fn save(&self, component_id: &str, state: &Value) -> Result<(), StateError> {
        let mut conn = self.manager.clone();
        let serialized = serde_json::to_string(state)?;
        let _: () = conn.set(document_key(component_id), serialized).await?;
        Ok(())
    }

    async fn load(&self, component_id: &str) -> Result<Option<Value>, StateError> {
        let mut conn = self.manager.clone();
        let serialized: Option<String> = conn.get(document_key(component_id)).await?;
        match serialized {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, component_id: &str) -> Result<(), StateError> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .del(&[document_key(component_id), hash_key(component_id)])
            .await?;
        Ok(())
    }

    async fn get(&self, component_id: &str, key: &str) -> Result<Option<Value>, StateError> {
        let mut conn = self.manager.clone();
        let serialized: Option<String> = conn.hget(hash_key(component_id), key).await?;
        match serialized {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, component_id: &str, key: &str, value: Value) -> Result<(), StateError> {
        let mut conn = self.manager.clone();
        let serialized = serde_json::to_string(&value)?;
        let _: () = conn.hset(hash_key(component_id), key, serialized).await?;
        Ok(())
    }

    async fn keys(&self, component_id: &str) -> Result<Vec<String>, StateError> {
        let mut conn = self.manager.clone();
        let mut keys: Vec<String> = conn.hkeys(hash_key(component_id)).await?;
        keys.sort();
        Ok(keys)
    }
}
