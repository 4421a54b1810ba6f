// SPDX-License-Identifier: Apache-2.0

//! In-memory state adapter for tests and ephemeral components.

use crate::{StateAdapter, StateError};
use async_trait::async_trait;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;

#[derive(Default)]
struct ComponentState {
    document: Option<Value>,
    keyed: BTreeMap<String, Value>,
}

/// A process-local state adapter backed by an in-memory map.
#[derive(Default)]
pub struct MemoryStateAdapter {
    inner: RefCell<BTreeMap<String, ComponentState>>,
}

impl MemoryStateAdapter {
    /// Creates an empty adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait(?Send)]
impl StateAdapter for MemoryStateAdapter {
    async fn save(&self, component_id: &str, state: &Value) -> Result<(), StateError> {
        let mut inner = self.inner.borrow_mut();
        inner.entry(component_id.to_owned()).or_default().document = Some(state.clone());
        Ok(())
    }

    async fn load(&self, component_id: &str) -> Result<Option<Value>, StateError> {
        Ok(self
            .inner
            .borrow()
            .get(component_id)
            .and_then(|s| s.document.clone()))
    }

    async fn delete(&self, component_id: &str) -> Result<(), StateError> {
        let _ = self.inner.borrow_mut().remove(component_id);
        Ok(())
    }

    async fn get(&self, component_id: &str, key: &str) -> Result<Option<Value>, StateError> {
        Ok(self
            .inner
            .borrow()
            .get(component_id)
            .and_then(|s| s.keyed.get(key).cloned()))
    }

    async fn set(&self, component_id: &str, key: &str, value: Value) -> Result<(), StateError> {
        let mut inner = self.inner.borrow_mut();
        let _ = inner
            .entry(component_id.to_owned())
            .or_default()
            .keyed
            .insert(key.to_owned(), value);
        Ok(())
    }

    async fn keys(&self, component_id: &str) -> Result<Vec<String>, StateError> {
        Ok(self
            .inner
            .borrow()
            .get(component_id)
            .map(|s| s.keyed.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn document_round_trip() {
        let adapter = MemoryStateAdapter::new();
        assert!(adapter.load("c1").await.unwrap().is_none());

        adapter.save("c1", &json!({"cursor": 42})).await.unwrap();
        assert_eq!(
            adapter.load("c1").await.unwrap(),
            Some(json!({"cursor": 42}))
        );

        adapter.delete("c1").await.unwrap();
        assert!(adapter.load("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn keyed_state_is_per_component() {
        let adapter = MemoryStateAdapter::new();
        adapter.set("a", "k", json!(1)).await.unwrap();
        adapter.set("b", "k", json!(2)).await.unwrap();

        assert_eq!(adapter.get("a", "k").await.unwrap(), Some(json!(1)));
        assert_eq!(adapter.get("b", "k").await.unwrap(), Some(json!(2)));
        assert_eq!(adapter.keys("a").await.unwrap(), vec!["k".to_owned()]);
    }

    #[tokio::test]
    async fn snapshot_restore_defaults() {
        let adapter = MemoryStateAdapter::new();
        adapter.save("c", &json!({"n": 1})).await.unwrap();
        let snap = adapter.snapshot("c").await.unwrap().unwrap();

        adapter.delete("c").await.unwrap();
        adapter.restore("c", &snap).await.unwrap();
        assert_eq!(adapter.load("c").await.unwrap(), Some(json!({"n": 1})));
    }
}
