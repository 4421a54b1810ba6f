// SPDX-License-Identifier: Apache-2.0

//! SQLite state adapter, the default for local deployments.
//!
//! All access goes through a single connection behind a `RefCell`, which
//! serializes writers within the process; SQLite itself serializes across
//! processes. Values are stored as JSON text in one key/value table.

use crate::{StateAdapter, StateError};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::cell::RefCell;
use std::path::Path;

/// The reserved key under which a component's whole state document is stored.
const DOCUMENT_KEY: &str = "__document__";

/// A state adapter backed by a SQLite database file.
pub struct SqliteStateAdapter {
    conn: RefCell<Connection>,
}

impl SqliteStateAdapter {
    /// Opens (or creates) the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns a [`StateError`] if the database cannot be opened or the
    /// schema cannot be created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StateError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens a private in-memory database. For tests.
    ///
    /// # Errors
    ///
    /// Returns a [`StateError`] if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, StateError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StateError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS component_state (
                component_id TEXT NOT NULL,
                key          TEXT NOT NULL,
                value        TEXT NOT NULL,
                PRIMARY KEY (component_id, key)
            )",
        )?;
        Ok(Self {
            conn: RefCell::new(conn),
        })
    }

    fn put(&self, component_id: &str, key: &str, value: &Value) -> Result<(), StateError> {
        let serialized = serde_json::to_string(value)?;
        let conn = self.conn.borrow();
        let _ = conn.execute(
            "INSERT INTO component_state (component_id, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (component_id, key) DO UPDATE SET value = excluded.value",
            params![component_id, key, serialized],
        )?;
        Ok(())
    }

    fn fetch(&self, component_id: &str, key: &str) -> Result<Option<Value>, StateError> {
        let conn = self.conn.borrow();
        let serialized: Option<String> = conn
            .query_row(
                "SELECT value FROM component_state WHERE component_id = ?1 AND key = ?2",
                params![component_id, key],
                |row| row.get(0),
            )
            .optional()?;
        match serialized {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }
}

#[async_trait(?Send)]
impl StateAdapter for SqliteStateAdapter {
    async fn save(&self, component_id: &str, state: &Value) -> Result<(), StateError> {
        self.put(component_id, DOCUMENT_KEY, state)
    }

    async fn load(&self, component_id: &str) -> Result<Option<Value>, StateError> {
        self.fetch(component_id, DOCUMENT_KEY)
    }

    async fn delete(&self, component_id: &str) -> Result<(), StateError> {
        let conn = self.conn.borrow();
        let _ = conn.execute(
            "DELETE FROM component_state WHERE component_id = ?1",
            params![component_id],
        )?;
        Ok(())
    }

    async fn get(&self, component_id: &str, key: &str) -> Result<Option<Value>, StateError> {
        self.fetch(component_id, key)
    }

    async fn set(&self, component_id: &str, key: &str, value: Value) -> Result<(), StateError> {
        self.put(component_id, key, &value)
    }

    async fn keys(&self, component_id: &str) -> Result<Vec<String>, StateError> {
        let conn = self.conn.borrow();
        let mut stmt = conn.prepare(
            "SELECT key FROM component_state WHERE component_id = ?1 AND key != ?2 ORDER BY key",
        )?;
        let rows = stmt.query_map(params![component_id, DOCUMENT_KEY], |row| row.get(0))?;
        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn document_round_trip() {
        let adapter = SqliteStateAdapter::open_in_memory().unwrap();
        assert!(adapter.load("c1").await.unwrap().is_none());

        adapter.save("c1", &json!({"offset": 10})).await.unwrap();
        adapter.save("c1", &json!({"offset": 11})).await.unwrap();
        assert_eq!(
            adapter.load("c1").await.unwrap(),
            Some(json!({"offset": 11}))
        );
    }

    #[tokio::test]
    async fn keyed_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");

        {
            let adapter = SqliteStateAdapter::open(&path).unwrap();
            adapter.set("store", "1", json!({"id": 1})).await.unwrap();
            adapter.set("store", "2", json!({"id": 2})).await.unwrap();
        }

        let adapter = SqliteStateAdapter::open(&path).unwrap();
        assert_eq!(
            adapter.keys("store").await.unwrap(),
            vec!["1".to_owned(), "2".to_owned()]
        );
        assert_eq!(
            adapter.get("store", "2").await.unwrap(),
            Some(json!({"id": 2}))
        );
    }

    #[tokio::test]
    async fn delete_removes_document_and_keys() {
        let adapter = SqliteStateAdapter::open_in_memory().unwrap();
        adapter.save("c", &json!(1)).await.unwrap();
        adapter.set("c", "k", json!(2)).await.unwrap();

        adapter.delete("c").await.unwrap();
        assert!(adapter.load("c").await.unwrap().is_none());
        assert!(adapter.keys("c").await.unwrap().is_empty());
    }
}
