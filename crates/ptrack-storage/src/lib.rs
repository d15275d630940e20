use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

pub const SESSION_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// Independently persisted pieces of the dashboard model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StateSlice {
    SystemState,
    Logs,
    CurrentDispatch,
    AgentsState,
    NextAgentId,
}

impl StateSlice {
    pub const ALL: [StateSlice; 5] = [
        StateSlice::SystemState,
        StateSlice::Logs,
        StateSlice::CurrentDispatch,
        StateSlice::AgentsState,
        StateSlice::NextAgentId,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            StateSlice::SystemState => "systemState",
            StateSlice::Logs => "logs",
            StateSlice::CurrentDispatch => "currentDispatch",
            StateSlice::AgentsState => "agentsState",
            StateSlice::NextAgentId => "nextAgentId",
        }
    }
}

impl fmt::Display for StateSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Session-scoped string key/value storage.
pub trait SessionStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
    /// Drop every key belonging to this session.
    fn clear(&mut self) -> Result<(), StorageError>;
}

pub fn load_slice<T: DeserializeOwned>(
    store: &dyn SessionStore,
    slice: StateSlice,
) -> Result<Option<T>, StorageError> {
    let Some(raw) = store.get(slice.key())? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|err| StorageError::Serialization(err.to_string()))
}

pub fn save_slice<T: Serialize + ?Sized>(
    store: &mut dyn SessionStore,
    slice: StateSlice,
    value: &T,
) -> Result<(), StorageError> {
    let raw =
        serde_json::to_string(value).map_err(|err| StorageError::Serialization(err.to_string()))?;
    store.set(slice.key(), &raw)
}

pub struct SqliteSessionStore {
    conn: Connection,
    session_id: String,
}

impl SqliteSessionStore {
    pub fn open(path: impl AsRef<Path>, session_id: impl Into<String>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, session_id.into())
    }

    pub fn open_in_memory(session_id: impl Into<String>) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, session_id.into())
    }

    fn with_connection(conn: Connection, session_id: String) -> Result<Self, StorageError> {
        let store = Self { conn, session_id };
        store.migrate()?;
        Ok(store)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > SESSION_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: SESSION_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_session_state.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    pub fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM session_state WHERE session_id = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![self.session_id], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }
}

impl SessionStore for SqliteSessionStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM session_state WHERE session_id = ?1 AND key = ?2",
                params![self.session_id, key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT OR REPLACE INTO session_state (session_id, key, value, updated_at)
            VALUES (?1, ?2, ?3, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            ",
            params![self.session_id, key, value],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "DELETE FROM session_state WHERE session_id = ?1 AND key = ?2",
            params![self.session_id, key],
        )?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        let removed = self.conn.execute(
            "DELETE FROM session_state WHERE session_id = ?1",
            params![self.session_id],
        )?;
        tracing::debug!(
            event = "session_state_cleared",
            session_id = %self.session_id,
            removed
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemorySessionStore {
    values: BTreeMap<String, String>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.values.remove(key);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        self.values.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn sqlite_store_round_trips_values() {
        let mut store = SqliteSessionStore::open_in_memory("s1").expect("open");
        assert_eq!(store.schema_version().expect("version"), SESSION_SCHEMA_VERSION);
        assert_eq!(store.get("logs").expect("get"), None);

        store.set("logs", "[]").expect("set");
        store.set("logs", "[1]").expect("overwrite");
        assert_eq!(store.get("logs").expect("get"), Some("[1]".to_string()));

        store.remove("logs").expect("remove");
        assert_eq!(store.get("logs").expect("get"), None);
    }

    #[test]
    fn clear_only_touches_own_session() {
        let file = NamedTempFile::new().expect("temp db");
        let mut first = SqliteSessionStore::open(file.path(), "first").expect("open first");
        let mut second = SqliteSessionStore::open(file.path(), "second").expect("open second");

        first.set("nextAgentId", "3").expect("set first");
        first.set("logs", "[]").expect("set first logs");
        second.set("nextAgentId", "9").expect("set second");

        first.clear().expect("clear");

        assert!(first.keys().expect("keys").is_empty());
        assert_eq!(second.get("nextAgentId").expect("get"), Some("9".to_string()));
    }

    #[test]
    fn values_survive_reopen() {
        let file = NamedTempFile::new().expect("temp db");
        {
            let mut store = SqliteSessionStore::open(file.path(), "tab").expect("open");
            save_slice(&mut store, StateSlice::NextAgentId, &4_i64).expect("save");
        }
        let store = SqliteSessionStore::open(file.path(), "tab").expect("reopen");
        let restored: Option<i64> = load_slice(&store, StateSlice::NextAgentId).expect("load");
        assert_eq!(restored, Some(4));
    }

    #[test]
    fn future_schema_is_rejected() {
        let file = NamedTempFile::new().expect("temp db");
        {
            let conn = Connection::open(file.path()).expect("open raw");
            conn.execute("PRAGMA user_version = 9", []).expect("bump");
        }
        match SqliteSessionStore::open(file.path(), "tab") {
            Err(StorageError::UnsupportedSchemaVersion { found: 9, .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected schema error"),
        }
    }

    #[test]
    fn corrupt_slice_reports_serialization_error() {
        let mut store = MemorySessionStore::new();
        store.set(StateSlice::AgentsState.key(), "{not json").expect("set");
        let result: Result<Option<Vec<i64>>, _> = load_slice(&store, StateSlice::AgentsState);
        assert!(matches!(result, Err(StorageError::Serialization(_))));
    }

    #[test]
    fn memory_store_clear() {
        let mut store = MemorySessionStore::new();
        for slice in StateSlice::ALL {
            store.set(slice.key(), "null").expect("set");
        }
        assert_eq!(store.len(), StateSlice::ALL.len());
        store.clear().expect("clear");
        assert!(store.is_empty());
    }
}
