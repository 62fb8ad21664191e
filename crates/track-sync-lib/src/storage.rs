//! Storage abstraction used by the geometry cache and the viewport store.
//!
//! This module provides a single trait `StorageBackend` and three concrete
//! implementations:
//!
//! - `SqliteStorage`: one row per key in a SQLite database. Every batch runs in
//!   a single transaction and writes only the rows it touches. Used for the
//!   geometry cache, which grows with the track collection.
//! - `FileStorage`: stores a single JSON file containing a map of string keys
//!   to string values. The file is located in a per-user configuration
//!   directory (where possible) and is replaced atomically on every write.
//!   Meant for a handful of small settings values.
//! - `MemoryStorage`: keeps everything in a `HashMap`; nothing survives the
//!   process. Useful for tests and for embedding without a filesystem.
//!
//! Batch operations (`get_many`, `set_many`, `remove_many`) are part of the
//! trait so that a backend can serve many keys under one lock and one write.

use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Platform storage error: {0}")]
    Platform(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Simple generic storage backend trait.
///
/// Keys and values are UTF-8 strings. Structured data goes through
/// `save_json_backend` / `load_json_backend`.
pub trait StorageBackend: Send + Sync {
    /// Store a string value for a key.
    fn set_string(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Read a string value for a key. Returns Ok(None) when key is missing.
    fn get_string(&self, key: &str) -> StorageResult<Option<String>>;

    /// Remove a key (no-op if key does not exist).
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// All stored keys.
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Read several keys at once. The result is index-aligned with `keys`.
    fn get_many(&self, keys: &[String]) -> StorageResult<Vec<Option<String>>> {
        keys.iter().map(|k| self.get_string(k)).collect()
    }

    /// Upsert several key/value pairs at once.
    fn set_many(&self, entries: &[(String, String)]) -> StorageResult<()> {
        for (key, value) in entries {
            self.set_string(key, value)?;
        }
        Ok(())
    }

    /// Remove several keys at once.
    fn remove_many(&self, keys: &[String]) -> StorageResult<()> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}

impl<B: StorageBackend + ?Sized> StorageBackend for Box<B> {
    fn set_string(&self, key: &str, value: &str) -> StorageResult<()> {
        (**self).set_string(key, value)
    }

    fn get_string(&self, key: &str) -> StorageResult<Option<String>> {
        (**self).get_string(key)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        (**self).remove(key)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        (**self).keys()
    }

    fn get_many(&self, keys: &[String]) -> StorageResult<Vec<Option<String>>> {
        (**self).get_many(keys)
    }

    fn set_many(&self, entries: &[(String, String)]) -> StorageResult<()> {
        (**self).set_many(entries)
    }

    fn remove_many(&self, keys: &[String]) -> StorageResult<()> {
        (**self).remove_many(keys)
    }
}

pub fn save_json_backend<T: Serialize>(
    backend: &dyn StorageBackend,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    match serde_json::to_string(value) {
        Ok(s) => backend.set_string(key, &s),
        Err(e) => Err(StorageError::Json(e.to_string())),
    }
}

pub fn load_json_backend<T: DeserializeOwned>(
    backend: &dyn StorageBackend,
    key: &str,
) -> StorageResult<Option<T>> {
    match backend.get_string(key)? {
        Some(s) => match serde_json::from_str::<T>(&s) {
            Ok(v) => Ok(Some(v)),
            Err(e) => Err(StorageError::Json(e.to_string())),
        },
        None => Ok(None),
    }
}

fn lock_map(
    inner: &Mutex<HashMap<String, String>>,
) -> StorageResult<MutexGuard<'_, HashMap<String, String>>> {
    inner
        .lock()
        .map_err(|e| StorageError::Platform(format!("mutex poisoned: {:?}", e)))
}

/// In-memory storage. Nothing is persisted.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn set_string(&self, key: &str, value: &str) -> StorageResult<()> {
        lock_map(&self.inner)?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_string(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(lock_map(&self.inner)?.get(key).cloned())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        lock_map(&self.inner)?.remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(lock_map(&self.inner)?.keys().cloned().collect())
    }

    fn get_many(&self, keys: &[String]) -> StorageResult<Vec<Option<String>>> {
        let guard = lock_map(&self.inner)?;
        Ok(keys.iter().map(|k| guard.get(k).cloned()).collect())
    }

    fn set_many(&self, entries: &[(String, String)]) -> StorageResult<()> {
        let mut guard = lock_map(&self.inner)?;
        for (key, value) in entries {
            guard.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[String]) -> StorageResult<()> {
        let mut guard = lock_map(&self.inner)?;
        for key in keys {
            guard.remove(key);
        }
        Ok(())
    }
}

/// File-based storage: stores a single JSON file which is a map of key -> string value.
///
/// Implementation notes:
/// - On init, file is read into memory (HashMap). An unparsable file is logged
///   and replaced by an empty map on the next write.
/// - Mutations update memory and flush the file back to disk synchronously,
///   through a temporary sibling file that is renamed over the original.
/// - Batch mutations flush once.
pub struct FileStorage {
    /// Path to the backing JSON file.
    path: PathBuf,
    /// In-memory copy of key -> value
    inner: Mutex<HashMap<String, String>>,
}

impl FileStorage {
    /// Determine a good default storage file path for the current user.
    /// Uses environment variables when available:
    /// - On Windows: %APPDATA%/TrackSync/storage.json
    /// - Else: $HOME/.config/track-sync/storage.json
    pub fn default_storage_path() -> PathBuf {
        if cfg!(windows)
            && let Ok(appdata) = std::env::var("APPDATA")
        {
            return Path::new(&appdata).join("TrackSync").join("storage.json");
        }

        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home)
                .join(".config")
                .join("track-sync")
                .join("storage.json");
        }

        // Fallback to current directory
        Path::new(".").join("track-sync-storage.json")
    }

    pub fn new_with_path(path: Option<PathBuf>) -> Result<Self, StorageError> {
        let path = path.unwrap_or_else(Self::default_storage_path);

        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = fs::create_dir_all(parent)
        {
            return Err(StorageError::Io(format!(
                "Failed to create storage parent directory: {}",
                e
            )));
        }

        let mut map: HashMap<String, String> = HashMap::new();
        if path.exists() {
            let mut file = fs::File::open(&path)
                .map_err(|e| StorageError::Io(format!("Failed to open storage file: {}", e)))?;
            let mut s = String::new();
            file.read_to_string(&mut s)
                .map_err(|e| StorageError::Io(format!("Failed to read storage file: {}", e)))?;
            if !s.trim().is_empty() {
                match serde_json::from_str::<HashMap<String, String>>(&s) {
                    Ok(parsed) => map = parsed,
                    Err(e) => tracing::warn!(
                        path = %path.display(),
                        "Storage file is unreadable, starting empty: {}",
                        e
                    ),
                }
            }
        } else {
            // Ensure file exists so that an unwritable location fails here, not on first flush
            fs::File::create(&path)
                .map_err(|e| StorageError::Io(format!("Failed to create storage file: {}", e)))?;
        }

        tracing::debug!(path = %path.display(), keys = map.len(), "Opened file storage");

        Ok(FileStorage {
            path,
            inner: Mutex::new(map),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush_locked(&self, locked: &HashMap<String, String>) -> StorageResult<()> {
        #[cfg(feature = "profiling")]
        profiling::scope!("storage::flush");

        let s = serde_json::to_string(locked).map_err(|e| StorageError::Json(e.to_string()))?;
        let tmp = sibling_path(&self.path, ".tmp");
        let written = fs::File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(s.as_bytes())?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&tmp, &self.path));
        written.map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StorageError::Io(format!("write failed: {}", e))
        })
    }
}

impl StorageBackend for FileStorage {
    fn set_string(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut guard = lock_map(&self.inner)?;
        guard.insert(key.to_string(), value.to_string());
        self.flush_locked(&guard)
    }

    fn get_string(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(lock_map(&self.inner)?.get(key).cloned())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut guard = lock_map(&self.inner)?;
        if guard.remove(key).is_some() {
            self.flush_locked(&guard)?;
        }
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(lock_map(&self.inner)?.keys().cloned().collect())
    }

    fn get_many(&self, keys: &[String]) -> StorageResult<Vec<Option<String>>> {
        let guard = lock_map(&self.inner)?;
        Ok(keys.iter().map(|k| guard.get(k).cloned()).collect())
    }

    fn set_many(&self, entries: &[(String, String)]) -> StorageResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut guard = lock_map(&self.inner)?;
        for (key, value) in entries {
            guard.insert(key.clone(), value.clone());
        }
        self.flush_locked(&guard)
    }

    fn remove_many(&self, keys: &[String]) -> StorageResult<()> {
        let mut guard = lock_map(&self.inner)?;
        let mut removed = false;
        for key in keys {
            removed |= guard.remove(key).is_some();
        }
        if removed {
            self.flush_locked(&guard)?;
        }
        Ok(())
    }
}

/// `path` with `suffix` appended to its file name
fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

const UPSERT_SQL: &str =
    "INSERT INTO kv (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value";
const SELECT_SQL: &str = "SELECT value FROM kv WHERE key = ?1";
const DELETE_SQL: &str = "DELETE FROM kv WHERE key = ?1";

/// SQLite-backed storage, one row per key.
///
/// Batch writes run in one transaction, so an interrupted write leaves the
/// previous rows in place. A file that turns out not to be a usable database
/// is discarded on open and replaced by an empty one.
pub struct SqliteStorage {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = fs::create_dir_all(parent)
        {
            return Err(StorageError::Io(format!(
                "Failed to create storage parent directory: {}",
                e
            )));
        }

        let mut conn = Connection::open(&path)?;
        if let Some(problem) = integrity_problem(&conn)? {
            tracing::warn!(
                path = %path.display(),
                "Discarding damaged storage database: {}",
                problem
            );
            drop(conn);
            remove_database_files(&path)?;
            conn = Connection::open(&path)?;
        }
        init_schema(&conn)?;

        tracing::debug!(path = %path.display(), "Opened sqlite storage");
        Ok(Self {
            path: Some(path),
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    /// Database file, `None` for an in-memory store
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn connection(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Platform(format!("mutex poisoned: {:?}", e)))
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        ) WITHOUT ROWID;
        "#,
    )
}

/// Description of the damage if `conn` is not a healthy database.
///
/// Errors that say nothing about the file itself (busy, permissions) are
/// returned as errors so that a valid database is never thrown away.
fn integrity_problem(conn: &Connection) -> StorageResult<Option<String>> {
    match conn.query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0)) {
        Ok(status) if status == "ok" => Ok(None),
        Ok(status) => Ok(Some(status)),
        Err(e)
            if matches!(
                e.sqlite_error_code(),
                Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase)
            ) =>
        {
            Ok(Some(e.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

fn remove_database_files(path: &Path) -> StorageResult<()> {
    for suffix in ["", "-journal", "-wal", "-shm"] {
        let file = sibling_path(path, suffix);
        match fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StorageError::Io(format!(
                    "Failed to remove {}: {}",
                    file.display(),
                    e
                )));
            }
        }
    }
    Ok(())
}

impl StorageBackend for SqliteStorage {
    fn set_string(&self, key: &str, value: &str) -> StorageResult<()> {
        self.connection()?.execute(UPSERT_SQL, params![key, value])?;
        Ok(())
    }

    fn get_string(&self, key: &str) -> StorageResult<Option<String>> {
        let value = self
            .connection()?
            .query_row(SELECT_SQL, params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.connection()?.execute(DELETE_SQL, params![key])?;
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT key FROM kv")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }

    fn get_many(&self, keys: &[String]) -> StorageResult<Vec<Option<String>>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(SELECT_SQL)?;
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(stmt.query_row(params![key], |row| row.get(0)).optional()?);
        }
        Ok(values)
    }

    fn set_many(&self, entries: &[(String, String)]) -> StorageResult<()> {
        #[cfg(feature = "profiling")]
        profiling::scope!("storage::sqlite_write");

        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
            for (key, value) in entries {
                stmt.execute(params![key, value])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn remove_many(&self, keys: &[String]) -> StorageResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(DELETE_SQL)?;
            for key in keys {
                stmt.execute(params![key])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
