//! External memory logs — the durable record of what each agent observed.
//!
//! Every memory an agent forms is appended to a log keyed by the agent's
//! name before it enters the in-process store. Two backends implement
//! [`MemoryLog`]:
//!
//! - [`JsonFileLog`]: one `<agent>.json` document per agent (name
//!   percent-encoded, see [`JsonFileLog::path_for`]) holding an array
//!   of `{ "memory": ..., "timestamp": ... }` records. Each append reads the
//!   whole document, appends, and replaces the file through a temp file.
//! - [`SqliteLog`]: one database for all agents, append-only table.
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS agent_logs (
//!     agent_id   TEXT PRIMARY KEY,
//!     created_at TEXT NOT NULL
//! );
//! CREATE TABLE IF NOT EXISTS memory_log (
//!     seq       INTEGER PRIMARY KEY AUTOINCREMENT,
//!     agent_id  TEXT NOT NULL REFERENCES agent_logs(agent_id),
//!     memory    TEXT NOT NULL,
//!     timestamp TEXT NOT NULL
//! );
//! ```
//!
//! A log must be created with [`MemoryLog::initialize`] before use. Appending
//! to a missing or unreadable log is a [`HearthError::Persistence`] error;
//! the memory is never silently dropped.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PersistenceConfig;
use crate::error::{HearthError, Result};

/// File name of the shared SQLite log inside `log_dir`.
pub const SQLITE_FILE: &str = "hearth.db";

/// One entry of an agent's memory log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// The memory text as it was recorded.
    pub memory: String,
    /// When the memory was formed (ISO-8601 on disk).
    pub timestamp: DateTime<Utc>,
}

impl MemoryRecord {
    /// Build a record.
    #[must_use]
    pub fn new(memory: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            memory: memory.into(),
            timestamp,
        }
    }
}

/// Append-only per-agent memory log.
///
/// Implementations do blocking I/O; async callers should move calls onto a
/// blocking thread.
pub trait MemoryLog: Send + Sync {
    /// Create an empty log for `agent_id` unless one already exists.
    ///
    /// # Errors
    /// Returns `HearthError::Persistence` if the log cannot be created.
    fn initialize(&self, agent_id: &str) -> Result<()>;

    /// Append `record`, preserving every earlier entry.
    ///
    /// # Errors
    /// Returns `HearthError::Persistence` if the log is missing, corrupt or
    /// unwritable.
    fn append(&self, agent_id: &str, record: &MemoryRecord) -> Result<()>;

    /// All entries, oldest first.
    ///
    /// # Errors
    /// Returns `HearthError::Persistence` if the log is missing or corrupt.
    fn records(&self, agent_id: &str) -> Result<Vec<MemoryRecord>>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Open the backend named in `config`.
///
/// # Errors
/// Returns `HearthError::Config` for an unknown backend, or the backend's
/// own error if it cannot be opened.
pub fn open_log(config: &PersistenceConfig) -> Result<Arc<dyn MemoryLog>> {
    match config.backend.as_str() {
        "json" => Ok(Arc::new(JsonFileLog::new(&config.log_dir))),
        "sqlite" => {
            std::fs::create_dir_all(&config.log_dir)?;
            let log = SqliteLog::open(config.log_dir.join(SQLITE_FILE), config.wal_mode)?;
            Ok(Arc::new(log))
        }
        other => Err(HearthError::Config(format!(
            "unknown persistence.backend '{other}'"
        ))),
    }
}

// ---------------------------------------------------------------------------
// JSON document per agent
// ---------------------------------------------------------------------------

/// One JSON document per agent under a directory.
#[derive(Debug, Clone)]
pub struct JsonFileLog {
    dir: PathBuf,
}

impl JsonFileLog {
    /// Logs live under `dir` (created on first `initialize`).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of `agent_id`'s document.
    ///
    /// ASCII letters, digits, `-` and space are kept; every other byte is
    /// percent-encoded (`%` and `_` included), so distinct agents never
    /// share a file.
    #[must_use]
    pub fn path_for(&self, agent_id: &str) -> PathBuf {
        let mut stem = String::with_capacity(agent_id.len());
        for byte in agent_id.bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b' ') {
                stem.push(char::from(byte));
            } else {
                stem.push_str(&format!("%{byte:02X}"));
            }
        }
        self.dir.join(format!("{stem}.json"))
    }

    fn write_atomically(&self, agent_id: &str, path: &Path, records: &[MemoryRecord]) -> Result<()> {
        let json = serde_json::to_string_pretty(records)
            .map_err(|e| HearthError::Serialization(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .and_then(|()| std::fs::rename(&tmp, path))
            .map_err(|e| HearthError::persistence(agent_id, format!("write {}: {e}", path.display())))
    }
}

impl MemoryLog for JsonFileLog {
    fn initialize(&self, agent_id: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            HearthError::persistence(agent_id, format!("create {}: {e}", self.dir.display()))
        })?;
        let path = self.path_for(agent_id);
        if path.exists() {
            return Ok(());
        }
        self.write_atomically(agent_id, &path, &[])?;
        info!(agent = agent_id, path = %path.display(), "created memory log");
        Ok(())
    }

    fn append(&self, agent_id: &str, record: &MemoryRecord) -> Result<()> {
        let start = Instant::now();
        let path = self.path_for(agent_id);
        let mut records = self.records(agent_id)?;
        records.push(record.clone());
        self.write_atomically(agent_id, &path, &records)?;
        debug!(
            agent = agent_id,
            entries = records.len(),
            elapsed_us = start.elapsed().as_micros(),
            "appended to memory log"
        );
        Ok(())
    }

    fn records(&self, agent_id: &str) -> Result<Vec<MemoryRecord>> {
        let path = self.path_for(agent_id);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                HearthError::persistence(agent_id, format!("no memory log at {}", path.display()))
            } else {
                HearthError::persistence(agent_id, format!("read {}: {e}", path.display()))
            }
        })?;
        serde_json::from_str(&content).map_err(|e| {
            HearthError::persistence(agent_id, format!("corrupt memory log {}: {e}", path.display()))
        })
    }

    fn backend(&self) -> &'static str {
        "json"
    }
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS agent_logs (
        agent_id   TEXT PRIMARY KEY,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS memory_log (
        seq       INTEGER PRIMARY KEY AUTOINCREMENT,
        agent_id  TEXT NOT NULL REFERENCES agent_logs(agent_id),
        memory    TEXT NOT NULL,
        timestamp TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_memory_log_agent ON memory_log(agent_id, seq);
";

/// All agents' logs in one SQLite database.
pub struct SqliteLog {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl std::fmt::Debug for SqliteLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLog")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl SqliteLog {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    /// Returns `HearthError::Database` on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, wal_mode: bool) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&db_path, flags)?;

        if wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %db_path.display(), wal = wal_mode, "memory log database opened");
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Open an in-memory database (useful for tests).
    ///
    /// # Errors
    /// Returns `HearthError::Database` on SQLite failures.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Path to the database file (`:memory:` for in-memory databases).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Copy the database to `dest_path` with SQLite's online-backup API.
    ///
    /// # Errors
    /// Returns `HearthError::Database` on SQLite failures.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let start = Instant::now();
        let conn = self.conn.lock();
        let mut dest = Connection::open(dest_path.as_ref())?;
        let backup = rusqlite::backup::Backup::new(&conn, &mut dest)?;
        backup.run_to_completion(256, std::time::Duration::from_millis(50), None)?;
        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "memory log backup completed"
        );
        Ok(())
    }

    fn ensure_exists(conn: &Connection, agent_id: &str) -> Result<()> {
        let found: Option<String> = conn
            .query_row(
                "SELECT agent_id FROM agent_logs WHERE agent_id = ?1",
                params![agent_id],
                |row| row.get(0),
            )
            .optional()?;
        match found {
            Some(_) => Ok(()),
            None => Err(HearthError::persistence(agent_id, "no memory log for agent")),
        }
    }
}

impl MemoryLog for SqliteLog {
    fn initialize(&self, agent_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        let created = conn.execute(
            "INSERT OR IGNORE INTO agent_logs (agent_id, created_at) VALUES (?1, ?2)",
            params![agent_id, Utc::now().to_rfc3339()],
        )?;
        if created > 0 {
            info!(agent = agent_id, "created memory log");
        }
        Ok(())
    }

    fn append(&self, agent_id: &str, record: &MemoryRecord) -> Result<()> {
        let conn = self.conn.lock();
        Self::ensure_exists(&conn, agent_id)?;
        conn.execute(
            "INSERT INTO memory_log (agent_id, memory, timestamp) VALUES (?1, ?2, ?3)",
            params![agent_id, record.memory, record.timestamp.to_rfc3339()],
        )
        .map_err(|e| HearthError::persistence(agent_id, e))?;
        debug!(agent = agent_id, "appended to memory log");
        Ok(())
    }

    fn records(&self, agent_id: &str) -> Result<Vec<MemoryRecord>> {
        let conn = self.conn.lock();
        Self::ensure_exists(&conn, agent_id)?;
        let mut stmt = conn.prepare_cached(
            "SELECT memory, timestamp FROM memory_log WHERE agent_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![agent_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (memory, ts) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&ts)
                .map_err(|e| HearthError::persistence(agent_id, format!("bad timestamp '{ts}': {e}")))?
                .with_timezone(&Utc);
            records.push(MemoryRecord { memory, timestamp });
        }
        Ok(records)
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}
