//! Partitioned response storage.
//!
//! Entries are addressed by `(partition, entry key)` where the entry
//! key hashes the request method and URL together. The store knows
//! nothing about strategies or the only-2xx rule; callers decide what
//! gets written.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;

use crate::types::{Request, Response, ResponseSource};

/// Partition-addressed response storage.
pub trait PartitionStore: Send + Sync {
  /// Look up the snapshot stored for a request in a partition.
  fn get(&self, partition: &str, req: &Request) -> Result<Option<Response>>;

  /// Store a response snapshot, replacing any previous one for the same
  /// request.
  fn put(&self, partition: &str, req: &Request, response: &Response) -> Result<()>;

  /// Store a batch atomically; either every entry lands or none do.
  fn put_all(&self, partition: &str, entries: &[(Request, Response)]) -> Result<()>;

  /// Names of all partitions that currently hold entries.
  fn partitions(&self) -> Result<Vec<String>>;

  /// Delete every entry in a partition. Returns the number removed.
  fn drop_partition(&self, partition: &str) -> Result<usize>;

  /// The generation marked current, if any was ever activated.
  fn current_generation(&self) -> Result<Option<String>>;

  /// Mark a generation current.
  fn set_current_generation(&self, generation: &str) -> Result<()>;
}

/// Stable entry key for a request: method and URL hashed together, so
/// keys stay filesystem- and SQL-safe whatever the URL contains.
pub(crate) fn entry_key(req: &Request) -> String {
  let mut hasher = Sha256::new();
  hasher.update(req.method.as_bytes());
  hasher.update(b" ");
  hasher.update(req.url.as_bytes());
  hex::encode(hasher.finalize())
}

const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    partition TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition, entry_key)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_partition
    ON response_cache(partition);

-- Worker bookkeeping, currently just the active generation marker
CREATE TABLE IF NOT EXISTS cache_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const CURRENT_GENERATION_KEY: &str = "current_generation";

/// SQLite-backed [`PartitionStore`].
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at the default location.
  pub fn open() -> Result<Self> {
    let path = crate::config::default_data_dir()?.join("cache.db");
    Self::open_at(&path)
  }

  /// Open or create the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;
    Self::from_connection(conn)
  }

  /// In-memory store, used by tests.
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn encode_headers(response: &Response) -> Result<String> {
    serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to encode response headers: {}", e))
  }
}

impl PartitionStore for SqliteStore {
  fn get(&self, partition: &str, req: &Request) -> Result<Option<Response>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let row: Option<(u16, String, Vec<u8>)> = conn
      .query_row(
        "SELECT status, headers, body FROM response_cache
         WHERE partition = ? AND entry_key = ?",
        params![partition, entry_key(req)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry: {}", e))?;

    match row {
      Some((status, headers, body)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to decode cached headers: {}", e))?;
        Ok(Some(Response {
          status,
          headers,
          body,
          source: ResponseSource::Cache,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, partition: &str, req: &Request, response: &Response) -> Result<()> {
    let headers = Self::encode_headers(response)?;
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache
         (partition, entry_key, url, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          partition,
          entry_key(req),
          req.url,
          response.status,
          headers,
          response.body
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;
    Ok(())
  }

  fn put_all(&self, partition: &str, entries: &[(Request, Response)]) -> Result<()> {
    let mut conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to start cache transaction: {}", e))?;

    for (req, response) in entries {
      let headers = Self::encode_headers(response)?;
      tx.execute(
        "INSERT OR REPLACE INTO response_cache
         (partition, entry_key, url, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          partition,
          entry_key(req),
          req.url,
          response.status,
          headers,
          response.body
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry for {}: {}", req.url, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit cache transaction: {}", e))?;
    Ok(())
  }

  fn partitions(&self) -> Result<Vec<String>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut stmt = conn
      .prepare("SELECT DISTINCT partition FROM response_cache ORDER BY partition")
      .map_err(|e| eyre!("Failed to prepare partition listing: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .filter_map(|r| r.ok())
      .collect();
    Ok(names)
  }

  fn drop_partition(&self, partition: &str) -> Result<usize> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let removed = conn
      .execute(
        "DELETE FROM response_cache WHERE partition = ?",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to drop partition {}: {}", partition, e))?;
    Ok(removed)
  }

  fn current_generation(&self) -> Result<Option<String>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .query_row(
        "SELECT value FROM cache_meta WHERE key = ?",
        params![CURRENT_GENERATION_KEY],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read current generation: {}", e))
  }

  fn set_current_generation(&self, generation: &str) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .execute(
        "INSERT OR REPLACE INTO cache_meta (key, value) VALUES (?, ?)",
        params![CURRENT_GENERATION_KEY, generation],
      )
      .map_err(|e| eyre!("Failed to set current generation: {}", e))?;
    Ok(())
  }
}
