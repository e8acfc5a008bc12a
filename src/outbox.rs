//! The durable mutation queue, plus the generic offline key/value
//! table the host application reads and writes.
//!
//! Lives in its own database file so cache purges can never touch
//! queued writes. Record ids come from the rowid sequence and are
//! never reused, which makes id order the replay order.

use chrono::{Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use crate::types::{Destination, Request};

/// A write captured while offline, waiting for replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMutation {
  /// Queue position; assigned on enqueue, never reused
  pub id: i64,
  pub url: String,
  pub method: String,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
  /// Failed replay attempts so far
  pub retry_count: u32,
}

impl QueuedMutation {
  /// Rebuild the outbound request this record captured.
  pub fn to_request(&self) -> Request {
    Request {
      method: self.method.clone(),
      url: self.url.clone(),
      headers: self.headers.clone(),
      body: self.body.clone(),
      destination: Destination::Other,
    }
  }
}

const OUTBOX_SCHEMA: &str = r#"
-- Writes that failed while offline, replayed in id order
CREATE TABLE IF NOT EXISTS outbox (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB,
    retry_count INTEGER NOT NULL DEFAULT 0,
    enqueued_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Generic offline storage for the host application; the engine
-- declares the table but never reads it itself
CREATE TABLE IF NOT EXISTS offline_kv (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    expires_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_offline_kv_expires
    ON offline_kv(expires_at);
"#;

/// Methods the queue accepts. Reads are never queued; they are served
/// by the cache layer instead.
const WRITE_METHODS: &[&str] = &["POST", "PUT", "PATCH", "DELETE"];

/// SQLite-backed mutation queue.
pub struct Outbox {
  conn: Mutex<Connection>,
}

impl Outbox {
  /// Open or create the queue at the default location.
  pub fn open() -> Result<Self> {
    let path = crate::config::default_data_dir()?.join("outbox.db");
    Self::open_at(&path)
  }

  /// Open or create the queue at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create outbox directory: {}", e))?;
    }
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open outbox database at {}: {}", path.display(), e))?;
    Self::from_connection(conn)
  }

  /// In-memory queue, used by tests.
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory outbox database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(OUTBOX_SCHEMA)
      .map_err(|e| eyre!("Failed to run outbox migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Record a failed write for later replay. Returns the queue id.
  ///
  /// Validates up front: a record that could never be reissued would
  /// wedge every later pass at its queue position.
  pub fn enqueue(&self, req: &Request) -> Result<i64> {
    let method = req.method.to_uppercase();
    if !WRITE_METHODS.contains(&method.as_str()) {
      return Err(eyre!("Refusing to queue non-write method {}", req.method));
    }
    let url = url::Url::parse(&req.url)
      .map_err(|e| eyre!("Refusing to queue unparseable URL {}: {}", req.url, e))?;
    if url.scheme() != "http" && url.scheme() != "https" {
      return Err(eyre!("Refusing to queue non-http URL {}", req.url));
    }

    let headers = serde_json::to_string(&req.headers)
      .map_err(|e| eyre!("Failed to encode request headers: {}", e))?;

    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .execute(
        "INSERT INTO outbox (url, method, headers, body) VALUES (?, ?, ?, ?)",
        params![req.url, method, headers, req.body],
      )
      .map_err(|e| eyre!("Failed to enqueue mutation: {}", e))?;

    let id = conn.last_insert_rowid();
    debug!(id, url = %req.url, method = %method, "Mutation queued");
    Ok(id)
  }

  /// Snapshot of the queue in replay (id) order.
  pub fn pending(&self) -> Result<Vec<QueuedMutation>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut stmt = conn
      .prepare(
        "SELECT id, url, method, headers, body, retry_count
         FROM outbox ORDER BY id ASC",
      )
      .map_err(|e| eyre!("Failed to prepare outbox query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, Option<Vec<u8>>>(4)?,
          row.get::<_, u32>(5)?,
        ))
      })
      .map_err(|e| eyre!("Failed to read outbox: {}", e))?;

    let mut pending = Vec::new();
    for row in rows {
      let (id, url, method, headers, body, retry_count) =
        row.map_err(|e| eyre!("Failed to read outbox row: {}", e))?;
      let headers: Vec<(String, String)> = serde_json::from_str(&headers)
        .map_err(|e| eyre!("Failed to decode headers for mutation {}: {}", id, e))?;
      pending.push(QueuedMutation {
        id,
        url,
        method,
        headers,
        body,
        retry_count,
      });
    }
    Ok(pending)
  }

  /// Queue depth.
  pub fn len(&self) -> Result<usize> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count outbox: {}", e))?;
    Ok(count as usize)
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  /// Delete a record. Terminal outcomes only: delivered, rejected or
  /// expired.
  pub fn remove(&self, id: i64) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .execute("DELETE FROM outbox WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove mutation {}: {}", id, e))?;
    Ok(())
  }

  /// Increment a record's retry count in place; id and queue position
  /// are unchanged.
  pub fn bump_retry(&self, id: i64) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .execute(
        "UPDATE outbox SET retry_count = retry_count + 1 WHERE id = ?",
        params![id],
      )
      .map_err(|e| eyre!("Failed to bump retry count for mutation {}: {}", id, e))?;
    Ok(())
  }

  /// Store a value for the host application, with an optional TTL in
  /// seconds.
  pub fn kv_put(&self, key: &str, value: &[u8], ttl_seconds: Option<i64>) -> Result<()> {
    let expires_at = ttl_seconds.map(|secs| {
      (Utc::now() + Duration::seconds(secs))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
    });

    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .execute(
        "INSERT OR REPLACE INTO offline_kv (key, value, expires_at) VALUES (?, ?, ?)",
        params![key, value, expires_at],
      )
      .map_err(|e| eyre!("Failed to store offline value: {}", e))?;
    Ok(())
  }

  /// Value for a key. Expired rows read as absent; they stay on disk
  /// until overwritten, there is no eviction job.
  pub fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .query_row(
        "SELECT value FROM offline_kv
         WHERE key = ? AND (expires_at IS NULL OR expires_at > datetime('now'))",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read offline value: {}", e))
  }
}
