use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection};
use tracing::warn;

use neko_core::types::ChatTurn;

const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS chat_histories (
    conv_key   TEXT PRIMARY KEY,
    turns_json TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);";

/// Rolling conversation histories, one JSON turn list per conversation key,
/// each bucket carrying an absolute expiry.
#[derive(Clone)]
pub struct HistoryStore {
    db: Arc<Mutex<Connection>>,
}

impl HistoryStore {
    pub fn open(sqlite_path: &str, busy_timeout_ms: u64) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(sqlite_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Connection::open(sqlite_path)?;
        db.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
        db.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let db = Connection::open_in_memory()?;
        db.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Returns the stored turn list for a key. Absent, expired, or
    /// unreadable buckets all degrade to an empty history.
    pub fn get(&self, key: &str) -> Vec<ChatTurn> {
        let db = match self.db.lock() {
            Ok(db) => db,
            Err(_) => return Vec::new(),
        };
        let raw: Option<String> = db
            .query_row(
                "SELECT turns_json FROM chat_histories WHERE conv_key = ?1 AND expires_at > ?2",
                params![key, now_ts()],
                |row| row.get(0),
            )
            .ok();
        match raw {
            Some(json) => serde_json::from_str(&json).unwrap_or_else(|err| {
                warn!("history bucket unreadable, starting fresh: key={} err={}", key, err);
                Vec::new()
            }),
            None => Vec::new(),
        }
    }

    /// Overwrites the bucket and refreshes its expiry (no merge).
    /// Best-effort: failures are logged and the exchange continues without
    /// persistence.
    pub fn put(&self, key: &str, turns: &[ChatTurn], ttl_seconds: u64) {
        let json = match serde_json::to_string(turns) {
            Ok(v) => v,
            Err(err) => {
                warn!("serialize history failed: key={} err={}", key, err);
                return;
            }
        };
        let db = match self.db.lock() {
            Ok(db) => db,
            Err(_) => {
                warn!("history store lock poisoned, write skipped: key={}", key);
                return;
            }
        };
        let now = now_ts();
        // 过期的会话顺带清理
        if let Err(err) = db.execute(
            "DELETE FROM chat_histories WHERE expires_at <= ?1",
            params![now],
        ) {
            warn!("reap expired histories failed: {err}");
        }
        if let Err(err) = db.execute(
            "INSERT INTO chat_histories (conv_key, turns_json, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(conv_key) DO UPDATE SET
                 turns_json = excluded.turns_json,
                 expires_at = excluded.expires_at",
            params![key, json, now + ttl_seconds as i64],
        ) {
            warn!("write history failed: key={} err={}", key, err);
        }
    }
}

/// Keeps the most recent `2 × max_rounds` turns, oldest discarded first.
/// Order is preserved; truncation is a suffix-keep.
pub fn truncate_to_recent(turns: &mut Vec<ChatTurn>, max_rounds: usize) {
    let cap = max_rounds.saturating_mul(2);
    if turns.len() > cap {
        turns.drain(..turns.len() - cap);
    }
}

fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
