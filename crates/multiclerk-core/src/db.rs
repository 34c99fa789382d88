// SQLite persistence for operator flags: per-tab active flags, the global
// enable switch and small JSON state values.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::protocol::TabId;

/// SQLite-backed store for flags that must survive a restart of the core.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    const EXTENSION_ENABLED_KEY: &'static str = "extension_enabled";

    /// Open (or create) the database at `path`. Pass `":memory:"` for an
    /// ephemeral database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tab_flags (
                tab_id  INTEGER PRIMARY KEY,
                active  INTEGER NOT NULL,
                updated TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE IF NOT EXISTS clerk_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A panic while holding the lock cannot leave SQLite half-written, so a
    /// poisoned mutex is still usable.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Tab active flags
    // -----------------------------------------------------------------------

    pub fn set_tab_active(&self, tab_id: TabId, active: bool) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO tab_flags (tab_id, active) VALUES (?1, ?2)
                 ON CONFLICT(tab_id) DO UPDATE SET
                    active = excluded.active,
                    updated = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![tab_id, active],
            )
            .context("failed to save tab flag")?;
        Ok(())
    }

    /// Persisted flag for `tab_id`, or `None` if never set.
    pub fn tab_active(&self, tab_id: TabId) -> Result<Option<bool>> {
        self.conn()
            .query_row(
                "SELECT active FROM tab_flags WHERE tab_id = ?1",
                params![tab_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to read tab flag")
    }

    pub fn remove_tab_flag(&self, tab_id: TabId) -> Result<()> {
        self.conn()
            .execute("DELETE FROM tab_flags WHERE tab_id = ?1", params![tab_id])
            .context("failed to delete tab flag")?;
        Ok(())
    }

    /// Drop flags of tabs not in `live`. Returns how many rows went away.
    pub fn retain_tab_flags(&self, live: &[TabId]) -> Result<usize> {
        let keep: HashSet<TabId> = live.iter().copied().collect();
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        let stored: Vec<TabId> = {
            let mut stmt = tx
                .prepare("SELECT tab_id FROM tab_flags")
                .context("failed to prepare tab flag query")?;
            let rows = stmt
                .query_map([], |row| row.get(0))
                .context("failed to query tab flags")?;
            rows.collect::<std::result::Result<_, _>>()
                .context("failed to read tab flag row")?
        };

        let mut removed = 0;
        for tab_id in stored.into_iter().filter(|id| !keep.contains(id)) {
            removed += tx
                .execute("DELETE FROM tab_flags WHERE tab_id = ?1", params![tab_id])
                .context("failed to prune tab flag")?;
        }
        tx.commit().context("failed to commit tab flag pruning")?;
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Global enable switch
    // -----------------------------------------------------------------------

    /// Whether coordinated actions are enabled. Defaults to `true`.
    pub fn extension_enabled(&self) -> Result<bool> {
        let value = self.load_state(Self::EXTENSION_ENABLED_KEY)?;
        Ok(value.and_then(|v| v.as_bool()).unwrap_or(true))
    }

    pub fn set_extension_enabled(&self, enabled: bool) -> Result<()> {
        self.save_state(
            Self::EXTENSION_ENABLED_KEY,
            &serde_json::Value::Bool(enabled),
        )
    }

    // -----------------------------------------------------------------------
    // Key-value state
    // -----------------------------------------------------------------------

    /// Persist an arbitrary JSON value under `key`, replacing any previous
    /// value.
    pub fn save_state(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let json_str = serde_json::to_string(value).context("failed to serialize state value")?;
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO clerk_state (key, value) VALUES (?1, ?2)",
                params![key, json_str],
            )
            .context("failed to save state")?;
        Ok(())
    }

    /// Load a previously saved JSON value by `key`.
    pub fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let json_str: Option<String> = self
            .conn()
            .query_row(
                "SELECT value FROM clerk_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query clerk state")?;

        json_str
            .map(|s| serde_json::from_str(&s).context("failed to deserialize state value"))
            .transpose()
    }
}
