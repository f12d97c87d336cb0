//! SQLite store backend.
//!
//! One table, ids assigned by `AUTOINCREMENT` so SQLite itself enforces
//! monotonic assignment and never reuses the id of a deleted row.

use std::path::Path;

use rusqlite::{params, Connection};

use crate::error::{KeyvaletError, Result};
use crate::store::{CredentialRecord, NewRecord, StoreBackend};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS credentials (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    user_pattern TEXT NOT NULL,
    host_pattern TEXT NOT NULL,
    key_material BLOB NOT NULL,
    comment      TEXT NOT NULL DEFAULT ''
);
";

/// SQLite-file backend.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the schema
    /// exists.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(store_err)?;
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        Ok(Self { conn })
    }
}

fn store_err(e: rusqlite::Error) -> KeyvaletError {
    KeyvaletError::StoreIo(e.to_string())
}

impl StoreBackend for SqliteStore {
    fn insert(&mut self, record: NewRecord) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO credentials (user_pattern, host_pattern, key_material, comment)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.user_pattern,
                    record.host_pattern,
                    record.key_material,
                    record.comment
                ],
            )
            .map_err(store_err)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn scan(&self) -> Result<Vec<CredentialRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, user_pattern, host_pattern, key_material, comment
                 FROM credentials ORDER BY id",
            )
            .map_err(store_err)?;

        let rows = stmt
            .query_map([], |row| {
                Ok(CredentialRecord {
                    id: row.get(0)?,
                    user_pattern: row.get(1)?,
                    host_pattern: row.get(2)?,
                    key_material: row.get(3)?,
                    comment: row.get(4)?,
                })
            })
            .map_err(store_err)?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    fn update(&mut self, record: CredentialRecord) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE credentials
                 SET user_pattern = ?1, host_pattern = ?2, key_material = ?3, comment = ?4
                 WHERE id = ?5",
                params![
                    record.user_pattern,
                    record.host_pattern,
                    record.key_material,
                    record.comment,
                    record.id
                ],
            )
            .map_err(store_err)?;
        Ok(changed > 0)
    }

    fn delete(&mut self, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM credentials WHERE id = ?1", params![id])
            .map_err(store_err)?;
        Ok(changed > 0)
    }
}
