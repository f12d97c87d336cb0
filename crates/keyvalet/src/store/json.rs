//! Document-file store backend.
//!
//! The whole store is one JSON document:
//!
//! ```json
//! {
//!     "version": 1,
//!     "next_id": 3,
//!     "records": [
//!         {
//!             "id": 1,
//!             "user_pattern": "deploy",
//!             "host_pattern": "*.internal.example",
//!             "key_material": "<base64>",
//!             "comment": "Imported from ~/.ssh/id_ed25519"
//!         }
//!     ]
//! }
//! ```
//!
//! Every mutation rewrites the document atomically (sibling temp file +
//! rename), so a crash mid-write never corrupts previously-committed
//! records. `next_id` persists the high-water mark so ids are not reused
//! after a delete.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{KeyvaletError, Result};
use crate::store::{CredentialRecord, NewRecord, StoreBackend};

const STORE_VERSION: u32 = 1;

/// Top-level structure written to disk.
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    next_id: i64,
    records: Vec<CredentialRecord>,
}

impl Default for StoreFile {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            next_id: 1,
            records: Vec::new(),
        }
    }
}

/// JSON-document backend. Holds the parsed document in memory and flushes
/// it on every mutation.
pub struct JsonStore {
    path: PathBuf,
    file: StoreFile,
}

impl JsonStore {
    /// Open the store at `path`. A missing file reads as an empty store;
    /// it is created on the first mutation.
    pub fn open(path: &Path) -> Result<Self> {
        // The document carries key material, so the raw buffer is wiped
        // once parsed.
        let file = match std::fs::read(path).map(Zeroizing::new) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                KeyvaletError::StoreIo(format!("corrupt store file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreFile::default(),
            Err(e) => {
                return Err(KeyvaletError::StoreIo(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };

        let store = Self {
            path: path.to_path_buf(),
            file,
        };
        store.check_version()?;
        Ok(store)
    }

    fn check_version(&self) -> Result<()> {
        if self.file.version != STORE_VERSION {
            return Err(KeyvaletError::StoreIo(format!(
                "unsupported store version {} in {}",
                self.file.version,
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Serialize and write the document atomically: sibling temp file,
    /// then rename into place.
    fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = Zeroizing::new(
            serde_json::to_string_pretty(&self.file)
                .map_err(|e| KeyvaletError::Serialization(e.to_string()))?,
        );

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json.as_bytes())
            .map_err(|e| KeyvaletError::StoreIo(format!("write {}: {e}", tmp_path.display())))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| KeyvaletError::StoreIo(format!("rename into place: {e}")))?;

        Ok(())
    }
}

impl StoreBackend for JsonStore {
    fn insert(&mut self, record: NewRecord) -> Result<i64> {
        let id = self.file.next_id;
        self.file.next_id += 1;
        self.file.records.push(CredentialRecord {
            id,
            user_pattern: record.user_pattern,
            host_pattern: record.host_pattern,
            key_material: record.key_material,
            comment: record.comment,
        });
        self.flush()?;
        Ok(id)
    }

    fn scan(&self) -> Result<Vec<CredentialRecord>> {
        let mut records = self.file.records.clone();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    fn update(&mut self, record: CredentialRecord) -> Result<bool> {
        match self.file.records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => {
                *existing = record;
                self.flush()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&mut self, id: i64) -> Result<bool> {
        let before = self.file.records.len();
        self.file.records.retain(|r| r.id != id);
        if self.file.records.len() == before {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }
}
