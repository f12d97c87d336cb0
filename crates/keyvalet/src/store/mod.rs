//! Credential store — wildcard selectors mapped to stored key material.
//!
//! A store is a flat collection of [`CredentialRecord`]s. Each record pairs
//! a glob-style `user_pattern`/`host_pattern` selector with an opaque key
//! blob (plaintext or passphrase-encrypted; the store never decrypts).
//!
//! Two backends implement the same keyed-CRUD-plus-full-scan capability
//! behind [`StoreBackend`]: a single JSON document ([`json::JsonStore`])
//! and a SQLite file ([`sqlite::SqliteStore`]).

pub mod json;
pub mod sqlite;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KeyvaletError, Result};
use crate::pattern;

// ── Records ───────────────────────────────────────────────────────────────────

/// One stored credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Unique, monotonically assigned, never reused within a store's
    /// lifetime. Stable across updates of the other fields.
    pub id: i64,
    /// Glob pattern matched against the login user.
    pub user_pattern: String,
    /// Glob pattern matched against the destination host.
    pub host_pattern: String,
    /// Opaque key blob — plaintext or passphrase-encrypted private key.
    #[serde(with = "key_material_b64")]
    pub key_material: Vec<u8>,
    /// Free-text provenance (e.g. import source). Informational only.
    pub comment: String,
}

/// Fields of a record that has not been assigned an id yet.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub user_pattern: String,
    pub host_pattern: String,
    pub key_material: Vec<u8>,
    pub comment: String,
}

/// Base64 (de)serialization for key blobs, so the JSON backend stores a
/// compact string instead of a byte array. The intermediate base64 text is
/// a transcoding of the key material and is wiped after use.
mod key_material_b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use zeroize::Zeroizing;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = Zeroizing::new(STANDARD.encode(bytes));
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = Zeroizing::new(String::deserialize(deserializer)?);
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

// ── Backend boundary ──────────────────────────────────────────────────────────

/// Persistent keyed-record medium: insert, full scan, update-by-id,
/// delete-by-id. The on-disk encoding is the backend's business; whichever
/// is chosen must survive partial writes without corrupting
/// previously-committed records.
pub trait StoreBackend {
    /// Insert a record, assigning the next unused id. Returns the id.
    fn insert(&mut self, record: NewRecord) -> Result<i64>;

    /// All records in ascending id (insertion) order.
    fn scan(&self) -> Result<Vec<CredentialRecord>>;

    /// Replace the non-id fields of the record with `record.id`.
    /// Returns `false` if no such id exists.
    fn update(&mut self, record: CredentialRecord) -> Result<bool>;

    /// Delete the record with `id`. Returns `false` if no such id exists.
    fn delete(&mut self, id: i64) -> Result<bool>;
}

// ── CredentialStore ───────────────────────────────────────────────────────────

/// Pattern-matched credential store over a pluggable backend.
pub struct CredentialStore {
    backend: Box<dyn StoreBackend>,
}

impl CredentialStore {
    /// Open a store at `path`, choosing the backend from the file
    /// extension: `.json` → document backend, anything else → SQLite.
    pub fn open(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::open_json(path),
            _ => Self::open_sqlite(path),
        }
    }

    /// Open (or create) a JSON document store.
    pub fn open_json(path: &Path) -> Result<Self> {
        Ok(Self {
            backend: Box::new(json::JsonStore::open(path)?),
        })
    }

    /// Open (or create) a SQLite store.
    pub fn open_sqlite(path: &Path) -> Result<Self> {
        Ok(Self {
            backend: Box::new(sqlite::SqliteStore::open(path)?),
        })
    }

    /// Wrap an arbitrary backend. Used by tests to run the same contract
    /// suite against both implementations.
    pub fn with_backend(backend: Box<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    /// Add a credential. Always succeeds unless the backing medium is
    /// unwritable. Returns the assigned id.
    pub fn add(
        &mut self,
        user_pattern: &str,
        host_pattern: &str,
        key_material: Vec<u8>,
        comment: &str,
    ) -> Result<i64> {
        self.backend.insert(NewRecord {
            user_pattern: user_pattern.to_string(),
            host_pattern: host_pattern.to_string(),
            key_material,
            comment: comment.to_string(),
        })
    }

    /// All records in insertion/id order. Not sorted by pattern
    /// specificity — that is a presentation concern.
    pub fn list(&self) -> Result<Vec<CredentialRecord>> {
        self.backend.scan()
    }

    /// Update the non-id fields of a record. Returns `false` (not an
    /// error) when the id is absent.
    pub fn update(
        &mut self,
        id: i64,
        user_pattern: &str,
        host_pattern: &str,
        key_material: Vec<u8>,
        comment: &str,
    ) -> Result<bool> {
        self.backend.update(CredentialRecord {
            id,
            user_pattern: user_pattern.to_string(),
            host_pattern: host_pattern.to_string(),
            key_material,
            comment: comment.to_string(),
        })
    }

    /// Delete a record by id. Returns `false` (not an error) when the id
    /// is absent.
    pub fn delete(&mut self, id: i64) -> Result<bool> {
        self.backend.delete(id)
    }

    /// Resolve a `(user, host)` pair to the best-matching record.
    ///
    /// Among records whose host pattern matches `host` *and* whose user
    /// pattern matches `user`, the one with the longest `host_pattern`
    /// string wins (a literal hostname beats `*`); ties break to the
    /// highest id, so the most recently added credential prevails. The
    /// result is fully determined by the store contents.
    pub fn resolve(&self, user: &str, host: &str) -> Result<Option<CredentialRecord>> {
        let best = self
            .backend
            .scan()?
            .into_iter()
            .filter(|r| {
                pattern::matches(&r.host_pattern, host) && pattern::matches(&r.user_pattern, user)
            })
            .max_by_key(|r| (r.host_pattern.len(), r.id));
        Ok(best)
    }

    /// Like [`resolve`](Self::resolve), but an empty match set is a typed
    /// [`KeyvaletError::NotFound`].
    pub fn resolve_required(&self, user: &str, host: &str) -> Result<CredentialRecord> {
        self.resolve(user, host)?
            .ok_or_else(|| KeyvaletError::NotFound {
                user: user.to_string(),
                host: host.to_string(),
            })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Run the shared contract suite against a freshly-opened store.
    fn each_backend(test: impl Fn(CredentialStore)) {
        let dir = tempfile::tempdir().unwrap();

        let json = CredentialStore::open(&dir.path().join("keys.json")).unwrap();
        test(json);

        let sqlite = CredentialStore::open(&dir.path().join("keys.db")).unwrap();
        test(sqlite);
    }

    fn add(store: &mut CredentialStore, user: &str, host: &str, key: &[u8]) -> i64 {
        store.add(user, host, key.to_vec(), "test").unwrap()
    }

    #[test]
    fn test_add_assigns_monotonic_ids() {
        each_backend(|mut store| {
            let a = add(&mut store, "*", "*", b"k1");
            let b = add(&mut store, "*", "*", b"k2");
            assert!(b > a);
        });
    }

    #[test]
    fn test_list_in_insertion_order() {
        each_backend(|mut store| {
            add(&mut store, "x", "zzz.example", b"k1");
            add(&mut store, "y", "a.example", b"k2");
            let records = store.list().unwrap();
            assert_eq!(records.len(), 2);
            // Insertion order, not specificity or alphabetical order.
            assert_eq!(records[0].user_pattern, "x");
            assert_eq!(records[1].user_pattern, "y");
            assert!(records[0].id < records[1].id);
        });
    }

    #[test]
    fn test_resolve_longest_host_pattern_wins() {
        // Scenario A: the more specific host pattern beats the broader
        // user match.
        each_backend(|mut store| {
            add(&mut store, "*", "*.internal.example", b"K1");
            add(&mut store, "deploy", "prod.internal.example", b"K2");

            let found = store.resolve("deploy", "prod.internal.example").unwrap();
            assert_eq!(found.unwrap().key_material, b"K2");
        });
    }

    #[test]
    fn test_resolve_empty_store_is_none() {
        // Scenario B.
        each_backend(|store| {
            assert!(store.resolve("alice", "box.example").unwrap().is_none());
            assert!(matches!(
                store.resolve_required("alice", "box.example"),
                Err(KeyvaletError::NotFound { .. })
            ));
        });
    }

    #[test]
    fn test_delete_then_redelete_reports_not_found() {
        // Scenario C.
        each_backend(|mut store| {
            let id = add(&mut store, "alice", "box.example", b"k");
            assert!(store.delete(id).unwrap());
            assert!(store.list().unwrap().iter().all(|r| r.id != id));
            assert!(!store.delete(id).unwrap());
        });
    }

    #[test]
    fn test_ids_not_reused_after_delete() {
        each_backend(|mut store| {
            let a = add(&mut store, "*", "*", b"k1");
            store.delete(a).unwrap();
            let b = add(&mut store, "*", "*", b"k2");
            assert!(b > a, "id {b} must not reuse deleted id {a}");
        });
    }

    #[test]
    fn test_resolve_tie_breaks_to_highest_id() {
        each_backend(|mut store| {
            add(&mut store, "*", "web[0-9].example", b"older");
            add(&mut store, "*", "web?.example", b"newer"); // same length

            let found = store.resolve("root", "web1.example").unwrap().unwrap();
            assert_eq!(found.key_material, b"newer");
        });
    }

    #[test]
    fn test_resolve_is_deterministic() {
        each_backend(|mut store| {
            add(&mut store, "*", "*", b"k1");
            add(&mut store, "*", "*.example", b"k2");
            add(&mut store, "deploy", "*", b"k3");

            let first = store.resolve("deploy", "host.example").unwrap().unwrap();
            for _ in 0..10 {
                let again = store.resolve("deploy", "host.example").unwrap().unwrap();
                assert_eq!(again.id, first.id);
            }
        });
    }

    #[test]
    fn test_resolve_requires_both_patterns_to_match() {
        each_backend(|mut store| {
            add(&mut store, "deploy", "prod.example", b"k");
            assert!(store.resolve("alice", "prod.example").unwrap().is_none());
            assert!(store.resolve("deploy", "dev.example").unwrap().is_none());
        });
    }

    #[test]
    fn test_resolve_empty_user_matches_star_or_empty_pattern() {
        each_backend(|mut store| {
            add(&mut store, "deploy", "a.example", b"k1");
            add(&mut store, "*", "b.example", b"k2");
            add(&mut store, "", "c.example", b"k3");

            assert!(store.resolve("", "a.example").unwrap().is_none());
            assert_eq!(
                store.resolve("", "b.example").unwrap().unwrap().key_material,
                b"k2"
            );
            assert_eq!(
                store.resolve("", "c.example").unwrap().unwrap().key_material,
                b"k3"
            );
        });
    }

    #[test]
    fn test_update_preserves_id_and_reports_missing() {
        each_backend(|mut store| {
            let id = add(&mut store, "old", "old.example", b"k1");
            assert!(store
                .update(id, "new", "new.example", b"k2".to_vec(), "updated")
                .unwrap());

            let records = store.list().unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].id, id);
            assert_eq!(records[0].user_pattern, "new");
            assert_eq!(records[0].host_pattern, "new.example");
            assert_eq!(records[0].key_material, b"k2");
            assert_eq!(records[0].comment, "updated");

            assert!(!store
                .update(id + 999, "x", "y", b"z".to_vec(), "")
                .unwrap());
        });
    }

    #[test]
    fn test_duplicate_patterns_are_permitted() {
        each_backend(|mut store| {
            add(&mut store, "*", "same.example", b"k1");
            add(&mut store, "*", "same.example", b"k2");
            assert_eq!(store.list().unwrap().len(), 2);
            // Newest duplicate wins on resolve.
            assert_eq!(
                store
                    .resolve("u", "same.example")
                    .unwrap()
                    .unwrap()
                    .key_material,
                b"k2"
            );
        });
    }
}
