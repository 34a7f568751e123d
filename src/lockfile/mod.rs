//! Lock store: the persistent `(processor, key) -> version` mapping.
//!
//! The lock file pins the authoritative version for every processor/key pair
//! the engine has resolved, so that `scan` can snapshot a tree and `check`
//! can compare against a known-good state. The on-disk format is JSON Lines,
//! one object per entry:
//!
//! ```text
//! {"name":"gha-uses","key":"actions/checkout","version":"v4.1.1"}
//! ```
//!
//! Entries are written sorted by `(name, key)`, so the byte output depends
//! only on the mapping itself, never on insertion order. Each entry also
//! carries an in-memory `used` flag, set by any [`Locks::get`] or
//! [`Locks::set`] during the run; saving with `used_only` prunes entries the
//! run never touched.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::core::VbumpError;
use crate::utils::fs::atomic_replace;

/// One pinned version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    /// Processor name that resolved this entry.
    pub name: String,
    /// Expanded key template for the match.
    pub key: String,
    /// The resolved version.
    pub version: String,
    /// Whether this run touched the entry. Never persisted.
    #[serde(skip)]
    pub used: bool,
}

/// Thread-safe lock store. The mutex covers only map access; callers never
/// hold it across I/O.
#[derive(Debug, Default)]
pub struct Locks {
    entries: Mutex<BTreeMap<String, BTreeMap<String, Lock>>>,
}

impl Locks {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry, marking it used.
    pub fn get(&self, name: &str, key: &str) -> Option<Lock> {
        let mut entries = self.entries.lock().expect("lock store poisoned");
        let entry = entries.get_mut(name)?.get_mut(key)?;
        entry.used = true;
        Some(entry.clone())
    }

    /// Record a version, marking the entry used. A second `set` for the same
    /// `(name, key)` overwrites.
    pub fn set(&self, name: &str, key: &str, version: &str) {
        let mut entries = self.entries.lock().expect("lock store poisoned");
        entries.entry(name.to_string()).or_default().insert(
            key.to_string(),
            Lock {
                name: name.to_string(),
                key: key.to_string(),
                version: version.to_string(),
                used: true,
            },
        );
    }

    /// Parse a store from JSON-Lines input.
    pub fn load_reader(r: impl std::io::Read) -> Result<Self, VbumpError> {
        let locks = Self::new();
        {
            let mut entries = locks.entries.lock().expect("lock store poisoned");
            for line in BufReader::new(r).lines() {
                let line = line.map_err(|e| VbumpError::Lock(e.to_string()))?;
                if line.trim().is_empty() {
                    continue;
                }
                let entry: Lock = serde_json::from_str(&line)
                    .map_err(|e| VbumpError::Lock(format!("failed to read lock file: {e}")))?;
                entries
                    .entry(entry.name.clone())
                    .or_default()
                    .insert(entry.key.clone(), entry);
            }
        }
        Ok(locks)
    }

    /// Load a store from disk. The caller decides what a missing file means;
    /// see [`Locks::load_file_or_default`].
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, VbumpError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| VbumpError::io(path, e))?;
        Self::load_reader(file)
    }

    /// Load a store from disk, treating a missing file as an empty store.
    pub fn load_file_or_default(path: impl AsRef<Path>) -> Result<Self, VbumpError> {
        match Self::load_file(path) {
            Err(VbumpError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(Self::new())
            }
            other => other,
        }
    }

    /// Write the store as JSON Lines, sorted by `(name, key)`. With
    /// `used_only` set, entries not touched this run are dropped.
    pub fn save_writer(&self, mut w: impl Write, used_only: bool) -> Result<(), VbumpError> {
        let snapshot = self.snapshot();
        for keys in snapshot.values() {
            for entry in keys.values() {
                if used_only && !entry.used {
                    continue;
                }
                let line = serde_json::to_string(entry)
                    .map_err(|e| VbumpError::Lock(format!("failed to encode lock entry: {e}")))?;
                writeln!(w, "{line}").map_err(|e| VbumpError::Lock(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Save to disk via atomic replace.
    pub fn save_file(&self, path: impl AsRef<Path>, used_only: bool) -> Result<(), VbumpError> {
        let mut buf = Vec::new();
        self.save_writer(&mut buf, used_only)?;
        atomic_replace(path.as_ref(), &buf)
    }

    /// Clone of the current entries. The mutex is released before returning,
    /// so callers can do I/O on the copy.
    pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<String, Lock>> {
        self.entries.lock().expect("lock store poisoned").clone()
    }
}
