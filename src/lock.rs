//! Advisory promise locks.
//!
//! A lock is identified by a [`LockKey`] built from the operation, the
//! promiser and the target file. Acquisition never blocks: a lock that is
//! held, or that completed less than `if_elapsed` ago, is simply refused and
//! the caller skips the promise for this run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

const LOCK_DB_FILE: &str = "locks.json";
const STATE_DIR_NAME: &str = ".convergent-edit";

#[derive(Error, Debug)]
pub enum LockError {
    #[error("lock database I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt lock database {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no home directory to place the lock database in")]
    NoStateDir,
}

/// Timing rules for a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// Minimum time between two completions of the same lock.
    pub if_elapsed: Duration,
    /// A lock held longer than this is considered abandoned and taken over.
    pub expire_after: Duration,
}

impl LockPolicy {
    /// Policy for individual edit promises.
    pub fn promise() -> Self {
        Self {
            if_elapsed: Duration::from_secs(3 * 60),
            expire_after: Duration::from_secs(60 * 60),
        }
    }

    /// Policy for the bundle-wide file lock: exclusive, but re-runnable at once.
    pub fn bundle() -> Self {
        Self {
            if_elapsed: Duration::ZERO,
            expire_after: Duration::from_secs(60 * 60),
        }
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self::promise()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey(String);

impl LockKey {
    /// Key for one promise on one file. `ordinal` distinguishes repeated
    /// identical promises that are allowed to insert duplicates.
    pub fn promise(operation: &str, promiser: &str, file: &Path, ordinal: Option<usize>) -> Self {
        let mut name = format!("{}-{}-{}", operation, promiser, file.display());
        if let Some(ordinal) = ordinal {
            name.push_str(&format!("-{ordinal}"));
        }
        Self(name)
    }

    /// Key guarding a whole bundle's pass over `file`.
    pub fn master(file: &Path) -> Self {
        Self(format!("masterfilelock-{}", file.display()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable digest used as the on-disk record key.
    pub fn digest(&self) -> String {
        format!("{:016x}", xxh3_64(self.0.as_bytes()))
    }
}

/// Proof of a granted lock. Pass it back to [`LockManager::release`].
#[derive(Debug)]
#[must_use = "a lock handle should be released when the promise finishes"]
pub struct LockHandle {
    key: LockKey,
}

impl LockHandle {
    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

pub trait LockManager {
    /// Try to take `key`. `Ok(None)` means the lock is unavailable for now.
    fn acquire(&mut self, key: &LockKey, policy: &LockPolicy)
        -> Result<Option<LockHandle>, LockError>;

    /// Release a lock and record its completion time.
    fn release(&mut self, handle: LockHandle) -> Result<(), LockError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct LockRecord {
    name: String,
    #[serde(default)]
    held_since: Option<u64>,
    #[serde(default)]
    last_completed: Option<u64>,
}

/// Lock bookkeeping shared by the in-memory and persistent managers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockTable {
    records: BTreeMap<String, LockRecord>,
}

impl LockTable {
    /// Grant `key` at time `now` (seconds since the epoch) if the policy allows.
    pub fn try_acquire(&mut self, key: &LockKey, policy: &LockPolicy, now: u64) -> bool {
        let record = self
            .records
            .entry(key.digest())
            .or_insert_with(|| LockRecord {
                name: key.as_str().to_string(),
                ..LockRecord::default()
            });

        if let Some(since) = record.held_since {
            if now.saturating_sub(since) < policy.expire_after.as_secs() {
                tracing::debug!(target: "edit.lock", key = key.as_str(), "lock is held");
                return false;
            }
            tracing::warn!(
                target: "edit.lock",
                key = key.as_str(),
                held_for = now.saturating_sub(since),
                "lock expired, taking it over"
            );
        } else if let Some(done) = record.last_completed {
            if now.saturating_sub(done) < policy.if_elapsed.as_secs() {
                tracing::debug!(
                    target: "edit.lock",
                    key = key.as_str(),
                    "lock completed recently, nothing to do"
                );
                return false;
            }
        }

        record.held_since = Some(now);
        true
    }

    pub fn complete(&mut self, key: &LockKey, now: u64) {
        if let Some(record) = self.records.get_mut(&key.digest()) {
            record.held_since = None;
            record.last_completed = Some(now);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Process-local locks; forgotten when dropped.
#[derive(Debug, Default)]
pub struct MemoryLocks {
    table: LockTable,
}

impl MemoryLocks {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockManager for MemoryLocks {
    fn acquire(
        &mut self,
        key: &LockKey,
        policy: &LockPolicy,
    ) -> Result<Option<LockHandle>, LockError> {
        Ok(self
            .table
            .try_acquire(key, policy, unix_now())
            .then(|| LockHandle { key: key.clone() }))
    }

    fn release(&mut self, handle: LockHandle) -> Result<(), LockError> {
        self.table.complete(&handle.key, unix_now());
        Ok(())
    }
}

/// Locks persisted as JSON so that the `if_elapsed` window spans runs.
#[derive(Debug)]
pub struct LockDb {
    path: PathBuf,
    table: LockTable,
}

impl LockDb {
    /// Default state directory: `~/.convergent-edit`.
    pub fn default_dir() -> Result<PathBuf, LockError> {
        home::home_dir()
            .map(|home| home.join(STATE_DIR_NAME))
            .ok_or(LockError::NoStateDir)
    }

    /// Open (or start) the lock database inside `state_dir`.
    pub fn open(state_dir: &Path) -> Result<Self, LockError> {
        fs::create_dir_all(state_dir).map_err(|source| LockError::Io {
            path: state_dir.to_path_buf(),
            source,
        })?;

        let path = state_dir.join(LOCK_DB_FILE);
        let table = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => LockTable::default(),
            Ok(content) => serde_json::from_str(&content).map_err(|source| LockError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LockTable::default(),
            Err(source) => return Err(LockError::Io { path, source }),
        };

        tracing::debug!(
            target: "edit.lock",
            path = %path.display(),
            records = table.len(),
            "opened lock database"
        );
        Ok(Self { path, table })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), LockError> {
        let io_err = |source| LockError::Io {
            path: self.path.clone(),
            source,
        };
        let json = serde_json::to_vec_pretty(&self.table).map_err(|source| LockError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
        temp.write_all(&json).map_err(io_err)?;
        temp.as_file().sync_all().map_err(io_err)?;
        temp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

impl LockManager for LockDb {
    fn acquire(
        &mut self,
        key: &LockKey,
        policy: &LockPolicy,
    ) -> Result<Option<LockHandle>, LockError> {
        if !self.table.try_acquire(key, policy, unix_now()) {
            return Ok(None);
        }
        self.flush()?;
        Ok(Some(LockHandle { key: key.clone() }))
    }

    fn release(&mut self, handle: LockHandle) -> Result<(), LockError> {
        self.table.complete(&handle.key, unix_now());
        self.flush()
    }
}
