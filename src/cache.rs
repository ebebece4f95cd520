//! Materialization cache: remote keys become genuine local files.
//!
//! At most one fetch per key is in flight. The caller that creates an entry
//! fetches; everyone else arriving while it is pending waits on the entry's
//! condition variable and receives the same outcome. `Ready` and `Missing`
//! are final for the life of the process; `Failed` lets the next caller retry.

use std::collections::hash_map::DefaultHasher;
use std::fs::{self, DirBuilder, Permissions};
use std::hash::{Hash, Hasher};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::common::keys::basename;
use crate::common::types::{FailureKind, HostfsMetrics};
use crate::remote::{FetchOutcome, RemoteSource};

const ARTIFACT_MODE: u32 = 0o755;
const CACHE_DIR_MODE: u32 = 0o700;
const MAX_NAME_TAIL: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    Ready(PathBuf),
    Missing,
    Failed(FailureKind),
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cannot create cache directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("cannot write materialized copy of {key}: {source}")]
    Write { key: String, source: io::Error },
    #[error("refusing cache directory {path}: {reason}")]
    Untrusted { path: PathBuf, reason: &'static str },
}

#[derive(Debug, Clone)]
enum EntryState {
    Pending,
    Ready(PathBuf),
    Missing,
    Failed(FailureKind),
}

impl EntryState {
    fn outcome(&self) -> Materialized {
        match self {
            EntryState::Ready(path) => Materialized::Ready(path.clone()),
            EntryState::Missing => Materialized::Missing,
            EntryState::Failed(kind) => Materialized::Failed(*kind),
            // Waiters only read the state after the fetcher left Pending.
            EntryState::Pending => Materialized::Failed(FailureKind::Transport),
        }
    }
}

#[derive(Debug)]
struct Slot {
    state: EntryState,
    waiters: usize,
}

#[derive(Debug)]
struct CacheEntry {
    slot: Mutex<Slot>,
    changed: Condvar,
    /// Mirror of a final state, read without taking the slot lock.
    settled: OnceLock<Materialized>,
}

impl CacheEntry {
    fn pending() -> Self {
        Self {
            slot: Mutex::new(Slot {
                state: EntryState::Pending,
                waiters: 0,
            }),
            changed: Condvar::new(),
            settled: OnceLock::new(),
        }
    }
}

#[derive(Debug, Default)]
struct MetricsCounters {
    fetches: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
    waits: AtomicU64,
}

pub struct MaterializationCache {
    dir: PathBuf,
    source: Box<dyn RemoteSource>,
    entries: DashMap<String, Arc<CacheEntry>>,
    metrics: MetricsCounters,
}

impl MaterializationCache {
    /// Creates (if needed) the private directory `dir` and an empty table.
    pub fn new(dir: impl Into<PathBuf>, source: Box<dyn RemoteSource>) -> Result<Self, CacheError> {
        let dir = dir.into();
        DirBuilder::new()
            .recursive(true)
            .mode(CACHE_DIR_MODE)
            .create(&dir)
            .map_err(|source| CacheError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        check_private(&dir)?;
        if let Some(parent) = dir.parent() {
            check_parent(parent)?;
        }
        log::info!("materialization cache at {}", dir.display());
        Ok(Self {
            dir,
            source,
            entries: DashMap::new(),
            metrics: MetricsCounters::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn materialize(&self, key: &str) -> Materialized {
        if let Some(entry) = self.entries.get(key) {
            if let Some(done) = entry.settled.get() {
                self.count_hit(done);
                return done.clone();
            }
        }

        let (entry, creator) = match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => (Arc::clone(occupied.get()), false),
            Entry::Vacant(vacant) => {
                let entry = Arc::new(CacheEntry::pending());
                vacant.insert(Arc::clone(&entry));
                (entry, true)
            }
        };
        if creator {
            return self.fetch_into(key, &entry);
        }

        let mut slot = entry.slot.lock();
        match slot.state {
            EntryState::Pending => {
                slot.waiters += 1;
                self.metrics.waits.fetch_add(1, Ordering::Relaxed);
                log::trace!("waiting for in-flight fetch of {key}");
                while matches!(slot.state, EntryState::Pending) {
                    entry.changed.wait(&mut slot);
                }
                slot.waiters -= 1;
                slot.state.outcome()
            }
            EntryState::Failed(kind) => {
                log::debug!("retrying {key} after earlier {kind:?} failure");
                slot.state = EntryState::Pending;
                drop(slot);
                self.fetch_into(key, &entry)
            }
            ref settled => {
                let outcome = settled.outcome();
                self.count_hit(&outcome);
                outcome
            }
        }
    }

    pub fn metrics(&self) -> HostfsMetrics {
        HostfsMetrics {
            size: std::mem::size_of::<HostfsMetrics>() as u32,
            fetches: self.metrics.fetches.load(Ordering::Relaxed),
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            failures: self.metrics.failures.load(Ordering::Relaxed),
            waits: self.metrics.waits.load(Ordering::Relaxed),
            entries: self.entries.len() as u64,
        }
    }

    fn count_hit(&self, outcome: &Materialized) {
        if matches!(outcome, Materialized::Ready(_)) {
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Runs one fetch cycle. The entry must be Pending and owned by the caller.
    fn fetch_into(&self, key: &str, entry: &CacheEntry) -> Materialized {
        self.metrics.fetches.fetch_add(1, Ordering::Relaxed);
        log::debug!("fetching remote key {key}");

        let state = match self.source.fetch(key) {
            Ok(FetchOutcome::Found(file)) => match self.write_artifact(key, &file.data) {
                Ok(path) => {
                    log::debug!("materialized {key} ({} bytes) at {}", file.size, path.display());
                    EntryState::Ready(path)
                }
                Err(err) => {
                    log::warn!("{err}");
                    self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                    EntryState::Failed(FailureKind::Materialization)
                }
            },
            Ok(FetchOutcome::NotFound) => {
                log::debug!("remote key {key} does not exist");
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                EntryState::Missing
            }
            Err(err) => {
                log::warn!("fetch of {key} failed: {err}");
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                EntryState::Failed(FailureKind::Transport)
            }
        };

        let outcome = state.outcome();
        let mut slot = entry.slot.lock();
        slot.state = state;
        if matches!(outcome, Materialized::Ready(_) | Materialized::Missing) {
            let _ = entry.settled.set(outcome.clone());
        }
        if slot.waiters > 0 {
            log::trace!("waking {} waiter(s) for {key}", slot.waiters);
        }
        entry.changed.notify_all();
        outcome
    }

    /// Writes `data` to a temp file in the cache directory and renames it into
    /// place, so readers only ever see complete files.
    fn write_artifact(&self, key: &str, data: &[u8]) -> Result<PathBuf, CacheError> {
        let target = self.dir.join(artifact_name(key));
        let wrap = |source: io::Error| CacheError::Write {
            key: key.to_string(),
            source,
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(".fetch-")
            .tempfile_in(&self.dir)
            .map_err(wrap)?;
        tmp.write_all(data).map_err(wrap)?;
        tmp.as_file().sync_all().map_err(wrap)?;
        fs::set_permissions(tmp.path(), Permissions::from_mode(ARTIFACT_MODE)).map_err(wrap)?;
        tmp.persist(&target).map_err(|err| wrap(err.error))?;
        Ok(target)
    }
}

/// The cache directory itself: a real directory owned by us, writable by
/// nobody else. An existing one is reused only if it passes.
fn check_private(dir: &Path) -> Result<(), CacheError> {
    let meta = inspect(dir)?;
    let untrusted = |reason| CacheError::Untrusted {
        path: dir.to_path_buf(),
        reason,
    };
    if !meta.file_type().is_dir() {
        return Err(untrusted("not a directory"));
    }
    if meta.uid() != effective_uid() {
        return Err(untrusted("owned by another user"));
    }
    if meta.mode() & 0o077 != 0 {
        return Err(untrusted("accessible to group or others"));
    }
    Ok(())
}

/// Whoever can write the parent can rename the cache directory away, unless
/// the sticky bit stops them.
fn check_parent(parent: &Path) -> Result<(), CacheError> {
    let meta = fs::metadata(parent).map_err(|source| CacheError::CreateDir {
        path: parent.to_path_buf(),
        source,
    })?;
    let owner = meta.uid();
    if owner != effective_uid() && owner != 0 {
        return Err(CacheError::Untrusted {
            path: parent.to_path_buf(),
            reason: "parent owned by another user",
        });
    }
    if meta.mode() & 0o022 != 0 && meta.mode() & u32::from(libc::S_ISVTX) == 0 {
        return Err(CacheError::Untrusted {
            path: parent.to_path_buf(),
            reason: "parent writable by others without the sticky bit",
        });
    }
    Ok(())
}

fn inspect(path: &Path) -> Result<fs::Metadata, CacheError> {
    fs::symlink_metadata(path).map_err(|source| CacheError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() }
}

/// `<hash>-<basename>`: unique per key, still recognizable in listings.
fn artifact_name(key: &str) -> String {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let tail: String = basename(key)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .take(MAX_NAME_TAIL)
        .collect();
    if tail.is_empty() {
        format!("{:016x}", hasher.finish())
    } else {
        format!("{:016x}-{tail}", hasher.finish())
    }
}
