//! Time-partitioned segment store.
//!
//! Every [`StorageKey`] owns a sequence of segments, one per fixed-width time
//! bucket. Writes merge into the segment covering their timestamp; reads
//! merge every segment overlapping the requested window.
//!
//! # Locking
//!
//! The key map sits behind a read-write lock that is only held long enough
//! to look up (or insert) a key's entry handle. Each entry has its own mutex,
//! so writers to different keys never wait on each other, and a merge never
//! runs while the map lock is held.
//!
//! # Example
//!
//! ```
//! use flamedb::{SegmentStore, StoreConfig};
//! use flamedb_parse::{ProfileTree, StorageKey};
//!
//! let store = SegmentStore::open(StoreConfig::default()).unwrap();
//! let key = StorageKey::parse("app.cpu{}").unwrap();
//!
//! store.put(&key, 1_577_840_460, ProfileTree::from_iter([("foo;bar", 2)])).unwrap();
//! let result = store.get(&key, 1_577_840_460, 1_577_840_470).unwrap();
//!
//! assert_eq!(result.tree.total(), 2);
//! ```

use crate::config::StoreConfig;
use crate::snapshot::{self, SeriesSnapshot, Snapshot, SnapshotError};
use flamedb_parse::{ProfileTree, StorageKey};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Seconds since the Unix epoch.
pub type Timestamp = i64;

/// Errors returned by the segment store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no segments stored for key {0}")]
    NotFound(StorageKey),

    #[error("store is closed")]
    Closed,

    #[error("bucket width must be a whole, non-zero number of seconds, got {0:?}")]
    InvalidBucketWidth(Duration),

    #[error("snapshot was written with {found}s buckets but the store is configured for {expected}s")]
    BucketWidthMismatch { expected: i64, found: i64 },

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// A merged range query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    /// Union of every segment that overlapped the requested window.
    pub tree: ProfileTree,
    /// Start of the earliest segment used.
    pub from: Timestamp,
    /// End of the latest segment used.
    pub until: Timestamp,
    /// Number of segments merged.
    pub segments: usize,
}

impl QueryResult {
    fn empty(at: Timestamp) -> Self {
        Self {
            tree: ProfileTree::new(),
            from: at,
            until: at,
            segments: 0,
        }
    }
}

/// Decides how long segments are kept. The store only exposes the eviction
/// hook; deployments supply the policy.
pub trait RetentionPolicy: Send + Sync {
    /// How long a segment is kept after its bucket ends.
    fn retention(&self) -> Duration;

    /// Segments ending at or before the returned time are expired.
    fn cutoff(&self, now: Timestamp) -> Timestamp {
        let retention = i64::try_from(self.retention().as_secs()).unwrap_or(i64::MAX);
        now.saturating_sub(retention)
    }
}

/// Keep segments for a fixed duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxAge(pub Duration);

impl RetentionPolicy for MaxAge {
    fn retention(&self) -> Duration {
        self.0
    }
}

#[derive(Debug, Default)]
struct KeyEntry {
    segments: BTreeMap<Timestamp, ProfileTree>,
    /// Set once the entry has been unlinked from the key map; writers that
    /// raced with the removal must look the key up again.
    retired: bool,
}

/// Segments for every key, partitioned into fixed-width time buckets.
pub struct SegmentStore {
    config: StoreConfig,
    width: i64,
    entries: RwLock<HashMap<StorageKey, Arc<Mutex<KeyEntry>>>>,
    closed: AtomicBool,
}

impl SegmentStore {
    /// Open a store. When `config.data_dir` holds a snapshot it is restored.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let width = bucket_width_secs(config.bucket_width)?;
        let mut entries = HashMap::new();

        if let Some(dir) = &config.data_dir {
            let path = snapshot::path_in(dir);
            if path.exists() {
                let snapshot = snapshot::read(&path)?;
                if snapshot.bucket_width != width {
                    return Err(StoreError::BucketWidthMismatch {
                        expected: width,
                        found: snapshot.bucket_width,
                    });
                }

                for series in snapshot.series {
                    let entry = KeyEntry {
                        segments: series.segments.into_iter().collect(),
                        retired: false,
                    };
                    entries.insert(series.key, Arc::new(Mutex::new(entry)));
                }
                info!(
                    path = %path.display(),
                    keys = entries.len(),
                    "restored segment snapshot"
                );
            }
        }

        Ok(Self {
            config,
            width,
            entries: RwLock::new(entries),
            closed: AtomicBool::new(false),
        })
    }

    /// Merge `tree` into the segment of `key` whose bucket covers `at`.
    pub fn put(&self, key: &StorageKey, at: Timestamp, tree: ProfileTree) -> Result<()> {
        let start = self.bucket_start(at);

        loop {
            let handle = self.entry_or_insert(key);
            let mut entry = handle.lock();
            if entry.retired {
                continue;
            }
            // Checked under the entry lock so close() never misses a write.
            if self.closed.load(Ordering::SeqCst) {
                return Err(StoreError::Closed);
            }

            let samples = tree.total();
            entry.segments.entry(start).or_default().merge(tree);
            debug!(key = %key, bucket = start, samples, "merged into segment");
            return Ok(());
        }
    }

    /// Merge every segment of `key` that intersects `[from, until)`.
    ///
    /// Returns [`StoreError::NotFound`] when the key has no segments at all,
    /// and an empty tree spanning `[from, from)` when segments exist but none
    /// overlap the window.
    pub fn get(&self, key: &StorageKey, from: Timestamp, until: Timestamp) -> Result<QueryResult> {
        let handle = self
            .entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        let entry = handle.lock();

        if entry.segments.is_empty() {
            return Err(StoreError::NotFound(key.clone()));
        }
        if until <= from {
            return Ok(QueryResult::empty(from));
        }

        // A bucket [start, start + width) overlaps the window iff
        // start < until and start + width > from.
        let lowest = from.saturating_sub(self.width).saturating_add(1);
        let mut result: Option<QueryResult> = None;

        for (&start, tree) in entry.segments.range(lowest..until) {
            let end = start.saturating_add(self.width);
            let acc = result.get_or_insert_with(|| QueryResult::empty(start));
            acc.tree.merge_ref(tree);
            acc.until = end;
            acc.segments += 1;
        }

        let result = result.unwrap_or_else(|| QueryResult::empty(from));
        debug!(
            key = %key,
            from,
            until,
            segments = result.segments,
            "merged segments for query"
        );
        Ok(result)
    }

    /// Drop every segment whose bucket ends at or before `cutoff`. Keys left
    /// without segments are removed. Returns the number of segments dropped.
    pub fn evict_before(&self, cutoff: Timestamp) -> usize {
        let first_kept = cutoff.saturating_sub(self.width).saturating_add(1);
        let handles: Vec<(StorageKey, Arc<Mutex<KeyEntry>>)> = self
            .entries
            .read()
            .iter()
            .map(|(key, handle)| (key.clone(), Arc::clone(handle)))
            .collect();

        let mut dropped = 0;
        let mut emptied = Vec::new();
        for (key, handle) in handles {
            let mut entry = handle.lock();
            let kept = entry.segments.split_off(&first_kept);
            dropped += std::mem::replace(&mut entry.segments, kept).len();
            if entry.segments.is_empty() {
                emptied.push(key);
            }
        }

        if !emptied.is_empty() {
            let mut entries = self.entries.write();
            for key in emptied {
                let Some(handle) = entries.get(&key).cloned() else {
                    continue;
                };
                let mut entry = handle.lock();
                // A writer may have refilled the entry since it was emptied.
                if entry.segments.is_empty() {
                    entry.retired = true;
                    entries.remove(&key);
                }
            }
        }

        if dropped > 0 {
            info!(cutoff, dropped, "evicted expired segments");
        }
        dropped
    }

    /// Evict everything `policy` considers expired at `now`.
    pub fn apply_retention<P>(&self, policy: &P, now: Timestamp) -> usize
    where
        P: RetentionPolicy + ?Sized,
    {
        self.evict_before(policy.cutoff(now))
    }

    /// Every key with at least one segment, sorted.
    pub fn keys(&self) -> Vec<StorageKey> {
        let mut keys: Vec<StorageKey> = self
            .entries
            .read()
            .iter()
            .filter(|(_, handle)| !handle.lock().segments.is_empty())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of segments stored for `key`.
    pub fn segment_count(&self, key: &StorageKey) -> usize {
        let handle = self.entries.read().get(key).cloned();
        handle.map_or(0, |handle| handle.lock().segments.len())
    }

    /// Configured bucket width.
    pub fn bucket_width(&self) -> Duration {
        self.config.bucket_width
    }

    /// Start of the bucket containing `at`.
    pub fn bucket_start(&self, at: Timestamp) -> Timestamp {
        at.saturating_sub(at.rem_euclid(self.width))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting writes and, when a data directory is configured,
    /// persist a snapshot. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let Some(dir) = &self.config.data_dir else {
            info!("closed in-memory segment store");
            return Ok(());
        };

        let handles: Vec<(StorageKey, Arc<Mutex<KeyEntry>>)> = self
            .entries
            .read()
            .iter()
            .map(|(key, handle)| (key.clone(), Arc::clone(handle)))
            .collect();

        let mut snapshot = Snapshot::new(self.width);
        for (key, handle) in handles {
            let entry = handle.lock();
            if entry.segments.is_empty() {
                continue;
            }
            snapshot.series.push(SeriesSnapshot {
                key,
                segments: entry
                    .segments
                    .iter()
                    .map(|(start, tree)| (*start, tree.clone()))
                    .collect(),
            });
        }
        snapshot.series.sort_by(|a, b| a.key.cmp(&b.key));

        let path = snapshot::path_in(dir);
        snapshot::write(&path, &snapshot)?;
        info!(
            path = %path.display(),
            keys = snapshot.series.len(),
            "wrote segment snapshot"
        );
        Ok(())
    }

    fn entry_or_insert(&self, key: &StorageKey) -> Arc<Mutex<KeyEntry>> {
        if let Some(handle) = self.entries.read().get(key) {
            return Arc::clone(handle);
        }
        let mut entries = self.entries.write();
        Arc::clone(entries.entry(key.clone()).or_default())
    }
}

fn bucket_width_secs(width: Duration) -> Result<i64> {
    if width.subsec_nanos() != 0 {
        return Err(StoreError::InvalidBucketWidth(width));
    }
    i64::try_from(width.as_secs())
        .ok()
        .filter(|secs| *secs > 0)
        .ok_or(StoreError::InvalidBucketWidth(width))
}
