//! Store configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default segment width, matching the finest resolution profilers flush at.
pub const DEFAULT_BUCKET_WIDTH: Duration = Duration::from_secs(10);

/// Configuration for a [`SegmentStore`](crate::SegmentStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Width of each segment's time bucket. Must be a whole, non-zero number
    /// of seconds.
    pub bucket_width: Duration,
    /// Directory holding the store snapshot. `None` keeps the store purely
    /// in memory.
    pub data_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            bucket_width: DEFAULT_BUCKET_WIDTH,
            data_dir: None,
        }
    }
}

impl StoreConfig {
    /// In-memory store with the given bucket width.
    pub fn with_bucket_width(bucket_width: Duration) -> Self {
        Self {
            bucket_width,
            ..Self::default()
        }
    }

    /// Persist snapshots under `data_dir`.
    pub fn persist_to(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }
}
