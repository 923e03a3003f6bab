//! The ingestion boundary: turn a submitted payload into a stored segment.
//!
//! A payload is inflated (if compressed), decoded in full, and only then
//! merged into the store, so a malformed upload never leaves partial data
//! behind.

use crate::store::{QueryResult, SegmentStore, StoreError, Timestamp};
use flamedb_parse::{DecodeError, Format, StorageKey};
use flate2::read::GzDecoder;
use std::io::{self, Read};
use thiserror::Error;
use tracing::{debug, warn};

/// Transfer encoding applied to a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Identity,
    Gzip,
}

impl Encoding {
    /// Interpret a `Content-Encoding` style header value. Unknown values are
    /// treated as uncompressed.
    pub fn from_header(value: &str) -> Encoding {
        match value.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Encoding::Gzip,
            _ => Encoding::Identity,
        }
    }
}

/// One upload from a profiler.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub key: StorageKey,
    pub from: Timestamp,
    pub until: Timestamp,
    pub format: Format,
    pub encoding: Encoding,
    pub payload: Vec<u8>,
}

impl IngestRequest {
    /// Request with identity encoding and `until == from`.
    pub fn new(
        key: StorageKey,
        from: Timestamp,
        format: Format,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            key,
            from,
            until: from,
            format,
            encoding: Encoding::Identity,
            payload: payload.into(),
        }
    }

    pub fn until(mut self, until: Timestamp) -> Self {
        self.until = until;
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }
}

/// What an accepted upload contributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    /// Total samples merged.
    pub samples: u64,
    /// Distinct stacks in the decoded payload.
    pub stacks: usize,
    /// Start of the bucket the samples landed in.
    pub bucket: Timestamp,
}

/// Errors that reject an upload.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("invalid time range: until ({until}) is before from ({from})")]
    InvalidTimeRange { from: Timestamp, until: Timestamp },

    #[error("failed to inflate gzip payload: {0}")]
    Inflate(#[source] io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Decode `request` and merge it into `store`, attributed to `request.from`.
pub fn ingest(store: &SegmentStore, request: IngestRequest) -> Result<IngestSummary, IngestError> {
    let IngestRequest {
        key,
        from,
        until,
        format,
        encoding,
        payload,
    } = request;

    let result = decode(from, until, format, encoding, payload).and_then(|tree| {
        let summary = IngestSummary {
            samples: tree.total(),
            stacks: tree.stack_count(),
            bucket: store.bucket_start(from),
        };
        store.put(&key, from, tree)?;
        Ok(summary)
    });

    match &result {
        Ok(summary) => debug!(
            key = %key,
            format = %format,
            samples = summary.samples,
            stacks = summary.stacks,
            "ingested profile"
        ),
        Err(e) => warn!(key = %key, format = %format, error = %e, "rejected profile"),
    }
    result
}

/// Merge every stored segment of `key` intersecting `[from, until)`.
pub fn query(
    store: &SegmentStore,
    key: &StorageKey,
    from: Timestamp,
    until: Timestamp,
) -> Result<QueryResult, StoreError> {
    store.get(key, from, until)
}

fn decode(
    from: Timestamp,
    until: Timestamp,
    format: Format,
    encoding: Encoding,
    payload: Vec<u8>,
) -> Result<flamedb_parse::ProfileTree, IngestError> {
    if until < from {
        return Err(IngestError::InvalidTimeRange { from, until });
    }

    let payload = match encoding {
        Encoding::Identity => payload,
        Encoding::Gzip => inflate(&payload).map_err(IngestError::Inflate)?,
    };

    Ok(format.decode(&payload)?)
}

fn inflate(compressed: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(compressed).read_to_end(&mut out)?;
    Ok(out)
}
