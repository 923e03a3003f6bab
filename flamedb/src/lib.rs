//! Time-partitioned storage for aggregated stack profiles.
//!
//! Profilers submit payloads in one of several wire formats; each payload is
//! decoded into a [`ProfileTree`](flamedb_parse::ProfileTree) and merged into
//! the segment covering its timestamp. Range queries merge every overlapping
//! segment back into a single tree.
//!
//! # Modules
//!
//! - [`store`] - The segment store and retention hook
//! - [`ingest`] - Decode-then-merge ingestion and range queries
//! - [`render`] - Flamegraph JSON output
//! - [`snapshot`] - On-disk snapshots written on close
//!
//! # Example
//!
//! ```
//! use flamedb::ingest::{ingest, query, IngestRequest};
//! use flamedb::{SegmentStore, StoreConfig};
//! use flamedb_parse::{Format, StorageKey};
//!
//! let store = SegmentStore::open(StoreConfig::default()).unwrap();
//! let key = StorageKey::parse("test.app{}").unwrap();
//!
//! let payload = "foo;bar 2\nfoo;baz 3\n";
//! let request = IngestRequest::new(key.clone(), 1_577_836_800, Format::PlainCounted, payload);
//! ingest(&store, request).unwrap();
//!
//! let result = query(&store, &key, 1_577_836_800, 1_577_836_810).unwrap();
//! assert_eq!(result.tree.serialize_human(), "\"foo;bar\" 2\n\"foo;baz\" 3\n");
//! ```

pub mod config;
pub mod ingest;
pub mod logging;
pub mod render;
pub mod snapshot;
pub mod store;

pub use config::{DEFAULT_BUCKET_WIDTH, StoreConfig};
pub use ingest::{Encoding, IngestError, IngestRequest, IngestSummary};
pub use render::Flamebearer;
pub use store::{MaxAge, QueryResult, RetentionPolicy, SegmentStore, StoreError, Timestamp};

// Re-export flamedb_parse for convenience
pub use flamedb_parse;
