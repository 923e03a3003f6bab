//! Parsing library for flamedb profile ingestion.
//!
//! This library turns the payloads profilers submit into a canonical
//! [`ProfileTree`], and parses the [`StorageKey`] that identifies which
//! series the samples belong to.
//!
//! # Example
//!
//! ```
//! use flamedb_parse::{Format, StorageKey};
//!
//! let key = StorageKey::parse("test.app{env=dev}").unwrap();
//! let format = Format::resolve(Some("trie"), None).unwrap();
//! let tree = format
//!     .decode(b"\x00\x00\x01\x06foo;ba\x00\x02\x01r\x02\x00\x01z\x03\x00")
//!     .unwrap();
//!
//! println!("{}: {} samples", key, tree.total());
//! print!("{}", tree.serialize_human());
//! ```

pub mod format;
pub mod key;
pub mod tree;

pub use format::{DecodeError, Format, Position};
pub use key::{ParseError, StorageKey};
pub use tree::{Node, ProfileTree, SEPARATOR};
