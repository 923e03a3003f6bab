//! Wire formats accepted at ingestion.
//!
//! # Supported Formats
//!
//! - [`Format::PlainCounted`] - `frame;frame;frame count` per line (the default)
//! - [`Format::PlainOccurrences`] - a bare `frame;frame;frame` per sample
//! - [`Format::BinaryTree`] - pre-order node records, one full frame per edge
//! - [`Format::BinaryTrie`] - pre-order node records with prefix-compressed edges
//!
//! Every format decodes into a [`ProfileTree`], and the same samples decode to
//! an identical tree whichever format carried them.
//!
//! # Example
//!
//! ```
//! use flamedb_parse::Format;
//!
//! let tree = Format::PlainCounted.decode(b"foo;bar 2\nfoo;baz 3\n").unwrap();
//! let trie = Format::BinaryTrie.encode(&tree);
//!
//! assert_eq!(Format::BinaryTrie.decode(&trie).unwrap(), tree);
//! ```

mod binary;
mod plain;

use crate::tree::ProfileTree;
use std::fmt;
use thiserror::Error;

/// Where in the payload a decode error was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// 1-based line number (text formats).
    Line(usize),
    /// 0-based byte offset (binary formats).
    Offset(usize),
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Line(line) => write!(f, "line {}", line),
            Position::Offset(offset) => write!(f, "byte offset {}", offset),
        }
    }
}

/// Errors that can occur while decoding a payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{format}: malformed input at {position}: {reason}")]
    Malformed {
        format: Format,
        position: Position,
        reason: String,
    },

    #[error("unsupported format '{0}'")]
    UnsupportedFormat(String),
}

/// Result type for decoding operations.
pub type Result<T> = std::result::Result<T, DecodeError>;

/// The closed set of ingestion formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    /// `stack count` per line.
    #[default]
    PlainCounted,
    /// One line per sample.
    PlainOccurrences,
    /// Uncompressed binary tree.
    BinaryTree,
    /// Prefix-compressed binary trie.
    BinaryTrie,
}

impl Format {
    /// Every format, in declaration order.
    pub const ALL: [Format; 4] = [
        Format::PlainCounted,
        Format::PlainOccurrences,
        Format::BinaryTree,
        Format::BinaryTrie,
    ];

    /// Canonical name of the format.
    pub fn name(self) -> &'static str {
        match self {
            Format::PlainCounted => "plain-counted",
            Format::PlainOccurrences => "plain-occurrences",
            Format::BinaryTree => "binary-tree",
            Format::BinaryTrie => "binary-trie",
        }
    }

    /// Resolve a format from its canonical name or an ingestion API alias
    /// (`folded`, `lines`, `tree`, `trie`). The empty string selects the
    /// default format.
    pub fn from_name(name: &str) -> Result<Format> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "plain-counted" | "folded" => Ok(Format::PlainCounted),
            "plain-occurrences" | "lines" => Ok(Format::PlainOccurrences),
            "binary-tree" | "tree" => Ok(Format::BinaryTree),
            "binary-trie" | "trie" => Ok(Format::BinaryTrie),
            _ => Err(DecodeError::UnsupportedFormat(name.to_string())),
        }
    }

    /// Resolve a format from a `Content-Type` value: a `+trie` or `+tree`
    /// suffix selects the binary formats, anything else the default.
    pub fn from_content_type(content_type: &str) -> Format {
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if media_type.ends_with("+trie") {
            Format::BinaryTrie
        } else if media_type.ends_with("+tree") {
            Format::BinaryTree
        } else {
            Format::PlainCounted
        }
    }

    /// Resolve the format of a request. An explicit, non-empty format name
    /// wins over the content type.
    pub fn resolve(name: Option<&str>, content_type: Option<&str>) -> Result<Format> {
        match (name.map(str::trim), content_type) {
            (Some(name), _) if !name.is_empty() => Format::from_name(name),
            (_, Some(content_type)) => Ok(Format::from_content_type(content_type)),
            _ => Ok(Format::default()),
        }
    }

    /// Decode a payload into a fresh tree.
    pub fn decode(self, payload: &[u8]) -> Result<ProfileTree> {
        match self {
            Format::PlainCounted => plain::decode_counted(payload),
            Format::PlainOccurrences => plain::decode_occurrences(payload),
            Format::BinaryTree => binary::decode_tree(payload),
            Format::BinaryTrie => binary::decode_trie(payload),
        }
    }

    /// Encode a tree so that [`decode`](Self::decode) yields it back.
    pub fn encode(self, tree: &ProfileTree) -> Vec<u8> {
        match self {
            Format::PlainCounted => plain::encode_counted(tree),
            Format::PlainOccurrences => plain::encode_occurrences(tree),
            Format::BinaryTree => binary::encode_tree(tree),
            Format::BinaryTrie => binary::encode_trie(tree),
        }
    }

    pub(crate) fn malformed(self, position: Position, reason: impl Into<String>) -> DecodeError {
        DecodeError::Malformed {
            format: self,
            position,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Format {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self> {
        Format::from_name(s)
    }
}

/// Frame rule shared by every decoder: non-empty and free of the separator.
pub(crate) fn check_frame(frame: &str) -> std::result::Result<(), &'static str> {
    if frame.is_empty() {
        Err("empty frame")
    } else if frame.contains(crate::tree::SEPARATOR) {
        Err("frame contains ';'")
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPECTED: &str = "\"foo;bar\" 2\n\"foo;baz\" 3\n";

    const COUNTED: &[u8] = b"foo;bar 2\nfoo;baz 3\n";
    const OCCURRENCES: &[u8] = b"foo;bar\nfoo;bar\nfoo;baz\nfoo;baz\nfoo;baz\n";
    const TRIE: &[u8] = b"\x00\x00\x01\x06foo;ba\x00\x02\x01r\x02\x00\x01z\x03\x00";
    const TREE: &[u8] = b"\x00\x00\x01\x03foo\x00\x02\x03bar\x02\x00\x03baz\x03\x00";

    #[test]
    fn all_formats_decode_to_same_tree() {
        let payloads = [
            (Format::PlainCounted, COUNTED),
            (Format::PlainOccurrences, OCCURRENCES),
            (Format::BinaryTrie, TRIE),
            (Format::BinaryTree, TREE),
        ];

        for (format, payload) in payloads {
            let tree = format.decode(payload).unwrap();
            assert_eq!(tree.serialize_human(), EXPECTED, "format {}", format);
        }
    }

    #[test]
    fn encoders_reproduce_golden_vectors() {
        let tree = Format::PlainCounted.decode(COUNTED).unwrap();

        assert_eq!(Format::BinaryTrie.encode(&tree), TRIE);
        assert_eq!(Format::BinaryTree.encode(&tree), TREE);
        assert_eq!(Format::PlainCounted.encode(&tree), COUNTED);
        assert_eq!(Format::PlainOccurrences.encode(&tree), OCCURRENCES);
    }

    #[test]
    fn every_format_round_trips() {
        let tree = crate::ProfileTree::from_iter([
            ("main", 1),
            ("main;run;parse", 7),
            ("main;run;parse;alloc", 2),
            ("main;run;io", 3),
            ("init;ä;ö", 4),
        ]);

        for format in Format::ALL {
            let encoded = format.encode(&tree);
            assert_eq!(format.decode(&encoded).unwrap(), tree, "format {}", format);
        }
    }

    #[test]
    fn from_name_accepts_aliases() {
        assert_eq!(Format::from_name("").unwrap(), Format::PlainCounted);
        assert_eq!(Format::from_name("folded").unwrap(), Format::PlainCounted);
        assert_eq!(Format::from_name("lines").unwrap(), Format::PlainOccurrences);
        assert_eq!(Format::from_name("tree").unwrap(), Format::BinaryTree);
        assert_eq!(Format::from_name("TRIE").unwrap(), Format::BinaryTrie);

        for format in Format::ALL {
            assert_eq!(Format::from_name(format.name()).unwrap(), format);
        }
    }

    #[test]
    fn unknown_name_is_unsupported() {
        let result: Result<Format> = "pprof".parse();

        assert_eq!(result, Err(DecodeError::UnsupportedFormat("pprof".to_string())));
    }

    #[test]
    fn content_type_suffix_selects_binary_formats() {
        assert_eq!(
            Format::from_content_type("binary/octet-stream+trie"),
            Format::BinaryTrie
        );
        assert_eq!(
            Format::from_content_type("binary/octet-stream+tree; charset=binary"),
            Format::BinaryTree
        );
        assert_eq!(Format::from_content_type("text/plain"), Format::PlainCounted);
    }

    #[test]
    fn explicit_name_wins_over_content_type() {
        assert_eq!(
            Format::resolve(Some("lines"), Some("binary/octet-stream+trie")).unwrap(),
            Format::PlainOccurrences
        );
        assert_eq!(
            Format::resolve(Some(""), Some("binary/octet-stream+tree")).unwrap(),
            Format::BinaryTree
        );
        assert_eq!(Format::resolve(None, None).unwrap(), Format::PlainCounted);
    }

    #[test]
    fn error_message_names_format_and_position() {
        let err = Format::PlainCounted.decode(b"foo 1\nfoo;bar abc\n").unwrap_err();

        assert_eq!(
            err.to_string(),
            "plain-counted: malformed input at line 2: invalid count 'abc'"
        );
    }
}
