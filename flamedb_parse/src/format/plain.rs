//! Line-oriented text formats: `stack count` and one-sample-per-line.

use super::{Format, Position, Result, check_frame};
use crate::tree::{ProfileTree, SEPARATOR};
use std::fmt::Write as _;

/// Decode `frame;frame count` lines.
pub(super) fn decode_counted(payload: &[u8]) -> Result<ProfileTree> {
    let format = Format::PlainCounted;
    let mut tree = ProfileTree::new();

    for_each_line(format, payload, |line_num, line| {
        let malformed = |reason: String| format.malformed(Position::Line(line_num), reason);

        let (stack, count) = line
            .rsplit_once(' ')
            .ok_or_else(|| malformed("missing count".to_string()))?;
        let count =
            parse_count(count).ok_or_else(|| malformed(format!("invalid count '{}'", count)))?;
        let frames = split_frames(stack.trim_end()).map_err(|r| malformed(r.to_string()))?;

        tree.insert(frames, count);
        Ok(())
    })?;

    Ok(tree)
}

/// Decode one stack per line, each line counting as a single sample.
pub(super) fn decode_occurrences(payload: &[u8]) -> Result<ProfileTree> {
    let format = Format::PlainOccurrences;
    let mut tree = ProfileTree::new();

    for_each_line(format, payload, |line_num, line| {
        let frames =
            split_frames(line).map_err(|r| format.malformed(Position::Line(line_num), r))?;
        tree.insert(frames, 1);
        Ok(())
    })?;

    Ok(tree)
}

pub(super) fn encode_counted(tree: &ProfileTree) -> Vec<u8> {
    let mut out = String::new();
    for (stack, count) in tree.stacks() {
        let _ = writeln!(out, "{} {}", stack, count);
    }
    out.into_bytes()
}

/// Note: output size grows with the sample count, not the stack count.
pub(super) fn encode_occurrences(tree: &ProfileTree) -> Vec<u8> {
    let mut out = Vec::new();
    for (stack, count) in tree.stacks() {
        for _ in 0..count {
            out.extend_from_slice(stack.as_bytes());
            out.push(b'\n');
        }
    }
    out
}

/// Run `f` on every non-blank line with trailing whitespace removed
/// (1-based numbering, `\r\n` tolerated).
fn for_each_line<F>(format: Format, payload: &[u8], mut f: F) -> Result<()>
where
    F: FnMut(usize, &str) -> Result<()>,
{
    for (idx, raw) in payload.split(|&b| b == b'\n').enumerate() {
        let line_num = idx + 1;
        let line = std::str::from_utf8(raw)
            .map_err(|_| format.malformed(Position::Line(line_num), "invalid UTF-8"))?
            .trim_end();
        if line.is_empty() {
            continue;
        }
        f(line_num, line)?;
    }
    Ok(())
}

/// Counts are plain decimal digits: no sign, no whitespace.
fn parse_count(count: &str) -> Option<u64> {
    if count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    count.parse().ok()
}

fn split_frames(stack: &str) -> std::result::Result<Vec<&str>, &'static str> {
    let frames: Vec<&str> = stack.split(SEPARATOR).collect();
    for frame in &frames {
        check_frame(frame)?;
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DecodeError;

    fn line_of(err: DecodeError) -> Option<usize> {
        match err {
            DecodeError::Malformed {
                position: Position::Line(line),
                ..
            } => Some(line),
            _ => None,
        }
    }

    #[test]
    fn counted_skips_blank_lines_and_crlf() {
        let tree = decode_counted(b"\r\nfoo;bar 2\r\n\nfoo;baz 3").unwrap();

        assert_eq!(tree.serialize_human(), "\"foo;bar\" 2\n\"foo;baz\" 3\n");
    }

    #[test]
    fn counted_accumulates_repeated_stacks() {
        let tree = decode_counted(b"a;b 1\na;b 2\na 4\n").unwrap();

        assert_eq!(tree.serialize_human(), "\"a\" 4\n\"a;b\" 3\n");
    }

    #[test]
    fn counted_frames_may_contain_spaces() {
        let tree = decode_counted(b"main;std::vec::Vec<T> as Drop 5\n").unwrap();

        assert_eq!(tree.serialize_human(), "\"main;std::vec::Vec<T> as Drop\" 5\n");
    }

    #[test]
    fn counted_zero_count_is_accepted() {
        let tree = decode_counted(b"foo;bar 0\n").unwrap();

        assert!(tree.is_empty());
    }

    #[test]
    fn counted_negative_count_fails() {
        let err = decode_counted(b"foo;bar -1\n").unwrap_err();

        assert_eq!(line_of(err), Some(1));
    }

    #[test]
    fn counted_non_integer_count_fails() {
        let err = decode_counted(b"foo;baz 3\nfoo;bar abc\n").unwrap_err();

        assert_eq!(line_of(err), Some(2));
    }

    #[test]
    fn counted_signed_count_fails() {
        for payload in [&b"foo;bar +2\n"[..], b"foo;bar -0\n"] {
            let err = decode_counted(payload).unwrap_err();

            assert_eq!(line_of(err), Some(1));
        }
    }

    #[test]
    fn counted_count_overflowing_u64_fails() {
        let err = decode_counted(b"a 18446744073709551616\n").unwrap_err();

        assert!(matches!(
            err,
            DecodeError::Malformed { ref reason, .. } if reason.starts_with("invalid count")
        ));
    }

    #[test]
    fn trailing_whitespace_is_ignored_by_both_text_formats() {
        let counted = decode_counted(b"foo;bar  1 \t\n").unwrap();
        let occurrences = decode_occurrences(b"foo;bar \t\r\n").unwrap();

        assert_eq!(counted, occurrences);
        assert_eq!(counted.serialize_human(), "\"foo;bar\" 1\n");
    }

    #[test]
    fn whitespace_only_lines_are_blank() {
        let tree = decode_occurrences(b"a\n   \n\t\na\n").unwrap();

        assert_eq!(tree.serialize_human(), "\"a\" 2\n");
    }

    #[test]
    fn counted_missing_count_fails() {
        let err = decode_counted(b"foo;bar\n").unwrap_err();

        assert!(matches!(
            err,
            DecodeError::Malformed { ref reason, .. } if reason == "missing count"
        ));
    }

    #[test]
    fn counted_empty_frame_fails() {
        let err = decode_counted(b"foo;;bar 1\n").unwrap_err();

        assert!(matches!(
            err,
            DecodeError::Malformed { ref reason, .. } if reason == "empty frame"
        ));
    }

    #[test]
    fn occurrences_count_each_line_once() {
        let tree = decode_occurrences(b"foo;bar\nfoo;baz\nfoo;bar\n").unwrap();

        assert_eq!(tree.serialize_human(), "\"foo;bar\" 2\n\"foo;baz\" 1\n");
    }

    #[test]
    fn occurrences_match_pre_aggregated_counts() {
        let occurrences = decode_occurrences(b"x;y\nx;y\nx;y\nx\n").unwrap();
        let counted = decode_counted(b"x;y 3\nx 1\n").unwrap();

        assert_eq!(occurrences, counted);
    }

    #[test]
    fn occurrences_trailing_separator_fails() {
        let err = decode_occurrences(b"ok\nfoo;\n").unwrap_err();

        assert_eq!(line_of(err), Some(2));
    }

    #[test]
    fn invalid_utf8_fails_with_line() {
        let err = decode_occurrences(b"ok\n\xff\xfe\n").unwrap_err();

        assert_eq!(line_of(err), Some(2));
    }
}
