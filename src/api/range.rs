use serde::{Deserialize, Serialize};

/// Inclusive byte range, already clamped to the resource size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.end - self.start + 1
        }
    }

    /// Only a hand-built range with `end < start` covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Value for a `content-range` header.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Parses a single `bytes=` range against a resource of `size` bytes.
///
/// Supports `a-b`, `a-` and `-n`. Anything else (multiple ranges, bad
/// syntax, unsatisfiable bounds) yields `None`, which callers treat as a
/// request for the full resource.
pub fn parse_range(header: &str, size: u64) -> Option<ByteRange> {
    if size == 0 {
        return None;
    }

    let ranges = header.trim().strip_prefix("bytes=")?.trim();
    if ranges.contains(',') {
        return None;
    }

    let (first, last) = ranges.split_once('-')?;
    let (first, last) = (first.trim(), last.trim());

    let (start, end) = if first.is_empty() {
        // Suffix form: the last n bytes
        let suffix: u64 = last.parse().ok()?;
        if suffix == 0 {
            return None;
        }
        (size.saturating_sub(suffix), size - 1)
    } else {
        let start: u64 = first.parse().ok()?;
        let end = if last.is_empty() {
            size - 1
        } else {
            last.parse::<u64>().ok()?.min(size - 1)
        };
        (start, end)
    };

    if start >= size || end < start {
        return None;
    }

    Some(ByteRange { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u64, end: u64) -> Option<ByteRange> {
        Some(ByteRange { start, end })
    }

    #[test]
    fn test_explicit_range() {
        assert_eq!(parse_range("bytes=0-99", 1000), range(0, 99));
        assert_eq!(parse_range("bytes=0-99", 1000).map(|r| r.len()), Some(100));
        assert!(!ByteRange { start: 5, end: 5 }.is_empty());
        assert!(ByteRange { start: 5, end: 4 }.is_empty());
        assert_eq!(ByteRange { start: 5, end: 4 }.len(), 0);
        // End clamps to the last byte
        assert_eq!(parse_range("bytes=900-5000", 1000), range(900, 999));
    }

    #[test]
    fn test_open_and_suffix_ranges() {
        assert_eq!(parse_range("bytes=950-", 1000), range(950, 999));
        assert_eq!(parse_range("bytes=-50", 1000), range(950, 999));
        assert_eq!(parse_range("bytes=-5000", 1000), range(0, 999));
    }

    #[test]
    fn test_unsatisfiable_or_invalid() {
        assert_eq!(parse_range("bytes=100-50", 1000), None);
        assert_eq!(parse_range("bytes=1000-1100", 1000), None);
        assert_eq!(parse_range("bytes=0-99,100-199", 1000), None);
        assert_eq!(parse_range("bytes=abc", 1000), None);
        assert_eq!(parse_range("items=0-10", 1000), None);
        assert_eq!(parse_range("bytes=-0", 1000), None);
        assert_eq!(parse_range("bytes=0-10", 0), None);
    }

    #[test]
    fn test_content_range_header() {
        let r = ByteRange { start: 0, end: 99 };
        assert_eq!(r.content_range(1000), "bytes 0-99/1000");
    }
}
