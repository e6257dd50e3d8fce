//! Compaction of a partial replacement pattern into contiguous writes.
//!
//! Writing every segment's bytes at `match_offset + segment.offset` reproduces
//! exactly the defined positions of the replacement pattern and touches
//! nothing else. Segments are ordered, non-empty and maximal: two emitted
//! segments are never adjacent.

use crate::pattern::PatternByte;

/// A maximal run of defined bytes inside a replacement pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceSegment {
    /// Position of the first byte relative to the start of the pattern.
    pub offset: usize,
    pub bytes: Vec<u8>,
}

impl ReplaceSegment {
    /// One past the last pattern position this segment writes.
    pub fn end(&self) -> usize {
        self.offset + self.bytes.len()
    }
}

/// Split `pattern` into its contiguous runs of concrete bytes.
pub fn compact(pattern: &[PatternByte]) -> Vec<ReplaceSegment> {
    let mut segments = Vec::new();
    let mut open: Option<ReplaceSegment> = None;

    for (idx, byte) in pattern.iter().enumerate() {
        match (byte, open.as_mut()) {
            (PatternByte::Concrete(value), Some(segment)) => segment.bytes.push(*value),
            (PatternByte::Concrete(value), None) => {
                open = Some(ReplaceSegment {
                    offset: idx,
                    bytes: vec![*value],
                });
            }
            (PatternByte::Wildcard, _) => {
                if let Some(segment) = open.take() {
                    segments.push(segment);
                }
            }
        }
    }

    if let Some(segment) = open {
        segments.push(segment);
    }
    segments
}
