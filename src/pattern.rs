//! Wildcard-capable byte patterns.
//!
//! A [`SearchPattern`] describes the bytes to look for, where
//! [`PatternByte::Wildcard`] matches any byte. A [`ReplacePattern`] of the same
//! length describes what to write, where a wildcard means "leave the byte as it
//! is". Both render and parse the usual signature syntax: `48 8D 0D ?? ??`.

use crate::segment::{compact, ReplaceSegment};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Byte value treated as a wildcard in raw-byte patterns when wildcards are allowed.
pub const WILDCARD_BYTE: u8 = 0xFF;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern is empty")]
    Empty,

    #[error("invalid pattern token '{token}'")]
    InvalidToken { token: String },

    #[error("pattern length mismatch (search: {search}, replace: {replace})")]
    LengthMismatch { search: usize, replace: usize },

    #[error("replacement leaves every byte unchanged")]
    NothingToWrite,

    #[error("pattern contains wildcards but wildcards are disabled")]
    WildcardsDisabled,

    #[error("target index {index} is outside the pattern (0-{max})", max = .len.saturating_sub(1))]
    TargetIndexOutOfRange { index: usize, len: usize },

    #[error("target index {index} points at a wildcard")]
    WildcardTarget { index: usize },
}

/// One position of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternByte {
    Concrete(u8),
    Wildcard,
}

impl PatternByte {
    /// Whether a buffer byte satisfies this position.
    #[inline]
    pub fn matches(self, byte: u8) -> bool {
        match self {
            PatternByte::Concrete(value) => value == byte,
            PatternByte::Wildcard => true,
        }
    }

    pub fn value(self) -> Option<u8> {
        match self {
            PatternByte::Concrete(value) => Some(value),
            PatternByte::Wildcard => None,
        }
    }

    pub fn is_wildcard(self) -> bool {
        matches!(self, PatternByte::Wildcard)
    }
}

impl From<Option<u8>> for PatternByte {
    fn from(value: Option<u8>) -> Self {
        match value {
            Some(byte) => PatternByte::Concrete(byte),
            None => PatternByte::Wildcard,
        }
    }
}

impl fmt::Display for PatternByte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternByte::Concrete(value) => write!(f, "{value:02X}"),
            PatternByte::Wildcard => f.write_str("??"),
        }
    }
}

fn parse_tokens(input: &str) -> Result<Vec<PatternByte>, PatternError> {
    let mut bytes = Vec::new();
    for token in input.split_whitespace() {
        if token == "??" || token == "?" {
            bytes.push(PatternByte::Wildcard);
            continue;
        }

        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        if digits.is_empty() || digits.len() > 2 || !digits.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(PatternError::InvalidToken {
                token: token.to_string(),
            });
        }
        let value = u8::from_str_radix(digits, 16).map_err(|_| PatternError::InvalidToken {
            token: token.to_string(),
        })?;
        bytes.push(PatternByte::Concrete(value));
    }

    if bytes.is_empty() {
        return Err(PatternError::Empty);
    }
    Ok(bytes)
}

fn write_tokens(f: &mut fmt::Formatter<'_>, bytes: &[PatternByte]) -> fmt::Result {
    for (idx, byte) in bytes.iter().enumerate() {
        if idx > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{byte}")?;
    }
    Ok(())
}

/// Bytes to search for. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchPattern {
    bytes: Vec<PatternByte>,
}

impl SearchPattern {
    pub fn new(bytes: Vec<PatternByte>) -> Result<Self, PatternError> {
        if bytes.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(Self { bytes })
    }

    pub fn from_options(bytes: &[Option<u8>]) -> Result<Self, PatternError> {
        Self::new(bytes.iter().copied().map(PatternByte::from).collect())
    }

    /// Build from raw bytes. With `allow_wildcard`, every [`WILDCARD_BYTE`]
    /// becomes a wildcard; otherwise all bytes are matched literally.
    pub fn from_raw(bytes: &[u8], allow_wildcard: bool) -> Result<Self, PatternError> {
        Self::new(
            bytes
                .iter()
                .map(|&b| {
                    if allow_wildcard && b == WILDCARD_BYTE {
                        PatternByte::Wildcard
                    } else {
                        PatternByte::Concrete(b)
                    }
                })
                .collect(),
        )
    }

    /// Parse signature syntax. `??` tokens are rejected unless `allow_wildcard` is set.
    pub fn parse(input: &str, allow_wildcard: bool) -> Result<Self, PatternError> {
        let bytes = parse_tokens(input)?;
        if !allow_wildcard && bytes.iter().any(|b| b.is_wildcard()) {
            return Err(PatternError::WildcardsDisabled);
        }
        Self::new(bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[PatternByte] {
        &self.bytes
    }

    pub fn has_wildcards(&self) -> bool {
        self.bytes.iter().any(|b| b.is_wildcard())
    }

    /// Compare the pattern against `buffer` starting at `start`, left to right,
    /// stopping at the first mismatch.
    #[inline]
    pub fn matches_at(&self, buffer: &[u8], start: usize) -> bool {
        let Some(window) = buffer.get(start..start.saturating_add(self.bytes.len())) else {
            return false;
        };
        self.bytes
            .iter()
            .zip(window)
            .all(|(pattern, &byte)| pattern.matches(byte))
    }

    /// A target index must name a concrete position inside the pattern.
    pub fn validate_target_index(&self, index: usize) -> Result<(), PatternError> {
        match self.bytes.get(index) {
            None => Err(PatternError::TargetIndexOutOfRange {
                index,
                len: self.bytes.len(),
            }),
            Some(PatternByte::Wildcard) => Err(PatternError::WildcardTarget { index }),
            Some(PatternByte::Concrete(_)) => Ok(()),
        }
    }
}

impl FromStr for SearchPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, true)
    }
}

impl fmt::Display for SearchPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_tokens(f, &self.bytes)
    }
}

/// Bytes to write over a match. Wildcard positions are left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplacePattern {
    bytes: Vec<PatternByte>,
}

impl ReplacePattern {
    pub fn new(bytes: Vec<PatternByte>) -> Result<Self, PatternError> {
        if bytes.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(Self { bytes })
    }

    pub fn from_options(bytes: &[Option<u8>]) -> Result<Self, PatternError> {
        Self::new(bytes.iter().copied().map(PatternByte::from).collect())
    }

    /// Every byte is written.
    pub fn from_raw(bytes: &[u8]) -> Result<Self, PatternError> {
        Self::new(bytes.iter().map(|&b| PatternByte::Concrete(b)).collect())
    }

    pub fn parse(input: &str) -> Result<Self, PatternError> {
        Self::new(parse_tokens(input)?)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[PatternByte] {
        &self.bytes
    }

    /// One past the last position that is written, or 0 when nothing is.
    pub fn max_extent(&self) -> usize {
        self.bytes
            .iter()
            .rposition(|b| !b.is_wildcard())
            .map_or(0, |idx| idx + 1)
    }

    /// Contiguous write segments for this pattern.
    pub fn segments(&self) -> Vec<ReplaceSegment> {
        compact(&self.bytes)
    }

    pub fn ensure_paired(&self, search: &SearchPattern) -> Result<(), PatternError> {
        if self.bytes.len() != search.len() {
            return Err(PatternError::LengthMismatch {
                search: search.len(),
                replace: self.bytes.len(),
            });
        }
        Ok(())
    }

    /// The pattern a patched region looks like: `search` with every defined
    /// replacement byte written over it.
    pub fn overlay(&self, search: &SearchPattern) -> Result<SearchPattern, PatternError> {
        self.ensure_paired(search)?;
        SearchPattern::new(
            search
                .bytes()
                .iter()
                .zip(&self.bytes)
                .map(|(&original, &replacement)| match replacement {
                    PatternByte::Concrete(_) => replacement,
                    PatternByte::Wildcard => original,
                })
                .collect(),
        )
    }
}

impl FromStr for ReplacePattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ReplacePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_tokens(f, &self.bytes)
    }
}
