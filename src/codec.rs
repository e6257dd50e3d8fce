//! Packed 32-bit encoding of four-part version numbers.
//!
//! Each component occupies one byte, big-endian:
//! `(major << 24) | (minor << 16) | (build << 8) | revision`. The byte stored
//! for each component depends on the [`EncodingRule`]:
//!
//! - offset-based: major and minor are shifted by fixed offsets
//!   (`4.0.2.26` encodes as `0xF254021A`)
//! - scale-based: every component is multiplied by a fixed scale factor
//!
//! Encoding never truncates. A component that lands outside `0..=255` is an
//! overflow error.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const MAJOR_OFFSET: u32 = 238;
const MINOR_OFFSET: u32 = 84;

const MAJOR_SCALE: u32 = 33;
const MINOR_SCALE: u32 = 1;
const BUILD_SCALE: u32 = 1;
const REVISION_SCALE: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionField {
    Major,
    Minor,
    Build,
    Revision,
}

impl fmt::Display for VersionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VersionField::Major => "major",
            VersionField::Minor => "minor",
            VersionField::Build => "build",
            VersionField::Revision => "revision",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid version '{input}': {reason}")]
    InvalidFormat { input: String, reason: String },

    #[error("encoded {field} byte {encoded} decodes to a negative value")]
    Negative { field: VersionField, encoded: u32 },

    #[error("encoded {field} byte {encoded} is not divisible by scale {scale}")]
    NotDivisible {
        field: VersionField,
        encoded: u32,
        scale: u32,
    },

    #[error("{field} component {value} cannot be encoded into one byte")]
    Overflow { field: VersionField, value: u32 },

    #[error("unknown encoding rule '{0}' (expected 'offset' or 'scale')")]
    UnknownRule(String),
}

/// How version components map onto their encoded bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingRule {
    OffsetBased,
    ScaleBased,
}

impl FromStr for EncodingRule {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "offset" | "offset-based" => Ok(EncodingRule::OffsetBased),
            "scale" | "scale-based" => Ok(EncodingRule::ScaleBased),
            other => Err(CodecError::UnknownRule(other.to_string())),
        }
    }
}

impl fmt::Display for EncodingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingRule::OffsetBased => f.write_str("offset"),
            EncodingRule::ScaleBased => f.write_str("scale"),
        }
    }
}

/// A `major.minor.build.revision` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
    pub revision: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Decode a packed version under `rule`.
    pub fn decode(encoded: u32, rule: EncodingRule) -> Result<Self, CodecError> {
        let [major, minor, build, revision] = encoded.to_be_bytes().map(u32::from);

        match rule {
            EncodingRule::OffsetBased => Ok(Self {
                major: unshift(VersionField::Major, major, MAJOR_OFFSET)?,
                minor: unshift(VersionField::Minor, minor, MINOR_OFFSET)?,
                build,
                revision,
            }),
            EncodingRule::ScaleBased => Ok(Self {
                major: unscale(VersionField::Major, major, MAJOR_SCALE)?,
                minor: unscale(VersionField::Minor, minor, MINOR_SCALE)?,
                build: unscale(VersionField::Build, build, BUILD_SCALE)?,
                revision: unscale(VersionField::Revision, revision, REVISION_SCALE)?,
            }),
        }
    }

    /// Pack this version under `rule`.
    pub fn encode(&self, rule: EncodingRule) -> Result<u32, CodecError> {
        let bytes = match rule {
            EncodingRule::OffsetBased => [
                to_byte(VersionField::Major, self.major, self.major.checked_add(MAJOR_OFFSET))?,
                to_byte(VersionField::Minor, self.minor, self.minor.checked_add(MINOR_OFFSET))?,
                to_byte(VersionField::Build, self.build, Some(self.build))?,
                to_byte(VersionField::Revision, self.revision, Some(self.revision))?,
            ],
            EncodingRule::ScaleBased => [
                to_byte(VersionField::Major, self.major, self.major.checked_mul(MAJOR_SCALE))?,
                to_byte(VersionField::Minor, self.minor, self.minor.checked_mul(MINOR_SCALE))?,
                to_byte(VersionField::Build, self.build, self.build.checked_mul(BUILD_SCALE))?,
                to_byte(
                    VersionField::Revision,
                    self.revision,
                    self.revision.checked_mul(REVISION_SCALE),
                )?,
            ],
        };
        Ok(u32::from_be_bytes(bytes))
    }
}

fn unshift(field: VersionField, encoded: u32, offset: u32) -> Result<u32, CodecError> {
    encoded
        .checked_sub(offset)
        .ok_or(CodecError::Negative { field, encoded })
}

fn unscale(field: VersionField, encoded: u32, scale: u32) -> Result<u32, CodecError> {
    if encoded % scale != 0 {
        return Err(CodecError::NotDivisible {
            field,
            encoded,
            scale,
        });
    }
    Ok(encoded / scale)
}

fn to_byte(field: VersionField, value: u32, encoded: Option<u32>) -> Result<u8, CodecError> {
    encoded
        .and_then(|e| u8::try_from(e).ok())
        .ok_or(CodecError::Overflow { field, value })
}

impl FromStr for Version {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| CodecError::InvalidFormat {
            input: s.to_string(),
            reason,
        };

        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 4 {
            return Err(invalid(format!(
                "expected major.minor.build.revision, found {} component(s)",
                parts.len()
            )));
        }

        let mut values = [0u32; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid(format!("'{part}' is not a non-negative integer")));
            }
            *slot = part
                .parse()
                .map_err(|e| invalid(format!("'{part}': {e}")))?;
        }

        let [major, minor, build, revision] = values;
        Ok(Self::new(major, minor, build, revision))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}
