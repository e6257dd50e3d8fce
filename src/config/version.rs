//! Version filtering for patch files.
//!
//! A patch file lists the exact four-part versions it was built for
//! (`versions = ["4.0.2.26", "4.0.3.11"]`). Versions are compared
//! numerically, so `4.0.02.26` and `4.0.2.26` are the same version.

use crate::codec::{CodecError, Version};
use std::fmt;

/// Errors during version filtering
#[derive(Debug, Clone)]
pub enum VersionError {
    /// The target version is not `major.minor.build.revision`
    InvalidVersion { value: String, source: CodecError },
    /// A listed version is not `major.minor.build.revision`
    InvalidListed { value: String, source: CodecError },
}

impl fmt::Display for VersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionError::InvalidVersion { value, source } => {
                write!(f, "invalid target version '{}': {}", value, source)
            }
            VersionError::InvalidListed { value, source } => {
                write!(f, "invalid listed version '{}': {}", value, source)
            }
        }
    }
}

impl std::error::Error for VersionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VersionError::InvalidVersion { source, .. }
            | VersionError::InvalidListed { source, .. } => Some(source),
        }
    }
}

/// Check whether `target` is one of `versions`.
///
/// # Examples
///
/// ```
/// use binpatch::config::version::matches_version;
///
/// let listed = vec!["4.0.2.26".to_string(), "4.0.3.11".to_string()];
/// assert!(matches_version("4.0.2.26", &listed).unwrap());
/// assert!(!matches_version("4.0.2.27", &listed).unwrap());
///
/// // An empty list means "apply to all versions"
/// assert!(matches_version("1.0.0.0", &[]).unwrap());
/// ```
pub fn matches_version(target: &str, versions: &[String]) -> Result<bool, VersionError> {
    if versions.is_empty() {
        return Ok(true);
    }

    let target_version: Version =
        target
            .trim()
            .parse()
            .map_err(|source| VersionError::InvalidVersion {
                value: target.to_string(),
                source,
            })?;

    for listed in versions {
        let listed_version: Version =
            listed
                .trim()
                .parse()
                .map_err(|source| VersionError::InvalidListed {
                    value: listed.clone(),
                    source,
                })?;
        if listed_version == target_version {
            return Ok(true);
        }
    }
    Ok(false)
}
