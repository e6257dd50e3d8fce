//! Patch-metadata documents: a version string mapped to a single-byte patch.
//!
//! ```json
//! { "WeChat": { "Version": { "4.0.2.26": {
//!     "Offset": "0x1A2B3C", "OldValue": "85", "NewValue": "31" } } } }
//! ```
//!
//! Fetching the document is left to the caller. Property names are accepted
//! in PascalCase, camelCase or lowercase.

use crate::hex::HexError;
use crate::patcher::BytePatch;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read patch manifest {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse patch manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("version {0} has no patch entry")]
    UnknownVersion(String),

    #[error("invalid patch entry for version {version}: {source}")]
    InvalidEntry { version: String, source: HexError },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchManifest {
    #[serde(rename = "WeChat", alias = "weChat", alias = "wechat", default)]
    pub application: ApplicationPatches,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationPatches {
    #[serde(rename = "Version", alias = "version", default)]
    pub versions: BTreeMap<String, VersionDetail>,
}

/// One patch entry, all values as hex text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDetail {
    #[serde(rename = "Offset", alias = "offset")]
    pub offset: String,
    #[serde(rename = "OldValue", alias = "oldValue", alias = "oldvalue")]
    pub old_value: String,
    #[serde(rename = "NewValue", alias = "newValue", alias = "newvalue")]
    pub new_value: String,
}

impl VersionDetail {
    pub fn new(
        offset: impl Into<String>,
        old_value: impl Into<String>,
        new_value: impl Into<String>,
    ) -> Self {
        Self {
            offset: offset.into(),
            old_value: old_value.into(),
            new_value: new_value.into(),
        }
    }

    pub fn to_byte_patch(&self) -> Result<BytePatch, HexError> {
        BytePatch::parse(&self.offset, &self.old_value, &self.new_value)
    }
}

impl PatchManifest {
    /// A document holding a single version entry.
    pub fn single(version: impl Into<String>, detail: VersionDetail) -> Self {
        let mut versions = BTreeMap::new();
        versions.insert(version.into(), detail);
        Self {
            application: ApplicationPatches { versions },
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        contents.parse()
    }

    pub fn to_json_pretty(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn lookup(&self, version: &str) -> Option<&VersionDetail> {
        self.application.versions.get(version.trim())
    }

    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.application.versions.keys().map(String::as_str)
    }

    /// The typed byte patch registered for `version`.
    pub fn byte_patch(&self, version: &str) -> Result<BytePatch, ManifestError> {
        let detail = self
            .lookup(version)
            .ok_or_else(|| ManifestError::UnknownVersion(version.to_string()))?;
        detail
            .to_byte_patch()
            .map_err(|source| ManifestError::InvalidEntry {
                version: version.to_string(),
                source,
            })
    }
}

impl FromStr for PatchManifest {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_str(s)?)
    }
}
