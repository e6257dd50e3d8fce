//! Patch applicator - applies patch files with idempotency checks
//!
//! This module provides high-level patch application that:
//! - Filters patch files by their listed target versions
//! - Resolves each patch's target file, sharing one [`Patcher`] per file
//! - Reports a result per patch, in patch-file order

use crate::config::schema::{PatchAction, PatchConfig, PatchDefinition};
use crate::config::version::{matches_version, VersionError};
use crate::patcher::{ByteOutcome, ByteState, PatchError, Patcher, PatternOutcome, PatternState};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Result of applying a single patch
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchResult should be checked for success/failure"]
pub enum PatchResult {
    /// Patch was applied, touching `writes` locations
    Applied { file: PathBuf, writes: usize },
    /// Patch was already applied (idempotent check passed)
    AlreadyApplied { file: PathBuf },
    /// Patch was skipped due to version constraint
    SkippedVersion { reason: String },
    /// Search pattern found nowhere, patched or not
    NoMatch { file: PathBuf },
    /// Target bytes are in an unexpected state; nothing was written
    Failed { file: PathBuf, reason: String },
}

impl PatchResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, PatchResult::Failed { .. } | PatchResult::NoMatch { .. })
    }
}

impl fmt::Display for PatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchResult::Applied { file, writes } => {
                write!(f, "Applied {} write(s) to {}", writes, file.display())
            }
            PatchResult::AlreadyApplied { file } => {
                write!(f, "Already applied to {}", file.display())
            }
            PatchResult::SkippedVersion { reason } => {
                write!(f, "Skipped (version): {}", reason)
            }
            PatchResult::NoMatch { file } => {
                write!(f, "Pattern not found in {}", file.display())
            }
            PatchResult::Failed { file, reason } => {
                write!(f, "Failed on {}: {}", file.display(), reason)
            }
        }
    }
}

/// Errors during patch application
#[derive(Debug)]
pub enum ApplicationError {
    /// Version filtering error
    Version(VersionError),
    /// The patch definition does not compile to a valid operation
    InvalidPatch { id: String, reason: String },
    /// Reading, backing up or writing the target failed
    Patch(PatchError),
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationError::Version(e) => write!(f, "version error: {}", e),
            ApplicationError::InvalidPatch { id, reason } => {
                write!(f, "invalid patch '{}': {}", id, reason)
            }
            ApplicationError::Patch(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ApplicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApplicationError::Version(e) => Some(e),
            ApplicationError::Patch(e) => Some(e),
            ApplicationError::InvalidPatch { .. } => None,
        }
    }
}

impl From<VersionError> for ApplicationError {
    fn from(e: VersionError) -> Self {
        ApplicationError::Version(e)
    }
}

impl From<PatchError> for ApplicationError {
    fn from(e: PatchError) -> Self {
        ApplicationError::Patch(e)
    }
}

type PatchOutcomes = Vec<(String, Result<PatchResult, ApplicationError>)>;

/// Apply a patch file
///
/// # Arguments
///
/// * `config` - The patch configuration to apply
/// * `root` - Directory that `root_relative` patch paths are resolved against
/// * `target_version` - Version of the installed binaries (e.g., "4.0.2.26")
///
/// # Returns
///
/// A vector of results, one per patch in the configuration, in file order
pub fn apply_patches(
    config: &PatchConfig,
    root: &Path,
    target_version: Option<&str>,
) -> PatchOutcomes {
    if let Some(skipped) = filter_version(config, target_version) {
        return skipped;
    }

    let mut patchers = PatcherCache::default();
    config
        .patches
        .iter()
        .map(|patch| {
            let result = patchers
                .get(resolve_target(config, root, patch))
                .and_then(|patcher| apply_one(patcher, patch));
            (patch.id.clone(), result)
        })
        .collect()
}

/// Check patch status without touching any file.
///
/// This mirrors `apply_patches` result semantics (`Applied` means "would
/// apply"), but never writes and never creates backups.
pub fn check_patches(
    config: &PatchConfig,
    root: &Path,
    target_version: Option<&str>,
) -> PatchOutcomes {
    if let Some(skipped) = filter_version(config, target_version) {
        return skipped;
    }

    let mut patchers = PatcherCache::default();
    config
        .patches
        .iter()
        .map(|patch| {
            let result = patchers
                .get(resolve_target(config, root, patch))
                .and_then(|patcher| check_one(patcher, patch));
            (patch.id.clone(), result)
        })
        .collect()
}

/// Results for every patch when the file does not apply to `target_version`,
/// or `None` when patching should go ahead.
fn filter_version(config: &PatchConfig, target_version: Option<&str>) -> Option<PatchOutcomes> {
    let listed = &config.meta.versions;
    if listed.is_empty() {
        return None;
    }

    let reason = match target_version {
        None => format!(
            "no target version given; patch file targets {}",
            listed.join(", ")
        ),
        Some(version) => match matches_version(version, listed) {
            Ok(true) => return None,
            Ok(false) => format!(
                "target version {version} is not one of {}",
                listed.join(", ")
            ),
            Err(e) => {
                return Some(
                    config
                        .patches
                        .iter()
                        .map(|patch| {
                            (patch.id.clone(), Err(ApplicationError::Version(e.clone())))
                        })
                        .collect(),
                )
            }
        },
    };

    debug!(%reason, "skipping patch file");
    Some(
        config
            .patches
            .iter()
            .map(|patch| {
                (
                    patch.id.clone(),
                    Ok(PatchResult::SkippedVersion {
                        reason: reason.clone(),
                    }),
                )
            })
            .collect(),
    )
}

fn resolve_target(config: &PatchConfig, root: &Path, patch: &PatchDefinition) -> PathBuf {
    if config.meta.root_relative {
        root.join(&patch.file)
    } else {
        PathBuf::from(&patch.file)
    }
}

/// One patcher per distinct target, so each file is backed up once per run.
#[derive(Default)]
struct PatcherCache {
    patchers: HashMap<PathBuf, Patcher>,
}

impl PatcherCache {
    fn get(&mut self, target: PathBuf) -> Result<&Patcher, ApplicationError> {
        match self.patchers.entry(target) {
            Entry::Occupied(entry) => Ok(&*entry.into_mut()),
            Entry::Vacant(entry) => {
                let patcher = Patcher::new(entry.key().clone())?;
                Ok(&*entry.insert(patcher))
            }
        }
    }
}

fn compile(patch: &PatchDefinition) -> Result<PatchAction, ApplicationError> {
    patch
        .operation
        .compile()
        .map_err(|reason| ApplicationError::InvalidPatch {
            id: patch.id.clone(),
            reason,
        })
}

fn apply_one(patcher: &Patcher, patch: &PatchDefinition) -> Result<PatchResult, ApplicationError> {
    let file = patcher.target().to_path_buf();
    let result = match compile(patch)? {
        PatchAction::Byte(byte) => match patcher.replace_byte(&byte)? {
            ByteOutcome::Written => PatchResult::Applied { file, writes: 1 },
            ByteOutcome::AlreadyPatched => PatchResult::AlreadyApplied { file },
            ByteOutcome::Mismatch { found } => PatchResult::Failed {
                file,
                reason: format!(
                    "byte at {:#X} is {:02X}, expected {:02X}",
                    byte.address, found, byte.expected
                ),
            },
        },
        PatchAction::Pattern {
            plan,
            max_replace_count,
        } => match patcher.replace_pattern(&plan, max_replace_count)? {
            PatternOutcome::Replaced { offsets } => PatchResult::Applied {
                file,
                writes: offsets.len(),
            },
            PatternOutcome::AlreadyApplied => PatchResult::AlreadyApplied { file },
            PatternOutcome::NoMatch => PatchResult::NoMatch { file },
        },
    };
    Ok(result)
}

fn check_one(patcher: &Patcher, patch: &PatchDefinition) -> Result<PatchResult, ApplicationError> {
    let file = patcher.target().to_path_buf();
    let result = match compile(patch)? {
        PatchAction::Byte(byte) => match patcher.inspect_byte(&byte)? {
            ByteState::Unpatched => PatchResult::Applied { file, writes: 1 },
            ByteState::Patched => PatchResult::AlreadyApplied { file },
            ByteState::Unexpected(found) => PatchResult::Failed {
                file,
                reason: format!(
                    "byte at {:#X} is {:02X}, expected {:02X}",
                    byte.address, found, byte.expected
                ),
            },
        },
        PatchAction::Pattern {
            plan,
            max_replace_count,
        } => match patcher.inspect_pattern(&plan, max_replace_count)? {
            PatternState::Pending { offsets } => PatchResult::Applied {
                file,
                writes: offsets.len(),
            },
            PatternState::Applied => PatchResult::AlreadyApplied { file },
            PatternState::Absent => PatchResult::NoMatch { file },
        },
    };
    Ok(result)
}
