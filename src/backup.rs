//! One-time pristine backups of patch targets.
//!
//! Before the first write to a target, a byte-for-byte copy is placed next to
//! it as `<file name>.bak` (`Weixin.dll` -> `Weixin.dll.bak`). A backup that
//! already exists on disk is never overwritten: it is assumed to be the
//! pristine copy from an earlier run.
//!
//! The satisfied set is checked under a shared lock first, then re-checked
//! under an exclusive gate that performs the copy, so concurrent callers on one
//! manager produce exactly one copy.

use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use xxhash_rust::xxh3::xxh3_64;

pub const BACKUP_EXTENSION: &str = "bak";

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("cannot derive a backup path for {0}")]
    InvalidTarget(PathBuf),

    #[error("failed to read backup source {path}: {source}")]
    Source { path: PathBuf, source: io::Error },

    #[error("failed to write backup {path}: {source}")]
    Destination { path: PathBuf, source: io::Error },

    #[error("backup {path} does not match its source (expected xxh3 {expected:016x}, found {found:016x})")]
    DigestMismatch {
        path: PathBuf,
        expected: u64,
        found: u64,
    },
}

/// What `ensure_backup` did.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "BackupOutcome reports whether a copy was made"]
pub enum BackupOutcome {
    /// A fresh copy was written.
    Created { path: PathBuf, digest: u64 },
    /// A backup was already made by this manager or found on disk.
    AlreadyPresent { path: PathBuf },
}

impl BackupOutcome {
    pub fn path(&self) -> &Path {
        match self {
            BackupOutcome::Created { path, .. } | BackupOutcome::AlreadyPresent { path } => path,
        }
    }
}

/// Sibling backup path for `target`.
pub fn backup_path_for(target: &Path) -> Result<PathBuf, BackupError> {
    let file_name = target
        .file_name()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| BackupError::InvalidTarget(target.to_path_buf()))?;

    let mut backup_name = file_name.to_os_string();
    backup_name.push(".");
    backup_name.push(BACKUP_EXTENSION);
    Ok(target.with_file_name(backup_name))
}

/// Tracks which targets already have a backup for the life of the manager.
#[derive(Debug, Default)]
pub struct BackupManager {
    satisfied: RwLock<HashSet<PathBuf>>,
    gate: Mutex<()>,
}

impl BackupManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this manager has already satisfied the backup for `target`.
    pub fn is_satisfied(&self, target: &Path) -> bool {
        self.satisfied.read().contains(target)
    }

    /// Make sure a pristine backup of `target` exists.
    pub fn ensure_backup(&self, target: &Path) -> Result<BackupOutcome, BackupError> {
        let backup_path = backup_path_for(target)?;

        if self.is_satisfied(target) {
            return Ok(BackupOutcome::AlreadyPresent { path: backup_path });
        }

        let _gate = self.gate.lock();
        if self.is_satisfied(target) {
            return Ok(BackupOutcome::AlreadyPresent { path: backup_path });
        }

        let outcome = if backup_path.exists() {
            debug!(backup = %backup_path.display(), "backup already on disk");
            BackupOutcome::AlreadyPresent { path: backup_path }
        } else {
            create_backup(target, backup_path)?
        };

        self.satisfied.write().insert(target.to_path_buf());
        Ok(outcome)
    }
}

fn create_backup(target: &Path, backup_path: PathBuf) -> Result<BackupOutcome, BackupError> {
    let source_err = |source| BackupError::Source {
        path: target.to_path_buf(),
        source,
    };
    let content = fs::read(target).map_err(source_err)?;
    let digest = xxh3_64(&content);

    let parent = backup_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let dest_err = |source| BackupError::Destination {
        path: backup_path.clone(),
        source,
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(dest_err)?;
    temp.write_all(&content).map_err(dest_err)?;
    temp.as_file().sync_all().map_err(dest_err)?;

    // Another process may have created the backup since the existence check.
    match temp.persist_noclobber(&backup_path) {
        Ok(_) => {}
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
            debug!(backup = %backup_path.display(), "backup created concurrently");
            return Ok(BackupOutcome::AlreadyPresent { path: backup_path });
        }
        Err(err) => return Err(dest_err(err.error)),
    }

    let found = fs::read(&backup_path).map(|written| xxh3_64(&written)).map_err(dest_err)?;
    if found != digest {
        return Err(BackupError::DigestMismatch {
            path: backup_path,
            expected: digest,
            found,
        });
    }

    info!(backup = %backup_path.display(), bytes = content.len(), "created backup");
    Ok(BackupOutcome::Created {
        path: backup_path,
        digest,
    })
}
