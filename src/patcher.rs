//! Patch application against a single target file.
//!
//! A [`Patcher`] owns the target path and a handle to a [`BackupManager`].
//! It supports three write paths:
//!
//! - [`Patcher::replace_byte`]: conditional single-byte write at an address
//! - [`Patcher::replace_at`]: segmented replacement at caller-supplied offsets
//! - [`Patcher::replace_pattern`]: skip-table search followed by segmented
//!   replacement of up to `max_replace_count` matches, through a memory map
//!
//! Every write path guarantees a backup before the first byte is written.
//! Outcomes that leave the file untouched (already patched, unexpected byte,
//! nothing matched) are reported as values rather than errors. The caller must
//! not have another writer open against the same target while a patch runs.

use crate::backup::{backup_path_for, BackupError, BackupManager, BackupOutcome};
use crate::hex::{parse_address, parse_byte, HexError};
use crate::matcher::{find_parallel, find_skip_table, find_with_target_index, ScanOptions};
use crate::pattern::{PatternError, ReplacePattern, SearchPattern};
use crate::segment::ReplaceSegment;
use memmap2::MmapMut;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("invalid patch input: {0}")]
    Hex(#[from] HexError),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] PatternError),

    #[error("backup failed: {0}")]
    Backup(#[from] BackupError),

    #[error("address {address:#X} is outside {path} (length {len:#X})")]
    AddressOutOfRange {
        path: PathBuf,
        address: u64,
        len: u64,
    },

    #[error("offset {offset:#X} + {extent} bytes exceeds {path} (length {len:#X})")]
    OffsetOutOfRange {
        path: PathBuf,
        offset: usize,
        extent: usize,
        len: u64,
    },

    #[error("max_replace_count must be at least 1")]
    ZeroReplaceCount,

    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

impl PatchError {
    /// Whether the target file does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            PatchError::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            PatchError::Backup(BackupError::Source { source, .. }) => {
                source.kind() == io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

/// Conditional single-byte write: `expected` is replaced by `new` at `address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BytePatch {
    pub address: u64,
    pub expected: u8,
    pub new: u8,
}

impl BytePatch {
    pub fn new(address: u64, expected: u8, new: u8) -> Self {
        Self {
            address,
            expected,
            new,
        }
    }

    /// Parse hex text, each with an optional `0x` prefix.
    pub fn parse(address: &str, expected: &str, new: &str) -> Result<Self, HexError> {
        Ok(Self {
            address: parse_address(address)?,
            expected: parse_byte(expected)?,
            new: parse_byte(new)?,
        })
    }
}

/// Result of a single-byte patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "ByteOutcome distinguishes writes, no-ops and mismatches"]
pub enum ByteOutcome {
    /// The expected byte was found and overwritten.
    Written,
    /// The byte already holds the new value; nothing was written.
    AlreadyPatched,
    /// The byte is neither the expected nor the new value; nothing was written.
    Mismatch { found: u8 },
}

impl ByteOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, ByteOutcome::Mismatch { .. })
    }
}

/// Current state of a byte patch target, read without modifying anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteState {
    Patched,
    Unpatched,
    Unexpected(u8),
}

/// Result of a pattern or offset-set replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatternOutcome reports whether anything was written"]
pub enum PatternOutcome {
    /// Segments were written at these match offsets, ascending.
    Replaced { offsets: Vec<usize> },
    /// Every match already holds the patched bytes, or only the patched form
    /// is present.
    AlreadyApplied,
    /// Nothing to replace.
    NoMatch,
}

/// Current state of a pattern patch, read without modifying anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternState {
    /// These offsets would be rewritten, ascending.
    Pending { offsets: Vec<usize> },
    /// Nothing left to write and the patched form is present.
    Applied,
    /// Neither form is present.
    Absent,
}

/// A search/replace pair with its write segments computed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacePlan {
    search: SearchPattern,
    replace: ReplacePattern,
    segments: Vec<ReplaceSegment>,
    max_extent: usize,
}

impl ReplacePlan {
    pub fn new(search: SearchPattern, replace: ReplacePattern) -> Result<Self, PatternError> {
        replace.ensure_paired(&search)?;
        let segments = replace.segments();
        if segments.is_empty() {
            return Err(PatternError::NothingToWrite);
        }
        let max_extent = replace.max_extent();
        Ok(Self {
            search,
            replace,
            segments,
            max_extent,
        })
    }

    pub fn search(&self) -> &SearchPattern {
        &self.search
    }

    pub fn replace(&self) -> &ReplacePattern {
        &self.replace
    }

    pub fn segments(&self) -> &[ReplaceSegment] {
        &self.segments
    }

    /// Bytes past a match offset that must exist in the file.
    ///
    /// Deliberately the larger of the replacement's last written position and
    /// the full search length, applied uniformly to every offset in a batch.
    pub fn required_len(&self) -> usize {
        self.max_extent.max(self.search.len())
    }

    /// Pattern matching a region this plan has already been applied to.
    pub fn patched_pattern(&self) -> Result<SearchPattern, PatternError> {
        self.replace.overlay(&self.search)
    }

    fn check_bounds(&self, path: &Path, offset: usize, len: u64) -> Result<(), PatchError> {
        let extent = self.required_len();
        let fits = offset
            .checked_add(extent)
            .is_some_and(|end| end as u64 <= len);
        if fits {
            Ok(())
        } else {
            Err(PatchError::OffsetOutOfRange {
                path: path.to_path_buf(),
                offset,
                extent,
                len,
            })
        }
    }
}

/// Applies patches to one target file.
#[derive(Debug, Clone)]
pub struct Patcher {
    target: PathBuf,
    backup_path: PathBuf,
    backups: Arc<BackupManager>,
    scan: ScanOptions,
}

impl Patcher {
    /// Create a patcher with its own backup manager.
    pub fn new(target: impl Into<PathBuf>) -> Result<Self, PatchError> {
        Self::with_backup_manager(target, Arc::new(BackupManager::new()))
    }

    /// Create a patcher sharing `backups` with other patchers.
    pub fn with_backup_manager(
        target: impl Into<PathBuf>,
        backups: Arc<BackupManager>,
    ) -> Result<Self, PatchError> {
        let target = target.into();
        let backup_path = backup_path_for(&target)?;
        Ok(Self {
            target,
            backup_path,
            backups,
            scan: ScanOptions::default(),
        })
    }

    pub fn with_scan_options(mut self, scan: ScanOptions) -> Self {
        self.scan = scan;
        self
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    pub fn ensure_backup(&self) -> Result<BackupOutcome, PatchError> {
        Ok(self.backups.ensure_backup(&self.target)?)
    }

    fn io_err(&self) -> impl Fn(io::Error) -> PatchError + '_ {
        move |source| PatchError::Io {
            path: self.target.clone(),
            source,
        }
    }

    fn open_rw(&self) -> Result<(File, u64), PatchError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.target)
            .map_err(self.io_err())?;
        let len = file.metadata().map_err(self.io_err())?.len();
        Ok((file, len))
    }

    fn read_byte_at(&self, file: &mut File, address: u64, len: u64) -> Result<u8, PatchError> {
        if address >= len {
            return Err(PatchError::AddressOutOfRange {
                path: self.target.clone(),
                address,
                len,
            });
        }
        let mut current = [0u8; 1];
        file.seek(SeekFrom::Start(address)).map_err(self.io_err())?;
        file.read_exact(&mut current).map_err(self.io_err())?;
        Ok(current[0])
    }

    /// Conditionally overwrite one byte.
    ///
    /// The backup is ensured before the target is even opened, so it exists
    /// even when the write turns out to be unnecessary.
    pub fn replace_byte(&self, patch: &BytePatch) -> Result<ByteOutcome, PatchError> {
        self.ensure_backup()?;

        let (mut file, len) = self.open_rw()?;
        let current = self.read_byte_at(&mut file, patch.address, len)?;

        if current == patch.new {
            info!(
                file = %self.target.display(),
                "byte at {:#X} already holds {:02X}, nothing to do",
                patch.address,
                patch.new
            );
            return Ok(ByteOutcome::AlreadyPatched);
        }

        if current != patch.expected {
            warn!(
                file = %self.target.display(),
                "byte at {:#X} is {:02X}, expected {:02X}",
                patch.address,
                current,
                patch.expected
            );
            return Ok(ByteOutcome::Mismatch { found: current });
        }

        file.seek(SeekFrom::Start(patch.address))
            .map_err(self.io_err())?;
        file.write_all(&[patch.new]).map_err(self.io_err())?;
        file.sync_data().map_err(self.io_err())?;

        info!(
            file = %self.target.display(),
            "patched byte at {:#X}: {:02X} -> {:02X}",
            patch.address,
            patch.expected,
            patch.new
        );
        Ok(ByteOutcome::Written)
    }

    /// Report whether a byte patch is applied, without writing or backing up.
    pub fn inspect_byte(&self, patch: &BytePatch) -> Result<ByteState, PatchError> {
        let mut file = File::open(&self.target).map_err(self.io_err())?;
        let len = file.metadata().map_err(self.io_err())?.len();
        let current = self.read_byte_at(&mut file, patch.address, len)?;

        Ok(if current == patch.new {
            ByteState::Patched
        } else if current == patch.expected {
            ByteState::Unpatched
        } else {
            ByteState::Unexpected(current)
        })
    }

    /// Report what [`Patcher::replace_pattern`] would do, without writing or
    /// backing up.
    pub fn inspect_pattern(
        &self,
        plan: &ReplacePlan,
        max_replace_count: usize,
    ) -> Result<PatternState, PatchError> {
        if max_replace_count == 0 {
            return Err(PatchError::ZeroReplaceCount);
        }

        let buffer = self.read_buffer()?;
        self.classify(plan, &buffer, max_replace_count)
    }

    /// Split the plan's matches into regions that still need writing and
    /// regions that already hold the patched bytes.
    ///
    /// A search pattern with a wildcard where the replacement writes a byte
    /// keeps matching after the write, so matches already in patched form are
    /// dropped before `max_replace_count` is applied. Every pending offset is
    /// bounds-checked here, before any caller writes.
    fn classify(
        &self,
        plan: &ReplacePlan,
        buffer: &[u8],
        max_replace_count: usize,
    ) -> Result<PatternState, PatchError> {
        let patched = plan.patched_pattern()?;
        let (done, pending): (Vec<usize>, Vec<usize>) = find_skip_table(buffer, plan.search())
            .into_iter()
            .partition(|&offset| patched.matches_at(buffer, offset));

        let offsets: Vec<usize> = pending.into_iter().take(max_replace_count).collect();
        if !offsets.is_empty() {
            let len = buffer.len() as u64;
            for &offset in &offsets {
                plan.check_bounds(&self.target, offset, len)?;
            }
            return Ok(PatternState::Pending { offsets });
        }

        if !done.is_empty() || !find_skip_table(buffer, &patched).is_empty() {
            Ok(PatternState::Applied)
        } else {
            Ok(PatternState::Absent)
        }
    }

    /// Read the whole target into memory.
    pub fn read_buffer(&self) -> Result<Vec<u8>, PatchError> {
        fs::read(&self.target).map_err(self.io_err())
    }

    /// Every offset where `pattern` matches, overlapping matches included.
    pub fn search(&self, pattern: &SearchPattern) -> Result<Vec<usize>, PatchError> {
        let buffer = self.read_buffer()?;
        let matches = find_parallel(&buffer, pattern, &self.scan);
        debug!(file = %self.target.display(), count = matches.len(), "pattern search");
        Ok(matches)
    }

    /// Absolute offsets of the byte at `target_index` inside every match.
    pub fn search_with_target_index(
        &self,
        pattern: &SearchPattern,
        target_index: usize,
    ) -> Result<Vec<usize>, PatchError> {
        pattern.validate_target_index(target_index)?;
        let buffer = self.read_buffer()?;
        Ok(find_with_target_index(
            &buffer,
            pattern,
            target_index,
            &self.scan,
        )?)
    }

    /// Write `plan`'s segments at every offset.
    ///
    /// Offsets are deduplicated and applied in ascending order. Every offset is
    /// bounds-checked before anything is written: the first violation aborts
    /// the whole batch and the file is left untouched.
    pub fn replace_at<I>(&self, plan: &ReplacePlan, offsets: I) -> Result<PatternOutcome, PatchError>
    where
        I: IntoIterator<Item = usize>,
    {
        let mut offsets: Vec<usize> = offsets.into_iter().collect();
        offsets.sort_unstable();
        offsets.dedup();

        if offsets.is_empty() {
            info!(file = %self.target.display(), "no offsets to replace");
            return Ok(PatternOutcome::NoMatch);
        }

        let (mut file, len) = self.open_rw()?;
        for &offset in &offsets {
            plan.check_bounds(&self.target, offset, len)?;
        }

        self.ensure_backup()?;

        for &offset in &offsets {
            for segment in plan.segments() {
                let position = (offset + segment.offset) as u64;
                file.seek(SeekFrom::Start(position)).map_err(self.io_err())?;
                file.write_all(&segment.bytes).map_err(self.io_err())?;
            }
            debug!(file = %self.target.display(), "replaced at {offset:#X}");
        }
        file.sync_data().map_err(self.io_err())?;

        info!(
            file = %self.target.display(),
            count = offsets.len(),
            "pattern replaced at offsets"
        );
        Ok(PatternOutcome::Replaced { offsets })
    }

    /// Find non-overlapping matches of the plan's search pattern and rewrite up
    /// to `max_replace_count` of them in scan order.
    ///
    /// Matches that already hold the patched bytes are skipped and do not count
    /// toward `max_replace_count`. All pending offsets are bounds-checked before
    /// the first write, and a backup is only made when there is something to
    /// write.
    pub fn replace_pattern(
        &self,
        plan: &ReplacePlan,
        max_replace_count: usize,
    ) -> Result<PatternOutcome, PatchError> {
        if max_replace_count == 0 {
            return Err(PatchError::ZeroReplaceCount);
        }

        let (file, len) = self.open_rw()?;
        if len == 0 {
            info!(file = %self.target.display(), "target is empty, no match");
            return Ok(PatternOutcome::NoMatch);
        }

        // SAFETY: the target is opened read-write for the duration of the patch
        // and callers guarantee no other writer touches it concurrently.
        let mut map = unsafe { MmapMut::map_mut(&file) }.map_err(self.io_err())?;

        let offsets = match self.classify(plan, &map, max_replace_count)? {
            PatternState::Pending { offsets } => offsets,
            PatternState::Applied => {
                info!(file = %self.target.display(), "pattern already applied");
                return Ok(PatternOutcome::AlreadyApplied);
            }
            PatternState::Absent => {
                info!(file = %self.target.display(), pattern = %plan.search(), "pattern not found");
                return Ok(PatternOutcome::NoMatch);
            }
        };

        debug!(file = %self.target.display(), count = offsets.len(), "pending matches");
        self.ensure_backup()?;

        for &offset in &offsets {
            for segment in plan.segments() {
                let start = offset + segment.offset;
                map[start..start + segment.bytes.len()].copy_from_slice(&segment.bytes);
            }
            debug!(file = %self.target.display(), "replaced at {offset:#X}");
        }
        map.flush().map_err(self.io_err())?;

        info!(
            file = %self.target.display(),
            count = offsets.len(),
            "pattern replaced"
        );
        Ok(PatternOutcome::Replaced { offsets })
    }
}
