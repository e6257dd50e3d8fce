//! binpatch: binary pattern search-and-patch engine
//!
//! Locates byte sequences (with wildcard positions) inside large binary files
//! and rewrites them in place, keeping a pristine `.bak` copy of every file it
//! touches.
//!
//! # Architecture
//!
//! Everything compiles down to two write primitives on a [`Patcher`]: a
//! conditional single-byte write ([`BytePatch`]) and a segmented pattern
//! replacement ([`ReplacePlan`]). Locating the bytes is the job of the
//! [`matcher`] module, which offers a parallel brute-force scan and a
//! single-threaded skip-table scan.
//!
//! # Safety
//!
//! - A backup is made once per target before its first write
//! - Every offset in a batch is bounds-checked before anything is written
//! - Single-byte writes only happen when the current byte is the expected one
//! - Re-applying a patch is a no-op that reports "already applied"
//!
//! # Example
//!
//! ```no_run
//! use binpatch::{Patcher, ReplacePattern, ReplacePlan, SearchPattern};
//!
//! let plan = ReplacePlan::new(
//!     SearchPattern::parse("4D ?? 4B", true)?,
//!     ReplacePattern::parse("?? 00 ??")?,
//! )?;
//!
//! let patcher = Patcher::new("Weixin.dll")?;
//! let outcome = patcher.replace_pattern(&plan, 1)?;
//! println!("{outcome:?}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
pub mod codec;
pub mod config;
pub mod hex;
pub mod manifest;
pub mod matcher;
pub mod patcher;
pub mod pattern;
pub mod segment;

// Re-exports
pub use backup::{BackupError, BackupManager, BackupOutcome};
pub use codec::{CodecError, EncodingRule, Version};
pub use config::{
    apply_patches, check_patches, load_from_path, load_from_str, matches_version,
    ApplicationError, ConfigError, PatchConfig, PatchResult, VersionError,
};
pub use manifest::{ManifestError, PatchManifest, VersionDetail};
pub use matcher::{
    find_parallel, find_skip_table, find_with_target_index, ScanOptions, SearchStrategy,
};
pub use patcher::{
    ByteOutcome, BytePatch, ByteState, PatchError, Patcher, PatternOutcome, PatternState,
    ReplacePlan,
};
pub use pattern::{PatternByte, PatternError, ReplacePattern, SearchPattern};
pub use segment::{compact, ReplaceSegment};
