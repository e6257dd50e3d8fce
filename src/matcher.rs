//! Pattern search over in-memory byte buffers.
//!
//! Two strategies produce ascending, deduplicated match offsets:
//!
//! - [`find_parallel`] checks every candidate start index, splitting the range
//!   across scoped worker threads. Overlapping matches are all reported.
//! - [`find_skip_table`] is a single-threaded bad-character scan meant for
//!   large files with few expected matches. After a match the window jumps past
//!   the matched region, so only non-overlapping matches are reported. This is
//!   the strategy used for destructive replacement, where overlapping writes
//!   would corrupt later matches.
//!
//! An empty buffer or a pattern longer than the buffer yields no matches.

use crate::pattern::{PatternByte, PatternError, SearchPattern};
use std::num::NonZeroUsize;
use std::thread;
use tracing::debug;

pub const DEFAULT_PARALLEL_MULTIPLIER: usize = 2;

/// Candidate start positions a worker must own before another thread is spawned.
pub const DEFAULT_MIN_CHUNK_LEN: usize = 64 * 1024;

/// Tuning for the parallel scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Workers are capped at `available_parallelism * parallel_multiplier`.
    pub parallel_multiplier: usize,
    pub min_chunk_len: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            parallel_multiplier: DEFAULT_PARALLEL_MULTIPLIER,
            min_chunk_len: DEFAULT_MIN_CHUNK_LEN,
        }
    }
}

impl ScanOptions {
    pub fn max_workers(&self) -> usize {
        let cores = thread::available_parallelism().map_or(1, NonZeroUsize::get);
        cores.saturating_mul(self.parallel_multiplier).max(1)
    }

    fn workers_for(&self, candidates: usize) -> usize {
        let wanted = candidates.div_ceil(self.min_chunk_len.max(1));
        wanted.clamp(1, self.max_workers())
    }
}

/// Which scan to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchStrategy {
    #[default]
    Parallel,
    SkipTable,
}

impl SearchStrategy {
    pub fn find(self, buffer: &[u8], pattern: &SearchPattern, options: &ScanOptions) -> Vec<usize> {
        match self {
            SearchStrategy::Parallel => find_parallel(buffer, pattern, options),
            SearchStrategy::SkipTable => find_skip_table(buffer, pattern),
        }
    }
}

fn scan_range(buffer: &[u8], pattern: &SearchPattern, from: usize, to: usize) -> Vec<usize> {
    (from..to)
        .filter(|&start| pattern.matches_at(buffer, start))
        .collect()
}

/// Brute-force scan of every start index, split across worker threads.
pub fn find_parallel(buffer: &[u8], pattern: &SearchPattern, options: &ScanOptions) -> Vec<usize> {
    if pattern.is_empty() || buffer.len() < pattern.len() {
        return Vec::new();
    }

    let candidates = buffer.len() - pattern.len() + 1;
    let workers = options.workers_for(candidates);
    if workers == 1 {
        return scan_range(buffer, pattern, 0, candidates);
    }

    let chunk = candidates.div_ceil(workers);
    debug!(candidates, workers, chunk, "parallel pattern scan");

    let mut matches: Vec<usize> = thread::scope(|scope| {
        let handles: Vec<_> = (0..candidates)
            .step_by(chunk)
            .map(|from| {
                let to = (from + chunk).min(candidates);
                scope.spawn(move || scan_range(buffer, pattern, from, to))
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|handle| match handle.join() {
                Ok(found) => found,
                Err(payload) => std::panic::resume_unwind(payload),
            })
            .collect()
    });

    matches.sort_unstable();
    matches.dedup();
    matches
}

/// Last position of each byte value in a pattern, with wildcard positions
/// counting as an occurrence of every value.
struct SkipTable {
    last: [isize; 256],
}

impl SkipTable {
    fn new(pattern: &[PatternByte]) -> Self {
        let floor = pattern
            .iter()
            .rposition(|b| b.is_wildcard())
            .map_or(-1, |idx| idx as isize);
        let mut last = [floor; 256];
        for (idx, byte) in pattern.iter().enumerate() {
            if let PatternByte::Concrete(value) = byte {
                let slot = &mut last[*value as usize];
                *slot = (*slot).max(idx as isize);
            }
        }
        Self { last }
    }

    fn shift(&self, mismatch_at: usize, byte: u8) -> usize {
        let shift = mismatch_at as isize - self.last[byte as usize];
        shift.max(1) as usize
    }
}

/// Bad-character skip scan, right to left within each window. Reports
/// non-overlapping matches only.
pub fn find_skip_table(buffer: &[u8], pattern: &SearchPattern) -> Vec<usize> {
    let bytes = pattern.bytes();
    let len = bytes.len();
    if len == 0 || buffer.len() < len {
        return Vec::new();
    }

    let table = SkipTable::new(bytes);
    let last_start = buffer.len() - len;
    let mut matches = Vec::new();
    let mut start = 0;

    while start <= last_start {
        let window = &buffer[start..start + len];
        let mismatch = (0..len).rev().find(|&idx| !bytes[idx].matches(window[idx]));

        match mismatch {
            None => {
                matches.push(start);
                start += len;
            }
            Some(idx) => start += table.shift(idx, window[idx]),
        }
    }

    matches
}

/// Parallel scan reporting `match_start + target_index` for every match.
///
/// Used when a wide pattern is needed for disambiguation but only one byte of
/// it is of interest. The target position must be concrete.
pub fn find_with_target_index(
    buffer: &[u8],
    pattern: &SearchPattern,
    target_index: usize,
    options: &ScanOptions,
) -> Result<Vec<usize>, PatternError> {
    pattern.validate_target_index(target_index)?;
    Ok(find_parallel(buffer, pattern, options)
        .into_iter()
        .map(|start| start + target_index)
        .collect())
}
