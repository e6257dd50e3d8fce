//! Property-based tests for matcher, compaction, codec and patcher invariants

use binpatch::matcher::{find_parallel, find_skip_table, ScanOptions};
use binpatch::{
    compact, ByteOutcome, BytePatch, EncodingRule, PatternByte, PatternOutcome, Patcher,
    ReplacePattern, ReplacePlan, SearchPattern, Version,
};
use proptest::prelude::*;
use std::fs;

fn narrow_byte() -> impl Strategy<Value = u8> {
    0u8..4
}

fn pattern_byte() -> impl Strategy<Value = PatternByte> {
    prop_oneof![
        3 => narrow_byte().prop_map(PatternByte::Concrete),
        1 => Just(PatternByte::Wildcard),
    ]
}

fn search_pattern() -> impl Strategy<Value = SearchPattern> {
    prop::collection::vec(pattern_byte(), 1..6).prop_map(|bytes| SearchPattern::new(bytes).unwrap())
}

fn many_workers() -> ScanOptions {
    ScanOptions {
        parallel_multiplier: 4,
        min_chunk_len: 3,
    }
}

/// Leftmost non-overlapping selection from an ascending list of matches.
fn greedy_non_overlapping(matches: &[usize], len: usize) -> Vec<usize> {
    let mut selected = Vec::new();
    let mut next_free = 0;
    for &start in matches {
        if start >= next_free {
            selected.push(start);
            next_free = start + len;
        }
    }
    selected
}

proptest! {
    #[test]
    fn prop_parallel_finds_every_match(
        buffer in prop::collection::vec(narrow_byte(), 0..300),
        pattern in search_pattern(),
    ) {
        let expected: Vec<usize> = (0..buffer.len())
            .filter(|&start| pattern.matches_at(&buffer, start))
            .collect();
        prop_assert_eq!(find_parallel(&buffer, &pattern, &many_workers()), expected.clone());
        prop_assert_eq!(find_parallel(&buffer, &pattern, &ScanOptions::default()), expected);
    }

    #[test]
    fn prop_skip_table_is_greedy_subset_of_brute_force(
        buffer in prop::collection::vec(narrow_byte(), 0..300),
        pattern in search_pattern(),
    ) {
        let brute = find_parallel(&buffer, &pattern, &many_workers());
        let skip = find_skip_table(&buffer, &pattern);

        prop_assert!(skip.iter().all(|offset| brute.contains(offset)));
        prop_assert_eq!(&skip, &greedy_non_overlapping(&brute, pattern.len()));

        let brute_overlaps = brute.windows(2).any(|pair| pair[1] - pair[0] < pattern.len());
        if !brute_overlaps {
            prop_assert_eq!(skip, brute);
        }
    }

    #[test]
    fn prop_compaction_covers_exactly_defined_positions(
        bytes in prop::collection::vec(prop::option::of(any::<u8>()), 0..40),
    ) {
        let pattern: Vec<PatternByte> = bytes.iter().copied().map(PatternByte::from).collect();
        let segments = compact(&pattern);

        let mut rebuilt: Vec<Option<u8>> = vec![None; bytes.len()];
        for segment in &segments {
            prop_assert!(!segment.bytes.is_empty());
            for (idx, &value) in segment.bytes.iter().enumerate() {
                prop_assert!(rebuilt[segment.offset + idx].is_none());
                rebuilt[segment.offset + idx] = Some(value);
            }
        }
        prop_assert_eq!(rebuilt, bytes);

        for pair in segments.windows(2) {
            // Ordered with at least one wildcard between neighbours.
            prop_assert!(pair[0].end() < pair[1].offset);
        }
    }

    #[test]
    fn prop_offset_rule_round_trips(
        major in 0u32..=17,
        minor in 0u32..=171,
        build in 0u32..=255,
        revision in 0u32..=255,
    ) {
        let version = Version::new(major, minor, build, revision);
        let encoded = version.encode(EncodingRule::OffsetBased).unwrap();
        prop_assert_eq!(Version::decode(encoded, EncodingRule::OffsetBased).unwrap(), version);
        prop_assert_eq!(version.to_string().parse::<Version>().unwrap(), version);
    }

    #[test]
    fn prop_scale_rule_round_trips(
        major in 0u32..=7,
        minor in 0u32..=255,
        build in 0u32..=255,
        revision in 0u32..=255,
    ) {
        let version = Version::new(major, minor, build, revision);
        let encoded = version.encode(EncodingRule::ScaleBased).unwrap();
        prop_assert_eq!(Version::decode(encoded, EncodingRule::ScaleBased).unwrap(), version);
    }

    #[test]
    fn prop_decodable_values_reencode(encoded in any::<u32>()) {
        for rule in [EncodingRule::OffsetBased, EncodingRule::ScaleBased] {
            if let Ok(version) = Version::decode(encoded, rule) {
                prop_assert_eq!(version.encode(rule).unwrap(), encoded);
            }
        }
    }

    #[test]
    fn prop_byte_patch_is_idempotent(
        content in prop::collection::vec(any::<u8>(), 1..64),
        index in any::<prop::sample::Index>(),
        expected in any::<u8>(),
        new in any::<u8>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.bin");
        fs::write(&path, &content).unwrap();

        let address = index.index(content.len());
        let patch = BytePatch::new(address as u64, expected, new);
        let patcher = Patcher::new(&path).unwrap();

        let first = patcher.replace_byte(&patch).unwrap();
        let after_first = fs::read(&path).unwrap();
        let second = patcher.replace_byte(&patch).unwrap();

        prop_assert_eq!(fs::read(&path).unwrap(), after_first.clone());
        prop_assert_ne!(second, ByteOutcome::Written);
        if first.is_success() {
            prop_assert_eq!(after_first[address], new);
        } else {
            prop_assert_eq!(after_first, content.clone());
        }
        prop_assert_eq!(fs::read(patcher.backup_path()).unwrap(), content);
    }

    #[test]
    fn prop_replacement_leaves_patched_form(
        buffer in prop::collection::vec(narrow_byte(), 1..200),
        search in search_pattern(),
        replace_seed in prop::collection::vec(prop::option::of(narrow_byte()), 6),
        max_count in 1usize..5,
    ) {
        let replace_bytes: Vec<Option<u8>> = replace_seed[..search.len()].to_vec();
        prop_assume!(replace_bytes.iter().any(Option::is_some));
        let replace = ReplacePattern::from_options(&replace_bytes).unwrap();
        let plan = ReplacePlan::new(search.clone(), replace).unwrap();
        let overlay = plan.patched_pattern().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.bin");
        fs::write(&path, &buffer).unwrap();
        let patcher = Patcher::new(&path).unwrap();

        let pending = |bytes: &[u8]| -> Vec<usize> {
            find_skip_table(bytes, &search)
                .into_iter()
                .filter(|&offset| !overlay.matches_at(bytes, offset))
                .take(max_count)
                .collect()
        };
        let expected_offsets = pending(&buffer);

        let first = patcher.replace_pattern(&plan, max_count).unwrap();
        let after_first = fs::read(&path).unwrap();
        match &first {
            PatternOutcome::Replaced { offsets } => {
                prop_assert_eq!(offsets, &expected_offsets);
                for &offset in offsets {
                    prop_assert!(overlay.matches_at(&after_first, offset));
                }
            }
            PatternOutcome::AlreadyApplied | PatternOutcome::NoMatch => {
                prop_assert!(expected_offsets.is_empty());
                prop_assert_eq!(&after_first, &buffer);
            }
        }

        // A second run never rewrites a region that already holds the patch.
        let second = patcher.replace_pattern(&plan, max_count).unwrap();
        let after_second = fs::read(&path).unwrap();
        match &second {
            PatternOutcome::Replaced { offsets } => {
                prop_assert_eq!(offsets, &pending(&after_first));
                if let PatternOutcome::Replaced { offsets: earlier } = &first {
                    prop_assert!(offsets.iter().all(|offset| !earlier.contains(offset)));
                }
            }
            PatternOutcome::AlreadyApplied | PatternOutcome::NoMatch => {
                prop_assert!(pending(&after_first).is_empty());
                prop_assert_eq!(&after_second, &after_first);
            }
        }
        if pending(&after_first).is_empty() && matches!(first, PatternOutcome::Replaced { .. }) {
            prop_assert_eq!(second, PatternOutcome::AlreadyApplied);
        }
    }
}
