//! Integration tests for patch files
//!
//! Tests loading, validation, version filtering and full patch application

use binpatch::config::{
    apply_patches, check_patches, load_from_path, load_from_str, ApplicationError, ConfigError,
    Metadata, Operation, PatchConfig, PatchDefinition, PatchResult, ValidationIssue,
};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const BINARY: &[u8] = &[
    0x55, 0x8B, 0xEC, 0x85, 0xC0, 0x74, 0x10, 0x4D, 0x00, 0x4B, 0x90, 0x4D, 0x11, 0x4B, 0xC3,
];

/// Helper to create a temp dir holding a fake binary
fn setup_install() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("bin")).unwrap();
    fs::write(dir.path().join("bin/Weixin.dll"), BINARY).unwrap();
    dir
}

fn target(dir: &TempDir) -> PathBuf {
    dir.path().join("bin/Weixin.dll")
}

#[test]
fn test_load_full_patch_file() {
    let config = load_from_str(
        r#"
[meta]
name = "unlock"
description = "Unlock the multi-instance check"
versions = ["4.0.2.26", "4.0.3.11"]
root_relative = true

[[patches]]
id = "je-to-jmp"
file = "bin/Weixin.dll"
[patches.operation]
type = "byte"
address = "0x5"
expected = "74"
new = "EB"

[[patches]]
id = "flags"
file = "bin/Weixin.dll"
[patches.operation]
type = "pattern"
search = "4D ?? 4B"
replace = "?? 01 ??"
max_replace_count = 2
"#,
    )
    .unwrap();

    assert_eq!(config.meta.name, "unlock");
    assert_eq!(config.meta.versions.len(), 2);
    assert!(config.meta.root_relative);
    assert_eq!(config.patches.len(), 2);
    assert!(matches!(
        config.patches[1].operation,
        Operation::Pattern {
            allow_wildcard: true,
            max_replace_count: 2,
            ..
        }
    ));
}

#[test]
fn test_unknown_operation_type_rejected() {
    let err = load_from_str(
        r#"
[[patches]]
id = "x"
file = "a.dll"
[patches.operation]
type = "rename"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Toml { .. }));
}

#[test]
fn test_validation_reports_length_mismatch() {
    let err = load_from_str(
        r#"
[[patches]]
id = "short-replace"
file = "a.dll"
[patches.operation]
type = "pattern"
search = "4D ?? 4B"
replace = "00 00"
"#,
    )
    .unwrap_err();

    match err {
        ConfigError::Validation { source, .. } => {
            assert_eq!(source.issues.len(), 1);
            assert!(matches!(
                &source.issues[0],
                ValidationIssue::InvalidValue { patch_id: Some(id), message }
                    if id == "short-replace" && message.contains("length mismatch")
            ));
        }
        other => panic!("expected validation error, got {other}"),
    }
}

#[test]
fn test_validation_rejects_untouched_replacement() {
    let err = load_from_str(
        r#"
[[patches]]
id = "noop"
file = "a.dll"
[patches.operation]
type = "pattern"
search = "4D ?? 4B"
replace = "?? ?? ??"
"#,
    )
    .unwrap_err();

    match err {
        ConfigError::Validation { source, .. } => {
            assert!(matches!(
                &source.issues[0],
                ValidationIssue::InvalidValue { patch_id: Some(id), message }
                    if id == "noop" && message.contains("unchanged")
            ));
        }
        other => panic!("expected validation error, got {other}"),
    }
}

#[test]
fn test_apply_mixed_patches_from_disk() {
    let dir = setup_install();
    let patch_file = dir.path().join("unlock.toml");
    fs::write(
        &patch_file,
        r#"
[meta]
name = "unlock"
versions = ["4.0.2.26"]
root_relative = true

[[patches]]
id = "je-to-jmp"
file = "bin/Weixin.dll"
[patches.operation]
type = "byte"
address = "5"
expected = "74"
new = "EB"

[[patches]]
id = "flags"
file = "bin/Weixin.dll"
[patches.operation]
type = "pattern"
search = "4D ?? 4B"
replace = "?? 01 ??"
max_replace_count = 2
"#,
    )
    .unwrap();

    let config = load_from_path(&patch_file).unwrap();
    let results = apply_patches(&config, dir.path(), Some("4.0.2.26"));

    assert_eq!(
        results
            .iter()
            .map(|(id, _)| id.as_str())
            .collect::<Vec<_>>(),
        vec!["je-to-jmp", "flags"]
    );
    assert_eq!(
        results[0].1.as_ref().unwrap(),
        &PatchResult::Applied {
            file: target(&dir),
            writes: 1
        }
    );
    assert_eq!(
        results[1].1.as_ref().unwrap(),
        &PatchResult::Applied {
            file: target(&dir),
            writes: 2
        }
    );

    let patched = fs::read(target(&dir)).unwrap();
    assert_eq!(patched[5], 0xEB);
    assert_eq!(&patched[7..10], &[0x4D, 0x01, 0x4B]);
    assert_eq!(&patched[11..14], &[0x4D, 0x01, 0x4B]);
    assert_eq!(fs::read(dir.path().join("bin/Weixin.dll.bak")).unwrap(), BINARY);

    // Patched flags still match `4D ?? 4B`, so a rerun must not count them again.
    let again = apply_patches(&config, dir.path(), Some("4.0.2.26"));
    assert!(again
        .iter()
        .all(|(_, r)| matches!(r, Ok(PatchResult::AlreadyApplied { .. }))));
    assert_eq!(fs::read(target(&dir)).unwrap(), patched);

    let status = check_patches(&config, dir.path(), Some("4.0.2.26"));
    assert!(status
        .iter()
        .all(|(_, r)| matches!(r, Ok(PatchResult::AlreadyApplied { .. }))));
}

#[test]
fn test_check_reports_pending_then_applied() {
    let dir = setup_install();
    let config = PatchConfig {
        meta: Metadata {
            name: "single".to_string(),
            root_relative: false,
            ..Metadata::default()
        },
        patches: vec![PatchDefinition {
            id: "ret".to_string(),
            file: target(&dir).to_string_lossy().into_owned(),
            operation: Operation::Pattern {
                search: "90 4D 11".to_string(),
                replace: "90 4D 22".to_string(),
                allow_wildcard: false,
                max_replace_count: 1,
            },
        }],
    };
    config.validate().unwrap();

    let before = check_patches(&config, dir.path(), None);
    assert_eq!(
        before[0].1.as_ref().unwrap(),
        &PatchResult::Applied {
            file: target(&dir),
            writes: 1
        }
    );
    assert_eq!(fs::read(target(&dir)).unwrap(), BINARY);

    let _ = apply_patches(&config, dir.path(), None);

    let after = check_patches(&config, dir.path(), None);
    assert_eq!(
        after[0].1.as_ref().unwrap(),
        &PatchResult::AlreadyApplied { file: target(&dir) }
    );
}

#[test]
fn test_version_mismatch_skips_every_patch() {
    let dir = setup_install();
    let config = load_from_str(
        r#"
[meta]
versions = ["3.9.12.45"]
root_relative = true

[[patches]]
id = "a"
file = "bin/Weixin.dll"
[patches.operation]
type = "byte"
address = "0"
expected = "55"
new = "C3"
"#,
    )
    .unwrap();

    let results = apply_patches(&config, dir.path(), Some("4.0.2.26"));
    assert!(matches!(
        results[0].1.as_ref().unwrap(),
        PatchResult::SkippedVersion { reason } if reason.contains("3.9.12.45")
    ));
    assert_eq!(fs::read(target(&dir)).unwrap(), BINARY);
    assert!(!dir.path().join("bin/Weixin.dll.bak").exists());
}

#[test]
fn test_out_of_range_address_is_an_error() {
    let dir = setup_install();
    let config = load_from_str(
        r#"
[meta]
root_relative = true

[[patches]]
id = "far"
file = "bin/Weixin.dll"
[patches.operation]
type = "byte"
address = "0xFFFF"
expected = "00"
new = "01"
"#,
    )
    .unwrap();

    let results = apply_patches(&config, dir.path(), None);
    assert!(matches!(
        &results[0].1,
        Err(ApplicationError::Patch(
            binpatch::PatchError::AddressOutOfRange { address: 0xFFFF, .. }
        ))
    ));
}

#[test]
fn test_unvalidated_config_reports_invalid_patch() {
    let dir = setup_install();
    let config = PatchConfig {
        meta: Metadata::default(),
        patches: vec![PatchDefinition {
            id: "bad".to_string(),
            file: target(&dir).to_string_lossy().into_owned(),
            operation: Operation::Byte {
                address: "nope".to_string(),
                expected: "00".to_string(),
                new: "01".to_string(),
            },
        }],
    };

    let results = apply_patches(&config, dir.path(), None);
    assert!(matches!(
        &results[0].1,
        Err(ApplicationError::InvalidPatch { id, .. }) if id == "bad"
    ));
}
