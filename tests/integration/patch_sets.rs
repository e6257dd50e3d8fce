//! Patch files spanning several target files.

use binpatch::config::{apply_patches, check_patches, load_from_path, PatchResult};
use binpatch::{BackupManager, BackupOutcome, Patcher};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn setup_install() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("Weixin.dll"), [0x74, 0x0A, 0x4D, 0x33, 0x4B, 0x00]).unwrap();
    fs::write(dir.path().join("WeChatAppEx.exe"), [0x0F, 0x84, 0x10, 0x00]).unwrap();
    fs::write(dir.path().join("untouched.dll"), [0x01, 0x02]).unwrap();

    fs::write(
        dir.path().join("core.toml"),
        r#"
[meta]
name = "core"
root_relative = true

[[patches]]
id = "dll-branch"
file = "Weixin.dll"
[patches.operation]
type = "byte"
address = "0"
expected = "74"
new = "EB"

[[patches]]
id = "exe-jz"
file = "WeChatAppEx.exe"
[patches.operation]
type = "pattern"
search = "0F 84 ?? 00"
replace = "90 E9 ?? ??"

[[patches]]
id = "dll-flag"
file = "Weixin.dll"
[patches.operation]
type = "pattern"
search = "4D 33 4B"
replace = "?? 01 ??"
"#,
    )
    .unwrap();

    dir
}

#[test]
fn test_results_follow_patch_order_across_files() {
    let dir = setup_install();
    let config = load_from_path(dir.path().join("core.toml")).unwrap();

    let results = apply_patches(&config, dir.path(), None);
    let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["dll-branch", "exe-jz", "dll-flag"]);
    assert!(results
        .iter()
        .all(|(_, r)| matches!(r, Ok(PatchResult::Applied { writes: 1, .. }))));

    assert_eq!(
        fs::read(dir.path().join("Weixin.dll")).unwrap(),
        vec![0xEB, 0x0A, 0x4D, 0x01, 0x4B, 0x00]
    );
    assert_eq!(
        fs::read(dir.path().join("WeChatAppEx.exe")).unwrap(),
        vec![0x90, 0xE9, 0x10, 0x00]
    );

    // Each touched file gets exactly one pristine backup.
    assert_eq!(
        fs::read(dir.path().join("Weixin.dll.bak")).unwrap(),
        vec![0x74, 0x0A, 0x4D, 0x33, 0x4B, 0x00]
    );
    assert_eq!(
        fs::read(dir.path().join("WeChatAppEx.exe.bak")).unwrap(),
        vec![0x0F, 0x84, 0x10, 0x00]
    );
    assert!(!dir.path().join("untouched.dll.bak").exists());
}

#[test]
fn test_second_run_keeps_first_backup() {
    let dir = setup_install();
    let config = load_from_path(dir.path().join("core.toml")).unwrap();

    let _ = apply_patches(&config, dir.path(), None);
    // An updater restored the branch byte but left the flag patched.
    fs::write(dir.path().join("Weixin.dll"), [0x74, 0x0A, 0x4D, 0x01, 0x4B, 0x00]).unwrap();

    let results = apply_patches(&config, dir.path(), None);
    assert!(matches!(
        results[0].1,
        Ok(PatchResult::Applied { writes: 1, .. })
    ));
    assert_eq!(
        fs::read(dir.path().join("Weixin.dll.bak")).unwrap(),
        vec![0x74, 0x0A, 0x4D, 0x33, 0x4B, 0x00]
    );

    let status = check_patches(&config, dir.path(), None);
    assert!(status
        .iter()
        .all(|(_, r)| matches!(r, Ok(PatchResult::AlreadyApplied { .. }))));
}

#[test]
fn test_shared_manager_backs_up_each_file_once_across_threads() {
    let dir = setup_install();
    let manager = Arc::new(BackupManager::new());
    let files = ["Weixin.dll", "WeChatAppEx.exe", "untouched.dll"];

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let path = dir.path().join(files[i % files.len()]);
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || {
                let patcher = Patcher::with_backup_manager(path, manager).unwrap();
                patcher.ensure_backup().unwrap()
            })
        })
        .collect();

    let created = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|outcome| matches!(outcome, BackupOutcome::Created { .. }))
        .count();
    assert_eq!(created, files.len());

    for file in files {
        assert!(manager.is_satisfied(&dir.path().join(file)));
        assert_eq!(
            fs::read(dir.path().join(format!("{file}.bak"))).unwrap(),
            fs::read(dir.path().join(file)).unwrap()
        );
    }
}
