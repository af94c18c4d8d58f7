//! Pre-flight checks and batched warnings of the orchestrator.

use twinfold_core::config::{DeletionPolicy, PairSyncConfig, SyncSettings};
use twinfold_core::domain::{BySide, ContainerRef, Side, SyncOperation};
use twinfold_core::ports::Warning;

use crate::common::{base_pair, file_attrs, names, run_pair, MemFileSystem, RecordingReporter};

#[tokio::test]
async fn empty_target_path_with_pending_writes_is_fatal() {
    let fs = MemFileSystem::new();
    fs.add_folder("/R");
    fs.add_file("/R/a.txt", b"a", 1);

    let mut tree = base_pair("", "/R");
    tree.add_file(
        ContainerRef::Base,
        names("", "a.txt"),
        BySide::new(None, file_attrs(1, 1)),
        SyncOperation::CreateLeft,
    );

    let reporter = RecordingReporter::new();
    run_pair(
        tree,
        PairSyncConfig::default(),
        SyncSettings::default(),
        &fs,
        &reporter,
    )
    .await;

    let fatals = reporter.fatal_errors.lock().unwrap();
    assert!(
        fatals
            .iter()
            .any(|m| m.contains("Target folder input field must not be empty")),
        "expected fatal error, got {fatals:?}"
    );
    drop(fatals);
    assert!(fs.ops().is_empty(), "skipped pair must not touch the disk");
}

#[tokio::test]
async fn identical_base_paths_are_skipped_silently() {
    let fs = MemFileSystem::new();
    fs.add_folder("/same");
    fs.add_file("/same/a.txt", b"a", 1);

    let mut tree = base_pair("/same", "/same");
    tree.add_file(
        ContainerRef::Base,
        names("a.txt", ""),
        BySide::new(file_attrs(1, 1), None),
        SyncOperation::DeleteLeft,
    );

    let reporter = RecordingReporter::new();
    run_pair(
        tree,
        PairSyncConfig::default(),
        SyncSettings::default(),
        &fs,
        &reporter,
    )
    .await;

    assert!(fs.ops().is_empty());
    assert!(reporter.fatal_errors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn deletions_from_an_unavailable_source_are_blocked() {
    let fs = MemFileSystem::new();
    fs.add_folder("/R");
    fs.add_file("/R/a.txt", b"a", 1);

    let mut tree = base_pair("/L", "/R");
    tree.set_available(Side::Left, false);
    tree.add_file(
        ContainerRef::Base,
        names("", "a.txt"),
        BySide::new(None, file_attrs(1, 1)),
        SyncOperation::DeleteRight,
    );

    let reporter = RecordingReporter::new();
    run_pair(
        tree,
        PairSyncConfig::default(),
        SyncSettings::default(),
        &fs,
        &reporter,
    )
    .await;

    let fatals = reporter.fatal_errors.lock().unwrap();
    assert!(
        fatals.iter().any(|m| m.contains("Source folder /L not found")),
        "expected data-loss guard, got {fatals:?}"
    );
    drop(fatals);
    assert!(fs.exists("/R/a.txt"), "no deletion may propagate");
}

#[tokio::test]
async fn already_in_sync_pair_performs_no_io() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    fs.add_file("/L/a.txt", b"same", 1);
    fs.add_file("/R/a.txt", b"same", 1);

    let mut tree = base_pair("/L", "/R");
    tree.add_file(
        ContainerRef::Base,
        names("a.txt", "a.txt"),
        BySide::new(file_attrs(4, 1), file_attrs(4, 1)),
        SyncOperation::Equal,
    );

    let reporter = RecordingReporter::new();
    run_pair(
        tree,
        PairSyncConfig::default(),
        SyncSettings::default(),
        &fs,
        &reporter,
    )
    .await;

    assert!(fs.ops().is_empty());
}

#[tokio::test]
async fn missing_base_folder_is_created_before_the_run() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_file("/L/a.txt", b"new", 1);
    // /R does not exist; the comparison marked it unavailable

    let mut tree = base_pair("/L", "/R");
    tree.set_available(Side::Right, false);
    tree.add_file(
        ContainerRef::Base,
        names("a.txt", ""),
        BySide::new(file_attrs(3, 1), None),
        SyncOperation::CreateRight,
    );

    let reporter = RecordingReporter::new();
    run_pair(
        tree,
        PairSyncConfig::default(),
        SyncSettings::default(),
        &fs,
        &reporter,
    )
    .await;

    let ops = fs.ops();
    let create_base = ops
        .iter()
        .position(|o| o.contains("create_folder_recursive /R"))
        .unwrap_or_else(|| panic!("base folder must be created, got {ops:?}"));
    let copy = ops
        .iter()
        .position(|o| o.contains("copy_file /L/a.txt -> /R/a.txt"))
        .expect("file must be created afterwards");
    assert!(create_base < copy);
    assert!(fs.exists("/R/a.txt"));
}

#[tokio::test]
async fn significantly_different_folders_raise_a_warning() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    for i in 0..6 {
        fs.add_file(&format!("/R/c{i}.txt"), b"c", 1);
        fs.add_file(&format!("/L/d{i}.txt"), b"d", 1);
    }

    let mut tree = base_pair("/L", "/R");
    for i in 0..6 {
        tree.add_file(
            ContainerRef::Base,
            names("", &format!("c{i}.txt")),
            BySide::new(None, file_attrs(1, 1)),
            SyncOperation::CreateLeft,
        );
        tree.add_file(
            ContainerRef::Base,
            names(&format!("d{i}.txt"), ""),
            BySide::new(file_attrs(1, 1), None),
            SyncOperation::DeleteLeft,
        );
    }

    let reporter = RecordingReporter::new();
    run_pair(
        tree,
        PairSyncConfig::default(),
        SyncSettings::default(),
        &fs,
        &reporter,
    )
    .await;

    let warnings = reporter.warnings.lock().unwrap();
    assert!(
        warnings
            .iter()
            .any(|(_, kind)| *kind == Warning::SignificantDifference),
        "12 non-matching rows out of 12 must trigger the warning"
    );
}

#[tokio::test]
async fn versioning_folder_inside_base_folder_raises_a_warning() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    fs.add_file("/L/a.txt", b"a", 1);

    let mut tree = base_pair("/L", "/R");
    tree.add_file(
        ContainerRef::Base,
        names("a.txt", ""),
        BySide::new(file_attrs(1, 1), None),
        SyncOperation::DeleteLeft,
    );

    let reporter = RecordingReporter::new();
    run_pair(
        tree,
        PairSyncConfig {
            handle_deletion: DeletionPolicy::Versioning,
            versioning_folder_phrase: "/L/versions".to_string(),
            ..Default::default()
        },
        SyncSettings::default(),
        &fs,
        &reporter,
    )
    .await;

    let warnings = reporter.warnings.lock().unwrap();
    assert!(
        warnings
            .iter()
            .any(|(msg, kind)| *kind == Warning::VersioningFolderPartOfSync
                && msg.contains("/L/versions")),
        "nested versioning folder must be announced: {warnings:?}"
    );
}

#[tokio::test]
async fn low_disk_space_raises_an_advisory_warning() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    fs.add_file("/L/big.bin", &[b'b'; 1000], 1);
    fs.set_free_space("/R", 5);

    let mut tree = base_pair("/L", "/R");
    tree.add_file(
        ContainerRef::Base,
        names("big.bin", ""),
        BySide::new(file_attrs(1000, 1), None),
        SyncOperation::CreateRight,
    );

    let reporter = RecordingReporter::new();
    run_pair(
        tree,
        PairSyncConfig::default(),
        SyncSettings::default(),
        &fs,
        &reporter,
    )
    .await;

    let warnings = reporter.warnings.lock().unwrap();
    assert!(
        warnings
            .iter()
            .any(|(_, kind)| *kind == Warning::NotEnoughDiskSpace),
        "advisory space warning expected: {warnings:?}"
    );
    drop(warnings);
    // advisory only: the copy still ran
    assert!(fs.exists("/R/big.bin"));
}

#[tokio::test]
async fn unresolved_conflicts_are_reported_once_before_sync() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    fs.add_file("/L/c.txt", b"left", 1);
    fs.add_file("/R/c.txt", b"right", 2);
    fs.add_file("/L/a.txt", b"a", 1);

    let mut tree = base_pair("/L", "/R");
    let conflict = tree.add_file(
        ContainerRef::Base,
        names("c.txt", "c.txt"),
        BySide::new(file_attrs(4, 1), file_attrs(5, 2)),
        SyncOperation::UnresolvedConflict,
    );
    tree.file_mut(conflict)
        .unwrap()
        .set_conflict_msg("both sides changed");
    tree.add_file(
        ContainerRef::Base,
        names("a.txt", ""),
        BySide::new(file_attrs(1, 1), None),
        SyncOperation::CreateRight,
    );

    let reporter = RecordingReporter::new();
    run_pair(
        tree,
        PairSyncConfig::default(),
        SyncSettings::default(),
        &fs,
        &reporter,
    )
    .await;

    let warnings = reporter.warnings.lock().unwrap();
    assert!(
        warnings
            .iter()
            .any(|(msg, kind)| *kind == Warning::UnresolvedConflicts
                && msg.contains("c.txt")
                && msg.contains("both sides changed")),
        "conflicts must be batched into one warning: {warnings:?}"
    );
    drop(warnings);

    // the conflict row was not dispatched; the other file synced
    assert_eq!(fs.content("/L/c.txt").as_deref(), Some(&b"left"[..]));
    assert_eq!(fs.content("/R/c.txt").as_deref(), Some(&b"right"[..]));
    assert!(fs.exists("/R/a.txt"));
}
