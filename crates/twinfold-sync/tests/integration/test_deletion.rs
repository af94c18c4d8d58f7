//! Deletion policies: permanent, trash, versioning, and the reserved
//! temporary-suffix override.

use twinfold_core::config::{DeletionPolicy, PairSyncConfig, SyncSettings};
use twinfold_core::domain::{BySide, ContainerRef, FolderAttributes, SyncOperation};
use twinfold_core::ports::Warning;

use crate::common::{base_pair, file_attrs, names, run_pair, MemFileSystem, RecordingReporter};

fn versioning_cfg(folder: &str) -> PairSyncConfig {
    PairSyncConfig {
        handle_deletion: DeletionPolicy::Versioning,
        versioning_folder_phrase: folder.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn temp_suffix_files_bypass_the_versioning_policy() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    fs.add_file("/L/report.0a1b.twf_tmp", b"leftover", 1);

    let mut tree = base_pair("/L", "/R");
    tree.add_file(
        ContainerRef::Base,
        names("report.0a1b.twf_tmp", ""),
        BySide::new(file_attrs(8, 1), None),
        SyncOperation::DeleteLeft,
    );

    let reporter = RecordingReporter::new();
    run_pair(
        tree,
        versioning_cfg("/versions"),
        SyncSettings::default(),
        &fs,
        &reporter,
    )
    .await;

    let ops = fs.ops();
    assert!(
        ops.iter().any(|o| o.contains("remove_file /L/report.0a1b.twf_tmp")),
        "interim files must be deleted permanently: {ops:?}"
    );
    assert!(
        !ops.iter().any(|o| o.contains("revision")),
        "interim files must never reach the versioning folder: {ops:?}"
    );
}

#[tokio::test]
async fn versioning_preserves_target_before_overwrite() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    fs.add_folder("/versions");
    fs.add_file("/L/a.txt", &[b'o'; 1000], 1);
    fs.add_file("/R/a.txt", &[b'n'; 10], 2);

    let mut tree = base_pair("/L", "/R");
    tree.add_file(
        ContainerRef::Base,
        names("a.txt", "a.txt"),
        BySide::new(file_attrs(1000, 1), file_attrs(10, 2)),
        SyncOperation::OverwriteLeft,
    );

    let reporter = RecordingReporter::new();
    run_pair(
        tree,
        versioning_cfg("/versions"),
        SyncSettings::default(),
        &fs,
        &reporter,
    )
    .await;

    let ops = fs.ops();
    let revision = ops
        .iter()
        .position(|o| o.contains("revision_file /L/a.txt"))
        .unwrap_or_else(|| panic!("old content must be versioned first: {ops:?}"));
    let copy = ops
        .iter()
        .position(|o| o.contains("copy_file /R/a.txt -> /L/a.txt"))
        .expect("new content must be copied");
    assert!(
        revision < copy,
        "no destructive operation before the versioning handle succeeded: {ops:?}"
    );

    // the archive holds the old content, the target the new one
    assert_eq!(fs.content("/versions/a.txt"), Some(vec![b'o'; 1000]));
    assert_eq!(fs.content("/L/a.txt"), Some(vec![b'n'; 10]));
}

#[tokio::test]
async fn trash_folder_removal_is_one_logical_operation() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    fs.add_folder("/L/sub");
    fs.add_file("/L/sub/x.txt", b"x", 1);
    fs.add_file("/L/sub/y.txt", b"y", 1);

    let mut tree = base_pair("/L", "/R");
    let folder = tree.add_folder(
        ContainerRef::Base,
        names("sub", ""),
        BySide::new(Some(FolderAttributes::default()), None),
        SyncOperation::DeleteLeft,
    );
    for name in ["x.txt", "y.txt"] {
        tree.add_file(
            ContainerRef::Folder(folder),
            names(name, ""),
            BySide::new(file_attrs(1, 1), None),
            SyncOperation::DeleteLeft,
        );
    }

    let reporter = RecordingReporter::new();
    run_pair(
        tree,
        PairSyncConfig {
            handle_deletion: DeletionPolicy::Trash,
            ..Default::default()
        },
        SyncSettings::default(),
        &fs,
        &reporter,
    )
    .await;

    let ops = fs.ops();
    let recycle_count = ops.iter().filter(|o| o.starts_with("recycle")).count();
    assert_eq!(recycle_count, 1, "one logical move expected: {ops:?}");
    assert!(!fs.exists("/L/sub"));

    // three logical rows collapsed into one physical move: the scoped
    // reporter corrected the expected total down to what happened
    assert_eq!(reporter.processed_items(), 1);
    let total = *reporter.total.lock().unwrap();
    assert_eq!(total.0, 1);
}

#[tokio::test]
async fn permanent_folder_removal_reports_every_child() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    fs.add_folder("/L/sub");
    fs.add_file("/L/sub/x.txt", b"x", 1);
    fs.add_file("/L/sub/y.txt", b"y", 1);

    let mut tree = base_pair("/L", "/R");
    let folder = tree.add_folder(
        ContainerRef::Base,
        names("sub", ""),
        BySide::new(Some(FolderAttributes::default()), None),
        SyncOperation::DeleteLeft,
    );
    for name in ["x.txt", "y.txt"] {
        tree.add_file(
            ContainerRef::Folder(folder),
            names(name, ""),
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

    // folder + two files, one delta each
    assert_eq!(reporter.processed_items(), 3);
    let total = *reporter.total.lock().unwrap();
    assert_eq!(total.0, 3);
    assert!(!fs.exists("/L/sub"));
}

#[tokio::test]
async fn missing_recycle_bin_falls_back_to_permanent_deletion() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    fs.add_file("/L/a.txt", b"bye", 1);
    fs.set_recycle_bin_supported(false);

    let mut tree = base_pair("/L", "/R");
    tree.add_file(
        ContainerRef::Base,
        names("a.txt", ""),
        BySide::new(file_attrs(3, 1), None),
        SyncOperation::DeleteLeft,
    );

    let reporter = RecordingReporter::new();
    run_pair(
        tree,
        PairSyncConfig {
            handle_deletion: DeletionPolicy::Trash,
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
            .any(|(_, kind)| *kind == Warning::RecycleBinUnavailable),
        "missing recycler must be announced before sync"
    );
    drop(warnings);

    let ops = fs.ops();
    assert!(
        ops.iter().any(|o| o.contains("remove_file /L/a.txt")),
        "deletion must fall back to permanent: {ops:?}"
    );
    assert!(!ops.iter().any(|o| o.starts_with("recycle")), "{ops:?}");
}
