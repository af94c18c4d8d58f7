//! Per-entity sync behavior: creates, overwrites, pass ordering,
//! verification, and statistics bookkeeping.

use twinfold_core::config::{PairSyncConfig, SyncSettings};
use twinfold_core::domain::{BySide, ContainerRef, Side, SyncOperation};
use twinfold_core::ports::ErrorResponse;

use crate::common::{base_pair, file_attrs, names, run_pair, MemFileSystem, RecordingReporter};

fn op_index(ops: &[String], needle: &str) -> usize {
    ops.iter()
        .position(|o| o.contains(needle))
        .unwrap_or_else(|| panic!("operation '{needle}' not found in {ops:?}"))
}

#[tokio::test]
async fn create_copies_content_and_marks_tree_synced() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    fs.add_file("/L/a.txt", b"hello", 100);

    let mut tree = base_pair("/L", "/R");
    let file = tree.add_file(
        ContainerRef::Base,
        names("a.txt", ""),
        BySide::new(file_attrs(5, 100), None),
        SyncOperation::CreateRight,
    );

    let reporter = RecordingReporter::new();
    let tree = run_pair(
        tree,
        PairSyncConfig::default(),
        SyncSettings::default(),
        &fs,
        &reporter,
    )
    .await;

    assert_eq!(fs.content("/R/a.txt").as_deref(), Some(&b"hello"[..]));
    let synced = tree.file(file).expect("file entry kept");
    assert_eq!(synced.op(), SyncOperation::Equal);
    assert!(synced.exists_on(Side::Right));
    assert_eq!(synced.file_size(Side::Right), 5);
    assert!(reporter.prompted_errors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn shrinking_overwrite_runs_before_creations() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    fs.add_file("/L/big.txt", &[b'x'; 1000], 1);
    fs.add_file("/R/big.txt", &[b'y'; 10], 2);
    fs.add_file("/R/new.txt", b"fresh", 3);

    let mut tree = base_pair("/L", "/R");
    // 1000 bytes on the left replaced by 10 from the right: pass one
    tree.add_file(
        ContainerRef::Base,
        names("big.txt", "big.txt"),
        BySide::new(file_attrs(1000, 1), file_attrs(10, 2)),
        SyncOperation::OverwriteLeft,
    );
    // plain creation: pass two
    tree.add_file(
        ContainerRef::Base,
        names("", "new.txt"),
        BySide::new(None, file_attrs(5, 3)),
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

    let ops = fs.ops();
    let overwrite = op_index(&ops, "copy_file /R/big.txt -> /L/big.txt");
    let create = op_index(&ops, "copy_file /R/new.txt -> /L/new.txt");
    assert!(
        overwrite < create,
        "shrinking overwrite must run in the earlier pass: {ops:?}"
    );
    assert_eq!(fs.content("/L/big.txt").unwrap().len(), 10);
}

#[tokio::test]
async fn deletions_precede_creations() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    fs.add_file("/L/stale.txt", b"stale", 1);
    fs.add_file("/R/incoming.txt", b"incoming", 2);

    let mut tree = base_pair("/L", "/R");
    tree.add_file(
        ContainerRef::Base,
        names("stale.txt", ""),
        BySide::new(file_attrs(5, 1), None),
        SyncOperation::DeleteLeft,
    );
    tree.add_file(
        ContainerRef::Base,
        names("", "incoming.txt"),
        BySide::new(None, file_attrs(8, 2)),
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

    let ops = fs.ops();
    let delete = op_index(&ops, "remove_file /L/stale.txt");
    let create = op_index(&ops, "copy_file /R/incoming.txt -> /L/incoming.txt");
    assert!(delete < create, "pass barrier violated: {ops:?}");
}

#[tokio::test]
async fn verification_failure_deletes_target_and_reports() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    fs.add_file("/L/a.txt", b"payload", 1);
    fs.corrupt_next_copy_to("/R/a.txt");

    let mut tree = base_pair("/L", "/R");
    tree.add_file(
        ContainerRef::Base,
        names("a.txt", ""),
        BySide::new(file_attrs(7, 1), None),
        SyncOperation::CreateRight,
    );

    let reporter = RecordingReporter::new();
    reporter.script_responses(&[ErrorResponse::Ignore]);
    let settings = SyncSettings {
        verify_copied_files: true,
        ..Default::default()
    };
    run_pair(tree, PairSyncConfig::default(), settings, &fs, &reporter).await;

    // the corrupted target was removed and the failure surfaced once
    assert!(!fs.exists("/R/a.txt"));
    let prompts = reporter.prompted_errors.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(
        prompts[0].contains("Data verification error"),
        "unexpected error message: {}",
        prompts[0]
    );
}

#[tokio::test]
async fn verification_retry_succeeds_on_clean_copy() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    fs.add_file("/L/a.txt", b"payload", 1);
    // only the first copy is corrupted; the retry writes clean content
    fs.corrupt_next_copy_to("/R/a.txt");

    let mut tree = base_pair("/L", "/R");
    tree.add_file(
        ContainerRef::Base,
        names("a.txt", ""),
        BySide::new(file_attrs(7, 1), None),
        SyncOperation::CreateRight,
    );

    let reporter = RecordingReporter::new();
    reporter.script_responses(&[ErrorResponse::Retry]);
    let settings = SyncSettings {
        verify_copied_files: true,
        ..Default::default()
    };
    run_pair(tree, PairSyncConfig::default(), settings, &fs, &reporter).await;

    assert_eq!(fs.content("/R/a.txt").as_deref(), Some(&b"payload"[..]));
}

#[tokio::test]
async fn vanished_source_file_is_skipped_without_error() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    // /L/ghost.txt was seen by the comparison but is gone now
    fs.add_file("/L/other.txt", b"other", 1);

    let mut tree = base_pair("/L", "/R");
    tree.add_file(
        ContainerRef::Base,
        names("ghost.txt", ""),
        BySide::new(file_attrs(5, 1), None),
        SyncOperation::CreateRight,
    );
    tree.add_file(
        ContainerRef::Base,
        names("other.txt", ""),
        BySide::new(file_attrs(5, 1), None),
        SyncOperation::CreateRight,
    );

    let reporter = RecordingReporter::new();
    let tree = run_pair(
        tree,
        PairSyncConfig::default(),
        SyncSettings::default(),
        &fs,
        &reporter,
    )
    .await;

    // no retry prompt; the sibling still synced
    assert!(reporter.prompted_errors.lock().unwrap().is_empty());
    assert!(reporter.log_contains("Source item /L/ghost.txt not found"));
    assert!(fs.exists("/R/other.txt"));
    // the vanished entry was pruned from the tree
    assert_eq!(tree.children(ContainerRef::Base).files.len(), 1);
}

#[tokio::test]
async fn case_only_difference_renames_without_copying() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    fs.add_file("/L/Readme.MD", b"docs", 5);
    fs.add_file("/R/readme.md", b"docs", 5);

    let mut tree = base_pair("/L", "/R");
    tree.add_file(
        ContainerRef::Base,
        names("Readme.MD", "readme.md"),
        BySide::new(file_attrs(4, 5), file_attrs(4, 5)),
        SyncOperation::CopyMetadataRight,
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
    assert!(
        ops.iter().any(|o| o == "rename /R/readme.md -> /R/Readme.MD"),
        "expected case rename, got {ops:?}"
    );
    assert!(
        !ops.iter().any(|o| o.starts_with("copy_file")),
        "metadata sync must not copy content: {ops:?}"
    );
    assert_eq!(fs.content("/R/Readme.MD").as_deref(), Some(&b"docs"[..]));
}

#[tokio::test]
async fn statistics_balance_at_completion() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    fs.add_file("/L/a.txt", b"12345", 1);
    fs.add_file("/L/b.txt", b"abc", 2);
    fs.add_file("/R/c.txt", b"zz", 3);

    let mut tree = base_pair("/L", "/R");
    tree.add_file(
        ContainerRef::Base,
        names("a.txt", ""),
        BySide::new(file_attrs(5, 1), None),
        SyncOperation::CreateRight,
    );
    tree.add_file(
        ContainerRef::Base,
        names("b.txt", ""),
        BySide::new(file_attrs(3, 2), None),
        SyncOperation::CreateRight,
    );
    tree.add_file(
        ContainerRef::Base,
        names("", "c.txt"),
        BySide::new(None, file_attrs(2, 3)),
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

    // every scheduled operation completed: processed equals the corrected
    // total, and nothing was processed beyond it
    let processed = *reporter.processed.lock().unwrap();
    let total = *reporter.total.lock().unwrap();
    assert_eq!(processed, total);
    assert_eq!(processed.0, 3);
    assert_eq!(processed.1, 8); // 5 + 3 copied bytes, deletions are free
}
