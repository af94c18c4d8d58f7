//! Move detection execution: plain renames, moves entangled with parent
//! deletions, the two-step fallback, and demotion to copy + delete.

use twinfold_core::config::{PairSyncConfig, SyncSettings, TEMP_FILE_SUFFIX};
use twinfold_core::domain::{BySide, ContainerRef, FolderAttributes, Side, SyncOperation};
use twinfold_core::ports::ErrorResponse;

use crate::common::{base_pair, file_attrs, names, run_pair, MemFileSystem, RecordingReporter};

#[tokio::test]
async fn detected_rename_executes_as_single_rename() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    fs.add_file("/L/a.txt", &[b'q'; 100], 1);
    fs.add_file("/R/b.txt", &[b'q'; 100], 1);

    let mut tree = base_pair("/L", "/R");
    let from = tree.add_file(
        ContainerRef::Base,
        names("a.txt", ""),
        BySide::new(file_attrs(100, 1), None),
        SyncOperation::DoNothing,
    );
    let to = tree.add_file(
        ContainerRef::Base,
        names("", "b.txt"),
        BySide::new(None, file_attrs(100, 1)),
        SyncOperation::DoNothing,
    );
    tree.link_move_pair(from, to, Side::Left);

    let reporter = RecordingReporter::new();
    let tree = run_pair(
        tree,
        PairSyncConfig {
            detect_moved_files: true,
            ..Default::default()
        },
        SyncSettings::default(),
        &fs,
        &reporter,
    )
    .await;

    let ops = fs.ops();
    assert_eq!(ops, vec!["rename /L/a.txt -> /L/b.txt".to_string()]);
    assert!(fs.exists("/L/b.txt"));
    assert!(!fs.exists("/L/a.txt"));

    // one item processed, zero bytes: a move transfers no content
    assert_eq!(reporter.processed_items(), 1);
    assert_eq!(reporter.processed_bytes(), 0);

    // the pair collapsed into one fully synced entry
    let files = &tree.children(ContainerRef::Base).files;
    assert_eq!(files.len(), 1);
    let synced = tree.file(files[0]).unwrap();
    assert_eq!(synced.op(), SyncOperation::Equal);
    assert_eq!(synced.item_name(Side::Left), "b.txt");
}

#[tokio::test]
async fn move_out_of_deleted_folder_resolves_in_pass_zero() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    fs.add_folder("/L/old");
    fs.add_file("/L/old/a.txt", &[b'm'; 50], 1);
    fs.add_folder("/R/new");
    fs.add_file("/R/new/b.txt", &[b'm'; 50], 1);

    let mut tree = base_pair("/L", "/R");
    // /L/old is going away; its content was renamed to /L/new/b.txt on
    // the other side
    let old_folder = tree.add_folder(
        ContainerRef::Base,
        names("old", ""),
        BySide::new(Some(FolderAttributes::default()), None),
        SyncOperation::DeleteLeft,
    );
    let from = tree.add_file(
        ContainerRef::Folder(old_folder),
        names("a.txt", ""),
        BySide::new(file_attrs(50, 1), None),
        SyncOperation::DoNothing,
    );
    let new_folder = tree.add_folder(
        ContainerRef::Base,
        names("", "new"),
        BySide::new(None, Some(FolderAttributes::default())),
        SyncOperation::CreateLeft,
    );
    let to = tree.add_file(
        ContainerRef::Folder(new_folder),
        names("", "b.txt"),
        BySide::new(None, file_attrs(50, 1)),
        SyncOperation::DoNothing,
    );
    tree.link_move_pair(from, to, Side::Left);

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
    let create_parent = ops
        .iter()
        .position(|o| o.contains("copy_new_folder /R/new -> /L/new"))
        .expect("target parent must be created in pass zero");
    let rename = ops
        .iter()
        .position(|o| o.contains("rename /L/old/a.txt -> /L/new/b.txt"))
        .expect("move must execute as a rename");
    let delete_old = ops
        .iter()
        .position(|o| o.contains("remove /L/old"))
        .expect("emptied source folder must be deleted");

    assert!(create_parent < rename, "{ops:?}");
    assert!(rename < delete_old, "{ops:?}");
    assert!(fs.exists("/L/new/b.txt"));
    assert!(!fs.exists("/L/old"));
}

#[tokio::test]
async fn target_name_clash_falls_back_to_two_step_move() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    fs.add_folder("/L/old");
    fs.add_file("/L/old/a.txt", b"content", 1);
    fs.add_symlink("/L/b", "/somewhere", 1);
    fs.add_file("/R/b", b"content", 1);

    let mut tree = base_pair("/L", "/R");
    // the source's parent is going away, and the final name "b" is still
    // occupied by a symlink that pass one will delete
    let old_folder = tree.add_folder(
        ContainerRef::Base,
        names("old", ""),
        BySide::new(Some(FolderAttributes::default()), None),
        SyncOperation::DeleteLeft,
    );
    let from = tree.add_file(
        ContainerRef::Folder(old_folder),
        names("a.txt", ""),
        BySide::new(file_attrs(7, 1), None),
        SyncOperation::DoNothing,
    );
    let to = tree.add_file(
        ContainerRef::Base,
        names("", "b"),
        BySide::new(None, file_attrs(7, 1)),
        SyncOperation::DoNothing,
    );
    tree.link_move_pair(from, to, Side::Left);
    tree.add_symlink(
        ContainerRef::Base,
        names("b", ""),
        BySide::new(
            Some(twinfold_core::domain::LinkAttributes { mtime: 1 }),
            None,
        ),
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

    let ops = fs.ops();
    let interim_rename = ops
        .iter()
        .position(|o| o.starts_with("rename /L/old/a.txt -> /L/") && o.contains(TEMP_FILE_SUFFIX))
        .unwrap_or_else(|| panic!("expected interim rename, got {ops:?}"));
    let link_removal = ops
        .iter()
        .position(|o| o.contains("remove_symlink /L/b"))
        .expect("clashing symlink must be deleted in pass one");
    let final_rename = ops
        .iter()
        .position(|o| o.contains("-> /L/b") && o.contains(TEMP_FILE_SUFFIX))
        .expect("second step must move interim to final name");

    assert!(interim_rename < link_removal, "{ops:?}");
    assert!(link_removal < final_rename, "{ops:?}");

    assert_eq!(fs.content("/L/b").as_deref(), Some(&b"content"[..]));
    assert!(!fs.exists("/L/old"));
    // no interim remnants
    let leftovers: Vec<String> = fs
        .inner
        .entries
        .lock()
        .unwrap()
        .keys()
        .filter(|p| p.to_string_lossy().contains(TEMP_FILE_SUFFIX))
        .map(|p| p.display().to_string())
        .collect();
    assert!(leftovers.is_empty(), "interim files left behind: {leftovers:?}");
}

#[tokio::test]
async fn failed_move_demotes_to_copy_and_delete() {
    let fs = MemFileSystem::new();
    fs.add_folder("/L");
    fs.add_folder("/R");
    fs.add_folder("/L/old");
    fs.add_file("/L/old/a.txt", b"payload!", 1);
    fs.add_file("/R/b.txt", b"payload!", 1);
    // the pass-zero rename fails once; the user gives up on it
    fs.fail_next_rename_from("/L/old/a.txt");

    let mut tree = base_pair("/L", "/R");
    let old_folder = tree.add_folder(
        ContainerRef::Base,
        names("old", ""),
        BySide::new(Some(FolderAttributes::default()), None),
        SyncOperation::DeleteLeft,
    );
    let from = tree.add_file(
        ContainerRef::Folder(old_folder),
        names("a.txt", ""),
        BySide::new(file_attrs(8, 1), None),
        SyncOperation::DoNothing,
    );
    let to = tree.add_file(
        ContainerRef::Base,
        names("", "b.txt"),
        BySide::new(None, file_attrs(8, 1)),
        SyncOperation::DoNothing,
    );
    tree.link_move_pair(from, to, Side::Left);

    let reporter = RecordingReporter::new();
    reporter.script_responses(&[ErrorResponse::Ignore]);
    run_pair(
        tree,
        PairSyncConfig::default(),
        SyncSettings::default(),
        &fs,
        &reporter,
    )
    .await;

    // one prompt for the failed rename, then ordinary copy + delete
    assert_eq!(reporter.prompted_errors.lock().unwrap().len(), 1);
    let ops = fs.ops();
    assert!(
        ops.iter().any(|o| o.contains("copy_file /R/b.txt -> /L/b.txt")),
        "demoted move must copy from the other side: {ops:?}"
    );
    assert!(fs.exists("/L/b.txt"));
    assert!(!fs.exists("/L/old"));
}
