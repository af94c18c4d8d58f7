//! Top-level orchestration of a synchronization run.
//!
//! Before any filesystem mutation, every base pair is classified and a
//! series of cheap checks runs: identical or empty base paths, base
//! folders that dropped off the network since comparison, deletions from a
//! source that was never available (data-loss protection), missing
//! versioning folders. Findings that do not disqualify a pair are batched
//! into dismissible warnings (unresolved conflicts, significantly
//! different folders, low disk space, missing recycle bin, interdependent
//! base folders, versioning folder inside a base folder).
//!
//! Each remaining pair then gets its two deletion handlers, its worker
//! count from the per-device parallelism table, and a three-pass run; trash
//! buffers are flushed and empty placeholder entries pruned afterwards,
//! also when the run aborted. When a pair is configured to save the sync
//! database, the save also happens on failure paths so the next comparison
//! sees the partial progress.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use twinfold_core::config::{DeletionPolicy, PairSyncConfig, SyncSettings};
use twinfold_core::domain::{
    BaseFolderPair, FileError, PathFilter, RelPath, Side, SyncAborted, SyncPath,
};
use twinfold_core::ports::{
    CleanupError, ErrorResponse, FileSystem, ProgressReporter, SaveStatusNotify, SyncStateStore,
    Warning,
};

use crate::deletion::DeletionHandler;
use crate::pair_sync::{run_sync, SyncContext};
use crate::space::DiskSpaceEstimator;
use crate::stats::SyncStatistics;

/// A synchronization run failed as a whole. Per-item failures never
/// surface here; they are handled through the reporter's retry prompts.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Aborted(#[from] SyncAborted),
    #[error("contract violation: {0}")]
    Contract(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairJob {
    Process,
    AlreadyInSync,
    Skip,
}

/// Runs `op` in a retry loop, prompting the user through the reporter.
/// `Ok(Err(e))` means the user chose to ignore the error.
async fn with_error_prompt<T, F, Fut>(
    reporter: &dyn ProgressReporter,
    mut op: F,
) -> Result<Result<T, FileError>, SyncAborted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FileError>>,
{
    for retry_number in 0.. {
        match op().await {
            Ok(value) => return Ok(Ok(value)),
            Err(error) => match reporter.report_error(&error.to_string(), retry_number).await? {
                ErrorResponse::Retry => continue,
                ErrorResponse::Ignore => return Ok(Err(error)),
            },
        }
    }
    unreachable!("retry loop only exits through return")
}

/// True when more than half of the pair's rows (and at least ten) are
/// creations or deletions — the user may have selected the wrong folders.
/// Initial population of an empty side is exempt.
fn significant_difference_detected(stats: &SyncStatistics) -> bool {
    if (stats.create_count(Side::Left) == 0 || stats.create_count(Side::Right) == 0)
        && stats.update_total() == 0
        && stats.delete_total() == 0
        && stats.conflict_count() == 0
    {
        return false;
    }
    let non_matching = stats.create_total() + stats.delete_total();
    non_matching >= 10 && non_matching as f64 > 0.5 * stats.row_count() as f64
}

/// Parent/child relation between two configured locations, honoring the
/// parent's exclusion filter.
fn path_dependency(
    lhs: &SyncPath,
    lhs_filter: &PathFilter,
    rhs: &SyncPath,
    rhs_filter: &PathFilter,
) -> Option<(SyncPath, SyncPath)> {
    if lhs.contains(rhs) {
        let rel = lhs.rel_to(rhs)?;
        lhs_filter.passes(&rel).then(|| (lhs.clone(), rhs.clone()))
    } else if rhs.contains(lhs) {
        let rel = rhs.rel_to(lhs)?;
        rhs_filter.passes(&rel).then(|| (rhs.clone(), lhs.clone()))
    } else {
        None
    }
}

async fn base_folder_drop(
    tree: &BaseFolderPair,
    side: Side,
    fs: &Arc<dyn FileSystem>,
    reporter: &dyn ProgressReporter,
) -> Result<bool, SyncAborted> {
    let path = tree.base_path(side);
    if path.is_null() || !tree.is_available(side) {
        return Ok(false);
    }
    let check = with_error_prompt(reporter, move || async move {
        match fs.item_type_if_exists(path).await? {
            Some(_) => Ok(()),
            None => Err(FileError::new(format!("Cannot find folder {path}."))),
        }
    })
    .await?;
    Ok(check.is_err())
}

/// Creates a missing base folder. Returns `false` when the pair must be
/// skipped: the folder reappeared by itself (temporary network drop — the
/// comparison was built on false assumptions) or the user gave up on the
/// creation error.
async fn create_base_folder(
    tree: &mut BaseFolderPair,
    side: Side,
    fs: &Arc<dyn FileSystem>,
    reporter: &dyn ProgressReporter,
) -> Result<bool, SyncAborted> {
    let path = tree.base_path(side).clone();
    if path.is_null() || tree.is_available(side) {
        return Ok(true);
    }
    let path_ref = &path;
    let outcome = with_error_prompt(reporter, move || async move {
        match fs.item_type_if_exists(path_ref).await? {
            None => {
                fs.create_folder_if_missing_recursive(path_ref).await?;
                Ok(false)
            }
            Some(_) => Ok(true), // reappeared
        }
    })
    .await?;
    match outcome {
        Ok(true) => {
            reporter
                .report_fatal_error(&format!("Target folder {path} already existing."))
                .await?;
            Ok(false)
        }
        Ok(false) => {
            tree.set_available(side, true);
            Ok(true)
        }
        Err(_ignored) => Ok(false),
    }
}

async fn cleanup_graceful(
    handler: &DeletionHandler,
    reporter: &dyn ProgressReporter,
) -> Result<(), SyncAborted> {
    for retry_number in 0.. {
        match handler.try_cleanup(reporter, true).await {
            Ok(()) => return Ok(()),
            Err(CleanupError::Aborted(aborted)) => return Err(aborted),
            Err(CleanupError::File(error)) => {
                match reporter.report_error(&error.to_string(), retry_number).await? {
                    ErrorResponse::Retry => continue,
                    ErrorResponse::Ignore => return Ok(()),
                }
            }
        }
    }
    unreachable!("retry loop only exits through return")
}

struct SaveStatus<'a> {
    reporter: &'a dyn ProgressReporter,
    silent: bool,
}

#[async_trait::async_trait]
impl SaveStatusNotify for SaveStatus<'_> {
    async fn on_status(&self, msg: &str) -> Result<(), SyncAborted> {
        if self.silent {
            let _ = self.reporter.report_status(msg).await;
            Ok(())
        } else {
            self.reporter.report_status(msg).await
        }
    }
}

async fn save_db_silent(
    store: &Arc<dyn SyncStateStore>,
    tree: &BaseFolderPair,
    reporter: &dyn ProgressReporter,
) {
    let notify = SaveStatus {
        reporter,
        silent: true,
    };
    if let Err(error) = store.save_synchronous_state(tree, &notify).await {
        warn!(%error, "saving sync database failed on abort path");
    }
}

/// Synchronizes all base pairs of a comparison, in order.
///
/// `pair_configs` must have one entry per base pair. The tree is updated
/// in place: after a successful run every item reflects either its synced
/// state or, for ignored errors, its pre-sync state.
#[allow(clippy::too_many_arguments)]
pub async fn synchronize(
    start_time: DateTime<Utc>,
    settings: &SyncSettings,
    pair_configs: &[PairSyncConfig],
    folder_cmp: &mut Vec<BaseFolderPair>,
    fs: Arc<dyn FileSystem>,
    state_store: Option<Arc<dyn SyncStateStore>>,
    reporter: &dyn ProgressReporter,
) -> Result<(), SyncError> {
    if pair_configs.len() != folder_cmp.len() {
        let msg = format!(
            "{} pair configs for {} folder pairs",
            pair_configs.len(),
            folder_cmp.len()
        );
        let _ = reporter.report_fatal_error(&msg).await;
        let _ = reporter.abort_process_now().await;
        return Err(SyncError::Contract(msg));
    }

    // aggregate the workload upfront so the UI initializes correctly
    let pair_stats: Vec<SyncStatistics> =
        folder_cmp.iter().map(SyncStatistics::of_base_pair).collect();
    let items_total: i64 = pair_stats.iter().map(|s| s.cud_total()).sum();
    let bytes_total: i64 = pair_stats.iter().map(|s| s.bytes_to_process()).sum();
    reporter.init_new_phase(items_total, bytes_total);
    info!(items_total, bytes_total, pairs = folder_cmp.len(), "starting synchronization");

    // ---- basic checks, all before the first mutation -----------------------

    let mut job_types = vec![PairJob::Process; folder_cmp.len()];
    let mut unresolved_conflicts: Vec<(RelPath, String)> = Vec::new();
    let mut significant_diff_pairs: Vec<(SyncPath, SyncPath)> = Vec::new();
    let mut disk_space_missing: Vec<(SyncPath, i64, u64)> = Vec::new();
    let mut recycler_supported: HashMap<SyncPath, bool> = HashMap::new();
    let mut read_write_check: Vec<(SyncPath, PathFilter, bool)> = Vec::new();
    let mut version_check_paths: Vec<SyncPath> = Vec::new();
    let mut version_check_bases: Vec<(SyncPath, PathFilter)> = Vec::new();

    for (index, tree) in folder_cmp.iter().enumerate() {
        let cfg = &pair_configs[index];
        let stats = &pair_stats[index];

        for conflict in stats.conflicts() {
            unresolved_conflicts
                .push((conflict.relative_path.clone(), conflict.message.clone()));
        }

        // a pair syncing a folder onto itself is silently skipped
        if tree.base_path(Side::Left) == tree.base_path(Side::Right) {
            job_types[index] = PairJob::Skip;
            continue;
        }

        // nothing to do: no base folder creation either, but the database
        // may still need updating
        if stats.cud_total() == 0 {
            job_types[index] = PairJob::AlreadyInSync;
            continue;
        }

        let writes_left = stats.create_count(Side::Left)
            + stats.update_count(Side::Left)
            + stats.delete_count(Side::Left)
            > 0;
        let writes_right = stats.create_count(Side::Right)
            + stats.update_count(Side::Right)
            + stats.delete_count(Side::Right)
            > 0;

        // an empty folder field is only allowed as pure source
        if (tree.base_path(Side::Left).is_null() && (writes_left || cfg.save_sync_db))
            || (tree.base_path(Side::Right).is_null() && (writes_right || cfg.save_sync_db))
        {
            reporter
                .report_fatal_error("Target folder input field must not be empty.")
                .await?;
            job_types[index] = PairJob::Skip;
            continue;
        }

        // catch network drops early instead of failing on every item
        if base_folder_drop(tree, Side::Left, &fs, reporter).await?
            || base_folder_drop(tree, Side::Right, &fs, reporter).await?
        {
            job_types[index] = PairJob::Skip;
            continue;
        }

        // propagate deletions only from a null or available source: a
        // permanently dropped source folder must not wipe the other side
        let mut source_missing = false;
        for side in [Side::Left, Side::Right] {
            if !tree.base_path(side).is_null()
                && stats.delete_total() > 0
                && !tree.is_available(side)
            {
                reporter
                    .report_fatal_error(&format!(
                        "Source folder {} not found.",
                        tree.base_path(side)
                    ))
                    .await?;
                source_missing = true;
                break;
            }
        }
        if source_missing {
            job_types[index] = PairJob::Skip;
            continue;
        }

        if cfg.handle_deletion == DeletionPolicy::Versioning {
            let versioning_path = SyncPath::new(cfg.versioning_folder_phrase.as_str());
            if versioning_path.is_null() {
                reporter
                    .report_fatal_error("Please enter a target folder for versioning.")
                    .await?;
                job_types[index] = PairJob::Skip;
                continue;
            }
            if !version_check_paths.contains(&versioning_path) {
                version_check_paths.push(versioning_path);
            }
            version_check_bases
                .push((tree.base_path(Side::Left).clone(), tree.filter().clone()));
            version_check_bases
                .push((tree.base_path(Side::Right).clone(), tree.filter().clone()));
        }

        read_write_check.push((
            tree.base_path(Side::Left).clone(),
            tree.filter().clone(),
            writes_left,
        ));
        read_write_check.push((
            tree.base_path(Side::Right).clone(),
            tree.filter().clone(),
            writes_right,
        ));

        if !tree.base_path(Side::Left).is_null()
            && !tree.base_path(Side::Right).is_null()
            && significant_difference_detected(stats)
        {
            significant_diff_pairs.push((
                tree.base_path(Side::Left).clone(),
                tree.base_path(Side::Right).clone(),
            ));
        }

        // free-space estimate is advisory; backend errors are not
        let needed = DiskSpaceEstimator::calculate(tree);
        for (side, needed) in [(Side::Left, needed.left), (Side::Right, needed.right)] {
            let path = tree.base_path(side);
            if path.is_null() || needed <= 0 {
                continue;
            }
            if let Ok(Some(free)) = fs.free_disk_space(path).await {
                if free > 0 && (free as i64) < needed {
                    disk_space_missing.push((path.clone(), needed, free));
                }
            }
        }

        if cfg.handle_deletion == DeletionPolicy::Trash {
            for side in [Side::Left, Side::Right] {
                if !stats.expects_physical_delete(side) {
                    continue;
                }
                let path = tree.base_path(side).clone();
                if path.is_null() || recycler_supported.contains_key(&path) {
                    continue;
                }
                reporter
                    .report_status(&format!(
                        "Checking recycle bin availability for folder {path}..."
                    ))
                    .await?;
                let fs_ref = &fs;
                let path_ref = &path;
                let supported = with_error_prompt(reporter, move || async move {
                    fs_ref.supports_recycle_bin(path_ref).await
                })
                .await?
                .unwrap_or(false);
                recycler_supported.insert(path, supported);
            }
        }
    }

    // ---- batched warnings ---------------------------------------------------

    if !unresolved_conflicts.is_empty() {
        let mut msg =
            "The following items have unresolved conflicts and will not be synchronized:"
                .to_string();
        for (rel_path, item_msg) in &unresolved_conflicts {
            msg.push_str(&format!("\n\n{rel_path}: {item_msg}"));
        }
        reporter
            .report_warning(&msg, Warning::UnresolvedConflicts)
            .await?;
    }

    if !significant_diff_pairs.is_empty() {
        let mut msg = "The following folders are significantly different. \
                       Please check that the correct folders are selected for synchronization."
            .to_string();
        for (left, right) in &significant_diff_pairs {
            msg.push_str(&format!("\n\n{left} <-> \n{right}"));
        }
        reporter
            .report_warning(&msg, Warning::SignificantDifference)
            .await?;
    }

    if !disk_space_missing.is_empty() {
        let mut msg = "Not enough free disk space available in:".to_string();
        for (path, needed, available) in &disk_space_missing {
            msg.push_str(&format!(
                "\n\n{path}\nRequired: {needed} bytes\nAvailable: {available} bytes"
            ));
        }
        reporter
            .report_warning(&msg, Warning::NotEnoughDiskSpace)
            .await?;
    }

    {
        let mut unsupported = String::new();
        for (path, supported) in &recycler_supported {
            if !supported {
                unsupported.push_str(&format!("\n{path}"));
            }
        }
        if !unsupported.is_empty() {
            reporter
                .report_warning(
                    &format!(
                        "The recycle bin is not supported by the following folders. \
                         Deleted or overwritten files will not be able to be restored:\n{unsupported}"
                    ),
                    Warning::RecycleBinUnavailable,
                )
                .await?;
        }
    }

    // race condition: multiple pairs accessing one folder, at least one
    // of them writing
    {
        let mut dependent: Vec<SyncPath> = Vec::new();
        for (i, (path_a, filter_a, write_a)) in read_write_check.iter().enumerate() {
            if !write_a {
                continue;
            }
            for (j, (path_b, filter_b, write_b)) in read_write_check.iter().enumerate() {
                if i == j || (*write_b && i > j) {
                    continue;
                }
                if let Some((parent, child)) =
                    path_dependency(path_a, filter_a, path_b, filter_b)
                {
                    if !dependent.contains(&parent) {
                        dependent.push(parent);
                    }
                    if !dependent.contains(&child) {
                        dependent.push(child);
                    }
                }
            }
        }
        if !dependent.is_empty() {
            let mut msg = "Some files will be synchronized as part of multiple base folders.\n\
                           To avoid conflicts, set up exclude filters so that each updated \
                           file is considered by only one base folder.\n"
                .to_string();
            for path in &dependent {
                msg.push_str(&format!("\n{path}"));
            }
            reporter
                .report_warning(&msg, Warning::DependentBaseFolders)
                .await?;
        }
    }

    {
        let mut msg = String::new();
        for versioning_path in &version_check_paths {
            for (base_path, base_filter) in &version_check_bases {
                if let Some((parent, _child)) = path_dependency(
                    versioning_path,
                    &PathFilter::default(),
                    base_path,
                    base_filter,
                ) {
                    msg.push_str(&format!(
                        "\n\nVersioning folder: {versioning_path}\nBase folder: {base_path}"
                    ));
                    if &parent == base_path {
                        if let Some(rel) = base_path.rel_to(versioning_path) {
                            msg.push_str(&format!("\nExclude: {rel}"));
                        }
                    }
                }
            }
        }
        if !msg.is_empty() {
            reporter
                .report_warning(
                    &format!(
                        "The versioning folder is contained in a base folder.\n\
                         The folder should be excluded from synchronization via filter.{msg}"
                    ),
                    Warning::VersioningFolderPartOfSync,
                )
                .await?;
        }
    }

    // ---- execute pairs ------------------------------------------------------

    let errors_mod_time: Arc<StdMutex<Vec<FileError>>> = Arc::new(StdMutex::new(Vec::new()));

    for index in 0..folder_cmp.len() {
        if job_types[index] == PairJob::Skip {
            continue;
        }
        let cfg = &pair_configs[index];
        let stats = &pair_stats[index];

        reporter
            .report_info(&format!(
                "Synchronizing folder pair: {}\n    {}\n    {}",
                cfg.sync_variant.display_name(),
                folder_cmp[index].base_path(Side::Left),
                folder_cmp[index].base_path(Side::Right),
            ))
            .await?;

        // a long time may have passed since the checks above
        if base_folder_drop(&folder_cmp[index], Side::Left, &fs, reporter).await?
            || base_folder_drop(&folder_cmp[index], Side::Right, &fs, reporter).await?
        {
            continue;
        }

        if stats.create_total() > 0 || cfg.save_sync_db {
            let created_left =
                create_base_folder(&mut folder_cmp[index], Side::Left, &fs, reporter).await?;
            let created_right =
                create_base_folder(&mut folder_cmp[index], Side::Right, &fs, reporter).await?;
            if !created_left || !created_right {
                continue;
            }
        }

        if job_types[index] == PairJob::Process {
            let left_path = folder_cmp[index].base_path(Side::Left).clone();
            let right_path = folder_cmp[index].base_path(Side::Right).clone();

            // copy permissions only when asked for and supported by both
            // sides
            let fs_ref = &fs;
            let left_ref = &left_path;
            let right_ref = &right_path;
            let copy_permissions = settings.copy_file_permissions
                && !left_path.is_null()
                && !right_path.is_null()
                && with_error_prompt(reporter, move || async move {
                    fs_ref.supports_permission_copy(left_ref, right_ref).await
                })
                .await?
                .unwrap_or(false);

            let effective_policy = |base_path: &SyncPath| -> DeletionPolicy {
                if cfg.handle_deletion == DeletionPolicy::Trash {
                    if let Some(false) = recycler_supported.get(base_path) {
                        // no recycler on this device: a faster direct
                        // deletion beats silently losing the items
                        return DeletionPolicy::Permanent;
                    }
                }
                cfg.handle_deletion
            };

            let del_handler_left = DeletionHandler::new(
                fs.clone(),
                left_path.clone(),
                effective_policy(&left_path),
                &cfg.versioning_folder_phrase,
                cfg.versioning_style,
                start_time,
            );
            let del_handler_right = DeletionHandler::new(
                fs.clone(),
                right_path.clone(),
                effective_policy(&right_path),
                &cfg.versioning_folder_phrase,
                cfg.versioning_style,
                start_time,
            );

            let parallel_ops = |path: &SyncPath| -> usize {
                settings
                    .device_parallel_ops
                    .get(&path.device_root())
                    .copied()
                    .unwrap_or(1)
                    .max(1)
            };
            let thread_count = parallel_ops(&left_path).max(parallel_ops(&right_path));
            debug!(thread_count, "running folder pair");

            let ctx = Arc::new(SyncContext {
                fs: fs.clone(),
                verify_copied_files: settings.verify_copied_files,
                copy_permissions,
                fail_safe_copy: settings.fail_safe_file_copy,
                errors_mod_time: errors_mod_time.clone(),
                del_handler_left,
                del_handler_right,
                thread_count,
                poll_interval: Duration::from_millis(settings.status_poll_interval_ms.max(1)),
            });

            let shared = Arc::new(Mutex::new(std::mem::take(&mut folder_cmp[index])));
            let run_result = run_sync(ctx.clone(), shared.clone(), reporter).await;

            // cleanup always runs; on the abort path the status callback
            // must not raise again and leave the flush incomplete
            match &run_result {
                Ok(()) => {
                    cleanup_graceful(&ctx.del_handler_left, reporter).await?;
                    cleanup_graceful(&ctx.del_handler_right, reporter).await?;
                }
                Err(_) => {
                    if let Err(error) = ctx.del_handler_left.try_cleanup(reporter, false).await {
                        warn!(%error, "trash cleanup failed during abort");
                    }
                    if let Err(error) = ctx.del_handler_right.try_cleanup(reporter, false).await {
                        warn!(%error, "trash cleanup failed during abort");
                    }
                }
            }

            let mut tree = match Arc::try_unwrap(shared) {
                Ok(mutex) => mutex.into_inner(),
                Err(arc) => arc.lock().await.clone(),
            };
            // drop entries that became empty on both sides
            tree.prune_empty();
            folder_cmp[index] = tree;

            if let Err(aborted) = run_result {
                if cfg.save_sync_db {
                    if let Some(store) = &state_store {
                        save_db_silent(store, &folder_cmp[index], reporter).await;
                    }
                }
                return Err(aborted.into());
            }
        }

        if cfg.save_sync_db {
            if let Some(store) = &state_store {
                reporter.report_status("Generating database...").await?;
                reporter.force_ui_refresh().await?;

                let store_ref = store;
                let tree_ref = &folder_cmp[index];
                let save = with_error_prompt(reporter, move || async move {
                    let notify = SaveStatus {
                        reporter,
                        silent: false,
                    };
                    store_ref
                        .save_synchronous_state(tree_ref, &notify)
                        .await
                })
                .await;
                match save {
                    Ok(saved) => {
                        if let Err(error) = saved {
                            warn!(%error, "sync database save skipped");
                        }
                    }
                    Err(aborted) => {
                        // the user cancelled during the write: still leave
                        // a consistent database behind
                        save_db_silent(store, &folder_cmp[index], reporter).await;
                        return Err(aborted.into());
                    }
                }
            }
        }
    }

    // ---- end-of-run warnings ------------------------------------------------

    let mod_time_errors = errors_mod_time
        .lock()
        .expect("mod-time error mutex poisoned")
        .clone();
    if !mod_time_errors.is_empty() {
        let msg = mod_time_errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n\n");
        reporter
            .report_warning(&msg, Warning::ModificationTimeError)
            .await?;
    }

    info!("synchronization finished");
    Ok(())
}
