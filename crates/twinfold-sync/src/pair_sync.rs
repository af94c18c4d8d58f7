//! Per-pair synchronization: the three-pass runner, move-conflict
//! resolution, and the per-entity sync logic.
//!
//! ## Move resolution, pass zero
//!
//! For every `Move*From` entry the paired target is inspected:
//!
//! 1. If the source is neither scheduled to lose its parent folder nor
//!    clashing with a sibling folder/symlink, the move rests until pass
//!    two processes the `Move*To` entry (after the target's parent
//!    exists).
//! 2. Otherwise the target's parent chain is created right away and the
//!    move executes immediately — unless the target name clashes too, in
//!    which case the source is renamed to a collision-resistant interim
//!    name in the base folder and a fresh entry carries the second step
//!    into pass two.
//! 3. If resolution fails for good (the user chose to ignore the error),
//!    the pair is demoted to ordinary delete + create and the statistics
//!    total is re-priced. This is the only place where the expected total
//!    grows mid-run.
//!
//! Hostile sequences this covers: `a -> a/a` (target inside a folder that
//! does not exist yet), `a/a -> a` (fixing the clash would remove the
//! source), and chained renames `c -> d, b -> c/b, a -> b/a`.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use twinfold_core::config::TEMP_FILE_SUFFIX;
use twinfold_core::domain::{
    BaseFolderPair, BySide, ContainerRef, FileError, FileSyncedState, ObjectId, RelPath, Side,
    StepError, StepResult, SyncAborted, SyncOperation, SyncPath,
};
use twinfold_core::ports::{
    CopyCallbacks, FileCopyResult, FileDescriptor, FileSystem, ProgressReporter, StreamAttributes,
};

use crate::coordinator::{try_reporting_error, AsyncCoordinator, StatReporter};
use crate::deletion::{
    fmt_path, fmt_paths, DeletionHandler, TXT_MOVING_FILE_X_TO_Y,
};
use crate::stats::SyncStatistics;
use crate::workload::{Pass, WorkItem, Workload};

const TXT_CREATING_FILE: &str = "Creating file %x";
const TXT_CREATING_LINK: &str = "Creating symbolic link %x";
const TXT_CREATING_FOLDER: &str = "Creating folder %x";
const TXT_UPDATING_FILE: &str = "Updating file %x";
const TXT_UPDATING_LINK: &str = "Updating symbolic link %x";
const TXT_VERIFYING_FILE: &str = "Verifying file %x";
const TXT_UPDATING_ATTRIBUTES: &str = "Updating attributes of %x";
const TXT_SOURCE_ITEM_NOT_FOUND: &str = "Source item %x not found";

/// Shared, immutable context of one base pair's synchronization.
pub(crate) struct SyncContext {
    pub fs: Arc<dyn FileSystem>,
    pub verify_copied_files: bool,
    pub copy_permissions: bool,
    pub fail_safe_copy: bool,
    /// Mod-time adjustment failures, batched into one warning per run.
    pub errors_mod_time: Arc<StdMutex<Vec<FileError>>>,
    pub del_handler_left: DeletionHandler,
    pub del_handler_right: DeletionHandler,
    pub thread_count: usize,
    pub poll_interval: Duration,
}

impl SyncContext {
    fn del_handler(&self, side: Side) -> &DeletionHandler {
        match side {
            Side::Left => &self.del_handler_left,
            Side::Right => &self.del_handler_right,
        }
    }
}

/// Runs the three passes over one base pair.
pub(crate) async fn run_sync(
    ctx: Arc<SyncContext>,
    tree: Arc<Mutex<BaseFolderPair>>,
    reporter: &dyn ProgressReporter,
) -> Result<(), SyncAborted> {
    for pass in [Pass::Zero, Pass::One, Pass::Two] {
        run_pass(pass, &ctx, &tree, reporter).await?;
    }
    Ok(())
}

/// One pass: spawns the worker tasks, drives the coordinator on the
/// current task, then cancels and joins the workers — also when the
/// reporter requested an abort, so no worker outlives the pass.
async fn run_pass(
    pass: Pass,
    ctx: &Arc<SyncContext>,
    tree: &Arc<Mutex<BaseFolderPair>>,
    reporter: &dyn ProgressReporter,
) -> Result<(), SyncAborted> {
    let thread_count = ctx.thread_count.max(1);
    debug!(?pass, thread_count, "starting sync pass");

    let token = CancellationToken::new();
    let (acb, inbox) = AsyncCoordinator::new(thread_count, token.clone());
    let workload = Arc::new(Workload::new(pass, thread_count, acb.clone()));

    let mut workers = Vec::with_capacity(thread_count);
    for thread_idx in 0..thread_count {
        let syncer = PairSynchronizer {
            ctx: ctx.clone(),
            tree: tree.clone(),
            workload: workload.clone(),
            acb: acb.clone(),
            token: token.clone(),
            thread_idx,
        };
        workers.push(tokio::spawn(async move { syncer.worker_loop().await }));
    }

    let result = acb
        .wait_until_done(inbox, ctx.poll_interval, reporter)
        .await;

    // interrupt first, then join: idle workers park inside the workload
    // and only wake through cancellation
    token.cancel();
    for worker in workers {
        let _ = worker.await;
    }
    debug!(?pass, "sync pass finished");
    result
}

pub(crate) struct PairSynchronizer {
    ctx: Arc<SyncContext>,
    tree: Arc<Mutex<BaseFolderPair>>,
    workload: Arc<Workload>,
    acb: Arc<AsyncCoordinator>,
    token: CancellationToken,
    thread_idx: usize,
}

impl PairSynchronizer {
    async fn worker_loop(&self) {
        self.acb.notify_work_begin(self.thread_idx);
        let result = self.process_items().await;
        self.acb.notify_work_end(self.thread_idx);
        match result {
            Err(StepError::Interrupted) => {
                trace!(thread_idx = self.thread_idx, "worker interrupted")
            }
            Err(StepError::File(error)) => {
                // per-item errors are consumed by the retry loop; anything
                // surfacing here slipped through a callback path
                warn!(thread_idx = self.thread_idx, %error, "worker stopped on error")
            }
            Ok(()) => unreachable!("worker loop only ends through interruption"),
        }
    }

    async fn process_items(&self) -> StepResult<()> {
        loop {
            let item = self
                .workload
                .get_next(self.thread_idx, &self.tree, &self.token)
                .await?;
            match item {
                WorkItem::SyncFolder(id) => {
                    try_reporting_error(&self.acb, self.thread_idx, || self.synchronize_folder(id))
                        .await?;
                    self.workload.add_folder_to_process(ContainerRef::Folder(id));
                }
                WorkItem::SyncFile(id) => {
                    try_reporting_error(&self.acb, self.thread_idx, || self.synchronize_file(id))
                        .await?;
                }
                WorkItem::SyncLink(id) => {
                    try_reporting_error(&self.acb, self.thread_idx, || self.synchronize_link(id))
                        .await?;
                }
                WorkItem::PrepareMove(id) => self.prepare_file_move(id).await?,
            }
        }
    }

    async fn report_info(&self, template: &str, path: &SyncPath) -> StepResult<()> {
        self.acb
            .report_info(&fmt_path(template, &path.to_string()), self.thread_idx)
            .await
    }

    async fn report_info2(
        &self,
        template: &str,
        from: &SyncPath,
        to: &SyncPath,
    ) -> StepResult<()> {
        self.acb
            .report_info(
                &fmt_paths(template, &from.to_string(), &to.to_string()),
                self.thread_idx,
            )
            .await
    }

    // ---- pass zero: move preparation ---------------------------------------

    async fn prepare_file_move(&self, id: ObjectId) -> StepResult<()> {
        let pair = {
            let tree = self.tree.lock().await;
            let Some(file) = tree.file(id) else {
                return Ok(());
            };
            let side = match file.op() {
                SyncOperation::MoveLeftFrom => Some(Side::Left),
                SyncOperation::MoveRightFrom => Some(Side::Right),
                _ => None,
            };
            side.and_then(|side| file.move_ref().map(|target| (side, target)))
        };
        let Some((side, target_id)) = pair else {
            return Ok(());
        };

        let ignored = try_reporting_error(&self.acb, self.thread_idx, || {
            self.resolve_move_conflicts(id, target_id, side)
        })
        .await?;

        if ignored.is_some() {
            // the move failed even after retries; the source's parent may
            // be deleted in pass one, so fall back to copy + delete and
            // re-price the expected totals accordingly
            let mut tree = self.tree.lock().await;
            let before_items = SyncStatistics::of_file(&tree, id).cud_total()
                + SyncStatistics::of_file(&tree, target_id).cud_total();
            let before_bytes = SyncStatistics::of_file(&tree, id).bytes_to_process()
                + SyncStatistics::of_file(&tree, target_id).bytes_to_process();

            tree.break_move_pair(id, target_id, side);

            let after_items = SyncStatistics::of_file(&tree, id).cud_total()
                + SyncStatistics::of_file(&tree, target_id).cud_total();
            let after_bytes = SyncStatistics::of_file(&tree, id).bytes_to_process()
                + SyncStatistics::of_file(&tree, target_id).bytes_to_process();

            self.acb
                .update_data_total(after_items - before_items, after_bytes - before_bytes);
            debug!("move pair demoted to copy + delete");
        }
        Ok(())
    }

    async fn resolve_move_conflicts(
        &self,
        source_id: ObjectId,
        target_id: ObjectId,
        side: Side,
    ) -> StepResult<()> {
        let (source_will_be_deleted, source_clash) = {
            let tree = self.tree.lock().await;
            let source_will_be_deleted = match tree.parent_of(source_id) {
                ContainerRef::Folder(parent) => tree
                    .folder(parent)
                    .map(|f| f.op().is_delete())
                    .unwrap_or(false),
                ContainerRef::Base => false,
            };
            (
                source_will_be_deleted,
                tree.name_clash_with_folders_or_links(source_id),
            )
        };

        if source_will_be_deleted || source_clash {
            let target_clash = {
                let tree = self.tree.lock().await;
                tree.name_clash_with_folders_or_links(target_id)
            };
            if target_clash || !self.create_parent_folder(target_id).await? {
                return self.setup_two_step_move(source_id, target_id, side).await;
            }
            // the move must appear as Move*To: execute through the target
            self.synchronize_file(target_id).await?;
        }
        // otherwise: the source is not in the way; pass two handles the
        // Move*To entry after the target's parent folder exists. This case
        // also covers interim entries created by the two-step sub-routine.
        Ok(())
    }

    /// Creates the ancestor folders of `id` root-down. Returns `false` when
    /// an ancestor's name clashes with a sibling file or symlink at any
    /// level — the caller falls back to a two-step move then.
    async fn create_parent_folder(&self, id: ObjectId) -> StepResult<bool> {
        let chain = {
            let tree = self.tree.lock().await;
            let mut chain = Vec::new();
            let mut container = tree.parent_of(id);
            while let ContainerRef::Folder(folder_id) = container {
                chain.push(folder_id);
                container = tree.parent_of(folder_id);
            }
            chain.reverse();
            chain
        };

        for folder_id in chain {
            let clash = {
                let tree = self.tree.lock().await;
                tree.name_clash_with_files_or_links(folder_id)
            };
            if clash {
                return Ok(false);
            }
            // a folder containing a move target is never scheduled for
            // deletion itself; this create is idempotent
            self.synchronize_folder(folder_id).await?;
        }
        Ok(true)
    }

    async fn setup_two_step_move(
        &self,
        source_id: ObjectId,
        target_id: ObjectId,
        side: Side,
    ) -> StepResult<()> {
        let (source_path, base_path, file_name, attrs) = {
            let tree = self.tree.lock().await;
            let Some(file) = tree.file(source_id) else {
                return Ok(());
            };
            (
                tree.abstract_path(source_id, side),
                tree.base_path(side).clone(),
                file.item_name(side).to_string(),
                file.attrs(side).cloned().unwrap_or_default(),
            )
        };

        let tmp_name = interim_move_name(&file_name);
        let tmp_path = base_path.join(&tmp_name);
        // a leftover interim file with the very same name on the other side
        // could at worst prevent that file's copy, never this move

        self.report_info2(TXT_MOVING_FILE_X_TO_Y, &source_path, &tmp_path)
            .await?;
        self.ctx.fs.rename_item(&source_path, &tmp_path).await?;

        {
            let mut tree = self.tree.lock().await;
            let name = match side {
                Side::Left => BySide::new(tmp_name.clone(), String::new()),
                Side::Right => BySide::new(String::new(), tmp_name.clone()),
            };
            let attrs_by_side = match side {
                Side::Left => BySide::new(Some(attrs), None),
                Side::Right => BySide::new(None, Some(attrs)),
            };
            let tmp_id = tree.add_file(
                ContainerRef::Base,
                name,
                attrs_by_side,
                SyncOperation::move_from(side),
            );
            // second step runs in pass two through the original target
            if let Some(target) = tree.file_mut(target_id) {
                target.set_move_ref(Some(tmp_id));
            }
            if let Some(tmp) = tree.file_mut(tmp_id) {
                tmp.set_move_ref(Some(target_id));
            }
            // remove only after the source's side data was captured above
            tree.remove_side(source_id, side);
        }
        // no statistics update: the logical operation count is unchanged
        self.acb.interruption_point()
    }

    // ---- per-entity sync: files --------------------------------------------

    async fn synchronize_file(&self, id: ObjectId) -> StepResult<()> {
        let op = {
            let tree = self.tree.lock().await;
            match tree.file(id) {
                Some(file) => file.op(),
                None => return Ok(()),
            }
        };
        let Some(target) = op.target_side() else {
            return Ok(());
        };
        use SyncOperation::*;
        match op {
            CreateLeft | CreateRight => self.create_file(id, target).await,
            DeleteLeft | DeleteRight => self.delete_file(id, target).await,
            MoveLeftTo | MoveRightTo => self.move_file_to(id, target).await,
            // a move source is executed through its Move*To partner, which
            // guarantees the target's parent directory exists
            MoveLeftFrom | MoveRightFrom => Ok(()),
            OverwriteLeft | OverwriteRight => self.overwrite_file(id, target).await,
            CopyMetadataLeft | CopyMetadataRight => self.copy_file_metadata(id, target).await,
            DoNothing | Equal | UnresolvedConflict => Ok(()),
        }
    }

    async fn create_file(&self, id: ObjectId, target: Side) -> StepResult<()> {
        let source = target.opposite();
        let (target_path, source_path, src_attrs, src_name, src_followed) = {
            let tree = self.tree.lock().await;
            let Some(file) = tree.file(id) else {
                return Ok(());
            };
            // if the parent-folder creation failed there is no reason to
            // report more errors for this subtree
            if let ContainerRef::Folder(parent) = tree.parent_of(id) {
                if let Some(parent) = tree.folder(parent) {
                    if !parent.exists_on(target) {
                        return Ok(());
                    }
                }
            }
            let attrs = file.attrs(source).cloned().unwrap_or_default();
            (
                tree.abstract_path(id, target),
                tree.abstract_path(id, source),
                attrs,
                file.item_name(source).to_string(),
                file.is_followed_symlink(source),
            )
        };

        self.report_info(TXT_CREATING_FILE, &target_path).await?;
        let reporter = StatReporter::new(1, src_attrs.file_size as i64, self.thread_idx, &self.acb);
        let stream_attrs = StreamAttributes {
            mtime: src_attrs.mtime,
            file_size: src_attrs.file_size,
            file_id: src_attrs.file_id.clone(),
        };

        match self
            .copy_file_with_callback(&source_path, &stream_attrs, &target_path, None, &reporter)
            .await
        {
            Ok(result) => {
                self.record_mod_time_error(&result);
                reporter.report_delta(1, 0)?;
                self.tree.lock().await.set_file_synced(
                    id,
                    target,
                    FileSyncedState {
                        item_name: src_name,
                        file_size: result.file_size,
                        mtime_target: result.dst_mtime,
                        mtime_source: result.src_mtime,
                        file_id_target: result.dst_file_id,
                        file_id_source: result.src_file_id,
                        followed_target: false,
                        followed_source: src_followed,
                    },
                );
                reporter.finish();
                Ok(())
            }
            Err(StepError::Interrupted) => Err(StepError::Interrupted),
            Err(StepError::File(error)) => {
                // not checking the type: a file that became a folder or
                // symlink must not be silently skipped
                let source_gone =
                    matches!(self.ctx.fs.item_type_if_exists(&source_path).await, Ok(None));
                if source_gone {
                    // the source vanished between comparison and sync;
                    // real I/O work was spent finding that out
                    reporter.report_delta(1, 0)?;
                    self.report_info(TXT_SOURCE_ITEM_NOT_FOUND, &source_path).await?;
                    self.tree.lock().await.remove_side(id, source);
                    reporter.finish();
                    Ok(())
                } else {
                    Err(StepError::File(error))
                }
            }
        }
    }

    async fn delete_file(&self, id: ObjectId, target: Side) -> StepResult<()> {
        let (path, attrs, rel_path) = {
            let tree = self.tree.lock().await;
            let Some(file) = tree.file(id) else {
                return Ok(());
            };
            (
                tree.abstract_path(id, target),
                file.attrs(target).cloned().unwrap_or_default(),
                tree.rel_path(id),
            )
        };
        let handler = self.ctx.del_handler(target);
        self.report_info(handler.txt_removing_file(), &path).await?;

        let reporter = StatReporter::new(1, 0, self.thread_idx, &self.acb);
        let descr = FileDescriptor {
            path,
            attrs: StreamAttributes {
                mtime: attrs.mtime,
                file_size: attrs.file_size,
                file_id: attrs.file_id,
            },
        };
        handler.remove_file(&descr, &rel_path, &reporter).await?;
        self.tree.lock().await.remove_side(id, target);
        reporter.finish();
        Ok(())
    }

    async fn move_file_to(&self, id: ObjectId, target: Side) -> StepResult<()> {
        let source = target.opposite();
        let gathered = {
            let tree = self.tree.lock().await;
            let Some(move_to) = tree.file(id) else {
                return Ok(());
            };
            let Some(from_id) = move_to.move_ref() else {
                debug!("move target without partner entry, skipping");
                return Ok(());
            };
            let Some(move_from) = tree.file(from_id) else {
                return Ok(());
            };
            (
                from_id,
                tree.abstract_path(from_id, target),
                tree.abstract_path(id, target),
                FileSyncedState {
                    item_name: move_to.item_name(source).to_string(),
                    file_size: move_to.file_size(source),
                    // the partner entry was renamed on the target side: its
                    // attributes describe the file now at the target path
                    mtime_target: move_from.attrs(target).map(|a| a.mtime).unwrap_or(0),
                    mtime_source: move_to.attrs(source).map(|a| a.mtime).unwrap_or(0),
                    file_id_target: move_from.attrs(target).and_then(|a| a.file_id.clone()),
                    file_id_source: move_to.attrs(source).and_then(|a| a.file_id.clone()),
                    followed_target: move_from.is_followed_symlink(target),
                    followed_source: move_to.is_followed_symlink(source),
                },
            )
        };
        let (from_id, path_from, path_to, synced) = gathered;

        self.report_info2(TXT_MOVING_FILE_X_TO_Y, &path_from, &path_to)
            .await?;
        let reporter = StatReporter::new(1, 0, self.thread_idx, &self.acb);

        self.ctx.fs.rename_item(&path_from, &path_to).await?;
        reporter.report_delta(1, 0)?;

        {
            let mut tree = self.tree.lock().await;
            tree.set_file_synced(id, target, synced);
            tree.remove_side(from_id, target);
        }
        reporter.finish();
        Ok(())
    }

    async fn overwrite_file(&self, id: ObjectId, target: Side) -> StepResult<()> {
        let source = target.opposite();
        let gathered = {
            let tree = self.tree.lock().await;
            let Some(file) = tree.file(id) else {
                return Ok(());
            };
            let parent_path = match tree.parent_of(id) {
                ContainerRef::Base => tree.base_path(target).clone(),
                ContainerRef::Folder(parent) => tree.abstract_path(parent, target),
            };
            let src_attrs = file.attrs(source).cloned().unwrap_or_default();
            let trg_attrs = file.attrs(target).cloned().unwrap_or_default();
            (
                tree.abstract_path(id, target),
                // respect case differences of the source object
                parent_path.join(file.item_name(source)),
                tree.abstract_path(id, source),
                tree.rel_path(id),
                file.item_name(target).to_string(),
                file.item_name(source).to_string(),
                src_attrs,
                trg_attrs,
                file.is_followed_symlink(target),
                file.is_followed_symlink(source),
            )
        };
        let (
            target_path_current,
            target_path_logical,
            source_path,
            rel_path,
            name_target,
            name_source,
            src_attrs,
            trg_attrs,
            followed_target,
            followed_source,
        ) = gathered;

        // a followed symlink is updated through its resolved path rather
        // than deleted and replaced by a regular file
        let (target_resolved_old, target_resolved_new) = if followed_target {
            let resolved = self
                .ctx
                .fs
                .symlink_resolved_path(&target_path_current)
                .await?;
            (resolved.clone(), resolved)
        } else {
            (target_path_current.clone(), target_path_logical.clone())
        };

        self.report_info(TXT_UPDATING_FILE, &target_resolved_old).await?;
        let reporter = StatReporter::new(1, src_attrs.file_size as i64, self.thread_idx, &self.acb);

        if followed_target && name_target != name_source {
            // the link itself needs its case adjusted; the copy below only
            // touches the resolved file
            self.ctx
                .fs
                .rename_item(&target_path_current, &target_path_logical)
                .await?;
        }

        let delete_target = DeleteTargetSpec {
            handler: self.ctx.del_handler(target),
            descr: FileDescriptor {
                path: target_resolved_old.clone(),
                attrs: StreamAttributes {
                    mtime: trg_attrs.mtime,
                    file_size: trg_attrs.file_size,
                    file_id: trg_attrs.file_id.clone(),
                },
            },
            rel_path,
        };
        let stream_attrs = StreamAttributes {
            mtime: src_attrs.mtime,
            file_size: src_attrs.file_size,
            file_id: src_attrs.file_id.clone(),
        };
        let result = self
            .copy_file_with_callback(
                &source_path,
                &stream_attrs,
                &target_resolved_new,
                Some(delete_target),
                &reporter,
            )
            .await?;

        self.record_mod_time_error(&result);
        // delete + copy is one logical operation
        reporter.report_delta(1, 0)?;

        self.tree.lock().await.set_file_synced(
            id,
            target,
            FileSyncedState {
                item_name: name_source,
                file_size: result.file_size,
                mtime_target: result.dst_mtime,
                mtime_source: result.src_mtime,
                file_id_target: result.dst_file_id,
                file_id_source: result.src_file_id,
                followed_target,
                followed_source,
            },
        );
        reporter.finish();
        Ok(())
    }

    async fn copy_file_metadata(&self, id: ObjectId, target: Side) -> StepResult<()> {
        let source = target.opposite();
        let gathered = {
            let tree = self.tree.lock().await;
            let Some(file) = tree.file(id) else {
                return Ok(());
            };
            let parent_path = match tree.parent_of(id) {
                ContainerRef::Base => tree.base_path(target).clone(),
                ContainerRef::Folder(parent) => tree.abstract_path(parent, target),
            };
            (
                tree.abstract_path(id, target),
                parent_path,
                file.item_name(target).to_string(),
                file.item_name(source).to_string(),
                file.file_size(source),
                file.attrs(target).map(|a| a.mtime).unwrap_or(0),
                file.attrs(source).map(|a| a.mtime).unwrap_or(0),
                file.attrs(target).and_then(|a| a.file_id.clone()),
                file.attrs(source).and_then(|a| a.file_id.clone()),
                file.is_followed_symlink(target),
                file.is_followed_symlink(source),
            )
        };
        let (
            target_path,
            parent_path,
            name_target,
            name_source,
            file_size,
            mtime_target,
            mtime_source,
            file_id_target,
            file_id_source,
            followed_target,
            followed_source,
        ) = gathered;

        self.report_info(TXT_UPDATING_ATTRIBUTES, &target_path).await?;
        let reporter = StatReporter::new(1, 0, self.thread_idx, &self.acb);

        if name_target != name_source {
            // a metadata copy on files is only ever a case rename
            self.ctx
                .fs
                .rename_item(&target_path, &parent_path.join(&name_source))
                .await?;
        }
        reporter.report_delta(1, 0)?;

        self.tree.lock().await.set_file_synced(
            id,
            target,
            FileSyncedState {
                item_name: name_source,
                file_size,
                mtime_target,
                mtime_source,
                file_id_target,
                file_id_source,
                followed_target,
                followed_source,
            },
        );
        reporter.finish();
        Ok(())
    }

    // ---- per-entity sync: symlinks -----------------------------------------

    async fn synchronize_link(&self, id: ObjectId) -> StepResult<()> {
        let op = {
            let tree = self.tree.lock().await;
            match tree.symlink(id) {
                Some(link) => link.op(),
                None => return Ok(()),
            }
        };
        let Some(target) = op.target_side() else {
            return Ok(());
        };
        use SyncOperation::*;
        match op {
            CreateLeft | CreateRight => self.create_link(id, target).await,
            DeleteLeft | DeleteRight => self.delete_link(id, target).await,
            OverwriteLeft | OverwriteRight => self.overwrite_link(id, target).await,
            CopyMetadataLeft | CopyMetadataRight => self.copy_link_metadata(id, target).await,
            MoveLeftFrom | MoveRightFrom | MoveLeftTo | MoveRightTo => Ok(()),
            DoNothing | Equal | UnresolvedConflict => Ok(()),
        }
    }

    async fn create_link(&self, id: ObjectId, target: Side) -> StepResult<()> {
        let source = target.opposite();
        let (target_path, source_path, src_name, src_mtime) = {
            let tree = self.tree.lock().await;
            let Some(link) = tree.symlink(id) else {
                return Ok(());
            };
            if let ContainerRef::Folder(parent) = tree.parent_of(id) {
                if let Some(parent) = tree.folder(parent) {
                    if !parent.exists_on(target) {
                        return Ok(());
                    }
                }
            }
            (
                tree.abstract_path(id, target),
                tree.abstract_path(id, source),
                link.item_name(source).to_string(),
                link.mtime(source),
            )
        };

        self.report_info(TXT_CREATING_LINK, &target_path).await?;
        let reporter = StatReporter::new(1, 0, self.thread_idx, &self.acb);

        match self
            .ctx
            .fs
            .copy_symlink(&source_path, &target_path, self.ctx.copy_permissions)
            .await
        {
            Ok(()) => {
                reporter.report_delta(1, 0)?;
                self.tree
                    .lock()
                    .await
                    .set_link_synced(id, target, src_name, src_mtime, src_mtime);
                reporter.finish();
                Ok(())
            }
            Err(error) => {
                let source_gone =
                    matches!(self.ctx.fs.item_type_if_exists(&source_path).await, Ok(None));
                if source_gone {
                    reporter.report_delta(1, 0)?;
                    self.report_info(TXT_SOURCE_ITEM_NOT_FOUND, &source_path).await?;
                    self.tree.lock().await.remove_side(id, source);
                    reporter.finish();
                    Ok(())
                } else {
                    Err(error.into())
                }
            }
        }
    }

    async fn delete_link(&self, id: ObjectId, target: Side) -> StepResult<()> {
        let (path, rel_path) = {
            let tree = self.tree.lock().await;
            if tree.symlink(id).is_none() {
                return Ok(());
            }
            (tree.abstract_path(id, target), tree.rel_path(id))
        };
        let handler = self.ctx.del_handler(target);
        self.report_info(handler.txt_removing_symlink(), &path).await?;

        let reporter = StatReporter::new(1, 0, self.thread_idx, &self.acb);
        handler.remove_symlink(&path, &rel_path, &reporter).await?;
        self.tree.lock().await.remove_side(id, target);
        reporter.finish();
        Ok(())
    }

    async fn overwrite_link(&self, id: ObjectId, target: Side) -> StepResult<()> {
        let source = target.opposite();
        let gathered = {
            let tree = self.tree.lock().await;
            let Some(link) = tree.symlink(id) else {
                return Ok(());
            };
            let parent_path = match tree.parent_of(id) {
                ContainerRef::Base => tree.base_path(target).clone(),
                ContainerRef::Folder(parent) => tree.abstract_path(parent, target),
            };
            (
                tree.abstract_path(id, target),
                tree.abstract_path(id, source),
                parent_path.join(link.item_name(source)),
                tree.rel_path(id),
                link.item_name(source).to_string(),
                link.mtime(source),
            )
        };
        let (target_path, source_path, target_path_new, rel_path, src_name, src_mtime) = gathered;

        self.report_info(TXT_UPDATING_LINK, &target_path).await?;
        let reporter = StatReporter::new(1, 0, self.thread_idx, &self.acb);

        let handler = self.ctx.del_handler(target);
        handler
            .remove_symlink(&target_path, &rel_path, &reporter)
            .await?;
        // delete + create is one logical operation: undo the removal's
        // item delta
        reporter.report_delta(-1, 0)?;

        self.ctx
            .fs
            .copy_symlink(&source_path, &target_path_new, self.ctx.copy_permissions)
            .await?;
        reporter.report_delta(1, 0)?;

        self.tree
            .lock()
            .await
            .set_link_synced(id, target, src_name, src_mtime, src_mtime);
        reporter.finish();
        Ok(())
    }

    async fn copy_link_metadata(&self, id: ObjectId, target: Side) -> StepResult<()> {
        let source = target.opposite();
        let gathered = {
            let tree = self.tree.lock().await;
            let Some(link) = tree.symlink(id) else {
                return Ok(());
            };
            let parent_path = match tree.parent_of(id) {
                ContainerRef::Base => tree.base_path(target).clone(),
                ContainerRef::Folder(parent) => tree.abstract_path(parent, target),
            };
            (
                tree.abstract_path(id, target),
                parent_path,
                link.item_name(target).to_string(),
                link.item_name(source).to_string(),
                link.mtime(target),
                link.mtime(source),
            )
        };
        let (target_path, parent_path, name_target, name_source, mtime_target, mtime_source) =
            gathered;

        self.report_info(TXT_UPDATING_ATTRIBUTES, &target_path).await?;
        let reporter = StatReporter::new(1, 0, self.thread_idx, &self.acb);

        if name_target != name_source {
            self.ctx
                .fs
                .rename_item(&target_path, &parent_path.join(&name_source))
                .await?;
        }
        reporter.report_delta(1, 0)?;

        self.tree
            .lock()
            .await
            .set_link_synced(id, target, name_source, mtime_target, mtime_source);
        reporter.finish();
        Ok(())
    }

    // ---- per-entity sync: folders ------------------------------------------

    async fn synchronize_folder(&self, id: ObjectId) -> StepResult<()> {
        let op = {
            let tree = self.tree.lock().await;
            match tree.folder(id) {
                Some(folder) => folder.op(),
                None => return Ok(()),
            }
        };
        let Some(target) = op.target_side() else {
            return Ok(());
        };
        use SyncOperation::*;
        match op {
            CreateLeft | CreateRight => self.create_folder(id, target).await,
            DeleteLeft | DeleteRight => self.delete_folder(id, target).await,
            OverwriteLeft | OverwriteRight | CopyMetadataLeft | CopyMetadataRight => {
                self.copy_folder_metadata(id, target).await
            }
            MoveLeftFrom | MoveRightFrom | MoveLeftTo | MoveRightTo => Ok(()),
            DoNothing | Equal | UnresolvedConflict => Ok(()),
        }
    }

    async fn create_folder(&self, id: ObjectId, target: Side) -> StepResult<()> {
        let source = target.opposite();
        let (target_path, source_path, src_name, src_followed) = {
            let tree = self.tree.lock().await;
            let Some(folder) = tree.folder(id) else {
                return Ok(());
            };
            if let ContainerRef::Folder(parent) = tree.parent_of(id) {
                if let Some(parent) = tree.folder(parent) {
                    if !parent.exists_on(target) {
                        return Ok(());
                    }
                }
            }
            (
                tree.abstract_path(id, target),
                tree.abstract_path(id, source),
                folder.item_name(source).to_string(),
                folder.is_followed_symlink(source),
            )
        };

        self.report_info(TXT_CREATING_FOLDER, &target_path).await?;

        // a shallow folder copy may not fail on a missing source, so probe
        // existence first
        if self
            .ctx
            .fs
            .item_type_if_exists(&source_path)
            .await?
            .is_some()
        {
            let reporter = StatReporter::new(1, 0, self.thread_idx, &self.acb);
            if let Err(error) = self
                .ctx
                .fs
                .copy_new_folder(&source_path, &target_path, self.ctx.copy_permissions)
                .await
            {
                // someone already created it (pass zero parent chains run
                // concurrently): keep going if a folder is in place now
                let folder_exists = matches!(
                    self.ctx.fs.item_type(&target_path).await,
                    Ok(twinfold_core::ports::ItemType::Folder)
                );
                if !folder_exists {
                    return Err(error.into());
                }
            }
            reporter.report_delta(1, 0)?;
            self.tree
                .lock()
                .await
                .set_folder_synced(id, target, src_name, false, src_followed);
            reporter.finish();
        } else {
            // source deleted meanwhile: account the whole subtree as done
            let (sub_items, sub_bytes) = {
                let tree = self.tree.lock().await;
                let sub_stats = SyncStatistics::of_container(&tree, ContainerRef::Folder(id));
                (sub_stats.cud_total(), sub_stats.bytes_to_process())
            };
            let reporter =
                StatReporter::new(1 + sub_items, sub_bytes, self.thread_idx, &self.acb);
            reporter.report_delta(1, 0)?;
            self.report_info(TXT_SOURCE_ITEM_NOT_FOUND, &source_path).await?;
            {
                let mut tree = self.tree.lock().await;
                tree.clear_folder_children(id);
                tree.remove_side(id, source);
            }
            reporter.finish();
        }
        Ok(())
    }

    async fn delete_folder(&self, id: ObjectId, target: Side) -> StepResult<()> {
        let (path, rel_path, sub_items, sub_bytes) = {
            let tree = self.tree.lock().await;
            if tree.folder(id).is_none() {
                return Ok(());
            }
            let sub_stats = SyncStatistics::of_container(&tree, ContainerRef::Folder(id));
            (
                tree.abstract_path(id, target),
                tree.rel_path(id),
                sub_stats.cud_total(),
                sub_stats.bytes_to_process(),
            )
        };
        let handler = self.ctx.del_handler(target);
        self.report_info(handler.txt_removing_folder(), &path).await?;

        let reporter = StatReporter::new(1 + sub_items, sub_bytes, self.thread_idx, &self.acb);
        handler.remove_folder(&path, &rel_path, &reporter).await?;

        {
            let mut tree = self.tree.lock().await;
            tree.clear_folder_children(id);
            tree.remove_side(id, target);
        }
        reporter.finish();
        Ok(())
    }

    async fn copy_folder_metadata(&self, id: ObjectId, target: Side) -> StepResult<()> {
        let source = target.opposite();
        let gathered = {
            let tree = self.tree.lock().await;
            let Some(folder) = tree.folder(id) else {
                return Ok(());
            };
            let parent_path = match tree.parent_of(id) {
                ContainerRef::Base => tree.base_path(target).clone(),
                ContainerRef::Folder(parent) => tree.abstract_path(parent, target),
            };
            (
                tree.abstract_path(id, target),
                parent_path,
                folder.item_name(target).to_string(),
                folder.item_name(source).to_string(),
                folder.is_followed_symlink(target),
                folder.is_followed_symlink(source),
            )
        };
        let (target_path, parent_path, name_target, name_source, followed_target, followed_source) =
            gathered;

        self.report_info(TXT_UPDATING_ATTRIBUTES, &target_path).await?;
        let reporter = StatReporter::new(1, 0, self.thread_idx, &self.acb);

        if name_target != name_source {
            self.ctx
                .fs
                .rename_item(&target_path, &parent_path.join(&name_source))
                .await?;
        }
        reporter.report_delta(1, 0)?;

        self.tree.lock().await.set_folder_synced(
            id,
            target,
            name_source,
            followed_target,
            followed_source,
        );
        reporter.finish();
        Ok(())
    }

    // ---- copy + verification ------------------------------------------------

    async fn copy_file_with_callback(
        &self,
        source: &SyncPath,
        source_attrs: &StreamAttributes,
        target: &SyncPath,
        delete_target: Option<DeleteTargetSpec<'_>>,
        reporter: &StatReporter<'_>,
    ) -> StepResult<FileCopyResult> {
        let hooks = CopyHooks {
            reporter,
            delete_target,
        };
        let result = self
            .ctx
            .fs
            .copy_file_transactional(
                source,
                source_attrs,
                target,
                self.ctx.copy_permissions,
                self.ctx.fail_safe_copy,
                &hooks,
            )
            .await?;

        if self.ctx.verify_copied_files {
            if let Err(error) = self.verify_copy(source, target).await {
                // never leave an unverified target behind
                let _ = self.ctx.fs.remove_file_plain(target).await;
                return Err(error);
            }
        }
        Ok(result)
    }

    async fn verify_copy(&self, source: &SyncPath, target: &SyncPath) -> StepResult<()> {
        self.report_info(TXT_VERIFYING_FILE, target).await?;
        let outcome: StepResult<()> = async {
            // flush the target's buffers, then read back as usual
            self.ctx.fs.flush_file_buffers(target).await?;
            let same = self
                .ctx
                .fs
                .files_have_same_content(source, target, &|_bytes| self.acb.interruption_point())
                .await?;
            if same {
                Ok(())
            } else {
                Err(FileError::new(format!("{source} and {target} have different content")).into())
            }
        }
        .await;

        match outcome {
            Ok(()) => Ok(()),
            Err(StepError::Interrupted) => Err(StepError::Interrupted),
            Err(StepError::File(error)) => {
                Err(FileError::new(format!("Data verification error: {error}")).into())
            }
        }
    }

    fn record_mod_time_error(&self, result: &FileCopyResult) {
        if let Some(error) = &result.error_mod_time {
            self.ctx
                .errors_mod_time
                .lock()
                .expect("mod-time error mutex poisoned")
                .push(error.clone());
        }
    }
}

struct DeleteTargetSpec<'a> {
    handler: &'a DeletionHandler,
    descr: FileDescriptor,
    rel_path: RelPath,
}

struct CopyHooks<'a> {
    reporter: &'a StatReporter<'a>,
    delete_target: Option<DeleteTargetSpec<'a>>,
}

#[async_trait::async_trait]
impl CopyCallbacks for CopyHooks<'_> {
    async fn on_delete_target(&self) -> StepResult<()> {
        if let Some(spec) = &self.delete_target {
            spec.handler
                .remove_file(&spec.descr, &spec.rel_path, self.reporter)
                .await?;
            // the logical item count belongs to the copy; only the byte
            // total may change (e.g. the old content moved to versioning)
            self.reporter.report_delta(-1, 0)?;
        }
        Ok(())
    }

    fn on_progress(&self, bytes_delta: u64) -> StepResult<()> {
        self.reporter.report_delta(0, bytes_delta as i64)
    }
}

/// Interim name of a two-step move: `<stem>.<4-hex>` plus the reserved
/// temporary suffix, collision-resistant against leftover interim files.
fn interim_move_name(file_name: &str) -> String {
    let stem = match file_name.rfind('.') {
        Some(dot) => &file_name[..dot],
        None => file_name,
    };
    let uuid = Uuid::new_v4();
    let digest = uuid
        .as_bytes()
        .iter()
        .fold(0u16, |acc, &byte| acc.rotate_left(3) ^ u16::from(byte));
    format!("{stem}.{digest:04x}{TEMP_FILE_SUFFIX}")
}
