//! Work distribution across the worker tasks of one pass.
//!
//! The workload keeps one LIFO bucket per worker plus a queue of
//! containers whose children still need expanding into work items. An idle
//! worker first drains its own bucket, then expands a pending folder into
//! it, then steals every other element of the largest foreign bucket, and
//! only then parks until new work is queued.
//!
//! Buckets and the folder queue are guarded by a plain mutex that is never
//! held across an await; tree reads during expansion take the per-pair
//! core mutex instead.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use twinfold_core::domain::{
    BaseFolderPair, ContainerRef, FilePair, FolderPair, ObjectId, Side, StepError, StepResult,
    SymlinkPair, SyncOperation,
};

use crate::coordinator::AsyncCoordinator;

/// The three ordered passes over a base pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Resolve detected moves (rename in place, two-step fallback, or
    /// demotion to copy + delete).
    Zero,
    /// Deletions, and overwrites that shrink the target.
    One,
    /// Creations, growing overwrites, metadata updates, move targets.
    Two,
}

/// Pass an individual item runs in; `Never` items are observed by the
/// statistics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemPass {
    One,
    Two,
    Never,
}

impl ItemPass {
    fn matches(self, pass: Pass) -> bool {
        match (self, pass) {
            (ItemPass::One, Pass::One) | (ItemPass::Two, Pass::Two) => true,
            _ => false,
        }
    }
}

/// Deletions first; overwrites run early only when they shrink the target,
/// so later creations find the space they need.
pub(crate) fn file_pass(file: &FilePair) -> ItemPass {
    use SyncOperation::*;
    match file.op() {
        DeleteLeft | DeleteRight => ItemPass::One,
        OverwriteLeft => {
            if file.file_size(Side::Left) > file.file_size(Side::Right) {
                ItemPass::One
            } else {
                ItemPass::Two
            }
        }
        OverwriteRight => {
            if file.file_size(Side::Right) > file.file_size(Side::Left) {
                ItemPass::One
            } else {
                ItemPass::Two
            }
        }
        // a move source is handled through its target entry
        MoveLeftFrom | MoveRightFrom => ItemPass::Never,
        // the two-step move rests until the target's parent chain exists
        MoveLeftTo | MoveRightTo => ItemPass::Two,
        CreateLeft | CreateRight | CopyMetadataLeft | CopyMetadataRight => ItemPass::Two,
        DoNothing | Equal | UnresolvedConflict => ItemPass::Never,
    }
}

/// Symlinks are deleted in pass one so an equally named file or folder can
/// be created in pass two (type-change overwrites).
pub(crate) fn link_pass(link: &SymlinkPair) -> ItemPass {
    use SyncOperation::*;
    match link.op() {
        DeleteLeft | DeleteRight => ItemPass::One,
        OverwriteLeft | OverwriteRight | CreateLeft | CreateRight | CopyMetadataLeft
        | CopyMetadataRight => ItemPass::Two,
        MoveLeftFrom | MoveRightFrom | MoveLeftTo | MoveRightTo => ItemPass::Never,
        DoNothing | Equal | UnresolvedConflict => ItemPass::Never,
    }
}

pub(crate) fn folder_pass(folder: &FolderPair) -> ItemPass {
    use SyncOperation::*;
    match folder.op() {
        DeleteLeft | DeleteRight => ItemPass::One,
        CreateLeft | CreateRight | OverwriteLeft | OverwriteRight | CopyMetadataLeft
        | CopyMetadataRight => ItemPass::Two,
        MoveLeftFrom | MoveRightFrom | MoveLeftTo | MoveRightTo => ItemPass::Never,
        DoNothing | Equal | UnresolvedConflict => ItemPass::Never,
    }
}

/// One unit of worker work. Folder items synchronize the folder and then
/// queue it for deeper expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkItem {
    SyncFolder(ObjectId),
    SyncFile(ObjectId),
    SyncLink(ObjectId),
    PrepareMove(ObjectId),
}

struct WorkState {
    buckets: Vec<Vec<WorkItem>>,
    folders_to_process: Vec<ContainerRef>,
    idle_threads: usize,
}

impl WorkState {
    fn have_work(&self) -> bool {
        !self.folders_to_process.is_empty() || self.buckets.iter().any(|b| !b.is_empty())
    }
}

pub(crate) struct Workload {
    pass: Pass,
    state: StdMutex<WorkState>,
    new_work: Notify,
    acb: Arc<AsyncCoordinator>,
}

enum NextStep {
    Item(WorkItem),
    Expand(ContainerRef),
    Park { last_one_idle: bool },
}

impl Workload {
    pub fn new(pass: Pass, thread_count: usize, acb: Arc<AsyncCoordinator>) -> Self {
        assert!(thread_count > 0);
        Self {
            pass,
            state: StdMutex::new(WorkState {
                buckets: vec![Vec::new(); thread_count],
                folders_to_process: vec![ContainerRef::Base],
                idle_threads: 0,
            }),
            new_work: Notify::new(),
            acb,
        }
    }

    pub fn add_folder_to_process(&self, folder: ContainerRef) {
        {
            let mut state = self.state.lock().expect("workload mutex poisoned");
            state.folders_to_process.push(folder);
        }
        self.new_work.notify_waiters();
    }

    /// Blocking (worker context): returns the next work item, or
    /// `Interrupted` once the pass was cancelled. The pass ends through
    /// cancellation — when every worker is idle and nothing is queued, the
    /// coordinator is told and the main task cancels the token.
    pub async fn get_next(
        &self,
        thread_idx: usize,
        tree: &Mutex<BaseFolderPair>,
        token: &CancellationToken,
    ) -> StepResult<WorkItem> {
        loop {
            let step = {
                let mut state = self.state.lock().expect("workload mutex poisoned");
                if let Some(item) = state.buckets[thread_idx].pop() {
                    NextStep::Item(item)
                } else if let Some(container) = state.folders_to_process.pop() {
                    NextStep::Expand(container)
                } else {
                    let largest = (0..state.buckets.len())
                        .max_by_key(|&i| state.buckets[i].len())
                        .unwrap_or(thread_idx);
                    if !state.buckets[largest].is_empty() {
                        // steal every other element of the largest bucket
                        let mut keep = Vec::new();
                        let mut stolen = Vec::new();
                        for (pos, item) in state.buckets[largest].drain(..).enumerate() {
                            if pos % 2 == 0 {
                                stolen.push(item);
                            } else {
                                keep.push(item);
                            }
                        }
                        state.buckets[largest] = keep;
                        state.buckets[thread_idx] = stolen;
                        match state.buckets[thread_idx].pop() {
                            Some(item) => NextStep::Item(item),
                            None => continue,
                        }
                    } else {
                        state.idle_threads += 1;
                        let last_one_idle = state.idle_threads == state.buckets.len();
                        NextStep::Park { last_one_idle }
                    }
                }
            };

            match step {
                NextStep::Item(item) => return Ok(item),
                NextStep::Expand(container) => {
                    let (items, folders) = {
                        let tree = tree.lock().await;
                        expand_container(&tree, self.pass, container)
                    };
                    {
                        let mut state = self.state.lock().expect("workload mutex poisoned");
                        state.buckets[thread_idx].extend(items);
                        state.folders_to_process.extend(folders);
                    }
                    // workers that parked while this expansion ran outside
                    // the work lock must learn about the new items
                    self.new_work.notify_waiters();
                }
                NextStep::Park { last_one_idle } => {
                    if last_one_idle {
                        self.acb.notify_all_done();
                    }
                    self.acb.notify_work_end(thread_idx);

                    let parked = async {
                        loop {
                            let notified = self.new_work.notified();
                            tokio::pin!(notified);
                            notified.as_mut().enable();
                            {
                                let state =
                                    self.state.lock().expect("workload mutex poisoned");
                                if state.have_work() {
                                    return;
                                }
                            }
                            notified.await;
                        }
                    };
                    let interrupted = tokio::select! {
                        _ = parked => false,
                        _ = token.cancelled() => true,
                    };

                    {
                        let mut state = self.state.lock().expect("workload mutex poisoned");
                        state.idle_threads -= 1;
                    }
                    self.acb.notify_work_begin(thread_idx);
                    if interrupted {
                        return Err(StepError::Interrupted);
                    }
                }
            }
        }
    }
}

/// Expands one container into work items for the current pass. Sub-folders
/// not participating in the pass are queued for deeper expansion right
/// away; participating folders expand only after their own work item ran
/// (parent creation happens-before child work).
pub(crate) fn expand_container(
    tree: &BaseFolderPair,
    pass: Pass,
    container: ContainerRef,
) -> (Vec<WorkItem>, Vec<ContainerRef>) {
    let mut items = Vec::new();
    let mut folders = Vec::new();
    let children = tree.children(container);

    for &id in &children.folders {
        let Some(folder) = tree.folder(id) else { continue };
        if folder_pass(folder).matches(pass) {
            // the work item re-queues the folder for expansion afterwards;
            // children of such folders may trail their uncles in scheduling
            // order
            items.push(WorkItem::SyncFolder(id));
        } else {
            folders.push(ContainerRef::Folder(id));
        }
    }

    for &id in &children.files {
        let Some(file) = tree.file(id) else { continue };
        if pass == Pass::Zero {
            items.push(WorkItem::PrepareMove(id));
        } else if file_pass(file).matches(pass) {
            items.push(WorkItem::SyncFile(id));
        }
    }

    for &id in &children.links {
        let Some(link) = tree.symlink(id) else { continue };
        if link_pass(link).matches(pass) {
            items.push(WorkItem::SyncLink(id));
        }
    }

    // buckets are drained LIFO; reversing here restores source order
    items.reverse();
    folders.reverse();
    (items, folders)
}
