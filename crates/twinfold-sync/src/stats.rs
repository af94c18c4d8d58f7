//! Logical statistics over a comparison tree.
//!
//! The traversal counts what the scheduled operations *mean*, not what
//! physical I/O they will take: folder deletions recurse even when the
//! deletion policy collapses the subtree into a single physical move, and
//! byte volume uses the source side's current size for copies (the
//! destination size does not predict the traffic). Divergence between
//! logical and physical work is corrected at run time by the scoped stat
//! reporter.

use twinfold_core::domain::{
    BaseFolderPair, BySide, ContainerRef, FilePair, FolderPair, ObjectId, RelPath, Side,
    SymlinkPair, SyncOperation,
};

/// An unresolved conflict observed during the statistics pass.
#[derive(Debug, Clone)]
pub struct ConflictInfo {
    pub relative_path: RelPath,
    pub message: String,
}

/// Aggregated per-side counts and byte volume for (part of) a tree.
#[derive(Debug, Clone, Default)]
pub struct SyncStatistics {
    create: BySide<i64>,
    update: BySide<i64>,
    delete: BySide<i64>,
    rows_total: usize,
    bytes_to_process: i64,
    physical_delete: BySide<bool>,
    conflicts: Vec<ConflictInfo>,
}

impl SyncStatistics {
    pub fn of_base_pair(tree: &BaseFolderPair) -> Self {
        let mut stats = Self::default();
        stats.recurse(tree, ContainerRef::Base);
        stats
    }

    pub fn of_container(tree: &BaseFolderPair, container: ContainerRef) -> Self {
        let mut stats = Self::default();
        stats.recurse(tree, container);
        stats
    }

    /// Stats of a single file row (used to re-price demoted moves).
    pub fn of_file(tree: &BaseFolderPair, id: ObjectId) -> Self {
        let mut stats = Self::default();
        if let Some(file) = tree.file(id) {
            stats.process_file(tree, id, file);
            stats.rows_total += 1;
        }
        stats
    }

    fn recurse(&mut self, tree: &BaseFolderPair, container: ContainerRef) {
        let children = tree.children(container);
        for &id in &children.files {
            if let Some(file) = tree.file(id) {
                self.process_file(tree, id, file);
            }
        }
        for &id in &children.links {
            if let Some(link) = tree.symlink(id) {
                self.process_link(tree, id, link);
            }
        }
        for &id in &children.folders {
            if let Some(folder) = tree.folder(id) {
                self.process_folder(tree, id, folder);
            }
        }
        self.rows_total += children.folders.len() + children.files.len() + children.links.len();
    }

    fn process_file(&mut self, tree: &BaseFolderPair, id: ObjectId, file: &FilePair) {
        use SyncOperation::*;
        match file.op() {
            CreateLeft => {
                self.create.left += 1;
                self.bytes_to_process += file.file_size(Side::Right) as i64;
            }
            CreateRight => {
                self.create.right += 1;
                self.bytes_to_process += file.file_size(Side::Left) as i64;
            }
            DeleteLeft => {
                self.delete.left += 1;
                self.physical_delete.left = true;
            }
            DeleteRight => {
                self.delete.right += 1;
                self.physical_delete.right = true;
            }
            // move targets carry the update count; a fall back to
            // copy + delete re-prices the pair during pass zero
            MoveLeftTo => self.update.left += 1,
            MoveRightTo => self.update.right += 1,
            MoveLeftFrom | MoveRightFrom => {}
            OverwriteLeft => {
                self.update.left += 1;
                self.bytes_to_process += file.file_size(Side::Right) as i64;
                self.physical_delete.left = true;
            }
            OverwriteRight => {
                self.update.right += 1;
                self.bytes_to_process += file.file_size(Side::Left) as i64;
                self.physical_delete.right = true;
            }
            CopyMetadataLeft => self.update.left += 1,
            CopyMetadataRight => self.update.right += 1,
            UnresolvedConflict => self.push_conflict(tree, id, file.conflict_msg()),
            DoNothing | Equal => {}
        }
    }

    fn process_link(&mut self, tree: &BaseFolderPair, id: ObjectId, link: &SymlinkPair) {
        use SyncOperation::*;
        match link.op() {
            CreateLeft => self.create.left += 1,
            CreateRight => self.create.right += 1,
            DeleteLeft => {
                self.delete.left += 1;
                self.physical_delete.left = true;
            }
            DeleteRight => {
                self.delete.right += 1;
                self.physical_delete.right = true;
            }
            OverwriteLeft | CopyMetadataLeft => {
                self.update.left += 1;
                self.physical_delete.left = true;
            }
            OverwriteRight | CopyMetadataRight => {
                self.update.right += 1;
                self.physical_delete.right = true;
            }
            UnresolvedConflict => self.push_conflict(tree, id, link.conflict_msg()),
            // move operations exist for files only
            MoveLeftFrom | MoveRightFrom | MoveLeftTo | MoveRightTo => {}
            DoNothing | Equal => {}
        }
    }

    fn process_folder(&mut self, tree: &BaseFolderPair, id: ObjectId, folder: &FolderPair) {
        use SyncOperation::*;
        match folder.op() {
            CreateLeft => self.create.left += 1,
            CreateRight => self.create.right += 1,
            DeleteLeft => {
                self.delete.left += 1;
                self.physical_delete.left = true;
            }
            DeleteRight => {
                self.delete.right += 1;
                self.physical_delete.right = true;
            }
            OverwriteLeft | CopyMetadataLeft => self.update.left += 1,
            OverwriteRight | CopyMetadataRight => self.update.right += 1,
            UnresolvedConflict => self.push_conflict(tree, id, folder.conflict_msg()),
            MoveLeftFrom | MoveRightFrom | MoveLeftTo | MoveRightTo => {}
            DoNothing | Equal => {}
        }

        // stats are logical: recurse even though some deletion policies
        // collapse the whole subtree into one physical move
        self.recurse(tree, ContainerRef::Folder(id));
    }

    fn push_conflict(&mut self, tree: &BaseFolderPair, id: ObjectId, msg: Option<&str>) {
        self.conflicts.push(ConflictInfo {
            relative_path: tree.rel_path(id),
            message: msg.unwrap_or("unresolved conflict").to_string(),
        });
    }

    pub fn create_count(&self, side: Side) -> i64 {
        *self.create.get(side)
    }

    pub fn update_count(&self, side: Side) -> i64 {
        *self.update.get(side)
    }

    pub fn delete_count(&self, side: Side) -> i64 {
        *self.delete.get(side)
    }

    pub fn create_total(&self) -> i64 {
        self.create.left + self.create.right
    }

    pub fn update_total(&self) -> i64 {
        self.update.left + self.update.right
    }

    pub fn delete_total(&self) -> i64 {
        self.delete.left + self.delete.right
    }

    /// Creates + updates + deletes: the number of rows that will be
    /// physically processed.
    pub fn cud_total(&self) -> i64 {
        self.create_total() + self.update_total() + self.delete_total()
    }

    pub fn row_count(&self) -> usize {
        self.rows_total
    }

    pub fn bytes_to_process(&self) -> i64 {
        self.bytes_to_process
    }

    pub fn expects_physical_delete(&self, side: Side) -> bool {
        *self.physical_delete.get(side)
    }

    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    pub fn conflicts(&self) -> &[ConflictInfo] {
        &self.conflicts
    }
}
