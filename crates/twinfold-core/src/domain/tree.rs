//! The comparison tree: one [`BaseFolderPair`] per configured pair of root
//! folders, holding folder/file/symlink entity pairs annotated with a
//! [`SyncOperation`].
//!
//! Entities live in an arena owned by the base pair and refer to their
//! parent by stable [`ObjectId`]; ids stay valid for the lifetime of the
//! pair, also across structural mutations (two-step moves insert entries
//! while passes iterate). The engine mutates the tree only while holding
//! the per-pair core mutex, so the tree itself needs no internal
//! synchronization.

use serde::{Deserialize, Serialize};

use super::newtypes::{equal_item_names, RelPath, SyncPath};
use super::sync_op::{BySide, Side, SyncOperation};

/// Stable handle to an entity within one [`BaseFolderPair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(usize);

/// A container whose children can be iterated: the base pair root or a
/// folder pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRef {
    Base,
    Folder(ObjectId),
}

/// Per-side attributes of a file entry. `None` on a side means the file
/// does not exist there.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttributes {
    pub file_size: u64,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: i64,
    pub file_id: Option<String>,
    pub is_followed_symlink: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAttributes {
    pub mtime: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderAttributes {
    pub is_followed_symlink: bool,
}

/// Ordered child lists of a container. Folders first matches the
/// scheduling requirement that folder items are served before files.
#[derive(Debug, Clone, Default)]
pub struct ChildLists {
    pub folders: Vec<ObjectId>,
    pub files: Vec<ObjectId>,
    pub links: Vec<ObjectId>,
}

impl ChildLists {
    fn clear(&mut self) {
        self.folders.clear();
        self.files.clear();
        self.links.clear();
    }
}

#[derive(Debug, Clone)]
pub struct FilePair {
    name: BySide<String>,
    attrs: BySide<Option<FileAttributes>>,
    op: SyncOperation,
    move_ref: Option<ObjectId>,
    conflict_msg: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SymlinkPair {
    name: BySide<String>,
    attrs: BySide<Option<LinkAttributes>>,
    op: SyncOperation,
    conflict_msg: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FolderPair {
    name: BySide<String>,
    attrs: BySide<Option<FolderAttributes>>,
    op: SyncOperation,
    conflict_msg: Option<String>,
    children: ChildLists,
}

macro_rules! pair_common {
    ($ty:ty) => {
        impl $ty {
            pub fn op(&self) -> SyncOperation {
                self.op
            }

            pub fn set_op(&mut self, op: SyncOperation) {
                self.op = op;
            }

            /// Name on `side`; falls back to the other side when absent
            /// (a create target has no own name yet).
            pub fn item_name(&self, side: Side) -> &str {
                let own = self.name.get(side);
                if own.is_empty() {
                    self.name.get(side.opposite())
                } else {
                    own
                }
            }

            /// Logical name of the pair, independent of side.
            pub fn pair_item_name(&self) -> &str {
                self.item_name(Side::Left)
            }

            pub fn exists_on(&self, side: Side) -> bool {
                self.attrs.get(side).is_some()
            }

            pub fn is_empty(&self) -> bool {
                !self.exists_on(Side::Left) && !self.exists_on(Side::Right)
            }

            pub fn conflict_msg(&self) -> Option<&str> {
                self.conflict_msg.as_deref()
            }

            pub fn set_conflict_msg(&mut self, msg: impl Into<String>) {
                self.conflict_msg = Some(msg.into());
            }
        }
    };
}

pair_common!(FilePair);
pair_common!(SymlinkPair);
pair_common!(FolderPair);

impl FilePair {
    pub fn attrs(&self, side: Side) -> Option<&FileAttributes> {
        self.attrs.get(side).as_ref()
    }

    /// Size on `side`, zero when absent.
    pub fn file_size(&self, side: Side) -> u64 {
        self.attrs(side).map(|a| a.file_size).unwrap_or(0)
    }

    pub fn is_followed_symlink(&self, side: Side) -> bool {
        self.attrs(side).map(|a| a.is_followed_symlink).unwrap_or(false)
    }

    pub fn move_ref(&self) -> Option<ObjectId> {
        self.move_ref
    }

    pub fn set_move_ref(&mut self, target: Option<ObjectId>) {
        self.move_ref = target;
    }
}

impl SymlinkPair {
    pub fn attrs(&self, side: Side) -> Option<&LinkAttributes> {
        self.attrs.get(side).as_ref()
    }

    pub fn mtime(&self, side: Side) -> i64 {
        self.attrs(side).map(|a| a.mtime).unwrap_or(0)
    }
}

impl FolderPair {
    pub fn attrs(&self, side: Side) -> Option<&FolderAttributes> {
        self.attrs.get(side).as_ref()
    }

    pub fn is_followed_symlink(&self, side: Side) -> bool {
        self.attrs(side).map(|a| a.is_followed_symlink).unwrap_or(false)
    }

    pub fn children(&self) -> &ChildLists {
        &self.children
    }
}

#[derive(Debug, Clone)]
pub enum Entry {
    Folder(FolderPair),
    File(FilePair),
    Symlink(SymlinkPair),
}

#[derive(Debug, Clone)]
struct Node {
    parent: ContainerRef,
    entry: Entry,
}

/// Inclusion filter of a base pair. Only the exclusion list is modelled;
/// it is consulted by the pre-flight dependency checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathFilter {
    pub exclude: Vec<RelPath>,
}

impl PathFilter {
    pub fn passes(&self, rel: &RelPath) -> bool {
        !self
            .exclude
            .iter()
            .any(|e| rel.as_path().starts_with(e.as_path()))
    }
}

/// Data applied to a file pair after a successful copy/move: both sides
/// reflect the synced state, the item name is taken from the source side
/// so case changes propagate.
#[derive(Debug, Clone)]
pub struct FileSyncedState {
    pub item_name: String,
    pub file_size: u64,
    pub mtime_target: i64,
    pub mtime_source: i64,
    pub file_id_target: Option<String>,
    pub file_id_source: Option<String>,
    pub followed_target: bool,
    pub followed_source: bool,
}

/// Root of one configured pair of folders plus the arena of its entities.
#[derive(Debug, Clone, Default)]
pub struct BaseFolderPair {
    base_paths: BySide<SyncPath>,
    available: BySide<bool>,
    filter: PathFilter,
    nodes: Vec<Node>,
    root: ChildLists,
}

impl BaseFolderPair {
    pub fn new(left: SyncPath, right: SyncPath, filter: PathFilter) -> Self {
        Self {
            base_paths: BySide::new(left, right),
            available: BySide::new(true, true),
            filter,
            nodes: Vec::new(),
            root: ChildLists::default(),
        }
    }

    pub fn base_path(&self, side: Side) -> &SyncPath {
        self.base_paths.get(side)
    }

    pub fn is_available(&self, side: Side) -> bool {
        *self.available.get(side)
    }

    pub fn set_available(&mut self, side: Side, available: bool) {
        *self.available.get_mut(side) = available;
    }

    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }

    // ---- construction -----------------------------------------------------

    fn push(&mut self, parent: ContainerRef, entry: Entry) -> ObjectId {
        let id = ObjectId(self.nodes.len());
        self.nodes.push(Node { parent, entry });
        id
    }

    fn child_lists_mut(&mut self, container: ContainerRef) -> &mut ChildLists {
        match container {
            ContainerRef::Base => &mut self.root,
            ContainerRef::Folder(id) => match &mut self.nodes[id.0].entry {
                Entry::Folder(f) => &mut f.children,
                _ => panic!("container id does not refer to a folder"),
            },
        }
    }

    pub fn add_folder(
        &mut self,
        parent: ContainerRef,
        name: BySide<String>,
        attrs: BySide<Option<FolderAttributes>>,
        op: SyncOperation,
    ) -> ObjectId {
        let id = self.push(
            parent,
            Entry::Folder(FolderPair {
                name,
                attrs,
                op,
                conflict_msg: None,
                children: ChildLists::default(),
            }),
        );
        self.child_lists_mut(parent).folders.push(id);
        id
    }

    pub fn add_file(
        &mut self,
        parent: ContainerRef,
        name: BySide<String>,
        attrs: BySide<Option<FileAttributes>>,
        op: SyncOperation,
    ) -> ObjectId {
        let id = self.push(
            parent,
            Entry::File(FilePair {
                name,
                attrs,
                op,
                move_ref: None,
                conflict_msg: None,
            }),
        );
        self.child_lists_mut(parent).files.push(id);
        id
    }

    pub fn add_symlink(
        &mut self,
        parent: ContainerRef,
        name: BySide<String>,
        attrs: BySide<Option<LinkAttributes>>,
        op: SyncOperation,
    ) -> ObjectId {
        let id = self.push(
            parent,
            Entry::Symlink(SymlinkPair {
                name,
                attrs,
                op,
                conflict_msg: None,
            }),
        );
        self.child_lists_mut(parent).links.push(id);
        id
    }

    /// Cross-links a detected rename: `from` gets `Move*From`, `to` gets
    /// `Move*To`, both point at each other.
    pub fn link_move_pair(&mut self, from: ObjectId, to: ObjectId, side: Side) {
        if let Some(f) = self.file_mut(from) {
            f.set_move_ref(Some(to));
            f.set_op(SyncOperation::move_from(side));
        }
        if let Some(t) = self.file_mut(to) {
            t.set_move_ref(Some(from));
            t.set_op(SyncOperation::move_to(side));
        }
    }

    // ---- lookup -----------------------------------------------------------

    pub fn parent_of(&self, id: ObjectId) -> ContainerRef {
        self.nodes[id.0].parent
    }

    pub fn entry(&self, id: ObjectId) -> &Entry {
        &self.nodes[id.0].entry
    }

    pub fn folder(&self, id: ObjectId) -> Option<&FolderPair> {
        match &self.nodes.get(id.0)?.entry {
            Entry::Folder(f) => Some(f),
            _ => None,
        }
    }

    pub fn folder_mut(&mut self, id: ObjectId) -> Option<&mut FolderPair> {
        match &mut self.nodes.get_mut(id.0)?.entry {
            Entry::Folder(f) => Some(f),
            _ => None,
        }
    }

    pub fn file(&self, id: ObjectId) -> Option<&FilePair> {
        match &self.nodes.get(id.0)?.entry {
            Entry::File(f) => Some(f),
            _ => None,
        }
    }

    pub fn file_mut(&mut self, id: ObjectId) -> Option<&mut FilePair> {
        match &mut self.nodes.get_mut(id.0)?.entry {
            Entry::File(f) => Some(f),
            _ => None,
        }
    }

    pub fn symlink(&self, id: ObjectId) -> Option<&SymlinkPair> {
        match &self.nodes.get(id.0)?.entry {
            Entry::Symlink(l) => Some(l),
            _ => None,
        }
    }

    pub fn symlink_mut(&mut self, id: ObjectId) -> Option<&mut SymlinkPair> {
        match &mut self.nodes.get_mut(id.0)?.entry {
            Entry::Symlink(l) => Some(l),
            _ => None,
        }
    }

    pub fn children(&self, container: ContainerRef) -> &ChildLists {
        match container {
            ContainerRef::Base => &self.root,
            ContainerRef::Folder(id) => self
                .folder(id)
                .map(|f| &f.children)
                .unwrap_or(&self.root),
        }
    }

    fn entry_name(&self, id: ObjectId, side: Side) -> &str {
        match self.entry(id) {
            Entry::Folder(f) => f.item_name(side),
            Entry::File(f) => f.item_name(side),
            Entry::Symlink(l) => l.item_name(side),
        }
    }

    fn entry_pair_name(&self, id: ObjectId) -> &str {
        self.entry_name(id, Side::Left)
    }

    pub fn op_of(&self, id: ObjectId) -> SyncOperation {
        match self.entry(id) {
            Entry::Folder(f) => f.op(),
            Entry::File(f) => f.op(),
            Entry::Symlink(l) => l.op(),
        }
    }

    fn name_chain<F>(&self, id: ObjectId, mut name_of: F) -> Vec<String>
    where
        F: FnMut(&Self, ObjectId) -> String,
    {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            chain.push(name_of(self, cur));
            current = match self.parent_of(cur) {
                ContainerRef::Base => None,
                ContainerRef::Folder(p) => Some(p),
            };
        }
        chain.reverse();
        chain
    }

    /// Absolute path of `id` on `side`, built from per-side item names so
    /// case differences along the chain are honored.
    pub fn abstract_path(&self, id: ObjectId, side: Side) -> SyncPath {
        let mut path = self.base_paths.get(side).clone();
        for name in self.name_chain(id, |t, i| t.entry_name(i, side).to_string()) {
            path = path.join(&name);
        }
        path
    }

    /// Logical path of the pair relative to the base folders.
    pub fn rel_path(&self, id: ObjectId) -> RelPath {
        let mut rel = RelPath::default();
        for name in self.name_chain(id, |t, i| t.entry_pair_name(i).to_string()) {
            rel = rel.join(&name);
        }
        rel
    }

    /// True if any sibling folder or symlink of `id` carries the same
    /// logical name (case-insensitively). Sibling files are checked by
    /// [`Self::name_clash_with_files_or_links`] for parent-folder creation.
    pub fn name_clash_with_folders_or_links(&self, id: ObjectId) -> bool {
        let name = self.entry_pair_name(id);
        let siblings = self.children(self.parent_of(id));
        siblings
            .folders
            .iter()
            .chain(siblings.links.iter())
            .any(|&sib| sib != id && equal_item_names(self.entry_pair_name(sib), name))
    }

    pub fn name_clash_with_files_or_links(&self, id: ObjectId) -> bool {
        let name = self.entry_pair_name(id);
        let siblings = self.children(self.parent_of(id));
        siblings
            .files
            .iter()
            .chain(siblings.links.iter())
            .any(|&sib| sib != id && equal_item_names(self.entry_pair_name(sib), name))
    }

    // ---- mutation after successful sync -----------------------------------

    /// Clears one side of an entry; the pair becomes empty when the other
    /// side is absent too and is pruned by [`Self::prune_empty`].
    pub fn remove_side(&mut self, id: ObjectId, side: Side) {
        match &mut self.nodes[id.0].entry {
            Entry::Folder(f) => {
                *f.attrs.get_mut(side) = None;
                f.name.get_mut(side).clear();
                if f.is_empty() {
                    f.op = SyncOperation::DoNothing;
                }
            }
            Entry::File(f) => {
                *f.attrs.get_mut(side) = None;
                f.name.get_mut(side).clear();
                f.move_ref = None;
                if f.is_empty() {
                    f.op = SyncOperation::DoNothing;
                }
            }
            Entry::Symlink(l) => {
                *l.attrs.get_mut(side) = None;
                l.name.get_mut(side).clear();
                if l.is_empty() {
                    l.op = SyncOperation::DoNothing;
                }
            }
        }
    }

    pub fn set_file_synced(&mut self, id: ObjectId, target: Side, state: FileSyncedState) {
        if let Some(f) = self.file_mut(id) {
            let source = target.opposite();
            f.name = BySide::new(state.item_name.clone(), state.item_name);
            *f.attrs.get_mut(target) = Some(FileAttributes {
                file_size: state.file_size,
                mtime: state.mtime_target,
                file_id: state.file_id_target,
                is_followed_symlink: state.followed_target,
            });
            *f.attrs.get_mut(source) = Some(FileAttributes {
                file_size: state.file_size,
                mtime: state.mtime_source,
                file_id: state.file_id_source,
                is_followed_symlink: state.followed_source,
            });
            f.move_ref = None;
            f.op = SyncOperation::Equal;
        }
    }

    pub fn set_link_synced(
        &mut self,
        id: ObjectId,
        target: Side,
        item_name: String,
        mtime_target: i64,
        mtime_source: i64,
    ) {
        if let Some(l) = self.symlink_mut(id) {
            let source = target.opposite();
            l.name = BySide::new(item_name.clone(), item_name);
            *l.attrs.get_mut(target) = Some(LinkAttributes {
                mtime: mtime_target,
            });
            *l.attrs.get_mut(source) = Some(LinkAttributes {
                mtime: mtime_source,
            });
            l.op = SyncOperation::Equal;
        }
    }

    pub fn set_folder_synced(
        &mut self,
        id: ObjectId,
        target: Side,
        item_name: String,
        followed_target: bool,
        followed_source: bool,
    ) {
        if let Some(f) = self.folder_mut(id) {
            let source = target.opposite();
            f.name = BySide::new(item_name.clone(), item_name);
            *f.attrs.get_mut(target) = Some(FolderAttributes {
                is_followed_symlink: followed_target,
            });
            *f.attrs.get_mut(source) = Some(FolderAttributes {
                is_followed_symlink: followed_source,
            });
            f.op = SyncOperation::Equal;
        }
    }

    /// Drops the child lists of a folder (the subtree was physically
    /// removed or vanished). Arena slots stay allocated; ids of dropped
    /// children must no longer be used.
    pub fn clear_folder_children(&mut self, id: ObjectId) {
        if let Some(f) = self.folder_mut(id) {
            f.children.clear();
        }
    }

    /// Demotes a failed move pair to ordinary delete + create and clears
    /// both move-refs.
    pub fn break_move_pair(&mut self, from: ObjectId, to: ObjectId, side: Side) {
        if let Some(f) = self.file_mut(from) {
            f.set_move_ref(None);
            f.set_op(SyncOperation::delete(side));
        }
        if let Some(t) = self.file_mut(to) {
            t.set_move_ref(None);
            t.set_op(SyncOperation::create(side));
        }
    }

    // ---- pruning ----------------------------------------------------------

    /// Removes entries that are empty on both sides, recursively. Called
    /// once per base pair after synchronization.
    pub fn prune_empty(&mut self) {
        let mut root = std::mem::take(&mut self.root);
        self.prune_lists(&mut root);
        self.root = root;
    }

    fn prune_lists(&mut self, lists: &mut ChildLists) {
        let folders = std::mem::take(&mut lists.folders);
        for &fid in &folders {
            let mut children = match self.folder_mut(fid) {
                Some(f) => std::mem::take(&mut f.children),
                None => continue,
            };
            self.prune_lists(&mut children);
            if let Some(f) = self.folder_mut(fid) {
                f.children = children;
            }
        }
        lists.folders = folders;

        lists
            .folders
            .retain(|&id| self.folder(id).map(|f| !f.is_empty()).unwrap_or(false));
        lists
            .files
            .retain(|&id| self.file(id).map(|f| !f.is_empty()).unwrap_or(false));
        lists
            .links
            .retain(|&id| self.symlink(id).map(|l| !l.is_empty()).unwrap_or(false));
    }
}
