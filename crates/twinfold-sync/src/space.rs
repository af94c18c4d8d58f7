//! Projected net disk-space change per side of a base pair.
//!
//! Additions come from `Create*` and the destination side of `Overwrite*`;
//! reductions from `Delete*` and the source side of `Overwrite*`. Symlinks
//! and folders contribute nothing. Deletions are assumed to free space even
//! under trash/versioning policies, which avoids false low-space warnings.
//! The result is advisory: the orchestrator compares it against the
//! reported free space when the backend can provide one.

use twinfold_core::domain::{BaseFolderPair, BySide, ContainerRef, Side, SyncOperation};

pub struct DiskSpaceEstimator;

impl DiskSpaceEstimator {
    /// `(left, right)` net bytes needed; negative values mean space is
    /// freed.
    pub fn calculate(tree: &BaseFolderPair) -> BySide<i64> {
        let mut needed = BySide::new(0i64, 0i64);
        Self::recurse(tree, ContainerRef::Base, &mut needed);
        needed
    }

    fn recurse(tree: &BaseFolderPair, container: ContainerRef, needed: &mut BySide<i64>) {
        use SyncOperation::*;
        let children = tree.children(container);

        for &id in &children.files {
            let Some(file) = tree.file(id) else { continue };
            match file.op() {
                CreateLeft => needed.left += file.file_size(Side::Right) as i64,
                CreateRight => needed.right += file.file_size(Side::Left) as i64,
                DeleteLeft => needed.left -= file.file_size(Side::Left) as i64,
                DeleteRight => needed.right -= file.file_size(Side::Right) as i64,
                OverwriteLeft => {
                    needed.left -= file.file_size(Side::Left) as i64;
                    needed.left += file.file_size(Side::Right) as i64;
                }
                OverwriteRight => {
                    needed.right -= file.file_size(Side::Right) as i64;
                    needed.right += file.file_size(Side::Left) as i64;
                }
                DoNothing | Equal | UnresolvedConflict | CopyMetadataLeft | CopyMetadataRight
                | MoveLeftFrom | MoveRightFrom | MoveLeftTo | MoveRightTo => {}
            }
        }

        for &id in &children.folders {
            Self::recurse(tree, ContainerRef::Folder(id), needed);
        }
    }
}
