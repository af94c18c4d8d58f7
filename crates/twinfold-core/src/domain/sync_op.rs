//! The closed set of per-item synchronization operations.

use serde::{Deserialize, Serialize};

/// One of the two sides of a folder pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// A pair of values, one per side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BySide<T> {
    pub left: T,
    pub right: T,
}

impl<T> BySide<T> {
    pub fn new(left: T, right: T) -> Self {
        Self { left, right }
    }

    pub fn get(&self, side: Side) -> &T {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn get_mut(&mut self, side: Side) -> &mut T {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

/// The operation scheduled for one tree item by the comparison step.
///
/// This is an input to the engine: the comparison engine annotates every
/// item with exactly one of these. Each `Move*From` entry is paired with a
/// `Move*To` entry through a move-ref; breaking the pair demotes both to
/// ordinary delete + create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncOperation {
    CreateLeft,
    CreateRight,
    DeleteLeft,
    DeleteRight,
    OverwriteLeft,
    OverwriteRight,
    CopyMetadataLeft,
    CopyMetadataRight,
    MoveLeftFrom,
    MoveLeftTo,
    MoveRightFrom,
    MoveRightTo,
    DoNothing,
    Equal,
    UnresolvedConflict,
}

impl SyncOperation {
    /// The side that is written by this operation, if any.
    pub fn target_side(self) -> Option<Side> {
        use SyncOperation::*;
        match self {
            CreateLeft | DeleteLeft | OverwriteLeft | CopyMetadataLeft | MoveLeftFrom
            | MoveLeftTo => Some(Side::Left),
            CreateRight | DeleteRight | OverwriteRight | CopyMetadataRight | MoveRightFrom
            | MoveRightTo => Some(Side::Right),
            DoNothing | Equal | UnresolvedConflict => None,
        }
    }

    pub fn is_delete(self) -> bool {
        matches!(self, SyncOperation::DeleteLeft | SyncOperation::DeleteRight)
    }

    pub fn delete(side: Side) -> Self {
        match side {
            Side::Left => SyncOperation::DeleteLeft,
            Side::Right => SyncOperation::DeleteRight,
        }
    }

    pub fn create(side: Side) -> Self {
        match side {
            Side::Left => SyncOperation::CreateLeft,
            Side::Right => SyncOperation::CreateRight,
        }
    }

    pub fn move_from(side: Side) -> Self {
        match side {
            Side::Left => SyncOperation::MoveLeftFrom,
            Side::Right => SyncOperation::MoveRightFrom,
        }
    }

    pub fn move_to(side: Side) -> Self {
        match side {
            Side::Left => SyncOperation::MoveLeftTo,
            Side::Right => SyncOperation::MoveRightTo,
        }
    }
}
