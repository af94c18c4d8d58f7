//! Domain model of the comparison tree and its sync operations.

pub mod errors;
pub mod newtypes;
pub mod sync_op;
pub mod tree;

pub use errors::{FileError, FileErrorKind, StepError, StepResult, SyncAborted};
pub use newtypes::{RelPath, SyncPath};
pub use sync_op::{BySide, Side, SyncOperation};
pub use tree::{
    BaseFolderPair, ChildLists, ContainerRef, FileAttributes, FilePair, FileSyncedState,
    FolderAttributes, FolderPair, LinkAttributes, ObjectId, PathFilter, SymlinkPair,
};
