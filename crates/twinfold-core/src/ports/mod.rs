//! Consumed ports (driven interfaces) of the sync engine.
//!
//! The engine talks to the outside world exclusively through these traits:
//! the abstract filesystem, the progress reporter of the front-end, the
//! versioning/trash handles, and the sync-state store. All of them are
//! implemented by adapter crates and injected by the caller.

pub mod filesystem;
pub mod progress;
pub mod sync_db;
pub mod versioning;

pub use filesystem::{
    CopyCallbacks, FileCopyResult, FileDescriptor, FileSystem, IoProgress, ItemType,
    RemovalNotify, StreamAttributes,
};
pub use progress::{ErrorResponse, ProgressReporter, Warning};
pub use sync_db::{SaveStatusNotify, SyncStateStore};
pub use versioning::{CleanupError, CleanupNotify, RevisionNotify, TrashSession, Versioner};
