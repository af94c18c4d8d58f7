//! Versioning and trash handles.
//!
//! Both are created lazily through the [`FileSystem`] factory methods:
//! their construction can fail (missing versioning folder, no recycler on
//! the device) and such failures must surface as ordinary per-item errors,
//! not as setup errors.
//!
//! [`FileSystem`]: super::filesystem::FileSystem

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::errors::{FileError, StepResult, SyncAborted};
use crate::domain::newtypes::{RelPath, SyncPath};

use super::filesystem::{FileDescriptor, IoProgress};

/// Per-move notification of a recursive folder revision.
pub trait RevisionNotify: Send + Sync {
    fn on_before_file_move(&self, from_display: &str, to_display: &str) -> StepResult<()>;
    fn on_before_folder_move(&self, from_display: &str, to_display: &str) -> StepResult<()>;
    fn on_bytes(&self, bytes_delta: u64) -> StepResult<()>;
}

/// Moves removed items into the versioning archive instead of deleting
/// them. Implementations are internally synchronized; multiple workers may
/// call them concurrently.
#[async_trait]
pub trait Versioner: Send + Sync {
    /// Returns whether the source file existed.
    async fn revision_file(
        &self,
        file: &FileDescriptor,
        rel_path: &RelPath,
        on_bytes: &IoProgress<'_>,
    ) -> StepResult<bool>;

    /// Returns whether the source symlink existed.
    async fn revision_symlink(&self, path: &SyncPath, rel_path: &RelPath)
        -> Result<bool, FileError>;

    /// Moves a whole folder into the archive, announcing each move through
    /// `notify`.
    async fn revision_folder(
        &self,
        path: &SyncPath,
        rel_path: &RelPath,
        notify: &dyn RevisionNotify,
    ) -> StepResult<()>;
}

/// Status callback of [`TrashSession::try_cleanup`], driven on the main
/// task; may propagate a user abort.
#[async_trait]
pub trait CleanupNotify: Send + Sync {
    /// `display_path` is `Some` while an item is being moved, `None` for a
    /// plain UI-refresh tick.
    async fn on_status(&self, display_path: Option<&str>) -> Result<(), SyncAborted>;
}

/// Failure of the post-sync trash flush.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error(transparent)]
    File(#[from] FileError),
    #[error(transparent)]
    Aborted(#[from] SyncAborted),
}

/// Buffers recycle-bin moves for one base folder and flushes them after
/// the pair completes (single physical operation on platforms that support
/// it). Internally synchronized.
#[async_trait]
pub trait TrashSession: Send + Sync {
    /// Returns whether the item existed.
    async fn recycle_item(&self, path: &SyncPath, rel_path: &RelPath) -> Result<bool, FileError>;

    /// Flushes buffered moves; called from the main task after sync.
    async fn try_cleanup(&self, notify: &dyn CleanupNotify) -> Result<(), CleanupError>;
}
