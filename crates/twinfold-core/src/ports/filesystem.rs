//! Abstract filesystem port.
//!
//! All file, folder, and symlink I/O of the engine goes through this trait;
//! concrete backends (local disk, SFTP, MTP, cloud) implement it. Paths are
//! [`SyncPath`]s; a backend is free to interpret them for its own device.
//!
//! ## Callback contract
//!
//! Operations that run for a long time accept callback objects. Callbacks
//! are invoked *during* the operation, outside any engine lock:
//!
//! - byte-progress callbacks must be called at a reasonable granularity so
//!   the engine can account traffic and poll cancellation;
//! - [`CopyCallbacks::on_delete_target`] must be invoked at the safe commit
//!   point of a transactional copy, after the new content is fully staged
//!   and immediately before the target name is (re)written;
//! - a callback returning an error must abort the operation, and the error
//!   must be returned unchanged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::VersioningStyle;
use crate::domain::errors::{FileError, StepResult};
use crate::domain::newtypes::SyncPath;

use super::versioning::{TrashSession, Versioner};

/// What an existing item is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    File,
    Folder,
    Symlink,
}

/// Source-file attributes handed to a transactional copy, buffered from
/// comparison time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamAttributes {
    pub mtime: i64,
    pub file_size: u64,
    pub file_id: Option<String>,
}

/// A path together with its buffered attributes.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub path: SyncPath,
    pub attrs: StreamAttributes,
}

/// Result of a successful transactional file copy.
#[derive(Debug, Clone, Default)]
pub struct FileCopyResult {
    pub file_size: u64,
    pub src_mtime: i64,
    pub dst_mtime: i64,
    pub src_file_id: Option<String>,
    pub dst_file_id: Option<String>,
    /// Set when the copy succeeded but the target modification time could
    /// not be adjusted; batched into a single warning at the end of a run.
    pub error_mod_time: Option<FileError>,
}

/// Byte-progress callback; returns `Interrupted` when the engine wants the
/// operation cancelled.
pub type IoProgress<'a> = dyn Fn(u64) -> StepResult<()> + Send + Sync + 'a;

/// Per-item notification of a recursive removal (one call per file/folder,
/// receives the display path).
pub type RemovalNotify<'a> = dyn Fn(&str) -> StepResult<()> + Send + Sync + 'a;

/// Callbacks of [`FileSystem::copy_file_transactional`].
#[async_trait]
pub trait CopyCallbacks: Send + Sync {
    /// Invoked at the safe commit point, just before the new content
    /// replaces the target. The engine routes this through its deletion
    /// policy so versioning can preserve the old content.
    async fn on_delete_target(&self) -> StepResult<()> {
        Ok(())
    }

    /// Unbuffered-I/O byte progress.
    fn on_progress(&self, bytes_delta: u64) -> StepResult<()> {
        let _ = bytes_delta;
        Ok(())
    }
}

/// The abstract filesystem consumed by the engine.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Type of an existing item; fails if the item does not exist.
    async fn item_type(&self, path: &SyncPath) -> Result<ItemType, FileError>;

    /// Type of an item, `None` if nothing exists at `path`.
    async fn item_type_if_exists(&self, path: &SyncPath) -> Result<Option<ItemType>, FileError>;

    /// Returns whether a file existed and was removed.
    async fn remove_file_if_exists(&self, path: &SyncPath) -> Result<bool, FileError>;

    async fn remove_symlink_if_exists(&self, path: &SyncPath) -> Result<bool, FileError>;

    /// Removes a file that is expected to exist (best-effort cleanup path).
    async fn remove_file_plain(&self, path: &SyncPath) -> Result<(), FileError>;

    /// Renames/moves an item on one device. Fails with
    /// [`FileErrorKind::DifferentVolume`](crate::domain::FileErrorKind) when
    /// source and target are on different volumes.
    async fn rename_item(&self, from: &SyncPath, to: &SyncPath) -> Result<(), FileError>;

    async fn copy_symlink(
        &self,
        src: &SyncPath,
        dst: &SyncPath,
        copy_permissions: bool,
    ) -> Result<(), FileError>;

    /// Creates `dst` as a copy of the folder `src` itself (no recursion).
    /// Behavior with an existing target is backend-defined.
    async fn copy_new_folder(
        &self,
        src: &SyncPath,
        dst: &SyncPath,
        copy_permissions: bool,
    ) -> Result<(), FileError>;

    async fn create_folder_if_missing_recursive(&self, path: &SyncPath) -> Result<(), FileError>;

    /// Removes a folder and its content; missing folders are not an error.
    /// Each removed file/folder is announced through the callbacks before
    /// its deletion.
    async fn remove_folder_if_exists_recursive(
        &self,
        path: &SyncPath,
        on_before_file_removal: &RemovalNotify<'_>,
        on_before_folder_removal: &RemovalNotify<'_>,
    ) -> StepResult<()>;

    /// Copies a file so that on success the target carries the complete new
    /// content and on failure the target is unchanged. `fail_safe` stages
    /// the content under a temporary name first.
    async fn copy_file_transactional(
        &self,
        src: &SyncPath,
        src_attrs: &StreamAttributes,
        dst: &SyncPath,
        copy_permissions: bool,
        fail_safe: bool,
        callbacks: &dyn CopyCallbacks,
    ) -> StepResult<FileCopyResult>;

    /// Target of a symlink, resolved recursively.
    async fn symlink_resolved_path(&self, path: &SyncPath) -> Result<SyncPath, FileError>;

    /// Free space on the volume containing `path`; `None` when the backend
    /// cannot tell (the pre-flight space check is skipped then).
    async fn free_disk_space(&self, path: &SyncPath) -> Result<Option<u64>, FileError>;

    async fn supports_recycle_bin(&self, path: &SyncPath) -> Result<bool, FileError>;

    /// Whether permission copying works between the two locations.
    async fn supports_permission_copy(
        &self,
        left: &SyncPath,
        right: &SyncPath,
    ) -> Result<bool, FileError>;

    /// Bitwise content comparison used by copy verification.
    async fn files_have_same_content(
        &self,
        lhs: &SyncPath,
        rhs: &SyncPath,
        on_progress: &IoProgress<'_>,
    ) -> StepResult<bool>;

    /// Flushes OS write buffers of a file (verification reads the real
    /// on-disk state afterwards).
    async fn flush_file_buffers(&self, path: &SyncPath) -> Result<(), FileError>;

    /// Opens a trash session for a base folder. Construction may fail (no
    /// recycler on this device); the engine creates sessions lazily so the
    /// failure surfaces as a normal per-item error.
    async fn create_trash_session(
        &self,
        base_folder: &SyncPath,
    ) -> Result<Arc<dyn TrashSession>, FileError>;

    /// Opens a versioning handle rooted at `folder`. Same lazy-construction
    /// contract as [`Self::create_trash_session`].
    async fn create_versioner(
        &self,
        folder: &SyncPath,
        style: VersioningStyle,
        timestamp: DateTime<Utc>,
    ) -> Result<Arc<dyn Versioner>, FileError>;
}

impl From<SyncPath> for FileDescriptor {
    fn from(path: SyncPath) -> Self {
        Self {
            path,
            attrs: StreamAttributes::default(),
        }
    }
}
