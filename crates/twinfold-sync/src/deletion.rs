//! Policy-dispatched removal of files, folders, and symlinks.
//!
//! One [`DeletionHandler`] exists per side per base pair. The trash session
//! and the versioning handle are constructed lazily on first removal:
//! their construction may fail, and such a failure must surface as a
//! normal per-item error that the user can retry or ignore, not as a setup
//! error.
//!
//! Status texts are rendered once per policy at construction, so workers
//! never branch on the policy when reporting status.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;

use twinfold_core::config::{DeletionPolicy, VersioningStyle, TEMP_FILE_SUFFIX};
use twinfold_core::domain::{RelPath, StepResult, SyncPath};
use twinfold_core::ports::{
    CleanupError, CleanupNotify, FileDescriptor, FileSystem, ProgressReporter, RevisionNotify,
    TrashSession, Versioner,
};

use crate::coordinator::StatReporter;

pub(crate) const TXT_MOVING_FILE_X_TO_Y: &str = "Moving file %x to %y";
pub(crate) const TXT_MOVING_FOLDER_X_TO_Y: &str = "Moving folder %x to %y";

pub(crate) fn fmt_path(template: &str, path: &str) -> String {
    template.replace("%x", path)
}

pub(crate) fn fmt_paths(template: &str, from: &str, to: &str) -> String {
    template.replace("%x", from).replace("%y", to)
}

pub struct DeletionHandler {
    fs: Arc<dyn FileSystem>,
    policy: DeletionPolicy,
    base_folder_path: SyncPath,

    versioning_folder_path: SyncPath,
    versioning_style: VersioningStyle,
    timestamp: DateTime<Utc>,

    trash_session: OnceCell<Arc<dyn TrashSession>>,
    versioner: OnceCell<Arc<dyn Versioner>>,

    txt_removing_file: String,
    txt_removing_symlink: String,
    txt_removing_folder: String,
}

impl DeletionHandler {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        base_folder_path: SyncPath,
        policy: DeletionPolicy,
        versioning_folder_phrase: &str,
        versioning_style: VersioningStyle,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let versioning_folder_path = SyncPath::new(versioning_folder_phrase);
        let (txt_removing_file, txt_removing_symlink, txt_removing_folder) = match policy {
            DeletionPolicy::Permanent => (
                "Deleting file %x".to_string(),
                "Deleting symbolic link %x".to_string(),
                "Deleting folder %x".to_string(),
            ),
            DeletionPolicy::Trash => (
                "Moving file %x to the recycle bin".to_string(),
                "Moving symbolic link %x to the recycle bin".to_string(),
                "Moving folder %x to the recycle bin".to_string(),
            ),
            DeletionPolicy::Versioning => (
                fmt_paths(TXT_MOVING_FILE_X_TO_Y, "%x", &versioning_folder_path.to_string()),
                format!("Moving symbolic link %x to {versioning_folder_path}"),
                fmt_paths(
                    TXT_MOVING_FOLDER_X_TO_Y,
                    "%x",
                    &versioning_folder_path.to_string(),
                ),
            ),
        };
        Self {
            fs,
            policy,
            base_folder_path,
            versioning_folder_path,
            versioning_style,
            timestamp,
            trash_session: OnceCell::new(),
            versioner: OnceCell::new(),
            txt_removing_file,
            txt_removing_symlink,
            txt_removing_folder,
        }
    }

    pub fn txt_removing_file(&self) -> &str {
        &self.txt_removing_file
    }

    pub fn txt_removing_symlink(&self) -> &str {
        &self.txt_removing_symlink
    }

    pub fn txt_removing_folder(&self) -> &str {
        &self.txt_removing_folder
    }

    async fn trash_session(&self) -> Result<&Arc<dyn TrashSession>, twinfold_core::domain::FileError> {
        self.trash_session
            .get_or_try_init(|| self.fs.create_trash_session(&self.base_folder_path))
            .await
    }

    async fn versioner(&self) -> Result<&Arc<dyn Versioner>, twinfold_core::domain::FileError> {
        self.versioner
            .get_or_try_init(|| {
                self.fs.create_versioner(
                    &self.versioning_folder_path,
                    self.versioning_style,
                    self.timestamp,
                )
            })
            .await
    }

    /// Removes one file according to the policy. Relative paths carrying
    /// the reserved temporary suffix are always deleted permanently:
    /// interim files of two-step moves must never reach trash/versioning.
    pub async fn remove_file(
        &self,
        descr: &FileDescriptor,
        rel_path: &RelPath,
        reporter: &StatReporter<'_>,
    ) -> StepResult<()> {
        if rel_path.ends_with_suffix(TEMP_FILE_SUFFIX) {
            self.fs.remove_file_if_exists(&descr.path).await?;
        } else {
            match self.policy {
                DeletionPolicy::Permanent => {
                    self.fs.remove_file_if_exists(&descr.path).await?;
                }
                DeletionPolicy::Trash => {
                    self.trash_session()
                        .await?
                        .recycle_item(&descr.path, rel_path)
                        .await?;
                }
                DeletionPolicy::Versioning => {
                    self.versioner()
                        .await?
                        .revision_file(descr, rel_path, &|bytes| {
                            reporter.report_delta(0, bytes as i64)
                        })
                        .await?;
                }
            }
        }

        // report even when the item was already gone: observable I/O work
        // was spent verifying that
        reporter.report_delta(1, 0)
    }

    pub async fn remove_symlink(
        &self,
        link_path: &SyncPath,
        rel_path: &RelPath,
        reporter: &StatReporter<'_>,
    ) -> StepResult<()> {
        match self.policy {
            DeletionPolicy::Permanent => {
                self.fs.remove_symlink_if_exists(link_path).await?;
            }
            DeletionPolicy::Trash => {
                self.trash_session()
                    .await?
                    .recycle_item(link_path, rel_path)
                    .await?;
            }
            DeletionPolicy::Versioning => {
                self.versioner()
                    .await?
                    .revision_symlink(link_path, rel_path)
                    .await?;
            }
        }
        reporter.report_delta(1, 0)
    }

    /// Removes a folder with its subtree. Permanent deletion recurses and
    /// reports one item per child; a trash move is one logical operation
    /// irrespective of the child count; versioning emits one delta per
    /// moved child through the handle's callbacks.
    pub async fn remove_folder(
        &self,
        folder_path: &SyncPath,
        rel_path: &RelPath,
        reporter: &StatReporter<'_>,
    ) -> StepResult<()> {
        match self.policy {
            DeletionPolicy::Permanent => {
                let on_file = |display_path: &str| {
                    reporter.report_status(&fmt_path(&self.txt_removing_file, display_path))?;
                    reporter.report_delta(1, 0)
                };
                let on_folder = |display_path: &str| {
                    reporter.report_status(&fmt_path(&self.txt_removing_folder, display_path))?;
                    reporter.report_delta(1, 0)
                };
                self.fs
                    .remove_folder_if_exists_recursive(folder_path, &on_file, &on_folder)
                    .await?;
            }
            DeletionPolicy::Trash => {
                self.trash_session()
                    .await?
                    .recycle_item(folder_path, rel_path)
                    .await?;
                reporter.report_delta(1, 0)?;
            }
            DeletionPolicy::Versioning => {
                let notify = FolderRevisionProgress { reporter };
                self.versioner()
                    .await?
                    .revision_folder(folder_path, rel_path, &notify)
                    .await?;
            }
        }
        Ok(())
    }

    /// Flushes buffered trash moves after the pair finished. With
    /// `allow_callback_error` the status callback may propagate a user
    /// abort; abort paths call this with `false` so cleanup completes
    /// silently.
    pub async fn try_cleanup(
        &self,
        reporter: &dyn ProgressReporter,
        allow_callback_error: bool,
    ) -> Result<(), CleanupError> {
        match self.policy {
            DeletionPolicy::Permanent => Ok(()),
            DeletionPolicy::Trash => match self.trash_session.get() {
                Some(session) => {
                    let notify = TrashCleanupStatus {
                        reporter,
                        template: &self.txt_removing_file,
                        allow_callback_error,
                    };
                    session.try_cleanup(&notify).await
                }
                None => Ok(()),
            },
            // hook for a future version-limiting pass
            DeletionPolicy::Versioning => Ok(()),
        }
    }
}

struct FolderRevisionProgress<'a> {
    reporter: &'a StatReporter<'a>,
}

impl RevisionNotify for FolderRevisionProgress<'_> {
    fn on_before_file_move(&self, from_display: &str, to_display: &str) -> StepResult<()> {
        self.reporter
            .report_status(&fmt_paths(TXT_MOVING_FILE_X_TO_Y, from_display, to_display))?;
        self.reporter.report_delta(1, 0)
    }

    fn on_before_folder_move(&self, from_display: &str, to_display: &str) -> StepResult<()> {
        self.reporter.report_status(&fmt_paths(
            TXT_MOVING_FOLDER_X_TO_Y,
            from_display,
            to_display,
        ))?;
        self.reporter.report_delta(1, 0)
    }

    fn on_bytes(&self, bytes_delta: u64) -> StepResult<()> {
        self.reporter.report_delta(0, bytes_delta as i64)
    }
}

struct TrashCleanupStatus<'a> {
    reporter: &'a dyn ProgressReporter,
    template: &'a str,
    allow_callback_error: bool,
}

#[async_trait::async_trait]
impl CleanupNotify for TrashCleanupStatus<'_> {
    async fn on_status(
        &self,
        display_path: Option<&str>,
    ) -> Result<(), twinfold_core::domain::SyncAborted> {
        let result = match display_path {
            Some(path) => {
                self.reporter
                    .report_status(&fmt_path(self.template, path))
                    .await
            }
            None => self.reporter.request_ui_refresh().await,
        };
        if self.allow_callback_error {
            result
        } else {
            Ok(())
        }
    }
}
