//! Configuration types for a synchronization run.
//!
//! Front-ends build these from their own persisted settings and hand them
//! to the engine; the engine never reads configuration files itself.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Reserved suffix for temporary files created by the engine (interim names
/// of two-step moves, fail-safe copy intermediates).
///
/// Any relative path ending with it is deleted permanently regardless of
/// the configured deletion policy.
pub const TEMP_FILE_SUFFIX: &str = ".twf_tmp";

/// What happens to items removed or overwritten on a side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionPolicy {
    /// Delete irreversibly.
    Permanent,
    /// Move to the system trash.
    Trash,
    /// Move into a timestamped archive tree.
    Versioning,
}

/// Layout of the versioning archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersioningStyle {
    /// Keep one revision, replacing the previous one.
    Replace,
    /// Append a timestamp to each revisioned file name.
    TimestampFile,
    /// Group revisions under one timestamped folder per run.
    TimestampFolder,
}

/// The comparison variant a pair was configured with; the engine only uses
/// it for log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncVariant {
    TwoWay,
    Mirror,
    Update,
    Custom,
}

impl SyncVariant {
    pub fn display_name(self) -> &'static str {
        match self {
            SyncVariant::TwoWay => "Two way",
            SyncVariant::Mirror => "Mirror",
            SyncVariant::Update => "Update",
            SyncVariant::Custom => "Custom",
        }
    }
}

/// Per-base-pair synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairSyncConfig {
    /// Whether the comparison step was asked to detect moved files. The
    /// engine acts on the move-refs present in the tree either way; this
    /// flag is carried for front-ends and logging.
    pub detect_moved_files: bool,
    pub handle_deletion: DeletionPolicy,
    pub versioning_style: VersioningStyle,
    /// Target folder for [`DeletionPolicy::Versioning`], as entered by the
    /// user (may be empty, which is a pre-flight error for that policy).
    pub versioning_folder_phrase: String,
    pub sync_variant: SyncVariant,
    /// Save the last-synchronous state to the sync database after this
    /// pair completes.
    pub save_sync_db: bool,
}

impl Default for PairSyncConfig {
    fn default() -> Self {
        Self {
            detect_moved_files: false,
            handle_deletion: DeletionPolicy::Permanent,
            versioning_style: VersioningStyle::Replace,
            versioning_folder_phrase: String::new(),
            sync_variant: SyncVariant::Custom,
            save_sync_db: false,
        }
    }
}

/// Engine-wide settings for one synchronization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Re-read and compare every copied file against its source.
    pub verify_copied_files: bool,
    /// Copy permissions along with file content (only honored when both
    /// sides support it).
    pub copy_file_permissions: bool,
    /// Copy into a temporary file first and rename into place on success.
    pub fail_safe_file_copy: bool,
    /// Parallel operation count per device root; missing devices run with
    /// a single worker.
    pub device_parallel_ops: HashMap<PathBuf, usize>,
    /// Interval at which the main task flushes accumulated statistics and
    /// status to the progress reporter.
    pub status_poll_interval_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            verify_copied_files: false,
            copy_file_permissions: false,
            fail_safe_file_copy: true,
            device_parallel_ops: HashMap::new(),
            status_poll_interval_ms: 50,
        }
    }
}
