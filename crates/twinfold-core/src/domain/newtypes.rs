//! Typed path wrappers used across the engine and its ports.
//!
//! Two notions of path exist in the engine:
//!
//! - [`SyncPath`]: an absolute path on some (abstract) filesystem device.
//!   The empty path is the "null path": a base folder side that is not
//!   configured.
//! - [`RelPath`]: a path relative to a base folder, used for deletion-policy
//!   bookkeeping (trash/versioning keep the logical location) and for the
//!   reserved temporary-suffix rule.
//!
//! Path components use the platform's native separator.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Absolute path on an abstract filesystem device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncPath(PathBuf);

impl SyncPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// The "null path": a side that is not configured.
    pub fn null() -> Self {
        Self(PathBuf::new())
    }

    pub fn is_null(&self) -> bool {
        self.0.as_os_str().is_empty()
    }

    pub fn join(&self, name: &str) -> SyncPath {
        Self(self.0.join(name))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Root component used as the key for per-device parallelism lookup.
    pub fn device_root(&self) -> PathBuf {
        self.0
            .components()
            .next()
            .map(|c| PathBuf::from(c.as_os_str()))
            .unwrap_or_default()
    }

    /// True if `self` is `other` or an ancestor of `other`.
    pub fn contains(&self, other: &SyncPath) -> bool {
        !self.is_null() && other.0.starts_with(&self.0)
    }

    /// Path of `other` relative to `self`, when contained.
    pub fn rel_to(&self, other: &SyncPath) -> Option<RelPath> {
        other
            .0
            .strip_prefix(&self.0)
            .ok()
            .map(|p| RelPath(p.to_path_buf()))
    }
}

impl Display for SyncPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<&str> for SyncPath {
    fn from(s: &str) -> Self {
        Self(PathBuf::from(s))
    }
}

/// Path relative to a base folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelPath(PathBuf);

impl RelPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn join(&self, name: &str) -> RelPath {
        Self(self.0.join(name))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn file_name(&self) -> &str {
        self.0
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// True if the final path component ends with `suffix`.
    ///
    /// Used for the reserved temporary-file suffix rule: such items are
    /// always deleted permanently regardless of deletion policy.
    pub fn ends_with_suffix(&self, suffix: &str) -> bool {
        self.file_name().ends_with(suffix)
    }
}

impl Display for RelPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<&str> for RelPath {
    fn from(s: &str) -> Self {
        Self(PathBuf::from(s))
    }
}

/// Compares item names the way the target filesystems do for clash
/// detection: case differences do not distinguish names.
pub fn equal_item_names(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}
