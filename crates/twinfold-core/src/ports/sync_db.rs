//! Sync-database port.
//!
//! The database records the last-known-good state of a base pair so the
//! next comparison can derive sync directions (two-way mode) and detect
//! moves. Its format and storage are owned by the implementing crate.

use async_trait::async_trait;

use crate::domain::errors::{FileError, SyncAborted};
use crate::domain::tree::BaseFolderPair;

/// Status callback of a database save, driven on the main task.
#[async_trait]
pub trait SaveStatusNotify: Send + Sync {
    async fn on_status(&self, msg: &str) -> Result<(), SyncAborted>;
}

#[async_trait]
pub trait SyncStateStore: Send + Sync {
    /// Persists the current (post-sync) state of `base_pair` as the last
    /// synchronous state of both sides.
    async fn save_synchronous_state(
        &self,
        base_pair: &BaseFolderPair,
        notify: &dyn SaveStatusNotify,
    ) -> Result<(), FileError>;
}
