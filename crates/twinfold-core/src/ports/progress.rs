//! Progress reporter port (driven by the main task only).
//!
//! The front-end (GUI, CLI, batch runner) implements this to receive
//! status, statistics, log lines, warnings, and error-retry prompts. Every
//! method may signal a user abort by returning [`SyncAborted`]; the engine
//! unwinds the run cooperatively when it does.

use async_trait::async_trait;

use crate::domain::errors::SyncAborted;

/// The user's answer to an error-retry prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorResponse {
    /// Skip the failed item, record the message, continue the run.
    Ignore,
    /// Re-execute the failed operation.
    Retry,
}

/// Kinds of batched, dismissible warnings the engine can raise. The
/// front-end typically persists a "don't show again" flag per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Warning {
    UnresolvedConflicts,
    SignificantDifference,
    NotEnoughDiskSpace,
    RecycleBinUnavailable,
    DependentBaseFolders,
    VersioningFolderPartOfSync,
    ModificationTimeError,
}

/// Callback surface of the front-end.
///
/// Statistics setters are non-blocking and may be called at a high rate;
/// everything else is awaited on the main task and may prompt the user.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// Add to the processed items/bytes counters shown to the user.
    fn update_data_processed(&self, items_delta: i64, bytes_delta: i64);

    /// Add to the expected-total items/bytes counters.
    fn update_data_total(&self, items_delta: i64, bytes_delta: i64);

    /// Announce the expected workload of the synchronization phase.
    fn init_new_phase(&self, items_total: i64, bytes_total: i64);

    /// Replace the one-line status text.
    async fn report_status(&self, msg: &str) -> Result<(), SyncAborted>;

    /// Append a line to the log (also updates the status).
    async fn report_info(&self, msg: &str) -> Result<(), SyncAborted>;

    /// Append a line to the log without touching the status.
    async fn log_info(&self, msg: &str) -> Result<(), SyncAborted>;

    /// Prompt the user about a failed operation.
    async fn report_error(
        &self,
        msg: &str,
        retry_number: usize,
    ) -> Result<ErrorResponse, SyncAborted>;

    /// Record an error that skips the current folder pair.
    async fn report_fatal_error(&self, msg: &str) -> Result<(), SyncAborted>;

    /// Show a dismissible warning of the given kind.
    async fn report_warning(&self, msg: &str, warning: Warning) -> Result<(), SyncAborted>;

    /// Give the UI a chance to repaint during long main-task operations.
    async fn request_ui_refresh(&self) -> Result<(), SyncAborted>;

    /// Force a repaint before a long uninterruptible step.
    async fn force_ui_refresh(&self) -> Result<(), SyncAborted>;

    /// Ask the front-end to abort at the next opportunity; returns the
    /// abort signal for the caller to propagate.
    async fn abort_process_now(&self) -> SyncAborted {
        SyncAborted
    }
}
