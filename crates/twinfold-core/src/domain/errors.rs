//! Error types shared between the engine and its ports.

use thiserror::Error;

/// Discriminates filesystem failures the engine reacts to specifically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileErrorKind {
    /// Any other I/O failure.
    Generic,
    /// A rename crossed a volume boundary; the caller must fall back to
    /// copy + delete.
    DifferentVolume,
    /// The file is locked by another process.
    FileLocked,
}

/// A failed filesystem operation, carrying a displayable message.
///
/// Ports produce these; the engine routes them through the retry prompt of
/// the progress reporter. The [`FileErrorKind`] lets call sites react to
/// specific failure classes without parsing messages.
#[derive(Debug, Clone, Error)]
#[error("{msg}")]
pub struct FileError {
    pub msg: String,
    pub kind: FileErrorKind,
}

impl FileError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            kind: FileErrorKind::Generic,
        }
    }

    pub fn with_kind(msg: impl Into<String>, kind: FileErrorKind) -> Self {
        Self {
            msg: msg.into(),
            kind,
        }
    }

    pub fn is_different_volume(&self) -> bool {
        self.kind == FileErrorKind::DifferentVolume
    }
}

/// Outcome of one unit of worker-side work.
///
/// `Interrupted` is a control-flow signal, not a domain error: it unwinds
/// the worker when cancellation was requested and is never shown to the
/// user. Every suspension point (status update, log line, error prompt,
/// I/O progress callback) may surface it.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    File(#[from] FileError),
    #[error("operation interrupted")]
    Interrupted,
}

pub type StepResult<T> = Result<T, StepError>;

/// The user aborted the whole run through the progress reporter.
#[derive(Debug, Clone, Copy, Error)]
#[error("synchronization aborted by user")]
pub struct SyncAborted;
