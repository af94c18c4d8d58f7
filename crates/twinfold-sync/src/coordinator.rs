//! Main ↔ worker communication for one pass over a base pair.
//!
//! [`AsyncCoordinator`] is the actor between the worker tasks and the
//! front-end's [`ProgressReporter`]:
//!
//! - processed/total statistics are lock-free atomic deltas; the main task
//!   consumes them by subtracting what it just read and forwarding it;
//! - each worker owns a status slot; the main task aggregates them into a
//!   single `"[N threads] …"` line on every poll tick;
//! - log lines and error prompts travel over bounded channels of capacity
//!   one, so at most one log and one error can be pending and a second
//!   sender waits until the main task has drained the previous request;
//! - `finish_now` is a watch flag raised when every worker went idle.
//!
//! Every worker-side call that can block is also a cancellation point.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use twinfold_core::domain::{StepError, StepResult, SyncAborted};
use twinfold_core::ports::{ErrorResponse, ProgressReporter};

pub(crate) struct ErrorRequest {
    pub msg: String,
    pub retry_number: usize,
    pub reply: oneshot::Sender<ErrorResponse>,
}

#[derive(Default)]
struct ThreadStatus {
    active: bool,
    status_msg: String,
}

/// Receiving half of the coordinator, owned by the main task of a pass.
pub struct CoordinatorInbox {
    error_rx: mpsc::Receiver<ErrorRequest>,
    log_rx: mpsc::Receiver<String>,
    finish_rx: watch::Receiver<bool>,
}

impl CoordinatorInbox {
    pub(crate) fn finish_signaled(&self) -> bool {
        *self.finish_rx.borrow()
    }
}

pub struct AsyncCoordinator {
    items_processed: AtomicI64,
    bytes_processed: AtomicI64,
    items_total: AtomicI64,
    bytes_total: AtomicI64,

    status: StdMutex<Vec<ThreadStatus>>,

    error_tx: mpsc::Sender<ErrorRequest>,
    log_tx: mpsc::Sender<String>,
    finish_tx: watch::Sender<bool>,

    thread_count: usize,
    token: CancellationToken,
}

impl AsyncCoordinator {
    pub fn new(thread_count: usize, token: CancellationToken) -> (Arc<Self>, CoordinatorInbox) {
        let (error_tx, error_rx) = mpsc::channel(1);
        let (log_tx, log_rx) = mpsc::channel(1);
        let (finish_tx, finish_rx) = watch::channel(false);

        let mut status = Vec::new();
        status.resize_with(thread_count, ThreadStatus::default);

        let coordinator = Arc::new(Self {
            items_processed: AtomicI64::new(0),
            bytes_processed: AtomicI64::new(0),
            items_total: AtomicI64::new(0),
            bytes_total: AtomicI64::new(0),
            status: StdMutex::new(status),
            error_tx,
            log_tx,
            finish_tx,
            thread_count,
            token,
        });
        (
            coordinator,
            CoordinatorInbox {
                error_rx,
                log_rx,
                finish_rx,
            },
        )
    }

    // ---- worker context, non-blocking --------------------------------------

    pub fn update_data_processed(&self, items_delta: i64, bytes_delta: i64) {
        self.items_processed.fetch_add(items_delta, Ordering::Relaxed);
        self.bytes_processed.fetch_add(bytes_delta, Ordering::Relaxed);
    }

    pub fn update_data_total(&self, items_delta: i64, bytes_delta: i64) {
        self.items_total.fetch_add(items_delta, Ordering::Relaxed);
        self.bytes_total.fetch_add(bytes_delta, Ordering::Relaxed);
    }

    /// Cancellation point usable from synchronous callbacks.
    pub fn interruption_point(&self) -> StepResult<()> {
        if self.token.is_cancelled() {
            Err(StepError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Updates this worker's status slot; also a cancellation point.
    pub fn report_status(&self, msg: &str, thread_idx: usize) -> StepResult<()> {
        {
            let mut status = self.status.lock().expect("status mutex poisoned");
            if let Some(slot) = status.get_mut(thread_idx) {
                slot.status_msg = msg.to_string();
            }
        }
        self.interruption_point()
    }

    // ---- worker context, blocking ------------------------------------------

    /// Queues a log line; waits until the previous line was drained.
    pub async fn log_info(&self, msg: &str, thread_idx: usize) -> StepResult<()> {
        let line = if self.thread_count > 1 {
            format!("[{}] {msg}", thread_idx + 1)
        } else {
            msg.to_string()
        };
        tokio::select! {
            sent = self.log_tx.send(line) => {
                sent.map_err(|_| StepError::Interrupted)
            }
            _ = self.token.cancelled() => Err(StepError::Interrupted),
        }
    }

    /// Status update + log line.
    ///
    /// Called while the worker holds the core mutex: workers re-acquiring
    /// the mutex after parallel I/O stall behind a pending prompt, which
    /// doubles as the pause mechanism.
    pub async fn report_info(&self, msg: &str, thread_idx: usize) -> StepResult<()> {
        self.report_status(msg, thread_idx)?;
        self.log_info(msg, thread_idx).await
    }

    /// Queues an error prompt and blocks until the user answered.
    pub async fn report_error(
        &self,
        msg: &str,
        retry_number: usize,
        thread_idx: usize,
    ) -> StepResult<ErrorResponse> {
        let msg = if self.thread_count > 1 {
            format!("[{}] {msg}", thread_idx + 1)
        } else {
            msg.to_string()
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = ErrorRequest {
            msg,
            retry_number,
            reply: reply_tx,
        };
        tokio::select! {
            sent = self.error_tx.send(request) => {
                sent.map_err(|_| StepError::Interrupted)?;
            }
            _ = self.token.cancelled() => return Err(StepError::Interrupted),
        }
        tokio::select! {
            reply = reply_rx => reply.map_err(|_| StepError::Interrupted),
            _ = self.token.cancelled() => Err(StepError::Interrupted),
        }
    }

    // ---- worker lifecycle ---------------------------------------------------

    pub fn notify_work_begin(&self, thread_idx: usize) {
        let mut status = self.status.lock().expect("status mutex poisoned");
        if let Some(slot) = status.get_mut(thread_idx) {
            slot.active = true;
        }
    }

    pub fn notify_work_end(&self, thread_idx: usize) {
        let mut status = self.status.lock().expect("status mutex poisoned");
        if let Some(slot) = status.get_mut(thread_idx) {
            slot.active = false;
            slot.status_msg.clear();
        }
    }

    /// Raised by the workload when every worker is idle and nothing is
    /// queued: the pass is complete.
    pub fn notify_all_done(&self) {
        debug!("all worker tasks idle, finishing pass");
        self.finish_tx.send_replace(true);
    }

    // ---- main context -------------------------------------------------------

    fn current_status(&self) -> String {
        let status = self.status.lock().expect("status mutex poisoned");
        let active = status.iter().filter(|s| s.active).count();
        let msg = status
            .iter()
            .find(|s| s.active && !s.status_msg.is_empty())
            .map(|s| s.status_msg.clone())
            .unwrap_or_default();
        if active >= 2 {
            format!("[{active} threads] {msg}")
        } else {
            msg
        }
    }

    fn flush_stats(&self, reporter: &dyn ProgressReporter) {
        let items = self.items_processed.load(Ordering::Relaxed);
        let bytes = self.bytes_processed.load(Ordering::Relaxed);
        if items != 0 || bytes != 0 {
            // subtract what we consumed rather than storing zero: workers
            // may have added more in the meantime
            self.items_processed.fetch_sub(items, Ordering::Relaxed);
            self.bytes_processed.fetch_sub(bytes, Ordering::Relaxed);
            reporter.update_data_processed(items, bytes);
        }
        let items = self.items_total.load(Ordering::Relaxed);
        let bytes = self.bytes_total.load(Ordering::Relaxed);
        if items != 0 || bytes != 0 {
            self.items_total.fetch_sub(items, Ordering::Relaxed);
            self.bytes_total.fetch_sub(bytes, Ordering::Relaxed);
            reporter.update_data_total(items, bytes);
        }
    }

    /// Drives the pass on the main task: answers error prompts and log
    /// lines without delay, flushes statistics and the aggregated status
    /// on every poll tick, and returns once `notify_all_done` fired.
    pub async fn wait_until_done(
        &self,
        mut inbox: CoordinatorInbox,
        poll_interval: Duration,
        reporter: &dyn ProgressReporter,
    ) -> Result<(), SyncAborted> {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                request = inbox.error_rx.recv() => {
                    if let Some(request) = request {
                        let response = reporter
                            .report_error(&request.msg, request.retry_number)
                            .await?;
                        // a worker interrupted while waiting drops the
                        // receiving end; nothing to do then
                        let _ = request.reply.send(response);
                    }
                }
                line = inbox.log_rx.recv() => {
                    if let Some(line) = line {
                        reporter.log_info(&line).await?;
                    }
                }
                _ = inbox.finish_rx.changed() => {
                    if *inbox.finish_rx.borrow() {
                        // drain what workers queued just before going idle
                        while let Ok(line) = inbox.log_rx.try_recv() {
                            reporter.log_info(&line).await?;
                        }
                        while let Ok(request) = inbox.error_rx.try_recv() {
                            let response = reporter
                                .report_error(&request.msg, request.retry_number)
                                .await?;
                            let _ = request.reply.send(response);
                        }
                        // one last flush for accurate end statistics
                        self.flush_stats(reporter);
                        return Ok(());
                    }
                }
                _ = ticker.tick() => {
                    reporter.report_status(&self.current_status()).await?;
                    self.flush_stats(reporter);
                }
            }
        }
    }
}

/// Runs `op` in a retry loop, prompting the user through the coordinator on
/// every [`FileError`]. Returns the ignored error message when the user
/// chose to skip the item.
pub(crate) async fn try_reporting_error<F, Fut>(
    acb: &AsyncCoordinator,
    thread_idx: usize,
    mut op: F,
) -> StepResult<Option<String>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = StepResult<()>>,
{
    for retry_number in 0.. {
        match op().await {
            Ok(()) => return Ok(None),
            Err(StepError::Interrupted) => return Err(StepError::Interrupted),
            Err(StepError::File(error)) => {
                match acb
                    .report_error(&error.to_string(), retry_number, thread_idx)
                    .await?
                {
                    ErrorResponse::Ignore => return Ok(Some(error.to_string())),
                    ErrorResponse::Retry => continue,
                }
            }
        }
    }
    unreachable!("retry loop only exits through return")
}

/// Statistics reporting scoped to a single item of work.
///
/// Constructed with the item's expected `(items, bytes)` contribution.
/// Deltas flow through to the processed counters as work happens; on
/// [`finish`](Self::finish) the expected total is corrected to the actual
/// amount (sparse/compressed files, diverged subtrees). When the reporter
/// is dropped *without* `finish` — the item failed or was interrupted —
/// the already-reported amount is added back to the total instead, so the
/// remaining expected work grows rather than shrinks.
pub struct StatReporter<'a> {
    items_expected: i64,
    bytes_expected: i64,
    items_reported: AtomicI64,
    bytes_reported: AtomicI64,
    thread_idx: usize,
    acb: &'a AsyncCoordinator,
    finished: AtomicBool,
}

impl<'a> StatReporter<'a> {
    pub fn new(
        items_expected: i64,
        bytes_expected: i64,
        thread_idx: usize,
        acb: &'a AsyncCoordinator,
    ) -> Self {
        Self {
            items_expected,
            bytes_expected,
            items_reported: AtomicI64::new(0),
            bytes_reported: AtomicI64::new(0),
            thread_idx,
            acb,
            finished: AtomicBool::new(false),
        }
    }

    pub fn report_status(&self, msg: &str) -> StepResult<()> {
        self.acb.report_status(msg, self.thread_idx)
    }

    pub fn report_delta(&self, items_delta: i64, bytes_delta: i64) -> StepResult<()> {
        self.acb.update_data_processed(items_delta, bytes_delta);
        let items = self.items_reported.fetch_add(items_delta, Ordering::Relaxed) + items_delta;
        let bytes = self.bytes_reported.fetch_add(bytes_delta, Ordering::Relaxed) + bytes_delta;

        // keep "processed <= total" even transiently: excess above the
        // expectation is added to the total right away
        if items > self.items_expected {
            self.acb.update_data_total(items - self.items_expected, 0);
            self.items_reported
                .store(self.items_expected, Ordering::Relaxed);
        }
        if bytes > self.bytes_expected {
            self.acb.update_data_total(0, bytes - self.bytes_expected);
            self.bytes_reported
                .store(self.bytes_expected, Ordering::Relaxed);
        }

        self.acb.interruption_point()
    }

    /// Success-path exit: absorbs the difference between expected and
    /// actual work into the total.
    pub fn finish(self) {
        self.finished.store(true, Ordering::Relaxed);
        let items = self.items_reported.load(Ordering::Relaxed);
        let bytes = self.bytes_reported.load(Ordering::Relaxed);
        self.acb
            .update_data_total(items - self.items_expected, bytes - self.bytes_expected);
    }
}

impl Drop for StatReporter<'_> {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::Relaxed) {
            // failed scope: the work will be retried or was skipped, so
            // the expected total grows by what was already reported
            let items = self.items_reported.load(Ordering::Relaxed);
            let bytes = self.bytes_reported.load(Ordering::Relaxed);
            self.acb.update_data_total(items, bytes);
        }
    }
}
