//! Bounded-concurrency, retrying delivery of volumes to a backend.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_channel::{Receiver, Sender};
use stowage_core::backoff::Backoff;
use stowage_core::cancel::sleep_or_cancel;
use stowage_core::error::{Result, StowageError};
use stowage_core::{FailurePolicy, JobInfo, Volume};
use stowage_storage::Backend;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// First error recorded by any worker; later errors are dropped.
#[derive(Debug, Default)]
pub struct FirstError {
    slot: Mutex<Option<StowageError>>,
}

impl FirstError {
    /// Store `err` unless an error is already held. Returns whether it was stored.
    pub fn record(&self, err: StowageError) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }
        *slot = Some(err);
        true
    }

    pub fn is_set(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn take(&self) -> Option<StowageError> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Per-run counters.
#[derive(Debug, Default)]
pub struct UploadSummary {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    bytes: AtomicU64,
}

impl UploadSummary {
    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Bytes of successfully uploaded volumes.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }
}

/// State shared by the workers of one run and its handle.
struct ChainContext {
    backend: Arc<dyn Backend>,
    job: JobInfo,
    /// Child of the caller's token; also fired by `abort` and the abort policy.
    cancel: CancellationToken,
    first_error: FirstError,
    summary: Arc<UploadSummary>,
}

/// Start a run that uploads every volume received on `inputs`.
///
/// Exactly `job.max_parallel_uploads` workers share the input channel. Each
/// successfully uploaded volume is sent, as the same `Arc`, on the returned
/// receiver, which closes once every worker has exited. The run ends when
/// `inputs` is closed and drained, or when it is cancelled. Dropping the
/// returned handle without joining leaves the workers running.
///
/// Must be called from within a Tokio runtime.
pub fn run_upload_chain(
    cancel: &CancellationToken,
    inputs: Receiver<Arc<Volume>>,
    backend: Arc<dyn Backend>,
    job: &JobInfo,
    destination: &str,
) -> (Receiver<Arc<Volume>>, UploadHandle) {
    let workers = job.max_parallel_uploads.max(1);
    let ctx = Arc::new(ChainContext {
        backend,
        job: job.clone(),
        cancel: cancel.child_token(),
        first_error: FirstError::default(),
        summary: Arc::new(UploadSummary::default()),
    });
    let (out_tx, out_rx) = async_channel::unbounded();

    tracing::info!(destination, workers, policy = %job.failure_policy, "starting upload run");

    let mut tasks = JoinSet::new();
    for worker in 0..workers {
        let span = tracing::debug_span!("upload_worker", worker, destination);
        tasks.spawn(upload_worker(ctx.clone(), inputs.clone(), out_tx.clone()).instrument(span));
    }

    let handle = UploadHandle {
        tasks,
        ctx,
        external: cancel.clone(),
        aborted: AtomicBool::new(false),
    };
    (out_rx, handle)
}

async fn upload_worker(
    ctx: Arc<ChainContext>,
    inputs: Receiver<Arc<Volume>>,
    outputs: Sender<Arc<Volume>>,
) {
    loop {
        let volume = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            next = inputs.recv() => match next {
                Ok(volume) => volume,
                Err(_) => break,
            },
        };

        match upload_with_retry(&ctx, &volume).await {
            Ok(()) => {
                ctx.summary.succeeded.fetch_add(1, Ordering::SeqCst);
                ctx.summary
                    .bytes
                    .fetch_add(volume.size(), Ordering::SeqCst);
                tracing::info!(
                    volume = volume.object_name(),
                    size = volume.size(),
                    "uploaded volume"
                );
                if outputs.send(volume).await.is_err() {
                    tracing::debug!("output receiver dropped, not forwarding volume");
                }
            }
            Err(StowageError::Cancelled) => break,
            Err(e) => {
                ctx.summary.failed.fetch_add(1, Ordering::SeqCst);
                tracing::error!(volume = volume.object_name(), "upload failed: {e}");
                ctx.first_error.record(e);
                if ctx.job.failure_policy == FailurePolicy::Abort {
                    ctx.cancel.cancel();
                    break;
                }
            }
        }
    }
    tracing::debug!("worker finished");
}

/// Upload one volume, retrying transient failures within the job's budget.
async fn upload_with_retry(ctx: &ChainContext, volume: &Volume) -> Result<()> {
    volume.checksum_bytes()?;

    let mut backoff = Backoff::new(
        ctx.job.initial_backoff,
        ctx.job.max_backoff_time,
        ctx.job.max_retry_time,
    );
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        tracing::debug!(volume = volume.object_name(), attempt, "upload attempt");

        let err = match ctx.backend.upload(&ctx.cancel, volume).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if matches!(err, StowageError::Cancelled) || !err.is_transient() {
            return Err(err);
        }

        let Some(delay) = backoff.next_delay() else {
            tracing::warn!(
                volume = volume.object_name(),
                attempt,
                elapsed = ?backoff.elapsed(),
                "retry budget exhausted"
            );
            return Err(err);
        };
        tracing::warn!(
            volume = volume.object_name(),
            attempt,
            ?delay,
            "upload failed, retrying: {err}"
        );
        sleep_or_cancel(&ctx.cancel, delay).await?;
    }
}

/// Handle to a running upload chain.
///
/// Dropping it detaches the workers; use [`UploadHandle::abort`] to stop them.
pub struct UploadHandle {
    tasks: JoinSet<()>,
    ctx: Arc<ChainContext>,
    external: CancellationToken,
    aborted: AtomicBool,
}

impl UploadHandle {
    /// Wait for every worker to exit.
    ///
    /// Returns [`StowageError::Cancelled`] if the caller's token fired or
    /// [`UploadHandle::abort`] was called, otherwise the first volume error,
    /// otherwise `Ok(())`.
    pub async fn join(mut self) -> Result<()> {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    tracing::error!("upload worker panicked: {e}");
                    self.ctx
                        .first_error
                        .record(StowageError::WorkerFailed(e.to_string()));
                }
            }
        }

        if self.external.is_cancelled() || self.aborted.load(Ordering::SeqCst) {
            return Err(StowageError::Cancelled);
        }
        match self.ctx.first_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop the run: workers take no new volumes and in-flight attempts are cancelled.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.ctx.cancel.cancel();
    }

    /// Live counters for this run.
    pub fn summary(&self) -> Arc<UploadSummary> {
        self.ctx.summary.clone()
    }
}

impl Drop for UploadHandle {
    fn drop(&mut self) {
        self.tasks.detach_all();
    }
}

impl std::fmt::Debug for UploadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadHandle")
            .field("workers", &self.tasks.len())
            .field("succeeded", &self.ctx.summary.succeeded())
            .field("failed", &self.ctx.summary.failed())
            .finish()
    }
}
