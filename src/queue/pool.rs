//! Worker Pool
//!
//! Fixed set of long-lived Tokio workers pulling jobs from one shared channel.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::job::{Job, Reply};
use super::metrics::{QueueMetrics, QueueMetricsSnapshot};
use super::QueueConfig;
use crate::error::{Error, Result};

type ProcessorFn<P, R> = Arc<dyn Fn(P) -> BoxFuture<'static, R> + Send + Sync>;
type SharedReceiver<P, R> = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job<P, R>>>>;

/// How the workers ended once shutdown started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownOutcome {
    Drained,
    Aborted { grace: Duration },
}

impl ShutdownOutcome {
    fn into_result(self) -> Result<()> {
        match self {
            ShutdownOutcome::Drained => Ok(()),
            ShutdownOutcome::Aborted { grace } => Err(Error::ShutdownTimeout { grace }),
        }
    }
}

/// First writer wins
fn settle(slot: &mut Option<ShutdownOutcome>, outcome: ShutdownOutcome) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(outcome);
    true
}

/// Bounded-concurrency job queue
///
/// Submitters call [`JobQueue::enqueue`] and are suspended until their own
/// result is ready. Must be created inside a Tokio runtime.
pub struct JobQueue<P, R> {
    /// Normalized configuration
    config: QueueConfig,

    /// Job sender; `None` once shutdown has started
    sender: Mutex<Option<mpsc::UnboundedSender<Job<P, R>>>>,

    /// Admission control: one permit per running or waiting job
    admission: Arc<Semaphore>,

    /// Shutdown signal
    stop: CancellationToken,

    /// Worker handles, taken by the first shutdown
    workers: Mutex<Vec<JoinHandle<()>>>,

    /// Abort handles for the workers, usable by every shutdown caller
    aborts: Mutex<Vec<AbortHandle>>,

    /// Settled once, by the drain completing or by a grace period running out
    outcome: Arc<watch::Sender<Option<ShutdownOutcome>>>,

    /// Metrics collector
    metrics: Arc<QueueMetrics>,
}

impl<P, R> JobQueue<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    /// Create a queue and start its workers.
    ///
    /// `worker_count` is clamped to at least one; a `buffer_size` of zero
    /// means a submitter waits until a worker is free.
    pub fn new<F, Fut>(worker_count: usize, buffer_size: usize, processor: F) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        Self::with_config(QueueConfig::new(worker_count, buffer_size), processor)
    }

    /// Create a queue from a [`QueueConfig`] and start its workers.
    pub fn with_config<F, Fut>(config: QueueConfig, processor: F) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let config = config.normalized();
        let processor: ProcessorFn<P, R> = Arc::new(move |payload| processor(payload).boxed());

        let (tx, rx) = mpsc::unbounded_channel();
        let receiver: SharedReceiver<P, R> = Arc::new(tokio::sync::Mutex::new(rx));
        let metrics = Arc::new(QueueMetrics::new());

        let workers = (0..config.worker_count)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    receiver.clone(),
                    processor.clone(),
                    metrics.clone(),
                ))
            })
            .collect();

        info!(
            workers = config.worker_count,
            buffer = config.buffer_size,
            "Job queue started"
        );

        Self {
            admission: Arc::new(Semaphore::new(config.capacity())),
            config,
            sender: Mutex::new(Some(tx)),
            stop: CancellationToken::new(),
            workers: Mutex::new(workers),
            aborts: Mutex::new(Vec::new()),
            outcome: Arc::new(watch::channel(None).0),
            metrics,
        }
    }

    /// Submit a job and wait for its result.
    ///
    /// Waits for an admission slot when the queue is saturated. Fails with
    /// [`Error::Cancelled`] if `cancel` fires before the job is picked up or
    /// before the result arrives, and with [`Error::QueueStopped`] if the
    /// queue is shutting down. The processor itself is never interrupted.
    #[instrument(skip_all)]
    pub async fn enqueue(&self, cancel: &CancellationToken, payload: P) -> Result<R> {
        self.precheck(cancel)?;

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Enqueue failed: caller cancelled while waiting for a slot");
                self.metrics.record_cancelled();
                return Err(Error::Cancelled);
            }
            _ = self.stop.cancelled() => {
                warn!("Enqueue failed: queue shut down while waiting for a slot");
                self.metrics.record_rejected();
                return Err(Error::QueueStopped);
            }
            permit = self.admission.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.metrics.record_rejected();
                    return Err(Error::QueueStopped);
                }
            },
        };

        self.submit(cancel, payload, permit).await
    }

    /// Submit a job only if a slot is free right now, then wait for its result.
    #[instrument(skip_all)]
    pub async fn try_enqueue(&self, cancel: &CancellationToken, payload: P) -> Result<R> {
        self.precheck(cancel)?;

        let permit = match self.admission.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                debug!("Enqueue rejected: queue is full");
                self.metrics.record_rejected();
                return Err(Error::QueueFull);
            }
            Err(TryAcquireError::Closed) => {
                self.metrics.record_rejected();
                return Err(Error::QueueStopped);
            }
        };

        self.submit(cancel, payload, permit).await
    }

    fn precheck(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            warn!("Enqueue failed: caller already cancelled");
            self.metrics.record_cancelled();
            return Err(Error::Cancelled);
        }
        if self.stop.is_cancelled() {
            warn!("Enqueue failed: queue is shutting down");
            self.metrics.record_rejected();
            return Err(Error::QueueStopped);
        }
        Ok(())
    }

    async fn submit(
        &self,
        cancel: &CancellationToken,
        payload: P,
        permit: OwnedSemaphorePermit,
    ) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        let job = Job::new(payload, Reply::new(tx, cancel.clone(), permit));
        let job_id = job.id();

        // Counted before the send so a fast worker never dequeues it first.
        self.metrics.record_submitted();
        let sent = match self.sender.lock().as_ref() {
            Some(sender) => sender.send(job).is_ok(),
            None => false,
        };
        if !sent {
            warn!(%job_id, "Enqueue failed: queue shut down during enqueue attempt");
            self.metrics.record_unsubmitted();
            self.metrics.record_rejected();
            return Err(Error::QueueStopped);
        }
        debug!(%job_id, "Job enqueued");

        tokio::select! {
            biased;
            reply = rx => match reply {
                Ok(result) => {
                    debug!(%job_id, "Received job result");
                    Ok(result)
                }
                Err(_) => {
                    warn!(%job_id, "Job closed without a result");
                    Err(Error::JobAbandoned)
                }
            },
            _ = cancel.cancelled() => {
                warn!(%job_id, "Caller cancelled while waiting for job result");
                self.metrics.record_cancelled();
                Err(Error::Cancelled)
            }
        }
    }

    /// Stop accepting jobs, drain the queue and wait for workers to exit.
    ///
    /// Returns [`Error::ShutdownTimeout`] if the workers are still busy after
    /// `grace`; they are then aborted and any callers still waiting observe
    /// [`Error::JobAbandoned`]. Every caller, concurrent or later, waits
    /// within its own `grace` for the same outcome.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        info!("Initiating queue shutdown");

        self.stop.cancel();
        self.admission.close();
        drop(self.sender.lock().take());

        let handles = std::mem::take(&mut *self.workers.lock());
        if !handles.is_empty() {
            self.aborts
                .lock()
                .extend(handles.iter().map(JoinHandle::abort_handle));

            let outcome = self.outcome.clone();
            tokio::spawn(async move {
                for result in join_all(handles).await {
                    match result {
                        Err(e) if !e.is_cancelled() => warn!("Worker ended abnormally: {}", e),
                        _ => {}
                    }
                }
                if outcome.send_if_modified(|slot| settle(slot, ShutdownOutcome::Drained)) {
                    info!("Queue shutdown complete");
                }
            });
        }

        let mut finished = self.outcome.subscribe();
        let settled = match tokio::time::timeout(grace, finished.wait_for(Option::is_some)).await {
            Ok(Ok(settled)) => *settled,
            _ => None,
        };
        if let Some(outcome) = settled {
            return outcome.into_result();
        }

        error!(?grace, "Queue shutdown timed out, aborting workers");
        for abort in self.aborts.lock().iter() {
            abort.abort();
        }
        self.outcome
            .send_if_modified(|slot| settle(slot, ShutdownOutcome::Aborted { grace }));

        let settled = *self.outcome.borrow();
        settled
            .unwrap_or(ShutdownOutcome::Aborted { grace })
            .into_result()
    }

    /// Whether shutdown has started
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Number of workers
    pub fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    /// Jobs allowed to wait for a worker
    pub fn buffer_size(&self) -> usize {
        self.config.buffer_size
    }

    /// Admission slots currently free
    pub fn available_slots(&self) -> usize {
        self.admission.available_permits()
    }

    /// Metrics snapshot
    pub fn metrics(&self) -> QueueMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl<P, R> std::fmt::Debug for JobQueue<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("config", &self.config)
            .field("stopped", &self.stop.is_cancelled())
            .finish()
    }
}

async fn run_worker<P, R>(
    worker_id: usize,
    receiver: SharedReceiver<P, R>,
    processor: ProcessorFn<P, R>,
    metrics: Arc<QueueMetrics>,
) where
    P: Send + 'static,
    R: Send + 'static,
{
    debug!(worker_id, "Worker started");

    loop {
        let job = {
            let mut rx = receiver.lock().await;
            rx.recv().await
        };

        let Some(job) = job else {
            info!(worker_id, "Worker stopping: job channel closed");
            return;
        };

        metrics.record_dequeued();
        process_job(worker_id, job, &processor, &metrics).await;
    }
}

async fn process_job<P, R>(
    worker_id: usize,
    job: Job<P, R>,
    processor: &ProcessorFn<P, R>,
    metrics: &QueueMetrics,
) {
    let job_id = job.id();

    if job.is_abandoned() {
        warn!(worker_id, %job_id, "Job cancelled before processing started");
        // A caller that cancelled its token has already been counted.
        if !job.is_caller_cancelled() {
            metrics.record_cancelled();
        }
        return;
    }

    debug!(
        worker_id,
        %job_id,
        waited_ms = job.enqueued_at().elapsed().as_millis() as u64,
        "Worker processing job"
    );

    let (payload, reply) = job.into_parts();
    let processor = processor.clone();

    metrics.record_started();
    let outcome = AssertUnwindSafe(async move { processor(payload).await })
        .catch_unwind()
        .await;
    metrics.record_finished();

    match outcome {
        Ok(result) => {
            metrics.record_completed();
            if reply.send(result) {
                debug!(worker_id, %job_id, "Worker sent result");
            } else {
                warn!(worker_id, %job_id, "Caller gone before result could be delivered");
            }
        }
        Err(panic) => {
            metrics.record_panicked();
            error!(
                worker_id,
                %job_id,
                panic = %panic_message(panic.as_ref()),
                "Worker panicked while processing job"
            );
            drop(reply);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
