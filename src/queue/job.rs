//! Job Types
//!
//! A job couples a payload with the single place its result may be written.

use tokio::sync::{oneshot, OwnedSemaphorePermit};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One unit of work submitted to a [`JobQueue`](super::JobQueue)
pub struct Job<P, R> {
    /// Identifier used in log output
    id: Uuid,
    /// Immutable input
    payload: P,
    /// Where the result goes
    reply: Reply<R>,
    /// When the job was accepted
    enqueued_at: Instant,
}

impl<P, R> Job<P, R> {
    pub(crate) fn new(payload: P, reply: Reply<R>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            reply,
            enqueued_at: Instant::now(),
        }
    }

    /// Job identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The payload
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// When the job was accepted into the queue
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Whether nobody is waiting for the result any more
    pub fn is_abandoned(&self) -> bool {
        self.reply.is_abandoned()
    }

    /// Whether the caller's token was cancelled
    pub fn is_caller_cancelled(&self) -> bool {
        self.reply.is_caller_cancelled()
    }

    pub(crate) fn into_parts(self) -> (P, Reply<R>) {
        (self.payload, self.reply)
    }
}

impl<P, R> std::fmt::Debug for Job<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}

/// Write-once result slot.
///
/// Dropping a `Reply` without calling [`Reply::send`] closes it without a
/// value, which the waiting caller observes as an abandoned job. The
/// admission permit travels with the reply so the queue slot is released
/// exactly when the job is finished with.
pub(crate) struct Reply<R> {
    sender: oneshot::Sender<R>,
    cancel: CancellationToken,
    _permit: OwnedSemaphorePermit,
}

impl<R> Reply<R> {
    pub(crate) fn new(
        sender: oneshot::Sender<R>,
        cancel: CancellationToken,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            sender,
            cancel,
            _permit: permit,
        }
    }

    /// Caller cancelled or stopped waiting
    pub(crate) fn is_abandoned(&self) -> bool {
        self.cancel.is_cancelled() || self.sender.is_closed()
    }

    pub(crate) fn is_caller_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Deliver the result. Never blocks; returns false if the caller is gone.
    pub(crate) fn send(self, value: R) -> bool {
        self.sender.send(value).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Semaphore;

    async fn make_reply<R>(cancel: &CancellationToken) -> (Reply<R>, oneshot::Receiver<R>, Arc<Semaphore>) {
        let semaphore = Arc::new(Semaphore::new(1));
        let permit = semaphore.clone().acquire_owned().await.unwrap();
        let (tx, rx) = oneshot::channel();
        (Reply::new(tx, cancel.clone(), permit), rx, semaphore)
    }

    #[tokio::test]
    async fn test_reply_delivers_once() {
        let cancel = CancellationToken::new();
        let (reply, rx, semaphore) = make_reply::<u32>(&cancel).await;
        let job = Job::new("payload", reply);

        assert_eq!(*job.payload(), "payload");
        assert!(!job.is_abandoned());
        assert_eq!(semaphore.available_permits(), 0);

        let (_, reply) = job.into_parts();
        assert!(reply.send(7));
        assert_eq!(rx.await.unwrap(), 7);
        assert_eq!(semaphore.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_dropped_reply_closes_without_value() {
        let cancel = CancellationToken::new();
        let (reply, rx, semaphore) = make_reply::<u32>(&cancel).await;
        drop(reply);

        assert!(rx.await.is_err());
        assert_eq!(semaphore.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_when_cancelled_or_receiver_dropped() {
        let cancel = CancellationToken::new();
        let (reply, rx, _semaphore) = make_reply::<u32>(&cancel).await;
        assert!(!reply.is_abandoned());
        cancel.cancel();
        assert!(reply.is_abandoned());
        drop(rx);

        let other = CancellationToken::new();
        let (reply, rx, _semaphore) = make_reply::<u32>(&other).await;
        drop(rx);
        assert!(reply.is_abandoned());
        assert!(!reply.send(1));
    }

    #[tokio::test]
    async fn test_job_ids_unique() {
        let cancel = CancellationToken::new();
        let (r1, _rx1, _s1) = make_reply::<()>(&cancel).await;
        let (r2, _rx2, _s2) = make_reply::<()>(&cancel).await;
        let a = Job::new(1, r1);
        let b = Job::new(2, r2);
        assert_ne!(a.id(), b.id());
        assert!(format!("{:?}", a).contains("Job"));
    }
}
