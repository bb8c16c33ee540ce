//! Ordered disk work queue for the cache façade.
//!
//! Every disk mutation the façade issues is queued here and run one at a
//! time on the blocking pool, in submission order. A save that has not
//! reached disk yet therefore always lands before a later remove or clear.

use stash_core::{StorageError, StorageResult};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

type DiskJob = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct DiskWriter {
    queue: mpsc::UnboundedSender<DiskJob>,
}

impl DiskWriter {
    /// Start the worker task on `runtime`. It exits once the writer is
    /// dropped and the queue is drained.
    pub(crate) fn new(runtime: &Handle) -> Self {
        let (queue, mut pending) = mpsc::unbounded_channel::<DiskJob>();

        runtime.spawn(async move {
            while let Some(job) = pending.recv().await {
                if let Err(e) = tokio::task::spawn_blocking(job).await {
                    tracing::warn!(error = %e, "Disk job failed to complete");
                }
            }
            tracing::debug!("Disk writer stopped");
        });

        Self { queue }
    }

    /// Queue `work` behind everything submitted so far.
    ///
    /// The receiver yields the work's result; it yields an error if the job
    /// never ran or panicked.
    pub(crate) fn submit<T, F>(&self, work: F) -> oneshot::Receiver<StorageResult<T>>
    where
        F: FnOnce() -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: DiskJob = Box::new(move || {
            let _ = tx.send(work());
        });
        if self.queue.send(job).is_err() {
            tracing::debug!("Disk writer stopped; dropping job");
        }
        rx
    }

    /// Submit `work` and wait for its result.
    pub(crate) async fn run<T, F>(&self, work: F) -> StorageResult<T>
    where
        F: FnOnce() -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        completion(self.submit(work)).await
    }
}

/// Result of a submitted job. A job that was dropped before finishing
/// reports [`StorageError::Deallocated`].
pub(crate) async fn completion<T>(rx: oneshot::Receiver<StorageResult<T>>) -> StorageResult<T> {
    rx.await.unwrap_or(Err(StorageError::Deallocated))
}
