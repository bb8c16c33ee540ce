//! Change notification fan-out.
//!
//! Producers push events into an unbounded queue drained by a single
//! dispatcher task, which forwards them to a broadcast channel. Every
//! subscriber therefore sees one sequence of events, in the order the
//! producers finished their work.

use stash_core::ChangeEvent;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};

pub(crate) struct Notifier<K, V> {
    queue: mpsc::UnboundedSender<ChangeEvent<K, V>>,
    tx: broadcast::Sender<ChangeEvent<K, V>>,
}

impl<K, V> Clone for Notifier<K, V> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<K, V> Notifier<K, V>
where
    K: Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Create a notifier whose dispatcher runs on `runtime`.
    ///
    /// `capacity` bounds how far a subscriber may fall behind before it
    /// starts missing events.
    pub(crate) fn new(capacity: usize, runtime: &Handle) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        let (queue, mut pending) = mpsc::unbounded_channel::<ChangeEvent<K, V>>();

        let out = tx.clone();
        runtime.spawn(async move {
            while let Some(event) = pending.recv().await {
                let kind = event_kind(&event);
                match out.send(event) {
                    Ok(receivers) => {
                        tracing::debug!(event = kind, receivers, "Dispatched cache change");
                    }
                    Err(_) => {
                        tracing::trace!(event = kind, "No subscribers for cache change");
                    }
                }
            }
        });

        Self { queue, tx }
    }

    pub(crate) fn notify(&self, event: ChangeEvent<K, V>) {
        if self.queue.send(event).is_err() {
            tracing::debug!("Change dispatcher stopped; dropping event");
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ChangeEvent<K, V>> {
        self.tx.subscribe()
    }
}

fn event_kind<K, V>(event: &ChangeEvent<K, V>) -> &'static str {
    use stash_core::StorageChange;

    match event {
        Ok(set) => match set.change {
            StorageChange::Save { .. } => "save",
            StorageChange::Remove { .. } => "remove",
            StorageChange::RemoveAll => "remove_all",
        },
        Err(_) => "error",
    }
}
