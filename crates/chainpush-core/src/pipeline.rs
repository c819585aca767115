//! Ordered work queues, each drained by a single worker task.
//!
//! A queue is created in two halves so handlers can hold senders for other
//! queues (including their own) before the worker starts:
//!
//! ```text
//! WorkQueue::new("persist") → (WorkQueue<T>, Inbox<T>)
//!                                  │            └── spawn(handler) → Worker
//!                                  └── enqueue / stop (cloneable)
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::PushError;

/// Processes one item at a time for a queue.
#[async_trait]
pub trait WorkHandler<T>: Send + Sync {
    async fn handle(&self, item: T) -> Result<(), PushError>;
}

enum Job<T> {
    Item(T),
    Stop,
}

/// Sending half of a work queue. Cloning shares the same queue.
pub struct WorkQueue<T> {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<Job<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            tx: self.tx.clone(),
        }
    }
}

/// Receiving half of a work queue, consumed by [`Inbox::spawn`].
pub struct Inbox<T> {
    name: Arc<str>,
    rx: mpsc::UnboundedReceiver<Job<T>>,
}

/// Handle to a running worker.
pub struct Worker {
    name: Arc<str>,
    handle: JoinHandle<u64>,
}

impl<T: Send + 'static> WorkQueue<T> {
    pub fn new(name: impl Into<String>) -> (Self, Inbox<T>) {
        let name: Arc<str> = Arc::from(name.into());
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                name: Arc::clone(&name),
                tx,
            },
            Inbox { name, rx },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append an item. Never blocks; fails only once the worker has exited.
    pub fn enqueue(&self, item: T) -> Result<(), PushError> {
        self.tx.send(Job::Item(item)).map_err(|_| self.closed())
    }

    /// Ask the worker to exit once the queue is empty. Items the handler
    /// enqueues while draining are processed too.
    pub fn stop(&self) -> Result<(), PushError> {
        self.tx.send(Job::Stop).map_err(|_| self.closed())
    }

    /// Stop the worker and wait for it. Returns the number of items processed.
    pub async fn shutdown(&self, worker: Worker) -> Result<u64, PushError> {
        if let Err(e) = self.stop() {
            debug!(queue = %self.name, error = %e, "worker already exited");
        }
        worker.join().await
    }

    fn closed(&self) -> PushError {
        PushError::QueueClosed {
            queue: self.name.to_string(),
        }
    }
}

impl<T: Send + 'static> Inbox<T> {
    /// Start the worker. Fatal handler errors are forwarded on `alerts` and
    /// halt the worker; all others are logged and the item is dropped.
    pub fn spawn(
        self,
        handler: Arc<dyn WorkHandler<T>>,
        alerts: Option<mpsc::UnboundedSender<PushError>>,
    ) -> Worker {
        let Inbox { name, mut rx } = self;
        let task_name = Arc::clone(&name);

        let handle = tokio::spawn(async move {
            let name = task_name;
            let mut processed = 0u64;
            let mut after_stop = 0u64;
            let mut stopping = false;
            info!(queue = %name, "worker started");

            loop {
                let job = if stopping {
                    match rx.try_recv() {
                        Ok(job) => job,
                        Err(_) => break,
                    }
                } else {
                    match rx.recv().await {
                        Some(job) => job,
                        None => break,
                    }
                };
                let item = match job {
                    Job::Item(item) => item,
                    Job::Stop => {
                        stopping = true;
                        continue;
                    }
                };
                processed += 1;
                if stopping {
                    after_stop += 1;
                }

                if let Err(e) = handler.handle(item).await {
                    if e.is_fatal() {
                        error!(queue = %name, error = %e, "fatal error, worker halting");
                        if let Some(alerts) = &alerts {
                            let _ = alerts.send(e);
                        }
                        break;
                    }
                    warn!(queue = %name, error = %e, "item dropped");
                }
            }

            if after_stop > 0 {
                debug!(queue = %name, after_stop, "drained items enqueued behind stop");
            }
            info!(queue = %name, processed, "worker stopped");
            processed
        });

        Worker { name, handle }
    }
}

#[cfg(test)]
impl<T> Inbox<T> {
    /// Take everything queued so far without a worker.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::new();
        while let Ok(job) = self.rx.try_recv() {
            if let Job::Item(item) = job {
                items.push(item);
            }
        }
        items
    }
}

impl Worker {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the worker task to finish.
    pub async fn join(self) -> Result<u64, PushError> {
        self.handle
            .await
            .map_err(|e| PushError::Other(format!("worker '{}' panicked: {e}", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl WorkHandler<&'static str> for Recorder {
        async fn handle(&self, item: &'static str) -> Result<(), PushError> {
            if item == "bad" {
                return Err(PushError::Other("bad item".into()));
            }
            if item == "fatal" {
                return Err(PushError::ConsistencyFatal("broken".into()));
            }
            // yield so a concurrent worker would have a chance to interleave
            tokio::task::yield_now().await;
            self.seen.lock().unwrap().push(item);
            Ok(())
        }
    }

    fn recorder() -> Arc<Recorder> {
        Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn processes_in_fifo_order() {
        let handler = recorder();
        let (queue, inbox) = WorkQueue::new("test");
        let worker = inbox.spawn(handler.clone(), None);

        for item in ["A", "B", "C"] {
            queue.enqueue(item).unwrap();
        }
        let processed = queue.shutdown(worker).await.unwrap();

        assert_eq!(processed, 3);
        assert_eq!(*handler.seen.lock().unwrap(), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn errors_drop_the_item_and_continue() {
        let handler = recorder();
        let (queue, inbox) = WorkQueue::new("test");
        let worker = inbox.spawn(handler.clone(), None);

        for item in ["A", "bad", "C"] {
            queue.enqueue(item).unwrap();
        }
        queue.shutdown(worker).await.unwrap();

        assert_eq!(*handler.seen.lock().unwrap(), vec!["A", "C"]);
    }

    #[tokio::test]
    async fn fatal_error_halts_and_alerts() {
        let handler = recorder();
        let (alerts_tx, mut alerts_rx) = mpsc::unbounded_channel();
        let (queue, inbox) = WorkQueue::new("persist");
        let worker = inbox.spawn(handler.clone(), Some(alerts_tx));

        queue.enqueue("A").unwrap();
        queue.enqueue("fatal").unwrap();
        queue.enqueue("C").unwrap();
        worker.join().await.unwrap();

        assert_eq!(*handler.seen.lock().unwrap(), vec!["A"]);
        assert!(alerts_rx.recv().await.unwrap().is_fatal());
        assert!(matches!(
            queue.enqueue("D"),
            Err(PushError::QueueClosed { ref queue }) if queue == "persist"
        ));
    }

    /// Enqueues a follow-up item on its own queue for every `"A"`.
    struct Chaser {
        queue: WorkQueue<&'static str>,
        seen: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl WorkHandler<&'static str> for Chaser {
        async fn handle(&self, item: &'static str) -> Result<(), PushError> {
            if item == "A" {
                self.queue.enqueue("A-followup")?;
            }
            self.seen.lock().unwrap().push(item);
            Ok(())
        }
    }

    #[tokio::test]
    async fn follow_ups_enqueued_during_shutdown_are_processed() {
        let (queue, inbox) = WorkQueue::new("persist");
        let handler = Arc::new(Chaser {
            queue: queue.clone(),
            seen: Mutex::new(Vec::new()),
        });

        // the follow-up lands behind the stop sentinel
        queue.enqueue("A").unwrap();
        queue.stop().unwrap();
        let worker = inbox.spawn(handler.clone(), None);

        assert_eq!(worker.join().await.unwrap(), 2);
        assert_eq!(*handler.seen.lock().unwrap(), vec!["A", "A-followup"]);
    }

    #[tokio::test]
    async fn items_before_stop_are_drained() {
        let handler = recorder();
        let (queue, inbox) = WorkQueue::new("test");

        // enqueue before the worker exists
        queue.enqueue("A").unwrap();
        queue.enqueue("B").unwrap();
        queue.stop().unwrap();

        let worker = inbox.spawn(handler.clone(), None);
        assert_eq!(worker.join().await.unwrap(), 2);
    }
}
