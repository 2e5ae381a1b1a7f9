//! Supervised background refresh queue.
//!
//! Stale-while-revalidate refreshes are detached from the triggering
//! request: enqueue never blocks, a full queue drops the task with a
//! warning, and task failures are logged — never surfaced. There is no
//! cancellation hook; the worker runs for the process lifetime.

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub(crate) struct RefreshTask {
    pub key: String,
    pub fut: BoxFuture<'static, Result<(), String>>,
}

#[derive(Clone)]
pub struct RevalidationQueue {
    tx: mpsc::Sender<RefreshTask>,
}

impl RevalidationQueue {
    /// Spawn the worker and hand back the enqueue side.
    pub fn spawn(depth: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<RefreshTask>(depth.max(1));
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                metrics::gauge!("voltgate_cache_revalidation_queue_len").decrement(1.0);
                match task.fut.await {
                    Ok(()) => {
                        debug!(
                            target = "voltgate::cache",
                            key = %task.key,
                            "background revalidation completed"
                        );
                    }
                    Err(error) => {
                        metrics::counter!("voltgate_cache_revalidation_error_total").increment(1);
                        warn!(
                            target = "voltgate::cache",
                            key = %task.key,
                            error = %error,
                            "background revalidation failed"
                        );
                    }
                }
            }
        });
        Self { tx }
    }

    /// Returns `false` when the queue is full and the task was dropped.
    pub(crate) fn enqueue(&self, key: impl Into<String>, fut: BoxFuture<'static, Result<(), String>>) -> bool {
        let key = key.into();
        match self.tx.try_send(RefreshTask {
            key: key.clone(),
            fut,
        }) {
            Ok(()) => {
                metrics::gauge!("voltgate_cache_revalidation_queue_len").increment(1.0);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::counter!("voltgate_cache_revalidation_dropped_total").increment(1);
                warn!(
                    target = "voltgate::cache",
                    key = %key,
                    "revalidation queue full, dropping refresh"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(
                    target = "voltgate::cache",
                    key = %key,
                    "revalidation worker gone, dropping refresh"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn failing_task_does_not_stall_the_worker() {
        let queue = RevalidationQueue::spawn(8);
        let done = Arc::new(AtomicU32::new(0));

        queue.enqueue("bad", Box::pin(async { Err("refresh exploded".to_string()) }));
        let counter = done.clone();
        queue.enqueue(
            "good",
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        for _ in 0..50 {
            if done.load(Ordering::SeqCst) == 1 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("second task never ran");
    }

    #[tokio::test]
    async fn full_queue_drops_newest_task() {
        let queue = RevalidationQueue::spawn(1);
        // Park the worker on a long-running task, then fill the buffer.
        queue.enqueue(
            "parked",
            Box::pin(async {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Ok(())
            }),
        );
        tokio::task::yield_now().await;

        assert!(queue.enqueue("buffered", Box::pin(async { Ok(()) })));
        assert!(!queue.enqueue("dropped", Box::pin(async { Ok(()) })));
    }
}
