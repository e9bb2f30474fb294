//! Deferred mutation execution.
//!
//! The `*_deferred` store operations hand their work to one owned worker
//! thread and return immediately with a [`DeferredHandle`]. Jobs run
//! strictly in submission order, so two deferred writes from the same
//! thread settle in the order they were issued.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;
use std::thread::JoinHandle;

use log::warn;

use crate::error::{StoreError, StoreResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Owns the worker thread and the submission side of its queue.
///
/// Dropping the executor closes the queue; the worker drains what was
/// already submitted, then exits and is joined. In-flight work is never
/// abandoned.
pub(crate) struct DeferredExecutor {
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DeferredExecutor {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = channel::<Job>();
        let worker = std::thread::Builder::new()
            .name("kvmodel-deferred".to_string())
            .spawn(move || {
                for job in receiver {
                    job();
                }
            })
            .ok();
        if worker.is_none() {
            warn!("deferred worker thread failed to start; deferred calls will fail");
        }
        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(worker),
        }
    }

    /// Queues a closure producing the operation's result and returns the
    /// handle that will receive it.
    pub(crate) fn submit<T, F>(&self, operation: F) -> DeferredHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> StoreResult<T> + Send + 'static,
    {
        let (result_tx, result_rx) = channel();
        let job: Job = Box::new(move || {
            // The handle may have been dropped; a dead letter is fine.
            let _ = result_tx.send(operation());
        });

        let queued = match self.sender.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(sender) => sender.send(job).is_ok(),
                None => false,
            },
            Err(_) => false,
        };
        if !queued {
            warn!("deferred queue is closed; reporting the job as failed");
        }
        DeferredHandle {
            receiver: result_rx,
        }
    }
}

impl Drop for DeferredExecutor {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
        if let Ok(mut guard) = self.worker.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}

/// Pending result of a deferred mutation.
///
/// The operation runs whether or not the handle is consumed; dropping the
/// handle just discards the result.
#[derive(Debug)]
pub struct DeferredHandle<T> {
    receiver: Receiver<StoreResult<T>>,
}

impl<T> DeferredHandle<T> {
    /// Blocks until the operation settles and returns its result.
    pub fn wait(self) -> StoreResult<T> {
        self.receiver.recv().map_err(|_| {
            StoreError::Backend("deferred worker dropped the result channel".to_string())
        })?
    }

    /// Non-blocking probe: `None` while the operation is still queued or
    /// running.
    pub fn try_wait(&self) -> Option<StoreResult<T>> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn jobs_run_in_submission_order() {
        let executor = DeferredExecutor::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<DeferredHandle<usize>> = (0..8)
            .map(|i| {
                let log = Arc::clone(&log);
                executor.submit(move || {
                    log.lock().unwrap().push(i);
                    Ok(i)
                })
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.wait().unwrap(), i);
        }
        assert_eq!(*log.lock().unwrap(), (0..8).collect::<Vec<usize>>());
    }

    #[test]
    fn errors_travel_to_the_handle() {
        let executor = DeferredExecutor::new();
        let handle: DeferredHandle<()> =
            executor.submit(|| Err(StoreError::Backend("nope".to_string())));
        assert!(matches!(handle.wait(), Err(StoreError::Backend(_))));
    }

    #[test]
    fn drop_drains_the_queue() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let executor = DeferredExecutor::new();
            for _ in 0..16 {
                let counter = Arc::clone(&counter);
                let _ = executor.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
            }
            // Dropping joins the worker after it finishes queued jobs.
        }
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn dropped_handle_does_not_block_the_worker() {
        let executor = DeferredExecutor::new();
        drop(executor.submit(|| Ok(1)));
        let follow_up = executor.submit(|| Ok(2));
        assert_eq!(follow_up.wait().unwrap(), 2);
    }
}
