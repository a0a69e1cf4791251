//! Embedding worker pool
//!
//! Long-lived OS threads, one model instance per worker. Inputs and outputs
//! cross the worker boundary by value over channels; nothing about the model
//! is shared. The pool does not know about the cache or sub-batch sizing —
//! it executes whatever batches the pipeline hands it, with one intra-worker
//! retry before reporting failure.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::domain::error::{Error, Result};
use crate::domain::ports::embedding::BackendFactory;

/// Hard cap on worker count regardless of CPU count.
pub const MAX_WORKERS: usize = 8;

struct Job {
    texts: Vec<String>,
    respond_to: oneshot::Sender<Result<Vec<Vec<f32>>>>,
}

/// Bounded pool of embedding worker threads sharing one job queue.
pub struct EmbeddingWorkerPool {
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    worker_count: usize,
}

impl EmbeddingWorkerPool {
    /// Spawn `worker_count` workers (clamped to `1..=MAX_WORKERS`), each
    /// constructing its own backend via `factory`.
    ///
    /// Worker startup is eager: a factory that cannot build a backend fails
    /// pool construction instead of failing the first embed call.
    pub fn new(worker_count: usize, factory: BackendFactory) -> Result<Self> {
        let worker_count = worker_count.clamp(1, MAX_WORKERS);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        // Build all backends up front, on this thread, so construction
        // errors surface here.
        let mut backends = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            backends.push(factory()?);
        }

        let mut workers = Vec::with_capacity(worker_count);
        for (worker_id, mut backend) in backends.into_iter().enumerate() {
            let receiver = Arc::clone(&receiver);
            let handle = std::thread::Builder::new()
                .name(format!("embed-worker-{worker_id}"))
                .spawn(move || loop {
                    let job = {
                        let guard = match receiver.lock() {
                            Ok(guard) => guard,
                            Err(_) => {
                                error!(worker_id, "embedding queue lock poisoned");
                                return;
                            }
                        };
                        guard.recv()
                    };
                    let Ok(job) = job else {
                        debug!(worker_id, "embedding worker shutting down");
                        return;
                    };
                    let mut outcome = backend.embed_batch(&job.texts);
                    if outcome.is_err() {
                        // One intra-worker retry before failing the batch.
                        outcome = backend.embed_batch(&job.texts);
                    }
                    // Receiver may have been dropped on cancellation.
                    let _ = job.respond_to.send(outcome);
                })
                .map_err(|e| Error::internal(format!("failed to spawn worker: {e}")))?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
            worker_count,
        })
    }

    /// Number of live workers.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Dispatch one sub-batch and await its vectors.
    pub async fn dispatch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| Error::internal("embedding pool already closed"))?;
        let (respond_to, response) = oneshot::channel();
        sender
            .send(Job { texts, respond_to })
            .map_err(|_| Error::internal("embedding workers are gone"))?;
        response
            .await
            .map_err(|_| Error::internal("embedding worker dropped the response"))?
    }

    /// Drop the queue and join all workers. Idempotent.
    pub fn shutdown(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for EmbeddingWorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::embedding::hashing::HashingBackend;
    use crate::domain::ports::embedding::EmbeddingBackend;

    fn hashing_factory(dimension: usize) -> BackendFactory {
        Arc::new(move || {
            Ok(Box::new(HashingBackend::new(dimension)) as Box<dyn EmbeddingBackend>)
        })
    }

    #[tokio::test]
    async fn dispatch_round_trips_a_batch() {
        let pool = EmbeddingWorkerPool::new(2, hashing_factory(64)).unwrap();
        let vectors = pool
            .dispatch(vec!["one".into(), "two".into()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 64);
    }

    #[tokio::test]
    async fn worker_count_is_clamped() {
        let pool = EmbeddingWorkerPool::new(0, hashing_factory(16)).unwrap();
        assert_eq!(pool.worker_count(), 1);
        let pool = EmbeddingWorkerPool::new(64, hashing_factory(16)).unwrap();
        assert_eq!(pool.worker_count(), MAX_WORKERS);
    }

    #[tokio::test]
    async fn concurrent_dispatches_all_complete() {
        let pool = Arc::new(EmbeddingWorkerPool::new(4, hashing_factory(32)).unwrap());
        let mut handles = Vec::new();
        for i in 0..16 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                pool.dispatch(vec![format!("text {i}")]).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
    }
}
