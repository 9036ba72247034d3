use crossbeam_channel::{Sender, bounded};
use prerender_common::{RenderError, RenderEvent, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::runtime::worker::{self, WorkerHandle, WorkerSpec};

/// One generation of workers: a compiled artifact, the workers built from it,
/// and the bounded queue they all read from.
///
/// A pool is replaced wholesale on reload and never mutated in between.
pub(crate) struct WorkerPool {
    generation: u64,
    queue: Sender<RenderEvent>,
    workers: Vec<WorkerHandle>,
}

impl WorkerPool {
    /// Starts `workers` workers reading from a queue of `capacity` slots.
    ///
    /// Worker ids are drawn from `ids`, a sequence the renderer owns, so ids
    /// stay unique across generations. If any worker fails to start, the ones
    /// already running are stopped before the error is returned.
    pub(crate) fn start(spec: WorkerSpec, workers: usize, capacity: usize, ids: &AtomicU64) -> Result<Self> {
        let (queue, receiver) = bounded(capacity);
        let generation = spec.generation;
        let mut handles = Vec::with_capacity(workers);

        for _ in 0..workers {
            let id = ids.fetch_add(1, Ordering::SeqCst);
            match worker::spawn(id, spec.clone(), receiver.clone()) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Closing the queue stops the workers that did start
                    drop(queue);
                    drop(receiver);
                    for handle in handles {
                        handle.join();
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(generation, workers, capacity, "Worker pool started");

        Ok(Self {
            generation,
            queue,
            workers: handles,
        })
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn size(&self) -> usize {
        self.workers.len()
    }

    /// Posts an event, blocking while the queue is full.
    pub(crate) fn dispatch(&self, event: RenderEvent) -> Result<()> {
        self.queue.send(event).map_err(|_| RenderError::PoolUnavailable)
    }

    /// Posts an event, giving up at `deadline` if the queue stays full.
    ///
    /// Returns `Ok(false)` on timeout.
    pub(crate) fn dispatch_until(&self, event: RenderEvent, deadline: Instant) -> Result<bool> {
        match self.queue.send_deadline(event, deadline) {
            Ok(()) => Ok(true),
            Err(crossbeam_channel::SendTimeoutError::Timeout(_)) => Ok(false),
            Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => Err(RenderError::PoolUnavailable),
        }
    }

    /// Drains the pool and returns the number of acknowledgments received.
    ///
    /// Shutdown events go out one at a time, and the next is only sent after
    /// the previous one is acknowledged. A worker stops reading the queue as
    /// soon as it handles one, so no worker can take two, and after one ack
    /// per worker none are left. Any requests queued ahead of the shutdown
    /// events are still served first.
    pub(crate) fn shutdown(self) -> usize {
        let mut acks = 0;

        for _ in 0..self.workers.len() {
            let (event, ack) = RenderEvent::shutdown();
            if self.queue.send(event).is_err() {
                // Every worker is gone already (a callback panicked in each)
                tracing::warn!(generation = self.generation, "No workers left to acknowledge shutdown");
                break;
            }
            match ack.recv() {
                Ok(ack) => {
                    tracing::debug!(generation = self.generation, worker = ack.worker, "Worker acknowledged shutdown");
                    acks += 1;
                }
                Err(_) => {
                    tracing::warn!(generation = self.generation, "Shutdown event dropped without acknowledgment");
                }
            }
        }

        drop(self.queue);
        let mut clean = 0;
        for handle in self.workers {
            tracing::trace!(generation = self.generation, worker = handle.id(), "Joining worker thread");
            if handle.join() {
                clean += 1;
            }
        }

        tracing::info!(generation = self.generation, acks, clean, "Worker pool shut down");
        acks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::artifact::CompiledScript;
    use crate::runtime::bindings::CallbackRegistry;
    use prerender_common::RenderContext;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn spec(source: &str) -> WorkerSpec {
        WorkerSpec {
            generation: 1,
            artifact: CompiledScript::compile(source, "app.js", 1).unwrap(),
            callbacks: Arc::new(CallbackRegistry::new()),
            entry: Arc::from("entry()"),
        }
    }

    #[test]
    fn test_pool_creation() {
        let ids = AtomicU64::new(0);
        let pool = WorkerPool::start(spec("const entry = () => 'ok'"), 3, 10, &ids).unwrap();
        assert_eq!(pool.size(), 3);
        assert_eq!(pool.generation(), 1);
        assert_eq!(ids.load(Ordering::SeqCst), 3);
        assert_eq!(pool.shutdown(), 3);
    }

    #[test]
    fn test_shutdown_acknowledges_every_worker() {
        let ids = AtomicU64::new(10);
        for workers in [1, 2, 4, 8] {
            let pool = WorkerPool::start(spec("const entry = () => 'ok'"), workers, 10, &ids).unwrap();
            assert_eq!(pool.shutdown(), workers);
        }
    }

    #[test]
    fn test_queued_requests_are_served_before_shutdown() {
        let ids = AtomicU64::new(0);
        let pool = WorkerPool::start(spec("const entry = () => 'served ' + params"), 2, 10, &ids).unwrap();

        let replies: Vec<_> = (0..5)
            .map(|i| {
                let (event, reply) = RenderEvent::request(RenderContext::new(), json!(i));
                pool.dispatch(event).unwrap();
                reply
            })
            .collect();

        assert_eq!(pool.shutdown(), 2);

        for (i, reply) in replies.into_iter().enumerate() {
            assert_eq!(reply.recv().unwrap().output(), format!("served {}", i));
        }
    }

    #[test]
    fn test_dispatch_until_times_out_on_full_queue() {
        let ids = AtomicU64::new(0);
        // One worker busy spinning, one queue slot
        let pool = WorkerPool::start(
            spec("const entry = () => { const end = Date.now() + 300; while (Date.now() < end) {} return 'done'; }"),
            1,
            1,
            &ids,
        )
        .unwrap();

        let (first, first_reply) = RenderEvent::request(RenderContext::new(), json!(null));
        pool.dispatch(first).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let (second, _second_reply) = RenderEvent::request(RenderContext::new(), json!(null));
        pool.dispatch(second).unwrap();

        let (third, _third_reply) = RenderEvent::request(RenderContext::new(), json!(null));
        let sent = pool
            .dispatch_until(third, Instant::now() + Duration::from_millis(20))
            .unwrap();
        assert!(!sent);

        assert_eq!(first_reply.recv().unwrap().output(), "done");
        assert_eq!(pool.shutdown(), 1);
    }
}
