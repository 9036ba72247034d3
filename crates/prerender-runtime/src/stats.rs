use prerender_common::RenderResult;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Point-in-time view of a renderer's activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendererStats {
    /// Generation currently serving requests (0 once shut down)
    pub generation: u64,
    /// Workers in the current generation
    pub workers: usize,
    /// Render requests answered, successful or not
    pub renders: u64,
    /// Renders whose result carried an error
    pub failures: u64,
    /// Reloads that completed
    pub reloads: u64,
    pub uptime_ms: u64,
}

#[derive(Debug)]
pub(crate) struct RenderCounters {
    renders: AtomicU64,
    failures: AtomicU64,
    reloads: AtomicU64,
    started: Instant,
}

impl RenderCounters {
    pub(crate) fn new() -> Self {
        Self {
            renders: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            reloads: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub(crate) fn record(&self, result: &RenderResult) {
        self.renders.fetch_add(1, Ordering::Relaxed);
        if !result.is_success() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_reload(&self) {
        self.reloads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, generation: u64, workers: usize) -> RendererStats {
        RendererStats {
            generation,
            workers,
            renders: self.renders.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
            uptime_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}
