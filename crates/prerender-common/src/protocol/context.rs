//! Invocation Context
//!
//! Every render call carries a [`RenderContext`]. It travels with the request
//! to whichever worker claims it and is handed to host callbacks invoked while
//! that request's script runs. It is never visible to any other request.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

pub type RequestId = u64;

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Per-request invocation context.
///
/// Cloning is cheap: host values are shared behind an `Arc`.
///
/// # Example
///
/// ```
/// use prerender_common::RenderContext;
/// use std::time::Duration;
///
/// let ctx = RenderContext::new()
///     .with_value("user", serde_json::json!({"id": 7}))
///     .with_timeout(Duration::from_millis(250));
///
/// assert!(ctx.deadline().is_some());
/// assert_eq!(ctx.value("user").unwrap()["id"], 7);
/// ```
#[derive(Debug, Clone)]
pub struct RenderContext {
    id: RequestId,
    deadline: Option<Instant>,
    values: Arc<HashMap<String, Value>>,
}

impl RenderContext {
    /// Creates an empty context with a fresh request id.
    pub fn new() -> Self {
        Self {
            id: generate_request_id(),
            deadline: None,
            values: Arc::new(HashMap::new()),
        }
    }

    /// An empty context with no deadline, for callers that have nothing to pass.
    pub fn background() -> Self {
        Self::new()
    }

    /// Stops waiting for the result once `timeout` has elapsed from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Attaches a host value that callbacks can look up by key.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        Arc::make_mut(&mut self.values).insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Whether the deadline, if any, has already passed.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Milliseconds between now and the deadline, saturating at zero.
    pub fn remaining_ms(&self) -> Option<u64> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()).as_millis() as u64)
    }
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::new()
    }
}

fn generate_request_id() -> RequestId {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let counter = REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst);

    // Upper 32 bits from the clock, lower 32 from the counter
    (timestamp & 0xFFFF_FFFF_0000_0000) | (counter & 0xFFFF_FFFF)
}
