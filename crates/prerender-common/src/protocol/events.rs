//! Messages posted onto a generation's shared request queue.
//!
//! Every event carries its own private reply channel with room for exactly
//! one message, so each request gets exactly one answer and the caller can
//! block on it without coordinating with anyone else.

use crossbeam_channel::{Receiver, Sender, bounded};
use serde_json::Value;

use super::{RenderContext, RenderResult};

pub type WorkerId = u64;

/// Acknowledgment a worker sends after disposing its engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownAck {
    pub worker: WorkerId,
}

/// A unit of work for the pool. Consumed by exactly one worker.
#[derive(Debug)]
pub enum RenderEvent {
    /// Run the script once with `params` bound and reply with the result.
    Request {
        context: RenderContext,
        params: Value,
        reply: Sender<RenderResult>,
    },
    /// Dispose the engine, acknowledge, and stop reading the queue.
    Shutdown { reply: Sender<ShutdownAck> },
}

impl RenderEvent {
    /// Builds a request event together with the receiving end of its reply channel.
    pub fn request(context: RenderContext, params: Value) -> (Self, Receiver<RenderResult>) {
        let (reply, rx) = bounded(1);
        (RenderEvent::Request { context, params, reply }, rx)
    }

    /// Builds a shutdown event together with the receiving end of its ack channel.
    pub fn shutdown() -> (Self, Receiver<ShutdownAck>) {
        let (reply, rx) = bounded(1);
        (RenderEvent::Shutdown { reply }, rx)
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, RenderEvent::Shutdown { .. })
    }
}
