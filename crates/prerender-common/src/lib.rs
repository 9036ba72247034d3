//! Prerender Common Types
//!
//! This crate holds the message shapes exchanged between a renderer and its
//! execution workers, plus the error type every other crate reports through.
//!
//! # Overview
//!
//! A renderer owns a pool of script-execution workers. Callers never talk to
//! workers directly: they hand a [`RenderContext`] and a params payload to the
//! renderer, which posts a [`RenderEvent`] onto a shared bounded queue and
//! blocks on a private reply channel until a [`RenderResult`] comes back.
//!
//! - **Protocol**: [`RenderEvent`], [`RenderResult`], [`ShutdownAck`]
//! - **Context**: [`RenderContext`], the per-request invocation context that
//!   host callbacks can read
//! - **Errors**: [`RenderError`] and the crate-wide [`Result`] alias
//!
//! # Example
//!
//! ```
//! use prerender_common::{RenderContext, RenderResult, RenderError};
//!
//! let ctx = RenderContext::new().with_value("locale", "en-GB");
//! assert_eq!(ctx.value("locale"), Some(&serde_json::json!("en-GB")));
//!
//! let ok = RenderResult::success("<p>hi</p>");
//! assert!(ok.is_success());
//!
//! let failed = RenderResult::failure(RenderError::Script("ReferenceError".into()));
//! assert_eq!(failed.output(), "");
//! ```

pub mod protocol;

pub use protocol::*;
