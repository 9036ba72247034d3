//! Prerender Runtime
//!
//! A pool of sandboxed JavaScript workers, built on the Boa engine, that
//! render output by running one precompiled script against per-request input.
//!
//! # Architecture
//!
//! - [`Renderer`] is the only thing callers touch. It owns the configuration,
//!   the compiled script, the callback registry and the current generation of
//!   workers.
//! - Each execution worker is an OS thread owning one Boa engine. Workers
//!   share the immutable [`CompiledScript`] and [`CallbackRegistry`] of their
//!   generation and nothing else.
//! - Requests travel over a bounded queue shared by the whole generation;
//!   each carries a private reply channel that receives exactly one result.
//! - Every request runs in a fresh realm, so globals never leak between
//!   requests handled by the same worker.
//! - With `reload_on_change`, the script file is stat'ed before each render and
//!   the whole generation is torn down and rebuilt when it changes.
//!
//! # Script contract
//!
//! The script runs once per request at top level, then the request payload is
//! bound as the global `params`, then the configured entry expression
//! (`entry()` by default) is evaluated and its string form becomes the output.

pub mod config;
pub mod renderer;
pub mod runtime;
pub mod stats;

mod watcher;

pub use config::RendererConfig;
pub use prerender_common::{RenderContext, RenderError, RenderResult, Result};
pub use renderer::Renderer;
pub use runtime::{CallbackArgs, CallbackRegistry, CompiledScript, HostFn};
pub use stats::RendererStats;
