//! Renderer configuration.
//!
//! Everything a renderer needs to know before it builds its first pool.
//! Values are normalised the same way on every construction path: an empty
//! entry expression, zero workers, or a zero-capacity queue fall back to the
//! defaults rather than failing.

use prerender_common::{RenderError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_ENTRY: &str = "entry()";
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;
pub const DEFAULT_SCRIPT_NAME: &str = "app.js";

/// Configuration for a [`Renderer`](crate::Renderer).
///
/// # Fields
///
/// - `entry` - Expression evaluated per request to produce the output (default: `entry()`)
/// - `workers` - Number of execution workers per generation (default: 4)
/// - `queue_capacity` - Slots in the shared request queue before submitters block (default: 10)
/// - `reload_on_change` - Poll `source_path` before each render and rebuild on change
/// - `source_path` - Backing file of the script; required when reloading
/// - `script_name` - Name the script is compiled under, shown in engine errors
///
/// # Example
///
/// ```
/// use prerender_runtime::RendererConfig;
///
/// let config = RendererConfig::new()
///     .with_entry("render()")
///     .with_workers(2)
///     .with_reload_on_change("templates/app.js");
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub entry: String,
    pub workers: usize,
    pub queue_capacity: usize,
    pub reload_on_change: bool,
    pub source_path: Option<PathBuf>,
    pub script_name: String,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            entry: DEFAULT_ENTRY.to_string(),
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            reload_on_change: false,
            source_path: None,
            script_name: DEFAULT_SCRIPT_NAME.to_string(),
        }
    }
}

impl RendererConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_script_name(mut self, name: impl Into<String>) -> Self {
        self.script_name = name.into();
        self
    }

    pub fn with_source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    /// Turns on reload-on-change, watching `path`.
    pub fn with_reload_on_change(mut self, path: impl Into<PathBuf>) -> Self {
        self.reload_on_change = true;
        self.source_path = Some(path.into());
        self
    }

    /// Parses a JSON configuration document. Missing fields take their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns `RenderError::Json` if `text` is not a valid configuration.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Replaces unset or zero values with their defaults.
    pub fn normalized(mut self) -> Self {
        if self.entry.trim().is_empty() {
            self.entry = DEFAULT_ENTRY.to_string();
        }
        if self.workers == 0 {
            self.workers = DEFAULT_WORKERS;
        }
        if self.queue_capacity == 0 {
            self.queue_capacity = DEFAULT_QUEUE_CAPACITY;
        }
        if self.script_name.trim().is_empty() {
            self.script_name = DEFAULT_SCRIPT_NAME.to_string();
        }
        self
    }

    /// The watched path, if reloading is configured with a usable one.
    pub fn watched_path(&self) -> Option<&Path> {
        self.source_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `RenderError::Config` if `reload_on_change` is set without a
    /// non-empty `source_path`.
    pub fn validate(&self) -> Result<()> {
        if self.reload_on_change && self.watched_path().is_none() {
            return Err(RenderError::Config(
                "reload_on_change requires a source path; construct the renderer from a file".into(),
            ));
        }
        Ok(())
    }
}
