use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Compilation error: {0}")]
    Compile(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Failed to bind params: {0}")]
    ParamsBinding(String),

    #[error("Render timed out after {0}ms")]
    Timeout(u64),

    #[error("Renderer has been shut down")]
    ShutDown,

    #[error("No worker pool is available")]
    PoolUnavailable,

    #[error("Failed to start worker: {0}")]
    WorkerSpawn(String),

    #[error("Render task failed: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RenderError {
    /// Returns `true` for failures that are reported in-band through a
    /// [`RenderResult`](super::RenderResult) rather than aborting the call.
    pub fn is_per_request(&self) -> bool {
        matches!(
            self,
            RenderError::Script(_) | RenderError::ParamsBinding(_) | RenderError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;
