//! Render Result
//!
//! The single answer a worker sends back for a request.

use super::RenderError;

/// Outcome of one script invocation.
///
/// Holds either a rendered output string or an error, never both: the only
/// constructors are [`RenderResult::success`] and [`RenderResult::failure`],
/// and a failure always carries an empty output.
///
/// # Example
///
/// ```
/// use prerender_common::{RenderResult, RenderError};
///
/// let result = RenderResult::success("hello, blah");
/// assert_eq!(result.into_result().unwrap(), "hello, blah");
///
/// let result = RenderResult::failure(RenderError::Script("boom".into()));
/// assert!(result.error().is_some());
/// assert!(result.output().is_empty());
/// ```
#[derive(Debug)]
pub struct RenderResult {
    output: String,
    error: Option<RenderError>,
}

impl RenderResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(error: RenderError) -> Self {
        Self {
            output: String::new(),
            error: Some(error),
        }
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn error(&self) -> Option<&RenderError> {
        self.error.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Converts into a plain `Result`, for callers that prefer `?`.
    pub fn into_result(self) -> Result<String, RenderError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.output),
        }
    }
}
