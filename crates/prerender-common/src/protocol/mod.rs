pub mod context;
pub mod error;
pub mod events;
pub mod result;


pub use context::{RenderContext, RequestId};
pub use error::{RenderError, Result};
pub use events::{RenderEvent, ShutdownAck, WorkerId};
pub use result::RenderResult;
