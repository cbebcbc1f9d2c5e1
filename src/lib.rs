//! flowline - a concurrent stage-dispatch workflow engine

pub mod cli;
pub mod core;
pub mod execution;

// Re-export commonly used types
pub use crate::core::{handler, named, Context, Handler, Params, SharedHandler, ABORT_INDEX};
pub use crate::core::{ErrorList, ErrorType, FlowError, StructuredError};
pub use crate::core::config::FlowConfig;
pub use execution::{Factory, LineId, RunId};
