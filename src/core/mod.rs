//! Core domain models for flows
//!
//! This module defines the run context, stage handlers, the errors
//! collected per run and the flow configuration.

pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod stage;

pub use context::*;
pub use error::{ErrorList, ErrorType, FlowError, StructuredError};
pub use handler::*;
