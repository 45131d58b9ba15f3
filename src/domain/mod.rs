//! Domain layer for the coverage agent
//!
//! Core models, the error taxonomy, and the ports implemented by
//! infrastructure adapters. Nothing in here performs I/O.

pub mod error;
pub mod models;
pub mod ports;

pub use error::{GenerationError, OrchestratorError, SessionError, ToolError};
