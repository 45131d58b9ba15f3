//! Infrastructure layer module
//!
//! Adapters for everything outside the process:
//! - Claude Messages API client
//! - Ecosystem coverage toolchains
//! - Session state file
//! - Git snapshots
//! - Configuration loading
//! - Logging
//!
//! Implementations satisfy the port traits defined in the domain layer.

pub mod claude;
pub mod config;
pub mod coverage;
pub mod logging;
pub mod persistence;
pub mod vcs;
