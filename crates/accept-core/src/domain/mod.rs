//! Domain models for ACCEPT.
//!
//! - `Execution`: one build-and-run attempt of one configuration
//! - `ExitStatus`: how that attempt ended
//! - `Output`: what the scoring collaborator loaded from it
//! - `AcceptError`: crate-level error taxonomy

pub mod error;
pub mod execution;

pub use error::{AcceptError, Result};
pub use execution::{Execution, ExitStatus, Output};
