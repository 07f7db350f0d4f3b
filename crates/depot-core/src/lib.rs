//! # Depot Core
//!
//! Error types, result aliases, and tracing initialisation shared by every
//! Depot crate.

pub mod error;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use result::*;
pub use telemetry::{init_tracing, LogFormat};
