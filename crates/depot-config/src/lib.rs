//! # Depot Config
//!
//! Configuration management for Depot.
//! Settings are layered from TOML files and `DEPOT__`-prefixed environment
//! variables; crates that own their own settings (the job queue) read their
//! section through [`ConfigLoader::section`].

mod app_config;
mod loader;

pub use app_config::*;
pub use loader::*;
