//! # fscore Common Library
//!
//! Shared code for the fscore workspace:
//! - Error type shared by every crate
//! - TOML bootstrap configuration and root folder resolution
//! - Atomic file writes for artifacts that must never be half-written

pub mod config;
pub mod error;
pub mod fs;

pub use error::{Error, Result};
