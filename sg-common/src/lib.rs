//! # Shoplift Guard Common Library
//!
//! Shared code for the Shoplift Guard crates including:
//! - Error types
//! - Configuration loading (TOML file + environment overrides)
//! - Logging initialization
//! - Clock abstraction for time-dependent components

pub mod config;
pub mod error;
pub mod logging;
pub mod time;

pub use error::{Error, Result};
pub use time::{Clock, ManualClock, SystemClock};
