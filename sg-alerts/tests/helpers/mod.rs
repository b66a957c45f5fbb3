//! Test helper modules for sg-alerts integration tests
//!
//! - StubService: in-process judge / speech service
//! - pipeline fixtures: quiet local configs over a temp alerts dir

#![allow(dead_code)]

pub mod fixtures;
pub mod stub_service;

pub use fixtures::{local_config, local_pipeline, manual_pipeline, read_log_lines};
pub use stub_service::{StubBehavior, StubService};
