//! # Shoplift Guard Alerts (sg-alerts)
//!
//! Decision-and-suppression core of the loss-prevention alerting pipeline.
//!
//! **Flow:** normalize → cooldown gate → judge → alert voice → incident log
//!
//! The cooldown gate and incident recorder are the only shared mutable state;
//! both are safe to call from many tokio tasks at once. Judge and voice calls
//! to external services are bounded by timeouts and fall back to local
//! strategies, so a slow service never blocks admission of other events.

pub mod cooldown;
pub mod error;
pub mod event;
pub mod incident_log;
pub mod judge;
pub mod pipeline;
pub mod voice;

pub use cooldown::{Admission, CooldownGate, CooldownKey};
pub use error::{Error, ExternalServiceError, PersistenceError, Result, ValidationError};
pub use event::{DetectionEvent, EventType, RawEvent};
pub use incident_log::{IncidentRecord, IncidentRecorder, IncidentStatus};
pub use judge::{Judge, JudgeSource, Verdict};
pub use pipeline::{
    stub_tracks, AlertPipeline, AlertResponse, BatchItem, Decision, PipelineResult, SimulationResponse,
    SuppressionReason,
};
pub use voice::{AlertDispatcher, VoiceSource};
