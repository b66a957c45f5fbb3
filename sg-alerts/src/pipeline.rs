//! Pipeline orchestrator
//!
//! **Sequence per event:**
//! 1. Normalize (validation failures are returned, never recorded)
//! 2. Cooldown gate admit; suppressed → record, return
//! 3. Judge; rejected → release the gate slot, record, return
//! 4. Alert voice (best-effort)
//! 5. Record triggered, return
//!
//! Every event that passes validation yields exactly one incident record.
//! A failed append is reported on the result (`persisted = false`) instead of
//! failing the event.

use crate::cooldown::{CooldownGate, CooldownKey};
use crate::error::{Result, ValidationError};
use crate::event::{normalize, normalize_json, DetectionEvent, RawEvent};
use crate::incident_log::{IncidentRecorder, IncidentStatus, RecordDetails};
use crate::judge::{Judge, JudgeSource};
use crate::voice::{AlertDispatcher, VoiceSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sg_common::config::{read_toml_config, TomlConfig};
use sg_common::Clock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Why an event did not escalate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    Cooldown,
    LowConfidence,
    JudgeReject,
}

impl SuppressionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cooldown => "cooldown",
            Self::LowConfidence => "low_confidence",
            Self::JudgeReject => "judge_reject",
        }
    }
}

/// Escalation decision for one event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decision {
    pub triggered: bool,
    pub reason: Option<String>,
    pub audio_path: Option<PathBuf>,
}

impl Decision {
    pub fn suppressed(reason: impl Into<String>) -> Self {
        Self {
            triggered: false,
            reason: Some(reason.into()),
            audio_path: None,
        }
    }
}

/// Structured outcome returned to the invoker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    pub status: IncidentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,
    pub camera_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judge: Option<JudgeSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<Uuid>,
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence_error: Option<String>,
}

impl PipelineResult {
    pub fn triggered(&self) -> bool {
        self.status == IncidentStatus::Triggered
    }
}

/// Single-event response body: `{triggered, reason?, audioPath?, fallbackUsed?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertResponse {
    pub triggered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_used: Option<bool>,
}

impl From<&PipelineResult> for AlertResponse {
    fn from(result: &PipelineResult) -> Self {
        let triggered = result.triggered();
        Self {
            triggered,
            reason: if triggered { None } else { result.reason.clone() },
            audio_path: result
                .audio_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            fallback_used: triggered.then(|| result.voice != Some(VoiceSource::External)),
        }
    }
}

/// One entry of a batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub track_id: String,
    pub status: IncidentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppressed_reason: Option<String>,
}

/// Batch response body: `{message, results}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResponse {
    pub message: String,
    pub results: Vec<BatchItem>,
}

/// Five `exit_without_checkout` stub tracks for end-to-end runs without cameras
///
/// The first track appears twice so one run always exercises the cooldown.
pub fn stub_tracks() -> Vec<RawEvent> {
    vec![
        RawEvent::track_exit("cam1", "t1", "Aisle 6", 0.9),
        RawEvent::track_exit("cam1", "t1", "Aisle 6", 0.9),
        RawEvent::track_exit("cam1", "t2", "Exit", 0.9),
        RawEvent::track_exit("cam2", "t3", "Checkout 2", 0.9),
        RawEvent::track_exit("cam2", "t4", "Aisle 3", 0.9),
    ]
}

/// Normalize → gate → judge → voice → log
pub struct AlertPipeline {
    gate: CooldownGate,
    judge: Judge,
    dispatcher: AlertDispatcher,
    recorder: IncidentRecorder,
    clock: Arc<dyn Clock>,
}

impl AlertPipeline {
    /// Build every component from configuration
    pub fn new(config: &TomlConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let gate = CooldownGate::with_capacity(
            config.gate.cooldown_window(),
            Arc::clone(&clock),
            config.gate.max_tracked_keys,
        );
        let judge = Judge::from_config(&config.judge, config.dry_run)?;
        let dispatcher = AlertDispatcher::from_config(
            &config.voice,
            config.audio_dir(),
            Arc::clone(&clock),
            config.dry_run,
        )?;
        let recorder = IncidentRecorder::new(config.incidents_path(), Arc::clone(&clock));

        info!(
            "Alert pipeline ready: cooldown {}s, incidents at {}",
            config.gate.cooldown_seconds,
            recorder.path().display()
        );
        Ok(Self::from_parts(gate, judge, dispatcher, recorder, clock))
    }

    /// Build from a TOML file (no environment overrides)
    pub fn from_config_file(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        let config = read_toml_config(path)?;
        Self::new(&config, clock)
    }

    pub fn from_parts(
        gate: CooldownGate,
        judge: Judge,
        dispatcher: AlertDispatcher,
        recorder: IncidentRecorder,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gate,
            judge,
            dispatcher,
            recorder,
            clock,
        }
    }

    pub fn gate(&self) -> &CooldownGate {
        &self.gate
    }

    pub fn judge(&self) -> &Judge {
        &self.judge
    }

    pub fn dispatcher(&self) -> &AlertDispatcher {
        &self.dispatcher
    }

    pub fn recorder(&self) -> &IncidentRecorder {
        &self.recorder
    }

    /// Validate and process one inbound event
    pub async fn process(&self, raw: RawEvent) -> std::result::Result<PipelineResult, ValidationError> {
        let event = normalize(raw, self.clock.now()).map_err(|e| {
            warn!("Rejected event: {}", e);
            e
        })?;
        Ok(self.process_event(event).await)
    }

    /// Validate and process a JSON request body
    pub async fn process_json(&self, body: Value) -> std::result::Result<PipelineResult, ValidationError> {
        let event = normalize_json(body, self.clock.now()).map_err(|e| {
            warn!("Rejected event body: {}", e);
            e
        })?;
        Ok(self.process_event(event).await)
    }

    /// Process an already-normalized event; never fails
    pub async fn process_event(&self, event: DetectionEvent) -> PipelineResult {
        let admission = self.gate.admit(&event);
        if !admission.admitted {
            debug!(
                camera = event.camera_id(),
                track = event.track_id().unwrap_or("-"),
                "Suppressed by cooldown"
            );
            let details = RecordDetails {
                cooldown_remaining_secs: admission.remaining_secs(),
                ..Default::default()
            };
            return self
                .finish(&event, Decision::suppressed(SuppressionReason::Cooldown.as_str()), details)
                .await;
        }

        let verdict = self.judge.evaluate(&event).await;
        if !verdict.trigger {
            if let Some(admitted_at) = admission.at {
                self.gate.release(&CooldownKey::from_event(&event), admitted_at);
            }
            let details = RecordDetails {
                judge: Some(verdict.source),
                ..Default::default()
            };
            return self
                .finish(&event, Decision::suppressed(verdict.reason), details)
                .await;
        }

        let mut decision = Decision {
            triggered: true,
            reason: Some(verdict.reason),
            audio_path: None,
        };
        let dispatch = self.dispatcher.dispatch(&event, &decision).await;
        decision.audio_path = dispatch.audio_path;

        info!(
            "ALERT camera={} track={} location=\"{}\" confidence={:.2} audio={}",
            event.camera_id(),
            event.track_id().unwrap_or("-"),
            event.location(),
            event.confidence(),
            decision
                .audio_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "none".to_string())
        );

        let details = RecordDetails {
            admitted_at: admission.at,
            judge: Some(verdict.source),
            voice: dispatch.voice,
            alert_text: dispatch.alert_text,
            ..Default::default()
        };
        self.finish(&event, decision, details).await
    }

    async fn finish(&self, event: &DetectionEvent, decision: Decision, details: RecordDetails) -> PipelineResult {
        let cooldown_remaining_secs = details.cooldown_remaining_secs;
        let judge = details.judge;
        let voice = details.voice;

        let (incident_id, persisted, persistence_error) =
            match self.recorder.record(event, &decision, details).await {
                Ok(record) => (Some(record.incident_id), true, None),
                Err(e) => {
                    error!(
                        "Failed to record incident for camera {}: {}",
                        event.camera_id(),
                        e
                    );
                    (None, false, Some(e.to_string()))
                }
            };

        PipelineResult {
            status: if decision.triggered {
                IncidentStatus::Triggered
            } else {
                IncidentStatus::Suppressed
            },
            reason: decision.reason,
            audio_path: decision.audio_path,
            camera_id: event.camera_id().to_string(),
            track_id: event.track_id().map(str::to_string),
            cooldown_remaining_secs,
            judge,
            voice,
            incident_id,
            persisted,
            persistence_error,
        }
    }

    /// Process events one after another, one result per event, input order kept
    ///
    /// Invalid events are reported as suppressed items with an
    /// `invalid_event` reason and are not written to the incident log.
    pub async fn run_batch(&self, events: Vec<RawEvent>) -> Vec<BatchItem> {
        let mut results = Vec::with_capacity(events.len());

        for raw in events {
            let track_id = raw
                .track_id
                .clone()
                .or_else(|| raw.camera_id.clone())
                .unwrap_or_default();

            let item = match self.process(raw).await {
                Ok(result) => BatchItem {
                    track_id,
                    status: result.status,
                    suppressed_reason: if result.triggered() { None } else { result.reason },
                },
                Err(e) => BatchItem {
                    track_id,
                    status: IncidentStatus::Suppressed,
                    suppressed_reason: Some(format!("invalid_event: {}", e)),
                },
            };
            results.push(item);
        }

        results
    }

    /// Run the stub tracks through the pipeline
    pub async fn simulate(&self) -> SimulationResponse {
        let results = self.run_batch(stub_tracks()).await;
        let judge = match self.judge.source() {
            JudgeSource::Local => "local",
            JudgeSource::External => "external",
        };
        let voice = match self.dispatcher.source() {
            VoiceSource::Local => "local",
            VoiceSource::External => "external",
        };

        SimulationResponse {
            message: format!(
                "Smoke test completed ({} stub tracks, {} judge + {} voice)",
                results.len(),
                judge,
                voice
            ),
            results,
        }
    }
}

impl std::fmt::Debug for AlertPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertPipeline")
            .field("gate", &self.gate)
            .field("judge", &self.judge)
            .field("dispatcher", &self.dispatcher)
            .field("recorder", &self.recorder)
            .finish_non_exhaustive()
    }
}
