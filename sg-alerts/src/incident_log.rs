//! Incident recorder: append-only newline-delimited JSON log
//!
//! One line per processed event, triggered or suppressed. Each record is
//! serialized to a complete line first and then written with a single
//! append under an async mutex, so concurrent incidents never interleave
//! partial lines and existing lines are never rewritten.

use crate::error::PersistenceError;
use crate::event::{DetectionEvent, EventType};
use crate::judge::JudgeSource;
use crate::pipeline::Decision;
use crate::voice::VoiceSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sg_common::Clock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Final outcome of one processed event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Triggered,
    Suppressed,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Triggered => "triggered",
            Self::Suppressed => "suppressed",
        }
    }
}

/// One line of `incidents.jsonl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub incident_id: Uuid,
    pub status: IncidentStatus,
    pub ts: DateTime<Utc>,
    pub event_type: EventType,
    pub camera_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<String>,
    pub location: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge: Option<JudgeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,
}

/// Optional context attached to a record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordDetails {
    /// Gate admission instant; stamps the record instead of the write time
    pub admitted_at: Option<DateTime<Utc>>,
    pub cooldown_remaining_secs: Option<u64>,
    pub judge: Option<JudgeSource>,
    pub voice: Option<VoiceSource>,
    pub alert_text: Option<String>,
}

/// Appends incident records to a JSONL file
pub struct IncidentRecorder {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl IncidentRecorder {
    pub fn new(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record for `event` and return what was written
    ///
    /// Creates the log and its directory on first write. `ts` is the
    /// admission instant when one is given, so triggered records for a key
    /// are spaced by at least the cooldown window no matter how long the
    /// judge and voice took.
    pub async fn record(
        &self,
        event: &DetectionEvent,
        decision: &Decision,
        details: RecordDetails,
    ) -> Result<IncidentRecord, PersistenceError> {
        let _guard = self.write_lock.lock().await;

        let record = IncidentRecord {
            incident_id: Uuid::new_v4(),
            status: if decision.triggered {
                IncidentStatus::Triggered
            } else {
                IncidentStatus::Suppressed
            },
            ts: details.admitted_at.unwrap_or_else(|| self.clock.now()),
            event_type: event.event_type(),
            camera_id: event.camera_id().to_string(),
            track_id: event.track_id().map(str::to_string),
            location: event.location().to_string(),
            confidence: event.confidence(),
            reason: decision.reason.clone(),
            cooldown_remaining_secs: details.cooldown_remaining_secs,
            judge: details.judge,
            voice: details.voice,
            alert_text: details.alert_text,
            audio_path: decision.audio_path.clone(),
        };

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(
            incident_id = %record.incident_id,
            status = record.status.as_str(),
            "Incident recorded"
        );
        Ok(record)
    }

    /// Last `n` records, oldest first
    ///
    /// A missing log is empty. Lines that do not parse are skipped and do
    /// not count toward `n`.
    pub async fn tail(&self, n: usize) -> Result<Vec<IncidentRecord>, PersistenceError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records: Vec<IncidentRecord> = content
            .lines()
            .rev()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<IncidentRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping unreadable incident line in {}: {}", self.path.display(), e);
                    None
                }
            })
            .take(n)
            .collect();
        records.reverse();
        Ok(records)
    }
}

impl std::fmt::Debug for IncidentRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncidentRecorder")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
