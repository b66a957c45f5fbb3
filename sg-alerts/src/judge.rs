//! Judge: trigger / no-trigger verdict for an admitted event
//!
//! Two strategies behind one tagged variant, chosen once at construction:
//! - **Local**: deterministic threshold on event confidence. No credentials,
//!   no network.
//! - **External**: asks a configured reasoning service, bounded by a timeout.
//!   Any failure is logged and the local strategy decides instead, so judge
//!   failures are never fatal.

use crate::error::ExternalServiceError;
use crate::event::DetectionEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sg_common::config::JudgeConfig;
use std::time::Duration;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("shoplift-guard/", env!("CARGO_PKG_VERSION"));

pub const REASON_LOW_CONFIDENCE: &str = "low_confidence";
pub const REASON_LOCAL_APPROVED: &str = "local_judge_approved";
pub const REASON_EXTERNAL_APPROVED: &str = "external_judge_approved";
pub const REASON_JUDGE_REJECT: &str = "judge_reject";

/// Which strategy produced a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeSource {
    Local,
    External,
}

/// Judge output
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub trigger: bool,
    pub reason: String,
    pub source: JudgeSource,
}

/// Deterministic confidence-threshold judge
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalJudge {
    min_confidence: f64,
}

impl LocalJudge {
    pub fn new(min_confidence: f64) -> Self {
        Self { min_confidence }
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    /// Trigger iff confidence is at or above the threshold
    pub fn evaluate(&self, event: &DetectionEvent) -> Verdict {
        let trigger = event.confidence() >= self.min_confidence;
        Verdict {
            trigger,
            reason: if trigger {
                REASON_LOCAL_APPROVED
            } else {
                REASON_LOW_CONFIDENCE
            }
            .to_string(),
            source: JudgeSource::Local,
        }
    }
}

/// Request body sent to the reasoning service
#[derive(Debug, Serialize)]
struct JudgeRequest<'a> {
    event_type: &'a str,
    camera_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    track_id: Option<&'a str>,
    location: &'a str,
    confidence: f64,
    timestamp: DateTime<Utc>,
}

impl<'a> From<&'a DetectionEvent> for JudgeRequest<'a> {
    fn from(event: &'a DetectionEvent) -> Self {
        Self {
            event_type: event.event_type().as_str(),
            camera_id: event.camera_id(),
            track_id: event.track_id(),
            location: event.location(),
            confidence: event.confidence(),
            timestamp: event.timestamp(),
        }
    }
}

/// Reasoning service reply
#[derive(Debug, Deserialize)]
struct JudgeResponse {
    #[serde(alias = "concealment_likely")]
    trigger: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Reasoning-service judge with local fallback
#[derive(Debug, Clone)]
pub struct ExternalJudge {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
    fallback: LocalJudge,
}

impl ExternalJudge {
    pub fn new(
        endpoint: &str,
        api_key: &str,
        timeout: Duration,
        fallback: LocalJudge,
    ) -> Result<Self, ExternalServiceError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            timeout,
            fallback,
        })
    }

    async fn request(&self, event: &DetectionEvent) -> Result<Verdict, ExternalServiceError> {
        let call = async {
            let response = self
                .http_client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&JudgeRequest::from(event))
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(ExternalServiceError::Status(status.as_u16()));
            }

            response
                .json::<JudgeResponse>()
                .await
                .map_err(|e| ExternalServiceError::Decode(e.to_string()))
        };

        let reply = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| ExternalServiceError::Timeout(self.timeout))??;

        let default_reason = if reply.trigger {
            REASON_EXTERNAL_APPROVED
        } else {
            REASON_JUDGE_REJECT
        };

        Ok(Verdict {
            trigger: reply.trigger,
            reason: reply
                .reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| default_reason.to_string()),
            source: JudgeSource::External,
        })
    }

    pub async fn evaluate(&self, event: &DetectionEvent) -> Verdict {
        match self.request(event).await {
            Ok(verdict) => {
                debug!(camera = event.camera_id(), trigger = verdict.trigger, "External judge verdict");
                verdict
            }
            Err(e) => {
                warn!(
                    "External judge failed for camera {}: {}. Using local judge.",
                    event.camera_id(),
                    e
                );
                self.fallback.evaluate(event)
            }
        }
    }
}

/// Judge strategy, fixed for the lifetime of a pipeline
#[derive(Debug, Clone)]
pub enum Judge {
    Local(LocalJudge),
    External(ExternalJudge),
}

impl Judge {
    /// External only when endpoint and credential are configured and not in dry-run
    pub fn from_config(config: &JudgeConfig, dry_run: bool) -> Result<Self, ExternalServiceError> {
        let local = LocalJudge::new(config.min_confidence);

        match config.external_service() {
            Some((endpoint, api_key)) if !dry_run => {
                info!("Judge: external reasoning service at {}", endpoint);
                Ok(Self::External(ExternalJudge::new(
                    endpoint,
                    api_key,
                    config.timeout(),
                    local,
                )?))
            }
            Some(_) => {
                info!("Judge: dry run, external service ignored; local threshold {}", local.min_confidence());
                Ok(Self::Local(local))
            }
            None => {
                info!("Judge: local threshold {}", local.min_confidence());
                Ok(Self::Local(local))
            }
        }
    }

    pub fn source(&self) -> JudgeSource {
        match self {
            Self::Local(_) => JudgeSource::Local,
            Self::External(_) => JudgeSource::External,
        }
    }

    pub async fn evaluate(&self, event: &DetectionEvent) -> Verdict {
        match self {
            Self::Local(judge) => judge.evaluate(event),
            Self::External(judge) => judge.evaluate(event).await,
        }
    }
}
