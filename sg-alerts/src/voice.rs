//! Alert dispatcher: renders the audible alert for a triggered decision
//!
//! Strategy is fixed at construction, mirroring the judge:
//! - **Local**: OS text-to-speech (`say` / `espeak`) when enabled and
//!   available, otherwise a generated 880 Hz beep WAV. Needs no credentials.
//! - **External**: speech service returning audio bytes, bounded by a
//!   timeout; any failure falls back to the local path.
//!
//! Audio is best-effort. A dispatch that cannot produce a file returns no
//! path and logs a warning; the decision it belongs to stays triggered.

use crate::error::ExternalServiceError;
use crate::event::DetectionEvent;
use crate::pipeline::Decision;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sg_common::config::VoiceConfig;
use sg_common::Clock;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

const USER_AGENT: &str = concat!("shoplift-guard/", env!("CARGO_PKG_VERSION"));

pub const BEEP_SAMPLE_RATE: u32 = 8_000;
pub const BEEP_FREQUENCY_HZ: f64 = 880.0;
pub const BEEP_SECONDS: f64 = 0.4;
const BEEP_AMPLITUDE: f64 = 0.3;

/// Upper bound for a local TTS process
const LOCAL_TTS_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_SAFE_ID_LEN: usize = 24;
const FILE_TAG_LEN: usize = 8;

/// Which strategy rendered the alert audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceSource {
    Local,
    External,
}

/// Result of [`AlertDispatcher::dispatch`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dispatch {
    pub audio_path: Option<PathBuf>,
    pub voice: Option<VoiceSource>,
    pub alert_text: Option<String>,
}

/// Substitute `{location}` into the alert template
pub fn alert_text(template: &str, location: &str) -> String {
    template.replace("{location}", location)
}

/// Restrict an identifier to `[A-Za-z0-9_-]`, truncated
pub fn safe_id(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(MAX_SAFE_ID_LEN)
        .collect()
}

/// `<timestamp>-<tag>_<camera>[_<track>]_<kind>.wav`
///
/// Ids are truncated, so the random tag keeps names distinct for cameras
/// sharing a long prefix.
pub fn audio_file_name(now: DateTime<Utc>, event: &DetectionEvent, kind: &str) -> String {
    let ts = now.format("%Y-%m-%dT%H-%M-%S-%3f");
    let uuid = Uuid::new_v4().simple().to_string();
    let tag = &uuid[..FILE_TAG_LEN];
    match event.track_id() {
        Some(track) => format!(
            "{}-{}_{}_{}_{}.wav",
            ts,
            tag,
            safe_id(event.camera_id()),
            safe_id(track),
            kind
        ),
        None => format!("{}-{}_{}_{}.wav", ts, tag, safe_id(event.camera_id()), kind),
    }
}

/// Write a short sine beep as 16-bit mono PCM
pub fn write_beep_wav(path: &Path) -> Result<(), hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: BEEP_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    let samples = (f64::from(BEEP_SAMPLE_RATE) * BEEP_SECONDS) as u32;
    for i in 0..samples {
        let t = f64::from(i) / f64::from(BEEP_SAMPLE_RATE);
        let value = f64::from(i16::MAX) * BEEP_AMPLITUDE * (2.0 * std::f64::consts::PI * BEEP_FREQUENCY_HZ * t).sin();
        writer.write_sample(value as i16)?;
    }
    writer.finalize()
}

fn tts_command(path: &Path, text: &str) -> Option<Command> {
    if cfg!(target_os = "macos") {
        let mut cmd = Command::new("say");
        cmd.arg("-o").arg(path).arg("--data-format=LEI16@22050").arg(text);
        Some(cmd)
    } else if cfg!(target_os = "linux") {
        let mut cmd = Command::new("espeak");
        cmd.arg("-w").arg(path).arg(text);
        Some(cmd)
    } else {
        None
    }
}

fn player_command(path: &Path) -> Command {
    if cfg!(target_os = "macos") {
        let mut cmd = Command::new("afplay");
        cmd.arg(path);
        cmd
    } else {
        let mut cmd = Command::new("ffplay");
        cmd.args(["-nodisp", "-autoexit", "-loglevel", "quiet"]).arg(path);
        cmd
    }
}

/// Local beep / OS TTS renderer
pub struct LocalVoice {
    audio_dir: PathBuf,
    template: String,
    local_tts: bool,
    play_audio: bool,
    clock: Arc<dyn Clock>,
}

impl LocalVoice {
    pub fn new(config: &VoiceConfig, audio_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            audio_dir: audio_dir.into(),
            template: config.template.clone(),
            local_tts: config.local_tts,
            play_audio: config.play_audio,
            clock,
        }
    }

    pub fn audio_dir(&self) -> &Path {
        &self.audio_dir
    }

    pub fn alert_text(&self, event: &DetectionEvent) -> String {
        alert_text(&self.template, event.location())
    }

    async fn try_tts(&self, path: &Path, text: &str) -> bool {
        let Some(mut cmd) = tts_command(path, text) else {
            return false;
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(LOCAL_TTS_TIMEOUT, cmd.status()).await {
            Ok(Ok(status)) if status.success() => tokio::fs::metadata(path)
                .await
                .map(|m| m.len() > 0)
                .unwrap_or(false),
            Ok(Ok(status)) => {
                debug!("Local TTS exited with {}", status);
                false
            }
            Ok(Err(e)) => {
                debug!("Local TTS unavailable: {}", e);
                false
            }
            Err(_) => {
                warn!("Local TTS timed out after {:?}", LOCAL_TTS_TIMEOUT);
                false
            }
        }
    }

    /// Render the alert locally; `None` only when nothing could be written
    pub async fn render(&self, event: &DetectionEvent) -> Option<PathBuf> {
        if let Err(e) = tokio::fs::create_dir_all(&self.audio_dir).await {
            warn!("Cannot create audio directory {}: {}", self.audio_dir.display(), e);
            return None;
        }

        let now = self.clock.now();

        if self.local_tts {
            let path = self.audio_dir.join(audio_file_name(now, event, "local"));
            if self.try_tts(&path, &self.alert_text(event)).await {
                self.play(&path);
                return Some(path);
            }
        }

        let path = self.audio_dir.join(audio_file_name(now, event, "beep"));
        let target = path.clone();
        match tokio::task::spawn_blocking(move || write_beep_wav(&target)).await {
            Ok(Ok(())) => {
                self.play(&path);
                Some(path)
            }
            Ok(Err(e)) => {
                warn!("Failed to write beep {}: {}", path.display(), e);
                None
            }
            Err(e) => {
                warn!("Beep writer task failed: {}", e);
                None
            }
        }
    }

    fn play(&self, path: &Path) {
        if !self.play_audio {
            return;
        }
        let mut cmd = player_command(path);
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
        if let Err(e) = cmd.spawn() {
            debug!("Audio player unavailable: {}", e);
        }
    }
}

impl std::fmt::Debug for LocalVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalVoice")
            .field("audio_dir", &self.audio_dir)
            .field("local_tts", &self.local_tts)
            .field("play_audio", &self.play_audio)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    camera_id: &'a str,
}

/// Speech-service renderer with local fallback
#[derive(Debug)]
pub struct ExternalVoice {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
    fallback: LocalVoice,
}

impl ExternalVoice {
    pub fn new(
        endpoint: &str,
        api_key: &str,
        timeout: Duration,
        fallback: LocalVoice,
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

    async fn synthesize(&self, event: &DetectionEvent, text: &str) -> Result<PathBuf, ExternalServiceError> {
        let call = async {
            let response = self
                .http_client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&SpeechRequest {
                    text,
                    camera_id: event.camera_id(),
                })
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(ExternalServiceError::Status(status.as_u16()));
            }
            Ok(response.bytes().await?)
        };

        let audio = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| ExternalServiceError::Timeout(self.timeout))??;

        if audio.is_empty() {
            return Err(ExternalServiceError::Decode("empty audio body".to_string()));
        }

        let dir = self.fallback.audio_dir();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ExternalServiceError::Decode(format!("audio directory: {}", e)))?;
        let path = dir.join(audio_file_name(self.fallback.clock.now(), event, "external"));
        tokio::fs::write(&path, &audio)
            .await
            .map_err(|e| ExternalServiceError::Decode(format!("write {}: {}", path.display(), e)))?;
        Ok(path)
    }
}

/// Alert voice strategy, fixed for the lifetime of a pipeline
#[derive(Debug)]
pub enum AlertDispatcher {
    Local(LocalVoice),
    External(ExternalVoice),
}

impl AlertDispatcher {
    /// External only when endpoint and credential are configured and not in dry-run
    pub fn from_config(
        config: &VoiceConfig,
        audio_dir: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
        dry_run: bool,
    ) -> Result<Self, ExternalServiceError> {
        let local = LocalVoice::new(config, audio_dir, clock);

        match config.external_service() {
            Some((endpoint, api_key)) if !dry_run => {
                info!("Alert voice: external speech service at {}", endpoint);
                Ok(Self::External(ExternalVoice::new(endpoint, api_key, config.timeout(), local)?))
            }
            _ => {
                info!("Alert voice: local (tts={}, dir={})", local.local_tts, local.audio_dir.display());
                Ok(Self::Local(local))
            }
        }
    }

    pub fn source(&self) -> VoiceSource {
        match self {
            Self::Local(_) => VoiceSource::Local,
            Self::External(_) => VoiceSource::External,
        }
    }

    /// Render audio for a triggered decision; no-op otherwise
    pub async fn dispatch(&self, event: &DetectionEvent, decision: &Decision) -> Dispatch {
        if !decision.triggered {
            return Dispatch::default();
        }

        let (text, audio_path, voice) = match self {
            Self::Local(local) => {
                let text = local.alert_text(event);
                (text, local.render(event).await, VoiceSource::Local)
            }
            Self::External(external) => {
                let text = external.fallback.alert_text(event);
                match external.synthesize(event, &text).await {
                    Ok(path) => {
                        external.fallback.play(&path);
                        (text, Some(path), VoiceSource::External)
                    }
                    Err(e) => {
                        warn!(
                            "External voice failed for camera {}: {}. Using local voice.",
                            event.camera_id(),
                            e
                        );
                        (text, external.fallback.render(event).await, VoiceSource::Local)
                    }
                }
            }
        };

        if audio_path.is_none() {
            warn!("No alert audio produced for camera {}", event.camera_id());
        }

        Dispatch {
            audio_path,
            voice: Some(voice),
            alert_text: Some(text),
        }
    }
}
