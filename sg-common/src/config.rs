//! Configuration loading
//!
//! Resolution order (later tiers override earlier ones):
//! 1. Compiled defaults
//! 2. TOML config file (`SHOPLIFT_CONFIG`, else `<config_dir>/shoplift-guard/config.toml`)
//! 3. Environment variables (`SHOPLIFT_*`)
//!
//! Missing or unreadable configuration never aborts startup: the loader logs
//! a warning and keeps the previous tier's value.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "SHOPLIFT_CONFIG";

pub const DEFAULT_COOLDOWN_SECONDS: u64 = 20;
pub const DEFAULT_MAX_TRACKED_KEYS: usize = 10_000;
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.7;
pub const DEFAULT_JUDGE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_VOICE_TIMEOUT_MS: u64 = 8_000;
pub const DEFAULT_ALERT_TEMPLATE: &str =
    "Security alert. Possible shoplifting detected at {location}.";

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Force local judge and local voice even when credentials are present
    pub dry_run: bool,

    /// Directory holding `incidents.jsonl` and the `audio/` folder
    pub alerts_dir: PathBuf,

    pub gate: GateConfig,
    pub judge: JudgeConfig,
    pub voice: VoiceConfig,
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            alerts_dir: PathBuf::from("alerts"),
            gate: GateConfig::default(),
            judge: JudgeConfig::default(),
            voice: VoiceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Cooldown gate settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Minimum seconds between two triggered alerts for the same camera/track
    pub cooldown_seconds: u64,

    /// Soft cap on remembered cooldown keys before expired entries are pruned
    pub max_tracked_keys: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: DEFAULT_COOLDOWN_SECONDS,
            max_tracked_keys: DEFAULT_MAX_TRACKED_KEYS,
        }
    }
}

impl GateConfig {
    pub fn cooldown_window(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }
}

/// Judge settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Local judge threshold; confidence at or above triggers
    pub min_confidence: f64,

    /// External reasoning service URL (optional)
    pub endpoint: Option<String>,

    /// Bearer credential for the external reasoning service (optional)
    pub api_key: Option<String>,

    pub timeout_ms: u64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            endpoint: None,
            api_key: None,
            timeout_ms: DEFAULT_JUDGE_TIMEOUT_MS,
        }
    }
}

impl JudgeConfig {
    /// Endpoint and credential, only when both are usable
    pub fn external_service(&self) -> Option<(&str, &str)> {
        external_service(self.endpoint.as_deref(), self.api_key.as_deref())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Alert voice settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// External speech service URL (optional)
    pub endpoint: Option<String>,

    /// Bearer credential for the external speech service (optional)
    pub api_key: Option<String>,

    pub timeout_ms: u64,

    /// Alert sentence; `{location}` is substituted
    pub template: String,

    /// Try `say`/`espeak` before falling back to the generated beep
    pub local_tts: bool,

    /// Start `afplay`/`ffplay` on the rendered file
    pub play_audio: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            timeout_ms: DEFAULT_VOICE_TIMEOUT_MS,
            template: DEFAULT_ALERT_TEMPLATE.to_string(),
            local_tts: true,
            play_audio: false,
        }
    }
}

impl VoiceConfig {
    pub fn external_service(&self) -> Option<(&str, &str)> {
        external_service(self.endpoint.as_deref(), self.api_key.as_deref())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

fn external_service<'a>(
    endpoint: Option<&'a str>,
    api_key: Option<&'a str>,
) -> Option<(&'a str, &'a str)> {
    match (endpoint, api_key) {
        (Some(endpoint), Some(key)) if is_valid_key(endpoint) && is_valid_key(key) => {
            Some((endpoint.trim(), key.trim()))
        }
        _ => None,
    }
}

impl TomlConfig {
    /// Path of the append-only incident log
    pub fn incidents_path(&self) -> PathBuf {
        self.alerts_dir.join("incidents.jsonl")
    }

    /// Directory for rendered alert audio
    pub fn audio_dir(&self) -> PathBuf {
        self.alerts_dir.join("audio")
    }

    /// Resolve configuration from file and process environment
    ///
    /// Never fails: unreadable files and bad values degrade to defaults.
    pub fn load() -> Self {
        let mut config = match default_config_path() {
            Some(path) if path.exists() => match read_toml_config(&path) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Ignoring config file {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Some(path) => {
                info!("No config file at {}, using built-in defaults", path.display());
                Self::default()
            }
            None => {
                info!("Could not determine config directory, using built-in defaults");
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.sanitize();
        config
    }

    /// Apply `SHOPLIFT_*` overrides from an arbitrary lookup
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("SHOPLIFT_DRY_RUN") {
            match parse_bool(&value) {
                Some(flag) => self.dry_run = flag,
                None => warn!("Invalid SHOPLIFT_DRY_RUN '{}', keeping {}", value, self.dry_run),
            }
        }

        if let Some(value) = lookup("SHOPLIFT_ALERTS_DIR") {
            if is_valid_key(&value) {
                self.alerts_dir = PathBuf::from(value.trim());
            }
        }

        if let Some(value) = lookup("SHOPLIFT_COOLDOWN_SECONDS") {
            match value.trim().parse::<u64>() {
                Ok(secs) => self.gate.cooldown_seconds = secs,
                Err(e) => warn!(
                    "Invalid SHOPLIFT_COOLDOWN_SECONDS '{}': {}, keeping {}",
                    value, e, self.gate.cooldown_seconds
                ),
            }
        }

        if let Some(value) = lookup("SHOPLIFT_JUDGE_MIN_CONFIDENCE") {
            match value.trim().parse::<f64>() {
                Ok(threshold) if threshold.is_finite() => self.judge.min_confidence = threshold,
                _ => warn!(
                    "Invalid SHOPLIFT_JUDGE_MIN_CONFIDENCE '{}', keeping {}",
                    value, self.judge.min_confidence
                ),
            }
        }

        if let Some(value) = lookup("SHOPLIFT_JUDGE_ENDPOINT") {
            self.judge.endpoint = Some(value);
        }
        if let Some(value) = lookup("SHOPLIFT_JUDGE_API_KEY") {
            self.judge.api_key = Some(value);
        }
        if let Some(value) = lookup("SHOPLIFT_VOICE_ENDPOINT") {
            self.voice.endpoint = Some(value);
        }
        if let Some(value) = lookup("SHOPLIFT_VOICE_API_KEY") {
            self.voice.api_key = Some(value);
        }

        if let Some(value) = lookup("SHOPLIFT_ALERT_TEMPLATE") {
            if is_valid_key(&value) {
                self.voice.template = value;
            }
        }

        if let Some(value) = lookup("SHOPLIFT_LOG_LEVEL") {
            if is_valid_key(&value) {
                self.logging.level = value.trim().to_lowercase();
            }
        }
    }

    /// Clamp values that would otherwise make components misbehave
    pub fn sanitize(&mut self) {
        if !self.judge.min_confidence.is_finite() {
            warn!("Non-finite judge.min_confidence, using {}", DEFAULT_MIN_CONFIDENCE);
            self.judge.min_confidence = DEFAULT_MIN_CONFIDENCE;
        } else if !(0.0..=1.0).contains(&self.judge.min_confidence) {
            let clamped = self.judge.min_confidence.clamp(0.0, 1.0);
            warn!(
                "judge.min_confidence {} outside [0,1], clamped to {}",
                self.judge.min_confidence, clamped
            );
            self.judge.min_confidence = clamped;
        }

        if self.gate.max_tracked_keys == 0 {
            warn!("gate.max_tracked_keys must be positive, using {}", DEFAULT_MAX_TRACKED_KEYS);
            self.gate.max_tracked_keys = DEFAULT_MAX_TRACKED_KEYS;
        }

        if !self.voice.template.contains("{location}") {
            warn!("voice.template has no {{location}} placeholder");
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Config file location: `SHOPLIFT_CONFIG`, else the platform config dir
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if is_valid_key(&path) {
            return Some(PathBuf::from(path));
        }
    }
    dirs::config_dir().map(|d| d.join("shoplift-guard").join("config.toml"))
}

/// Read and parse a TOML config file
pub fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    let mut config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))?;
    config.sanitize();
    Ok(config)
}

/// Write a config file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
