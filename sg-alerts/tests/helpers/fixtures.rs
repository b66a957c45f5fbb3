//! Pipeline fixtures

use std::path::Path;
use std::sync::Arc;

use sg_alerts::AlertPipeline;
use sg_common::config::TomlConfig;
use sg_common::ManualClock;
use sg_common::SystemClock;
use tempfile::TempDir;

/// Zero-credential config writing under `dir`; no TTS, no playback
pub fn local_config(dir: &TempDir) -> TomlConfig {
    let mut config = TomlConfig::default();
    config.alerts_dir = dir.path().join("alerts");
    config.voice.local_tts = false;
    config.voice.play_audio = false;
    config
}

pub fn local_pipeline(dir: &TempDir) -> AlertPipeline {
    AlertPipeline::new(&local_config(dir), Arc::new(SystemClock)).unwrap()
}

/// Pipeline driven by a manual clock the test can advance
pub fn manual_pipeline(config: &TomlConfig) -> (AlertPipeline, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    let pipeline = AlertPipeline::new(config, clock.clone()).unwrap();
    (pipeline, clock)
}

/// Non-empty lines of the incident log, parsed as JSON
pub fn read_log_lines(path: &Path) -> Vec<serde_json::Value> {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("every incident line is complete JSON"))
        .collect()
}
