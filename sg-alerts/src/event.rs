//! Event normalizer
//!
//! Accepts both inbound shapes (legacy `shoplifting_detected` events and
//! per-track `exit_without_checkout` events) and produces one canonical,
//! immutable [`DetectionEvent`]. Pure: no I/O, no logging side effects beyond
//! debug traces.

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Location used when the source does not name one
pub const UNKNOWN_LOCATION: &str = "Unknown area";

/// Kind of detection that produced the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Whole-camera shoplifting detection (no track)
    #[serde(rename = "shoplifting_detected", alias = "legacy_detection")]
    LegacyDetection,

    /// Tracked person left through the exit without passing checkout
    #[serde(rename = "exit_without_checkout", alias = "track_exit")]
    TrackExit,
}

impl EventType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "shoplifting_detected" | "legacy_detection" => Some(Self::LegacyDetection),
            "exit_without_checkout" | "track_exit" => Some(Self::TrackExit),
            _ => None,
        }
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LegacyDetection => "shoplifting_detected",
            Self::TrackExit => "exit_without_checkout",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound payload before validation
///
/// Every field is optional and `confidence` is kept as raw JSON so that
/// validation, not deserialization, decides what is wrong with a body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub camera_id: Option<String>,
    #[serde(default)]
    pub track_id: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub confidence: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub evidence: Option<Value>,
}

impl RawEvent {
    /// Well-formed legacy event used by smoke runs and tests
    ///
    /// Defaults: camera `cam-test-1`, location `Aisle 6`, confidence 0.85.
    pub fn stub() -> Self {
        Self {
            event_type: Some(EventType::LegacyDetection.as_str().to_string()),
            camera_id: Some("cam-test-1".to_string()),
            track_id: None,
            location: Some("Aisle 6".to_string()),
            confidence: Some(Value::from(0.85)),
            timestamp: None,
            evidence: None,
        }
    }

    /// Per-track exit event
    pub fn track_exit(camera_id: &str, track_id: &str, location: &str, confidence: f64) -> Self {
        Self {
            event_type: Some(EventType::TrackExit.as_str().to_string()),
            camera_id: Some(camera_id.to_string()),
            track_id: Some(track_id.to_string()),
            location: Some(location.to_string()),
            confidence: Some(Value::from(confidence)),
            timestamp: None,
            evidence: None,
        }
    }

    pub fn with_camera(mut self, camera_id: &str) -> Self {
        self.camera_id = Some(camera_id.to_string());
        self
    }

    pub fn with_track(mut self, track_id: &str) -> Self {
        self.track_id = Some(track_id.to_string());
        self
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(Value::from(confidence));
        self
    }

    pub fn with_timestamp(mut self, timestamp: &str) -> Self {
        self.timestamp = Some(timestamp.to_string());
        self
    }
}

/// Canonical detection event
///
/// Fields are private; an event can only be obtained through [`normalize`]
/// or [`from_theft_event`], so every instance satisfies the validation rules.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionEvent {
    event_type: EventType,
    camera_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    track_id: Option<String>,
    location: String,
    confidence: f64,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    evidence: Option<Value>,
}

impl DetectionEvent {
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn track_id(&self) -> Option<&str> {
        self.track_id.as_deref()
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn evidence(&self) -> Option<&Value> {
        self.evidence.as_ref()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validate and canonicalize an inbound event
///
/// `now` is used when the payload carries no timestamp.
pub fn normalize(raw: RawEvent, now: DateTime<Utc>) -> Result<DetectionEvent, ValidationError> {
    let event_type = match raw.event_type.as_deref() {
        Some(value) => EventType::parse(value)
            .ok_or_else(|| ValidationError::UnknownEventType(value.to_string()))?,
        None => return Err(ValidationError::UnknownEventType(String::new())),
    };

    let camera_id = non_blank(raw.camera_id).ok_or(ValidationError::MissingCameraId)?;

    let confidence = raw
        .confidence
        .as_ref()
        .and_then(Value::as_f64)
        .ok_or(ValidationError::ConfidenceNotNumeric)?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(ValidationError::ConfidenceOutOfRange(confidence));
    }

    let timestamp = match non_blank(raw.timestamp) {
        Some(ts) => DateTime::parse_from_rfc3339(&ts)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|_| ValidationError::InvalidTimestamp(ts))?,
        None => now,
    };

    Ok(DetectionEvent {
        event_type,
        camera_id,
        track_id: non_blank(raw.track_id),
        location: non_blank(raw.location).unwrap_or_else(|| UNKNOWN_LOCATION.to_string()),
        confidence,
        timestamp,
        evidence: raw.evidence.filter(|v| !v.is_null()),
    })
}

/// Parse an arbitrary JSON body, then normalize it
pub fn normalize_json(body: Value, now: DateTime<Utc>) -> Result<DetectionEvent, ValidationError> {
    if !body.is_object() {
        return Err(ValidationError::MalformedBody(
            "event body must be a JSON object".to_string(),
        ));
    }
    let raw: RawEvent =
        serde_json::from_value(body).map_err(|e| ValidationError::MalformedBody(e.to_string()))?;
    normalize(raw, now)
}

/// Scored theft detection from the vision layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TheftEvent {
    pub id: String,
    pub camera_id: String,
    /// 0..100 suspicion score
    pub suspicion_score: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub zone_id: Option<String>,
    #[serde(default)]
    pub keyframes: Vec<String>,
}

/// Convert a scored theft detection into a legacy detection event
///
/// Score maps to confidence as `score / 100`, clamped into `[0, 1]`.
/// Location: explicit label, else zone id, else [`UNKNOWN_LOCATION`].
pub fn from_theft_event(
    theft: &TheftEvent,
    location_label: Option<&str>,
) -> Result<DetectionEvent, ValidationError> {
    let camera_id = non_blank(Some(theft.camera_id.clone())).ok_or(ValidationError::MissingCameraId)?;

    let score = if theft.suspicion_score.is_finite() {
        theft.suspicion_score
    } else {
        0.0
    };

    let location = non_blank(location_label.map(str::to_string))
        .or_else(|| non_blank(theft.zone_id.clone()))
        .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());

    let evidence = theft
        .keyframes
        .first()
        .map(|frame| serde_json::json!({ "keyframe_base64": frame }));

    Ok(DetectionEvent {
        event_type: EventType::LegacyDetection,
        camera_id,
        track_id: None,
        location,
        confidence: (score / 100.0).clamp(0.0, 1.0),
        timestamp: theft.timestamp,
        evidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_stub_normalizes() {
        let event = normalize(RawEvent::stub(), now()).unwrap();
        assert_eq!(event.event_type(), EventType::LegacyDetection);
        assert_eq!(event.camera_id(), "cam-test-1");
        assert_eq!(event.location(), "Aisle 6");
        assert_eq!(event.confidence(), 0.85);
        assert_eq!(event.track_id(), None);
        assert_eq!(event.timestamp(), now());
    }

    #[test]
    fn test_track_exit_event() {
        let raw = RawEvent::track_exit("cam1", "t1", "Exit", 0.9);
        let event = normalize(raw, now()).unwrap();
        assert_eq!(event.event_type(), EventType::TrackExit);
        assert_eq!(event.track_id(), Some("t1"));
    }

    #[test]
    fn test_short_event_type_aliases_accepted() {
        let mut raw = RawEvent::stub();
        raw.event_type = Some("track_exit".to_string());
        assert_eq!(normalize(raw, now()).unwrap().event_type(), EventType::TrackExit);
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let mut raw = RawEvent::stub();
        raw.event_type = Some("wrong_type".to_string());
        assert_eq!(
            normalize(raw, now()),
            Err(ValidationError::UnknownEventType("wrong_type".to_string()))
        );
    }

    #[test]
    fn test_missing_or_blank_camera_rejected() {
        let mut raw = RawEvent::stub();
        raw.camera_id = None;
        assert_eq!(normalize(raw, now()), Err(ValidationError::MissingCameraId));

        let raw = RawEvent::stub().with_camera("   ");
        assert_eq!(normalize(raw, now()), Err(ValidationError::MissingCameraId));
    }

    #[test]
    fn test_confidence_bounds_are_inclusive() {
        assert!(normalize(RawEvent::stub().with_confidence(0.0), now()).is_ok());
        assert!(normalize(RawEvent::stub().with_confidence(1.0), now()).is_ok());
        assert_eq!(
            normalize(RawEvent::stub().with_confidence(1.1), now()),
            Err(ValidationError::ConfidenceOutOfRange(1.1))
        );
        assert_eq!(
            normalize(RawEvent::stub().with_confidence(-0.1), now()),
            Err(ValidationError::ConfidenceOutOfRange(-0.1))
        );
    }

    #[test]
    fn test_non_numeric_confidence_rejected() {
        let mut raw = RawEvent::stub();
        raw.confidence = Some(json!("high"));
        assert_eq!(normalize(raw, now()), Err(ValidationError::ConfidenceNotNumeric));
    }

    #[test]
    fn test_timestamp_parsed_to_utc() {
        let raw = RawEvent::stub().with_timestamp("2024-03-05T10:00:00+02:00");
        let event = normalize(raw, now()).unwrap();
        assert_eq!(event.timestamp(), Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_invalid_timestamp_rejected() {
        let raw = RawEvent::stub().with_timestamp("yesterday");
        assert!(matches!(
            normalize(raw, now()),
            Err(ValidationError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_missing_location_defaults() {
        let mut raw = RawEvent::stub();
        raw.location = None;
        assert_eq!(normalize(raw, now()).unwrap().location(), UNKNOWN_LOCATION);
    }

    #[test]
    fn test_blank_track_treated_as_absent() {
        let raw = RawEvent::stub().with_track("  ");
        assert_eq!(normalize(raw, now()).unwrap().track_id(), None);
    }

    #[test]
    fn test_normalize_json_body() {
        let body = json!({
            "event_type": "shoplifting_detected",
            "camera_id": "cam1",
            "location": "Aisle 6",
            "confidence": 0.85,
            "timestamp": "2024-01-01T12:00:00.000Z",
            "evidence": { "keyframe_path": "/tmp/img.jpg" }
        });
        let event = normalize_json(body, now()).unwrap();
        assert_eq!(event.camera_id(), "cam1");
        assert_eq!(event.evidence().unwrap()["keyframe_path"], "/tmp/img.jpg");

        assert!(matches!(
            normalize_json(json!("string"), now()),
            Err(ValidationError::MalformedBody(_))
        ));
        assert!(matches!(
            normalize_json(json!({ "camera_id": 42 }), now()),
            Err(ValidationError::MalformedBody(_))
        ));
    }

    fn theft(score: f64) -> TheftEvent {
        TheftEvent {
            id: "t1".to_string(),
            camera_id: "cam-2".to_string(),
            suspicion_score: score,
            timestamp: now(),
            zone_id: None,
            keyframes: Vec::new(),
        }
    }

    #[test]
    fn test_theft_score_maps_to_confidence() {
        assert_eq!(from_theft_event(&theft(100.0), None).unwrap().confidence(), 1.0);
        assert_eq!(from_theft_event(&theft(0.0), None).unwrap().confidence(), 0.0);
        assert!((from_theft_event(&theft(85.0), None).unwrap().confidence() - 0.85).abs() < 1e-9);
        assert_eq!(from_theft_event(&theft(150.0), None).unwrap().confidence(), 1.0);
        assert_eq!(from_theft_event(&theft(-10.0), None).unwrap().confidence(), 0.0);
    }

    #[test]
    fn test_theft_location_precedence() {
        let mut t = theft(85.0);
        assert_eq!(from_theft_event(&t, None).unwrap().location(), UNKNOWN_LOCATION);

        t.zone_id = Some("zone-electronics".to_string());
        assert_eq!(from_theft_event(&t, None).unwrap().location(), "zone-electronics");
        assert_eq!(
            from_theft_event(&t, Some("Electronics Section")).unwrap().location(),
            "Electronics Section"
        );
    }

    #[test]
    fn test_theft_keyframe_becomes_evidence() {
        let mut t = theft(85.0);
        assert!(from_theft_event(&t, None).unwrap().evidence().is_none());

        t.keyframes = vec!["base64imagedata".to_string()];
        let event = from_theft_event(&t, None).unwrap();
        assert_eq!(event.evidence().unwrap()["keyframe_base64"], "base64imagedata");
        assert_eq!(event.event_type(), EventType::LegacyDetection);
    }
}
