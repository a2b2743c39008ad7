//! Progress-stream event types and parser.
//!
//! The server pushes one JSON object per event with the shape
//! `{"stage": "...", "description"?: "...", "progress"?: n,
//! "timestamp": "...", "job_id"?: "...", "error"?: "..."}`.  This module
//! decodes that payload into a [`StreamEvent`] and classifies it as a
//! progress step, a successful finish, or a terminal failure.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::stages::{self, Stage};

/// A malformed progress payload.  Reported upward as a non-fatal stream
/// error; the raw text is kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed progress event: {detail}")]
pub struct ParseFailure {
    pub raw: String,
    pub detail: String,
}

/// One decoded message from the progress channel.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// Stage wire name as sent by the server (may be outside the catalogue).
    pub stage: String,
    pub description: Option<String>,
    pub progress: Option<f64>,
    /// `None` when absent or unparseable; the timestamp is informational.
    pub timestamp: Option<DateTime<Utc>>,
    pub job_id: Option<String>,
    /// Populated means the event is terminal regardless of `stage`.
    pub error: Option<String>,
    pub scale: Option<u32>,
    pub input_dimensions: Option<String>,
    pub output_dimensions: Option<String>,
}

/// How the stream client should treat an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind<'a> {
    /// A non-terminal stage transition.
    Progress,
    /// The `completed` stage.
    Completed,
    /// An event carrying an error message.
    Failed(&'a str),
}

/// Wire shape.  Every field is optional here; [`parse_event`] enforces
/// the stage/error rules.
#[derive(Debug, Deserialize)]
struct WireEvent {
    stage: Option<String>,
    description: Option<String>,
    progress: Option<f64>,
    timestamp: Option<String>,
    job_id: Option<String>,
    error: Option<String>,
    scale: Option<u32>,
    input_dimensions: Option<String>,
    output_dimensions: Option<String>,
}

impl StreamEvent {
    /// Build a synthetic event for `stage` using catalogue defaults.
    pub fn for_stage(stage: Stage) -> Self {
        Self {
            stage: stage.name().to_string(),
            description: Some(stage.info().description.to_string()),
            progress: Some(f64::from(stage.info().progress)),
            timestamp: Some(Utc::now()),
            job_id: None,
            error: None,
            scale: None,
            input_dimensions: None,
            output_dimensions: None,
        }
    }

    pub fn kind(&self) -> EventKind<'_> {
        match self.error.as_deref() {
            Some(message) => EventKind::Failed(message),
            None if self.stage_kind() == Some(Stage::Completed) => EventKind::Completed,
            None => EventKind::Progress,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.kind(), EventKind::Progress)
    }

    /// Catalogue stage for this event, if the name is known.
    pub fn stage_kind(&self) -> Option<Stage> {
        Stage::from_name(&self.stage)
    }

    /// Explicit progress if sent, else the catalogue default for the stage.
    pub fn effective_progress(&self) -> f64 {
        self.progress
            .unwrap_or_else(|| f64::from(stages::progress_for(&self.stage)))
    }

    /// Explicit description if sent, else the catalogue description.
    pub fn effective_description(&self) -> &str {
        self.description
            .as_deref()
            .unwrap_or_else(|| stages::describe(&self.stage))
    }
}

/// Decode one raw payload.
///
/// A payload without a `stage` is only accepted when it carries an
/// error (servers end a failed stream with a bare `{"error": "..."}`);
/// such events are assigned the `error` stage.  An empty error string
/// counts as absent.
pub fn parse_event(raw: &str) -> Result<StreamEvent, ParseFailure> {
    let failure = |detail: String| ParseFailure {
        raw: raw.to_string(),
        detail,
    };

    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| failure(e.to_string()))?;
    if !value.is_object() {
        return Err(failure("expected a JSON object".into()));
    }
    let wire: WireEvent = serde_json::from_value(value).map_err(|e| failure(e.to_string()))?;

    let error = wire.error.filter(|e| !e.trim().is_empty());
    let stage = match (wire.stage.filter(|s| !s.trim().is_empty()), &error) {
        (Some(stage), _) => stage,
        (None, Some(_)) => Stage::Error.name().to_string(),
        (None, None) => return Err(failure("missing stage field".into())),
    };

    Ok(StreamEvent {
        stage,
        description: wire.description,
        progress: wire.progress,
        timestamp: wire.timestamp.as_deref().and_then(parse_timestamp),
        job_id: wire.job_id,
        error,
        scale: wire.scale,
        input_dimensions: wire.input_dimensions,
        output_dimensions: wire.output_dimensions,
    })
}

/// Accept RFC 3339 as well as the naive ISO form (`2024-01-01T12:00:00.5`)
/// which is interpreted as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_progress_event() {
        let json = r#"{"stage":"preprocessing","description":"Preprocessing image data","progress":30,"timestamp":"2024-05-01T10:00:00.123456","job_id":"job_1700000000_abc1234"}"#;
        let event = parse_event(json).unwrap();
        assert_eq!(event.stage, "preprocessing");
        assert_eq!(event.progress, Some(30.0));
        assert_eq!(event.job_id.as_deref(), Some("job_1700000000_abc1234"));
        assert!(event.timestamp.is_some());
        assert_eq!(event.kind(), EventKind::Progress);
    }

    #[test]
    fn parse_completed_event() {
        let event = parse_event(r#"{"stage":"completed"}"#).unwrap();
        assert_eq!(event.kind(), EventKind::Completed);
        assert!(event.is_terminal());
        assert_eq!(event.effective_progress(), 100.0);
    }

    #[test]
    fn error_field_is_terminal_regardless_of_stage() {
        let event =
            parse_event(r#"{"stage":"loading_image","error":"disk read failed"}"#).unwrap();
        assert_eq!(event.kind(), EventKind::Failed("disk read failed"));
        assert_eq!(event.stage_kind(), Some(Stage::LoadingInput));
    }

    #[test]
    fn bare_error_payload_gets_error_stage() {
        let event = parse_event(r#"{"error":"Job job_x not found"}"#).unwrap();
        assert_eq!(event.stage, "error");
        assert_eq!(event.kind(), EventKind::Failed("Job job_x not found"));
    }

    #[test]
    fn empty_error_string_is_not_an_error() {
        let event = parse_event(r#"{"stage":"encoding","error":""}"#).unwrap();
        assert_eq!(event.error, None);
        assert_eq!(event.kind(), EventKind::Progress);
    }

    #[test]
    fn error_stage_without_message_is_not_terminal() {
        let event = parse_event(r#"{"stage":"error"}"#).unwrap();
        assert_eq!(event.kind(), EventKind::Progress);
    }

    #[test]
    fn unknown_stage_is_accepted_with_fallbacks() {
        let event = parse_event(r#"{"stage":"warming_up"}"#).unwrap();
        assert_eq!(event.stage_kind(), None);
        assert_eq!(event.effective_progress(), 0.0);
        assert_eq!(event.effective_description(), stages::UNKNOWN_STAGE_DESCRIPTION);
    }

    #[test]
    fn missing_progress_uses_catalogue_default() {
        let event = parse_event(r#"{"stage":"upscaling"}"#).unwrap();
        assert_eq!(event.effective_progress(), 40.0);
        assert_eq!(
            event.effective_description(),
            "Running AI upscaling (this may take a while)"
        );
    }

    #[test]
    fn extra_fields_are_captured() {
        let json = r#"{"stage":"loading_image","scale":4,"input_dimensions":"32x32","output_dimensions":"128x128","unexpected":true}"#;
        let event = parse_event(json).unwrap();
        assert_eq!(event.scale, Some(4));
        assert_eq!(event.input_dimensions.as_deref(), Some("32x32"));
        assert_eq!(event.output_dimensions.as_deref(), Some("128x128"));
    }

    #[test]
    fn null_optional_fields_are_accepted() {
        let json = r#"{"stage":"validating","scale":null,"input_dimensions":null}"#;
        let event = parse_event(json).unwrap();
        assert_eq!(event.scale, None);
    }

    #[test]
    fn rfc3339_timestamp_is_accepted() {
        let event = parse_event(r#"{"stage":"encoding","timestamp":"2024-05-01T10:00:00Z"}"#)
            .unwrap();
        assert_eq!(
            event.timestamp.unwrap().to_rfc3339(),
            "2024-05-01T10:00:00+00:00"
        );
    }

    #[test]
    fn garbage_timestamp_is_dropped_not_rejected() {
        let event = parse_event(r#"{"stage":"encoding","timestamp":"yesterday"}"#).unwrap();
        assert_eq!(event.timestamp, None);
    }

    #[test]
    fn missing_stage_without_error_fails() {
        let err = parse_event(r#"{"progress":10}"#).unwrap_err();
        assert_eq!(err.raw, r#"{"progress":10}"#);
        assert!(err.detail.contains("stage"));
    }

    #[test]
    fn non_json_fails_with_raw_text() {
        let err = parse_event("not json at all").unwrap_err();
        assert_eq!(err.raw, "not json at all");
    }

    #[test]
    fn non_object_json_fails() {
        assert_matches!(parse_event("[1,2,3]"), Err(ParseFailure { .. }));
        assert_matches!(parse_event(r#""completed""#), Err(ParseFailure { .. }));
    }

    #[test]
    fn wrongly_typed_stage_fails() {
        assert!(parse_event(r#"{"stage":7}"#).is_err());
    }

    #[test]
    fn synthetic_event_uses_catalogue() {
        let event = StreamEvent::for_stage(Stage::Completed);
        assert_eq!(event.stage, "completed");
        assert_eq!(event.kind(), EventKind::Completed);
    }
}
