//! Updates delivered to a job's subscriber.
//!
//! The coordinator turns stream callbacks and the submit result into a
//! single ordered sequence of [`JobUpdate`]s.  Exactly one
//! [`JobUpdate::Finished`] ends the sequence unless the job is abandoned.

use stagesync_core::error::CoreError;
use stagesync_core::result::ProcessingResult;
use stagesync_core::stages::{describe, progress_for, Stage};
use stagesync_core::stream_event::StreamEvent;

use crate::api::ResultClientError;
use crate::session::StreamError;

/// One notification for a running job.
#[derive(Debug)]
pub enum JobUpdate {
    /// The externally observed stage changed.
    Stage(StageUpdate),

    /// The progress stream reported a problem.  Informational only; the
    /// job's outcome comes from the result channel.
    StreamIssue(StreamError),

    /// The job ended.  Always the last update.
    Finished(JobOutcome),
}

/// A stage as shown to the subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct StageUpdate {
    pub stage: String,
    pub description: String,
    /// Completion percentage (0-100).
    pub progress: f64,
    /// Set when the coordinator forced the stage from the result instead
    /// of relaying a stream event.
    pub forced: bool,
}

impl StageUpdate {
    /// Relay an event from the progress stream.
    pub fn from_event(event: &StreamEvent) -> Self {
        Self {
            stage: event.stage.clone(),
            description: event.effective_description().to_string(),
            progress: event.effective_progress(),
            forced: false,
        }
    }

    /// A terminal stage imposed by the result channel.
    pub fn forced(stage: Stage) -> Self {
        Self {
            stage: stage.name().to_string(),
            description: describe(stage.name()).to_string(),
            progress: f64::from(progress_for(stage.name())),
            forced: true,
        }
    }
}

/// Final outcome of a job.
pub type JobOutcome = Result<ProcessingResult, JobError>;

/// Why a job failed.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Input rejected before any network activity.
    #[error(transparent)]
    Validation(#[from] CoreError),

    /// The request failed or the service returned a non-success status.
    #[error(transparent)]
    Transport(#[from] ResultClientError),

    /// The service answered but reported `success: false`.
    #[error("{0}")]
    Application(String),
}
