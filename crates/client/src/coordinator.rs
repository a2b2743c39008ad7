//! End-to-end orchestration of one job.
//!
//! [`JobCoordinator::start`] validates the input, then spawns one task per
//! job.  The task opens the progress stream, submits the input, relays
//! stream callbacks as [`JobUpdate`]s and, once the submit resolves,
//! forces the stage to `completed` or `error` from the result.  The result
//! channel is authoritative: the stream may lag, drop messages, or end on
//! its own without deciding anything.
//!
//! The task owns every piece of per-job state.  The subscriber talks to it
//! only through the update channel and a [`CancellationToken`].

use std::sync::Arc;
use std::time::Duration;

use stagesync_core::job_id::JobId;
use stagesync_core::result::ProcessingResult;
use stagesync_core::scale::Scale;
use stagesync_core::stages::Stage;
use stagesync_core::validation::{InputValidator, MediaTypeValidator};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::{JobInput, ResultClient, ResultClientError, ResultSubmitter};
use crate::config::{ClientConfig, DEFAULT_STREAM_RELEASE};
use crate::events::{JobError, JobOutcome, JobUpdate, StageUpdate};
use crate::stream::{ProgressStreamClient, StreamNotification};
use crate::transport::SseTransport;

/// Runs jobs against one service.  Cheap to clone.
#[derive(Clone)]
pub struct JobCoordinator {
    submitter: Arc<dyn ResultSubmitter>,
    streams: ProgressStreamClient,
    validator: Arc<dyn InputValidator>,
    /// Delay between the outcome and closing the stream.
    release_delay: Duration,
}

/// Subscriber side of one job.
///
/// Dropping the subscription abandons the job.
pub struct JobSubscription {
    job_id: JobId,
    updates: mpsc::UnboundedReceiver<JobUpdate>,
    cancel: CancellationToken,
    /// Set once `Finished` was delivered or the job was abandoned.
    done: bool,
}

impl JobCoordinator {
    pub fn new(
        submitter: Arc<dyn ResultSubmitter>,
        streams: ProgressStreamClient,
        validator: Arc<dyn InputValidator>,
    ) -> Self {
        Self {
            submitter,
            streams,
            validator,
            release_delay: DEFAULT_STREAM_RELEASE,
        }
    }

    /// HTTP coordinator for the service named in `config`.  The result
    /// client and the progress transport share one connection pool.
    pub fn from_config(config: &ClientConfig) -> Self {
        let http = reqwest::Client::new();
        let transport = SseTransport::with_client(http.clone(), config.base_url.clone());
        let submitter = ResultClient::with_client(http, config.base_url.clone())
            .with_request_timeout(config.request_timeout);

        Self::new(
            Arc::new(submitter),
            ProgressStreamClient::with_options(Arc::new(transport), config.stream_options()),
            Arc::new(MediaTypeValidator::default()),
        )
        .with_release_delay(config.stream_release_delay)
    }

    pub fn with_release_delay(mut self, delay: Duration) -> Self {
        self.release_delay = delay;
        self
    }

    /// Start a job under a freshly generated identifier.
    pub fn start(&self, input: JobInput, scale: Scale) -> JobSubscription {
        self.start_with_id(JobId::generate(), input, scale)
    }

    /// Start a job under a caller-chosen identifier.  Must be called from
    /// within a tokio runtime.
    ///
    /// Invalid input finishes the job immediately with
    /// [`JobError::Validation`]; nothing is sent over the network.
    pub fn start_with_id(&self, job_id: JobId, input: JobInput, scale: Scale) -> JobSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        if let Err(e) = self.validator.validate(&input.bytes, &input.media_type) {
            tracing::warn!(job_id = %job_id, error = %e, "Job input rejected");
            let _ = tx.send(JobUpdate::Stage(StageUpdate::forced(Stage::Error)));
            let _ = tx.send(JobUpdate::Finished(Err(JobError::Validation(e))));
        } else {
            tracing::info!(job_id = %job_id, scale = %scale, "Starting job");
            tokio::spawn(run_job(
                JobTask {
                    submitter: Arc::clone(&self.submitter),
                    streams: self.streams.clone(),
                    release_delay: self.release_delay,
                    job_id: job_id.clone(),
                    updates: tx,
                    cancel: cancel.clone(),
                },
                input,
                scale,
            ));
        }

        JobSubscription {
            job_id,
            updates: rx,
            cancel,
            done: false,
        }
    }
}

impl JobSubscription {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Next update, or `None` once the job finished or was abandoned.
    pub async fn recv(&mut self) -> Option<JobUpdate> {
        if self.done {
            return None;
        }
        let update = self.updates.recv().await;
        match &update {
            Some(JobUpdate::Finished(_)) | None => self.done = true,
            Some(_) => {}
        }
        update
    }

    /// Drain updates until the outcome arrives.  `None` if the job was
    /// abandoned first.
    pub async fn outcome(mut self) -> Option<JobOutcome> {
        while let Some(update) = self.recv().await {
            if let JobUpdate::Finished(outcome) = update {
                return Some(outcome);
            }
        }
        None
    }

    /// Stop the job: close its progress stream and discard any pending
    /// result.  No update is delivered afterwards.  Idempotent.
    pub fn abandon(&mut self) {
        if !self.done {
            tracing::info!(job_id = %self.job_id, "Abandoning job");
        }
        self.done = true;
        self.cancel.cancel();
        self.updates.close();
    }
}

impl Drop for JobSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Job task
// ---------------------------------------------------------------------------

struct JobTask {
    submitter: Arc<dyn ResultSubmitter>,
    streams: ProgressStreamClient,
    release_delay: Duration,
    job_id: JobId,
    updates: mpsc::UnboundedSender<JobUpdate>,
    cancel: CancellationToken,
}

impl JobTask {
    /// Send unless the job was abandoned.
    fn emit(&self, update: JobUpdate) {
        if self.cancel.is_cancelled() {
            return;
        }
        // A closed receiver means the subscriber went away; the cancel
        // token stops the task shortly after.
        let _ = self.updates.send(update);
    }
}

async fn run_job(task: JobTask, input: JobInput, scale: Scale) {
    let job_id = &task.job_id;
    let (note_tx, mut notes) = mpsc::unbounded_channel();
    let stream = task.streams.open(job_id, note_tx);

    let submit = task.submitter.submit(&input, scale, job_id);
    tokio::pin!(submit);

    let outcome = loop {
        tokio::select! {
            biased;
            _ = task.cancel.cancelled() => {
                tracing::info!(job_id = %job_id, "Job abandoned before the result arrived");
                stream.close();
                return;
            }
            Some(note) = notes.recv() => relay(&task, note),
            result = &mut submit => break into_outcome(result),
        }
    };

    // The pending submit may have raced with an abandon.
    if task.cancel.is_cancelled() {
        stream.close();
        return;
    }

    match &outcome {
        Ok(result) => tracing::info!(
            job_id = %job_id,
            output_dimensions = ?result.metadata.as_ref().and_then(|m| m.output_dimensions.as_deref()),
            "Job completed",
        ),
        Err(e) => tracing::error!(job_id = %job_id, error = %e, "Job failed"),
    }

    let forced = if outcome.is_ok() {
        Stage::Completed
    } else {
        Stage::Error
    };
    task.emit(JobUpdate::Stage(StageUpdate::forced(forced)));
    task.emit(JobUpdate::Finished(outcome));

    // Give the stream a moment to flush its own terminal event, then close
    // it regardless of its state.  Closing twice is harmless.
    tokio::select! {
        _ = task.cancel.cancelled() => {}
        _ = tokio::time::sleep(task.release_delay) => {}
    }
    stream.close();
}

fn relay(task: &JobTask, note: StreamNotification) {
    match note {
        StreamNotification::StageChanged(event) => {
            task.emit(JobUpdate::Stage(StageUpdate::from_event(&event)));
        }
        StreamNotification::Error(e) => {
            task.emit(JobUpdate::StreamIssue(e));
        }
        StreamNotification::Completed => {
            tracing::debug!(job_id = %task.job_id, "Progress stream finished before the result");
        }
    }
}

/// Fold the two failure layers of a submit into one outcome.
fn into_outcome(result: Result<ProcessingResult, ResultClientError>) -> JobOutcome {
    match result {
        Ok(result) if result.success => Ok(result),
        Ok(result) => Err(JobError::Application(result.failure_message().to_string())),
        Err(e) => Err(JobError::Transport(e)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::StreamExt;
    use stagesync_core::error::CoreError;

    use super::*;
    use crate::transport::{ProgressTransport, SignalStream, TransportError, TransportSignal};

    #[derive(Default)]
    struct CountingTransport(AtomicUsize);

    #[async_trait]
    impl ProgressTransport for CountingTransport {
        async fn connect(&self, _job_id: &JobId) -> Result<SignalStream, TransportError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(futures::stream::empty::<TransportSignal>().boxed())
        }
    }

    #[derive(Default)]
    struct CountingSubmitter(AtomicUsize);

    #[async_trait]
    impl ResultSubmitter for CountingSubmitter {
        async fn submit(
            &self,
            _input: &JobInput,
            _scale: Scale,
            job_id: &JobId,
        ) -> Result<ProcessingResult, ResultClientError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ProcessingResult {
                success: true,
                artifact: Some("aGk=".into()),
                message: None,
                job_id: job_id.to_string(),
                metadata: None,
            })
        }
    }

    fn png(bytes: &[u8]) -> JobInput {
        JobInput {
            bytes: Bytes::copy_from_slice(bytes),
            file_name: "in.png".into(),
            media_type: "image/png".into(),
        }
    }

    #[test]
    fn success_false_becomes_application_error() {
        let result = ProcessingResult {
            success: false,
            artifact: None,
            message: Some("unsupported scale".into()),
            job_id: "j".into(),
            metadata: None,
        };
        assert_matches!(
            into_outcome(Ok(result)),
            Err(JobError::Application(m)) if m == "unsupported scale"
        );
    }

    #[test]
    fn server_error_becomes_transport_error() {
        let err = ResultClientError::Server {
            status: 400,
            detail: "Invalid image data".into(),
        };
        let outcome = into_outcome(Err(err));
        assert_matches!(&outcome, Err(JobError::Transport(_)));
        assert_eq!(outcome.unwrap_err().to_string(), "Invalid image data");
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_input_never_touches_the_network() {
        let transport = Arc::new(CountingTransport::default());
        let submitter = Arc::new(CountingSubmitter::default());
        let coordinator = JobCoordinator::new(
            submitter.clone(),
            ProgressStreamClient::new(transport.clone()),
            Arc::new(MediaTypeValidator::default()),
        );

        let input = JobInput {
            bytes: Bytes::from_static(b"plain text"),
            file_name: "notes.txt".into(),
            media_type: "text/plain".into(),
        };
        let mut sub = coordinator.start(input, Scale::X4);

        assert_matches!(sub.recv().await, Some(JobUpdate::Stage(s)) if s.stage == "error" && s.forced);
        assert_matches!(
            sub.recv().await,
            Some(JobUpdate::Finished(Err(JobError::Validation(CoreError::Validation(_)))))
        );
        assert!(sub.recv().await.is_none());

        tokio::task::yield_now().await;
        assert_eq!(transport.0.load(Ordering::SeqCst), 0);
        assert_eq!(submitter.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_job_forces_completed() {
        let transport = Arc::new(CountingTransport::default());
        let submitter = Arc::new(CountingSubmitter::default());
        let coordinator = JobCoordinator::new(
            submitter.clone(),
            ProgressStreamClient::new(transport.clone()),
            Arc::new(MediaTypeValidator::default()),
        );

        let mut sub = coordinator.start(png(b"\x89PNG"), Scale::X2);
        let mut stages = Vec::new();
        let outcome = loop {
            match sub.recv().await {
                Some(JobUpdate::Stage(s)) => stages.push(s),
                Some(JobUpdate::StreamIssue(e)) => panic!("unexpected stream issue: {e}"),
                Some(JobUpdate::Finished(outcome)) => break outcome,
                None => panic!("subscription ended without an outcome"),
            }
        };

        assert_eq!(outcome.unwrap().decode_artifact().unwrap(), b"hi");
        let last = stages.last().unwrap();
        assert_eq!(last.stage, "completed");
        assert!(last.forced);
        assert_eq!(last.progress, 100.0);
        assert_eq!(submitter.0.load(Ordering::SeqCst), 1);
        assert!(sub.recv().await.is_none());
    }
}
