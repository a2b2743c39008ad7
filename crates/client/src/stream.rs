//! Progress stream client: one spawned task per opened stream.
//!
//! [`ProgressStreamClient::open`] connects through a
//! [`ProgressTransport`], then feeds every signal into a
//! [`StreamSession`] until the session reaches a terminal state or the
//! returned [`ProgressStreamHandle`] is closed.  The task owns the
//! session, so the terminal flag is never shared.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use stagesync_core::job_id::JobId;
use stagesync_core::stream_event::StreamEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::session::{Directive, StreamError, StreamObserver, StreamSession};
use crate::transport::{DisconnectStatus, ProgressTransport, SignalStream, TransportSignal};

/// Default delay between a `completed` event and closing the connection.
pub const DEFAULT_COMPLETION_GRACE: Duration = Duration::from_millis(500);

/// Tunables for stream tasks.
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    /// How long to keep the connection after a `completed` event.
    pub completion_grace: Duration,
    /// Treat the stream as lost after this long without any signal.
    /// `None` waits indefinitely.
    pub idle_timeout: Option<Duration>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            completion_grace: DEFAULT_COMPLETION_GRACE,
            idle_timeout: None,
        }
    }
}

/// Opens progress streams over a shared transport.
#[derive(Clone)]
pub struct ProgressStreamClient {
    transport: Arc<dyn ProgressTransport>,
    options: StreamOptions,
}

/// Handle to one open stream.
///
/// [`close`](Self::close) is idempotent and never fails; closing before
/// the stream finishes suppresses any further callbacks.  Dropping the
/// handle closes the stream.
pub struct ProgressStreamHandle {
    job_id: JobId,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ProgressStreamClient {
    pub fn new(transport: Arc<dyn ProgressTransport>) -> Self {
        Self::with_options(transport, StreamOptions::default())
    }

    pub fn with_options(transport: Arc<dyn ProgressTransport>, options: StreamOptions) -> Self {
        Self { transport, options }
    }

    /// Open the progress stream for `job_id`.  Must be called from within
    /// a tokio runtime.
    pub fn open<O: StreamObserver>(&self, job_id: &JobId, observer: O) -> ProgressStreamHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_stream(
            Arc::clone(&self.transport),
            job_id.clone(),
            observer,
            self.options,
            cancel.clone(),
        ));

        ProgressStreamHandle {
            job_id: job_id.clone(),
            cancel,
            task: Some(task),
        }
    }
}

impl ProgressStreamHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Close the stream.  Safe to call any number of times, including
    /// after the stream ended on its own.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(job_id = %self.job_id, "Closing progress stream");
            self.cancel.cancel();
        }
    }

    /// Whether the stream task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the stream task to exit.
    pub async fn finished(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(job_id = %self.job_id, error = %e, "Progress stream task failed");
            }
        }
    }
}

impl Drop for ProgressStreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Channel observer
// ---------------------------------------------------------------------------

/// Stream callbacks flattened into a message, for owners that prefer to
/// receive them on a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamNotification {
    StageChanged(StreamEvent),
    Error(StreamError),
    Completed,
}

impl StreamObserver for mpsc::UnboundedSender<StreamNotification> {
    fn on_stage_change(&mut self, event: &StreamEvent) {
        // A closed receiver means the owner stopped listening.
        let _ = self.send(StreamNotification::StageChanged(event.clone()));
    }

    fn on_error(&mut self, error: StreamError) {
        let _ = self.send(StreamNotification::Error(error));
    }

    fn on_complete(&mut self) {
        let _ = self.send(StreamNotification::Completed);
    }
}

// ---------------------------------------------------------------------------
// Stream task
// ---------------------------------------------------------------------------

async fn run_stream<O: StreamObserver>(
    transport: Arc<dyn ProgressTransport>,
    job_id: JobId,
    observer: O,
    options: StreamOptions,
    cancel: CancellationToken,
) {
    let mut session = StreamSession::new(job_id.clone(), observer);

    let mut signals = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(job_id = %job_id, "Progress stream closed before connecting");
            return;
        }
        result = transport.connect(&job_id) => match result {
            Ok(signals) => signals,
            Err(e) => {
                session.handle_disconnect(DisconnectStatus::Failed(e.to_string()));
                return;
            }
        },
    };

    tracing::info!(job_id = %job_id, "Progress stream open");

    loop {
        let signal = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(job_id = %job_id, state = ?session.state(), "Progress stream closed by owner");
                break;
            }
            signal = next_signal(&mut signals, options.idle_timeout) => signal,
        };

        let directive = match signal {
            TransportSignal::Message(raw) => session.handle_payload(&raw),
            TransportSignal::Malformed(failure) => session.handle_malformed(failure),
            TransportSignal::Disconnected(status) => {
                session.handle_disconnect(status);
                break;
            }
        };

        match directive {
            Directive::Continue => {}
            Directive::CloseNow => break,
            Directive::CloseAfterGrace => {
                linger(&mut signals, &mut session, options.completion_grace, &cancel).await;
                break;
            }
        }
    }

    drop(signals);
    tracing::info!(job_id = %job_id, state = ?session.state(), "Progress stream closed");
}

/// Next signal, mapping end-of-stream to a clean close and an idle
/// timeout to a failed disconnect.
async fn next_signal(signals: &mut SignalStream, idle_timeout: Option<Duration>) -> TransportSignal {
    let next = match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, signals.next()).await {
            Ok(next) => next,
            Err(_) => {
                return TransportSignal::Disconnected(DisconnectStatus::Failed(format!(
                    "no progress event for {}s",
                    limit.as_secs()
                )))
            }
        },
        None => signals.next().await,
    };
    next.unwrap_or(TransportSignal::Disconnected(DisconnectStatus::Closed))
}

/// Keep the connection for the completion grace delay, absorbing any
/// late signals.  A disconnect here is the expected after-the-fact close.
async fn linger<O: StreamObserver>(
    signals: &mut SignalStream,
    session: &mut StreamSession<O>,
    grace: Duration,
    cancel: &CancellationToken,
) {
    let deadline = tokio::time::sleep(grace);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = &mut deadline => return,
            next = signals.next() => match next {
                Some(TransportSignal::Message(raw)) => {
                    session.handle_payload(&raw);
                }
                Some(TransportSignal::Malformed(failure)) => {
                    session.handle_malformed(failure);
                }
                Some(TransportSignal::Disconnected(status)) => {
                    session.handle_disconnect(status);
                    return;
                }
                None => {
                    session.handle_disconnect(DisconnectStatus::Closed);
                    return;
                }
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use futures::stream;

    use super::*;
    use crate::transport::TransportError;

    /// Transport that hands out a fixed script of signals.
    struct Scripted(Vec<TransportSignal>);

    #[async_trait]
    impl ProgressTransport for Scripted {
        async fn connect(&self, _job_id: &JobId) -> Result<SignalStream, TransportError> {
            Ok(stream::iter(self.0.clone()).boxed())
        }
    }

    struct Refused;

    #[async_trait]
    impl ProgressTransport for Refused {
        async fn connect(&self, _job_id: &JobId) -> Result<SignalStream, TransportError> {
            Err(TransportError::Status(404))
        }
    }

    async fn collect(
        transport: impl ProgressTransport,
        options: StreamOptions,
    ) -> Vec<StreamNotification> {
        let client = ProgressStreamClient::with_options(Arc::new(transport), options);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = client.open(&JobId::generate(), tx);
        handle.finished().await;

        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn stream_ending_without_events_completes() {
        let out = collect(Scripted(vec![]), StreamOptions::default()).await;
        assert_eq!(out, vec![StreamNotification::Completed]);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connection_is_connection_lost() {
        let out = collect(Refused, StreamOptions::default()).await;
        assert_eq!(out.len(), 1);
        assert!(matches!(
            &out[0],
            StreamNotification::Error(StreamError::ConnectionLost(d)) if d.contains("404")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_is_connection_lost() {
        struct Silent;

        #[async_trait]
        impl ProgressTransport for Silent {
            async fn connect(&self, _job_id: &JobId) -> Result<SignalStream, TransportError> {
                Ok(stream::pending::<TransportSignal>().boxed())
            }
        }

        let options = StreamOptions {
            idle_timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let out = collect(Silent, options).await;
        assert!(matches!(
            &out[..],
            [StreamNotification::Error(StreamError::ConnectionLost(_))]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn late_messages_during_grace_are_ignored() {
        let script = vec![
            TransportSignal::Message(r#"{"stage":"completed"}"#.into()),
            TransportSignal::Message(r#"{"stage":"encoding"}"#.into()),
            TransportSignal::Message("garbage".into()),
        ];
        let out = collect(Scripted(script), StreamOptions::default()).await;
        assert_eq!(out.len(), 2);
        assert!(matches!(&out[0], StreamNotification::StageChanged(e) if e.stage == "completed"));
        assert_eq!(out[1], StreamNotification::Completed);
    }
}
