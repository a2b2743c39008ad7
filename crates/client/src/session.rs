//! Per-connection state machine for the progress stream.
//!
//! [`StreamSession`] owns the terminal flag and the observer for one
//! `open` call.  It is driven one signal at a time by the stream task and
//! answers each payload with a [`Directive`] telling the task what to do
//! with the connection.
//!
//! The transport cannot tell a server that closed after its last write
//! from a dropped connection, and the protocol has no acknowledgment, so
//! a disconnect is classified three ways:
//!
//! * a terminal event was already seen: expected close, not an error;
//! * the transport reports a clean close: finished without a terminal
//!   event, reported as completion;
//! * anything else: connection lost, reported as an error.

use stagesync_core::job_id::JobId;
use stagesync_core::stream_event::{parse_event, EventKind, ParseFailure, StreamEvent};

use crate::transport::DisconnectStatus;

/// Callbacks for one progress stream.
///
/// Exactly one of [`on_complete`](Self::on_complete) and a terminal
/// [`on_error`](Self::on_error) is the final callback of a stream that
/// ends on its own; closing the handle first suppresses both.  Parse
/// failures arrive through `on_error` as well but are not final.
pub trait StreamObserver: Send + 'static {
    fn on_stage_change(&mut self, event: &StreamEvent);
    fn on_error(&mut self, error: StreamError);
    fn on_complete(&mut self);
}

/// Errors delivered to [`StreamObserver::on_error`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    /// The server sent an event carrying an error message.
    #[error("{0}")]
    Job(String),

    /// The connection dropped before any terminal event.
    #[error("Connection to progress stream lost: {0}")]
    ConnectionLost(String),

    /// One payload could not be decoded.  Non-fatal.
    #[error(transparent)]
    Parse(#[from] ParseFailure),
}

impl StreamError {
    /// Whether this error ends the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Parse(_))
    }
}

/// Lifecycle of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    DeliveringEvents,
    TerminalSuccess,
    TerminalError,
    TerminalClosedWithoutEvent,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::TerminalSuccess | Self::TerminalError | Self::TerminalClosedWithoutEvent
        )
    }
}

/// What the stream task should do with the connection after a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Keep reading.
    Continue,
    /// Stop delivering; close once the completion grace delay passes.
    CloseAfterGrace,
    /// Close immediately.
    CloseNow,
}

pub struct StreamSession<O> {
    job_id: JobId,
    observer: O,
    state: StreamState,
    terminal_delivered: bool,
    final_callback_fired: bool,
}

impl<O: StreamObserver> StreamSession<O> {
    pub fn new(job_id: JobId, observer: O) -> Self {
        Self {
            job_id,
            observer,
            state: StreamState::Open,
            terminal_delivered: false,
            final_callback_fired: false,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Whether a terminal event (or terminal disconnect) has been seen.
    pub fn terminal_delivered(&self) -> bool {
        self.terminal_delivered
    }

    /// Handle one raw message payload.
    pub fn handle_payload(&mut self, raw: &str) -> Directive {
        if self.terminal_delivered {
            tracing::trace!(job_id = %self.job_id, "Ignoring progress message after terminal event");
            return Directive::Continue;
        }

        let event = match parse_event(raw) {
            Ok(event) => event,
            Err(failure) => return self.report_malformed(failure),
        };

        match event.kind() {
            EventKind::Failed(message) => {
                tracing::error!(
                    job_id = %self.job_id,
                    stage = %event.stage,
                    error = %message,
                    "Progress stream reported failure",
                );
                self.terminal_delivered = true;
                self.state = StreamState::TerminalError;
                self.fire_error(StreamError::Job(message.to_string()));
                Directive::CloseNow
            }
            EventKind::Completed => {
                tracing::info!(job_id = %self.job_id, "Progress stream reported completion");
                self.observer.on_stage_change(&event);
                self.terminal_delivered = true;
                self.state = StreamState::TerminalSuccess;
                self.fire_complete();
                Directive::CloseAfterGrace
            }
            EventKind::Progress => {
                tracing::debug!(
                    job_id = %self.job_id,
                    stage = %event.stage,
                    progress = event.effective_progress(),
                    "Stage changed",
                );
                self.state = StreamState::DeliveringEvents;
                self.observer.on_stage_change(&event);
                Directive::Continue
            }
        }
    }

    /// Handle a frame the transport could not decode.  Non-fatal.
    pub fn handle_malformed(&mut self, failure: ParseFailure) -> Directive {
        if self.terminal_delivered {
            tracing::trace!(job_id = %self.job_id, "Ignoring malformed frame after terminal event");
            return Directive::Continue;
        }
        self.report_malformed(failure)
    }

    fn report_malformed(&mut self, failure: ParseFailure) -> Directive {
        tracing::warn!(
            job_id = %self.job_id,
            error = %failure,
            raw_message = %failure.raw,
            "Failed to parse progress event",
        );
        self.observer.on_error(StreamError::Parse(failure));
        Directive::Continue
    }

    /// Handle the end of the connection.  The caller closes the
    /// connection afterwards in every case.
    pub fn handle_disconnect(&mut self, status: DisconnectStatus) {
        if self.terminal_delivered {
            tracing::debug!(job_id = %self.job_id, ?status, "Progress stream closed after terminal event");
            if !self.final_callback_fired {
                self.fire_complete();
            }
            return;
        }

        self.terminal_delivered = true;
        match status {
            DisconnectStatus::Closed => {
                tracing::info!(
                    job_id = %self.job_id,
                    "Progress stream closed by server without a terminal event",
                );
                self.state = StreamState::TerminalClosedWithoutEvent;
                self.fire_complete();
            }
            DisconnectStatus::Failed(detail) => {
                tracing::warn!(job_id = %self.job_id, error = %detail, "Progress stream connection lost");
                self.state = StreamState::TerminalError;
                self.fire_error(StreamError::ConnectionLost(detail));
            }
        }
    }

    fn fire_complete(&mut self) {
        if !self.final_callback_fired {
            self.final_callback_fired = true;
            self.observer.on_complete();
        }
    }

    fn fire_error(&mut self, error: StreamError) {
        if !self.final_callback_fired {
            self.final_callback_fired = true;
            self.observer.on_error(error);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
