//! Progress-channel transport.
//!
//! A transport turns a job id into a stream of [`TransportSignal`]s: one
//! `Message` per pushed event, then at most one `Disconnected`.  The
//! stream simply ending counts as a clean close.  [`SseTransport`] is the
//! HTTP implementation (`GET {base}/progress/{job_id}` as
//! `text/event-stream`); tests substitute scripted streams.

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::future;
use futures::stream::{self, BoxStream, Stream};
use futures::StreamExt;
use stagesync_core::job_id::JobId;
use stagesync_core::stream_event::ParseFailure;

/// Boxed stream of transport signals owned by one stream task.
pub type SignalStream = BoxStream<'static, TransportSignal>;

/// One thing the transport can tell the stream client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// Raw payload of one pushed event.
    Message(String),
    /// A frame the transport could not decode.  The connection stays up.
    Malformed(ParseFailure),
    /// The connection ended.
    Disconnected(DisconnectStatus),
}

/// Why the connection ended, as far as the transport can tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectStatus {
    /// The far end finished the response normally.
    Closed,
    /// Anything else: mid-stream drop, unreachable host, bad status.
    Failed(String),
}

/// Errors establishing the progress connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Progress endpoint returned status {0}")]
    Status(u16),
}

/// Opens the progress channel for a job.
#[async_trait]
pub trait ProgressTransport: Send + Sync + 'static {
    async fn connect(&self, job_id: &JobId) -> Result<SignalStream, TransportError>;
}

// ---------------------------------------------------------------------------
// SSE over HTTP
// ---------------------------------------------------------------------------

/// Server-sent events transport.
pub struct SseTransport {
    client: reqwest::Client,
    base_url: String,
}

impl SseTransport {
    /// * `base_url` - service root, e.g. `http://host:8000`.
    pub fn new(base_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Reuse an existing [`reqwest::Client`].  The client must not carry
    /// a whole-request timeout or long jobs will be cut off mid-stream.
    pub fn with_client(client: reqwest::Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn progress_url(&self, job_id: &JobId) -> String {
        format!("{}/progress/{}", self.base_url, job_id)
    }
}

#[async_trait]
impl ProgressTransport for SseTransport {
    async fn connect(&self, job_id: &JobId) -> Result<SignalStream, TransportError> {
        let url = self.progress_url(job_id);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| {
                TransportError::Connection(format!("Failed to reach progress stream at {url}: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        tracing::debug!(job_id = %job_id, url = %url, "Progress stream connected");

        let signals = decode_lossy(response.bytes_stream().boxed())
            .eventsource()
            .scan(false, |stalled, item| future::ready(Some(to_signal(item, stalled))))
            .filter_map(future::ready);

        Ok(signals.boxed())
    }
}

/// Map one decoder item to a signal.  Blank events carry nothing.
///
/// The event parser does not consume input it rejects, so a second
/// framing error in a row means it is stuck and the connection is
/// reported as failed.
fn to_signal<E: std::fmt::Display>(
    item: Result<eventsource_stream::Event, EventStreamError<E>>,
    stalled: &mut bool,
) -> Option<TransportSignal> {
    let signal = match item {
        Ok(event) if event.data.trim().is_empty() => return None,
        Ok(event) => TransportSignal::Message(event.data),
        Err(e @ EventStreamError::Transport(_)) => {
            TransportSignal::Disconnected(DisconnectStatus::Failed(e.to_string()))
        }
        Err(EventStreamError::Parser(e)) if *stalled => TransportSignal::Disconnected(
            DisconnectStatus::Failed(format!("Event stream framing did not recover: {e}")),
        ),
        Err(EventStreamError::Parser(e)) => {
            *stalled = true;
            return Some(TransportSignal::Malformed(ParseFailure {
                detail: format!("invalid event framing: {e}"),
                raw: e.input,
            }));
        }
        Err(EventStreamError::Utf8(e)) => TransportSignal::Malformed(ParseFailure {
            raw: String::from_utf8_lossy(e.as_bytes()).into_owned(),
            detail: e.to_string(),
        }),
    };
    *stalled = false;
    Some(signal)
}

// ---------------------------------------------------------------------------
// Lossy UTF-8 decoding
// ---------------------------------------------------------------------------

/// Decode a byte stream to text, replacing invalid sequences with U+FFFD.
/// A character split across chunks is held back until its remaining
/// bytes arrive; whatever is left when the body ends is flushed.
fn decode_lossy<S, B, E>(body: S) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    stream::unfold(Some((body, LossyUtf8::default())), |state| async move {
        let Some((mut body, mut decoder)) = state else {
            return None;
        };
        match body.next().await {
            Some(Ok(chunk)) => {
                let text = decoder.feed(chunk.as_ref());
                Some((Ok(text), Some((body, decoder))))
            }
            Some(Err(e)) => Some((Err(e), Some((body, decoder)))),
            None => Some((Ok(decoder.finish()), None)),
        }
    })
}

#[derive(Debug, Default)]
struct LossyUtf8 {
    pending: Vec<u8>,
}

impl LossyUtf8 {
    fn feed(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let complete = self.pending.len() - incomplete_tail(&self.pending);
        let text = String::from_utf8_lossy(&self.pending[..complete]).into_owned();
        self.pending.drain(..complete);
        text
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Length of the truncated multi-byte sequence ending `bytes`, if any.
fn incomplete_tail(bytes: &[u8]) -> usize {
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(_) => return 0,
            Err(e) => match e.error_len() {
                None => return rest.len() - e.valid_up_to(),
                Some(bad) => rest = &rest[e.valid_up_to() + bad..],
            },
        }
    }
}
