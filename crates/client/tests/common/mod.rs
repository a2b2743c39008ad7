//! Shared fakes for the client integration tests.
//!
//! Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use stagesync_client::api::{JobInput, ResultClientError, ResultSubmitter};
use stagesync_client::session::{StreamError, StreamObserver};
use stagesync_client::transport::{ProgressTransport, SignalStream, TransportError, TransportSignal};
use stagesync_core::job_id::JobId;
use stagesync_core::result::ProcessingResult;
use stagesync_core::scale::Scale;
use stagesync_core::stream_event::StreamEvent;
use tokio::sync::{mpsc, Notify};

// ---------------------------------------------------------------------------
// Transports
// ---------------------------------------------------------------------------

/// Transport replaying a fixed list of signals, then ending cleanly.
pub struct ScriptedTransport(pub Vec<TransportSignal>);

#[async_trait]
impl ProgressTransport for ScriptedTransport {
    async fn connect(&self, _job_id: &JobId) -> Result<SignalStream, TransportError> {
        Ok(futures::stream::iter(self.0.clone()).boxed())
    }
}

/// Transport fed by the test through a channel.  The stream stays open
/// until the sender is dropped.
pub struct ChannelTransport {
    rx: Mutex<Option<mpsc::UnboundedReceiver<TransportSignal>>>,
}

impl ChannelTransport {
    pub fn pair() -> (Arc<Self>, mpsc::UnboundedSender<TransportSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            rx: Mutex::new(Some(rx)),
        });
        (transport, tx)
    }
}

#[async_trait]
impl ProgressTransport for ChannelTransport {
    async fn connect(&self, _job_id: &JobId) -> Result<SignalStream, TransportError> {
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| TransportError::Connection("already connected".into()))?;
        let signals = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|signal| (signal, rx))
        });
        Ok(signals.boxed())
    }
}

pub fn message(raw: &str) -> TransportSignal {
    TransportSignal::Message(raw.to_string())
}

/// Wait (in virtual time) until the stream task has dropped its end.
pub async fn wait_until_closed(tx: &mpsc::UnboundedSender<TransportSignal>) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !tx.is_closed() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("progress stream was never closed");
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Stage(String),
    Error(StreamError),
    Complete,
}

/// Observer recording every callback into a shared log.
#[derive(Clone, Default)]
pub struct Recorder(pub Arc<Mutex<Vec<Call>>>);

impl Recorder {
    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    /// Yield until at least `n` callbacks were recorded.
    pub async fn wait_for(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(30), async {
            while self.0.lock().unwrap().len() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("callbacks never arrived");
    }
}

impl StreamObserver for Recorder {
    fn on_stage_change(&mut self, event: &StreamEvent) {
        self.0.lock().unwrap().push(Call::Stage(event.stage.clone()));
    }

    fn on_error(&mut self, error: StreamError) {
        self.0.lock().unwrap().push(Call::Error(error));
    }

    fn on_complete(&mut self) {
        self.0.lock().unwrap().push(Call::Complete);
    }
}

// ---------------------------------------------------------------------------
// Submitter
// ---------------------------------------------------------------------------

type Reply = Box<dyn Fn(&JobId) -> Result<ProcessingResult, ResultClientError> + Send + Sync>;

/// Submitter that answers only after [`release`](Self::release).
pub struct GatedSubmitter {
    gate: Notify,
    reply: Reply,
}

impl GatedSubmitter {
    pub fn new(
        reply: impl Fn(&JobId) -> Result<ProcessingResult, ResultClientError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            gate: Notify::new(),
            reply: Box::new(reply),
        })
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl ResultSubmitter for GatedSubmitter {
    async fn submit(
        &self,
        _input: &JobInput,
        _scale: Scale,
        job_id: &JobId,
    ) -> Result<ProcessingResult, ResultClientError> {
        self.gate.notified().await;
        (self.reply)(job_id)
    }
}

pub fn success(job_id: &JobId) -> Result<ProcessingResult, ResultClientError> {
    Ok(ProcessingResult {
        success: true,
        artifact: Some("data:image/png;base64,aGVsbG8=".into()),
        message: Some("Image successfully upscaled".into()),
        job_id: job_id.to_string(),
        metadata: None,
    })
}

pub fn png_input() -> JobInput {
    JobInput {
        bytes: Bytes::from_static(b"\x89PNG\r\n\x1a\n"),
        file_name: "photo.png".into(),
        media_type: "image/png".into(),
    }
}
