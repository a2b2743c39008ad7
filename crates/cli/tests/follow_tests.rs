//! Tests for `run::follow` and `run::load_input` against in-memory fakes.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use stagesync_cli::run::{follow, load_input};
use stagesync_client::api::{JobInput, ResultClientError, ResultSubmitter};
use stagesync_client::coordinator::JobCoordinator;
use stagesync_client::stream::ProgressStreamClient;
use stagesync_client::transport::{ProgressTransport, SignalStream, TransportError, TransportSignal};
use stagesync_core::job_id::JobId;
use stagesync_core::result::ProcessingResult;
use stagesync_core::scale::Scale;
use stagesync_core::validation::MediaTypeValidator;

/// Replays a fixed script of progress messages.
struct Scripted(Vec<&'static str>);

#[async_trait]
impl ProgressTransport for Scripted {
    async fn connect(&self, _job_id: &JobId) -> Result<SignalStream, TransportError> {
        let signals: Vec<TransportSignal> = self
            .0
            .iter()
            .map(|raw| TransportSignal::Message(raw.to_string()))
            .collect();
        Ok(futures::stream::iter(signals).boxed())
    }
}

/// Answers with a fixed success flag and message; `None` never answers.
struct Fixed(Option<(bool, &'static str)>);

#[async_trait]
impl ResultSubmitter for Fixed {
    async fn submit(
        &self,
        _input: &JobInput,
        _scale: Scale,
        job_id: &JobId,
    ) -> Result<ProcessingResult, ResultClientError> {
        let Some((success, message)) = self.0 else {
            return std::future::pending().await;
        };
        Ok(ProcessingResult {
            success,
            artifact: success.then(|| "aGVsbG8=".to_string()),
            message: Some(message.to_string()),
            job_id: job_id.to_string(),
            metadata: None,
        })
    }
}

fn coordinator(submitter: Fixed, script: Vec<&'static str>) -> JobCoordinator {
    JobCoordinator::new(
        Arc::new(submitter),
        ProgressStreamClient::new(Arc::new(Scripted(script))),
        Arc::new(MediaTypeValidator::default()),
    )
}

fn png() -> JobInput {
    JobInput {
        bytes: vec![0x89, b'P', b'N', b'G'].into(),
        file_name: "cat.png".into(),
        media_type: "image/png".into(),
    }
}

// ---------------------------------------------------------------------------
// Test: a successful job prints every stage and returns the result
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn follow_prints_stages_and_returns_result() {
    let coordinator = coordinator(
        Fixed(Some((true, "Image successfully upscaled"))),
        vec![r#"{"stage":"preprocessing"}"#],
    );
    let mut sub = coordinator.start(png(), Scale::X4);
    let mut out = Vec::new();

    let result = follow(&mut sub, std::future::pending(), true, &mut out)
        .await
        .unwrap();

    assert_eq!(result.decode_artifact().unwrap(), b"hello");
    let printed = String::from_utf8(out).unwrap();
    assert!(printed.contains("100%  Upscaling completed successfully"));
    assert!(printed.contains("    [x] Encoding result for transfer"));
}

// ---------------------------------------------------------------------------
// Test: an application failure surfaces the service message
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn follow_reports_application_failure() {
    let coordinator = coordinator(Fixed(Some((false, "unsupported scale"))), vec![]);
    let mut sub = coordinator.start(png(), Scale::X2);
    let mut out = Vec::new();

    let err = follow(&mut sub, std::future::pending(), false, &mut out)
        .await
        .unwrap_err();

    let chain = format!("{err:#}");
    assert!(chain.contains("failed"), "{chain}");
    assert!(chain.ends_with("unsupported scale"), "{chain}");
    assert!(String::from_utf8(out).unwrap().contains("An error occurred during processing"));
}

// ---------------------------------------------------------------------------
// Test: an interrupt abandons the job
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn interrupt_abandons_job() {
    let coordinator = coordinator(Fixed(None), vec![]);
    let mut sub = coordinator.start(png(), Scale::X4);
    let mut out = Vec::new();

    let err = follow(&mut sub, std::future::ready(()), false, &mut out)
        .await
        .unwrap_err();

    assert!(err.to_string().starts_with("Interrupted"));
    assert!(sub.recv().await.is_none());
}

// ---------------------------------------------------------------------------
// Test: input loading
// ---------------------------------------------------------------------------

#[tokio::test]
async fn load_input_infers_media_type_from_extension() {
    let path = std::env::temp_dir().join(format!("stagesync-{}.webp", std::process::id()));
    std::fs::write(&path, b"RIFF0000WEBP").unwrap();

    let input = load_input(&path, None).await.unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(input.media_type, "image/webp");
    assert_eq!(&input.bytes[..], b"RIFF0000WEBP");
    assert!(input.file_name.ends_with(".webp"));
}

#[tokio::test]
async fn load_input_requires_known_extension_or_override() {
    let err = load_input(std::path::Path::new("notes.txt"), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("--media-type"));
}
