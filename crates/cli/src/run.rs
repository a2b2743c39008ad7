//! Subcommand implementations.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use stagesync_client::api::{JobInput, ResultClient};
use stagesync_client::config::ClientConfig;
use stagesync_client::coordinator::{JobCoordinator, JobSubscription};
use stagesync_client::events::JobUpdate;
use stagesync_core::job_id::JobId;
use stagesync_core::result::ProcessingResult;
use stagesync_core::scale::Scale;
use stagesync_core::validation::infer_media_type;

use crate::args::RunArgs;
use crate::render;

/// Run one job to completion and write its artifact.  Returns the path
/// written.
pub async fn run_job(config: &ClientConfig, args: &RunArgs) -> anyhow::Result<PathBuf> {
    let input = load_input(&args.input, args.media_type.as_deref()).await?;
    let scale = args.scale.unwrap_or(config.default_scale);
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.input, scale));

    let coordinator = JobCoordinator::from_config(config);
    let mut sub = match &args.job_id {
        Some(raw) => coordinator.start_with_id(JobId::parse(raw)?, input, scale),
        None => coordinator.start(input, scale),
    };

    tracing::info!(
        job_id = %sub.job_id(),
        input = %args.input.display(),
        scale = %scale,
        base_url = %config.base_url,
        "Job started",
    );

    let mut stdout = std::io::stdout();
    let result = follow(&mut sub, interrupted(), args.checklist, &mut stdout).await?;

    let bytes = result
        .decode_artifact()
        .context("Service returned an unreadable artifact")?;
    tokio::fs::write(&output, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    writeln!(stdout, "{}", render::summary(&result, &output))?;
    Ok(output)
}

/// Print updates until the job finishes or `interrupt` resolves.
///
/// An interrupt abandons the job.  A failed job becomes an error carrying
/// the job's message.
pub async fn follow<W: Write>(
    sub: &mut JobSubscription,
    interrupt: impl Future<Output = ()>,
    checklist: bool,
    out: &mut W,
) -> anyhow::Result<ProcessingResult> {
    enum Step {
        Update(Option<JobUpdate>),
        Interrupted,
    }

    tokio::pin!(interrupt);

    loop {
        let step = tokio::select! {
            update = sub.recv() => Step::Update(update),
            _ = &mut interrupt => Step::Interrupted,
        };

        let update = match step {
            Step::Interrupted => {
                sub.abandon();
                bail!("Interrupted; job {} abandoned", sub.job_id());
            }
            Step::Update(None) => bail!("Job {} ended without an outcome", sub.job_id()),
            Step::Update(Some(update)) => update,
        };

        match update {
            JobUpdate::Stage(stage) => {
                tracing::debug!(
                    job_id = %sub.job_id(),
                    stage = %stage.stage,
                    progress = stage.progress,
                    forced = stage.forced,
                    "Stage update",
                );
                writeln!(out, "{}", render::stage_line(&stage))?;
                if checklist {
                    for line in render::checklist(&stage.stage) {
                        writeln!(out, "    {line}")?;
                    }
                }
            }
            JobUpdate::StreamIssue(e) => {
                tracing::warn!(job_id = %sub.job_id(), error = %e, "Progress stream issue");
            }
            JobUpdate::Finished(Ok(result)) => return Ok(result),
            JobUpdate::Finished(Err(e)) => {
                return Err(anyhow::Error::new(e).context(format!("Job {} failed", sub.job_id())));
            }
        }
    }
}

/// Print the scales the service supports.
pub async fn show_scales(config: &ClientConfig) -> anyhow::Result<()> {
    let client = ResultClient::new(config.base_url.clone());
    let scales = client
        .scales()
        .await
        .context("Failed to query supported scales")?;

    for scale in &scales.scales {
        let default = if *scale == scales.default { " (default)" } else { "" };
        let loaded = if scales.loaded.contains(scale) { " [loaded]" } else { "" };
        println!("{scale}x{default}{loaded}");
    }
    Ok(())
}

/// Print service health.
pub async fn show_health(config: &ClientConfig) -> anyhow::Result<()> {
    let client = ResultClient::new(config.base_url.clone());
    let health = client
        .health()
        .await
        .context("Failed to query service health")?;

    println!("status:    {}", health.status);
    println!("model:     {}", if health.model_loaded { "loaded" } else { "not loaded" });
    if let Some(device) = &health.device {
        println!("device:    {device}");
    }
    println!("supported: {:?}", health.supported_scales);
    println!("loaded:    {:?}", health.loaded_scales);
    Ok(())
}

/// Read the input file and work out its media type.
pub async fn load_input(path: &Path, media_type: Option<&str>) -> anyhow::Result<JobInput> {
    let media_type = match media_type {
        Some(declared) => declared.to_string(),
        None => infer_media_type(path)
            .map(str::to_string)
            .with_context(|| {
                format!(
                    "Cannot infer media type of {}; pass --media-type",
                    path.display()
                )
            })?,
    };

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".into());

    Ok(JobInput {
        bytes: bytes.into(),
        file_name,
        media_type,
    })
}

/// `<dir>/<stem>_<factor>x.png`.
pub fn default_output_path(input: &Path, scale: Scale) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".into());
    input.with_file_name(format!("{stem}_{}x.png", scale.factor()))
}

/// Resolves on Ctrl-C.  Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}
