//! `stagesync` -- submit an image to a staged upscaling service and follow
//! its progress.
//!
//! # Environment variables
//!
//! | Variable                             | Default                 | Description                          |
//! |--------------------------------------|-------------------------|--------------------------------------|
//! | `STAGESYNC_BASE_URL`                 | `http://localhost:8000` | Service root                         |
//! | `STAGESYNC_REQUEST_TIMEOUT_SECS`     | --                      | Limit on the upload request          |
//! | `STAGESYNC_STREAM_IDLE_TIMEOUT_SECS` | --                      | Give up on a silent progress stream  |
//! | `STAGESYNC_COMPLETION_GRACE_MS`      | `500`                   | Hold the stream open after completion |
//! | `STAGESYNC_STREAM_RELEASE_MS`        | `1000`                  | Close the stream this long after the result |
//! | `STAGESYNC_DEFAULT_SCALE`            | `4`                     | Scale when `--scale` is omitted      |
//! | `LOG_FORMAT`                         | text                    | `json` for JSON log lines            |

use clap::Parser;
use stagesync_cli::args::{Cli, Command};
use stagesync_cli::run;
use stagesync_client::config::ClientConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout carries only progress output.
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stagesync_cli=info,stagesync_client=info".into()),
        )
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env();
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }

    match cli.command {
        Command::Run(args) => {
            run::run_job(&config, &args).await?;
        }
        Command::Scales => run::show_scales(&config).await?,
        Command::Health => run::show_health(&config).await?,
    }

    Ok(())
}
