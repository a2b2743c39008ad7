use std::time::Duration;

use stagesync_core::scale::Scale;

use crate::stream::{StreamOptions, DEFAULT_COMPLETION_GRACE};

/// Default service root for local development.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Default delay between the result resolving and the coordinator closing
/// the progress stream.
pub const DEFAULT_STREAM_RELEASE: Duration = Duration::from_millis(1000);

/// Client configuration loaded from environment variables.
///
/// All fields have defaults suitable for a service on localhost.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service root (default: `http://localhost:8000`).
    pub base_url: String,
    /// Limit on the submit request.  `None` leaves it to the transport.
    pub request_timeout: Option<Duration>,
    /// Client-side idle limit on the progress stream.  `None` waits
    /// indefinitely.
    pub stream_idle_timeout: Option<Duration>,
    /// Delay before closing the stream after a `completed` event.
    pub completion_grace: Duration,
    /// Delay after the result resolves before the stream is closed.
    pub stream_release_delay: Duration,
    /// Scale used when the caller does not pick one.
    pub default_scale: Scale,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            request_timeout: None,
            stream_idle_timeout: None,
            completion_grace: DEFAULT_COMPLETION_GRACE,
            stream_release_delay: DEFAULT_STREAM_RELEASE,
            default_scale: Scale::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                              | Default                 |
    /// |--------------------------------------|-------------------------|
    /// | `STAGESYNC_BASE_URL`                 | `http://localhost:8000` |
    /// | `STAGESYNC_REQUEST_TIMEOUT_SECS`     | unset                   |
    /// | `STAGESYNC_STREAM_IDLE_TIMEOUT_SECS` | unset                   |
    /// | `STAGESYNC_COMPLETION_GRACE_MS`      | `500`                   |
    /// | `STAGESYNC_STREAM_RELEASE_MS`        | `1000`                  |
    /// | `STAGESYNC_DEFAULT_SCALE`            | `4`                     |
    ///
    /// Unparseable values are logged and replaced by the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable
    /// source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let base_url = var("STAGESYNC_BASE_URL").unwrap_or(defaults.base_url);

        let request_timeout = parse_or(
            "STAGESYNC_REQUEST_TIMEOUT_SECS",
            var("STAGESYNC_REQUEST_TIMEOUT_SECS"),
            None,
            positive_secs,
        );

        let stream_idle_timeout = parse_or(
            "STAGESYNC_STREAM_IDLE_TIMEOUT_SECS",
            var("STAGESYNC_STREAM_IDLE_TIMEOUT_SECS"),
            None,
            positive_secs,
        );

        let completion_grace = parse_or(
            "STAGESYNC_COMPLETION_GRACE_MS",
            var("STAGESYNC_COMPLETION_GRACE_MS"),
            defaults.completion_grace,
            |v| v.parse::<u64>().ok().map(Duration::from_millis),
        );

        let stream_release_delay = parse_or(
            "STAGESYNC_STREAM_RELEASE_MS",
            var("STAGESYNC_STREAM_RELEASE_MS"),
            defaults.stream_release_delay,
            |v| v.parse::<u64>().ok().map(Duration::from_millis),
        );

        let default_scale = parse_or(
            "STAGESYNC_DEFAULT_SCALE",
            var("STAGESYNC_DEFAULT_SCALE"),
            defaults.default_scale,
            |v| v.parse::<Scale>().ok(),
        );

        Self {
            base_url,
            request_timeout,
            stream_idle_timeout,
            completion_grace,
            stream_release_delay,
            default_scale,
        }
    }

    /// Stream tunables derived from this configuration.
    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            completion_grace: self.completion_grace,
            idle_timeout: self.stream_idle_timeout,
        }
    }
}

/// Whole seconds greater than zero.
fn positive_secs(raw: &str) -> Option<Option<Duration>> {
    let secs = raw.parse::<u64>().ok().filter(|s| *s > 0)?;
    Some(Some(Duration::from_secs(secs)))
}

fn parse_or<T>(
    key: &str,
    raw: Option<String>,
    default: T,
    parse: impl FnOnce(&str) -> Option<T>,
) -> T {
    let Some(raw) = raw else {
        return default;
    };
    match parse(&raw) {
        Some(value) => value,
        None => {
            tracing::warn!(key, value = %raw, "Invalid configuration value, using default");
            default
        }
    }
}
