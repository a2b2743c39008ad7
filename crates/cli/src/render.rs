//! Plain-text rendering of job progress for a terminal.

use std::path::Path;
use std::time::Duration;

use stagesync_client::events::StageUpdate;
use stagesync_core::result::ProcessingResult;
use stagesync_core::stages::{describe, ordered_stages, position_relative_to, Stage, StagePosition};

/// Width of the progress bar in characters, brackets excluded.
pub const BAR_WIDTH: usize = 20;

/// `[#####...............]` for a percentage in 0-100.
pub fn progress_bar(progress: f64, width: usize) -> String {
    let ratio = if progress.is_finite() {
        (progress / 100.0).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let filled = (ratio * width as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(width - filled))
}

/// One status line for a stage change.
pub fn stage_line(update: &StageUpdate) -> String {
    let percent = if update.progress.is_finite() {
        update.progress.clamp(0.0, 100.0)
    } else {
        0.0
    };
    format!(
        "{} {:>3.0}%  {}",
        progress_bar(update.progress, BAR_WIDTH),
        percent,
        update.description
    )
}

/// Every stage with a marker showing where `current` sits.
///
/// `[x]` done, `[>]` in progress, `[ ]` pending, `[?]` when `current` is
/// not a known stage.  The error stage is listed only when it is current.
pub fn checklist(current: &str) -> Vec<String> {
    let failed = Stage::from_name(current) == Some(Stage::Error);

    let mut lines: Vec<String> = ordered_stages()
        .iter()
        .filter(|info| info.stage != Stage::Error)
        .map(|info| {
            let mark = if failed {
                "[ ]"
            } else {
                match position_relative_to(info.name, current) {
                    StagePosition::Past => "[x]",
                    StagePosition::Current => "[>]",
                    StagePosition::Future => "[ ]",
                    StagePosition::Unknown => "[?]",
                }
            };
            format!("{mark} {}", info.description)
        })
        .collect();

    if failed {
        lines.push(format!("[!] {}", describe(Stage::Error.name())));
    }
    lines
}

/// Closing summary for a successful job.
pub fn summary(result: &ProcessingResult, output: &Path) -> String {
    let mut out = format!("Wrote {}", output.display());

    if let Some(meta) = &result.metadata {
        if let (Some(input), Some(output)) = (&meta.input_dimensions, &meta.output_dimensions) {
            out.push_str(&format!(" ({input} -> {output}"));
            if let Some(scale) = meta.scale {
                out.push_str(&format!(", {scale}x"));
            }
            out.push(')');
        }
    }

    let timings = result.timings();
    let parts: Vec<String> = [
        ("total", timings.total),
        ("transform", timings.transform),
        ("encode", timings.encode),
    ]
    .into_iter()
    .filter_map(|(label, d)| d.map(|d| format!("{label} {}", seconds(d))))
    .collect();

    if !parts.is_empty() {
        out.push_str("\nTimings: ");
        out.push_str(&parts.join(", "));
    }
    out
}

fn seconds(d: Duration) -> String {
    format!("{:.2}s", d.as_secs_f64())
}
