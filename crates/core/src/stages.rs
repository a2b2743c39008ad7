//! Ordered catalogue of processing stages.
//!
//! The table in [`STAGES`] is the single source of truth for stage
//! ordering, display text, and default progress percentages.  Lookups
//! are by wire name; unknown names get well-defined fallbacks rather
//! than errors so a newer server can introduce stages without breaking
//! older clients.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A named checkpoint in the processing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initializing,
    Validating,
    LoadingInput,
    PreparingResource,
    Preprocessing,
    Transforming,
    Postprocessing,
    Encoding,
    Completed,
    Error,
}

/// Static metadata for one [`Stage`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageInfo {
    pub stage: Stage,
    /// Canonical wire name.
    pub name: &'static str,
    /// Human-readable description shown next to the stage.
    pub description: &'static str,
    /// Default progress percentage (0-100).
    pub progress: u8,
    /// Rough expected wall-clock time spent in this stage.
    pub estimated_duration: Duration,
}

/// Where a stage sits relative to the stage currently being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePosition {
    Past,
    Current,
    Future,
    /// One of the two names is not in the catalogue.
    Unknown,
}

// ---------------------------------------------------------------------------
// Stage table
// ---------------------------------------------------------------------------

/// All stages in pipeline order.  `completed` is 100 and `error` is 0 by
/// convention; every other entry is non-decreasing by position.
pub const STAGES: [StageInfo; 10] = [
    StageInfo {
        stage: Stage::Initializing,
        name: "initializing",
        description: "Initializing upscale request",
        progress: 0,
        estimated_duration: Duration::from_millis(100),
    },
    StageInfo {
        stage: Stage::Validating,
        name: "validating",
        description: "Validating image file",
        progress: 5,
        estimated_duration: Duration::from_millis(200),
    },
    StageInfo {
        stage: Stage::LoadingInput,
        name: "loading_input",
        description: "Loading and decoding image",
        progress: 10,
        estimated_duration: Duration::from_millis(500),
    },
    StageInfo {
        stage: Stage::PreparingResource,
        name: "preparing_resource",
        description: "Preparing upscaling model",
        progress: 20,
        estimated_duration: Duration::from_millis(300),
    },
    StageInfo {
        stage: Stage::Preprocessing,
        name: "preprocessing",
        description: "Preprocessing image data",
        progress: 30,
        estimated_duration: Duration::from_secs(1),
    },
    StageInfo {
        stage: Stage::Transforming,
        name: "transforming",
        description: "Running AI upscaling (this may take a while)",
        progress: 40,
        estimated_duration: Duration::from_secs(10),
    },
    StageInfo {
        stage: Stage::Postprocessing,
        name: "postprocessing",
        description: "Postprocessing enhanced image",
        progress: 80,
        estimated_duration: Duration::from_secs(1),
    },
    StageInfo {
        stage: Stage::Encoding,
        name: "encoding",
        description: "Encoding result for transfer",
        progress: 90,
        estimated_duration: Duration::from_secs(1),
    },
    StageInfo {
        stage: Stage::Completed,
        name: "completed",
        description: "Upscaling completed successfully",
        progress: 100,
        estimated_duration: Duration::ZERO,
    },
    StageInfo {
        stage: Stage::Error,
        name: "error",
        description: "An error occurred during processing",
        progress: 0,
        estimated_duration: Duration::ZERO,
    },
];

/// Description returned for names not in the catalogue.
pub const UNKNOWN_STAGE_DESCRIPTION: &str = "Processing";

impl Stage {
    /// Resolve a wire name, accepting the names older servers emit for
    /// the input, model, and transform stages.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "initializing" => Some(Self::Initializing),
            "validating" => Some(Self::Validating),
            "loading_input" | "loading_image" => Some(Self::LoadingInput),
            "preparing_resource" | "preparing_model" => Some(Self::PreparingResource),
            "preprocessing" => Some(Self::Preprocessing),
            "transforming" | "upscaling" => Some(Self::Transforming),
            "postprocessing" => Some(Self::Postprocessing),
            "encoding" => Some(Self::Encoding),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Ordinal position in [`STAGES`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn info(self) -> &'static StageInfo {
        &STAGES[self.index()]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Name-based lookups
// ---------------------------------------------------------------------------

/// All stages in pipeline order.
pub fn ordered_stages() -> &'static [StageInfo] {
    &STAGES
}

/// Ordinal position of a stage name, or `None` if unknown.
pub fn stage_index(name: &str) -> Option<usize> {
    Stage::from_name(name).map(Stage::index)
}

/// Default progress percentage for a stage name (0 when unknown).
pub fn progress_for(name: &str) -> u8 {
    Stage::from_name(name).map_or(0, |s| s.info().progress)
}

/// Human-readable description for a stage name.
pub fn describe(name: &str) -> &'static str {
    Stage::from_name(name).map_or(UNKNOWN_STAGE_DESCRIPTION, |s| s.info().description)
}

/// Expected time spent in a stage ([`Duration::ZERO`] when unknown).
pub fn estimated_duration(name: &str) -> Duration {
    Stage::from_name(name).map_or(Duration::ZERO, |s| s.info().estimated_duration)
}

/// Classify `name` against the currently reported stage for checklist
/// rendering.  An unknown name on either side is neither past nor future.
pub fn position_relative_to(name: &str, current: &str) -> StagePosition {
    match (stage_index(name), stage_index(current)) {
        (Some(a), Some(b)) if a < b => StagePosition::Past,
        (Some(a), Some(b)) if a == b => StagePosition::Current,
        (Some(_), Some(_)) => StagePosition::Future,
        _ => StagePosition::Unknown,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
