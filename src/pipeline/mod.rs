//! Stage-based pipeline: extract, then harmonize and rank
//!
//! Stages declare their inputs and output; a rerun reuses an output only when
//! its completion manifest still matches (see [`StageManifest`]).

mod runner;
mod stage;
mod stages;

pub use runner::{PipelineRunner, StageAction, StageStatus};
pub use stage::{Completeness, InputFingerprint, Stage, StageManifest, StageOutcome};
pub use stages::{ExtractStage, RankStage, SignificanceGate};
