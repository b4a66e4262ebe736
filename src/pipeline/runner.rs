//! Ordered execution of pipeline stages with explicit skip/force control

use std::path::PathBuf;
use std::time::Instant;

use log::{info, warn};

use super::stage::{Completeness, Stage, StageManifest, StageOutcome};
use crate::error::{Result, SignatureError};

/// What to do with a stage whose output may already exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageAction {
    /// Reuse a complete output, run otherwise
    #[default]
    Auto,
    /// Reuse the output; fails if the stage is not complete
    Skip,
    /// Always run
    Force,
}

/// Result of one stage in a run
#[derive(Debug, Clone)]
pub enum StageStatus {
    Ran(StageOutcome),
    Reused { stage: String, output: PathBuf },
}

impl StageStatus {
    pub fn ran(&self) -> bool {
        matches!(self, StageStatus::Ran(_))
    }
}

/// Runs stages in insertion order
#[derive(Default)]
pub struct PipelineRunner<'a> {
    stages: Vec<(Box<dyn Stage + 'a>, StageAction)>,
}

impl<'a> PipelineRunner<'a> {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn add<S: Stage + 'a>(mut self, stage: S, action: StageAction) -> Self {
        self.stages.push((Box::new(stage), action));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn run(&self) -> Result<Vec<StageStatus>> {
        let start = Instant::now();
        let mut statuses = Vec::with_capacity(self.stages.len());
        // once a stage reruns, later stages see new inputs and rerun too
        let mut upstream_ran = false;

        for (stage, action) in &self.stages {
            let status = run_stage(stage.as_ref(), *action, upstream_ran)?;
            upstream_ran |= status.ran();
            statuses.push(status);
        }

        info!(
            "Pipeline finished: {} stages in {:.1}s",
            statuses.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(statuses)
    }
}

fn run_stage(stage: &dyn Stage, action: StageAction, upstream_ran: bool) -> Result<StageStatus> {
    let name = stage.name().to_string();
    let output = stage.produces();

    let completeness = match action {
        StageAction::Force => Completeness::Incomplete("forced".to_string()),
        StageAction::Auto if upstream_ran => Completeness::Incomplete("an upstream stage was rerun".to_string()),
        _ => stage.completeness()?,
    };

    let reason = match completeness {
        Completeness::Complete => {
            info!("Stage '{}': reusing complete output {}", name, output.display());
            return Ok(StageStatus::Reused { stage: name, output });
        }
        Completeness::Incomplete(reason) if action == StageAction::Skip => {
            return Err(SignatureError::StageIncomplete { stage: name, reason });
        }
        Completeness::Incomplete(reason) => reason,
    };

    info!("Stage '{}': running ({})", name, reason);
    if output.exists() {
        warn!("Overwriting existing output {}", output.display());
    }
    StageManifest::invalidate(&output)?;
    let outcome = stage.run()?;
    StageManifest::record(&name, &stage.consumes(), &stage.params(), &output, outcome.rows)?;
    info!(
        "Stage '{}' finished: {} rows in {:.1}s",
        name,
        outcome.rows,
        outcome.elapsed.as_secs_f64()
    );
    Ok(StageStatus::Ran(outcome))
}
