//! Replicate-consistency validation
//!
//! Each experiment is correlated with the mean of the other replicates of
//! its perturbation (leave-one-out consensus), then classified under one
//! filter mode. Singleton groups cannot be scored and are handled by a
//! configurable policy.

mod filter;
mod loo;
pub mod sanity;
mod summary;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::ValidationParams;
use crate::data::{PerturbationMetadata, SignatureMatrix};
use crate::error::{Result, SignatureError};

pub use filter::{apply_filter, percentile_cutoff};
pub use loo::{group_stats, peer_sums, replicate_stats};
pub use sanity::{check_signature, SignatureCheck};
pub use summary::ValidationSummary;

/// How validity is decided (exactly one mode per run)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Valid iff `p < threshold` and `r > 0`
    PValue { threshold: f64 },
    /// Valid iff `r > threshold`
    RValue { threshold: f64 },
    /// Valid iff `r` is in the top `threshold` percent of scored
    /// experiments and `r > 0`
    Percentile { threshold: f64 },
}

impl Default for FilterMode {
    fn default() -> Self {
        FilterMode::PValue { threshold: 0.05 }
    }
}

impl FilterMode {
    /// Build a mode from its name, using the mode's usual threshold when none is given
    pub fn from_name(name: &str, threshold: Option<f64>) -> Result<Self> {
        let mode = match name {
            "pvalue" => FilterMode::PValue {
                threshold: threshold.unwrap_or(0.05),
            },
            "rvalue" => FilterMode::RValue {
                threshold: threshold.unwrap_or(0.2),
            },
            "percentile" => FilterMode::Percentile {
                threshold: threshold.unwrap_or(50.0),
            },
            other => {
                return Err(SignatureError::invalid_input(format!(
                    "Unknown filter mode '{}'. Use: pvalue, rvalue, or percentile",
                    other
                )))
            }
        };
        mode.check()?;
        Ok(mode)
    }

    pub fn name(&self) -> &'static str {
        match self {
            FilterMode::PValue { .. } => "pvalue",
            FilterMode::RValue { .. } => "rvalue",
            FilterMode::Percentile { .. } => "percentile",
        }
    }

    pub fn threshold(&self) -> f64 {
        match *self {
            FilterMode::PValue { threshold }
            | FilterMode::RValue { threshold }
            | FilterMode::Percentile { threshold } => threshold,
        }
    }

    pub fn check(&self) -> Result<()> {
        let t = self.threshold();
        let ok = match self {
            FilterMode::PValue { .. } => t > 0.0 && t <= 1.0,
            FilterMode::RValue { .. } => (-1.0..=1.0).contains(&t),
            FilterMode::Percentile { .. } => (0.0..=100.0).contains(&t),
        };
        if !ok {
            return Err(SignatureError::invalid_input(format!(
                "threshold {} is out of range for filter mode '{}'",
                t,
                self.name()
            )));
        }
        Ok(())
    }
}

/// Treatment of experiments whose perturbation has no other replicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingletonPolicy {
    /// Record as invalid
    #[default]
    MarkInvalid,
    /// Record as valid
    Trust,
    /// Record as invalid and leave out of the summary counts
    Exclude,
}

impl SingletonPolicy {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "mark-invalid" | "mark_invalid" => Ok(SingletonPolicy::MarkInvalid),
            "trust" => Ok(SingletonPolicy::Trust),
            "exclude" => Ok(SingletonPolicy::Exclude),
            other => Err(SignatureError::invalid_input(format!(
                "Unknown singleton policy '{}'. Use: mark-invalid, trust, or exclude",
                other
            ))),
        }
    }
}

/// Verdict for one experiment
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRecord {
    pub experiment_id: i64,
    pub perturbation: String,
    /// Leave-one-out correlation; `None` for singletons
    pub r: Option<f64>,
    pub p: Option<f64>,
    pub num_peers: usize,
    pub valid: bool,
}

impl ValidationRecord {
    pub fn is_singleton(&self) -> bool {
        self.num_peers == 0
    }
}

/// Records plus aggregate counts of one validation run
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub records: Vec<ValidationRecord>,
    pub summary: ValidationSummary,
}

/// Score every experiment present in both `signature` and `metadata`.
///
/// Records come out grouped by perturbation name (sorted), members in
/// metadata order.
pub fn validate_replicates(
    signature: &SignatureMatrix,
    metadata: &PerturbationMetadata,
    params: &ValidationParams,
    dataset: &str,
) -> Result<ValidationOutcome> {
    params.mode.check()?;

    let in_signature: HashSet<i64> = signature.experiment_ids().iter().copied().collect();
    let common = metadata.filter(|id| in_signature.contains(&id));
    log::info!(
        "Found {} experiments in both the signature ({} columns) and metadata ({} entries)",
        common.len(),
        signature.n_experiments(),
        metadata.len()
    );
    if common.is_empty() {
        log::warn!("No overlapping experiments; nothing to validate");
    }

    let groups = common.replicate_groups();
    log::info!("Calculating leave-one-out statistics for {} perturbations", groups.len());
    let mut records = replicate_stats(signature, &groups);

    let cutoff = apply_filter(&mut records, params.mode);
    if let Some(c) = cutoff {
        log::info!(
            "  -> top {}% cutoff corresponds to r >= {:.4}",
            params.mode.threshold(),
            c
        );
    }

    for record in records.iter_mut().filter(|r| r.is_singleton()) {
        record.valid = params.singleton_policy == SingletonPolicy::Trust;
    }

    let summary = ValidationSummary::from_records(&records, dataset, params, cutoff);
    log::info!(
        "{}: {} of {} experiments valid ({:.2}%)",
        dataset,
        summary.valid,
        summary.total,
        summary.percent_valid
    );
    Ok(ValidationOutcome { records, summary })
}
