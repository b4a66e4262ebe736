//! Aggregate counts of a validation run

use serde::Serialize;

use super::{SingletonPolicy, ValidationRecord};
use crate::config::ValidationParams;

/// Totals for one run, broken out by the filter mode and threshold used
#[derive(Debug, Clone, Serialize)]
pub struct ValidationSummary {
    pub dataset: String,
    pub mode: String,
    pub threshold: f64,
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub percent_valid: f64,
    pub n_singletons: usize,
    pub n_excluded: usize,
    pub percentile_cutoff: Option<f64>,
}

impl ValidationSummary {
    pub fn from_records(
        records: &[ValidationRecord],
        dataset: &str,
        params: &ValidationParams,
        percentile_cutoff: Option<f64>,
    ) -> Self {
        let n_singletons = records.iter().filter(|r| r.is_singleton()).count();
        let n_excluded = if params.singleton_policy == SingletonPolicy::Exclude {
            n_singletons
        } else {
            0
        };
        let counted = records
            .iter()
            .filter(|r| !(r.is_singleton() && params.singleton_policy == SingletonPolicy::Exclude));
        let (total, valid) = counted.fold((0, 0), |(t, v), r| (t + 1, v + usize::from(r.valid)));
        let percent_valid = if total > 0 {
            valid as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Self {
            dataset: dataset.to_string(),
            mode: params.mode.name().to_string(),
            threshold: params.mode.threshold(),
            total,
            valid,
            invalid: total - valid,
            percent_valid,
            n_singletons,
            n_excluded,
            percentile_cutoff,
        }
    }

    /// Plain-text report
    pub fn to_report(&self) -> String {
        if self.total == 0 {
            return "No instances processed.".to_string();
        }
        let mut lines = vec![
            format!("=== {} VALIDATION STATISTICS ===", self.dataset),
            format!("Filter Mode: {} | Threshold: {}", self.mode, self.threshold),
            "-".repeat(30),
            format!("Total experiments: {}", self.total),
            format!("Valid (1):         {}", self.valid),
            format!("Invalid (0):       {}", self.invalid),
            format!("Percentage valid:  {:.2}%", self.percent_valid),
        ];
        if let Some(cutoff) = self.percentile_cutoff {
            lines.push(format!("Percentile cutoff: r >= {:.4}", cutoff));
        }
        lines.push(format!("Singletons:        {}", self.n_singletons));
        if self.n_excluded > 0 {
            lines.push(format!("Excluded:          {}", self.n_excluded));
        }
        lines.join("\n")
    }
}
