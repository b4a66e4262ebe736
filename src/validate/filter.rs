//! Validity classification under one filter mode

use super::{FilterMode, ValidationRecord};
use crate::stats::percentile_type7;

/// The r value at the `100 - threshold` percentile of scored records
pub fn percentile_cutoff(records: &[ValidationRecord], threshold: f64) -> Option<f64> {
    let scored: Vec<f64> = records.iter().filter_map(|r| r.r).collect();
    if scored.is_empty() {
        log::warn!("No scored experiments to rank for the percentile filter");
        return None;
    }
    Some(percentile_type7(&scored, 100.0 - threshold))
}

/// Set `valid` on every record; returns the percentile cutoff when used.
///
/// Records without a correlation (singletons) are never valid here.
pub fn apply_filter(records: &mut [ValidationRecord], mode: FilterMode) -> Option<f64> {
    log::info!(
        "Applying filter mode '{}' with threshold {}",
        mode.name(),
        mode.threshold()
    );
    let cutoff = match mode {
        FilterMode::Percentile { threshold } => percentile_cutoff(records, threshold),
        _ => None,
    };

    for record in records.iter_mut() {
        record.valid = match (record.r, record.p) {
            (Some(r), Some(p)) if !r.is_nan() => match mode {
                FilterMode::PValue { threshold } => p < threshold && r > 0.0,
                FilterMode::RValue { threshold } => r > threshold,
                FilterMode::Percentile { .. } => cutoff.map_or(false, |c| r >= c && r > 0.0),
            },
            _ => false,
        };
    }
    cutoff
}
