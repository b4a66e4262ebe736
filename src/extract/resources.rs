//! Memory and disk checks run before extraction starts

use std::path::{Path, PathBuf};

use sysinfo::{Disks, System};

use crate::config::ExtractionParams;
use crate::error::{Result, SignatureError};
use crate::store::ELEMENT_SIZE;

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Estimated resource needs of one extraction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceEstimate {
    pub peak_memory_bytes: u64,
    pub output_bytes: u64,
}

impl ResourceEstimate {
    pub fn new(n_rows: usize, n_cols: usize, params: &ExtractionParams) -> Self {
        let raw = (n_rows as f64) * (n_cols as f64) * ELEMENT_SIZE as f64;
        Self {
            peak_memory_bytes: (raw * params.memory_safety_factor).ceil() as u64,
            output_bytes: (raw * params.disk_safety_factor).ceil() as u64,
        }
    }
}

/// Whether an estimate exceeds the warning fraction of available memory
pub fn exceeds_memory(estimate_bytes: u64, available_bytes: u64, warn_fraction: f64) -> bool {
    estimate_bytes as f64 > available_bytes as f64 * warn_fraction
}

/// Fail when `available_bytes` cannot hold `required_bytes`
pub fn ensure_disk_space(path: &Path, required_bytes: u64, available_bytes: u64) -> Result<()> {
    if available_bytes < required_bytes {
        return Err(SignatureError::InsufficientDiskSpace {
            path: path.display().to_string(),
            required_gb: required_bytes as f64 / GB,
            available_gb: available_bytes as f64 / GB,
        });
    }
    Ok(())
}

/// Closest ancestor of `path` (or `path` itself) that exists on disk
pub fn nearest_existing_ancestor(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let mut current = absolute.as_path();
    loop {
        if current.exists() {
            return current.canonicalize().unwrap_or_else(|_| current.to_path_buf());
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return PathBuf::from("/"),
        }
    }
}

/// Available system memory in bytes
pub fn available_memory() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.available_memory()
}

/// Free space on the filesystem holding `path`, if a mount point matches
pub fn available_disk_space(path: &Path) -> Option<u64> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space())
}

/// Run both checks for an extraction writing to `output`.
///
/// Memory pressure is only logged; missing disk space aborts.
pub fn check_resources(estimate: &ResourceEstimate, output: &Path, params: &ExtractionParams) -> Result<()> {
    let available = available_memory();
    log::info!(
        "Estimated peak memory: {:.2} GB (available: {:.2} GB)",
        estimate.peak_memory_bytes as f64 / GB,
        available as f64 / GB
    );
    if exceeds_memory(estimate.peak_memory_bytes, available, params.memory_warn_fraction) {
        log::warn!(
            "Estimated memory use exceeds {:.0}% of available memory; extraction may swap or fail",
            params.memory_warn_fraction * 100.0
        );
    }

    let anchor = nearest_existing_ancestor(output);
    match available_disk_space(&anchor) {
        Some(free) => {
            log::info!(
                "Output needs ~{:.2} GB, {:.2} GB free at {}",
                estimate.output_bytes as f64 / GB,
                free as f64 / GB,
                anchor.display()
            );
            ensure_disk_space(&anchor, estimate.output_bytes, free)
        }
        None => {
            log::warn!("Could not determine free disk space for {}; skipping check", anchor.display());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_estimate() {
        let params = ExtractionParams::default();
        let est = ResourceEstimate::new(1000, 250, &params);
        // 1000 * 250 * 4 * 1.5
        assert_eq!(est.peak_memory_bytes, 1_500_000);
        assert_eq!(est.output_bytes, 1_500_000);
    }

    #[test]
    fn test_memory_warning_threshold() {
        assert!(!exceeds_memory(80, 100, 0.8));
        assert!(exceeds_memory(81, 100, 0.8));
    }

    #[test]
    fn test_insufficient_disk_is_error() {
        let err = ensure_disk_space(Path::new("/data"), 10, 5).unwrap_err();
        assert!(matches!(err, SignatureError::InsufficientDiskSpace { .. }));
        assert!(ensure_disk_space(Path::new("/data"), 5, 5).is_ok());
    }

    #[test]
    fn test_nearest_existing_ancestor() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("not/yet/created/out.parquet");
        let anchor = nearest_existing_ancestor(&target);
        assert_eq!(anchor, dir.path().canonicalize().unwrap());
    }
}
