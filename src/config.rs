//! Pipeline configuration
//!
//! Each stage takes a small parameter struct with defaults; [`PipelineConfig`]
//! bundles them so a whole run can be described by one JSON file. Environment
//! inspection (scheduler slot counts) happens once, at the binary boundary,
//! and is passed in through [`WorkerCount::resolve`].

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SignatureError};
use crate::validate::{FilterMode, SingletonPolicy};

/// Worker count for parallel extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCount(usize);

impl WorkerCount {
    pub fn new(n: usize) -> Result<Self> {
        if n == 0 {
            return Err(SignatureError::invalid_input("worker count must be at least 1"));
        }
        Ok(Self(n))
    }

    /// Resolve the worker count: explicit override, then scheduler slots,
    /// then available cores minus one (at least one).
    pub fn resolve(explicit: Option<usize>, scheduler_slots: Option<usize>) -> Self {
        if let Some(n) = explicit.filter(|&n| n > 0) {
            return Self(n);
        }
        if let Some(n) = scheduler_slots.filter(|&n| n > 0) {
            log::info!("Using {} worker slots from the scheduler environment", n);
            return Self(n);
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self(cores.saturating_sub(1).max(1))
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for WorkerCount {
    fn default() -> Self {
        Self::resolve(None, None)
    }
}

/// Parameters for parallel extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionParams {
    /// Number of workers (chunks) to split rows across
    pub n_workers: WorkerCount,
    /// Multiplier applied to the raw matrix size when estimating peak memory
    pub memory_safety_factor: f64,
    /// Fraction of available memory above which a warning is logged
    pub memory_warn_fraction: f64,
    /// Multiplier applied to the raw matrix size when estimating output size
    pub disk_safety_factor: f64,
}

impl Default for ExtractionParams {
    fn default() -> Self {
        Self {
            n_workers: WorkerCount::default(),
            memory_safety_factor: 1.5,
            memory_warn_fraction: 0.8,
            disk_safety_factor: 1.5,
        }
    }
}

/// Parameters for the optional significance gate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignificanceParams {
    /// Maximum significance value (e.g. adjusted p) for a gene to count as significant
    pub threshold: f64,
    /// Rows read per chunk from the significance matrix
    pub chunk_rows: usize,
}

impl Default for SignificanceParams {
    fn default() -> Self {
        Self {
            threshold: 0.05,
            chunk_rows: 1000,
        }
    }
}

/// Parameters for the rank transform
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankParams {
    /// Experiments ranked per batch
    pub chunk_size: usize,
}

impl Default for RankParams {
    fn default() -> Self {
        Self { chunk_size: 512 }
    }
}

/// Parameters for replicate-consistency validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationParams {
    pub mode: FilterMode,
    pub singleton_policy: SingletonPolicy,
}

/// Full pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub extraction: ExtractionParams,
    /// `None` disables the significance gate
    pub significance: Option<SignificanceParams>,
    pub rank: RankParams,
    pub validation: ValidationParams,
}

impl PipelineConfig {
    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SignatureError::FileNotFound {
                what: "Config file".to_string(),
                path: path.display().to_string(),
            });
        }
        let reader = BufReader::new(File::open(path)?);
        let config: PipelineConfig = serde_json::from_reader(reader)?;
        config.check()?;
        Ok(config)
    }

    /// Sanity-check parameter ranges
    pub fn check(&self) -> Result<()> {
        if self.extraction.n_workers.get() == 0 {
            return Err(SignatureError::invalid_input("worker count must be at least 1"));
        }
        if self.rank.chunk_size == 0 {
            return Err(SignatureError::invalid_input("rank chunk size must be positive"));
        }
        if let Some(sig) = &self.significance {
            if sig.chunk_rows == 0 {
                return Err(SignatureError::invalid_input(
                    "significance chunk size must be positive",
                ));
            }
        }
        if self.extraction.memory_warn_fraction <= 0.0 || self.extraction.memory_warn_fraction > 1.0 {
            return Err(SignatureError::invalid_input(
                "memory warn fraction must be in (0, 1]",
            ));
        }
        self.validation.mode.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_worker_count_resolution() {
        assert_eq!(WorkerCount::resolve(Some(6), Some(12)).get(), 6);
        assert_eq!(WorkerCount::resolve(None, Some(12)).get(), 12);
        assert_eq!(WorkerCount::resolve(Some(0), Some(3)).get(), 3);
        assert!(WorkerCount::resolve(None, None).get() >= 1);
        assert!(WorkerCount::new(0).is_err());
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.rank.chunk_size, 512);
        assert!(config.significance.is_none());
        assert_eq!(config.validation.mode, FilterMode::PValue { threshold: 0.05 });
        assert_eq!(config.validation.singleton_policy, SingletonPolicy::MarkInvalid);
    }

    #[test]
    fn test_partial_json_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{
                "rank": {{ "chunk_size": 64 }},
                "significance": {{ "threshold": 0.01 }},
                "validation": {{ "mode": {{ "r_value": {{ "threshold": 0.3 }} }} }}
            }}"#
        )
        .unwrap();

        let config = PipelineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.rank.chunk_size, 64);
        let sig = config.significance.unwrap();
        assert_eq!(sig.threshold, 0.01);
        assert_eq!(sig.chunk_rows, 1000);
        assert_eq!(config.validation.mode, FilterMode::RValue { threshold: 0.3 });
    }

    #[test]
    fn test_invalid_chunk_size_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{ "rank": {{ "chunk_size": 0 }} }}"#).unwrap();
        assert!(PipelineConfig::from_json_file(file.path()).is_err());
    }
}
