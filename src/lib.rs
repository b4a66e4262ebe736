//! rust_sigrank: perturbation signature extraction and validation
//!
//! Builds rank-based gene signatures from a large experiments x genes
//! effect-size store: parallel extraction of selected rows and columns,
//! gene identifier harmonization, per-experiment rank transform, and a
//! leave-one-out replicate-consistency check.
//!
//! # Example
//!
//! ```ignore
//! use rust_sigrank::prelude::*;
//!
//! let table = read_effect_table("effects.parquet")?.sorted_by_experiment();
//! let map = read_gene_map("gene_map.tsv")?;
//! let signature = build_signature(&table, &map, None, &RankParams::default())?;
//! write_signature("signature.parquet", &signature, ColumnNaming::ExperimentId)?;
//!
//! let metadata = read_metadata("metadata.csv", "id", "name")?;
//! let outcome = validate_replicates(&signature, &metadata, &ValidationParams::default(), "demo")?;
//! println!("{}", outcome.summary.to_report());
//! ```

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod extract;
pub mod harmonize;
pub mod io;
pub mod pipeline;
pub mod rank;
pub mod stats;
pub mod store;
pub mod validate;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{
        ExtractionParams, PipelineConfig, RankParams, SignificanceParams, ValidationParams, WorkerCount,
    };
    pub use crate::data::{EffectTable, ExperimentList, GeneCatalog, PerturbationMetadata, SignatureKind, SignatureMatrix};
    pub use crate::error::{Result, SignatureError};
    pub use crate::extract::{ColumnSelection, ExtractionCoordinator, ExtractionReport};
    pub use crate::harmonize::{harmonize, GeneMap, HarmonizeReport, SharedIdSet};
    pub use crate::io::{
        read_effect_csv, read_effect_table, read_experiment_list, read_gene_catalog, read_gene_map, read_metadata,
        read_shared_ids, read_signature, write_effect_table, write_gene_catalog, write_signature, write_summary_csv,
        write_summary_text, write_validation_csv, ColumnNaming,
    };
    pub use crate::pipeline::{ExtractStage, RankStage, Stage};
    pub use crate::rank::{rank_signature, rank_vector};
    pub use crate::validate::{
        check_signature, validate_replicates, FilterMode, SingletonPolicy, ValidationOutcome, ValidationRecord,
        ValidationSummary,
    };
}

use prelude::*;

/// Harmonize an effect table and rank every experiment
pub fn build_signature(
    table: &EffectTable,
    map: &GeneMap,
    shared: Option<&SharedIdSet>,
    params: &RankParams,
) -> Result<SignatureMatrix> {
    let (signature, report) = harmonize(table, map, shared)?;
    log::info!(
        "Harmonized {} symbols into {} canonical ids",
        report.n_input,
        report.n_output
    );
    rank_signature(&signature, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_full_pipeline() {
        // Two perturbations with three near-identical replicates each, one singleton
        let n_genes = 40;
        let base = |phase: f64| -> Vec<f32> { (0..n_genes).map(|g| ((g as f64 * 0.37 + phase).sin()) as f32).collect() };
        let profiles = [0.0, 0.0, 0.0, 2.0, 2.0, 2.0, 4.0];
        let mut values = Array2::<f32>::zeros((profiles.len(), n_genes));
        for (i, &phase) in profiles.iter().enumerate() {
            for (g, v) in base(phase).into_iter().enumerate() {
                values[[i, g]] = v + 0.001 * (i as f32) * ((g % 3) as f32);
            }
        }
        let symbols: Vec<String> = (0..n_genes).map(|g| format!("G{}", g)).collect();
        let table = EffectTable::new(values, (100..107).collect(), symbols.clone()).unwrap();
        let map = GeneMap::new(
            symbols
                .iter()
                .enumerate()
                .map(|(g, s)| (s.clone(), (1000 + g).to_string()))
                .collect(),
        );

        let signature = build_signature(&table, &map, None, &RankParams::default()).unwrap();
        assert_eq!(signature.kind(), SignatureKind::Rank);
        assert_eq!(signature.n_genes(), n_genes);
        assert!(check_signature(&signature, None).is_ok());

        let metadata = PerturbationMetadata::new(
            (100..107).collect(),
            ["a", "a", "a", "b", "b", "b", "c"].iter().map(|s| s.to_string()).collect(),
        )
        .unwrap();
        let outcome =
            validate_replicates(&signature, &metadata, &ValidationParams::default(), "test").unwrap();

        assert_eq!(outcome.records.len(), 7);
        for record in outcome.records.iter().filter(|r| !r.is_singleton()) {
            assert!(record.valid, "replicate {} should be consistent", record.experiment_id);
            assert!(record.r.unwrap() > 0.9);
        }
        let singleton = outcome.records.iter().find(|r| r.is_singleton()).unwrap();
        assert_eq!(singleton.experiment_id, 106);
        assert!(!singleton.valid);
        assert_eq!(outcome.summary.valid, 6);
        assert_eq!(outcome.summary.total, 7);
    }
}
