//! Concrete pipeline stages: extraction and harmonize + rank

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use log::info;
use serde_json::{json, Value};

use super::stage::{Stage, StageOutcome};
use crate::config::{ExtractionParams, RankParams, SignificanceParams};
use crate::error::Result;
use crate::extract::{check_catalog_width, significant_columns, ColumnSelection, ExtractionCoordinator};
use crate::harmonize::harmonize;
use crate::io::{
    read_effect_csv, read_effect_table, read_experiment_list, read_gene_catalog, read_gene_map, read_shared_ids,
    read_symbol_list, write_signature, ColumnNaming,
};
use crate::rank::rank_signature;
use crate::store::MatrixSource;

/// Optional pre-filter on an auxiliary significance store
pub struct SignificanceGate<S: MatrixSource> {
    pub source: Arc<S>,
    /// Backing file, fingerprinted as a stage input when known
    pub path: Option<PathBuf>,
    pub params: SignificanceParams,
}

/// Store + catalog + experiment list -> effect-size Parquet table
pub struct ExtractStage<S: MatrixSource + 'static> {
    pub source: Arc<S>,
    pub store_path: Option<PathBuf>,
    pub catalog: PathBuf,
    pub experiments: PathBuf,
    /// Symbols to keep, one per line
    pub gene_subset: Option<PathBuf>,
    pub significance: Option<SignificanceGate<S>>,
    pub params: ExtractionParams,
    pub check_resources: bool,
    pub output: PathBuf,
}

impl<S: MatrixSource + 'static> ExtractStage<S> {
    pub fn new(source: Arc<S>, catalog: PathBuf, experiments: PathBuf, output: PathBuf) -> Self {
        Self {
            source,
            store_path: None,
            catalog,
            experiments,
            gene_subset: None,
            significance: None,
            params: ExtractionParams::default(),
            check_resources: true,
            output,
        }
    }
}

impl<S: MatrixSource + 'static> Stage for ExtractStage<S> {
    fn name(&self) -> &str {
        "extract"
    }

    fn consumes(&self) -> Vec<PathBuf> {
        let mut inputs: Vec<PathBuf> = self.store_path.iter().cloned().collect();
        inputs.push(self.catalog.clone());
        inputs.push(self.experiments.clone());
        inputs.extend(self.gene_subset.iter().cloned());
        if let Some(gate) = &self.significance {
            inputs.extend(gate.path.iter().cloned());
        }
        inputs
    }

    fn produces(&self) -> PathBuf {
        self.output.clone()
    }

    // Worker count and resource factors do not change the extracted values
    fn params(&self) -> Value {
        json!({
            "significance_threshold": self.significance.as_ref().map(|gate| gate.params.threshold),
        })
    }

    fn run(&self) -> Result<StageOutcome> {
        let start = Instant::now();

        info!("Loading gene catalog from: {}", self.catalog.display());
        let mut catalog = read_gene_catalog(&self.catalog)?;
        info!("Loading experiment list from: {}", self.experiments.display());
        let experiments = read_experiment_list(&self.experiments)?;

        let (_, n_cols) = self.source.shape()?;
        check_catalog_width(&catalog, n_cols)?;

        if let Some(path) = &self.gene_subset {
            let wanted = read_symbol_list(path)?;
            catalog = catalog.restrict_to_symbols(&wanted)?;
            info!("Restricted to {} genes from {}", catalog.len(), path.display());
        }

        if let Some(gate) = &self.significance {
            let rows = experiments.row_indices();
            let report = significant_columns(&*gate.source, &rows, n_cols, &gate.params)?;
            info!(
                "Significance gate kept {} of {} genes (threshold {})",
                report.n_kept(),
                report.n_genes,
                gate.params.threshold
            );
            catalog = catalog.restrict_to_columns(&report.kept_columns)?;
        }

        let selection = ColumnSelection::from_catalog(&catalog)?;
        let coordinator = ExtractionCoordinator::from_shared(Arc::clone(&self.source), self.params.clone())
            .with_resource_checks(self.check_resources);
        let report = coordinator.extract(&experiments, &selection, &self.output)?;

        Ok(StageOutcome {
            stage: self.name().to_string(),
            output: self.output.clone(),
            rows: report.n_rows as u64,
            elapsed: start.elapsed(),
        })
    }
}

/// CSV/TSV inputs are read as text tables, anything else as Parquet
fn is_delimited_text(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref(),
        Some("csv" | "tsv" | "txt")
    )
}

/// Effect table -> harmonized (and usually ranked) signature table
pub struct RankStage {
    pub input: PathBuf,
    pub gene_map: PathBuf,
    pub shared_ids: Option<PathBuf>,
    /// Restrict the signature to these experiments
    pub experiments: Option<PathBuf>,
    pub params: RankParams,
    pub naming: ColumnNaming,
    /// `false` writes effect sizes without ranking
    pub rank: bool,
    pub output: PathBuf,
}

impl RankStage {
    pub fn new(input: PathBuf, gene_map: PathBuf, output: PathBuf) -> Self {
        Self {
            input,
            gene_map,
            shared_ids: None,
            experiments: None,
            params: RankParams::default(),
            naming: ColumnNaming::default(),
            rank: true,
            output,
        }
    }
}

impl Stage for RankStage {
    fn name(&self) -> &str {
        if self.rank {
            "rank"
        } else {
            "harmonize"
        }
    }

    fn consumes(&self) -> Vec<PathBuf> {
        let mut inputs = vec![self.input.clone(), self.gene_map.clone()];
        inputs.extend(self.shared_ids.iter().cloned());
        inputs.extend(self.experiments.iter().cloned());
        inputs
    }

    fn produces(&self) -> PathBuf {
        self.output.clone()
    }

    // Rank batch size does not change the ranks
    fn params(&self) -> Value {
        json!({ "naming": self.naming, "rank": self.rank })
    }

    fn run(&self) -> Result<StageOutcome> {
        let start = Instant::now();

        info!("Loading effect table from: {}", self.input.display());
        let table = if is_delimited_text(&self.input) {
            read_effect_csv(&self.input)?
        } else {
            read_effect_table(&self.input)?
        }
        .sorted_by_experiment();
        info!(
            "  {} experiments x {} genes",
            table.n_experiments(),
            table.n_genes()
        );

        info!("Loading gene map from: {}", self.gene_map.display());
        let map = read_gene_map(&self.gene_map)?;
        let shared = match &self.shared_ids {
            Some(path) => {
                info!("Loading shared gene ids from: {}", path.display());
                Some(read_shared_ids(path)?)
            }
            None => None,
        };

        let (mut signature, report) = harmonize(&table, &map, shared.as_ref())?;
        info!(
            "Harmonized {} symbols into {} canonical ids ({} unmapped, {} collapsed, {} outside shared set)",
            report.n_input, report.n_output, report.n_unmapped, report.n_collapsed, report.n_shared_dropped
        );

        if let Some(path) = &self.experiments {
            let keep: HashSet<i64> = read_experiment_list(path)?.ids().iter().copied().collect();
            signature = signature.retain_experiments(&keep)?;
            info!("Kept {} experiments listed in {}", signature.n_experiments(), path.display());
        }

        if self.rank {
            signature = rank_signature(&signature, &self.params)?;
        }

        if let Some(parent) = self.output.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        write_signature(&self.output, &signature, self.naming)?;
        info!(
            "Wrote {} signature ({} genes x {} experiments) to {}",
            signature.kind().as_str(),
            signature.n_genes(),
            signature.n_experiments(),
            self.output.display()
        );

        Ok(StageOutcome {
            stage: self.name().to_string(),
            output: self.output.clone(),
            rows: signature.n_genes() as u64,
            elapsed: start.elapsed(),
        })
    }
}
