//! Experiment x gene-symbol effect-size table (extraction output)

use std::collections::HashSet;

use ndarray::{concatenate, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{Result, SignatureError};

/// Effect sizes with one row per experiment and one column per gene symbol
#[derive(Debug, Clone)]
pub struct EffectTable {
    /// Effect sizes (experiments x genes)
    values: Array2<f32>,
    experiment_ids: Vec<i64>,
    gene_symbols: Vec<String>,
}

impl EffectTable {
    pub fn new(values: Array2<f32>, experiment_ids: Vec<i64>, gene_symbols: Vec<String>) -> Result<Self> {
        let (n_rows, n_cols) = values.dim();
        if experiment_ids.len() != n_rows {
            return Err(SignatureError::DimensionMismatch {
                expected: format!("{} experiment IDs", n_rows),
                got: format!("{} experiment IDs", experiment_ids.len()),
            });
        }
        if gene_symbols.len() != n_cols {
            return Err(SignatureError::DimensionMismatch {
                expected: format!("{} gene symbols", n_cols),
                got: format!("{} gene symbols", gene_symbols.len()),
            });
        }

        let mut seen = HashSet::with_capacity(experiment_ids.len());
        if let Some(dup) = experiment_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(SignatureError::invalid_input(format!(
                "duplicate experiment_id {} in effect table",
                dup
            )));
        }

        Ok(Self {
            values,
            experiment_ids,
            gene_symbols,
        })
    }

    /// Stack row blocks that share the same gene columns
    pub fn concat(parts: Vec<EffectTable>) -> Result<Self> {
        let Some(first) = parts.first() else {
            return Err(SignatureError::EmptyData {
                reason: "no effect table chunks to concatenate".to_string(),
            });
        };
        let symbols = first.gene_symbols.clone();
        if let Some(bad) = parts.iter().find(|p| p.gene_symbols != symbols) {
            return Err(SignatureError::DimensionMismatch {
                expected: format!("{} gene columns", symbols.len()),
                got: format!("{} gene columns", bad.gene_symbols.len()),
            });
        }

        let views: Vec<ArrayView2<'_, f32>> = parts.iter().map(|p| p.values.view()).collect();
        let values = concatenate(Axis(0), &views).map_err(|e| SignatureError::invalid_input(e.to_string()))?;
        let ids: Vec<i64> = parts.iter().flat_map(|p| p.experiment_ids.iter().copied()).collect();
        Self::new(values, ids, symbols)
    }

    pub fn n_experiments(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_genes(&self) -> usize {
        self.values.ncols()
    }

    pub fn values(&self) -> ArrayView2<'_, f32> {
        self.values.view()
    }

    pub fn experiment_ids(&self) -> &[i64] {
        &self.experiment_ids
    }

    pub fn gene_symbols(&self) -> &[String] {
        &self.gene_symbols
    }

    /// Effect sizes of one gene across all experiments
    pub fn gene_values(&self, gene_idx: usize) -> ArrayView1<'_, f32> {
        self.values.column(gene_idx)
    }

    /// Rows sorted by experiment id (chunk arrival order is not meaningful)
    pub fn sorted_by_experiment(&self) -> Self {
        let mut order: Vec<usize> = (0..self.n_experiments()).collect();
        order.sort_by_key(|&i| self.experiment_ids[i]);
        Self {
            values: self.values.select(Axis(0), &order),
            experiment_ids: order.iter().map(|&i| self.experiment_ids[i]).collect(),
            gene_symbols: self.gene_symbols.clone(),
        }
    }
}
