//! Signature matrix keyed by canonical gene id and experiment id

use std::collections::{HashMap, HashSet};

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SignatureError};

/// What a signature matrix holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
    /// Harmonized effect sizes (e.g. log2 fold changes)
    EffectSize,
    /// Integer gene ranks, 1 = largest effect
    Rank,
}

impl SignatureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureKind::EffectSize => "effect_size",
            SignatureKind::Rank => "rank",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "effect_size" => Ok(SignatureKind::EffectSize),
            "rank" => Ok(SignatureKind::Rank),
            other => Err(SignatureError::InvalidSignature {
                reason: format!("unknown signature kind '{}'", other),
            }),
        }
    }
}

/// Genes (rows, canonical ids) x experiments (columns)
#[derive(Debug, Clone)]
pub struct SignatureMatrix {
    values: Array2<f64>,
    gene_ids: Vec<i64>,
    experiment_ids: Vec<i64>,
    kind: SignatureKind,
}

impl SignatureMatrix {
    pub fn new(
        values: Array2<f64>,
        gene_ids: Vec<i64>,
        experiment_ids: Vec<i64>,
        kind: SignatureKind,
    ) -> Result<Self> {
        let (n_genes, n_experiments) = values.dim();
        if gene_ids.len() != n_genes {
            return Err(SignatureError::DimensionMismatch {
                expected: format!("{} gene IDs", n_genes),
                got: format!("{} gene IDs", gene_ids.len()),
            });
        }
        if experiment_ids.len() != n_experiments {
            return Err(SignatureError::DimensionMismatch {
                expected: format!("{} experiment IDs", n_experiments),
                got: format!("{} experiment IDs", experiment_ids.len()),
            });
        }

        let mut seen = HashSet::with_capacity(gene_ids.len());
        if let Some(dup) = gene_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(SignatureError::InvalidSignature {
                reason: format!("duplicate canonical gene id {}", dup),
            });
        }
        let mut seen = HashSet::with_capacity(experiment_ids.len());
        if let Some(dup) = experiment_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(SignatureError::InvalidSignature {
                reason: format!("duplicate experiment id {}", dup),
            });
        }

        Ok(Self {
            values,
            gene_ids,
            experiment_ids,
            kind,
        })
    }

    pub fn n_genes(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_experiments(&self) -> usize {
        self.values.ncols()
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn gene_ids(&self) -> &[i64] {
        &self.gene_ids
    }

    pub fn experiment_ids(&self) -> &[i64] {
        &self.experiment_ids
    }

    pub fn kind(&self) -> SignatureKind {
        self.kind
    }

    /// Signature of one experiment (a column)
    pub fn experiment(&self, col: usize) -> ArrayView1<'_, f64> {
        self.values.column(col)
    }

    /// Column index of an experiment id
    pub fn experiment_index(&self) -> HashMap<i64, usize> {
        self.experiment_ids
            .iter()
            .enumerate()
            .map(|(j, &id)| (id, j))
            .collect()
    }

    /// Keep only the given experiments, preserving current column order
    pub fn retain_experiments(&self, keep: &HashSet<i64>) -> Result<Self> {
        let cols: Vec<usize> = self
            .experiment_ids
            .iter()
            .enumerate()
            .filter(|(_, id)| keep.contains(id))
            .map(|(j, _)| j)
            .collect();
        if cols.is_empty() {
            log::warn!("No experiments of the requested subset are present in the signature matrix");
        }
        Self::new(
            self.values.select(Axis(1), &cols),
            self.gene_ids.clone(),
            cols.iter().map(|&j| self.experiment_ids[j]).collect(),
            self.kind,
        )
    }

    pub fn into_parts(self) -> (Array2<f64>, Vec<i64>, Vec<i64>, SignatureKind) {
        (self.values, self.gene_ids, self.experiment_ids, self.kind)
    }
}
