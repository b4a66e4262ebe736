//! Structural checks on a finished signature table

use crate::data::{SignatureKind, SignatureMatrix};
use crate::harmonize::SharedIdSet;

/// Result of [`check_signature`]
#[derive(Debug, Clone, Default)]
pub struct SignatureCheck {
    pub n_genes: usize,
    pub n_experiments: usize,
    /// Gene ids absent from the reference set (empty when none was given)
    pub ids_outside_reference: Vec<i64>,
    /// Experiments whose values are not integral ranks
    pub non_integer_columns: Vec<i64>,
    /// Experiments whose ranks are not a permutation of `1..=G`
    pub non_permutation_columns: Vec<i64>,
    pub max_rank: Option<f64>,
}

impl SignatureCheck {
    pub fn is_ok(&self) -> bool {
        self.ids_outside_reference.is_empty()
            && self.non_integer_columns.is_empty()
            && self.non_permutation_columns.is_empty()
    }

    /// Human-readable lines describing the findings
    pub fn describe(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "{} genes x {} experiments",
            self.n_genes, self.n_experiments
        )];
        if let Some(max) = self.max_rank {
            lines.push(format!("Max rank: {} (gene count {})", max, self.n_genes));
        }
        if !self.ids_outside_reference.is_empty() {
            lines.push(format!(
                "{} gene ids are not in the reference set (first: {:?})",
                self.ids_outside_reference.len(),
                &self.ids_outside_reference[..self.ids_outside_reference.len().min(5)]
            ));
        }
        if !self.non_integer_columns.is_empty() {
            lines.push(format!(
                "{} experiments have non-integer ranks",
                self.non_integer_columns.len()
            ));
        }
        if !self.non_permutation_columns.is_empty() {
            lines.push(format!(
                "{} experiments are not a permutation of 1..={}",
                self.non_permutation_columns.len(),
                self.n_genes
            ));
        }
        if self.is_ok() {
            lines.push("All checks passed".to_string());
        }
        lines
    }
}

/// Check a signature's ids against an optional reference set and, for rank
/// signatures, that every column is a permutation of `1..=G`
pub fn check_signature(signature: &SignatureMatrix, reference: Option<&SharedIdSet>) -> SignatureCheck {
    let n_genes = signature.n_genes();
    let mut check = SignatureCheck {
        n_genes,
        n_experiments: signature.n_experiments(),
        ..SignatureCheck::default()
    };

    if let Some(reference) = reference {
        check.ids_outside_reference = signature
            .gene_ids()
            .iter()
            .copied()
            .filter(|&id| !reference.contains(id))
            .collect();
    }

    if signature.kind() != SignatureKind::Rank {
        return check;
    }

    let mut max_rank = f64::NEG_INFINITY;
    let mut seen = vec![false; n_genes];
    for (j, &exp_id) in signature.experiment_ids().iter().enumerate() {
        let col = signature.experiment(j);
        if col.iter().any(|v| !v.is_finite() || v.fract() != 0.0) {
            check.non_integer_columns.push(exp_id);
            continue;
        }
        seen.iter_mut().for_each(|s| *s = false);
        let mut is_permutation = true;
        for &v in col.iter() {
            max_rank = max_rank.max(v);
            let r = v as i64;
            if r < 1 || r as usize > n_genes || seen[(r - 1) as usize] {
                is_permutation = false;
                continue;
            }
            seen[(r - 1) as usize] = true;
        }
        if !is_permutation {
            check.non_permutation_columns.push(exp_id);
        }
    }
    if max_rank.is_finite() {
        check.max_rank = Some(max_rank);
    }
    check
}
