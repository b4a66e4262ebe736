//! Per-experiment rank transform
//!
//! Rank 1 is the largest effect size. Ties keep their original gene order
//! and missing values always rank last, so every column becomes a
//! permutation of `1..=G`.

use std::cmp::Ordering;

use ndarray::{s, Array2, ArrayView1};

use crate::config::RankParams;
use crate::data::{SignatureKind, SignatureMatrix};
use crate::error::{Result, SignatureError};

/// Descending order with NaN after every number
fn descending_nan_last(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// Ranks of one vector: 1 = largest, ties by position, NaN last
pub fn rank_vector(values: ArrayView1<'_, f64>) -> Vec<u32> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    // stable sort keeps first-seen order among ties
    order.sort_by(|&i, &j| descending_nan_last(values[i], values[j]));
    let mut ranks = vec![0u32; values.len()];
    for (pos, &i) in order.iter().enumerate() {
        ranks[i] = pos as u32 + 1;
    }
    ranks
}

/// Rank every experiment column of an effect-size signature.
///
/// Columns are processed in batches of `params.chunk_size`; columns are
/// ranked independently, so batching never changes the result.
pub fn rank_signature(signature: &SignatureMatrix, params: &RankParams) -> Result<SignatureMatrix> {
    if signature.kind() != SignatureKind::EffectSize {
        return Err(SignatureError::InvalidSignature {
            reason: "rank transform expects an effect-size signature".to_string(),
        });
    }
    if params.chunk_size == 0 {
        return Err(SignatureError::invalid_input("rank chunk size must be positive"));
    }
    let n_genes = signature.n_genes();
    if n_genes > i32::MAX as usize {
        return Err(SignatureError::invalid_input(format!(
            "{} genes exceed the integer rank range",
            n_genes
        )));
    }

    let n_exp = signature.n_experiments();
    let values = signature.values();
    let mut ranks = Array2::<f64>::zeros((n_genes, n_exp));
    let n_batches = n_exp.div_ceil(params.chunk_size);
    log::info!(
        "Ranking {} genes across {} experiments in {} batches of up to {}",
        n_genes,
        n_exp,
        n_batches,
        params.chunk_size
    );

    for (batch, start) in (0..n_exp).step_by(params.chunk_size).enumerate() {
        let end = (start + params.chunk_size).min(n_exp);
        let block = values.slice(s![.., start..end]);
        let mut out = ranks.slice_mut(s![.., start..end]);
        let mut n_missing = 0usize;
        for (col, mut target) in block.columns().into_iter().zip(out.columns_mut()) {
            n_missing += col.iter().filter(|v| v.is_nan()).count();
            for (t, r) in target.iter_mut().zip(rank_vector(col)) {
                *t = r as f64;
            }
        }
        log::debug!(
            "  batch {}/{}: experiments {}..{} ({} missing values ranked last)",
            batch + 1,
            n_batches,
            start,
            end,
            n_missing
        );
    }

    SignatureMatrix::new(
        ranks,
        signature.gene_ids().to_vec(),
        signature.experiment_ids().to_vec(),
        SignatureKind::Rank,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    fn effect(values: Array2<f64>) -> SignatureMatrix {
        let (g, e) = values.dim();
        SignatureMatrix::new(
            values,
            (1..=g as i64).collect(),
            (0..e as i64).collect(),
            SignatureKind::EffectSize,
        )
        .unwrap()
    }

    #[test]
    fn test_rank_vector_nan_last() {
        let v = array![0.5, -0.2, 3.0, f64::NAN];
        assert_eq!(rank_vector(v.view()), vec![2, 3, 1, 4]);
    }

    #[test]
    fn test_ties_first_seen_wins() {
        let v = array![1.0, 2.0, 1.0, 2.0, f64::NAN, f64::NAN];
        assert_eq!(rank_vector(v.view()), vec![3, 1, 4, 2, 5, 6]);
    }

    #[test]
    fn test_columns_are_permutations() {
        let values = Array2::from_shape_fn((37, 11), |(i, j)| {
            if (i * 7 + j) % 13 == 0 {
                f64::NAN
            } else {
                (((i * 31 + j * 17) % 23) as f64 - 11.0) / 3.0
            }
        });
        let ranked = rank_signature(&effect(values), &RankParams { chunk_size: 4 }).unwrap();
        assert_eq!(ranked.kind(), SignatureKind::Rank);
        for j in 0..ranked.n_experiments() {
            let mut col: Vec<u32> = ranked.experiment(j).iter().map(|&r| r as u32).collect();
            col.sort_unstable();
            let expected: Vec<u32> = (1..=37).collect();
            assert_eq!(col, expected);
        }
    }

    #[test]
    fn test_batch_size_has_no_effect() {
        let values = Array2::from_shape_fn((20, 9), |(i, j)| ((i as f64) * 1.7 - (j as f64) * 2.3).sin());
        let sig = effect(values);
        let small = rank_signature(&sig, &RankParams { chunk_size: 2 }).unwrap();
        let large = rank_signature(&sig, &RankParams { chunk_size: 512 }).unwrap();
        assert_eq!(small.values(), large.values());

        let first_col: Array1<f64> = sig.experiment(0).to_owned();
        let direct: Vec<f64> = rank_vector(first_col.view()).into_iter().map(|r| r as f64).collect();
        assert_eq!(small.experiment(0).to_vec(), direct);
    }

    #[test]
    fn test_rejects_rank_input() {
        let sig = SignatureMatrix::new(array![[1.0]], vec![1], vec![1], SignatureKind::Rank).unwrap();
        assert!(rank_signature(&sig, &RankParams::default()).is_err());
    }
}
