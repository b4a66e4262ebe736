//! Significance gate: keep genes significant in at least one experiment

use ndarray::Axis;

use crate::config::SignificanceParams;
use crate::error::{Result, SignatureError};
use crate::store::{MatrixChunkReader, MatrixSource};

/// Outcome of the significance gate
#[derive(Debug, Clone)]
pub struct SignificanceReport {
    /// Physical column indices that passed, ascending
    pub kept_columns: Vec<usize>,
    pub n_genes: usize,
    /// Experiment rows actually read before stopping
    pub rows_scanned: usize,
}

impl SignificanceReport {
    pub fn n_kept(&self) -> usize {
        self.kept_columns.len()
    }
}

/// Scan the significance matrix for `rows` and return genes whose value is
/// `<= threshold` in at least one experiment.
///
/// `expected_cols` is the width of the effect store; the significance store
/// must match it. Reading stops as soon as every gene has passed.
pub fn significant_columns<S: MatrixSource>(
    source: &S,
    rows: &[usize],
    expected_cols: usize,
    params: &SignificanceParams,
) -> Result<SignificanceReport> {
    if params.chunk_rows == 0 {
        return Err(SignatureError::invalid_input("significance chunk size must be positive"));
    }
    let mut reader = source.open()?;
    let (n_rows, n_cols) = reader.shape();
    if n_cols != expected_cols {
        return Err(SignatureError::DimensionMismatch {
            expected: format!("{} significance columns", expected_cols),
            got: format!("{} columns in {}", n_cols, source.describe()),
        });
    }
    if let Some(&bad) = rows.iter().find(|&&r| r >= n_rows) {
        return Err(SignatureError::invalid_input(format!(
            "row index {} out of range for significance store with {} rows",
            bad, n_rows
        )));
    }

    let mut sorted_rows = rows.to_vec();
    sorted_rows.sort_unstable();

    log::info!(
        "Scanning significance values for {} experiments x {} genes (threshold {})",
        sorted_rows.len(),
        n_cols,
        params.threshold
    );

    let mut significant = vec![false; n_cols];
    let mut n_significant = 0usize;
    let mut rows_scanned = 0usize;

    // store precision: a stored 0.05 passes a 0.05 threshold
    let threshold = params.threshold as f32;
    for chunk in sorted_rows.chunks(params.chunk_rows) {
        let block = reader.read_rows(chunk)?;
        for (j, col) in block.axis_iter(Axis(1)).enumerate() {
            if significant[j] {
                continue;
            }
            // NaN compares false and never passes
            if col.iter().any(|&v| v <= threshold) {
                significant[j] = true;
                n_significant += 1;
            }
        }
        rows_scanned += chunk.len();
        log::debug!(
            "  {} / {} rows scanned, {} genes significant",
            rows_scanned,
            sorted_rows.len(),
            n_significant
        );
        if n_significant == n_cols {
            log::info!("All genes significant after {} rows; stopping early", rows_scanned);
            break;
        }
    }

    let kept_columns: Vec<usize> = significant
        .iter()
        .enumerate()
        .filter(|(_, &s)| s)
        .map(|(j, _)| j)
        .collect();

    if kept_columns.is_empty() {
        return Err(SignatureError::EmptyData {
            reason: format!("no gene has a significance value <= {}", params.threshold),
        });
    }
    log::info!(
        "Significance gate kept {} of {} genes",
        kept_columns.len(),
        n_cols
    );

    Ok(SignificanceReport {
        kept_columns,
        n_genes: n_cols,
        rows_scanned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryMatrix;
    use ndarray::array;

    #[test]
    fn test_gate_keeps_any_significant() {
        let padj = InMemoryMatrix::from_array(array![
            [0.5f32, 0.01, f32::NAN],
            [0.9, 0.2, f32::NAN],
            [0.05, 0.7, 0.3]
        ]);
        let params = SignificanceParams {
            threshold: 0.05,
            chunk_rows: 1,
        };
        let report = significant_columns(&padj, &[0, 1, 2], 3, &params).unwrap();
        assert_eq!(report.kept_columns, vec![0, 1]);
        assert_eq!(report.rows_scanned, 3);
    }

    #[test]
    fn test_gate_stops_early() {
        let padj = InMemoryMatrix::from_array(array![[0.01f32, 0.02], [0.9, 0.9], [0.9, 0.9]]);
        let params = SignificanceParams {
            threshold: 0.05,
            chunk_rows: 1,
        };
        let report = significant_columns(&padj, &[0, 1, 2], 2, &params).unwrap();
        assert_eq!(report.kept_columns, vec![0, 1]);
        assert_eq!(report.rows_scanned, 1);
    }

    #[test]
    fn test_gate_errors() {
        let padj = InMemoryMatrix::from_array(array![[0.5f32, 0.9]]);
        let params = SignificanceParams::default();
        assert!(matches!(
            significant_columns(&padj, &[0], 2, &params),
            Err(SignatureError::EmptyData { .. })
        ));
        assert!(significant_columns(&padj, &[0], 3, &params).is_err());
        assert!(significant_columns(&padj, &[1], 2, &params).is_err());
    }
}
