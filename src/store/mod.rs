//! Read-only, row-addressable matrix stores (experiments x genes)
//!
//! A [`MatrixSource`] describes where a matrix lives and can hand out any
//! number of independent read-only [`MatrixChunkReader`] handles. Extraction
//! workers each open their own handle, so sources must be `Send + Sync` but
//! readers need not be.

mod dense;
#[cfg(feature = "hdf5")]
mod hdf5_store;
mod memory;

use std::ops::Range;

use ndarray::{s, Array2};

use crate::error::{Result, SignatureError};

pub use dense::{DenseMatrixFile, DenseMatrixReader, DenseMatrixWriter};
#[cfg(feature = "hdf5")]
pub use hdf5_store::{Hdf5Matrix, Hdf5Reader, DEFAULT_EFFECT_DATASET, DEFAULT_SIGNIFICANCE_DATASET};
pub use memory::{InMemoryMatrix, InMemoryReader};

/// Element width of stored values (f32) in bytes
pub const ELEMENT_SIZE: usize = std::mem::size_of::<f32>();

/// A handle to an open, read-only matrix
pub trait MatrixChunkReader {
    /// (rows, cols) as declared by the store
    fn shape(&self) -> (usize, usize);

    /// Read rows `[range.start, range.end)` with all columns
    fn read_row_range(&mut self, range: Range<usize>) -> Result<Array2<f32>>;

    /// Read an arbitrary set of rows, returned in the given order.
    ///
    /// Consecutive indices are coalesced into a single range read.
    fn read_rows(&mut self, rows: &[usize]) -> Result<Array2<f32>> {
        let (n_rows, n_cols) = self.shape();
        if let Some(&bad) = rows.iter().find(|&&r| r >= n_rows) {
            return Err(SignatureError::invalid_input(format!(
                "row index {} out of range for store with {} rows",
                bad, n_rows
            )));
        }

        let mut out = Array2::zeros((rows.len(), n_cols));
        let mut filled = 0;
        for run in contiguous_runs(rows) {
            let block = self.read_row_range(run.clone())?;
            let len = run.len();
            out.slice_mut(s![filled..filled + len, ..]).assign(&block);
            filled += len;
        }
        Ok(out)
    }
}

/// Something that can open read-only matrix handles
pub trait MatrixSource: Send + Sync {
    type Reader: MatrixChunkReader;

    /// Open an independent read-only handle
    fn open(&self) -> Result<Self::Reader>;

    /// Declared (rows, cols) of the matrix
    fn shape(&self) -> Result<(usize, usize)> {
        Ok(self.open()?.shape())
    }

    /// Human-readable description for log output
    fn describe(&self) -> String;
}

/// Split an index list into runs of consecutive ascending values
pub(crate) fn contiguous_runs(rows: &[usize]) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut iter = rows.iter().copied();
    let Some(first) = iter.next() else {
        return runs;
    };
    let mut start = first;
    let mut end = first + 1;
    for r in iter {
        if r == end {
            end += 1;
        } else {
            runs.push(start..end);
            start = r;
            end = r + 1;
        }
    }
    runs.push(start..end);
    runs
}

/// Check a row range against the declared number of rows
pub(crate) fn check_range(range: &Range<usize>, n_rows: usize, what: &str) -> Result<()> {
    if range.start > range.end || range.end > n_rows {
        return Err(SignatureError::invalid_input(format!(
            "row range {}..{} out of bounds for {} with {} rows",
            range.start, range.end, what, n_rows
        )));
    }
    Ok(())
}
