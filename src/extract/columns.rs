//! Column selection: read in ascending physical order, return in caller order

use std::collections::HashSet;

use ndarray::{Array2, ArrayView2, Axis};

use crate::data::GeneCatalog;
use crate::error::{Result, SignatureError};

/// A validated set of wanted columns with a precomputed read order
///
/// `sorted` holds the wanted physical indices in ascending order (the order
/// they are read in); `unsort[j]` is the position in `sorted` of the j-th
/// requested column, so `block.select(sorted).select(unsort)` equals
/// `block.select(requested)`.
#[derive(Debug, Clone)]
pub struct ColumnSelection {
    requested: Vec<usize>,
    sorted: Vec<usize>,
    unsort: Vec<usize>,
    names: Vec<String>,
}

impl ColumnSelection {
    /// Build a selection from physical column indices and output names
    pub fn new(requested: Vec<usize>, names: Vec<String>) -> Result<Self> {
        if requested.is_empty() {
            return Err(SignatureError::EmptyData {
                reason: "no columns selected for extraction".to_string(),
            });
        }
        if requested.len() != names.len() {
            return Err(SignatureError::DimensionMismatch {
                expected: format!("{} column names", requested.len()),
                got: format!("{} column names", names.len()),
            });
        }
        let mut seen = HashSet::with_capacity(requested.len());
        if let Some(dup) = requested.iter().find(|c| !seen.insert(**c)) {
            return Err(SignatureError::invalid_input(format!(
                "column index {} selected more than once",
                dup
            )));
        }

        // argsort of the requested indices, then its inverse permutation
        let mut order: Vec<usize> = (0..requested.len()).collect();
        order.sort_by_key(|&i| requested[i]);
        let sorted: Vec<usize> = order.iter().map(|&i| requested[i]).collect();
        let mut unsort = vec![0usize; order.len()];
        for (pos, &i) in order.iter().enumerate() {
            unsort[i] = pos;
        }

        Ok(Self {
            requested,
            sorted,
            unsort,
            names,
        })
    }

    /// Selection of every catalog column, ordered by physical index
    pub fn from_catalog(catalog: &GeneCatalog) -> Result<Self> {
        let (idx, names): (Vec<usize>, Vec<String>) = catalog.entries().iter().cloned().unzip();
        Self::new(idx, names)
    }

    /// Requested physical indices, in output order
    pub fn requested(&self) -> &[usize] {
        &self.requested
    }

    /// Physical indices in ascending read order
    pub fn sorted(&self) -> &[usize] {
        &self.sorted
    }

    pub fn unsort(&self) -> &[usize] {
        &self.unsort
    }

    /// Output column names, in output order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.requested.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requested.is_empty()
    }

    /// Fail if any selected column lies outside a store of width `n_cols`
    pub fn check_width(&self, n_cols: usize) -> Result<()> {
        match self.sorted.last() {
            Some(&max) if max >= n_cols => Err(SignatureError::DimensionMismatch {
                expected: format!("column indices < {}", n_cols),
                got: format!("column index {}", max),
            }),
            _ => Ok(()),
        }
    }

    /// Take the selected columns from a full-width block, in requested order
    pub fn apply(&self, block: ArrayView2<'_, f32>) -> Array2<f32> {
        let sorted_cols = block.select(Axis(1), &self.sorted);
        sorted_cols.select(Axis(1), &self.unsort)
    }
}
