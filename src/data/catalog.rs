//! Gene catalog (physical column -> symbol) and experiment row list

use std::collections::HashSet;

use crate::error::{Result, SignatureError};

/// Maps each physical column of the source store to a gene symbol
#[derive(Debug, Clone)]
pub struct GeneCatalog {
    /// (gene_idx, gene_name), sorted by gene_idx
    entries: Vec<(usize, String)>,
}

impl GeneCatalog {
    pub fn new(mut entries: Vec<(usize, String)>) -> Result<Self> {
        if entries.is_empty() {
            return Err(SignatureError::EmptyData {
                reason: "gene catalog is empty".to_string(),
            });
        }
        entries.sort_by_key(|(idx, _)| *idx);
        if let Some(w) = entries.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(SignatureError::invalid_input(format!(
                "duplicate gene_idx {} in gene catalog",
                w[0].0
            )));
        }
        Ok(Self { entries })
    }

    /// Catalog with columns `0..names.len()` in the given order
    pub fn from_names(names: Vec<String>) -> Result<Self> {
        Self::new(names.into_iter().enumerate().collect())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(usize, String)] {
        &self.entries
    }

    /// Largest physical column index + 1
    pub fn required_width(&self) -> usize {
        self.entries.last().map(|(idx, _)| idx + 1).unwrap_or(0)
    }

    /// Sub-catalog of entries whose symbol is in `wanted`
    pub fn restrict_to_symbols(&self, wanted: &HashSet<String>) -> Result<Self> {
        let entries: Vec<(usize, String)> = self
            .entries
            .iter()
            .filter(|(_, name)| wanted.contains(name))
            .cloned()
            .collect();
        log::info!(
            "Gene subset: {} of {} catalog genes are in the requested set of {}",
            entries.len(),
            self.entries.len(),
            wanted.len()
        );
        Self::new(entries)
    }

    /// Sub-catalog of entries whose physical column is in `columns` (sorted)
    pub fn restrict_to_columns(&self, columns: &[usize]) -> Result<Self> {
        let keep: HashSet<usize> = columns.iter().copied().collect();
        Self::new(
            self.entries
                .iter()
                .filter(|(idx, _)| keep.contains(idx))
                .cloned()
                .collect(),
        )
    }
}

/// Row indices (experiment ids) to extract from the source store
#[derive(Debug, Clone)]
pub struct ExperimentList {
    ids: Vec<i64>,
}

impl ExperimentList {
    pub fn new(ids: Vec<i64>) -> Result<Self> {
        if ids.is_empty() {
            return Err(SignatureError::EmptyData {
                reason: "experiment list is empty".to_string(),
            });
        }
        if let Some(bad) = ids.iter().find(|&&id| id < 0) {
            return Err(SignatureError::invalid_input(format!(
                "experiment_id {} cannot be used as a row index",
                bad
            )));
        }
        Ok(Self { ids })
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// Row indices into the source store
    pub fn row_indices(&self) -> Vec<usize> {
        self.ids.iter().map(|&id| id as usize).collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
