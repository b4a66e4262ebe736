//! HDF5-backed matrix store (feature `hdf5`)

use std::ops::Range;
use std::path::{Path, PathBuf};

use ndarray::{s, Array2};

use super::{check_range, MatrixChunkReader, MatrixSource};
use crate::error::{Result, SignatureError};

/// Default dataset holding effect sizes
pub const DEFAULT_EFFECT_DATASET: &str = "l2fc";
/// Default dataset holding adjusted p-values
pub const DEFAULT_SIGNIFICANCE_DATASET: &str = "padj";

/// A 2-D dataset inside an HDF5 file
#[derive(Debug, Clone)]
pub struct Hdf5Matrix {
    path: PathBuf,
    dataset: String,
}

impl Hdf5Matrix {
    pub fn new<P: AsRef<Path>>(path: P, dataset: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(SignatureError::FileNotFound {
                what: "HDF5 store".to_string(),
                path: path.display().to_string(),
            });
        }
        Ok(Self {
            path,
            dataset: dataset.trim_start_matches('/').to_string(),
        })
    }

    /// Whether the file contains the given dataset
    pub fn has_dataset<P: AsRef<Path>>(path: P, dataset: &str) -> Result<bool> {
        let file = hdf5::File::open(path)?;
        Ok(file.link_exists(dataset.trim_start_matches('/')))
    }
}

/// Open HDF5 dataset handle
pub struct Hdf5Reader {
    dataset: hdf5::Dataset,
    rows: usize,
    cols: usize,
    label: String,
}

impl MatrixChunkReader for Hdf5Reader {
    fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn read_row_range(&mut self, range: Range<usize>) -> Result<Array2<f32>> {
        check_range(&range, self.rows, &self.label)?;
        let block: Array2<f32> = self.dataset.read_slice_2d(s![range, ..])?;
        Ok(block)
    }
}

impl MatrixSource for Hdf5Matrix {
    type Reader = Hdf5Reader;

    fn open(&self) -> Result<Hdf5Reader> {
        let file = hdf5::File::open(&self.path)?;
        let dataset = file.dataset(&self.dataset)?;
        let shape = dataset.shape();
        if shape.len() != 2 {
            return Err(SignatureError::InvalidStore {
                path: self.path.display().to_string(),
                reason: format!("dataset '{}' has {} dimensions, expected 2", self.dataset, shape.len()),
            });
        }
        Ok(Hdf5Reader {
            dataset,
            rows: shape[0],
            cols: shape[1],
            label: self.describe(),
        })
    }

    fn describe(&self) -> String {
        format!("{}:/{}", self.path.display(), self.dataset)
    }
}
