//! In-memory matrix store

use std::ops::Range;
use std::sync::Arc;

use ndarray::{s, Array2};

use super::{check_range, MatrixChunkReader, MatrixSource};
use crate::error::Result;

/// A matrix already held in memory, shared read-only between workers
#[derive(Debug, Clone)]
pub struct InMemoryMatrix {
    data: Arc<Array2<f32>>,
}

impl InMemoryMatrix {
    pub fn new(data: Arc<Array2<f32>>) -> Self {
        Self { data }
    }

    pub fn from_array(data: Array2<f32>) -> Self {
        Self::new(Arc::new(data))
    }
}

/// Reader handle over an [`InMemoryMatrix`]
#[derive(Debug)]
pub struct InMemoryReader {
    data: Arc<Array2<f32>>,
}

impl MatrixChunkReader for InMemoryReader {
    fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    fn read_row_range(&mut self, range: Range<usize>) -> Result<Array2<f32>> {
        check_range(&range, self.data.nrows(), "in-memory matrix")?;
        Ok(self.data.slice(s![range, ..]).to_owned())
    }
}

impl MatrixSource for InMemoryMatrix {
    type Reader = InMemoryReader;

    fn open(&self) -> Result<InMemoryReader> {
        Ok(InMemoryReader {
            data: Arc::clone(&self.data),
        })
    }

    fn shape(&self) -> Result<(usize, usize)> {
        Ok(self.data.dim())
    }

    fn describe(&self) -> String {
        let (r, c) = self.data.dim();
        format!("in-memory matrix ({} x {})", r, c)
    }
}
