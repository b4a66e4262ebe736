//! Dense row-major binary matrix file
//!
//! Layout (all little-endian):
//!
//! ```text
//! offset  size  field
//! 0       4     magic "SGMX"
//! 4       4     format version (u32)
//! 8       8     rows (u64)
//! 16      8     cols (u64)
//! 24      ...   rows * cols f32 values, row-major
//! ```

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use ndarray::Array2;

use super::{check_range, MatrixChunkReader, MatrixSource, ELEMENT_SIZE};
use crate::error::{Result, SignatureError};

const MAGIC: &[u8; 4] = b"SGMX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: u64 = 24;

/// A dense matrix file on disk
#[derive(Debug, Clone)]
pub struct DenseMatrixFile {
    path: PathBuf,
}

impl DenseMatrixFile {
    /// Refer to an existing matrix file; the header is validated on open
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(SignatureError::FileNotFound {
                what: "Matrix store".to_string(),
                path: path.display().to_string(),
            });
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a whole in-memory matrix to `path`
    pub fn write_array<P: AsRef<Path>>(path: P, data: &Array2<f32>) -> Result<Self> {
        let mut writer = DenseMatrixWriter::create(&path, data.ncols())?;
        for row in data.rows() {
            let values: Vec<f32> = row.iter().copied().collect();
            writer.write_row(&values)?;
        }
        writer.finish()?;
        Self::new(path)
    }
}

fn read_header(file: &mut File, path: &Path) -> Result<(usize, usize)> {
    let invalid = |reason: String| SignatureError::InvalidStore {
        path: path.display().to_string(),
        reason,
    };

    let mut header = [0u8; HEADER_LEN as usize];
    file.read_exact(&mut header)
        .map_err(|e| invalid(format!("cannot read header: {}", e)))?;

    if &header[0..4] != MAGIC {
        return Err(invalid("bad magic bytes".to_string()));
    }
    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version != FORMAT_VERSION {
        return Err(invalid(format!("unsupported format version {}", version)));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&header[8..16]);
    let declared_rows = u64::from_le_bytes(buf);
    buf.copy_from_slice(&header[16..24]);
    let declared_cols = u64::from_le_bytes(buf);

    let overflow = || invalid(format!("declared shape {} x {} is too large", declared_rows, declared_cols));
    let rows = usize::try_from(declared_rows).map_err(|_| overflow())?;
    let cols = usize::try_from(declared_cols).map_err(|_| overflow())?;
    let expected_len = declared_rows
        .checked_mul(declared_cols)
        .and_then(|n| n.checked_mul(ELEMENT_SIZE as u64))
        .and_then(|n| n.checked_add(HEADER_LEN))
        .ok_or_else(overflow)?;
    let actual_len = file.metadata()?.len();
    if actual_len != expected_len {
        return Err(invalid(format!(
            "file length {} does not match declared shape {} x {} ({} bytes)",
            actual_len, rows, cols, expected_len
        )));
    }

    Ok((rows, cols))
}

/// Read-only handle over a [`DenseMatrixFile`]
#[derive(Debug)]
pub struct DenseMatrixReader {
    file: File,
    rows: usize,
    cols: usize,
    path: PathBuf,
}

impl MatrixChunkReader for DenseMatrixReader {
    fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn read_row_range(&mut self, range: Range<usize>) -> Result<Array2<f32>> {
        check_range(&range, self.rows, &self.path.display().to_string())?;
        let n = range.len();
        let row_bytes = self.cols * ELEMENT_SIZE;
        let offset = HEADER_LEN + (range.start as u64) * row_bytes as u64;

        self.file.seek(SeekFrom::Start(offset))?;
        let mut bytes = vec![0u8; n * row_bytes];
        self.file.read_exact(&mut bytes)?;

        let values: Vec<f32> = bytes
            .chunks_exact(ELEMENT_SIZE)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Array2::from_shape_vec((n, self.cols), values).map_err(|e| SignatureError::InvalidStore {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

impl MatrixSource for DenseMatrixFile {
    type Reader = DenseMatrixReader;

    fn open(&self) -> Result<DenseMatrixReader> {
        let mut file = File::open(&self.path)?;
        let (rows, cols) = read_header(&mut file, &self.path)?;
        Ok(DenseMatrixReader {
            file,
            rows,
            cols,
            path: self.path.clone(),
        })
    }

    fn describe(&self) -> String {
        format!("dense matrix file {}", self.path.display())
    }
}

/// Streaming writer for [`DenseMatrixFile`]; the row count is patched on `finish`
pub struct DenseMatrixWriter {
    out: BufWriter<File>,
    cols: usize,
    rows: u64,
}

impl DenseMatrixWriter {
    pub fn create<P: AsRef<Path>>(path: P, cols: usize) -> Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(MAGIC)?;
        out.write_all(&FORMAT_VERSION.to_le_bytes())?;
        out.write_all(&0u64.to_le_bytes())?;
        out.write_all(&(cols as u64).to_le_bytes())?;
        Ok(Self { out, cols, rows: 0 })
    }

    pub fn write_row(&mut self, values: &[f32]) -> Result<()> {
        if values.len() != self.cols {
            return Err(SignatureError::DimensionMismatch {
                expected: format!("{} values per row", self.cols),
                got: format!("{} values", values.len()),
            });
        }
        for v in values {
            self.out.write_all(&v.to_le_bytes())?;
        }
        self.rows += 1;
        Ok(())
    }

    /// Flush and write the final row count; returns the number of rows written
    pub fn finish(mut self) -> Result<u64> {
        self.out.flush()?;
        let mut file = self
            .out
            .into_inner()
            .map_err(|e| SignatureError::IoError(e.into_error()))?;
        file.seek(SeekFrom::Start(8))?;
        file.write_all(&self.rows.to_le_bytes())?;
        file.sync_all()?;
        Ok(self.rows)
    }
}
