//! Parallel chunked extraction from a matrix store into a Parquet table

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::{s, Array2};

use super::columns::ColumnSelection;
use super::resources::{check_resources, ResourceEstimate};
use crate::config::ExtractionParams;
use crate::data::{EffectTable, ExperimentList, GeneCatalog};
use crate::error::{Result, SignatureError};
use crate::io::parquet::EffectTableWriter;
use crate::store::{MatrixChunkReader, MatrixSource};

/// Rows read from the store per call inside one job
const READ_BATCH_ROWS: usize = 1024;

/// One unit of work: a contiguous slice of the sorted row list
#[derive(Debug, Clone)]
pub struct ChunkJob {
    pub chunk_index: usize,
    pub rows: Vec<usize>,
}

/// Rows of one job with the selected columns, in requested column order
#[derive(Debug)]
pub struct ExtractedChunk {
    pub chunk_index: usize,
    pub experiment_ids: Vec<i64>,
    pub values: Array2<f32>,
}

/// Summary of a finished extraction
#[derive(Debug, Clone)]
pub struct ExtractionReport {
    pub output: PathBuf,
    pub n_rows: usize,
    pub n_cols: usize,
    pub n_chunks: usize,
    pub n_workers: usize,
    pub output_bytes: u64,
    pub elapsed: Duration,
}

/// Split sorted rows into `n` contiguous chunks.
///
/// The first `len % n` chunks get one extra row; empty chunks are dropped.
pub fn split_rows(rows: &[usize], n: usize) -> Vec<ChunkJob> {
    let n = n.max(1);
    let base = rows.len() / n;
    let extra = rows.len() % n;
    let mut jobs = Vec::with_capacity(n);
    let mut start = 0;
    for i in 0..n {
        let len = base + usize::from(i < extra);
        if len == 0 {
            continue;
        }
        jobs.push(ChunkJob {
            chunk_index: jobs.len(),
            rows: rows[start..start + len].to_vec(),
        });
        start += len;
    }
    jobs
}

/// The catalog must describe every column of the store it indexes
pub fn check_catalog_width(catalog: &GeneCatalog, n_cols: usize) -> Result<()> {
    if catalog.len() != n_cols || catalog.required_width() != n_cols {
        return Err(SignatureError::DimensionMismatch {
            expected: format!("gene catalog covering {} store columns", n_cols),
            got: format!(
                "{} catalog entries spanning {} columns",
                catalog.len(),
                catalog.required_width()
            ),
        });
    }
    Ok(())
}

/// Runs extraction jobs on a dedicated worker pool
pub struct ExtractionCoordinator<S: MatrixSource + 'static> {
    source: Arc<S>,
    params: ExtractionParams,
    check_resources: bool,
}

impl<S: MatrixSource + 'static> ExtractionCoordinator<S> {
    pub fn new(source: S, params: ExtractionParams) -> Self {
        Self::from_shared(Arc::new(source), params)
    }

    pub fn from_shared(source: Arc<S>, params: ExtractionParams) -> Self {
        Self {
            source,
            params,
            check_resources: true,
        }
    }

    /// Enable or disable the memory and disk pre-flight checks
    pub fn with_resource_checks(mut self, enabled: bool) -> Self {
        self.check_resources = enabled;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Extract `rows` x `selection` into a Parquet table at `output`.
    ///
    /// Any worker failure aborts the run and removes the partial output.
    pub fn extract(
        &self,
        rows: &ExperimentList,
        selection: &ColumnSelection,
        output: &Path,
    ) -> Result<ExtractionReport> {
        let start = Instant::now();
        let sorted_rows = self.validate(rows, selection)?;

        if self.check_resources {
            let estimate = ResourceEstimate::new(sorted_rows.len(), selection.len(), &self.params);
            check_resources(&estimate, output, &self.params)?;
        }

        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let jobs = split_rows(&sorted_rows, self.params.n_workers.get());
        let n_chunks = jobs.len();
        log::info!(
            "Extracting {} experiments x {} genes from {} in {} chunks",
            sorted_rows.len(),
            selection.len(),
            self.source.describe(),
            n_chunks
        );

        let written = self.write_jobs(jobs, selection, output);
        let rows_written = match written {
            Ok(n) => n,
            Err(e) => {
                if output.exists() {
                    log::warn!("Removing partial output {}", output.display());
                    // best effort; the original error is what gets reported
                    let _ = std::fs::remove_file(output);
                }
                return Err(e);
            }
        };

        let output_bytes = std::fs::metadata(output)?.len();
        let elapsed = start.elapsed();
        log::info!(
            "Extraction finished: {} rows written to {} ({:.1} MB) in {:.1}s",
            rows_written,
            output.display(),
            output_bytes as f64 / 1_048_576.0,
            elapsed.as_secs_f64()
        );

        Ok(ExtractionReport {
            output: output.to_path_buf(),
            n_rows: rows_written as usize,
            n_cols: selection.len(),
            n_chunks,
            n_workers: self.params.n_workers.get(),
            output_bytes,
            elapsed,
        })
    }

    /// Extract into memory, rows sorted by experiment id
    pub fn extract_table(&self, rows: &ExperimentList, selection: &ColumnSelection) -> Result<EffectTable> {
        let sorted_rows = self.validate(rows, selection)?;
        let jobs = split_rows(&sorted_rows, self.params.n_workers.get());
        let mut parts = Vec::with_capacity(jobs.len());
        self.run_jobs(jobs, selection, |chunk| {
            parts.push(EffectTable::new(
                chunk.values,
                chunk.experiment_ids,
                selection.names().to_vec(),
            )?);
            Ok(())
        })?;
        Ok(EffectTable::concat(parts)?.sorted_by_experiment())
    }

    /// Check rows and columns against the store shape; returns sorted rows
    fn validate(&self, rows: &ExperimentList, selection: &ColumnSelection) -> Result<Vec<usize>> {
        let (n_rows, n_cols) = self.source.shape()?;
        selection.check_width(n_cols)?;

        let mut sorted_rows = rows.row_indices();
        sorted_rows.sort_unstable();
        if let Some(&max) = sorted_rows.last() {
            if max >= n_rows {
                return Err(SignatureError::DimensionMismatch {
                    expected: format!("experiment ids < {} (store rows)", n_rows),
                    got: format!("experiment id {}", max),
                });
            }
        }
        let mut seen = HashSet::with_capacity(sorted_rows.len());
        if let Some(dup) = sorted_rows.iter().find(|r| !seen.insert(**r)) {
            return Err(SignatureError::invalid_input(format!(
                "experiment id {} listed more than once",
                dup
            )));
        }
        Ok(sorted_rows)
    }

    fn write_jobs(&self, jobs: Vec<ChunkJob>, selection: &ColumnSelection, output: &Path) -> Result<u64> {
        let mut writer = EffectTableWriter::create(output, selection.names())?;
        self.run_jobs(jobs, selection, |chunk| {
            log::debug!(
                "Writing chunk {} ({} rows)",
                chunk.chunk_index,
                chunk.experiment_ids.len()
            );
            writer.write_chunk(&chunk.experiment_ids, chunk.values.view())
        })?;
        writer.finish()
    }

    /// Dispatch every job to the pool and feed results to `sink` as they arrive.
    ///
    /// On the first failure the remaining jobs are cancelled and the channel is
    /// drained, so no job outlives this call.
    fn run_jobs<F>(&self, jobs: Vec<ChunkJob>, selection: &ColumnSelection, mut sink: F) -> Result<()>
    where
        F: FnMut(ExtractedChunk) -> Result<()>,
    {
        let n_jobs = jobs.len();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.params.n_workers.get())
            .thread_name(|i| format!("extract-{}", i))
            .build()
            .map_err(|e| SignatureError::invalid_input(format!("failed to start worker pool: {}", e)))?;

        let selection = Arc::new(selection.clone());
        let cancelled = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<Result<ExtractedChunk>>();
        for job in jobs {
            let tx = tx.clone();
            let source = Arc::clone(&self.source);
            let selection = Arc::clone(&selection);
            let cancelled = Arc::clone(&cancelled);
            pool.spawn(move || {
                if cancelled.load(Ordering::Relaxed) {
                    return;
                }
                let chunk_index = job.chunk_index;
                let result = catch_unwind(AssertUnwindSafe(|| extract_chunk(&*source, &selection, job, &cancelled)))
                    .unwrap_or_else(|_| {
                        Err(SignatureError::WorkerFailed {
                            chunk: chunk_index,
                            reason: "worker panicked".to_string(),
                        })
                    });
                let _ = tx.send(result);
            });
        }
        drop(tx);

        let mut received = 0;
        let mut failure = None;
        for result in rx.iter() {
            if failure.is_some() {
                continue;
            }
            match result.and_then(&mut sink) {
                Ok(()) => received += 1,
                Err(e) => {
                    cancelled.store(true, Ordering::Relaxed);
                    failure = Some(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        if received != n_jobs {
            return Err(SignatureError::WorkerFailed {
                chunk: received,
                reason: format!("only {} of {} chunks were returned", received, n_jobs),
            });
        }
        Ok(())
    }
}

/// Worker body: open a private handle, read the job's rows, reorder columns
fn extract_chunk<S: MatrixSource>(
    source: &S,
    selection: &ColumnSelection,
    job: ChunkJob,
    cancelled: &AtomicBool,
) -> Result<ExtractedChunk> {
    let chunk_index = job.chunk_index;
    let fail = |e: SignatureError| SignatureError::WorkerFailed {
        chunk: chunk_index,
        reason: e.to_string(),
    };

    let mut reader = source.open().map_err(fail)?;
    let mut values = Array2::<f32>::zeros((job.rows.len(), selection.len()));
    let mut filled = 0;
    for batch in job.rows.chunks(READ_BATCH_ROWS) {
        if cancelled.load(Ordering::Relaxed) {
            return Err(fail(SignatureError::invalid_input("extraction cancelled")));
        }
        let block = reader.read_rows(batch).map_err(fail)?;
        let picked = selection.apply(block.view());
        values
            .slice_mut(s![filled..filled + batch.len(), ..])
            .assign(&picked);
        filled += batch.len();
    }
    log::debug!("Chunk {} read {} rows", chunk_index, job.rows.len());

    Ok(ExtractedChunk {
        chunk_index,
        experiment_ids: job.rows.iter().map(|&r| r as i64).collect(),
        values,
    })
}
