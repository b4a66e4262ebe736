//! Parquet tables: extracted effect tables and canonical signature tables

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float32Array, Float64Array, Int32Array, Int64Array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use ndarray::{Array2, ArrayView2};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};

use crate::data::{EffectTable, SignatureKind, SignatureMatrix};
use crate::error::{Result, SignatureError};

/// Identifier column of an effect table
pub const EXPERIMENT_ID_COLUMN: &str = "experiment_id";
/// Identifier column of a signature table named by experiment id
pub const GENE_ID_COLUMN: &str = "entrezID";
/// Metadata key holding the experiment id of each value column (JSON array)
pub const EXPERIMENT_IDS_KEY: &str = "sigrank.experiment_ids";
/// Metadata key holding the signature kind
pub const KIND_KEY: &str = "sigrank.kind";

/// Genes written per record batch of a signature table
const SIGNATURE_BATCH_ROWS: usize = 65_536;

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .build()
}

/// Streaming writer for the extraction output table.
///
/// Schema: `experiment_id: Int64` followed by one `Float32` column per gene.
pub struct EffectTableWriter {
    writer: ArrowWriter<File>,
    schema: SchemaRef,
    n_genes: usize,
    rows_written: u64,
}

impl EffectTableWriter {
    pub fn create<P: AsRef<Path>>(path: P, gene_symbols: &[String]) -> Result<Self> {
        let mut fields = Vec::with_capacity(gene_symbols.len() + 1);
        fields.push(Field::new(EXPERIMENT_ID_COLUMN, DataType::Int64, false));
        for symbol in gene_symbols {
            fields.push(Field::new(symbol.as_str(), DataType::Float32, true));
        }
        let schema = Arc::new(Schema::new(fields));
        let file = File::create(path.as_ref())?;
        let writer = ArrowWriter::try_new(file, schema.clone(), Some(writer_properties()))?;
        Ok(Self {
            writer,
            schema,
            n_genes: gene_symbols.len(),
            rows_written: 0,
        })
    }

    /// Append rows (one per experiment id)
    pub fn write_chunk(&mut self, experiment_ids: &[i64], values: ArrayView2<'_, f32>) -> Result<()> {
        let (n_rows, n_cols) = values.dim();
        if n_rows != experiment_ids.len() || n_cols != self.n_genes {
            return Err(SignatureError::DimensionMismatch {
                expected: format!("{} rows x {} genes", experiment_ids.len(), self.n_genes),
                got: format!("{} rows x {} genes", n_rows, n_cols),
            });
        }
        if n_rows == 0 {
            return Ok(());
        }

        let mut columns: Vec<ArrayRef> = Vec::with_capacity(n_cols + 1);
        columns.push(Arc::new(Int64Array::from(experiment_ids.to_vec())));
        for col in values.columns() {
            columns.push(Arc::new(Float32Array::from(col.to_vec())));
        }
        let batch = RecordBatch::try_new(self.schema.clone(), columns)?;
        self.writer.write(&batch)?;
        self.rows_written += n_rows as u64;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Flush and close the file, returning the number of rows written
    pub fn finish(self) -> Result<u64> {
        self.writer.close()?;
        Ok(self.rows_written)
    }
}

/// Write a whole effect table in one go
pub fn write_effect_table<P: AsRef<Path>>(path: P, table: &EffectTable) -> Result<u64> {
    let mut writer = EffectTableWriter::create(path, table.gene_symbols())?;
    writer.write_chunk(table.experiment_ids(), table.values())?;
    writer.finish()
}

/// Read an effect table written by [`EffectTableWriter`]
pub fn read_effect_table<P: AsRef<Path>>(path: P) -> Result<EffectTable> {
    let path = path.as_ref();
    let builder = open_builder(path, "Effect table")?;
    let schema = builder.schema().clone();
    let fields = schema.fields();
    if fields.first().map(|f| f.name().as_str()) != Some(EXPERIMENT_ID_COLUMN) {
        return Err(SignatureError::MissingColumn {
            column: EXPERIMENT_ID_COLUMN.to_string(),
            source_name: path.display().to_string(),
        });
    }
    let gene_symbols: Vec<String> = fields.iter().skip(1).map(|f| f.name().clone()).collect();
    let n_genes = gene_symbols.len();

    let mut ids: Vec<i64> = Vec::new();
    let mut rows: Vec<f32> = Vec::new();
    for batch in builder.build()? {
        let batch = batch?;
        ids.extend(int64_column(batch.column(0), EXPERIMENT_ID_COLUMN)?);
        let cols: Vec<Vec<f64>> = (1..batch.num_columns())
            .map(|j| float64_column(batch.column(j)))
            .collect::<Result<_>>()?;
        for i in 0..batch.num_rows() {
            rows.extend(cols.iter().map(|c| c[i] as f32));
        }
    }

    let values = Array2::from_shape_vec((ids.len(), n_genes), rows)
        .map_err(|e| SignatureError::invalid_input(e.to_string()))?;
    log::info!(
        "Read effect table {}: {} experiments x {} genes",
        path.display(),
        ids.len(),
        n_genes
    );
    EffectTable::new(values, ids, gene_symbols)
}

/// Column naming of a serialized signature table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnNaming {
    /// `entrezID` then one column per experiment, named by experiment id
    #[default]
    ExperimentId,
    /// `V1` holds gene ids, `V2..` the experiments in order
    Positional,
}

impl ColumnNaming {
    fn id_column(&self) -> &'static str {
        match self {
            ColumnNaming::ExperimentId => GENE_ID_COLUMN,
            ColumnNaming::Positional => "V1",
        }
    }

    fn value_column(&self, position: usize, experiment_id: i64) -> String {
        match self {
            ColumnNaming::ExperimentId => experiment_id.to_string(),
            ColumnNaming::Positional => format!("V{}", position + 2),
        }
    }
}

/// Write a signature matrix as an identifier column plus one column per experiment
///
/// Rank signatures are stored as `Int32`, effect sizes as `Float32`.
pub fn write_signature<P: AsRef<Path>>(path: P, signature: &SignatureMatrix, naming: ColumnNaming) -> Result<()> {
    let path = path.as_ref();
    let value_type = match signature.kind() {
        SignatureKind::Rank => DataType::Int32,
        SignatureKind::EffectSize => DataType::Float32,
    };

    let mut fields = Vec::with_capacity(signature.n_experiments() + 1);
    fields.push(Field::new(naming.id_column(), DataType::Int64, false));
    for (j, &exp_id) in signature.experiment_ids().iter().enumerate() {
        fields.push(Field::new(naming.value_column(j, exp_id), value_type.clone(), true));
    }

    let mut metadata = HashMap::new();
    metadata.insert(
        EXPERIMENT_IDS_KEY.to_string(),
        serde_json::to_string(signature.experiment_ids())?,
    );
    metadata.insert(KIND_KEY.to_string(), signature.kind().as_str().to_string());
    let schema = Arc::new(Schema::new_with_metadata(fields, metadata));

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(writer_properties()))?;

    let values = signature.values();
    let gene_ids = signature.gene_ids();
    let mut start = 0;
    while start < signature.n_genes() {
        let end = (start + SIGNATURE_BATCH_ROWS).min(signature.n_genes());
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(signature.n_experiments() + 1);
        columns.push(Arc::new(Int64Array::from(gene_ids[start..end].to_vec())));
        for j in 0..signature.n_experiments() {
            let col = values.column(j);
            let slice = col.slice(ndarray::s![start..end]);
            let array: ArrayRef = match signature.kind() {
                SignatureKind::Rank => Arc::new(Int32Array::from(
                    slice.iter().map(|&v| v as i32).collect::<Vec<i32>>(),
                )),
                SignatureKind::EffectSize => Arc::new(Float32Array::from(
                    slice.iter().map(|&v| v as f32).collect::<Vec<f32>>(),
                )),
            };
            columns.push(array);
        }
        writer.write(&RecordBatch::try_new(schema.clone(), columns)?)?;
        start = end;
    }
    writer.close()?;

    log::info!(
        "Wrote {} signature {}: {} genes x {} experiments",
        signature.kind().as_str(),
        path.display(),
        signature.n_genes(),
        signature.n_experiments()
    );
    Ok(())
}

/// Read a signature table written by [`write_signature`].
///
/// Experiment ids come from the table metadata when present. Without it,
/// every value column name must parse as an integer experiment id;
/// positional (`V2..`) tables without metadata are rejected.
pub fn read_signature<P: AsRef<Path>>(path: P) -> Result<SignatureMatrix> {
    let path = path.as_ref();
    let builder = open_builder(path, "Signature table")?;
    let schema = builder.schema().clone();
    let fields = schema.fields();
    if fields.is_empty() {
        return Err(SignatureError::InvalidSignature {
            reason: format!("{} has no columns", path.display()),
        });
    }
    let value_fields: Vec<&str> = fields.iter().skip(1).map(|f| f.name().as_str()).collect();
    let experiment_ids = resolve_experiment_ids(schema.metadata(), &value_fields)?;

    let kind = match schema.metadata().get(KIND_KEY) {
        Some(k) => SignatureKind::parse(k)?,
        None => match fields.get(1).map(|f| f.data_type()) {
            Some(DataType::Int32) | Some(DataType::Int64) => SignatureKind::Rank,
            _ => SignatureKind::EffectSize,
        },
    };

    let n_exp = value_fields.len();
    let mut gene_ids: Vec<i64> = Vec::new();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); n_exp];
    for batch in builder.build()? {
        let batch = batch?;
        gene_ids.extend(int64_column(batch.column(0), fields[0].name())?);
        for (j, col) in columns.iter_mut().enumerate() {
            col.extend(float64_column(batch.column(j + 1))?);
        }
    }

    let values = Array2::from_shape_fn((gene_ids.len(), n_exp), |(i, j)| columns[j][i]);
    log::info!(
        "Read {} signature {}: {} genes x {} experiments",
        kind.as_str(),
        path.display(),
        gene_ids.len(),
        n_exp
    );
    SignatureMatrix::new(values, gene_ids, experiment_ids, kind)
}

fn resolve_experiment_ids(metadata: &HashMap<String, String>, value_fields: &[&str]) -> Result<Vec<i64>> {
    if let Some(raw) = metadata.get(EXPERIMENT_IDS_KEY) {
        let ids: Vec<i64> = serde_json::from_str(raw)?;
        if ids.len() != value_fields.len() {
            return Err(SignatureError::InvalidSignature {
                reason: format!(
                    "metadata lists {} experiment ids but the table has {} value columns",
                    ids.len(),
                    value_fields.len()
                ),
            });
        }
        return Ok(ids);
    }

    value_fields
        .iter()
        .map(|name| {
            name.parse::<i64>().map_err(|_| SignatureError::InvalidSignature {
                reason: format!(
                    "column '{}' is not an experiment id and the table carries no '{}' metadata",
                    name, EXPERIMENT_IDS_KEY
                ),
            })
        })
        .collect()
}

/// Number of rows recorded in a Parquet file's footer
pub fn parquet_row_count<P: AsRef<Path>>(path: P) -> Result<u64> {
    let path = path.as_ref();
    let builder = open_builder(path, "Parquet file")?;
    Ok(builder.metadata().file_metadata().num_rows().max(0) as u64)
}

fn open_builder(path: &Path, what: &str) -> Result<ParquetRecordBatchReaderBuilder<File>> {
    if !path.exists() {
        return Err(SignatureError::FileNotFound {
            what: what.to_string(),
            path: path.display().to_string(),
        });
    }
    let file = File::open(path)?;
    Ok(ParquetRecordBatchReaderBuilder::try_new(file)?)
}

fn int64_column(array: &ArrayRef, name: &str) -> Result<Vec<i64>> {
    if array.null_count() > 0 {
        return Err(SignatureError::InvalidSignature {
            reason: format!("identifier column '{}' contains nulls", name),
        });
    }
    if array.data_type().is_floating() {
        if let Some(bad) = float64_column(array)?.into_iter().find(|v| v.fract() != 0.0) {
            return Err(SignatureError::InvalidSignature {
                reason: format!("identifier column '{}' holds non-integral value {}", name, bad),
            });
        }
    }
    let casted = cast(array, &DataType::Int64)?;
    if casted.null_count() > 0 {
        return Err(SignatureError::InvalidSignature {
            reason: format!("identifier column '{}' has values outside the i64 range", name),
        });
    }
    let ints = casted
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| SignatureError::InvalidSignature {
            reason: format!("identifier column '{}' is not integer", name),
        })?;
    Ok(ints.values().to_vec())
}

/// Any numeric column as f64, nulls as NaN
fn float64_column(array: &ArrayRef) -> Result<Vec<f64>> {
    let casted = cast(array, &DataType::Float64)?;
    let floats = casted
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| SignatureError::InvalidSignature {
            reason: format!("column of type {} is not numeric", array.data_type()),
        })?;
    Ok(floats.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    fn rank_signature() -> SignatureMatrix {
        SignatureMatrix::new(
            array![[1.0, 3.0], [2.0, 1.0], [3.0, 2.0]],
            vec![10, 20, 30],
            vec![105, 7],
            SignatureKind::Rank,
        )
        .unwrap()
    }

    #[test]
    fn test_effect_table_roundtrip_with_chunks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("effects.parquet");
        let symbols = vec!["TP53".to_string(), "EGFR".to_string()];
        let mut writer = EffectTableWriter::create(&path, &symbols).unwrap();
        writer.write_chunk(&[4, 1], array![[0.5f32, f32::NAN], [1.0, 2.0]].view()).unwrap();
        writer.write_chunk(&[9], array![[-3.0f32, 0.25]].view()).unwrap();
        assert_eq!(writer.finish().unwrap(), 3);

        let table = read_effect_table(&path).unwrap();
        assert_eq!(table.experiment_ids(), &[4, 1, 9]);
        assert_eq!(table.gene_symbols(), symbols.as_slice());
        assert_eq!(table.values()[[2, 0]], -3.0);
        assert!(table.values()[[0, 1]].is_nan());
        assert_eq!(parquet_row_count(&path).unwrap(), 3);
    }

    #[test]
    fn test_signature_both_namings() {
        let dir = tempdir().unwrap();
        for naming in [ColumnNaming::ExperimentId, ColumnNaming::Positional] {
            let path = dir.path().join(format!("{:?}.parquet", naming));
            write_signature(&path, &rank_signature(), naming).unwrap();
            let back = read_signature(&path).unwrap();
            assert_eq!(back.kind(), SignatureKind::Rank);
            assert_eq!(back.gene_ids(), &[10, 20, 30]);
            assert_eq!(back.experiment_ids(), &[105, 7]);
            assert_eq!(back.experiment(0).to_vec(), vec![1.0, 2.0, 3.0]);
        }
    }

    fn write_plain(path: &Path, names: &[&str]) {
        let mut fields = vec![Field::new("V1", DataType::Int64, false)];
        let mut columns: Vec<ArrayRef> = vec![Arc::new(Int64Array::from(vec![10, 20]))];
        for name in names {
            fields.push(Field::new(*name, DataType::Int32, true));
            columns.push(Arc::new(Int32Array::from(vec![1, 2])));
        }
        let schema = Arc::new(Schema::new(fields));
        let file = File::create(path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema.clone(), None).unwrap();
        writer.write(&RecordBatch::try_new(schema, columns).unwrap()).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_positional_without_metadata_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.parquet");
        write_plain(&path, &["V2", "V3"]);
        assert!(matches!(
            read_signature(&path),
            Err(SignatureError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn test_numeric_column_names_without_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("named.parquet");
        write_plain(&path, &["42", "43"]);
        let sig = read_signature(&path).unwrap();
        assert_eq!(sig.experiment_ids(), &[42, 43]);
        assert_eq!(sig.kind(), SignatureKind::Rank);
    }

    #[test]
    fn test_metadata_count_mismatch_rejected() {
        let mut metadata = HashMap::new();
        metadata.insert(EXPERIMENT_IDS_KEY.to_string(), "[1, 2, 3]".to_string());
        let err = resolve_experiment_ids(&metadata, &["V2", "V3"]).unwrap_err();
        assert!(matches!(err, SignatureError::InvalidSignature { .. }));
    }

    fn write_float_id_table(path: &Path, ids: Vec<f64>) {
        let schema = Arc::new(Schema::new(vec![
            Field::new(EXPERIMENT_ID_COLUMN, DataType::Float64, false),
            Field::new("A", DataType::Float32, true),
        ]));
        let n = ids.len();
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Float64Array::from(ids)) as ArrayRef,
                Arc::new(Float32Array::from(vec![1.0f32; n])) as ArrayRef,
            ],
        )
        .unwrap();
        let mut writer = ArrowWriter::try_new(File::create(path).unwrap(), schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_float_identifiers() {
        let dir = tempdir().unwrap();
        let whole = dir.path().join("whole.parquet");
        write_float_id_table(&whole, vec![3.0, 1.0]);
        assert_eq!(read_effect_table(&whole).unwrap().experiment_ids(), &[3, 1]);

        let fractional = dir.path().join("fractional.parquet");
        write_float_id_table(&fractional, vec![3.0, 1.5]);
        assert!(matches!(
            read_effect_table(&fractional),
            Err(SignatureError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            read_signature("/nonexistent/sig.parquet"),
            Err(SignatureError::FileNotFound { .. })
        ));
    }
}
