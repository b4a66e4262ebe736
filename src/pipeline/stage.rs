//! Stage interface and completion manifests
//!
//! A stage names the files it consumes and the table it produces. After a
//! successful run a sidecar manifest (`<output>.stage.json`) records the
//! stage name, a fingerprint of every input, the parameters that shape the
//! output and the output row count; a stage is complete only when all of
//! these still match.

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SignatureError};
use crate::io::parquet_row_count;

/// Whether a stage's output can be reused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completeness {
    Complete,
    Incomplete(String),
}

/// What a finished stage produced
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: String,
    pub output: PathBuf,
    pub rows: u64,
    pub elapsed: Duration,
}

/// One step of the pipeline
pub trait Stage {
    fn name(&self) -> &str;

    /// Input files whose content determines the output
    fn consumes(&self) -> Vec<PathBuf>;

    /// The Parquet table this stage writes
    fn produces(&self) -> PathBuf;

    /// Parameters that change the content of the output
    fn params(&self) -> Value {
        Value::Null
    }

    /// Do the work and write [`Stage::produces`]
    fn run(&self) -> Result<StageOutcome>;

    fn completeness(&self) -> Result<Completeness> {
        StageManifest::verify(self.name(), &self.consumes(), &self.params(), &self.produces())
    }

    fn is_complete(&self) -> Result<bool> {
        Ok(self.completeness()? == Completeness::Complete)
    }
}

/// Identity of an input file at the time a stage ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFingerprint {
    pub path: PathBuf,
    pub len: u64,
    pub modified_secs: u64,
    pub modified_nanos: u32,
}

impl InputFingerprint {
    pub fn of(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path).map_err(|_| SignatureError::FileNotFound {
            what: "Stage input".to_string(),
            path: path.display().to_string(),
        })?;
        let since_epoch = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            len: meta.len(),
            modified_secs: since_epoch.as_secs(),
            modified_nanos: since_epoch.subsec_nanos(),
        })
    }
}

/// Sidecar record written after a stage succeeds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageManifest {
    pub stage: String,
    pub inputs: Vec<InputFingerprint>,
    #[serde(default)]
    pub params: Value,
    pub output_rows: u64,
}

impl StageManifest {
    pub fn path_for(output: &Path) -> PathBuf {
        let mut name: OsString = output.as_os_str().to_owned();
        name.push(".stage.json");
        PathBuf::from(name)
    }

    /// Fingerprint the inputs and write the manifest next to `output`
    pub fn record(stage: &str, inputs: &[PathBuf], params: &Value, output: &Path, output_rows: u64) -> Result<Self> {
        let manifest = Self {
            stage: stage.to_string(),
            inputs: inputs
                .iter()
                .map(|p| InputFingerprint::of(p))
                .collect::<Result<_>>()?,
            params: params.clone(),
            output_rows,
        };
        let writer = BufWriter::new(File::create(Self::path_for(output))?);
        serde_json::to_writer_pretty(writer, &manifest)?;
        Ok(manifest)
    }

    pub fn load(output: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(Self::path_for(output))?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Remove a manifest, if any, before its output is rewritten
    pub fn invalidate(output: &Path) -> Result<()> {
        let path = Self::path_for(output);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Compare the recorded state with the current inputs and output
    pub fn verify(stage: &str, inputs: &[PathBuf], params: &Value, output: &Path) -> Result<Completeness> {
        use Completeness::Incomplete;

        if !output.exists() {
            return Ok(Incomplete(format!("output {} does not exist", output.display())));
        }
        if !Self::path_for(output).exists() {
            return Ok(Incomplete(format!("no stage manifest for {}", output.display())));
        }
        let manifest = match Self::load(output) {
            Ok(m) => m,
            Err(e) => return Ok(Incomplete(format!("unreadable stage manifest: {}", e))),
        };
        if manifest.stage != stage {
            return Ok(Incomplete(format!(
                "manifest belongs to stage '{}'",
                manifest.stage
            )));
        }
        if &manifest.params != params {
            return Ok(Incomplete(format!(
                "parameters changed from {} to {}",
                manifest.params, params
            )));
        }
        if manifest.inputs.len() != inputs.len() {
            return Ok(Incomplete("the set of inputs has changed".to_string()));
        }
        for (recorded, path) in manifest.inputs.iter().zip(inputs) {
            if &recorded.path != path {
                return Ok(Incomplete(format!(
                    "input changed from {} to {}",
                    recorded.path.display(),
                    path.display()
                )));
            }
            match InputFingerprint::of(path) {
                Ok(current) if &current == recorded => {}
                Ok(_) => {
                    return Ok(Incomplete(format!(
                        "input {} was modified after the stage ran",
                        path.display()
                    )))
                }
                Err(_) => return Ok(Incomplete(format!("input {} is missing", path.display()))),
            }
        }
        match parquet_row_count(output) {
            Ok(rows) if rows == manifest.output_rows => Ok(Completeness::Complete),
            Ok(rows) => Ok(Incomplete(format!(
                "output has {} rows, manifest recorded {}",
                rows, manifest.output_rows
            ))),
            Err(e) => Ok(Incomplete(format!("output is not a readable table: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::EffectTable;
    use crate::io::write_effect_table;
    use tempfile::tempdir;

    fn write_table(path: &Path, rows: usize) {
        let values = ndarray::Array2::from_elem((rows, 1), 1.0f32);
        let table = EffectTable::new(values, (0..rows as i64).collect(), vec!["A".to_string()]).unwrap();
        write_effect_table(path, &table).unwrap();
    }

    #[test]
    fn test_manifest_path() {
        assert_eq!(
            StageManifest::path_for(Path::new("/tmp/out.parquet")),
            PathBuf::from("/tmp/out.parquet.stage.json")
        );
    }

    #[test]
    fn test_verify_cycle() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.csv");
        std::fs::write(&input, "a,b\n1,2\n").unwrap();
        let output = dir.path().join("out.parquet");
        let inputs = vec![input.clone()];

        assert!(matches!(
            StageManifest::verify("extract", &inputs, &Value::Null, &output).unwrap(),
            Completeness::Incomplete(_)
        ));

        write_table(&output, 3);
        // output without a manifest is not trusted
        assert!(matches!(
            StageManifest::verify("extract", &inputs, &Value::Null, &output).unwrap(),
            Completeness::Incomplete(_)
        ));

        StageManifest::record("extract", &inputs, &Value::Null, &output, 3).unwrap();
        assert_eq!(
            StageManifest::verify("extract", &inputs, &Value::Null, &output).unwrap(),
            Completeness::Complete
        );
        assert!(matches!(
            StageManifest::verify("rank", &inputs, &Value::Null, &output).unwrap(),
            Completeness::Incomplete(_)
        ));

        // changing an input invalidates the stage
        std::fs::write(&input, "a,b\n1,2\n3,4\n").unwrap();
        assert!(matches!(
            StageManifest::verify("extract", &inputs, &Value::Null, &output).unwrap(),
            Completeness::Incomplete(_)
        ));
    }

    #[test]
    fn test_row_count_mismatch() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.csv");
        std::fs::write(&input, "x\n").unwrap();
        let output = dir.path().join("out.parquet");
        write_table(&output, 2);
        StageManifest::record("extract", &[input.clone()], &Value::Null, &output, 5).unwrap();
        assert!(matches!(
            StageManifest::verify("extract", &[input], &Value::Null, &output).unwrap(),
            Completeness::Incomplete(_)
        ));
    }

    #[test]
    fn test_changed_params_invalidate() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.csv");
        std::fs::write(&input, "x\n").unwrap();
        let output = dir.path().join("out.parquet");
        write_table(&output, 2);
        let inputs = vec![input];

        let recorded = serde_json::json!({ "naming": "experiment_id" });
        StageManifest::record("rank", &inputs, &recorded, &output, 2).unwrap();
        assert_eq!(
            StageManifest::verify("rank", &inputs, &recorded, &output).unwrap(),
            Completeness::Complete
        );

        let changed = serde_json::json!({ "naming": "positional" });
        assert!(matches!(
            StageManifest::verify("rank", &inputs, &changed, &output).unwrap(),
            Completeness::Incomplete(_)
        ));
        assert!(matches!(
            StageManifest::verify("rank", &inputs, &Value::Null, &output).unwrap(),
            Completeness::Incomplete(_)
        ));
    }
}
