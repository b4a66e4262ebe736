//! End-to-end: dense store -> extract -> harmonize/rank -> validate

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Array2;
use tempfile::tempdir;

use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use rust_sigrank::pipeline::{PipelineRunner, SignificanceGate, StageAction, StageManifest};
use rust_sigrank::prelude::*;
use rust_sigrank::store::DenseMatrixFile;

const N_GENES: usize = 30;
const N_ROWS: usize = 12;

fn write(path: &Path, content: &str) {
    std::fs::write(path, content).unwrap();
}

/// Rows 0..6 follow profile A with small noise, 6..12 profile B
fn effect_matrix() -> Array2<f32> {
    Array2::from_shape_fn((N_ROWS, N_GENES), |(i, g)| {
        let phase = if i < 6 { 0.0 } else { 1.7 };
        ((g as f64 * 0.41 + phase).cos() as f32) + 0.002 * ((i * 7 + g) % 5) as f32
    })
}

struct Fixture {
    store: PathBuf,
    catalog: PathBuf,
    experiments: PathBuf,
    gene_map: PathBuf,
    metadata: PathBuf,
}

fn fixture(dir: &Path) -> Fixture {
    let store = dir.join("effects.sgmx");
    DenseMatrixFile::write_array(&store, &effect_matrix()).unwrap();

    // Catalog rows are listed out of column order
    let catalog = dir.join("genes.tsv");
    let mut text = String::from("gene_idx\tgene_name\n");
    for g in (0..N_GENES).rev() {
        text.push_str(&format!("{}\tG{}\n", g, g));
    }
    write(&catalog, &text);

    // Every row except 11, listed unsorted
    let experiments = dir.join("experiments.csv");
    write(&experiments, "experiment_id\n9\n0\n4\n2\n7\n1\n3\n5\n6\n8\n10\n");

    // G0 and G1 share one id; G29 is unmapped
    let gene_map = dir.join("gene_map.tsv");
    let mut text = String::from("gene_symbol\tentrezID\n");
    text.push_str("G0\t5000\nG1\t5000\n");
    for g in 2..N_GENES - 1 {
        text.push_str(&format!("G{}\t{}\n", g, 5000 + g));
    }
    write(&gene_map, &text);

    // Perturbation A: 0..3, B: 6..9, singleton C: 10
    let metadata = dir.join("metadata.csv");
    let mut text = String::from("id,name\n");
    for id in [0, 1, 2, 3] {
        text.push_str(&format!("{},drug_a\n", id));
    }
    for id in [6, 7, 8, 9] {
        text.push_str(&format!("{},drug_b\n", id));
    }
    text.push_str("10,drug_c\n");
    write(&metadata, &text);

    Fixture {
        store,
        catalog,
        experiments,
        gene_map,
        metadata,
    }
}

fn stages(fx: &Fixture, dir: &Path) -> (ExtractStage<DenseMatrixFile>, RankStage) {
    let source = Arc::new(DenseMatrixFile::new(&fx.store).unwrap());
    let mut extract = ExtractStage::new(
        source,
        fx.catalog.clone(),
        fx.experiments.clone(),
        dir.join("effects.parquet"),
    );
    extract.store_path = Some(fx.store.clone());
    extract.params.n_workers = WorkerCount::new(3).unwrap();
    extract.check_resources = false;

    let rank = RankStage::new(dir.join("effects.parquet"), fx.gene_map.clone(), dir.join("signature.parquet"));
    (extract, rank)
}

#[test]
fn test_extract_rank_validate() {
    let dir = tempdir().unwrap();
    let fx = fixture(dir.path());
    let (extract, rank) = stages(&fx, dir.path());

    let statuses = PipelineRunner::new()
        .add(extract, StageAction::Auto)
        .add(rank, StageAction::Auto)
        .run()
        .unwrap();
    assert!(statuses.iter().all(|s| s.ran()));

    // Extraction keeps store values keyed by experiment id, columns by physical index
    let effects = read_effect_table(dir.path().join("effects.parquet"))
        .unwrap()
        .sorted_by_experiment();
    assert_eq!(effects.n_experiments(), 11);
    assert_eq!(effects.experiment_ids(), &(0..11).collect::<Vec<i64>>()[..]);
    assert_eq!(effects.gene_symbols()[0], "G0");
    assert_eq!(effects.gene_symbols()[N_GENES - 1], "G29");
    let source = effect_matrix();
    assert_eq!(effects.values()[[4, 29]], source[[4, 29]]);
    assert_eq!(effects.values()[[10, 3]], source[[10, 3]]);

    // Harmonized ids are unique and ascending, each column a permutation
    let signature = read_signature(dir.path().join("signature.parquet")).unwrap();
    assert_eq!(signature.kind(), SignatureKind::Rank);
    assert_eq!(signature.n_genes(), N_GENES - 2);
    assert!(signature.gene_ids().windows(2).all(|w| w[0] < w[1]));
    assert_eq!(signature.gene_ids()[0], 5000);
    assert!(check_signature(&signature, None).is_ok());

    let metadata = read_metadata(&fx.metadata, "id", "name").unwrap();
    let outcome = validate_replicates(&signature, &metadata, &ValidationParams::default(), "e2e").unwrap();
    assert_eq!(outcome.records.len(), 9);
    let replicates: Vec<_> = outcome.records.iter().filter(|r| !r.is_singleton()).collect();
    assert_eq!(replicates.len(), 8);
    assert!(replicates.iter().all(|r| r.valid && r.num_peers == 3));
    assert_eq!(outcome.summary.valid, 8);
    assert_eq!(outcome.summary.invalid, 1);

    let csv_path = dir.path().join("validation.csv");
    write_validation_csv(&csv_path, &outcome.records).unwrap();
    let text = std::fs::read_to_string(&csv_path).unwrap();
    assert!(text.starts_with("id,drug_name,r,p,num_peers,valid"));
    assert_eq!(text.lines().count(), 10);
}

#[test]
fn test_rerun_reuses_complete_stages() {
    let dir = tempdir().unwrap();
    let fx = fixture(dir.path());

    let (extract, rank) = stages(&fx, dir.path());
    PipelineRunner::new()
        .add(extract, StageAction::Auto)
        .add(rank, StageAction::Auto)
        .run()
        .unwrap();
    assert!(StageManifest::path_for(&dir.path().join("effects.parquet")).exists());

    let (extract, rank) = stages(&fx, dir.path());
    let statuses = PipelineRunner::new()
        .add(extract, StageAction::Skip)
        .add(rank, StageAction::Skip)
        .run()
        .unwrap();
    assert!(statuses.iter().all(|s| !s.ran()));

    // A changed experiment list makes the extraction incomplete
    write(&fx.experiments, "experiment_id\n0\n1\n2\n");
    let (extract, rank) = stages(&fx, dir.path());
    let err = PipelineRunner::new()
        .add(extract, StageAction::Skip)
        .add(rank, StageAction::Auto)
        .run()
        .unwrap_err();
    assert!(matches!(err, SignatureError::StageIncomplete { .. }));
}

fn first_column_name(path: &Path) -> String {
    let file = std::fs::File::open(path).unwrap();
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).unwrap();
    builder.schema().field(0).name().clone()
}

#[test]
fn test_changed_naming_reruns_rank() {
    let dir = tempdir().unwrap();
    let fx = fixture(dir.path());
    let (extract, rank) = stages(&fx, dir.path());
    PipelineRunner::new()
        .add(extract, StageAction::Auto)
        .add(rank, StageAction::Auto)
        .run()
        .unwrap();
    let signature_path = dir.path().join("signature.parquet");
    assert_eq!(first_column_name(&signature_path), "entrezID");

    let (extract, mut rank) = stages(&fx, dir.path());
    rank.naming = ColumnNaming::Positional;
    let statuses = PipelineRunner::new()
        .add(extract, StageAction::Auto)
        .add(rank, StageAction::Auto)
        .run()
        .unwrap();
    assert!(!statuses[0].ran());
    assert!(statuses[1].ran());
    assert_eq!(first_column_name(&signature_path), "V1");

    // Skipping with a different naming than the recorded one is refused
    let (extract, rank) = stages(&fx, dir.path());
    let err = PipelineRunner::new()
        .add(extract, StageAction::Skip)
        .add(rank, StageAction::Skip)
        .run()
        .unwrap_err();
    assert!(matches!(err, SignatureError::StageIncomplete { .. }));
}

#[test]
fn test_significance_gate_and_threshold_change() {
    let dir = tempdir().unwrap();
    let fx = fixture(dir.path());

    // Genes 0..20 pass 0.05 in experiment 0; the rest sit at 0.5 everywhere
    let padj_path = dir.path().join("padj.sgmx");
    let padj = Array2::from_shape_fn((N_ROWS, N_GENES), |(i, g)| if i == 0 && g < 20 { 0.01f32 } else { 0.5 });
    DenseMatrixFile::write_array(&padj_path, &padj).unwrap();

    let gated = |threshold: f64| {
        let (mut extract, rank) = stages(&fx, dir.path());
        extract.significance = Some(SignificanceGate {
            source: Arc::new(DenseMatrixFile::new(&padj_path).unwrap()),
            path: Some(padj_path.clone()),
            params: SignificanceParams {
                threshold,
                ..SignificanceParams::default()
            },
        });
        (extract, rank)
    };

    let (extract, rank) = gated(0.05);
    let statuses = PipelineRunner::new()
        .add(extract, StageAction::Auto)
        .add(rank, StageAction::Auto)
        .run()
        .unwrap();
    assert!(statuses.iter().all(|s| s.ran()));
    let effects = read_effect_table(dir.path().join("effects.parquet")).unwrap();
    assert_eq!(effects.n_genes(), 20);
    assert_eq!(effects.n_experiments(), 11);
    // G0 and G1 collapse; G20.. were gated out
    let signature = read_signature(dir.path().join("signature.parquet")).unwrap();
    assert_eq!(signature.n_genes(), 19);

    let (extract, rank) = gated(0.05);
    let statuses = PipelineRunner::new()
        .add(extract, StageAction::Auto)
        .add(rank, StageAction::Auto)
        .run()
        .unwrap();
    assert!(statuses.iter().all(|s| !s.ran()));

    let (extract, rank) = gated(0.6);
    let statuses = PipelineRunner::new()
        .add(extract, StageAction::Auto)
        .add(rank, StageAction::Auto)
        .run()
        .unwrap();
    assert!(statuses.iter().all(|s| s.ran()));
    let effects = read_effect_table(dir.path().join("effects.parquet")).unwrap();
    assert_eq!(effects.n_genes(), N_GENES);
}
