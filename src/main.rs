//! rust_sigrank command-line interface

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use log::{info, warn, LevelFilter};

use rust_sigrank::cli::{Cli, Commands, ExtractArgs, RankArgs, ValidateArgs};
use rust_sigrank::pipeline::{PipelineRunner, SignificanceGate, StageAction, StageStatus};
use rust_sigrank::prelude::*;
#[cfg(feature = "hdf5")]
use rust_sigrank::store::{Hdf5Matrix, DEFAULT_EFFECT_DATASET, DEFAULT_SIGNIFICANCE_DATASET};
use rust_sigrank::store::{DenseMatrixFile, MatrixSource};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Scheduler variable holding the number of allotted slots
const SLOTS_ENV: &str = "NSLOTS";

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Find the first non-flag argument (potential subcommand)
    let first_positional = args.iter().skip(1).find(|a| !a.starts_with('-'));
    let subcommands = ["extract", "rank", "validate", "run", "check", "convert", "help"];
    let has_subcommand = first_positional.map_or(false, |a| subcommands.contains(&a.as_str()));

    if !has_subcommand {
        if args.len() == 1 {
            print_no_args();
            return;
        }
        if args.iter().any(|a| a == "--help") {
            print_long_help();
            return;
        }
        if args.iter().any(|a| a == "-h") {
            print_short_help();
            return;
        }
        if args.iter().any(|a| a == "-V" || a == "--version") {
            println!("rust_sigrank {}", VERSION);
            return;
        }
        print_no_args();
        return;
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let config = match prepare(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Extract { extract, output }) => run_extract(&config, &extract, &output),
        Some(Commands::Rank { input, rank, output }) => run_rank(&config, &input, &rank, &output),
        Some(Commands::Validate {
            signature,
            metadata,
            validate,
            output,
        }) => run_validate(&config, &signature, &metadata, &validate, &output),
        Some(Commands::Run {
            extract,
            rank,
            metadata,
            validate,
            work_dir,
            skip_extract,
            skip_rank,
            force,
        }) => run_pipeline(
            &config,
            &extract,
            &rank,
            metadata.as_deref(),
            &validate,
            &work_dir,
            stage_action(skip_extract, force),
            stage_action(skip_rank, force),
        ),
        Some(Commands::Check { signature, shared_ids }) => run_check(&signature, shared_ids.as_deref()),
        Some(Commands::Convert {
            input,
            output,
            catalog,
        }) => run_convert(&input, &output, catalog.as_deref()),
        None => {
            print_no_args();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Custom help output
// ---------------------------------------------------------------------------

fn print_no_args() {
    println!("rust_sigrank v{}", VERSION);
    println!("Run `rust_sigrank -h` for usage or `rust_sigrank --help` for detailed information.");
}

fn print_short_help() {
    println!("rust_sigrank v{}", VERSION);
    println!();
    println!("Usage: rust_sigrank <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  extract    Extract an effect-size table from a matrix store");
    println!("  rank       Harmonize gene ids and rank-transform an effect table");
    println!("  validate   Score replicate consistency of a signature table");
    println!("  run        Run extract, rank and validate as stages");
    println!("  check      Sanity-check a signature table");
    println!("  convert    Convert a CSV/TSV matrix into a dense store file");
    println!();
    println!("Run `rust_sigrank <COMMAND> -h` for command-specific options.");
}

fn print_long_help() {
    println!("rust_sigrank v{}", VERSION);
    println!("Perturbation signature extraction, rank transform and replicate validation");
    println!();
    println!("Usage: rust_sigrank <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  extract    Extract an effect-size table from a matrix store");
    println!("               - parallel chunked reads, one store handle per worker");
    println!("               - optional significance gate and gene subset");
    println!("  rank       Harmonize gene ids and rank-transform an effect table");
    println!("               - symbol -> canonical id mapping with mean collapse");
    println!("               - optional shared id set across datasets");
    println!("  validate   Score replicate consistency of a signature table");
    println!("               - leave-one-out Pearson correlation per replicate group");
    println!("               - filter modes: pvalue, rvalue, percentile");
    println!("  run        Run extract, rank and validate as stages");
    println!("  check      Sanity-check a signature table");
    println!("  convert    Convert a CSV/TSV matrix into a dense store file");
    println!();
    println!("Global Options:");
    println!("  -v, --verbose        Enable verbose output");
    println!("  -t, --threads <N>    Worker threads (0 = NSLOTS or cores - 1)");
    println!("      --config <FILE>  JSON configuration file");
    println!("  -h                   Print short help");
    println!("      --help           Print detailed help");
    println!("  -V, --version        Print version");
    println!();
    println!("Examples:");
    println!("  rust_sigrank extract -s effects.sgmx -c genes.csv -e experiments.csv -o effects.parquet");
    println!();
    println!("  rust_sigrank rank -i effects.parquet -g gene_map.tsv --shared-ids shared.csv \\");
    println!("    -o signature.parquet");
    println!();
    println!("  rust_sigrank validate -s signature.parquet -m metadata.csv --mode percentile --threshold 25");
    println!();
    println!("  rust_sigrank run -s effects.sgmx -c genes.csv -e experiments.csv -g gene_map.tsv \\");
    println!("    -m metadata.csv -w results/");
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Load the configuration and apply global flags
fn prepare(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            PipelineConfig::from_json_file(path)?
        }
        None => PipelineConfig::default(),
    };

    let slots = std::env::var(SLOTS_ENV).ok().and_then(|v| v.trim().parse::<usize>().ok());
    let explicit = (cli.threads > 0).then_some(cli.threads);
    config.extraction.n_workers = WorkerCount::resolve(explicit, slots);

    rayon::ThreadPoolBuilder::new()
        .num_threads(config.extraction.n_workers.get())
        .build_global()
        .ok();

    Ok(config)
}

fn stage_action(skip: bool, force: bool) -> StageAction {
    if force {
        StageAction::Force
    } else if skip {
        StageAction::Skip
    } else {
        StageAction::Auto
    }
}

fn significance_params(config: &PipelineConfig, args: &ExtractArgs) -> Option<SignificanceParams> {
    if args.significance.is_none() {
        if config.significance.is_some() {
            warn!("Significance parameters are configured but no --significance store was given; gate disabled");
        }
        return None;
    }
    let mut params = config.significance.clone().unwrap_or_default();
    if let Some(threshold) = args.significance_threshold {
        params.threshold = threshold;
    }
    Some(params)
}

fn rank_params(config: &PipelineConfig, args: &RankArgs) -> Result<RankParams> {
    let mut params = config.rank.clone();
    if let Some(chunk_size) = args.chunk_size {
        if chunk_size == 0 {
            return Err(SignatureError::InvalidInput {
                reason: "--chunk-size must be positive".to_string(),
            });
        }
        params.chunk_size = chunk_size;
    }
    Ok(params)
}

fn validation_params(config: &PipelineConfig, args: &ValidateArgs) -> Result<ValidationParams> {
    let mut params = config.validation.clone();
    match (&args.mode, args.threshold) {
        (Some(mode), threshold) => params.mode = FilterMode::from_name(mode, threshold)?,
        (None, Some(threshold)) => params.mode = FilterMode::from_name(params.mode.name(), Some(threshold))?,
        (None, None) => {}
    }
    if let Some(policy) = &args.singletons {
        params.singleton_policy = SingletonPolicy::from_name(policy)?;
    }
    Ok(params)
}

fn rank_stage(config: &PipelineConfig, input: PathBuf, args: &RankArgs, output: PathBuf) -> Result<RankStage> {
    let mut stage = RankStage::new(input, PathBuf::from(&args.gene_map), output);
    stage.shared_ids = args.shared_ids.as_ref().map(PathBuf::from);
    stage.experiments = args.keep_experiments.as_ref().map(PathBuf::from);
    stage.params = rank_params(config, args)?;
    stage.rank = !args.effect_size;
    if args.positional_columns {
        stage.naming = ColumnNaming::Positional;
    }
    Ok(stage)
}

// ---------------------------------------------------------------------------
// Stage execution
// ---------------------------------------------------------------------------

fn is_hdf5_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".h5") || lower.ends_with(".hdf5")
}

fn extract_stage<S: MatrixSource + 'static>(
    config: &PipelineConfig,
    args: &ExtractArgs,
    source: S,
    significance: Option<S>,
    output: PathBuf,
) -> ExtractStage<S> {
    let mut stage = ExtractStage::new(
        Arc::new(source),
        PathBuf::from(&args.catalog),
        PathBuf::from(&args.experiments),
        output,
    );
    stage.store_path = Some(PathBuf::from(&args.store));
    stage.gene_subset = args.genes.as_ref().map(PathBuf::from);
    stage.params = config.extraction.clone();
    stage.check_resources = !args.no_resource_check;
    if let (Some(source), Some(params)) = (significance, significance_params(config, args)) {
        stage.significance = Some(SignificanceGate {
            source: Arc::new(source),
            path: args.significance.as_ref().map(PathBuf::from),
            params,
        });
    }
    stage
}

fn run_stages<S: MatrixSource + 'static>(
    extract: ExtractStage<S>,
    extract_action: StageAction,
    rank: Option<(RankStage, StageAction)>,
) -> Result<Vec<StageStatus>> {
    let mut runner = PipelineRunner::new().add(extract, extract_action);
    if let Some((stage, action)) = rank {
        runner = runner.add(stage, action);
    }
    runner.run()
}

/// Open the source (and significance) store named by `args` and run the stages
fn run_with_store(
    config: &PipelineConfig,
    args: &ExtractArgs,
    output: PathBuf,
    extract_action: StageAction,
    rank: Option<(RankStage, StageAction)>,
) -> Result<Vec<StageStatus>> {
    if is_hdf5_path(&args.store) {
        #[cfg(feature = "hdf5")]
        {
            let source = Hdf5Matrix::new(&args.store, args.dataset.as_deref().unwrap_or(DEFAULT_EFFECT_DATASET))?;
            let significance = match &args.significance {
                Some(path) => Some(Hdf5Matrix::new(
                    path,
                    args.significance_dataset
                        .as_deref()
                        .unwrap_or(DEFAULT_SIGNIFICANCE_DATASET),
                )?),
                None => None,
            };
            let stage = extract_stage(config, args, source, significance, output);
            return run_stages(stage, extract_action, rank);
        }
        #[cfg(not(feature = "hdf5"))]
        {
            return Err(SignatureError::InvalidStore {
                path: args.store.clone(),
                reason: "HDF5 support is not compiled in (build with --features hdf5)".to_string(),
            });
        }
    }

    if args.dataset.is_some() || args.significance_dataset.is_some() {
        warn!("--dataset options only apply to HDF5 stores; ignored");
    }
    let source = DenseMatrixFile::new(&args.store)?;
    let significance = match &args.significance {
        Some(path) => Some(DenseMatrixFile::new(path)?),
        None => None,
    };
    let stage = extract_stage(config, args, source, significance, output);
    run_stages(stage, extract_action, rank)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn run_extract(config: &PipelineConfig, args: &ExtractArgs, output: &str) -> Result<()> {
    info!(
        "Extracting from {} with {} workers",
        args.store,
        config.extraction.n_workers.get()
    );
    run_with_store(config, args, PathBuf::from(output), StageAction::Force, None)?;
    info!("Effect table written to: {}", output);
    Ok(())
}

fn run_rank(config: &PipelineConfig, input: &str, args: &RankArgs, output: &str) -> Result<()> {
    let stage = rank_stage(config, PathBuf::from(input), args, PathBuf::from(output))?;
    PipelineRunner::new().add(stage, StageAction::Force).run()?;
    info!("Signature written to: {}", output);
    Ok(())
}

fn run_validate(
    config: &PipelineConfig,
    signature_path: &str,
    metadata_path: &str,
    args: &ValidateArgs,
    output: &str,
) -> Result<()> {
    let params = validation_params(config, args)?;

    info!("Loading signature from: {}", signature_path);
    let signature = read_signature(signature_path)?;
    info!(
        "  {} genes x {} experiments ({})",
        signature.n_genes(),
        signature.n_experiments(),
        signature.kind().as_str()
    );

    info!("Loading metadata from: {}", metadata_path);
    let metadata = read_metadata(metadata_path, &args.id_column, &args.name_column)?;

    info!(
        "Validating replicates (mode: {}, threshold: {})...",
        params.mode.name(),
        params.mode.threshold()
    );
    let outcome = validate_replicates(&signature, &metadata, &params, &args.dataset_name)?;

    let output = Path::new(output);
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    write_validation_csv(output, &outcome.records)?;
    let (text_path, csv_path) = summary_paths(output);
    write_summary_text(&text_path, &outcome.summary)?;
    write_summary_csv(&csv_path, &outcome.summary)?;

    println!("{}", outcome.summary.to_report());
    info!("Validation results written to: {}", output.display());
    info!("Summary written to: {} and {}", text_path.display(), csv_path.display());
    Ok(())
}

/// `<dir>/<stem>_summary.txt` and `<dir>/<stem>_summary.csv`
fn summary_paths(output: &Path) -> (PathBuf, PathBuf) {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "validation".to_string());
    (
        output.with_file_name(format!("{}_summary.txt", stem)),
        output.with_file_name(format!("{}_summary.csv", stem)),
    )
}

#[allow(clippy::too_many_arguments)]
fn run_pipeline(
    config: &PipelineConfig,
    extract: &ExtractArgs,
    rank: &RankArgs,
    metadata: Option<&str>,
    validate: &ValidateArgs,
    work_dir: &str,
    extract_action: StageAction,
    rank_action: StageAction,
) -> Result<()> {
    let work_dir = PathBuf::from(work_dir);
    std::fs::create_dir_all(&work_dir)?;
    let effects_path = work_dir.join("effects.parquet");
    let signature_name = if rank.effect_size {
        "signature_effect.parquet"
    } else {
        "signature_rank.parquet"
    };
    let signature_path = work_dir.join(signature_name);

    let rank_stage = rank_stage(config, effects_path.clone(), rank, signature_path.clone())?;
    let statuses = run_with_store(config, extract, effects_path, extract_action, Some((rank_stage, rank_action)))?;
    for status in &statuses {
        match status {
            StageStatus::Ran(outcome) => info!(
                "  {}: {} rows -> {}",
                outcome.stage,
                outcome.rows,
                outcome.output.display()
            ),
            StageStatus::Reused { stage, output } => info!("  {}: reused {}", stage, output.display()),
        }
    }

    match metadata {
        Some(metadata) => {
            let output = work_dir.join("validation.csv");
            run_validate(
                config,
                &signature_path.to_string_lossy(),
                metadata,
                validate,
                &output.to_string_lossy(),
            )
        }
        None => {
            info!("No metadata given; skipping validation");
            Ok(())
        }
    }
}

fn run_check(signature_path: &str, shared_ids: Option<&str>) -> Result<()> {
    info!("Loading signature from: {}", signature_path);
    let signature = read_signature(signature_path)?;
    let reference = match shared_ids {
        Some(path) => Some(read_shared_ids(path)?),
        None => None,
    };

    let check = check_signature(&signature, reference.as_ref());
    for line in check.describe() {
        println!("{}", line);
    }
    if !check.is_ok() {
        return Err(SignatureError::InvalidSignature {
            reason: format!("{} failed the sanity checks", signature_path),
        });
    }
    Ok(())
}

/// CSV matrix -> dense store with row index = experiment id
fn run_convert(input: &str, output: &str, catalog: Option<&str>) -> Result<()> {
    info!("Loading effect matrix from: {}", input);
    let table = read_effect_csv(input)?;
    info!("  {} experiments x {} genes", table.n_experiments(), table.n_genes());

    if let Some(&bad) = table.experiment_ids().iter().find(|&&id| id < 0) {
        return Err(SignatureError::InvalidInput {
            reason: format!("experiment id {} is negative and cannot be a store row", bad),
        });
    }
    let n_rows = table
        .experiment_ids()
        .iter()
        .max()
        .map(|&m| m as usize + 1)
        .unwrap_or(0);

    let mut values = ndarray::Array2::from_elem((n_rows, table.n_genes()), f32::NAN);
    for (i, &id) in table.experiment_ids().iter().enumerate() {
        values.row_mut(id as usize).assign(&table.values().row(i));
    }
    let filled = table.n_experiments();
    if filled < n_rows {
        warn!("{} store rows have no experiment in the input and are NaN", n_rows - filled);
    }

    DenseMatrixFile::write_array(output, &values)?;
    let catalog_path = catalog
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("{}.genes.csv", output)));
    write_gene_catalog(&catalog_path, table.gene_symbols())?;

    info!("Store written to: {} ({} x {})", output, n_rows, table.n_genes());
    info!("Gene catalog written to: {}", catalog_path.display());
    Ok(())
}
