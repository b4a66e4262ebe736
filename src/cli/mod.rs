//! Command-line interface for rust_sigrank

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rust_sigrank")]
#[command(author = "SunJu Kim")]
#[command(version)]
#[command(about = "Perturbation signature extraction, ranking and replicate validation")]
#[command(disable_help_flag = true)]
#[command(disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON configuration file
    #[arg(long, global = true, value_name = "FILE",
        long_help = "JSON configuration file with per-stage parameters.\n\
            Missing fields take their defaults; command-line flags override the file.")]
    pub config: Option<String>,

    /// Number of worker threads (0 = auto)
    #[arg(short = 't', long, global = true, default_value = "0",
        long_help = "Number of worker threads.\n\
            0 picks the scheduler slot count (NSLOTS) when set,\n\
            otherwise the number of available cores minus one.")]
    pub threads: usize,
}

/// Source store and selection for extraction
#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    /// Source matrix store (experiments x genes)
    #[arg(short, long,
        long_help = "Source matrix store, experiments x genes.\n\
            Files ending in .h5/.hdf5 are read as HDF5 (build feature `hdf5`),\n\
            anything else as a dense matrix file written by `convert`.")]
    pub store: String,

    /// HDF5 dataset with effect sizes [default: l2fc]
    #[arg(long)]
    pub dataset: Option<String>,

    /// Gene catalog CSV/TSV (gene_idx, gene_name)
    #[arg(short, long)]
    pub catalog: String,

    /// Experiment list CSV/TSV (experiment_id column)
    #[arg(short, long)]
    pub experiments: String,

    /// Restrict extraction to these gene symbols
    #[arg(long, value_name = "FILE",
        long_help = "Gene symbols to keep, one per line (or a `symbol` column).\n\
            Catalog genes outside the list are not extracted.")]
    pub genes: Option<String>,

    /// Significance store used to gate genes
    #[arg(long, value_name = "STORE",
        long_help = "Store with significance values (e.g. adjusted p) of the same shape\n\
            as the source store. Only genes passing the threshold in at least\n\
            one selected experiment are extracted.")]
    pub significance: Option<String>,

    /// HDF5 dataset with significance values [default: padj]
    #[arg(long)]
    pub significance_dataset: Option<String>,

    /// Significance threshold [default: 0.05]
    #[arg(long)]
    pub significance_threshold: Option<f64>,

    /// Skip the memory and disk pre-flight checks
    #[arg(long)]
    pub no_resource_check: bool,
}

/// Harmonization and ranking options
#[derive(Args, Debug, Clone)]
pub struct RankArgs {
    /// Gene map CSV/TSV (gene symbol, entrezID)
    #[arg(short, long)]
    pub gene_map: String,

    /// Reference set of canonical ids to restrict genes to
    #[arg(long, value_name = "FILE")]
    pub shared_ids: Option<String>,

    /// Keep only the experiments in this list
    #[arg(long, value_name = "FILE")]
    pub keep_experiments: Option<String>,

    /// Write effect sizes instead of ranks
    #[arg(long)]
    pub effect_size: bool,

    /// Name columns V1, V2, ... instead of by experiment id
    #[arg(long)]
    pub positional_columns: bool,

    /// Experiments ranked per batch [default: 512]
    #[arg(long)]
    pub chunk_size: Option<usize>,
}

/// Replicate-consistency validation options
#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// Metadata column with experiment ids
    #[arg(long, default_value = "id")]
    pub id_column: String,

    /// Metadata column with perturbation names
    #[arg(long, default_value = "name")]
    pub name_column: String,

    /// Dataset label used in the summary
    #[arg(long, default_value = "signature")]
    pub dataset_name: String,

    /// Validity filter mode [default: pvalue]
    #[arg(long,
        long_help = "Validity filter applied to multi-member replicate groups.\n\
            pvalue:     valid when p < threshold (default 0.05)\n\
            rvalue:     valid when r > threshold (default 0.2)\n\
            percentile: valid when r is in the top threshold% of finite r (default 50)")]
    pub mode: Option<String>,

    /// Threshold for the filter mode
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Singleton handling [default: mark-invalid]
    #[arg(long,
        long_help = "How perturbations with a single experiment are handled.\n\
            mark-invalid: recorded with valid = 0 and counted (default)\n\
            trust:        recorded with valid = 1 and counted\n\
            exclude:      recorded with valid = 0 but left out of the summary totals")]
    pub singletons: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract an effect-size table from a matrix store
    #[command(
        long_about = "Extract an effect-size table from a matrix store.\n\n\
            Reads the selected experiments (rows) and catalog genes (columns) in\n\
            parallel chunks and writes a Parquet table with an experiment_id column\n\
            and one column per gene symbol.",
        after_long_help = "\
Examples:
  rust_sigrank extract -s effects.sgmx -c genes.csv -e experiments.csv -o effects.parquet

  # Only genes significant in at least one experiment
  rust_sigrank extract -s effects.sgmx -c genes.csv -e experiments.csv \\
    --significance padj.sgmx --significance-threshold 0.01 -o effects.parquet"
    )]
    Extract {
        #[command(flatten)]
        extract: ExtractArgs,

        /// Output Parquet file
        #[arg(short, long, default_value = "effects.parquet")]
        output: String,
    },

    /// Harmonize gene ids and rank-transform an effect table
    #[command(
        long_about = "Harmonize gene ids and rank-transform an effect table.\n\n\
            Maps symbols to canonical ids, averages symbols sharing an id, optionally\n\
            restricts to a shared id set, then ranks each experiment (1 = largest effect).",
        after_long_help = "\
Examples:
  rust_sigrank rank -i effects.parquet -g gene_map.tsv -o signature.parquet
  rust_sigrank rank -i effects.parquet -g gene_map.tsv --shared-ids shared.csv -o signature.parquet
  rust_sigrank rank -i effects.parquet -g gene_map.tsv --effect-size -o effects_by_id.parquet"
    )]
    Rank {
        /// Effect table (Parquet from `extract`, or CSV/TSV)
        #[arg(short, long)]
        input: String,

        #[command(flatten)]
        rank: RankArgs,

        /// Output Parquet file
        #[arg(short, long, default_value = "signature.parquet")]
        output: String,
    },

    /// Score replicate consistency of a signature table
    #[command(
        long_about = "Score replicate consistency of a signature table.\n\n\
            Each experiment is correlated with the mean of the other experiments of\n\
            the same perturbation; the filter mode decides which are valid.",
        after_long_help = "\
Examples:
  rust_sigrank validate -s signature.parquet -m metadata.csv -o validation.csv
  rust_sigrank validate -s signature.parquet -m metadata.csv --mode percentile --threshold 25"
    )]
    Validate {
        /// Signature Parquet file
        #[arg(short, long)]
        signature: String,

        /// Perturbation metadata CSV
        #[arg(short, long)]
        metadata: String,

        #[command(flatten)]
        validate: ValidateArgs,

        /// Output CSV (summaries are written next to it)
        #[arg(short, long, default_value = "validation.csv")]
        output: String,
    },

    /// Run extract, rank and (optionally) validate as stages
    #[command(
        long_about = "Run the full pipeline.\n\n\
            Stage outputs are reused when their completion manifest still matches\n\
            their inputs. --skip-* requires a complete stage and fails otherwise;\n\
            --force reruns everything.",
        after_long_help = "\
Examples:
  rust_sigrank run -s effects.sgmx -c genes.csv -e experiments.csv -g gene_map.tsv \\
    -m metadata.csv -w results/

  # Reuse a finished extraction
  rust_sigrank run -s effects.sgmx -c genes.csv -e experiments.csv -g gene_map.tsv \\
    -w results/ --skip-extract"
    )]
    Run {
        #[command(flatten)]
        extract: ExtractArgs,

        #[command(flatten)]
        rank: RankArgs,

        /// Perturbation metadata CSV; validation is skipped without it
        #[arg(short, long)]
        metadata: Option<String>,

        #[command(flatten)]
        validate: ValidateArgs,

        /// Output directory
        #[arg(short, long, default_value = "sigrank_out")]
        work_dir: String,

        /// Reuse the extraction output (must be complete)
        #[arg(long)]
        skip_extract: bool,

        /// Reuse the ranking output (must be complete)
        #[arg(long)]
        skip_rank: bool,

        /// Rerun every stage
        #[arg(long, conflicts_with_all = ["skip_extract", "skip_rank"])]
        force: bool,
    },

    /// Sanity-check a signature table
    #[command(
        long_about = "Sanity-check a signature table.\n\n\
            Reports gene ids outside an optional reference set and, for rank\n\
            signatures, experiments whose ranks are not a permutation of 1..G.",
        after_long_help = "\
Examples:
  rust_sigrank check -s signature.parquet --shared-ids shared.csv"
    )]
    Check {
        /// Signature Parquet file
        #[arg(short, long)]
        signature: String,

        /// Reference set of canonical ids
        #[arg(long)]
        shared_ids: Option<String>,
    },

    /// Convert a CSV/TSV matrix into a dense store file
    #[command(
        long_about = "Convert a CSV/TSV matrix into a dense store file.\n\n\
            Input: first column = experiment id, remaining columns = gene symbols.\n\
            Row i of the store holds experiment id i; ids absent from the input are\n\
            filled with NaN. A matching gene catalog is written alongside.",
        after_long_help = "\
Examples:
  rust_sigrank convert -i effects.csv -o effects.sgmx --catalog genes.csv"
    )]
    Convert {
        /// Input CSV/TSV matrix
        #[arg(short, long)]
        input: String,

        /// Output store file
        #[arg(short, long)]
        output: String,

        /// Gene catalog to write [default: <output>.genes.csv]
        #[arg(long)]
        catalog: Option<String>,
    },
}
