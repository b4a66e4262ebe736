//! Input/Output: CSV/TSV tables and Parquet signature files

mod csv;
pub mod parquet;

pub use self::csv::{
    read_effect_csv, read_experiment_list, read_gene_catalog, read_gene_map, read_metadata, read_shared_ids,
    read_symbol_list, write_gene_catalog, write_summary_csv, write_summary_text, write_validation_csv,
};
pub use self::parquet::{
    parquet_row_count, read_effect_table, read_signature, write_effect_table, write_signature, ColumnNaming,
    EffectTableWriter,
};
