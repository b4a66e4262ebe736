//! Extraction of selected experiments and genes from a matrix store
//!
//! Rows are split into contiguous chunks, each read by its own worker with
//! a private read-only store handle; results are streamed into one Parquet
//! table. An optional significance gate narrows the gene set beforehand.

mod columns;
mod coordinator;
pub mod resources;
mod significance;

pub use columns::ColumnSelection;
pub use coordinator::{
    check_catalog_width, split_rows, ChunkJob, ExtractedChunk, ExtractionCoordinator, ExtractionReport,
};
pub use resources::ResourceEstimate;
pub use significance::{significant_columns, SignificanceReport};
