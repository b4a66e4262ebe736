//! Data structures for signature processing

mod catalog;
mod effect_table;
mod metadata;
mod signature;

pub use catalog::{ExperimentList, GeneCatalog};
pub use effect_table::EffectTable;
pub use metadata::PerturbationMetadata;
pub use signature::{SignatureKind, SignatureMatrix};
