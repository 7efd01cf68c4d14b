//! Resolution of the datasets an ingestion touches: external references, auxiliary
//! dataset defaults, main schema derivation and schema evolution.

mod derivation;
mod evolution;
mod resolution;

pub(crate) use derivation::control_fields;
pub use derivation::{derive_main_schema, managed_fields};
pub use evolution::{evolve_schema, SchemaEvolutionResult};
pub use resolution::{complete_auxiliary_schemas, resolve_external_references, with_default_references};

/// Column holding the number of identical staging rows in the temp staging dataset
pub const DUPLICATE_COUNT_FIELD: &str = "ingest_duplicate_count";
