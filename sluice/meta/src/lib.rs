//! Sluice - A temporal ingestion engine for milestoned batch loads
//!
//! This crate is a meta-package that re-exports the most commonly used
//! types and functions of the sluice crates. It provides a convenient
//! way to include all the necessary functionality in your project.
//!
//! # Features
//!
//! - **core**: Planner and batch execution protocol (enabled by default)
//! - **memory**: In-memory executor for tests and local runs
//! - **yaml**: YAML configuration support (enabled by default)
//! - **json**: JSON configuration support
//! - **toml**: TOML configuration support
//! - **schema_gen**: JSON schema of the configuration types
//! - **full**: All features
//!
//! # Examples
//!
//! ```no_run
//! use sluice::prelude::*;
//!
//! # async fn run<E: Executor>(executor: &mut E) -> sluice::Result<()> {
//! let schema = SchemaDefinition::new(vec![
//!     Field::new("id", DataType::Int).with_primary_key(),
//!     Field::new("amount", DataType::BigInt),
//!     Field::new("digest", DataType::Varchar),
//! ]);
//! let datasets = Datasets::new(
//!     Dataset::new("orders", SchemaDefinition::default()),
//!     Dataset::new("orders_staging", schema),
//! );
//!
//! let ingestor = Ingestor::builder()
//!     .mode(IngestMode::UnitemporalDelta(
//!         UnitemporalDelta::builder()
//!             .digest_field("digest".to_string())
//!             .transaction_milestoning(TransactionMilestoning::BatchId {
//!                 batch_id_in: "batch_id_in".to_string(),
//!                 batch_id_out: "batch_id_out".to_string(),
//!             })
//!             .build(),
//!     ))
//!     .build();
//!
//! for result in ingestor.ingest(executor, &datasets).await? {
//!     println!("batch {:?}: {:?}", result.batch_id, result.statistics);
//! }
//! # Ok(())
//! # }
//! ```

pub use sluice_schemas::{self as schemas};

// Re-exports from core
#[cfg(feature = "core")]
pub use sluice_core::{self as core, prelude as core_prelude};

#[cfg(feature = "core")]
pub use sluice_core::{
    error, executor, generator, ingestor, logical_plan, planner, statistics, Error, Result,
};

// Re-exports from memory
#[cfg(feature = "memory")]
pub use sluice_memory::{self as memory, MemoryExecutor};

/// Prelude module that exports commonly used types and functions.
///
/// This module provides a convenient way to import all the necessary
/// components with a single `use sluice::prelude::*;` statement.
pub mod prelude {
    pub use sluice_schemas::{
        Auditing, DataSplitRange, DataType, Dataset, DatasetReference, Datasets,
        DeduplicationStrategy, Field, IngestMode, IngestOptions, ScalarValue, SchemaDefinition,
        TransactionMilestoning, UnitemporalDelta, UnitemporalSnapshot, VersioningStrategy,
    };

    #[cfg(feature = "core")]
    pub use sluice_core::prelude::*;

    #[cfg(feature = "memory")]
    pub use sluice_memory::MemoryExecutor;
}
