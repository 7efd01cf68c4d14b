//! # Sluice Core
//!
//! Planner and batch execution protocol of the sluice ingestion engine.
//!
//! An ingestion applies the rows of a staging dataset to a main dataset under an
//! [`IngestMode`](sluice_schemas::IngestMode). The [`generator::Generator`] compiles the
//! mode and datasets into [`logical_plan::LogicalPlan`]s, and the [`ingestor::Ingestor`]
//! drives an [`executor::Executor`] through them one batch at a time.
//!
//! ```
//! use sluice_core::prelude::*;
//! use sluice_schemas::{
//!     DataType, Dataset, Datasets, Field, IngestMode, NontemporalSnapshot, SchemaDefinition,
//! };
//!
//! let schema = SchemaDefinition::new(vec![
//!     Field::new("id", DataType::Int).with_primary_key(),
//!     Field::new("name", DataType::Varchar),
//! ]);
//! let datasets = Datasets::new(
//!     Dataset::new("main", schema.clone()),
//!     Dataset::new("staging", schema),
//! );
//!
//! let generator = Generator::builder()
//!     .mode(IngestMode::NontemporalSnapshot(NontemporalSnapshot::default()))
//!     .build();
//! let result = generator.generate_operations(&datasets).unwrap();
//!
//! assert_eq!(result.ingest_plan.len(), 2);
//! ```

pub mod case;
pub mod clock;
pub mod error;
pub mod executor;
pub mod extraction;
pub mod generator;
pub mod ingestor;
pub mod logical_plan;
pub mod planner;
pub mod prelude;
pub mod progress_tracker;
pub mod schema;
pub mod statistics;
pub mod templating;

pub use error::{Error, Result};
