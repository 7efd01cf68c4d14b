//! Prelude module that exports commonly used types and functions.
//!
//! This module provides a convenient way to import all the necessary
//! components with a single `use sluice_core::prelude::*;` statement.

pub use crate::{Error, Result};

// Planning
pub use crate::generator::{Generator, GeneratorResult};
pub use crate::logical_plan::{BoundPlan, LogicalPlan, Operation, Placeholder, PlaceholderValues};
pub use crate::planner::plan;

// Execution
pub use crate::clock::{Clock, FixedClock, SystemClock};
pub use crate::executor::{
    AnsiSink, Capability, CaseFolding, Executor, ExecutorError, RelationalSink, TabularData,
};
pub use crate::ingestor::{
    DataError, DataQualityError, ErrorCategory, ExecutionRegistry, IngestError, IngestStatus,
    Ingestor, IngestorResult,
};
pub use crate::statistics::StatisticName;

// Progress tracking
pub use crate::progress_tracker::{LoggingProgressTracker, ProgressTracker};

// Configuration
pub use crate::templating::{format_from_path, TemplateFormat, TemplateLoader};
