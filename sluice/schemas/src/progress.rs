//! Progress event types for tracking batch execution

use serde::{Deserialize, Serialize};

/// Progress events emitted while a batch is applied
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Ingestion started
    Started {
        /// Name of the main dataset
        main: String,
    },
    /// The request id was already applied, stored results are returned
    PreviouslyProcessed {
        ingest_request_id: String,
    },
    /// Deduplication and versioning checks passed
    StagingValidated,
    /// A batch id was allocated for a data split
    BatchStarted {
        batch_id: i64,
        /// Position in the list of data splits
        position: usize,
    },
    /// The ingest plan of a data split was executed
    BatchCompleted {
        batch_id: i64,
        position: usize,
        /// Duration of the data split execution
        duration_ms: u64,
    },
    /// Ingestion completed and committed
    Completed {
        /// Total duration of the ingestion
        duration_ms: u64,
    },
}
