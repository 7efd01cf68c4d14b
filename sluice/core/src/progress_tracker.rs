use sluice_schemas::ProgressEvent;
use tracing::{info, instrument};

/// A trait for handling progress events while a batch is applied.
///
/// Implement this trait to forward progress to external systems or custom UIs.
///
/// # Examples
///
/// ```rust
/// use sluice_core::progress_tracker::ProgressTracker;
/// use sluice_schemas::ProgressEvent;
/// use std::sync::Mutex;
///
/// #[derive(Default)]
/// struct BatchCounter {
///     batches: Mutex<Vec<i64>>,
/// }
///
/// impl ProgressTracker for BatchCounter {
///     fn on_progress(&self, event: ProgressEvent) {
///         if let ProgressEvent::BatchCompleted { batch_id, .. } = event {
///             self.batches.lock().unwrap().push(batch_id);
///         }
///     }
/// }
/// ```
pub trait ProgressTracker: Send + Sync {
    /// Called when a progress event occurs during ingestion.
    ///
    /// Events arrive in order: `Started`, then either `PreviouslyProcessed` or
    /// `StagingValidated` followed by `BatchStarted`/`BatchCompleted` per data split, and
    /// finally `Completed` once the batch is committed.
    fn on_progress(&self, event: ProgressEvent);
}

/// Progress tracker logging every event with the `tracing` crate.
#[derive(Debug)]
pub struct LoggingProgressTracker;

impl ProgressTracker for LoggingProgressTracker {
    #[instrument(skip_all)]
    fn on_progress(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { main } => {
                info!("🚀 Ingestion into {main} started");
            }
            ProgressEvent::PreviouslyProcessed { ingest_request_id } => {
                info!("♻️  Request {ingest_request_id} was already applied, returning stored results");
            }
            ProgressEvent::StagingValidated => {
                info!("🔎 Staging data passed deduplication and versioning checks");
            }
            ProgressEvent::BatchStarted { batch_id, position } => {
                info!("⚙️  Applying batch {batch_id} (data split position: {position})");
            }
            ProgressEvent::BatchCompleted {
                batch_id,
                position: _,
                duration_ms,
            } => {
                info!(
                    "✅ Applied batch {batch_id} (took: {:.2}s)",
                    duration_ms as f64 / 1000.0
                );
            }
            ProgressEvent::Completed { duration_ms } => {
                info!(
                    "🎉 Ingestion completed (total time: {:.2}s)",
                    duration_ms as f64 / 1000.0
                );
            }
        }
    }
}
