use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use super::IngestError;

/// Main datasets with a batch in flight in this session.
///
/// Shared between ingestors by reference; a second batch into a main dataset that is
/// already being written is rejected instead of interleaved.
#[derive(Debug, Default)]
pub struct ExecutionRegistry {
    running: Mutex<BTreeSet<String>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `main` as running until the returned guard is dropped
    pub fn register(self: &Arc<Self>, main: &str) -> Result<Registration, IngestError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if !running.insert(main.to_string()) {
            return Err(IngestError::AlreadyRunning(main.to_string()));
        }
        debug!("Registered batch into {main}");

        Ok(Registration {
            registry: Arc::clone(self),
            main: main.to_string(),
        })
    }

    pub fn is_running(&self, main: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(main)
    }
}

/// Deregisters its main dataset when dropped
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ExecutionRegistry>,
    main: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.main);
        debug!("Deregistered batch into {}", self.main);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_a_second_batch_into_the_same_main() {
        let registry = Arc::new(ExecutionRegistry::new());

        let registration = registry.register("orders").unwrap();
        assert!(matches!(
            registry.register("orders"),
            Err(IngestError::AlreadyRunning(main)) if main == "orders"
        ));
        assert!(registry.register("customers").is_ok());

        drop(registration);
        assert!(!registry.is_running("orders"));
        assert!(registry.register("orders").is_ok());
    }
}
