//! Concurrency gate bounding concurrent inference calls across all sessions.
//!
//! Inference calls cost seconds of GPU time; how many sessions exist is
//! unrelated to how many calls the server can absorb at once. The gate is
//! a counting semaphore with a bounded acquire wait.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::BridgeError;

/// RAII permit for one in-flight inference call. Dropping it releases the
/// slot, on success and error paths alike.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ConcurrencyGate {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait up to `timeout` for a permit.
    pub async fn acquire(&self, timeout: Duration) -> Result<GatePermit, BridgeError> {
        let waited_secs = timeout.as_secs();
        match tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(GatePermit { _permit: permit }),
            // The semaphore is never closed; treat a closed error the same
            // as exhaustion rather than panicking.
            Ok(Err(_)) | Err(_) => Err(BridgeError::GateTimeout { waited_secs }),
        }
    }
}
