//! Single-session guards for camera and screen hardware.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::types::ProviderError;

/// Rejects (rather than queues) a second capture against the same device.
#[derive(Debug, Clone)]
pub struct HardwareLock {
    resource: &'static str,
    sem: Arc<Semaphore>,
}

impl HardwareLock {
    pub fn new(resource: &'static str) -> Self {
        Self {
            resource,
            sem: Arc::new(Semaphore::new(1)),
        }
    }

    /// Hold the returned permit for the whole capture.
    pub fn try_acquire(&self) -> Result<OwnedSemaphorePermit, ProviderError> {
        self.sem
            .clone()
            .try_acquire_owned()
            .map_err(|_| ProviderError::Busy(format!("{} is in use by another invocation", self.resource)))
    }
}
