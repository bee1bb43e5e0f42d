//! Exclusive reservation of one backend slot.

use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;

use crate::broker::backend::Backend;
use crate::observability::metrics;

/// A RAII guard over one capacity slot.
///
/// The slot goes back to the backend exactly once: on the first call to
/// [`Lease::release`] or when the lease is dropped, whichever comes first.
#[derive(Debug)]
pub struct Lease {
    backend: Arc<Backend>,
    permit: Option<OwnedSemaphorePermit>,
}

impl Lease {
    pub(crate) fn new(backend: Arc<Backend>, permit: OwnedSemaphorePermit) -> Self {
        metrics::record_in_flight(backend.url(), backend.in_flight());
        Self {
            backend,
            permit: Some(permit),
        }
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// Base URL of the leased backend.
    pub fn url(&self) -> &str {
        self.backend.url()
    }

    pub fn is_released(&self) -> bool {
        self.permit.is_none()
    }

    /// Return the slot. Calling this more than once has no effect.
    pub fn release(&mut self) {
        if let Some(permit) = self.permit.take() {
            drop(permit);
            metrics::record_in_flight(self.backend.url(), self.backend.in_flight());
            tracing::trace!(backend = %self.backend.url(), "Lease released");
        }
    }
}

impl Deref for Lease {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release();
    }
}
