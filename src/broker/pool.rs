//! Backend pool and lease acquisition.
//!
//! # Responsibilities
//! - Own the ordered, fixed list of backends
//! - Hand out leases, preferring the least-loaded backend
//! - Block callers when every backend is at capacity
//! - Close all counters at shutdown

use futures_util::future::select_all;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::broker::backend::{Backend, BackendSnapshot};
use crate::broker::lease::Lease;
use crate::broker::{BrokerError, PoolError};
use crate::config::OllamaConfig;
use crate::observability::metrics::{self, AcquirePath};

/// The fixed set of backends plus the state needed to arbitrate them.
#[derive(Debug)]
pub struct Pool {
    backends: Vec<Arc<Backend>>,
    /// Serializes the ranking scan. Never held across an await.
    scan_lock: Mutex<()>,
}

impl Pool {
    /// Build a pool with the same concurrency limit on every backend.
    pub fn new<S: AsRef<str>>(urls: &[S], max_concurrent: usize) -> Result<Self, PoolError> {
        if urls.is_empty() {
            return Err(PoolError::Misconfigured(
                "no Ollama servers configured".to_string(),
            ));
        }
        if max_concurrent == 0 {
            return Err(PoolError::Misconfigured(
                "max_concurrent_per_server must be at least 1".to_string(),
            ));
        }

        let backends = urls
            .iter()
            .map(|url| Backend::new(url.as_ref(), max_concurrent).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        for backend in &backends {
            tracing::info!(
                backend = %backend.url(),
                max_concurrent,
                "Backend registered"
            );
        }

        Ok(Self {
            backends,
            scan_lock: Mutex::new(()),
        })
    }

    pub fn from_config(config: &OllamaConfig) -> Result<Self, PoolError> {
        Self::new(&config.servers, config.max_concurrent_per_server)
    }

    /// Backends in configuration order.
    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    /// Obtain a lease on some backend, waiting if all are full.
    ///
    /// Tries the backends with the most free slots first. When none has a
    /// free slot, waits on all of them at once and takes whichever frees up
    /// first, which is not necessarily the least loaded.
    ///
    /// There is no FIFO guarantee: when a slot frees, which of several
    /// blocked callers gets it is up to the scheduler.
    ///
    /// Fails with [`BrokerError::Cancelled`] if `cancel` fires first; in that
    /// case no slot stays reserved.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Lease, BrokerError> {
        if cancel.is_cancelled() {
            return Err(BrokerError::Cancelled);
        }
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }

        if let Some(lease) = self.try_acquire_least_loaded() {
            metrics::record_lease_acquired(AcquirePath::Fast);
            return Ok(lease);
        }

        let lease = self.wait_for_any_slot(cancel).await?;
        metrics::record_lease_acquired(AcquirePath::Slow);
        Ok(lease)
    }

    /// Pool-level form of releasing a lease.
    ///
    /// Equivalent to [`Lease::release`] or dropping the lease; the relay
    /// relies on those. Idempotent.
    pub fn release(&self, lease: &mut Lease) {
        lease.release();
    }

    /// Fast path: rank by free slots and reserve without waiting.
    ///
    /// Another task can take the slot between the scan and the reservation,
    /// so the ranking is best effort; we just move on to the next candidate.
    fn try_acquire_least_loaded(&self) -> Option<Lease> {
        let _guard = self.scan_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut candidates: Vec<(usize, usize)> = self
            .backends
            .iter()
            .enumerate()
            .map(|(index, backend)| (index, backend.available()))
            .filter(|(_, available)| *available > 0)
            .collect();

        // Most free slots first, then configuration order.
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        for (index, available) in candidates {
            let backend = &self.backends[index];
            if let Some(permit) = backend.try_reserve() {
                tracing::debug!(
                    backend = %backend.url(),
                    available,
                    "Lease acquired"
                );
                return Some(Lease::new(backend.clone(), permit));
            }
        }

        None
    }

    /// Slow path: race one wait per backend; first slot wins.
    async fn wait_for_any_slot(&self, cancel: &CancellationToken) -> Result<Lease, BrokerError> {
        tracing::debug!(
            backends = self.backends.len(),
            "All backends at capacity, waiting for a slot"
        );

        let waits = self.backends.iter().enumerate().map(|(index, backend)| {
            let backend = backend.clone();
            Box::pin(async move { backend.reserve().await.map(|permit| (index, permit)) })
        });

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::debug!("Slot wait cancelled");
                Err(BrokerError::Cancelled)
            }
            (result, _, losers) = select_all(waits) => {
                // Dropping the pending waits dequeues them; none holds a slot.
                drop(losers);

                let (index, permit) = result.map_err(|_| BrokerError::Closed)?;
                let backend = &self.backends[index];
                tracing::debug!(backend = %backend.url(), "Lease acquired after wait");
                Ok(Lease::new(backend.clone(), permit))
            }
        }
    }

    /// Capacity view of every backend, in configuration order.
    pub fn snapshot(&self) -> Vec<BackendSnapshot> {
        self.backends.iter().map(|b| b.snapshot()).collect()
    }

    /// Close every counter. Blocked and future acquisitions fail with
    /// [`BrokerError::Closed`]; outstanding leases still release normally.
    pub fn close(&self) {
        for backend in &self.backends {
            backend.close();
        }
        tracing::info!(backends = self.backends.len(), "Backend pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.backends.iter().any(|b| b.is_closed())
    }
}
