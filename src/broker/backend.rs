//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single inference server
//! - Own its capacity counter (bounded in `[0, max_concurrent]`)
//! - Offer blocking and non-blocking slot reservation

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use url::Url;

use crate::broker::PoolError;

/// A single backend server.
#[derive(Debug)]
pub struct Backend {
    /// Base URL with no trailing slash.
    url: String,
    /// Maximum concurrent in-flight requests.
    max_concurrent: usize,
    /// One permit per free slot.
    slots: Arc<Semaphore>,
}

/// Point-in-time view of a backend's capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendSnapshot {
    pub url: String,
    pub max_concurrent: usize,
    pub in_flight: usize,
    pub available: usize,
}

impl Backend {
    /// Create a backend, normalizing the URL.
    pub fn new(url: &str, max_concurrent: usize) -> Result<Self, PoolError> {
        let url = normalize_url(url)?;
        Ok(Self {
            url,
            max_concurrent,
            slots: Arc::new(Semaphore::new(max_concurrent)),
        })
    }

    /// Base URL, e.g. `http://gpu-1:11434`.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of free slots right now.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Number of slots currently held by leases.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent.saturating_sub(self.available())
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    pub fn snapshot(&self) -> BackendSnapshot {
        let available = self.available();
        BackendSnapshot {
            url: self.url.clone(),
            max_concurrent: self.max_concurrent,
            in_flight: self.max_concurrent.saturating_sub(available),
            available,
        }
    }

    /// Take a slot if one is free, without waiting.
    pub(crate) fn try_reserve(&self) -> Option<OwnedSemaphorePermit> {
        self.slots.clone().try_acquire_owned().ok()
    }

    /// Wait for a slot. Dropping the returned future before it resolves
    /// leaves no slot reserved.
    pub(crate) async fn reserve(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.slots.clone().acquire_owned().await
    }

    /// Close the counter; pending and future waits fail.
    pub(crate) fn close(&self) {
        self.slots.close();
    }
}

/// Validate a backend URL and strip trailing slashes.
///
/// Only plain `http` is accepted: the relay client has no TLS connector.
fn normalize_url(raw: &str) -> Result<String, PoolError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = Url::parse(trimmed).map_err(|e| PoolError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" => Ok(trimmed.to_string()),
        other => Err(PoolError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {other:?}"),
        }),
    }
}
