//! Per-owner cap on concurrently streaming downloads.
//!
//! The gate is the only cross-request mutable state in the server. Every
//! increment and decrement happens under one mutex, and owners whose count
//! drops back to zero are removed so the map only holds active owners.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::debug;

use strongbox_core::OwnerId;

/// Returned by [`DownloadGate::admit`] when the owner is at the ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("owner {owner} already has {limit} downloads in flight")]
pub struct GateFull {
    pub owner: OwnerId,
    pub limit: usize,
}

struct GateInner {
    active: Mutex<HashMap<OwnerId, usize>>,
    max_per_owner: usize,
}

impl GateInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<OwnerId, usize>> {
        // The map holds plain counters, so a panic elsewhere cannot leave it
        // half-updated.
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Admission control for download streams, cheap to clone and share.
#[derive(Clone)]
pub struct DownloadGate {
    inner: Arc<GateInner>,
}

impl DownloadGate {
    /// Create a gate admitting at most `max_per_owner` concurrent streams per owner.
    pub fn new(max_per_owner: usize) -> Self {
        Self {
            inner: Arc::new(GateInner {
                active: Mutex::new(HashMap::new()),
                max_per_owner,
            }),
        }
    }

    /// Claim a stream slot for `owner`.
    ///
    /// The slot is held by the returned permit and released when it drops,
    /// whatever path the download takes.
    pub fn admit(&self, owner: &OwnerId) -> Result<DownloadPermit, GateFull> {
        let mut active = self.inner.lock();
        let count = active.get(owner).copied().unwrap_or(0);
        if count >= self.inner.max_per_owner {
            return Err(GateFull {
                owner: owner.clone(),
                limit: self.inner.max_per_owner,
            });
        }
        active.insert(owner.clone(), count + 1);
        debug!(owner = %owner, active = count + 1, "download admitted");

        Ok(DownloadPermit {
            inner: Arc::clone(&self.inner),
            owner: owner.clone(),
        })
    }

    /// Streams currently in flight for `owner`.
    pub fn active(&self, owner: &OwnerId) -> usize {
        self.inner.lock().get(owner).copied().unwrap_or(0)
    }

    /// Streams currently in flight across all owners.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().values().sum()
    }

    /// Owners with at least one stream in flight.
    pub fn tracked_owners(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn max_per_owner(&self) -> usize {
        self.inner.max_per_owner
    }
}

/// RAII slot in a [`DownloadGate`]; dropping it releases the slot exactly once.
pub struct DownloadPermit {
    inner: Arc<GateInner>,
    owner: OwnerId,
}

impl std::fmt::Debug for DownloadPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadPermit")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl Drop for DownloadPermit {
    fn drop(&mut self) {
        let mut active = self.inner.lock();
        match active.get_mut(&self.owner) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                active.remove(&self.owner);
            }
            None => {}
        }
    }
}
