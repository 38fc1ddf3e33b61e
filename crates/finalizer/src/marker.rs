//! Conflict-safe removal of the designated finalizer.
//!
//! The write is conditional on the snapshot's version. A conflict always
//! sends the retractor back through a fresh read, and the filtered finalizer
//! list is recomputed from that read, so finalizers added concurrently by
//! other writers survive.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result, StoreError};
use crate::retry::{ConflictBackoff, sleep_or_cancel};
use crate::store::ResourceStore;
use crate::types::{ResourceId, ResourceRecord};

/// Result of a successful retraction.
#[derive(Debug, Clone)]
pub struct RetractReport {
    /// Conditional writes issued, including the successful one.
    pub attempts: u32,
    /// The record as stored by the successful write.
    pub stored: ResourceRecord,
}

/// Where the retraction loop stands.
#[derive(Debug)]
enum RetractState {
    /// Snapshot believed current, with the finalizer list derived from it.
    Fresh {
        record: ResourceRecord,
        finalizers: Vec<String>,
    },
    /// A fresh copy must be read before the next write.
    Fetching,
    /// Ready to issue a conditional write.
    Writing(ResourceRecord),
    /// The last write lost the race.
    Conflicted(StoreError),
}

/// Removes one finalizer from a record under optimistic concurrency.
#[derive(Debug, Clone)]
pub struct FinalizerRetractor {
    finalizer: String,
    backoff: ConflictBackoff,
}

impl FinalizerRetractor {
    /// Create a retractor for `finalizer`.
    pub fn new(finalizer: impl Into<String>, backoff: ConflictBackoff) -> Self {
        Self {
            finalizer: finalizer.into(),
            backoff,
        }
    }

    /// The finalizer this retractor removes.
    pub fn finalizer(&self) -> &str {
        &self.finalizer
    }

    /// Remove the finalizer from `record` in the store.
    ///
    /// # Errors
    ///
    /// - [`Error::Fetch`] if re-reading after a conflict fails
    /// - [`Error::Update`] on any non-conflict write error
    /// - [`Error::ConflictRetriesExhausted`] once every attempt has conflicted
    /// - [`Error::Cancelled`] if `cancel` fires
    /// - [`Error::Checksum`] if the record cannot be stamped
    pub async fn retract(
        &self,
        store: &dyn ResourceStore,
        record: &ResourceRecord,
        cancel: &CancellationToken,
    ) -> Result<RetractReport> {
        let id = &record.id;
        let steps = self.backoff.steps.max(1);
        let mut attempts = 0u32;

        if cancel.is_cancelled() {
            return Err(Error::cancelled(id));
        }

        let mut state = RetractState::Fresh {
            finalizers: record.without_finalizer(&self.finalizer),
            record: record.clone(),
        };

        loop {
            state = match state {
                RetractState::Fresh {
                    mut record,
                    finalizers,
                } => {
                    record.finalizers = finalizers;
                    record.stamp_checksum()?;
                    RetractState::Writing(record)
                }
                RetractState::Writing(record) => {
                    attempts = attempts.saturating_add(1);
                    debug!(
                        resource = %id,
                        attempt = attempts,
                        version = record.resource_version,
                        finalizers = ?record.finalizers,
                        "Writing finalizers"
                    );

                    match store.update(&record).await {
                        Ok(stored) => return Ok(RetractReport { attempts, stored }),
                        Err(e) if e.is_conflict() => RetractState::Conflicted(e),
                        Err(e) => return Err(Error::update(id, e)),
                    }
                }
                RetractState::Conflicted(source) => {
                    if attempts >= steps {
                        return Err(Error::ConflictRetriesExhausted {
                            id: id.clone(),
                            attempts,
                            source,
                        });
                    }

                    let delay = self.backoff.delay(attempts);
                    warn!(
                        resource = %id,
                        attempt = attempts,
                        delay_ms = delay.as_millis(),
                        error = %source,
                        "Finalizer update conflicted, re-reading"
                    );
                    if !sleep_or_cancel(delay, cancel).await {
                        return Err(Error::cancelled(id));
                    }
                    RetractState::Fetching
                }
                RetractState::Fetching => {
                    let fresh = fetch(store, id).await?;
                    RetractState::Fresh {
                        finalizers: fresh.without_finalizer(&self.finalizer),
                        record: fresh,
                    }
                }
            };
        }
    }
}

async fn fetch(store: &dyn ResourceStore, id: &ResourceId) -> Result<ResourceRecord> {
    store.get(id).await.map_err(|e| Error::fetch(id, e))
}
