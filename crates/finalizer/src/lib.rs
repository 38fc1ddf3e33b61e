//! Finalizer handshake for registry resources.
//!
//! When a registry record is deleted, the store keeps it around for as long
//! as it carries finalizers. This crate implements the controller's side of
//! that handshake:
//!
//! 1. **Check** - only act on records that are pending deletion and still
//!    carry this controller's finalizer
//! 2. **Remove dependents** - delegate to an idempotent [`DependentRemover`]
//! 3. **Retract the finalizer** - conditional writes, re-reading on conflict
//!    ([`FinalizerRetractor`])
//! 4. **Confirm deletion** - poll until the store reports the record gone
//!    ([`DeletionPoller`])
//!
//! Transient store errors while polling are retried indefinitely; anything
//! the [`ErrorClassifier`] does not recognise ends the pass with an error and
//! leaves the finalizer for the next reconciliation to retry.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use regop_finalizer::{FinalizerBuilder, InMemoryResourceStore};
//! use tokio_util::sync::CancellationToken;
//!
//! let store = InMemoryResourceStore::new_arc();
//! let finalizer = FinalizerBuilder::new()
//!     .with_store(store.clone())
//!     .with_remover(Arc::new(my_remover))
//!     .build()?;
//!
//! let outcome = finalizer.finalize(&record, &CancellationToken::new()).await?;
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod finalizer;
pub mod marker;
pub mod poller;
pub mod retry;
pub mod status;
pub mod store;
pub mod types;

// Re-export main types
pub use classify::{ClassifierRule, ErrorClassifier, PollAction, PollVerdict};
pub use config::{BackoffSettings, FinalizerConfig};
pub use error::{BoxError, Error, Result, StoreError};
pub use finalizer::{DependentRemover, Finalizer, FinalizerBuilder};
pub use marker::{FinalizerRetractor, RetractReport};
pub use poller::{DEFAULT_POLL_INTERVAL, DeletionPoller, PollReport};
pub use retry::ConflictBackoff;
pub use status::{InMemoryStatusReporter, LoggingStatusReporter, ReportedCondition, StatusReporter};
pub use store::{InMemoryResourceStore, ResourceStore, StoreResult};
pub use types::{
    CHECKSUM_ANNOTATION, ConditionStatus, ConditionType, FinalizeOutcome, REGISTRY_FINALIZER,
    ResourceId, ResourceRecord,
};
