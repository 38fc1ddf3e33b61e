//! Finalization coordinator.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::classify::ErrorClassifier;
use crate::config::FinalizerConfig;
use crate::error::{BoxError, Error, Result};
use crate::marker::FinalizerRetractor;
use crate::poller::DeletionPoller;
use crate::status::{LoggingStatusReporter, StatusReporter};
use crate::store::ResourceStore;
use crate::types::{ConditionStatus, ConditionType, FinalizeOutcome, ResourceRecord};

/// Removes the resources a record owns.
///
/// Implementations must be idempotent: a failed pass is retried in full on
/// the next reconciliation.
#[async_trait]
pub trait DependentRemover: Send + Sync {
    /// Remove everything `record` owns.
    async fn remove(&self, record: &ResourceRecord) -> std::result::Result<(), BoxError>;
}

/// Tears down a deleted record's dependents and releases its finalizer.
pub struct Finalizer {
    store: Arc<dyn ResourceStore>,
    remover: Arc<dyn DependentRemover>,
    status: Arc<dyn StatusReporter>,
    retractor: FinalizerRetractor,
    poller: DeletionPoller,
    config: FinalizerConfig,
}

impl Finalizer {
    /// Create a new finalizer.
    ///
    /// `classifier` decides how store errors are treated while waiting for
    /// the record to disappear.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        remover: Arc<dyn DependentRemover>,
        status: Arc<dyn StatusReporter>,
        classifier: ErrorClassifier,
        config: FinalizerConfig,
    ) -> Self {
        let retractor = FinalizerRetractor::new(config.finalizer.clone(), config.backoff());
        let poller = DeletionPoller::new(config.poll_interval()).with_classifier(classifier);
        Self {
            store,
            remover,
            status,
            retractor,
            poller,
            config,
        }
    }

    /// Run one finalization pass for `record`.
    ///
    /// Does nothing unless deletion has been requested and the record still
    /// carries this controller's finalizer. Otherwise removes dependents,
    /// retracts the finalizer and waits until the store has dropped the record.
    ///
    /// # Errors
    ///
    /// - [`Error::RemovalFailed`] if dependent removal fails; the finalizer is left in place
    /// - [`Error::RetractFailed`] if the finalizer could not be removed
    /// - [`Error::AwaitDeletionFailed`] if waiting for the deletion failed or was cancelled
    pub async fn finalize(
        &self,
        record: &ResourceRecord,
        cancel: &CancellationToken,
    ) -> Result<FinalizeOutcome> {
        let id = &record.id;

        if !record.is_pending_deletion() {
            debug!(resource = %id, "Not pending deletion");
            return Ok(FinalizeOutcome::NotPendingDeletion);
        }
        if !record.has_finalizer(self.retractor.finalizer()) {
            debug!(resource = %id, "Finalizer already removed");
            return Ok(FinalizeOutcome::AlreadyFinalized);
        }

        info!(resource = %id, "Finalizing");

        if let Err(e) = self.remove_dependents(record).await {
            self.report(
                ConditionType::Failing,
                ConditionStatus::True,
                "unable to remove registry",
            )
            .await;
            return Err(Error::removal_failed(id, e));
        }

        let retracted = self
            .retractor
            .retract(self.store.as_ref(), record, cancel)
            .await
            .map_err(|e| Error::retract_failed(id, e))?;

        let polled = self
            .poller
            .await_deletion(self.store.as_ref(), id, cancel)
            .await
            .map_err(|e| Error::await_deletion_failed(id, e))?;

        info!(
            resource = %id,
            write_attempts = retracted.attempts,
            poll_ticks = polled.ticks,
            "Finalized"
        );

        Ok(FinalizeOutcome::Finalized {
            write_attempts: retracted.attempts,
            poll_ticks: polled.ticks,
        })
    }

    async fn remove_dependents(&self, record: &ResourceRecord) -> std::result::Result<(), BoxError> {
        self.report(
            ConditionType::Progressing,
            ConditionStatus::True,
            "registry is being removed",
        )
        .await;
        self.remover.remove(record).await
    }

    /// Report a status condition, logging instead of failing.
    async fn report(&self, condition: ConditionType, status: ConditionStatus, message: &str) {
        if let Err(e) = self.status.report(condition, status, message).await {
            error!(
                %condition,
                %status,
                error = %e,
                "Unable to update cluster status"
            );
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &FinalizerConfig {
        &self.config
    }

    /// Get the store.
    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }
}

/// Builder for [`Finalizer`].
pub struct FinalizerBuilder {
    store: Option<Arc<dyn ResourceStore>>,
    remover: Option<Arc<dyn DependentRemover>>,
    status: Option<Arc<dyn StatusReporter>>,
    classifier: ErrorClassifier,
    config: FinalizerConfig,
}

impl FinalizerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            store: None,
            remover: None,
            status: None,
            classifier: ErrorClassifier::default(),
            config: FinalizerConfig::default(),
        }
    }

    /// Set the store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ResourceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the dependent remover.
    #[must_use]
    pub fn with_remover(mut self, remover: Arc<dyn DependentRemover>) -> Self {
        self.remover = Some(remover);
        self
    }

    /// Set a status reporter.
    #[must_use]
    pub fn with_status(mut self, status: Arc<dyn StatusReporter>) -> Self {
        self.status = Some(status);
        self
    }

    /// Replace the classifier used while waiting for deletion.
    #[must_use]
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: FinalizerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the finalizer name.
    #[must_use]
    pub fn finalizer(mut self, finalizer: impl Into<String>) -> Self {
        self.config.finalizer = finalizer.into();
        self
    }

    /// Build the finalizer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the store or remover is missing, or
    /// the configuration does not validate.
    pub fn build(self) -> Result<Finalizer> {
        let store = self
            .store
            .ok_or_else(|| Error::invalid_config("store is required"))?;
        let remover = self
            .remover
            .ok_or_else(|| Error::invalid_config("dependent remover is required"))?;
        let status = self
            .status
            .unwrap_or_else(|| Arc::new(LoggingStatusReporter));

        self.config.validate()?;

        Ok(Finalizer::new(
            store,
            remover,
            status,
            self.classifier,
            self.config,
        ))
    }
}

impl Default for FinalizerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
