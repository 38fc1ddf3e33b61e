//! Waiting for the store to drop a record.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::classify::{ErrorClassifier, PollVerdict};
use crate::error::{Error, Result};
use crate::retry::sleep_or_cancel;
use crate::store::ResourceStore;
use crate::types::ResourceId;

/// Default interval between fetches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Result of a completed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    /// Fetches issued, including the one that saw the record gone.
    pub ticks: u32,
}

/// Polls the store at a fixed interval until a record is gone.
///
/// There is no iteration bound. The caller bounds the wait through the
/// cancellation token.
#[derive(Debug, Clone)]
pub struct DeletionPoller {
    interval: Duration,
    classifier: ErrorClassifier,
}

impl Default for DeletionPoller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl DeletionPoller {
    /// Create a poller with the default classifier.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            classifier: ErrorClassifier::default(),
        }
    }

    /// Replace the error classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// The interval between fetches.
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Block until the store reports `id` as not found.
    ///
    /// Every fetch happens one interval after the previous one. A server
    /// suggested delay longer than the interval stretches that gap to the
    /// suggested delay.
    ///
    /// # Errors
    ///
    /// - [`Error::Fetch`] on the first error the classifier deems fatal
    /// - [`Error::Cancelled`] if `cancel` fires
    pub async fn await_deletion(
        &self,
        store: &dyn ResourceStore,
        id: &ResourceId,
        cancel: &CancellationToken,
    ) -> Result<PollReport> {
        let mut ticks = 0u32;

        loop {
            if !sleep_or_cancel(self.interval, cancel).await {
                return Err(Error::cancelled(id));
            }
            ticks = ticks.saturating_add(1);

            let error = match store.get(id).await {
                Ok(record) => {
                    debug!(
                        resource = %id,
                        tick = ticks,
                        finalizers = ?record.finalizers,
                        "Still present, waiting for deletion"
                    );
                    continue;
                }
                Err(e) => e,
            };

            match self.classifier.classify(&error) {
                PollVerdict::Gone => {
                    debug!(resource = %id, tick = ticks, "Deletion confirmed");
                    return Ok(PollReport { ticks });
                }
                PollVerdict::Retry => {
                    warn!(resource = %id, tick = ticks, error = %error, "Transient error while waiting for deletion");
                }
                PollVerdict::RetryAfter(delay) => {
                    warn!(
                        resource = %id,
                        tick = ticks,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "Store asked to retry later"
                    );
                    let extra = delay.saturating_sub(self.interval);
                    if !extra.is_zero() && !sleep_or_cancel(extra, cancel).await {
                        return Err(Error::cancelled(id));
                    }
                }
                PollVerdict::Fatal => return Err(Error::fetch(id, error)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::error::StoreError;
    use crate::store::StoreResult;
    use crate::types::ResourceRecord;

    /// Store that replays a scripted sequence of fetch results, then reports
    /// the record as still present.
    struct ScriptedStore {
        script: Mutex<VecDeque<StoreResult<()>>>,
        fetches: Mutex<Vec<Instant>>,
    }

    impl ScriptedStore {
        fn new(script: impl IntoIterator<Item = StoreResult<()>>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                fetches: Mutex::new(Vec::new()),
            }
        }

        fn fetch_times(&self) -> Vec<Instant> {
            self.fetches.lock().map(|f| f.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl ResourceStore for ScriptedStore {
        async fn get(&self, id: &ResourceId) -> StoreResult<ResourceRecord> {
            if let Ok(mut fetches) = self.fetches.lock() {
                fetches.push(Instant::now());
            }
            let next = self
                .script
                .lock()
                .ok()
                .and_then(|mut script| script.pop_front())
                .unwrap_or(Ok(()));
            next.map(|()| ResourceRecord::new(id.clone(), "v1"))
        }

        async fn update(&self, record: &ResourceRecord) -> StoreResult<ResourceRecord> {
            Ok(record.clone())
        }
    }

    fn id() -> ResourceId {
        ResourceId::new("ImageRegistry", "", "cluster")
    }

    fn timeout() -> StoreError {
        StoreError::Timeout {
            message: "context deadline exceeded".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_gone_on_first_tick() -> Result<()> {
        let store = ScriptedStore::new([Err(StoreError::not_found(&id()))]);
        let start = Instant::now();

        let report = DeletionPoller::default()
            .await_deletion(&store, &id(), &CancellationToken::new())
            .await?;

        assert_eq!(report.ticks, 1);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_then_gone() -> Result<()> {
        let store = ScriptedStore::new([
            Err(timeout()),
            Err(timeout()),
            Err(StoreError::not_found(&id())),
        ]);
        let start = Instant::now();

        let report = DeletionPoller::default()
            .await_deletion(&store, &id(), &CancellationToken::new())
            .await?;

        assert_eq!(report.ticks, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(9));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_present_record_keeps_polling() -> Result<()> {
        let store = ScriptedStore::new([
            Ok(()),
            Ok(()),
            Err(StoreError::ConnectionReset),
            Ok(()),
            Err(StoreError::not_found(&id())),
        ]);

        let report = DeletionPoller::default()
            .await_deletion(&store, &id(), &CancellationToken::new())
            .await?;

        assert_eq!(report.ticks, 5);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_transient_errors_never_terminate() -> Result<()> {
        let transient = [
            StoreError::InternalError {
                message: "leader changed".into(),
            },
            StoreError::UnexpectedEof,
            StoreError::TooManyRequests {
                message: "throttled".into(),
                retry_after: None,
            },
        ];
        let mut script: Vec<StoreResult<()>> = transient
            .iter()
            .cycle()
            .take(200)
            .cloned()
            .map(Err)
            .collect();
        script.push(Err(StoreError::not_found(&id())));
        let store = ScriptedStore::new(script);

        let report = DeletionPoller::default()
            .await_deletion(&store, &id(), &CancellationToken::new())
            .await?;

        assert_eq!(report.ticks, 201);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_suggested_delay_stretches_gap() -> Result<()> {
        let store = ScriptedStore::new([
            Err(StoreError::ServiceUnavailable {
                message: "apiserver restarting".into(),
                retry_after: Some(Duration::from_secs(10)),
            }),
            Err(StoreError::not_found(&id())),
        ]);

        let report = DeletionPoller::default()
            .await_deletion(&store, &id(), &CancellationToken::new())
            .await?;

        assert_eq!(report.ticks, 2);
        let times = store.fetch_times();
        let gap = match (times.first(), times.get(1)) {
            (Some(first), Some(second)) => second.duration_since(*first),
            _ => Duration::ZERO,
        };
        assert_eq!(gap, Duration::from_secs(10));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_suggested_delay_keeps_interval() -> Result<()> {
        let store = ScriptedStore::new([
            Err(StoreError::ServiceUnavailable {
                message: "busy".into(),
                retry_after: Some(Duration::from_secs(1)),
            }),
            Err(StoreError::not_found(&id())),
        ]);
        let start = Instant::now();

        DeletionPoller::default()
            .await_deletion(&store, &id(), &CancellationToken::new())
            .await?;

        assert_eq!(start.elapsed(), Duration::from_secs(6));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_stops_polling() {
        let store = ScriptedStore::new([
            Err(timeout()),
            Err(StoreError::Forbidden {
                message: "rbac".into(),
            }),
            Err(StoreError::not_found(&id())),
        ]);

        let result = DeletionPoller::default()
            .await_deletion(&store, &id(), &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(Error::Fetch {
                source: StoreError::Forbidden { .. },
                ..
            })
        ));
        assert_eq!(store.fetch_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_infinite_wait() {
        let store = ScriptedStore::new([]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(31)).await;
            trigger.cancel();
        });

        let result = DeletionPoller::default()
            .await_deletion(&store, &id(), &cancel)
            .await;

        assert!(result.as_ref().is_err_and(Error::is_cancelled));
        assert_eq!(store.fetch_times().len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_suggested_delay() {
        let store = ScriptedStore::new([Err(StoreError::ServiceUnavailable {
            message: "apiserver restarting".into(),
            retry_after: Some(Duration::from_secs(60)),
        })]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });
        let start = Instant::now();

        let result = DeletionPoller::default()
            .await_deletion(&store, &id(), &cancel)
            .await;

        assert!(matches!(result, Err(Error::Cancelled { .. })));
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(store.fetch_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_interval() -> Result<()> {
        let store = ScriptedStore::new([Ok(()), Err(StoreError::not_found(&id()))]);
        let start = Instant::now();
        let poller = DeletionPoller::new(Duration::from_millis(500));
        assert_eq!(poller.interval(), Duration::from_millis(500));

        poller
            .await_deletion(&store, &id(), &CancellationToken::new())
            .await?;

        assert_eq!(start.elapsed(), Duration::from_secs(1));
        Ok(())
    }
}
