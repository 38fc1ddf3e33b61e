//! Best-effort operator status reporting.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::BoxError;
use crate::types::{ConditionStatus, ConditionType};

/// Sink for the operator's cluster-wide status conditions.
///
/// Failures are logged by the caller and never change the outcome of a pass.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Set `condition` to `status` with a human readable message.
    async fn report(
        &self,
        condition: ConditionType,
        status: ConditionStatus,
        message: &str,
    ) -> Result<(), BoxError>;
}

/// Reporter that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingStatusReporter;

#[async_trait]
impl StatusReporter for LoggingStatusReporter {
    async fn report(
        &self,
        condition: ConditionType,
        status: ConditionStatus,
        message: &str,
    ) -> Result<(), BoxError> {
        info!(%condition, %status, message, "Operator status");
        Ok(())
    }
}

/// A recorded condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedCondition {
    pub status: ConditionStatus,
    pub message: String,
}

/// Reporter that keeps the latest value of every condition in memory.
#[derive(Debug, Default)]
pub struct InMemoryStatusReporter {
    conditions: RwLock<BTreeMap<ConditionType, ReportedCondition>>,
    history: RwLock<Vec<(ConditionType, ConditionStatus)>>,
}

impl InMemoryStatusReporter {
    /// Create a new in-memory reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest value of a condition.
    pub async fn condition(&self, condition: ConditionType) -> Option<ReportedCondition> {
        self.conditions.read().await.get(&condition).cloned()
    }

    /// Latest value of every condition.
    pub async fn conditions(&self) -> BTreeMap<ConditionType, ReportedCondition> {
        self.conditions.read().await.clone()
    }

    /// Every report in the order it was received.
    pub async fn history(&self) -> Vec<(ConditionType, ConditionStatus)> {
        self.history.read().await.clone()
    }
}

#[async_trait]
impl StatusReporter for InMemoryStatusReporter {
    async fn report(
        &self,
        condition: ConditionType,
        status: ConditionStatus,
        message: &str,
    ) -> Result<(), BoxError> {
        self.conditions.write().await.insert(
            condition,
            ReportedCondition {
                status,
                message: message.to_string(),
            },
        );
        self.history.write().await.push((condition, status));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_keeps_latest() -> Result<(), BoxError> {
        let reporter = InMemoryStatusReporter::new();
        reporter
            .report(ConditionType::Progressing, ConditionStatus::True, "removing")
            .await?;
        reporter
            .report(ConditionType::Progressing, ConditionStatus::False, "done")
            .await?;

        let latest = reporter.condition(ConditionType::Progressing).await;
        assert_eq!(
            latest,
            Some(ReportedCondition {
                status: ConditionStatus::False,
                message: "done".into(),
            })
        );
        assert_eq!(reporter.history().await.len(), 2);
        assert!(reporter.condition(ConditionType::Failing).await.is_none());
        Ok(())
    }
}
