//! Simulated deletion of a registry against an in-memory store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use regop_finalizer::{
    BoxError, ConditionType, DependentRemover, FinalizeOutcome, FinalizerBuilder,
    FinalizerConfig, InMemoryResourceStore, InMemoryStatusReporter, ReportedCondition,
    ResourceId, ResourceRecord, ResourceStore, StoreError,
};

const REGISTRY_KIND: &str = "ImageRegistry";
const REGISTRY_API_VERSION: &str = "imageregistry.operator.openshift.io/v1alpha1";
const DEPENDENT_NAMESPACE: &str = "openshift-image-registry";
const DEPENDENT_KINDS: [&str; 4] = ["Deployment", "Service", "Secret", "ConfigMap"];

/// What to simulate.
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub name: String,
    pub namespace: String,
    pub dependents: usize,
    pub extra_finalizers: Vec<String>,
    pub release_after: Duration,
    pub fail_removal: bool,
}

/// What happened.
#[derive(Debug)]
pub struct SimulationReport {
    pub outcome: std::result::Result<FinalizeOutcome, String>,
    pub remaining: usize,
    pub conditions: BTreeMap<ConditionType, ReportedCondition>,
}

impl SimulationReport {
    /// Render as JSON for the terminal.
    pub fn to_json(&self) -> serde_json::Value {
        let outcome = match &self.outcome {
            Ok(outcome) => serde_json::json!({ "ok": format!("{outcome:?}") }),
            Err(e) => serde_json::json!({ "error": e }),
        };
        let conditions: serde_json::Map<String, serde_json::Value> = self
            .conditions
            .iter()
            .map(|(condition, reported)| {
                (
                    condition.to_string(),
                    serde_json::json!({
                        "status": reported.status.to_string(),
                        "message": reported.message,
                    }),
                )
            })
            .collect();
        serde_json::json!({
            "outcome": outcome,
            "remaining_records": self.remaining,
            "conditions": conditions,
        })
    }
}

/// Deletes every record owned by the registry being finalized.
pub struct OwnedRecordRemover {
    store: Arc<InMemoryResourceStore>,
    fail: bool,
}

impl OwnedRecordRemover {
    pub fn new(store: Arc<InMemoryResourceStore>, fail: bool) -> Self {
        Self { store, fail }
    }
}

#[async_trait]
impl DependentRemover for OwnedRecordRemover {
    async fn remove(&self, record: &ResourceRecord) -> std::result::Result<(), BoxError> {
        if self.fail {
            return Err(format!("refusing to remove dependents of {}", record.id).into());
        }
        for id in self.store.owned_by(&record.id).await {
            match self.store.delete(&id).await {
                Ok(_) => debug!(resource = %id, "Removed dependent"),
                Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(Box::new(e)),
            }
        }
        Ok(())
    }
}

/// Seed the store, request deletion and run one finalization pass.
///
/// # Errors
///
/// Returns an error if seeding the store fails. A failed pass is reported
/// in [`SimulationReport::outcome`].
pub async fn run(
    plan: &SimulationPlan,
    config: FinalizerConfig,
    cancel: &CancellationToken,
) -> Result<SimulationReport> {
    let store = InMemoryResourceStore::new_arc();
    let status = Arc::new(InMemoryStatusReporter::new());
    let registry_id = ResourceId::new(REGISTRY_KIND, &plan.namespace, &plan.name);

    let registry = plan
        .extra_finalizers
        .iter()
        .fold(
            ResourceRecord::new(registry_id.clone(), REGISTRY_API_VERSION)
                .with_finalizer(&config.finalizer)
                .with_spec(serde_json::json!({ "replicas": 1 })),
            |record, f| record.with_finalizer(f.as_str()),
        );
    store
        .create(registry)
        .await
        .with_context(|| format!("Failed to create {registry_id}"))?;

    for (index, kind) in DEPENDENT_KINDS.iter().cycle().take(plan.dependents).enumerate() {
        let id = ResourceId::new(*kind, DEPENDENT_NAMESPACE, format!("image-registry-{index}"));
        store
            .create(ResourceRecord::new(id.clone(), "v1").with_owner(registry_id.clone()))
            .await
            .with_context(|| format!("Failed to create {id}"))?;
    }

    let deleting = store
        .delete(&registry_id)
        .await
        .with_context(|| format!("Failed to delete {registry_id}"))?
        .with_context(|| format!("{registry_id} was removed without finalization"))?;
    info!(resource = %registry_id, finalizers = ?deleting.finalizers, "Deletion requested");

    if !plan.extra_finalizers.is_empty() {
        spawn_peer_release(
            store.clone(),
            registry_id.clone(),
            plan.extra_finalizers.clone(),
            plan.release_after,
        );
    }

    let finalizer = FinalizerBuilder::new()
        .with_store(store.clone())
        .with_remover(Arc::new(OwnedRecordRemover::new(store.clone(), plan.fail_removal)))
        .with_status(status.clone())
        .with_config(config)
        .build()
        .context("Failed to build finalizer")?;

    let outcome = finalizer
        .finalize(&deleting, cancel)
        .await
        .map_err(|e| e.to_string());

    Ok(SimulationReport {
        outcome,
        remaining: store.len().await,
        conditions: status.conditions().await,
    })
}

/// Stand in for the other controllers holding finalizers on the registry.
fn spawn_peer_release(
    store: Arc<InMemoryResourceStore>,
    id: ResourceId,
    finalizers: Vec<String>,
    after: Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        loop {
            let Ok(mut record) = store.get(&id).await else {
                return;
            };
            record.finalizers.retain(|f| !finalizers.contains(f));
            match store.update(&record).await {
                Ok(_) => {
                    info!(resource = %id, released = ?finalizers, "Peer controllers released finalizers");
                    return;
                }
                Err(e) if e.is_conflict() => continue,
                Err(_) => return,
            }
        }
    });
}
