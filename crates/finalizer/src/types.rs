//! Core types: resource identity, the record snapshot and its finalizer list.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Finalizer owned by the image registry operator.
pub const REGISTRY_FINALIZER: &str = "imageregistry.operator.openshift.io/finalizer";

/// Annotation holding the checksum of the record's spec as last written by the operator.
pub const CHECKSUM_ANNOTATION: &str = "imageregistry.operator.openshift.io/checksum";

/// Identity of a record in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: String,
    /// Empty for cluster-scoped resources.
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    /// Create a new resource identity.
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} {}", self.kind, self.name)
        } else {
            write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
        }
    }
}

/// A snapshot of a record as returned by the store.
///
/// Snapshots are possibly stale the moment they are read; the
/// `resource_version` is the token the store checks on conditional writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: ResourceId,
    pub api_version: String,
    /// Optimistic-concurrency version token. Zero means "never stored".
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub finalizers: Vec<String>,
    /// Set by the store once deletion has been requested.
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Record this one was created on behalf of.
    #[serde(default)]
    pub owner: Option<ResourceId>,
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl ResourceRecord {
    /// Create a new record that has not been stored yet.
    pub fn new(id: ResourceId, api_version: impl Into<String>) -> Self {
        Self {
            id,
            api_version: api_version.into(),
            resource_version: 0,
            finalizers: Vec::new(),
            deletion_timestamp: None,
            annotations: BTreeMap::new(),
            owner: None,
            spec: serde_json::Value::Null,
        }
    }

    /// Add a finalizer (no-op if already present).
    #[must_use]
    pub fn with_finalizer(mut self, finalizer: impl Into<String>) -> Self {
        let finalizer = finalizer.into();
        if !self.has_finalizer(&finalizer) {
            self.finalizers.push(finalizer);
        }
        self
    }

    /// Set the owning record.
    #[must_use]
    pub fn with_owner(mut self, owner: ResourceId) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Set the spec.
    #[must_use]
    pub fn with_spec(mut self, spec: serde_json::Value) -> Self {
        self.spec = spec;
        self
    }

    /// Whether deletion has been requested for this record.
    pub const fn is_pending_deletion(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Whether the given finalizer is present.
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// The finalizer list with `finalizer` removed.
    ///
    /// Every other entry is kept in its original order; repeated entries are
    /// collapsed so the result stays a set.
    pub fn without_finalizer(&self, finalizer: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.finalizers
            .iter()
            .filter(|f| f.as_str() != finalizer)
            .filter(|f| seen.insert(f.as_str()))
            .cloned()
            .collect()
    }

    /// Stamp the checksum annotation computed over the spec.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Checksum`] if the spec cannot be encoded.
    pub fn stamp_checksum(&mut self) -> Result<()> {
        let checksum = spec_checksum(&self.spec).map_err(|reason| Error::Checksum {
            id: self.id.clone(),
            reason,
        })?;
        self.annotations
            .insert(CHECKSUM_ANNOTATION.to_string(), checksum);
        Ok(())
    }
}

fn spec_checksum(spec: &serde_json::Value) -> std::result::Result<String, String> {
    let encoded = serde_json::to_vec(spec).map_err(|e| e.to_string())?;
    let digest = Sha256::digest(&encoded);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    Ok(format!("sha256:{hex}"))
}

/// Outcome of a successful finalization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalizeOutcome {
    /// Deletion has not been requested; nothing to do yet.
    NotPendingDeletion,
    /// The designated finalizer is already gone.
    AlreadyFinalized,
    /// Dependents removed, finalizer retracted and the record confirmed gone.
    Finalized {
        /// Conditional writes issued to retract the finalizer.
        write_attempts: u32,
        /// Fetches issued while waiting for the record to disappear.
        poll_ticks: u32,
    },
}

impl FinalizeOutcome {
    /// Whether this pass actually tore the resource down.
    pub const fn did_finalize(&self) -> bool {
        matches!(self, Self::Finalized { .. })
    }
}

/// Condition reported on the operator's cluster-wide status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConditionType {
    Available,
    Progressing,
    Failing,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "Available"),
            Self::Progressing => write!(f, "Progressing"),
            Self::Failing => write!(f, "Failing"),
        }
    }
}

/// State of a reported condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}
