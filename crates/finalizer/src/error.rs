//! Error types for the finalizer crate.
//!
//! Two layers: [`StoreError`] describes what the control-plane store said,
//! [`Error`] describes which step of the finalization handshake failed and
//! for which resource.

use std::time::Duration;

use thiserror::Error;

use crate::types::ResourceId;

/// Result type alias for finalizer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Opaque error returned by external collaborators (dependent removal, status reporting).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by a [`ResourceStore`](crate::store::ResourceStore).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{id} not found")]
    NotFound { id: ResourceId },

    #[error("{id} already exists")]
    AlreadyExists { id: ResourceId },

    /// The write carried a stale version token.
    #[error("operation cannot be fulfilled on {id}: the object has been modified (expected version {expected}, stored version {actual})")]
    Conflict {
        id: ResourceId,
        expected: u64,
        actual: u64,
    },

    #[error("internal error: {message}")]
    InternalError { message: String },

    #[error("request timed out: {message}")]
    Timeout { message: String },

    #[error("server timed out: {message}")]
    ServerTimeout {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("too many requests: {message}")]
    TooManyRequests {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("service unavailable: {message}")]
    ServiceUnavailable {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("unexpected EOF")]
    UnexpectedEof,

    #[error("connection reset by peer")]
    ConnectionReset,

    #[error("forbidden: {message}")]
    Forbidden { message: String },

    #[error("{message}")]
    Other { message: String },
}

impl StoreError {
    /// Create a not found error.
    pub fn not_found(id: &ResourceId) -> Self {
        Self::NotFound { id: id.clone() }
    }

    /// Create a version conflict error.
    pub fn conflict(id: &ResourceId, expected: u64, actual: u64) -> Self {
        Self::Conflict {
            id: id.clone(),
            expected,
            actual,
        }
    }

    /// Create a generic error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub const fn is_internal_error(&self) -> bool {
        matches!(self, Self::InternalError { .. })
    }

    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub const fn is_server_timeout(&self) -> bool {
        matches!(self, Self::ServerTimeout { .. })
    }

    pub const fn is_too_many_requests(&self) -> bool {
        matches!(self, Self::TooManyRequests { .. })
    }

    /// An EOF in the middle of a response, typically a dropped keep-alive connection.
    pub const fn is_probable_eof(&self) -> bool {
        matches!(self, Self::UnexpectedEof)
    }

    pub const fn is_connection_reset(&self) -> bool {
        matches!(self, Self::ConnectionReset)
    }

    /// Retry delay suggested by the server (a `Retry-After` header), if any.
    pub const fn suggested_delay(&self) -> Option<Duration> {
        match self {
            Self::ServerTimeout { retry_after, .. }
            | Self::TooManyRequests { retry_after, .. }
            | Self::ServiceUnavailable { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Finalizer error types.
///
/// Every variant names the resource it concerns so a failed pass can be
/// traced back from the caller's logs alone.
#[derive(Debug, Error)]
pub enum Error {
    /// The external dependent removal routine failed.
    #[error("unable to remove dependents of {id}: {source}")]
    RemovalFailed {
        id: ResourceId,
        #[source]
        source: BoxError,
    },

    /// Fetching the record from the store failed.
    #[error("failed to get {id}: {source}")]
    Fetch {
        id: ResourceId,
        #[source]
        source: StoreError,
    },

    /// A non-conflict error while writing the record.
    #[error("failed to update {id}: {source}")]
    Update {
        id: ResourceId,
        #[source]
        source: StoreError,
    },

    /// Every write attempt lost the optimistic-concurrency race.
    #[error("gave up updating {id} after {attempts} conflicting writes: {source}")]
    ConflictRetriesExhausted {
        id: ResourceId,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// Retracting the designated finalizer failed.
    #[error("unable to update finalizers in {id}: {source}")]
    RetractFailed {
        id: ResourceId,
        #[source]
        source: Box<Error>,
    },

    /// Waiting for the store to drop the record failed.
    #[error("unable to wait for {id} deletion: {source}")]
    AwaitDeletionFailed {
        id: ResourceId,
        #[source]
        source: Box<Error>,
    },

    /// The caller cancelled the operation.
    #[error("finalization of {id} cancelled")]
    Cancelled { id: ResourceId },

    /// The record could not be stamped with its checksum.
    #[error("unable to compute checksum of {id}: {reason}")]
    Checksum { id: ResourceId, reason: String },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create a dependent removal error.
    pub fn removal_failed(id: &ResourceId, source: BoxError) -> Self {
        Self::RemovalFailed {
            id: id.clone(),
            source,
        }
    }

    /// Create a fetch error.
    pub fn fetch(id: &ResourceId, source: StoreError) -> Self {
        Self::Fetch {
            id: id.clone(),
            source,
        }
    }

    /// Create an update error.
    pub fn update(id: &ResourceId, source: StoreError) -> Self {
        Self::Update {
            id: id.clone(),
            source,
        }
    }

    /// Wrap a marker retraction failure.
    pub fn retract_failed(id: &ResourceId, source: Self) -> Self {
        Self::RetractFailed {
            id: id.clone(),
            source: Box::new(source),
        }
    }

    /// Wrap a deletion confirmation failure.
    pub fn await_deletion_failed(id: &ResourceId, source: Self) -> Self {
        Self::AwaitDeletionFailed {
            id: id.clone(),
            source: Box::new(source),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(id: &ResourceId) -> Self {
        Self::Cancelled { id: id.clone() }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether this error, or the error it wraps, is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::RetractFailed { source, .. } | Self::AwaitDeletionFailed { source, .. } => {
                source.is_cancelled()
            }
            _ => false,
        }
    }

    /// The store error at the root of this error, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Fetch { source, .. }
            | Self::Update { source, .. }
            | Self::ConflictRetriesExhausted { source, .. } => Some(source),
            Self::RetractFailed { source, .. } | Self::AwaitDeletionFailed { source, .. } => {
                source.store_error()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ResourceId {
        ResourceId::new("ImageRegistry", "", "cluster")
    }

    #[test]
    fn test_suggested_delay_only_from_throttling_variants() {
        let delay = Duration::from_secs(10);
        let throttled = StoreError::TooManyRequests {
            message: "slow down".into(),
            retry_after: Some(delay),
        };
        assert_eq!(throttled.suggested_delay(), Some(delay));
        assert_eq!(StoreError::UnexpectedEof.suggested_delay(), None);
        assert_eq!(StoreError::other("boom").suggested_delay(), None);
    }

    #[test]
    fn test_wrapped_error_names_resource_and_cause() {
        let id = registry();
        let err = Error::retract_failed(
            &id,
            Error::fetch(&id, StoreError::Forbidden {
                message: "no access".into(),
            }),
        );
        let text = err.to_string();
        assert!(text.starts_with("unable to update finalizers in ImageRegistry cluster"));
        assert!(text.contains("failed to get ImageRegistry cluster"));
        assert!(text.contains("no access"));
    }

    #[test]
    fn test_cancellation_is_visible_through_wrappers() {
        let id = registry();
        let err = Error::await_deletion_failed(&id, Error::cancelled(&id));
        assert!(err.is_cancelled());
        assert!(!Error::fetch(&id, StoreError::ConnectionReset).is_cancelled());
    }

    #[test]
    fn test_store_error_walks_wrappers() {
        let id = registry();
        let err = Error::retract_failed(&id, Error::update(&id, StoreError::ConnectionReset));
        assert_eq!(err.store_error(), Some(&StoreError::ConnectionReset));
        assert!(Error::invalid_config("x").store_error().is_none());
    }
}
