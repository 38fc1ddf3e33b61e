//! Classification of store errors seen while waiting for a deletion.
//!
//! Rules are evaluated in order and the first match decides. Anything no rule
//! claims is fatal.

use std::fmt;
use std::time::Duration;

use crate::error::StoreError;

/// Predicate over a store error.
pub type ErrorPredicate = fn(&StoreError) -> bool;

/// What a matching rule asks the poller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollAction {
    /// The record is gone; stop polling successfully.
    Finish,
    /// Transient failure; poll again at the normal interval.
    Retry,
    /// Poll again, waiting at least as long as the server asked.
    HonorDelay,
}

/// Classification of a single fetch error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollVerdict {
    Gone,
    Retry,
    RetryAfter(Duration),
    Fatal,
}

/// A named (predicate, action) pair.
#[derive(Clone, Copy)]
pub struct ClassifierRule {
    pub name: &'static str,
    pub predicate: ErrorPredicate,
    pub action: PollAction,
}

impl ClassifierRule {
    /// Create a new rule.
    pub const fn new(name: &'static str, predicate: ErrorPredicate, action: PollAction) -> Self {
        Self {
            name,
            predicate,
            action,
        }
    }
}

impl fmt::Debug for ClassifierRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifierRule")
            .field("name", &self.name)
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}

fn suggests_delay(error: &StoreError) -> bool {
    error.suggested_delay().is_some()
}

/// Ordered rule set.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<ClassifierRule>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self {
            rules: vec![
                ClassifierRule::new("not-found", StoreError::is_not_found, PollAction::Finish),
                ClassifierRule::new(
                    "internal-error",
                    StoreError::is_internal_error,
                    PollAction::Retry,
                ),
                ClassifierRule::new("timeout", StoreError::is_timeout, PollAction::Retry),
                ClassifierRule::new(
                    "server-timeout",
                    StoreError::is_server_timeout,
                    PollAction::Retry,
                ),
                ClassifierRule::new(
                    "too-many-requests",
                    StoreError::is_too_many_requests,
                    PollAction::Retry,
                ),
                ClassifierRule::new("probable-eof", StoreError::is_probable_eof, PollAction::Retry),
                ClassifierRule::new(
                    "connection-reset",
                    StoreError::is_connection_reset,
                    PollAction::Retry,
                ),
                ClassifierRule::new("suggests-delay", suggests_delay, PollAction::HonorDelay),
            ],
        }
    }
}

impl ErrorClassifier {
    /// Create a classifier with the default rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a classifier with no rules; every error is fatal.
    pub const fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule, evaluated after every existing one.
    #[must_use]
    pub fn with_rule(mut self, rule: ClassifierRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Insert a rule ahead of every existing one.
    #[must_use]
    pub fn with_priority_rule(mut self, rule: ClassifierRule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    /// The rules in evaluation order.
    pub fn rules(&self) -> &[ClassifierRule] {
        &self.rules
    }

    /// Classify a fetch error.
    pub fn classify(&self, error: &StoreError) -> PollVerdict {
        self.matching_rule(error)
            .map_or(PollVerdict::Fatal, |(_, verdict)| verdict)
    }

    /// The first rule that claims `error`, with the verdict it produces.
    pub fn matching_rule(&self, error: &StoreError) -> Option<(&ClassifierRule, PollVerdict)> {
        self.rules
            .iter()
            .filter(|rule| (rule.predicate)(error))
            .find_map(|rule| {
                let verdict = match rule.action {
                    PollAction::Finish => Some(PollVerdict::Gone),
                    PollAction::Retry => Some(PollVerdict::Retry),
                    PollAction::HonorDelay => error.suggested_delay().map(PollVerdict::RetryAfter),
                };
                verdict.map(|v| (rule, v))
            })
    }
}
