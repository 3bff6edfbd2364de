//! Harness error types

use stratus_core::provider::ProviderError;
use stratus_core::schema::TypeError;
use thiserror::Error;

use crate::lock::LockInfo;

/// Errors from the working-state lock
#[derive(Debug, Error)]
pub enum LockError {
    /// The state is locked by another command
    #[error("State is locked by {who} (lock ID: {lock_id}, operation: {operation})")]
    Locked {
        lock_id: String,
        who: String,
        operation: String,
    },

    #[error("Lock not found: {0}")]
    LockNotFound(String),

    /// Lock ID mismatch when trying to release
    #[error("Lock ID mismatch: expected {expected}, got {actual}")]
    LockMismatch { expected: String, actual: String },
}

impl LockError {
    /// Create a Locked error from a LockInfo
    pub fn locked(lock: &LockInfo) -> Self {
        Self::Locked {
            lock_id: lock.id.clone(),
            who: lock.who.clone(),
            operation: lock.operation.clone(),
        }
    }
}

/// Errors raised while running an acceptance test
#[derive(Debug, Error)]
pub enum AccTestError {
    #[error("test case is invalid: {0}")]
    Validation(String),

    #[error("pre-check failed: {0}")]
    PreCheck(String),

    /// Configuration does not match the provider schema
    #[error("{address}: {}", join(.errors))]
    Schema {
        address: String,
        errors: Vec<TypeError>,
    },

    #[error("{0}: unsupported resource type")]
    UnsupportedType(String),

    #[error("{0}: references could not be resolved")]
    UnresolvedReference(String),

    /// A bare name is shared by several resources
    #[error("{address}: reference to '{binding}' is ambiguous, use the full resource address")]
    AmbiguousReference { address: String, binding: String },

    /// A provider call failed during a command
    #[error("{command}: {source}")]
    Provider {
        command: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Invalid state file: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A resource address is missing from the working state
    #[error("{0} not found in state")]
    NotInState(String),

    #[error("Check failed: {0}")]
    Check(String),

    #[error("{message}\n\n{plan}")]
    NonEmptyPlan { message: &'static str, plan: String },

    #[error("Expected a non-empty plan, but got an empty plan")]
    EmptyPlan,

    #[error("Expected an error matching {pattern}, but got none")]
    ExpectedError { pattern: String },

    #[error("Expected an error matching {pattern}, got: {error}")]
    UnexpectedError { pattern: String, error: String },

    #[error("ImportStateVerify attributes not equivalent for {address}:\n{}", .diffs.join("\n"))]
    ImportVerify { address: String, diffs: Vec<String> },

    #[error("import state check failed: {0}")]
    ImportCheck(String),

    #[error("import ID could not be determined: {0}")]
    ImportId(String),

    #[error("Error calling skip function: {0}")]
    SkipFunc(String),

    #[error("Attributes not equivalent after ID-only refresh of {address}:\n{}", .diffs.join("\n"))]
    IdRefresh { address: String, diffs: Vec<String> },

    #[error("Step {index}/{total} error: {source}")]
    Step {
        index: usize,
        total: usize,
        #[source]
        source: Box<AccTestError>,
    },

    #[error("Error running post-test destroy, there may be dangling resources: {0}")]
    Destroy(#[source] Box<AccTestError>),

    #[error("Check destroy failed: {0}")]
    CheckDestroy(String),

    #[error("{}", join_all(.0))]
    Multiple(Vec<AccTestError>),
}

impl AccTestError {
    pub(crate) fn provider(command: &'static str) -> impl FnOnce(ProviderError) -> Self {
        move |source| Self::Provider { command, source }
    }

    /// The provider error behind this error, if any
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Provider { source, .. } => Some(source),
            Self::Step { source, .. } | Self::Destroy(source) => source.provider_error(),
            _ => None,
        }
    }
}

fn join(errors: &[TypeError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_all(errors: &[AccTestError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Result type for harness operations
pub type AccResult<T> = Result<T, AccTestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_error_names_the_holder() {
        let lock = LockInfo::new(crate::lock::Command::Apply);
        match LockError::locked(&lock) {
            LockError::Locked {
                lock_id, operation, ..
            } => {
                assert_eq!(lock_id, lock.id);
                assert_eq!(operation, "apply");
            }
            other => panic!("Expected Locked error, got {:?}", other),
        }
    }

    #[test]
    fn step_errors_are_numbered() {
        let err = AccTestError::Step {
            index: 2,
            total: 3,
            source: Box::new(AccTestError::EmptyPlan),
        };
        assert_eq!(
            err.to_string(),
            "Step 2/3 error: Expected a non-empty plan, but got an empty plan"
        );
    }

    #[test]
    fn provider_error_is_reachable_through_wrappers() {
        let err = AccTestError::Destroy(Box::new(AccTestError::Provider {
            command: "destroy",
            source: ProviderError::not_found("gone"),
        }));
        assert!(err.provider_error().is_some_and(|e| e.is_not_found()));
    }
}
