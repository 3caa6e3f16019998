//! Error types for reconciliation.

use thiserror::Error;

use crate::aws::ProviderFault;
use crate::types::ResourceKind;

/// Why a reconciliation could not reach the desired state.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The request's parameters are inconsistent; nothing was sent to the provider.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A resource the request depends on does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The supplied password was rejected by the account password policy.
    #[error("Password for user {user} does not conform to the account password policy")]
    PolicyViolation { user: String },

    /// Deletion is blocked by managed policies, which cannot be detached here.
    #[error(
        "All inline policies have been removed from {kind} {name}, but it still has managed \
         policies attached. Detach them through the console or CLI and try again."
    )]
    ManagedPolicyBlocked { kind: ResourceKind, name: String },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Any provider fault the classifier did not recognise, passed through verbatim.
    #[error(transparent)]
    Provider(#[from] ProviderFault),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// A failed reconciliation, with whether any mutation was committed before the
/// failure. Nothing is rolled back.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct ReconcileFailure {
    pub changed: bool,
    pub source: ReconcileError,
}

impl ReconcileFailure {
    pub fn new(changed: bool, source: ReconcileError) -> Self {
        Self { changed, source }
    }

    /// A failure that happened before anything was mutated.
    pub fn unchanged(source: impl Into<ReconcileError>) -> Self {
        Self::new(false, source.into())
    }
}
