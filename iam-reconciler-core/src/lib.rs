//! This crate provides the core logic of the IAM reconciler:
//! - the desired-state model and its validation
//! - fault classification of IAM errors
//! - idempotent reconcilers for users, groups and roles over an [`IamProvider`]
//!

mod aws;
pub mod commands;
mod error;
mod fault;
mod reconcile;
mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// Re-exports for a small, focused public API
pub use aws::{AwsIamClient, IamProvider, ProviderFault, ProviderResult};
pub use commands::{ConnectionOptions, IamReconcilerService};
pub use error::{ReconcileError, ReconcileFailure, ReconcileResult};
pub use fault::{classify, FaultKind, Lookup};
pub use reconcile::membership::MembershipDiff;
pub use types::{
    AccessKey, AccessKeyState, CreatedAccessKey, DesiredState, IamEntity, Inventory, KeyStatus,
    Operation, Outcome, OutcomeDetails, PasswordUpdatePolicy, PathChange, Rename, ResourceKind,
    Sensitive,
};
