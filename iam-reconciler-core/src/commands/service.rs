//! IAM Reconciler Service Layer
//!
//! The service owns an [`IamProvider`] and exposes a single high-level
//! operation, [`IamReconcilerService::reconcile`], that adapters (the CLI,
//! tests) drive with a [`DesiredState`].

use std::sync::Arc;

use log::{debug, info};

use crate::aws::{AwsIamClient, IamProvider};
use crate::error::ReconcileFailure;
use crate::reconcile::{reconcile_group, reconcile_role, reconcile_user};
use crate::types::{DesiredState, Inventory, Outcome, ResourceKind};

/// Where to find AWS credentials and which region to talk to.
///
/// Unset fields fall back to the standard AWS environment and config files.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    pub profile: Option<String>,
    pub region: Option<String>,
}

/// Main service struct that holds the IAM provider and runs reconciliations.
pub struct IamReconcilerService {
    provider: Arc<dyn IamProvider>,
}

impl IamReconcilerService {
    /// Create a service backed by IAM. Unset options fall back to the default
    /// credential provider chain.
    pub async fn connect(options: &ConnectionOptions) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(profile) = &options.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(region) = &options.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let config = loader.load().await;

        Self::with_provider(Arc::new(AwsIamClient::new(aws_sdk_iam::Client::new(
            &config,
        ))))
    }

    /// Create a service over any provider, e.g. an in-memory fake.
    pub fn with_provider(provider: Arc<dyn IamProvider>) -> Self {
        Self { provider }
    }

    /// Converge the account toward `desired`.
    ///
    /// The request is validated before any provider call. The inventory is
    /// fetched once and handed to the reconciler for `desired.kind`. On failure
    /// the returned [`ReconcileFailure`] records whether anything was mutated
    /// before the error; nothing is rolled back.
    pub async fn reconcile(&self, desired: &DesiredState) -> Result<Outcome, ReconcileFailure> {
        desired.validate().map_err(ReconcileFailure::unchanged)?;

        let inventory = Inventory::fetch(self.provider.as_ref())
            .await
            .map_err(ReconcileFailure::unchanged)?;
        debug!(
            "Inventory: {} users, {} groups, {} roles, {} instance profiles",
            inventory.users.len(),
            inventory.groups.len(),
            inventory.roles.len(),
            inventory.instance_profiles.len()
        );

        info!(
            "Reconciling {} {} toward {:?}",
            desired.kind, desired.name, desired.operation
        );
        let provider = self.provider.as_ref();
        match desired.kind {
            ResourceKind::User => reconcile_user(provider, &inventory, desired).await,
            ResourceKind::Group => reconcile_group(provider, &inventory, desired).await,
            ResourceKind::Role => reconcile_role(provider, &inventory, desired).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::ProviderFault;
    use crate::error::ReconcileError;
    use crate::testing::FakeIamProvider;
    use crate::types::{Operation, OutcomeDetails};

    fn service(fake: FakeIamProvider) -> (IamReconcilerService, Arc<FakeIamProvider>) {
        let fake = Arc::new(fake);
        let service = IamReconcilerService::with_provider(fake.clone());
        (service, fake)
    }

    #[tokio::test]
    async fn test_invalid_request_makes_no_calls() {
        let (service, fake) = service(FakeIamProvider::new());
        let desired = DesiredState::new(ResourceKind::Group, "g1", Operation::Present)
            .with_password("Hunter2!Hunter2!");

        let failure = service.reconcile(&desired).await.unwrap_err();

        assert!(!failure.changed);
        assert!(matches!(failure.source, ReconcileError::InvalidRequest(_)));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_inventory_failure_is_unchanged() {
        let (service, fake) = service(FakeIamProvider::new().fail_next(
            "ListGroups",
            ProviderFault::new("ListGroups", Some("AccessDenied"), "not authorized"),
        ));
        let desired = DesiredState::new(ResourceKind::Group, "g1", Operation::Present);

        let failure = service.reconcile(&desired).await.unwrap_err();

        assert!(!failure.changed);
        assert!(matches!(failure.source, ReconcileError::Provider(_)));
        assert!(fake.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_dispatches_by_kind() {
        let (service, fake) = service(FakeIamProvider::new());

        let group = service
            .reconcile(&DesiredState::new(
                ResourceKind::Group,
                "g1",
                Operation::Present,
            ))
            .await
            .unwrap();
        let role = service
            .reconcile(&DesiredState::new(
                ResourceKind::Role,
                "r1",
                Operation::Present,
            ))
            .await
            .unwrap();

        assert!(matches!(group.details, OutcomeDetails::GroupCreated { .. }));
        assert!(matches!(role.details, OutcomeDetails::Roles { .. }));
        assert!(fake.has_group("g1"));
        assert!(fake.has_role("r1"));
    }
}
