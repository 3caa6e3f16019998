//! Role reconciliation. Roles can be created or deleted, never renamed or moved.

use log::{debug, info};

use super::delete_with_policy_cleanup;
use crate::aws::IamProvider;
use crate::error::{ReconcileError, ReconcileFailure, ReconcileResult};
use crate::types::{DesiredState, Inventory, Operation, Outcome, OutcomeDetails, ResourceKind};

pub(crate) async fn reconcile_role(
    provider: &dyn IamProvider,
    inventory: &Inventory,
    desired: &DesiredState,
) -> Result<Outcome, ReconcileFailure> {
    let mut changed = false;
    let result = match desired.operation {
        Operation::Present => ensure_present(provider, inventory, desired, &mut changed).await,
        Operation::Absent => ensure_absent(provider, inventory, desired, &mut changed).await,
        Operation::Update => Err(ReconcileError::UnsupportedOperation(
            "role rename/path-update not available".to_string(),
        )),
    };
    result
        .map(|roles| Outcome::new(changed, OutcomeDetails::Roles { roles }))
        .map_err(|source| ReconcileFailure::new(changed, source))
}

/// Create the role and its same-named instance profile if missing.
/// Returns the account's role names after the change.
async fn ensure_present(
    provider: &dyn IamProvider,
    inventory: &Inventory,
    desired: &DesiredState,
    changed: &mut bool,
) -> ReconcileResult<Vec<String>> {
    let name = desired.name.as_str();

    if inventory.names(ResourceKind::Role).iter().any(|r| r == name) {
        debug!("Role {name} already exists");
    } else {
        info!("Creating role {name} at path {}", desired.path);
        provider.create_role(name, &desired.path).await?;
        *changed = true;

        if !inventory.instance_profiles.iter().any(|p| p == name) {
            info!("Creating instance profile {name} for role {name}");
            provider.create_instance_profile(name, &desired.path).await?;
            provider.add_role_to_instance_profile(name, name).await?;
        }
    }

    Ok(provider.list_roles().await?)
}

/// Detach the role from its instance profiles, delete it, and delete the
/// instance profile sharing its name. Returns the role names after the change.
async fn ensure_absent(
    provider: &dyn IamProvider,
    inventory: &Inventory,
    desired: &DesiredState,
    changed: &mut bool,
) -> ReconcileResult<Vec<String>> {
    let name = desired.name.as_str();

    if inventory.names(ResourceKind::Role).iter().any(|r| r == name) {
        for profile in provider.list_instance_profiles_for_role(name).await? {
            info!("Removing role {name} from instance profile {profile}");
            provider
                .remove_role_from_instance_profile(&profile, name)
                .await?;
            *changed = true;
        }
        info!("Deleting role {name}");
        delete_with_policy_cleanup(provider, ResourceKind::Role, name, changed).await?;
    }

    if inventory.instance_profiles.iter().any(|p| p == name) {
        info!("Deleting instance profile {name}");
        provider.delete_instance_profile(name).await?;
        *changed = true;
    }

    if *changed {
        Ok(provider.list_roles().await?)
    } else {
        debug!("Role {name} is already absent");
        Ok(inventory.roles.clone())
    }
}
