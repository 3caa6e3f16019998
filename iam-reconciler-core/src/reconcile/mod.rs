//! Resource reconcilers and the helpers they share.

pub(crate) mod credentials;
pub(crate) mod group;
pub mod membership;
pub(crate) mod role;
pub(crate) mod user;

use log::{info, warn};

use crate::aws::{IamProvider, ProviderResult};
use crate::error::{ReconcileError, ReconcileResult};
use crate::fault::{classify, FaultKind};
use crate::types::ResourceKind;

pub(crate) use group::reconcile_group;
pub(crate) use role::reconcile_role;
pub(crate) use user::reconcile_user;

/// Where a resource was found in the inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Located {
    pub name: String,
    /// The resource was found under its requested new name, i.e. a previous run
    /// already applied the rename.
    pub already_renamed: bool,
}

/// Find a resource in an inventory snapshot.
///
/// The declared name wins whenever it exists. The new name is used if and only
/// if the declared name is absent, which lets an interrupted rename be re-run.
pub(crate) fn locate(names: &[String], name: &str, new_name: Option<&str>) -> Option<Located> {
    if names.iter().any(|n| n == name) {
        return Some(Located {
            name: name.to_string(),
            already_renamed: false,
        });
    }
    new_name
        .filter(|new_name| names.iter().any(|n| n == new_name))
        .map(|new_name| Located {
            name: new_name.to_string(),
            already_renamed: true,
        })
}

async fn delete_principal(
    provider: &dyn IamProvider,
    kind: ResourceKind,
    name: &str,
) -> ProviderResult<()> {
    match kind {
        ResourceKind::User => provider.delete_user(name).await,
        ResourceKind::Group => provider.delete_group(name).await,
        ResourceKind::Role => provider.delete_role(name).await,
    }
}

/// Delete a user, group or role.
///
/// If IAM refuses because policies are attached, every inline policy is deleted
/// and the deletion retried once. A second refusal means managed policies remain,
/// which this crate cannot detach.
pub(crate) async fn delete_with_policy_cleanup(
    provider: &dyn IamProvider,
    kind: ResourceKind,
    name: &str,
    changed: &mut bool,
) -> ReconcileResult<()> {
    match delete_principal(provider, kind, name).await {
        Ok(()) => {
            *changed = true;
            return Ok(());
        }
        Err(fault) if classify(&fault) == FaultKind::PoliciesAttached => {
            info!("{kind} {name} has policies attached, removing inline policies");
        }
        Err(fault) => return Err(fault.into()),
    }

    for policy in provider.list_inline_policies(kind, name).await? {
        info!("Deleting inline policy {policy} from {kind} {name}");
        provider.delete_inline_policy(kind, name, &policy).await?;
        *changed = true;
    }

    match delete_principal(provider, kind, name).await {
        Ok(()) => {
            *changed = true;
            Ok(())
        }
        Err(fault) if classify(&fault) == FaultKind::PoliciesAttached => {
            warn!("{kind} {name} still has managed policies attached");
            Err(ReconcileError::ManagedPolicyBlocked {
                kind,
                name: name.to_string(),
            })
        }
        Err(fault) => Err(fault.into()),
    }
}
