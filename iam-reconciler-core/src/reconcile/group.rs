//! Group reconciliation.

use log::{debug, info};

use super::{delete_with_policy_cleanup, locate, Located};
use crate::aws::IamProvider;
use crate::error::{ReconcileError, ReconcileFailure, ReconcileResult};
use crate::fault::{classify, FaultKind};
use crate::types::{
    DesiredState, Inventory, Operation, Outcome, OutcomeDetails, PathChange, Rename,
    ResourceKind,
};

pub(crate) async fn reconcile_group(
    provider: &dyn IamProvider,
    inventory: &Inventory,
    desired: &DesiredState,
) -> Result<Outcome, ReconcileFailure> {
    let mut changed = false;
    let result = run(provider, inventory, desired, &mut changed).await;
    result.map_err(|source| ReconcileFailure::new(changed, source))
}

async fn run(
    provider: &dyn IamProvider,
    inventory: &Inventory,
    desired: &DesiredState,
    changed: &mut bool,
) -> ReconcileResult<Outcome> {
    let name = desired.name.as_str();

    if desired.operation == Operation::Absent {
        if locate(inventory.names(ResourceKind::Group), name, None).is_none() {
            debug!("Group {name} is already absent");
            return Ok(Outcome::new(
                false,
                OutcomeDetails::AlreadyAbsent {
                    kind: ResourceKind::Group,
                    name: name.to_string(),
                },
            ));
        }
        info!("Deleting group {name}");
        delete_with_policy_cleanup(provider, ResourceKind::Group, name, changed).await?;
        return Ok(Outcome::new(
            *changed,
            OutcomeDetails::GroupDeleted {
                group_name: name.to_string(),
            },
        ));
    }

    match locate(
        inventory.names(ResourceKind::Group),
        name,
        desired.new_name.as_deref(),
    ) {
        Some(located) => update(provider, desired, located, changed).await,
        None if desired.operation == Operation::Update => Err(ReconcileError::NotFound(format!(
            "Update failed. Group {name} doesn't exist"
        ))),
        None => {
            info!("Creating group {name} at path {}", desired.path);
            let group = provider.create_group(name, &desired.path).await?;
            *changed = true;
            Ok(Outcome::new(true, OutcomeDetails::GroupCreated { group }))
        }
    }
}

/// Rename and/or move an existing group with at most one update call.
async fn update(
    provider: &dyn IamProvider,
    desired: &DesiredState,
    located: Located,
    changed: &mut bool,
) -> ReconcileResult<Outcome> {
    let mut group_name = located.name;
    let current = match provider.get_group(&group_name).await {
        Ok(group) => group,
        // The snapshot can predate a rename made by an earlier run.
        Err(fault)
            if !located.already_renamed
                && matches!(
                    classify(&fault),
                    FaultKind::GroupMissing(_) | FaultKind::EntityMissing
                ) =>
        {
            let Some(new_name) = desired.new_name.clone() else {
                return Err(fault.into());
            };
            debug!("Group {group_name} no longer exists, continuing as {new_name}");
            group_name = new_name;
            provider.get_group(&group_name).await?
        }
        Err(fault) => return Err(fault.into()),
    };

    let new_path = desired
        .new_path
        .as_deref()
        .filter(|path| *path != current.path);
    let new_name = desired
        .new_name
        .as_deref()
        .filter(|new_name| *new_name != group_name);

    if new_name.is_none() && new_path.is_none() {
        debug!("Group {group_name} already matches the desired name and path");
        return Ok(Outcome::new(
            false,
            OutcomeDetails::GroupUpdated {
                path: current.path,
                group_name,
                renamed: None,
                moved: None,
            },
        ));
    }

    info!("Updating group {group_name}: name {new_name:?}, path {new_path:?}");
    provider.update_group(&group_name, new_name, new_path).await?;
    *changed = true;

    Ok(Outcome::new(
        true,
        OutcomeDetails::GroupUpdated {
            group_name: new_name.unwrap_or(&group_name).to_string(),
            path: new_path.unwrap_or(&current.path).to_string(),
            renamed: new_name.map(|new_name| Rename {
                old_name: group_name.clone(),
                new_name: new_name.to_string(),
            }),
            moved: new_path.map(|new_path| PathChange {
                old_path: current.path.clone(),
                new_path: new_path.to_string(),
            }),
        },
    ))
}
