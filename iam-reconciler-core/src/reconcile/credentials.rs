//! Credential lifecycle for users: access keys and the console login profile.

use std::collections::BTreeMap;

use log::{debug, info};

use crate::aws::{IamProvider, ProviderFault, ProviderResult};
use crate::error::{ReconcileError, ReconcileResult};
use crate::fault::{classify, FaultKind, Lookup};
use crate::types::{AccessKey, AccessKeyState, CreatedAccessKey, KeyStatus, Sensitive};

/// Create access keys one at a time until the user holds `target` keys.
///
/// Never removes keys: when `current >= target` no call is made.
pub(crate) async fn create_keys_up_to(
    provider: &dyn IamProvider,
    user_name: &str,
    current: usize,
    target: usize,
    changed: &mut bool,
) -> ReconcileResult<Vec<CreatedAccessKey>> {
    let mut created = Vec::new();
    let mut count = current;
    while count < target {
        let key = provider.create_access_key(user_name).await?;
        info!("Created access key {} for user {user_name}", key.id);
        created.push(key);
        count += 1;
        *changed = true;
    }
    Ok(created)
}

/// Apply `state` to each listed key the user currently holds.
///
/// `remove` deletes the key whatever its status; `active`/`inactive` only call
/// the provider when the key's status differs. Ids the user does not hold are
/// skipped.
pub(crate) async fn apply_key_directive(
    provider: &dyn IamProvider,
    user_name: &str,
    current_keys: &[AccessKey],
    key_ids: &[String],
    state: AccessKeyState,
    changed: &mut bool,
) -> ReconcileResult<()> {
    for key_id in key_ids {
        let Some(key) = current_keys.iter().find(|k| &k.id == key_id) else {
            debug!("Access key {key_id} is not held by user {user_name}, skipping");
            continue;
        };

        if state == AccessKeyState::Remove {
            info!("Deleting access key {key_id} of user {user_name}");
            provider.delete_access_key(user_name, key_id).await?;
            *changed = true;
        } else if let Some(status) = state.target_status() {
            if key.status != status {
                info!("Setting access key {key_id} of user {user_name} to {status}");
                provider.update_access_key(user_name, key_id, status).await?;
                *changed = true;
            }
        }
    }
    Ok(())
}

/// Delete every access key the user holds.
pub(crate) async fn delete_all_keys(
    provider: &dyn IamProvider,
    user_name: &str,
    changed: &mut bool,
) -> ReconcileResult<()> {
    for key in provider.list_access_keys(user_name).await? {
        info!("Deleting access key {} of user {user_name}", key.id);
        provider.delete_access_key(user_name, &key.id).await?;
        *changed = true;
    }
    Ok(())
}

/// Current keys of a user as a map from key id to status.
pub(crate) async fn key_statuses(
    provider: &dyn IamProvider,
    user_name: &str,
) -> ProviderResult<BTreeMap<String, KeyStatus>> {
    Ok(provider
        .list_access_keys(user_name)
        .await?
        .into_iter()
        .map(|key| (key.id, key.status))
        .collect())
}

fn password_fault(user_name: &str, fault: ProviderFault) -> ReconcileError {
    match classify(&fault) {
        FaultKind::PasswordPolicy => ReconcileError::PolicyViolation {
            user: user_name.to_string(),
        },
        _ => fault.into(),
    }
}

/// Give a new user a console password.
pub(crate) async fn create_login_profile(
    provider: &dyn IamProvider,
    user_name: &str,
    password: &Sensitive,
) -> ReconcileResult<()> {
    provider
        .create_login_profile(user_name, password)
        .await
        .map_err(|fault| password_fault(user_name, fault))
}

/// Set the console password of an existing user, creating the login profile
/// if the user has none.
pub(crate) async fn set_password(
    provider: &dyn IamProvider,
    user_name: &str,
    password: &Sensitive,
) -> ReconcileResult<()> {
    match provider.update_login_profile(user_name, password).await {
        Ok(()) => {
            info!("Updated login profile of user {user_name}");
            Ok(())
        }
        Err(fault) if classify(&fault) == FaultKind::LoginProfileMissing => {
            info!("User {user_name} has no login profile, creating one");
            create_login_profile(provider, user_name, password).await
        }
        Err(fault) => Err(password_fault(user_name, fault)),
    }
}

/// Remove the user's login profile if it has one.
///
/// A profile that disappears between the probe and the delete counts as
/// already removed.
pub(crate) async fn delete_login_profile(
    provider: &dyn IamProvider,
    user_name: &str,
    changed: &mut bool,
) -> ReconcileResult<()> {
    if !Lookup::login_profile(provider.get_login_profile(user_name).await)?.is_found() {
        debug!("User {user_name} has no login profile");
        return Ok(());
    }

    info!("Deleting login profile of user {user_name}");
    if Lookup::login_profile(provider.delete_login_profile(user_name).await)?.is_found() {
        *changed = true;
    } else {
        debug!("Login profile of user {user_name} was already removed");
    }
    Ok(())
}
