//! In-memory IAM account for tests.
//!
//! [`FakeIamProvider`] keeps users, groups, roles and instance profiles in
//! memory and enforces the IAM rules the reconcilers depend on: deletes fail
//! with `DeleteConflict` while dependents remain, lookups of missing entities
//! fail with `NoSuchEntity`, users hold at most two access keys. Faults can
//! also be scripted per operation with [`FakeIamProvider::fail_next`]. Every
//! call, successful or not, is recorded.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::aws::{IamProvider, ProviderFault, ProviderResult};
use crate::types::{AccessKey, CreatedAccessKey, IamEntity, KeyStatus, ResourceKind, Sensitive};

const ACCOUNT_ID: &str = "123456789012";
const MAX_ACCESS_KEYS: usize = 2;

#[derive(Debug, Default, Clone)]
struct Policies {
    inline: BTreeSet<String>,
    managed: BTreeSet<String>,
}

impl Policies {
    fn any(&self) -> bool {
        !self.inline.is_empty() || !self.managed.is_empty()
    }
}

#[derive(Debug, Default, Clone)]
struct FakeUser {
    path: String,
    login_profile: bool,
    keys: Vec<(String, KeyStatus)>,
    policies: Policies,
}

#[derive(Debug, Default, Clone)]
struct FakeGroup {
    path: String,
    members: BTreeSet<String>,
    policies: Policies,
}

#[derive(Debug, Default, Clone)]
struct FakeRole {
    path: String,
    policies: Policies,
}

#[derive(Debug, Default)]
struct Account {
    users: BTreeMap<String, FakeUser>,
    groups: BTreeMap<String, FakeGroup>,
    roles: BTreeMap<String, FakeRole>,
    instance_profiles: BTreeMap<String, BTreeSet<String>>,
    key_sequence: u32,
    min_password_length: usize,
}

impl Account {
    fn policies_mut(&mut self, kind: ResourceKind, name: &str) -> Option<&mut Policies> {
        match kind {
            ResourceKind::User => self.users.get_mut(name).map(|u| &mut u.policies),
            ResourceKind::Group => self.groups.get_mut(name).map(|g| &mut g.policies),
            ResourceKind::Role => self.roles.get_mut(name).map(|r| &mut r.policies),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    account: Account,
    calls: Vec<(String, String)>,
    scripted: HashMap<String, VecDeque<ProviderFault>>,
}

/// Scriptable in-memory [`IamProvider`].
#[derive(Debug, Default)]
pub struct FakeIamProvider {
    state: Mutex<State>,
}

fn no_such_entity(operation: &str, message: String) -> ProviderFault {
    ProviderFault::new(operation, Some("NoSuchEntity"), message)
}

fn delete_conflict(operation: &str, message: &str) -> ProviderFault {
    ProviderFault::new(operation, Some("DeleteConflict"), message)
}

fn already_exists(operation: &str, message: String) -> ProviderFault {
    ProviderFault::new(operation, Some("EntityAlreadyExists"), message)
}

fn arn(kind: ResourceKind, path: &str, name: &str) -> String {
    format!("arn:aws:iam::{ACCOUNT_ID}:{kind}{path}{name}")
}

impl FakeIamProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a call and return the scripted fault for it, if any.
    fn begin(&self, operation: &str, args: &[&str]) -> ProviderResult<MutexGuard<'_, State>> {
        let mut state = self.state();
        state.calls.push((operation.to_string(), args.join(" ")));
        if let Some(fault) = state
            .scripted
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            return Err(fault);
        }
        Ok(state)
    }

    fn configure(self, f: impl FnOnce(&mut Account)) -> Self {
        f(&mut self.state().account);
        self
    }

    pub fn with_user(self, name: &str, path: &str) -> Self {
        self.configure(|account| {
            account.users.insert(
                name.to_string(),
                FakeUser {
                    path: path.to_string(),
                    ..FakeUser::default()
                },
            );
        })
    }

    pub fn with_group(self, name: &str, path: &str) -> Self {
        self.configure(|account| {
            account.groups.insert(
                name.to_string(),
                FakeGroup {
                    path: path.to_string(),
                    ..FakeGroup::default()
                },
            );
        })
    }

    pub fn with_role(self, name: &str, path: &str) -> Self {
        self.configure(|account| {
            account.roles.insert(
                name.to_string(),
                FakeRole {
                    path: path.to_string(),
                    ..FakeRole::default()
                },
            );
        })
    }

    pub fn with_instance_profile(self, name: &str) -> Self {
        self.configure(|account| {
            account
                .instance_profiles
                .entry(name.to_string())
                .or_default();
        })
    }

    pub fn with_role_in_instance_profile(self, profile: &str, role: &str) -> Self {
        self.configure(|account| {
            account
                .instance_profiles
                .entry(profile.to_string())
                .or_default()
                .insert(role.to_string());
        })
    }

    pub fn with_user_in_group(self, user: &str, group: &str) -> Self {
        self.configure(|account| {
            if let Some(g) = account.groups.get_mut(group) {
                g.members.insert(user.to_string());
            }
        })
    }

    pub fn with_access_key(self, user: &str, key_id: &str, status: KeyStatus) -> Self {
        self.configure(|account| {
            if let Some(u) = account.users.get_mut(user) {
                u.keys.push((key_id.to_string(), status));
            }
        })
    }

    pub fn with_login_profile(self, user: &str) -> Self {
        self.configure(|account| {
            if let Some(u) = account.users.get_mut(user) {
                u.login_profile = true;
            }
        })
    }

    pub fn with_inline_policy(self, kind: ResourceKind, principal: &str, policy: &str) -> Self {
        self.configure(|account| {
            if let Some(p) = account.policies_mut(kind, principal) {
                p.inline.insert(policy.to_string());
            }
        })
    }

    pub fn with_managed_policy(self, kind: ResourceKind, principal: &str, policy: &str) -> Self {
        self.configure(|account| {
            if let Some(p) = account.policies_mut(kind, principal) {
                p.managed.insert(policy.to_string());
            }
        })
    }

    /// Reject passwords shorter than `length` with `PasswordPolicyViolation`.
    pub fn with_min_password_length(self, length: usize) -> Self {
        self.configure(|account| account.min_password_length = length)
    }

    /// Make the next call to `operation` (e.g. `"CreateUser"`) fail with `fault`.
    pub fn fail_next(self, operation: &str, fault: ProviderFault) -> Self {
        self.state()
            .scripted
            .entry(operation.to_string())
            .or_default()
            .push_back(fault);
        self
    }

    /// Every call so far, as `"Operation arg1 arg2"`.
    pub fn calls(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .map(|(op, args)| {
                if args.is_empty() {
                    op.clone()
                } else {
                    format!("{op} {args}")
                }
            })
            .collect()
    }

    /// Calls other than `List*`/`Get*` reads.
    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| !call.starts_with("List") && !call.starts_with("Get"))
            .collect()
    }

    /// Number of calls made to `operation`.
    pub fn count(&self, operation: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|(op, _)| op == operation)
            .count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn has_user(&self, name: &str) -> bool {
        self.state().account.users.contains_key(name)
    }

    pub fn user_path(&self, name: &str) -> Option<String> {
        self.state().account.users.get(name).map(|u| u.path.clone())
    }

    pub fn has_login_profile(&self, name: &str) -> bool {
        self.state()
            .account
            .users
            .get(name)
            .is_some_and(|u| u.login_profile)
    }

    pub fn access_keys(&self, user: &str) -> Vec<(String, KeyStatus)> {
        self.state()
            .account
            .users
            .get(user)
            .map(|u| u.keys.clone())
            .unwrap_or_default()
    }

    pub fn user_groups(&self, user: &str) -> Vec<String> {
        self.state()
            .account
            .groups
            .iter()
            .filter(|(_, g)| g.members.contains(user))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.state().account.groups.contains_key(name)
    }

    pub fn group_path(&self, name: &str) -> Option<String> {
        self.state().account.groups.get(name).map(|g| g.path.clone())
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.state().account.roles.contains_key(name)
    }

    pub fn role_path(&self, name: &str) -> Option<String> {
        self.state().account.roles.get(name).map(|r| r.path.clone())
    }

    pub fn instance_profile_roles(&self, profile: &str) -> Vec<String> {
        self.state()
            .account
            .instance_profiles
            .get(profile)
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn user_missing(operation: &str, name: &str) -> ProviderFault {
    no_such_entity(operation, format!("The user with name {name} cannot be found."))
}

fn group_missing(operation: &str, name: &str) -> ProviderFault {
    no_such_entity(operation, format!("The group with name {name} cannot be found."))
}

fn role_missing(operation: &str, name: &str) -> ProviderFault {
    no_such_entity(operation, format!("The role with name {name} cannot be found."))
}

fn profile_missing(operation: &str, name: &str) -> ProviderFault {
    no_such_entity(operation, format!("Instance Profile {name} cannot be found."))
}

fn login_profile_missing(operation: &str, name: &str) -> ProviderFault {
    no_such_entity(
        operation,
        format!("Login Profile for User {name} cannot be found."),
    )
}

fn check_password(operation: &str, account: &Account, password: &Sensitive) -> ProviderResult<()> {
    if password.expose().len() < account.min_password_length {
        return Err(ProviderFault::new(
            operation,
            Some("PasswordPolicyViolation"),
            "Password does not conform to the account password policy.",
        ));
    }
    Ok(())
}

fn inline_policy_operation(kind: ResourceKind, verb: &str) -> String {
    let noun = match kind {
        ResourceKind::User => "User",
        ResourceKind::Group => "Group",
        ResourceKind::Role => "Role",
    };
    let plural = if verb == "List" { "Policies" } else { "Policy" };
    format!("{verb}{noun}{plural}")
}

#[async_trait]
impl IamProvider for FakeIamProvider {
    async fn list_users(&self) -> ProviderResult<Vec<String>> {
        let state = self.begin("ListUsers", &[])?;
        Ok(state.account.users.keys().cloned().collect())
    }

    async fn list_groups(&self) -> ProviderResult<Vec<String>> {
        let state = self.begin("ListGroups", &[])?;
        Ok(state.account.groups.keys().cloned().collect())
    }

    async fn list_roles(&self) -> ProviderResult<Vec<String>> {
        let state = self.begin("ListRoles", &[])?;
        Ok(state.account.roles.keys().cloned().collect())
    }

    async fn list_instance_profiles(&self) -> ProviderResult<Vec<String>> {
        let state = self.begin("ListInstanceProfiles", &[])?;
        Ok(state.account.instance_profiles.keys().cloned().collect())
    }

    async fn get_user(&self, user_name: &str) -> ProviderResult<IamEntity> {
        const OP: &str = "GetUser";
        let state = self.begin(OP, &[user_name])?;
        let user = state
            .account
            .users
            .get(user_name)
            .ok_or_else(|| user_missing(OP, user_name))?;
        Ok(IamEntity::new(
            user_name,
            user.path.as_str(),
            arn(ResourceKind::User, &user.path, user_name),
        ))
    }

    async fn create_user(&self, user_name: &str, path: &str) -> ProviderResult<IamEntity> {
        const OP: &str = "CreateUser";
        let mut state = self.begin(OP, &[user_name, path])?;
        if state.account.users.contains_key(user_name) {
            return Err(already_exists(
                OP,
                format!("User with name {user_name} already exists."),
            ));
        }
        state.account.users.insert(
            user_name.to_string(),
            FakeUser {
                path: path.to_string(),
                ..FakeUser::default()
            },
        );
        Ok(IamEntity::new(
            user_name,
            path,
            arn(ResourceKind::User, path, user_name),
        ))
    }

    async fn update_user(
        &self,
        user_name: &str,
        new_name: Option<&str>,
        new_path: Option<&str>,
    ) -> ProviderResult<()> {
        const OP: &str = "UpdateUser";
        let mut state = self.begin(
            OP,
            &[user_name, new_name.unwrap_or("-"), new_path.unwrap_or("-")],
        )?;
        let account = &mut state.account;
        if let Some(target) = new_name.filter(|n| *n != user_name) {
            if account.users.contains_key(target) {
                return Err(already_exists(
                    OP,
                    format!("User with name {target} already exists."),
                ));
            }
        }
        let mut user = account
            .users
            .remove(user_name)
            .ok_or_else(|| user_missing(OP, user_name))?;
        if let Some(path) = new_path {
            user.path = path.to_string();
        }
        let final_name = new_name.unwrap_or(user_name);
        if final_name != user_name {
            for group in account.groups.values_mut() {
                if group.members.remove(user_name) {
                    group.members.insert(final_name.to_string());
                }
            }
        }
        account.users.insert(final_name.to_string(), user);
        Ok(())
    }

    async fn delete_user(&self, user_name: &str) -> ProviderResult<()> {
        const OP: &str = "DeleteUser";
        let mut state = self.begin(OP, &[user_name])?;
        let account = &mut state.account;
        let user = account
            .users
            .get(user_name)
            .ok_or_else(|| user_missing(OP, user_name))?;
        if !user.keys.is_empty() {
            return Err(delete_conflict(
                OP,
                "Cannot delete entity, must delete access keys first.",
            ));
        }
        if user.login_profile {
            return Err(delete_conflict(
                OP,
                "Cannot delete entity, must delete login profile first.",
            ));
        }
        if account.groups.values().any(|g| g.members.contains(user_name)) {
            return Err(delete_conflict(
                OP,
                "Cannot delete entity, must remove users from group first.",
            ));
        }
        if user.policies.any() {
            return Err(delete_conflict(
                OP,
                "Cannot delete entity, must detach all policies first.",
            ));
        }
        account.users.remove(user_name);
        Ok(())
    }

    async fn get_login_profile(&self, user_name: &str) -> ProviderResult<()> {
        const OP: &str = "GetLoginProfile";
        let state = self.begin(OP, &[user_name])?;
        match state.account.users.get(user_name) {
            Some(user) if user.login_profile => Ok(()),
            Some(_) => Err(login_profile_missing(OP, user_name)),
            None => Err(user_missing(OP, user_name)),
        }
    }

    async fn create_login_profile(
        &self,
        user_name: &str,
        password: &Sensitive,
    ) -> ProviderResult<()> {
        const OP: &str = "CreateLoginProfile";
        let mut state = self.begin(OP, &[user_name])?;
        check_password(OP, &state.account, password)?;
        let user = state
            .account
            .users
            .get_mut(user_name)
            .ok_or_else(|| user_missing(OP, user_name))?;
        if user.login_profile {
            return Err(already_exists(
                OP,
                format!("Login Profile for user {user_name} already exists."),
            ));
        }
        user.login_profile = true;
        Ok(())
    }

    async fn update_login_profile(
        &self,
        user_name: &str,
        password: &Sensitive,
    ) -> ProviderResult<()> {
        const OP: &str = "UpdateLoginProfile";
        let state = self.begin(OP, &[user_name])?;
        match state.account.users.get(user_name) {
            Some(user) if user.login_profile => check_password(OP, &state.account, password),
            Some(_) => Err(login_profile_missing(OP, user_name)),
            None => Err(user_missing(OP, user_name)),
        }
    }

    async fn delete_login_profile(&self, user_name: &str) -> ProviderResult<()> {
        const OP: &str = "DeleteLoginProfile";
        let mut state = self.begin(OP, &[user_name])?;
        match state.account.users.get_mut(user_name) {
            Some(user) if user.login_profile => {
                user.login_profile = false;
                Ok(())
            }
            Some(_) => Err(login_profile_missing(OP, user_name)),
            None => Err(user_missing(OP, user_name)),
        }
    }

    async fn list_access_keys(&self, user_name: &str) -> ProviderResult<Vec<AccessKey>> {
        const OP: &str = "ListAccessKeys";
        let state = self.begin(OP, &[user_name])?;
        let user = state
            .account
            .users
            .get(user_name)
            .ok_or_else(|| user_missing(OP, user_name))?;
        Ok(user
            .keys
            .iter()
            .map(|(id, status)| AccessKey {
                id: id.clone(),
                status: *status,
                user_name: user_name.to_string(),
            })
            .collect())
    }

    async fn create_access_key(&self, user_name: &str) -> ProviderResult<CreatedAccessKey> {
        const OP: &str = "CreateAccessKey";
        let mut state = self.begin(OP, &[user_name])?;
        let account = &mut state.account;
        account.key_sequence += 1;
        let sequence = account.key_sequence;
        let user = account
            .users
            .get_mut(user_name)
            .ok_or_else(|| user_missing(OP, user_name))?;
        if user.keys.len() >= MAX_ACCESS_KEYS {
            return Err(ProviderFault::new(
                OP,
                Some("LimitExceeded"),
                format!("Cannot exceed quota for AccessKeysPerUser: {MAX_ACCESS_KEYS}"),
            ));
        }
        let id = format!("AKIAFAKE{sequence:012}");
        user.keys.push((id.clone(), KeyStatus::Active));
        Ok(CreatedAccessKey {
            id,
            status: KeyStatus::Active,
            user_name: user_name.to_string(),
            secret_access_key: Sensitive::new(format!("fake-secret-{sequence}")),
        })
    }

    async fn update_access_key(
        &self,
        user_name: &str,
        key_id: &str,
        status: KeyStatus,
    ) -> ProviderResult<()> {
        const OP: &str = "UpdateAccessKey";
        let status_name = status.to_string();
        let mut state = self.begin(OP, &[user_name, key_id, &status_name])?;
        let user = state
            .account
            .users
            .get_mut(user_name)
            .ok_or_else(|| user_missing(OP, user_name))?;
        let key = user
            .keys
            .iter_mut()
            .find(|(id, _)| id == key_id)
            .ok_or_else(|| no_such_entity(OP, format!("The Access Key with id {key_id} cannot be found")))?;
        key.1 = status;
        Ok(())
    }

    async fn delete_access_key(&self, user_name: &str, key_id: &str) -> ProviderResult<()> {
        const OP: &str = "DeleteAccessKey";
        let mut state = self.begin(OP, &[user_name, key_id])?;
        let user = state
            .account
            .users
            .get_mut(user_name)
            .ok_or_else(|| user_missing(OP, user_name))?;
        let before = user.keys.len();
        user.keys.retain(|(id, _)| id != key_id);
        if user.keys.len() == before {
            return Err(no_such_entity(
                OP,
                format!("The Access Key with id {key_id} cannot be found"),
            ));
        }
        Ok(())
    }

    async fn list_groups_for_user(&self, user_name: &str) -> ProviderResult<Vec<String>> {
        const OP: &str = "ListGroupsForUser";
        let state = self.begin(OP, &[user_name])?;
        if !state.account.users.contains_key(user_name) {
            return Err(user_missing(OP, user_name));
        }
        Ok(state
            .account
            .groups
            .iter()
            .filter(|(_, g)| g.members.contains(user_name))
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn add_user_to_group(&self, group_name: &str, user_name: &str) -> ProviderResult<()> {
        const OP: &str = "AddUserToGroup";
        let mut state = self.begin(OP, &[group_name, user_name])?;
        if !state.account.users.contains_key(user_name) {
            return Err(user_missing(OP, user_name));
        }
        let group = state
            .account
            .groups
            .get_mut(group_name)
            .ok_or_else(|| group_missing(OP, group_name))?;
        group.members.insert(user_name.to_string());
        Ok(())
    }

    async fn remove_user_from_group(
        &self,
        group_name: &str,
        user_name: &str,
    ) -> ProviderResult<()> {
        const OP: &str = "RemoveUserFromGroup";
        let mut state = self.begin(OP, &[group_name, user_name])?;
        let group = state
            .account
            .groups
            .get_mut(group_name)
            .ok_or_else(|| group_missing(OP, group_name))?;
        if !group.members.remove(user_name) {
            return Err(user_missing(OP, user_name));
        }
        Ok(())
    }

    async fn get_group(&self, group_name: &str) -> ProviderResult<IamEntity> {
        const OP: &str = "GetGroup";
        let state = self.begin(OP, &[group_name])?;
        let group = state
            .account
            .groups
            .get(group_name)
            .ok_or_else(|| group_missing(OP, group_name))?;
        Ok(IamEntity::new(
            group_name,
            group.path.as_str(),
            arn(ResourceKind::Group, &group.path, group_name),
        ))
    }

    async fn create_group(&self, group_name: &str, path: &str) -> ProviderResult<IamEntity> {
        const OP: &str = "CreateGroup";
        let mut state = self.begin(OP, &[group_name, path])?;
        if state.account.groups.contains_key(group_name) {
            return Err(already_exists(
                OP,
                format!("Group with name {group_name} already exists."),
            ));
        }
        state.account.groups.insert(
            group_name.to_string(),
            FakeGroup {
                path: path.to_string(),
                ..FakeGroup::default()
            },
        );
        Ok(IamEntity::new(
            group_name,
            path,
            arn(ResourceKind::Group, path, group_name),
        ))
    }

    async fn update_group(
        &self,
        group_name: &str,
        new_name: Option<&str>,
        new_path: Option<&str>,
    ) -> ProviderResult<()> {
        const OP: &str = "UpdateGroup";
        let mut state = self.begin(
            OP,
            &[group_name, new_name.unwrap_or("-"), new_path.unwrap_or("-")],
        )?;
        let mut group = state
            .account
            .groups
            .remove(group_name)
            .ok_or_else(|| group_missing(OP, group_name))?;
        if let Some(path) = new_path {
            group.path = path.to_string();
        }
        state
            .account
            .groups
            .insert(new_name.unwrap_or(group_name).to_string(), group);
        Ok(())
    }

    async fn delete_group(&self, group_name: &str) -> ProviderResult<()> {
        const OP: &str = "DeleteGroup";
        let mut state = self.begin(OP, &[group_name])?;
        let group = state
            .account
            .groups
            .get(group_name)
            .ok_or_else(|| group_missing(OP, group_name))?;
        if !group.members.is_empty() {
            return Err(delete_conflict(
                OP,
                "Cannot delete entity, must remove users from group first.",
            ));
        }
        if group.policies.any() {
            return Err(delete_conflict(
                OP,
                "Cannot delete entity, must detach all policies first.",
            ));
        }
        state.account.groups.remove(group_name);
        Ok(())
    }

    async fn create_role(&self, role_name: &str, path: &str) -> ProviderResult<IamEntity> {
        const OP: &str = "CreateRole";
        let mut state = self.begin(OP, &[role_name, path])?;
        if state.account.roles.contains_key(role_name) {
            return Err(already_exists(
                OP,
                format!("Role with name {role_name} already exists."),
            ));
        }
        state.account.roles.insert(
            role_name.to_string(),
            FakeRole {
                path: path.to_string(),
                ..FakeRole::default()
            },
        );
        Ok(IamEntity::new(
            role_name,
            path,
            arn(ResourceKind::Role, path, role_name),
        ))
    }

    async fn delete_role(&self, role_name: &str) -> ProviderResult<()> {
        const OP: &str = "DeleteRole";
        let mut state = self.begin(OP, &[role_name])?;
        let account = &mut state.account;
        let role = account
            .roles
            .get(role_name)
            .ok_or_else(|| role_missing(OP, role_name))?;
        if account
            .instance_profiles
            .values()
            .any(|roles| roles.contains(role_name))
        {
            return Err(delete_conflict(
                OP,
                "Cannot delete entity, must remove roles from instance profile first.",
            ));
        }
        if role.policies.any() {
            return Err(delete_conflict(
                OP,
                "Cannot delete entity, must detach all policies first.",
            ));
        }
        account.roles.remove(role_name);
        Ok(())
    }

    async fn list_instance_profiles_for_role(
        &self,
        role_name: &str,
    ) -> ProviderResult<Vec<String>> {
        const OP: &str = "ListInstanceProfilesForRole";
        let state = self.begin(OP, &[role_name])?;
        if !state.account.roles.contains_key(role_name) {
            return Err(role_missing(OP, role_name));
        }
        Ok(state
            .account
            .instance_profiles
            .iter()
            .filter(|(_, roles)| roles.contains(role_name))
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn create_instance_profile(&self, profile_name: &str, path: &str) -> ProviderResult<()> {
        const OP: &str = "CreateInstanceProfile";
        let mut state = self.begin(OP, &[profile_name, path])?;
        if state.account.instance_profiles.contains_key(profile_name) {
            return Err(already_exists(
                OP,
                format!("Instance Profile {profile_name} already exists."),
            ));
        }
        state
            .account
            .instance_profiles
            .insert(profile_name.to_string(), BTreeSet::new());
        Ok(())
    }

    async fn add_role_to_instance_profile(
        &self,
        profile_name: &str,
        role_name: &str,
    ) -> ProviderResult<()> {
        const OP: &str = "AddRoleToInstanceProfile";
        let mut state = self.begin(OP, &[profile_name, role_name])?;
        if !state.account.roles.contains_key(role_name) {
            return Err(role_missing(OP, role_name));
        }
        let roles = state
            .account
            .instance_profiles
            .get_mut(profile_name)
            .ok_or_else(|| profile_missing(OP, profile_name))?;
        if !roles.is_empty() {
            return Err(ProviderFault::new(
                OP,
                Some("LimitExceeded"),
                "Cannot exceed quota for InstanceSessionsPerInstanceProfile: 1",
            ));
        }
        roles.insert(role_name.to_string());
        Ok(())
    }

    async fn remove_role_from_instance_profile(
        &self,
        profile_name: &str,
        role_name: &str,
    ) -> ProviderResult<()> {
        const OP: &str = "RemoveRoleFromInstanceProfile";
        let mut state = self.begin(OP, &[profile_name, role_name])?;
        let roles = state
            .account
            .instance_profiles
            .get_mut(profile_name)
            .ok_or_else(|| profile_missing(OP, profile_name))?;
        if !roles.remove(role_name) {
            return Err(role_missing(OP, role_name));
        }
        Ok(())
    }

    async fn delete_instance_profile(&self, profile_name: &str) -> ProviderResult<()> {
        const OP: &str = "DeleteInstanceProfile";
        let mut state = self.begin(OP, &[profile_name])?;
        let roles = state
            .account
            .instance_profiles
            .get(profile_name)
            .ok_or_else(|| profile_missing(OP, profile_name))?;
        if !roles.is_empty() {
            return Err(delete_conflict(
                OP,
                "Cannot delete entity, must remove roles from instance profile first.",
            ));
        }
        state.account.instance_profiles.remove(profile_name);
        Ok(())
    }

    async fn list_inline_policies(
        &self,
        kind: ResourceKind,
        principal_name: &str,
    ) -> ProviderResult<Vec<String>> {
        let op = inline_policy_operation(kind, "List");
        let mut state = self.begin(&op, &[principal_name])?;
        let policies = state
            .account
            .policies_mut(kind, principal_name)
            .ok_or_else(|| {
                no_such_entity(
                    &op,
                    format!("The {kind} with name {principal_name} cannot be found."),
                )
            })?;
        Ok(policies.inline.iter().cloned().collect())
    }

    async fn delete_inline_policy(
        &self,
        kind: ResourceKind,
        principal_name: &str,
        policy_name: &str,
    ) -> ProviderResult<()> {
        let op = inline_policy_operation(kind, "Delete");
        let mut state = self.begin(&op, &[principal_name, policy_name])?;
        let policies = state
            .account
            .policies_mut(kind, principal_name)
            .ok_or_else(|| {
                no_such_entity(
                    &op,
                    format!("The {kind} with name {principal_name} cannot be found."),
                )
            })?;
        if !policies.inline.remove(policy_name) {
            return Err(no_such_entity(
                &op,
                format!("The {kind} policy with name {policy_name} cannot be found."),
            ));
        }
        Ok(())
    }
}
