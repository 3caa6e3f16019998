//! Desired state, inventory snapshot and outcome types shared by the reconcilers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};

use crate::aws::{IamProvider, ProviderResult};
use crate::error::{ReconcileError, ReconcileResult};

/// The kind of IAM resource a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    User,
    Group,
    Role,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Group => "group",
            Self::Role => "role",
        };
        f.write_str(s)
    }
}

/// What the caller wants to happen to the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Present,
    Absent,
    Update,
}

/// Directive applied to a user's access keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKeyState {
    Create,
    Remove,
    Active,
    Inactive,
}

impl AccessKeyState {
    /// The key status this directive converges listed keys to, if it is a status change.
    pub fn target_status(self) -> Option<KeyStatus> {
        match self {
            Self::Active => Some(KeyStatus::Active),
            Self::Inactive => Some(KeyStatus::Inactive),
            Self::Create | Self::Remove => None,
        }
    }
}

impl FromStr for AccessKeyState {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "remove" => Ok(Self::Remove),
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            other => Err(ReconcileError::InvalidRequest(format!(
                "unknown access key state '{other}', expected one of create, remove, active, inactive"
            ))),
        }
    }
}

/// Access key status as IAM reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyStatus {
    Active,
    Inactive,
    /// Expired keys can no longer authenticate but can still be deactivated or deleted.
    Expired,
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("Active"),
            Self::Inactive => f.write_str("Inactive"),
            Self::Expired => f.write_str("Expired"),
        }
    }
}

/// When a supplied password is applied to a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordUpdatePolicy {
    #[default]
    Always,
    OnCreate,
}

/// A secret value. `Debug` never prints the value; serialisation does, because
/// the caller-facing outcome must hand back newly created credentials.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Sensitive(String);

impl Sensitive {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Sensitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sensitive(****)")
    }
}

impl Serialize for Sensitive {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Declared desired state for a single user, group or role.
#[derive(Debug, Clone)]
pub struct DesiredState {
    pub kind: ResourceKind,
    pub name: String,
    pub operation: Operation,
    pub path: String,
    pub new_name: Option<String>,
    pub new_path: Option<String>,
    pub password: Option<Sensitive>,
    pub update_password: PasswordUpdatePolicy,
    /// Desired group membership. `None` leaves membership alone; an empty list
    /// removes the user from every group.
    pub groups: Option<Vec<String>>,
    pub access_key_state: Option<AccessKeyState>,
    pub key_count: usize,
    pub access_key_ids: Vec<String>,
}

impl DesiredState {
    pub const DEFAULT_PATH: &'static str = "/";

    pub fn new(kind: ResourceKind, name: impl Into<String>, operation: Operation) -> Self {
        Self {
            kind,
            name: name.into(),
            operation,
            path: Self::DEFAULT_PATH.to_string(),
            new_name: None,
            new_path: None,
            password: None,
            update_password: PasswordUpdatePolicy::default(),
            groups: None,
            access_key_state: None,
            key_count: 1,
            access_key_ids: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_new_name(mut self, new_name: impl Into<String>) -> Self {
        self.new_name = Some(new_name.into());
        self
    }

    pub fn with_new_path(mut self, new_path: impl Into<String>) -> Self {
        self.new_path = Some(new_path.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Sensitive::new(password));
        self
    }

    pub fn with_update_password(mut self, policy: PasswordUpdatePolicy) -> Self {
        self.update_password = policy;
        self
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = Some(groups.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_access_keys(mut self, state: AccessKeyState, key_count: usize) -> Self {
        self.access_key_state = Some(state);
        self.key_count = key_count;
        self
    }

    pub fn with_access_key_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.access_key_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Check parameter combinations before any provider call is made.
    pub fn validate(&self) -> ReconcileResult<()> {
        if self.name.trim().is_empty() {
            return Err(ReconcileError::InvalidRequest(
                "a resource name is required".to_string(),
            ));
        }
        if self.kind != ResourceKind::User {
            if self.password.is_some() {
                return Err(ReconcileError::InvalidRequest(format!(
                    "a password is being specified when the resource kind is {}; passwords only apply to users",
                    self.kind
                )));
            }
            if self.access_key_state.is_some() || !self.access_key_ids.is_empty() {
                return Err(ReconcileError::InvalidRequest(format!(
                    "access keys are being modified when the resource kind is {}; access keys only apply to users",
                    self.kind
                )));
            }
            if self.groups.is_some() {
                return Err(ReconcileError::InvalidRequest(format!(
                    "group membership is being specified when the resource kind is {}; membership only applies to users",
                    self.kind
                )));
            }
        }
        if self.kind == ResourceKind::Role && self.operation == Operation::Update {
            return Err(ReconcileError::UnsupportedOperation(
                "roles cannot be renamed or moved; use present or absent".to_string(),
            ));
        }
        if matches!(
            self.access_key_state,
            Some(AccessKeyState::Active | AccessKeyState::Inactive)
        ) && self.access_key_ids.is_empty()
        {
            return Err(ReconcileError::InvalidRequest(
                "at least one access key id has to be given to use 'active' or 'inactive'"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Read-once snapshot of the names that exist in the account.
///
/// The snapshot is never updated as reconcilers mutate the account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub users: Vec<String>,
    pub groups: Vec<String>,
    pub roles: Vec<String>,
    pub instance_profiles: Vec<String>,
}

impl Inventory {
    pub async fn fetch(provider: &dyn IamProvider) -> ProviderResult<Self> {
        Ok(Self {
            users: provider.list_users().await?,
            groups: provider.list_groups().await?,
            roles: provider.list_roles().await?,
            instance_profiles: provider.list_instance_profiles().await?,
        })
    }

    pub fn names(&self, kind: ResourceKind) -> &[String] {
        match kind {
            ResourceKind::User => &self.users,
            ResourceKind::Group => &self.groups,
            ResourceKind::Role => &self.roles,
        }
    }
}

/// A user, group or role as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IamEntity {
    pub name: String,
    pub path: String,
    pub arn: String,
}

impl IamEntity {
    pub fn new(name: impl Into<String>, path: impl Into<String>, arn: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            arn: arn.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessKey {
    pub id: String,
    pub status: KeyStatus,
    pub user_name: String,
}

/// An access key as returned at creation, the only time its secret is visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedAccessKey {
    pub id: String,
    pub status: KeyStatus,
    pub user_name: String,
    pub secret_access_key: Sensitive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rename {
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathChange {
    pub old_path: String,
    pub new_path: String,
}

/// Result of a successful reconciliation.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub changed: bool,
    #[serde(flatten)]
    pub details: OutcomeDetails,
}

impl Outcome {
    pub fn new(changed: bool, details: OutcomeDetails) -> Self {
        Self { changed, details }
    }
}

/// Kind-specific payload of an [`Outcome`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum OutcomeDetails {
    UserCreated {
        user: IamEntity,
        password: Option<Sensitive>,
        access_keys: Vec<CreatedAccessKey>,
        groups: Option<Vec<String>>,
    },
    UserUpdated {
        user_name: String,
        renamed: Option<Rename>,
        moved: Option<PathChange>,
        groups: Option<Vec<String>>,
        keys: BTreeMap<String, KeyStatus>,
    },
    UserDeleted {
        user_name: String,
    },
    GroupCreated {
        group: IamEntity,
    },
    GroupUpdated {
        group_name: String,
        path: String,
        renamed: Option<Rename>,
        moved: Option<PathChange>,
    },
    GroupDeleted {
        group_name: String,
    },
    /// The resource was already absent; nothing was done.
    AlreadyAbsent {
        kind: ResourceKind,
        name: String,
    },
    Roles {
        roles: Vec<String>,
    },
}
