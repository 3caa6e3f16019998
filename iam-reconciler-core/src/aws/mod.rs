//! IAM provider seam: the operations reconcilers issue against an account, the
//! fault type every provider raises, and the aws-sdk-iam backed implementation.

pub(crate) mod iam_client;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{AccessKey, CreatedAccessKey, IamEntity, KeyStatus, ResourceKind, Sensitive};

pub use iam_client::AwsIamClient;

/// A failed provider call.
///
/// `code` carries the provider's structured error code (for IAM, values such as
/// `NoSuchEntity` or `DeleteConflict`) when one was returned. Interpreting codes
/// and messages is the job of [`crate::fault`], nothing else should inspect them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("IAM {operation} failed: {message}")]
pub struct ProviderFault {
    pub operation: String,
    pub code: Option<String>,
    pub message: String,
}

impl ProviderFault {
    pub fn new(operation: &str, code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.to_string(),
            code: code.map(str::to_string),
            message: message.into(),
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderFault>;

/// Resource CRUD operations the reconcilers need from an IAM account.
///
/// Every method is a single provider round trip. Implementations must not retry
/// or swallow faults; the reconcilers decide what is benign.
#[async_trait]
pub trait IamProvider: Send + Sync {
    async fn list_users(&self) -> ProviderResult<Vec<String>>;
    async fn list_groups(&self) -> ProviderResult<Vec<String>>;
    async fn list_roles(&self) -> ProviderResult<Vec<String>>;
    async fn list_instance_profiles(&self) -> ProviderResult<Vec<String>>;

    async fn get_user(&self, user_name: &str) -> ProviderResult<IamEntity>;
    async fn create_user(&self, user_name: &str, path: &str) -> ProviderResult<IamEntity>;
    /// Rename and/or move a user. `None` leaves that dimension untouched.
    async fn update_user(
        &self,
        user_name: &str,
        new_name: Option<&str>,
        new_path: Option<&str>,
    ) -> ProviderResult<()>;
    async fn delete_user(&self, user_name: &str) -> ProviderResult<()>;

    async fn get_login_profile(&self, user_name: &str) -> ProviderResult<()>;
    async fn create_login_profile(&self, user_name: &str, password: &Sensitive)
        -> ProviderResult<()>;
    async fn update_login_profile(&self, user_name: &str, password: &Sensitive)
        -> ProviderResult<()>;
    async fn delete_login_profile(&self, user_name: &str) -> ProviderResult<()>;

    async fn list_access_keys(&self, user_name: &str) -> ProviderResult<Vec<AccessKey>>;
    async fn create_access_key(&self, user_name: &str) -> ProviderResult<CreatedAccessKey>;
    async fn update_access_key(
        &self,
        user_name: &str,
        key_id: &str,
        status: KeyStatus,
    ) -> ProviderResult<()>;
    async fn delete_access_key(&self, user_name: &str, key_id: &str) -> ProviderResult<()>;

    async fn list_groups_for_user(&self, user_name: &str) -> ProviderResult<Vec<String>>;
    async fn add_user_to_group(&self, group_name: &str, user_name: &str) -> ProviderResult<()>;
    async fn remove_user_from_group(&self, group_name: &str, user_name: &str)
        -> ProviderResult<()>;

    async fn get_group(&self, group_name: &str) -> ProviderResult<IamEntity>;
    async fn create_group(&self, group_name: &str, path: &str) -> ProviderResult<IamEntity>;
    /// Rename and/or move a group in one call. `None` leaves that dimension untouched.
    async fn update_group(
        &self,
        group_name: &str,
        new_name: Option<&str>,
        new_path: Option<&str>,
    ) -> ProviderResult<()>;
    async fn delete_group(&self, group_name: &str) -> ProviderResult<()>;

    async fn create_role(&self, role_name: &str, path: &str) -> ProviderResult<IamEntity>;
    async fn delete_role(&self, role_name: &str) -> ProviderResult<()>;

    async fn list_instance_profiles_for_role(&self, role_name: &str)
        -> ProviderResult<Vec<String>>;
    async fn create_instance_profile(&self, profile_name: &str, path: &str) -> ProviderResult<()>;
    async fn add_role_to_instance_profile(
        &self,
        profile_name: &str,
        role_name: &str,
    ) -> ProviderResult<()>;
    async fn remove_role_from_instance_profile(
        &self,
        profile_name: &str,
        role_name: &str,
    ) -> ProviderResult<()>;
    async fn delete_instance_profile(&self, profile_name: &str) -> ProviderResult<()>;

    /// List inline policy names embedded in a user, group or role
    async fn list_inline_policies(
        &self,
        kind: ResourceKind,
        principal_name: &str,
    ) -> ProviderResult<Vec<String>>;
    async fn delete_inline_policy(
        &self,
        kind: ResourceKind,
        principal_name: &str,
        policy_name: &str,
    ) -> ProviderResult<()>;
}
