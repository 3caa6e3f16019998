//! AWS IAM client wrapper implementing [`IamProvider`] over `aws-sdk-iam`.
//!
// TODO: MFA devices, signing certificates and SSH keys also block DeleteUser;
// they need list/delete calls here before user deletion can clean them up.

use async_trait::async_trait;
use aws_sdk_iam::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_iam::types::StatusType;
use aws_sdk_iam::Client as IamClient;

use crate::aws::{IamProvider, ProviderFault, ProviderResult};
use crate::types::{AccessKey, CreatedAccessKey, IamEntity, KeyStatus, ResourceKind, Sensitive};

/// Trust policy attached to roles created by the reconciler. IAM refuses to
/// create a role without one; authoring trust policies is outside this crate.
const EC2_ASSUME_ROLE_POLICY: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Principal":{"Service":["ec2.amazonaws.com"]},"Action":["sts:AssumeRole"]}]}"#;

pub struct AwsIamClient {
    client: IamClient,
}

impl AwsIamClient {
    pub fn new(client: IamClient) -> Self {
        Self { client }
    }
}

/// Convert an SDK error into a [`ProviderFault`], keeping the service error code
/// when the failure came back from IAM rather than the transport.
fn fault<E, R>(operation: &str, err: &SdkError<E, R>) -> ProviderFault
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err.as_service_error() {
        Some(service_err) => ProviderFault::new(
            operation,
            service_err.code(),
            service_err
                .message()
                .map_or_else(|| DisplayErrorContext(err).to_string(), str::to_string),
        ),
        None => ProviderFault::new(operation, None, DisplayErrorContext(err).to_string()),
    }
}

fn missing_field(operation: &str, field: &str) -> ProviderFault {
    ProviderFault::new(operation, None, format!("response did not include {field}"))
}

/// Map an IAM key status. A missing or unrecognised status is a fault rather
/// than a guess, so directives never act on a misread key.
fn key_status(operation: &str, status: Option<&StatusType>) -> ProviderResult<KeyStatus> {
    match status.map(StatusType::as_str) {
        Some("Active") => Ok(KeyStatus::Active),
        Some("Inactive") => Ok(KeyStatus::Inactive),
        Some("Expired") => Ok(KeyStatus::Expired),
        Some(other) => Err(ProviderFault::new(
            operation,
            None,
            format!("unrecognised access key status {other}"),
        )),
        None => Err(missing_field(operation, "Status")),
    }
}

fn status_type(status: KeyStatus) -> StatusType {
    StatusType::from(status.to_string().as_str())
}

#[async_trait]
impl IamProvider for AwsIamClient {
    async fn list_users(&self) -> ProviderResult<Vec<String>> {
        let users = self
            .client
            .list_users()
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| fault("ListUsers", &e))?;
        Ok(users.iter().map(|u| u.user_name().to_string()).collect())
    }

    async fn list_groups(&self) -> ProviderResult<Vec<String>> {
        let groups = self
            .client
            .list_groups()
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| fault("ListGroups", &e))?;
        Ok(groups.iter().map(|g| g.group_name().to_string()).collect())
    }

    async fn list_roles(&self) -> ProviderResult<Vec<String>> {
        let roles = self
            .client
            .list_roles()
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| fault("ListRoles", &e))?;
        Ok(roles.iter().map(|r| r.role_name().to_string()).collect())
    }

    async fn list_instance_profiles(&self) -> ProviderResult<Vec<String>> {
        let profiles = self
            .client
            .list_instance_profiles()
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| fault("ListInstanceProfiles", &e))?;
        Ok(profiles
            .iter()
            .map(|p| p.instance_profile_name().to_string())
            .collect())
    }

    async fn get_user(&self, user_name: &str) -> ProviderResult<IamEntity> {
        let response = self
            .client
            .get_user()
            .user_name(user_name)
            .send()
            .await
            .map_err(|e| fault("GetUser", &e))?;
        let user = response
            .user()
            .ok_or_else(|| missing_field("GetUser", "User"))?;
        Ok(IamEntity::new(user.user_name(), user.path(), user.arn()))
    }

    async fn create_user(&self, user_name: &str, path: &str) -> ProviderResult<IamEntity> {
        let response = self
            .client
            .create_user()
            .user_name(user_name)
            .path(path)
            .send()
            .await
            .map_err(|e| fault("CreateUser", &e))?;
        let user = response
            .user()
            .ok_or_else(|| missing_field("CreateUser", "User"))?;
        Ok(IamEntity::new(user.user_name(), user.path(), user.arn()))
    }

    async fn update_user(
        &self,
        user_name: &str,
        new_name: Option<&str>,
        new_path: Option<&str>,
    ) -> ProviderResult<()> {
        self.client
            .update_user()
            .user_name(user_name)
            .set_new_user_name(new_name.map(str::to_string))
            .set_new_path(new_path.map(str::to_string))
            .send()
            .await
            .map_err(|e| fault("UpdateUser", &e))?;
        Ok(())
    }

    async fn delete_user(&self, user_name: &str) -> ProviderResult<()> {
        self.client
            .delete_user()
            .user_name(user_name)
            .send()
            .await
            .map_err(|e| fault("DeleteUser", &e))?;
        Ok(())
    }

    async fn get_login_profile(&self, user_name: &str) -> ProviderResult<()> {
        self.client
            .get_login_profile()
            .user_name(user_name)
            .send()
            .await
            .map_err(|e| fault("GetLoginProfile", &e))?;
        Ok(())
    }

    async fn create_login_profile(
        &self,
        user_name: &str,
        password: &Sensitive,
    ) -> ProviderResult<()> {
        self.client
            .create_login_profile()
            .user_name(user_name)
            .password(password.expose())
            .send()
            .await
            .map_err(|e| fault("CreateLoginProfile", &e))?;
        Ok(())
    }

    async fn update_login_profile(
        &self,
        user_name: &str,
        password: &Sensitive,
    ) -> ProviderResult<()> {
        self.client
            .update_login_profile()
            .user_name(user_name)
            .password(password.expose())
            .send()
            .await
            .map_err(|e| fault("UpdateLoginProfile", &e))?;
        Ok(())
    }

    async fn delete_login_profile(&self, user_name: &str) -> ProviderResult<()> {
        self.client
            .delete_login_profile()
            .user_name(user_name)
            .send()
            .await
            .map_err(|e| fault("DeleteLoginProfile", &e))?;
        Ok(())
    }

    async fn list_access_keys(&self, user_name: &str) -> ProviderResult<Vec<AccessKey>> {
        let keys = self
            .client
            .list_access_keys()
            .user_name(user_name)
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| fault("ListAccessKeys", &e))?;
        keys.iter()
            .filter_map(|k| {
                k.access_key_id().map(|id| -> ProviderResult<AccessKey> {
                    Ok(AccessKey {
                        id: id.to_string(),
                        status: key_status("ListAccessKeys", k.status())?,
                        user_name: k.user_name().unwrap_or(user_name).to_string(),
                    })
                })
            })
            .collect()
    }

    async fn create_access_key(&self, user_name: &str) -> ProviderResult<CreatedAccessKey> {
        let response = self
            .client
            .create_access_key()
            .user_name(user_name)
            .send()
            .await
            .map_err(|e| fault("CreateAccessKey", &e))?;
        let key = response
            .access_key()
            .ok_or_else(|| missing_field("CreateAccessKey", "AccessKey"))?;
        Ok(CreatedAccessKey {
            id: key.access_key_id().to_string(),
            status: key_status("CreateAccessKey", Some(key.status()))?,
            user_name: key.user_name().to_string(),
            secret_access_key: Sensitive::new(key.secret_access_key()),
        })
    }

    async fn update_access_key(
        &self,
        user_name: &str,
        key_id: &str,
        status: KeyStatus,
    ) -> ProviderResult<()> {
        self.client
            .update_access_key()
            .user_name(user_name)
            .access_key_id(key_id)
            .status(status_type(status))
            .send()
            .await
            .map_err(|e| fault("UpdateAccessKey", &e))?;
        Ok(())
    }

    async fn delete_access_key(&self, user_name: &str, key_id: &str) -> ProviderResult<()> {
        self.client
            .delete_access_key()
            .user_name(user_name)
            .access_key_id(key_id)
            .send()
            .await
            .map_err(|e| fault("DeleteAccessKey", &e))?;
        Ok(())
    }

    async fn list_groups_for_user(&self, user_name: &str) -> ProviderResult<Vec<String>> {
        let groups = self
            .client
            .list_groups_for_user()
            .user_name(user_name)
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| fault("ListGroupsForUser", &e))?;
        Ok(groups.iter().map(|g| g.group_name().to_string()).collect())
    }

    async fn add_user_to_group(&self, group_name: &str, user_name: &str) -> ProviderResult<()> {
        self.client
            .add_user_to_group()
            .group_name(group_name)
            .user_name(user_name)
            .send()
            .await
            .map_err(|e| fault("AddUserToGroup", &e))?;
        Ok(())
    }

    async fn remove_user_from_group(
        &self,
        group_name: &str,
        user_name: &str,
    ) -> ProviderResult<()> {
        self.client
            .remove_user_from_group()
            .group_name(group_name)
            .user_name(user_name)
            .send()
            .await
            .map_err(|e| fault("RemoveUserFromGroup", &e))?;
        Ok(())
    }

    async fn get_group(&self, group_name: &str) -> ProviderResult<IamEntity> {
        let response = self
            .client
            .get_group()
            .group_name(group_name)
            .send()
            .await
            .map_err(|e| fault("GetGroup", &e))?;
        let group = response
            .group()
            .ok_or_else(|| missing_field("GetGroup", "Group"))?;
        Ok(IamEntity::new(group.group_name(), group.path(), group.arn()))
    }

    async fn create_group(&self, group_name: &str, path: &str) -> ProviderResult<IamEntity> {
        let response = self
            .client
            .create_group()
            .group_name(group_name)
            .path(path)
            .send()
            .await
            .map_err(|e| fault("CreateGroup", &e))?;
        let group = response
            .group()
            .ok_or_else(|| missing_field("CreateGroup", "Group"))?;
        Ok(IamEntity::new(group.group_name(), group.path(), group.arn()))
    }

    async fn update_group(
        &self,
        group_name: &str,
        new_name: Option<&str>,
        new_path: Option<&str>,
    ) -> ProviderResult<()> {
        self.client
            .update_group()
            .group_name(group_name)
            .set_new_group_name(new_name.map(str::to_string))
            .set_new_path(new_path.map(str::to_string))
            .send()
            .await
            .map_err(|e| fault("UpdateGroup", &e))?;
        Ok(())
    }

    async fn delete_group(&self, group_name: &str) -> ProviderResult<()> {
        self.client
            .delete_group()
            .group_name(group_name)
            .send()
            .await
            .map_err(|e| fault("DeleteGroup", &e))?;
        Ok(())
    }

    async fn create_role(&self, role_name: &str, path: &str) -> ProviderResult<IamEntity> {
        let response = self
            .client
            .create_role()
            .role_name(role_name)
            .path(path)
            .assume_role_policy_document(EC2_ASSUME_ROLE_POLICY)
            .send()
            .await
            .map_err(|e| fault("CreateRole", &e))?;
        let role = response
            .role()
            .ok_or_else(|| missing_field("CreateRole", "Role"))?;
        Ok(IamEntity::new(role.role_name(), role.path(), role.arn()))
    }

    async fn delete_role(&self, role_name: &str) -> ProviderResult<()> {
        self.client
            .delete_role()
            .role_name(role_name)
            .send()
            .await
            .map_err(|e| fault("DeleteRole", &e))?;
        Ok(())
    }

    async fn list_instance_profiles_for_role(
        &self,
        role_name: &str,
    ) -> ProviderResult<Vec<String>> {
        let profiles = self
            .client
            .list_instance_profiles_for_role()
            .role_name(role_name)
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| fault("ListInstanceProfilesForRole", &e))?;
        Ok(profiles
            .iter()
            .map(|p| p.instance_profile_name().to_string())
            .collect())
    }

    async fn create_instance_profile(&self, profile_name: &str, path: &str) -> ProviderResult<()> {
        self.client
            .create_instance_profile()
            .instance_profile_name(profile_name)
            .path(path)
            .send()
            .await
            .map_err(|e| fault("CreateInstanceProfile", &e))?;
        Ok(())
    }

    async fn add_role_to_instance_profile(
        &self,
        profile_name: &str,
        role_name: &str,
    ) -> ProviderResult<()> {
        self.client
            .add_role_to_instance_profile()
            .instance_profile_name(profile_name)
            .role_name(role_name)
            .send()
            .await
            .map_err(|e| fault("AddRoleToInstanceProfile", &e))?;
        Ok(())
    }

    async fn remove_role_from_instance_profile(
        &self,
        profile_name: &str,
        role_name: &str,
    ) -> ProviderResult<()> {
        self.client
            .remove_role_from_instance_profile()
            .instance_profile_name(profile_name)
            .role_name(role_name)
            .send()
            .await
            .map_err(|e| fault("RemoveRoleFromInstanceProfile", &e))?;
        Ok(())
    }

    async fn delete_instance_profile(&self, profile_name: &str) -> ProviderResult<()> {
        self.client
            .delete_instance_profile()
            .instance_profile_name(profile_name)
            .send()
            .await
            .map_err(|e| fault("DeleteInstanceProfile", &e))?;
        Ok(())
    }

    async fn list_inline_policies(
        &self,
        kind: ResourceKind,
        principal_name: &str,
    ) -> ProviderResult<Vec<String>> {
        match kind {
            ResourceKind::User => self
                .client
                .list_user_policies()
                .user_name(principal_name)
                .into_paginator()
                .items()
                .send()
                .try_collect()
                .await
                .map_err(|e| fault("ListUserPolicies", &e)),
            ResourceKind::Group => self
                .client
                .list_group_policies()
                .group_name(principal_name)
                .into_paginator()
                .items()
                .send()
                .try_collect()
                .await
                .map_err(|e| fault("ListGroupPolicies", &e)),
            ResourceKind::Role => self
                .client
                .list_role_policies()
                .role_name(principal_name)
                .into_paginator()
                .items()
                .send()
                .try_collect()
                .await
                .map_err(|e| fault("ListRolePolicies", &e)),
        }
    }

    async fn delete_inline_policy(
        &self,
        kind: ResourceKind,
        principal_name: &str,
        policy_name: &str,
    ) -> ProviderResult<()> {
        match kind {
            ResourceKind::User => {
                self.client
                    .delete_user_policy()
                    .user_name(principal_name)
                    .policy_name(policy_name)
                    .send()
                    .await
                    .map_err(|e| fault("DeleteUserPolicy", &e))?;
            }
            ResourceKind::Group => {
                self.client
                    .delete_group_policy()
                    .group_name(principal_name)
                    .policy_name(policy_name)
                    .send()
                    .await
                    .map_err(|e| fault("DeleteGroupPolicy", &e))?;
            }
            ResourceKind::Role => {
                self.client
                    .delete_role_policy()
                    .role_name(principal_name)
                    .policy_name(policy_name)
                    .send()
                    .await
                    .map_err(|e| fault("DeleteRolePolicy", &e))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assume_role_policy_is_valid_json() {
        let doc: serde_json::Value = serde_json::from_str(EC2_ASSUME_ROLE_POLICY).unwrap();
        assert_eq!(doc["Version"], "2012-10-17");
        assert_eq!(
            doc["Statement"][0]["Principal"]["Service"][0],
            "ec2.amazonaws.com"
        );
    }

    #[test]
    fn test_key_status_mapping() {
        let op = "ListAccessKeys";
        assert_eq!(key_status(op, Some(&StatusType::Active)), Ok(KeyStatus::Active));
        assert_eq!(
            key_status(op, Some(&StatusType::Inactive)),
            Ok(KeyStatus::Inactive)
        );
        assert_eq!(
            key_status(op, Some(&StatusType::from("Expired"))),
            Ok(KeyStatus::Expired)
        );
        assert_eq!(status_type(KeyStatus::Active), StatusType::Active);
        assert_eq!(status_type(KeyStatus::Inactive), StatusType::Inactive);
    }

    #[test]
    fn test_unknown_key_status_is_a_fault() {
        let fault =
            key_status("ListAccessKeys", Some(&StatusType::from("Suspended"))).unwrap_err();
        assert_eq!(fault.operation, "ListAccessKeys");
        assert!(fault.message.contains("Suspended"));

        assert!(key_status("ListAccessKeys", None).is_err());
    }
}
