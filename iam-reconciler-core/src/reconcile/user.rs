//! User reconciliation: create, update (rename/move, password, keys, groups) and delete.

use log::{debug, info};

use super::credentials;
use super::membership::reconcile_membership;
use super::{delete_with_policy_cleanup, locate, Located};
use crate::aws::IamProvider;
use crate::error::{ReconcileError, ReconcileFailure, ReconcileResult};
use crate::fault::{classify, FaultKind};
use crate::types::{
    AccessKeyState, DesiredState, Inventory, Operation, Outcome, OutcomeDetails,
    PasswordUpdatePolicy, PathChange, Rename, ResourceKind,
};

struct UserReconciler<'a> {
    provider: &'a dyn IamProvider,
    inventory: &'a Inventory,
    desired: &'a DesiredState,
    changed: bool,
}

pub(crate) async fn reconcile_user(
    provider: &dyn IamProvider,
    inventory: &Inventory,
    desired: &DesiredState,
) -> Result<Outcome, ReconcileFailure> {
    let mut reconciler = UserReconciler {
        provider,
        inventory,
        desired,
        changed: false,
    };
    let result = reconciler.run().await;
    result.map_err(|source| ReconcileFailure::new(reconciler.changed, source))
}

impl UserReconciler<'_> {
    async fn run(&mut self) -> ReconcileResult<Outcome> {
        let desired = self.desired;
        let name = desired.name.as_str();

        if desired.operation == Operation::Absent {
            return match locate(self.inventory.names(ResourceKind::User), name, None) {
                Some(located) => self.delete(&located.name).await,
                None => {
                    debug!("User {name} is already absent");
                    Ok(Outcome::new(
                        false,
                        OutcomeDetails::AlreadyAbsent {
                            kind: ResourceKind::User,
                            name: name.to_string(),
                        },
                    ))
                }
            };
        }

        let users = self.inventory.names(ResourceKind::User);
        match locate(users, name, desired.new_name.as_deref()) {
            Some(located) => self.update(located).await,
            None if desired.operation == Operation::Update => Err(ReconcileError::NotFound(
                format!("The user {name} does not exist. No update made."),
            )),
            None => match desired.new_name.as_deref() {
                Some(new_name) => Err(ReconcileError::NotFound(format!(
                    "Cannot rename user {name} to {new_name}: neither name exists"
                ))),
                None => self.create().await,
            },
        }
    }

    async fn create(&mut self) -> ReconcileResult<Outcome> {
        let provider = self.provider;
        let desired = self.desired;
        let name = desired.name.as_str();

        info!("Creating user {name} at path {}", desired.path);
        let user = provider.create_user(name, &desired.path).await?;
        self.changed = true;

        if let Some(password) = &desired.password {
            credentials::create_login_profile(provider, name, password).await?;
        }

        let access_keys = if desired.access_key_state == Some(AccessKeyState::Create) {
            credentials::create_keys_up_to(provider, name, 0, desired.key_count, &mut self.changed)
                .await?
        } else {
            Vec::new()
        };

        if let Some(groups) = &desired.groups {
            reconcile_membership(provider, name, groups, &mut self.changed).await?;
        }

        Ok(Outcome::new(
            self.changed,
            OutcomeDetails::UserCreated {
                user,
                password: desired.password.clone(),
                access_keys,
                groups: desired.groups.clone(),
            },
        ))
    }

    async fn update(&mut self, located: Located) -> ReconcileResult<Outcome> {
        let provider = self.provider;
        let desired = self.desired;
        let mut user_name = located.name;
        if located.already_renamed {
            debug!("User {} was already renamed to {user_name}", desired.name);
        }

        let current_keys = match provider.list_access_keys(&user_name).await {
            Ok(keys) => keys,
            // The snapshot can predate a rename made by an earlier run.
            Err(fault)
                if !located.already_renamed && classify(&fault) == FaultKind::EntityMissing =>
            {
                let Some(new_name) = desired.new_name.clone() else {
                    return Err(fault.into());
                };
                debug!("User {user_name} no longer exists, continuing as {new_name}");
                user_name = new_name;
                provider.list_access_keys(&user_name).await?
            }
            Err(fault) => return Err(fault.into()),
        };

        // `present` also converges the user onto `path` when no explicit move is asked for.
        let target_path = desired.new_path.clone().or_else(|| {
            (desired.operation == Operation::Present).then(|| desired.path.clone())
        });
        let target_name = desired
            .new_name
            .as_deref()
            .filter(|new_name| *new_name != user_name.as_str())
            .map(str::to_string);

        let mut renamed = None;
        let mut moved = None;
        if target_name.is_some() || target_path.is_some() {
            let current = provider.get_user(&user_name).await?;
            let new_path = target_path.filter(|path| *path != current.path);

            if target_name.is_some() || new_path.is_some() {
                info!(
                    "Updating user {user_name}: name {:?}, path {:?}",
                    target_name, new_path
                );
                provider
                    .update_user(&user_name, target_name.as_deref(), new_path.as_deref())
                    .await?;
                self.changed = true;

                if let Some(new_path) = new_path {
                    moved = Some(PathChange {
                        old_path: current.path,
                        new_path,
                    });
                }
                if let Some(new_name) = target_name {
                    renamed = Some(Rename {
                        old_name: std::mem::replace(&mut user_name, new_name.clone()),
                        new_name,
                    });
                }
            }
        }

        if let (Some(password), PasswordUpdatePolicy::Always) =
            (&desired.password, desired.update_password)
        {
            credentials::set_password(provider, &user_name, password).await?;
            self.changed = true;
        }

        if desired.access_key_state == Some(AccessKeyState::Create) {
            credentials::create_keys_up_to(
                provider,
                &user_name,
                current_keys.len(),
                desired.key_count,
                &mut self.changed,
            )
            .await?;
        }

        if let Some(state) = desired.access_key_state {
            if !desired.access_key_ids.is_empty() {
                credentials::apply_key_directive(
                    provider,
                    &user_name,
                    &current_keys,
                    &desired.access_key_ids,
                    state,
                    &mut self.changed,
                )
                .await?;
            }
        }

        let keys = credentials::key_statuses(provider, &user_name).await?;

        if let Some(groups) = &desired.groups {
            reconcile_membership(provider, &user_name, groups, &mut self.changed).await?;
        }

        Ok(Outcome::new(
            self.changed,
            OutcomeDetails::UserUpdated {
                user_name,
                renamed,
                moved,
                groups: desired.groups.clone(),
                keys,
            },
        ))
    }

    async fn delete(&mut self, user_name: &str) -> ReconcileResult<Outcome> {
        let provider = self.provider;

        info!("Deleting user {user_name}");
        reconcile_membership(provider, user_name, &[], &mut self.changed).await?;
        credentials::delete_all_keys(provider, user_name, &mut self.changed).await?;
        credentials::delete_login_profile(provider, user_name, &mut self.changed).await?;
        delete_with_policy_cleanup(provider, ResourceKind::User, user_name, &mut self.changed)
            .await?;

        Ok(Outcome::new(
            self.changed,
            OutcomeDetails::UserDeleted {
                user_name: user_name.to_string(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::ProviderFault;
    use crate::testing::FakeIamProvider;
    use crate::types::KeyStatus;

    async fn run(
        provider: &FakeIamProvider,
        desired: &DesiredState,
    ) -> Result<Outcome, ReconcileFailure> {
        let inventory = Inventory::fetch(provider).await.unwrap();
        provider.clear_calls();
        reconcile_user(provider, &inventory, desired).await
    }

    #[tokio::test]
    async fn test_create_user_with_two_keys() {
        let provider = FakeIamProvider::new();
        let desired = DesiredState::new(ResourceKind::User, "alice", Operation::Present)
            .with_access_keys(AccessKeyState::Create, 2);

        let outcome = run(&provider, &desired).await.unwrap();

        assert!(outcome.changed);
        assert_eq!(provider.count("CreateUser"), 1);
        assert_eq!(provider.count("CreateAccessKey"), 2);
        match outcome.details {
            OutcomeDetails::UserCreated { user, access_keys, .. } => {
                assert_eq!(user.name, "alice");
                assert_eq!(access_keys.len(), 2);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_user_with_password_and_groups() {
        let provider = FakeIamProvider::new().with_group("dev", "/");
        let desired = DesiredState::new(ResourceKind::User, "bob", Operation::Present)
            .with_password("Corr3ct-Horse!")
            .with_groups(["dev"]);

        let outcome = run(&provider, &desired).await.unwrap();

        assert!(outcome.changed);
        assert!(provider.has_login_profile("bob"));
        assert_eq!(provider.user_groups("bob"), vec!["dev".to_string()]);
        assert_eq!(provider.count("CreateAccessKey"), 0);
    }

    #[tokio::test]
    async fn test_create_failure_after_user_created_reports_changed() {
        let provider = FakeIamProvider::new().with_min_password_length(12);
        let desired = DesiredState::new(ResourceKind::User, "carol", Operation::Present)
            .with_password("short");

        let failure = run(&provider, &desired).await.unwrap_err();

        assert!(failure.changed);
        assert!(matches!(failure.source, ReconcileError::PolicyViolation { .. }));
        assert!(provider.has_user("carol"));
    }

    #[tokio::test]
    async fn test_present_twice_is_idempotent() {
        let provider = FakeIamProvider::new().with_group("dev", "/");
        let desired = DesiredState::new(ResourceKind::User, "dave", Operation::Present)
            .with_access_keys(AccessKeyState::Create, 1)
            .with_groups(["dev"]);

        assert!(run(&provider, &desired).await.unwrap().changed);
        let second = run(&provider, &desired).await.unwrap();

        assert!(!second.changed);
        assert_eq!(provider.mutating_calls(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_update_missing_user_fails() {
        let provider = FakeIamProvider::new();
        let desired = DesiredState::new(ResourceKind::User, "ghost", Operation::Update);

        let failure = run(&provider, &desired).await.unwrap_err();

        assert!(!failure.changed);
        assert!(matches!(failure.source, ReconcileError::NotFound(_)));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_present_rename_of_missing_user_fails() {
        let provider = FakeIamProvider::new();
        let desired = DesiredState::new(ResourceKind::User, "ghost", Operation::Present)
            .with_new_name("spectre");

        let failure = run(&provider, &desired).await.unwrap_err();

        assert!(matches!(failure.source, ReconcileError::NotFound(_)));
        assert_eq!(provider.count("CreateUser"), 0);
    }

    #[tokio::test]
    async fn test_rename_is_applied_once() {
        let provider = FakeIamProvider::new().with_user("erin", "/");
        let desired = DesiredState::new(ResourceKind::User, "erin", Operation::Update)
            .with_new_name("erin2");

        let first = run(&provider, &desired).await.unwrap();
        assert!(first.changed);
        assert!(provider.has_user("erin2"));

        let second = run(&provider, &desired).await.unwrap();

        assert!(!second.changed);
        assert_eq!(provider.count("UpdateUser"), 0);
        match second.details {
            OutcomeDetails::UserUpdated { user_name, renamed, .. } => {
                assert_eq!(user_name, "erin2");
                assert_eq!(renamed, None);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rename_rerun_with_stale_snapshot() {
        let provider = FakeIamProvider::new().with_user("erin2", "/");
        let desired = DesiredState::new(ResourceKind::User, "erin", Operation::Update)
            .with_new_name("erin2");
        // Taken before the rename, so only the old name is listed.
        let stale = Inventory {
            users: vec!["erin".to_string()],
            ..Inventory::default()
        };

        let outcome = reconcile_user(&provider, &stale, &desired).await.unwrap();

        assert!(!outcome.changed);
        assert_eq!(provider.count("UpdateUser"), 0);
        match outcome.details {
            OutcomeDetails::UserUpdated { user_name, .. } => assert_eq!(user_name, "erin2"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rename_and_move_in_one_call() {
        let provider = FakeIamProvider::new().with_user("frank", "/");
        let desired = DesiredState::new(ResourceKind::User, "frank", Operation::Update)
            .with_new_name("francis")
            .with_new_path("/staff/");

        let outcome = run(&provider, &desired).await.unwrap();

        assert_eq!(provider.count("UpdateUser"), 1);
        assert_eq!(provider.user_path("francis").as_deref(), Some("/staff/"));
        match outcome.details {
            OutcomeDetails::UserUpdated { renamed, moved, .. } => {
                assert_eq!(
                    renamed,
                    Some(Rename {
                        old_name: "frank".to_string(),
                        new_name: "francis".to_string()
                    })
                );
                assert_eq!(
                    moved,
                    Some(PathChange {
                        old_path: "/".to_string(),
                        new_path: "/staff/".to_string()
                    })
                );
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_present_converges_path() {
        let provider = FakeIamProvider::new().with_user("gina", "/old/");
        let desired =
            DesiredState::new(ResourceKind::User, "gina", Operation::Present).with_path("/new/");

        let outcome = run(&provider, &desired).await.unwrap();

        assert!(outcome.changed);
        assert_eq!(provider.user_path("gina").as_deref(), Some("/new/"));
    }

    #[tokio::test]
    async fn test_update_does_not_converge_default_path() {
        let provider = FakeIamProvider::new().with_user("hank", "/ops/");
        let desired = DesiredState::new(ResourceKind::User, "hank", Operation::Update);

        let outcome = run(&provider, &desired).await.unwrap();

        assert!(!outcome.changed);
        assert_eq!(provider.user_path("hank").as_deref(), Some("/ops/"));
    }

    #[tokio::test]
    async fn test_key_count_converges_without_removing() {
        let provider = FakeIamProvider::new()
            .with_user("ivy", "/")
            .with_access_key("ivy", "AKIAIVY1", KeyStatus::Active);
        let grow = DesiredState::new(ResourceKind::User, "ivy", Operation::Update)
            .with_access_keys(AccessKeyState::Create, 2);

        let outcome = run(&provider, &grow).await.unwrap();
        assert!(outcome.changed);
        assert_eq!(provider.count("CreateAccessKey"), 1);

        let shrink = DesiredState::new(ResourceKind::User, "ivy", Operation::Update)
            .with_access_keys(AccessKeyState::Create, 1);
        let outcome = run(&provider, &shrink).await.unwrap();
        assert!(!outcome.changed);
        assert_eq!(provider.count("CreateAccessKey"), 0);
        assert_eq!(provider.count("DeleteAccessKey"), 0);
    }

    #[tokio::test]
    async fn test_deactivate_listed_key_only() {
        let provider = FakeIamProvider::new()
            .with_user("jack", "/")
            .with_access_key("jack", "AKIAJACK1", KeyStatus::Active)
            .with_access_key("jack", "AKIAJACK2", KeyStatus::Active);
        let desired = DesiredState::new(ResourceKind::User, "jack", Operation::Update)
            .with_access_keys(AccessKeyState::Inactive, 1)
            .with_access_key_ids(["AKIAJACK1", "AKIAMISSING"]);

        let outcome = run(&provider, &desired).await.unwrap();

        assert!(outcome.changed);
        assert_eq!(provider.count("UpdateAccessKey"), 1);
        match outcome.details {
            OutcomeDetails::UserUpdated { keys, .. } => {
                assert_eq!(keys["AKIAJACK1"], KeyStatus::Inactive);
                assert_eq!(keys["AKIAJACK2"], KeyStatus::Active);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_activate_already_active_key_is_noop() {
        let provider = FakeIamProvider::new()
            .with_user("kim", "/")
            .with_access_key("kim", "AKIAKIM1", KeyStatus::Active);
        let desired = DesiredState::new(ResourceKind::User, "kim", Operation::Update)
            .with_access_keys(AccessKeyState::Active, 1)
            .with_access_key_ids(["AKIAKIM1"]);

        let outcome = run(&provider, &desired).await.unwrap();

        assert!(!outcome.changed);
        assert_eq!(provider.count("UpdateAccessKey"), 0);
    }

    #[tokio::test]
    async fn test_remove_listed_key_regardless_of_status() {
        let provider = FakeIamProvider::new()
            .with_user("lee", "/")
            .with_access_key("lee", "AKIALEE1", KeyStatus::Inactive);
        let desired = DesiredState::new(ResourceKind::User, "lee", Operation::Update)
            .with_access_keys(AccessKeyState::Remove, 1)
            .with_access_key_ids(["AKIALEE1"]);

        let outcome = run(&provider, &desired).await.unwrap();

        assert!(outcome.changed);
        match outcome.details {
            OutcomeDetails::UserUpdated { keys, .. } => assert!(keys.is_empty()),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deactivate_expired_key() {
        let provider = FakeIamProvider::new()
            .with_user("lou", "/")
            .with_access_key("lou", "AKIALOU1", KeyStatus::Expired);
        let desired = DesiredState::new(ResourceKind::User, "lou", Operation::Update)
            .with_access_keys(AccessKeyState::Inactive, 1)
            .with_access_key_ids(["AKIALOU1"]);

        let outcome = run(&provider, &desired).await.unwrap();

        assert!(outcome.changed);
        assert_eq!(provider.count("UpdateAccessKey"), 1);
        assert_eq!(
            provider.access_keys("lou"),
            vec![("AKIALOU1".to_string(), KeyStatus::Inactive)]
        );
    }

    #[tokio::test]
    async fn test_password_update_creates_missing_login_profile() {
        let provider = FakeIamProvider::new().with_user("mia", "/");
        let desired = DesiredState::new(ResourceKind::User, "mia", Operation::Update)
            .with_password("N3w-Passw0rd!");

        let outcome = run(&provider, &desired).await.unwrap();

        assert!(outcome.changed);
        assert_eq!(provider.count("UpdateLoginProfile"), 1);
        assert_eq!(provider.count("CreateLoginProfile"), 1);
        assert!(provider.has_login_profile("mia"));
    }

    #[tokio::test]
    async fn test_password_on_create_is_ignored_for_existing_user() {
        let provider = FakeIamProvider::new().with_user("ned", "/");
        let desired = DesiredState::new(ResourceKind::User, "ned", Operation::Update)
            .with_password("N3w-Passw0rd!")
            .with_update_password(PasswordUpdatePolicy::OnCreate);

        let outcome = run(&provider, &desired).await.unwrap();

        assert!(!outcome.changed);
        assert!(!provider.has_login_profile("ned"));
    }

    #[tokio::test]
    async fn test_password_policy_violation() {
        let provider = FakeIamProvider::new()
            .with_user("olga", "/")
            .with_login_profile("olga")
            .with_min_password_length(20);
        let desired = DesiredState::new(ResourceKind::User, "olga", Operation::Update)
            .with_password("tooshort");

        let failure = run(&provider, &desired).await.unwrap_err();

        assert!(!failure.changed);
        assert!(matches!(
            failure.source,
            ReconcileError::PolicyViolation { ref user } if user == "olga"
        ));
    }

    #[tokio::test]
    async fn test_membership_adds_before_removing() {
        let provider = FakeIamProvider::new()
            .with_group("dev", "/")
            .with_group("ops", "/")
            .with_user("pat", "/")
            .with_user_in_group("pat", "dev");
        let desired = DesiredState::new(ResourceKind::User, "pat", Operation::Update)
            .with_groups(["ops"]);

        let outcome = run(&provider, &desired).await.unwrap();

        assert!(outcome.changed);
        assert_eq!(
            provider.mutating_calls(),
            vec![
                "AddUserToGroup ops pat".to_string(),
                "RemoveUserFromGroup dev pat".to_string()
            ]
        );
        assert_eq!(provider.user_groups("pat"), vec!["ops".to_string()]);
    }

    #[tokio::test]
    async fn test_membership_missing_group_is_named() {
        let provider = FakeIamProvider::new().with_user("quinn", "/");
        let desired = DesiredState::new(ResourceKind::User, "quinn", Operation::Update)
            .with_groups(["nonexistent"]);

        let failure = run(&provider, &desired).await.unwrap_err();

        match failure.source {
            ReconcileError::NotFound(msg) => assert!(msg.contains("nonexistent")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_absent_missing_user_makes_no_calls() {
        let provider = FakeIamProvider::new();
        let desired = DesiredState::new(ResourceKind::User, "nobody", Operation::Absent);

        let outcome = run(&provider, &desired).await.unwrap();

        assert!(!outcome.changed);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_user_cleans_up_dependents() {
        let provider = FakeIamProvider::new()
            .with_group("dev", "/")
            .with_user("rita", "/")
            .with_user_in_group("rita", "dev")
            .with_access_key("rita", "AKIARITA1", KeyStatus::Active)
            .with_login_profile("rita");
        let desired = DesiredState::new(ResourceKind::User, "rita", Operation::Absent);

        let outcome = run(&provider, &desired).await.unwrap();

        assert!(outcome.changed);
        assert!(!provider.has_user("rita"));
    }

    #[tokio::test]
    async fn test_delete_user_without_login_profile() {
        let provider = FakeIamProvider::new().with_user("sam", "/");
        let desired = DesiredState::new(ResourceKind::User, "sam", Operation::Absent);

        let outcome = run(&provider, &desired).await.unwrap();

        assert!(outcome.changed);
        assert_eq!(provider.count("DeleteLoginProfile"), 0);
        assert!(!provider.has_user("sam"));
    }

    #[tokio::test]
    async fn test_delete_user_removes_inline_policies() {
        let provider = FakeIamProvider::new()
            .with_user("tess", "/")
            .with_inline_policy(ResourceKind::User, "tess", "s3-read")
            .with_inline_policy(ResourceKind::User, "tess", "ddb-read");
        let desired = DesiredState::new(ResourceKind::User, "tess", Operation::Absent);

        let outcome = run(&provider, &desired).await.unwrap();

        assert!(outcome.changed);
        assert_eq!(provider.count("DeleteUserPolicy"), 2);
        assert_eq!(provider.count("DeleteUser"), 2);
        assert!(!provider.has_user("tess"));
    }

    #[tokio::test]
    async fn test_delete_user_blocked_by_managed_policy() {
        let provider = FakeIamProvider::new()
            .with_user("uma", "/")
            .with_inline_policy(ResourceKind::User, "uma", "inline")
            .with_managed_policy(ResourceKind::User, "uma", "ReadOnlyAccess");
        let desired = DesiredState::new(ResourceKind::User, "uma", Operation::Absent);

        let failure = run(&provider, &desired).await.unwrap_err();

        assert!(failure.changed);
        assert!(matches!(
            failure.source,
            ReconcileError::ManagedPolicyBlocked { kind: ResourceKind::User, ref name } if name == "uma"
        ));
        assert!(provider.has_user("uma"));
    }

    #[tokio::test]
    async fn test_provider_fault_aborts_and_propagates() {
        let provider = FakeIamProvider::new()
            .with_user("vic", "/")
            .fail_next(
                "ListAccessKeys",
                ProviderFault::new("ListAccessKeys", Some("Throttling"), "Rate exceeded"),
            );
        let desired = DesiredState::new(ResourceKind::User, "vic", Operation::Update)
            .with_access_keys(AccessKeyState::Create, 2);

        let failure = run(&provider, &desired).await.unwrap_err();

        assert!(!failure.changed);
        assert!(matches!(failure.source, ReconcileError::Provider(_)));
        assert_eq!(provider.count("CreateAccessKey"), 0);
    }
}
