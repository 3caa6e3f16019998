//! Group membership diffing for users.

use std::collections::BTreeSet;

use log::{debug, info};

use crate::aws::IamProvider;
use crate::error::{ReconcileError, ReconcileResult};
use crate::fault::{classify, FaultKind};

/// Set difference between a user's current and desired groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
}

impl MembershipDiff {
    pub fn compute<C, D>(current: C, desired: D) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        let current: BTreeSet<String> = current.into_iter().map(Into::into).collect();
        let desired: BTreeSet<String> = desired.into_iter().map(Into::into).collect();
        Self {
            to_add: desired.difference(&current).cloned().collect(),
            to_remove: current.difference(&desired).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// The membership that results from applying this diff to `current`.
    pub fn apply<'a, I>(&self, current: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        current
            .into_iter()
            .filter(|group| !self.to_remove.contains(*group))
            .cloned()
            .chain(self.to_add.iter().cloned())
            .collect()
    }
}

/// Converge `user_name`'s group membership to `desired`.
///
/// Additions go first so a user swapping groups is never left with none.
/// Adding to a group that does not exist fails with a `NotFound` naming it.
pub(crate) async fn reconcile_membership(
    provider: &dyn IamProvider,
    user_name: &str,
    desired: &[String],
    changed: &mut bool,
) -> ReconcileResult<MembershipDiff> {
    let current = provider.list_groups_for_user(user_name).await?;
    let diff = MembershipDiff::compute(current, desired.iter().cloned());
    debug!(
        "Membership of {user_name}: adding {:?}, removing {:?}",
        diff.to_add, diff.to_remove
    );

    for group in &diff.to_add {
        info!("Adding user {user_name} to group {group}");
        provider
            .add_user_to_group(group, user_name)
            .await
            .map_err(|fault| match classify(&fault) {
                FaultKind::GroupMissing(_) => {
                    ReconcileError::NotFound(format!("Group {group} doesn't exist"))
                }
                _ => fault.into(),
            })?;
        *changed = true;
    }

    for group in &diff.to_remove {
        info!("Removing user {user_name} from group {group}");
        provider.remove_user_from_group(group, user_name).await?;
        *changed = true;
    }

    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_swap_groups() {
        let diff = MembershipDiff::compute(["dev", "ops"], ["ops", "admin"]);
        assert_eq!(diff.to_add, set(&["admin"]));
        assert_eq!(diff.to_remove, set(&["dev"]));
        assert!(!diff.is_empty());
    }

    #[test]
    fn test_same_groups_in_other_order() {
        let diff = MembershipDiff::compute(["b", "a"], ["a", "b"]);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_clear_all_groups() {
        let diff = MembershipDiff::compute(["a", "b"], Vec::<String>::new());
        assert!(diff.to_add.is_empty());
        assert_eq!(diff.to_remove, set(&["a", "b"]));
    }

    proptest! {
        #[test]
        fn prop_diff_converges_to_desired(
            current in prop::collection::btree_set("[a-e]", 0..5),
            desired in prop::collection::btree_set("[a-e]", 0..5),
        ) {
            let diff = MembershipDiff::compute(current.iter().cloned(), desired.iter().cloned());

            let expected_add: BTreeSet<String> = desired.difference(&current).cloned().collect();
            let expected_remove: BTreeSet<String> = current.difference(&desired).cloned().collect();
            prop_assert_eq!(&diff.to_add, &expected_add);
            prop_assert_eq!(&diff.to_remove, &expected_remove);
            prop_assert_eq!(diff.apply(&current), desired.clone());
            prop_assert_eq!(diff.is_empty(), current == desired);
        }
    }
}
