//! Fault classification.
//!
//! This is the only module that looks at provider error codes and message text.
//! IAM reuses `NoSuchEntity` and `DeleteConflict` for several distinct
//! situations, so the message is consulted to tell them apart.

use std::sync::LazyLock;

use regex::Regex;

use crate::aws::{ProviderFault, ProviderResult};

const NO_SUCH_ENTITY: &str = "NoSuchEntity";
const PASSWORD_POLICY_VIOLATION: &str = "PasswordPolicyViolation";

/// What a provider fault means to a reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultKind {
    /// The user has no login profile.
    LoginProfileMissing,
    /// A referenced group does not exist.
    GroupMissing(String),
    /// Some other referenced entity does not exist.
    EntityMissing,
    /// Deletion refused until policies are detached from the principal.
    PoliciesAttached,
    /// A password was rejected by the account password policy.
    PasswordPolicy,
    /// Anything else. Propagated verbatim.
    Fatal,
}

static LOGIN_PROFILE_MISSING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)login profile for user \S+ cannot be found").expect("valid regex")
});

static GROUP_MISSING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)the group with name (?P<group>\S+) cannot be found").expect("valid regex")
});

static POLICIES_ATTACHED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)must detach all policies first").expect("valid regex"));

static PASSWORD_POLICY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)password does not conform to the account password policy")
        .expect("valid regex")
});

/// Classify a provider fault.
pub fn classify(fault: &ProviderFault) -> FaultKind {
    let code = fault.code.as_deref();
    let message = fault.message.as_str();

    if code == Some(PASSWORD_POLICY_VIOLATION) || PASSWORD_POLICY.is_match(message) {
        return FaultKind::PasswordPolicy;
    }
    if LOGIN_PROFILE_MISSING.is_match(message) {
        return FaultKind::LoginProfileMissing;
    }
    if let Some(captures) = GROUP_MISSING.captures(message) {
        let group = captures["group"].trim_end_matches('.').to_string();
        return FaultKind::GroupMissing(group);
    }
    if POLICIES_ATTACHED.is_match(message) {
        return FaultKind::PoliciesAttached;
    }
    match code {
        Some(NO_SUCH_ENTITY) => FaultKind::EntityMissing,
        // Other DeleteConflicts (keys, members, instance profiles) are real failures.
        _ => FaultKind::Fatal,
    }
}

/// Result of probing for something whose absence is an ordinary answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    /// Interpret a login-profile probe, turning "no login profile" into `NotFound`.
    pub fn login_profile(result: ProviderResult<T>) -> ProviderResult<Self> {
        match result {
            Ok(value) => Ok(Self::Found(value)),
            Err(fault) if classify(&fault) == FaultKind::LoginProfileMissing => Ok(Self::NotFound),
            Err(fault) => Err(fault),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}
