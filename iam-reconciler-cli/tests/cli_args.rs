use assert_cmd::Command;
use predicates::prelude::*;

// None of these invocations get past request validation, so no AWS call is made.
fn reconciler() -> Command {
    let mut cmd = Command::cargo_bin("iam-reconciler").expect("binary should build");
    cmd.env_remove("IAM_RECONCILER_PASSWORD");
    cmd
}

#[test]
fn help_lists_resource_flags() {
    reconciler()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--kind"))
        .stdout(predicate::str::contains("--access-key-state"))
        .stdout(predicate::str::contains("--update-password"));
}

#[test]
fn test_missing_name_is_an_argument_error() {
    reconciler()
        .args(["--kind", "user", "--state", "present"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--name"));
}

#[test]
fn test_unknown_kind_is_an_argument_error() {
    reconciler()
        .args(["--kind", "policy", "--state", "present", "--name", "x"])
        .assert()
        .code(2);
}

#[test]
fn test_unknown_access_key_state_is_an_argument_error() {
    reconciler()
        .args([
            "--kind",
            "user",
            "--state",
            "present",
            "--name",
            "alice",
            "--access-key-state",
            "rotate",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown access key state"));
}

#[test]
fn test_role_update_is_rejected() {
    reconciler()
        .args(["--kind", "role", "--state", "update", "--name", "r1"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Unsupported operation"))
        .stdout(predicate::str::contains("\"changed\": false"));
}

#[test]
fn test_password_for_group_is_rejected() {
    reconciler()
        .args([
            "--kind",
            "group",
            "--state",
            "present",
            "--name",
            "g1",
            "--password",
            "Secret123!Secret123!",
        ])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("passwords only apply to users"))
        .stdout(predicate::str::contains("Secret123").not());
}

#[test]
fn test_password_from_environment_is_validated() {
    reconciler()
        .env("IAM_RECONCILER_PASSWORD", "Secret123!Secret123!")
        .args(["--kind", "role", "--state", "present", "--name", "r1"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("passwords only apply to users"));
}

#[test]
fn test_inactive_without_key_ids_is_rejected() {
    reconciler()
        .args([
            "--kind",
            "user",
            "--state",
            "update",
            "--name",
            "alice",
            "--access-key-state",
            "inactive",
        ])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("at least one access key id"));
}

#[test]
fn test_groups_for_role_are_rejected() {
    reconciler()
        .args([
            "--kind", "role", "--state", "present", "--name", "r1", "--groups", "dev",
        ])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("membership only applies to users"));
}
