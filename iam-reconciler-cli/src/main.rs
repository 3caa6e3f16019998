//! iam-reconciler - converge one AWS IAM user, group or role toward a declared state.
//!
//! The result is printed to stdout as JSON. Logs go to stderr; `--verbose`
//! turns on debug output and `RUST_LOG` overrides the filter entirely.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use iam_reconciler_core::{
    AccessKeyState, ConnectionOptions, DesiredState, IamReconcilerService, Operation,
    PasswordUpdatePolicy, ReconcileFailure, ResourceKind,
};
use log::{debug, error};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KindArg {
    User,
    Group,
    Role,
}

impl From<KindArg> for ResourceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::User => Self::User,
            KindArg::Group => Self::Group,
            KindArg::Role => Self::Role,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StateArg {
    Present,
    Absent,
    Update,
}

impl From<StateArg> for Operation {
    fn from(state: StateArg) -> Self {
        match state {
            StateArg::Present => Self::Present,
            StateArg::Absent => Self::Absent,
            StateArg::Update => Self::Update,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum UpdatePasswordArg {
    #[default]
    Always,
    #[value(name = "on_create")]
    OnCreate,
}

impl From<UpdatePasswordArg> for PasswordUpdatePolicy {
    fn from(policy: UpdatePasswordArg) -> Self {
        match policy {
            UpdatePasswordArg::Always => Self::Always,
            UpdatePasswordArg::OnCreate => Self::OnCreate,
        }
    }
}

/// Idempotently reconcile an AWS IAM user, group or role
#[derive(Parser, Debug)]
#[command(name = "iam-reconciler")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Kind of IAM resource to manage
    #[arg(long, value_enum, ignore_case = true)]
    kind: KindArg,

    /// Desired state of the resource
    #[arg(long, value_enum, ignore_case = true)]
    state: StateArg,

    /// Name of the user, group or role
    #[arg(long)]
    name: String,

    /// Rename the user or group to this name
    #[arg(long)]
    new_name: Option<String>,

    /// Path of the resource when it is created
    #[arg(long, default_value = "/")]
    path: String,

    /// Move the user or group to this path
    #[arg(long)]
    new_path: Option<String>,

    /// What to do with the user's access keys: create, remove, active or inactive
    #[arg(long)]
    access_key_state: Option<AccessKeyState>,

    /// Number of access keys the user should hold with --access-key-state create
    #[arg(long, default_value_t = 1)]
    key_count: usize,

    /// Comma-separated access key ids for remove, active or inactive
    #[arg(long, value_delimiter = ',')]
    access_key_ids: Vec<String>,

    /// Comma-separated groups the user should belong to. An empty value removes
    /// the user from every group.
    #[arg(long, value_delimiter = ',')]
    groups: Option<Vec<String>>,

    /// Console password for the user
    #[arg(long, env = "IAM_RECONCILER_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// When to set the password of an existing user
    #[arg(long, value_enum, default_value_t = UpdatePasswordArg::Always)]
    update_password: UpdatePasswordArg,

    /// AWS profile to use
    #[arg(long)]
    profile: Option<String>,

    /// AWS region to use
    #[arg(long)]
    region: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn desired_state(&self) -> DesiredState {
        let mut desired =
            DesiredState::new(self.kind.into(), self.name.clone(), self.state.into())
                .with_path(self.path.clone())
                .with_update_password(self.update_password.into());

        if let Some(new_name) = &self.new_name {
            desired = desired.with_new_name(new_name.clone());
        }
        if let Some(new_path) = &self.new_path {
            desired = desired.with_new_path(new_path.clone());
        }
        if let Some(password) = &self.password {
            desired = desired.with_password(password.clone());
        }
        if let Some(groups) = &self.groups {
            desired = desired.with_groups(groups.iter().filter(|g| !g.is_empty()).cloned());
        }
        if let Some(state) = self.access_key_state {
            desired = desired.with_access_keys(state, self.key_count);
        }
        desired.with_access_key_ids(self.access_key_ids.iter().filter(|id| !id.is_empty()).cloned())
    }

    fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            profile: self.profile.clone(),
            region: self.region.clone(),
        }
    }
}

/// JSON printed on stdout when reconciliation fails.
#[derive(Debug, Serialize)]
struct FailureReport {
    changed: bool,
    msg: String,
}

impl From<&ReconcileFailure> for FailureReport {
    fn from(failure: &ReconcileFailure) -> Self {
        Self {
            changed: failure.changed,
            msg: failure.to_string(),
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize result")?;
    println!("{json}");
    Ok(())
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let desired = cli.desired_state();
    debug!("Desired state: {desired:?}");

    // Reject bad requests before credentials are loaded.
    if let Err(err) = desired.validate() {
        let failure = ReconcileFailure::unchanged(err);
        error!("{failure}");
        print_json(&FailureReport::from(&failure))?;
        return Ok(ExitCode::FAILURE);
    }

    let service = IamReconcilerService::connect(&cli.connection_options()).await;
    match service.reconcile(&desired).await {
        Ok(outcome) => {
            print_json(&outcome)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            error!("{failure}");
            print_json(&FailureReport::from(&failure))?;
            Ok(ExitCode::FAILURE)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
