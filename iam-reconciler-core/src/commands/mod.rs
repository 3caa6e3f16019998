//! Commands module - service layer for IAM reconciliation

pub(crate) mod service;

pub use service::{ConnectionOptions, IamReconcilerService};
