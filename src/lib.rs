//! Cluster Backup Kubernetes Operator
//!
//! This operator backs up selected cluster objects to an S3-compatible
//! object store on a cron schedule, and restores them into a target cluster
//! under a configurable conflict policy, using Custom Resource Definitions
//! (CRDs).

pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod reconcilers;
pub mod resources;
pub mod schedule;
pub mod store;

pub use error::{Error, Result};
