//! Reconcilers for the Cluster Backup Operator CRDs
//!
//! This module contains the business logic for reconciling each CRD type.
//! Reconcilers are responsible for:
//! - Driving the phase machines
//! - Executing backup/restore runs
//! - Updating resource status

pub mod backup;
pub mod restore;
