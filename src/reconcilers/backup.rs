//! Backup reconciler
//!
//! Drives a Backup through its scheduling cycle:
//! New -> Scheduled -> Running -> Scheduled, with Failed on errors. The
//! cycle leaves Scheduled only through a successful run, which increments
//! the backup count and refreshes the next fire time.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::{
    api::{Patch, PatchParams},
    runtime::controller::Action,
    Api, Client, ResourceExt,
};
use serde_json::json;
use tracing::{info, warn};

use crate::crd::Backup;
use crate::error::Result;
use crate::metrics;
use crate::resources;
use crate::schedule;
use crate::store::StoreClient;

/// Field manager for status patches
const FIELD_MANAGER: &str = "cluster-backup-operator";

/// Reconcile one Backup object
pub async fn reconcile(backup: &Backup, client: &Client, namespace: &str) -> Result<Action> {
    let name = backup.name_any();
    let api: Api<Backup> = Api::namespaced(client.clone(), namespace);

    let phase = backup
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("");

    match phase {
        "" => initialize(&api, &name).await,
        "New" => schedule_next(backup, &api, &name).await,
        "Scheduled" => run_if_due(backup, client, namespace, &api, &name).await,
        // Running is only observable after a crash mid-run; Completed and
        // Failed stay put until the user edits the spec.
        _ => Ok(Action::await_change()),
    }
}

/// Unset phase: initialize the status and come back immediately
async fn initialize(api: &Api<Backup>, name: &str) -> Result<Action> {
    let status = json!({
        "status": {
            "phase": "New",
            "message": "Backup resource created",
        }
    });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(status))
        .await?;

    info!(name = %name, "Initialized backup status");
    Ok(Action::requeue(Duration::ZERO))
}

/// New phase: parse the schedule and move to Scheduled (or Failed)
async fn schedule_next(backup: &Backup, api: &Api<Backup>, name: &str) -> Result<Action> {
    match schedule::next_fire(&backup.spec.schedule, Utc::now()) {
        Ok(next) => {
            let status = json!({
                "status": {
                    "phase": "Scheduled",
                    "message": "Backup scheduled according to cron schedule",
                    "nextBackupTime": next,
                }
            });
            api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(status))
                .await?;

            info!(name = %name, next_backup_time = %next, "Backup scheduled");
            Ok(Action::requeue(Duration::ZERO))
        }
        Err(e) => {
            warn!(name = %name, error = %e, "Backup will not be scheduled");
            let status = json!({
                "status": {
                    "phase": "Failed",
                    "message": e.to_string(),
                }
            });
            api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(status))
                .await?;

            Ok(Action::await_change())
        }
    }
}

/// Scheduled phase: wait for the fire time, then run one backup
async fn run_if_due(
    backup: &Backup,
    client: &Client,
    namespace: &str,
    api: &Api<Backup>,
    name: &str,
) -> Result<Action> {
    let now = Utc::now();
    if let Some(next) = backup.status.as_ref().and_then(|s| s.next_backup_time) {
        if next > now {
            let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!(name = %name, next_backup_time = %next, "Backup not due yet");
            return Ok(Action::requeue(delay));
        }
        info!(name = %name, scheduled_time = %next, "Backup time reached");
    } else {
        info!(name = %name, "No next backup time set, running backup immediately");
    }

    match perform_backup(backup, client, api, name).await {
        Ok((backup_path, resource_counts)) => {
            finish_run(backup, namespace, api, name, backup_path, resource_counts).await
        }
        Err(e) => {
            metrics::BACKUPS_TOTAL
                .with_label_values(&["failure", namespace, name])
                .inc();

            let status = json!({
                "status": {
                    "phase": "Failed",
                    "message": format!("Backup failed: {e}"),
                }
            });
            if let Err(patch_err) = api
                .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(status))
                .await
            {
                warn!(name = %name, error = %patch_err, "Failed to update backup status to failed");
            }
            Err(e)
        }
    }
}

/// Record a successful run and schedule the next one
async fn finish_run(
    backup: &Backup,
    namespace: &str,
    api: &Api<Backup>,
    name: &str,
    backup_path: String,
    resource_counts: HashMap<String, i32>,
) -> Result<Action> {
    let now = Utc::now();
    let backup_count = backup
        .status
        .as_ref()
        .and_then(|s| s.backup_count)
        .unwrap_or(0)
        + 1;
    let total: i32 = resource_counts.values().sum();

    metrics::BACKUPS_TOTAL
        .with_label_values(&["success", namespace, name])
        .inc();
    metrics::BACKUP_RESOURCES
        .with_label_values(&[namespace, name])
        .set(total as f64);

    match schedule::next_fire(&backup.spec.schedule, now) {
        Ok(next) => {
            let status = json!({
                "status": {
                    "phase": "Scheduled",
                    "message": format!(
                        "Backup completed successfully. Next backup scheduled for {}",
                        next.format("%Y-%m-%d %H:%M:%S")
                    ),
                    "lastBackupTime": now,
                    "nextBackupTime": next,
                    "backupCount": backup_count,
                    "resourceCounts": resource_counts,
                    "backupPath": backup_path,
                }
            });
            api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(status))
                .await?;

            let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            info!(
                name = %name,
                next_backup_time = %next,
                backup_count = backup_count,
                "Backup completed successfully, scheduled next backup"
            );
            Ok(Action::requeue(delay))
        }
        Err(e) => {
            // The run succeeded but the schedule no longer parses; keep the
            // results and stop rescheduling.
            warn!(name = %name, error = %e, "Backup completed but next run could not be scheduled");
            let status = json!({
                "status": {
                    "phase": "Completed",
                    "message": format!(
                        "Backup completed successfully, but failed to schedule next backup: \
                         invalid cron schedule '{}'",
                        backup.spec.schedule
                    ),
                    "lastBackupTime": now,
                    "backupCount": backup_count,
                    "resourceCounts": resource_counts,
                    "backupPath": backup_path,
                }
            });
            api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(status))
                .await?;

            Ok(Action::await_change())
        }
    }
}

/// Execute one backup run, returning the path written and per-kind counts
async fn perform_backup(
    backup: &Backup,
    client: &Client,
    api: &Api<Backup>,
    name: &str,
) -> Result<(String, HashMap<String, i32>)> {
    let status = json!({
        "status": {
            "phase": "Running",
            "message": "Backup in progress",
        }
    });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(status))
        .await?;

    let store = StoreClient::new(&backup.spec.storage_location)?;
    let bucket = &backup.spec.storage_location.bucket;
    if store.ensure_bucket(bucket).await? {
        info!(bucket = %bucket, "Created bucket");
    }

    let backup_path = backup_path_for(Utc::now());
    let source = &backup.spec.source;

    let namespaces = resources::namespaces_to_backup(client, source).await?;
    let resource_types = resources::resource_types_for(source);

    info!(
        name = %name,
        namespaces = ?namespaces,
        resource_types = ?resource_types,
        backup_path = %backup_path,
        include_cluster_resources = source.include_cluster_resources,
        "Starting backup operation"
    );

    let mut resource_counts = HashMap::new();

    for namespace in &namespaces {
        for resource_type in &resource_types {
            let count = resources::backup_namespaced_kind(
                client,
                &store,
                bucket,
                &backup_path,
                namespace,
                source,
                resource_type,
            )
            .await?;
            resource_counts.insert(format!("{namespace}/{resource_type}"), count);
            if count > 0 {
                info!(
                    namespace = %namespace,
                    resource_type = %resource_type,
                    count = count,
                    "Backed up namespaced resources"
                );
            }
        }
    }

    if source.include_cluster_resources {
        for resource_type in resources::cluster_resource_types() {
            let count = resources::backup_cluster_kind(
                client,
                &store,
                bucket,
                &backup_path,
                source,
                &resource_type,
            )
            .await?;
            resource_counts.insert(format!("cluster/{resource_type}"), count);
            if count > 0 {
                info!(
                    resource_type = %resource_type,
                    count = count,
                    "Backed up cluster resources"
                );
            }
        }
    }

    info!(
        name = %name,
        bucket = %bucket,
        backup_path = %backup_path,
        resource_counts = ?resource_counts,
        "Backup operation completed successfully"
    );

    Ok((backup_path, resource_counts))
}

/// Bucket prefix for a run starting at the given instant
pub fn backup_path_for(now: DateTime<Utc>) -> String {
    format!("backups/cluster-backup/{}", now.format("%Y-%m-%dT%H-%M-%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn backup_path_uses_utc_timestamp_with_dashes() {
        let at = Utc.with_ymd_and_hms(2025, 1, 21, 2, 0, 0).unwrap();
        assert_eq!(
            backup_path_for(at),
            "backups/cluster-backup/2025-01-21T02-00-00"
        );
    }

    #[test]
    fn backup_paths_differ_per_second() {
        let first = Utc.with_ymd_and_hms(2025, 1, 21, 2, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2025, 1, 21, 2, 0, 1).unwrap();
        assert_ne!(backup_path_for(first), backup_path_for(second));
    }
}
