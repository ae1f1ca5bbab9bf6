//! Restore reconciler
//!
//! Drives a Restore through New -> Validating -> Downloading -> Restoring
//! and into Completed or Failed. Each phase transition persists status and
//! requests an immediate re-enqueue, so every phase runs in its own
//! reconcile. Completed and Failed are terminal.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::{Patch, PatchParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    runtime::controller::Action,
    Api, Client, ResourceExt,
};
use serde_json::json;
use tracing::{error, info, warn};

use crate::crd::{
    BackupInfo, FailedResource, Restore, RestoreTarget, RestoredResource, SkippedResource,
};
use crate::error::{Error, Result};
use crate::metrics;
use crate::resources::{self, BackupEntry};
use crate::store::StoreClient;

/// Field manager for status patches
const FIELD_MANAGER: &str = "cluster-backup-operator";

/// Allowed conflict resolution strategies
const CONFLICT_STRATEGIES: &[&str] = &["skip", "overwrite", "fail"];

/// Validate the Restore spec
pub fn validate(restore: &Restore) -> Result<()> {
    if restore.spec.source.backup_path.is_empty() {
        return Err(Error::validation("backup path is required"));
    }

    let storage = &restore.spec.source.storage_location;
    if storage.provider.is_empty() {
        return Err(Error::validation("storage provider is required"));
    }
    if storage.bucket.is_empty() {
        return Err(Error::validation("storage bucket is required"));
    }
    if storage.endpoint.is_empty() {
        return Err(Error::validation("storage endpoint is required"));
    }

    let conflict = &restore.spec.target.conflict_resolution;
    if !conflict.is_empty() && !CONFLICT_STRATEGIES.contains(&conflict.as_str()) {
        return Err(Error::validation(format!(
            "invalid conflict resolution strategy: {conflict} (must be skip, overwrite, or fail)"
        )));
    }

    Ok(())
}

/// Reconcile one Restore object
pub async fn reconcile(restore: &Restore, client: &Client, namespace: &str) -> Result<Action> {
    let name = restore.name_any();
    let api: Api<Restore> = Api::namespaced(client.clone(), namespace);

    let phase = restore
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("");

    match phase {
        "" => initialize(&api, &name).await,
        "New" => handle_validating(restore, &api, &name).await,
        "Validating" => handle_downloading(restore, &api, &name).await,
        "Downloading" => handle_restoring(restore, client, namespace, &api, &name).await,
        // Completed and Failed are terminal; a crash mid-Restoring also
        // parks the object until the user recreates it.
        _ => Ok(Action::await_change()),
    }
}

/// Unset phase: initialize the status and come back immediately
async fn initialize(api: &Api<Restore>, name: &str) -> Result<Action> {
    let status = json!({
        "status": {
            "phase": "New",
            "message": "Restore resource created",
            "startTime": Utc::now(),
        }
    });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(status))
        .await?;

    info!(name = %name, "Initialized restore status");
    Ok(Action::requeue(Duration::ZERO))
}

/// New phase: validate the configuration and the backup source
async fn handle_validating(restore: &Restore, api: &Api<Restore>, name: &str) -> Result<Action> {
    let status = json!({
        "status": {
            "phase": "Validating",
            "message": "Validating backup source and restore configuration",
        }
    });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(status))
        .await?;

    if let Err(e) = validate(restore) {
        return fail(api, name, format!("Validation failed: {e}"), e).await;
    }

    if let Err(e) = validate_backup_source(restore).await {
        return fail(api, name, format!("Backup source validation failed: {e}"), e).await;
    }

    info!(name = %name, "Validation completed successfully");
    Ok(Action::requeue(Duration::ZERO))
}

/// Validating phase: analyze the backup contents
async fn handle_downloading(restore: &Restore, api: &Api<Restore>, name: &str) -> Result<Action> {
    let status = json!({
        "status": {
            "phase": "Downloading",
            "message": "Downloading and analyzing backup data",
        }
    });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(status))
        .await?;

    match analyze_backup(restore).await {
        Ok(backup_info) => {
            info!(
                name = %name,
                total_resources = backup_info.total_resources,
                namespaces = ?backup_info.namespaces,
                "Backup analysis completed"
            );
            let status = json!({ "status": { "backupInfo": backup_info } });
            api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(status))
                .await?;
            Ok(Action::requeue(Duration::ZERO))
        }
        Err(e) => fail(api, name, format!("Failed to analyze backup: {e}"), e).await,
    }
}

/// Downloading phase: perform the actual restoration
async fn handle_restoring(
    restore: &Restore,
    client: &Client,
    namespace: &str,
    api: &Api<Restore>,
    name: &str,
) -> Result<Action> {
    let status = json!({
        "status": {
            "phase": "Restoring",
            "message": "Restoring resources to target cluster",
        }
    });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(status))
        .await?;

    match perform_restore(restore, client).await {
        Ok(outcome) => {
            metrics::RESTORES_TOTAL
                .with_label_values(&["success", namespace, name])
                .inc();
            metrics::RESTORED_RESOURCES
                .with_label_values(&[namespace, name])
                .set(outcome.restored.len() as f64);

            info!(
                name = %name,
                restored = outcome.restored.len(),
                failed = outcome.failed.len(),
                skipped = outcome.skipped.len(),
                "Restore completed"
            );

            let status = json!({
                "status": {
                    "phase": "Completed",
                    "message": "Restore completed successfully",
                    "completionTime": Utc::now(),
                    "resourceCounts": outcome.resource_counts,
                    "restoredResources": outcome.restored,
                    "failedResources": outcome.failed,
                    "skippedResources": outcome.skipped,
                }
            });
            api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(status))
                .await?;

            Ok(Action::await_change())
        }
        Err(e) => {
            metrics::RESTORES_TOTAL
                .with_label_values(&["failure", namespace, name])
                .inc();
            fail(api, name, format!("Restore failed: {e}"), e).await
        }
    }
}

/// Mark the restore as failed, then surface the error to the controller
async fn fail(api: &Api<Restore>, name: &str, message: String, err: Error) -> Result<Action> {
    let status = json!({
        "status": {
            "phase": "Failed",
            "message": message,
            "completionTime": Utc::now(),
        }
    });
    if let Err(patch_err) = api
        .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(status))
        .await
    {
        error!(name = %name, error = %patch_err, "Failed to update restore status to failed");
    }
    Err(err)
}

/// Confirm the bucket exists and holds at least one object under the path
async fn validate_backup_source(restore: &Restore) -> Result<()> {
    let store = StoreClient::new(&restore.spec.source.storage_location)?;
    let bucket = &restore.spec.source.storage_location.bucket;
    let backup_path = &restore.spec.source.backup_path;

    if !store.bucket_exists(bucket).await? {
        return Err(Error::validation(format!("bucket {bucket} does not exist")));
    }

    let keys = store.list_prefix(bucket, backup_path).await?;
    if keys.is_empty() {
        return Err(Error::validation(format!(
            "no backup found at path {backup_path}"
        )));
    }

    Ok(())
}

/// Walk the backup once and derive counts, kinds, and namespaces
async fn analyze_backup(restore: &Restore) -> Result<BackupInfo> {
    let store = StoreClient::new(&restore.spec.source.storage_location)?;
    let bucket = &restore.spec.source.storage_location.bucket;
    let backup_path = &restore.spec.source.backup_path;

    let keys = store.list_prefix(bucket, backup_path).await?;

    let mut backup_info = BackupInfo {
        backup_path: backup_path.clone(),
        ..Default::default()
    };

    for key in &keys {
        let Some(entry) = resources::parse_backup_key(key) else {
            continue;
        };

        if let BackupEntry::Namespaced { namespace, .. } = &entry {
            if !backup_info.namespaces.contains(namespace) {
                backup_info.namespaces.push(namespace.clone());
            }
        }

        let resource_type = entry.resource_type();
        if !backup_info.resource_types.iter().any(|t| t == resource_type) {
            backup_info.resource_types.push(resource_type.to_string());
        }

        backup_info.total_resources += 1;
    }

    Ok(backup_info)
}

/// Accumulated results of one restore pass
#[derive(Default)]
struct RestoreOutcome {
    resource_counts: HashMap<String, i32>,
    restored: Vec<RestoredResource>,
    failed: Vec<FailedResource>,
    skipped: Vec<SkippedResource>,
}

/// What happened to a single entry
enum RestoreDisposition {
    Applied(RestoredResource),
    Skipped(SkippedResource),
}

/// Replay every entry under the backup path against the target cluster
async fn perform_restore(restore: &Restore, client: &Client) -> Result<RestoreOutcome> {
    let store = StoreClient::new(&restore.spec.source.storage_location)?;
    let bucket = &restore.spec.source.storage_location.bucket;
    let backup_path = &restore.spec.source.backup_path;

    let backup_info = restore.status.as_ref().and_then(|s| s.backup_info.as_ref());
    let target_namespaces = target_namespaces(restore, backup_info);
    let target_resource_types = target_resource_types(restore, backup_info);

    let mut outcome = RestoreOutcome::default();

    if restore.spec.options.create_namespaces {
        for ns in &target_namespaces {
            if let Err(e) = ensure_namespace(client, ns).await {
                warn!(namespace = %ns, error = %e, "Failed to create namespace");
                outcome.failed.push(FailedResource {
                    api_version: "v1".to_string(),
                    kind: "Namespace".to_string(),
                    name: ns.clone(),
                    namespace: String::new(),
                    error: e.to_string(),
                });
            }
        }
    }

    let keys = store.list_prefix(bucket, backup_path).await?;
    let options = &restore.spec.options;
    let target = &restore.spec.target;

    for key in &keys {
        let Some(entry) = resources::parse_backup_key(key) else {
            continue;
        };

        if !target_resource_types.is_empty()
            && !target_resource_types.iter().any(|t| t == entry.resource_type())
        {
            continue;
        }

        let effective_namespace = match &entry {
            BackupEntry::Cluster { .. } => {
                if options.skip_cluster_resources {
                    continue;
                }
                None
            }
            BackupEntry::Namespaced { namespace, .. } => {
                let effective = map_namespace(namespace, target);
                if !target_namespaces.is_empty() && !target_namespaces.contains(&effective) {
                    continue;
                }
                Some(effective)
            }
        };

        let count_key = match &effective_namespace {
            Some(ns) => format!("{ns}/{}", entry.resource_type()),
            None => format!("cluster/{}", entry.resource_type()),
        };

        if options.dry_run || options.validate_only {
            info!(
                resource_type = %entry.resource_type(),
                name = %entry.name(),
                namespace = effective_namespace.as_deref().unwrap_or(""),
                "Dry run: would restore resource"
            );
            outcome.restored.push(RestoredResource {
                api_version: String::new(),
                kind: entry.resource_type().to_string(),
                name: entry.name().to_string(),
                namespace: effective_namespace.clone().unwrap_or_default(),
                action: "dry-run".to_string(),
            });
        } else {
            let applied = restore_entry(
                client,
                &store,
                bucket,
                key,
                &entry,
                effective_namespace.as_deref(),
                &target.conflict_resolution,
            )
            .await;

            match applied {
                Ok(RestoreDisposition::Applied(resource)) => outcome.restored.push(resource),
                Ok(RestoreDisposition::Skipped(resource)) => outcome.skipped.push(resource),
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to restore resource");
                    outcome.failed.push(FailedResource {
                        api_version: String::new(),
                        kind: entry.resource_type().to_string(),
                        name: entry.name().to_string(),
                        namespace: effective_namespace.clone().unwrap_or_default(),
                        error: e.to_string(),
                    });
                }
            }
        }

        *outcome.resource_counts.entry(count_key).or_insert(0) += 1;
    }

    Ok(outcome)
}

/// Restore a single stored object, applying the conflict policy
async fn restore_entry(
    client: &Client,
    store: &StoreClient,
    bucket: &str,
    key: &str,
    entry: &BackupEntry,
    effective_namespace: Option<&str>,
    conflict_resolution: &str,
) -> Result<RestoreDisposition> {
    let data = store.get(bucket, key).await?;
    let mut document: serde_json::Value = serde_json::from_slice(&data)
        .map_err(|e| Error::validation(format!("failed to parse resource JSON: {e}")))?;

    resources::clean_for_restore(&mut document, effective_namespace);

    let api_version = document
        .get("apiVersion")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::validation("stored resource is missing apiVersion"))?
        .to_string();
    let kind = document
        .get("kind")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::validation("stored resource is missing kind"))?
        .to_string();

    // The object key carries the plural tag, so no pluralization guessing
    let (group, version) = match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version.as_str()),
    };
    let gvk = GroupVersionKind::gvk(group, version, &kind);
    let api_resource = ApiResource::from_gvk_with_plural(&gvk, entry.resource_type());

    let object: DynamicObject = serde_json::from_value(document)?;
    let name = object.name_any();

    let api: Api<DynamicObject> = match effective_namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, &api_resource),
        None => Api::all_with(client.clone(), &api_resource),
    };

    let namespace = effective_namespace.unwrap_or_default().to_string();

    match api.get_opt(&name).await? {
        None => {
            api.create(&PostParams::default(), &object).await?;
            Ok(RestoreDisposition::Applied(RestoredResource {
                api_version,
                kind,
                name,
                namespace,
                action: "created".to_string(),
            }))
        }
        Some(existing) => match conflict_resolution {
            "overwrite" => {
                let mut object = object;
                object.metadata.resource_version = existing.resource_version();
                api.replace(&name, &PostParams::default(), &object).await?;
                Ok(RestoreDisposition::Applied(RestoredResource {
                    api_version,
                    kind,
                    name,
                    namespace,
                    action: "updated".to_string(),
                }))
            }
            "fail" => Err(Error::validation(format!(
                "resource {kind}/{name} already exists"
            ))),
            // skip is the default strategy
            _ => Ok(RestoreDisposition::Skipped(SkippedResource {
                api_version,
                kind,
                name,
                namespace,
                reason: "resource already exists".to_string(),
            })),
        },
    }
}

/// Target namespaces: the spec's allow-list, else everything from the backup
fn target_namespaces(restore: &Restore, backup_info: Option<&BackupInfo>) -> Vec<String> {
    if !restore.spec.target.namespaces.is_empty() {
        return restore.spec.target.namespaces.clone();
    }
    backup_info
        .map(|info| info.namespaces.clone())
        .unwrap_or_default()
}

/// Target resource types: the spec's allow-list, else everything from the backup
fn target_resource_types(restore: &Restore, backup_info: Option<&BackupInfo>) -> Vec<String> {
    if !restore.spec.target.resource_types.is_empty() {
        return restore.spec.target.resource_types.clone();
    }
    backup_info
        .map(|info| info.resource_types.clone())
        .unwrap_or_default()
}

/// Map a source namespace to its target: explicit mapping first, then the
/// single-target collapse, otherwise preserve the source
fn map_namespace(source_namespace: &str, target: &RestoreTarget) -> String {
    if let Some(mapped) = target.namespace_mapping.get(source_namespace) {
        return mapped.clone();
    }
    if target.namespaces.len() == 1 {
        return target.namespaces[0].clone();
    }
    source_namespace.to_string()
}

/// Create a namespace if it does not already exist
async fn ensure_namespace(client: &Client, name: &str) -> Result<()> {
    let api: Api<Namespace> = Api::all(client.clone());
    if api.get_opt(name).await?.is_some() {
        return Ok(());
    }

    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    api.create(&PostParams::default(), &namespace).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(
        namespaces: &[&str],
        mapping: &[(&str, &str)],
    ) -> RestoreTarget {
        RestoreTarget {
            namespaces: namespaces.iter().map(|s| s.to_string()).collect(),
            namespace_mapping: mapping
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn explicit_mapping_takes_precedence() {
        let target = target(&["a", "b"], &[("src", "tgt")]);
        assert_eq!(map_namespace("src", &target), "tgt");
    }

    #[test]
    fn single_target_namespace_collapses_everything() {
        let target = target(&["only"], &[]);
        assert_eq!(map_namespace("src", &target), "only");
    }

    #[test]
    fn mapping_wins_over_single_target_collapse() {
        let target = target(&["only"], &[("src", "tgt")]);
        assert_eq!(map_namespace("src", &target), "tgt");
    }

    #[test]
    fn unmapped_namespace_is_preserved() {
        let target = target(&["a", "b"], &[]);
        assert_eq!(map_namespace("src", &target), "src");
    }
}
