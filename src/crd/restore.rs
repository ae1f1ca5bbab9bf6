//! Restore Custom Resource Definition

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::StorageLocation;

/// Restore resource specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "clusterbackup.dev",
    version = "v1alpha1",
    kind = "Restore",
    plural = "restores",
    singular = "restore",
    shortname = "rst",
    namespaced,
    status = "RestoreStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Backup Path", "type": "string", "jsonPath": ".spec.source.backupPath"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSpec {
    /// Where to restore from
    pub source: RestoreSource,

    /// What and where to restore
    #[serde(default)]
    pub target: RestoreTarget,

    /// Restore behavior options
    #[serde(default)]
    pub options: RestoreOptions,
}

/// Backup source location for a restore
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSource {
    /// Storage location holding the backup
    pub storage_location: StorageLocation,

    /// Bucket prefix of the backup to replay
    pub backup_path: String,
}

/// Restoration target and behavior
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoreTarget {
    /// Namespaces to restore into; empty restores all namespaces from the backup
    #[serde(default)]
    pub namespaces: Vec<String>,

    /// Resource types to restore; empty restores all types from the backup
    #[serde(default)]
    pub resource_types: Vec<String>,

    /// Strategy when a resource already exists: skip, overwrite, fail
    #[serde(default)]
    pub conflict_resolution: String,

    /// Label selector for filtering resources to restore
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,

    /// Source-to-target namespace rewrites
    #[serde(default)]
    pub namespace_mapping: HashMap<String, String>,
}

/// Additional restore options
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOptions {
    /// Validate without restoring
    #[serde(default)]
    pub dry_run: bool,

    /// Validate the backup without restoring
    #[serde(default)]
    pub validate_only: bool,

    /// Create target namespaces that do not exist
    #[serde(default)]
    pub create_namespaces: bool,

    /// Skip cluster-scoped resources
    #[serde(default)]
    pub skip_cluster_resources: bool,
}

/// Restore status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoreStatus {
    /// Current phase (New, Validating, Downloading, Restoring, Completed, Failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// When the restore started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// When the restore completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    /// Entries processed per "namespace/kind" (or "cluster/kind") key
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub resource_counts: HashMap<String, i32>,

    /// Resources that were successfully restored
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restored_resources: Vec<RestoredResource>,

    /// Resources that failed to restore
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_resources: Vec<FailedResource>,

    /// Resources that were skipped due to conflicts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_resources: Vec<SkippedResource>,

    /// Information about the source backup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_info: Option<BackupInfo>,
}

/// A successfully restored resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoredResource {
    /// API version of the resource
    #[serde(default)]
    pub api_version: String,

    /// Kind of the resource
    pub kind: String,

    /// Name of the resource
    pub name: String,

    /// Namespace (empty for cluster-scoped resources)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Action taken (created, updated, dry-run)
    pub action: String,
}

/// A resource that failed to restore
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailedResource {
    /// API version of the resource
    #[serde(default)]
    pub api_version: String,

    /// Kind of the resource
    pub kind: String,

    /// Name of the resource
    pub name: String,

    /// Namespace (empty for cluster-scoped resources)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Why the restoration failed
    pub error: String,
}

/// A resource that was skipped during restoration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SkippedResource {
    /// API version of the resource
    #[serde(default)]
    pub api_version: String,

    /// Kind of the resource
    pub kind: String,

    /// Name of the resource
    pub name: String,

    /// Namespace (empty for cluster-scoped resources)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Why the resource was skipped
    pub reason: String,
}

/// Information about the source backup, derived while downloading
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupInfo {
    /// Prefix in storage where the backup was found
    pub backup_path: String,

    /// When the backup was created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_time: Option<DateTime<Utc>>,

    /// Total number of resources in the backup
    #[serde(default)]
    pub total_resources: i32,

    /// Distinct resource types found in the backup
    #[serde(default)]
    pub resource_types: Vec<String>,

    /// Distinct namespaces found in the backup
    #[serde(default)]
    pub namespaces: Vec<String>,
}
