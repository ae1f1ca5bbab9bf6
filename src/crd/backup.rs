//! Backup Custom Resource Definition

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Backup resource specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "clusterbackup.dev",
    version = "v1alpha1",
    kind = "Backup",
    plural = "backups",
    singular = "backup",
    shortname = "bk",
    namespaced,
    status = "BackupStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Last Backup", "type": "string", "jsonPath": ".status.lastBackupTime"}"#,
    printcolumn = r#"{"name": "Next Backup", "type": "string", "jsonPath": ".status.nextBackupTime"}"#,
    printcolumn = r#"{"name": "Count", "type": "integer", "jsonPath": ".status.backupCount"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// What to back up
    pub source: BackupSource,

    /// Cron schedule (5-field, or a descriptor such as @daily)
    pub schedule: String,

    /// How long to keep backups (recorded only, not enforced)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<String>,

    /// Where to store backups
    pub storage_location: StorageLocation,
}

/// Source selector for a backup
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupSource {
    /// Single namespace to back up (legacy, superseded by namespaces)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Namespaces to back up; "*" means all except excluded ones
    #[serde(default)]
    pub namespaces: Vec<String>,

    /// Namespaces excluded from wildcard or default selection
    #[serde(default)]
    pub exclude_namespaces: Vec<String>,

    /// Resource types to back up (lowercase plural tags)
    #[serde(default)]
    pub resource_types: Vec<String>,

    /// Label selector applied to every listed kind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,

    /// Also back up cluster-scoped resources
    #[serde(default)]
    pub include_cluster_resources: bool,
}

/// Object storage location and credentials
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageLocation {
    /// Provider tag (e.g. "minio", "s3")
    pub provider: String,

    /// Bucket name
    pub bucket: String,

    /// Endpoint URL; the scheme is stripped before use
    #[serde(default)]
    pub endpoint: String,

    /// Access key (defaults to the workshop MinIO credentials when empty)
    #[serde(default)]
    pub access_key: String,

    /// Secret key (defaults to the workshop MinIO credentials when empty)
    #[serde(default)]
    pub secret_key: String,
}

/// Backup status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    /// Current phase (New, Scheduled, Running, Completed, Failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Timestamp of the last successful backup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_backup_time: Option<DateTime<Utc>>,

    /// Timestamp of the next scheduled backup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_backup_time: Option<DateTime<Utc>>,

    /// Total number of successful backups
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_count: Option<i32>,

    /// Objects written per "namespace/kind" (or "cluster/kind") key
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub resource_counts: HashMap<String, i32>,

    /// Bucket prefix of the most recent successful run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<String>,
}
