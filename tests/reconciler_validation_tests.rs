//! Integration tests for reconciler validation logic
//!
//! These tests verify that the validation functions for each CRD type
//! correctly accept valid specs and reject invalid ones, and that the pure
//! scheduling helpers behave as the phase machines expect.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use cluster_backup_operator::crd::{
    Backup, BackupSource, BackupSpec, Restore, RestoreSource, RestoreSpec, RestoreTarget,
    StorageLocation,
};
use cluster_backup_operator::reconcilers::restore;
use cluster_backup_operator::schedule;

// ============================================================================
// Test Helpers
// ============================================================================

fn valid_storage_location() -> StorageLocation {
    StorageLocation {
        provider: "minio".to_string(),
        bucket: "test-bucket".to_string(),
        endpoint: "http://localhost:9000".to_string(),
        access_key: "minioadmin".to_string(),
        secret_key: "minioadmin123".to_string(),
    }
}

fn default_metadata(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some("default".to_string()),
        ..Default::default()
    }
}

fn valid_backup_spec() -> BackupSpec {
    BackupSpec {
        source: BackupSource {
            namespace: Some("test-namespace".to_string()),
            resource_types: vec![
                "deployments".to_string(),
                "services".to_string(),
                "configmaps".to_string(),
            ],
            ..Default::default()
        },
        schedule: "0 2 * * *".to_string(),
        retention: None,
        storage_location: valid_storage_location(),
    }
}

fn valid_restore_spec() -> RestoreSpec {
    RestoreSpec {
        source: RestoreSource {
            storage_location: valid_storage_location(),
            backup_path: "backups/cluster-backup/2025-01-21T02-00-00".to_string(),
        },
        target: RestoreTarget::default(),
        options: Default::default(),
    }
}

fn create_restore(spec: RestoreSpec) -> Restore {
    Restore {
        metadata: default_metadata("test-restore"),
        spec,
        status: None,
    }
}

// ============================================================================
// Backup Resource Tests
// ============================================================================

#[test]
fn backup_resource_carries_spec_fields() {
    let backup = Backup {
        metadata: default_metadata("test-backup"),
        spec: valid_backup_spec(),
        status: None,
    };

    assert_eq!(
        backup.spec.source.namespace.as_deref(),
        Some("test-namespace")
    );
    assert_eq!(backup.spec.storage_location.provider, "minio");
    assert_eq!(backup.spec.source.resource_types.len(), 3);
}

#[test]
fn backup_spec_schedule_parses() {
    let backup = valid_backup_spec();
    assert!(schedule::parse(&backup.schedule).is_ok());
}

// ============================================================================
// Schedule Evaluation Tests
// ============================================================================

#[test]
fn next_fire_is_in_the_future_for_daily_schedule() {
    let now = Utc::now();
    let next = schedule::next_fire("0 2 * * *", now).unwrap();
    assert!(next > now, "next fire {next} should be after {now}");
}

#[test]
fn next_fire_is_within_five_minutes_for_five_minute_schedule() {
    let now = Utc::now();
    let next = schedule::next_fire("*/5 * * * *", now).unwrap();
    assert!(next > now);
    assert!(next - now <= chrono::Duration::minutes(5));
}

#[test]
fn next_fire_is_within_one_minute_for_every_minute_schedule() {
    let now = Utc::now();
    let next = schedule::next_fire("* * * * *", now).unwrap();
    assert!(next > now);
    assert!(next - now <= chrono::Duration::minutes(1));
}

#[test]
fn invalid_schedule_returns_error() {
    assert!(schedule::next_fire("invalid cron", Utc::now()).is_err());
}

#[test]
fn consecutive_fires_are_ordered() {
    let now = Utc::now();
    let first = schedule::next_fire("0 */6 * * *", now).unwrap();
    let second = schedule::next_fire("0 */6 * * *", first).unwrap();
    assert!(second > first);
}

// ============================================================================
// Restore Validation Tests
// ============================================================================

#[test]
fn restore_valid_spec_passes_validation() {
    let restore = create_restore(valid_restore_spec());
    assert!(restore::validate(&restore).is_ok());
}

#[test]
fn restore_empty_backup_path_fails_validation() {
    let mut spec = valid_restore_spec();
    spec.source.backup_path = String::new();

    let restore = create_restore(spec);
    let result = restore::validate(&restore);

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("backup path"));
}

#[test]
fn restore_missing_provider_fails_validation() {
    let mut spec = valid_restore_spec();
    spec.source.storage_location.provider = String::new();

    let restore = create_restore(spec);
    let result = restore::validate(&restore);

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("provider"));
}

#[test]
fn restore_missing_bucket_fails_validation() {
    let mut spec = valid_restore_spec();
    spec.source.storage_location.bucket = String::new();

    let restore = create_restore(spec);
    let result = restore::validate(&restore);

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("bucket"));
}

#[test]
fn restore_missing_endpoint_fails_validation() {
    let mut spec = valid_restore_spec();
    spec.source.storage_location.endpoint = String::new();

    let restore = create_restore(spec);
    let result = restore::validate(&restore);

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("endpoint"));
}

#[test]
fn restore_invalid_conflict_resolution_fails_validation() {
    let mut spec = valid_restore_spec();
    spec.target.conflict_resolution = "merge".to_string();

    let restore = create_restore(spec);
    let result = restore::validate(&restore);

    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("conflict resolution"));
}

#[test]
fn restore_valid_conflict_resolutions_pass_validation() {
    for strategy in ["skip", "overwrite", "fail", ""] {
        let mut spec = valid_restore_spec();
        spec.target.conflict_resolution = strategy.to_string();

        let restore = create_restore(spec);
        assert!(
            restore::validate(&restore).is_ok(),
            "strategy '{}' should be valid",
            strategy
        );
    }
}

#[test]
fn restore_empty_target_allowed_for_restore_all() {
    let mut spec = valid_restore_spec();
    spec.target.namespaces = vec![];
    spec.target.resource_types = vec![];

    let restore = create_restore(spec);
    assert!(restore::validate(&restore).is_ok());
}

#[test]
fn restore_namespace_mapping_passes_validation() {
    let mut spec = valid_restore_spec();
    spec.target
        .namespace_mapping
        .insert("src".to_string(), "tgt".to_string());

    let restore = create_restore(spec);
    assert!(restore::validate(&restore).is_ok());
}

#[test]
fn restore_dry_run_mode_passes_validation() {
    let mut spec = valid_restore_spec();
    spec.options.dry_run = true;

    let restore = create_restore(spec);
    assert!(restore::validate(&restore).is_ok());
}

// ============================================================================
// Backup Phase Tests
// ============================================================================

#[test]
fn backup_phases_cycle_through_expected_values() {
    // In normal operation, backups cycle between Scheduled -> Running ->
    // Scheduled. The Completed phase is only used as a fallback when
    // rescheduling fails after a successful run.
    let expected_phases = ["New", "Scheduled", "Running", "Completed", "Failed"];

    let mut backup = Backup {
        metadata: default_metadata("test-backup"),
        spec: valid_backup_spec(),
        status: None,
    };

    for phase in expected_phases {
        backup.status = Some(cluster_backup_operator::crd::BackupStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        });
        assert_eq!(
            backup.status.as_ref().unwrap().phase.as_deref(),
            Some(phase)
        );
    }
}

#[test]
fn restore_status_serializes_in_camel_case() {
    let status = cluster_backup_operator::crd::RestoreStatus {
        phase: Some("Completed".to_string()),
        backup_info: Some(cluster_backup_operator::crd::BackupInfo {
            backup_path: "backups/cluster-backup/2025-01-21T02-00-00".to_string(),
            total_resources: 3,
            ..Default::default()
        }),
        ..Default::default()
    };

    let value = serde_json::to_value(&status).unwrap();
    assert_eq!(value["phase"], "Completed");
    assert_eq!(value["backupInfo"]["totalResources"], 3);
    assert_eq!(
        value["backupInfo"]["backupPath"],
        "backups/cluster-backup/2025-01-21T02-00-00"
    );
}
