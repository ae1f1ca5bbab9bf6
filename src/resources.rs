//! Resource enumeration, serialization, and restore cleanup
//!
//! Backup runs enumerate cluster objects kind by kind through the handlers
//! here, and restores parse object-store keys back into entries and scrub
//! the stored documents before applying them. The per-kind dispatch tables
//! are the extension point for supporting more kinds.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, PersistentVolume, PersistentVolumeClaim, Secret, Service,
};
use kube::api::{Api, ListParams};
use kube::core::Selector;
use kube::{Client, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crd::BackupSource;
use crate::error::{Error, Result};
use crate::store::StoreClient;

/// Namespace-scoped kinds backed up when the spec names none
pub const DEFAULT_RESOURCE_TYPES: &[&str] = &[
    "deployments",
    "services",
    "configmaps",
    "secrets",
    "persistentvolumeclaims",
    "ingresses",
];

/// Cluster-scoped kinds backed up when includeClusterResources is set
pub const CLUSTER_RESOURCE_TYPES: &[&str] = &[
    "clusterroles",
    "clusterrolebindings",
    "persistentvolumes",
    "storageclasses",
];

/// Namespaces excluded from the default (unset) selection
pub const SYSTEM_NAMESPACES: &[&str] = &["kube-system", "kube-public", "kube-node-lease"];

/// Secret type holding service account tokens, never backed up
const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";

/// Resource types selected by a backup source
pub fn resource_types_for(source: &BackupSource) -> Vec<String> {
    if !source.resource_types.is_empty() {
        return source.resource_types.clone();
    }
    DEFAULT_RESOURCE_TYPES.iter().map(|s| s.to_string()).collect()
}

/// Cluster-scoped resource types to back up
pub fn cluster_resource_types() -> Vec<String> {
    CLUSTER_RESOURCE_TYPES.iter().map(|s| s.to_string()).collect()
}

/// Resolve the concrete namespace list for a backup source
pub async fn namespaces_to_backup(client: &Client, source: &BackupSource) -> Result<Vec<String>> {
    let all = if requires_namespace_list(source) {
        list_namespace_names(client).await?
    } else {
        Vec::new()
    };
    Ok(resolve_namespaces(source, &all))
}

/// The legacy single-namespace field, when it is the effective selection
fn legacy_single_namespace(source: &BackupSource) -> Option<String> {
    match &source.namespace {
        Some(ns) if !ns.is_empty() && source.namespaces.is_empty() => Some(ns.clone()),
        _ => None,
    }
}

/// Whether resolution needs the full namespace list from the cluster
fn requires_namespace_list(source: &BackupSource) -> bool {
    if legacy_single_namespace(source).is_some() {
        return false;
    }
    source.namespaces.is_empty() || source.namespaces.iter().any(|ns| ns == "*")
}

/// Apply the selection rules given the cluster's namespace list
pub(crate) fn resolve_namespaces(source: &BackupSource, all_namespaces: &[String]) -> Vec<String> {
    if let Some(ns) = legacy_single_namespace(source) {
        return vec![ns];
    }

    // Wildcard: everything except the explicit exclusions
    if source.namespaces.iter().any(|ns| ns == "*") {
        return all_namespaces
            .iter()
            .filter(|ns| !source.exclude_namespaces.contains(*ns))
            .cloned()
            .collect();
    }

    if !source.namespaces.is_empty() {
        return source.namespaces.clone();
    }

    // Nothing selected: everything except system namespaces and exclusions
    all_namespaces
        .iter()
        .filter(|ns| {
            !SYSTEM_NAMESPACES.contains(&ns.as_str()) && !source.exclude_namespaces.contains(*ns)
        })
        .cloned()
        .collect()
}

async fn list_namespace_names(client: &Client) -> Result<Vec<String>> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let list = namespaces.list(&ListParams::default()).await?;
    Ok(list.items.iter().map(|ns| ns.name_any()).collect())
}

/// List parameters carrying the source's label selector
pub fn list_params_for(source: &BackupSource) -> Result<ListParams> {
    let mut params = ListParams::default();
    if let Some(selector) = &source.label_selector {
        let selector: Selector = selector
            .clone()
            .try_into()
            .map_err(|e| Error::validation(format!("invalid label selector: {e}")))?;
        params = params.labels_from(&selector);
    }
    Ok(params)
}

/// Serialize a resource as it will be stored: the full object including
/// apiVersion and kind, pretty-printed with 2-space indent
pub fn encode_resource<K>(resource: &K) -> Result<Vec<u8>>
where
    K: k8s_openapi::Resource + Serialize,
{
    let mut value = serde_json::to_value(resource)?;
    if let serde_json::Value::Object(map) = &mut value {
        map.insert(
            "apiVersion".to_string(),
            serde_json::Value::String(K::API_VERSION.to_string()),
        );
        map.insert(
            "kind".to_string(),
            serde_json::Value::String(K::KIND.to_string()),
        );
    }
    Ok(serde_json::to_vec_pretty(&value)?)
}

/// Back up all matching objects of a namespace-scoped resource type
pub async fn backup_namespaced_kind(
    client: &Client,
    store: &StoreClient,
    bucket: &str,
    backup_path: &str,
    namespace: &str,
    source: &BackupSource,
    resource_type: &str,
) -> Result<i32> {
    let params = list_params_for(source)?;
    match resource_type {
        "deployments" => {
            backup_kind::<Deployment, _>(
                client, store, bucket, backup_path, namespace, &params, resource_type, |_| true,
            )
            .await
        }
        "services" => {
            backup_kind::<Service, _>(
                client,
                store,
                bucket,
                backup_path,
                namespace,
                &params,
                resource_type,
                include_service,
            )
            .await
        }
        "configmaps" => {
            backup_kind::<ConfigMap, _>(
                client, store, bucket, backup_path, namespace, &params, resource_type, |_| true,
            )
            .await
        }
        "secrets" => {
            backup_kind::<Secret, _>(
                client,
                store,
                bucket,
                backup_path,
                namespace,
                &params,
                resource_type,
                include_secret,
            )
            .await
        }
        "persistentvolumeclaims" => {
            backup_kind::<PersistentVolumeClaim, _>(
                client, store, bucket, backup_path, namespace, &params, resource_type, |_| true,
            )
            .await
        }
        // Ingress enumeration is not implemented in this revision; the kind
        // stays in the default set and reports zero.
        _ => Ok(0),
    }
}

/// Back up all matching objects of a cluster-scoped resource type
pub async fn backup_cluster_kind(
    client: &Client,
    store: &StoreClient,
    bucket: &str,
    backup_path: &str,
    source: &BackupSource,
    resource_type: &str,
) -> Result<i32> {
    let params = list_params_for(source)?;
    match resource_type {
        "persistentvolumes" => {
            backup_cluster::<PersistentVolume, _>(
                client, store, bucket, backup_path, &params, resource_type, |_| true,
            )
            .await
        }
        // RBAC and storage class handlers are not implemented in this
        // revision; they report zero rather than failing the run.
        _ => Ok(0),
    }
}

async fn backup_kind<K, F>(
    client: &Client,
    store: &StoreClient,
    bucket: &str,
    backup_path: &str,
    namespace: &str,
    params: &ListParams,
    resource_type: &str,
    keep: F,
) -> Result<i32>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + k8s_openapi::Resource
        + Clone
        + std::fmt::Debug
        + DeserializeOwned
        + Serialize,
    <K as kube::Resource>::DynamicType: Default,
    F: Fn(&K) -> bool,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    let list = api.list(params).await?;

    let mut count = 0;
    for item in list.items {
        if !keep(&item) {
            continue;
        }
        let name = item.name_any();
        let key = format!("{backup_path}/namespaces/{namespace}/{resource_type}/{name}.json");
        store.put(bucket, &key, encode_resource(&item)?).await?;
        count += 1;
    }

    Ok(count)
}

async fn backup_cluster<K, F>(
    client: &Client,
    store: &StoreClient,
    bucket: &str,
    backup_path: &str,
    params: &ListParams,
    resource_type: &str,
    keep: F,
) -> Result<i32>
where
    K: kube::Resource<Scope = k8s_openapi::ClusterResourceScope>
        + k8s_openapi::Resource
        + Clone
        + std::fmt::Debug
        + DeserializeOwned
        + Serialize,
    <K as kube::Resource>::DynamicType: Default,
    F: Fn(&K) -> bool,
{
    let api: Api<K> = Api::all(client.clone());
    let list = api.list(params).await?;

    let mut count = 0;
    for item in list.items {
        if !keep(&item) {
            continue;
        }
        let name = item.name_any();
        let key = format!("{backup_path}/cluster/{resource_type}/{name}.json");
        store.put(bucket, &key, encode_resource(&item)?).await?;
        count += 1;
    }

    Ok(count)
}

/// Service account tokens and other token secrets are system noise
fn include_secret(secret: &Secret) -> bool {
    if secret.type_.as_deref() == Some(SERVICE_ACCOUNT_TOKEN_TYPE) {
        return false;
    }
    let name = secret.name_any();
    !(name.starts_with("default-token-") || name.contains("token-"))
}

/// The implicit kubernetes service and system-namespace services are skipped
fn include_service(service: &Service) -> bool {
    let name = service.name_any();
    let namespace = service.namespace().unwrap_or_default();
    name != "kubernetes" && namespace != "kube-system" && namespace != "kube-public"
}

/// A parsed backup object key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupEntry {
    /// `<backupPath>/namespaces/<ns>/<type>/<name>.json`
    Namespaced {
        namespace: String,
        resource_type: String,
        name: String,
    },
    /// `<backupPath>/cluster/<type>/<name>.json`
    Cluster {
        resource_type: String,
        name: String,
    },
}

impl BackupEntry {
    /// The lowercase plural resource tag of this entry
    pub fn resource_type(&self) -> &str {
        match self {
            BackupEntry::Namespaced { resource_type, .. } => resource_type,
            BackupEntry::Cluster { resource_type, .. } => resource_type,
        }
    }

    /// The object name of this entry
    pub fn name(&self) -> &str {
        match self {
            BackupEntry::Namespaced { name, .. } => name,
            BackupEntry::Cluster { name, .. } => name,
        }
    }
}

/// Parse an object key against the backup layout. Returns None for keys that
/// are not JSON backup objects.
pub fn parse_backup_key(key: &str) -> Option<BackupEntry> {
    let stem = key.strip_suffix(".json")?;
    let parts: Vec<&str> = stem.split('/').collect();
    let n = parts.len();

    if n >= 4 && parts[n - 4] == "namespaces" {
        let (namespace, resource_type, name) = (parts[n - 3], parts[n - 2], parts[n - 1]);
        if namespace.is_empty() || resource_type.is_empty() || name.is_empty() {
            return None;
        }
        return Some(BackupEntry::Namespaced {
            namespace: namespace.to_string(),
            resource_type: resource_type.to_string(),
            name: name.to_string(),
        });
    }

    if n >= 3 && parts[n - 3] == "cluster" {
        let (resource_type, name) = (parts[n - 2], parts[n - 1]);
        if resource_type.is_empty() || name.is_empty() {
            return None;
        }
        return Some(BackupEntry::Cluster {
            resource_type: resource_type.to_string(),
            name: name.to_string(),
        });
    }

    None
}

/// Metadata fields that must not be carried into a restored object
const STRIPPED_METADATA_FIELDS: &[&str] = &[
    "resourceVersion",
    "uid",
    "generation",
    "creationTimestamp",
    "deletionTimestamp",
    "deletionGracePeriodSeconds",
    "selfLink",
    "managedFields",
];

/// Scrub a stored document before applying it to the target cluster
pub fn clean_for_restore(resource: &mut serde_json::Value, target_namespace: Option<&str>) {
    if let Some(metadata) = resource.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        for field in STRIPPED_METADATA_FIELDS {
            metadata.remove(*field);
        }
        // Rewrite the namespace only when the source object had one
        if let Some(target) = target_namespace {
            if metadata.contains_key("namespace") {
                metadata.insert(
                    "namespace".to_string(),
                    serde_json::Value::String(target.to_string()),
                );
            }
        }
    }

    if let Some(object) = resource.as_object_mut() {
        object.remove("status");
    }

    // Clear immutable allocations the target cluster must reassign
    match resource.get("kind").and_then(|k| k.as_str()) {
        Some("Service") => {
            if let Some(spec) = resource.get_mut("spec").and_then(|s| s.as_object_mut()) {
                spec.remove("clusterIP");
                spec.remove("clusterIPs");
            }
        }
        Some("PersistentVolumeClaim") => {
            if let Some(spec) = resource.get_mut("spec").and_then(|s| s.as_object_mut()) {
                spec.remove("volumeName");
            }
        }
        _ => {}
    }
}
