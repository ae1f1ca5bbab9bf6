//! S3-compatible object store client
//!
//! Thin wrapper over the AWS S3 SDK configured for MinIO-style endpoints:
//! static credentials from the resource spec, path-style addressing, and a
//! plaintext endpoint. A client is built per reconcile; it holds no state
//! beyond the SDK connection pool.

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;

use crate::crd::StorageLocation;
use crate::error::{Error, Result};

/// Default workshop credentials applied when the spec leaves them empty
const DEFAULT_ACCESS_KEY: &str = "minioadmin";
const DEFAULT_SECRET_KEY: &str = "minioadmin123";

/// The SDK requires a region even though MinIO ignores it
const PLACEHOLDER_REGION: &str = "us-east-1";

/// Object store client bound to one storage location
pub struct StoreClient {
    client: aws_sdk_s3::Client,
}

impl StoreClient {
    /// Build a client from a storage location spec
    pub fn new(location: &StorageLocation) -> Result<Self> {
        if location.endpoint.is_empty() {
            return Err(Error::config("storage endpoint is required"));
        }

        let endpoint = normalize_endpoint(&location.endpoint);
        let (access_key, secret_key) = resolve_credentials(location);
        let credentials = Credentials::new(access_key, secret_key, None, None, "backup-spec");

        // Plaintext transport for the workshop object store
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(PLACEHOLDER_REGION))
            .endpoint_url(format!("http://{endpoint}"))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(config),
        })
    }

    /// Check whether a bucket exists
    pub async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(Error::storage(format!(
                        "failed to check bucket {bucket}: {}",
                        DisplayErrorContext(err)
                    )))
                }
            }
        }
    }

    /// Create the bucket if it does not exist; returns true if it was created
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<bool> {
        if self.bucket_exists(bucket).await? {
            return Ok(false);
        }

        self.client
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|err| {
                Error::storage(format!(
                    "failed to create bucket {bucket}: {}",
                    DisplayErrorContext(err)
                ))
            })?;

        Ok(true)
    }

    /// Upload a JSON document
    pub async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("application/json")
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|err| {
                Error::storage(format!(
                    "failed to upload object {key}: {}",
                    DisplayErrorContext(err)
                ))
            })?;

        Ok(())
    }

    /// Download an object
    pub async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                Error::storage(format!(
                    "failed to download object {key}: {}",
                    DisplayErrorContext(err)
                ))
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|err| Error::storage(format!("failed to read object {key}: {err}")))?;

        Ok(data.into_bytes().to_vec())
    }

    /// List all object keys under a prefix
    pub async fn list_prefix(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| {
                Error::storage(format!(
                    "failed to list objects under {prefix}: {}",
                    DisplayErrorContext(err)
                ))
            })?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
        }

        Ok(keys)
    }
}

/// Strip the URL scheme; transport security is decided by the client config
fn normalize_endpoint(endpoint: &str) -> &str {
    endpoint
        .trim_start_matches("http://")
        .trim_start_matches("https://")
}

/// Credentials from the spec, falling back to the workshop defaults
fn resolve_credentials(location: &StorageLocation) -> (String, String) {
    let access_key = if location.access_key.is_empty() {
        DEFAULT_ACCESS_KEY.to_string()
    } else {
        location.access_key.clone()
    };
    let secret_key = if location.secret_key.is_empty() {
        DEFAULT_SECRET_KEY.to_string()
    } else {
        location.secret_key.clone()
    };
    (access_key, secret_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(endpoint: &str, access_key: &str, secret_key: &str) -> StorageLocation {
        StorageLocation {
            provider: "minio".to_string(),
            bucket: "backups".to_string(),
            endpoint: endpoint.to_string(),
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        }
    }

    #[test]
    fn endpoint_scheme_is_stripped() {
        assert_eq!(normalize_endpoint("http://minio:9000"), "minio:9000");
        assert_eq!(normalize_endpoint("https://minio:9000"), "minio:9000");
        assert_eq!(normalize_endpoint("minio:9000"), "minio:9000");
    }

    #[test]
    fn empty_credentials_fall_back_to_defaults() {
        let (access, secret) = resolve_credentials(&location("minio:9000", "", ""));
        assert_eq!(access, DEFAULT_ACCESS_KEY);
        assert_eq!(secret, DEFAULT_SECRET_KEY);
    }

    #[test]
    fn spec_credentials_take_precedence() {
        let (access, secret) = resolve_credentials(&location("minio:9000", "alice", "hunter2"));
        assert_eq!(access, "alice");
        assert_eq!(secret, "hunter2");
    }

    #[test]
    fn missing_endpoint_is_a_config_error() {
        let result = StoreClient::new(&location("", "", ""));
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }
}
