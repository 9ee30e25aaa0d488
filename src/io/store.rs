//! Object store configuration for S3 and local filesystem containers.

use crate::config::StorageConfig;
use crate::error::{Error, Result};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::{ClientOptions, ObjectStore, RetryConfig};
use std::sync::Arc;
use std::time::Duration;

/// Parse an S3 URI into bucket and key components.
///
/// Accepts URIs in the format `s3://bucket/key/path`.
pub fn parse_s3_uri(uri: &str) -> Result<(&str, &str)> {
    let without_scheme = uri.strip_prefix("s3://").ok_or_else(|| {
        Error::InvalidConfig(format!("Invalid S3 URI: expected 's3://' prefix in '{}'", uri))
    })?;

    without_scheme.split_once('/').ok_or_else(|| {
        Error::InvalidConfig(format!(
            "Invalid S3 URI: expected 's3://bucket/key' format in '{}'",
            uri
        ))
    })
}

/// Client options for the blob store. The idle pool covers the widest wave.
fn create_client_options() -> ClientOptions {
    ClientOptions::new()
        .with_connect_timeout(Duration::from_secs(5))
        .with_timeout(Duration::from_secs(30))
        .with_pool_idle_timeout(Duration::from_secs(90))
        .with_pool_max_idle_per_host(64)
}

/// Retry configuration for transient storage failures.
fn create_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 5,
        backoff: object_store::BackoffConfig {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            base: 2.0,
        },
        retry_timeout: Duration::from_secs(120),
    }
}

/// Create an S3 client for a bucket.
///
/// Credentials and region are loaded from the standard AWS environment and
/// config files.
fn create_s3_store(bucket: &str, endpoint_url: Option<&str>) -> Result<Arc<dyn ObjectStore>> {
    tracing::info!("Creating S3 client for bucket: {}", bucket);

    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_client_options(create_client_options())
        .with_retry(create_retry_config());

    if let Some(endpoint) = endpoint_url {
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(endpoint.starts_with("http://"));
    }

    Ok(Arc::new(builder.build()?))
}

/// Create a store for a named container.
///
/// Uses LocalFileSystem under `local_root/<container>` if a local root is
/// configured, otherwise the S3 bucket named `container`.
pub fn create_container_store(storage: &StorageConfig, container: &str) -> Result<Arc<dyn ObjectStore>> {
    match &storage.local_root {
        Some(root) => {
            let path = std::path::Path::new(root).join(container);
            if !path.exists() {
                std::fs::create_dir_all(&path)?;
            }
            tracing::info!("Creating LocalFileSystem store at: {}", path.display());
            Ok(Arc::new(LocalFileSystem::new_with_prefix(&path)?))
        }
        None => create_s3_store(container, storage.endpoint_url.as_deref()),
    }
}
