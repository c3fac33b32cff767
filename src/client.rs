//! Defines the object storage operations and the global AWS clients.

use crate::conf::aws_service_config;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use itertools::Itertools;
use once_cell::sync::OnceCell;

/// The object storage operations the handlers rely on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Reads the full contents of an object.
    async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Succeeds only if the object exists.
    async fn head(&self, bucket: &str, key: &str) -> Result<()>;

    /// Server-side copy of an object, possibly across buckets.
    async fn copy(
        &self,
        source_bucket: &str,
        source_key: &str,
        target_bucket: &str,
        target_key: &str,
    ) -> Result<()>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;
}

/// Builds the `x-amz-copy-source` value for an object, escaping each
/// key segment but keeping the slashes.
pub fn copy_source(bucket: &str, key: &str) -> String {
    format!(
        "{}/{}",
        bucket,
        key.split('/').map(urlencoding::encode).join("/")
    )
}

#[async_trait]
impl ObjectStore for Client {
    async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let body = self
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to download object {:?} from bucket {:?}",
                    key, bucket
                )
            })?
            .body
            .collect()
            .await
            .with_context(|| {
                format!(
                    "Failed to read the contents of object {:?} from bucket {:?}",
                    key, bucket
                )
            })?;
        Ok(body.into_bytes().to_vec())
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<()> {
        self.head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Object {:?} not found in bucket {:?}", key, bucket))?;
        Ok(())
    }

    async fn copy(
        &self,
        source_bucket: &str,
        source_key: &str,
        target_bucket: &str,
        target_key: &str,
    ) -> Result<()> {
        self.copy_object()
            .copy_source(copy_source(source_bucket, source_key))
            .bucket(target_bucket)
            .key(target_key)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to copy object {:?} from bucket {:?} to {:?} in bucket {:?}",
                    source_key, source_bucket, target_key, target_bucket
                )
            })?;
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to delete object {:?} from bucket {:?}",
                    key, bucket
                )
            })?;
        Ok(())
    }
}

/// The AWS clients shared by every invocation.
pub struct Clients {
    pub s3: Client,
    pub ses: aws_sdk_sesv2::Client,
}

/// Global clients instance.
static CURRENT: OnceCell<Clients> = OnceCell::new();

/// Initialize the global AWS clients.
pub async fn init() -> Result<()> {
    let config = aws_service_config().await;
    let clients = Clients {
        s3: Client::new(&config),
        ses: aws_sdk_sesv2::Client::new(&config),
    };
    CURRENT
        .set(clients)
        .map_err(|_| anyhow!("client::CURRENT was already initialized"))
}

/// Get the current clients, or panic if they haven't been initialized.
pub fn current() -> &'static Clients {
    CURRENT.get().expect("client is not initialized")
}
