use std::path::Path;

use async_trait::async_trait;
use s3::{Bucket, Region, creds::Credentials, error::S3Error};

use crate::{data::key::playback_url, error::Error};

/// Durable object storage the pipeline hands finished files to.
///
/// Puts are assumed to be atomic: an object either fully lands under its key or the put fails.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Streams the local file at `path` to `key`.
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<(), Error>;

    async fn put_bytes(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), Error>;

    /// Public URL under which the object stored at `key` is served.
    fn object_url(&self, key: &str) -> String;
}

pub struct S3ObjectStore {
    bucket: Bucket,
    bucket_name: String,
    region_name: String,
}

impl S3ObjectStore {
    pub fn new(bucket: Bucket, bucket_name: String, region_name: String) -> Self {
        Self {
            bucket,
            bucket_name,
            region_name,
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<(), Error> {
        let mut file = tokio::fs::File::open(path).await.map_err(|e| {
            Error::StorageError(format!("Failed to open {} for upload: {e}", path.display()))
        })?;

        log::info!("Starting S3 upload for {}", key);
        let status = self
            .bucket
            .put_object_stream_with_content_type(&mut file, key, content_type)
            .await
            .map_err(|e| Error::StorageError(format!("Upload of {key} failed: {e}")))?;
        if status >= 300 {
            return Err(Error::S3ResponseError(status));
        }
        log::info!("Finished S3 upload for {}", key);

        Ok(())
    }

    async fn put_bytes(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), Error> {
        let response = self
            .bucket
            .put_object_with_content_type(key, bytes, content_type)
            .await?;
        let status = response.status_code();
        if status >= 300 {
            return Err(Error::S3ResponseError(status));
        }

        Ok(())
    }

    fn object_url(&self, key: &str) -> String {
        playback_url(&self.bucket_name, &self.region_name, key)
    }
}

/// Creates the bucket handle. Without a custom endpoint `region` must name an AWS region;
/// with one, the endpoint is addressed path-style.
pub fn create_bucket(
    bucket_name: &str,
    region: &str,
    endpoint: Option<&str>,
    access_key: &str,
    secret_key: &str,
) -> Result<Bucket, Error> {
    let s3_region = match endpoint {
        Some(endpoint) => Ok(Region::Custom {
            region: String::from(region),
            endpoint: String::from(endpoint),
        }),
        None => region
            .parse::<Region>()
            .map_err(|e| Error::StorageError(format!("Invalid region '{region}': {e}"))),
    }?;

    let credentials = Credentials {
        access_key: Some(String::from(access_key)),
        secret_key: Some(String::from(secret_key)),
        security_token: None,
        session_token: None,
        expiration: None,
    };

    Bucket::new(bucket_name, s3_region, credentials)
        .map_err(|e: S3Error| Error::StorageError(format!("Invalid bucket: {e}")))
        .map(|b| {
            if endpoint.is_some() {
                b.with_path_style()
            } else {
                b
            }
        })
}
