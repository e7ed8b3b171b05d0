//! S3 bucket access
//!
//! One `Storage` per bucket, all sharing a single SDK client. Missing keys
//! are reported separately from transport failures so callers can tell a
//! bad record from an unreachable store.

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info, instrument};

pub mod config;

use config::StorageConfig;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("s3://{bucket}/{key} does not exist")]
    NotFound { bucket: String, key: String },

    #[error("s3://{bucket}/{key}: {reason}")]
    Unavailable {
        bucket: String,
        key: String,
        reason: String,
    },
}

/// Build the SDK client shared by every bucket.
///
/// Static credentials are used when both halves are configured; otherwise
/// the default provider chain (environment, profile, instance role) applies.
pub async fn connect(config: &StorageConfig) -> Client {
    debug!(
        endpoint = ?config.endpoint,
        region = %config.region,
        path_style = config.path_style,
        "Initializing S3 client"
    );

    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));

    if let Some((access_key, secret_key)) = config.static_credentials() {
        loader = loader.credentials_provider(Credentials::new(
            access_key,
            secret_key,
            None,
            None,
            "txa-storage",
        ));
    }

    if let Some(endpoint) = &config.endpoint {
        loader = loader.endpoint_url(endpoint);
    }

    let sdk_config = loader.load().await;
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(config.path_style)
        .build();

    Client::from_conf(s3_config)
}

#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
}

impl Storage {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        info!("Storage client initialized for bucket: {}", bucket);
        Self { client, bucket }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }

    fn unavailable(&self, key: &str, reason: impl Into<String>) -> StorageError {
        StorageError::Unavailable {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    pub async fn download(&self, key: &str) -> Result<Bytes, StorageError> {
        debug!("Downloading {}", self.uri(key));

        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let missing = err
                    .as_service_error()
                    .map(|service_err| service_err.is_no_such_key())
                    .unwrap_or(false)
                    || err
                        .raw_response()
                        .map(|raw| raw.status().as_u16() == 404)
                        .unwrap_or(false);

                if missing {
                    return Err(StorageError::NotFound {
                        bucket: self.bucket.clone(),
                        key: key.to_string(),
                    });
                }

                return Err(self.unavailable(key, DisplayErrorContext(&err).to_string()));
            },
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| self.unavailable(key, format!("Failed to read response body: {e}")))?
            .into_bytes();

        debug!("Downloaded {} bytes from {}", data.len(), self.uri(key));

        Ok(data)
    }

    #[instrument(skip(self, data), fields(bucket = %self.bucket))]
    pub async fn upload(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let data: Bytes = data.into();
        debug!("Uploading {} bytes to {}", data.len(), self.uri(key));

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|err| self.unavailable(key, DisplayErrorContext(&err).to_string()))?;

        debug!("Uploaded {}", self.uri(key));

        Ok(())
    }
}
