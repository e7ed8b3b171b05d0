use serde::{Deserialize, Serialize};
use std::env;

/// Default bucket for eligible (trusted) documents.
pub const DEFAULT_TRUSTED_BUCKET: &str = "trusted-bucket";

/// Default bucket for the untrusted area, which also holds the watermark.
pub const DEFAULT_UNTRUSTED_BUCKET: &str = "untrusted-bucket";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    /// Static credentials; when absent the default AWS provider chain is used
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub path_style: bool,
    pub trusted_bucket: String,
    pub untrusted_bucket: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "eu-west-2".to_string(),
            access_key: None,
            secret_key: None,
            path_style: false,
            trusted_bucket: DEFAULT_TRUSTED_BUCKET.to_string(),
            untrusted_bucket: DEFAULT_UNTRUSTED_BUCKET.to_string(),
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or(defaults.region),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .ok(),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .ok(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            trusted_bucket: env::var("S3_TRUSTED_BUCKET").unwrap_or(defaults.trusted_bucket),
            untrusted_bucket: env::var("S3_UNTRUSTED_BUCKET").unwrap_or(defaults.untrusted_bucket),
        })
    }

    /// Local MinIO / localstack setup with path-style addressing
    pub fn for_local(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
            ..Self::default()
        }
    }

    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_key, &self.secret_key) {
            (Some(access), Some(secret)) => Some((access.as_str(), secret.as_str())),
            _ => None,
        }
    }
}
