//! Remote object storage
//!
//! [`ObjectStore`] is the seam between the batch migrator and the network.
//! [`S3ObjectStore`] talks to S3 (or an S3-compatible endpoint in path-style mode).

use crate::error::{AssetError, AssetResult};
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use matmap_common::config::RemoteSettings;
use std::path::Path;
use thiserror::Error;

/// Remote store failure, classified for retry decisions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Worth retrying (timeouts, throttling, 5xx, dispatch failures)
    #[error("transient store error: {0}")]
    Transient(String),
    /// Retrying cannot help (authorization, missing bucket, bad request)
    #[error("permanent store error: {0}")]
    Permanent(String),
    /// The local source could not be read; only this item is affected
    #[error("local source error: {0}")]
    Local(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<StoreError> for AssetError {
    fn from(err: StoreError) -> Self {
        AssetError::Network(err.to_string())
    }
}

/// Minimal object store interface
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Verify the store is reachable and the bucket usable
    async fn preflight(&self) -> Result<(), StoreError>;

    /// Upload a local file under `key`, returning its public URL
    async fn put_object(&self, key: &str, path: &Path, content_type: &str)
        -> Result<String, StoreError>;
}

/// Public URL of an object
///
/// Priority: public base URL → `{endpoint}/{bucket}/{key}` → virtual-hosted AWS URL.
pub fn build_public_url(
    bucket: &str,
    region: &str,
    endpoint_url: Option<&str>,
    public_base_url: Option<&str>,
    key: &str,
) -> String {
    let key = key.trim_start_matches('/');
    if let Some(base) = public_base_url.map(str::trim).filter(|b| !b.is_empty()) {
        return format!("{}/{}", base.trim_end_matches('/'), key);
    }
    if let Some(endpoint) = endpoint_url.map(str::trim).filter(|e| !e.is_empty()) {
        return format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key);
    }
    format!("https://{}.s3.{}.amazonaws.com/{}", bucket, region, key)
}

/// Classify an SDK failure by transport and HTTP status
fn classify_sdk_error<E>(err: SdkError<E, HttpResponse>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StoreError::Transient(message)
        }
        SdkError::ServiceError(ctx) => {
            let status = ctx.raw().status().as_u16();
            let code = ctx.err().code().unwrap_or_default();
            if status == 429 || status >= 500 || code == "SlowDown" || code == "RequestTimeout" {
                StoreError::Transient(message)
            } else {
                StoreError::Permanent(message)
            }
        }
        _ => StoreError::Permanent(message),
    }
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    public_base_url: Option<String>,
    make_public: bool,
}

impl S3ObjectStore {
    /// Build a client from explicit settings
    ///
    /// Missing bucket or credentials are a configuration error.
    pub async fn connect(remote: &RemoteSettings) -> AssetResult<Self> {
        let creds = remote
            .require_credentials()
            .map_err(|e| AssetError::Configuration(e.to_string()))?;

        let credentials = Credentials::new(
            creds.access_key_id.clone(),
            creds.secret_access_key.clone(),
            None,
            None,
            "matmap-config",
        );
        let cfg = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(remote.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&cfg);
        if let Some(url) = &remote.endpoint_url {
            builder = builder.endpoint_url(url).force_path_style(true);
        }

        tracing::info!(
            bucket = %creds.bucket,
            region = %remote.region,
            endpoint = remote.endpoint_url.as_deref().unwrap_or("aws"),
            "S3 client configured"
        );

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: creds.bucket,
            region: remote.region.clone(),
            endpoint_url: remote.endpoint_url.clone(),
            public_base_url: remote.public_base_url.clone(),
            make_public: remote.make_public,
        })
    }

    pub fn public_url(&self, key: &str) -> String {
        build_public_url(
            &self.bucket,
            &self.region,
            self.endpoint_url.as_deref(),
            self.public_base_url.as_deref(),
            key,
        )
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn preflight(&self) -> Result<(), StoreError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(classify_sdk_error)?;
        tracing::info!(bucket = %self.bucket, "Bucket reachable");
        Ok(())
    }

    async fn put_object(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<String, StoreError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StoreError::Local(format!("read {}: {}", path.display(), e)))?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type);
        if self.make_public {
            request = request.acl(ObjectCannedAcl::PublicRead);
        }

        request.send().await.map_err(classify_sdk_error)?;
        Ok(self.public_url(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_url_priority() {
        assert_eq!(
            build_public_url(
                "assets",
                "ap-northeast-1",
                Some("http://localhost:9000"),
                Some("https://cdn.example.com/"),
                "materials/1/primary/primary.jpg"
            ),
            "https://cdn.example.com/materials/1/primary/primary.jpg"
        );
        assert_eq!(
            build_public_url(
                "assets",
                "ap-northeast-1",
                Some("http://localhost:9000/"),
                None,
                "materials/1/primary/primary.jpg"
            ),
            "http://localhost:9000/assets/materials/1/primary/primary.jpg"
        );
        assert_eq!(
            build_public_url("assets", "us-east-1", None, Some(" "), "k.png"),
            "https://assets.s3.us-east-1.amazonaws.com/k.png"
        );
    }

    #[test]
    fn test_store_error_kinds() {
        assert!(StoreError::Transient("503".into()).is_transient());
        assert!(!StoreError::Permanent("403".into()).is_transient());
        let asset: AssetError = StoreError::Permanent("AccessDenied".into()).into();
        assert!(matches!(asset, AssetError::Network(_)));
    }

    #[tokio::test]
    async fn test_connect_requires_credentials() {
        let remote = RemoteSettings {
            bucket: Some("assets".into()),
            region: "ap-northeast-1".into(),
            endpoint_url: None,
            public_base_url: None,
            access_key_id: None,
            secret_access_key: None,
            make_public: true,
        };
        let err = S3ObjectStore::connect(&remote).await.err().unwrap();
        assert!(err.is_configuration());
    }
}
