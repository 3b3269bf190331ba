//! S3-compatible object-storage backend (spec §4.4).

use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{BoxedReader, Store, TargetConfig};
use crate::error::{Error, Result};

/// Parameters needed to construct an [`S3Store`] (spec §6: `bucket`,
/// `endpoint`, `access_key_id`, `secret_access_key`).
pub struct S3Config {
    /// Bucket every entry lives in.
    pub bucket: String,
    /// Endpoint URL (lets this point at MinIO or any S3-compatible service).
    pub endpoint: String,
    /// Static access key.
    pub access_key_id: String,
    /// Static secret key.
    pub secret_access_key: String,
}

impl S3Config {
    /// Read the backend-specific keys out of a generic target config.
    pub fn from_target(config: &TargetConfig) -> Result<Self> {
        let get = |key: &str| -> Result<String> {
            config
                .get(key)
                .cloned()
                .ok_or_else(|| Error::UnknownStoreType(format!("s3 missing `{key}`")))
        };
        Ok(Self {
            bucket: get("bucket")?,
            endpoint: get("endpoint")?,
            access_key_id: get("access_key_id")?,
            secret_access_key: get("secret_access_key")?,
        })
    }
}

/// A single configured bucket, addressed by store key (spec §4.4).
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    /// Build a client against `cfg`'s endpoint and static credentials.
    pub async fn new(cfg: S3Config) -> Result<Self> {
        let creds = Credentials::new(cfg.access_key_id, cfg.secret_access_key, None, None, "memorybox");
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(creds)
            .endpoint_url(cfg.endpoint)
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared).force_path_style(true).build();
        Ok(Self { client: Client::from_conf(s3_config), bucket: cfg.bucket })
    }
}

#[async_trait]
impl Store for S3Store {
    async fn put(&self, name: &str, mut reader: BoxedReader, _ctx: &CancellationToken) -> Result<()> {
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buf)
            .await
            .map_err(Error::IoError)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(name)
            .body(ByteStream::from(buf))
            .send()
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, name: &str, _ctx: &CancellationToken) -> Result<BoxedReader> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) {
                    Error::NotFound(name.to_string())
                } else {
                    Error::Store(e.to_string())
                }
            })?;
        let bytes = resp.body.collect().await.map_err(|e| Error::Store(e.to_string()))?.into_bytes();
        Ok(Box::pin(std::io::Cursor::new(bytes.to_vec())) as BoxedReader)
    }

    async fn exists(&self, name: &str, _ctx: &CancellationToken) -> bool {
        self.client.head_object().bucket(&self.bucket).key(name).send().await.is_ok()
    }

    async fn search(&self, prefix: &str, ctx: &CancellationToken) -> Result<Vec<String>> {
        let prefix = if prefix == "*" { "" } else { prefix };
        let mut out = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            if ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let mut req = self.client.list_objects_v2().bucket(&self.bucket).prefix(prefix);
            if let Some(token) = &continuation {
                req = req.continuation_token(token);
            }
            let resp = req.send().await.map_err(|e| Error::Store(e.to_string()))?;
            for obj in resp.contents() {
                if let Some(key) = obj.key() {
                    out.push(key.to_string());
                }
            }
            if resp.is_truncated().unwrap_or(false) {
                continuation = resp.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }
        Ok(out)
    }
}
