// nvrbackup/src/cloud/s3.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::http::HttpResponse;
use s3::config::Region;
use s3::error::{ProvideErrorMetadata, SdkError};
use s3::primitives::ByteStream;
use serde::Deserialize;
use std::sync::Mutex;
use tracing::debug;

use super::{ProviderError, ProviderErrorKind, ProviderResult, RemoteObject, RemoteStore};
use crate::config::Credential;
use crate::utils::sha256_hex;

/// Shape of the credential blob for S3-compatible stores (DigitalOcean Spaces, MinIO, AWS).
#[derive(Deserialize)]
struct SpacesCredential {
    endpoint_url: String,
    region: String,
    access_key_id: String,
    secret_access_key: String,
    bucket_name: String,
    #[serde(default)]
    folder_prefix: Option<String>,
}

impl SpacesCredential {
    fn parse(credential: &Credential) -> Result<Self, String> {
        let parsed: SpacesCredential = serde_json::from_str(credential.expose())
            .map_err(|e| format!("credential is not a valid S3 credential document: {e}"))?;

        for (field, value) in [
            ("endpoint_url", &parsed.endpoint_url),
            ("region", &parsed.region),
            ("access_key_id", &parsed.access_key_id),
            ("secret_access_key", &parsed.secret_access_key),
            ("bucket_name", &parsed.bucket_name),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{field} must not be empty"));
            }
        }

        let endpoint = url::Url::parse(&parsed.endpoint_url)
            .map_err(|e| format!("endpoint_url is not a valid URL: {e}"))?;
        if endpoint.scheme() != "https" && endpoint.scheme() != "http" {
            return Err("endpoint_url must be http or https".to_string());
        }
        Ok(parsed)
    }

    fn key_for(&self, filename: &str) -> String {
        match self.folder_prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}/{filename}"),
            _ => filename.to_string(),
        }
    }

    /// Key prefix every backup object lives under; empty for the bucket root.
    fn list_prefix(&self) -> String {
        self.key_for("")
    }

    async fn build_client(&self) -> s3::Client {
        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(&self.endpoint_url)
            .region(Region::new(self.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &self.access_key_id,
                &self.secret_access_key,
                None,     // session_token
                None,     // expiry
                "Static", // provider_name
            ))
            .load()
            .await;

        s3::Client::new(&sdk_config)
    }
}

/// S3-compatible object store. The SDK client is built once per credential
/// and reused until a different credential shows up.
#[derive(Default)]
pub struct S3Remote {
    cached: Mutex<Option<(String, s3::Client)>>,
}

impl S3Remote {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self, spaces: &SpacesCredential, credential: &Credential) -> s3::Client {
        let fingerprint = sha256_hex(credential.expose().as_bytes());
        let hit = match self.cached.lock() {
            Ok(cached) => cached
                .as_ref()
                .filter(|(key, _)| *key == fingerprint)
                .map(|(_, client)| client.clone()),
            Err(_) => None,
        };
        if let Some(client) = hit {
            return client;
        }

        debug!("Building S3 client for {}", spaces.endpoint_url);
        let client = spaces.build_client().await;
        if let Ok(mut cached) = self.cached.lock() {
            *cached = Some((fingerprint, client.clone()));
        }
        client
    }

    fn credential(credential: &Credential) -> ProviderResult<SpacesCredential> {
        SpacesCredential::parse(credential).map_err(|e| ProviderError::new(ProviderErrorKind::Rejected, e))
    }
}

#[async_trait]
impl RemoteStore for S3Remote {
    fn name(&self) -> &'static str {
        "s3"
    }

    fn parse_credential(&self, credential: &Credential) -> Result<(), String> {
        SpacesCredential::parse(credential).map(|_| ())
    }

    async fn verify(&self, credential: &Credential) -> ProviderResult<()> {
        let spaces = Self::credential(credential)?;
        debug!("Checking bucket {} at {}", spaces.bucket_name, spaces.endpoint_url);
        self.client(&spaces, credential)
            .await
            .head_bucket()
            .bucket(&spaces.bucket_name)
            .send()
            .await
            .map_err(|e| provider_error("HeadBucket", &spaces.bucket_name, e))?;
        Ok(())
    }

    async fn upload(&self, credential: &Credential, filename: &str, content: Vec<u8>) -> ProviderResult<()> {
        let spaces = Self::credential(credential)?;
        let key = spaces.key_for(filename);
        self.client(&spaces, credential)
            .await
            .put_object()
            .bucket(&spaces.bucket_name)
            .key(&key)
            .content_type("application/gzip")
            .body(ByteStream::from(content))
            .send()
            .await
            .map_err(|e| provider_error("PutObject", &key, e))?;
        Ok(())
    }

    async fn exists(&self, credential: &Credential, filename: &str) -> ProviderResult<bool> {
        let spaces = Self::credential(credential)?;
        let key = spaces.key_for(filename);
        match self
            .client(&spaces, credential)
            .await
            .head_object()
            .bucket(&spaces.bucket_name)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let err = provider_error("HeadObject", &key, e);
                if err.kind == ProviderErrorKind::NotFound {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn download(&self, credential: &Credential, filename: &str) -> ProviderResult<Vec<u8>> {
        let spaces = Self::credential(credential)?;
        let key = spaces.key_for(filename);
        let object = self
            .client(&spaces, credential)
            .await
            .get_object()
            .bucket(&spaces.bucket_name)
            .key(&key)
            .send()
            .await
            .map_err(|e| provider_error("GetObject", &key, e))?;

        let bytes = object.body.collect().await.map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::Network,
                format!("Failed to read body of s3://{}/{}: {}", spaces.bucket_name, key, e),
            )
        })?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn delete(&self, credential: &Credential, filename: &str) -> ProviderResult<()> {
        let spaces = Self::credential(credential)?;
        let key = spaces.key_for(filename);
        self.client(&spaces, credential)
            .await
            .delete_object()
            .bucket(&spaces.bucket_name)
            .key(&key)
            .send()
            .await
            .map_err(|e| provider_error("DeleteObject", &key, e))?;
        Ok(())
    }

    async fn list(&self, credential: &Credential) -> ProviderResult<Vec<RemoteObject>> {
        let spaces = Self::credential(credential)?;
        let prefix = spaces.list_prefix();
        let client = self.client(&spaces, credential).await;

        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let page = client
                .list_objects_v2()
                .bucket(&spaces.bucket_name)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| provider_error("ListObjectsV2", &spaces.bucket_name, e))?;

            for object in page.contents() {
                let Some(filename) = object.key().and_then(|key| object_name(&prefix, key)) else {
                    continue;
                };
                objects.push(RemoteObject {
                    filename: filename.to_string(),
                    size_bytes: object.size().and_then(|size| u64::try_from(size).ok()),
                    modified: object
                        .last_modified()
                        .and_then(|at| chrono::DateTime::from_timestamp(at.secs(), 0)),
                });
            }

            match (page.is_truncated(), page.next_continuation_token()) {
                (Some(true), Some(token)) => continuation = Some(token.to_string()),
                _ => break,
            }
        }
        debug!("Listed {} objects under s3://{}/{}", objects.len(), spaces.bucket_name, prefix);
        Ok(objects)
    }
}

/// Bare file name of `key` when it sits directly under `prefix`.
fn object_name<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let name = key.strip_prefix(prefix)?;
    (!name.is_empty() && !name.contains('/')).then_some(name)
}

fn provider_error<E>(operation: &str, target: &str, err: SdkError<E, HttpResponse>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let kind = classify(&err, status);
    let detail = err.message().map(str::to_string).unwrap_or_else(|| err.to_string());
    ProviderError::new(kind, format!("{operation} {target} failed: {detail}"))
}

fn classify<E>(err: &SdkError<E, HttpResponse>, status: Option<u16>) -> ProviderErrorKind
where
    E: ProvideErrorMetadata,
{
    match err {
        SdkError::TimeoutError(_) => return ProviderErrorKind::Timeout,
        SdkError::DispatchFailure(_) => return ProviderErrorKind::Network,
        SdkError::ConstructionFailure(_) => return ProviderErrorKind::Rejected,
        _ => {}
    }
    classify_response(status, err.code())
}

fn classify_response(status: Option<u16>, code: Option<&str>) -> ProviderErrorKind {
    match (status, code) {
        (_, Some("QuotaExceeded" | "ServiceQuotaExceeded" | "StorageQuotaExceeded")) | (Some(507), _) => {
            ProviderErrorKind::QuotaExceeded
        }
        (Some(401 | 403), _)
        | (_, Some("InvalidAccessKeyId" | "SignatureDoesNotMatch" | "AccessDenied" | "ExpiredToken")) => {
            ProviderErrorKind::Unauthorized
        }
        (Some(404), _) | (_, Some("NoSuchKey" | "NotFound")) => ProviderErrorKind::NotFound,
        (Some(408 | 429), _) => ProviderErrorKind::Network,
        (Some(s), _) if s >= 500 => ProviderErrorKind::Network,
        (None, None) => ProviderErrorKind::Network,
        _ => ProviderErrorKind::Rejected,
    }
}
