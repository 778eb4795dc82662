//! S3-compatible object storage: key layout and presigned uploads/downloads.

use anyhow::{Context, Result};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{BehaviorVersion, Region},
    presigning::PresigningConfig,
    Client,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Settings;
use crate::domain::documents::{FileType, PresignedUploadResponse, UploadMethod};
use crate::error::{ApiError, ApiResult};

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "storage";
const SIGV4_ALGORITHM: &str = "AWS4-HMAC-SHA256";
const MAX_FILE_NAME_LEN: usize = 100;

/// Path segment used in place of a lead id for public intake uploads
pub const INTAKE_SEGMENT: &str = "intake";

/// Where an object belongs
#[derive(Debug, Clone, Copy)]
pub enum KeyScope {
    Lead(Uuid),
    Intake,
}

/// Lowercase the name and replace anything outside `[a-z0-9._-]`
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(&['/', '\\'][..]).next().unwrap_or(name);
    let mut out = String::with_capacity(base.len());
    for c in base.trim().chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches(|c| c == '-' || c == '.');
    let trimmed: String = trimmed.chars().take(MAX_FILE_NAME_LEN).collect();
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed
    }
}

/// Prefix every object of a scope lives under, ending in `/`
pub fn scope_prefix(contractor_id: Uuid, scope: KeyScope) -> String {
    match scope {
        KeyScope::Lead(lead_id) => format!("{}/{}/", contractor_id, lead_id),
        KeyScope::Intake => format!("{}/{}/", contractor_id, INTAKE_SEGMENT),
    }
}

/// `{contractor_id}/{lead_id|intake}/{file_type}/{uuid}-{file_name}`; fresh on every call
pub fn build_key(
    contractor_id: Uuid,
    scope: KeyScope,
    file_type: FileType,
    file_name: &str,
) -> String {
    format!(
        "{}{}/{}-{}",
        scope_prefix(contractor_id, scope),
        file_type.as_str(),
        Uuid::new_v4(),
        sanitize_file_name(file_name)
    )
}

/// Whether `key` was issued for this scope and file type
pub fn key_in_scope(key: &str, contractor_id: Uuid, scope: KeyScope, file_type: FileType) -> bool {
    let prefix = format!("{}{}/", scope_prefix(contractor_id, scope), file_type.as_str());
    key.strip_prefix(&prefix)
        .is_some_and(|rest| !rest.is_empty() && !rest.contains('/') && !rest.contains(".."))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|_| anyhow::anyhow!("Invalid HMAC key"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// AWS SigV4 signing key for a date (`YYYYMMDD`), region and service
pub fn signing_key(
    secret_access_key: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_access_key).as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// Storage client
#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
    region: String,
    endpoint: Option<String>,
    access_key_id: String,
    secret_access_key: String,
    presign_ttl: Duration,
    max_photo_bytes: u64,
    max_document_bytes: u64,
}

impl Storage {
    pub fn new(settings: &Settings) -> Self {
        let credentials = Credentials::new(
            &settings.storage_access_key_id,
            &settings.storage_secret_access_key,
            None,
            None,
            "quotecraft-static",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.storage_region.clone()))
            .credentials_provider(credentials);

        if let Some(endpoint) = &settings.storage_endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        tracing::info!(
            bucket = %settings.storage_bucket,
            region = %settings.storage_region,
            custom_endpoint = settings.storage_endpoint.is_some(),
            "Object storage client initialized"
        );

        Self {
            client: Client::from_conf(builder.build()),
            bucket: settings.storage_bucket.clone(),
            region: settings.storage_region.clone(),
            endpoint: settings
                .storage_endpoint
                .as_ref()
                .map(|e| e.trim_end_matches('/').to_string()),
            access_key_id: settings.storage_access_key_id.clone(),
            secret_access_key: settings.storage_secret_access_key.clone(),
            presign_ttl: Duration::from_secs(settings.storage_presign_ttl_seconds),
            max_photo_bytes: settings.storage_max_photo_bytes,
            max_document_bytes: settings.storage_max_document_bytes,
        }
    }

    pub fn max_bytes(&self, file_type: FileType) -> u64 {
        match file_type {
            FileType::Photo => self.max_photo_bytes,
            FileType::Document => self.max_document_bytes,
        }
    }

    /// 422 on `size_bytes` when the declared size exceeds the file type's limit
    pub fn check_size(&self, file_type: FileType, size_bytes: i64) -> ApiResult<()> {
        let max = self.max_bytes(file_type);
        if size_bytes <= 0 || size_bytes as u64 > max {
            return Err(ApiError::invalid_field(
                "size_bytes",
                format!("must be between 1 and {} bytes", max),
            ));
        }
        Ok(())
    }

    fn bucket_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}/{}", endpoint, self.bucket),
            None => format!("https://{}.s3.{}.amazonaws.com", self.bucket, self.region),
        }
    }

    fn presigning_config(&self) -> ApiResult<PresigningConfig> {
        PresigningConfig::expires_in(self.presign_ttl)
            .map_err(|e| ApiError::internal(format!("Invalid presign TTL: {}", e)))
    }

    /// Presigned upload for a key produced by [`build_key`]
    pub async fn presign_upload(
        &self,
        key: String,
        file_type: FileType,
        content_type: &str,
        size_bytes: i64,
        method: UploadMethod,
    ) -> ApiResult<PresignedUploadResponse> {
        self.check_size(file_type, size_bytes)?;
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(self.presign_ttl)
                .map_err(|e| ApiError::internal(format!("Invalid presign TTL: {}", e)))?;

        let (url, fields, headers) = match method {
            UploadMethod::Put => {
                let (url, headers) = self.presign_put(&key, content_type, size_bytes).await?;
                (url, None, headers)
            }
            UploadMethod::Post => {
                let (url, fields) = self
                    .post_form(&key, content_type, size_bytes, now, expires_at)
                    .map_err(ApiError::Internal)?;
                (url, Some(fields), BTreeMap::new())
            }
        };

        Ok(PresignedUploadResponse {
            method,
            url,
            storage_key: key,
            fields,
            headers,
            max_size_bytes: self.max_bytes(file_type),
            expires_at,
        })
    }

    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        size_bytes: i64,
    ) -> ApiResult<(String, BTreeMap<String, String>)> {
        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .content_length(size_bytes)
            .presigned(self.presigning_config()?)
            .await
            .map_err(|e| ApiError::external(SERVICE, format!("Failed to presign upload: {}", e)))?;

        let headers = presigned
            .headers()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("host"))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        Ok((presigned.uri().to_string(), headers))
    }

    /// Browser form upload signed with a SigV4 POST policy
    fn post_form(
        &self,
        key: &str,
        content_type: &str,
        size_bytes: i64,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(String, BTreeMap<String, String>)> {
        let date = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let credential = format!(
            "{}/{}/{}/s3/aws4_request",
            self.access_key_id, date, self.region
        );

        let policy = serde_json::json!({
            "expiration": expires_at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            "conditions": [
                { "bucket": self.bucket },
                { "key": key },
                { "Content-Type": content_type },
                ["content-length-range", 1, size_bytes],
                { "x-amz-algorithm": SIGV4_ALGORITHM },
                { "x-amz-credential": credential },
                { "x-amz-date": amz_date },
            ],
        });
        let encoded_policy = BASE64.encode(policy.to_string());

        let key_bytes = signing_key(&self.secret_access_key, &date, &self.region, "s3")?;
        let signature = hex::encode(hmac_sha256(&key_bytes, encoded_policy.as_bytes())?);

        let fields = BTreeMap::from([
            ("key".to_string(), key.to_string()),
            ("Content-Type".to_string(), content_type.to_string()),
            ("policy".to_string(), encoded_policy),
            ("x-amz-algorithm".to_string(), SIGV4_ALGORITHM.to_string()),
            ("x-amz-credential".to_string(), credential),
            ("x-amz-date".to_string(), amz_date),
            ("x-amz-signature".to_string(), signature),
        ]);

        Ok((self.bucket_url(), fields))
    }

    /// Time-limited download URL, handed to the AI service
    pub async fn presign_get(&self, key: &str) -> ApiResult<String> {
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(self.presigning_config()?)
            .await
            .map_err(|e| {
                ApiError::external(SERVICE, format!("Failed to presign download: {}", e))
            })?;

        Ok(presigned.uri().to_string())
    }

    pub async fn health_check(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .context("Storage health check failed")?;
        Ok(())
    }
}
