use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};

use crate::config::{S3Credentials, StorageSettings, SyncConfig};

type HmacSha256 = Hmac<Sha256>;

const PUBLIC_READ_ACL: &str = "public-read";

/// Destination for page images.
pub trait ObjectStore {
    /// Upload `local` under `key` with public read access and return its public URL.
    fn put_public(&mut self, local: &Path, key: &str) -> Result<String>;
}

/// `<prefix><bucket>/<key>`, e.g. `https://s3.amazonaws.com/docs-assets/logo.png`.
pub fn public_url(prefix: &str, bucket: &str, key: &str) -> String {
    let prefix = if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    };
    format!("{prefix}{bucket}/{}", key.trim_start_matches('/'))
}

pub struct S3Store {
    client: Client,
    credentials: S3Credentials,
    region: String,
    endpoint_url: Option<String>,
    public_url_prefix: String,
}

struct SignedPut {
    url: String,
    headers: Vec<(String, String)>,
}

impl S3Store {
    pub fn from_sync_config(config: &SyncConfig) -> Result<Self> {
        let credentials = config.s3_credentials()?;
        Self::new(&config.storage, credentials, config.timeout_ms)
    }

    pub fn new(settings: &StorageSettings, credentials: S3Credentials, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("failed to build object storage HTTP client")?;
        Ok(Self {
            client,
            credentials,
            region: settings.region.clone(),
            endpoint_url: settings.endpoint_url.clone(),
            public_url_prefix: settings.public_url_prefix.clone(),
        })
    }

    /// Virtual-hosted style on AWS; path style on a custom endpoint.
    fn locate(&self, key: &str) -> (String, String, String) {
        let encoded_key = key
            .trim_start_matches('/')
            .split('/')
            .map(uri_encode)
            .collect::<Vec<_>>()
            .join("/");
        match &self.endpoint_url {
            Some(endpoint) => {
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                let canonical_uri = format!("/{}/{}", self.credentials.bucket, encoded_key);
                (format!("{scheme}://{host}{canonical_uri}"), host, canonical_uri)
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", self.credentials.bucket, self.region);
                let canonical_uri = format!("/{encoded_key}");
                (format!("https://{host}{canonical_uri}"), host, canonical_uri)
            }
        }
    }

    fn signed_put(&self, key: &str, payload: &[u8], now: DateTime<Utc>) -> Result<SignedPut> {
        let (url, host, canonical_uri) = self.locate(key);
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(payload);

        let mut headers = vec![
            ("host".to_string(), host),
            ("x-amz-acl".to_string(), PUBLIC_READ_ACL.to_string()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(token) = &self.credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers = headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{name}:{}\n", value.trim()))
            .collect();
        let canonical_request = format!(
            "PUT\n{canonical_uri}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
        );

        let credential_scope = format!("{date_stamp}/{}/s3/aws4_request", self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key = derive_signing_key(
            &self.credentials.secret_access_key,
            &date_stamp,
            &self.region,
            "s3",
        )?;
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

        let mut output = headers
            .into_iter()
            .filter(|(name, _)| name != "host")
            .collect::<Vec<_>>();
        output.push((
            "authorization".to_string(),
            format!(
                "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
                self.credentials.access_key_id
            ),
        ));
        Ok(SignedPut { url, headers: output })
    }
}

impl ObjectStore for S3Store {
    fn put_public(&mut self, local: &Path, key: &str) -> Result<String> {
        let payload =
            fs::read(local).with_context(|| format!("failed to read {}", local.display()))?;
        let signed = self.signed_put(key, &payload, Utc::now())?;

        let mut request = self
            .client
            .put(&signed.url)
            .header("content-type", content_type_for(key));
        for (name, value) in &signed.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request
            .body(payload)
            .send()
            .with_context(|| format!("failed to put s3://{}/{key}", self.credentials.bucket))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            bail!(
                "S3 PutObject failed (HTTP {status}) for key '{key}': {}",
                detail.trim()
            );
        }
        tracing::debug!(bucket = %self.credentials.bucket, key, "uploaded image");
        Ok(public_url(&self.public_url_prefix, &self.credentials.bucket, key))
    }
}

fn content_type_for(key: &str) -> &'static str {
    let extension = key
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        _ => "application/octet-stream",
    }
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|error| anyhow::anyhow!("invalid HMAC key: {error}"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// kSigning = HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), service), "aws4_request")
fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding of everything outside `A-Z a-z 0-9 - _ . ~`.
fn uri_encode(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                output.push(byte as char);
            }
            _ => output.push_str(&format!("%{byte:02X}")),
        }
    }
    output
}
