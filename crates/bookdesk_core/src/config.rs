use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

pub const DEFAULT_CONFIG_FILENAME: &str = "bookdesk.toml";
pub const DEFAULT_LOCALE: &str = "en-us";
pub const DEFAULT_PUBLIC_URL_PREFIX: &str = "https://s3.amazonaws.com/";
pub const DEFAULT_S3_REGION: &str = "us-east-1";
pub const DEFAULT_BUILD_COMMAND: &str = "jupyter-book build";
pub const DEFAULT_MAIN_CONTENT_ID: &str = "main-content";
pub const DEFAULT_LABELS_META: &str = "keywords";
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_USER_AGENT: &str = "bookdesk/0.1";

/// How the reconciler decides that an article already exists remotely.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Same `html_file_path` in the previous ledger.
    #[default]
    Ledger,
    /// Same title and section id among the category's live articles.
    RemoteTitle,
}

impl MatchStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ledger => "ledger",
            Self::RemoteTitle => "remote_title",
        }
    }
}

/// What a failed article create/update does to the rest of the run.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    Continue,
    Abort,
}

impl FailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Abort => "abort",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BookdeskConfig {
    #[serde(default)]
    pub zendesk: ZendeskSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub book: BookSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ZendeskSection {
    pub url: Option<String>,
    pub email: Option<String>,
    pub api_token: Option<String>,
    pub category: Option<String>,
    pub create_missing_category: Option<bool>,
    pub locale: Option<String>,
    pub permission_group_id: Option<i64>,
    pub user_segment_id: Option<i64>,
    pub match_strategy: Option<MatchStrategy>,
    pub on_article_error: Option<FailurePolicy>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct StorageSection {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub public_url_prefix: Option<String>,
    pub key_prefix: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BookSection {
    pub build_command: Option<String>,
    pub include_root: Option<bool>,
    pub main_content_id: Option<String>,
    pub labels_meta: Option<String>,
}

/// Load and parse the TOML config. A missing file yields the defaults.
pub fn load_config(config_path: &Path) -> Result<BookdeskConfig> {
    if !config_path.exists() {
        return Ok(BookdeskConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: BookdeskConfig = toml::from_str(&content)
        .map_err(|error| SyncError::Config(format!("{}: {error}", config_path.display())))
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelpCenterCredentials {
    pub url: String,
    pub email: String,
    pub api_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub bucket: Option<String>,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub public_url_prefix: String,
    pub key_prefix: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Credentials {
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSettings {
    pub build_command: Vec<String>,
    pub include_root: bool,
    pub main_content_id: String,
    pub labels_meta: String,
}

/// Immutable run configuration, resolved once at startup and passed by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub url: Option<String>,
    pub email: Option<String>,
    pub api_token: Option<String>,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub category_name: Option<String>,
    pub create_missing_category: bool,
    pub locale: String,
    pub permission_group_id: Option<i64>,
    pub user_segment_id: Option<i64>,
    pub match_strategy: MatchStrategy,
    pub failure_policy: FailurePolicy,
    pub storage: StorageSettings,
    pub book: BookSettings,
}

impl SyncConfig {
    /// Resolve file values with environment overrides: env > config > default.
    pub fn from_config(config: &BookdeskConfig) -> Self {
        Self::resolve_with(config, |key| env::var(key).ok())
    }

    pub fn resolve_with<F>(config: &BookdeskConfig, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |key: &str, fallback: &Option<String>| -> Option<String> {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .or_else(|| fallback.clone())
        };
        let zendesk = &config.zendesk;
        let storage = &config.storage;
        let book = &config.book;

        let timeout_ms = lookup("BOOKDESK_HTTP_TIMEOUT_MS")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .or(zendesk.timeout_ms)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_MS);
        let build_command = book
            .build_command
            .as_deref()
            .unwrap_or(DEFAULT_BUILD_COMMAND)
            .split_whitespace()
            .map(ToString::to_string)
            .collect();

        Self {
            url: pick("ZENDESK_URL", &zendesk.url).map(|url| url.trim_end_matches('/').to_string()),
            email: pick("ZENDESK_EMAIL", &zendesk.email),
            api_token: pick("ZENDESK_API_TOKEN", &zendesk.api_token),
            user_agent: pick("BOOKDESK_USER_AGENT", &None)
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout_ms,
            category_name: pick("ZENDESK_CATEGORY", &zendesk.category),
            create_missing_category: zendesk.create_missing_category.unwrap_or(true),
            locale: zendesk
                .locale
                .clone()
                .unwrap_or_else(|| DEFAULT_LOCALE.to_string()),
            permission_group_id: zendesk.permission_group_id,
            user_segment_id: zendesk.user_segment_id,
            match_strategy: zendesk.match_strategy.unwrap_or_default(),
            failure_policy: zendesk.on_article_error.unwrap_or_default(),
            storage: StorageSettings {
                bucket: pick("AWS_S3_BUCKET", &storage.bucket),
                region: pick("AWS_REGION", &storage.region)
                    .unwrap_or_else(|| DEFAULT_S3_REGION.to_string()),
                endpoint_url: pick("AWS_ENDPOINT_URL", &storage.endpoint_url),
                public_url_prefix: storage
                    .public_url_prefix
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PUBLIC_URL_PREFIX.to_string()),
                key_prefix: storage.key_prefix.clone().unwrap_or_default(),
                access_key_id: pick("AWS_ACCESS_KEY_ID", &storage.access_key_id),
                secret_access_key: pick("AWS_SECRET_ACCESS_KEY", &storage.secret_access_key),
                session_token: pick("AWS_SESSION_TOKEN", &None),
            },
            book: BookSettings {
                build_command,
                include_root: book.include_root.unwrap_or(false),
                main_content_id: book
                    .main_content_id
                    .clone()
                    .unwrap_or_else(|| DEFAULT_MAIN_CONTENT_ID.to_string()),
                labels_meta: book
                    .labels_meta
                    .clone()
                    .unwrap_or_else(|| DEFAULT_LABELS_META.to_string()),
            },
        }
    }

    pub fn help_center_credentials(&self) -> Result<HelpCenterCredentials> {
        let mut missing = Vec::new();
        if self.url.is_none() {
            missing.push("ZENDESK_URL / [zendesk].url");
        }
        if self.email.is_none() {
            missing.push("ZENDESK_EMAIL / [zendesk].email");
        }
        if self.api_token.is_none() {
            missing.push("ZENDESK_API_TOKEN / [zendesk].api_token");
        }
        if !missing.is_empty() {
            return Err(SyncError::Config(format!(
                "missing help-center credentials: {}",
                missing.join(", ")
            ))
            .into());
        }
        Ok(HelpCenterCredentials {
            url: self.url.clone().unwrap_or_default(),
            email: self.email.clone().unwrap_or_default(),
            api_token: self.api_token.clone().unwrap_or_default(),
        })
    }

    pub fn s3_credentials(&self) -> Result<S3Credentials> {
        let mut missing = Vec::new();
        if self.storage.bucket.is_none() {
            missing.push("AWS_S3_BUCKET / [storage].bucket");
        }
        if self.storage.access_key_id.is_none() {
            missing.push("AWS_ACCESS_KEY_ID / [storage].access_key_id");
        }
        if self.storage.secret_access_key.is_none() {
            missing.push("AWS_SECRET_ACCESS_KEY / [storage].secret_access_key");
        }
        if !missing.is_empty() {
            return Err(SyncError::Config(format!(
                "missing object storage settings: {}",
                missing.join(", ")
            ))
            .into());
        }
        Ok(S3Credentials {
            bucket: self.storage.bucket.clone().unwrap_or_default(),
            access_key_id: self.storage.access_key_id.clone().unwrap_or_default(),
            secret_access_key: self.storage.secret_access_key.clone().unwrap_or_default(),
            session_token: self.storage.session_token.clone(),
        })
    }

    pub fn require_category(&self) -> Result<&str> {
        self.category_name.as_deref().ok_or_else(|| {
            SyncError::Config("missing ZENDESK_CATEGORY / [zendesk].category".to_string()).into()
        })
    }

    pub fn require_permission_group(&self) -> Result<i64> {
        self.permission_group_id.ok_or_else(|| {
            SyncError::Config("missing [zendesk].permission_group_id".to_string()).into()
        })
    }
}
