use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::SyncConfig;
use crate::reconcile::ArticlePayload;

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HelpCenterUser {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
}

impl HelpCenterUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Section {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub category_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RemoteArticle {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub section_id: Option<i64>,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub draft: bool,
}

/// Article-level fields resent on every update. Draft state belongs to the
/// translation, not the article.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ArticleMetadata {
    pub section_id: i64,
    pub permission_group_id: i64,
    pub user_segment_id: Option<i64>,
    pub label_names: Vec<String>,
}

/// Remote help-center operations used by the sync and archive flows.
pub trait HelpCenterApi {
    /// `None` when the credentials resolve to an anonymous user.
    fn current_user(&mut self) -> Result<Option<HelpCenterUser>>;
    fn list_categories(&mut self) -> Result<Vec<Category>>;
    fn create_category(&mut self, name: &str, locale: &str) -> Result<Category>;
    fn list_sections(&mut self) -> Result<Vec<Section>>;
    fn create_section(&mut self, category_id: i64, name: &str, locale: &str) -> Result<Section>;
    fn list_articles_in_category(&mut self, category_id: i64) -> Result<Vec<RemoteArticle>>;
    fn create_article(&mut self, section_id: i64, payload: &ArticlePayload)
    -> Result<RemoteArticle>;
    fn update_translation(
        &mut self,
        article_id: i64,
        locale: &str,
        title: &str,
        body: &str,
        draft: bool,
    ) -> Result<()>;
    fn update_article_metadata(&mut self, article_id: i64, metadata: &ArticleMetadata)
    -> Result<()>;
    /// HTTP status of the archive request; 204 means archived.
    fn archive_article(&mut self, article_id: i64) -> Result<u16>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct ZendeskClientConfig {
    pub base_url: String,
    pub email: String,
    pub api_token: String,
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl ZendeskClientConfig {
    pub fn from_sync_config(config: &SyncConfig) -> Result<Self> {
        let credentials = config.help_center_credentials()?;
        Ok(Self {
            base_url: credentials.url,
            email: credentials.email,
            api_token: credentials.api_token,
            user_agent: config.user_agent.clone(),
            timeout_ms: config.timeout_ms,
        })
    }
}

pub struct ZendeskClient {
    client: Client,
    config: ZendeskClientConfig,
    request_count: usize,
}

impl ZendeskClient {
    pub fn new(config: ZendeskClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build help-center HTTP client")?;
        Ok(Self {
            client,
            config,
            request_count: 0,
        })
    }

    fn help_center_url(&self, path: &str) -> String {
        format!(
            "{}/api/v2/help_center/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Send one logical request, resending it after every 429 for as long as
    /// the server keeps answering 429.
    fn send(&mut self, method: Method, url: &str, body: Option<&Value>) -> Result<Response> {
        loop {
            self.request_count += 1;
            let mut request = self
                .client
                .request(method.clone(), url)
                .basic_auth(
                    format!("{}/token", self.config.email),
                    Some(&self.config.api_token),
                )
                .header("User-Agent", self.config.user_agent.clone())
                .header("Accept", "application/json");
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request
                .send()
                .with_context(|| format!("failed to call help-center API: {method} {url}"))?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                let wait = retry_after(response.headers());
                tracing::warn!(%method, url, wait_ms = wait.as_millis() as u64, "rate limited; retrying");
                sleep(wait);
                continue;
            }
            return Ok(response);
        }
    }

    fn request_json(&mut self, method: Method, url: &str, body: Option<&Value>) -> Result<Value> {
        let response = self.send(method.clone(), url, body)?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            bail!(
                "help-center API {method} {url} failed with HTTP {status}: {}",
                detail.trim()
            );
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        let text = response
            .text()
            .context("failed to read help-center API response")?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).context("failed to decode help-center API JSON response")
    }

    fn get_paginated<T: DeserializeOwned>(&mut self, url: String, key: &str) -> Result<Vec<T>> {
        let mut output = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next.take() {
            let payload = self.request_json(Method::GET, &url, None)?;
            let items = payload.get(key).cloned().unwrap_or(Value::Array(Vec::new()));
            let mut page: Vec<T> = serde_json::from_value(items)
                .with_context(|| format!("failed to decode `{key}` from {url}"))?;
            output.append(&mut page);
            next = payload
                .get("next_page")
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
                .map(ToString::to_string);
        }
        Ok(output)
    }
}

impl HelpCenterApi for ZendeskClient {
    fn current_user(&mut self) -> Result<Option<HelpCenterUser>> {
        let url = format!(
            "{}/api/v2/users/me.json",
            self.config.base_url.trim_end_matches('/')
        );
        let payload = self.request_json(Method::GET, &url, None)?;
        let user = payload.get("user").cloned().unwrap_or(Value::Null);
        if user.get("id").is_none_or(Value::is_null) {
            return Ok(None);
        }
        let user = serde_json::from_value(user).context("failed to decode current user")?;
        Ok(Some(user))
    }

    fn list_categories(&mut self) -> Result<Vec<Category>> {
        let url = self.help_center_url("categories.json");
        self.get_paginated(url, "categories")
    }

    fn create_category(&mut self, name: &str, locale: &str) -> Result<Category> {
        let url = self.help_center_url(&format!("{locale}/categories.json"));
        let body = json!({ "category": { "name": name, "locale": locale } });
        let payload = self.request_json(Method::POST, &url, Some(&body))?;
        decode_field(payload, "category")
    }

    fn list_sections(&mut self) -> Result<Vec<Section>> {
        let url = self.help_center_url("sections.json");
        self.get_paginated(url, "sections")
    }

    fn create_section(&mut self, category_id: i64, name: &str, locale: &str) -> Result<Section> {
        let url = self.help_center_url(&format!("{locale}/categories/{category_id}/sections.json"));
        let body = json!({ "section": { "name": name, "locale": locale } });
        let payload = self.request_json(Method::POST, &url, Some(&body))?;
        decode_field(payload, "section")
    }

    fn list_articles_in_category(&mut self, category_id: i64) -> Result<Vec<RemoteArticle>> {
        let url = self.help_center_url(&format!("categories/{category_id}/articles.json"));
        self.get_paginated(url, "articles")
    }

    fn create_article(
        &mut self,
        section_id: i64,
        payload: &ArticlePayload,
    ) -> Result<RemoteArticle> {
        let url = self.help_center_url(&format!("sections/{section_id}/articles.json"));
        let body = json!({ "article": payload, "notify_subscribers": false });
        let response = self.request_json(Method::POST, &url, Some(&body))?;
        decode_field(response, "article")
    }

    fn update_translation(
        &mut self,
        article_id: i64,
        locale: &str,
        title: &str,
        body: &str,
        draft: bool,
    ) -> Result<()> {
        let url = self.help_center_url(&format!("articles/{article_id}/translations/{locale}.json"));
        let request = json!({ "translation": { "title": title, "body": body, "draft": draft } });
        self.request_json(Method::PUT, &url, Some(&request))?;
        Ok(())
    }

    fn update_article_metadata(
        &mut self,
        article_id: i64,
        metadata: &ArticleMetadata,
    ) -> Result<()> {
        let url = self.help_center_url(&format!("articles/{article_id}.json"));
        let request = json!({ "article": metadata });
        self.request_json(Method::PUT, &url, Some(&request))?;
        Ok(())
    }

    fn archive_article(&mut self, article_id: i64) -> Result<u16> {
        let url = self.help_center_url(&format!("articles/{article_id}.json"));
        let response = self.send(Method::DELETE, &url, None)?;
        Ok(response.status().as_u16())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn decode_field<T: DeserializeOwned>(payload: Value, key: &str) -> Result<T> {
    let Some(value) = payload.get(key).cloned() else {
        bail!("help-center API response has no `{key}` object");
    };
    serde_json::from_value(value).with_context(|| format!("failed to decode `{key}`"))
}

/// Whole or fractional seconds from `Retry-After`; one second when absent or unparsable.
pub fn retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}
