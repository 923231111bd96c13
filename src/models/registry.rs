//! Registry HTTP client
//!
//! Wraps the registry's JSON API: catalog listing and lookup, signed
//! download and upload URLs, duplicate checks, metadata registration and
//! deletion. Every call takes an optional [`Session`]; when present the
//! bearer token is attached and the user-scoped endpoint is used, which
//! widens the reachable result set from public to public + protected +
//! private.
//!
//! No call is retried here. Transport failures and non-2xx responses are
//! returned to the caller, which owns the backoff policy.

use super::metadata::{AccessLevel, CatalogEntry, CatalogFilter, ModelIdentifier};
use crate::auth::Session;
use crate::config::ClientConfig;
use crate::error::{BazaarError, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, HeaderValue};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// Signed, short-lived location of an artifact archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadDescriptor {
    pub url: String,
    /// Archive length declared by the registry, if any
    pub archive_size: Option<u64>,
}

/// Metadata registered after a successful upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRecord {
    pub name: String,
    pub trained_on: String,
    pub num_params: u64,
    pub is_indexed: bool,
    pub size: u64,
    pub size_in_memory: u64,
    pub hash: String,
    pub access_level: AccessLevel,
    pub description: Option<String>,
    pub schema_version: String,
}

#[derive(Debug, Deserialize)]
struct ModelCheck {
    model_present: bool,
}

#[derive(Debug, Deserialize)]
struct SignedUrl {
    url: String,
}

/// Client for the registry API
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: Client,
    base: Url,
    request_timeout: Duration,
}

impl RegistryClient {
    /// Build a client from configuration
    ///
    /// Only API calls carry the request timeout; archive transfers are
    /// bounded by the connect timeout and the caller's cancellation.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base = config
            .base()
            .map_err(|e| BazaarError::Config(format!("{:#}", e)))?;
        let http = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            http,
            base,
            request_timeout: config.request_timeout(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| BazaarError::Config(format!("Cannot join '{}': {}", path, e)))
    }

    /// API request with the per-call timeout and optional bearer token
    pub(crate) fn request(
        &self,
        method: reqwest::Method,
        url: Url,
        session: Option<&Session>,
    ) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .timeout(self.request_timeout);
        match session {
            Some(session) => builder.header(AUTHORIZATION, bearer(session)),
            None => builder,
        }
    }

    /// Send a request and unwrap the registry's `{"data": ...}` envelope
    pub(crate) async fn data(request: RequestBuilder) -> Result<Value> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = error_message(response).await;
            return Err(match status {
                StatusCode::NOT_FOUND => BazaarError::NotFound(message),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BazaarError::Auth(message),
                _ => BazaarError::Http {
                    status: status.as_u16(),
                    message,
                },
            });
        }

        let mut body: Value = response
            .json()
            .await
            .map_err(|e| BazaarError::MalformedResponse(e.to_string()))?;
        match body.get_mut("data") {
            Some(data) => Ok(data.take()),
            None => Err(BazaarError::MalformedResponse(
                "response has no 'data' field".to_string(),
            )),
        }
    }

    /// List catalog entries matching `filter`
    ///
    /// Anonymous listings hit the public endpoint and silently drop the
    /// access-level filter, which only the user-scoped endpoint honours.
    pub async fn list(
        &self,
        filter: &CatalogFilter,
        session: Option<&Session>,
    ) -> Result<Vec<CatalogEntry>> {
        let mut params: Vec<(&str, String)> = vec![("name", filter.name.clone())];
        if let Some(domain) = &filter.domain {
            params.push(("domain", domain.clone()));
        }
        if let Some(username) = &filter.username {
            params.push(("username", username.clone()));
        }

        let request = match session {
            Some(session) => {
                if let Some(levels) = &filter.access_levels {
                    params.extend(levels.iter().map(|l| ("access_level", l.to_string())));
                }
                let url = self.endpoint(&format!("bazaar/{}/list", session.user_id()))?;
                self.request(reqwest::Method::GET, url, Some(session))
            }
            None => {
                if filter.access_levels.is_some() {
                    tracing::debug!("Ignoring access level filter for anonymous listing");
                }
                tracing::info!("Fetching public models, login to fetch all accessible models");
                let url = self.endpoint("bazaar/public-list")?;
                self.request(reqwest::Method::GET, url, None)
            }
        };

        let data = Self::data(request.query(&params)).await?;
        let records = match data {
            Value::Array(records) => records,
            other => {
                return Err(BazaarError::MalformedResponse(format!(
                    "expected a list of entries, got {}",
                    type_name(&other)
                )));
            }
        };

        let total = records.len();
        let entries = CatalogEntry::parse_list(records);
        tracing::debug!(
            received = total,
            kept = entries.len(),
            authenticated = session.is_some(),
            "Catalog listing fetched"
        );
        Ok(entries)
    }

    /// Look up a single entry without requesting a signed URL
    pub async fn lookup(
        &self,
        identifier: &ModelIdentifier,
        session: Option<&Session>,
    ) -> Result<CatalogEntry> {
        let url = match session {
            Some(session) => self.endpoint(&format!("bazaar/{}/model", session.user_id()))?,
            None => self.endpoint("bazaar/model")?,
        };
        let request = self
            .request(reqwest::Method::GET, url, session)
            .query(&[("saved_path", identifier.to_string())]);

        let data = Self::data(request).await?;
        if data.is_null() {
            return Err(BazaarError::NotFound(identifier.to_string()));
        }
        CatalogEntry::from_value(data)
    }

    /// Resolve an identifier to its entry and a signed download URL
    pub async fn resolve(
        &self,
        identifier: &ModelIdentifier,
        session: Option<&Session>,
    ) -> Result<(CatalogEntry, DownloadDescriptor)> {
        let url = match session {
            Some(session) => self.endpoint(&format!("bazaar/{}/download", session.user_id()))?,
            None => self.endpoint("bazaar/public-download")?,
        };
        let request = self
            .request(reqwest::Method::GET, url, session)
            .query(&[("saved_path", identifier.to_string())]);

        let mut data = Self::data(request).await?;
        let fields = data
            .as_object_mut()
            .ok_or_else(|| BazaarError::NotFound(identifier.to_string()))?;

        let download_url = match fields.remove("url") {
            Some(Value::String(url)) => url,
            _ => {
                return Err(BazaarError::MalformedResponse(
                    "download response has no url".to_string(),
                ));
            }
        };
        let archive_size = fields.remove("archive_size").and_then(|v| v.as_u64());

        let entry = CatalogEntry::from_value(data)?;
        if entry.identifier != identifier.to_string() {
            return Err(BazaarError::MalformedResponse(format!(
                "asked for '{}', registry answered '{}'",
                identifier, entry.identifier
            )));
        }

        tracing::debug!(identifier = %identifier, hash = %entry.content_hash, "Resolved download");
        Ok((
            entry,
            DownloadDescriptor {
                url: download_url,
                archive_size,
            },
        ))
    }

    /// Whether the caller already published an artifact with this hash
    pub async fn hash_exists(&self, session: &Session, hash: &str) -> Result<bool> {
        let url = self.endpoint(&format!("bazaar/{}/model-check", session.user_id()))?;
        let request = self
            .request(reqwest::Method::GET, url, Some(session))
            .query(&[("hash", hash)]);

        let check: ModelCheck = serde_json::from_value(Self::data(request).await?)
            .map_err(|e| BazaarError::MalformedResponse(e.to_string()))?;
        Ok(check.model_present)
    }

    /// Request a signed upload slot sized to the archive
    pub async fn upload_url(&self, session: &Session, name: &str, size_bytes: u64) -> Result<String> {
        let size_mb = size_bytes / (1024 * 1024);
        let url = self.endpoint(&format!("bazaar/{}/upload-url", session.user_id()))?;
        let request = self
            .request(reqwest::Method::GET, url, Some(session))
            .query(&[("name", name.to_string()), ("size", size_mb.to_string())]);

        let signed: SignedUrl = serde_json::from_value(Self::data(request).await?)
            .map_err(|e| BazaarError::MalformedResponse(e.to_string()))?;
        Ok(signed.url)
    }

    /// Stream an archive to a signed upload URL
    pub async fn upload_archive(&self, upload_url: &str, archive: &Path) -> Result<()> {
        let file = tokio::fs::File::open(archive).await?;
        let len = file.metadata().await?.len();

        let response = self
            .http
            .put(upload_url)
            .header("x-ms-blob-type", "BlockBlob")
            .header(CONTENT_LENGTH, len)
            .body(reqwest::Body::from(file))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(response).await;
            return Err(BazaarError::Http {
                status: status.as_u16(),
                message,
            });
        }

        tracing::debug!(bytes = len, "Archive uploaded");
        Ok(())
    }

    /// Register metadata for an uploaded archive
    pub async fn register(&self, session: &Session, record: &PublishRecord) -> Result<()> {
        let url = self.endpoint(&format!("bazaar/{}/upload-info", session.user_id()))?;
        let request = self
            .request(reqwest::Method::POST, url, Some(session))
            .json(record);
        Self::data(request).await?;
        Ok(())
    }

    /// Delete a published artifact from the registry
    pub async fn delete(&self, session: &Session, identifier: &ModelIdentifier) -> Result<()> {
        let url = self.endpoint(&format!("bazaar/{}/delete", session.user_id()))?;
        let request = self
            .request(reqwest::Method::POST, url, Some(session))
            .json(&serde_json::json!({ "saved_path": identifier.to_string() }));
        Self::data(request).await?;
        tracing::info!(identifier = %identifier, "Deleted model from registry");
        Ok(())
    }
}

fn bearer(session: &Session) -> HeaderValue {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", session.access_token()))
        .unwrap_or_else(|_| HeaderValue::from_static("Bearer"));
    value.set_sensitive(true);
    value
}

/// Best-effort extraction of the server's error message
pub(crate) async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();

    if let Ok(body) = serde_json::from_str::<Value>(&text) {
        for key in ["message", "detail", "error"] {
            if let Some(message) = body.get(key).and_then(|v| v.as_str()) {
                return message.to_string();
            }
        }
    }

    if text.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        text
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
