//! Minimal Fastly API client: service/dictionary/ACL resolution, listing
//! and batch mutation.

use anyhow::{anyhow, bail, Context, Result};
use reqwest::{Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

const PAGE_SIZE: usize = 100;

/// Largest batch the API accepts in one PATCH
pub const BATCH_LIMIT: usize = 1000;

// ============ Fastly API Types ============

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServiceSearch {
    id: String,
    #[serde(default)]
    versions: Vec<ServiceVersion>,
}

#[derive(Debug, Deserialize)]
struct ServiceVersion {
    number: u32,
    #[serde(default)]
    active: bool,
}

#[derive(Debug, Deserialize)]
struct Resource {
    id: String,
}

#[derive(Debug, Deserialize)]
struct BatchStatus {
    status: String,
}

/// A service pinned to the version whose dictionaries/ACLs we resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub id: String,
    pub version: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DictionaryItem {
    pub item_key: String,
    pub item_value: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AclEntry {
    pub id: String,
    pub ip: String,
    #[serde(default, deserialize_with = "loose_string")]
    pub subnet: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub negated: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ItemOp {
    Upsert { item_key: String, item_value: String },
    Delete { item_key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EntryOp {
    Create {
        ip: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        subnet: Option<u8>,
    },
    Delete {
        id: String,
    },
}

/// Numbers and strings both show up for the same ACL fields
fn loose_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

// ============ Client ============

pub struct FastlyClient {
    http: reqwest::Client,
    base: Url,
    api_key: String,
}

impl FastlyClient {
    pub fn new(api_base: &str, api_key: &str) -> Result<Self> {
        let base = Url::parse(api_base)
            .with_context(|| format!("Invalid Fastly API base URL: {}", api_base))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            api_key: api_key.to_string(),
        })
    }

    /// Find a service by name and pick its active version (else the newest)
    pub async fn service(&self, name: &str) -> Result<Service> {
        let url = self.url(&["service", "search"])?;
        let found: ServiceSearch = self
            .send(self.request(Method::GET, url).query(&[("name", name)]))
            .await
            .with_context(|| format!("Failed to look up service {:?}", name))?;

        let version = found
            .versions
            .iter()
            .find(|v| v.active)
            .or_else(|| found.versions.iter().max_by_key(|v| v.number))
            .map(|v| v.number)
            .ok_or_else(|| anyhow!("Service {:?} has no versions", name))?;

        Ok(Service { id: found.id, version })
    }

    pub async fn dictionary_id(&self, service: &Service, name: &str) -> Result<String> {
        self.resource_id(service, "dictionary", name).await
    }

    pub async fn acl_id(&self, service: &Service, name: &str) -> Result<String> {
        self.resource_id(service, "acl", name).await
    }

    async fn resource_id(&self, service: &Service, kind: &str, name: &str) -> Result<String> {
        let version = service.version.to_string();
        let url = self.url(&["service", &service.id, "version", &version, kind, name])?;
        let resource: Resource = self
            .send(self.request(Method::GET, url))
            .await
            .with_context(|| format!("Failed to find {} {:?}", kind, name))?;
        Ok(resource.id)
    }

    pub async fn dictionary_items(&self, service_id: &str, dictionary_id: &str) -> Result<Vec<DictionaryItem>> {
        self.paged(&["service", service_id, "dictionary", dictionary_id, "items"])
            .await
            .context("Failed to list dictionary items")
    }

    pub async fn acl_entries(&self, service_id: &str, acl_id: &str) -> Result<Vec<AclEntry>> {
        self.paged(&["service", service_id, "acl", acl_id, "entries"])
            .await
            .context("Failed to list ACL entries")
    }

    /// Apply item operations; `Ok(false)` if any batch was not accepted
    pub async fn update_dictionary(&self, service_id: &str, dictionary_id: &str, ops: Vec<ItemOp>) -> Result<bool> {
        self.batch(&["service", service_id, "dictionary", dictionary_id, "items"], "items", ops)
            .await
            .context("Failed to update dictionary")
    }

    /// Apply entry operations; `Ok(false)` if any batch was not accepted
    pub async fn update_acl(&self, service_id: &str, acl_id: &str, ops: Vec<EntryOp>) -> Result<bool> {
        self.batch(&["service", service_id, "acl", acl_id, "entries"], "entries", ops)
            .await
            .context("Failed to update ACL")
    }

    async fn paged<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<Vec<T>> {
        let mut all = Vec::new();
        for page in 1.. {
            let url = self.url(segments)?;
            let batch: Vec<T> = self
                .send(
                    self.request(Method::GET, url)
                        .query(&[("page", page.to_string()), ("per_page", PAGE_SIZE.to_string())]),
                )
                .await?;
            let done = batch.len() < PAGE_SIZE;
            all.extend(batch);
            if done {
                break;
            }
        }
        Ok(all)
    }

    async fn batch<T: Serialize>(&self, segments: &[&str], field: &str, ops: Vec<T>) -> Result<bool> {
        let mut accepted = true;
        for chunk in ops.chunks(BATCH_LIMIT) {
            let url = self.url(segments)?;
            let mut body = serde_json::Map::new();
            body.insert(field.to_string(), serde_json::to_value(chunk)?);
            let status: BatchStatus = self
                .send(self.request(Method::PATCH, url).json(&body))
                .await?;
            if status.status != "ok" {
                debug!(status = %status.status, "batch not accepted");
                accepted = false;
            }
        }
        Ok(accepted)
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Fastly API base URL cannot take a path: {}", self.base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(%method, %url, "fastly request");
        self.http
            .request(method, url)
            .header("Fastly-Key", &self.api_key)
            .header("Accept", "application/json")
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = req
            .send()
            .await
            .context("Failed to connect to Fastly API")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let detail = match serde_json::from_str::<ApiError>(&body) {
                Ok(ApiError { msg, detail }) => [msg, detail]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(": "),
                Err(_) => body,
            };
            bail!("Fastly API returned {}: {}", status, detail);
        }

        resp.json().await.context("Failed to parse Fastly response")
    }
}
