//! HTTP client for the Zotero Web API.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};
use crate::types::{Collection, Fulltext, Item, Tag, WriteResponse};

/// Public Zotero API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.zotero.org";

const API_VERSION: &str = "3";
const COLLECTION_PAGE: u32 = 100;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Owner type of a Zotero library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LibraryKind {
    /// Personal library.
    #[default]
    User,
    /// Group library.
    Group,
}

impl LibraryKind {
    /// Parse from configuration string (`user` or `group`).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "user" | "users" => Some(Self::User),
            "group" | "groups" => Some(Self::Group),
            _ => None,
        }
    }

    /// URL path segment for this library type.
    #[must_use]
    pub const fn path_segment(&self) -> &'static str {
        match self {
            Self::User => "users",
            Self::Group => "groups",
        }
    }
}

/// Identifies the library all requests are scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryRef {
    /// Library owner type.
    pub kind: LibraryKind,
    /// Numeric user or group id.
    pub id: String,
}

impl LibraryRef {
    /// A personal library.
    #[must_use]
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: LibraryKind::User,
            id: id.into(),
        }
    }

    /// A group library.
    #[must_use]
    pub fn group(id: impl Into<String>) -> Self {
        Self {
            kind: LibraryKind::Group,
            id: id.into(),
        }
    }

    fn prefix(&self) -> String {
        format!("{}/{}", self.kind.path_segment(), self.id)
    }
}

/// Pagination window for list endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Maximum number of objects to return (the API caps this at 100).
    pub limit: u32,
    /// Offset of the first object.
    pub start: u32,
    /// `itemType` filter, e.g. `-attachment`.
    pub item_type: Option<String>,
    /// Ascending sort field. Offsets are only stable under a fixed order.
    pub sort: Option<String>,
}

impl Page {
    /// A page of top-level, non-attachment items.
    #[must_use]
    pub fn new(limit: u32, start: u32) -> Self {
        Self {
            limit,
            start,
            item_type: Some("-attachment".to_string()),
            sort: Some("dateAdded".to_string()),
        }
    }

    /// Replaces the `itemType` filter.
    #[must_use]
    pub fn with_item_type(mut self, item_type: Option<String>) -> Self {
        self.item_type = item_type;
        self
    }

    /// Replaces the sort field.
    #[must_use]
    pub fn with_sort(mut self, sort: Option<String>) -> Self {
        self.sort = sort;
        self
    }

    fn apply(&self, url: &mut Url) {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("format", "json")
            .append_pair("limit", &self.limit.to_string())
            .append_pair("start", &self.start.to_string());
        if let Some(item_type) = &self.item_type {
            query.append_pair("itemType", item_type);
        }
        if let Some(sort) = &self.sort {
            query.append_pair("sort", sort).append_pair("direction", "asc");
        }
    }
}

/// Zotero Web API client scoped to one library.
#[derive(Debug, Clone)]
pub struct ZoteroClient {
    http: Client,
    base_url: Url,
    library: LibraryRef,
    api_key: Option<String>,
    timeout: Duration,
}

impl ZoteroClient {
    /// Creates a client for the public API endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the library id is empty or the API key is not a
    /// valid header value.
    pub fn new(library: LibraryRef, api_key: Option<String>) -> Result<Self> {
        if library.id.trim().is_empty() {
            return Err(Error::InvalidConfig("library id is empty".into()));
        }
        let http = build_http(api_key.as_deref(), DEFAULT_TIMEOUT)?;
        Ok(Self {
            http,
            base_url: parse_base(DEFAULT_BASE_URL)?,
            library,
            api_key,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Points the client at a different API endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.base_url = parse_base(base_url)?;
        Ok(self)
    }

    /// Sets the per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be rebuilt.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = build_http(self.api_key.as_deref(), timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    /// The library this client is scoped to.
    #[must_use]
    pub const fn library(&self) -> &LibraryRef {
        &self.library
    }

    /// Lists top-level items of a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the collection does not exist.
    pub async fn collection_items(&self, collection: &str, page: &Page) -> Result<Vec<Item>> {
        let mut url = self.library_url(&format!("collections/{collection}/items/top"))?;
        page.apply(&mut url);
        self.get_json(url, collection).await
    }

    /// Lists top-level items of the whole library.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn library_items(&self, page: &Page) -> Result<Vec<Item>> {
        let mut url = self.library_url("items/top")?;
        page.apply(&mut url);
        self.get_json(url, "library").await
    }

    /// Fetches a single item with its current version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the key does not exist.
    pub async fn item(&self, key: &str) -> Result<Item> {
        let mut url = self.library_url(&format!("items/{key}"))?;
        url.query_pairs_mut().append_pair("format", "json");
        self.get_json(url, key).await
    }

    /// Fetches the child items (attachments and notes) of an item.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn children(&self, key: &str) -> Result<Vec<Item>> {
        let mut url = self.library_url(&format!("items/{key}/children"))?;
        url.query_pairs_mut().append_pair("format", "json");
        self.get_json(url, key).await
    }

    /// Lists every collection in the library.
    ///
    /// # Errors
    ///
    /// Returns an error if any page request fails.
    pub async fn collections(&self) -> Result<Vec<Collection>> {
        let mut all = Vec::new();
        let mut start = 0;
        loop {
            let mut url = self.library_url("collections")?;
            Page::new(COLLECTION_PAGE, start)
                .with_item_type(None)
                .with_sort(None)
                .apply(&mut url);
            let page: Vec<Collection> = self.get_json(url, "collections").await?;
            let fetched = u32::try_from(page.len()).unwrap_or(u32::MAX);
            all.extend(page);
            if fetched < COLLECTION_PAGE {
                break;
            }
            start += COLLECTION_PAGE;
        }
        Ok(all)
    }

    /// Resolves a collection by key or exact name.
    ///
    /// Values shaped like a Zotero key are looked up directly first; otherwise
    /// (or if the key does not exist) collections are matched by name.
    ///
    /// # Errors
    ///
    /// Returns an error if a request fails.
    pub async fn find_collection(&self, key_or_name: &str) -> Result<Option<Collection>> {
        if looks_like_key(key_or_name) {
            let mut url = self.library_url(&format!("collections/{key_or_name}"))?;
            url.query_pairs_mut().append_pair("format", "json");
            match self.get_json::<Collection>(url, key_or_name).await {
                Ok(collection) => return Ok(Some(collection)),
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(self
            .collections()
            .await?
            .into_iter()
            .find(|c| c.data.name == key_or_name))
    }

    /// Reads the full-text index of an attachment.
    ///
    /// Returns `None` when the attachment has not been indexed.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails for any other reason.
    pub async fn fulltext(&self, attachment_key: &str) -> Result<Option<Fulltext>> {
        let url = self.library_url(&format!("items/{attachment_key}/fulltext"))?;
        match self.get_json(url, attachment_key).await {
            Ok(text) => Ok(Some(text)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Replaces the collection membership of an item.
    ///
    /// Returns the new item version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VersionConflict`] if the item changed since `version`.
    pub async fn update_collections(
        &self,
        key: &str,
        version: u64,
        collections: &[String],
    ) -> Result<u64> {
        self.patch_item(key, version, json!({ "collections": collections }))
            .await
    }

    /// Replaces the tag list of an item.
    ///
    /// Returns the new item version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VersionConflict`] if the item changed since `version`.
    pub async fn update_tags(&self, key: &str, version: u64, tags: &[Tag]) -> Result<u64> {
        self.patch_item(key, version, json!({ "tags": tags })).await
    }

    /// Creates a `linked_url` attachment under `parent`.
    ///
    /// Returns the key of the new attachment.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects the object.
    pub async fn create_linked_url(&self, parent: &str, title: &str, link: &str) -> Result<String> {
        let url = self.library_url("items")?;
        let body = json!([{
            "itemType": "attachment",
            "parentItem": parent,
            "linkMode": "linked_url",
            "title": title,
            "url": link,
            "contentType": "",
            "charset": "",
            "tags": [],
            "relations": {},
        }]);

        debug!(parent, link, "Creating linked attachment");
        let response = self.http.post(url).json(&body).send().await?;
        let response = check(response, parent).await?;
        let written: WriteResponse = serde_json::from_slice(&response.bytes().await?)?;

        if let Some(key) = written.success.get("0") {
            return Ok(key.clone());
        }
        let reason = written.failed.get("0").map_or_else(
            || "no object created".to_string(),
            |f| format!("{} {}", f.code, f.message),
        );
        Err(Error::WriteRejected(reason))
    }

    async fn patch_item(&self, key: &str, version: u64, body: serde_json::Value) -> Result<u64> {
        let url = self.library_url(&format!("items/{key}"))?;
        debug!(key, version, "PATCH item");
        let response = self
            .http
            .patch(url)
            .header("If-Unmodified-Since-Version", version.to_string())
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::PRECONDITION_FAILED {
            return Err(Error::VersionConflict {
                key: key.to_string(),
                version,
            });
        }
        let response = check(response, key).await?;
        Ok(last_modified_version(response.headers()).unwrap_or(version))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, context: &str) -> Result<T> {
        trace!(%url, timeout = ?self.timeout, "GET");
        let response = self.http.get(url).send().await?;
        let response = check(response, context).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn library_url(&self, path: &str) -> Result<Url> {
        Ok(self
            .base_url
            .join(&format!("{}/{path}", self.library.prefix()))?)
    }
}

fn build_http(api_key: Option<&str>, timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert("Zotero-API-Version", HeaderValue::from_static(API_VERSION));
    if let Some(key) = api_key {
        let value = HeaderValue::from_str(key)
            .map_err(|_| Error::InvalidConfig("API key is not a valid header value".into()))?;
        headers.insert("Zotero-API-Key", value);
    }
    Ok(Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()?)
}

fn parse_base(base_url: &str) -> Result<Url> {
    let mut base = base_url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Ok(Url::parse(&base)?)
}

async fn check(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(Error::NotFound(context.to_string()));
    }
    let retry_after = retry_after(response.headers());
    let message = response.text().await.unwrap_or_default();
    Err(Error::Status {
        status: status.as_u16(),
        message,
        retry_after,
    })
}

/// Largest of `Retry-After` and `Backoff` (both in seconds).
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    ["retry-after", "backoff"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.trim().parse::<u64>().ok())
        .max()
        .map(Duration::from_secs)
}

fn last_modified_version(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("Last-Modified-Version")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Zotero object keys are eight characters from `[23456789ABCDEFGHIJKLMNPQRSTUVWXYZ]`.
fn looks_like_key(value: &str) -> bool {
    value.len() == 8
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
}
