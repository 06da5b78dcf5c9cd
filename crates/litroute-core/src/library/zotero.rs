//! Zotero Web API bindings for the library and extraction interfaces.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use litroute_zotero::{Item, Page, Tag, ZoteroClient};
use tracing::debug;

use super::{
    ContentExtractor, ExternalResult, ExtractLimits, LibraryRead, LibraryWrite, Source,
};
use crate::error::ExternalError;
use crate::model::{Attachment, Children, LibraryItem};

/// Library collaborator backed by a [`ZoteroClient`].
#[derive(Debug, Clone)]
pub struct ZoteroLibrary {
    client: ZoteroClient,
}

impl ZoteroLibrary {
    /// Wraps a configured client.
    #[must_use]
    pub const fn new(client: ZoteroClient) -> Self {
        Self { client }
    }

    /// The underlying client.
    #[must_use]
    pub const fn client(&self) -> &ZoteroClient {
        &self.client
    }

    /// Resolves a collection key or exact name to its key.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::CollectionNotFound`] when nothing matches, or
    /// the mapped client error.
    pub async fn resolve_collection(&self, key_or_name: &str) -> crate::Result<String> {
        let found = self
            .client
            .find_collection(key_or_name)
            .await
            .map_err(ExternalError::from)?;
        let collection =
            found.ok_or_else(|| crate::Error::CollectionNotFound(key_or_name.to_string()))?;
        debug!(key_or_name, key = %collection.key, "Resolved collection");
        Ok(collection.key)
    }
}

/// Converts an API item into an engine snapshot.
#[must_use]
pub fn to_library_item(item: Item) -> LibraryItem {
    let data = item.data;
    let tags = data.tag_names().map(str::to_string).collect();
    LibraryItem {
        key: item.key,
        version: item.version,
        item_type: data.item_type,
        title: data.title,
        doi: non_empty(data.doi),
        url: non_empty(data.url),
        date: non_empty(data.date),
        date_added: DateTime::parse_from_rfc3339(&data.date_added)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        tags,
        collections: data.collections.into_iter().collect(),
        num_children: item.meta.num_children,
        attachments: None,
        note_count: 0,
    }
}

fn to_attachment(item: Item) -> Attachment {
    let data = item.data;
    Attachment {
        key: item.key,
        kind: Attachment::kind_for(&data.content_type),
        content_type: data.content_type,
        filename: data.filename,
        title: data.title,
        url: non_empty(data.url),
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[async_trait]
impl LibraryRead for ZoteroLibrary {
    async fn get_items(
        &self,
        source: &Source,
        page_size: u32,
        offset: u32,
    ) -> ExternalResult<Vec<LibraryItem>> {
        let page = Page::new(page_size, offset);
        let items = match source {
            Source::Collection(key) => self.client.collection_items(key, &page).await?,
            Source::Library => self.client.library_items(&page).await?,
        };
        debug!(%source, offset, fetched = items.len(), "Fetched page");
        Ok(items.into_iter().map(to_library_item).collect())
    }

    async fn get_item(&self, key: &str) -> ExternalResult<LibraryItem> {
        Ok(to_library_item(self.client.item(key).await?))
    }

    async fn get_children(&self, key: &str) -> ExternalResult<Children> {
        let children = self.client.children(key).await?;
        let mut out = Children::default();
        for child in children {
            if child.data.is_note() {
                out.notes += 1;
            } else if child.data.is_attachment() {
                out.attachments.push(to_attachment(child));
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl LibraryWrite for ZoteroLibrary {
    async fn update_collections(
        &self,
        key: &str,
        version: u64,
        collections: &BTreeSet<String>,
    ) -> ExternalResult<u64> {
        let collections: Vec<String> = collections.iter().cloned().collect();
        Ok(self
            .client
            .update_collections(key, version, &collections)
            .await?)
    }

    async fn add_tag(&self, key: &str, version: u64, tag: &str) -> ExternalResult<u64> {
        let item = self.client.item(key).await?;
        if item.version != version {
            return Err(ExternalError::VersionConflict(key.to_string()));
        }
        let mut tags = item.data.tags;
        if tags.iter().any(|t| t.tag == tag) {
            return Ok(version);
        }
        tags.push(Tag::new(tag));
        Ok(self.client.update_tags(key, version, &tags).await?)
    }

    async fn attach_link(&self, parent: &str, title: &str, url: &str) -> ExternalResult<String> {
        Ok(self.client.create_linked_url(parent, title, url).await?)
    }
}

#[async_trait]
impl ContentExtractor for ZoteroLibrary {
    async fn extract_text(
        &self,
        attachment: &Attachment,
        limits: ExtractLimits,
    ) -> ExternalResult<String> {
        match self.client.fulltext(&attachment.key).await? {
            Some(text) => Ok(limits.apply(&text.content)),
            None => {
                debug!(attachment = %attachment.key, "No full-text index");
                Ok(String::new())
            }
        }
    }
}
