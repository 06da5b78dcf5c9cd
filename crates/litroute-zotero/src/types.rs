//! Zotero API object types.
//!
//! Only the fields the client reads or writes are modelled; unknown fields
//! are ignored on deserialization.

use serde::{Deserialize, Serialize};

/// A Zotero item as returned by the `format=json` endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Item {
    /// Eight-character item key.
    pub key: String,
    /// Item version (used for optimistic concurrency).
    pub version: u64,
    /// Server-computed metadata.
    #[serde(default)]
    pub meta: ItemMeta,
    /// Editable item fields.
    pub data: ItemData,
}

/// Read-only item metadata.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMeta {
    /// Number of child items (attachments and notes).
    #[serde(default)]
    pub num_children: u32,
}

/// Editable item fields.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemData {
    /// Item type (`journalArticle`, `attachment`, `note`, ...).
    #[serde(default)]
    pub item_type: String,
    /// Title.
    #[serde(default)]
    pub title: String,
    /// DOI, when the item type carries one.
    #[serde(default, rename = "DOI")]
    pub doi: String,
    /// URL field.
    #[serde(default)]
    pub url: String,
    /// Free-form publication date.
    #[serde(default)]
    pub date: String,
    /// ISO 8601 creation timestamp.
    #[serde(default)]
    pub date_added: String,
    /// Journal or proceedings title.
    #[serde(default)]
    pub publication_title: String,
    /// Publisher name.
    #[serde(default)]
    pub publisher: String,
    /// Collection keys this item belongs to.
    #[serde(default)]
    pub collections: Vec<String>,
    /// Tags on this item.
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Parent item key (child items only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_item: Option<String>,
    /// MIME type (attachments only).
    #[serde(default)]
    pub content_type: String,
    /// Stored file name (attachments only).
    #[serde(default)]
    pub filename: String,
    /// Attachment link mode (`imported_file`, `linked_url`, ...).
    #[serde(default)]
    pub link_mode: String,
}

impl ItemData {
    /// Whether this item is an attachment.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.item_type == "attachment"
    }

    /// Whether this item is a note.
    #[must_use]
    pub fn is_note(&self) -> bool {
        self.item_type == "note"
    }

    /// Iterates over trimmed, non-empty tag names.
    pub fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.tags
            .iter()
            .map(|t| t.tag.trim())
            .filter(|t| !t.is_empty())
    }
}

/// A tag attached to an item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Tag {
    /// Tag name.
    pub tag: String,
    /// Tag type (0 = manual, 1 = automatic).
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<u8>,
}

impl Tag {
    /// Creates a manual tag.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            kind: None,
        }
    }
}

/// A collection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Collection {
    /// Collection key.
    pub key: String,
    /// Collection version.
    pub version: u64,
    /// Collection fields.
    pub data: CollectionData,
}

/// Editable collection fields.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionData {
    /// Display name.
    pub name: String,
    /// Parent collection key, or `false` for top-level collections.
    #[serde(default)]
    pub parent_collection: serde_json::Value,
}

/// Full-text index content of an attachment.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Fulltext {
    /// Extracted text.
    #[serde(default)]
    pub content: String,
    /// Number of indexed pages (PDFs).
    #[serde(default)]
    pub indexed_pages: Option<u32>,
    /// Total pages (PDFs).
    #[serde(default)]
    pub total_pages: Option<u32>,
}

/// Response body of multi-object writes (`POST /items`).
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct WriteResponse {
    /// Index of the submitted object -> new object key.
    #[serde(default)]
    pub success: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub failed: std::collections::BTreeMap<String, WriteFailure>,
}

/// A per-object failure inside a multi-object write.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WriteFailure {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
}
