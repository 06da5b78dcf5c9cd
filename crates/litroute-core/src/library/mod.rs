//! Collaborator interfaces consumed by the engine, and their adapters.
//!
//! The engine only sees these traits; [`zotero`] and [`llm`] bind them to the
//! real services and [`crate::memory`] provides in-process fakes.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::ExternalError;
use crate::model::{Attachment, Children, LibraryItem};

pub use litroute_llm::{PromptKind, Verdict};

pub mod llm;
pub mod zotero;

/// Result of an external call.
pub type ExternalResult<T> = std::result::Result<T, ExternalError>;

/// Where to read candidate items from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "key")]
pub enum Source {
    /// Top-level items of one collection.
    Collection(String),
    /// Top-level items of the whole library.
    Library,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Collection(key) => write!(f, "collection {key}"),
            Self::Library => f.write_str("library"),
        }
    }
}

/// Read access to the bibliographic library.
#[async_trait]
pub trait LibraryRead: Send + Sync {
    /// One page of top-level, non-attachment items of `source`.
    async fn get_items(
        &self,
        source: &Source,
        page_size: u32,
        offset: u32,
    ) -> ExternalResult<Vec<LibraryItem>>;

    /// A fresh snapshot of one item (children not loaded).
    async fn get_item(&self, key: &str) -> ExternalResult<LibraryItem>;

    /// Attachments and note count of one item.
    async fn get_children(&self, key: &str) -> ExternalResult<Children>;
}

/// Write access to the bibliographic library.
#[async_trait]
pub trait LibraryWrite: Send + Sync {
    /// Replaces the collection membership of an item, guarded by `version`.
    ///
    /// Returns the new version.
    async fn update_collections(
        &self,
        key: &str,
        version: u64,
        collections: &BTreeSet<String>,
    ) -> ExternalResult<u64>;

    /// Adds a tag to an item, guarded by `version`.
    ///
    /// Returns the new version.
    async fn add_tag(&self, key: &str, version: u64, tag: &str) -> ExternalResult<u64>;

    /// Adds a linked-URL child attachment and returns its key.
    async fn attach_link(&self, parent: &str, title: &str, url: &str) -> ExternalResult<String>;
}

/// Bounds for extracted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ExtractLimits {
    /// Maximum number of pages.
    pub max_pages: usize,
    /// Maximum number of characters.
    pub max_chars: usize,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_pages: 10,
            max_chars: 8000,
        }
    }
}

impl ExtractLimits {
    /// Cuts `text` to the configured pages (form-feed separated) and characters.
    #[must_use]
    pub fn apply(&self, text: &str) -> String {
        text.split('\u{c}')
            .take(self.max_pages)
            .collect::<Vec<_>>()
            .join("\n")
            .chars()
            .take(self.max_chars)
            .collect::<String>()
            .trim()
            .to_string()
    }
}

/// Reads bounded text from an attachment.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Extracted text; empty when the attachment has no text.
    async fn extract_text(
        &self,
        attachment: &Attachment,
        limits: ExtractLimits,
    ) -> ExternalResult<String>;
}

/// Classifies text with a fixed prompt.
#[async_trait]
pub trait ContentClassifier: Send + Sync {
    /// Label for `text`, or the raw reply if it could not be interpreted.
    async fn classify(&self, kind: PromptKind, text: &str) -> ExternalResult<Verdict>;
}

/// A downloadable companion file (typically supporting information).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionCandidate {
    /// File name or label.
    pub name: String,
    /// Download URL.
    pub url: String,
}

/// Locates companion material for a published item.
#[async_trait]
pub trait CompanionFinder: Send + Sync {
    /// Candidates for the item; empty when nothing was found.
    async fn find_companion(&self, item: &LibraryItem) -> ExternalResult<Vec<CompanionCandidate>>;
}
