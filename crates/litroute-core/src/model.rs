//! Domain models shared by the scanner, classifier, router and engine.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Keywords that mark an attachment as supporting information, matched
/// case-insensitively against its file name and title.
const SUPPLEMENTARY_KEYWORDS: &[&str] = &[
    "supporting",
    "supplementary",
    "supplem",
    "suppl",
    "esi",
    "_si_",
    "_si.",
    "-si.",
    "si_00",
    "supp_info",
    "additional",
    "_s1.",
    "_s2.",
    "supplement",
];

/// A snapshot of a bibliographic record.
///
/// Snapshots are transient: the engine re-reads the item before every
/// mutation and sends `version` with the write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LibraryItem {
    /// Opaque item key.
    pub key: String,
    /// Version token for optimistic updates.
    pub version: u64,
    /// Item type (`journalArticle`, `book`, ...).
    pub item_type: String,
    /// Title.
    pub title: String,
    /// DOI, if known.
    pub doi: Option<String>,
    /// URL, if known.
    pub url: Option<String>,
    /// Free-form publication date.
    pub date: Option<String>,
    /// When the record was created in the library.
    pub date_added: Option<DateTime<Utc>>,
    /// Tag names.
    pub tags: BTreeSet<String>,
    /// Keys of collections this item belongs to.
    pub collections: BTreeSet<String>,
    /// Child count as reported by the library (attachments + notes).
    pub num_children: u32,
    /// Attachments, once loaded. `None` means children were not fetched.
    pub attachments: Option<Vec<Attachment>>,
    /// Number of child notes, once loaded.
    pub note_count: u32,
}

impl LibraryItem {
    /// Whether the item carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Attaches loaded children to this snapshot.
    #[must_use]
    pub fn with_children(mut self, children: Children) -> Self {
        self.attachments = Some(children.attachments);
        self.note_count = children.notes;
        self
    }

    /// Document attachments (empty when children are not loaded).
    pub fn documents(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments
            .iter()
            .flatten()
            .filter(|a| a.kind == AttachmentKind::Document)
    }

    /// Number of document attachments, if children are loaded.
    #[must_use]
    pub fn document_count(&self) -> Option<usize> {
        self.attachments.as_ref().map(|_| self.documents().count())
    }

    /// Attachments plus notes; the survivor score of duplicate resolution.
    #[must_use]
    pub fn richness(&self) -> usize {
        self.attachments.as_ref().map_or_else(
            || self.num_children as usize,
            |a| a.len() + self.note_count as usize,
        )
    }

    /// Whether any attachment already looks like supporting information.
    #[must_use]
    pub fn has_supplementary_attachment(&self) -> bool {
        self.attachments
            .iter()
            .flatten()
            .any(Attachment::looks_supplementary)
    }
}

/// Children of an item, as returned by the library.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Children {
    /// File and link attachments.
    pub attachments: Vec<Attachment>,
    /// Number of child notes.
    pub notes: u32,
}

/// Coarse attachment kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    /// A full document (PDF) whose text can be classified.
    Document,
    /// Anything else: links, snapshots, images.
    Other,
}

/// An attachment of a library item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Attachment key; the content locator used for extraction.
    pub key: String,
    /// Kind.
    pub kind: AttachmentKind,
    /// MIME type.
    pub content_type: String,
    /// Stored file name.
    pub filename: String,
    /// Display title.
    pub title: String,
    /// Target URL for linked attachments.
    pub url: Option<String>,
}

impl Attachment {
    /// Kind implied by a MIME type.
    #[must_use]
    pub fn kind_for(content_type: &str) -> AttachmentKind {
        if content_type.eq_ignore_ascii_case("application/pdf") {
            AttachmentKind::Document
        } else {
            AttachmentKind::Other
        }
    }

    /// Whether the file name or title suggests supporting information.
    #[must_use]
    pub fn looks_supplementary(&self) -> bool {
        let haystack = format!("{} {}", self.filename, self.title).to_lowercase();
        SUPPLEMENTARY_KEYWORDS.iter().any(|kw| haystack.contains(kw))
    }
}

/// Attachment count bucket used by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentCount {
    /// No documents.
    Zero,
    /// Exactly one document.
    One,
    /// Two or more documents.
    Many,
}

impl From<usize> for AttachmentCount {
    fn from(n: usize) -> Self {
        match n {
            0 => Self::Zero,
            1 => Self::One,
            _ => Self::Many,
        }
    }
}

/// Result of classifying one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationOutcome {
    /// The analysis tag is missing.
    NoAnalysisTag,
    /// Tagged but without document attachments.
    NoAttachment,
    /// The single document is a review article.
    Review,
    /// The single document is supporting information.
    SupportingInformation,
    /// The single document is an original paper (also the safe fallback).
    MainPaper,
    /// Several documents, not copies of each other.
    MultiAttachmentNoDuplicate,
    /// Several documents, at least two of them copies.
    MultiAttachmentDuplicate,
    /// Several documents but too little text to compare.
    Unclassifiable,
}

impl ClassificationOutcome {
    /// Every variant, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::NoAnalysisTag,
        Self::NoAttachment,
        Self::Review,
        Self::SupportingInformation,
        Self::MainPaper,
        Self::MultiAttachmentNoDuplicate,
        Self::MultiAttachmentDuplicate,
        Self::Unclassifiable,
    ];

    /// Stable string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoAnalysisTag => "no_analysis_tag",
            Self::NoAttachment => "no_attachment",
            Self::Review => "review",
            Self::SupportingInformation => "supporting_information",
            Self::MainPaper => "main_paper",
            Self::MultiAttachmentNoDuplicate => "multi_attachment_no_duplicate",
            Self::MultiAttachmentDuplicate => "multi_attachment_duplicate",
            Self::Unclassifiable => "unclassifiable",
        }
    }

    /// Parses the string form produced by [`as_str`](Self::as_str).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.as_str() == s)
    }
}

impl fmt::Display for ClassificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A router-assigned holding area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// Default inbox.
    Inbox,
    /// Review articles.
    ReviewHolding,
    /// Items whose attachments duplicate each other.
    DuplicateHolding,
    /// Items with several distinct documents.
    MultiAttachmentHolding,
    /// Tagged items without a document.
    MissingAttachmentHolding,
}

impl Destination {
    /// Every destination.
    pub const ALL: [Self; 5] = [
        Self::Inbox,
        Self::ReviewHolding,
        Self::DuplicateHolding,
        Self::MultiAttachmentHolding,
        Self::MissingAttachmentHolding,
    ];

    /// Stable string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::ReviewHolding => "review_holding",
            Self::DuplicateHolding => "duplicate_holding",
            Self::MultiAttachmentHolding => "multi_attachment_holding",
            Self::MissingAttachmentHolding => "missing_attachment_holding",
        }
    }

    /// Parses the string form produced by [`as_str`](Self::as_str).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == s)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
