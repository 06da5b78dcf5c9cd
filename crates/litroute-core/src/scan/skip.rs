//! Skip predicates.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::LibraryItem;

/// Why an item was not processed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The workflow already holds a terminal entry for it.
    AlreadyRecorded,
    /// It carries the routed marker tag.
    RoutedMarker,
    /// It is a standalone note or attachment.
    NotRegularItem,
    /// It has no document attachment.
    NoDocument,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AlreadyRecorded => "already recorded",
            Self::RoutedMarker => "routed marker tag",
            Self::NotRegularItem => "not a regular item",
            Self::NoDocument => "no document attachment",
        };
        f.write_str(s)
    }
}

/// Verdict of a skip predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipDecision {
    /// Process the item.
    Keep,
    /// Do not process the item.
    Skip(SkipReason),
    /// Ask again once the item's children are loaded.
    NeedsChildren,
}

/// Decides whether a scanned item should be processed.
pub trait SkipPredicate: Send + Sync {
    /// Evaluates one item. Must not return [`SkipDecision::NeedsChildren`]
    /// for an item whose attachments are loaded.
    fn evaluate(&self, item: &LibraryItem) -> SkipDecision;
}

impl<F> SkipPredicate for F
where
    F: Fn(&LibraryItem) -> SkipDecision + Send + Sync,
{
    fn evaluate(&self, item: &LibraryItem) -> SkipDecision {
        self(item)
    }
}

const NON_REGULAR_TYPES: &[&str] = &["attachment", "note", "annotation"];

/// The default predicate of routing workflows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StandardSkip {
    /// Items carrying this tag were already routed.
    pub routed_tag: Option<String>,
    /// Skip items without a document attachment.
    pub require_document: bool,
}

impl SkipPredicate for StandardSkip {
    fn evaluate(&self, item: &LibraryItem) -> SkipDecision {
        if NON_REGULAR_TYPES.contains(&item.item_type.as_str()) {
            return SkipDecision::Skip(SkipReason::NotRegularItem);
        }
        if self
            .routed_tag
            .as_deref()
            .is_some_and(|tag| item.has_tag(tag))
        {
            return SkipDecision::Skip(SkipReason::RoutedMarker);
        }
        if self.require_document {
            return match item.document_count() {
                None => SkipDecision::NeedsChildren,
                Some(0) => SkipDecision::Skip(SkipReason::NoDocument),
                Some(_) => SkipDecision::Keep,
            };
        }
        SkipDecision::Keep
    }
}
