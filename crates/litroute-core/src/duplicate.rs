//! Duplicate detection.
//!
//! Two passes share this module: the library-wide grouping by identity key
//! ([`group_and_resolve`]) and the per-item check whether several attachments
//! hold the same document ([`pairwise_duplicate_likelihood`]).

use std::cmp::{Ordering, Reverse};
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::library::{ContentClassifier, PromptKind, Verdict};
use crate::model::LibraryItem;
use crate::retry::{RetryError, RetryPolicy};

/// What a duplicate group was matched on, in priority order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum IdentityKey {
    /// Normalized DOI.
    Doi(String),
    /// Normalized title.
    Title(String),
    /// Normalized URL.
    Url(String),
}

impl IdentityKey {
    /// The key of an item: DOI, else title, else URL. `None` when all are
    /// missing or normalize to nothing.
    #[must_use]
    pub fn of(item: &LibraryItem) -> Option<Self> {
        if let Some(doi) = item.doi.as_deref().and_then(normalize_doi) {
            return Some(Self::Doi(doi));
        }
        if let Some(title) = normalize_title(&item.title) {
            return Some(Self::Title(title));
        }
        item.url.as_deref().and_then(normalize_url).map(Self::Url)
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Doi(v) => write!(f, "doi:{v}"),
            Self::Title(v) => write!(f, "title:{v}"),
            Self::Url(v) => write!(f, "url:{v}"),
        }
    }
}

const DOI_PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi:",
];

fn normalize_doi(raw: &str) -> Option<String> {
    let mut doi = raw.trim().to_lowercase();
    for prefix in DOI_PREFIXES {
        if let Some(rest) = doi.strip_prefix(prefix) {
            doi = rest.trim().to_string();
            break;
        }
    }
    doi.starts_with("10.").then_some(doi)
}

/// Drops markup, lowercases and collapses everything but letters and digits
/// into single spaces.
fn normalize_title(raw: &str) -> Option<String> {
    let mut plain = String::with_capacity(raw.len());
    let mut in_tag = false;
    for c in raw.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if in_tag => {}
            c if c.is_alphanumeric() => plain.extend(c.to_lowercase()),
            _ => plain.push(' '),
        }
    }
    let title = plain.split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}

fn normalize_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let Ok(url) = url::Url::parse(raw) else {
        return Some(raw.to_lowercase());
    };
    let host = url.host_str().unwrap_or_default().to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let path = url.path().trim_end_matches('/');
    Some(match url.query() {
        Some(query) => format!("{host}{path}?{query}"),
        None => format!("{host}{path}"),
    })
}

/// Items that refer to the same work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Shared identity key.
    pub key: IdentityKey,
    /// Item kept in place.
    pub survivor: String,
    /// Every member key, survivor included, sorted.
    pub members: Vec<String>,
}

impl DuplicateGroup {
    /// Members to relocate to the duplicates holding area.
    pub fn non_survivors(&self) -> impl Iterator<Item = &str> {
        self.members
            .iter()
            .map(String::as_str)
            .filter(move |k| *k != self.survivor)
    }
}

/// Survivor order: most attachments and notes, then earliest creation, then
/// smallest key. Items without a creation time sort after dated ones.
fn survivor_order(a: &LibraryItem, b: &LibraryItem) -> Ordering {
    let rank = |i: &LibraryItem| {
        (
            Reverse(i.richness()),
            i.date_added.is_none(),
            i.date_added,
        )
    };
    rank(a).cmp(&rank(b)).then_with(|| a.key.cmp(&b.key))
}

/// Picks the canonical item of a group. Independent of input order.
#[must_use]
pub fn select_survivor<'a, I>(items: I) -> Option<&'a LibraryItem>
where
    I: IntoIterator<Item = &'a LibraryItem>,
{
    items.into_iter().min_by(|a, b| survivor_order(a, b))
}

/// Groups items by identity key and selects each group's survivor.
///
/// Only groups with at least two distinct items are returned, ordered by key.
/// Items without any identity are never grouped.
#[must_use]
pub fn group_and_resolve(items: &[LibraryItem]) -> Vec<DuplicateGroup> {
    let mut by_key: BTreeMap<IdentityKey, BTreeMap<&str, &LibraryItem>> = BTreeMap::new();
    for item in items {
        if let Some(key) = IdentityKey::of(item) {
            by_key.entry(key).or_default().insert(item.key.as_str(), item);
        }
    }

    by_key
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .filter_map(|(key, members)| {
            let survivor = select_survivor(members.values().copied())?.key.clone();
            debug!(%key, %survivor, members = members.len(), "Duplicate group");
            Some(DuplicateGroup {
                key,
                survivor,
                members: members.into_keys().map(String::from).collect(),
            })
        })
        .collect()
}

/// Asks the classifier whether any two of `snippets` are the same document.
///
/// An unparseable reply or a permanent failure counts as "distinct". Only a
/// transient failure that outlasts the retry policy is returned.
///
/// # Errors
///
/// Returns [`RetryError::Exhausted`] when every attempt failed transiently.
pub async fn pairwise_duplicate_likelihood(
    classifier: &dyn ContentClassifier,
    retry: &RetryPolicy,
    snippets: &[String],
) -> Result<bool, RetryError> {
    if snippets.len() < 2 {
        return Ok(false);
    }
    let text = litroute_llm::format_excerpts(snippets);
    let text = text.as_str();
    let verdict = retry
        .run("classify_duplicates", move || {
            classifier.classify(PromptKind::DuplicateCheck, text)
        })
        .await;

    match verdict {
        Ok(Verdict::Label(label)) => Ok(label == litroute_llm::Label::Duplicate),
        Ok(Verdict::Unparseable(raw)) => {
            warn!(reply = %raw, "Unparseable duplicate check, assuming distinct");
            Ok(false)
        }
        Err(RetryError::Permanent(e)) => {
            warn!(error = %e, "Duplicate check failed, assuming distinct");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
