//! In-process collaborators.
//!
//! These implement every collaborator trait over plain data structures, with
//! call counting and scripted failures. They back the unit and scenario
//! tests and are usable for dry experiments without network access.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::checkpoint::{
    CheckpointError, CheckpointResult, CheckpointStore, CheckpointSummary, Cursor, OutcomeEntry,
    PendingMove, RunStatus, WorkflowCheckpoint, WorkflowId,
};
use crate::error::ExternalError;
use crate::library::{
    CompanionCandidate, CompanionFinder, ContentClassifier, ContentExtractor, ExternalResult,
    ExtractLimits, LibraryRead, LibraryWrite, PromptKind, Source, Verdict,
};
use crate::model::{Attachment, AttachmentKind, Children, LibraryItem};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Collaborator operations, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// [`LibraryRead::get_items`].
    GetItems,
    /// [`LibraryRead::get_item`].
    GetItem,
    /// [`LibraryRead::get_children`].
    GetChildren,
    /// [`LibraryWrite::update_collections`].
    UpdateCollections,
    /// [`LibraryWrite::add_tag`].
    AddTag,
    /// [`LibraryWrite::attach_link`].
    AttachLink,
    /// [`ContentExtractor::extract_text`].
    ExtractText,
}

/// A membership write accepted by [`MemoryLibrary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipWrite {
    /// Item key.
    pub key: String,
    /// New membership.
    pub collections: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct LibraryState {
    order: Vec<String>,
    items: HashMap<String, LibraryItem>,
    children: HashMap<String, Children>,
    texts: HashMap<String, String>,
    failures: HashMap<(Op, String), VecDeque<ExternalError>>,
    calls: HashMap<Op, usize>,
    writes: Vec<MembershipWrite>,
    next_link: u32,
}

impl LibraryState {
    /// Counts the call and pops a scripted failure for `key` (or for any key).
    fn enter(&mut self, op: Op, key: &str) -> ExternalResult<()> {
        *self.calls.entry(op).or_default() += 1;
        for slot in [(op, key.to_string()), (op, String::new())] {
            if let Some(err) = self.failures.get_mut(&slot).and_then(VecDeque::pop_front) {
                return Err(err);
            }
        }
        Ok(())
    }

    fn item_mut(&mut self, key: &str) -> ExternalResult<&mut LibraryItem> {
        self.items
            .get_mut(key)
            .ok_or_else(|| ExternalError::NotFound(key.to_string()))
    }

    fn guarded(&mut self, key: &str, version: u64) -> ExternalResult<&mut LibraryItem> {
        let item = self.item_mut(key)?;
        if item.version != version {
            return Err(ExternalError::VersionConflict(key.to_string()));
        }
        Ok(item)
    }
}

/// A library held in memory, with Zotero-like version semantics.
#[derive(Debug, Default)]
pub struct MemoryLibrary {
    state: Mutex<LibraryState>,
}

impl MemoryLibrary {
    /// An empty library.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an item. New items are appended to the listing order.
    pub fn insert(&self, mut item: LibraryItem) {
        let mut state = lock(&self.state);
        item.attachments = None;
        if !state.items.contains_key(&item.key) {
            state.order.push(item.key.clone());
        }
        state.items.insert(item.key.clone(), item);
    }

    /// Adds a PDF attachment whose extracted text is `text`.
    pub fn add_document(&self, parent: &str, key: &str, filename: &str, text: &str) {
        self.add_attachment(
            parent,
            Attachment {
                key: key.into(),
                kind: AttachmentKind::Document,
                content_type: "application/pdf".into(),
                filename: filename.into(),
                title: String::new(),
                url: None,
            },
        );
        lock(&self.state).texts.insert(key.into(), text.into());
    }

    /// Adds an arbitrary attachment.
    pub fn add_attachment(&self, parent: &str, attachment: Attachment) {
        let mut state = lock(&self.state);
        state
            .children
            .entry(parent.into())
            .or_default()
            .attachments
            .push(attachment);
        if let Some(item) = state.items.get_mut(parent) {
            item.num_children += 1;
        }
    }

    /// Adds a child note.
    pub fn add_note(&self, parent: &str) {
        let mut state = lock(&self.state);
        state.children.entry(parent.into()).or_default().notes += 1;
        if let Some(item) = state.items.get_mut(parent) {
            item.num_children += 1;
        }
    }

    /// Tags an item as an outside editor would (bumps the version).
    pub fn tag(&self, key: &str, tag: &str) {
        let mut state = lock(&self.state);
        if let Some(item) = state.items.get_mut(key) {
            item.tags.insert(tag.into());
            item.version += 1;
        }
    }

    /// Moves an item between collections as an outside editor would.
    pub fn move_out(&self, key: &str, from: &str, to: &str) {
        let mut state = lock(&self.state);
        if let Some(item) = state.items.get_mut(key) {
            item.collections.remove(from);
            item.collections.insert(to.into());
            item.version += 1;
        }
    }

    /// Bumps an item's version without other changes.
    pub fn touch(&self, key: &str) {
        if let Some(item) = lock(&self.state).items.get_mut(key) {
            item.version += 1;
        }
    }

    /// Makes the next `times` calls of `op` on `key` fail with `error`.
    ///
    /// An empty `key` matches any key (and is the only key for
    /// [`Op::GetItems`]).
    pub fn fail(&self, op: Op, key: &str, error: ExternalError, times: usize) {
        lock(&self.state)
            .failures
            .entry((op, key.into()))
            .or_default()
            .extend(std::iter::repeat_n(error, times));
    }

    /// Number of calls of `op` so far.
    #[must_use]
    pub fn calls(&self, op: Op) -> usize {
        lock(&self.state).calls.get(&op).copied().unwrap_or(0)
    }

    /// Current snapshot of an item.
    #[must_use]
    pub fn item(&self, key: &str) -> Option<LibraryItem> {
        lock(&self.state).items.get(key).cloned()
    }

    /// Every accepted membership write, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<MembershipWrite> {
        lock(&self.state).writes.clone()
    }

    /// Keys of items in `collection`, in listing order.
    #[must_use]
    pub fn members(&self, collection: &str) -> Vec<String> {
        let state = lock(&self.state);
        state
            .order
            .iter()
            .filter(|k| state.items[*k].collections.contains(collection))
            .cloned()
            .collect()
    }

    /// URLs of linked attachments under `parent`.
    #[must_use]
    pub fn links(&self, parent: &str) -> Vec<String> {
        lock(&self.state)
            .children
            .get(parent)
            .map(|c| c.attachments.iter().filter_map(|a| a.url.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LibraryRead for MemoryLibrary {
    async fn get_items(
        &self,
        source: &Source,
        page_size: u32,
        offset: u32,
    ) -> ExternalResult<Vec<LibraryItem>> {
        let mut state = lock(&self.state);
        state.enter(Op::GetItems, "")?;
        Ok(state
            .order
            .iter()
            .map(|k| &state.items[k])
            .filter(|item| match source {
                Source::Collection(key) => item.collections.contains(key),
                Source::Library => true,
            })
            .skip(offset as usize)
            .take(page_size as usize)
            .cloned()
            .collect())
    }

    async fn get_item(&self, key: &str) -> ExternalResult<LibraryItem> {
        let mut state = lock(&self.state);
        state.enter(Op::GetItem, key)?;
        Ok(state.item_mut(key)?.clone())
    }

    async fn get_children(&self, key: &str) -> ExternalResult<Children> {
        let mut state = lock(&self.state);
        state.enter(Op::GetChildren, key)?;
        state.item_mut(key)?;
        Ok(state.children.get(key).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl LibraryWrite for MemoryLibrary {
    async fn update_collections(
        &self,
        key: &str,
        version: u64,
        collections: &BTreeSet<String>,
    ) -> ExternalResult<u64> {
        let mut state = lock(&self.state);
        state.enter(Op::UpdateCollections, key)?;
        let item = state.guarded(key, version)?;
        item.collections.clone_from(collections);
        item.version += 1;
        let new_version = item.version;
        state.writes.push(MembershipWrite {
            key: key.into(),
            collections: collections.clone(),
        });
        Ok(new_version)
    }

    async fn add_tag(&self, key: &str, version: u64, tag: &str) -> ExternalResult<u64> {
        let mut state = lock(&self.state);
        state.enter(Op::AddTag, key)?;
        let item = state.guarded(key, version)?;
        if item.tags.insert(tag.into()) {
            item.version += 1;
        }
        Ok(item.version)
    }

    async fn attach_link(&self, parent: &str, title: &str, url: &str) -> ExternalResult<String> {
        let mut state = lock(&self.state);
        state.enter(Op::AttachLink, parent)?;
        state.item_mut(parent)?.num_children += 1;
        state.next_link += 1;
        let key = format!("LINK{:04}", state.next_link);
        state
            .children
            .entry(parent.into())
            .or_default()
            .attachments
            .push(Attachment {
                key: key.clone(),
                kind: AttachmentKind::Other,
                content_type: String::new(),
                filename: String::new(),
                title: title.into(),
                url: Some(url.into()),
            });
        Ok(key)
    }
}

#[async_trait]
impl ContentExtractor for MemoryLibrary {
    async fn extract_text(
        &self,
        attachment: &Attachment,
        limits: ExtractLimits,
    ) -> ExternalResult<String> {
        let mut state = lock(&self.state);
        state.enter(Op::ExtractText, &attachment.key)?;
        Ok(state
            .texts
            .get(&attachment.key)
            .map(|t| limits.apply(t))
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
struct ClassifierState {
    calls: Vec<(PromptKind, String)>,
    failures: VecDeque<ExternalError>,
}

/// Classifier that answers from substring rules.
#[derive(Debug)]
pub struct ScriptedClassifier {
    rules: Vec<(PromptKind, String, Verdict)>,
    fallback: Verdict,
    state: Mutex<ClassifierState>,
}

impl Default for ScriptedClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedClassifier {
    /// A classifier whose every answer is unparseable.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fallback: Verdict::Unparseable(String::new()),
            state: Mutex::new(ClassifierState::default()),
        }
    }

    /// Answers `verdict` to `kind` prompts whose text contains `needle`.
    #[must_use]
    pub fn on(mut self, kind: PromptKind, needle: &str, verdict: Verdict) -> Self {
        self.rules.push((kind, needle.into(), verdict));
        self
    }

    /// Answer when no rule matches.
    #[must_use]
    pub fn otherwise(mut self, verdict: Verdict) -> Self {
        self.fallback = verdict;
        self
    }

    /// Makes the next `times` calls fail with `error`.
    pub fn fail(&self, error: ExternalError, times: usize) {
        lock(&self.state)
            .failures
            .extend(std::iter::repeat_n(error, times));
    }

    /// Number of calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        lock(&self.state).calls.len()
    }

    /// Prompt kinds and texts received so far.
    #[must_use]
    pub fn received(&self) -> Vec<(PromptKind, String)> {
        lock(&self.state).calls.clone()
    }
}

#[async_trait]
impl ContentClassifier for ScriptedClassifier {
    async fn classify(&self, kind: PromptKind, text: &str) -> ExternalResult<Verdict> {
        let mut state = lock(&self.state);
        state.calls.push((kind, text.into()));
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        Ok(self
            .rules
            .iter()
            .find(|(k, needle, _)| *k == kind && text.contains(needle.as_str()))
            .map_or_else(|| self.fallback.clone(), |(_, _, v)| v.clone()))
    }
}

/// Companion finder with fixed answers per DOI.
#[derive(Debug, Default)]
pub struct StaticCompanions {
    by_doi: HashMap<String, Vec<CompanionCandidate>>,
    calls: Mutex<usize>,
}

impl StaticCompanions {
    /// Registers candidates for a DOI.
    #[must_use]
    pub fn with(mut self, doi: &str, candidates: Vec<CompanionCandidate>) -> Self {
        self.by_doi.insert(doi.to_lowercase(), candidates);
        self
    }

    /// Number of lookups so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        *lock(&self.calls)
    }
}

#[async_trait]
impl CompanionFinder for StaticCompanions {
    async fn find_companion(&self, item: &LibraryItem) -> ExternalResult<Vec<CompanionCandidate>> {
        *lock(&self.calls) += 1;
        Ok(item
            .doi
            .as_deref()
            .and_then(|doi| self.by_doi.get(&doi.to_lowercase()))
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
struct StoreState {
    records: BTreeMap<WorkflowId, WorkflowCheckpoint>,
    appends: usize,
    fail_after: Option<usize>,
}

/// Checkpoint store held in memory, with an optional injected outage.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    state: Mutex<StoreState>,
}

impl MemoryCheckpointStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every append after the first `n` successful ones fail.
    pub fn fail_after_appends(&self, n: usize) {
        lock(&self.state).fail_after = Some(n);
    }

    /// Lifts an injected outage.
    pub fn heal(&self) {
        lock(&self.state).fail_after = None;
    }

    fn update<F>(&self, id: &WorkflowId, mutate: F) -> CheckpointResult<()>
    where
        F: FnOnce(&mut WorkflowCheckpoint),
    {
        let mut state = lock(&self.state);
        let checkpoint = state
            .records
            .get_mut(id)
            .ok_or_else(|| CheckpointError::NotFound(id.clone()))?;
        mutate(checkpoint);
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, id: &WorkflowId) -> CheckpointResult<Option<WorkflowCheckpoint>> {
        Ok(lock(&self.state).records.get(id).cloned())
    }

    async fn create(&self, checkpoint: &WorkflowCheckpoint) -> CheckpointResult<()> {
        let mut state = lock(&self.state);
        if state.records.contains_key(&checkpoint.id) {
            return Err(CheckpointError::AlreadyExists(checkpoint.id.clone()));
        }
        state
            .records
            .insert(checkpoint.id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn append(
        &self,
        id: &WorkflowId,
        entry: &OutcomeEntry,
        cursor: Cursor,
    ) -> CheckpointResult<()> {
        {
            let mut state = lock(&self.state);
            if state.fail_after.is_some_and(|n| state.appends >= n) {
                return Err(CheckpointError::Io(std::io::Error::other(
                    "checkpoint storage offline",
                )));
            }
            state.appends += 1;
        }
        let entry = entry.clone();
        self.update(id, move |c| c.record(entry, cursor))
    }

    async fn stage(&self, id: &WorkflowId, pending: Option<&PendingMove>) -> CheckpointResult<()> {
        self.update(id, |c| c.stage(pending.cloned()))
    }

    async fn advance(
        &self,
        id: &WorkflowId,
        cursor: Cursor,
        skipped: usize,
    ) -> CheckpointResult<()> {
        self.update(id, |c| c.advance(cursor, skipped))
    }

    async fn set_status(&self, id: &WorkflowId, status: RunStatus) -> CheckpointResult<()> {
        self.update(id, |c| c.set_status(status))
    }

    async fn finalize(&self, id: &WorkflowId) -> CheckpointResult<bool> {
        Ok(lock(&self.state).records.remove(id).is_some())
    }

    async fn list(&self) -> CheckpointResult<Vec<CheckpointSummary>> {
        Ok(lock(&self.state)
            .records
            .values()
            .map(WorkflowCheckpoint::summary)
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::checkpoint::tests::exercise_store;

    fn article(key: &str) -> LibraryItem {
        LibraryItem {
            key: key.into(),
            version: 1,
            item_type: "journalArticle".into(),
            collections: ["INBOX".to_string()].into(),
            ..LibraryItem::default()
        }
    }

    #[tokio::test]
    async fn test_memory_store_contract() {
        exercise_store(&MemoryCheckpointStore::new()).await;
    }

    #[tokio::test]
    async fn test_version_guard() {
        let library = MemoryLibrary::new();
        library.insert(article("AAAA2222"));

        let set: BTreeSet<String> = ["REVIEW".to_string()].into();
        let err = library
            .update_collections("AAAA2222", 7, &set)
            .await
            .unwrap_err();
        assert_eq!(err, ExternalError::VersionConflict("AAAA2222".into()));

        let version = library.update_collections("AAAA2222", 1, &set).await.unwrap();
        assert_eq!(version, 2);
        assert_eq!(library.members("REVIEW"), vec!["AAAA2222"]);
        assert_eq!(library.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed() {
        let library = MemoryLibrary::new();
        library.insert(article("AAAA2222"));
        library.fail(Op::GetItem, "AAAA2222", ExternalError::Timeout, 1);

        assert!(library.get_item("AAAA2222").await.is_err());
        assert!(library.get_item("AAAA2222").await.is_ok());
        assert_eq!(library.calls(Op::GetItem), 2);
    }

    #[tokio::test]
    async fn test_children_and_text() {
        let library = MemoryLibrary::new();
        library.insert(article("AAAA2222"));
        library.add_document("AAAA2222", "ATT00001", "paper.pdf", "page one\u{c}page two");
        library.add_note("AAAA2222");

        let children = library.get_children("AAAA2222").await.unwrap();
        assert_eq!(children.attachments.len(), 1);
        assert_eq!(children.notes, 1);
        assert_eq!(library.item("AAAA2222").unwrap().num_children, 2);

        let limits = ExtractLimits {
            max_pages: 1,
            max_chars: 100,
        };
        let text = library
            .extract_text(&children.attachments[0], limits)
            .await
            .unwrap();
        assert_eq!(text, "page one");
    }

    #[tokio::test]
    async fn test_scripted_classifier_rules() {
        let classifier = ScriptedClassifier::new()
            .on(
                PromptKind::DocumentType,
                "survey",
                Verdict::Label(litroute_llm::Label::Review),
            )
            .otherwise(Verdict::Label(litroute_llm::Label::MainPaper));

        assert_eq!(
            classifier
                .classify(PromptKind::DocumentType, "a survey of ...")
                .await
                .unwrap(),
            Verdict::Label(litroute_llm::Label::Review)
        );
        assert_eq!(
            classifier
                .classify(PromptKind::DocumentType, "we measured ...")
                .await
                .unwrap(),
            Verdict::Label(litroute_llm::Label::MainPaper)
        );
        assert_eq!(classifier.calls(), 2);
    }

    #[tokio::test]
    async fn test_store_outage() {
        let store = MemoryCheckpointStore::new();
        let id = WorkflowId::new("w").unwrap();
        store
            .create(&WorkflowCheckpoint::new(
                id.clone(),
                crate::checkpoint::tests::sample_params(),
            ))
            .await
            .unwrap();
        store.fail_after_appends(1);

        let entry = OutcomeEntry::failed("K1", None, "x");
        assert!(store.append(&id, &entry, Cursor::default()).await.is_ok());
        assert!(store.append(&id, &entry, Cursor::default()).await.is_err());
        store.heal();
        assert!(store.append(&id, &entry, Cursor::default()).await.is_ok());
        assert_eq!(store.load(&id).await.unwrap().unwrap().processed(), 2);
    }
}
