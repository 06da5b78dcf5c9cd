//! Shared fixtures for engine integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use litroute_core::checkpoint::CheckpointResult;
use litroute_core::library::{PromptKind, Verdict};
use litroute_core::memory::{MemoryCheckpointStore, MemoryLibrary, ScriptedClassifier};
use litroute_core::{
    CheckpointStore, CheckpointSummary, Collaborators, Cursor, DestinationMap, EngineSettings,
    ExtractLimits, LibraryItem, OutcomeEntry, PendingMove, RetryPolicy, RunParams, RunStatus,
    Source, WorkflowCheckpoint, WorkflowEngine, WorkflowId,
};
use litroute_llm::Label;
use tokio_util::sync::CancellationToken;

pub const TAG: &str = "AI分析";
pub const SOURCE: &str = "SOURCE01";
pub const INBOX: &str = "INBOX001";
pub const REVIEW: &str = "REVIEW01";
pub const DUPES: &str = "DUPES001";
pub const MULTI: &str = "MULTI001";
pub const NOPDF: &str = "NOPDF001";
pub const HOLDINGS: [&str; 5] = [INBOX, REVIEW, DUPES, MULTI, NOPDF];

pub struct Harness {
    pub library: Arc<MemoryLibrary>,
    pub classifier: Arc<ScriptedClassifier>,
    pub store: Arc<MemoryCheckpointStore>,
    pub dry: Arc<MemoryCheckpointStore>,
    pub engine: Arc<WorkflowEngine>,
}

/// Replies by content: "review" text is a review, "supporting" text is
/// supporting information, excerpts mentioning "copy" are duplicates.
pub fn scripted_classifier() -> ScriptedClassifier {
    ScriptedClassifier::new()
        .on(PromptKind::DocumentType, "review", Verdict::Label(Label::Review))
        .on(
            PromptKind::DocumentType,
            "supporting",
            Verdict::Label(Label::SupportingInformation),
        )
        .on(PromptKind::DocumentType, "article", Verdict::Label(Label::MainPaper))
        .on(PromptKind::DuplicateCheck, "copy", Verdict::Label(Label::Duplicate))
        .on(PromptKind::DuplicateCheck, "chapter", Verdict::Label(Label::Distinct))
}

pub fn settings(retry: RetryPolicy, routed_tag: Option<&str>) -> EngineSettings {
    EngineSettings {
        destinations: DestinationMap {
            inbox: INBOX.into(),
            review: REVIEW.into(),
            duplicates: DUPES.into(),
            multi_attachment: MULTI.into(),
            missing_attachment: NOPDF.into(),
        },
        analysis_tag: TAG.into(),
        routed_tag: routed_tag.map(String::from),
        retry,
        limits: ExtractLimits::default(),
        item_delay: Duration::ZERO,
        enrich_companions: false,
    }
}

pub fn harness_with(library: Arc<MemoryLibrary>, settings: EngineSettings) -> Harness {
    build(library, settings, |store| store as Arc<dyn CheckpointStore>)
}

/// A harness whose run is cancelled once `after` outcomes are checkpointed.
pub fn harness_cancelling(after: usize, cancel: CancellationToken) -> Harness {
    build(
        Arc::new(MemoryLibrary::new()),
        settings(RetryPolicy::immediate(3), None),
        move |inner| {
            Arc::new(CancelAfterAppends {
                inner,
                after,
                appended: AtomicUsize::new(0),
                cancel,
            }) as Arc<dyn CheckpointStore>
        },
    )
}

fn build<W>(library: Arc<MemoryLibrary>, settings: EngineSettings, wrap: W) -> Harness
where
    W: FnOnce(Arc<MemoryCheckpointStore>) -> Arc<dyn CheckpointStore>,
{
    let classifier = Arc::new(scripted_classifier());
    let store = Arc::new(MemoryCheckpointStore::new());
    let dry = Arc::new(MemoryCheckpointStore::new());
    let engine = Arc::new(WorkflowEngine::new(
        Collaborators {
            reader: library.clone(),
            writer: library.clone(),
            extractor: library.clone(),
            classifier: classifier.clone(),
            companions: None,
        },
        settings,
        wrap(store.clone()),
        dry.clone(),
    ));
    Harness {
        library,
        classifier,
        store,
        dry,
        engine,
    }
}

pub fn harness() -> Harness {
    harness_with(
        Arc::new(MemoryLibrary::new()),
        settings(RetryPolicy::immediate(3), None),
    )
}

/// Adds a journal article in [`SOURCE`] with one PDF per entry of `texts`.
pub fn add_item(library: &MemoryLibrary, key: &str, tagged: bool, texts: &[&str]) {
    let mut item = LibraryItem {
        key: key.into(),
        version: 1,
        item_type: "journalArticle".into(),
        title: format!("Paper {key}"),
        collections: [SOURCE.to_string()].into(),
        ..LibraryItem::default()
    };
    if tagged {
        item.tags.insert(TAG.into());
    }
    library.insert(item);
    for (i, text) in texts.iter().enumerate() {
        library.add_document(key, &format!("{key}P{i}"), &format!("{key}-{i}.pdf"), text);
    }
}

/// A mixed library of `n` items covering every router branch.
pub fn populate(library: &MemoryLibrary, n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            let key = format!("ITEM{i:04}");
            match i % 6 {
                0 => add_item(library, &key, false, &["an article"]),
                1 => add_item(library, &key, true, &["a review of catalysts"]),
                2 => add_item(library, &key, true, &["supporting figures"]),
                3 => add_item(library, &key, true, &[]),
                4 => add_item(library, &key, true, &["copy one", "copy two"]),
                _ => add_item(library, &key, true, &["an article"]),
            }
            key
        })
        .collect()
}

pub fn params(treated_limit: usize, dry_run: bool) -> RunParams {
    RunParams {
        sources: vec![Source::Collection(SOURCE.into())],
        page_size: 5,
        treated_limit,
        dry_run,
    }
}

pub fn id(s: &str) -> WorkflowId {
    WorkflowId::new(s).unwrap()
}

/// The router-managed collection each key currently sits in.
pub fn placement(library: &MemoryLibrary, keys: &[String]) -> Vec<(String, Vec<String>)> {
    keys.iter()
        .map(|key| {
            let item = library.item(key).unwrap();
            let held = item
                .collections
                .iter()
                .filter(|c| HOLDINGS.contains(&c.as_str()) || c.as_str() == SOURCE)
                .cloned()
                .collect();
            (key.clone(), held)
        })
        .collect()
}

/// Delegates to a memory store and cancels a token after a number of appends.
pub struct CancelAfterAppends {
    inner: Arc<MemoryCheckpointStore>,
    after: usize,
    appended: AtomicUsize,
    cancel: CancellationToken,
}

#[async_trait]
impl CheckpointStore for CancelAfterAppends {
    async fn load(&self, id: &WorkflowId) -> CheckpointResult<Option<WorkflowCheckpoint>> {
        self.inner.load(id).await
    }

    async fn create(&self, checkpoint: &WorkflowCheckpoint) -> CheckpointResult<()> {
        self.inner.create(checkpoint).await
    }

    async fn append(
        &self,
        id: &WorkflowId,
        entry: &OutcomeEntry,
        cursor: Cursor,
    ) -> CheckpointResult<()> {
        self.inner.append(id, entry, cursor).await?;
        if self.appended.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            self.cancel.cancel();
        }
        Ok(())
    }

    async fn stage(&self, id: &WorkflowId, pending: Option<&PendingMove>) -> CheckpointResult<()> {
        self.inner.stage(id, pending).await
    }

    async fn advance(
        &self,
        id: &WorkflowId,
        cursor: Cursor,
        skipped: usize,
    ) -> CheckpointResult<()> {
        self.inner.advance(id, cursor, skipped).await
    }

    async fn set_status(&self, id: &WorkflowId, status: RunStatus) -> CheckpointResult<()> {
        self.inner.set_status(id, status).await
    }

    async fn finalize(&self, id: &WorkflowId) -> CheckpointResult<bool> {
        self.inner.finalize(id).await
    }

    async fn list(&self) -> CheckpointResult<Vec<CheckpointSummary>> {
        self.inner.list().await
    }
}
