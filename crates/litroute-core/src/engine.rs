//! Workflow orchestration.
//!
//! A run pulls candidates from the [`Scanner`], classifies and routes each
//! one, stages the move in the checkpoint, applies the membership change
//! through the library, and only then appends the outcome. A crash between
//! the write and the append leaves a staged move; resume settles it by
//! re-reading the item before scanning, so the item is logged exactly once.
//!
//! Per-item failures are recorded and the run continues. Only a checkpoint
//! store failure stops a run ([`Error::RunAborted`]).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{
    CheckpointError, CheckpointStore, Cursor, ItemResult, OutcomeEntry, PendingMove, RunParams,
    RunStatus, WorkflowCheckpoint, WorkflowId, WorkflowRegistry,
};
use crate::classify::Classifier;
use crate::config::Config;
use crate::error::{Error, ExternalError, Result};
use crate::library::{
    CompanionFinder, ContentClassifier, ContentExtractor, ExtractLimits, LibraryRead,
    LibraryWrite, Source,
};
use crate::model::{AttachmentCount, ClassificationOutcome, Destination, LibraryItem};
use crate::retry::{RetryError, RetryPolicy};
use crate::route::{DestinationMap, MembershipPlan, plan_membership, route};
use crate::scan::{ScanEvent, ScanLimits, Scanner, SkipPredicate, SkipReason, StandardSkip};

/// Companion files attached per item at most.
const MAX_COMPANIONS: usize = 3;

/// External services a workflow talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Library reads.
    pub reader: Arc<dyn LibraryRead>,
    /// Library writes; never called in dry runs.
    pub writer: Arc<dyn LibraryWrite>,
    /// Attachment text.
    pub extractor: Arc<dyn ContentExtractor>,
    /// Content classification.
    pub classifier: Arc<dyn ContentClassifier>,
    /// Supporting-information lookup; `None` disables enrichment.
    pub companions: Option<Arc<dyn CompanionFinder>>,
}

/// Engine settings that do not vary per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Collection keys of the router destinations.
    pub destinations: DestinationMap,
    /// Tag that marks items for analysis.
    pub analysis_tag: String,
    /// Tag added after a move.
    pub routed_tag: Option<String>,
    /// Retry policy for every external call.
    pub retry: RetryPolicy,
    /// Extraction bounds.
    pub limits: ExtractLimits,
    /// Pause after every routed item.
    pub item_delay: Duration,
    /// Look up supporting information for main papers.
    pub enrich_companions: bool,
}

impl EngineSettings {
    /// Settings from configuration, with destinations already resolved to keys.
    #[must_use]
    pub fn from_config(config: &Config, destinations: DestinationMap) -> Self {
        Self {
            destinations,
            analysis_tag: config.workflow.analysis_tag.clone(),
            routed_tag: config.workflow.routed_tag.clone(),
            retry: config.retry,
            limits: config.extraction,
            item_delay: config.workflow.item_delay(),
            enrich_companions: config.workflow.enrich_companions,
        }
    }
}

/// Result of one invocation of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Workflow id.
    pub id: WorkflowId,
    /// Status the run ended in.
    pub status: RunStatus,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Items processed by this invocation.
    pub processed_now: usize,
    /// Items whose membership changed in this invocation.
    pub moved_now: usize,
    /// Processed items over the workflow's lifetime.
    pub processed_total: usize,
    /// Failed items over the workflow's lifetime.
    pub failed_total: usize,
    /// Skipped items over the workflow's lifetime.
    pub skipped_total: usize,
}

/// A classified candidate and the collection it belongs in.
struct Routing {
    item: LibraryItem,
    outcome: ClassificationOutcome,
    destination: Destination,
    target: String,
    /// Observed membership differs from the target's.
    moves: bool,
}

impl Routing {
    /// Entry for a dry run, where nothing is written.
    fn planned(&self) -> OutcomeEntry {
        info!(item = %self.item.key, outcome = %self.outcome, destination = %self.destination, moved = self.moves, "Routed (dry run)");
        OutcomeEntry::routed(
            &self.item.key,
            self.outcome,
            self.destination,
            &self.target,
            self.moves,
        )
    }

    fn pending(&self, cursor: Cursor, scanning: Option<&Source>) -> PendingMove {
        PendingMove {
            item_key: self.item.key.clone(),
            outcome: self.outcome,
            destination: self.destination,
            collection: self.target.clone(),
            moved: self.moves,
            source: match scanning {
                Some(Source::Collection(key)) => Some(key.clone()),
                Some(Source::Library) | None => None,
            },
            cursor,
        }
    }
}

enum Decision {
    Route(Routing),
    Fail(OutcomeEntry),
}

/// Drives scan, classify, route and checkpoint.
pub struct WorkflowEngine {
    collab: Collaborators,
    settings: EngineSettings,
    classifier: Classifier,
    skip: Arc<dyn SkipPredicate>,
    registry: WorkflowRegistry,
}

impl WorkflowEngine {
    /// Creates an engine. Dry runs are recorded in `dry_run_store` only.
    pub fn new(
        collab: Collaborators,
        settings: EngineSettings,
        store: Arc<dyn CheckpointStore>,
        dry_run_store: Arc<dyn CheckpointStore>,
    ) -> Self {
        let classifier = Classifier::new(
            collab.extractor.clone(),
            collab.classifier.clone(),
            settings.analysis_tag.clone(),
            settings.limits,
            settings.retry,
        );
        let skip = Arc::new(StandardSkip {
            routed_tag: settings.routed_tag.clone(),
            require_document: false,
        });
        Self {
            collab,
            settings,
            classifier,
            skip,
            registry: WorkflowRegistry::new(store, dry_run_store),
        }
    }

    /// Replaces the skip predicate.
    #[must_use]
    pub fn with_skip(mut self, skip: Arc<dyn SkipPredicate>) -> Self {
        self.skip = skip;
        self
    }

    /// Engine settings.
    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub(crate) fn collaborators(&self) -> &Collaborators {
        &self.collab
    }

    /// The committed and dry-run checkpoint stores.
    #[must_use]
    pub const fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Runs a workflow, creating its checkpoint on first use.
    ///
    /// An existing checkpoint is continued with its stored parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unusable parameters and
    /// [`Error::RunAborted`] when progress can no longer be persisted.
    pub async fn start(
        &self,
        id: WorkflowId,
        params: RunParams,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        validate_params(&params)?;
        let store = self.registry.store_for(params.dry_run);

        let checkpoint = match store.load(&id).await? {
            Some(existing) => {
                if existing.params != params {
                    warn!(workflow = %id, "Workflow exists; continuing with its stored parameters");
                }
                existing
            }
            None => {
                let checkpoint = WorkflowCheckpoint::new(id.clone(), params);
                store.create(&checkpoint).await?;
                info!(workflow = %id, dry_run = checkpoint.params.dry_run, "Workflow created");
                checkpoint
            }
        };
        self.drive(store, checkpoint, cancel).await
    }

    /// Continues a stored workflow.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkflowNotFound`] when neither store knows `id`, and
    /// the errors of [`start`](Self::start).
    pub async fn resume(&self, id: &WorkflowId, cancel: &CancellationToken) -> Result<RunReport> {
        let (store, checkpoint) = self.registry.locate(id).await?;
        info!(workflow = %id, processed = checkpoint.processed(), cursor = ?checkpoint.cursor, "Resuming");
        self.drive(store, checkpoint, cancel).await
    }

    /// Continues several workflows concurrently, one task each.
    ///
    /// Results are returned in completion order.
    pub async fn resume_all(
        self: &Arc<Self>,
        ids: Vec<WorkflowId>,
        cancel: CancellationToken,
    ) -> Vec<(WorkflowId, Result<RunReport>)> {
        let mut tasks = JoinSet::new();
        for id in ids {
            let engine = Arc::clone(self);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let result = engine.resume(&id, &cancel).await;
                (id, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!("Workflow task failed: {e}"),
            }
        }
        results
    }

    async fn drive(
        &self,
        store: &dyn CheckpointStore,
        checkpoint: WorkflowCheckpoint,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let id = checkpoint.id.clone();
        let params = checkpoint.params.clone();
        let mut checkpointed = checkpoint.processed();
        let mut failed = checkpoint.failed();
        let mut skipped = checkpoint.skipped;
        let (mut processed_now, mut moved_now) = (0, 0);

        if let Err(e) = store.set_status(&id, RunStatus::Running).await {
            return Err(abort(store, &id, checkpointed, e).await);
        }

        let managed = self.managed_collections(&params.sources);
        let limits = ScanLimits {
            page_size: params.page_size,
            treated_limit: params.treated_limit,
        };
        let mut cursor = checkpoint.cursor;
        let mut recorded = checkpoint.recorded_keys();

        let status = 'run: {
            if let Some(pending) = &checkpoint.pending {
                match self.settle(pending, &managed).await {
                    Ok(true) => {
                        let entry = pending.entry();
                        cursor = pending.settled_cursor();
                        if let Err(e) = store.append(&id, &entry, cursor).await {
                            return Err(abort(store, &id, checkpointed, e).await);
                        }
                        recorded.insert(entry.item_key);
                        checkpointed += 1;
                        processed_now += 1;
                        moved_now += usize::from(pending.moved);
                    }
                    Ok(false) => {
                        if let Err(e) = store.stage(&id, None).await {
                            return Err(abort(store, &id, checkpointed, e).await);
                        }
                    }
                    Err(e) => {
                        warn!(workflow = %id, item = %pending.item_key, error = %e, "Could not settle interrupted move, suspending");
                        break 'run RunStatus::Suspended;
                    }
                }
            }

            let mut scanner = Scanner::new(
                self.collab.reader.as_ref(),
                &params.sources,
                limits,
                self.skip.as_ref(),
                self.settings.retry,
            )
            .resume(cursor, recorded);

            loop {
                if cancel.is_cancelled() {
                    info!(workflow = %id, "Cancellation requested");
                    break RunStatus::Suspended;
                }

                let event = match scanner.next().await {
                    Ok(Some(event)) => event,
                    Ok(None) => break RunStatus::Completed,
                    Err(e) => {
                        warn!(workflow = %id, error = %e, "Could not fetch candidates, suspending");
                        break RunStatus::Suspended;
                    }
                };

                match event {
                    ScanEvent::Skipped(item, reason) => {
                        debug!(item = %item.key, %reason, "Skipped");
                        if reason != SkipReason::AlreadyRecorded {
                            skipped += 1;
                        }
                        if let Err(e) = store.advance(&id, scanner.cursor(), skipped).await {
                            return Err(abort(store, &id, checkpointed, e).await);
                        }
                    }
                    ScanEvent::Candidate(item) => {
                        debug!(item = %item.key, "Discovered");
                        let entry = match self.decide(item, &managed).await {
                            Decision::Fail(entry) => entry,
                            Decision::Route(routing) if params.dry_run => routing.planned(),
                            Decision::Route(routing) => {
                                let pending = routing.pending(scanner.cursor(), scanner.current_source());
                                if let Err(e) = store.stage(&id, Some(&pending)).await {
                                    return Err(abort(store, &id, checkpointed, e).await);
                                }
                                self.commit(routing, &managed).await
                            }
                        };
                        if !params.dry_run && departs(&entry, scanner.current_source()) {
                            scanner.note_departure();
                        }
                        if let Err(e) = store.append(&id, &entry, scanner.cursor()).await {
                            return Err(abort(store, &id, checkpointed, e).await);
                        }
                        checkpointed += 1;
                        processed_now += 1;
                        debug!(item = %entry.item_key, "Checkpointed");

                        match entry.result {
                            ItemResult::Routed { moved, .. } => {
                                moved_now += usize::from(moved);
                                if !self.settings.item_delay.is_zero() {
                                    tokio::time::sleep(self.settings.item_delay).await;
                                }
                            }
                            ItemResult::Failed { .. } => failed += 1,
                        }
                    }
                }
            }
        };

        if let Err(e) = store.set_status(&id, status).await {
            return Err(abort(store, &id, checkpointed, e).await);
        }
        info!(workflow = %id, ?status, processed_now, moved_now, total = checkpointed, "Run finished");

        Ok(RunReport {
            id: id.clone(),
            status,
            dry_run: params.dry_run,
            processed_now,
            moved_now,
            processed_total: checkpointed,
            failed_total: failed,
            skipped_total: skipped,
        })
    }

    /// Workflow sources plus every destination collection.
    fn managed_collections(&self, sources: &[Source]) -> Vec<String> {
        let mut managed: Vec<String> = self
            .settings
            .destinations
            .keys()
            .map(String::from)
            .collect();
        managed.extend(sources.iter().filter_map(|s| match s {
            Source::Collection(key) => Some(key.clone()),
            Source::Library => None,
        }));
        managed
    }

    /// Loads children if needed, classifies and routes. Touches nothing.
    async fn decide(&self, item: LibraryItem, managed: &[String]) -> Decision {
        let key = item.key.clone();
        let failed = |error: RetryError| {
            warn!(item = %key, error = %error, "Failed");
            Decision::Fail(OutcomeEntry::failed(&key, None, error.to_string()))
        };

        let item = if item.attachments.is_some() {
            item
        } else {
            let reader = self.collab.reader.as_ref();
            let k = key.as_str();
            match self
                .settings
                .retry
                .run("get_children", move || reader.get_children(k))
                .await
            {
                Ok(children) => item.with_children(children),
                Err(e) => return failed(e),
            }
        };

        let outcome = match self.classifier.classify(&item).await {
            Ok(outcome) => outcome,
            Err(e) => return failed(e),
        };
        let count = AttachmentCount::from(item.document_count().unwrap_or(0));
        let destination = route(self.classifier.is_tagged(&item), count, outcome);
        let target = self.settings.destinations.key(destination).to_string();
        let moves = matches!(
            plan_membership(&item.collections, managed.iter().map(String::as_str), &target),
            MembershipPlan::Move(_)
        );
        Decision::Route(Routing {
            item,
            outcome,
            destination,
            target,
            moves,
        })
    }

    /// Applies a routing decision to the library.
    async fn commit(&self, routing: Routing, managed: &[String]) -> OutcomeEntry {
        let Routing {
            item,
            outcome,
            destination,
            target,
            ..
        } = routing;
        let key = item.key.as_str();

        let moved = match self.apply_membership(key, managed, &target).await {
            Ok(moved) => moved,
            Err(e) => {
                warn!(item = %key, error = %e, "Failed");
                return OutcomeEntry::failed(key, Some(outcome), e.to_string());
            }
        };
        info!(item = %key, %outcome, %destination, moved, "Routed");

        if moved {
            self.mark_routed(key).await;
        }
        if outcome == ClassificationOutcome::MainPaper {
            self.enrich(&item).await;
        }
        OutcomeEntry::routed(key, outcome, destination, target, moved)
    }

    /// Whether a move staged before an interruption reached the library.
    ///
    /// A vanished item counts as not landed; transient read failures are
    /// returned so the run can suspend.
    async fn settle(
        &self,
        pending: &PendingMove,
        managed: &[String],
    ) -> std::result::Result<bool, RetryError> {
        let reader = self.collab.reader.as_ref();
        let key = pending.item_key.as_str();
        let fresh = match self
            .settings
            .retry
            .run("get_item", move || reader.get_item(key))
            .await
        {
            Ok(fresh) => fresh,
            Err(RetryError::Permanent(e)) => {
                warn!(item = %key, error = %e, "Interrupted item is gone");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let landed = matches!(
            plan_membership(
                &fresh.collections,
                managed.iter().map(String::as_str),
                &pending.collection
            ),
            MembershipPlan::Stay
        );
        if landed {
            info!(item = %key, destination = %pending.destination, "Interrupted move had landed");
            if pending.moved {
                self.mark_routed(key).await;
            }
        } else {
            info!(item = %key, "Interrupted move had not landed, item will be processed again");
        }
        Ok(landed)
    }

    /// Puts `key` into `target` only, re-reading the version on every attempt.
    ///
    /// Returns whether membership changed.
    pub(crate) async fn apply_membership(
        &self,
        key: &str,
        managed: &[String],
        target: &str,
    ) -> std::result::Result<bool, RetryError> {
        let (reader, writer) = (self.collab.reader.as_ref(), self.collab.writer.as_ref());
        self.settings
            .retry
            .run("update_collections", move || async move {
                let fresh = reader.get_item(key).await?;
                let plan = plan_membership(
                    &fresh.collections,
                    managed.iter().map(String::as_str),
                    target,
                );
                match plan {
                    MembershipPlan::Stay => Ok::<_, ExternalError>(false),
                    MembershipPlan::Move(next) => {
                        writer.update_collections(key, fresh.version, &next).await?;
                        Ok(true)
                    }
                }
            })
            .await
    }

    /// Adds the routed marker tag. Failures are logged only.
    async fn mark_routed(&self, key: &str) {
        let Some(tag) = self.settings.routed_tag.as_deref() else {
            return;
        };
        let (reader, writer) = (self.collab.reader.as_ref(), self.collab.writer.as_ref());
        let tagged = self
            .settings
            .retry
            .run("add_tag", move || async move {
                let fresh = reader.get_item(key).await?;
                writer.add_tag(key, fresh.version, tag).await
            })
            .await;
        if let Err(e) = tagged {
            warn!(item = %key, tag, error = %e, "Could not add routed marker");
        }
    }

    /// Links supporting information to a main paper. Best-effort.
    async fn enrich(&self, item: &LibraryItem) {
        if !self.settings.enrich_companions
            || item.doi.is_none()
            || item.has_supplementary_attachment()
        {
            return;
        }
        let Some(finder) = self.collab.companions.as_deref() else {
            return;
        };

        let retry = &self.settings.retry;
        let candidates = match retry
            .run("find_companion", move || finder.find_companion(item))
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(item = %item.key, error = %e, "Companion lookup failed");
                return;
            }
        };

        let linked: Vec<&str> = item
            .attachments
            .iter()
            .flatten()
            .filter_map(|a| a.url.as_deref())
            .collect();
        let writer = self.collab.writer.as_ref();
        for candidate in candidates
            .iter()
            .filter(|c| !linked.contains(&c.url.as_str()))
            .take(MAX_COMPANIONS)
        {
            let (parent, name, url) = (item.key.as_str(), candidate.name.as_str(), candidate.url.as_str());
            match retry
                .run("attach_link", move || writer.attach_link(parent, name, url))
                .await
            {
                Ok(attachment) => info!(item = %item.key, %attachment, url, "Linked supporting information"),
                Err(e) => warn!(item = %item.key, url, error = %e, "Could not link supporting information"),
            }
        }
    }
}

/// Whether a routed entry took its item out of the collection being scanned.
///
/// Library sweeps and moves into the scanned collection itself leave the
/// item where the scan can still count it.
fn departs(entry: &OutcomeEntry, scanning: Option<&Source>) -> bool {
    match (&entry.result, scanning) {
        (
            ItemResult::Routed {
                moved: true,
                collection,
                ..
            },
            Some(Source::Collection(source)),
        ) => source != collection,
        _ => false,
    }
}

/// Marks the run aborted if the store still answers and builds the error.
async fn abort(
    store: &dyn CheckpointStore,
    id: &WorkflowId,
    checkpointed: usize,
    source: CheckpointError,
) -> Error {
    error!(workflow = %id, checkpointed, error = %source, "Checkpoint store failed, aborting run");
    if let Err(e) = store.set_status(id, RunStatus::Aborted).await {
        debug!(workflow = %id, error = %e, "Could not record aborted status");
    }
    Error::RunAborted {
        workflow: id.clone(),
        checkpointed,
        source,
    }
}

fn validate_params(params: &RunParams) -> Result<()> {
    if params.sources.is_empty() {
        return Err(Error::Config("a workflow needs at least one source".into()));
    }
    if params.page_size == 0 || params.treated_limit == 0 {
        return Err(Error::Config(
            "page size and treated limit must be at least 1".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::library::{CompanionCandidate, PromptKind, Verdict};
    use crate::memory::{
        MemoryCheckpointStore, MemoryLibrary, Op, ScriptedClassifier, StaticCompanions,
    };
    use crate::model::{Attachment, AttachmentKind, Destination};
    use litroute_llm::Label;

    const TAG: &str = "AI分析";

    struct Fixture {
        library: Arc<MemoryLibrary>,
        store: Arc<MemoryCheckpointStore>,
        dry: Arc<MemoryCheckpointStore>,
        companions: Arc<StaticCompanions>,
        engine: WorkflowEngine,
    }

    fn destinations() -> DestinationMap {
        DestinationMap {
            inbox: "INBOX001".into(),
            review: "REVIEW01".into(),
            duplicates: "DUPES001".into(),
            multi_attachment: "MULTI001".into(),
            missing_attachment: "NOPDF001".into(),
        }
    }

    fn fixture_with(routed_tag: Option<&str>, companions: StaticCompanions) -> Fixture {
        let library = Arc::new(MemoryLibrary::new());
        let classifier = Arc::new(
            ScriptedClassifier::new()
                .on(PromptKind::DocumentType, "review", Verdict::Label(Label::Review))
                .otherwise(Verdict::Label(Label::MainPaper)),
        );
        let companions = Arc::new(companions);
        let store = Arc::new(MemoryCheckpointStore::new());
        let dry = Arc::new(MemoryCheckpointStore::new());
        let engine = WorkflowEngine::new(
            Collaborators {
                reader: library.clone(),
                writer: library.clone(),
                extractor: library.clone(),
                classifier,
                companions: Some(companions.clone()),
            },
            EngineSettings {
                destinations: destinations(),
                analysis_tag: TAG.into(),
                routed_tag: routed_tag.map(String::from),
                retry: RetryPolicy::immediate(3),
                limits: ExtractLimits::default(),
                item_delay: Duration::ZERO,
                enrich_companions: true,
            },
            store.clone(),
            dry.clone(),
        );
        Fixture {
            library,
            store,
            dry,
            companions,
            engine,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(None, StaticCompanions::default())
    }

    fn add(library: &MemoryLibrary, key: &str, tagged: bool, texts: &[&str]) {
        let mut item = LibraryItem {
            key: key.into(),
            version: 1,
            item_type: "journalArticle".into(),
            collections: ["SOURCE01".to_string()].into(),
            ..LibraryItem::default()
        };
        if tagged {
            item.tags.insert(TAG.into());
        }
        library.insert(item);
        for (i, text) in texts.iter().enumerate() {
            library.add_document(key, &format!("{key}-{i}"), "paper.pdf", text);
        }
    }

    fn params(treated_limit: usize, dry_run: bool) -> RunParams {
        RunParams {
            sources: vec![Source::Collection("SOURCE01".into())],
            page_size: 2,
            treated_limit,
            dry_run,
        }
    }

    fn id(s: &str) -> WorkflowId {
        WorkflowId::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_routes_and_checkpoints() {
        let f = fixture();
        add(&f.library, "A", false, &["anything"]);
        add(&f.library, "B", true, &["a review of things"]);
        add(&f.library, "C", true, &[]);

        let report = f
            .engine
            .start(id("w"), params(10, false), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.processed_now, 3);
        assert_eq!(report.moved_now, 3);

        assert_eq!(f.library.members("INBOX001"), vec!["A"]);
        assert_eq!(f.library.members("REVIEW01"), vec!["B"]);
        assert_eq!(f.library.members("NOPDF001"), vec!["C"]);
        assert!(f.library.members("SOURCE01").is_empty());

        let checkpoint = f.store.load(&id("w")).await.unwrap().unwrap();
        assert_eq!(checkpoint.status, RunStatus::Completed);
        assert_eq!(checkpoint.processed(), 3);
    }

    #[tokio::test]
    async fn test_item_already_in_place_is_not_written() {
        let f = fixture();
        add(&f.library, "A", false, &[]);
        f.library.move_out("A", "SOURCE01", "INBOX001");
        let params = RunParams {
            sources: vec![Source::Collection("INBOX001".into())],
            ..params(10, false)
        };

        f.engine
            .start(id("w"), params, &CancellationToken::new())
            .await
            .unwrap();
        assert!(f.library.writes().is_empty());
        let checkpoint = f.store.load(&id("w")).await.unwrap().unwrap();
        assert!(matches!(
            checkpoint.log[0].result,
            ItemResult::Routed { moved: false, .. }
        ));
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing_to_library_or_main_store() {
        let f = fixture();
        add(&f.library, "A", true, &["a review"]);

        let report = f
            .engine
            .start(id("w"), params(10, true), &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.dry_run);
        assert!(f.library.writes().is_empty());
        assert_eq!(f.library.calls(Op::AddTag), 0);
        assert!(f.store.load(&id("w")).await.unwrap().is_none());

        let recorded = f.dry.load(&id("w")).await.unwrap().unwrap();
        assert_eq!(recorded.log[0].destination(), Some(Destination::ReviewHolding));
        assert_eq!(f.engine.registry().list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_version_conflict_retried_with_fresh_read() {
        let f = fixture();
        add(&f.library, "A", false, &[]);
        f.library.fail(
            Op::UpdateCollections,
            "A",
            ExternalError::VersionConflict("A".into()),
            1,
        );

        f.engine
            .start(id("w"), params(10, false), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(f.library.members("INBOX001"), vec!["A"]);
        assert_eq!(f.library.calls(Op::GetItem), 2);
    }

    #[tokio::test]
    async fn test_permanent_library_error_fails_only_that_item() {
        let f = fixture();
        add(&f.library, "A", false, &[]);
        add(&f.library, "B", false, &[]);
        f.library
            .fail(Op::GetItem, "A", ExternalError::NotFound("A".into()), 1);

        let report = f
            .engine
            .start(id("w"), params(10, false), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.failed_total, 1);
        assert_eq!(report.processed_total, 2);
        assert_eq!(f.library.members("INBOX001"), vec!["B"]);
    }

    #[tokio::test]
    async fn test_checkpoint_failure_aborts_run() {
        let f = fixture();
        for key in ["A", "B", "C"] {
            add(&f.library, key, false, &[]);
        }
        f.store.fail_after_appends(1);

        let err = f
            .engine
            .start(id("w"), params(10, false), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            Error::RunAborted {
                checkpointed,
                source: CheckpointError::Io(_),
                ..
            } => assert_eq!(checkpointed, 1),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            f.store.load(&id("w")).await.unwrap().unwrap().status,
            RunStatus::Aborted
        );
    }

    #[tokio::test]
    async fn test_move_landed_before_failed_append_is_settled_on_resume() {
        let f = fixture();
        for key in ["A", "B", "C"] {
            add(&f.library, key, false, &[]);
        }
        f.store.fail_after_appends(1);
        f.engine
            .start(id("w"), params(10, false), &CancellationToken::new())
            .await
            .unwrap_err();
        let staged = f.store.load(&id("w")).await.unwrap().unwrap();
        assert_eq!(staged.pending.as_ref().unwrap().item_key, "B");
        assert_eq!(f.library.members("INBOX001"), vec!["A", "B"]);

        f.store.heal();
        let report = f.engine.resume(&id("w"), &CancellationToken::new()).await.unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.processed_total, 3);
        assert_eq!(report.moved_now, 2);

        let checkpoint = f.store.load(&id("w")).await.unwrap().unwrap();
        let keys: Vec<&str> = checkpoint.log.iter().map(|e| e.item_key.as_str()).collect();
        assert_eq!(keys, vec!["A", "B", "C"]);
        assert!(matches!(
            checkpoint.log[1].result,
            ItemResult::Routed { moved: true, .. }
        ));
        assert!(checkpoint.pending.is_none());
        assert_eq!(f.library.writes().len(), 3);
    }

    #[tokio::test]
    async fn test_move_that_never_landed_is_processed_again() {
        let f = fixture();
        add(&f.library, "A", false, &[]);
        let checkpoint = WorkflowCheckpoint::new(id("w"), params(10, false));
        f.store.create(&checkpoint).await.unwrap();
        let pending = PendingMove {
            item_key: "A".into(),
            outcome: ClassificationOutcome::NoAnalysisTag,
            destination: Destination::Inbox,
            collection: "INBOX001".into(),
            moved: true,
            source: Some("SOURCE01".into()),
            cursor: Cursor { source: 0, offset: 1 },
        };
        f.store.stage(&id("w"), Some(&pending)).await.unwrap();

        let report = f.engine.resume(&id("w"), &CancellationToken::new()).await.unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.processed_total, 1);
        assert_eq!(f.library.members("INBOX001"), vec!["A"]);

        let checkpoint = f.store.load(&id("w")).await.unwrap().unwrap();
        assert_eq!(checkpoint.log.len(), 1);
        assert!(checkpoint.pending.is_none());
    }

    #[tokio::test]
    async fn test_unreadable_staged_item_suspends_without_scanning() {
        let f = fixture();
        add(&f.library, "A", false, &[]);
        f.store
            .create(&WorkflowCheckpoint::new(id("w"), params(10, false)))
            .await
            .unwrap();
        let pending = PendingMove {
            item_key: "A".into(),
            outcome: ClassificationOutcome::NoAnalysisTag,
            destination: Destination::Inbox,
            collection: "INBOX001".into(),
            moved: true,
            source: Some("SOURCE01".into()),
            cursor: Cursor { source: 0, offset: 1 },
        };
        f.store.stage(&id("w"), Some(&pending)).await.unwrap();
        f.library.fail(Op::GetItem, "A", ExternalError::Timeout, 4);

        let report = f.engine.resume(&id("w"), &CancellationToken::new()).await.unwrap();
        assert_eq!(report.status, RunStatus::Suspended);
        assert_eq!(f.library.calls(Op::GetItems), 0);
        assert_eq!(
            f.store.load(&id("w")).await.unwrap().unwrap().pending,
            Some(pending)
        );
    }

    #[tokio::test]
    async fn test_library_sweep_keeps_offset_after_move() {
        let f = fixture_with(Some("routed"), StaticCompanions::default());
        add(&f.library, "A", false, &[]);
        add(&f.library, "S", false, &[]);
        f.library.tag("S", "routed");
        add(&f.library, "B", false, &[]);
        let params = RunParams {
            sources: vec![Source::Library],
            ..params(10, false)
        };

        let report = f
            .engine
            .start(id("w"), params, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.processed_total, 2);
        assert_eq!(report.skipped_total, 1);
        // [A, S] then [B]; moving A does not shrink the library.
        assert_eq!(f.library.calls(Op::GetItems), 2);
    }

    #[tokio::test]
    async fn test_cancellation_suspends_before_next_item() {
        let f = fixture();
        add(&f.library, "A", false, &[]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = f.engine.start(id("w"), params(10, false), &cancel).await.unwrap();
        assert_eq!(report.status, RunStatus::Suspended);
        assert_eq!(report.processed_now, 0);
        assert_eq!(
            f.store.load(&id("w")).await.unwrap().unwrap().status,
            RunStatus::Suspended
        );
    }

    #[tokio::test]
    async fn test_page_failure_suspends() {
        let f = fixture();
        add(&f.library, "A", false, &[]);
        f.library.fail(Op::GetItems, "", ExternalError::Timeout, 4);

        let report = f
            .engine
            .start(id("w"), params(10, false), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::Suspended);

        let report = f.engine.resume(&id("w"), &CancellationToken::new()).await.unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.processed_total, 1);
    }

    #[tokio::test]
    async fn test_routed_marker_added_after_move() {
        let f = fixture_with(Some("routed"), StaticCompanions::default());
        add(&f.library, "A", false, &[]);

        f.engine
            .start(id("w"), params(10, false), &CancellationToken::new())
            .await
            .unwrap();
        assert!(f.library.item("A").unwrap().has_tag("routed"));
    }

    #[tokio::test]
    async fn test_main_paper_enrichment() {
        let candidates = (1..=4)
            .map(|n| CompanionCandidate {
                name: format!("si{n}.pdf"),
                url: format!("https://files/si{n}"),
            })
            .collect();
        let f = fixture_with(None, StaticCompanions::default().with("10.1021/x", candidates));
        add(&f.library, "A", true, &["we report"]);
        let mut item = f.library.item("A").unwrap();
        item.doi = Some("10.1021/X".into());
        f.library.insert(item);
        f.library.add_attachment(
            "A",
            Attachment {
                key: "LINKED01".into(),
                kind: AttachmentKind::Other,
                content_type: String::new(),
                filename: String::new(),
                title: "si1.pdf".into(),
                url: Some("https://files/si1".into()),
            },
        );

        f.engine
            .start(id("w"), params(10, false), &CancellationToken::new())
            .await
            .unwrap();
        let links = f.library.links("A");
        assert_eq!(
            links,
            vec![
                "https://files/si1",
                "https://files/si2",
                "https://files/si3",
                "https://files/si4"
            ]
        );
        assert_eq!(f.companions.calls(), 1);
    }

    #[tokio::test]
    async fn test_no_enrichment_in_dry_run() {
        let f = fixture_with(
            None,
            StaticCompanions::default().with(
                "10.1021/x",
                vec![CompanionCandidate {
                    name: "si.pdf".into(),
                    url: "https://files/si".into(),
                }],
            ),
        );
        add(&f.library, "A", true, &["we report"]);
        let mut item = f.library.item("A").unwrap();
        item.doi = Some("10.1021/x".into());
        f.library.insert(item);

        f.engine
            .start(id("w"), params(10, true), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(f.companions.calls(), 0);
        assert!(f.library.links("A").is_empty());
    }

    #[tokio::test]
    async fn test_resume_unknown_workflow() {
        let f = fixture();
        let err = f
            .engine
            .resume(&id("missing"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WorkflowNotFound(_)));
    }

    #[tokio::test]
    async fn test_finalize_removes_checkpoint() {
        let f = fixture();
        add(&f.library, "A", false, &[]);
        f.engine
            .start(id("w"), params(10, false), &CancellationToken::new())
            .await
            .unwrap();
        assert!(f.engine.registry().finalize(&id("w")).await.unwrap());
        assert!(!f.engine.registry().finalize(&id("w")).await.unwrap());
        assert!(f.engine.registry().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_params() {
        let f = fixture();
        let params = RunParams {
            sources: Vec::new(),
            ..params(10, false)
        };
        assert!(matches!(
            f.engine.start(id("w"), params, &CancellationToken::new()).await,
            Err(Error::Config(_))
        ));
    }
}
