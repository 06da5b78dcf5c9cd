//! Library-wide duplicate pass.
//!
//! Groups every item of one source by identity key and moves each
//! non-survivor into the duplicates holding collection. Nothing is deleted.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::duplicate::{DuplicateGroup, group_and_resolve};
use crate::engine::WorkflowEngine;
use crate::error::{ExternalError, Result};
use crate::library::Source;
use crate::model::LibraryItem;
use crate::scan::{ScanEvent, ScanLimits, Scanner, StandardSkip};

/// A non-survivor that could not be moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupeFailure {
    /// Item key.
    pub key: String,
    /// Last error.
    pub error: String,
}

/// Result of a duplicate pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupeReport {
    /// Scanned source.
    pub source: Source,
    /// Items examined.
    pub scanned: usize,
    /// Duplicate groups found.
    pub groups: Vec<DuplicateGroup>,
    /// Non-survivors whose membership changed.
    pub moved: Vec<String>,
    /// Non-survivors that could not be moved.
    pub failed: Vec<DedupeFailure>,
    /// Whether writes were suppressed.
    pub dry_run: bool,
    /// The pass stopped early on cancellation.
    pub cancelled: bool,
}

impl DedupeReport {
    /// Number of non-survivors across all groups.
    #[must_use]
    pub fn duplicates(&self) -> usize {
        self.groups.iter().map(|g| g.members.len() - 1).sum()
    }
}

impl WorkflowEngine {
    /// Runs the duplicate pass over `source`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::External`] when a page of candidates cannot be
    /// fetched. Per-item move failures are reported in
    /// [`DedupeReport::failed`].
    pub async fn dedupe(
        &self,
        source: Source,
        limits: ScanLimits,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<DedupeReport> {
        let items = self.collect(&source, limits).await?;
        let scanned = items.len();
        let items = self.load_group_children(items).await;
        let groups = group_and_resolve(&items);
        info!(%source, scanned, groups = groups.len(), dry_run, "Duplicate groups resolved");

        let mut report = DedupeReport {
            source,
            scanned,
            groups: Vec::new(),
            moved: Vec::new(),
            failed: Vec::new(),
            dry_run,
            cancelled: false,
        };

        let holding = self.settings().destinations.duplicates.clone();
        let mut managed: Vec<String> = self
            .settings()
            .destinations
            .keys()
            .map(String::from)
            .collect();
        if let Source::Collection(key) = &report.source {
            managed.push(key.clone());
        }

        let pending = if dry_run { &[][..] } else { &groups[..] };
        'groups: for group in pending {
            for key in group.non_survivors() {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    break 'groups;
                }
                match self.apply_membership(key, &managed, &holding).await {
                    Ok(true) => {
                        info!(item = key, survivor = %group.survivor, "Moved duplicate to holding");
                        report.moved.push(key.to_string());
                    }
                    Ok(false) => debug!(item = key, "Duplicate already in holding"),
                    Err(e) => {
                        warn!(item = key, error = %e, "Could not move duplicate");
                        report.failed.push(DedupeFailure {
                            key: key.to_string(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        report.groups = groups;
        Ok(report)
    }

    async fn collect(&self, source: &Source, limits: ScanLimits) -> Result<Vec<LibraryItem>> {
        let sources = std::slice::from_ref(source);
        let skip = StandardSkip::default();
        let mut scanner = Scanner::new(
            self.collaborators().reader.as_ref(),
            sources,
            limits,
            &skip,
            self.settings().retry,
        );

        let mut items = Vec::new();
        loop {
            match scanner.next().await {
                Ok(Some(ScanEvent::Candidate(item))) => items.push(item),
                Ok(Some(ScanEvent::Skipped(item, reason))) => {
                    debug!(item = %item.key, %reason, "Skipped");
                }
                Ok(None) => break,
                Err(e) => return Err(ExternalError::from(e).into()),
            }
        }
        Ok(items)
    }

    /// Loads children of items that share an identity key, so survivor
    /// richness counts attachments and notes separately.
    async fn load_group_children(&self, items: Vec<LibraryItem>) -> Vec<LibraryItem> {
        let grouped: Vec<String> = group_and_resolve(&items)
            .into_iter()
            .flat_map(|g| g.members)
            .collect();
        let reader = self.collaborators().reader.as_ref();
        let retry = self.settings().retry;

        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if item.attachments.is_some() || !grouped.contains(&item.key) {
                out.push(item);
                continue;
            }
            let key = item.key.as_str();
            match retry
                .run("get_children", move || reader.get_children(key))
                .await
            {
                Ok(children) => out.push(item.with_children(children)),
                Err(e) => {
                    warn!(item = %item.key, error = %e, "Could not load children; using child count");
                    out.push(item);
                }
            }
        }
        out
    }
}
