//! Candidate discovery across prioritised sources.
//!
//! The scanner is a bounded generator with two independent stop conditions:
//! a source ends when a page comes back short, and the whole scan ends when
//! the [`Budget`] of processed items is spent. Skipped items never touch the
//! budget.
//!
//! Offsets count items of the current source that were observed and are
//! still in it. When the engine moves an item out of a scanned collection it
//! calls [`Scanner::note_departure`], so the next page starts at the first
//! unseen item even though the collection shrank.

mod budget;
mod skip;

use std::collections::{HashSet, VecDeque};

use tracing::{debug, trace, warn};

pub use budget::Budget;
pub use skip::{SkipDecision, SkipPredicate, SkipReason, StandardSkip};

use crate::checkpoint::Cursor;
use crate::library::{LibraryRead, Source};
use crate::model::LibraryItem;
use crate::retry::{RetryError, RetryPolicy};

/// One step of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// An item to process; one unit of budget was spent on it.
    Candidate(LibraryItem),
    /// An item the skip predicate excluded.
    Skipped(LibraryItem, SkipReason),
}

/// Scan settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanLimits {
    /// Items per page.
    pub page_size: u32,
    /// Processed items allowed in total.
    pub treated_limit: usize,
}

/// Pull-based scanner over `sources`.
pub struct Scanner<'a> {
    library: &'a dyn LibraryRead,
    skip: &'a dyn SkipPredicate,
    retry: RetryPolicy,
    sources: &'a [Source],
    page_size: u32,
    budget: Budget,
    cursor: Cursor,
    recorded: HashSet<String>,
    buffer: VecDeque<LibraryItem>,
    page_loaded: bool,
    page_full: bool,
}

impl<'a> Scanner<'a> {
    /// A scanner at the beginning of the first source.
    #[must_use]
    pub fn new(
        library: &'a dyn LibraryRead,
        sources: &'a [Source],
        limits: ScanLimits,
        skip: &'a dyn SkipPredicate,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            library,
            skip,
            retry,
            sources,
            page_size: limits.page_size.max(1),
            budget: Budget::new(limits.treated_limit),
            cursor: Cursor::default(),
            recorded: HashSet::new(),
            buffer: VecDeque::new(),
            page_loaded: false,
            page_full: false,
        }
    }

    /// Restarts from a persisted position.
    ///
    /// `recorded` are keys that already hold a terminal outcome; they are
    /// reported as [`SkipReason::AlreadyRecorded`] and their count is taken as
    /// the budget already spent.
    #[must_use]
    pub fn resume(mut self, cursor: Cursor, recorded: HashSet<String>) -> Self {
        self.budget = Budget::resume(self.budget.limit(), recorded.len());
        self.cursor = cursor;
        self.recorded = recorded;
        self.buffer.clear();
        self.page_loaded = false;
        self
    }

    /// Current position.
    #[must_use]
    pub const fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Budget state.
    #[must_use]
    pub const fn budget(&self) -> Budget {
        self.budget
    }

    /// Source the last yielded item came from.
    #[must_use]
    pub fn current_source(&self) -> Option<&Source> {
        self.sources.get(self.cursor.source)
    }

    /// Records that the last yielded item left the current source.
    pub const fn note_departure(&mut self) {
        self.cursor.offset = self.cursor.offset.saturating_sub(1);
    }

    /// Pulls the next event, or `None` when the scan is over.
    ///
    /// # Errors
    ///
    /// Returns the retry error of a page fetch that could not be completed.
    pub async fn next(&mut self) -> Result<Option<ScanEvent>, RetryError> {
        loop {
            if self.budget.is_exhausted() {
                if !self.buffer.is_empty() {
                    debug!(discarded = self.buffer.len(), "Budget spent, dropping rest of page");
                    self.buffer.clear();
                }
                return Ok(None);
            }

            if let Some(item) = self.buffer.pop_front() {
                self.cursor.offset += 1;
                return Ok(Some(self.judge(item).await));
            }

            if self.page_loaded && !self.page_full {
                debug!(source = self.cursor.source, "Source exhausted");
                self.cursor = Cursor {
                    source: self.cursor.source + 1,
                    offset: 0,
                };
                self.page_loaded = false;
            }

            let sources = self.sources;
            let Some(source) = sources.get(self.cursor.source) else {
                return Ok(None);
            };
            self.fetch(source).await?;
        }
    }

    async fn fetch(&mut self, source: &'a Source) -> Result<(), RetryError> {
        let (library, page_size, offset) = (self.library, self.page_size, self.cursor.offset);
        let page = self
            .retry
            .run("get_items", move || library.get_items(source, page_size, offset))
            .await?;

        trace!(%source, offset, fetched = page.len(), "Scanned page");
        self.page_full = page.len() >= page_size as usize;
        self.page_loaded = true;
        self.buffer.extend(page);
        Ok(())
    }

    async fn judge(&mut self, item: LibraryItem) -> ScanEvent {
        if self.recorded.contains(&item.key) {
            return ScanEvent::Skipped(item, SkipReason::AlreadyRecorded);
        }

        let mut decision = self.skip.evaluate(&item);
        let mut item = item;
        if decision == SkipDecision::NeedsChildren {
            let library = self.library;
            let key = item.key.clone();
            let key = key.as_str();
            match self
                .retry
                .run("get_children", move || library.get_children(key))
                .await
            {
                Ok(children) => {
                    item = item.with_children(children);
                    decision = self.skip.evaluate(&item);
                }
                Err(e) => {
                    warn!(item = %item.key, error = %e, "Could not load children for skip check");
                    decision = SkipDecision::Keep;
                }
            }
        }

        match decision {
            SkipDecision::Skip(reason) => ScanEvent::Skipped(item, reason),
            SkipDecision::Keep | SkipDecision::NeedsChildren => {
                self.budget.try_consume();
                self.recorded.insert(item.key.clone());
                ScanEvent::Candidate(item)
            }
        }
    }
}
