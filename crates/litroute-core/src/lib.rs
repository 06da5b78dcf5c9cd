//! # litroute-core
//!
//! Scan-classify-route engine for Zotero libraries.
//!
//! This crate provides:
//! - Candidate discovery over prioritised sources under a processing budget
//! - Content classification (document type, duplicate attachments) with bounded retries
//! - A pure router from classification to one destination collection
//! - Resumable workflows with write-ahead checkpoints (JSON file or `SQLite`)
//! - A library-wide duplicate pass
//! - Supporting-information lookup for main papers
//! - Configuration and keyring-backed credentials
//! - In-memory collaborators for tests and dry experiments
//!
//! ## Example
//!
//! ```ignore
//! use litroute_core::{Collaborators, EngineSettings, RunParams, Source, WorkflowEngine, WorkflowId};
//!
//! let engine = WorkflowEngine::new(collaborators, settings, store, dry_run_store);
//! let params = RunParams {
//!     sources: vec![Source::Collection(inbox), Source::Library],
//!     page_size: 100,
//!     treated_limit: 20,
//!     dry_run: false,
//! };
//! let report = engine.start(WorkflowId::new("inbox")?, params, &cancel).await?;
//! println!("{} items routed, status {}", report.processed_now, report.status);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod checkpoint;
mod classify;
pub mod companion;
pub mod config;
pub mod credentials;
mod dedupe;
pub mod duplicate;
mod engine;
mod error;
pub mod library;
pub mod memory;
pub mod model;
pub mod retry;
pub mod route;
pub mod scan;

pub use checkpoint::{
    CheckpointError, CheckpointStore, CheckpointSummary, Cursor, FileCheckpointStore, ItemResult,
    OutcomeEntry, PendingMove, RunParams, RunStatus, SqliteCheckpointStore, WorkflowCheckpoint,
    WorkflowId, WorkflowRegistry,
};
pub use classify::Classifier;
pub use companion::HttpCompanionFinder;
pub use config::Config;
pub use dedupe::{DedupeFailure, DedupeReport};
pub use engine::{Collaborators, EngineSettings, RunReport, WorkflowEngine};
pub use error::{Error, ExternalError, Result};
pub use library::llm::LlmClassifier;
pub use library::zotero::ZoteroLibrary;
pub use library::{ExtractLimits, Source};
pub use model::{ClassificationOutcome, Destination, LibraryItem};
pub use retry::{RetryError, RetryPolicy};
pub use route::{DestinationMap, route};
pub use scan::ScanLimits;
