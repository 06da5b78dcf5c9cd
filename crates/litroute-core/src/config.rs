//! Configuration file handling.
//!
//! The configuration lives in `<config_dir>/litroute/config.toml`. Every
//! section is optional; a missing file yields the defaults. A few settings
//! can be overridden from the environment.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use litroute_llm::ChatConfig;
use litroute_zotero::{LibraryKind, LibraryRef};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checkpoint::{CheckpointStore, FileCheckpointStore, SqliteCheckpointStore};
use crate::error::{Error, Result};
use crate::library::ExtractLimits;
use crate::retry::RetryPolicy;

/// Full configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Zotero library.
    pub zotero: ZoteroConfig,
    /// Chat-completion service.
    pub llm: LlmConfig,
    /// Collection keys or names.
    pub collections: CollectionsConfig,
    /// Workflow defaults.
    pub workflow: WorkflowConfig,
    /// Retry policy for every external call (delays in milliseconds).
    pub retry: RetryPolicy,
    /// Text extraction bounds.
    pub extraction: ExtractLimits,
    /// Checkpoint storage.
    pub checkpoint: CheckpointConfig,
}

/// `[zotero]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoteroConfig {
    /// Numeric user or group id.
    pub library_id: String,
    /// `user` or `group`.
    pub library_type: String,
    /// API root.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ZoteroConfig {
    fn default() -> Self {
        Self {
            library_id: String::new(),
            library_type: "user".into(),
            base_url: litroute_zotero::DEFAULT_BASE_URL.into(),
            timeout_secs: 60,
        }
    }
}

impl ZoteroConfig {
    /// Library the client is scoped to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty id or unknown library type.
    pub fn library_ref(&self) -> Result<LibraryRef> {
        let id = self.library_id.trim();
        if id.is_empty() {
            return Err(Error::Config(
                "zotero.library_id is not set (or set ZOTERO_LIBRARY_ID)".into(),
            ));
        }
        let kind = LibraryKind::parse(&self.library_type).ok_or_else(|| {
            Error::Config(format!(
                "zotero.library_type must be user or group, not {:?}",
                self.library_type
            ))
        })?;
        Ok(LibraryRef {
            kind,
            id: id.to_string(),
        })
    }
}

/// `[llm]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API root of an OpenAI-compatible service.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Reply length cap.
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: litroute_llm::DEFAULT_BASE_URL.into(),
            model: litroute_llm::DEFAULT_MODEL.into(),
            timeout_secs: 60,
            max_tokens: 10,
        }
    }
}

impl LlmConfig {
    /// Client settings with `api_key`.
    #[must_use]
    pub fn chat_config(&self, api_key: String) -> ChatConfig {
        ChatConfig {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            api_key: Some(api_key),
            timeout: Duration::from_secs(self.timeout_secs),
            max_tokens: self.max_tokens,
        }
    }
}

/// `[collections]` section. Values are collection keys or exact names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionsConfig {
    /// Collection scanned first.
    pub source: String,
    /// Default inbox.
    pub inbox: String,
    /// Review articles.
    pub review: String,
    /// Duplicates.
    pub duplicates: String,
    /// Items with several distinct documents.
    pub multi_attachment: String,
    /// Tagged items without a document.
    pub missing_attachment: String,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            source: "00_INBOXS".into(),
            inbox: "00_INBOXS_AA".into(),
            review: "00_INBOXS_REVIEW".into(),
            duplicates: "00_INBOXS_DD".into(),
            multi_attachment: "00_INBOXS_BB".into(),
            missing_attachment: "00_INBOXS_CC".into(),
        }
    }
}

/// `[workflow]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Items per page.
    pub page_size: u32,
    /// Processed items per workflow.
    pub treated_limit: usize,
    /// Pause after every routed item, in milliseconds.
    pub item_delay_ms: u64,
    /// Tag that marks items for analysis.
    pub analysis_tag: String,
    /// Tag added after a move; tagged items are skipped by later runs.
    pub routed_tag: Option<String>,
    /// Look up supporting information for main papers.
    pub enrich_companions: bool,
    /// Sweep the whole library once the source collection is exhausted.
    pub library_fallback: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            treated_limit: 20,
            item_delay_ms: 300,
            analysis_tag: "AI分析".into(),
            routed_tag: None,
            enrich_companions: true,
            library_fallback: true,
        }
    }
}

impl WorkflowConfig {
    /// Inter-item delay.
    #[must_use]
    pub const fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }
}

/// Checkpoint storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    /// One JSON document per workflow.
    #[default]
    File,
    /// SQLite database.
    Sqlite,
}

/// `[checkpoint]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Storage backend.
    pub backend: CheckpointBackend,
    /// Data directory; defaults to `<data_dir>/litroute`.
    pub data_dir: Option<PathBuf>,
}

impl CheckpointConfig {
    /// Directory committed checkpoints live in.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("litroute")
        })
    }

    /// Directory dry-run checkpoints live in; never shared with real runs.
    #[must_use]
    pub fn dry_run_dir(&self) -> PathBuf {
        self.data_dir().join("dry-run")
    }

    /// Opens the committed and the dry-run store, in that order.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory or database cannot be opened.
    pub async fn open_stores(&self) -> Result<(Arc<dyn CheckpointStore>, Arc<dyn CheckpointStore>)> {
        Ok((
            open_store(self.backend, &self.data_dir()).await?,
            open_store(self.backend, &self.dry_run_dir()).await?,
        ))
    }
}

async fn open_store(backend: CheckpointBackend, dir: &Path) -> Result<Arc<dyn CheckpointStore>> {
    debug!(dir = %dir.display(), ?backend, "Opening checkpoint store");
    Ok(match backend {
        CheckpointBackend::File => Arc::new(FileCheckpointStore::new(dir.join("workflows"))?),
        CheckpointBackend::Sqlite => {
            std::fs::create_dir_all(dir)?;
            let path = dir.join("checkpoints.db");
            Arc::new(SqliteCheckpointStore::new(&path.to_string_lossy()).await?)
        }
    })
}

impl Config {
    /// Default file location.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("litroute")
            .join("config.toml")
    }

    /// Loads `path` (or the default location), applies environment
    /// overrides and validates.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or fails
    /// validation. A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map_or_else(Self::default_path, Path::to_path_buf);
        let mut config = if path.exists() {
            debug!(path = %path.display(), "Loading configuration");
            Self::from_toml(&std::fs::read_to_string(&path)?)?
        } else {
            debug!(path = %path.display(), "No configuration file, using defaults");
            Self::default()
        };
        config.apply_env(|var| std::env::var(var).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] for malformed input.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Applies `ZOTERO_LIBRARY_ID`, `ZOTERO_LIBRARY_TYPE`,
    /// `LITROUTE_LLM_BASE_URL` and `LITROUTE_LLM_MODEL` from `env`.
    pub fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| env(var).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("ZOTERO_LIBRARY_ID") {
            self.zotero.library_id = v;
        }
        if let Some(v) = get("ZOTERO_LIBRARY_TYPE") {
            self.zotero.library_type = v;
        }
        if let Some(v) = get("LITROUTE_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("LITROUTE_LLM_MODEL") {
            self.llm.model = v;
        }
    }

    /// Rejects settings no run can work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.workflow.page_size == 0 {
            return Err(Error::Config("workflow.page_size must be at least 1".into()));
        }
        if self.workflow.treated_limit == 0 {
            return Err(Error::Config(
                "workflow.treated_limit must be at least 1".into(),
            ));
        }
        if self.workflow.analysis_tag.trim().is_empty() {
            return Err(Error::Config("workflow.analysis_tag must not be empty".into()));
        }
        if self.extraction.max_chars == 0 || self.extraction.max_pages == 0 {
            return Err(Error::Config(
                "extraction.max_pages and extraction.max_chars must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
