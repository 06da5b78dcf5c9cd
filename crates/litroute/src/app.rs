//! Wiring from configuration to a ready engine.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use litroute_core::config::CollectionsConfig;
use litroute_core::credentials::{self, Secret};
use litroute_core::library::CompanionFinder;
use litroute_core::{
    Collaborators, Config, DestinationMap, EngineSettings, HttpCompanionFinder, LlmClassifier,
    WorkflowEngine, WorkflowRegistry, ZoteroLibrary,
};
use litroute_llm::ChatClient;
use litroute_zotero::ZoteroClient;
use tracing::{debug, info};

/// A connected engine plus the collection keys it was resolved against.
pub struct App {
    pub engine: Arc<WorkflowEngine>,
    pub library: ZoteroLibrary,
    /// Key of the configured source collection.
    pub source: String,
}

/// Opens both checkpoint stores without touching the network.
pub async fn registry(config: &Config) -> Result<WorkflowRegistry> {
    let (committed, dry_run) = config
        .checkpoint
        .open_stores()
        .await
        .context("Failed to open checkpoint storage")?;
    Ok(WorkflowRegistry::new(committed, dry_run))
}

/// Builds the Zotero and chat clients, resolves collections and opens storage.
pub async fn connect(config: &Config) -> Result<App> {
    let library = zotero_library(config)?;
    let destinations = resolve_destinations(&library, &config.collections).await?;
    let source = library
        .resolve_collection(&config.collections.source)
        .await
        .with_context(|| format!("Source collection {:?}", config.collections.source))?;
    debug!(?destinations, %source, "Collections resolved");

    let llm_key = credentials::resolve(Secret::Llm).context("No LLM API key available")?;
    let chat = ChatClient::new(config.llm.chat_config(llm_key))?;

    let companions = if config.workflow.enrich_companions {
        let finder = HttpCompanionFinder::new(Duration::from_secs(config.zotero.timeout_secs))?;
        Some(Arc::new(finder) as Arc<dyn CompanionFinder>)
    } else {
        None
    };

    let shared = Arc::new(library.clone());
    let collab = Collaborators {
        reader: shared.clone(),
        writer: shared.clone(),
        extractor: shared,
        classifier: Arc::new(LlmClassifier::new(chat)),
        companions,
    };

    let (committed, dry_run) = config
        .checkpoint
        .open_stores()
        .await
        .context("Failed to open checkpoint storage")?;
    let settings = EngineSettings::from_config(config, destinations);
    let engine = WorkflowEngine::new(collab, settings, committed, dry_run);

    info!(library = %config.zotero.library_id, model = %config.llm.model, "Connected");
    Ok(App {
        engine: Arc::new(engine),
        library,
        source,
    })
}

/// A Zotero library handle using the stored or environment API key.
pub fn zotero_library(config: &Config) -> Result<ZoteroLibrary> {
    let api_key = credentials::resolve(Secret::Zotero).context("No Zotero API key available")?;
    let client = ZoteroClient::new(config.zotero.library_ref()?, Some(api_key))?
        .with_base_url(&config.zotero.base_url)?
        .with_timeout(Duration::from_secs(config.zotero.timeout_secs))?;
    Ok(ZoteroLibrary::new(client))
}

async fn resolve_destinations(
    library: &ZoteroLibrary,
    names: &CollectionsConfig,
) -> Result<DestinationMap> {
    let resolve = |name: &str| {
        let name = name.to_string();
        async move {
            library
                .resolve_collection(&name)
                .await
                .with_context(|| format!("Destination collection {name:?}"))
        }
    };
    Ok(DestinationMap {
        inbox: resolve(&names.inbox).await?,
        review: resolve(&names.review).await?,
        duplicates: resolve(&names.duplicates).await?,
        multi_attachment: resolve(&names.multi_attachment).await?,
        missing_attachment: resolve(&names.missing_attachment).await?,
    })
}
