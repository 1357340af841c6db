use crate::render::CheckReport;
use anyhow::{Context, Result};
use indexer_core::config::{AppConfig, Secrets};
use indexer_core::hybrid::OrphanReport;
use indexer_core::pipeline::{self, Indexer, Services};
use indexer_core::report::RunSummary;
use indexer_core::search::{self, SearchResponse};
use indexer_core::source::{GlobFolderChoice, LocalTreeSource};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

pub async fn index(cfg: &AppConfig, secrets: &Secrets, cancel: Arc<AtomicBool>) -> Result<RunSummary> {
    let services = Services::build(cfg, secrets).await?;
    let source = LocalTreeSource::new(&cfg.source);
    info!("Indexing {}", source.root().display());
    let choice = GlobFolderChoice::new(&cfg.source.skip_folders, &cfg.source.list_only_folders)
        .context("invalid folder pattern")?;
    let indexer = Indexer::new(
        Arc::new(source),
        Arc::new(choice),
        services,
        cfg.pipeline.clone(),
    );
    Ok(indexer.run(cancel).await?)
}

pub async fn search(cfg: &AppConfig, secrets: &Secrets, query: &str) -> Result<SearchResponse> {
    let services = Services::build(cfg, secrets).await?;
    pipeline::validate(&services.embedder, services.store.vectors().as_ref()).await?;
    Ok(search::search(query, &services.embedder, &services.store, &cfg.query).await?)
}

pub async fn cleanup(cfg: &AppConfig, secrets: &Secrets) -> Result<OrphanReport> {
    let services = Services::build(cfg, secrets).await?;
    pipeline::validate(&services.embedder, services.store.vectors().as_ref()).await?;
    Ok(services.store.reconcile_orphans().await?)
}

/// Returns the source ids removed from the index.
pub async fn purge(cfg: &AppConfig, secrets: &Secrets, folder: &str) -> Result<Vec<String>> {
    let services = Services::build(cfg, secrets).await?;
    pipeline::validate(&services.embedder, services.store.vectors().as_ref()).await?;
    Ok(pipeline::purge(&services.store, folder).await?)
}

/// Returns whether the collection had to be created.
pub async fn init(cfg: &AppConfig, secrets: &Secrets) -> Result<bool> {
    let services = Services::build(cfg, secrets).await?;
    Ok(pipeline::init_collection(&services.embedder, services.store.vectors().as_ref()).await?)
}

pub async fn check(cfg: &AppConfig, secrets: &Secrets) -> Result<CheckReport> {
    let registry = pipeline::build_registry(cfg, secrets)?;
    let embedder = pipeline::build_embedder(cfg, &registry)?;
    let vectors = pipeline::build_vector_store(cfg, secrets)?;
    let blobs = pipeline::build_blob_store(cfg, secrets).await?;

    let ocr_tiers = [
        pipeline::DOCINTEL_ENGINE,
        pipeline::CLOUD_OCR_ENGINE,
        pipeline::LOCAL_OCR_ENGINE,
    ]
    .iter()
    .filter(|name| registry.ocr(name).is_some())
    .map(|name| name.to_string())
    .collect();

    let mut problems = Vec::new();
    let collection_dimension = match vectors.dimension().await {
        Ok(dim) => dim,
        Err(e) => {
            problems.push(format!("vector store unreachable: {}", e));
            None
        }
    };
    match collection_dimension {
        Some(dim) => {
            if let Err(e) = embedder.validate_dimension(dim) {
                problems.push(e.to_string());
            }
        }
        None if problems.is_empty() => problems.push(format!(
            "collection {} does not exist; run `init`",
            cfg.vectors.collection
        )),
        None => {}
    }
    if let Err(e) = blobs.list_keys().await {
        problems.push(format!("blob store unreadable: {}", e));
    }

    Ok(CheckReport {
        embedding_provider: embedder.provider_name().to_string(),
        embedding_dimension: embedder.dimension(),
        ocr_tiers,
        ocr_strict: cfg.ocr.strict,
        collection: cfg.vectors.collection.clone(),
        collection_dimension,
        blob_store: blobs.name().to_string(),
        problems,
    })
}
