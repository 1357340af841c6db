use crate::config::{AppConfig, PipelineConfig, Secrets};
use crate::embeddings::Embedder;
use crate::error::IndexError;
use crate::extractor::{normalize, Dispatcher};
use crate::hybrid::{HybridStore, OrphanReport};
use crate::models::{metadata_text, Coverage, IndexRecord, SourceFile};
use crate::ocr::{OcrChain, OcrTier};
use crate::report::{RunSummary, Stage};
use crate::source::{FileSource, FolderChoice};
use crate::sparse::SparseEncoder;
use crate::sync::{Decision, Snapshot};
use crate::vectorstore::{QdrantStore, VectorStore};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use providers::docintel::DocumentIntelligence;
use providers::hosted::{HostedConfig, HostedInferenceProvider};
use providers::local::{LocalConfig, LocalProvider};
use providers::openai::{OpenAiConfig, OpenAiProvider};
use providers::qdrant::{QdrantClient, QdrantConfig};
use providers::vision::VisionRead;
use providers::{AzureConfig, ProviderRegistry};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storage::{AzureBlobConfig, AzureBlobStore, BlobStore, FsBlobStore, MemoryBlobStore};
use tracing::{debug, error, info, warn};

const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";
const VOYAGE_ENDPOINT: &str = "https://api.voyageai.com/v1/embeddings";
const API_MAX_INPUT_CHARS: usize = 128_000;
const HOSTED_MAX_INPUT_CHARS: usize = 8_000;

pub const DOCINTEL_ENGINE: &str = "document_intelligence";
pub const CLOUD_OCR_ENGINE: &str = "vision";
pub const LOCAL_OCR_ENGINE: &str = "local";

/// Canonical embedding provider name for a configured alias.
pub fn embedding_kind(name: &str) -> Option<&'static str> {
    match name.trim().to_ascii_lowercase().as_str() {
        "local" => Some("local"),
        "hosted" | "pinecone" => Some("hosted"),
        "api" | "openai" | "voyage" => Some("api"),
        _ => None,
    }
}

/// Registers the configured embedding provider and every OCR engine whose
/// credentials are present.
pub fn build_registry(cfg: &AppConfig, secrets: &Secrets) -> Result<ProviderRegistry, IndexError> {
    let emb = &cfg.embeddings;
    let timeout = Duration::from_secs(emb.timeout_secs);
    let kind = embedding_kind(&emb.provider).ok_or_else(|| {
        IndexError::Configuration(format!("unknown embedding provider {:?}", emb.provider))
    })?;

    let mut reg = ProviderRegistry::new();
    reg = match kind {
        "local" => {
            let provider = LocalProvider::new(LocalConfig {
                base_url: emb
                    .url
                    .clone()
                    .unwrap_or_else(|| providers::local::DEFAULT_URL.to_string()),
                model: emb.model.clone(),
                dimension: emb.dimension,
                max_input_chars: emb
                    .max_input_chars
                    .unwrap_or(providers::local::DEFAULT_MAX_INPUT_CHARS),
                timeout,
                max_retries: emb.max_retries,
            })?;
            reg.with_embedding(kind, Arc::new(provider))
        }
        "hosted" => {
            let provider = HostedInferenceProvider::new(HostedConfig {
                api_key: secrets.pinecone_api_key.clone().unwrap_or_default(),
                endpoint: emb
                    .url
                    .clone()
                    .unwrap_or_else(|| providers::hosted::DEFAULT_ENDPOINT.to_string()),
                model: emb.model.clone(),
                dimension: emb.dimension,
                max_input_chars: emb.max_input_chars.unwrap_or(HOSTED_MAX_INPUT_CHARS),
                timeout,
                max_retries: emb.max_retries,
            })?;
            reg.with_embedding(kind, Arc::new(provider))
        }
        _ => {
            let voyage = emb.model.starts_with("voyage") || emb.provider == "voyage";
            let api_key = if voyage {
                secrets
                    .voyage_api_key
                    .clone()
                    .or_else(|| secrets.embedding_api_key.clone())
            } else {
                secrets.embedding_api_key.clone()
            };
            let default_endpoint = if voyage { VOYAGE_ENDPOINT } else { OPENAI_ENDPOINT };
            let provider = OpenAiProvider::new(OpenAiConfig {
                api_key: api_key.unwrap_or_default(),
                endpoint: emb.url.clone().unwrap_or_else(|| default_endpoint.to_string()),
                embedding_model: emb.model.clone(),
                dimension: emb.dimension,
                max_input_chars: emb.max_input_chars.unwrap_or(API_MAX_INPUT_CHARS),
                send_input_type: voyage || emb.input_type.is_some(),
                output_dimension: voyage.then_some(emb.dimension),
                timeout,
                max_retries: emb.max_retries,
            })?;
            reg.with_embedding(kind, Arc::new(provider))
        }
    };
    reg = reg.set_preferred_embedding(kind);

    let azure = |endpoint: &Option<String>, key: &Option<String>| -> Option<AzureConfig> {
        match (endpoint, key) {
            (Some(endpoint), Some(key)) => {
                let mut az = AzureConfig::new(endpoint.clone(), key.clone());
                az.max_retries = cfg.ocr.max_retries;
                az.max_wait = cfg.ocr.timeout();
                Some(az)
            }
            _ => None,
        }
    };
    if let Some(az) = azure(
        &secrets.form_recognizer_endpoint,
        &secrets.form_recognizer_key,
    ) {
        reg = reg.with_ocr(DOCINTEL_ENGINE, Arc::new(DocumentIntelligence::new(az)?));
    }
    if let Some(az) = azure(&secrets.vision_endpoint, &secrets.vision_key) {
        reg = reg.with_ocr(CLOUD_OCR_ENGINE, Arc::new(VisionRead::new(az)?));
    }
    #[cfg(feature = "ocr")]
    {
        reg = reg.with_ocr(
            LOCAL_OCR_ENGINE,
            Arc::new(providers::tesseract::TesseractOcr::new(
                cfg.ocr.language.clone(),
                cfg.ocr.tessdata.clone(),
            )),
        );
    }
    Ok(reg)
}

pub fn build_embedder(cfg: &AppConfig, registry: &ProviderRegistry) -> Result<Embedder, IndexError> {
    let provider = registry.embedding(None)?;
    info!(
        "Embedding with {} ({} dimensions, {} chars max)",
        provider.name(),
        provider.dimension(),
        provider.max_input_chars()
    );
    Ok(Embedder::new(
        provider,
        SparseEncoder::new(&cfg.sparse),
        cfg.extraction.head_ratio,
    ))
}

/// Only engines present in the registry become tiers.
pub fn build_ocr_chain(cfg: &AppConfig, registry: &ProviderRegistry) -> OcrChain {
    let timeout = cfg.ocr.timeout();
    let mut tiers = Vec::new();
    if let Some(engine) = registry.ocr(DOCINTEL_ENGINE) {
        tiers.push(OcrTier::DocumentIntelligence { engine, timeout });
    }
    if let Some(engine) = registry.ocr(CLOUD_OCR_ENGINE) {
        tiers.push(OcrTier::CloudOcr { engine, timeout });
    }
    if let Some(engine) = registry.ocr(LOCAL_OCR_ENGINE) {
        tiers.push(OcrTier::LocalOcr { engine, timeout });
    }
    if tiers.is_empty() {
        warn!("No OCR engine configured; scanned documents and images will be indexed from metadata only");
    }
    OcrChain::new(tiers, &cfg.ocr)
}

pub fn build_vector_store(cfg: &AppConfig, secrets: &Secrets) -> Result<Arc<dyn VectorStore>, IndexError> {
    let client = QdrantClient::new(QdrantConfig {
        url: cfg.vectors.url.clone(),
        collection: cfg.vectors.collection.clone(),
        api_key: secrets.qdrant_api_key.clone(),
        timeout: Duration::from_secs(cfg.vectors.timeout_secs),
        max_retries: cfg.vectors.max_retries,
    })?;
    Ok(Arc::new(QdrantStore::new(client, cfg.query.prefetch)))
}

pub async fn build_blob_store(cfg: &AppConfig, secrets: &Secrets) -> Result<Arc<dyn BlobStore>, IndexError> {
    match cfg.blobs.provider.as_str() {
        "fs" => Ok(Arc::new(FsBlobStore::open(&cfg.blobs.path).await?)),
        "azure" => {
            let sas_url = secrets.storage_sas_url.clone().ok_or_else(|| {
                IndexError::Configuration("AZURE_STORAGE_SAS_URL is not set".into())
            })?;
            Ok(Arc::new(AzureBlobStore::new(AzureBlobConfig {
                sas_url,
                timeout: Duration::from_secs(cfg.pipeline.storage_timeout_secs),
                max_retries: cfg.vectors.max_retries,
            })?))
        }
        "memory" => {
            warn!("Using the in-memory blob store; full text is lost at exit");
            Ok(Arc::new(MemoryBlobStore::new()))
        }
        other => Err(IndexError::Configuration(format!(
            "unknown blob provider {:?}",
            other
        ))),
    }
}

/// Everything a run or a query needs, built once from configuration.
#[derive(Clone)]
pub struct Services {
    pub embedder: Embedder,
    pub store: HybridStore,
    pub dispatcher: Dispatcher,
}

impl Services {
    pub async fn build(cfg: &AppConfig, secrets: &Secrets) -> Result<Self, IndexError> {
        let registry = build_registry(cfg, secrets)?;
        let embedder = build_embedder(cfg, &registry)?;
        let ocr = build_ocr_chain(cfg, &registry);
        let vectors = build_vector_store(cfg, secrets)?;
        let blobs = build_blob_store(cfg, secrets).await?;
        debug!("Blob store: {}", blobs.name());
        Ok(Self {
            embedder,
            store: HybridStore::new(
                vectors,
                blobs,
                Duration::from_secs(cfg.pipeline.storage_timeout_secs),
            ),
            dispatcher: Dispatcher::new(cfg.extraction.clone(), Arc::new(ocr)),
        })
    }
}

/// The collection must exist and match the embedding dimension.
pub async fn validate(embedder: &Embedder, vectors: &dyn VectorStore) -> Result<(), IndexError> {
    match vectors.dimension().await {
        Ok(Some(dim)) => embedder.validate_dimension(dim),
        Ok(None) => Err(IndexError::Configuration(
            "vector collection does not exist; run `init` first".into(),
        )),
        Err(IndexError::TransientProvider(msg)) => Err(IndexError::Configuration(format!(
            "vector store unreachable: {}",
            msg
        ))),
        Err(e) => Err(e),
    }
}

/// Creates the collection when missing. Returns whether it was created.
pub async fn init_collection(embedder: &Embedder, vectors: &dyn VectorStore) -> Result<bool, IndexError> {
    match vectors.dimension().await? {
        Some(dim) => {
            embedder.validate_dimension(dim)?;
            Ok(false)
        }
        None => {
            vectors.create(embedder.dimension()).await?;
            info!("Created vector collection ({} dimensions)", embedder.dimension());
            Ok(true)
        }
    }
}

/// Removes every record at or below `folder`, vector and blob alike.
/// Returns the removed source ids.
pub async fn purge(store: &HybridStore, folder: &str) -> Result<Vec<String>, IndexError> {
    let folder = format!("/{}", folder.trim_matches('/'));
    if folder == "/" {
        return Err(IndexError::Configuration(
            "refusing to purge the whole index; give a folder".into(),
        ));
    }
    let below = format!("{}/", folder);
    let mut doomed: Vec<IndexRecord> = store
        .vectors()
        .records()
        .await?
        .into_iter()
        .filter(|r| r.source_id == folder || r.source_id.starts_with(&below))
        .collect();
    doomed.sort_by(|a, b| a.source_id.cmp(&b.source_id));

    let mut removed = Vec::with_capacity(doomed.len());
    for record in doomed {
        store.remove(&record.doc_id).await?;
        debug!("purged {}", record.source_id);
        removed.push(record.source_id);
    }
    info!("Purged {} documents under {}", removed.len(), folder);
    Ok(removed)
}

enum Outcome {
    Indexed {
        update: bool,
        coverage: Coverage,
        unsupported: Option<String>,
    },
    Failed {
        path: String,
        stage: Stage,
        error: IndexError,
    },
    Cancelled,
}

pub struct Indexer {
    source: Arc<dyn FileSource>,
    choice: Arc<dyn FolderChoice>,
    services: Services,
    cfg: PipelineConfig,
}

impl Indexer {
    pub fn new(
        source: Arc<dyn FileSource>,
        choice: Arc<dyn FolderChoice>,
        services: Services,
        cfg: PipelineConfig,
    ) -> Self {
        Self {
            source,
            choice,
            services,
            cfg,
        }
    }

    /// One crawl pass. Per-file failures land in the summary; only a
    /// configuration error is returned as `Err`.
    pub async fn run(&self, cancel: Arc<AtomicBool>) -> Result<RunSummary, IndexError> {
        let store = &self.services.store;
        validate(&self.services.embedder, store.vectors().as_ref()).await?;

        info!("Loading index snapshot...");
        let snapshot = Snapshot::new(store.vectors().records().await?);
        info!("{} documents already indexed", snapshot.len());

        info!("Listing source files...");
        let listing = self
            .source
            .list(self.choice.as_ref())
            .await
            .map_err(|e| IndexError::TransientProvider(format!("listing failed: {:#}", e)))?;

        let mut summary = RunSummary {
            discovered: listing.files.len(),
            ..RunSummary::default()
        };
        let mut observed = HashSet::with_capacity(listing.files.len());
        let mut work = Vec::new();
        for file in &listing.files {
            observed.insert(file.doc_id());
            match snapshot.decide(file) {
                Decision::Skip => summary.skipped += 1,
                decision => work.push((file.clone(), decision)),
            }
        }
        info!(
            "Discovered {} files: {} unchanged, {} to index",
            summary.discovered,
            summary.skipped,
            work.len()
        );

        let abort = AtomicBool::new(false);
        let outcomes: Vec<Outcome> = stream::iter(work)
            .map(|(file, decision)| {
                let cancel = cancel.clone();
                let abort = &abort;
                async move {
                    if cancel.load(Ordering::SeqCst) || abort.load(Ordering::SeqCst) {
                        return Outcome::Cancelled;
                    }
                    let outcome = self.process(&file, decision).await;
                    if let Outcome::Failed { error, .. } = &outcome {
                        if error.is_fatal() {
                            abort.store(true, Ordering::SeqCst);
                        }
                    }
                    outcome
                }
            })
            .buffer_unordered(self.cfg.workers.max(1))
            .collect()
            .await;

        let mut fatal = None;
        for outcome in outcomes {
            match outcome {
                Outcome::Indexed {
                    update,
                    coverage,
                    unsupported,
                } => {
                    if update {
                        summary.updated += 1;
                    } else {
                        summary.inserted += 1;
                    }
                    match coverage {
                        Coverage::Full => summary.indexed_full += 1,
                        Coverage::MetadataOnly => summary.indexed_metadata_only += 1,
                    }
                    if let Some(ext) = unsupported {
                        summary.record_unsupported(&ext);
                    }
                }
                Outcome::Failed { path, stage, error } => {
                    if error.is_fatal() && fatal.is_none() {
                        fatal = Some(error.clone());
                    }
                    summary.record_failure(&path, stage, error.to_string());
                }
                Outcome::Cancelled => summary.cancelled = true,
            }
        }
        if let Some(err) = fatal {
            error!("Aborting run: {}", err);
            return Err(err);
        }
        if cancel.load(Ordering::SeqCst) {
            summary.cancelled = true;
        }
        if summary.cancelled {
            warn!("Run cancelled; skipping the tombstone sweep");
            return Ok(summary);
        }

        if !self.cfg.sweep {
            debug!("Sweep disabled");
        } else if !listing.is_complete() {
            warn!(
                "Listing incomplete ({} errors, truncated: {}); skipping the tombstone sweep",
                listing.errors.len(),
                listing.truncated
            );
        } else {
            self.sweep(&snapshot, &observed, &mut summary).await;
        }

        info!(
            "Run complete: {} indexed, {} skipped, {} deleted, {} failed",
            summary.indexed(),
            summary.skipped,
            summary.deleted,
            summary.failures.len()
        );
        Ok(summary)
    }

    async fn sweep(&self, snapshot: &Snapshot, observed: &HashSet<String>, summary: &mut RunSummary) {
        let store = &self.services.store;
        for record in snapshot.tombstones(observed) {
            match store.remove(&record.doc_id).await {
                Ok(()) => {
                    info!("Removed {} (no longer in source)", record.source_id);
                    summary.deleted += 1;
                }
                Err(e) => summary.record_failure(&record.source_id, Stage::Delete, e.to_string()),
            }
        }
        match store.reconcile_orphans().await {
            Ok(OrphanReport {
                blobs_removed,
                vectors_removed,
            }) => summary.orphans_removed = blobs_removed.len() + vectors_removed.len(),
            Err(e) => summary.record_failure("(cleanup)", Stage::Delete, e.to_string()),
        }
        summary.swept = true;
    }

    async fn process(&self, file: &SourceFile, decision: Decision) -> Outcome {
        let failed = |stage: Stage, error: IndexError| {
            warn!("{} failed at {}: {}", file.id, stage, error);
            Outcome::Failed {
                path: file.id.clone(),
                stage,
                error,
            }
        };
        debug!("{} -> {}", file.id, decision.label());

        let download = Duration::from_secs(self.cfg.download_timeout_secs);
        let bytes = match tokio::time::timeout(download, self.source.read(file)).await {
            Ok(Ok(b)) => b,
            Ok(Err(e)) => {
                return failed(Stage::Download, IndexError::TransientProvider(format!("{:#}", e)))
            }
            Err(_) => {
                return failed(
                    Stage::Download,
                    IndexError::TransientProvider(format!("download timed out after {:?}", download)),
                )
            }
        };

        let extraction = match self.services.dispatcher.extract(file, bytes).await {
            Ok(x) => x,
            Err(e) => return failed(Stage::Extract, e),
        };
        let coverage = extraction.method.coverage();
        let unsupported = extraction
            .is_unsupported()
            .then(|| normalize(&file.mime_or_extension));

        let full_text = match coverage {
            Coverage::Full => Some(extraction.text.as_str()),
            Coverage::MetadataOnly => None,
        };
        let embed_text = match full_text {
            Some(text) => text.to_string(),
            None => metadata_text(file),
        };
        let vectors = match self.services.embedder.embed_document(&embed_text).await {
            Ok(v) => v,
            Err(e) => return failed(Stage::Embed, e),
        };

        let record = IndexRecord {
            doc_id: file.doc_id(),
            source_id: file.id.clone(),
            file_name: file.name.clone(),
            file_type: normalize(&file.mime_or_extension),
            size_bytes: file.size_bytes,
            modified_at: file.modified_at,
            coverage,
            extraction_method: extraction.method,
            page_count: extraction.page_count,
            indexed_at: Utc::now(),
            content_hash: full_text.map(|t| storage::content_hash(t.as_bytes())),
        };
        let (update, previous) = match decision {
            Decision::Update(prev) => (true, Some(prev)),
            _ => (false, None),
        };
        if let Err(e) = self
            .services
            .store
            .upsert(&record, &vectors, full_text, previous.as_ref())
            .await
        {
            return failed(Stage::Store, e);
        }
        info!(
            "Indexed {} ({}, {})",
            file.id,
            record.extraction_method.as_str(),
            match coverage {
                Coverage::Full => "full",
                Coverage::MetadataOnly => "metadata-only",
            }
        );
        Outcome::Indexed {
            update,
            coverage,
            unsupported,
        }
    }
}
