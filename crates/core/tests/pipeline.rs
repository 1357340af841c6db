use chrono::{DateTime, TimeZone, Utc};
use indexer_core::config::{OcrConfig, PipelineConfig, QueryConfig, SourceConfig, SparseConfig, ExtractionConfig};
use indexer_core::embeddings::Embedder;
use indexer_core::error::IndexError;
use indexer_core::extractor::Dispatcher;
use indexer_core::hybrid::HybridStore;
use indexer_core::models::{doc_id, blob_key, Coverage, ExtractionMethod, SourceFile};
use indexer_core::ocr::{OcrChain, OcrTier};
use indexer_core::pipeline::{purge, Indexer, Services};
use indexer_core::report::Stage;
use indexer_core::search::search;
use indexer_core::source::{FileSource, FolderChoice, GlobFolderChoice, Listing, LocalTreeSource, ProcessAll};
use indexer_core::sparse::SparseEncoder;
use indexer_core::vectorstore::{MemoryVectorStore, VectorStore};
use providers::{
    EmbedResponse, EmbeddingProvider, InputKind, OcrDocument, OcrEngine, OcrText, PageProgress,
    ProviderError,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storage::{BlobStore, MemoryBlobStore};

/// Two-dimensional embedding keyed on a couple of words.
struct WordEmbedder {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl EmbeddingProvider for WordEmbedder {
    fn name(&self) -> &str {
        "words"
    }

    fn dimension(&self) -> usize {
        2
    }

    fn max_input_chars(&self) -> usize {
        10_000
    }

    async fn embed(&self, texts: &[String], _kind: InputKind) -> Result<EmbedResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(EmbedResponse {
            vectors: texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    vec![
                        t.matches("invoice").count() as f32,
                        t.matches("quarterly").count() as f32,
                    ]
                })
                .collect(),
        })
    }
}

struct ScriptedOcr {
    name: &'static str,
    reply: Option<&'static str>,
    calls: AtomicUsize,
}

impl ScriptedOcr {
    fn new(name: &'static str, reply: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            name,
            reply,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl OcrEngine for ScriptedOcr {
    fn name(&self) -> &str {
        self.name
    }

    async fn recognize(&self, doc: &OcrDocument, _progress: &dyn PageProgress) -> Result<OcrText, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.reply {
            Some(text) => Ok(OcrText {
                text: text.into(),
                pages: doc.page_count,
            }),
            None => Err(ProviderError::Server {
                status: 503,
                body: "unavailable".into(),
            }),
        }
    }
}

#[derive(Default)]
struct FakeSource {
    files: Mutex<BTreeMap<String, (SourceFile, Vec<u8>)>>,
    listing_errors: Mutex<Vec<String>>,
    reads: AtomicUsize,
}

impl FakeSource {
    fn put(&self, path: &str, modified: DateTime<Utc>, body: &[u8]) {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        let ext = name.rsplit_once('.').map(|(_, e)| e.to_string()).unwrap_or_default();
        let file = SourceFile {
            id: path.into(),
            name,
            modified_at: modified,
            size_bytes: body.len() as u64,
            mime_or_extension: ext,
        };
        self.files
            .lock()
            .unwrap()
            .insert(path.into(), (file, body.to_vec()));
    }

    fn remove(&self, path: &str) {
        self.files.lock().unwrap().remove(path);
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl FileSource for FakeSource {
    async fn list(&self, _choice: &dyn FolderChoice) -> anyhow::Result<Listing> {
        Ok(Listing {
            files: self.files.lock().unwrap().values().map(|(f, _)| f.clone()).collect(),
            errors: self.listing_errors.lock().unwrap().clone(),
            truncated: false,
        })
    }

    async fn read(&self, file: &SourceFile) -> anyhow::Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .unwrap()
            .get(&file.id)
            .map(|(_, b)| b.clone())
            .ok_or_else(|| anyhow::anyhow!("{} vanished", file.id))
    }
}

struct Harness {
    source: Arc<FakeSource>,
    vectors: Arc<MemoryVectorStore>,
    blobs: Arc<MemoryBlobStore>,
    embedder: Arc<WordEmbedder>,
    docintel: Arc<ScriptedOcr>,
    cloud: Arc<ScriptedOcr>,
    services: Services,
}

fn when(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn harness(vectors: MemoryVectorStore, cloud_reply: Option<&'static str>, ocr: OcrConfig) -> Harness {
    let source = Arc::new(FakeSource::default());
    let vectors = Arc::new(vectors);
    let blobs = Arc::new(MemoryBlobStore::new());
    let embedder = Arc::new(WordEmbedder {
        calls: AtomicUsize::new(0),
    });
    let docintel = ScriptedOcr::new("document_intelligence", Some("Form 1040 wages 52,000"));
    let cloud = ScriptedOcr::new("vision", cloud_reply);
    let chain = OcrChain::new(
        vec![
            OcrTier::DocumentIntelligence {
                engine: docintel.clone(),
                timeout: Duration::from_secs(5),
            },
            OcrTier::CloudOcr {
                engine: cloud.clone(),
                timeout: Duration::from_secs(5),
            },
        ],
        &ocr,
    );
    let services = Services {
        embedder: Embedder::new(embedder.clone(), SparseEncoder::new(&SparseConfig::default()), 0.8),
        store: HybridStore::new(vectors.clone(), blobs.clone(), Duration::from_secs(5)),
        dispatcher: Dispatcher::new(ExtractionConfig::default(), Arc::new(chain)),
    };
    Harness {
        source,
        vectors,
        blobs,
        embedder,
        docintel,
        cloud,
        services,
    }
}

impl Harness {
    fn indexer(&self) -> Indexer {
        Indexer::new(
            self.source.clone(),
            Arc::new(ProcessAll),
            self.services.clone(),
            PipelineConfig::default(),
        )
    }

    async fn run(&self) -> Result<indexer_core::report::RunSummary, IndexError> {
        self.indexer().run(Arc::new(AtomicBool::new(false))).await
    }

    fn embed_calls(&self) -> usize {
        self.embedder.calls.load(Ordering::SeqCst)
    }
}

fn seeded() -> Harness {
    let h = harness(
        MemoryVectorStore::with_dimension(2),
        Some("Quarterly report scanned page"),
        OcrConfig::default(),
    );
    h.source.put("/notes.txt", when(0), b"Invoice 42 for consulting");
    h.source.put("/Reports/report.png", when(0), b"\x89PNG\r\n\x1a\nfake");
    h.source.put("/Taxes/tax_2023.png", when(0), b"\x89PNG\r\n\x1a\nfake");
    h.source.put("/Design/cover.pub", when(0), b"publisher bytes");
    h
}

#[tokio::test]
async fn first_run_indexes_every_file() {
    let h = seeded();
    let summary = h.run().await.unwrap();

    assert_eq!(summary.discovered, 4);
    assert_eq!(summary.inserted, 4);
    assert_eq!(summary.indexed_full, 3);
    assert_eq!(summary.indexed_metadata_only, 1);
    assert_eq!(summary.unsupported.get("pub"), Some(&1));
    assert!(summary.failures.is_empty());
    assert!(summary.swept);

    let report = h.vectors.get(&doc_id("/Reports/report.png")).await.unwrap().unwrap();
    assert_eq!(report.extraction_method, ExtractionMethod::CloudOcr);
    let tax = h.vectors.get(&doc_id("/Taxes/tax_2023.png")).await.unwrap().unwrap();
    assert_eq!(tax.extraction_method, ExtractionMethod::DocumentIntelligence);
    assert_eq!(h.docintel.calls(), 1);
    assert_eq!(h.cloud.calls(), 1);

    let pubfile = h.vectors.get(&doc_id("/Design/cover.pub")).await.unwrap().unwrap();
    assert_eq!(pubfile.coverage, Coverage::MetadataOnly);
    assert!(!h.blobs.exists(&blob_key(&pubfile.doc_id)).await.unwrap());
    let blob = h.blobs.get(&blob_key(&doc_id("/notes.txt"))).await.unwrap().unwrap();
    assert_eq!(blob, b"Invoice 42 for consulting");

    let resp = search("invoice", &h.services.embedder, &h.services.store, &QueryConfig::default())
        .await
        .unwrap();
    assert_eq!(resp.hits[0].source_id, "/notes.txt");
}

#[tokio::test]
async fn unchanged_files_cost_nothing_on_rerun() {
    let h = seeded();
    h.run().await.unwrap();
    let (reads, embeds, upserts) = (h.source.reads(), h.embed_calls(), h.vectors.upsert_calls());

    let summary = h.run().await.unwrap();
    assert_eq!(summary.skipped, 4);
    assert_eq!(summary.indexed(), 0);
    assert_eq!(h.source.reads(), reads);
    assert_eq!(h.embed_calls(), embeds);
    assert_eq!(h.vectors.upsert_calls(), upserts);
    assert_eq!(h.cloud.calls(), 1);
}

#[tokio::test]
async fn changed_file_is_updated_in_place() {
    let h = seeded();
    h.run().await.unwrap();
    h.source.put("/notes.txt", when(60), b"Invoice 43, revised");

    let summary = h.run().await.unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.skipped, 3);
    let blob = h.blobs.get(&blob_key(&doc_id("/notes.txt"))).await.unwrap().unwrap();
    assert_eq!(blob, b"Invoice 43, revised");
    assert_eq!(h.vectors.len(), 4);
}

#[tokio::test]
async fn failed_update_keeps_the_old_text_and_record() {
    let h = seeded();
    h.run().await.unwrap();
    h.source.put("/notes.txt", when(60), b"Invoice 43, revised");
    h.vectors.set_fail_upserts(true);

    let summary = h.run().await.unwrap();
    assert_eq!(summary.updated, 0);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].stage, Stage::Store);

    let blob = h.blobs.get(&blob_key(&doc_id("/notes.txt"))).await.unwrap().unwrap();
    assert_eq!(blob, b"Invoice 42 for consulting");
    let record = h.vectors.get(&doc_id("/notes.txt")).await.unwrap().unwrap();
    assert_eq!(record.modified_at, when(0));
}

#[tokio::test]
async fn deleted_source_file_is_tombstoned() {
    let h = seeded();
    h.run().await.unwrap();
    h.source.remove("/notes.txt");

    let summary = h.run().await.unwrap();
    assert_eq!(summary.deleted, 1);
    assert!(h.vectors.get(&doc_id("/notes.txt")).await.unwrap().is_none());
    assert!(!h.blobs.exists(&blob_key(&doc_id("/notes.txt"))).await.unwrap());
    assert_eq!(h.vectors.len(), 3);
}

#[tokio::test]
async fn partial_listing_skips_the_sweep() {
    let h = seeded();
    h.run().await.unwrap();
    h.source.remove("/notes.txt");
    h.source
        .listing_errors
        .lock()
        .unwrap()
        .push("/Private: permission denied".into());

    let summary = h.run().await.unwrap();
    assert!(!summary.swept);
    assert_eq!(summary.deleted, 0);
    assert!(h.vectors.get(&doc_id("/notes.txt")).await.unwrap().is_some());
}

#[tokio::test]
async fn strict_ocr_failure_writes_nothing() {
    let ocr = OcrConfig {
        strict: true,
        ..OcrConfig::default()
    };
    let h = harness(MemoryVectorStore::with_dimension(2), None, ocr);
    h.source.put("/Reports/report.png", when(0), b"\x89PNG\r\n\x1a\nfake");

    let summary = h.run().await.unwrap();
    assert_eq!(summary.indexed(), 0);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].stage, Stage::Extract);
    assert_eq!(summary.failures[0].path, "/Reports/report.png");
    assert!(h.vectors.is_empty());
    assert!(h.blobs.list_keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn lenient_ocr_failure_falls_back_to_metadata() {
    let h = harness(MemoryVectorStore::with_dimension(2), None, OcrConfig::default());
    h.source.put("/Reports/report.png", when(0), b"\x89PNG\r\n\x1a\nfake");

    let summary = h.run().await.unwrap();
    assert_eq!(summary.indexed_metadata_only, 1);
    assert!(summary.failures.is_empty());
    let rec = h.vectors.get(&doc_id("/Reports/report.png")).await.unwrap().unwrap();
    assert_eq!(rec.coverage, Coverage::MetadataOnly);
}

#[tokio::test]
async fn dimension_mismatch_aborts_before_any_download() {
    let h = harness(MemoryVectorStore::with_dimension(3), Some("x"), OcrConfig::default());
    h.source.put("/notes.txt", when(0), b"Invoice");

    match h.run().await {
        Err(IndexError::Configuration(msg)) => assert!(msg.contains("expects 3")),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.source.reads(), 0);
    assert_eq!(h.embed_calls(), 0);
}

#[tokio::test]
async fn missing_collection_is_a_configuration_error() {
    let h = harness(MemoryVectorStore::default(), Some("x"), OcrConfig::default());
    assert!(matches!(h.run().await, Err(IndexError::Configuration(_))));
}

#[tokio::test]
async fn cancelled_run_processes_nothing_and_keeps_records() {
    let h = seeded();
    h.run().await.unwrap();
    h.source.remove("/notes.txt");
    h.source.put("/new.txt", when(0), b"fresh");

    let cancel = Arc::new(AtomicBool::new(true));
    let summary = h.indexer().run(cancel).await.unwrap();
    assert!(summary.cancelled);
    assert!(!summary.swept);
    assert_eq!(summary.indexed(), 0);
    assert!(h.vectors.get(&doc_id("/notes.txt")).await.unwrap().is_some());
    assert!(h.vectors.get(&doc_id("/new.txt")).await.unwrap().is_none());
}

#[tokio::test]
async fn storage_failure_is_recorded_against_the_file() {
    let h = seeded();
    h.vectors.set_fail_upserts(true);

    let summary = h.run().await.unwrap();
    assert_eq!(summary.indexed(), 0);
    assert_eq!(summary.failures.len(), 4);
    assert!(summary.failures.iter().all(|f| f.stage == Stage::Store));
}

#[tokio::test]
async fn purge_removes_everything_under_a_folder() {
    let h = seeded();
    h.source.put("/Taxes/2022/w2.txt", when(0), b"Invoice copy of W-2");
    h.source.put("/Taxes2/other.txt", when(0), b"Invoice elsewhere");
    h.run().await.unwrap();
    assert_eq!(h.vectors.len(), 6);

    let removed = purge(&h.services.store, "Taxes/").await.unwrap();
    assert_eq!(removed, vec!["/Taxes/2022/w2.txt", "/Taxes/tax_2023.png"]);
    assert_eq!(h.vectors.len(), 4);
    assert!(h.vectors.get(&doc_id("/Taxes2/other.txt")).await.unwrap().is_some());
    assert!(!h.blobs.exists(&blob_key(&doc_id("/Taxes/2022/w2.txt"))).await.unwrap());

    assert!(matches!(
        purge(&h.services.store, "/").await,
        Err(IndexError::Configuration(_))
    ));
}

#[tokio::test]
async fn list_only_folder_is_indexed_as_one_listing() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(tmp.path().join("Archive")).unwrap();
    std::fs::write(tmp.path().join("notes.txt"), "Invoice 42 for consulting").unwrap();
    std::fs::write(tmp.path().join("Archive/invoice_2019.pdf"), "%PDF-1.4 old").unwrap();
    std::fs::write(tmp.path().join("Archive/ledger.txt"), "Invoice ledger").unwrap();

    let h = harness(MemoryVectorStore::with_dimension(2), None, OcrConfig::default());
    let source = LocalTreeSource::new(&SourceConfig {
        root: tmp.path().to_string_lossy().into_owned(),
        ..SourceConfig::default()
    });
    let choice = GlobFolderChoice::new(&[], &["Archive".into()]).unwrap();
    let indexer = Indexer::new(
        Arc::new(source),
        Arc::new(choice),
        h.services.clone(),
        PipelineConfig::default(),
    );

    let summary = indexer.run(Arc::new(AtomicBool::new(false))).await.unwrap();
    assert_eq!(summary.inserted, 2);
    assert!(summary.failures.is_empty());
    assert_eq!(h.vectors.len(), 2);
    assert!(h.vectors.get(&doc_id("/Archive/ledger.txt")).await.unwrap().is_none());

    let listing = h.vectors.get(&doc_id("/Archive/")).await.unwrap().unwrap();
    assert_eq!(listing.coverage, Coverage::Full);
    let text = h.blobs.get(&listing.blob_key()).await.unwrap().unwrap();
    let text = String::from_utf8(text).unwrap();
    assert!(text.starts_with("=== Folder: /Archive ===\nContains 2 files:"));
    assert!(text.contains("invoice_2019.pdf (12 bytes)"));

    let again = indexer.run(Arc::new(AtomicBool::new(false))).await.unwrap();
    assert_eq!(again.skipped, 2);
    assert_eq!(purge(&h.services.store, "/Archive").await.unwrap(), vec!["/Archive/"]);
}

