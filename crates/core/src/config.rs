use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub extraction: ExtractionConfig,
    pub ocr: OcrConfig,
    pub embeddings: EmbeddingConfig,
    pub sparse: SparseConfig,
    pub vectors: VectorConfig,
    pub blobs: BlobConfig,
    pub pipeline: PipelineConfig,
    pub query: QueryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Local sync folder of the cloud file store.
    pub root: String,
    pub exclude: Vec<String>,
    /// Folders the user chose not to process.
    pub skip_folders: Vec<String>,
    /// Folders indexed as one listing of their files instead of file by file.
    pub list_only_folders: Vec<String>,
    pub follow_links: bool,
    pub include_hidden: bool,
    pub max_files: Option<usize>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            root: ".".into(),
            exclude: Vec::new(),
            skip_folders: Vec::new(),
            list_only_folders: Vec::new(),
            follow_links: false,
            include_hidden: false,
            max_files: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchivePolicy {
    List,
    Extract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub max_chars: usize,
    pub head_ratio: f32,
    /// Below this many characters per page a PDF is treated as scanned.
    pub scanned_chars_per_page: usize,
    pub archive_policy: ArchivePolicy,
    pub archive_max_entries: usize,
    pub archive_list_limit: usize,
    pub archive_entry_chars: usize,
    /// Entries that decompress past this many bytes are skipped.
    pub archive_entry_max_bytes: u64,
    pub archive_max_depth: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_chars: 100_000,
            head_ratio: 0.8,
            scanned_chars_per_page: 50,
            archive_policy: ArchivePolicy::List,
            archive_max_entries: 50,
            archive_list_limit: 100,
            archive_entry_chars: 2_000,
            archive_entry_max_bytes: 20 * 1024 * 1024,
            archive_max_depth: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocIntelMode {
    Never,
    Selective,
    Always,
}

impl DocIntelMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "never" => Some(DocIntelMode::Never),
            "selective" => Some(DocIntelMode::Selective),
            "always" => Some(DocIntelMode::Always),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub document_intelligence: DocIntelMode,
    pub keywords: Vec<String>,
    /// Drops the local tier; cloud failures fail the file.
    pub strict: bool,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub language: String,
    pub tessdata: Option<String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            document_intelligence: DocIntelMode::Selective,
            keywords: [
                "tax", "1040", "w2", "w-2", "1099", "invoice", "receipt", "form", "return",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            strict: false,
            timeout_secs: 120,
            max_retries: 3,
            language: "eng".into(),
            tessdata: None,
        }
    }
}

impl OcrConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `local`, `hosted` or `api`.
    pub provider: String,
    pub model: String,
    pub dimension: usize,
    pub url: Option<String>,
    pub max_input_chars: Option<usize>,
    pub timeout_secs: u64,
    pub max_retries: usize,
    /// Sent as `input_type` by providers with asymmetric models.
    pub input_type: Option<String>,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".into(),
            model: "sentence-transformers/all-MiniLM-L6-v2".into(),
            dimension: 384,
            url: None,
            max_input_chars: None,
            timeout_secs: 30,
            max_retries: 3,
            input_type: None,
            batch_size: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SparseConfig {
    pub max_terms: usize,
    pub k1: f32,
    pub b: f32,
    pub avg_doc_len: f32,
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self {
            max_terms: 2048,
            k1: 1.2,
            b: 0.75,
            avg_doc_len: 256.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub url: String,
    pub collection: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:6333".into(),
            collection: "smartdrive".into(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    /// `fs`, `azure` or `memory`.
    pub provider: String,
    pub path: String,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            provider: "fs".into(),
            path: "data/blobs".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub workers: usize,
    pub download_timeout_secs: u64,
    pub storage_timeout_secs: u64,
    /// Tombstone sweep and orphan reconciliation after a complete pass.
    pub sweep: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            download_timeout_secs: 60,
            storage_timeout_secs: 60,
            sweep: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub top_k: usize,
    pub preview_chars: usize,
    pub max_response_bytes: usize,
    /// Candidates fetched from each of the dense and sparse legs.
    pub prefetch: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            preview_chars: 4_000,
            max_response_bytes: 900_000,
            prefetch: 50,
        }
    }
}

/// Credentials and endpoints read once from the environment at start.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub embedding_api_key: Option<String>,
    pub voyage_api_key: Option<String>,
    pub pinecone_api_key: Option<String>,
    pub qdrant_api_key: Option<String>,
    pub form_recognizer_key: Option<String>,
    pub form_recognizer_endpoint: Option<String>,
    pub vision_key: Option<String>,
    pub vision_endpoint: Option<String>,
    pub storage_sas_url: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let get = |k: &str| get(k).filter(|v| !v.trim().is_empty());
        Self {
            embedding_api_key: get("EMBEDDING_API_KEY"),
            voyage_api_key: get("VOYAGE_API_KEY"),
            pinecone_api_key: get("PINECONE_API_KEY"),
            qdrant_api_key: get("QDRANT_API_KEY"),
            form_recognizer_key: get("AZURE_FORM_RECOGNIZER_KEY"),
            form_recognizer_endpoint: get("AZURE_FORM_RECOGNIZER_ENDPOINT"),
            vision_key: get("AZURE_VISION_KEY"),
            vision_endpoint: get("AZURE_VISION_ENDPOINT"),
            storage_sas_url: get("AZURE_STORAGE_SAS_URL"),
        }
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("DRIVE_INDEXER")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );
    let cfg = settings.build()?;
    let mut app: AppConfig = cfg.try_deserialize()?;
    apply_legacy_overrides(&mut app, |k| std::env::var(k).ok());
    Ok(app)
}

/// `OCR_STRICT_MODE` and `USE_DOCUMENT_INTELLIGENCE` predate the
/// structured config and still win when set.
pub fn apply_legacy_overrides(cfg: &mut AppConfig, get: impl Fn(&str) -> Option<String>) {
    if let Some(raw) = get("OCR_STRICT_MODE") {
        cfg.ocr.strict = matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        );
    }
    if let Some(mode) = get("USE_DOCUMENT_INTELLIGENCE").and_then(|m| DocIntelMode::parse(&m)) {
        cfg.ocr.document_intelligence = mode;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("empty.toml");
        std::fs::write(&path, "").unwrap();
        let cfg = load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(cfg.extraction.max_chars, 100_000);
        assert_eq!(cfg.sparse.max_terms, 2048);
        assert_eq!(cfg.query.max_response_bytes, 900_000);
        assert_eq!(cfg.ocr.timeout(), Duration::from_secs(120));
    }

    #[test]
    fn file_values_override_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cfg.toml");
        std::fs::write(
            &path,
            r#"
[source]
root = "/mnt/onedrive"
skip_folders = ["**/Photos"]
list_only_folders = ["Archive"]

[ocr]
document_intelligence = "always"

[extraction]
archive_policy = "extract"
"#,
        )
        .unwrap();
        let cfg = load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(cfg.source.root, "/mnt/onedrive");
        assert_eq!(cfg.source.skip_folders, vec!["**/Photos"]);
        assert_eq!(cfg.source.list_only_folders, vec!["Archive"]);
        assert_eq!(cfg.ocr.document_intelligence, DocIntelMode::Always);
        assert_eq!(cfg.extraction.archive_policy, ArchivePolicy::Extract);
        assert_eq!(cfg.pipeline.workers, 4);
    }

    #[test]
    fn legacy_switches_override() {
        let env: HashMap<&str, &str> = [
            ("OCR_STRICT_MODE", "true"),
            ("USE_DOCUMENT_INTELLIGENCE", "never"),
        ]
        .into_iter()
        .collect();
        let mut cfg = AppConfig::default();
        apply_legacy_overrides(&mut cfg, |k| env.get(k).map(|v| v.to_string()));
        assert!(cfg.ocr.strict);
        assert_eq!(cfg.ocr.document_intelligence, DocIntelMode::Never);
    }

    #[test]
    fn blank_secrets_are_absent() {
        let secrets = Secrets::from_lookup(|k| match k {
            "QDRANT_API_KEY" => Some("  ".into()),
            "AZURE_VISION_KEY" => Some("vk".into()),
            _ => None,
        });
        assert!(secrets.qdrant_api_key.is_none());
        assert_eq!(secrets.vision_key.as_deref(), Some("vk"));
    }
}
