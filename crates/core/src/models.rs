use crate::error::IndexError;
use chrono::{DateTime, SecondsFormat, Utc};
use providers::qdrant::SparseVector;
use serde::{Deserialize, Serialize};

/// A file as seen by one crawl pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    /// Root-relative path with `/` separators and a leading `/`.
    pub id: String,
    pub name: String,
    pub modified_at: DateTime<Utc>,
    pub size_bytes: u64,
    /// Lower-case extension without the dot, or a mime type when the
    /// listing did not provide a name with an extension.
    pub mime_or_extension: String,
}

impl SourceFile {
    pub fn doc_id(&self) -> String {
        doc_id(&self.id)
    }
}

/// Stable UUID-shaped identifier derived from the source identity. Valid as
/// a vector point id; the blob key is `<docId>.txt`.
pub fn doc_id(source_id: &str) -> String {
    let hash = blake3::hash(source_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash.as_bytes()[..16]);
    uuid::Uuid::from_bytes(bytes).to_string()
}

pub fn blob_key(doc_id: &str) -> String {
    format!("{}.txt", doc_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Coverage {
    #[serde(rename = "full")]
    Full,
    #[serde(rename = "metadata-only")]
    MetadataOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Direct,
    DocumentIntelligence,
    CloudOcr,
    LocalOcr,
    MetadataOnly,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Direct => "direct",
            ExtractionMethod::DocumentIntelligence => "document_intelligence",
            ExtractionMethod::CloudOcr => "cloud_ocr",
            ExtractionMethod::LocalOcr => "local_ocr",
            ExtractionMethod::MetadataOnly => "metadata_only",
        }
    }

    pub fn coverage(&self) -> Coverage {
        match self {
            ExtractionMethod::MetadataOnly => Coverage::MetadataOnly,
            _ => Coverage::Full,
        }
    }
}

/// Previously stored representation of a source file. Persisted as the
/// vector point payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub doc_id: String,
    pub source_id: String,
    pub file_name: String,
    pub file_type: String,
    pub size_bytes: u64,
    #[serde(with = "rfc3339")]
    pub modified_at: DateTime<Utc>,
    pub coverage: Coverage,
    pub extraction_method: ExtractionMethod,
    #[serde(default)]
    pub page_count: u32,
    #[serde(with = "rfc3339")]
    pub indexed_at: DateTime<Utc>,
    #[serde(default)]
    pub content_hash: Option<String>,
}

impl IndexRecord {
    pub fn to_payload(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }

    pub fn from_payload(
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(payload))
    }

    pub fn blob_key(&self) -> String {
        blob_key(&self.doc_id)
    }
}

mod rfc3339 {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Outcome of extracting one file, before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub text: String,
    pub method: ExtractionMethod,
    pub page_count: u32,
    pub succeeded: bool,
    pub error: Option<IndexError>,
}

impl ExtractionResult {
    pub fn direct(text: String, page_count: u32) -> Self {
        Self {
            text,
            method: ExtractionMethod::Direct,
            page_count,
            succeeded: true,
            error: None,
        }
    }

    pub fn metadata_only(reason: Option<IndexError>) -> Self {
        Self {
            text: String::new(),
            method: ExtractionMethod::MetadataOnly,
            page_count: 0,
            succeeded: false,
            error: reason,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self.error, Some(IndexError::UnsupportedFormat(_)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVectors {
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    pub dimension: usize,
    pub provider: String,
}

/// Searchable stand-in text for files without extractable content.
pub fn metadata_text(file: &SourceFile) -> String {
    let size_mb = file.size_bytes as f64 / (1024.0 * 1024.0);
    format!(
        "File: {}\nType: .{}\nSize: {:.2} MB ({} bytes)\nLocation: {}",
        file.name, file.mime_or_extension, size_mb, file.size_bytes, file.id
    )
}
