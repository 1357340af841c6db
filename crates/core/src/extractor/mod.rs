//! Format dispatch and the direct (non-OCR) text adapters.
//!
//! `extract_direct` is synchronous and CPU bound; the `Dispatcher` runs it on
//! the blocking pool and hands scanned pages and images to the OCR chain.

mod archive;
mod legacy;
mod office;
mod pdf;
mod text;

use crate::config::ExtractionConfig;
use crate::error::IndexError;
use crate::models::{ExtractionResult, SourceFile};
use crate::ocr::{OcrChain, OcrOutcome};
use crate::sampling::sample;
use providers::OcrDocument;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    PlainText,
    Csv,
    Json,
    Pdf,
    Docx,
    Pptx,
    Spreadsheet,
    LegacyDoc,
    Image,
    Archive,
    /// Known but unreadable; indexed from metadata alone.
    MetadataOnly,
}

const FORMATS: &[(&str, Format)] = &[
    ("txt", Format::PlainText),
    ("md", Format::PlainText),
    ("markdown", Format::PlainText),
    ("log", Format::PlainText),
    (crate::source::FOLDER_LISTING, Format::PlainText),
    ("csv", Format::Csv),
    ("json", Format::Json),
    ("pdf", Format::Pdf),
    ("docx", Format::Docx),
    ("pptx", Format::Pptx),
    ("xlsx", Format::Spreadsheet),
    ("xlsm", Format::Spreadsheet),
    ("xltx", Format::Spreadsheet),
    ("xltm", Format::Spreadsheet),
    ("xls", Format::Spreadsheet),
    ("ods", Format::Spreadsheet),
    ("doc", Format::LegacyDoc),
    ("png", Format::Image),
    ("jpg", Format::Image),
    ("jpeg", Format::Image),
    ("tiff", Format::Image),
    ("tif", Format::Image),
    ("bmp", Format::Image),
    ("gif", Format::Image),
    ("zip", Format::Archive),
    ("ppt", Format::MetadataOnly),
    ("pub", Format::MetadataOnly),
];

const MIME_EXTENSIONS: &[(&str, &str)] = &[
    ("text/plain", "txt"),
    ("text/markdown", "md"),
    ("text/csv", "csv"),
    ("application/json", "json"),
    ("application/pdf", "pdf"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "docx",
    ),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "pptx",
    ),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xlsx",
    ),
    ("application/vnd.ms-excel", "xls"),
    ("application/vnd.oasis.opendocument.spreadsheet", "ods"),
    ("application/msword", "doc"),
    ("application/vnd.ms-powerpoint", "ppt"),
    ("application/x-mspublisher", "pub"),
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/tiff", "tiff"),
    ("image/bmp", "bmp"),
    ("image/gif", "gif"),
    ("application/zip", "zip"),
    ("application/x-zip-compressed", "zip"),
];

pub fn format_for(extension: &str) -> Option<Format> {
    FORMATS
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, f)| *f)
}

/// Lower-case extension for an extension or mime type. Unknown mime types
/// come back empty.
pub fn normalize(mime_or_extension: &str) -> String {
    let raw = mime_or_extension.trim().to_ascii_lowercase();
    if raw.contains('/') {
        let essence = raw.split(';').next().unwrap_or("").trim();
        return MIME_EXTENSIONS
            .iter()
            .find(|(mime, _)| *mime == essence)
            .map(|(_, ext)| ext.to_string())
            .unwrap_or_default();
    }
    raw.trim_start_matches('.').to_string()
}

/// Extension to dispatch on: the declared one when it is in the table,
/// otherwise whatever the content sniffs as.
pub fn resolve_extension(mime_or_extension: &str, bytes: &[u8]) -> String {
    let declared = normalize(mime_or_extension);
    if format_for(&declared).is_some() {
        return declared;
    }
    match infer::get(bytes) {
        Some(kind) if format_for(kind.extension()).is_some() => {
            debug!(
                "sniffed {:?} content as {}",
                mime_or_extension,
                kind.extension()
            );
            kind.extension().to_string()
        }
        _ => declared,
    }
}

pub fn content_type(extension: &str) -> &'static str {
    match extension {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tiff" | "tif" => "image/tiff",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Below `chars_per_page` trimmed characters per page the text layer is
/// considered missing.
pub fn is_scanned(text: &str, pages: u32, chars_per_page: usize) -> bool {
    let chars = text.trim().chars().count();
    chars < chars_per_page.saturating_mul(pages.max(1) as usize)
}

/// What the direct adapters made of a file.
#[derive(Debug, Clone, PartialEq)]
pub enum Direct {
    Text {
        text: String,
        pages: u32,
    },
    /// A text layer too thin to trust; OCR should take over.
    Scanned {
        text: String,
        pages: u32,
        page_images: Vec<Vec<u8>>,
    },
    Image,
    Unsupported(String),
    Corrupt(String),
}

/// Runs the adapter for `extension`. `depth` counts archive nesting.
pub fn extract_direct(
    name: &str,
    extension: &str,
    bytes: &[u8],
    cfg: &ExtractionConfig,
    depth: usize,
) -> Direct {
    match format_for(extension) {
        Some(Format::PlainText) => Direct::Text {
            text: String::from_utf8_lossy(bytes).into_owned(),
            pages: 1,
        },
        Some(Format::Csv) => text::csv(bytes),
        Some(Format::Json) => text::json(bytes),
        Some(Format::Pdf) => pdf::extract(bytes, cfg.scanned_chars_per_page),
        Some(Format::Docx) => office::docx(bytes),
        Some(Format::Pptx) => office::pptx(bytes),
        Some(Format::Spreadsheet) => office::spreadsheet(bytes),
        Some(Format::LegacyDoc) => legacy::doc(bytes),
        Some(Format::Image) => Direct::Image,
        Some(Format::Archive) => archive::extract(name, bytes, cfg, depth),
        Some(Format::MetadataOnly) => {
            Direct::Unsupported(format!(".{} has no text extractor", extension))
        }
        None if extension.is_empty() => Direct::Unsupported("no extension".into()),
        None => Direct::Unsupported(format!(".{} is not a known format", extension)),
    }
}

/// Turns file bytes into an `ExtractionResult`, escalating to OCR when the
/// direct adapters come up short. `Err` only for strict-mode OCR failures,
/// which must not be written at all.
#[derive(Clone)]
pub struct Dispatcher {
    cfg: ExtractionConfig,
    ocr: Arc<OcrChain>,
}

impl Dispatcher {
    pub fn new(cfg: ExtractionConfig, ocr: Arc<OcrChain>) -> Self {
        Self { cfg, ocr }
    }

    pub async fn extract(
        &self,
        file: &SourceFile,
        bytes: Vec<u8>,
    ) -> Result<ExtractionResult, IndexError> {
        let extension = resolve_extension(&file.mime_or_extension, &bytes);
        let bytes = Arc::new(bytes);
        let direct = {
            let bytes = bytes.clone();
            let extension = extension.clone();
            let name = file.name.clone();
            let cfg = self.cfg.clone();
            match tokio::task::spawn_blocking(move || {
                extract_direct(&name, &extension, &bytes, &cfg, 0)
            })
                .await
            {
                Ok(d) => d,
                Err(e) => Direct::Corrupt(format!("extractor crashed: {}", e)),
            }
        };

        let result = match direct {
            Direct::Text { text, pages } => {
                if text.trim().is_empty() {
                    debug!("{} has no extractable text", file.id);
                    ExtractionResult::metadata_only(None)
                } else {
                    ExtractionResult::direct(text, pages)
                }
            }
            Direct::Scanned {
                text,
                pages,
                page_images,
            } => {
                info!(
                    "{} looks scanned ({} chars over {} pages), trying OCR",
                    file.id,
                    text.trim().chars().count(),
                    pages
                );
                let doc = OcrDocument {
                    file_name: file.name.clone(),
                    content_type: content_type(&extension).to_string(),
                    bytes: bytes.clone(),
                    page_images,
                    page_count: pages,
                };
                self.recognize(file, &doc).await?
            }
            Direct::Image => {
                let doc = OcrDocument {
                    file_name: file.name.clone(),
                    content_type: content_type(&extension).to_string(),
                    bytes: bytes.clone(),
                    page_images: Vec::new(),
                    page_count: 1,
                };
                self.recognize(file, &doc).await?
            }
            Direct::Unsupported(reason) => {
                debug!("{}: {}", file.id, reason);
                ExtractionResult::metadata_only(Some(IndexError::UnsupportedFormat(
                    if extension.is_empty() {
                        "(none)".to_string()
                    } else {
                        extension.clone()
                    },
                )))
            }
            Direct::Corrupt(reason) => {
                warn!("{} could not be parsed: {}", file.id, reason);
                ExtractionResult::metadata_only(Some(IndexError::CorruptInput(reason)))
            }
        };

        Ok(self.cap(result))
    }

    async fn recognize(
        &self,
        file: &SourceFile,
        doc: &OcrDocument,
    ) -> Result<ExtractionResult, IndexError> {
        match self.ocr.run(&file.id, doc).await {
            OcrOutcome::Recognized {
                text,
                method,
                pages,
            } => Ok(ExtractionResult {
                text,
                method,
                page_count: pages,
                succeeded: true,
                error: None,
            }),
            OcrOutcome::Exhausted { attempts, strict } => {
                let reason = if attempts.is_empty() {
                    "no OCR tier is configured".to_string()
                } else {
                    format!("OCR failed: {}", attempts.join("; "))
                };
                if strict {
                    return Err(IndexError::TransientProvider(reason));
                }
                Ok(ExtractionResult::metadata_only(Some(
                    IndexError::TransientProvider(reason),
                )))
            }
        }
    }

    fn cap(&self, mut result: ExtractionResult) -> ExtractionResult {
        let before = result.text.chars().count();
        if before > self.cfg.max_chars {
            result.text = sample(&result.text, self.cfg.max_chars, self.cfg.head_ratio);
            debug!("sampled {} chars down to {}", before, self.cfg.max_chars);
        }
        result
    }
}
