//! Ordered OCR fallback: Document Intelligence, then cloud OCR, then local
//! OCR. Each tier carries its own timeout; any failure moves on to the next
//! eligible tier.

use crate::config::{DocIntelMode, OcrConfig};
use crate::models::ExtractionMethod;
use providers::{OcrDocument, OcrEngine, PageProgress};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub enum OcrTier {
    DocumentIntelligence {
        engine: Arc<dyn OcrEngine>,
        timeout: Duration,
    },
    CloudOcr {
        engine: Arc<dyn OcrEngine>,
        timeout: Duration,
    },
    LocalOcr {
        engine: Arc<dyn OcrEngine>,
        timeout: Duration,
    },
}

impl OcrTier {
    pub fn method(&self) -> ExtractionMethod {
        match self {
            OcrTier::DocumentIntelligence { .. } => ExtractionMethod::DocumentIntelligence,
            OcrTier::CloudOcr { .. } => ExtractionMethod::CloudOcr,
            OcrTier::LocalOcr { .. } => ExtractionMethod::LocalOcr,
        }
    }

    pub fn engine(&self) -> &Arc<dyn OcrEngine> {
        match self {
            OcrTier::DocumentIntelligence { engine, .. }
            | OcrTier::CloudOcr { engine, .. }
            | OcrTier::LocalOcr { engine, .. } => engine,
        }
    }

    pub fn timeout(&self) -> Duration {
        match self {
            OcrTier::DocumentIntelligence { timeout, .. }
            | OcrTier::CloudOcr { timeout, .. }
            | OcrTier::LocalOcr { timeout, .. } => *timeout,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            OcrTier::DocumentIntelligence { .. } => 0,
            OcrTier::CloudOcr { .. } => 1,
            OcrTier::LocalOcr { .. } => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OcrOutcome {
    Recognized {
        text: String,
        method: ExtractionMethod,
        pages: u32,
    },
    /// Every eligible tier failed, or none was eligible.
    Exhausted { attempts: Vec<String>, strict: bool },
}

/// Logs every finished page at info level.
pub struct LogProgress;

impl PageProgress for LogProgress {
    fn page_done(&self, engine: &str, page: u32, total: u32) {
        info!("{}: page {}/{} recognised", engine, page, total);
    }
}

pub struct OcrChain {
    tiers: Vec<OcrTier>,
    mode: DocIntelMode,
    keywords: Vec<String>,
    strict: bool,
    progress: Arc<dyn PageProgress>,
}

impl OcrChain {
    /// `tiers` holds only the configured engines; order is normalised.
    pub fn new(mut tiers: Vec<OcrTier>, cfg: &OcrConfig) -> Self {
        tiers.sort_by_key(|t| t.rank());
        Self {
            tiers,
            mode: cfg.document_intelligence,
            keywords: cfg
                .keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            strict: cfg.strict,
            progress: Arc::new(LogProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn PageProgress>) -> Self {
        self.progress = progress;
        self
    }

    fn matches_keyword(&self, path: &str) -> bool {
        let lower = path.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    /// Tiers that will be tried for `path`, in order.
    pub fn eligible(&self, path: &str) -> Vec<&OcrTier> {
        self.tiers
            .iter()
            .filter(|tier| match tier {
                OcrTier::DocumentIntelligence { .. } => match self.mode {
                    DocIntelMode::Never => false,
                    DocIntelMode::Always => true,
                    DocIntelMode::Selective => self.matches_keyword(path),
                },
                OcrTier::LocalOcr { .. } => !self.strict,
                OcrTier::CloudOcr { .. } => true,
            })
            .collect()
    }

    pub async fn run(&self, path: &str, doc: &OcrDocument) -> OcrOutcome {
        let mut attempts = Vec::new();
        for tier in self.eligible(path) {
            let engine = tier.engine();
            let started = Instant::now();
            debug!("{}: trying {}", path, engine.name());
            let res = tokio::time::timeout(
                tier.timeout(),
                engine.recognize(doc, self.progress.as_ref()),
            )
            .await;
            let failure = match res {
                Ok(Ok(out)) if !out.text.trim().is_empty() => {
                    info!(
                        "{}: {} recognised {} chars in {:.1?}",
                        path,
                        engine.name(),
                        out.text.chars().count(),
                        started.elapsed()
                    );
                    return OcrOutcome::Recognized {
                        text: out.text,
                        method: tier.method(),
                        pages: out.pages.max(doc.page_count),
                    };
                }
                Ok(Ok(_)) => "no text".to_string(),
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {:?}", tier.timeout()),
            };
            warn!("{}: {} failed: {}", path, engine.name(), failure);
            attempts.push(format!("{}: {}", engine.name(), failure));
        }
        OcrOutcome::Exhausted {
            attempts,
            strict: self.strict,
        }
    }
}
