//! Azure Computer Vision Read (v3.2) cloud OCR. Accepts images and PDFs.

use crate::azure::{AzureConfig, AzureOperation};
use crate::{OcrDocument, OcrEngine, OcrText, PageProgress, ProviderError};
use bytes::Bytes;
use serde::Deserialize;

const READ_PATH: &str = "/vision/v3.2/read/analyze";

pub struct VisionRead {
    op: AzureOperation,
}

impl VisionRead {
    pub fn new(cfg: AzureConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            op: AzureOperation::new(cfg)?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadResult {
    page: u32,
    #[serde(default)]
    lines: Vec<Line>,
}

#[derive(Debug, Deserialize)]
struct Line {
    text: String,
}

fn render(pages: &[ReadResult]) -> String {
    let mut out = String::new();
    for page in pages {
        out.push_str(&format!("=== Page {} ===\n", page.page));
        for line in &page.lines {
            out.push_str(&line.text);
            out.push('\n');
        }
    }
    out
}

#[async_trait::async_trait]
impl OcrEngine for VisionRead {
    fn name(&self) -> &str {
        "vision"
    }

    async fn recognize(
        &self,
        doc: &OcrDocument,
        progress: &dyn PageProgress,
    ) -> Result<OcrText, ProviderError> {
        let body = Bytes::from(doc.bytes.as_ref().clone());
        let status = self
            .op
            .run(
                "vision read",
                &self.op.url(READ_PATH),
                "application/octet-stream",
                body,
            )
            .await?;
        let pages: Vec<ReadResult> =
            serde_json::from_value(status["analyzeResult"]["readResults"].clone())
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let total = pages.len() as u32;
        for page in &pages {
            progress.page_done(self.name(), page.page, total);
        }
        Ok(OcrText {
            text: render(&pages),
            pages: total,
        })
    }
}
