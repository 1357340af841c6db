//! Azure Document Intelligence (`prebuilt-document`) for forms and tables.

use crate::azure::{AzureConfig, AzureOperation};
use crate::{OcrDocument, OcrEngine, OcrText, PageProgress, ProviderError};
use bytes::Bytes;
use serde::Deserialize;

const ANALYZE_PATH: &str =
    "/formrecognizer/documentModels/prebuilt-document:analyze?api-version=2023-07-31";

pub struct DocumentIntelligence {
    op: AzureOperation,
}

impl DocumentIntelligence {
    pub fn new(cfg: AzureConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            op: AzureOperation::new(cfg)?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResult {
    #[serde(default)]
    pages: Vec<Page>,
    #[serde(default)]
    tables: Vec<Table>,
    #[serde(default)]
    key_value_pairs: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page {
    page_number: u32,
    #[serde(default)]
    lines: Vec<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Table {
    row_count: u32,
    column_count: u32,
    #[serde(default)]
    cells: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Cell {
    row_index: u32,
    column_index: u32,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct KeyValue {
    key: Option<Content>,
    value: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    content: String,
}

/// Flattens pages, tables and key/value pairs into plain text sections.
fn render(result: &AnalyzeResult) -> String {
    let mut parts: Vec<String> = Vec::new();
    for page in &result.pages {
        parts.push(format!("=== Page {} ===", page.page_number));
        parts.extend(page.lines.iter().map(|l| l.content.clone()));
    }
    if !result.tables.is_empty() {
        parts.push("\n=== Tables ===".to_string());
        for (idx, table) in result.tables.iter().enumerate() {
            parts.push(format!(
                "\nTable {} ({}x{}):",
                idx + 1,
                table.row_count,
                table.column_count
            ));
            for cell in &table.cells {
                parts.push(format!(
                    "Row {}, Col {}: {}",
                    cell.row_index, cell.column_index, cell.content
                ));
            }
        }
    }
    if !result.key_value_pairs.is_empty() {
        parts.push("\n=== Form Fields ===".to_string());
        for kv in &result.key_value_pairs {
            let key = kv.key.as_ref().map(|c| c.content.as_str()).unwrap_or("Unknown");
            let value = kv.value.as_ref().map(|c| c.content.as_str()).unwrap_or("N/A");
            parts.push(format!("{}: {}", key, value));
        }
    }
    parts.join("\n")
}

#[async_trait::async_trait]
impl OcrEngine for DocumentIntelligence {
    fn name(&self) -> &str {
        "document_intelligence"
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
                "document intelligence",
                &self.op.url(ANALYZE_PATH),
                &doc.content_type,
                body,
            )
            .await?;
        let result: AnalyzeResult = serde_json::from_value(status["analyzeResult"].clone())
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let pages = result.pages.len() as u32;
        for page in &result.pages {
            progress.page_done(self.name(), page.page_number, pages);
        }
        Ok(OcrText {
            text: render(&result),
            pages,
        })
    }
}
