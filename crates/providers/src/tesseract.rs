//! Offline OCR through Tesseract (leptess). Reads raster images only; PDF
//! pages must arrive pre-extracted in `OcrDocument::page_images`.

use crate::{OcrDocument, OcrEngine, OcrText, PageProgress, ProviderError};
use leptess::LepTess;

pub struct TesseractOcr {
    lang: String,
    datapath: Option<String>,
}

impl TesseractOcr {
    pub fn new(lang: impl Into<String>, datapath: Option<String>) -> Self {
        Self {
            lang: lang.into(),
            datapath,
        }
    }
}

fn read_pages(
    datapath: Option<&str>,
    lang: &str,
    images: &[Vec<u8>],
) -> Result<Vec<String>, ProviderError> {
    let mut lt = LepTess::new(datapath, lang)
        .map_err(|e| ProviderError::Config(format!("tesseract init failed: {}", e)))?;
    let mut pages = Vec::with_capacity(images.len());
    for image in images {
        lt.set_image_from_mem(image)
            .map_err(|e| ProviderError::UnsupportedInput(format!("unreadable image: {}", e)))?;
        let text = lt
            .get_utf8_text()
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        pages.push(text);
    }
    Ok(pages)
}

#[async_trait::async_trait]
impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "local"
    }

    async fn recognize(
        &self,
        doc: &OcrDocument,
        progress: &dyn PageProgress,
    ) -> Result<OcrText, ProviderError> {
        let images: Vec<Vec<u8>> = if !doc.page_images.is_empty() {
            doc.page_images.clone()
        } else if doc.content_type.starts_with("image/") {
            vec![doc.bytes.as_ref().clone()]
        } else {
            return Err(ProviderError::UnsupportedInput(format!(
                "{} has no page images for local OCR",
                doc.file_name
            )));
        };

        let lang = self.lang.clone();
        let datapath = self.datapath.clone();
        let pages = tokio::task::spawn_blocking(move || {
            read_pages(datapath.as_deref(), &lang, &images)
        })
        .await
        .map_err(|e| ProviderError::RequestFailed(e.to_string()))??;

        let total = pages.len() as u32;
        let mut text = String::new();
        for (idx, page_text) in pages.iter().enumerate() {
            let page = idx as u32 + 1;
            if total > 1 {
                text.push_str(&format!("=== Page {} ===\n", page));
            }
            text.push_str(page_text.trim_end());
            text.push('\n');
            progress.page_done(self.name(), page, total);
        }
        Ok(OcrText { text, pages: total })
    }
}
