use super::Direct;
use crate::config::ExtractionConfig;

#[cfg(feature = "office")]
pub(super) fn extract(name: &str, bytes: &[u8], cfg: &ExtractionConfig, depth: usize) -> Direct {
    use crate::config::ArchivePolicy;
    use std::io::{Cursor, Read};
    use tracing::debug;

    let mut zip = match zip::ZipArchive::new(Cursor::new(bytes)) {
        Ok(z) => z,
        Err(e) => return Direct::Corrupt(format!("zip: {}", e)),
    };
    let mut entries = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        match zip.by_index(i) {
            Ok(entry) => entries.push(entry.name().to_string()),
            Err(e) => return Direct::Corrupt(format!("zip entry {}: {}", i, e)),
        }
    }

    let mut parts = vec![format!("=== Archive: {} ===", name)];
    if cfg.archive_policy == ArchivePolicy::List || depth >= cfg.archive_max_depth {
        parts.push(format!("Contains {} files:", entries.len()));
        for entry in entries.iter().take(cfg.archive_list_limit) {
            parts.push(format!("  \u{2022} {}", entry));
        }
        if entries.len() > cfg.archive_list_limit {
            parts.push(format!(
                "  ... and {} more files",
                entries.len() - cfg.archive_list_limit
            ));
        }
        return Direct::Text {
            text: parts.join("\n").trim().to_string(),
            pages: 1,
        };
    }

    parts.push(format!("Contains {} files\n", entries.len()));
    for entry_name in entries.iter().take(cfg.archive_max_entries) {
        if entry_name.ends_with('/') {
            continue;
        }
        let ext = entry_name
            .rsplit_once('.')
            .map(|(_, e)| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !matches!(
            super::format_for(&ext),
            Some(
                super::Format::PlainText
                    | super::Format::Csv
                    | super::Format::Json
                    | super::Format::Pdf
                    | super::Format::Docx
                    | super::Format::Pptx
                    | super::Format::Spreadsheet
                    | super::Format::LegacyDoc
                    | super::Format::Archive
            )
        ) {
            continue;
        }
        let limit = cfg.archive_entry_max_bytes;
        let mut content = Vec::new();
        let read = zip
            .by_name(entry_name)
            .map_err(|e| e.to_string())
            .and_then(|f| {
                if f.size() > limit {
                    return Err(format!("declares {} bytes, over {}", f.size(), limit));
                }
                // The declared size can lie; never inflate past the limit.
                f.take(limit + 1)
                    .read_to_end(&mut content)
                    .map_err(|e| e.to_string())
            })
            .and_then(|n| {
                if n as u64 > limit {
                    Err(format!("inflates past {} bytes", limit))
                } else {
                    Ok(())
                }
            });
        if let Err(e) = read {
            debug!("skipping {} in {}: {}", entry_name, name, e);
            continue;
        }
        let inner = super::extract_direct(entry_name, &ext, &content, cfg, depth + 1);
        let text = match inner {
            Direct::Text { text, .. } | Direct::Scanned { text, .. } => text,
            other => {
                debug!("no text from {} in {}: {:?}", entry_name, name, other);
                continue;
            }
        };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        parts.push(format!("\n=== File: {} ===", entry_name));
        parts.push(text.chars().take(cfg.archive_entry_chars).collect());
    }
    Direct::Text {
        text: parts.join("\n").trim().to_string(),
        pages: 1,
    }
}

#[cfg(not(feature = "office"))]
pub(super) fn extract(_name: &str, _bytes: &[u8], _cfg: &ExtractionConfig, _depth: usize) -> Direct {
    Direct::Unsupported("built without archive support".into())
}
