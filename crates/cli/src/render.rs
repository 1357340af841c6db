use indexer_core::hybrid::OrphanReport;
use indexer_core::models::Coverage;
use indexer_core::search::SearchResponse;
use serde::Serialize;
use std::fmt::Write;

/// Result of `check`: what the configuration resolves to.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub embedding_provider: String,
    pub embedding_dimension: usize,
    pub ocr_tiers: Vec<String>,
    pub ocr_strict: bool,
    pub collection: String,
    /// `None` when the collection does not exist.
    pub collection_dimension: Option<usize>,
    pub blob_store: String,
    pub problems: Vec<String>,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

pub fn search(resp: &SearchResponse) -> String {
    let mut out = String::new();
    if resp.hits.is_empty() {
        let _ = writeln!(out, "No results for {:?}", resp.query);
        return out;
    }
    for (i, hit) in resp.hits.iter().enumerate() {
        let coverage = match hit.coverage {
            Coverage::Full => "",
            Coverage::MetadataOnly => " (metadata only)",
        };
        let _ = writeln!(
            out,
            "{}. {} [{:.3}]{}",
            i + 1,
            hit.source_id,
            hit.score,
            coverage
        );
        for line in hit.preview.lines().filter(|l| !l.trim().is_empty()).take(6) {
            let _ = writeln!(out, "   {}", line.trim());
        }
        if hit.truncated {
            let _ = writeln!(out, "   ...");
        }
    }
    out
}

pub fn cleanup(report: &OrphanReport) -> String {
    if report.total() == 0 {
        return "No orphans found.\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(out, "Removed {} orphan blobs", report.blobs_removed.len());
    for key in &report.blobs_removed {
        let _ = writeln!(out, "  {}", key);
    }
    let _ = writeln!(out, "Removed {} orphan vectors", report.vectors_removed.len());
    for id in &report.vectors_removed {
        let _ = writeln!(out, "  {}", id);
    }
    out
}

pub fn purge(folder: &str, removed: &[String]) -> String {
    if removed.is_empty() {
        return format!("Nothing indexed under {}\n", folder);
    }
    let mut out = String::new();
    let _ = writeln!(out, "Removed {} documents under {}", removed.len(), folder);
    for id in removed {
        let _ = writeln!(out, "  {}", id);
    }
    out
}

pub fn check(report: &CheckReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Embeddings:  {} ({} dimensions)",
        report.embedding_provider, report.embedding_dimension
    );
    let tiers = if report.ocr_tiers.is_empty() {
        "none".to_string()
    } else {
        report.ocr_tiers.join(" -> ")
    };
    let _ = writeln!(
        out,
        "OCR:         {}{}",
        tiers,
        if report.ocr_strict { " (strict)" } else { "" }
    );
    let collection = match report.collection_dimension {
        Some(d) => format!("{} ({} dimensions)", report.collection, d),
        None => format!("{} (missing)", report.collection),
    };
    let _ = writeln!(out, "Collection:  {}", collection);
    let _ = writeln!(out, "Blob store:  {}", report.blob_store);
    for problem in &report.problems {
        let _ = writeln!(out, "problem: {}", problem);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_core::search::SearchHit;

    #[test]
    fn search_lists_hits_with_previews() {
        let resp = SearchResponse {
            query: "tax".into(),
            hits: vec![
                SearchHit {
                    doc_id: "a".into(),
                    score: 0.91,
                    source_id: "/Taxes/tax_2023.pdf".into(),
                    file_name: "tax_2023.pdf".into(),
                    coverage: Coverage::Full,
                    preview: "Form 1040\n\nWages 52,000".into(),
                    truncated: true,
                },
                SearchHit {
                    doc_id: "b".into(),
                    score: 0.2,
                    source_id: "/cover.pub".into(),
                    file_name: "cover.pub".into(),
                    coverage: Coverage::MetadataOnly,
                    preview: "File: cover.pub".into(),
                    truncated: false,
                },
            ],
        };
        let out = search(&resp);
        assert!(out.starts_with("1. /Taxes/tax_2023.pdf [0.910]\n   Form 1040\n   Wages 52,000\n   ...\n"));
        assert!(out.contains("2. /cover.pub [0.200] (metadata only)"));
    }

    #[test]
    fn empty_search_says_so() {
        let resp = SearchResponse {
            query: "nothing".into(),
            hits: Vec::new(),
        };
        assert_eq!(search(&resp), "No results for \"nothing\"\n");
    }

    #[test]
    fn check_flags_problems() {
        let report = CheckReport {
            embedding_provider: "local".into(),
            embedding_dimension: 384,
            ocr_tiers: vec!["vision".into()],
            ocr_strict: false,
            collection: "smartdrive".into(),
            collection_dimension: None,
            blob_store: "fs".into(),
            problems: vec!["collection smartdrive does not exist".into()],
        };
        assert!(!report.is_ok());
        let out = check(&report);
        assert!(out.contains("smartdrive (missing)"));
        assert!(out.contains("problem: collection smartdrive does not exist"));
    }

    #[test]
    fn purge_lists_removed_documents() {
        let removed = vec!["/Old/a.txt".to_string(), "/Old/".to_string()];
        assert_eq!(
            purge("/Old", &removed),
            "Removed 2 documents under /Old\n  /Old/a.txt\n  /Old/\n"
        );
        assert_eq!(purge("/Old", &[]), "Nothing indexed under /Old\n");
    }
}
