//! Per-file skip/insert/update decisions and the end-of-pass tombstone sweep.

use crate::models::{IndexRecord, SourceFile};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Skip,
    Insert,
    Update(IndexRecord),
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Skip => "skip",
            Decision::Insert => "insert",
            Decision::Update(_) => "update",
        }
    }
}

/// Metadata-only comparison; runs before any download.
pub fn decide(file: &SourceFile, record: Option<&IndexRecord>) -> Decision {
    match record {
        None => Decision::Insert,
        Some(rec) if rec.modified_at == file.modified_at && rec.size_bytes == file.size_bytes => {
            Decision::Skip
        }
        Some(rec) => Decision::Update(rec.clone()),
    }
}

/// Stored records at the start of a run, keyed by docId.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    records: HashMap<String, IndexRecord>,
}

impl Snapshot {
    pub fn new(records: impl IntoIterator<Item = IndexRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|r| (r.doc_id.clone(), r))
                .collect(),
        }
    }

    pub fn get(&self, doc_id: &str) -> Option<&IndexRecord> {
        self.records.get(doc_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn decide(&self, file: &SourceFile) -> Decision {
        decide(file, self.get(&file.doc_id()))
    }

    /// Records whose docId was not observed during a complete pass.
    pub fn tombstones(&self, observed: &HashSet<String>) -> Vec<IndexRecord> {
        let mut out: Vec<IndexRecord> = self
            .records
            .values()
            .filter(|r| !observed.contains(&r.doc_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        out
    }
}
