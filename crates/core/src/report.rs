use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Pipeline stage a per-file failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Extract,
    Embed,
    Store,
    Delete,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Download => "download",
            Stage::Extract => "extract",
            Stage::Embed => "embed",
            Stage::Store => "store",
            Stage::Delete => "delete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub path: String,
    pub stage: Stage,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub discovered: usize,
    pub skipped: usize,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub indexed_full: usize,
    pub indexed_metadata_only: usize,
    /// Files indexed from metadata alone because no extractor handles their
    /// extension, by extension.
    pub unsupported: BTreeMap<String, usize>,
    pub failures: Vec<Failure>,
    pub orphans_removed: usize,
    pub cancelled: bool,
    /// Whether the tombstone sweep ran.
    pub swept: bool,
}

impl RunSummary {
    pub fn indexed(&self) -> usize {
        self.indexed_full + self.indexed_metadata_only
    }

    pub fn record_failure(&mut self, path: &str, stage: Stage, reason: impl Into<String>) {
        self.failures.push(Failure {
            path: path.to_string(),
            stage,
            reason: reason.into(),
        });
    }

    pub fn record_unsupported(&mut self, extension: &str) {
        let key = if extension.is_empty() {
            "(none)".to_string()
        } else {
            extension.to_string()
        };
        *self.unsupported.entry(key).or_insert(0) += 1;
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Discovered:     {}", self.discovered)?;
        writeln!(f, "Skipped:        {}", self.skipped)?;
        writeln!(
            f,
            "Indexed:        {} ({} full text, {} metadata only)",
            self.indexed(),
            self.indexed_full,
            self.indexed_metadata_only
        )?;
        writeln!(f, "  inserted:     {}", self.inserted)?;
        writeln!(f, "  updated:      {}", self.updated)?;
        writeln!(f, "Deleted:        {}", self.deleted)?;
        if self.orphans_removed > 0 {
            writeln!(f, "Orphans:        {}", self.orphans_removed)?;
        }
        if !self.unsupported.is_empty() {
            writeln!(f, "Unsupported by extension:")?;
            for (ext, n) in &self.unsupported {
                writeln!(f, "  .{:<12} {}", ext, n)?;
            }
        }
        if !self.failures.is_empty() {
            writeln!(f, "Failed:         {}", self.failures.len())?;
            for failure in &self.failures {
                writeln!(
                    f,
                    "  {} [{}]: {}",
                    failure.path, failure.stage, failure.reason
                )?;
            }
        }
        if self.cancelled {
            writeln!(f, "Run was cancelled; deleted files were not swept.")?;
        } else if !self.swept {
            writeln!(f, "Listing was incomplete; deleted files were not swept.")?;
        }
        Ok(())
    }
}
