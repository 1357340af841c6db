//! Discovery of source files and the folder-choice lookup.
//!
//! `LocalTreeSource` walks the local sync folder of a cloud drive. Remote
//! listings plug in through `FileSource`. A list-only folder shows up as one
//! synthetic file whose id ends in `/` and whose content is the listing of
//! the files directly inside it.

use crate::config::SourceConfig;
use crate::models::SourceFile;
use anyhow::Context;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// `mime_or_extension` of a folder-listing file.
pub const FOLDER_LISTING: &str = "folder-listing";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderPolicy {
    Process,
    Skip,
    /// Index one listing of the folder's files instead of the files.
    ListOnly,
}

/// How a folder should be crawled. Owned outside the indexer and consulted
/// read-only.
pub trait FolderChoice: Send + Sync {
    fn policy(&self, folder_path: &str) -> FolderPolicy;
}

/// Crawls every folder.
pub struct ProcessAll;

impl FolderChoice for ProcessAll {
    fn policy(&self, _folder_path: &str) -> FolderPolicy {
        FolderPolicy::Process
    }
}

/// Skips or lists folders matching sets of globs. Skip wins when a folder
/// matches both.
pub struct GlobFolderChoice {
    skip: GlobSet,
    list_only: GlobSet,
}

impl GlobFolderChoice {
    pub fn new(skip: &[String], list_only: &[String]) -> anyhow::Result<Self> {
        Ok(Self {
            skip: build_globset(skip)?,
            list_only: build_globset(list_only)?,
        })
    }
}

impl FolderChoice for GlobFolderChoice {
    fn policy(&self, folder_path: &str) -> FolderPolicy {
        let rel = folder_path.trim_start_matches('/');
        if self.skip.is_match(rel) {
            FolderPolicy::Skip
        } else if self.list_only.is_match(rel) {
            FolderPolicy::ListOnly
        } else {
            FolderPolicy::Process
        }
    }
}

/// Splits crawlable folders by policy. Folders below a list-only folder are
/// list-only too unless they are skipped themselves.
fn partition_dirs(
    dirs: Vec<(PathBuf, String)>,
    choice: &dyn FolderChoice,
) -> (Vec<PathBuf>, BTreeMap<PathBuf, String>) {
    let mut skipped: Vec<PathBuf> = Vec::new();
    let mut listed: BTreeMap<PathBuf, String> = BTreeMap::new();
    for (path, id) in dirs {
        if skipped.iter().any(|s| path.starts_with(s)) {
            continue;
        }
        let inherited = listed.keys().any(|l| path.starts_with(l));
        match choice.policy(&id) {
            FolderPolicy::Skip => {
                debug!("skipping folder {}", id);
                skipped.push(path);
            }
            FolderPolicy::ListOnly => {
                debug!("listing folder {}", id);
                listed.insert(path, id);
            }
            FolderPolicy::Process if inherited => {
                listed.insert(path, id);
            }
            FolderPolicy::Process => {}
        }
    }
    (skipped, listed)
}

/// Files of one list-only folder seen during the walk.
#[derive(Default)]
struct FolderTally {
    files: usize,
    bytes: u64,
    latest: Option<DateTime<Utc>>,
}

impl FolderTally {
    fn add(&mut self, size: u64, modified: DateTime<Utc>) {
        self.files += 1;
        self.bytes += size;
        self.latest = Some(self.latest.map_or(modified, |l| l.max(modified)));
    }

    /// Folder ids end in `/` so they never collide with a file.
    fn into_file(self, path: &Path, id: &str) -> SourceFile {
        let folder = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        SourceFile {
            id: format!("{}/", id),
            name: format!("{} (folder listing)", folder),
            modified_at: self
                .latest
                .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH)),
            size_bytes: self.bytes,
            mime_or_extension: FOLDER_LISTING.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Listing {
    pub files: Vec<SourceFile>,
    /// Entries that could not be listed. A listing with errors is partial.
    pub errors: Vec<String>,
    /// Stopped early at `max_files`.
    pub truncated: bool,
}

impl Listing {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty() && !self.truncated
    }
}

#[async_trait::async_trait]
pub trait FileSource: Send + Sync {
    async fn list(&self, choice: &dyn FolderChoice) -> anyhow::Result<Listing>;

    async fn read(&self, file: &SourceFile) -> anyhow::Result<Vec<u8>>;
}

pub struct LocalTreeSource {
    root: PathBuf,
    excludes: Vec<String>,
    follow_links: bool,
    include_hidden: bool,
    max_files: Option<usize>,
}

impl LocalTreeSource {
    pub fn new(cfg: &SourceConfig) -> Self {
        Self {
            root: PathBuf::from(&cfg.root),
            excludes: cfg.exclude.clone(),
            follow_links: cfg.follow_links,
            include_hidden: cfg.include_hidden,
            max_files: cfg.max_files,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

enum Walked {
    File(SourceFile),
    Error(String),
    Truncated,
}

/// `/`-separated path relative to `root`, with a leading `/`.
fn source_id(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(format!("/{}", parts.join("/")))
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl FileSource for LocalTreeSource {
    async fn list(&self, choice: &dyn FolderChoice) -> anyhow::Result<Listing> {
        if !self.root.is_dir() {
            anyhow::bail!("source root {} is not a directory", self.root.display());
        }
        let (tx, mut rx) = mpsc::channel(100);
        let exclude_set = build_globset(&self.excludes)?;
        let root = self.root.clone();
        let follow_links = self.follow_links;
        let include_hidden = self.include_hidden;
        let max_files = self.max_files;

        let dirs = {
            let root = root.clone();
            let excludes = exclude_set.clone();
            task::spawn_blocking(move || list_dirs(&root, follow_links, include_hidden, &excludes))
                .await
                .context("folder listing panicked")?
        };
        let (skipped, listed) = partition_dirs(dirs, choice);

        let walker_handle = task::spawn_blocking(move || {
            let mut sent = 0usize;
            let mut tallies: BTreeMap<PathBuf, FolderTally> = BTreeMap::new();
            let walker = WalkDir::new(&root)
                .follow_links(follow_links)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| {
                    e.depth() == 0
                        || (should_descend(e.path(), &root, include_hidden, &exclude_set)
                            && !skipped.iter().any(|s| e.path() == s.as_path()))
                });
            for entry in walker {
                let entry = match entry {
                    Ok(e) => e,
                    Err(err) => {
                        if tx.blocking_send(Walked::Error(err.to_string())).is_err() {
                            break;
                        }
                        continue;
                    }
                };
                let path = entry.path();
                if entry.file_type().is_dir() {
                    continue;
                }
                let meta = match fs::metadata(path) {
                    Ok(m) => m,
                    Err(err) => {
                        let msg = format!("{}: {}", path.display(), err);
                        if tx.blocking_send(Walked::Error(msg)).is_err() {
                            break;
                        }
                        continue;
                    }
                };
                let Some(id) = source_id(&root, path) else {
                    continue;
                };
                let modified_at: DateTime<Utc> = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
                if let Some(parent) = path.parent().filter(|p| listed.contains_key(*p)) {
                    tallies
                        .entry(parent.to_path_buf())
                        .or_default()
                        .add(meta.len(), modified_at);
                    continue;
                }
                if max_files.map(|m| sent >= m).unwrap_or(false) {
                    let _ = tx.blocking_send(Walked::Truncated);
                    return;
                }
                let file = SourceFile {
                    id,
                    name: entry.file_name().to_string_lossy().into_owned(),
                    modified_at,
                    size_bytes: meta.len(),
                    mime_or_extension: extension_of(path),
                };
                if tx.blocking_send(Walked::File(file)).is_err() {
                    // Receiver dropped, stop walking.
                    return;
                }
                sent += 1;
            }
            for (path, tally) in tallies {
                let Some(id) = listed.get(&path) else {
                    continue;
                };
                if max_files.map(|m| sent >= m).unwrap_or(false) {
                    let _ = tx.blocking_send(Walked::Truncated);
                    return;
                }
                if tx.blocking_send(Walked::File(tally.into_file(&path, id))).is_err() {
                    return;
                }
                sent += 1;
            }
        });

        let mut listing = Listing::default();
        while let Some(item) = rx.recv().await {
            match item {
                Walked::File(f) => listing.files.push(f),
                Walked::Error(e) => {
                    warn!("listing error: {}", e);
                    listing.errors.push(e);
                }
                Walked::Truncated => listing.truncated = true,
            }
        }
        walker_handle.await.context("directory walker panicked")?;
        debug!(
            "listed {} files ({} errors)",
            listing.files.len(),
            listing.errors.len()
        );
        Ok(listing)
    }

    async fn read(&self, file: &SourceFile) -> anyhow::Result<Vec<u8>> {
        let rel = file.id.trim_start_matches('/');
        let path = self.root.join(rel);
        if file.mime_or_extension == FOLDER_LISTING {
            let root = self.root.clone();
            let excludes = build_globset(&self.excludes)?;
            let include_hidden = self.include_hidden;
            let folder = file.id.trim_end_matches('/').to_string();
            let text = task::spawn_blocking(move || {
                folder_listing(&root, &path, &folder, include_hidden, &excludes)
            })
            .await
            .context("folder listing panicked")??;
            return Ok(text.into_bytes());
        }
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))
    }
}

/// Text of a list-only folder: its direct files, one per line.
fn folder_listing(
    root: &Path,
    dir: &Path,
    folder: &str,
    include_hidden: bool,
    excludes: &GlobSet,
) -> anyhow::Result<String> {
    let mut lines = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("listing {}", dir.display()))?;
        if !entry.file_type().is_file() || !should_descend(entry.path(), root, include_hidden, excludes) {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        lines.push(format!(
            "  \u{2022} {} ({} bytes)",
            entry.file_name().to_string_lossy(),
            size
        ));
    }
    let mut text = format!("=== Folder: {} ===\nContains {} files:", folder, lines.len());
    for line in lines {
        text.push('\n');
        text.push_str(&line);
    }
    Ok(text)
}

/// Every crawlable directory below `root` with its source id.
fn list_dirs(
    root: &Path,
    follow_links: bool,
    include_hidden: bool,
    excludes: &GlobSet,
) -> Vec<(PathBuf, String)> {
    WalkDir::new(root)
        .follow_links(follow_links)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| should_descend(e.path(), root, include_hidden, excludes))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir())
        .filter_map(|e| source_id(root, e.path()).map(|id| (e.path().to_path_buf(), id)))
        .collect()
}

pub(crate) fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("bad glob {:?}", pat))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn should_descend(path: &Path, root: &Path, include_hidden: bool, excludes: &GlobSet) -> bool {
    let rel = path.strip_prefix(root).unwrap_or(path);
    if excludes.is_match(rel) {
        return false;
    }
    if !include_hidden && is_hidden(path) {
        return false;
    }
    true
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}
