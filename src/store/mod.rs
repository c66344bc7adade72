//! The five persisted documents, held in memory for the length of a run.
//!
//! # Files
//!
//! ```text
//! data_dir/
//! ├── seen.json          # SeenEntry map
//! ├── guidance.json      # StoredArticle map
//! ├── changes.json       # ChangeEvent map
//! ├── page-hashes.json   # PageFingerprint map
//! └── config.json        # RunConfig
//! ```
//!
//! A run loads all five once with [`StateSnapshot::load`], mutates them in
//! memory, and writes back only the ones it touched with
//! [`StateSnapshot::flush`]. Nothing is written before the flush, so a run
//! that dies early leaves every document as it was.

pub mod json;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use tracing::{info, instrument};

use crate::models::{
    ChangeEvent, ContentType, PageFingerprint, RunConfig, SeenEntry, StoredArticle,
};

pub use json::{StoreError, read_document, write_document};

pub const SEEN_FILE: &str = "seen.json";
pub const ARTICLES_FILE: &str = "guidance.json";
pub const CHANGES_FILE: &str = "changes.json";
pub const PAGE_HASHES_FILE: &str = "page-hashes.json";
pub const CONFIG_FILE: &str = "config.json";

/// One loaded document plus whether this run changed it.
#[derive(Debug, Default)]
pub struct Document<T> {
    value: T,
    dirty: bool,
}

impl<T> Document<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            dirty: false,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Mutable access; marks the document for writing.
    pub fn get_mut(&mut self) -> &mut T {
        self.dirty = true;
        &mut self.value
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// In-memory view of the data directory.
#[derive(Debug)]
pub struct StateSnapshot {
    dir: PathBuf,
    pub seen: Document<BTreeMap<String, SeenEntry>>,
    pub articles: Document<BTreeMap<String, StoredArticle>>,
    pub changes: Document<BTreeMap<String, ChangeEvent>>,
    pub page_hashes: Document<BTreeMap<String, PageFingerprint>>,
    pub config: Document<RunConfig>,
}

impl StateSnapshot {
    /// Read every document from `dir`.
    #[instrument(level = "info", skip_all, fields(dir = %dir.display()))]
    pub async fn load(dir: &Path) -> Result<Self, StoreError> {
        let snapshot = Self {
            dir: dir.to_path_buf(),
            seen: Document::new(read_document(&dir.join(SEEN_FILE)).await?),
            articles: Document::new(read_document(&dir.join(ARTICLES_FILE)).await?),
            changes: Document::new(read_document(&dir.join(CHANGES_FILE)).await?),
            page_hashes: Document::new(read_document(&dir.join(PAGE_HASHES_FILE)).await?),
            config: Document::new(read_document(&dir.join(CONFIG_FILE)).await?),
        };
        info!(
            seen = snapshot.seen.get().len(),
            articles = snapshot.articles.get().len(),
            changes = snapshot.changes.get().len(),
            page_hashes = snapshot.page_hashes.get().len(),
            "Loaded state"
        );
        Ok(snapshot)
    }

    /// Write every document this run modified; returns how many were written.
    #[instrument(level = "info", skip_all, fields(dir = %self.dir.display()))]
    pub async fn flush(&mut self) -> Result<usize, StoreError> {
        let mut written = 0;
        written += flush_one(&self.dir, SEEN_FILE, &mut self.seen).await?;
        written += flush_one(&self.dir, ARTICLES_FILE, &mut self.articles).await?;
        written += flush_one(&self.dir, CHANGES_FILE, &mut self.changes).await?;
        written += flush_one(&self.dir, PAGE_HASHES_FILE, &mut self.page_hashes).await?;
        written += flush_one(&self.dir, CONFIG_FILE, &mut self.config).await?;
        info!(written, "Flushed state");
        Ok(written)
    }

    pub fn is_seen(&self, key: &str) -> bool {
        self.seen.get().contains_key(key)
    }

    /// Record a seen marker unless one exists; markers are never replaced.
    pub fn mark_seen(&mut self, key: String, entry: SeenEntry) -> bool {
        if self.is_seen(&key) {
            return false;
        }
        self.seen.get_mut().insert(key, entry);
        true
    }

    pub fn article(&self, key: &str) -> Option<&StoredArticle> {
        self.articles.get().get(key)
    }

    pub fn upsert_article(&mut self, article: StoredArticle) {
        self.articles.get_mut().insert(article.id.clone(), article);
    }

    /// Append a change event and bump the unread counter.
    ///
    /// Existing events are never replaced: a colliding id gets a `:<n>`
    /// suffix. Returns the id the event was stored under.
    pub fn record_change(&mut self, mut event: ChangeEvent) -> String {
        let changes = self.changes.get_mut();
        if changes.contains_key(&event.id) {
            let base = event.id.clone();
            let mut seq = 1u32;
            while changes.contains_key(&format!("{base}:{seq}")) {
                seq += 1;
            }
            event.id = format!("{base}:{seq}");
        }
        let id = event.id.clone();
        changes.insert(id.clone(), event);
        self.config.get_mut().unread_changes += 1;
        id
    }

    pub fn page_fingerprint(&self, page_name: &str) -> Option<&PageFingerprint> {
        self.page_hashes.get().get(page_name)
    }

    pub fn set_page_fingerprint(&mut self, page_name: &str, fingerprint: PageFingerprint) {
        self.page_hashes
            .get_mut()
            .insert(page_name.to_string(), fingerprint);
    }
}

/// Counts shown by `--status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSummary {
    pub articles: usize,
    pub chapters: usize,
    pub changes: usize,
    pub unacknowledged: usize,
    pub unread: u64,
    pub seen: usize,
    pub last_run: BTreeMap<String, DateTime<Utc>>,
    pub last_results: BTreeMap<String, usize>,
}

impl StateSnapshot {
    pub fn summary(&self) -> StateSummary {
        let articles = self.articles.get();
        let changes = self.changes.get();
        let config = self.config.get();
        StateSummary {
            articles: articles.len(),
            chapters: articles
                .values()
                .filter(|a| a.content_type == ContentType::Chapter)
                .count(),
            changes: changes.len(),
            unacknowledged: changes.values().filter(|c| !c.acknowledged).count(),
            unread: config.unread_changes,
            seen: self.seen.get().len(),
            last_run: config.last_run.clone(),
            last_results: config.last_results.clone(),
        }
    }
}

impl fmt::Display for StateSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "articles:  {} ({} chapters)", self.articles, self.chapters)?;
        writeln!(
            f,
            "changes:   {} ({} unacknowledged, {} unread)",
            self.changes, self.unacknowledged, self.unread
        )?;
        writeln!(f, "seen:      {}", self.seen)?;
        if self.last_run.is_empty() {
            writeln!(f, "last run:  never")?;
        }
        for (job, at) in &self.last_run {
            writeln!(f, "last run:  {job} at {}", at.to_rfc3339())?;
        }
        for (source, count) in &self.last_results {
            writeln!(f, "  {source}: {count} change(s)")?;
        }
        Ok(())
    }
}

async fn flush_one<T: serde::Serialize>(
    dir: &Path,
    file_name: &str,
    doc: &mut Document<T>,
) -> Result<usize, StoreError> {
    if !doc.is_dirty() {
        return Ok(0);
    }
    write_document(&dir.join(file_name), &doc.value).await?;
    doc.dirty = false;
    Ok(1)
}
