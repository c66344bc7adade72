//! Per-source pipelines and the run orchestrator.
//!
//! - **Listing sources** fetch their listing page, discover article links,
//!   consult the listing fingerprint, then evaluate every unseen link:
//!   seen marker, relevance filter, crawl, pause.
//! - **Feed sources** fetch their feed and reconcile each relevant item
//!   straight from the feed payload.
//!
//! [`run`] drives every enabled source of the selected jobs one after the
//! other, records per-source results in `config.json`, and flushes state.

use std::collections::BTreeMap;

use chrono::Utc;
use itertools::Itertools;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::crawler::{
    ArticleCandidate, ArticleHints, CrawlStats, CrawlTarget, Crawler, Reconciled, Throttle,
    reconcile,
};
use crate::fetch::{FetchError, PageFetcher};
use crate::filter::Keywords;
use crate::models::{ContentType, PageFingerprint, SeenEntry, content_key, seen_key};
use crate::scrapers::feed::parse_feed;
use crate::scrapers::html::clean_html;
use crate::scrapers::links::{DiscoveredLink, discover_links};
use crate::sources::{Job, ListingRule, Source, SourceKind};
use crate::store::{StateSnapshot, StoreError};
use crate::utils::fingerprint;

/// Failure that abandons one source for this run.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid entry url {url}: {source}")]
    EntryUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Knobs for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Ignore the listing fingerprint and the seen cache.
    pub force: bool,
    pub max_depth: Option<u32>,
    /// Per-source delay overrides.
    pub delays: BTreeMap<String, Throttle>,
}

impl RunOptions {
    pub fn throttle_for(&self, source: &Source) -> Throttle {
        self.delays
            .get(&source.id)
            .copied()
            .unwrap_or_else(|| Throttle::new(source.delay))
    }
}

/// What one run did, per source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Source id to change events produced.
    pub results: BTreeMap<String, usize>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
}

impl RunSummary {
    pub fn total_changes(&self) -> usize {
        self.results.values().sum()
    }
}

/// Run every enabled source belonging to `jobs`, then flush state.
#[instrument(level = "info", skip_all, fields(jobs = %jobs.iter().join(","), force = options.force))]
pub async fn run<F: PageFetcher>(
    fetcher: &F,
    sources: &[Source],
    jobs: &[Job],
    state: &mut StateSnapshot,
    options: &RunOptions,
) -> Result<RunSummary, StoreError> {
    let mut summary = RunSummary::default();

    for source in sources.iter().filter(|s| jobs.contains(&s.job)) {
        if !state.config.get().is_enabled(&source.id) {
            info!(source = %source.id, "Source disabled; skipping");
            summary.skipped.push(source.id.clone());
            continue;
        }

        info!(source = %source.id, name = %source.name, "Polling source");
        let changes = match run_source(fetcher, source, state, options).await {
            Ok(changes) => changes,
            Err(e) => {
                warn!(source = %source.id, error = %e, "Source failed; counting zero changes");
                summary.failed.push(source.id.clone());
                0
            }
        };
        summary.results.insert(source.id.clone(), changes);
    }

    let finished = Utc::now();
    let config = state.config.get_mut();
    for job in jobs {
        config.last_run.insert(job.to_string(), finished);
    }
    for (id, changes) in &summary.results {
        config.last_results.insert(id.clone(), *changes);
    }

    state.flush().await?;
    info!(
        changes = summary.total_changes(),
        sources = summary.results.len(),
        failed = summary.failed.len(),
        "Run complete"
    );
    Ok(summary)
}

/// Run one source's pipeline; returns the change events it produced.
pub async fn run_source<F: PageFetcher>(
    fetcher: &F,
    source: &Source,
    state: &mut StateSnapshot,
    options: &RunOptions,
) -> Result<usize, SourceError> {
    match &source.kind {
        SourceKind::Listing(rule) => run_listing(fetcher, source, rule, state, options).await,
        SourceKind::Feed { url } => run_feed(fetcher, source, url, state, options).await,
    }
}

#[instrument(level = "info", skip_all, fields(source = %source.id, listing = %rule.url))]
async fn run_listing<F: PageFetcher>(
    fetcher: &F,
    source: &Source,
    rule: &ListingRule,
    state: &mut StateSnapshot,
    options: &RunOptions,
) -> Result<usize, SourceError> {
    let base = Url::parse(&rule.url).map_err(|source| SourceError::EntryUrl {
        url: rule.url.clone(),
        source,
    })?;
    let html = fetcher.fetch_text(&rule.url).await?;
    let links = discover_links(&html, &base, rule);
    if links.is_empty() {
        warn!("Listing yielded no article links");
    }

    if let Some(page_name) = &rule.page_name {
        if !record_listing_fingerprint(state, source, page_name, &links, options.force) {
            return Ok(0);
        }
    }

    let throttle = options.throttle_for(source);
    let mut crawler = Crawler::new(fetcher, source, throttle);
    if let Some(depth) = options.max_depth {
        crawler = crawler.with_max_depth(depth);
    }
    let keywords = Keywords::for_source(source, state.config.get());

    let mut stats = CrawlStats::default();
    let mut already_seen = 0usize;
    let mut filtered = 0usize;
    for link in links {
        let key = seen_key(&source.id, &fingerprint(&link.url));
        if state.is_seen(&key) && !options.force {
            already_seen += 1;
            continue;
        }
        state.mark_seen(key, seen_entry(source, &link));

        if !keywords.is_relevant(&link.title, &link.description) {
            debug!(url = %link.url, title = %link.title, "Filtered out");
            filtered += 1;
            continue;
        }

        let hints = ArticleHints {
            title: Some(link.title),
            date: link.date,
            description: None,
        };
        stats.absorb(
            crawler
                .crawl(state, CrawlTarget::top_level(link.url, hints))
                .await,
        );
        throttle.pause().await;
    }

    info!(
        delay_ms = throttle.delay().as_millis() as u64,
        fetched = stats.fetched,
        failed = stats.failed,
        new = stats.new,
        updated = stats.updated,
        unchanged = stats.unchanged,
        already_seen,
        filtered,
        "Listing processed"
    );
    Ok(stats.changes())
}

/// Compare the listing's URL set with the cached fingerprint.
///
/// Returns `false` when the set is unchanged and per-link work can be
/// skipped; only `lastChecked` is touched in that case.
fn record_listing_fingerprint(
    state: &mut StateSnapshot,
    source: &Source,
    page_name: &str,
    links: &[DiscoveredLink],
    force: bool,
) -> bool {
    let hash = fingerprint(
        &links
            .iter()
            .map(|l| l.url.as_str())
            .sorted_unstable()
            .dedup()
            .join("\n"),
    );
    let now = Utc::now();

    let cached = state.page_fingerprint(page_name).cloned();
    if let Some(mut cached) = cached.clone().filter(|c| c.hash == hash) {
        if !force {
            info!(page = page_name, "Listing unchanged; skipping article checks");
            cached.last_checked = now;
            state.set_page_fingerprint(page_name, cached);
            return false;
        }
    }

    let new_links = links
        .iter()
        .filter(|l| !state.is_seen(&seen_key(&source.id, &fingerprint(&l.url))))
        .count();
    let last_changed = match cached {
        Some(c) if c.hash == hash => c.last_changed,
        _ => now,
    };
    info!(page = page_name, articles = links.len(), new_links, "Listing changed");
    state.set_page_fingerprint(
        page_name,
        PageFingerprint {
            hash,
            last_checked: now,
            last_changed,
            article_count: links.len(),
            new_links,
        },
    );
    true
}

#[instrument(level = "info", skip_all, fields(source = %source.id, feed = %url))]
async fn run_feed<F: PageFetcher>(
    fetcher: &F,
    source: &Source,
    url: &str,
    state: &mut StateSnapshot,
    options: &RunOptions,
) -> Result<usize, SourceError> {
    let xml = fetcher.fetch_text(url).await?;
    let items = parse_feed(&xml);
    let keywords = Keywords::for_source(source, state.config.get());

    let mut changes = 0usize;
    let mut filtered = 0usize;
    let total = items.len();
    for item in items {
        let url_hash = fingerprint(&item.url);
        let key = seen_key(&source.id, &url_hash);
        let stored = state.article(&content_key(&url_hash)).is_some();
        if state.is_seen(&key) && !stored && !options.force {
            continue;
        }
        state.mark_seen(key, seen_entry(source, &item));

        if !keywords.is_relevant(&item.title, &item.description) {
            debug!(url = %item.url, title = %item.title, "Filtered out");
            filtered += 1;
            continue;
        }

        let content = clean_html(&item.description);
        if content.is_empty() {
            debug!(url = %item.url, "Feed item has no description; skipping");
            continue;
        }

        let now = Utc::now();
        let candidate = ArticleCandidate {
            url: item.url,
            title: item.title,
            source: source.id.clone(),
            content_type: ContentType::Article,
            published_date: item
                .date
                .unwrap_or_else(|| now.format("%Y-%m-%d").to_string()),
            content,
            description: None,
            parent_url: None,
        };
        if reconcile(state, candidate, now) != Reconciled::Unchanged {
            changes += 1;
        }
    }

    info!(items = total, filtered, changes, "Feed processed");
    Ok(changes)
}

fn seen_entry(source: &Source, link: &DiscoveredLink) -> SeenEntry {
    SeenEntry {
        url: link.url.clone(),
        source: source.id.clone(),
        title: link.title.clone(),
        first_seen: Utc::now(),
    }
}
