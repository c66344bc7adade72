//! Crawl-and-store engine.
//!
//! For each URL: fetch, locate content, fingerprint, and reconcile with the
//! stored article of the same URL:
//!
//! | Stored entry | Content hash | Result |
//! |--------------|--------------|--------|
//! | absent | n/a | article stored, `new_guidance` event |
//! | present | differs | article overwritten, `content_updated` event |
//! | present | same | nothing written |
//!
//! Sources with a sub-page rule continue into the sub-pages of every new or
//! updated page, depth-first, up to the rule's maximum depth, pausing the
//! source's delay before each sub-page request.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::fetch::PageFetcher;
use crate::models::{
    ArticleMetadata, ChangeEvent, ChangeKind, ContentType, StoredArticle, change_key, content_key,
};
use crate::scrapers::content::{SubpageLink, locate_content};
use crate::scrapers::html::{extract_title, parse_published_date};
use crate::sources::Source;
use crate::store::StateSnapshot;
use crate::utils::{excerpt, fingerprint, reading_time, truncate_for_log, word_count};

/// Pages whose located content is shorter than this (in characters) are not
/// articles.
pub const MIN_CONTENT_CHARS: usize = 50;

/// Fixed pause between consecutive requests to the same source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    delay: Duration,
}

impl Throttle {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub async fn pause(&self) {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
    }
}

/// Metadata already known about a URL before it is fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleHints {
    pub title: Option<String>,
    pub date: Option<String>,
    pub description: Option<String>,
}

/// One URL queued for crawling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTarget {
    pub url: String,
    pub hints: ArticleHints,
    pub depth: u32,
    pub parent_url: Option<String>,
}

impl CrawlTarget {
    pub fn top_level(url: impl Into<String>, hints: ArticleHints) -> Self {
        Self {
            url: url.into(),
            hints,
            depth: 0,
            parent_url: None,
        }
    }
}

/// Counters for one crawl (a page and its sub-pages).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub fetched: usize,
    pub failed: usize,
    pub too_short: usize,
    pub unchanged: usize,
    pub new: usize,
    pub updated: usize,
}

impl CrawlStats {
    /// Change events produced.
    pub fn changes(&self) -> usize {
        self.new + self.updated
    }

    pub fn absorb(&mut self, other: CrawlStats) {
        self.fetched += other.fetched;
        self.failed += other.failed;
        self.too_short += other.too_short;
        self.unchanged += other.unchanged;
        self.new += other.new;
        self.updated += other.updated;
    }
}

/// Fully extracted article ready to be compared with stored state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleCandidate {
    pub url: String,
    pub title: String,
    pub source: String,
    pub content_type: ContentType,
    pub published_date: String,
    pub content: String,
    pub description: Option<String>,
    pub parent_url: Option<String>,
}

/// Outcome of [`reconcile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    New,
    Updated,
    Unchanged,
}

/// Compare `candidate` with its stored entry and record any transition.
///
/// Unchanged content leaves `state` untouched. New or changed content
/// overwrites the stored article, appends one [`ChangeEvent`] and bumps the
/// unread counter.
pub fn reconcile(
    state: &mut StateSnapshot,
    candidate: ArticleCandidate,
    now: DateTime<Utc>,
) -> Reconciled {
    let content_hash = fingerprint(&candidate.content);
    let url_hash = fingerprint(&candidate.url);
    let key = content_key(&url_hash);

    let previous_hash = state.article(&key).map(|a| a.content_hash.clone());
    let (outcome, change_type) = match &previous_hash {
        None => (Reconciled::New, ChangeKind::NewGuidance),
        Some(prev) if *prev != content_hash => (Reconciled::Updated, ChangeKind::ContentUpdated),
        Some(_) => {
            debug!(url = %candidate.url, %key, "Content unchanged");
            return Reconciled::Unchanged;
        }
    };

    let words = word_count(&candidate.content);
    let description = candidate
        .description
        .filter(|d| !d.trim().is_empty())
        .map(|d| excerpt(&d))
        .unwrap_or_else(|| excerpt(&candidate.content));

    let event = ChangeEvent {
        id: change_key(now, &url_hash),
        url: candidate.url.clone(),
        title: candidate.title.clone(),
        source: candidate.source.clone(),
        change_type,
        detected_at: now,
        previous_hash,
        new_hash: content_hash.clone(),
        acknowledged: false,
    };

    state.upsert_article(StoredArticle {
        id: key.clone(),
        url: candidate.url,
        title: candidate.title,
        source: candidate.source,
        content_type: candidate.content_type,
        published_date: candidate.published_date,
        fetched_at: now,
        content: candidate.content,
        content_hash,
        metadata: ArticleMetadata {
            word_count: words,
            reading_time: reading_time(words),
            description,
        },
        parent_url: candidate.parent_url,
    });

    let (url, change_type) = (event.url.clone(), event.change_type);
    let title = truncate_for_log(&event.title, 120);
    let change_id = state.record_change(event);
    info!(%url, %key, %change_id, change = ?change_type, %title, "Recorded change");
    outcome
}

/// Crawls pages of one source.
#[derive(Debug)]
pub struct Crawler<'a, F> {
    fetcher: &'a F,
    source: &'a Source,
    throttle: Throttle,
    max_depth: u32,
}

impl<'a, F: PageFetcher> Crawler<'a, F> {
    pub fn new(fetcher: &'a F, source: &'a Source, throttle: Throttle) -> Self {
        Self {
            fetcher,
            source,
            throttle,
            max_depth: source.subpages.as_ref().map_or(0, |r| r.max_depth),
        }
    }

    /// Override the sub-page depth limit; has no effect on sources without
    /// a sub-page rule.
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        if self.source.subpages.is_some() {
            self.max_depth = max_depth;
        }
        self
    }

    /// Crawl `target` and, where the source allows, its sub-pages.
    #[instrument(level = "info", skip_all, fields(source = %self.source.id, url = %target.url))]
    pub async fn crawl(&self, state: &mut StateSnapshot, target: CrawlTarget) -> CrawlStats {
        let mut stats = CrawlStats::default();
        let mut stack = vec![target];
        let mut first = true;

        while let Some(target) = stack.pop() {
            if !first {
                self.throttle.pause().await;
            }
            first = false;

            let Some((title, subpages)) = self.crawl_page(state, &target, &mut stats).await else {
                continue;
            };
            if target.depth >= self.max_depth || subpages.is_empty() {
                continue;
            }
            debug!(count = subpages.len(), depth = target.depth + 1, "Queueing sub-pages");
            // Reversed so pages pop in document order.
            for sub in subpages.into_iter().rev() {
                stack.push(CrawlTarget {
                    url: sub.url,
                    hints: ArticleHints {
                        title: Some(format!("{title} - {}", sub.title)),
                        date: None,
                        description: None,
                    },
                    depth: target.depth + 1,
                    parent_url: Some(target.url.clone()),
                });
            }
        }

        stats
    }

    /// Fetch and reconcile a single page. Returns its title and sub-page
    /// links when the page was new or updated.
    async fn crawl_page(
        &self,
        state: &mut StateSnapshot,
        target: &CrawlTarget,
        stats: &mut CrawlStats,
    ) -> Option<(String, Vec<SubpageLink>)> {
        let html = match self.fetcher.fetch_text(&target.url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(url = %target.url, error = %e, "Fetch failed; skipping");
                stats.failed += 1;
                return None;
            }
        };
        stats.fetched += 1;
        let now = Utc::now();

        let located = locate_content(&html, &target.url, self.source);
        if located.text.chars().count() < MIN_CONTENT_CHARS {
            debug!(url = %target.url, chars = located.text.chars().count(), "Content too short; not an article");
            stats.too_short += 1;
            return None;
        }

        let title = target
            .hints
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| extract_title(&html));
        let published_date = target
            .hints
            .date
            .clone()
            .or_else(|| parse_published_date(&html))
            .unwrap_or_else(|| now.format("%Y-%m-%d").to_string());

        let candidate = ArticleCandidate {
            url: target.url.clone(),
            title: title.clone(),
            source: self.source.id.clone(),
            content_type: if target.depth == 0 {
                ContentType::Article
            } else {
                ContentType::Chapter
            },
            published_date,
            content: located.text,
            description: target.hints.description.clone(),
            parent_url: target.parent_url.clone(),
        };

        match reconcile(state, candidate, now) {
            Reconciled::New => stats.new += 1,
            Reconciled::Updated => stats.updated += 1,
            Reconciled::Unchanged => {
                stats.unchanged += 1;
                return None;
            }
        }
        Some((title, located.subpages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::StaticFetcher;
    use crate::sources::builtin_sources;
    use tempfile::tempdir;

    fn source(id: &str) -> Source {
        builtin_sources()
            .unwrap()
            .into_iter()
            .find(|s| s.id == id)
            .unwrap()
    }

    fn article_page(title: &str, body: &str) -> String {
        format!(
            "<html><head><title>{title} | NICE</title>\
             <meta name=\"DC.date.issued\" content=\"2024-08-21\"></head>\
             <body><main><h1>{title}</h1><p>{body}</p></main></body></html>"
        )
    }

    const BODY: &str = "This guideline covers identifying and treating primary hypertension \
                        in people aged 18 and over, including people with type 2 diabetes.";

    fn crawler<'a>(fetcher: &'a StaticFetcher, source: &'a Source) -> Crawler<'a, StaticFetcher> {
        Crawler::new(fetcher, source, Throttle::new(Duration::ZERO))
    }

    #[tokio::test]
    async fn test_new_page_is_stored_with_one_event() {
        let dir = tempdir().unwrap();
        let mut state = StateSnapshot::load(dir.path()).await.unwrap();
        let url = "https://www.guidelinesinpractice.co.uk/cv/hypertension/1.article";
        let fetcher = StaticFetcher::new().with_page(url, &article_page("Hypertension", BODY));
        let gip = source("gip");

        let stats = crawler(&fetcher, &gip)
            .crawl(&mut state, CrawlTarget::top_level(url, ArticleHints::default()))
            .await;
        assert_eq!(stats.new, 1);

        let key = content_key(&fingerprint(url));
        let article = state.article(&key).unwrap();
        assert_eq!(article.title, "Hypertension");
        assert_eq!(article.source, "gip");
        assert_eq!(article.content_type, ContentType::Article);
        assert_eq!(article.published_date, "2024-08-21");
        assert_eq!(article.content_hash, fingerprint(&article.content));
        assert_eq!(article.metadata.word_count, word_count(&article.content));
        assert_eq!(article.metadata.reading_time, 1);

        let events: Vec<_> = state.changes.get().values().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].change_type, ChangeKind::NewGuidance);
        assert_eq!(events[0].previous_hash, None);
        assert!(!events[0].acknowledged);
        assert_eq!(state.config.get().unread_changes, 1);
    }

    #[tokio::test]
    async fn test_recrawl_of_unchanged_page_is_noop() {
        let dir = tempdir().unwrap();
        let mut state = StateSnapshot::load(dir.path()).await.unwrap();
        let url = "https://www.guidelinesinpractice.co.uk/cv/hypertension/1.article";
        let fetcher = StaticFetcher::new().with_page(url, &article_page("Hypertension", BODY));
        let gip = source("gip");
        let engine = crawler(&fetcher, &gip);

        engine
            .crawl(&mut state, CrawlTarget::top_level(url, ArticleHints::default()))
            .await;
        let articles_before = state.articles.get().clone();
        let changes_before = state.changes.get().clone();

        let stats = engine
            .crawl(&mut state, CrawlTarget::top_level(url, ArticleHints::default()))
            .await;
        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.changes(), 0);
        assert_eq!(state.articles.get(), &articles_before);
        assert_eq!(state.changes.get(), &changes_before);
        assert_eq!(state.config.get().unread_changes, 1);
    }

    #[tokio::test]
    async fn test_changed_content_records_update() {
        let dir = tempdir().unwrap();
        let mut state = StateSnapshot::load(dir.path()).await.unwrap();
        let url = "https://www.guidelinesinpractice.co.uk/cv/hypertension/1.article";
        let fetcher = StaticFetcher::new().with_page(url, &article_page("Hypertension", BODY));
        let gip = source("gip");
        let engine = crawler(&fetcher, &gip);

        engine
            .crawl(&mut state, CrawlTarget::top_level(url, ArticleHints::default()))
            .await;
        let key = content_key(&fingerprint(url));
        let first_hash = state.article(&key).unwrap().content_hash.clone();

        fetcher.set_page(
            url,
            &article_page("Hypertension", &format!("{BODY} Updated blood pressure targets.")),
        );
        let stats = engine
            .crawl(&mut state, CrawlTarget::top_level(url, ArticleHints::default()))
            .await;
        assert_eq!(stats.updated, 1);

        assert_eq!(state.articles.get().len(), 1);
        let article = state.article(&key).unwrap();
        assert_ne!(article.content_hash, first_hash);
        assert!(article.content.contains("Updated blood pressure targets."));

        let update = state
            .changes
            .get()
            .values()
            .find(|e| e.change_type == ChangeKind::ContentUpdated)
            .unwrap();
        assert_eq!(update.previous_hash.as_deref(), Some(first_hash.as_str()));
        assert_eq!(update.new_hash, article.content_hash);
        assert_eq!(state.changes.get().len(), 2);
        assert_eq!(state.config.get().unread_changes, 2);
    }

    #[tokio::test]
    async fn test_short_content_is_never_stored() {
        let dir = tempdir().unwrap();
        let mut state = StateSnapshot::load(dir.path()).await.unwrap();
        let url = "https://www.guidelinesinpractice.co.uk/cv/stub/2.article";
        let fetcher = StaticFetcher::new().with_page(url, "<html><body><p>Moved.</p></body></html>");
        let gip = source("gip");

        let stats = crawler(&fetcher, &gip)
            .crawl(&mut state, CrawlTarget::top_level(url, ArticleHints::default()))
            .await;
        assert_eq!(stats.too_short, 1);
        assert!(state.articles.get().is_empty());
        assert!(state.changes.get().is_empty());
        assert!(!state.articles.is_dirty());
        assert!(!state.config.is_dirty());
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_state_untouched() {
        let dir = tempdir().unwrap();
        let mut state = StateSnapshot::load(dir.path()).await.unwrap();
        let fetcher = StaticFetcher::new();
        let gip = source("gip");

        let stats = crawler(&fetcher, &gip)
            .crawl(
                &mut state,
                CrawlTarget::top_level("https://unreachable/", ArticleHints::default()),
            )
            .await;
        assert_eq!(stats.failed, 1);
        assert!(!state.articles.is_dirty());
        assert!(!state.changes.is_dirty());
    }

    #[tokio::test]
    async fn test_hints_take_precedence() {
        let dir = tempdir().unwrap();
        let mut state = StateSnapshot::load(dir.path()).await.unwrap();
        let url = "https://www.guidelinesinpractice.co.uk/cv/hypertension/1.article";
        let fetcher = StaticFetcher::new().with_page(url, &article_page("Page title", BODY));
        let gip = source("gip");
        let hints = ArticleHints {
            title: Some("Listing title".to_string()),
            date: Some("2025-03-07".to_string()),
            description: Some("Listing blurb".to_string()),
        };

        crawler(&fetcher, &gip)
            .crawl(&mut state, CrawlTarget::top_level(url, hints))
            .await;
        let article = state.article(&content_key(&fingerprint(url))).unwrap();
        assert_eq!(article.title, "Listing title");
        assert_eq!(article.published_date, "2025-03-07");
        assert_eq!(article.metadata.description, "Listing blurb");
    }

    fn nice_page(code: &str, body: &str) -> String {
        format!(
            "<html><head><title>Overview | Hypertension | NICE</title></head><body>\
             <nav><a href=\"/guidance/{code}/chapter/Recommendations\">Recommendations</a>\
             <a href=\"/guidance/{code}/chapter/Context\">Context</a></nav>\
             <div class=\"chapter\"><p>{body}</p></div></body></html>"
        )
    }

    #[tokio::test]
    async fn test_nice_subpages_are_crawled_one_level_deep() {
        let dir = tempdir().unwrap();
        let mut state = StateSnapshot::load(dir.path()).await.unwrap();
        let base = "https://www.nice.org.uk/guidance/ng136";
        let recs = format!("{base}/chapter/Recommendations");
        let context = format!("{base}/chapter/Context");
        let fetcher = StaticFetcher::new()
            .with_page(base, &nice_page("ng136", BODY))
            .with_page(&recs, &nice_page("ng136", &format!("Recommendations. {BODY}")))
            .with_page(&context, &nice_page("ng136", &format!("Context. {BODY}")));
        let nice = source("nice");

        let hints = ArticleHints {
            title: Some("Hypertension in adults".to_string()),
            ..ArticleHints::default()
        };
        let stats = crawler(&fetcher, &nice)
            .crawl(&mut state, CrawlTarget::top_level(base, hints))
            .await;

        assert_eq!(stats.new, 3);
        assert_eq!(fetcher.requests.borrow().as_slice(), &[base.to_string(), recs.clone(), context.clone()]);

        let chapter = state.article(&content_key(&fingerprint(&recs))).unwrap();
        assert_eq!(chapter.title, "Hypertension in adults - Recommendations");
        assert_eq!(chapter.content_type, ContentType::Chapter);
        assert_eq!(chapter.parent_url.as_deref(), Some(base));
        assert_eq!(state.changes.get().len(), 3);
    }

    #[tokio::test]
    async fn test_unchanged_parent_does_not_revisit_subpages() {
        let dir = tempdir().unwrap();
        let mut state = StateSnapshot::load(dir.path()).await.unwrap();
        let base = "https://www.nice.org.uk/guidance/ng136";
        let recs = format!("{base}/chapter/Recommendations");
        let context = format!("{base}/chapter/Context");
        let fetcher = StaticFetcher::new()
            .with_page(base, &nice_page("ng136", BODY))
            .with_page(&recs, &nice_page("ng136", &format!("Recommendations. {BODY}")))
            .with_page(&context, &nice_page("ng136", &format!("Context. {BODY}")));
        let nice = source("nice");
        let engine = crawler(&fetcher, &nice);

        engine
            .crawl(&mut state, CrawlTarget::top_level(base, ArticleHints::default()))
            .await;
        let stats = engine
            .crawl(&mut state, CrawlTarget::top_level(base, ArticleHints::default()))
            .await;

        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.fetched, 1);
        assert_eq!(fetcher.request_count(&recs), 1);
    }

    #[tokio::test]
    async fn test_max_depth_zero_disables_subpages() {
        let dir = tempdir().unwrap();
        let mut state = StateSnapshot::load(dir.path()).await.unwrap();
        let base = "https://www.nice.org.uk/guidance/ng136";
        let fetcher = StaticFetcher::new().with_page(base, &nice_page("ng136", BODY));
        let nice = source("nice");

        let stats = crawler(&fetcher, &nice)
            .with_max_depth(0)
            .crawl(&mut state, CrawlTarget::top_level(base, ArticleHints::default()))
            .await;
        assert_eq!(stats.fetched, 1);
        assert_eq!(stats.new, 1);
    }

    #[tokio::test]
    async fn test_reconcile_classifies_transitions() {
        let dir = tempdir().unwrap();
        let mut state = StateSnapshot::load(dir.path()).await.unwrap();

        let candidate = |content: &str| ArticleCandidate {
            url: "https://x/a".to_string(),
            title: "A".to_string(),
            source: "nice".to_string(),
            content_type: ContentType::Article,
            published_date: "2025-01-01".to_string(),
            content: content.to_string(),
            description: None,
            parent_url: None,
        };
        let now = Utc::now();
        assert_eq!(reconcile(&mut state, candidate("one"), now), Reconciled::New);
        assert_eq!(reconcile(&mut state, candidate("one"), now), Reconciled::Unchanged);
        let later = now + chrono::Duration::milliseconds(5);
        assert_eq!(reconcile(&mut state, candidate("two"), later), Reconciled::Updated);
        assert_eq!(state.changes.get().len(), 2);
    }
}
