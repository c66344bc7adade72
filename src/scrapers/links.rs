//! Article link discovery on HTML listing pages.
//!
//! Anchors are found with a regex scan rather than a DOM walk so that each
//! match keeps its byte offset in the listing HTML; the date-window
//! heuristic needs that offset.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use url::Url;

use crate::scrapers::html::inline_text;
use crate::sources::ListingRule;
use crate::utils::slug_title;

static ANCHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*?\bhref\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a\s*>"#)
        .expect("anchor pattern is valid")
});

static LOOSE_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").expect("date pattern is valid")
});

/// Characters (not bytes) scanned on each side of a link for a date token.
pub const DATE_WINDOW: usize = 500;

/// Anchor text shorter than this falls back to a slug title.
const MIN_TITLE_CHARS: usize = 3;

/// One `<a href>` occurrence in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor<'a> {
    pub href: &'a str,
    pub inner_html: &'a str,
    /// Byte offset of the `<a` in the document.
    pub start: usize,
}

/// All anchors in document order.
pub fn anchors(html: &str) -> impl Iterator<Item = Anchor<'_>> {
    ANCHOR.captures_iter(html).filter_map(|caps| {
        let whole = caps.get(0)?;
        Some(Anchor {
            href: caps.get(1)?.as_str(),
            inner_html: caps.get(2).map(|m| m.as_str()).unwrap_or_default(),
            start: whole.start(),
        })
    })
}

/// A candidate article found on a listing page or in a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredLink {
    /// Stable identifier used for de-duplication within one scan.
    pub id: String,
    pub url: String,
    pub title: String,
    /// `YYYY-MM-DD` when the listing or feed provided one.
    pub date: Option<String>,
    pub description: String,
}

/// Resolve `href` against `base`, dropping any fragment.
pub fn resolve(base: &Url, href: &str) -> Option<Url> {
    let mut url = base.join(href.trim()).ok()?;
    url.set_fragment(None);
    Some(url)
}

/// Title from the last non-numeric path segment of `url`.
fn title_from_path(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| {
            segments
                .filter(|s| !s.is_empty())
                .map(|s| s.trim_end_matches(".article"))
                .filter(|s| !s.chars().all(|c| c.is_ascii_digit()))
                .last()
        })
        .map(slug_title)
        .unwrap_or_default()
}

fn floor_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// First `d/m/yyyy` token within [`DATE_WINDOW`] characters either side of
/// `position` (a byte offset), as `YYYY-MM-DD`.
///
/// This is proximity, not structure: a date belonging to a neighbouring
/// listing entry can be attached if it is closer than the link's own.
pub fn date_near(html: &str, position: usize) -> Option<String> {
    let position = floor_boundary(html, position);
    let start = html[..position]
        .char_indices()
        .rev()
        .nth(DATE_WINDOW - 1)
        .map_or(0, |(i, _)| i);
    let end = html[position..]
        .char_indices()
        .nth(DATE_WINDOW)
        .map_or(html.len(), |(i, _)| position + i);
    LOOSE_DATE.captures(&html[start..end]).and_then(|caps| {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        if !(1..=31).contains(&day) || !(1..=12).contains(&month) {
            return None;
        }
        Some(format!("{}-{month:02}-{day:02}", &caps[3]))
    })
}

/// Scan a listing page for article links matching `rule`.
///
/// Links are de-duplicated by the pattern's `id` group (first occurrence
/// wins) and returned in document order.
pub fn discover_links(html: &str, base: &Url, rule: &ListingRule) -> Vec<DiscoveredLink> {
    let mut seen_ids = HashSet::new();
    let mut links = Vec::new();

    for anchor in anchors(html) {
        let Some(caps) = rule.link_pattern.captures(anchor.href.trim()) else {
            continue;
        };
        let Some(id) = caps.name("id").map(|m| m.as_str().to_ascii_lowercase()) else {
            continue;
        };
        if !seen_ids.insert(id.clone()) {
            continue;
        }
        let Some(url) = resolve(base, anchor.href) else {
            debug!(href = anchor.href, "Unresolvable listing link");
            continue;
        };

        let mut title = inline_text(anchor.inner_html);
        if title.chars().count() < MIN_TITLE_CHARS {
            title = title_from_path(&url);
        }
        let date = if rule.date_window {
            date_near(html, anchor.start)
        } else {
            None
        };

        links.push(DiscoveredLink {
            id,
            url: url.to_string(),
            title,
            date,
            description: String::new(),
        });
    }

    debug!(count = links.len(), listing = %rule.url, "Discovered listing links");
    links
}
