//! Main-content location for crawled pages.
//!
//! Containers are tried in a fixed order: the source's own patterns, then
//! the generic `<main>`/`<article>` patterns, then `<body>`, then the raw
//! document. A container only wins when its inner HTML is longer than
//! [`MIN_CONTAINER_LEN`], so an empty wrapper cannot shadow the real body.
//!
//! Source patterns match an opening tag only; the container ends at the
//! closing tag that balances it, so sibling blocks after it stay out of the
//! fingerprint.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::scrapers::html::{clean_html, inline_text};
use crate::scrapers::links::{anchors, resolve};
use crate::sources::Source;
use crate::utils::slug_title;

/// Inner HTML length a container must exceed to be accepted.
pub const MIN_CONTAINER_LEN: usize = 100;

static GENERIC_CONTAINERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?is)<main\b[^>]*>(.*?)</main\s*>",
        r"(?is)<article\b[^>]*>(.*?)</article\s*>",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("container pattern is valid"))
    .collect()
});

static BODY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<body\b[^>]*>(.*)</body\s*>").expect("body pattern is valid"));

/// A child page linked from a crawled article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubpageLink {
    pub url: String,
    pub title: String,
}

/// What the locator found on one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedContent {
    /// Normalized text of the chosen container.
    pub text: String,
    pub subpages: Vec<SubpageLink>,
}

static TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<(/?)([a-z][a-z0-9]*)\b[^>]*?(/?)>").expect("tag pattern is valid")
});

/// Inner HTML of the element opened by `open`, up to its balancing closing
/// tag, or to the end of the document when it is never closed.
fn element_inner<'a>(html: &'a str, open: regex::Match<'a>) -> &'a str {
    let body_start = open.end();
    let Some(name) = TAG.captures(open.as_str()).map(|c| c[2].to_ascii_lowercase()) else {
        return &html[body_start..];
    };

    let mut depth = 0usize;
    for caps in TAG.captures_iter(&html[body_start..]) {
        if !caps[2].eq_ignore_ascii_case(&name) || !caps[3].is_empty() {
            continue;
        }
        if caps[1].is_empty() {
            depth += 1;
        } else if depth == 0 {
            let close = caps.get(0).map_or(0, |m| m.start());
            return &html[body_start..body_start + close];
        } else {
            depth -= 1;
        }
    }
    &html[body_start..]
}

fn first_element<'a>(html: &'a str, openings: &[Regex]) -> Option<&'a str> {
    openings.iter().find_map(|pattern| {
        pattern
            .find(html)
            .map(|open| element_inner(html, open))
            .filter(|inner| inner.len() > MIN_CONTAINER_LEN)
    })
}

fn first_container<'a>(html: &'a str, patterns: &[Regex]) -> Option<&'a str> {
    patterns.iter().find_map(|pattern| {
        pattern
            .captures(html)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .filter(|inner| inner.len() > MIN_CONTAINER_LEN)
    })
}

/// Raw HTML of the best content container.
pub fn select_container<'a>(html: &'a str, source: &Source) -> &'a str {
    first_element(html, &source.content_patterns)
        .or_else(|| first_container(html, &GENERIC_CONTAINERS))
        .or_else(|| BODY.captures(html).and_then(|c| c.get(1)).map(|m| m.as_str()))
        .unwrap_or(html)
}

/// Sub-page links on `html` for sources with a sub-page rule.
///
/// Read from the raw document because chapter navigation usually sits in
/// markup that [`clean_html`] removes.
pub fn find_subpages(html: &str, page_url: &str, source: &Source) -> Vec<SubpageLink> {
    let Some(rule) = &source.subpages else {
        return Vec::new();
    };
    let Ok(base) = Url::parse(page_url) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    seen.insert(base.as_str().to_string());

    let mut found = Vec::new();
    for anchor in anchors(html) {
        if !rule.link_pattern.is_match(anchor.href.trim()) {
            continue;
        }
        let Some(url) = resolve(&base, anchor.href) else {
            continue;
        };
        if !seen.insert(url.to_string()) {
            continue;
        }
        let mut title = inline_text(anchor.inner_html);
        if title.is_empty() {
            title = url
                .path_segments()
                .and_then(|mut s| s.next_back())
                .map(slug_title)
                .unwrap_or_default();
        }
        found.push(SubpageLink {
            url: url.to_string(),
            title,
        });
    }
    found
}

/// Locate and normalize the main content of a page.
pub fn locate_content(html: &str, page_url: &str, source: &Source) -> LocatedContent {
    LocatedContent {
        text: clean_html(select_container(html, source)),
        subpages: find_subpages(html, page_url, source),
    }
}
