//! Markup-to-text normalization and page metadata lookups.
//!
//! [`clean_html`] output feeds the content fingerprint, so every step here is
//! part of the stored-data contract: changing the tag lists, the entity
//! table or the step order changes every fingerprint and makes the next run
//! report every stored article as updated.
//!
//! Title and date lookups go through `scraper`, since their results never
//! reach the fingerprint.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use scraper::{Html, Selector};

/// Elements dropped together with everything inside them.
const BOILERPLATE_TAGS: [&str; 7] = [
    "script", "style", "nav", "header", "footer", "aside", "noscript",
];

static BOILERPLATE_BLOCKS: Lazy<Vec<Regex>> = Lazy::new(|| {
    BOILERPLATE_TAGS
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>"))
                .expect("boilerplate pattern is valid")
        })
        .collect()
});

static BLOCK_BREAKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)</(?:p|div|h[1-6]|li|tr|section|article|blockquote|table|ul|ol|dd|dt|pre)\s*>|<br\s*/?>",
    )
    .expect("block break pattern is valid")
});

static ANY_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"));

static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z][a-zA-Z0-9]*);")
        .expect("entity pattern is valid")
});

static HORIZONTAL_WS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t\r\x0B\x0C]+").expect("whitespace pattern is valid"));

static LEADING_WS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]+").expect("leading whitespace pattern is valid"));

static EXTRA_NEWLINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("newline pattern is valid"));

static SITE_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\s+[|\-–—]\s+(?:nice|gov\.uk|nhs england|nhs|ukhsa|guidelines in practice|mhra)\s*$",
    )
    .expect("site suffix pattern is valid")
});

static TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("title").expect("title selector is valid"));
static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").expect("h1 selector is valid"));
static META: Lazy<Selector> =
    Lazy::new(|| Selector::parse("meta").expect("meta selector is valid"));
static TIME: Lazy<Selector> =
    Lazy::new(|| Selector::parse("time[datetime]").expect("time selector is valid"));

/// `name`/`property` values of meta tags that carry a publication date.
const DATE_META_KEYS: [&str; 8] = [
    "article:published_time",
    "dc.date.issued",
    "dcterms.issued",
    "dc.date",
    "date",
    "citation_publication_date",
    "og:published_time",
    "published_date",
];

/// Title used when a page has neither `<title>` nor `<h1>`.
pub const UNTITLED: &str = "Untitled";

fn decode_entity(entity: &str) -> &'static str {
    match entity {
        "nbsp" | "#160" => " ",
        "amp" | "#38" => "&",
        "lt" | "#60" => "<",
        "gt" | "#62" => ">",
        "quot" | "#34" => "\"",
        "apos" | "#39" | "#x27" => "'",
        "rsquo" | "lsquo" | "#8217" | "#8216" => "'",
        "rdquo" | "ldquo" | "#8221" | "#8220" => "\"",
        "ndash" | "#8211" => "–",
        "mdash" | "#8212" => "—",
        "hellip" | "#8230" => "…",
        "bull" | "#8226" => "•",
        "pound" | "#163" => "£",
        "copy" | "#169" => "©",
        _ => "",
    }
}

/// Decode the fixed entity table in one pass; unknown entities become empty.
pub fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &Captures| decode_entity(&caps[1]))
        .into_owned()
}

/// Convert raw HTML into normalized visible text.
///
/// Boilerplate blocks are removed with their content, block-level closing
/// tags and `<br>` become newlines, the remaining tags are stripped, entities
/// are decoded, and whitespace is normalized (single spaces, no leading
/// indentation, at most one blank line, trimmed ends).
pub fn clean_html(html: &str) -> String {
    let mut text = html.to_string();
    for block in BOILERPLATE_BLOCKS.iter() {
        text = block.replace_all(&text, "").into_owned();
    }
    let text = BLOCK_BREAKS.replace_all(&text, "\n");
    let text = ANY_TAG.replace_all(&text, "");
    let text = decode_entities(&text);
    let text = HORIZONTAL_WS.replace_all(&text, " ");
    let text = LEADING_WS.replace_all(&text, "");
    let text = EXTRA_NEWLINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Single-line text of an inline fragment such as an anchor body.
pub fn inline_text(fragment: &str) -> String {
    clean_html(fragment)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .map(|el| {
            el.text()
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|t| !t.is_empty())
}

/// Page title: `<title>` without a known site-name suffix, else the first
/// `<h1>`, else [`UNTITLED`].
pub fn extract_title(html: &str) -> String {
    let document = Html::parse_document(html);
    if let Some(title) = first_text(&document, &TITLE) {
        let stripped = SITE_SUFFIX.replace(&title, "").trim().to_string();
        if !stripped.is_empty() {
            return stripped;
        }
    }
    first_text(&document, &H1).unwrap_or_else(|| UNTITLED.to_string())
}

/// Keep the date portion of an ISO-8601 value.
fn date_portion(value: &str) -> Option<String> {
    let date: String = value
        .trim()
        .split('T')
        .next()
        .unwrap_or_default()
        .chars()
        .take(10)
        .collect();
    (!date.is_empty()).then_some(date)
}

/// Publication date (`YYYY-MM-DD`) from meta tags or a `<time datetime>`.
///
/// Returns `None` when the page carries neither; callers fall back to the
/// fetch date.
pub fn parse_published_date(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    let from_meta = document.select(&META).find_map(|el| {
        let attrs = el.value();
        let key = attrs.attr("name").or_else(|| attrs.attr("property"))?;
        if !DATE_META_KEYS.contains(&key.to_ascii_lowercase().as_str()) {
            return None;
        }
        attrs.attr("content").and_then(date_portion)
    });
    if from_meta.is_some() {
        return from_meta;
    }

    document
        .select(&TIME)
        .find_map(|el| el.value().attr("datetime").and_then(date_portion))
}
