//! RSS 2.0 and Atom feed parsing.
//!
//! Feeds are read with `quick-xml` in non-strict mode. Each `<item>` or
//! `<entry>` becomes a [`DiscoveredLink`] whose `description` holds the raw
//! (possibly HTML) summary; the caller normalizes it. Items without a title
//! or link are dropped, repeated links keep their first item, and a document
//! that stops parsing part-way yields the items read up to that point.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, warn};

use crate::scrapers::html::inline_text;
use crate::scrapers::links::DiscoveredLink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedField {
    Title,
    Link,
    Date,
    Description,
    Content,
}

impl FeedField {
    fn from_local_name(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(FeedField::Title),
            b"link" => Some(FeedField::Link),
            b"pubDate" | b"published" | b"updated" | b"date" => Some(FeedField::Date),
            b"description" | b"summary" => Some(FeedField::Description),
            b"content" | b"encoded" => Some(FeedField::Content),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct ItemBuilder {
    title: String,
    link: String,
    date: String,
    description: String,
    content: String,
}

impl ItemBuilder {
    fn buffer(&mut self, field: FeedField) -> &mut String {
        match field {
            FeedField::Title => &mut self.title,
            FeedField::Link => &mut self.link,
            FeedField::Date => &mut self.date,
            FeedField::Description => &mut self.description,
            FeedField::Content => &mut self.content,
        }
    }

    fn finish(self) -> Option<DiscoveredLink> {
        let title = inline_text(&self.title);
        let link = self.link.trim().to_string();
        if title.is_empty() || link.is_empty() {
            return None;
        }
        let description = if self.description.trim().is_empty() {
            self.content
        } else {
            self.description
        };
        Some(DiscoveredLink {
            id: link.clone(),
            url: link,
            title,
            date: normalize_feed_date(&self.date),
            description: description.trim().to_string(),
        })
    }
}

/// Resolve the five predefined XML entities and numeric character
/// references; anything else is left for the HTML layer.
fn xml_unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match tail.find(';') {
            Some(semi) if semi > 1 => {
                push_reference(&mut out, &tail[1..semi]);
                rest = &tail[semi + 1..];
            }
            _ => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn push_reference(out: &mut String, name: &str) {
    let resolved = match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => name.strip_prefix('#').and_then(|num| {
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)
        }),
    };
    match resolved {
        Some(c) => out.push(c),
        None => {
            out.push('&');
            out.push_str(name);
            out.push(';');
        }
    }
}

/// `YYYY-MM-DD` from an RFC 2822 (`pubDate`) or RFC 3339 (Atom) value.
pub fn normalize_feed_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.format("%Y-%m-%d").to_string());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.format("%Y-%m-%d").to_string());
    }
    let head: String = raw.chars().take(10).collect();
    NaiveDate::parse_from_str(&head, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

fn local_name_is(e: &BytesStart<'_>, names: &[&[u8]]) -> bool {
    let local = e.local_name();
    names.contains(&local.as_ref())
}

/// Atom `<link href>` if it is the entry's alternate link.
fn atom_href(e: &BytesStart<'_>) -> Option<String> {
    let mut href = None;
    let mut rel_ok = true;
    for attr in e.attributes().flatten() {
        let value = String::from_utf8_lossy(&attr.value).into_owned();
        match attr.key.local_name().as_ref() {
            b"href" => href = Some(xml_unescape(&value)),
            b"rel" => rel_ok = value == "alternate",
            _ => {}
        }
    }
    href.filter(|_| rel_ok)
}

/// Parse the items of an RSS or Atom document.
pub fn parse_feed(xml: &str) -> Vec<DiscoveredLink> {
    let mut reader = Reader::from_str(xml);
    // Text is not trimmed per event: entity references split text events and
    // trimming each piece would eat the spaces around them.
    reader.config_mut().check_end_names = false;

    let mut items = Vec::new();
    let mut links = HashSet::new();
    let mut current: Option<ItemBuilder> = None;
    let mut field: Option<FeedField> = None;
    let mut nested = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if field.is_some() {
                    nested += 1;
                } else if local_name_is(&e, &[b"item", b"entry"]) {
                    current = Some(ItemBuilder::default());
                } else if let Some(item) = current.as_mut() {
                    field = FeedField::from_local_name(e.local_name().as_ref());
                    // A non-empty Atom `<link href>`; its text is not the URL.
                    if field == Some(FeedField::Link) && item.link.is_empty() {
                        if let Some(href) = atom_href(&e) {
                            item.link = href;
                            field = None;
                        }
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                if let (Some(item), None) = (current.as_mut(), field) {
                    if local_name_is(&e, &[b"link"]) && item.link.is_empty() {
                        if let Some(href) = atom_href(&e) {
                            item.link = href;
                        }
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    item.buffer(f).push_str(&xml_unescape(&String::from_utf8_lossy(&t)));
                }
            }
            Ok(Event::CData(c)) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    item.buffer(f).push_str(&String::from_utf8_lossy(&c));
                }
            }
            Ok(Event::GeneralRef(r)) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    push_reference(item.buffer(f), &String::from_utf8_lossy(&r));
                }
            }
            Ok(Event::End(e)) => {
                if field.is_some() {
                    if nested > 0 {
                        nested -= 1;
                    } else {
                        field = None;
                    }
                } else if matches!(e.local_name().as_ref(), b"item" | b"entry") {
                    if let Some(item) = current.take().and_then(ItemBuilder::finish) {
                        if links.insert(item.url.clone()) {
                            items.push(item);
                        } else {
                            debug!(url = %item.url, "Repeated feed link; keeping first item");
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(
                    error = %e,
                    position = reader.buffer_position(),
                    parsed = items.len(),
                    "Feed parse stopped early"
                );
                break;
            }
        }
    }

    debug!(count = items.len(), "Parsed feed items");
    items
}
