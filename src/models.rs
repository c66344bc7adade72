//! Persisted document shapes.
//!
//! Every struct here is written to one of the five JSON documents in the data
//! directory and read back by the static dashboard, so field names are
//! serialized in camelCase and must stay stable:
//!
//! | Document | Type | Key |
//! |----------|------|-----|
//! | `guidance.json` | [`StoredArticle`] | `content:<url fingerprint>` |
//! | `changes.json` | [`ChangeEvent`] | `change:<epoch millis>:<url fingerprint>` |
//! | `seen.json` | [`SeenEntry`] | `<source>:<url fingerprint>` |
//! | `page-hashes.json` | [`PageFingerprint`] | logical page name |
//! | `config.json` | [`RunConfig`] | whole document |

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of every [`StoredArticle`] key.
pub const CONTENT_KEY_PREFIX: &str = "content:";

/// Prefix of every [`ChangeEvent`] key.
pub const CHANGE_KEY_PREFIX: &str = "change:";

/// Whether an article was reached from a listing/feed or as a sub-page of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Article,
    Chapter,
}

/// Derived figures the dashboard shows next to each article.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleMetadata {
    pub word_count: usize,
    /// Estimated minutes, `ceil(word_count / 250)`.
    pub reading_time: usize,
    pub description: String,
}

/// The current version of a crawled page or feed item.
///
/// Only the latest content is kept; a change overwrites the entry in place.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredArticle {
    pub id: String,
    pub url: String,
    pub title: String,
    pub source: String,
    pub content_type: ContentType,
    /// `YYYY-MM-DD`; the fetch date when the page carries none.
    pub published_date: String,
    pub fetched_at: DateTime<Utc>,
    pub content: String,
    pub content_hash: String,
    pub metadata: ArticleMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_url: Option<String>,
}

/// Kind of transition recorded by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    NewGuidance,
    ContentUpdated,
}

/// One detected transition of a [`StoredArticle`]. Never rewritten once appended.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub id: String,
    pub url: String,
    pub title: String,
    pub source: String,
    pub change_type: ChangeKind,
    pub detected_at: DateTime<Utc>,
    pub previous_hash: Option<String>,
    pub new_hash: String,
    pub acknowledged: bool,
}

/// Marks a link as evaluated so later runs skip it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenEntry {
    pub url: String,
    pub source: String,
    #[serde(default)]
    pub title: String,
    pub first_seen: DateTime<Utc>,
}

/// Cached fingerprint of a listing page's article-URL set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageFingerprint {
    pub hash: String,
    pub last_checked: DateTime<Utc>,
    pub last_changed: DateTime<Utc>,
    pub article_count: usize,
    #[serde(default)]
    pub new_links: usize,
}

/// Per-source overrides kept in `config.json`.
///
/// Every field is optional so a hand-edited config only needs to name what
/// it changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_keywords: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_keywords: Option<Vec<String>>,
}

/// Run-level configuration and statistics (`config.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    #[serde(default)]
    pub sources: BTreeMap<String, SourceSettings>,
    #[serde(default)]
    pub unread_changes: u64,
    /// Job name (`guidance`, `news`) to the time that job last finished.
    #[serde(default)]
    pub last_run: BTreeMap<String, DateTime<Utc>>,
    /// Source id to the number of change events its last run produced.
    #[serde(default)]
    pub last_results: BTreeMap<String, usize>,
}

impl RunConfig {
    /// Sources are on unless explicitly disabled.
    pub fn is_enabled(&self, source_id: &str) -> bool {
        self.sources
            .get(source_id)
            .and_then(|s| s.enabled)
            .unwrap_or(true)
    }

    pub fn source(&self, source_id: &str) -> Option<&SourceSettings> {
        self.sources.get(source_id)
    }
}

/// Storage key of the article at `url`.
pub fn content_key(url_fingerprint: &str) -> String {
    format!("{CONTENT_KEY_PREFIX}{url_fingerprint}")
}

/// Storage key of a change event detected at `at`.
pub fn change_key(at: DateTime<Utc>, url_fingerprint: &str) -> String {
    format!(
        "{CHANGE_KEY_PREFIX}{}:{url_fingerprint}",
        at.timestamp_millis()
    )
}

/// Seen-marker key for `url_fingerprint` within `source_id`.
pub fn seen_key(source_id: &str, url_fingerprint: &str) -> String {
    format!("{source_id}:{url_fingerprint}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_article() -> StoredArticle {
        StoredArticle {
            id: "content:abc".to_string(),
            url: "https://example.org/guidance/ng1".to_string(),
            title: "Example".to_string(),
            source: "nice".to_string(),
            content_type: ContentType::Article,
            published_date: "2025-05-06".to_string(),
            fetched_at: DateTime::parse_from_rfc3339("2025-05-06T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            content: "Body".to_string(),
            content_hash: "0123456789abcdef".to_string(),
            metadata: ArticleMetadata {
                word_count: 1,
                reading_time: 1,
                description: "Body".to_string(),
            },
            parent_url: None,
        }
    }

    #[test]
    fn test_article_serializes_dashboard_field_names() {
        let json = serde_json::to_value(sample_article()).unwrap();
        assert_eq!(json["contentHash"], "0123456789abcdef");
        assert_eq!(json["metadata"]["wordCount"], 1);
        assert_eq!(json["metadata"]["readingTime"], 1);
        assert_eq!(json["contentType"], "article");
        assert_eq!(json["publishedDate"], "2025-05-06");
        assert!(json.get("parentUrl").is_none());
    }

    #[test]
    fn test_change_event_serialization() {
        let event = ChangeEvent {
            id: "change:1:abc".to_string(),
            url: "https://x/ckd".to_string(),
            title: "New CKD Pathway".to_string(),
            source: "ukhsa-blog".to_string(),
            change_type: ChangeKind::NewGuidance,
            detected_at: Utc::now(),
            previous_hash: None,
            new_hash: "ffff".to_string(),
            acknowledged: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["changeType"], "new_guidance");
        assert_eq!(json["acknowledged"], false);
        assert!(json["previousHash"].is_null());

        let back: ChangeEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_content_updated_kind_name() {
        let json = serde_json::to_string(&ChangeKind::ContentUpdated).unwrap();
        assert_eq!(json, "\"content_updated\"");
    }

    #[test]
    fn test_run_config_defaults_to_enabled() {
        let config: RunConfig = serde_json::from_str("{}").unwrap();
        assert!(config.is_enabled("nice"));
        assert_eq!(config.unread_changes, 0);
    }

    #[test]
    fn test_run_config_explicit_disable() {
        let json = r#"{
            "sources": {
                "nice": { "enabled": false },
                "gip": { "includeKeywords": ["diabetes"] }
            }
        }"#;
        let config: RunConfig = serde_json::from_str(json).unwrap();
        assert!(!config.is_enabled("nice"));
        assert!(config.is_enabled("gip"));
        assert_eq!(
            config.source("gip").and_then(|s| s.include_keywords.clone()),
            Some(vec!["diabetes".to_string()])
        );
    }

    #[test]
    fn test_keys() {
        assert_eq!(content_key("abc"), "content:abc");
        assert_eq!(seen_key("nice", "abc"), "nice:abc");
        let at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(change_key(at, "abc"), "change:1700000000123:abc");
    }
}
