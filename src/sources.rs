//! Built-in catalogue of polled sources.
//!
//! | Id | Job | Entry point | Notes |
//! |----|-----|-------------|-------|
//! | `nice` | guidance | listing page | guidance-code paths, chapter sub-pages, listing fingerprint |
//! | `gip` | guidance | listing page | numeric article ids, `dd/mm/yyyy` date window |
//! | `ukhsa-blog` | news | RSS feed | keyword filtered |
//! | `mhra-dsu` | news | Atom feed | |
//!
//! Each source carries its own link pattern (with an `id` capture group used
//! for de-duplication), its ordered content container patterns, its default
//! keyword lists and its inter-request delay.

use std::fmt;
use std::time::Duration;

use regex::Regex;

/// A named group of sources polled together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Guidance,
    News,
}

impl Job {
    pub fn as_str(&self) -> &'static str {
        match self {
            Job::Guidance => "guidance",
            Job::News => "news",
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How article links are found on a listing page.
#[derive(Debug, Clone)]
pub struct ListingRule {
    pub url: String,
    /// Matched against each anchor `href`; must define an `id` group.
    pub link_pattern: Regex,
    /// Key in `page-hashes.json` when the listing short-circuit is on.
    pub page_name: Option<String>,
    /// Attach a nearby `dd/mm/yyyy` token as the date hint.
    pub date_window: bool,
}

/// Sub-pages followed from a crawled article.
#[derive(Debug, Clone)]
pub struct SubpageRule {
    pub link_pattern: Regex,
    pub max_depth: u32,
}

#[derive(Debug, Clone)]
pub enum SourceKind {
    Listing(ListingRule),
    Feed { url: String },
}

#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub job: Job,
    pub kind: SourceKind,
    /// Pause after every outbound article or sub-page request.
    pub delay: Duration,
    /// Opening tags of source-specific containers, most specific first. The
    /// container runs to the matching closing tag.
    pub content_patterns: Vec<Regex>,
    pub subpages: Option<SubpageRule>,
    pub default_include: Vec<String>,
    pub default_exclude: Vec<String>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn nice() -> Result<Source, regex::Error> {
    Ok(Source {
        id: "nice".to_string(),
        name: "NICE published guidance".to_string(),
        job: Job::Guidance,
        kind: SourceKind::Listing(ListingRule {
            url: "https://www.nice.org.uk/guidance/published?ps=100".to_string(),
            link_pattern: Regex::new(
                r"(?i)^(?:https?://www\.nice\.org\.uk)?/guidance/(?P<id>(?:ng|cg|qs|ta|ph|dg|ipg|mtg|hst|nm)\d+)/?(?:[?#].*)?$",
            )?,
            page_name: Some("nice-published".to_string()),
            date_window: false,
        }),
        delay: Duration::from_millis(1000),
        content_patterns: vec![
            Regex::new(r#"(?i)<div[^>]*\bclass="[^"]*\bchapter\b[^"]*"[^>]*>"#)?,
            Regex::new(r#"(?i)<div[^>]*\bid="content-start"[^>]*>"#)?,
        ],
        subpages: Some(SubpageRule {
            link_pattern: Regex::new(
                r"(?i)^(?:https?://www\.nice\.org\.uk)?/guidance/[a-z]+\d+/chapter/[^?#]+$",
            )?,
            max_depth: 1,
        }),
        default_include: Vec::new(),
        default_exclude: words(&["terminated appraisal", "withdrawn"]),
    })
}

fn guidelines_in_practice() -> Result<Source, regex::Error> {
    Ok(Source {
        id: "gip".to_string(),
        name: "Guidelines in Practice".to_string(),
        job: Job::Guidance,
        kind: SourceKind::Listing(ListingRule {
            url: "https://www.guidelinesinpractice.co.uk/clinical-summaries".to_string(),
            link_pattern: Regex::new(
                r"(?i)^(?:https?://www\.guidelinesinpractice\.co\.uk)?/[a-z0-9_-]+/[a-z0-9_%-]+/(?P<id>\d+)\.article$",
            )?,
            page_name: None,
            date_window: true,
        }),
        delay: Duration::from_millis(500),
        content_patterns: vec![
            Regex::new(r#"(?i)<div[^>]*\bclass="[^"]*\barticle-body\b[^"]*"[^>]*>"#)?,
            Regex::new(r#"(?i)<div[^>]*\bclass="[^"]*\bstorytext\b[^"]*"[^>]*>"#)?,
        ],
        subpages: None,
        default_include: Vec::new(),
        default_exclude: words(&["sponsored", "webinar", "podcast", "advertorial"]),
    })
}

fn ukhsa_blog() -> Source {
    Source {
        id: "ukhsa-blog".to_string(),
        name: "UKHSA blog".to_string(),
        job: Job::News,
        kind: SourceKind::Feed {
            url: "https://ukhsa.blog.gov.uk/feed/".to_string(),
        },
        // Feed items are reconciled from the feed payload; no per-item requests.
        delay: Duration::ZERO,
        content_patterns: Vec::new(),
        subpages: None,
        default_include: words(&[
            "vaccin",
            "immunisation",
            "outbreak",
            "screening",
            "infection",
            "guidance",
            "antimicrobial",
        ]),
        default_exclude: words(&["vacancy", "vacancies", "recruitment", "job opportunit"]),
    }
}

fn mhra_drug_safety() -> Source {
    Source {
        id: "mhra-dsu".to_string(),
        name: "MHRA Drug Safety Update".to_string(),
        job: Job::News,
        kind: SourceKind::Feed {
            url: "https://www.gov.uk/drug-safety-update.atom".to_string(),
        },
        delay: Duration::ZERO,
        content_patterns: Vec::new(),
        subpages: None,
        default_include: Vec::new(),
        default_exclude: Vec::new(),
    }
}

/// Every source this build knows about, in polling order.
pub fn builtin_sources() -> Result<Vec<Source>, regex::Error> {
    Ok(vec![
        nice()?,
        guidelines_in_practice()?,
        ukhsa_blog(),
        mhra_drug_safety(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(source: &Source) -> &ListingRule {
        match &source.kind {
            SourceKind::Listing(rule) => rule,
            SourceKind::Feed { .. } => panic!("{} is a feed", source.id),
        }
    }

    #[test]
    fn test_builtin_sources_compile() {
        let sources = builtin_sources().unwrap();
        let ids: Vec<_> = sources.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["nice", "gip", "ukhsa-blog", "mhra-dsu"]);
    }

    #[test]
    fn test_only_nice_follows_subpages() {
        let sources = builtin_sources().unwrap();
        let with_subpages: Vec<_> = sources
            .iter()
            .filter(|s| s.subpages.is_some())
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(with_subpages, vec!["nice"]);
    }

    #[test]
    fn test_nice_link_pattern() {
        let source = nice().unwrap();
        let rule = listing(&source);
        let caps = rule.link_pattern.captures("/guidance/ng136").unwrap();
        assert_eq!(&caps["id"], "ng136");
        assert!(rule
            .link_pattern
            .is_match("https://www.nice.org.uk/guidance/ta987?tab=evidence"));
        assert!(!rule.link_pattern.is_match("/guidance/ng136/chapter/recommendations"));
        assert!(!rule.link_pattern.is_match("/guidance/published"));
    }

    #[test]
    fn test_nice_subpage_pattern() {
        let source = nice().unwrap();
        let rule = source.subpages.unwrap();
        assert!(rule
            .link_pattern
            .is_match("/guidance/ng136/chapter/Recommendations"));
        assert!(!rule.link_pattern.is_match("/guidance/ng136"));
    }

    #[test]
    fn test_gip_link_pattern() {
        let source = guidelines_in_practice().unwrap();
        let rule = listing(&source);
        let caps = rule
            .link_pattern
            .captures("/diabetes/type_2_diabetes_update/456123.article")
            .unwrap();
        assert_eq!(&caps["id"], "456123");
        assert!(rule.date_window);
    }

    #[test]
    fn test_job_names() {
        assert_eq!(Job::Guidance.to_string(), "guidance");
        assert_eq!(Job::News.as_str(), "news");
    }
}
