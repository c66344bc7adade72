//! Include/exclude keyword relevance gate.

use crate::models::RunConfig;
use crate::sources::Source;

/// Keyword lists in effect for one source during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keywords {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Keywords {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self {
            include: include.into_iter().map(|k| k.to_lowercase()).collect(),
            exclude: exclude.into_iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// Lists from `config.json`, each falling back to the source's defaults
    /// when omitted.
    pub fn for_source(source: &Source, config: &RunConfig) -> Self {
        let settings = config.source(&source.id);
        let include = settings
            .and_then(|s| s.include_keywords.clone())
            .unwrap_or_else(|| source.default_include.clone());
        let exclude = settings
            .and_then(|s| s.exclude_keywords.clone())
            .unwrap_or_else(|| source.default_exclude.clone());
        Self::new(include, exclude)
    }

    /// Whether an item with this title and description should be kept.
    ///
    /// Any exclude keyword rejects the item outright. Otherwise an empty
    /// include list accepts everything, and a non-empty one needs a match.
    pub fn is_relevant(&self, title: &str, description: &str) -> bool {
        let text = format!("{title} {description}").to_lowercase();
        if self.exclude.iter().any(|k| text.contains(k.as_str())) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|k| text.contains(k.as_str()))
    }
}
