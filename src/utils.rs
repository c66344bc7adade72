//! Small helpers shared across the pipeline.
//!
//! - Fingerprinting for change detection and key derivation
//! - Word counts, reading time and excerpts for article metadata
//! - Slug titles for links without usable anchor text
//! - String truncation for log lines
//! - File system validation for the data directory

use sha2::{Digest, Sha256};
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Number of hex characters kept from the SHA-256 digest.
pub const FINGERPRINT_LEN: usize = 16;

/// Words per minute used for the reading-time estimate.
pub const WORDS_PER_MINUTE: usize = 250;

/// Maximum length, in characters, of the stored description excerpt.
pub const EXCERPT_CHARS: usize = 200;

/// Deterministic short fingerprint of `text`.
///
/// The first [`FINGERPRINT_LEN`] lowercase hex characters of the SHA-256
/// digest of the UTF-8 bytes. Used both to compare content and to derive
/// storage keys from URLs.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(fingerprint("hello world"), "b94d27b9934d3e08");
/// ```
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(FINGERPRINT_LEN);
    digest
}

/// Count of whitespace-delimited tokens.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Estimated reading time in minutes, rounded up.
pub fn reading_time(words: usize) -> usize {
    words.div_ceil(WORDS_PER_MINUTE)
}

/// First [`EXCERPT_CHARS`] characters of `text` with whitespace collapsed.
pub fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    format!("{}…", cut.trim_end())
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (on a character boundary)
/// with an ellipsis and the dropped byte count appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…(+{} bytes)", &s[..end], s.len() - end)
}

/// Capitalize the first character of a string.
pub fn upcase(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        None => String::new(),
        Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
    }
}

/// Build a human title from a URL path segment.
///
/// Percent-decodes the segment, turns underscores into spaces and
/// capitalizes each word.
///
/// ```ignore
/// assert_eq!(slug_title("type_2_diabetes"), "Type 2 Diabetes");
/// ```
pub fn slug_title(segment: &str) -> String {
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    decoded
        .replace('_', " ")
        .split_whitespace()
        .map(upcase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a probe file.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or is not writable.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Data directory is writable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_sha256_prefix() {
        assert_eq!(fingerprint("hello world"), "b94d27b9934d3e08");
        assert_eq!(fingerprint("hello world").len(), FINGERPRINT_LEN);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let text = "Hypertension in adults: diagnosis and management";
        assert_eq!(fingerprint(text), fingerprint(text));
        assert_ne!(fingerprint(text), fingerprint("Hypertension in adults"));
    }

    #[test]
    fn test_word_count_and_reading_time() {
        let desc = "update to chronic kidney disease monitoring";
        assert_eq!(word_count(desc), 6);
        assert_eq!(reading_time(6), 1);
        assert_eq!(reading_time(0), 0);
        assert_eq!(reading_time(250), 1);
        assert_eq!(reading_time(251), 2);
    }

    #[test]
    fn test_excerpt_short_and_long() {
        assert_eq!(excerpt("one\n\ntwo   three"), "one two three");
        let long = "word ".repeat(100);
        let cut = excerpt(&long);
        assert!(cut.ends_with('…'));
        assert!(cut.chars().count() <= EXCERPT_CHARS + 1);
    }

    #[test]
    fn test_truncate_for_log_short_string() {
        assert_eq!(truncate_for_log("Hello, world!", 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundary() {
        let s = "éééé";
        let result = truncate_for_log(s, 3);
        assert!(result.starts_with('é'));
    }

    #[test]
    fn test_upcase() {
        assert_eq!(upcase("hello"), "Hello");
        assert_eq!(upcase(""), "");
    }

    #[test]
    fn test_slug_title() {
        assert_eq!(slug_title("type_2_diabetes"), "Type 2 Diabetes");
        assert_eq!(slug_title("asthma%20care"), "Asthma Care");
        assert_eq!(slug_title("ng136"), "Ng136");
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        ensure_writable_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
    }
}
