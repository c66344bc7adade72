//! Optional YAML settings file.
//!
//! ```yaml
//! user_agent: "guidance_watch/0.1"
//! request_timeout_secs: 30
//! max_depth: 1
//! delays_ms:
//!   nice: 2000
//!   gip: 0
//! ```
//!
//! Every key is optional. Without a file the built-in defaults apply.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::crawler::Throttle;
use crate::fetch::{DEFAULT_USER_AGENT, FetchOptions};
use crate::pipeline::RunOptions;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("reading settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub user_agent: Option<String>,
    pub request_timeout_secs: Option<u64>,
    /// Sub-page depth limit for sources that follow sub-pages.
    pub max_depth: Option<u32>,
    /// Source id to inter-request delay in milliseconds.
    pub delays_ms: BTreeMap<String, u64>,
}

impl Settings {
    pub fn from_yaml(text: &str, path: &Path) -> Result<Self, SettingsError> {
        serde_yaml::from_str(text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` if given; `None` yields the defaults.
    pub async fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let Some(path) = path else {
            debug!("No settings file; using defaults");
            return Ok(Self::default());
        };
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SettingsError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let settings = Self::from_yaml(&text, path)?;
        info!(path = %path.display(), overrides = settings.delays_ms.len(), "Loaded settings");
        Ok(settings)
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            user_agent: self
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout: self.request_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn run_options(&self, force: bool) -> RunOptions {
        RunOptions {
            force,
            max_depth: self.max_depth,
            delays: self
                .delays_ms
                .iter()
                .map(|(id, ms)| (id.clone(), Throttle::new(Duration::from_millis(*ms))))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let settings = Settings::from_yaml("{}", Path::new("s.yaml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.fetch_options().user_agent, DEFAULT_USER_AGENT);
        assert_eq!(settings.fetch_options().timeout, None);
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
user_agent: "guidance_watch-test"
request_timeout_secs: 30
max_depth: 2
delays_ms:
  nice: 0
  gip: 250
"#;
        let settings = Settings::from_yaml(yaml, Path::new("s.yaml")).unwrap();
        let fetch = settings.fetch_options();
        assert_eq!(fetch.user_agent, "guidance_watch-test");
        assert_eq!(fetch.timeout, Some(Duration::from_secs(30)));

        let run = settings.run_options(true);
        assert!(run.force);
        assert_eq!(run.max_depth, Some(2));
        assert_eq!(run.delays["nice"].delay(), Duration::ZERO);
        assert_eq!(run.delays["gip"].delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = Settings::from_yaml("retries: 3", Path::new("s.yaml")).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
        assert!(err.to_string().starts_with("parsing settings s.yaml"));
    }

    #[tokio::test]
    async fn test_load_without_path_is_default() {
        assert_eq!(Settings::load(None).await.unwrap(), Settings::default());
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(Some(&dir.path().join("nope.yaml")))
            .await
            .unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }));
    }
}
