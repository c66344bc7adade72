//! Whole-document JSON reads and atomic rewrites.
//!
//! A missing file reads as the type's default. A file that exists but does
//! not parse is logged and also read as the default, so one corrupted
//! document never stops a run. Writes go to a temp file in the same
//! directory and are renamed over the target.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serializing {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Read `path` as `T`, defaulting when absent or malformed.
pub async fn read_document<T>(path: &Path) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "Document absent; using default");
            return Ok(T::default());
        }
        Err(e) => return Err(StoreError::io("reading", path, e)),
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Malformed document; replacing with default"
            );
            Ok(T::default())
        }
    }
}

/// Serialize `value` to `path` via a temp file and rename.
pub async fn write_document<T>(path: &Path, value: &T) -> Result<(), StoreError>
where
    T: Serialize,
{
    let json = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

    let mut file = fs::File::create(&temp_path)
        .await
        .map_err(|e| StoreError::io("creating", &temp_path, e))?;
    file.write_all(&json)
        .await
        .map_err(|e| StoreError::io("writing", &temp_path, e))?;
    file.flush()
        .await
        .map_err(|e| StoreError::io("flushing", &temp_path, e))?;
    drop(file);

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StoreError::io("renaming", path, e));
    }
    debug!(path = %path.display(), bytes = json.len(), "Wrote document");
    Ok(())
}
