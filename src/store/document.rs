//! Whole-document JSON persistence shared by the stores.

use crate::error::{GenStudioError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Reads a document. Missing, unreadable or corrupt files yield `None`.
///
/// A corrupt file is left in place; the next successful save replaces it.
pub(crate) fn load<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to read document");
            return None;
        }
    };

    if text.trim().is_empty() {
        return None;
    }

    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "ignoring corrupt document");
            None
        }
    }
}

/// Writes a document as pretty JSON, replacing the previous one atomically.
pub(crate) fn save<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    write(path, value).map_err(|err| {
        tracing::error!(path = %path.display(), error = %err, "failed to persist document");
        GenStudioError::Storage {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    })
}

fn write<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");

        save(&path, &vec!["a", "b"]).unwrap();
        let loaded: Option<Vec<String>> = load(&path);

        assert_eq!(loaded, Some(vec!["a".to_string(), "b".to_string()]));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        assert_eq!(load::<Vec<String>>(&path), None);

        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(load::<Vec<String>>(&path), None);
        assert!(path.exists());

        std::fs::write(&path, "  \n").unwrap();
        assert_eq!(load::<Vec<String>>(&path), None);
    }

    #[test]
    fn test_save_failure_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let err = save(&blocker.join("doc.json"), &1).unwrap_err();
        assert!(matches!(err, GenStudioError::Storage { .. }));
    }
}
