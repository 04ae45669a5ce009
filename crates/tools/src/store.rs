//! File-backed JSON storage shared by the built-in tools.
//!
//! Load-on-construct, save-on-every-mutation. A missing or malformed file
//! is treated as an empty store (with a warning), so a corrupted file never
//! prevents the tool from working. Files are human-readable JSON with
//! 2-space indent.

use colloquy_core::ToolError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, warn};

/// Load a store from `path`, or return the default when no path is given,
/// the file is absent, or its contents do not parse.
pub(crate) fn load_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> T {
    let Some(path) = path else {
        return T::default();
    };

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => {
            debug!(path = %path.display(), "Store file absent, starting empty");
            return T::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Store file malformed, starting empty");
            T::default()
        }
    }
}

/// Write the full store to `path` as pretty JSON. A `None` path means
/// memory-only mode and is a successful no-op.
pub(crate) fn save<T: Serialize>(path: Option<&Path>, tool_name: &str, value: &T) -> Result<(), ToolError> {
    let Some(path) = path else {
        return Ok(());
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| ToolError::ExecutionFailed {
                tool_name: tool_name.to_string(),
                reason: format!("Failed to create storage directory: {e}"),
            })?;
        }
    }

    let json = serde_json::to_string_pretty(value).map_err(|e| ToolError::ExecutionFailed {
        tool_name: tool_name.to_string(),
        reason: format!("Failed to serialize store: {e}"),
    })?;

    std::fs::write(path, json).map_err(|e| ToolError::ExecutionFailed {
        tool_name: tool_name.to_string(),
        reason: format!("Failed to write store file: {e}"),
    })
}

/// Current time as an ISO-8601 UTC string, second precision.
pub(crate) fn timestamp_now() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        items: Vec<String>,
    }

    #[test]
    fn missing_file_loads_default() {
        let loaded: Sample = load_or_default(Some(Path::new("/no/such/store.json")));
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn malformed_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{ not json").unwrap();
        let loaded: Sample = load_or_default(Some(&path));
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let value = Sample {
            items: vec!["a".into(), "b".into()],
        };
        save(Some(&path), "sample", &value).unwrap();

        // Pretty-printed with 2-space indent
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n  \"items\""));

        let loaded: Sample = load_or_default(Some(&path));
        assert_eq!(loaded, value);
    }

    #[test]
    fn memory_only_save_is_noop() {
        let value = Sample::default();
        assert!(save(None, "sample", &value).is_ok());
    }

    #[test]
    fn timestamp_is_iso8601_utc() {
        let ts = timestamp_now();
        assert_eq!(ts.len(), 20);
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], "T");
    }
}
