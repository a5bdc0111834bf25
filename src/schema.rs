//! Output schema loading.
//!
//! The schema is forwarded to the provider as-is. The only check is that
//! the document is a JSON object, which both providers require.

use crate::error::DatexError;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// Read a JSON Schema document from `path`.
pub fn load_schema(path: impl AsRef<Path>) -> Result<Value, DatexError> {
    let path = path.as_ref();
    let load_failed = |detail: String| DatexError::SchemaLoad {
        path: path.to_path_buf(),
        detail,
    };

    let text = std::fs::read_to_string(path).map_err(|e| load_failed(e.to_string()))?;
    let schema: Value = serde_json::from_str(&text).map_err(|e| load_failed(e.to_string()))?;
    if !schema.is_object() {
        return Err(load_failed("top-level value must be a JSON object".into()));
    }

    debug!(
        "Loaded output schema from {} ({} top-level keys)",
        path.display(),
        schema.as_object().map_or(0, |o| o.len())
    );
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn passes_object_through_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let schema = json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": {"type": "object", "properties": {"qty": {"type": "integer"}}}
                }
            },
            "x-custom": true
        });
        let path = write(&dir, "schema.json", &schema.to_string());
        assert_eq!(load_schema(&path).unwrap(), schema);
    }

    #[test]
    fn rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "schema.json", "[1, 2]");
        let err = load_schema(&path).unwrap_err();
        assert!(matches!(err, DatexError::SchemaLoad { .. }));
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn reports_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_schema(dir.path().join("nope.json")),
            Err(DatexError::SchemaLoad { .. })
        ));
        let path = write(&dir, "bad.json", "{ not json");
        assert!(matches!(load_schema(&path), Err(DatexError::SchemaLoad { .. })));
    }
}
