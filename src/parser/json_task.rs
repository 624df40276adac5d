use std::fs;
use std::path::Path;
use serde_json::Value;
use crate::core::error::{Error, Result};
use crate::core::types::Document;
use crate::core::utils::dir_uri;
use crate::parser::adapter::ParserAdapter;

pub const DEFAULT_TASK_FILE: &str = "task.json";

/// Reads a pre-parsed JSON document from a file inside each result directory.
#[derive(Debug, Clone)]
pub struct JsonTaskParser {
    pub file_name: String,
    parsed: usize,
}

impl JsonTaskParser {
    pub fn new() -> Self {
        Self::with_file_name(DEFAULT_TASK_FILE)
    }

    pub fn with_file_name(name: impl Into<String>) -> Self {
        JsonTaskParser {
            file_name: name.into(),
            parsed: 0,
        }
    }

    /// Documents produced by this instance so far.
    pub fn parsed(&self) -> usize {
        self.parsed
    }
}

impl Default for JsonTaskParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ParserAdapter for JsonTaskParser {
    fn parse(&mut self, dir: &Path) -> Result<Document> {
        let path = dir.join(&self.file_name);
        let raw = fs::read_to_string(&path)
            .map_err(|e| Error::parse(format!("cannot read {}: {}", path.display(), e)))?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| Error::parse(format!("{}: {}", path.display(), e)))?;

        let mut doc = Document::from_value(value)
            .map_err(|e| Error::parse(format!("{}: {}", path.display(), e.context)))?;
        if doc.get_field("dir_name").is_none() {
            doc.add_field("dir_name", Value::String(dir_uri(dir)));
        }
        self.parsed += 1;
        Ok(doc)
    }

    fn is_result_dir(&self, dir: &Path) -> bool {
        dir.join(&self.file_name).is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn fills_dir_name_when_absent() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("task.json"), r#"{"nelements": 2}"#).unwrap();

        let mut parser = JsonTaskParser::new();
        assert!(parser.is_result_dir(dir.path()));
        let doc = parser.parse(dir.path()).unwrap();
        assert_eq!(doc.get_field("nelements"), Some(&json!(2)));
        let dir_name = doc.get_field("dir_name").unwrap().as_str().unwrap();
        assert!(dir_name.ends_with(&dir.path().display().to_string()));
        assert_eq!(parser.parsed(), 1);
    }

    #[test]
    fn keeps_explicit_dir_name() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("task.json"), r#"{"dir_name": "h:/x"}"#).unwrap();
        let doc = JsonTaskParser::new().parse(dir.path()).unwrap();
        assert_eq!(doc.get_field("dir_name"), Some(&json!("h:/x")));
    }

    #[test]
    fn bad_input_is_parse_failure() {
        let dir = TempDir::new().unwrap();
        let mut parser = JsonTaskParser::new();
        assert_eq!(parser.parse(dir.path()).unwrap_err().kind, ErrorKind::Parse);

        fs::write(dir.path().join("task.json"), "not json").unwrap();
        assert_eq!(parser.parse(dir.path()).unwrap_err().kind, ErrorKind::Parse);

        fs::write(dir.path().join("task.json"), "[1, 2]").unwrap();
        assert_eq!(parser.parse(dir.path()).unwrap_err().kind, ErrorKind::Parse);
        assert_eq!(parser.parsed(), 0);
    }
}
