//! Import functionality for Passhold
//!
//! Accepts a Passhold export document in YAML or JSON, or a bare list of
//! records in either syntax. Every record must carry `name`, `login`,
//! `password` and `comment`.

use serde::Deserialize;
use thiserror::Error;

use crate::export::{ExportDocument, ExportRecord, FORMAT_VERSION, HANDLER};
use crate::models::{check_key, NameError};

/// Import errors
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported handler {0:?}, expected \"passhold\"")]
    UnsupportedHandler(String),

    #[error("Unsupported document version {0}")]
    UnsupportedVersion(f64),

    #[error("Invalid record: {0}")]
    InvalidRecord(#[from] NameError),
}

pub type ImportResult<T> = Result<T, ImportError>;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Payload {
    Document(ExportDocument),
    Records(Vec<ExportRecord>),
}

/// Parse import text into records, checking each key is usable
pub fn parse_document(text: &str) -> ImportResult<Vec<ExportRecord>> {
    let trimmed = text.trim_start();
    let payload: Payload = if trimmed.starts_with('{') || trimmed.starts_with('[') {
        match serde_json::from_str(trimmed) {
            Ok(payload) => payload,
            // flow-style YAML also starts with a bracket
            Err(_) => parse_yaml(text)?,
        }
    } else {
        parse_yaml(text)?
    };

    let records = match payload {
        Payload::Document(document) => {
            if document.handler != HANDLER {
                return Err(ImportError::UnsupportedHandler(document.handler));
            }
            if document.version.trunc() != FORMAT_VERSION.trunc() {
                return Err(ImportError::UnsupportedVersion(document.version));
            }
            document.credentials
        }
        Payload::Records(records) => records,
    };

    for record in &records {
        check_key(&record.login, &record.name)?;
    }
    Ok(records)
}

fn parse_yaml(text: &str) -> ImportResult<Payload> {
    serde_yaml::from_str(text).map_err(|e| ImportError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML_DOCUMENT: &str = "\
handler: passhold
version: 1.0
credentials:
- name: example.com
  login: foo
  password: hunter2
  comment: ''
  modified: 2024-01-02T03:04:05Z
- name: example.com
  login: bar
  password: s3cret
  comment: work
";

    #[test]
    fn test_import_yaml_document() {
        let records = parse_document(YAML_DOCUMENT).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].login, "foo");
        assert_eq!(records[0].password, "hunter2");
        assert!(records[0].modified.is_some());
        assert!(records[1].modified.is_none());
    }

    #[test]
    fn test_import_json_document() {
        let json = r#"{
            "handler": "passhold",
            "version": 1.0,
            "credentials": [
                {"name": "example.com", "login": "foo", "password": "pw", "comment": ""}
            ]
        }"#;
        let records = parse_document(json).unwrap();
        assert_eq!(records[0].password, "pw");
    }

    #[test]
    fn test_import_bare_list() {
        let yaml = "- {name: a, login: b, password: c, comment: d}\n";
        assert_eq!(parse_document(yaml).unwrap()[0].comment, "d");

        let json = r#"[{"name": "a", "login": "", "password": "c", "comment": ""}]"#;
        assert_eq!(parse_document(json).unwrap()[0].name, "a");
    }

    #[test]
    fn test_import_requires_fields() {
        let yaml = "- {name: a, password: c}\n";
        assert!(matches!(parse_document(yaml), Err(ImportError::Parse(_))));
    }

    #[test]
    fn test_import_rejects_other_handlers() {
        let yaml = YAML_DOCUMENT.replace("handler: passhold", "handler: keepass");
        assert!(matches!(
            parse_document(&yaml),
            Err(ImportError::UnsupportedHandler(h)) if h == "keepass"
        ));

        let yaml = YAML_DOCUMENT.replace("version: 1.0", "version: 2.0");
        assert!(matches!(
            parse_document(&yaml),
            Err(ImportError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_import_rejects_unsafe_names() {
        for yaml in [
            "- {name: ../etc, login: root, password: x, comment: ''}\n",
            "- {name: a@b, login: root, password: x, comment: ''}\n",
            "- {name: '', login: root, password: x, comment: ''}\n",
        ] {
            assert!(matches!(
                parse_document(yaml),
                Err(ImportError::InvalidRecord(_))
            ));
        }
    }
}
