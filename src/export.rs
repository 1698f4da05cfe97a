//! Export functionality for Passhold
//!
//! An export is a plaintext document:
//!
//! ```yaml
//! handler: passhold
//! version: 1.0
//! credentials:
//!   - name: example.com
//!     login: foo
//!     password: hunter2
//!     comment: ''
//!     modified: 2024-01-01T00:00:00Z
//! ```
//!
//! rendered as YAML by default or as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Credential, SensitiveString};

/// `handler` value identifying Passhold documents
pub const HANDLER: &str = "passhold";
pub const FORMAT_VERSION: f64 = 1.0;

/// Export errors
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ExportResult<T> = Result<T, ExportError>;

/// One credential with its password in plaintext
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub name: String,
    pub login: String,
    pub password: String,
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

impl ExportRecord {
    /// Pair a stored credential with its decrypted password
    pub fn from_credential(credential: &Credential, password: &SensitiveString) -> Self {
        Self {
            name: credential.name.clone(),
            login: credential.login.clone(),
            password: password.expose().to_string(),
            comment: credential.comment.clone(),
            modified: Some(credential.modified),
        }
    }
}

/// The export document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub handler: String,
    pub version: f64,
    pub credentials: Vec<ExportRecord>,
}

impl ExportDocument {
    pub fn new(credentials: Vec<ExportRecord>) -> Self {
        Self {
            handler: HANDLER.to_string(),
            version: FORMAT_VERSION,
            credentials,
        }
    }

    pub fn to_yaml(&self) -> ExportResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json(&self) -> ExportResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render(&self, json: bool) -> ExportResult<String> {
        if json {
            self.to_json()
        } else {
            self.to_yaml()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> ExportDocument {
        let credential = Credential::new("example.com", "foo", "-----BEGIN PGP MESSAGE-----", "");
        ExportDocument::new(vec![ExportRecord::from_credential(
            &credential,
            &SensitiveString::new("hunter2"),
        )])
    }

    #[test]
    fn test_export_yaml() {
        let yaml = document().to_yaml().unwrap();
        assert!(yaml.contains("handler: passhold"));
        assert!(yaml.contains("version: 1.0"));
        assert!(yaml.contains("password: hunter2"));
        assert!(!yaml.contains("PGP MESSAGE"));
    }

    #[test]
    fn test_export_json() {
        let json = document().render(true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["handler"], "passhold");
        assert_eq!(value["version"], 1.0);
        assert_eq!(value["credentials"][0]["login"], "foo");
        assert_eq!(value["credentials"][0]["password"], "hunter2");
    }

    #[test]
    fn test_empty_export() {
        let yaml = ExportDocument::new(Vec::new()).to_yaml().unwrap();
        assert!(yaml.contains("credentials: []"));
    }
}
