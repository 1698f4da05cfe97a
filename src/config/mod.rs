//! Layered configuration for Passhold
//!
//! Settings are resolved lowest to highest from the built-in defaults, the
//! user file `~/.passholdrc`, `PASSHOLD_<KEY>` environment variables, command
//! line overrides, and finally the store's own `config.yml`.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use thiserror::Error;

use crate::crypto::PasswordGenerator;
use crate::search::SearchMode;

pub const ENV_PREFIX: &str = "PASSHOLD_";
pub const USER_CONFIG_FILE: &str = ".passholdrc";

/// Every settable key, in display order
pub const KEYS: &[&str] = &[
    "database",
    "git",
    "git_push",
    "key_length",
    "homedir",
    "recipient",
    "extension",
    "search_mode",
    "password_length",
    "password_random",
    "password_symbols",
    "password_exclude_ambiguous",
];

/// Keys that describe where a store lives rather than how it behaves
const LOCATION_KEYS: &[&str] = &["database"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed configuration file {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    #[error("Invalid configuration from {origin}: {source}")]
    InvalidValue {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Default store location
pub fn default_database_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".passhold")
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(USER_CONFIG_FILE))
}

/// Expand a leading `~/` against the home directory
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ if path == "~" => dirs::home_dir().unwrap_or_else(|| PathBuf::from(path)),
        _ => PathBuf::from(path),
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store source: directory, archive file or git URL
    pub database: String,
    /// Commit every change when the store is a git repository
    pub git: bool,
    /// `remote/branch` to push to after each command
    pub git_push: Option<String>,
    /// RSA key size for generated store keys
    pub key_length: u32,
    /// Keyring used when the store carries no keys of its own
    pub homedir: Option<PathBuf>,
    /// Recipient passwords are encrypted to
    pub recipient: Option<String>,
    /// Credential file extension
    pub extension: String,
    pub search_mode: SearchMode,
    pub password_length: usize,
    /// Generate a password instead of prompting for one
    pub password_random: bool,
    /// Include symbols in generated passwords
    pub password_symbols: bool,
    /// Leave out look-alike characters such as `0`/`O` and `1`/`l`
    pub password_exclude_ambiguous: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: default_database_path().to_string_lossy().into_owned(),
            git: true,
            git_push: None,
            key_length: 4096,
            homedir: None,
            recipient: None,
            extension: ".pass".to_string(),
            search_mode: SearchMode::default(),
            password_length: 32,
            password_random: false,
            password_symbols: true,
            password_exclude_ambiguous: false,
        }
    }
}

impl Config {
    /// Resolve configuration from the user file, the process environment and `overrides`
    pub fn load(overrides: &Mapping) -> ConfigResult<Self> {
        Self::load_from(user_config_path().as_deref(), env::vars(), overrides)
    }

    /// [`Config::load`] with explicit layer inputs
    pub fn load_from(
        user_file: Option<&Path>,
        vars: impl IntoIterator<Item = (String, String)>,
        overrides: &Mapping,
    ) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = user_file.filter(|p| p.is_file()) {
            let layer = read_mapping(path)?;
            config = config.merged(&layer, &path.display().to_string())?;
            debug!("Config::load_from: applied {}", path.display());
        }

        for (var, raw) in vars {
            let Some(key) = var.strip_prefix(ENV_PREFIX).map(str::to_lowercase) else {
                continue;
            };
            if !KEYS.contains(&key.as_str()) {
                continue;
            }
            let mut layer = Mapping::new();
            layer.insert(Value::from(key), parse_scalar(&raw));
            config = config.merged(&layer, &var)?;
        }

        config.merged(overrides, "command line")
    }

    /// Apply a store's `config.yml`, if it has one
    pub fn with_store_file(&self, path: &Path) -> ConfigResult<Self> {
        if !path.is_file() {
            return Ok(self.clone());
        }
        self.merged(&read_mapping(path)?, &path.display().to_string())
    }

    /// Set `key` from its textual form, parsed as a YAML scalar
    pub fn set(&mut self, key: &str, raw: &str) -> ConfigResult<()> {
        if !KEYS.contains(&key) {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }
        let mut layer = Mapping::new();
        layer.insert(Value::from(key), parse_scalar(raw));
        *self = self.merged(&layer, &format!("config set {}", key))?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> ConfigResult<Value> {
        if !KEYS.contains(&key) {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }
        Ok(self.to_mapping()?.remove(key).unwrap_or(Value::Null))
    }

    /// Every key with its value, in [`KEYS`] order
    pub fn entries(&self) -> ConfigResult<Vec<(&'static str, Value)>> {
        let mut mapping = self.to_mapping()?;
        Ok(KEYS
            .iter()
            .map(|key| (*key, mapping.remove(*key).unwrap_or(Value::Null)))
            .collect())
    }

    /// Store settings that differ from the defaults, as written to `config.yml`
    pub fn store_overrides(&self) -> ConfigResult<Mapping> {
        let defaults = Self::default().to_mapping()?;
        Ok(self
            .to_mapping()?
            .into_iter()
            .filter(|(key, value)| {
                let location = key.as_str().is_some_and(|k| LOCATION_KEYS.contains(&k));
                !location && defaults.get(key) != Some(value)
            })
            .collect())
    }

    pub fn write_store_file(&self, path: &Path) -> ConfigResult<()> {
        let overrides = self.store_overrides()?;
        let text = if overrides.is_empty() {
            String::new()
        } else {
            serde_yaml::to_string(&overrides)?
        };
        fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Generator for new passwords under the password settings
    pub fn password_generator(&self) -> PasswordGenerator {
        PasswordGenerator::new(self.password_length)
            .with_symbols(self.password_symbols)
            .exclude_ambiguous(self.password_exclude_ambiguous)
    }

    /// Store source with `~` expanded for filesystem paths
    pub fn database_source(&self) -> String {
        if self.database.starts_with('~') {
            expand_home(&self.database).to_string_lossy().into_owned()
        } else {
            self.database.clone()
        }
    }

    fn to_mapping(&self) -> ConfigResult<Mapping> {
        match serde_yaml::to_value(self)? {
            Value::Mapping(mapping) => Ok(mapping),
            _ => Ok(Mapping::new()),
        }
    }

    /// `self` with the known keys of `layer` laid over it
    fn merged(&self, layer: &Mapping, origin: &str) -> ConfigResult<Self> {
        let mut mapping = self.to_mapping()?;

        for (key, value) in layer {
            match key.as_str() {
                Some(name) if KEYS.contains(&name) => {
                    mapping.insert(key.clone(), value.clone());
                }
                _ => warn!("ignoring unknown configuration key {:?} from {}", key, origin),
            }
        }

        serde_yaml::from_value(Value::Mapping(mapping)).map_err(|source| {
            ConfigError::InvalidValue {
                origin: origin.to_string(),
                source,
            }
        })
    }
}

fn read_mapping(path: &Path) -> ConfigResult<Mapping> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    match serde_yaml::from_str::<Value>(&text) {
        Ok(Value::Mapping(mapping)) => Ok(mapping),
        Ok(Value::Null) => Ok(Mapping::new()),
        Ok(other) => Err(ConfigError::Malformed {
            path: path.to_path_buf(),
            source: <serde_yaml::Error as serde::de::Error>::custom(format!(
                "expected a mapping, found {:?}",
                other
            )),
        }),
        Err(source) => Err(ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// `"false"` becomes a bool, `"2048"` a number; text that is not valid YAML stays text
fn parse_scalar(raw: &str) -> Value {
    match serde_yaml::from_str::<Value>(raw) {
        Ok(value @ (Value::Bool(_) | Value::Number(_) | Value::Null | Value::String(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn no_env() -> Vec<(String, String)> {
        Vec::new()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.git);
        assert_eq!(config.key_length, 4096);
        assert_eq!(config.extension, ".pass");
        assert_eq!(config.password_length, 32);
        assert_eq!(config.search_mode, SearchMode::Substring);
        assert!(config.database.ends_with(".passhold"));
    }

    #[test]
    fn test_layer_order() {
        let dir = tempdir().unwrap();
        let rc = dir.path().join(".passholdrc");
        fs::write(&rc, "key_length: 2048\nextension: .rc\npassword_length: 10\n").unwrap();

        let vars = vec![
            ("PASSHOLD_EXTENSION".to_string(), ".env".to_string()),
            ("PASSHOLD_GIT".to_string(), "false".to_string()),
            ("PASSHOLD_DEBUG".to_string(), "1".to_string()),
            ("HOME".to_string(), "/nowhere".to_string()),
        ];

        let mut overrides = Mapping::new();
        overrides.insert("password_length".into(), 64.into());

        let config = Config::load_from(Some(&rc), vars, &overrides).unwrap();
        assert_eq!(config.key_length, 2048);
        assert_eq!(config.extension, ".env");
        assert!(!config.git);
        assert_eq!(config.password_length, 64);
    }

    #[test]
    fn test_missing_user_file_is_fine() {
        let dir = tempdir().unwrap();
        let config =
            Config::load_from(Some(&dir.path().join("absent")), no_env(), &Mapping::new()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_malformed_user_file() {
        let dir = tempdir().unwrap();
        let rc = dir.path().join(".passholdrc");
        fs::write(&rc, "key_length: [unclosed\n").unwrap();
        assert!(matches!(
            Config::load_from(Some(&rc), no_env(), &Mapping::new()),
            Err(ConfigError::Malformed { .. })
        ));

        fs::write(&rc, "- a\n- list\n").unwrap();
        assert!(matches!(
            Config::load_from(Some(&rc), no_env(), &Mapping::new()),
            Err(ConfigError::Malformed { .. })
        ));
    }

    #[test]
    fn test_invalid_value_names_origin() {
        let vars = vec![("PASSHOLD_KEY_LENGTH".to_string(), "huge".to_string())];
        match Config::load_from(None, vars, &Mapping::new()) {
            Err(ConfigError::InvalidValue { origin, .. }) => {
                assert_eq!(origin, "PASSHOLD_KEY_LENGTH")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_store_file_wins() {
        let dir = tempdir().unwrap();
        let store_file = dir.path().join("config.yml");
        fs::write(&store_file, "recipient: ABCDEF\nsearch_mode: regex\n").unwrap();

        let mut overrides = Mapping::new();
        overrides.insert("recipient".into(), "cli".into());
        let config = Config::load_from(None, no_env(), &overrides)
            .unwrap()
            .with_store_file(&store_file)
            .unwrap();

        assert_eq!(config.recipient.as_deref(), Some("ABCDEF"));
        assert_eq!(config.search_mode, SearchMode::Regex);
    }

    #[test]
    fn test_set_and_get() {
        let mut config = Config::default();
        config.set("git_push", "origin/master").unwrap();
        config.set("password_random", "true").unwrap();

        assert_eq!(config.git_push.as_deref(), Some("origin/master"));
        assert!(config.password_random);
        assert_eq!(config.get("password_random").unwrap(), Value::Bool(true));

        assert!(matches!(
            config.set("colour", "red"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            config.set("key_length", "abc"),
            Err(ConfigError::InvalidValue { .. })
        ));
        // failed set leaves the config untouched
        assert_eq!(config.key_length, 4096);
    }

    #[test]
    fn test_store_overrides_only_non_defaults() {
        let mut config = Config::default();
        config.database = "/elsewhere".to_string();
        config.set("recipient", "ABCDEF").unwrap();
        config.set("extension", ".pass").unwrap();

        let overrides = config.store_overrides().unwrap();
        assert_eq!(overrides.len(), 1);
        assert_eq!(
            overrides.get("recipient"),
            Some(&Value::String("ABCDEF".to_string()))
        );

        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yml");
        config.write_store_file(&path).unwrap();
        let reread = Config::default().with_store_file(&path).unwrap();
        assert_eq!(reread.recipient.as_deref(), Some("ABCDEF"));
    }

    #[test]
    fn test_parse_scalar() {
        assert_eq!(parse_scalar("false"), Value::Bool(false));
        assert_eq!(parse_scalar("2048"), Value::from(2048));
        assert_eq!(parse_scalar("origin/master"), Value::from("origin/master"));
        assert_eq!(parse_scalar("[a"), Value::from("[a"));
        assert_eq!(parse_scalar("a: b"), Value::from("a: b"));
    }

    #[test]
    fn test_entries_in_key_order() {
        let entries = Config::default().entries().unwrap();
        let keys: Vec<_> = entries.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, KEYS);
    }

    #[test]
    fn test_password_generator_follows_settings() {
        let mut config = Config::default();
        config.set("password_length", "40").unwrap();
        config.set("password_symbols", "false").unwrap();
        config.set("password_exclude_ambiguous", "true").unwrap();

        let password = config.password_generator().generate();
        assert_eq!(password.len(), 40);
        assert!(password
            .expose()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() && !"0O1lI".contains(c)));
    }
}
