//! Core data models for Passhold
//!
//! A [`Credential`] is addressed by its `(name, login)` key. The human form of that
//! key is the *fullname*, `login@name`, which is never stored: it is derived from the
//! key whenever it is needed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Errors raised while turning a fullname into a key
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("not a valid fullname: {0:?}")]
    InvalidFullname(String),
}

/// A sensitive string that zeroes memory on drop
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SensitiveString(String);

impl SensitiveString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED {} chars]", self.0.len())
    }
}

impl From<String> for SensitiveString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SensitiveString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Split a fullname into its `(login, name)` key.
///
/// The split happens on the last `@`, so logins that are themselves email
/// addresses survive intact. A string without `@` is a bare name.
pub fn split_fullname(fullname: &str) -> Result<(String, String), NameError> {
    let (login, name) = fullname.rsplit_once('@').unwrap_or(("", fullname));

    if !is_valid_key(login, name) {
        return Err(NameError::InvalidFullname(fullname.to_string()));
    }

    Ok((login.to_string(), name.to_string()))
}

/// Check a `(login, name)` key that did not come from a fullname
pub fn check_key(login: &str, name: &str) -> Result<(), NameError> {
    if is_valid_key(login, name) {
        Ok(())
    } else {
        Err(NameError::InvalidFullname(make_fullname(login, name)))
    }
}

const GIT_DIR: &str = ".git";

/// Build the fullname of a `(login, name)` key
pub fn make_fullname(login: &str, name: &str) -> String {
    format!("{}@{}", login, name)
}

/// Names and logins become path components on disk, so separators and
/// relative components are rejected along with empty names. `.git` is
/// reserved for version control and never read back as records.
fn is_valid_key(login: &str, name: &str) -> bool {
    const SEPARATORS: &[char] = &['/', '\\'];

    !name.is_empty()
        && name != "."
        && name != ".."
        && name != GIT_DIR
        && !name.contains('@')
        && !name.contains(SEPARATORS)
        && !login.contains(SEPARATORS)
}

/// A stored credential.
///
/// Once persisted, `password` holds the crypto provider's armored ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub name: String,
    #[serde(default)]
    pub login: String,
    pub password: String,
    #[serde(default)]
    pub comment: String,
    pub modified: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        name: impl Into<String>,
        login: impl Into<String>,
        password: impl Into<String>,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            login: login.into(),
            password: password.into(),
            comment: comment.into(),
            modified: Utc::now(),
        }
    }

    /// Canonical `login@name` address of this credential
    pub fn fullname(&self) -> String {
        make_fullname(&self.login, &self.name)
    }

    pub fn has_key(&self, login: &str, name: &str) -> bool {
        self.login == login && self.name == name
    }

    pub fn same_key(&self, other: &Credential) -> bool {
        self.has_key(&other.login, &other.name)
    }

    pub fn touch(&mut self) {
        self.modified = Utc::now();
    }
}

/// Field changes applied by an update.
///
/// `password` is plaintext here; the store encrypts it before persisting.
#[derive(Debug, Clone, Default)]
pub struct CredentialChanges {
    pub name: Option<String>,
    pub login: Option<String>,
    pub password: Option<SensitiveString>,
    pub comment: Option<String>,
}

impl CredentialChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<SensitiveString>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.login.is_none()
            && self.password.is_none()
            && self.comment.is_none()
    }
}
