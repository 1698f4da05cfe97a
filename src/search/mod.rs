//! Credential lookup and search.
//!
//! Multi-record results are always sorted by `(name, login)`, never by the
//! order the filesystem happened to list the files in.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{split_fullname, Credential, NameError};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid search pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error(transparent)]
    Name(#[from] NameError),
}

pub type SearchResult<T> = Result<T, SearchError>;

/// How `search` interprets its pattern
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    #[default]
    Substring,
    Regex,
}

/// Sort by `name`, then `login`
pub fn sort_credentials(credentials: &mut [Credential]) {
    credentials.sort_by(|a, b| (&a.name, &a.login).cmp(&(&b.name, &b.login)));
}

/// Exact match on the key derived from `fullname`
pub fn lookup(credentials: &[Credential], fullname: &str) -> Result<Option<Credential>, NameError> {
    let (login, name) = split_fullname(fullname)?;
    Ok(credentials
        .iter()
        .find(|c| c.has_key(&login, &name))
        .cloned())
}

/// Credentials whose name, login or comment matches `pattern`
pub fn search(
    credentials: &[Credential],
    pattern: &str,
    mode: SearchMode,
) -> SearchResult<Vec<Credential>> {
    let mut found: Vec<Credential> = match mode {
        SearchMode::Substring => credentials
            .iter()
            .filter(|c| fields(c).any(|field| field.contains(pattern)))
            .cloned()
            .collect(),
        SearchMode::Regex => {
            let regex = Regex::new(pattern)?;
            credentials
                .iter()
                .filter(|c| fields(c).any(|field| regex.is_match(field)))
                .cloned()
                .collect()
        }
    };

    sort_credentials(&mut found);
    Ok(found)
}

pub fn list_all(credentials: &[Credential]) -> Vec<Credential> {
    let mut all = credentials.to_vec();
    sort_credentials(&mut all);
    all
}

fn fields(credential: &Credential) -> impl Iterator<Item = &str> {
    [
        credential.name.as_str(),
        credential.login.as_str(),
        credential.comment.as_str(),
    ]
    .into_iter()
}
