//! Passhold - a personal credential manager
//!
//! # Features
//! - **Plain files**: one YAML document per credential, `<name>/<login>.pass`
//! - **GnuPG encryption**: passwords are encrypted to a recipient by the `gpg` binary
//! - **Portable stores**: keep a store as a directory, a tar/zip archive or a git remote
//! - **History**: every change is committed when the store is a git repository
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                            CLI                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    Store (open / sync)                      │
//! ├──────────┬──────────┬───────────────┬───────────┬───────────┤
//! │  Search  │  Config  │ Crypto / GPG  │  Archive  │    Git    │
//! ├──────────┴──────────┴───────────────┴───────────┴───────────┤
//! │                Storage (reconciled YAML tree)               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//! ```bash
//! # Create a store protected by a generated key
//! passhold init
//!
//! # Add a credential with a random password
//! passhold add foo@example.com --random
//!
//! # Search and reveal
//! passhold list example
//! passhold show foo@example.com
//! ```

#![warn(clippy::all)]

pub mod archive;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod export;
pub mod git;
pub mod gpg;
pub mod import;
pub mod models;
pub mod process;
pub mod search;
pub mod storage;
pub mod store;

use std::path::PathBuf;

// Re-exports for convenience
pub use config::Config;
pub use crypto::{CryptoProvider, PasswordGenerator};
pub use models::{Credential, CredentialChanges, SensitiveString};
pub use search::SearchMode;
pub use storage::{FileStorage, StorageError};
pub use store::{ImportReport, InitOptions, Store, SyncReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error type for the library
#[derive(Debug, thiserror::Error)]
pub enum PassholdError {
    /// Malformed fullname or key
    #[error(transparent)]
    Name(#[from] models::NameError),

    /// Storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    /// Search errors
    #[error("Search error: {0}")]
    Search(#[from] search::SearchError),

    /// Crypto errors
    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    /// Store source and archive errors
    #[error("Archive error: {0}")]
    Archive(#[from] archive::ArchiveError),

    /// Version control errors
    #[error("Git error: {0}")]
    Git(#[from] git::GitError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Export errors
    #[error("Export error: {0}")]
    Export(#[from] export::ExportError),

    /// Import errors
    #[error("Import error: {0}")]
    Import(#[from] import::ImportError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A credential with this key already exists
    #[error("Credential already exists: {0}")]
    DuplicateKey(String),

    /// No credential with this key
    #[error("Credential not found: {0}")]
    NotFound(String),

    /// The operation reveals plaintext and no passphrase has been verified
    #[error("Passphrase required")]
    PassphraseRequired,

    /// Refusing to overwrite an existing store
    #[error("Path already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
}

/// Result type for the library
pub type PassholdResult<T> = Result<T, PassholdError>;
