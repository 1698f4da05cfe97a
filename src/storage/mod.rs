//! File-backed storage layer for Passhold
//!
//! Every credential lives in its own YAML document at
//! `<root>/<name>/<login><extension>`. The directory tree is the only source of
//! truth: writes are expressed as the complete desired record set, and the
//! backend turns that into the minimal list of file operations with [`plan`].
//!
//! Filesystem access goes through the [`Filesystem`] capability so the
//! reconciliation logic can be exercised against [`MemoryFilesystem`].

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

use crate::models::Credential;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed credential file {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Filesystem operations needed by the storage backend
pub trait Filesystem {
    /// Every regular file below `root`, skipping `.git` directories
    fn list_files(&self, root: &Path) -> io::Result<Vec<PathBuf>>;

    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Create or overwrite `path`, creating parent directories as needed
    fn write(&self, path: &Path, contents: &str) -> io::Result<()>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Remove `dir` if it holds no entries; returns whether it was removed
    fn remove_dir_if_empty(&self, dir: &Path) -> io::Result<bool>;
}

/// The real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFilesystem;

impl OsFilesystem {
    fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();

            if file_type.is_dir() {
                if entry.file_name() != ".git" {
                    Self::walk(&path, files)?;
                }
            } else if file_type.is_file() {
                files.push(path);
            }
        }
        Ok(())
    }
}

impl Filesystem for OsFilesystem {
    fn list_files(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        match Self::walk(root, &mut files) {
            Ok(()) => Ok(files),
            Err(e) if e.kind() == io::ErrorKind::NotFound && !root.exists() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir_if_empty(&self, dir: &Path) -> io::Result<bool> {
        if fs::read_dir(dir)?.next().is_some() {
            return Ok(false);
        }
        fs::remove_dir(dir)?;
        Ok(true)
    }
}

/// In-memory filesystem; directories exist implicitly while they hold files
#[derive(Debug, Default)]
pub struct MemoryFilesystem {
    files: RefCell<BTreeMap<PathBuf, String>>,
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored path, sorted
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.borrow().keys().cloned().collect()
    }

    pub fn dir_exists(&self, dir: &Path) -> bool {
        self.files.borrow().keys().any(|p| p.starts_with(dir))
    }
}

impl Filesystem for MemoryFilesystem {
    fn list_files(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        Ok(self
            .files
            .borrow()
            .keys()
            .filter(|p| p.starts_with(root))
            .filter(|p| !p.components().any(|c| c.as_os_str() == ".git"))
            .cloned()
            .collect())
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        self.files
            .borrow_mut()
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.files
            .borrow_mut()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn remove_dir_if_empty(&self, dir: &Path) -> io::Result<bool> {
        Ok(!self.dir_exists(dir))
    }
}

/// A single filesystem change produced by reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    Delete { name: String, login: String },
    Write(Credential),
}

/// Compute the operations turning the `previous` record set into `desired`.
///
/// Keys missing from `desired` are deleted. Records that are new or differ from
/// their persisted version are written; unchanged records produce nothing.
pub fn plan(previous: &[Credential], desired: &[Credential]) -> Vec<StorageOp> {
    let mut ops: Vec<StorageOp> = previous
        .iter()
        .filter(|old| !desired.iter().any(|new| new.same_key(old)))
        .map(|old| StorageOp::Delete {
            name: old.name.clone(),
            login: old.login.clone(),
        })
        .collect();

    ops.extend(
        desired
            .iter()
            .filter(|new| !previous.iter().any(|old| old == *new))
            .cloned()
            .map(StorageOp::Write),
    );

    ops
}

/// Credential storage rooted at one directory
pub struct FileStorage<F: Filesystem = OsFilesystem> {
    root: PathBuf,
    extension: String,
    fs: F,
}

impl FileStorage<OsFilesystem> {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self::with_filesystem(root, extension, OsFilesystem)
    }
}

impl<F: Filesystem> FileStorage<F> {
    pub fn with_filesystem(root: impl Into<PathBuf>, extension: impl Into<String>, fs: F) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
            fs,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn filesystem(&self) -> &F {
        &self.fs
    }

    /// Path of the document holding the `(name, login)` credential
    pub fn credential_path(&self, name: &str, login: &str) -> PathBuf {
        self.root
            .join(name)
            .join(format!("{}{}", login, self.extension))
    }

    /// Load every persisted credential; order is unspecified
    pub fn read(&self) -> StorageResult<Vec<Credential>> {
        let files = self
            .fs
            .list_files(&self.root)
            .map_err(io_error(&self.root))?;

        let mut credentials = Vec::new();
        for path in files {
            let is_record = path
                .file_name()
                .map(|f| f.to_string_lossy().ends_with(self.extension.as_str()))
                .unwrap_or(false);
            if !is_record {
                continue;
            }

            let content = self.fs.read_to_string(&path).map_err(io_error(&path))?;
            let credential = serde_yaml::from_str(&content).map_err(|source| {
                StorageError::Malformed {
                    path: path.clone(),
                    source,
                }
            })?;
            credentials.push(credential);
        }

        Ok(credentials)
    }

    /// Reconcile the tree with `desired`; returns the number of operations applied
    pub fn write(&self, desired: &[Credential]) -> StorageResult<usize> {
        let previous = self.read()?;
        let ops = plan(&previous, desired);
        debug!(
            "reconciling {} records under {}: {} operations",
            desired.len(),
            self.root.display(),
            ops.len()
        );
        self.apply(&ops)?;
        Ok(ops.len())
    }

    /// Apply operations in order, stopping at the first failure
    pub fn apply(&self, ops: &[StorageOp]) -> StorageResult<()> {
        for op in ops {
            match op {
                StorageOp::Delete { name, login } => self.delete(name, login)?,
                StorageOp::Write(credential) => self.store(credential)?,
            }
        }
        Ok(())
    }

    fn delete(&self, name: &str, login: &str) -> StorageResult<()> {
        let path = self.credential_path(name, login);
        self.fs.remove_file(&path).map_err(io_error(&path))?;

        let dir = self.root.join(name);
        if self.fs.remove_dir_if_empty(&dir).map_err(io_error(&dir))? {
            debug!("removed empty directory {}", dir.display());
        }
        Ok(())
    }

    fn store(&self, credential: &Credential) -> StorageResult<()> {
        let path = self.credential_path(&credential.name, &credential.login);
        let document = serde_yaml::to_string(credential)?;
        self.fs.write(&path, &document).map_err(io_error(&path))
    }
}
