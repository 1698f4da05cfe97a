//! Git history for Passhold stores
//!
//! Every mutation of a store is committed to a git repository at the store
//! root when one exists. Git support is strictly optional: without the `git`
//! binary, or on a tree without `.git`, calls report [`GitError::Unavailable`]
//! or [`GitError::NotARepository`] and the caller carries on.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use log::{debug, warn};
use thiserror::Error;

use crate::process;

/// Author recorded on every commit
pub const AUTHOR_NAME: &str = "Passhold";
pub const AUTHOR_EMAIL: &str = "passhold@local";

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git executable not found on PATH")]
    Unavailable,

    #[error("not a git repository: {}", .0.display())]
    NotARepository(PathBuf),

    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("invalid remote {0:?}, expected <remote>/<branch>")]
    InvalidRemote(String),

    #[error("no commit at index {index}, history has {count}")]
    NoSuchCommit { index: usize, count: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// True when git is simply not in play for this tree
    pub fn is_skipped(&self) -> bool {
        matches!(self, GitError::Unavailable | GitError::NotARepository(_))
    }
}

pub type GitResult<T> = Result<T, GitError>;

/// Push target written as `remote/branch`, e.g. `origin/master`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSpec {
    pub remote: String,
    pub branch: String,
}

impl RemoteSpec {
    pub fn parse(spec: &str) -> GitResult<Self> {
        match spec.split_once('/') {
            Some((remote, branch)) if !remote.is_empty() && !branch.is_empty() => Ok(Self {
                remote: remote.to_string(),
                branch: branch.to_string(),
            }),
            _ => Err(GitError::InvalidRemote(spec.to_string())),
        }
    }
}

impl fmt::Display for RemoteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.remote, self.branch)
    }
}

/// One entry of the store history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub message: String,
    pub sha: String,
}

/// A working tree that may or may not be under git
#[derive(Debug, Clone)]
pub struct Repository {
    path: PathBuf,
}

impl Repository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_repository(&self) -> bool {
        self.path.join(".git").exists()
    }

    pub fn init(&self) -> GitResult<()> {
        let binary = git_binary()?;
        self.git(&binary, &["init"])?;
        debug!("Repository::init: {}", self.path.display());
        Ok(())
    }

    /// Stage everything and commit; a clean tree is not an error
    pub fn commit(&self, message: &str) -> GitResult<()> {
        let binary = self.ensure()?;

        self.git(&binary, &["add", "--all", "."])?;
        if self.git(&binary, &["status", "--porcelain"])?.trim().is_empty() {
            debug!("Repository::commit: nothing to commit for {:?}", message);
            return Ok(());
        }

        let author = format!("{} <{}>", AUTHOR_NAME, AUTHOR_EMAIL);
        self.git(&binary, &["commit", "--author", &author, "-m", message])?;
        debug!("Repository::commit: {:?}", message);
        Ok(())
    }

    pub fn push(&self, remote: &RemoteSpec) -> GitResult<()> {
        let binary = self.ensure()?;
        self.git(&binary, &["push", &remote.remote, &remote.branch])?;
        debug!("Repository::push: {}", remote);
        Ok(())
    }

    /// Commits oldest first
    pub fn log(&self) -> GitResult<Vec<Commit>> {
        let binary = self.ensure()?;
        let output = self.git(&binary, &["log", "--reverse", "--pretty=format:%s|%h"])?;
        Ok(parse_log(&output))
    }

    /// Hard-reset the tree to the commit at `index` of [`Repository::log`]
    pub fn reset(&self, index: usize) -> GitResult<Commit> {
        let commits = self.log()?;
        let commit = commits
            .get(index)
            .cloned()
            .ok_or(GitError::NoSuchCommit {
                index,
                count: commits.len(),
            })?;

        let binary = git_binary()?;
        self.git(&binary, &["reset", "--hard", &commit.sha])?;
        debug!("Repository::reset: {} {:?}", commit.sha, commit.message);
        Ok(commit)
    }

    /// Run git with the terminal attached, as if from inside the tree
    pub fn passthrough(&self, args: &[String]) -> GitResult<ExitStatus> {
        let binary = self.ensure()?;
        debug!("Repository::passthrough: git {}", args.join(" "));
        let status = git_command(&binary)
            .arg("-C")
            .arg(&self.path)
            .args(args)
            .status()?;
        Ok(status)
    }

    fn ensure(&self) -> GitResult<PathBuf> {
        let binary = git_binary()?;
        if !self.is_repository() {
            return Err(GitError::NotARepository(self.path.clone()));
        }
        Ok(binary)
    }

    fn git(&self, binary: &Path, args: &[&str]) -> GitResult<String> {
        let mut command = git_command(binary);
        command.arg("-C").arg(&self.path).args(args);
        run(&mut command, args)
    }
}

/// Clone `url` into `dest`, which must be empty or absent
pub fn clone(url: &str, dest: &Path) -> GitResult<()> {
    let binary = git_binary()?;
    let mut command = git_command(&binary);
    command.arg("clone").arg(url).arg(dest);
    run(&mut command, &["clone", url])?;
    Ok(())
}

/// Notified after every successful store mutation
pub trait MutationObserver {
    fn mutated(&self, root: &Path, message: &str);
}

/// Commits the store tree after each mutation
#[derive(Debug, Clone, Copy, Default)]
pub struct GitObserver;

impl MutationObserver for GitObserver {
    fn mutated(&self, root: &Path, message: &str) {
        match Repository::new(root).commit(message) {
            Ok(()) => {}
            Err(e) if e.is_skipped() => debug!("GitObserver: skipped: {}", e),
            Err(e) => warn!("version control warning: {}", e),
        }
    }
}

fn git_binary() -> GitResult<PathBuf> {
    process::which(&["git"]).ok_or(GitError::Unavailable)
}

/// Commits need a committer; fall back to the store identity when the
/// environment provides none
fn git_command(binary: &Path) -> Command {
    let mut command = Command::new(binary);
    for (key, value) in [
        ("GIT_COMMITTER_NAME", AUTHOR_NAME),
        ("GIT_COMMITTER_EMAIL", AUTHOR_EMAIL),
    ] {
        if env::var_os(key).is_none() {
            command.env(key, value);
        }
    }
    command
}

fn run(command: &mut Command, args: &[&str]) -> GitResult<String> {
    let output = process::run(command, None)?;
    if !output.success {
        return Err(GitError::CommandFailed {
            command: args.first().copied().unwrap_or("git").to_string(),
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output.stdout)
}

fn parse_log(output: &str) -> Vec<Commit> {
    output
        .lines()
        .filter_map(|line| line.rsplit_once('|'))
        .map(|(message, sha)| Commit {
            message: message.to_string(),
            sha: sha.trim().to_string(),
        })
        .collect()
}
