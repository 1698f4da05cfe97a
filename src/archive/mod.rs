//! Store sources and archive formats
//!
//! A store can be opened from a plain directory, a git URL, or a single-file
//! archive (tar, gzip/bzip2-compressed tar, zip). Non-directory sources are
//! materialised into a temporary working directory and packed back over the
//! original artifact when the store is synced.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tempfile::{NamedTempFile, TempDir};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::git::{self, GitError};

/// Zero-byte file marking the root of a store
pub const MARKER_FILE: &str = ".passhold";
pub const CONFIG_FILE: &str = "config.yml";
pub const KEYS_FILE: &str = "keys.yml";

const GIT_URL_PATTERN: &str =
    r"^((git|ssh|http(s)?)|(git@[\w\.]+))(:(//)?)([\w\.@:/\-~]+)(\.git)(/)?$";

const TAR_MAGIC_OFFSET: usize = 257;
const TAR_MAGIC: &[u8] = b"ustar";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const BZIP2_MAGIC: &[u8] = b"BZh";
const ZIP_MAGICS: &[&[u8]] = &[b"PK\x03\x04", b"PK\x05\x06"];

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("unrecognized store source: {0}")]
    UnrecognizedSource(String),

    #[error("not a passhold store (needs .passhold and config.yml): {}", .0.display())]
    InvalidStore(PathBuf),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("cannot clone store: {0}")]
    Clone(#[from] GitError),

    #[error("unknown format {0:?}, expected one of dir, git, tar, gztar, bztar, zip")]
    UnknownFormat(String),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// How a store source is laid out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Dir,
    Git,
    Tar,
    #[default]
    Gztar,
    Bztar,
    Zip,
}

impl SourceFormat {
    pub const ALL: [SourceFormat; 6] = [
        SourceFormat::Dir,
        SourceFormat::Git,
        SourceFormat::Tar,
        SourceFormat::Gztar,
        SourceFormat::Bztar,
        SourceFormat::Zip,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Dir => "dir",
            SourceFormat::Git => "git",
            SourceFormat::Tar => "tar",
            SourceFormat::Gztar => "gztar",
            SourceFormat::Bztar => "bztar",
            SourceFormat::Zip => "zip",
        }
    }

    /// Single-file formats that must be repacked after changes
    pub fn is_archive(&self) -> bool {
        matches!(
            self,
            SourceFormat::Tar | SourceFormat::Gztar | SourceFormat::Bztar | SourceFormat::Zip
        )
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceFormat {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|format| format.as_str() == s)
            .ok_or_else(|| ArchiveError::UnknownFormat(s.to_string()))
    }
}

pub fn is_git_url(source: &str) -> bool {
    Regex::new(GIT_URL_PATTERN)
        .map(|re| re.is_match(source))
        .unwrap_or(false)
}

/// Work out the format of `source`.
///
/// Files are identified by content, never by extension. Anything that is not
/// a git URL, a directory or a recognised archive is rejected.
pub fn detect_format(source: &str) -> ArchiveResult<SourceFormat> {
    if is_git_url(source) {
        return Ok(SourceFormat::Git);
    }

    let path = Path::new(source);
    if path.is_dir() {
        return Ok(SourceFormat::Dir);
    }
    if !path.is_file() {
        return Err(ArchiveError::UnrecognizedSource(source.to_string()));
    }

    let header = read_prefix(File::open(path).map_err(io_error(path))?)
        .map_err(io_error(path))?;

    let format = if header.starts_with(GZIP_MAGIC) {
        let file = File::open(path).map_err(io_error(path))?;
        read_prefix(GzDecoder::new(file))
            .ok()
            .filter(|inner| is_tar_header(inner))
            .map(|_| SourceFormat::Gztar)
    } else if header.starts_with(BZIP2_MAGIC) {
        let file = File::open(path).map_err(io_error(path))?;
        read_prefix(BzDecoder::new(file))
            .ok()
            .filter(|inner| is_tar_header(inner))
            .map(|_| SourceFormat::Bztar)
    } else if ZIP_MAGICS.iter().any(|magic| header.starts_with(magic)) {
        Some(SourceFormat::Zip)
    } else if is_tar_header(&header) {
        Some(SourceFormat::Tar)
    } else {
        None
    };

    format.ok_or_else(|| ArchiveError::UnrecognizedSource(source.to_string()))
}

/// Up to one tar block from `reader`
fn read_prefix(reader: impl Read) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(512);
    reader.take(512).read_to_end(&mut buf)?;
    Ok(buf)
}

fn is_tar_header(block: &[u8]) -> bool {
    block.get(TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()) == Some(TAR_MAGIC)
}

/// A source turned into a working directory
#[derive(Debug)]
pub struct Materialized {
    pub root: PathBuf,
    pub format: SourceFormat,
    /// Owns the extracted or cloned tree; `None` for in-place directories
    pub workspace: Option<TempDir>,
}

/// Produce a working directory for `source` and locate the store root in it
pub fn materialize(source: &str) -> ArchiveResult<Materialized> {
    let format = detect_format(source)?;
    let path = Path::new(source);

    let workspace = match format {
        SourceFormat::Dir => None,
        SourceFormat::Git => {
            let dir = TempDir::new().map_err(io_error(path))?;
            git::clone(source, dir.path())?;
            Some(dir)
        }
        _ => {
            let dir = TempDir::new().map_err(io_error(path))?;
            unpack(path, dir.path(), format)?;
            Some(dir)
        }
    };

    let base = workspace.as_ref().map_or(path, |dir| dir.path());
    let root = find_store_root(base)?.ok_or_else(|| ArchiveError::InvalidStore(base.to_path_buf()))?;
    if !root.join(CONFIG_FILE).is_file() {
        return Err(ArchiveError::InvalidStore(root));
    }

    debug!("materialize: {} ({}) at {}", source, format, root.display());
    Ok(Materialized {
        root,
        format,
        workspace,
    })
}

/// First directory, breadth first from `base`, that holds the store marker
pub fn find_store_root(base: &Path) -> ArchiveResult<Option<PathBuf>> {
    let mut queue = vec![base.to_path_buf()];

    while !queue.is_empty() {
        let mut next = Vec::new();
        for dir in queue {
            if dir.join(MARKER_FILE).is_file() {
                return Ok(Some(dir));
            }

            let mut children = Vec::new();
            for entry in fs::read_dir(&dir).map_err(io_error(&dir))? {
                let entry = entry.map_err(io_error(&dir))?;
                let is_dir = entry.file_type().map_err(io_error(&dir))?.is_dir();
                if is_dir && entry.file_name() != ".git" {
                    children.push(entry.path());
                }
            }
            children.sort();
            next.extend(children);
        }
        queue = next;
    }

    Ok(None)
}

fn unpack(archive: &Path, dest: &Path, format: SourceFormat) -> ArchiveResult<()> {
    let file = File::open(archive).map_err(io_error(archive))?;

    match format {
        SourceFormat::Tar => tar::Archive::new(file).unpack(dest),
        SourceFormat::Gztar => tar::Archive::new(GzDecoder::new(file)).unpack(dest),
        SourceFormat::Bztar => tar::Archive::new(BzDecoder::new(file)).unpack(dest),
        SourceFormat::Zip => {
            ZipArchive::new(file)?.extract(dest)?;
            Ok(())
        }
        SourceFormat::Dir | SourceFormat::Git => Ok(()),
    }
    .map_err(io_error(archive))
}

/// Write the store tree at `root` to `dest` in `format`.
///
/// Archives are built in a temporary file beside `dest` and renamed over it,
/// so a failed pack leaves the previous artifact untouched.
pub fn pack(root: &Path, dest: &Path, format: SourceFormat) -> ArchiveResult<()> {
    match format {
        SourceFormat::Git => Ok(()),
        SourceFormat::Dir => move_tree(root, dest),
        _ => {
            let parent = match dest.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            fs::create_dir_all(parent).map_err(io_error(parent))?;

            let mut staged = NamedTempFile::new_in(parent).map_err(io_error(parent))?;
            write_archive(root, staged.as_file_mut(), format)?;
            staged.as_file().sync_all().map_err(io_error(dest))?;
            staged
                .persist(dest)
                .map_err(|e| ArchiveError::Io {
                    path: dest.to_path_buf(),
                    source: e.error,
                })?;

            debug!("pack: {} -> {} ({})", root.display(), dest.display(), format);
            Ok(())
        }
    }
}

fn write_archive(root: &Path, file: &mut File, format: SourceFormat) -> ArchiveResult<()> {
    match format {
        SourceFormat::Tar => write_tar(root, file).map(|_| ()),
        SourceFormat::Gztar => {
            let encoder = write_tar(root, GzEncoder::new(file, flate2::Compression::default()))?;
            encoder.finish().map(|_| ()).map_err(io_error(root))
        }
        SourceFormat::Bztar => {
            let encoder = write_tar(root, BzEncoder::new(file, bzip2::Compression::best()))?;
            encoder.finish().map(|_| ()).map_err(io_error(root))
        }
        SourceFormat::Zip => write_zip(root, file),
        SourceFormat::Dir | SourceFormat::Git => Ok(()),
    }
}

/// Tar `root` into `writer` and hand the writer back for finishing
fn write_tar<W: Write>(root: &Path, writer: W) -> ArchiveResult<W> {
    let mut builder = tar::Builder::new(writer);
    builder.append_dir_all(".", root).map_err(io_error(root))?;
    builder.into_inner().map_err(io_error(root))
}

fn write_zip(root: &Path, file: &mut File) -> ArchiveResult<()> {
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = Vec::new();
    walk_tree(root, root, &mut entries)?;

    for (relative, path) in entries {
        if path.is_dir() {
            zip.add_directory(relative, options)?;
        } else {
            zip.start_file(relative, options)?;
            let mut source = File::open(&path).map_err(io_error(&path))?;
            io::copy(&mut source, &mut zip).map_err(io_error(&path))?;
        }
    }

    zip.finish()?;
    Ok(())
}

/// Every entry below `dir` as (`/`-separated path relative to `root`, path), parents first
fn walk_tree(root: &Path, dir: &Path, entries: &mut Vec<(String, PathBuf)>) -> ArchiveResult<()> {
    let mut children: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(io_error(dir))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<_>>()
        .map_err(io_error(dir))?;
    children.sort();

    for path in children {
        let relative = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        if path.is_dir() {
            entries.push((relative, path.clone()));
            walk_tree(root, &path, entries)?;
        } else {
            entries.push((relative, path));
        }
    }
    Ok(())
}

fn move_tree(root: &Path, dest: &Path) -> ArchiveResult<()> {
    if root == dest {
        return Ok(());
    }
    if fs::rename(root, dest).is_ok() {
        return Ok(());
    }

    // rename fails across filesystems
    copy_tree(root, dest)?;
    fs::remove_dir_all(root).map_err(io_error(root))
}

fn copy_tree(src: &Path, dest: &Path) -> ArchiveResult<()> {
    fs::create_dir_all(dest).map_err(io_error(dest))?;
    for entry in fs::read_dir(src).map_err(io_error(src))? {
        let entry = entry.map_err(io_error(src))?;
        let target = dest.join(entry.file_name());
        if entry.file_type().map_err(io_error(src))?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(io_error(&target))?;
        }
    }
    Ok(())
}
