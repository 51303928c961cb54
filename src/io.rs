//! Loading a target file into a [`Document`] and writing it back.
//!
//! Writes are atomic: content goes to a temporary file in the same
//! directory, is synced, then renamed over the target.

use crate::document::Document;
use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Suffix of the single backup copy kept next to an edited file.
pub const BACKUP_SUFFIX: &str = ".cf-before-edit";

/// Default upper bound on the size of a file accepted for editing.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100_000;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("file path '{0}' is not absolute")]
    RelativePath(PathBuf),

    #[error("'{0}' is not a regular file")]
    NotRegular(PathBuf),

    #[error("'{path}' is {size} bytes, larger than the {limit} byte edit limit")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("'{0}' is not valid UTF-8")]
    NotUtf8(PathBuf),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IoError {
    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> IoError + '_ {
        move |source| IoError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Line terminator detected in the source file and reused on write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NewlineMode {
    #[default]
    Lf,
    Crlf,
}

impl NewlineMode {
    pub fn detect(content: &str) -> Self {
        if content.contains("\r\n") {
            NewlineMode::Crlf
        } else {
            NewlineMode::Lf
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NewlineMode::Lf => "\n",
            NewlineMode::Crlf => "\r\n",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupPolicy {
    #[default]
    None,
    /// Keep one copy at `<file>.cf-before-edit`.
    Single,
    /// Keep every copy at `<file>.cf-before-edit.<unix-seconds>`.
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Size limit in bytes; `0` disables the check.
    pub max_file_size: u64,
    /// Ignore the current content and start from an empty document.
    pub empty_before_use: bool,
    /// Treat a missing file as empty instead of failing.
    pub create: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            empty_before_use: false,
            create: false,
        }
    }
}

/// Split file content into lines, dropping the terminators.
pub fn split_lines(content: &str) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }
    let body = content.strip_suffix('\n').unwrap_or(content);
    body.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}

/// Serialize `doc` with the given newline convention. Every line, including
/// the last, is terminated.
pub fn render(doc: &Document, mode: NewlineMode) -> String {
    let newline = mode.as_str();
    let mut out = String::new();
    for (_, line) in doc.iter() {
        out.push_str(line);
        out.push_str(newline);
    }
    out
}

fn require_absolute(path: &Path) -> Result<(), IoError> {
    if path.is_absolute() {
        Ok(())
    } else {
        tracing::error!(
            target: "edit.io",
            path = %path.display(),
            "relative file name was marked for editing but has no invariant meaning"
        );
        Err(IoError::RelativePath(path.to_path_buf()))
    }
}

/// Read the raw text of `path`, enforcing the size limit.
fn read_checked(path: &Path, max_file_size: u64) -> Result<Option<String>, IoError> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(IoError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if !metadata.is_file() {
        return Err(IoError::NotRegular(path.to_path_buf()));
    }
    if max_file_size > 0 && metadata.len() > max_file_size {
        return Err(IoError::TooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            limit: max_file_size,
        });
    }

    let bytes = fs::read(path).map_err(IoError::io(path))?;
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|_| IoError::NotUtf8(path.to_path_buf()))
}

/// Load `path` into a document and report its newline convention.
pub fn load_lines(path: &Path, options: &LoadOptions) -> Result<(Document, NewlineMode), IoError> {
    require_absolute(path)?;

    let content = match read_checked(path, options.max_file_size)? {
        Some(content) => content,
        None if options.create => {
            tracing::debug!(target: "edit.io", path = %path.display(), "file absent, starting empty");
            String::new()
        }
        None => {
            return Err(IoError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            })
        }
    };

    let mode = NewlineMode::detect(&content);
    if options.empty_before_use {
        tracing::debug!(target: "edit.io", path = %path.display(), "emptying file before editing");
        return Ok((Document::new(), mode));
    }

    let lines = split_lines(&content);
    tracing::debug!(
        target: "edit.io",
        path = %path.display(),
        lines = lines.len(),
        ?mode,
        "loaded file for editing"
    );
    Ok((Document::from_lines(lines), mode))
}

/// Re-read the current lines of `path`; a missing file reads as empty.
pub fn reread_lines(path: &Path) -> Result<Vec<String>, IoError> {
    Ok(read_checked(path, 0)?
        .map(|content| split_lines(&content))
        .unwrap_or_default())
}

fn backup_path(path: &Path, policy: BackupPolicy) -> Option<PathBuf> {
    let mut name = path.file_name()?.to_os_string();
    name.push(BACKUP_SUFFIX);
    match policy {
        BackupPolicy::None => return None,
        BackupPolicy::Single => {}
        BackupPolicy::Timestamp => {
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            name.push(format!(".{secs}"));
        }
    }
    Some(path.with_file_name(name))
}

/// Write `doc` to `path`, keeping a backup of the previous content per `backup`.
pub fn save_lines(
    path: &Path,
    doc: &Document,
    mode: NewlineMode,
    backup: BackupPolicy,
) -> Result<(), IoError> {
    require_absolute(path)?;

    if path.exists() {
        if let Some(copy) = backup_path(path, backup) {
            fs::copy(path, &copy).map_err(IoError::io(&copy))?;
            tracing::debug!(target: "edit.io", backup = %copy.display(), "kept backup");
        }
    }

    atomic_write(path, render(doc, mode).as_bytes())?;

    // Update mtime
    let now = filetime::FileTime::now();
    filetime::set_file_mtime(path, now).map_err(IoError::io(path))?;

    tracing::info!(target: "edit.io", path = %path.display(), lines = doc.len(), "saved edited file");
    Ok(())
}

fn atomic_write(path: &Path, content: &[u8]) -> Result<(), IoError> {
    let parent = path.parent().ok_or_else(|| IoError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path has no parent directory",
        ),
    })?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(IoError::io(parent))?;
    temp.write_all(content).map_err(IoError::io(path))?;
    temp.as_file().sync_all().map_err(IoError::io(path))?;
    temp.persist(path).map_err(|e| IoError::Io {
        path: path.to_path_buf(),
        source: e.error,
    })?;

    Ok(())
}
