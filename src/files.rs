//! Confined file writer
//!
//! Every write lands under a single base directory. Paths are rejected
//! syntactically first, then both the base and the target are canonicalized
//! (symlinks resolved) and compared component-wise, so a symlinked
//! subdirectory cannot carry a write outside the base.
//!
//! Files are created exclusively: an existing file is never read, truncated
//! or replaced, and of two concurrent writers to the same path exactly one
//! succeeds.

use std::io;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Mode for directories created on the way to a file
pub const DIR_MODE: u32 = 0o755;

/// Mode for written files
pub const FILE_MODE: u32 = 0o644;

/// File creation input
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct FileRequest {
    /// File name, no separators
    #[serde(default)]
    pub filename: String,
    /// File content, written verbatim
    #[serde(default)]
    pub content: String,
    /// Optional subdirectory under the base directory
    #[serde(default)]
    pub directory: Option<String>,
}

/// File write failures
#[derive(Debug, Error)]
pub enum WriteError {
    /// The requested path is unsafe or escapes the base directory
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The target exists. `race` is set when another writer created it
    /// between the existence check and the exclusive create.
    #[error("file already exists")]
    AlreadyExists {
        /// Lost the exclusive-create race
        race: bool,
    },

    /// Filesystem failure after the path was accepted
    #[error("failed to {op}: {source}")]
    Io {
        /// Operation that failed (`resolve`, `mkdir`, `write`)
        op: &'static str,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

impl WriteError {
    /// Short label for metrics and logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidPath(_) => "invalid_path",
            Self::AlreadyExists { .. } => "already_exists",
            Self::Io { op, .. } => *op,
        }
    }

    fn io(op: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { op, source }
    }
}

/// Writes files under a fixed base directory
#[derive(Debug, Clone)]
pub struct FileWriter {
    base_dir: PathBuf,
}

impl FileWriter {
    /// Writer confined to `base_dir` (created on first write if missing)
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Base directory as configured
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Write `content` to `base/directory/filename`.
    ///
    /// Returns the path relative to the base (`directory/filename`, or just
    /// `filename` when no directory was given).
    pub async fn write(
        &self,
        directory: Option<&str>,
        filename: &str,
        content: &[u8],
    ) -> Result<String, WriteError> {
        check_filename(filename)?;
        let directory = match directory {
            Some(dir) => clean_directory(dir)?,
            None => None,
        };

        let relative = match &directory {
            Some(dir) => dir.join(filename),
            None => PathBuf::from(filename),
        };
        let target = self.base_dir.join(&relative);

        let canonical_base = resolve(&self.base_dir).await.map_err(WriteError::io("resolve"))?;
        // Anything but a clean resolution here comes from the requested
        // path itself (a file used as a directory, an overlong name).
        let canonical_target = resolve(&target).await.map_err(unresolvable)?;
        if canonical_target != canonical_base && !canonical_target.starts_with(&canonical_base) {
            debug!(
                base = %canonical_base.display(),
                target = %canonical_target.display(),
                "Rejected path outside base directory"
            );
            return Err(WriteError::InvalidPath(
                "path escapes the base directory".to_string(),
            ));
        }

        // symlink_metadata: a dangling symlink still counts as existing.
        match tokio::fs::symlink_metadata(&target).await {
            Ok(_) => return Err(WriteError::AlreadyExists { race: false }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(unresolvable(e)),
        }

        if let Some(parent) = target.parent() {
            let mut builder = tokio::fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            builder.mode(DIR_MODE);
            builder.create(parent).await.map_err(WriteError::io("mkdir"))?;
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(FILE_MODE);

        let mut file = match options.open(&target).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(WriteError::AlreadyExists { race: true });
            }
            Err(e) => return Err(WriteError::io("write")(e)),
        };
        file.write_all(content).await.map_err(WriteError::io("write"))?;
        file.flush().await.map_err(WriteError::io("write"))?;

        Ok(relative_display(directory.as_deref(), filename))
    }
}

fn unresolvable(err: io::Error) -> WriteError {
    debug!(error = %err, "Rejected unresolvable target path");
    WriteError::InvalidPath(format!("cannot resolve target: {err}"))
}

fn check_filename(filename: &str) -> Result<(), WriteError> {
    if filename.contains('\0') {
        return Err(WriteError::InvalidPath("filename contains a NUL byte".to_string()));
    }
    if filename.contains("..") || filename.chars().any(std::path::is_separator) {
        return Err(WriteError::InvalidPath(
            "filename must not contain '..' or path separators".to_string(),
        ));
    }
    if filename.is_empty() || filename == "." {
        return Err(WriteError::InvalidPath("filename is empty".to_string()));
    }
    Ok(())
}

/// Lexically normalize a requested subdirectory.
///
/// `.` segments and `a/..` pairs collapse; what remains must be relative and
/// free of `..`. `None` means the directory normalized to nothing.
fn clean_directory(directory: &str) -> Result<Option<PathBuf>, WriteError> {
    let invalid = || {
        WriteError::InvalidPath("directory must be relative and stay inside the base".to_string())
    };

    if directory.contains('\0') {
        return Err(invalid());
    }

    let mut parts: Vec<String> = Vec::new();
    for component in Path::new(directory).components() {
        match component {
            Component::Prefix(_) | Component::RootDir => return Err(invalid()),
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(last) if last != ".." => {
                    parts.pop();
                }
                _ => parts.push("..".to_string()),
            },
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
        }
    }

    if parts.iter().any(|p| p.contains("..")) {
        return Err(invalid());
    }
    if parts.is_empty() {
        return Ok(None);
    }
    Ok(Some(parts.iter().collect()))
}

/// Canonicalize the deepest existing ancestor of `path` and re-append the
/// components below it.
async fn resolve(path: &Path) -> io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;

    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    loop {
        match tokio::fs::canonicalize(existing).await {
            Ok(mut resolved) => {
                resolved.extend(missing.iter().rev());
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
                    return Err(e);
                };
                missing.push(name.to_os_string());
                existing = parent;
            }
            Err(e) => return Err(e),
        }
    }
}

fn relative_display(directory: Option<&Path>, filename: &str) -> String {
    match directory {
        Some(dir) => {
            let mut parts: Vec<String> = dir
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            parts.push(filename.to_string());
            parts.join("/")
        }
        None => filename.to_string(),
    }
}
