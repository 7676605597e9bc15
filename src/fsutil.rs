//! Fault-tolerant access to single pseudo-files.
//!
//! This is the single choke point detectors use for reading `/proc` and `/sys`. Failures are
//! returned as typed values and are converted to report entries by the caller; nothing here
//! panics on a missing or unreadable file.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::report::{Failure, FailureKind};

/// Error that occurs when opening a file fails.
#[derive(Debug, thiserror::Error)]
#[error("failed to open file `{path}`: {source}")]
pub struct FileOpenError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Error returned by [`read_whole`] and [`read_lines_matching`].
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("`{path}` does not exist")]
    NotFound { path: PathBuf },
    #[error("permission denied reading `{path}`")]
    PermissionDenied { path: PathBuf },
    #[error("failed to read `{path}`: {source}")]
    Other {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ReadError {
    fn from_io(path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        match source.kind() {
            io::ErrorKind::NotFound => ReadError::NotFound { path },
            io::ErrorKind::PermissionDenied => ReadError::PermissionDenied { path },
            _ => ReadError::Other { path, source },
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            ReadError::NotFound { path }
            | ReadError::PermissionDenied { path }
            | ReadError::Other { path, .. } => path,
        }
    }
}

impl From<FileOpenError> for ReadError {
    fn from(err: FileOpenError) -> Self {
        ReadError::from_io(&err.path, err.source)
    }
}

impl From<&ReadError> for Failure {
    fn from(err: &ReadError) -> Self {
        match err {
            ReadError::NotFound { path } => {
                Failure::new(FailureKind::NotFound, path.display().to_string())
            }
            ReadError::PermissionDenied { path } => {
                Failure::new(FailureKind::PermissionDenied, path.display().to_string())
            }
            ReadError::Other { path, source } => Failure::new(
                FailureKind::Other,
                format!("{}: {source}", path.display()),
            ),
        }
    }
}

impl From<ReadError> for Failure {
    fn from(err: ReadError) -> Self {
        Failure::from(&err)
    }
}

/// Opens a file at the given path and wraps it in a [`BufReader`].
///
/// # Errors
///
/// Returns a [`FileOpenError`] if the file cannot be opened.
///
/// # Example
/// ```no_run
/// # use envprobe::fsutil;
/// let reader = fsutil::open_file_reader("/proc/self/limits")?;
/// # Ok::<(), fsutil::FileOpenError>(())
/// ```
pub fn open_file_reader(path: impl AsRef<Path>) -> Result<BufReader<File>, FileOpenError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| FileOpenError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

/// Reads the whole file into a string.
pub fn read_whole(path: impl AsRef<Path>) -> Result<String, ReadError> {
    let path = path.as_ref();
    std::fs::read_to_string(path).map_err(|source| ReadError::from_io(path, source))
}

/// Reads the whole file and trims surrounding whitespace, which is what every single-value
/// cgroup file needs.
pub fn read_trimmed(path: impl AsRef<Path>) -> Result<String, ReadError> {
    read_whole(path).map(|s| s.trim().to_owned())
}

/// Returns every line (without trailing newline) for which `predicate` holds.
///
/// # Errors
///
/// Returns a [`ReadError`] if the file cannot be opened or a line cannot be read.
pub fn read_lines_matching(
    path: impl AsRef<Path>,
    mut predicate: impl FnMut(&str) -> bool,
) -> Result<Vec<String>, ReadError> {
    let path = path.as_ref();
    let mut reader = open_file_reader(path)?;
    let mut line = String::with_capacity(256);
    let mut out = Vec::new();

    while reader
        .read_line(&mut line)
        .map_err(|source| ReadError::from_io(path, source))?
        != 0
    {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if predicate(trimmed) {
            out.push(trimmed.to_owned());
        }
        line.clear();
    }

    Ok(out)
}

/// Returns the first line for which `predicate` holds, or `None` if there is none or the file
/// cannot be read. Read failures are logged at debug level.
pub fn read_line_matching(
    path: impl AsRef<Path>,
    mut predicate: impl FnMut(&str) -> bool,
) -> Option<String> {
    let path = path.as_ref();
    let mut reader = match open_file_reader(path) {
        Ok(reader) => reader,
        Err(err) => {
            log::debug!("{err}");
            return None;
        }
    };

    let mut line = String::with_capacity(256);
    loop {
        match reader.read_line(&mut line) {
            Ok(0) => return None,
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\n', '\r']);
                if predicate(trimmed) {
                    return Some(trimmed.to_owned());
                }
                line.clear();
            }
            Err(err) => {
                log::debug!("failed to read line from `{}`: {err}", path.display());
                return None;
            }
        }
    }
}

/// Joins an absolute pseudo-file path onto a root filesystem.
///
/// `host_path("/rootfs", "/proc/mounts")` yields `/rootfs/proc/mounts`.
pub fn host_path(root: &Path, absolute: impl AsRef<Path>) -> PathBuf {
    let absolute = absolute.as_ref();
    root.join(absolute.strip_prefix("/").unwrap_or(absolute))
}
