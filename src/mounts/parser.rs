//! Mount table line parser for Linux systems.
//!
//! Parses lines in `/proc/mounts` format, i.e. the `fstab(5)` layout:
//!
//! ```text
//! <source> <mount point> <fs type> <options> <dump> <pass>
//! ```
//!
//! Whitespace inside the source and mount point is encoded by the kernel as octal escapes
//! (`\040` for a space); those are decoded.

use std::borrow::Cow;

/// Represents a parsed mount table line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Source of the mount (e.g., device or `cgroup`).
    pub source: String,
    /// Absolute mount point.
    pub mount_point: String,
    /// Filesystem type (e.g., `ext4`, `cgroup2`).
    pub fs_type: String,
    /// Comma-separated mount options.
    pub options: String,
}

impl MountEntry {
    /// Returns true if `option` is one of the comma-separated mount options.
    ///
    /// cgroup v1 mounts list their controllers as options (`rw,nosuid,memory`).
    pub fn has_option(&self, option: &str) -> bool {
        self.options.split(',').any(|o| o == option)
    }
}

impl std::fmt::Display for MountEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.source, self.mount_point, self.fs_type, self.options
        )
    }
}

/// Named fields in a mount table line.
#[derive(Debug)]
pub enum MountField {
    Source,
    MountPoint,
    FsType,
    Options,
}

impl std::fmt::Display for MountField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MountField::Source => "source",
            MountField::MountPoint => "mount_point",
            MountField::FsType => "fs_type",
            MountField::Options => "options",
        };
        write!(f, "{name}")
    }
}

/// Errors that may occur when parsing a mount table line.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("missing `{field}` in line: `{line}`")]
    MissingField { field: MountField, line: String },
}

/// Parses a single line of `/proc/mounts`.
///
/// The trailing dump and pass columns are optional and ignored.
///
/// # Errors
///
/// Returns [`ParseError::MissingField`] if one of the four leading fields is absent.
pub fn parse_mounts_line(line: &str) -> Result<MountEntry, ParseError> {
    let line = line.trim_end();
    let mut fields = line.split_whitespace();
    let mut next = |field: MountField| {
        fields.next().ok_or_else(|| ParseError::MissingField {
            field,
            line: line.to_owned(),
        })
    };

    let source = next(MountField::Source)?;
    let mount_point = next(MountField::MountPoint)?;
    let fs_type = next(MountField::FsType)?;
    let options = next(MountField::Options)?;

    Ok(MountEntry {
        source: unescape_octal(source).into_owned(),
        mount_point: unescape_octal(mount_point).into_owned(),
        fs_type: fs_type.to_owned(),
        options: options.to_owned(),
    })
}

/// Decodes `\NNN` octal escapes as written by the kernel for space, tab, newline and backslash.
fn unescape_octal(field: &str) -> Cow<'_, str> {
    if !field.contains('\\') {
        return Cow::Borrowed(field);
    }

    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u16, |acc, b| acc * 8 + u16::from(b - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    Cow::Owned(String::from_utf8_lossy(&out).into_owned())
}
