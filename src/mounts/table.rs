use std::io::BufRead;
use std::path::Path;

use super::parser::{MountEntry, parse_mounts_line};
use super::{Error, Result};
use crate::fsutil;

/// Filesystem type of the unified (v2) cgroup hierarchy.
pub const CGROUP2_FS_TYPE: &str = "cgroup2";
/// Filesystem type of a per-controller (v1) cgroup hierarchy.
pub const CGROUP_V1_FS_TYPE: &str = "cgroup";

/// The parsed mount table of one process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountTable {
    entries: Vec<MountEntry>,
    malformed_lines: Vec<usize>,
}

impl MountTable {
    pub fn new(entries: Vec<MountEntry>) -> Self {
        Self {
            entries,
            malformed_lines: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    /// One-based numbers of the lines that were skipped because they failed to parse.
    pub fn malformed_lines(&self) -> &[usize] {
        &self.malformed_lines
    }

    /// Returns the first `cgroup2` mount, if any.
    pub fn cgroup2_mount(&self) -> Option<&MountEntry> {
        self.entries.iter().find(|e| e.fs_type == CGROUP2_FS_TYPE)
    }

    /// Returns every cgroup v1 mount in table order.
    pub fn cgroup_v1_mounts(&self) -> impl Iterator<Item = &MountEntry> {
        self.entries
            .iter()
            .filter(|e| e.fs_type == CGROUP_V1_FS_TYPE)
    }

    /// Returns the v1 mounts that carry `controller` in their options.
    pub fn cgroup_v1_mounts_for<'a>(
        &'a self,
        controller: &'a str,
    ) -> impl Iterator<Item = &'a MountEntry> + 'a {
        self.cgroup_v1_mounts()
            .filter(move |e| e.has_option(controller))
    }
}

/// Reads and parses a mount table file such as `/proc/mounts`.
///
/// Blank lines are skipped. A malformed line is logged and skipped, and its number is kept in
/// [`MountTable::malformed_lines`].
///
/// # Errors
///
/// Returns [`Error::Read`] if the file can't be opened or read.
pub fn read_mount_table(path: impl AsRef<Path>) -> Result<MountTable> {
    let path = path.as_ref();
    let reader = fsutil::open_file_reader(path).map_err(fsutil::ReadError::from)?;
    read_mount_table_from_reader(reader, path)
}

fn read_mount_table_from_reader<R: BufRead>(mut reader: R, origin: &Path) -> Result<MountTable> {
    let mut line = String::with_capacity(256);
    let mut table = MountTable::default();
    let mut lineno = 0;

    while reader.read_line(&mut line).map_err(|source| {
        Error::Read(fsutil::ReadError::Other {
            path: origin.to_path_buf(),
            source,
        })
    })? != 0
    {
        lineno += 1;
        if !line.trim().is_empty() {
            match parse_mounts_line(&line) {
                Ok(entry) => {
                    if entry.fs_type.starts_with(CGROUP_V1_FS_TYPE) {
                        log::debug!("Found cgroup mount: {entry}");
                    }
                    table.entries.push(entry);
                }
                Err(source) => {
                    let err = Error::Parse {
                        path: origin.to_path_buf(),
                        line: lineno,
                        source,
                    };
                    log::warn!("Skipping mount table line: {err}");
                    table.malformed_lines.push(lineno);
                }
            }
        }

        line.clear();
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use tempfile::NamedTempFile;

    use super::*;

    fn new_cursor_from_contents(contents: &str) -> Cursor<Vec<u8>> {
        Cursor::new(contents.as_bytes().to_vec())
    }

    #[test]
    fn test_detect_cgroup2_mount() {
        let input = "\
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
cgroup2 /sys/fs/cgroup cgroup2 rw,nosuid,nodev,noexec,relatime 0 0
";
        let table = read_mount_table_from_reader(new_cursor_from_contents(input), Path::new("/dummy"))
            .unwrap();
        assert_eq!(table.entries().len(), 2);
        assert_eq!(table.cgroup2_mount().unwrap().mount_point, "/sys/fs/cgroup");
        assert_eq!(table.cgroup_v1_mounts().count(), 0);
    }

    #[test]
    fn test_cgroup_v1_mounts_for_controller() {
        let input = "\
tmpfs /sys/fs/cgroup tmpfs ro,nosuid,nodev,noexec,mode=755 0 0
cgroup /sys/fs/cgroup/memory cgroup rw,nosuid,nodev,noexec,relatime,memory 0 0
cgroup /sys/fs/cgroup/pids cgroup rw,nosuid,nodev,noexec,relatime,pids 0 0
cgroup /sys/fs/cgroup/cpu,cpuacct cgroup rw,nosuid,nodev,noexec,relatime,cpu,cpuacct 0 0
";
        let table = read_mount_table_from_reader(new_cursor_from_contents(input), Path::new("/dummy"))
            .unwrap();
        assert!(table.cgroup2_mount().is_none());
        assert_eq!(table.cgroup_v1_mounts().count(), 3);
        let cpu: Vec<_> = table.cgroup_v1_mounts_for("cpu").collect();
        assert_eq!(cpu.len(), 1);
        assert_eq!(cpu[0].mount_point, "/sys/fs/cgroup/cpu,cpuacct");
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let input = "\nproc /proc proc rw 0 0\n\n";
        let table = read_mount_table_from_reader(new_cursor_from_contents(input), Path::new("/dummy"))
            .unwrap();
        assert_eq!(table.entries().len(), 1);
    }

    #[test]
    fn test_invalid_line_is_skipped_and_counted() {
        let input = "proc /proc proc rw 0 0\nbroken line\ncgroup2 /sys/fs/cgroup cgroup2 rw 0 0\n";
        let table = read_mount_table_from_reader(new_cursor_from_contents(input), Path::new("/dummy"))
            .unwrap();
        assert_eq!(table.entries().len(), 2);
        assert_eq!(table.malformed_lines(), &[2]);
        assert_eq!(table.cgroup2_mount().unwrap().mount_point, "/sys/fs/cgroup");
    }

    #[test]
    fn test_read_from_tempfile() {
        let mut tmp = NamedTempFile::new().unwrap();
        writeln!(tmp, "cgroup2 /sys/fs/cgroup cgroup2 rw 0 0").unwrap();
        let table = read_mount_table(tmp.path()).unwrap();
        assert!(table.cgroup2_mount().is_some());
    }

    #[test]
    fn test_missing_file() {
        let err = read_mount_table("/definitely/does/not/exist").unwrap_err();
        assert!(matches!(
            err,
            Error::Read(fsutil::ReadError::NotFound { .. })
        ));
    }
}
