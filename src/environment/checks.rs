use std::fs;
use std::path::Path;

use super::{Error, Result};
use crate::fsutil;

/// Returns true if `path` exists.
///
/// # Errors
///
/// Returns [`Error::ExistenceCheck`] if existence cannot be determined, e.g. because a parent
/// directory is not searchable.
pub fn marker_exists(path: &Path) -> Result<bool> {
    path.try_exists().map_err(|source| Error::ExistenceCheck {
        path: path.to_path_buf(),
        source,
    })
}

/// Returns true if the PID namespace of the current process differs from the one of PID 1.
///
/// # Arguments
///
/// * `rootfs` - Root the `/proc/<pid>/ns/pid` links are resolved under.
///
/// # Errors
///
/// Returns [`Error::ReadSymlink`] if reading either namespace link fails.
pub fn is_pid_namespace_isolated(rootfs: &Path) -> Result<bool> {
    let read_ns = |absolute: &str| {
        let path = fsutil::host_path(rootfs, absolute);
        fs::read_link(&path).map_err(|source| Error::ReadSymlink { path, source })
    };

    let self_ns = read_ns("/proc/self/ns/pid")?;
    let init_ns = read_ns("/proc/1/ns/pid")?;

    Ok(self_ns != init_ns)
}

/// Returns the first cgroup path segment that looks like a container id: at least 32 hex
/// characters.
pub fn find_container_id(cgroup_content: &str) -> Option<&str> {
    cgroup_content
        .lines()
        .flat_map(|line| line.split(['/', ':', '-', '.']))
        .find(|part| part.len() >= 32 && is_non_empty_hex_string(part))
}

/// Returns true if the input string is not empty and contains only ASCII hex digits.
pub fn is_non_empty_hex_string(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use super::*;

    #[test]
    fn test_is_hex_string_valid_hex() {
        assert!(is_non_empty_hex_string("deadbeef12345678"));
        assert!(is_non_empty_hex_string("ABCDEFabcdef0123456789"));
    }

    #[test]
    fn test_is_hex_string_invalid_hex() {
        assert!(!is_non_empty_hex_string("deadbeefXYZ"));
        assert!(!is_non_empty_hex_string("1234!@#$"));
        assert!(!is_non_empty_hex_string(""));
    }

    #[test]
    fn test_find_container_id() {
        let id = "4f2c1d9e8b7a6f5e4d3c2b1a0f9e8d7c6b5a4f3e2d1c0b9a8f7e6d5c4b3a2f1e";
        let content = format!("0::/system.slice/cri-containerd-{id}.scope\n");
        assert_eq!(find_container_id(&content), Some(id));
        assert_eq!(find_container_id("0::/user.slice/user-1000.slice\n"), None);
    }

    #[test]
    fn test_pid_namespace_isolated() {
        let tmp = tempfile::tempdir().unwrap();
        for (pid, ns) in [("self", "pid:[4026532001]"), ("1", "pid:[4026531836]")] {
            let dir = tmp.path().join("proc").join(pid).join("ns");
            fs::create_dir_all(&dir).unwrap();
            symlink(ns, dir.join("pid")).unwrap();
        }
        assert!(is_pid_namespace_isolated(tmp.path()).unwrap());
    }

    #[test]
    fn test_pid_namespace_missing_links() {
        let tmp = tempfile::tempdir().unwrap();
        let err = is_pid_namespace_isolated(tmp.path()).unwrap_err();
        assert!(matches!(err, Error::ReadSymlink { .. }));
    }

    #[test]
    fn test_marker_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join(".dockerenv");
        assert!(!marker_exists(&marker).unwrap());
        fs::write(&marker, "").unwrap();
        assert!(marker_exists(&marker).unwrap());
    }
}
