use std::path::Path;

use super::{Error, Result};
use crate::fsutil;

/// One line of `/proc/<pid>/cgroup`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupMembership {
    pub hierarchy_id: String,
    /// Empty for the unified hierarchy.
    pub controllers: Vec<String>,
    /// Path relative to the hierarchy root, always starting with `/`.
    pub path: String,
}

impl CgroupMembership {
    /// True for the `0::<path>` line of the unified hierarchy.
    pub fn is_unified(&self) -> bool {
        self.hierarchy_id == "0" && self.controllers.is_empty()
    }

    pub fn has_controller(&self, controller: &str) -> bool {
        self.controllers.iter().any(|c| c == controller)
    }
}

/// Parses one `<hierarchy-id>:<controller-list>:<cgroup-path>` line.
///
/// The path may itself contain `:`, so only the first two separators are significant.
pub fn parse_membership_line(line: &str) -> Option<CgroupMembership> {
    let mut parts = line.trim_end().splitn(3, ':');
    let hierarchy_id = parts.next()?;
    let controllers = parts.next()?;
    let path = parts.next()?;
    if hierarchy_id.is_empty() {
        return None;
    }

    Some(CgroupMembership {
        hierarchy_id: hierarchy_id.to_owned(),
        controllers: controllers
            .split(',')
            .filter(|c| !c.is_empty())
            .map(str::to_owned)
            .collect(),
        path: path.to_owned(),
    })
}

/// Parsed lines of one `/proc/<pid>/cgroup` file.
#[derive(Debug, Default)]
pub(super) struct Memberships {
    pub entries: Vec<CgroupMembership>,
    /// One-based numbers of skipped lines.
    pub malformed_lines: Vec<usize>,
}

/// Reads and parses a `/proc/<pid>/cgroup` file.
///
/// Blank lines are skipped. Malformed lines are logged and skipped as well.
pub(super) fn read_memberships(path: &Path) -> Result<Memberships> {
    let content = fsutil::read_whole(path)?;
    let mut memberships = Memberships::default();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_membership_line(line) {
            Some(membership) => memberships.entries.push(membership),
            None => {
                let err = Error::MalformedMembership {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    content: line.to_owned(),
                };
                log::warn!("Skipping cgroup membership line: {err}");
                memberships.malformed_lines.push(idx + 1);
            }
        }
    }
    Ok(memberships)
}
