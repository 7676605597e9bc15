//! Cgroup version resolution and limit extraction.
//!
//! The resolver decides whether the process lives in a v1, v2 or no cgroup hierarchy and finds
//! the directory each controller of interest is bound to. The extractor then reads the limit
//! file of each controller and normalizes it into a [`LimitValue`](crate::report::LimitValue).
//!
//! # `/proc/<pid>/cgroup` format
//!
//! ```text
//! <hierarchy-id>:<controller-list>:<cgroup-path>
//! ```
//!
//! - `<hierarchy-id>`: v1 an arbitrary number, v2 always `0`.
//! - `<controller-list>`: v1 comma-separated controllers, e.g. `cpu,cpuacct`; v2 always empty.
//! - `<cgroup-path>`: path relative to the root of the hierarchy.
//!
//! # Hybrid hosts
//!
//! A host may mount both layouts. The unified hierarchy is checked first and is treated as
//! authoritative; the presence of v1 mounts alongside it is only surfaced as a note.
mod error;
mod limits;
mod membership;
mod probe;
mod resolver;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub use error::{Error, Result};
pub use limits::{CpuQuota, ControllerLimit, extract_limit, parse_bytes_limit, parse_count_limit};
pub use membership::{CgroupMembership, parse_membership_line};
pub use probe::{CgroupReport, SECTION, inspect, probe};
pub use resolver::resolve;

use crate::mounts::MountEntry;
use crate::report::Failure;

/// Default mount point of the cgroup filesystem.
pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Active cgroup layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    None,
    V1,
    V2,
}

impl fmt::Display for CgroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CgroupVersion::None => "none",
            CgroupVersion::V1 => "v1",
            CgroupVersion::V2 => "v2",
        };
        write!(f, "{name}")
    }
}

/// Controllers whose limits are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Controller {
    Pids,
    Memory,
    Cpu,
}

impl Controller {
    pub const ALL: [Controller; 3] = [Controller::Pids, Controller::Memory, Controller::Cpu];

    pub fn name(self) -> &'static str {
        match self {
            Controller::Pids => "pids",
            Controller::Memory => "memory",
            Controller::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of resolving the cgroup hierarchy for the current process.
///
/// Derived entirely from current pseudo-filesystem state and never cached across runs.
#[derive(Debug, Clone, PartialEq)]
pub struct CgroupBinding {
    pub version: CgroupVersion,
    /// Host-side directory each resolved controller is bound to.
    pub controller_paths: BTreeMap<Controller, PathBuf>,
    /// Why a controller could not be resolved.
    pub unresolved: BTreeMap<Controller, Failure>,
    /// Supporting observations, e.g. a possible hybrid layout.
    pub notes: Vec<String>,
    /// The `cgroup2` mount, if any, followed by every v1 mount in table order.
    pub cgroup_mounts: Vec<MountEntry>,
    /// The `0::` path of the process, when the unified hierarchy is in use.
    pub relative_path: Option<String>,
}

impl CgroupBinding {
    pub fn new(version: CgroupVersion) -> Self {
        Self {
            version,
            controller_paths: BTreeMap::new(),
            unresolved: BTreeMap::new(),
            notes: Vec::new(),
            cgroup_mounts: Vec::new(),
            relative_path: None,
        }
    }

    pub fn path(&self, controller: Controller) -> std::result::Result<&PathBuf, &Failure> {
        match self.controller_paths.get(&controller) {
            Some(path) => Ok(path),
            None => Err(self
                .unresolved
                .get(&controller)
                .unwrap_or(&NOT_RESOLVED)),
        }
    }
}

static NOT_RESOLVED: Failure = Failure {
    kind: crate::report::FailureKind::NotFound,
    detail: String::new(),
};
