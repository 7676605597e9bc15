//! Host facts: CPU counts, memory totals and kernel/platform identification.

use std::collections::BTreeSet;
use std::path::Path;

use crate::context::ProbeContext;
use crate::fsutil;
use crate::report::{Entry, Failure, FailureKind, Fragment, bytes_to_gib};

pub const SECTION: &str = "System Information";

/// Memory figures from `/proc/meminfo`, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemInfo {
    pub fn used_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        used as f64 * 100.0 / self.total_bytes as f64
    }
}

/// Parses the `MemTotal` and `MemAvailable` lines of `/proc/meminfo`.
///
/// Values are in kB in the file. `MemAvailable` falls back to `MemFree` on kernels without it.
pub fn parse_meminfo(content: &str) -> Option<MemInfo> {
    let mut total = None;
    let mut available = None;
    let mut free = None;

    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let kib = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok());
        match key {
            "MemTotal" => total = kib,
            "MemAvailable" => available = kib,
            "MemFree" => free = kib,
            _ => {}
        }
    }

    Some(MemInfo {
        total_bytes: total? * 1024,
        available_bytes: available.or(free)? * 1024,
    })
}

/// Reads `/proc/meminfo` under `root`.
pub fn read_meminfo(root: &Path) -> Result<MemInfo, Failure> {
    let path = fsutil::host_path(root, "/proc/meminfo");
    let content = fsutil::read_whole(&path).map_err(Failure::from)?;
    parse_meminfo(&content).ok_or_else(|| {
        Failure::new(
            FailureKind::Malformed,
            format!("{}: no MemTotal/MemAvailable", path.display()),
        )
    })
}

/// Counts distinct `(physical id, core id)` pairs in `/proc/cpuinfo`.
///
/// Returns `None` when the file carries no topology, as on many virtual machines and non-x86
/// hosts.
pub fn count_physical_cores(cpuinfo: &str) -> Option<usize> {
    let mut cores = BTreeSet::new();

    for block in cpuinfo.split("\n\n") {
        let field = |name: &str| {
            block.lines().find_map(|line| {
                let (key, value) = line.split_once(':')?;
                (key.trim() == name).then(|| value.trim().to_owned())
            })
        };
        if let (Some(physical), Some(core)) = (field("physical id"), field("core id")) {
            cores.insert((physical, core));
        }
    }

    (!cores.is_empty()).then_some(cores.len())
}

/// Number of CPUs this process may run on.
pub fn logical_cpus() -> Result<usize, Failure> {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .map_err(|err| Failure::new(FailureKind::Other, err.to_string()))
}

/// Kernel release from the third token of `/proc/version`.
fn kernel_release(root: &Path) -> Result<String, Failure> {
    let path = fsutil::host_path(root, "/proc/version");
    let content = fsutil::read_trimmed(&path).map_err(Failure::from)?;
    content
        .split_whitespace()
        .nth(2)
        .map(str::to_owned)
        .ok_or_else(|| Failure::new(FailureKind::Malformed, path.display().to_string()))
}

/// System information detector.
pub fn probe(ctx: &ProbeContext) -> Fragment {
    let mut fragment = Fragment::builder(SECTION);
    fragment.push(Entry::from_result("CPU cores (logical)", logical_cpus()));

    let physical = fsutil::read_whole(ctx.path("/proc/cpuinfo"))
        .map_err(Failure::from)
        .and_then(|content| {
            count_physical_cores(&content).ok_or_else(|| {
                Failure::not_found("no physical id/core id topology in /proc/cpuinfo")
            })
        });
    fragment.push(Entry::from_result("CPU cores (physical)", physical));

    match read_meminfo(ctx.root()) {
        Ok(mem) => {
            fragment.push(Entry::value(
                "Memory total",
                format!("{:.2} GB", bytes_to_gib(mem.total_bytes)),
            ));
            fragment.push(Entry::value(
                "Memory available",
                format!("{:.2} GB", bytes_to_gib(mem.available_bytes)),
            ));
            fragment.push(Entry::value(
                "Memory used",
                format!("{:.1}%", mem.used_percent()),
            ));
        }
        Err(failure) => {
            fragment.push(Entry::failure("Memory total", failure));
        }
    }

    fragment.push(Entry::from_result("Kernel", kernel_release(ctx.root())));

    match nix::sys::utsname::uname() {
        Ok(uts) => {
            fragment.push(Entry::value(
                "Architecture",
                uts.machine().to_string_lossy(),
            ));
            fragment.push(Entry::value(
                "Platform",
                format!(
                    "{} {}",
                    uts.sysname().to_string_lossy(),
                    uts.release().to_string_lossy()
                ),
            ));
            fragment.push(Entry::value("Node name", uts.nodename().to_string_lossy()));
        }
        Err(errno) => {
            fragment.push(Entry::failure(
                "Platform",
                Failure::new(FailureKind::Other, format!("uname: {errno}")),
            ));
        }
    }

    fragment.build()
}
