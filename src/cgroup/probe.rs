use std::collections::BTreeMap;
use std::path::Path;

use super::limits::{ControllerLimit, extract_limit};
use super::{CgroupBinding, Controller, resolve};
use crate::context::ProbeContext;
use crate::mounts::CGROUP_V1_FS_TYPE;
use crate::report::{Entry, Failure, Fragment};

pub const SECTION: &str = "Cgroup Limits";

/// Typed outcome of the cgroup detector.
#[derive(Debug, Clone)]
pub struct CgroupReport {
    pub binding: CgroupBinding,
    pub limits: BTreeMap<Controller, Result<ControllerLimit, Failure>>,
}

/// Resolves the binding and reads every controller's limit under `root`.
///
/// A controller whose path or limit file is missing is reported on its own and does not affect
/// the others.
pub fn inspect(root: &Path) -> CgroupReport {
    let binding = resolve(root);
    let limits = Controller::ALL
        .into_iter()
        .map(|controller| {
            let limit = binding
                .path(controller)
                .map_err(Failure::clone)
                .and_then(|dir| {
                    extract_limit(binding.version, controller, dir).map_err(|err| {
                        log::debug!("Reading `{controller}` limit failed: {err}");
                        Failure::from(&err)
                    })
                });
            (controller, limit)
        })
        .collect();

    CgroupReport { binding, limits }
}

/// Cgroup detector: hierarchy version, notes and one entry per controller.
pub fn probe(ctx: &ProbeContext) -> Fragment {
    let report = inspect(ctx.root());
    let mut fragment = Fragment::builder(SECTION);
    let binding = &report.binding;
    fragment.push(Entry::value("cgroup version", binding.version));
    fragment.extend(binding.notes.iter().map(Entry::remark));

    let v1_mounts = binding
        .cgroup_mounts
        .iter()
        .filter(|m| m.fs_type == CGROUP_V1_FS_TYPE)
        .count();
    if v1_mounts > 0 {
        fragment.push(Entry::value("cgroup v1 mounts", v1_mounts));
    }
    fragment.extend(
        binding
            .cgroup_mounts
            .iter()
            .map(|m| Entry::remark(format!("mount: {m}"))),
    );
    if let Some(path) = &binding.relative_path {
        fragment.push(Entry::value("current cgroup", path));
    }

    for (controller, limit) in &report.limits {
        let label = format!("{controller} limit");
        let entry = match limit {
            Ok(limit) => {
                let source = format!("from {}", limit.source.display());
                let note = match &limit.note {
                    Some(note) => format!("{note}; {source}"),
                    None => source,
                };
                Entry::value(label, &limit.value).with_note(note)
            }
            Err(failure) => Entry::failure(label, failure.clone()),
        };
        fragment.push(entry);
    }

    fragment.build()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::cgroup::CgroupVersion;
    use crate::fsutil::host_path;
    use crate::report::{FailureKind, LimitValue};

    fn write(root: &Path, absolute: &str, contents: &str) {
        let path = host_path(root, absolute);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_v2_only_host() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "/proc/mounts", "cgroup2 /sys/fs/cgroup cgroup2 rw 0 0\n");
        write(tmp.path(), "/proc/self/cgroup", "0::/\n");
        write(tmp.path(), "/sys/fs/cgroup/cgroup.controllers", "memory pids\n");
        write(tmp.path(), "/sys/fs/cgroup/memory.max", "max\n");
        write(tmp.path(), "/sys/fs/cgroup/pids.max", "100\n");

        let report = inspect(tmp.path());
        assert_eq!(report.binding.version, CgroupVersion::V2);
        assert_eq!(
            report.limits[&Controller::Memory].as_ref().unwrap().value,
            LimitValue::Unbounded
        );
        assert_eq!(
            report.limits[&Controller::Pids].as_ref().unwrap().value,
            LimitValue::Count(100)
        );
        let cpu = report.limits[&Controller::Cpu].as_ref().unwrap_err();
        assert_eq!(cpu.kind, FailureKind::NotFound);
    }

    #[test]
    fn test_no_cgroup_reports_not_found_everywhere() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "/proc/mounts", "proc /proc proc rw 0 0\n");

        let fragment = probe(&ProbeContext::new(tmp.path()));
        assert_eq!(
            fragment.entry("cgroup version").unwrap().value.as_deref(),
            Ok("none")
        );
        for controller in Controller::ALL {
            let entry = fragment.entry(&format!("{controller} limit")).unwrap();
            assert_eq!(entry.value.as_ref().unwrap_err().kind, FailureKind::NotFound);
        }
    }

    #[test]
    fn test_v1_memory_entry_in_gigabytes() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "/proc/mounts",
            "cgroup /sys/fs/cgroup/memory cgroup rw,memory 0 0\n",
        );
        write(tmp.path(), "/proc/self/cgroup", "7:memory:/job\n");
        write(
            tmp.path(),
            "/sys/fs/cgroup/memory/job/memory.limit_in_bytes",
            "1073741824\n",
        );

        let fragment = probe(&ProbeContext::new(tmp.path()));
        let entry = fragment.entry("memory limit").unwrap();
        assert_eq!(
            entry.value.as_deref(),
            Ok("1.00 GB (1073741824 bytes)")
        );
        assert!(entry.note.as_ref().unwrap().contains("memory.limit_in_bytes"));
        assert!(fragment.entry("pids limit").unwrap().is_failure());
        assert_eq!(
            fragment.entry("cgroup v1 mounts").unwrap().value.as_deref(),
            Ok("1")
        );
        assert!(fragment.entries().iter().any(|e| {
            e.note.as_deref() == Some("mount: cgroup /sys/fs/cgroup/memory cgroup rw,memory")
        }));
        assert!(fragment.entry("current cgroup").is_none());
    }

    #[test]
    fn test_v2_reports_mount_and_current_cgroup() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "/proc/mounts", "cgroup2 /sys/fs/cgroup cgroup2 rw,nsdelegate 0 0\n");
        write(tmp.path(), "/proc/self/cgroup", "0::/system.slice/job.service\n");
        write(
            tmp.path(),
            "/sys/fs/cgroup/system.slice/job.service/pids.max",
            "max\n",
        );

        let fragment = probe(&ProbeContext::new(tmp.path()));
        assert_eq!(
            fragment.entry("current cgroup").unwrap().value.as_deref(),
            Ok("/system.slice/job.service")
        );
        assert!(fragment.entries().iter().any(|e| {
            e.note.as_deref() == Some("mount: cgroup2 /sys/fs/cgroup cgroup2 rw,nsdelegate")
        }));
        assert!(fragment.entry("cgroup v1 mounts").is_none());
    }
}
