use std::path::{Path, PathBuf};

use super::membership::{CgroupMembership, read_memberships};
use super::{CgroupBinding, CgroupVersion, Controller, DEFAULT_CGROUP_ROOT, Error, Result};
use crate::fsutil::host_path;
use crate::mounts::{self, MountTable};
use crate::report::{Failure, FailureKind};

const MOUNTS_PATH: &str = "/proc/mounts";
const SELF_CGROUP_PATH: &str = "/proc/self/cgroup";
const UNIFIED_MARKER: &str = "/sys/fs/cgroup/cgroup.controllers";

/// Resolves the cgroup binding of the current process, reading every pseudo-file under `root`.
///
/// Never fails as a whole: anything that cannot be determined is recorded per controller in
/// [`CgroupBinding::unresolved`].
pub fn resolve(root: &Path) -> CgroupBinding {
    let table = match mounts::read_mount_table(host_path(root, MOUNTS_PATH)) {
        Ok(table) => table,
        Err(err) => {
            log::warn!("Mount table unavailable, assuming no cgroup hierarchy: {err}");
            let failure = Failure::from(&err);
            let mut binding = CgroupBinding::new(CgroupVersion::None);
            binding.notes.push(format!("mount table unavailable: {failure}"));
            for controller in Controller::ALL {
                binding.unresolved.insert(controller, failure.clone());
            }
            return binding;
        }
    };

    let version = detect_version(&table);
    log::debug!("Detected cgroup version: {version}");
    let mut binding = CgroupBinding::new(version);
    binding.cgroup_mounts = table
        .cgroup2_mount()
        .into_iter()
        .chain(table.cgroup_v1_mounts())
        .cloned()
        .collect();
    if !table.malformed_lines().is_empty() {
        binding
            .notes
            .push(skipped_lines_note(MOUNTS_PATH, table.malformed_lines()));
    }

    if table.cgroup2_mount().is_some() && table.cgroup_v1_mounts().next().is_some() {
        binding.notes.push(
            "hybrid possible: cgroup2 and cgroup v1 mounts are both present, using v2".to_owned(),
        );
    }
    if host_path(root, UNIFIED_MARKER).exists() {
        binding
            .notes
            .push(format!("unified hierarchy marker {UNIFIED_MARKER} present"));
    }

    if version == CgroupVersion::None {
        let failure = Failure::not_found("no cgroup mounts in mount table");
        for controller in Controller::ALL {
            binding.unresolved.insert(controller, failure.clone());
        }
        return binding;
    }

    let memberships = match read_memberships(&host_path(root, SELF_CGROUP_PATH)) {
        Ok(memberships) => {
            if !memberships.malformed_lines.is_empty() {
                binding.notes.push(skipped_lines_note(
                    SELF_CGROUP_PATH,
                    &memberships.malformed_lines,
                ));
            }
            memberships.entries
        }
        Err(err) => {
            log::warn!("Failed to read cgroup membership: {err}");
            let failure = Failure::from(&err);
            for controller in Controller::ALL {
                binding.unresolved.insert(controller, failure.clone());
            }
            return binding;
        }
    };

    if version == CgroupVersion::V2 {
        binding.relative_path = memberships
            .iter()
            .find(|m| m.is_unified())
            .map(|m| m.path.clone());
        match resolve_v2(root, &table, &memberships) {
            Ok(path) => {
                for controller in Controller::ALL {
                    binding.controller_paths.insert(controller, path.clone());
                }
            }
            Err(err) => {
                let failure = Failure::from(&err);
                for controller in Controller::ALL {
                    binding.unresolved.insert(controller, failure.clone());
                }
            }
        }
        return binding;
    }

    for controller in Controller::ALL {
        match resolve_v1(root, &table, &memberships, controller) {
            Ok(path) => {
                binding.controller_paths.insert(controller, path);
            }
            Err(err) => {
                log::debug!("Could not resolve cgroup v1 `{controller}` controller: {err}");
                binding.unresolved.insert(controller, Failure::from(&err));
            }
        }
    }

    binding
}

fn skipped_lines_note(origin: &str, lines: &[usize]) -> String {
    let lines: Vec<String> = lines.iter().map(usize::to_string).collect();
    let failure = Failure::new(
        FailureKind::Malformed,
        format!("skipped unparseable line {} in {origin}", lines.join(", ")),
    );
    failure.to_string()
}

/// Unified type wins; otherwise any v1 entry means v1; otherwise none.
fn detect_version(table: &MountTable) -> CgroupVersion {
    if table.cgroup2_mount().is_some() {
        CgroupVersion::V2
    } else if table.cgroup_v1_mounts().next().is_some() {
        CgroupVersion::V1
    } else {
        CgroupVersion::None
    }
}

fn resolve_v2(
    root: &Path,
    table: &MountTable,
    memberships: &[CgroupMembership],
) -> Result<PathBuf> {
    let unified = memberships
        .iter()
        .find(|m| m.is_unified())
        .ok_or_else(|| Error::MissingMembership {
            path: PathBuf::from(SELF_CGROUP_PATH),
            controller: "0::".to_owned(),
        })?;

    let mount_point = table
        .cgroup2_mount()
        .map(|m| m.mount_point.as_str())
        .unwrap_or(DEFAULT_CGROUP_ROOT);

    let candidates = [join_relative(mount_point, &unified.path), mount_point.to_owned()];
    first_existing(root, "unified", &candidates)
}

fn resolve_v1(
    root: &Path,
    table: &MountTable,
    memberships: &[CgroupMembership],
    controller: Controller,
) -> Result<PathBuf> {
    let name = controller.name();
    let lines: Vec<_> = memberships
        .iter()
        .filter(|m| m.has_controller(name))
        .collect();
    if lines.is_empty() {
        return Err(Error::MissingMembership {
            path: PathBuf::from(SELF_CGROUP_PATH),
            controller: name.to_owned(),
        });
    }

    let mut hierarchy_roots: Vec<String> = table
        .cgroup_v1_mounts_for(name)
        .map(|m| m.mount_point.clone())
        .collect();
    let conventional = format!("{DEFAULT_CGROUP_ROOT}/{name}");
    if !hierarchy_roots.contains(&conventional) {
        hierarchy_roots.push(conventional);
    }

    let mut candidates = Vec::new();
    for line in &lines {
        for hierarchy_root in &hierarchy_roots {
            candidates.push(join_relative(hierarchy_root, &line.path));
        }
    }
    // Inside a cgroup namespace the relative path names a directory that is not visible; the
    // hierarchy root is then the process's own cgroup.
    candidates.extend(hierarchy_roots.iter().cloned());
    candidates.dedup();

    first_existing(root, name, &candidates)
}

fn first_existing(root: &Path, controller: &str, candidates: &[String]) -> Result<PathBuf> {
    for candidate in candidates {
        let path = host_path(root, candidate);
        if path.is_dir() {
            log::debug!("Resolved `{controller}` cgroup path: {}", path.display());
            return Ok(path);
        }
        log::trace!("Rejected `{controller}` cgroup candidate: {}", path.display());
    }

    Err(Error::NoCandidate {
        controller: controller.to_owned(),
        tried: candidates.join(", "),
    })
}

fn join_relative(hierarchy_root: &str, relative: &str) -> String {
    let relative = relative.trim_matches('/');
    if relative.is_empty() {
        hierarchy_root.to_owned()
    } else {
        format!("{}/{relative}", hierarchy_root.trim_end_matches('/'))
    }
}
