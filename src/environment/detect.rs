use std::collections::BTreeSet;
use std::fmt;

use super::checks::{find_container_id, is_pid_namespace_isolated, marker_exists};
use crate::context::ProbeContext;
use crate::error::ResultOkLogExt;
use crate::fsutil;

/// Label reported when no heuristic matched.
pub const NONE_DETECTED: &str = "None detected";

/// How strongly a heuristic identifies a runtime. Ordered weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        };
        write!(f, "{name}")
    }
}

/// Supporting signal for one candidate runtime. Kept even when it is not the winning match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evidence {
    pub candidate_label: String,
    pub matched_indicators: BTreeSet<String>,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Copy)]
enum Check {
    /// A marker file exists.
    Marker(&'static str),
    /// The substring appears in `/proc/1/cgroup` or `/proc/self/cgroup`.
    CgroupContains(&'static str),
    /// A cgroup path segment looks like a container id.
    CgroupId,
    /// The `container` variable set by several runtimes.
    ContainerVar,
    PidNamespace,
}

#[derive(Debug, Clone, Copy)]
struct Heuristic {
    label: &'static str,
    confidence: Confidence,
    check: Check,
}

const CGROUP_FILES: [&str; 2] = ["/proc/1/cgroup", "/proc/self/cgroup"];

/// Evaluated in this order. Ties in confidence go to the earlier entry.
const HEURISTICS: &[Heuristic] = &[
    Heuristic {
        label: "Docker",
        confidence: Confidence::High,
        check: Check::Marker("/.dockerenv"),
    },
    Heuristic {
        label: "Podman",
        confidence: Confidence::High,
        check: Check::Marker("/run/.containerenv"),
    },
    Heuristic {
        label: "Docker (via cgroup)",
        confidence: Confidence::Medium,
        check: Check::CgroupContains("docker"),
    },
    Heuristic {
        label: "containerd",
        confidence: Confidence::Medium,
        check: Check::CgroupContains("containerd"),
    },
    Heuristic {
        label: "CRI-O",
        confidence: Confidence::Medium,
        check: Check::CgroupContains("crio"),
    },
    Heuristic {
        label: "Podman (via cgroup)",
        confidence: Confidence::Medium,
        check: Check::CgroupContains("libpod"),
    },
    Heuristic {
        label: "Kubernetes pod (via cgroup)",
        confidence: Confidence::Medium,
        check: Check::CgroupContains("kubepods"),
    },
    Heuristic {
        label: "Container (via cgroup id)",
        confidence: Confidence::Low,
        check: Check::CgroupId,
    },
    Heuristic {
        label: "Container (via env)",
        confidence: Confidence::Low,
        check: Check::ContainerVar,
    },
    Heuristic {
        label: "Container (via PID namespace)",
        confidence: Confidence::Low,
        check: Check::PidNamespace,
    },
];

/// Every piece of evidence found, in heuristic order.
#[derive(Debug, Clone, Default)]
pub struct ContainerDetection {
    pub evidence: Vec<Evidence>,
}

impl ContainerDetection {
    /// The highest-confidence match. Ties go to the earliest evidence.
    pub fn classification(&self) -> Option<&Evidence> {
        self.evidence.iter().fold(None, |best: Option<&Evidence>, e| match best {
            Some(b) if b.confidence >= e.confidence => Some(b),
            _ => Some(e),
        })
    }

    pub fn label(&self) -> &str {
        self.classification()
            .map_or(NONE_DETECTED, |e| e.candidate_label.as_str())
    }
}

/// Runs every container heuristic. A check that fails to run is logged and contributes no
/// evidence.
pub fn detect_container(ctx: &ProbeContext) -> ContainerDetection {
    let cgroups: Vec<(&str, String)> = CGROUP_FILES
        .iter()
        .filter_map(|file| {
            fsutil::read_whole(ctx.path(file))
                .ok_log_at(log::Level::Debug)
                .map(|content| (*file, content))
        })
        .collect();

    let evidence = HEURISTICS
        .iter()
        .filter_map(|heuristic| evaluate(heuristic, ctx, &cgroups))
        .collect();

    ContainerDetection { evidence }
}

fn evaluate(heuristic: &Heuristic, ctx: &ProbeContext, cgroups: &[(&str, String)]) -> Option<Evidence> {
    let mut label = heuristic.label.to_owned();
    let mut indicators = BTreeSet::new();

    match heuristic.check {
        Check::Marker(absolute) => match marker_exists(&ctx.path(absolute)) {
            Ok(true) => {
                indicators.insert(format!("{absolute} exists"));
            }
            Ok(false) => {}
            Err(err) => log::warn!("Marker check failed: {err}"),
        },
        Check::CgroupContains(needle) => {
            indicators.extend(
                cgroups
                    .iter()
                    .filter(|(_, content)| content.contains(needle))
                    .map(|(file, _)| format!("{file} mentions `{needle}`")),
            );
        }
        Check::CgroupId => {
            indicators.extend(cgroups.iter().filter_map(|(file, content)| {
                find_container_id(content).map(|id| format!("{file} has id segment {id}"))
            }));
        }
        Check::ContainerVar => {
            if let Some(value) = ctx.var("container") {
                label = format!("Container (via env: {value})");
                indicators.insert(format!("container={value}"));
            }
        }
        Check::PidNamespace => match is_pid_namespace_isolated(ctx.root()) {
            Ok(true) => {
                indicators.insert("PID namespace differs from PID 1".to_owned());
            }
            Ok(false) => {}
            Err(err) => log::debug!("Namespace check failed: {err}"),
        },
    }

    if indicators.is_empty() {
        return None;
    }

    Some(Evidence {
        candidate_label: label,
        matched_indicators: indicators,
        confidence: heuristic.confidence,
    })
}

/// Orchestrator indicators, checked independently of each other and of the container chain.
pub fn orchestrator_indicators(ctx: &ProbeContext) -> Vec<String> {
    let mut indicators = Vec::new();

    let service_account = ctx.path("/var/run/secrets/kubernetes.io/serviceaccount");
    if service_account.is_dir() {
        indicators.push("K8s ServiceAccount".to_owned());
    }
    if ctx.var("KUBERNETES_SERVICE_HOST").is_some() {
        indicators.push("K8s Service Host".to_owned());
    }
    if ctx.var("OPENSHIFT_BUILD_NAME").is_some() || ctx.var("OPENSHIFT_DEPLOYMENT_NAME").is_some() {
        indicators.push("OpenShift".to_owned());
    }
    let k8s_like = |name: &str| name.contains('-') || name.contains("pod") || name.contains("deployment");
    if let Some(hostname) = ctx.hostname().filter(|name| k8s_like(name)) {
        indicators.push(format!("K8s-like hostname: {hostname}"));
    }

    indicators
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;

    fn write(root: &Path, absolute: &str, contents: &str) {
        let path = fsutil::host_path(root, absolute);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn rootfs(hostname: &str) -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "/proc/sys/kernel/hostname", hostname);
        tmp
    }

    #[test]
    fn test_cgroup_substring_without_markers() {
        let tmp = rootfs("host");
        write(tmp.path(), "/proc/1/cgroup", "0::/docker/abc\n");

        let detection = detect_container(&ProbeContext::new(tmp.path()));
        assert_eq!(detection.label(), "Docker (via cgroup)");
    }

    #[test]
    fn test_marker_beats_cgroup_evidence() {
        let tmp = rootfs("host");
        write(tmp.path(), "/.dockerenv", "");
        write(tmp.path(), "/proc/self/cgroup", "0::/kubepods/burstable/pod1\n");

        let detection = detect_container(&ProbeContext::new(tmp.path()));
        assert_eq!(detection.label(), "Docker");
        assert_eq!(detection.evidence.len(), 2);
        assert_eq!(
            detection.evidence[1].candidate_label,
            "Kubernetes pod (via cgroup)"
        );
    }

    #[test]
    fn test_ties_go_to_declaration_order() {
        let tmp = rootfs("host");
        write(tmp.path(), "/run/.containerenv", "");
        write(tmp.path(), "/.dockerenv", "");

        let detection = detect_container(&ProbeContext::new(tmp.path()));
        assert_eq!(detection.label(), "Docker");
    }

    #[test]
    fn test_evidence_collects_both_cgroup_files() {
        let tmp = rootfs("host");
        write(tmp.path(), "/proc/1/cgroup", "0::/system.slice/crio-1.scope\n");
        write(tmp.path(), "/proc/self/cgroup", "0::/system.slice/crio-1.scope\n");

        let detection = detect_container(&ProbeContext::new(tmp.path()));
        let crio = detection.classification().unwrap();
        assert_eq!(crio.candidate_label, "CRI-O");
        assert_eq!(crio.matched_indicators.len(), 2);
        assert_eq!(crio.confidence, Confidence::Medium);
    }

    #[test]
    fn test_env_variable_label_carries_value() {
        let tmp = rootfs("host");
        let ctx = ProbeContext::new(tmp.path()).with_var("container", "oci");

        let detection = detect_container(&ctx);
        assert_eq!(detection.label(), "Container (via env: oci)");
    }

    #[test]
    fn test_nothing_detected() {
        let tmp = rootfs("host");
        write(tmp.path(), "/proc/self/cgroup", "0::/user.slice\n");

        let detection = detect_container(&ProbeContext::new(tmp.path()));
        assert!(detection.evidence.is_empty());
        assert_eq!(detection.label(), NONE_DETECTED);
    }

    #[test]
    fn test_orchestrator_indicators_are_additive() {
        let tmp = rootfs("trainer-7f9c");
        fs::create_dir_all(
            tmp.path()
                .join("var/run/secrets/kubernetes.io/serviceaccount"),
        )
        .unwrap();
        let ctx = ProbeContext::new(tmp.path())
            .with_var("KUBERNETES_SERVICE_HOST", "10.0.0.1")
            .with_var("OPENSHIFT_DEPLOYMENT_NAME", "trainer");

        assert_eq!(
            orchestrator_indicators(&ctx),
            vec![
                "K8s ServiceAccount",
                "K8s Service Host",
                "OpenShift",
                "K8s-like hostname: trainer-7f9c",
            ]
        );
    }

    #[test]
    fn test_empty_orchestrator_vars_are_ignored() {
        let tmp = rootfs("workstation");
        let ctx = ProbeContext::new(tmp.path())
            .with_var("KUBERNETES_SERVICE_HOST", "")
            .with_var("OPENSHIFT_BUILD_NAME", "")
            .with_var("container", "");
        assert!(orchestrator_indicators(&ctx).is_empty());
        assert_eq!(detect_container(&ctx).label(), NONE_DETECTED);
    }

    #[test]
    fn test_no_orchestrator() {
        let tmp = rootfs("workstation");
        assert!(orchestrator_indicators(&ProbeContext::new(tmp.path())).is_empty());
    }
}
