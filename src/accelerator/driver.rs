use super::{AcceleratorRecord, Method, MethodOutcome};
use crate::cluster::ClusterSource;
use crate::context::ProbeContext;
use crate::fsutil;
use crate::report::{Entry, Failure};

const DRIVER_DIR: &str = "/proc/driver/nvidia";
const MAX_DEVICE_INDEX: usize = 16;
const CONTROL_DEVICES: [&str; 3] = ["nvidia-uvm", "nvidia-modeset", "nvidiactl"];

/// Picks the driver version out of the first line of `/proc/driver/nvidia/version`.
///
/// ```text
/// NVRM version: NVIDIA UNIX x86_64 Kernel Module  535.104.05  Sat Aug 19 01:15:15 UTC 2023
/// ```
///
/// The first dotted numeric token wins; otherwise the first token is returned.
pub fn parse_driver_version(content: &str) -> Option<String> {
    let first_line = content.lines().next()?;
    let mut tokens = first_line.split_whitespace();
    let first = tokens.clone().next()?;
    let version = tokens.find(|token| {
        token.contains('.') && token.chars().all(|c| c.is_ascii_digit() || c == '.')
    });
    Some(version.unwrap_or(first).to_owned())
}

pub(super) fn driver_file(ctx: &ProbeContext) -> MethodOutcome {
    let mut outcome = MethodOutcome::new(Method::DriverFile);
    let dir = ctx.path(DRIVER_DIR);

    if !dir.is_dir() {
        outcome.entries.push(Entry::failure(
            "NVIDIA driver",
            Failure::not_found(DRIVER_DIR),
        ));
        return outcome;
    }

    let driver_version = match fsutil::read_whole(dir.join("version")) {
        Ok(content) => parse_driver_version(&content),
        Err(err) => {
            log::debug!("Driver present but version unreadable: {err}");
            None
        }
    };
    outcome.records.push(AcceleratorRecord {
        method: Method::DriverFile,
        device_name: "NVIDIA kernel driver".to_owned(),
        memory_bytes: None,
        driver_version,
        quantity: None,
    });

    outcome
}

pub(super) fn device_nodes(ctx: &ProbeContext) -> MethodOutcome {
    let mut outcome = MethodOutcome::new(Method::DeviceNodes);

    outcome.records = (0..MAX_DEVICE_INDEX)
        .map(|i| format!("nvidia{i}"))
        .filter(|name| ctx.path(format!("/dev/{name}")).exists())
        .map(|name| AcceleratorRecord {
            method: Method::DeviceNodes,
            device_name: format!("/dev/{name}"),
            memory_bytes: None,
            driver_version: None,
            quantity: None,
        })
        .collect();
    if outcome.records.is_empty() {
        outcome.entries.push(Entry::failure(
            "GPU device files",
            Failure::not_found("no /dev/nvidia<N>"),
        ));
    }

    let control: Vec<_> = CONTROL_DEVICES
        .into_iter()
        .filter(|name| ctx.path(format!("/dev/{name}")).exists())
        .collect();
    if !control.is_empty() {
        outcome
            .entries
            .push(Entry::value("NVIDIA control devices", control.join(", ")));
    }

    outcome
}

pub(super) fn cluster_resources(ctx: &ProbeContext) -> MethodOutcome {
    let mut outcome = MethodOutcome::new(Method::Cluster);

    match ctx.cluster() {
        ClusterSource::Loaded(snapshot) => {
            outcome.records = snapshot
                .resources_matching("gpu")
                .map(|(name, count)| AcceleratorRecord {
                    method: Method::Cluster,
                    device_name: name.to_owned(),
                    memory_bytes: None,
                    driver_version: None,
                    quantity: Some(count),
                })
                .collect();
            if outcome.records.is_empty() {
                outcome.entries.push(Entry::value(
                    "Cluster GPU resources",
                    "none detected in cluster",
                ));
            }
        }
        ClusterSource::NotConfigured => outcome.entries.push(Entry::failure(
            "Cluster GPU resources",
            Failure::not_found("framework not initialized"),
        )),
        ClusterSource::Failed(failure) => outcome
            .entries
            .push(Entry::failure("Cluster GPU resources", failure.clone())),
    }

    outcome
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::cluster::ClusterSnapshot;

    #[test]
    fn test_parse_driver_version() {
        let content = "NVRM version: NVIDIA UNIX x86_64 Kernel Module  535.104.05  Sat Aug 19 01:15:15 UTC 2023\nGCC version:  gcc version 12.3.0\n";
        assert_eq!(parse_driver_version(content).as_deref(), Some("535.104.05"));
        assert_eq!(parse_driver_version("NVRM unknown\n").as_deref(), Some("NVRM"));
        assert_eq!(parse_driver_version(""), None);
    }

    #[test]
    fn test_driver_file_present() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("proc/driver/nvidia");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("version"), "NVRM version: NVIDIA UNIX Kernel Module  550.54.14  x\n").unwrap();

        let outcome = driver_file(&ProbeContext::new(tmp.path()));
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].driver_version.as_deref(), Some("550.54.14"));
    }

    #[test]
    fn test_device_nodes() {
        let tmp = tempfile::tempdir().unwrap();
        let dev = tmp.path().join("dev");
        fs::create_dir_all(&dev).unwrap();
        for name in ["nvidia0", "nvidia3", "nvidiactl"] {
            fs::write(dev.join(name), "").unwrap();
        }

        let outcome = device_nodes(&ProbeContext::new(tmp.path()));
        let names: Vec<_> = outcome.records.iter().map(|r| r.device_name.as_str()).collect();
        assert_eq!(names, vec!["/dev/nvidia0", "/dev/nvidia3"]);
        assert_eq!(
            outcome.entries[0].value.as_deref(),
            Ok("nvidiactl")
        );
    }

    #[test]
    fn test_cluster_gpu_keys() {
        let snapshot: ClusterSnapshot = serde_json::from_str(
            r#"{"cluster_resources": {"CPU": 4.0, "GPU": 2.0, "accelerator_type:A100": 1.0, "gpu_memory": 80.0}}"#,
        )
        .unwrap();
        let ctx = ProbeContext::new("/").with_cluster(ClusterSource::Loaded(snapshot));

        let outcome = cluster_resources(&ctx);
        let names: Vec<_> = outcome.records.iter().map(|r| r.device_name.as_str()).collect();
        assert_eq!(names, vec!["GPU", "gpu_memory"]);
        assert_eq!(outcome.records[0].quantity, Some(2.0));
    }
}
