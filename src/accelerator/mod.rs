//! Accelerator device detection.
//!
//! Four independent methods are tried: the vendor query tool, the driver's proc entry, device
//! nodes under `/dev`, and GPU resources in the cluster snapshot. Every record is kept as found;
//! the same device seen by two methods appears twice.
mod driver;
mod query;

use std::fmt;

pub use driver::parse_driver_version;
pub use query::parse_query_output;

use crate::context::ProbeContext;
use crate::report::{Entry, Failure, Fragment};

pub const SECTION: &str = "Accelerator Detection";
pub const NO_METHOD_SUCCEEDED: &str = "no accelerator detection method succeeded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    QueryTool,
    DriverFile,
    DeviceNodes,
    Cluster,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::QueryTool => "query tool",
            Method::DriverFile => "driver",
            Method::DeviceNodes => "device node",
            Method::Cluster => "cluster",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcceleratorRecord {
    pub method: Method,
    pub device_name: String,
    pub memory_bytes: Option<u64>,
    pub driver_version: Option<String>,
    /// Resource amount, for records taken from the cluster snapshot.
    pub quantity: Option<f64>,
}

impl fmt::Display for AcceleratorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.device_name)?;
        if let Some(quantity) = self.quantity {
            write!(f, " = {quantity}")?;
        }
        if let Some(bytes) = self.memory_bytes {
            write!(f, ", {}MB memory", bytes / (1024 * 1024))?;
        }
        if let Some(version) = &self.driver_version {
            write!(f, ", driver {version}")?;
        }
        Ok(())
    }
}

/// What one method found, plus any notes explaining why it found nothing.
#[derive(Debug, Clone)]
pub struct MethodOutcome {
    pub method: Method,
    pub records: Vec<AcceleratorRecord>,
    pub entries: Vec<Entry>,
}

impl MethodOutcome {
    fn new(method: Method) -> Self {
        Self {
            method,
            records: Vec::new(),
            entries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AcceleratorReport {
    pub outcomes: Vec<MethodOutcome>,
}

impl AcceleratorReport {
    pub fn records(&self) -> impl Iterator<Item = &AcceleratorRecord> {
        self.outcomes.iter().flat_map(|o| o.records.iter())
    }
}

/// Runs all four methods in order. None of them can abort the others.
pub async fn detect(ctx: &ProbeContext) -> AcceleratorReport {
    let outcomes = vec![
        query::query_tool(ctx).await,
        driver::driver_file(ctx),
        driver::device_nodes(ctx),
        driver::cluster_resources(ctx),
    ];
    AcceleratorReport { outcomes }
}

/// Accelerator detector.
pub async fn probe(ctx: &ProbeContext) -> Fragment {
    let report = detect(ctx).await;
    let mut fragment = Fragment::builder(SECTION);

    let mut gpus = 0;
    for outcome in &report.outcomes {
        for record in &outcome.records {
            // Only the query tool enumerates devices; the other methods are indirect evidence.
            let label = match record.method {
                Method::QueryTool => {
                    gpus += 1;
                    format!("GPU {}", gpus - 1)
                }
                Method::DriverFile => "NVIDIA driver".to_owned(),
                Method::DeviceNodes => "Device node".to_owned(),
                Method::Cluster => format!("Cluster resource {}", record.device_name),
            };
            fragment.push(Entry::value(label, record).with_note(format!("via {}", outcome.method)));
        }
        fragment.extend(outcome.entries.iter().cloned());
    }

    if report.records().next().is_none() {
        fragment.push(Entry::failure(
            "Accelerators",
            Failure::not_found(NO_METHOD_SUCCEEDED),
        ));
    }

    fragment.build()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::cluster::{ClusterSnapshot, ClusterSource};

    #[tokio::test]
    async fn test_nothing_found() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ProbeContext::new(tmp.path()).with_accelerator_tool("/definitely/not/nvidia-smi");

        let fragment = probe(&ctx).await;
        let entry = fragment.entry("Accelerators").unwrap();
        assert_eq!(entry.value.as_ref().unwrap_err().detail, NO_METHOD_SUCCEEDED);
    }

    #[tokio::test]
    async fn test_records_are_not_deduplicated() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("dev")).unwrap();
        fs::write(tmp.path().join("dev/nvidia0"), "").unwrap();
        fs::create_dir_all(tmp.path().join("proc/driver/nvidia")).unwrap();
        let snapshot: ClusterSnapshot =
            serde_json::from_str(r#"{"cluster_resources": {"GPU": 1.0}}"#).unwrap();
        let ctx = ProbeContext::new(tmp.path())
            .with_accelerator_tool("/definitely/not/nvidia-smi")
            .with_cluster(ClusterSource::Loaded(snapshot));

        let report = detect(&ctx).await;
        let methods: Vec<_> = report.records().map(|r| r.method).collect();
        assert_eq!(
            methods,
            vec![Method::DriverFile, Method::DeviceNodes, Method::Cluster]
        );

        let fragment = probe(&ctx).await;
        assert!(fragment.entry("Accelerators").is_none());
        assert_eq!(
            fragment.entry("Cluster resource GPU").unwrap().value.as_deref(),
            Ok("GPU = 1")
        );
        assert_eq!(
            fragment.entry("NVIDIA driver").unwrap().value.as_deref(),
            Ok("NVIDIA kernel driver")
        );
        assert_eq!(
            fragment.entry("Device node").unwrap().value.as_deref(),
            Ok("/dev/nvidia0")
        );
        assert!(fragment.entries().iter().all(|e| !e.label.starts_with("GPU ")));
    }

    #[test]
    fn test_record_display() {
        let record = AcceleratorRecord {
            method: Method::QueryTool,
            device_name: "Tesla T4".into(),
            memory_bytes: Some(15360 * 1024 * 1024),
            driver_version: Some("535.104.05".into()),
            quantity: None,
        };
        assert_eq!(record.to_string(), "Tesla T4, 15360MB memory, driver 535.104.05");
    }
}
