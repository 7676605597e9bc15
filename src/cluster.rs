//! Resource data exported by a distributed compute framework.
//!
//! The framework itself is never started. An operator exports its resource maps to a JSON file,
//! for example from Ray:
//!
//! ```json
//! {
//!   "cluster_resources": {"CPU": 8.0, "memory": 17179869184.0, "GPU": 1.0},
//!   "available_resources": {"CPU": 6.0},
//!   "nodes": [{"NodeID": "a1b2c3d4", "Alive": true, "Resources": {"CPU": 8.0}}]
//! }
//! ```
//!
//! The file is loaded once per run and shared through the
//! [`ProbeContext`](crate::context::ProbeContext).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::context::ProbeContext;
use crate::fsutil::{self, ReadError};
use crate::report::{Entry, Failure, FailureKind, Fragment, bytes_to_gib};
use crate::sysinfo;

pub const SECTION: &str = "Cluster Resources";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error("failed to parse cluster snapshot `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<&Error> for Failure {
    fn from(err: &Error) -> Self {
        match err {
            Error::Read(err) => Failure::from(err),
            Error::Parse { .. } => Failure::new(FailureKind::Malformed, err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ClusterSnapshot {
    #[serde(default)]
    pub cluster_resources: BTreeMap<String, f64>,
    #[serde(default)]
    pub available_resources: BTreeMap<String, f64>,
    #[serde(default)]
    pub nodes: Vec<NodeInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NodeInfo {
    #[serde(default, alias = "NodeID")]
    pub node_id: Option<String>,
    #[serde(default, alias = "Alive")]
    pub alive: Option<bool>,
    #[serde(default, alias = "Resources")]
    pub resources: BTreeMap<String, f64>,
}

impl ClusterSnapshot {
    /// Resources whose name contains `needle`, case-insensitively.
    pub fn resources_matching<'a>(
        &'a self,
        needle: &'a str,
    ) -> impl Iterator<Item = (&'a str, f64)> + 'a {
        let needle = needle.to_ascii_lowercase();
        self.cluster_resources
            .iter()
            .filter(move |(name, _)| name.to_ascii_lowercase().contains(&needle))
            .map(|(name, value)| (name.as_str(), *value))
    }
}

/// Reads and parses a snapshot file.
pub fn load_snapshot(path: &Path) -> Result<ClusterSnapshot> {
    let content = fsutil::read_whole(path)?;
    serde_json::from_str(&content).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Whether cluster data is available for this run.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterSource {
    NotConfigured,
    Loaded(ClusterSnapshot),
    Failed(Failure),
}

impl ClusterSource {
    /// Loads the snapshot at `path`. A failure is kept and reported, never raised.
    pub fn load(path: &Path) -> Self {
        match load_snapshot(path) {
            Ok(snapshot) => {
                log::debug!(
                    "Loaded cluster snapshot with {} resources and {} nodes",
                    snapshot.cluster_resources.len(),
                    snapshot.nodes.len()
                );
                ClusterSource::Loaded(snapshot)
            }
            Err(err) => {
                log::warn!("{err}");
                ClusterSource::Failed(Failure::from(&err))
            }
        }
    }
}

fn format_resources(resources: &BTreeMap<String, f64>) -> String {
    let pairs: Vec<_> = resources.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{{{}}}", pairs.join(", "))
}

/// Cluster resource detector.
pub fn probe(ctx: &ProbeContext) -> Fragment {
    let mut fragment = Fragment::builder(SECTION);

    let snapshot = match ctx.cluster() {
        ClusterSource::NotConfigured => {
            fragment.push(Entry::failure(
                "Cluster framework",
                Failure::not_found("framework not initialized"),
            ));
            return fragment.build();
        }
        ClusterSource::Failed(failure) => {
            fragment.push(Entry::failure("Cluster framework", failure.clone()));
            return fragment.build();
        }
        ClusterSource::Loaded(snapshot) => snapshot,
    };

    for (name, value) in &snapshot.cluster_resources {
        fragment.push(Entry::value(format!("Cluster resource {name}"), value));
    }
    for (name, value) in &snapshot.available_resources {
        fragment.push(Entry::value(format!("Available resource {name}"), value));
    }

    fragment.push(Entry::value("Number of nodes", snapshot.nodes.len()));
    for (i, node) in snapshot.nodes.iter().enumerate() {
        let alive = node
            .alive
            .map_or_else(|| "unknown".to_owned(), |a| a.to_string());
        let mut entry = Entry::value(
            format!("Node {i}"),
            format!("alive={alive}, resources={}", format_resources(&node.resources)),
        );
        if let Some(id) = &node.node_id {
            entry = entry.with_note(format!("id {}", id.get(..8).unwrap_or(id)));
        }
        fragment.push(entry);
    }

    let memory: BTreeMap<String, f64> = snapshot
        .resources_matching("memory")
        .map(|(k, v)| (k.to_owned(), v))
        .collect();
    fragment.push(Entry::value("Memory resources", format_resources(&memory)));

    match snapshot.cluster_resources.get("object_store_memory") {
        Some(bytes) => fragment.push(Entry::value(
            "Object store memory",
            format!("{:.2} GB ({bytes} bytes)", bytes / (1u64 << 30) as f64),
        )),
        None => fragment.push(Entry::failure(
            "Object store memory",
            Failure::not_found("not in cluster resources"),
        )),
    };

    let cluster_memory = snapshot.cluster_resources.get("memory").copied().unwrap_or(0.0);
    let memory_comparison = sysinfo::read_meminfo(ctx.root()).map(|mem| {
        format!(
            "System={:.2}GB, Cluster={:.2}GB",
            bytes_to_gib(mem.total_bytes),
            cluster_memory / (1u64 << 30) as f64
        )
    });
    fragment.push(Entry::from_result("Memory comparison", memory_comparison));

    let cluster_cpu = snapshot.cluster_resources.get("CPU").copied().unwrap_or(0.0);
    let cpu_comparison =
        sysinfo::logical_cpus().map(|cpus| format!("System={cpus}, Cluster={cluster_cpu}"));
    fragment.push(Entry::from_result("CPU comparison", cpu_comparison));

    fragment.build()
}
