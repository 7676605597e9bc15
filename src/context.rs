use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cluster::ClusterSource;
use crate::config::Config;
use crate::error::ResultOkLogExt;
use crate::fsutil;

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a detector may consult besides the live pseudo-filesystems.
///
/// Environment variables are captured once so detectors never read process-global state
/// directly.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    root: PathBuf,
    vars: HashMap<String, String>,
    tool_timeout: Duration,
    accelerator_tool: String,
    cluster: ClusterSource,
}

impl ProbeContext {
    /// Context reading pseudo-files under `root`, with no environment variables and no cluster
    /// snapshot.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            vars: HashMap::new(),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            accelerator_tool: "nvidia-smi".to_owned(),
            cluster: ClusterSource::NotConfigured,
        }
    }

    /// Builds the context for a run: captures `vars` and loads the cluster snapshot if one is
    /// configured.
    pub fn from_config(config: &Config, vars: HashMap<String, String>) -> Self {
        let cluster = match &config.cluster_snapshot {
            Some(path) => ClusterSource::load(path),
            None => ClusterSource::NotConfigured,
        };
        Self {
            root: config.rootfs.clone(),
            vars,
            tool_timeout: config.tool_timeout,
            accelerator_tool: config.accelerator_tool.clone(),
            cluster,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves an absolute pseudo-file path under the configured root.
    pub fn path(&self, absolute: impl AsRef<Path>) -> PathBuf {
        fsutil::host_path(&self.root, absolute)
    }

    /// Captured value of `key`. An empty value counts as unset.
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn tool_timeout(&self) -> Duration {
        self.tool_timeout
    }

    pub fn accelerator_tool(&self) -> &str {
        &self.accelerator_tool
    }

    pub fn cluster(&self) -> &ClusterSource {
        &self.cluster
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_accelerator_tool(mut self, tool: impl Into<String>) -> Self {
        self.accelerator_tool = tool.into();
        self
    }

    pub fn with_cluster(mut self, cluster: ClusterSource) -> Self {
        self.cluster = cluster;
        self
    }

    /// Host name from `/proc/sys/kernel/hostname` under the root, then `uname`.
    pub fn hostname(&self) -> Option<String> {
        match fsutil::read_trimmed(self.path("/proc/sys/kernel/hostname")) {
            Ok(name) if !name.is_empty() => Some(name),
            Ok(_) => None,
            Err(err) => {
                log::debug!("Falling back to uname for the hostname: {err}");
                nix::sys::utsname::uname()
                    .ok_log()
                    .and_then(|uts| uts.nodename().to_str().map(str::to_owned))
            }
        }
    }
}
