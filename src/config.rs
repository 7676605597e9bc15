//! Runtime configuration, read once from environment variables.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `ENVPROBE_ROOTFS` | `/` | Root the pseudo-files are read under |
//! | `ENVPROBE_TOOL_TIMEOUT_SECS` | `10` | Bound for the accelerator tool and smoke tests |
//! | `ENVPROBE_ACCELERATOR_TOOL` | `nvidia-smi` | Accelerator query tool |
//! | `ENVPROBE_CLUSTER_SNAPSHOT` | unset | JSON export of a compute framework's resources |
//! | `ENVPROBE_SKIP_SMOKE_TESTS` | `false` | Skip signal and subprocess checks |
//! | `ENVPROBE_THREAD_EXHAUSTION` | `false` | Spawn threads until creation fails |
//! | `ENVPROBE_THREAD_CEILING` | unset | Stop thread exhaustion at this many threads |

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const ROOTFS_VAR: &str = "ENVPROBE_ROOTFS";
pub const TOOL_TIMEOUT_VAR: &str = "ENVPROBE_TOOL_TIMEOUT_SECS";
pub const ACCELERATOR_TOOL_VAR: &str = "ENVPROBE_ACCELERATOR_TOOL";
pub const CLUSTER_SNAPSHOT_VAR: &str = "ENVPROBE_CLUSTER_SNAPSHOT";
pub const SKIP_SMOKE_TESTS_VAR: &str = "ENVPROBE_SKIP_SMOKE_TESTS";
pub const THREAD_EXHAUSTION_VAR: &str = "ENVPROBE_THREAD_EXHAUSTION";
pub const THREAD_CEILING_VAR: &str = "ENVPROBE_THREAD_CEILING";

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_ACCELERATOR_TOOL: &str = "nvidia-smi";

/// Errors raised for invalid configuration values.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid value `{value}` for `{key}`: expected {expected}")]
    InvalidValue {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub rootfs: PathBuf,
    pub tool_timeout: Duration,
    pub accelerator_tool: String,
    pub cluster_snapshot: Option<PathBuf>,
    pub skip_smoke_tests: bool,
    pub thread_exhaustion: bool,
    pub thread_ceiling: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rootfs: PathBuf::from("/"),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            accelerator_tool: DEFAULT_ACCELERATOR_TOOL.to_owned(),
            cluster_snapshot: None,
            skip_smoke_tests: false,
            thread_exhaustion: false,
            thread_ceiling: None,
        }
    }
}

impl Config {
    /// Reads the configuration from a captured set of variables. Empty values count as unset.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
        let mut config = Config::default();

        if let Some(rootfs) = get(ROOTFS_VAR) {
            config.rootfs = PathBuf::from(rootfs);
        }
        if let Some(secs) = get(TOOL_TIMEOUT_VAR) {
            let secs = secs
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| Error::InvalidValue {
                    key: TOOL_TIMEOUT_VAR,
                    value: secs.to_owned(),
                    expected: "a positive number of seconds",
                })?;
            config.tool_timeout = Duration::from_secs(secs);
        }
        if let Some(tool) = get(ACCELERATOR_TOOL_VAR) {
            config.accelerator_tool = tool.to_owned();
        }
        config.cluster_snapshot = get(CLUSTER_SNAPSHOT_VAR).map(PathBuf::from);
        if let Some(flag) = get(SKIP_SMOKE_TESTS_VAR) {
            config.skip_smoke_tests = parse_flag(SKIP_SMOKE_TESTS_VAR, flag)?;
        }
        if let Some(flag) = get(THREAD_EXHAUSTION_VAR) {
            config.thread_exhaustion = parse_flag(THREAD_EXHAUSTION_VAR, flag)?;
        }
        if let Some(ceiling) = get(THREAD_CEILING_VAR) {
            let ceiling = ceiling
                .parse::<usize>()
                .ok()
                .filter(|c| *c > 0)
                .ok_or_else(|| Error::InvalidValue {
                    key: THREAD_CEILING_VAR,
                    value: ceiling.to_owned(),
                    expected: "a positive thread count",
                })?;
            config.thread_ceiling = Some(ceiling);
        }

        Ok(config)
    }
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidValue {
            key,
            value: value.to_owned(),
            expected: "a boolean (1/0, true/false, yes/no, on/off)",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&HashMap::new()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.tool_timeout, Duration::from_secs(10));
        assert_eq!(config.accelerator_tool, "nvidia-smi");
        assert!(!config.thread_exhaustion);
    }

    #[test]
    fn test_all_values() {
        let config = Config::from_vars(&vars(&[
            (ROOTFS_VAR, "/rootfs"),
            (TOOL_TIMEOUT_VAR, "3"),
            (ACCELERATOR_TOOL_VAR, "/opt/bin/nvidia-smi"),
            (CLUSTER_SNAPSHOT_VAR, "/tmp/cluster.json"),
            (SKIP_SMOKE_TESTS_VAR, "yes"),
            (THREAD_EXHAUSTION_VAR, "1"),
            (THREAD_CEILING_VAR, "500"),
        ]))
        .unwrap();
        assert_eq!(config.rootfs, PathBuf::from("/rootfs"));
        assert_eq!(config.tool_timeout, Duration::from_secs(3));
        assert_eq!(config.accelerator_tool, "/opt/bin/nvidia-smi");
        assert_eq!(config.cluster_snapshot, Some(PathBuf::from("/tmp/cluster.json")));
        assert!(config.skip_smoke_tests);
        assert!(config.thread_exhaustion);
        assert_eq!(config.thread_ceiling, Some(500));
    }

    #[test]
    fn test_empty_value_is_unset() {
        let config = Config::from_vars(&vars(&[(CLUSTER_SNAPSHOT_VAR, "  ")])).unwrap();
        assert_eq!(config.cluster_snapshot, None);
    }

    #[test]
    fn test_invalid_timeout() {
        let err = Config::from_vars(&vars(&[(TOOL_TIMEOUT_VAR, "0")])).unwrap_err();
        match err {
            Error::InvalidValue { key, value, .. } => {
                assert_eq!(key, TOOL_TIMEOUT_VAR);
                assert_eq!(value, "0");
            }
        }
    }

    #[test]
    fn test_invalid_flag() {
        assert!(Config::from_vars(&vars(&[(THREAD_EXHAUSTION_VAR, "maybe")])).is_err());
    }
}
