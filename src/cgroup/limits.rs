//! Parsing of single-value cgroup limit files.
//!
//! - `pids.max` (v1 and v2): a count or `max`.
//! - `memory.max` (v2): bytes or `max`.
//! - `memory.limit_in_bytes` (v1): bytes; "unlimited" is a huge page-aligned number.
//! - `cpu.max` (v2): `<quota> <period>` where quota may be `max`.
//! - `cpu.cfs_quota_us` / `cpu.cfs_period_us` (v1): quota is `-1` when unlimited.
//!
//! Content that is neither numeric nor an unlimited token becomes
//! [`LimitValue::Unknown`] with the raw text kept, never zero.

use std::fmt;
use std::path::{Path, PathBuf};

use super::{CgroupVersion, Controller, Result};
use crate::error::ResultOkLogExt;
use crate::fsutil;
use crate::report::LimitValue;

const UNLIMITED_TOKEN: &str = "max";
const DEFAULT_CPU_PERIOD_US: u64 = 100_000;
/// v1 reports "no memory limit" as `PAGE_COUNTER_MAX * PAGE_SIZE`, roughly 2^63.
const V1_MEMORY_UNLIMITED_THRESHOLD: u64 = 1 << 62;

/// Parses a count limit such as `pids.max`.
pub fn parse_count_limit(raw: &str) -> LimitValue {
    match raw.trim() {
        UNLIMITED_TOKEN => LimitValue::Unbounded,
        value => value
            .parse::<u64>()
            .map(LimitValue::Count)
            .unwrap_or_else(|_| LimitValue::Unknown(value.to_owned())),
    }
}

/// Parses a byte limit such as `memory.max` or `memory.limit_in_bytes`.
pub fn parse_bytes_limit(raw: &str) -> LimitValue {
    match raw.trim() {
        UNLIMITED_TOKEN => LimitValue::Unbounded,
        value => value
            .parse::<u64>()
            .map(LimitValue::Bytes)
            .unwrap_or_else(|_| LimitValue::Unknown(value.to_owned())),
    }
}

/// CPU bandwidth limit: `quota` microseconds of CPU time per `period` microseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuQuota {
    /// [`LimitValue::Count`] of microseconds, [`LimitValue::Unbounded`] or
    /// [`LimitValue::Unknown`].
    pub quota: LimitValue,
    pub period_us: Option<u64>,
}

impl CpuQuota {
    /// Parses a v2 `cpu.max` line.
    ///
    /// The period is optional and defaults to 100 000µs, as the kernel does.
    pub fn parse_cpu_max(raw: &str) -> Self {
        let raw = raw.trim();
        let mut parts = raw.split_whitespace();
        let quota = match parts.next() {
            Some(quota) => parse_count_limit(quota),
            None => LimitValue::Unknown(raw.to_owned()),
        };
        let period_us = match parts.next() {
            Some(period) => period.parse::<u64>().ok(),
            None => Some(DEFAULT_CPU_PERIOD_US),
        };

        Self { quota, period_us }
    }

    /// Builds the quota from the two v1 files. A quota of `-1` means unlimited.
    pub fn from_v1(quota_raw: &str, period_raw: Option<&str>) -> Self {
        let quota = match quota_raw.trim() {
            "-1" => LimitValue::Unbounded,
            other => parse_count_limit(other),
        };
        let period_us = period_raw.and_then(|p| p.trim().parse::<u64>().ok());

        Self { quota, period_us }
    }

    /// Number of CPUs the quota amounts to, if both parts are numeric.
    pub fn cpus(&self) -> Option<f64> {
        match (&self.quota, self.period_us) {
            (LimitValue::Count(quota), Some(period)) if period > 0 => {
                Some(*quota as f64 / period as f64)
            }
            _ => None,
        }
    }
}

impl fmt::Display for CpuQuota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.quota)?;
        if let Some(period) = self.period_us {
            write!(f, " per {period}µs")?;
        }
        Ok(())
    }
}

/// The limit read for one controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerLimit {
    pub controller: Controller,
    /// File the value was read from.
    pub source: PathBuf,
    pub value: LimitValue,
    pub note: Option<String>,
}

fn limit_file(version: CgroupVersion, controller: Controller) -> Option<&'static str> {
    match (version, controller) {
        (CgroupVersion::None, _) => None,
        (_, Controller::Pids) => Some("pids.max"),
        (CgroupVersion::V1, Controller::Memory) => Some("memory.limit_in_bytes"),
        (CgroupVersion::V2, Controller::Memory) => Some("memory.max"),
        (CgroupVersion::V1, Controller::Cpu) => Some("cpu.cfs_quota_us"),
        (CgroupVersion::V2, Controller::Cpu) => Some("cpu.max"),
    }
}

/// Reads and normalizes the limit of `controller` from its resolved cgroup directory.
///
/// # Errors
///
/// Returns [`super::Error::Read`] if the limit file is missing or unreadable, and
/// [`super::Error::NoCandidate`] when `version` is [`CgroupVersion::None`].
pub fn extract_limit(
    version: CgroupVersion,
    controller: Controller,
    dir: &Path,
) -> Result<ControllerLimit> {
    let file = limit_file(version, controller).ok_or_else(|| super::Error::NoCandidate {
        controller: controller.name().to_owned(),
        tried: "no cgroup hierarchy".to_owned(),
    })?;
    let source = dir.join(file);
    let raw = fsutil::read_trimmed(&source)?;
    log::trace!("Read `{}`: {raw}", source.display());

    let (value, note) = match controller {
        Controller::Pids => (parse_count_limit(&raw), None),
        Controller::Memory => {
            let value = parse_bytes_limit(&raw);
            let note = match value {
                LimitValue::Bytes(bytes)
                    if version == CgroupVersion::V1 && bytes >= V1_MEMORY_UNLIMITED_THRESHOLD =>
                {
                    Some("effectively unlimited".to_owned())
                }
                _ => None,
            };
            (value, note)
        }
        Controller::Cpu => {
            let quota = match version {
                CgroupVersion::V1 => {
                    let period = fsutil::read_trimmed(dir.join("cpu.cfs_period_us"))
                        .ok_log_at(log::Level::Debug);
                    CpuQuota::from_v1(&raw, period.as_deref())
                }
                _ => CpuQuota::parse_cpu_max(&raw),
            };
            let note = match (quota.period_us, quota.cpus()) {
                (Some(period), Some(cpus)) => Some(format!("period {period}µs, {cpus:.2} CPUs")),
                (Some(period), None) => Some(format!("period {period}µs")),
                (None, _) => None,
            };
            (quota.quota, note)
        }
    };

    Ok(ControllerLimit {
        controller,
        source,
        value,
        note,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::cgroup::Error;

    #[test]
    fn test_parse_count_limit() {
        assert_eq!(parse_count_limit("max\n"), LimitValue::Unbounded);
        assert_eq!(parse_count_limit("100"), LimitValue::Count(100));
        assert_eq!(
            parse_count_limit("lots"),
            LimitValue::Unknown("lots".to_owned())
        );
    }

    #[test]
    fn test_parse_bytes_limit_max_is_unbounded() {
        assert_eq!(parse_bytes_limit("max"), LimitValue::Unbounded);
        assert_eq!(parse_bytes_limit("  max  \n"), LimitValue::Unbounded);
    }

    #[test]
    fn test_parse_bytes_limit_keeps_raw_garbage() {
        assert_eq!(parse_bytes_limit(""), LimitValue::Unknown(String::new()));
        assert_eq!(
            parse_bytes_limit("-5"),
            LimitValue::Unknown("-5".to_owned())
        );
    }

    #[test]
    fn test_memory_gib_two_decimals() {
        for bytes in [1u64, 536_870_912, 1_073_741_824, 2_147_483_648, 123_456_789_012] {
            let value = parse_bytes_limit(&bytes.to_string());
            let expected = bytes as f64 / (1u64 << 30) as f64;
            let gib = value.as_gib().unwrap();
            assert!((gib - expected).abs() < 0.005);
            assert_eq!(format!("{gib:.2}"), format!("{expected:.2}"));
        }
    }

    #[test]
    fn test_parse_cpu_max() {
        let quota = CpuQuota::parse_cpu_max("50000 100000\n");
        assert_eq!(quota.quota, LimitValue::Count(50000));
        assert_eq!(quota.period_us, Some(100000));
        assert_eq!(quota.cpus(), Some(0.5));

        let quota = CpuQuota::parse_cpu_max("max 250000");
        assert_eq!(quota.quota, LimitValue::Unbounded);
        assert_eq!(quota.period_us, Some(250000));
        assert_eq!(quota.cpus(), None);
    }

    #[test]
    fn test_parse_cpu_max_defaults_period() {
        let quota = CpuQuota::parse_cpu_max("200000");
        assert_eq!(quota.period_us, Some(DEFAULT_CPU_PERIOD_US));
        assert_eq!(quota.cpus(), Some(2.0));
    }

    #[test]
    fn test_parse_empty_cpu_max() {
        let quota = CpuQuota::parse_cpu_max("");
        assert_eq!(quota.quota, LimitValue::Unknown(String::new()));
    }

    #[test]
    fn test_cpu_from_v1() {
        assert_eq!(CpuQuota::from_v1("-1", Some("100000")).quota, LimitValue::Unbounded);
        let quota = CpuQuota::from_v1("150000", Some("100000"));
        assert_eq!(quota.cpus(), Some(1.5));
        assert_eq!(CpuQuota::from_v1("150000", None).period_us, None);
    }

    #[test]
    fn test_extract_v2_limits() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("memory.max"), "max\n").unwrap();
        fs::write(dir.path().join("pids.max"), "100\n").unwrap();
        fs::write(dir.path().join("cpu.max"), "max 100000\n").unwrap();

        let memory = extract_limit(CgroupVersion::V2, Controller::Memory, dir.path()).unwrap();
        assert_eq!(memory.value, LimitValue::Unbounded);
        assert_eq!(memory.source, dir.path().join("memory.max"));

        let pids = extract_limit(CgroupVersion::V2, Controller::Pids, dir.path()).unwrap();
        assert_eq!(pids.value, LimitValue::Count(100));

        let cpu = extract_limit(CgroupVersion::V2, Controller::Cpu, dir.path()).unwrap();
        assert_eq!(cpu.value, LimitValue::Unbounded);
        assert_eq!(cpu.note.as_deref(), Some("period 100000µs"));
    }

    #[test]
    fn test_extract_v1_memory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("memory.limit_in_bytes"), "2147483648\n").unwrap();
        let memory = extract_limit(CgroupVersion::V1, Controller::Memory, dir.path()).unwrap();
        assert_eq!(memory.value, LimitValue::Bytes(2_147_483_648));
        assert_eq!(memory.value.as_gib(), Some(2.0));
        assert_eq!(memory.note, None);
    }

    #[test]
    fn test_extract_v1_memory_effectively_unlimited() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("memory.limit_in_bytes"),
            "9223372036854771712\n",
        )
        .unwrap();
        let memory = extract_limit(CgroupVersion::V1, Controller::Memory, dir.path()).unwrap();
        assert_eq!(memory.note.as_deref(), Some("effectively unlimited"));
    }

    #[test]
    fn test_extract_v1_cpu_reads_period() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cpu.cfs_quota_us"), "200000\n").unwrap();
        fs::write(dir.path().join("cpu.cfs_period_us"), "100000\n").unwrap();
        let cpu = extract_limit(CgroupVersion::V1, Controller::Cpu, dir.path()).unwrap();
        assert_eq!(cpu.value, LimitValue::Count(200000));
        assert_eq!(cpu.note.as_deref(), Some("period 100000µs, 2.00 CPUs"));
    }

    #[test]
    fn test_extract_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_limit(CgroupVersion::V2, Controller::Pids, dir.path()).unwrap_err();
        assert!(matches!(
            err,
            Error::Read(fsutil::ReadError::NotFound { .. })
        ));
    }

    #[test]
    fn test_extract_without_hierarchy() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_limit(CgroupVersion::None, Controller::Pids, dir.path()).unwrap_err();
        assert!(matches!(err, Error::NoCandidate { .. }));
    }
}
