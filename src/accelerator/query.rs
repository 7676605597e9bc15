use super::{AcceleratorRecord, Method, MethodOutcome};
use crate::command::{self, Error};
use crate::context::ProbeContext;
use crate::report::{Entry, Failure};

const QUERY_ARGS: [&str; 2] = [
    "--query-gpu=name,memory.total,driver_version",
    "--format=csv,noheader,nounits",
];

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Parses `name, memory.total (MiB), driver_version` rows.
///
/// Rows with fewer than three columns are skipped. A memory column that is not a number (e.g.
/// `[N/A]`) or does not fit in bytes leaves the memory unknown.
pub fn parse_query_output(stdout: &str) -> Vec<AcceleratorRecord> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            if parts.len() < 3 {
                log::debug!("Skipping short accelerator query row `{line}`");
                return None;
            }
            let memory_bytes = parts[1]
                .parse::<u64>()
                .ok()
                .and_then(|mib| mib.checked_mul(BYTES_PER_MIB));
            Some(AcceleratorRecord {
                method: Method::QueryTool,
                device_name: parts[0].to_owned(),
                memory_bytes,
                driver_version: Some(parts[2].to_owned()).filter(|v| !v.is_empty()),
                quantity: None,
            })
        })
        .collect()
}

pub(super) async fn query_tool(ctx: &ProbeContext) -> MethodOutcome {
    let tool = ctx.accelerator_tool();
    let mut outcome = MethodOutcome::new(Method::QueryTool);

    match command::run(tool, &QUERY_ARGS, ctx.tool_timeout()).await {
        Ok(stdout) => {
            outcome.records = parse_query_output(&stdout);
            if outcome.records.is_empty() {
                outcome
                    .entries
                    .push(Entry::value(tool, "no accelerators reported"));
            }
        }
        Err(err) => {
            log::debug!("Accelerator query failed: {err}");
            outcome.entries.push(Entry::failure(tool, Failure::from(&err)));
            if matches!(err, Error::ToolMissing { .. }) {
                outcome.entries.push(Entry::remark(
                    "NVIDIA drivers/tools not installed in container",
                ));
                outcome.entries.push(Entry::remark(
                    "For GPU support, install nvidia-container-toolkit and use --gpus flag",
                ));
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::FailureKind;

    #[test]
    fn test_parse_query_output() {
        let out = "NVIDIA A100-SXM4-40GB, 40960, 535.104.05\nTesla T4, [N/A], 535.104.05\n\n";
        let records = parse_query_output(out);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].device_name, "NVIDIA A100-SXM4-40GB");
        assert_eq!(records[0].memory_bytes, Some(40960 * BYTES_PER_MIB));
        assert_eq!(records[0].driver_version.as_deref(), Some("535.104.05"));
        assert_eq!(records[1].memory_bytes, None);
    }

    #[test]
    fn test_parse_oversized_memory_is_unknown() {
        let records = parse_query_output("GPU X, 99999999999999999, 535.1\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].memory_bytes, None);
        assert_eq!(records[0].driver_version.as_deref(), Some("535.1"));
    }

    #[test]
    fn test_parse_skips_short_rows() {
        assert!(parse_query_output("No devices were found\n").is_empty());
    }

    #[tokio::test]
    async fn test_missing_tool_adds_hints() {
        let ctx = ProbeContext::new("/").with_accelerator_tool("/definitely/not/nvidia-smi");
        let outcome = query_tool(&ctx).await;
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.entries.len(), 3);
        assert_eq!(
            outcome.entries[0].value.as_ref().unwrap_err().kind,
            FailureKind::ToolMissing
        );
    }
}
