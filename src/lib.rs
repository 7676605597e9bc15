/// envprobe: reports the resource limits, container runtime and accelerators a process finds
/// itself running under.
///
/// The pipeline runs a fixed sequence of independent detectors. Each one inspects kernel
/// pseudo-filesystems, environment markers or external tools and produces one
/// [`report::Fragment`]. A detector that cannot determine a value records a typed
/// [`report::Failure`] instead of aborting, so one broken source never hides the others.
pub mod accelerator;
pub mod cgroup;
pub mod cluster;
pub mod command;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod environment;
pub mod error;
pub mod fsutil;
pub mod limits;
pub mod mounts;
pub mod report;
pub mod sysinfo;

use std::collections::HashMap;
use std::io::{self, Write};

use config::Config;
use context::ProbeContext;
use report::{Fragment, Report};

fn emit(report: &mut Report, out: &mut impl Write, fragment: Fragment) -> io::Result<()> {
    let fragment = report.push(fragment);
    write!(out, "{fragment}")?;
    out.flush()
}

/// Runs every detector in order and writes each fragment to `out` as soon as it is produced.
///
/// Thread exhaustion runs last and only when enabled, since it may leave the process unable to
/// spawn anything else for a while.
///
/// # Errors
///
/// Only writing to `out` can fail. Detector failures end up in the report.
pub async fn run(
    config: &Config,
    vars: HashMap<String, String>,
    out: &mut impl Write,
) -> io::Result<Report> {
    let ctx = ProbeContext::from_config(config, vars);
    let mut report = Report::default();
    writeln!(
        out,
        "[{}] Starting envprobe {} (root {})",
        report.started_at().format("%H:%M:%S"),
        env!("CARGO_PKG_VERSION"),
        ctx.root().display()
    )?;

    emit(&mut report, out, limits::probe_processes(&ctx).await)?;
    emit(&mut report, out, sysinfo::probe(&ctx))?;
    emit(&mut report, out, environment::probe(&ctx))?;
    emit(&mut report, out, accelerator::probe(&ctx).await)?;
    emit(&mut report, out, limits::probe_descriptors())?;
    emit(&mut report, out, cgroup::probe(&ctx))?;
    emit(&mut report, out, cluster::probe(&ctx))?;

    if config.skip_smoke_tests {
        log::info!("Skipping signal and subprocess checks");
    } else {
        emit(&mut report, out, diagnostics::probe_signals())?;
        emit(&mut report, out, diagnostics::probe_subprocesses(&ctx).await)?;
    }

    if config.thread_exhaustion {
        emit(
            &mut report,
            out,
            diagnostics::probe_threads(config.thread_ceiling),
        )?;
    }

    Ok(report)
}
