//! Process and file descriptor limits as the OS reports them, plus an empirical descriptor check.

use std::fmt;
use std::fs::File;
use std::time::Duration;

use nix::sys::resource::{RLIM_INFINITY, Resource, getrlimit};

use crate::command;
use crate::context::ProbeContext;
use crate::fsutil;
use crate::report::{Entry, Failure, FailureKind, Fragment, LimitValue};

pub const PROCESS_SECTION: &str = "Process Limits";
pub const DESCRIPTOR_SECTION: &str = "File Descriptor Limits";

const ULIMIT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_DESCRIPTOR_PROBE: usize = 100;

/// Rows of `/proc/self/limits` that are reported.
const PROC_LIMIT_NAMES: [&str; 2] = ["Max processes", "Max open files"];

/// Soft and hard value of one limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftHard {
    pub soft: LimitValue,
    pub hard: LimitValue,
}

impl fmt::Display for SoftHard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "soft={}, hard={}", self.soft, self.hard)
    }
}

/// One row of `/proc/self/limits`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcLimit {
    pub name: String,
    pub values: SoftHard,
    pub units: Option<String>,
}

fn parse_limit_token(token: &str) -> LimitValue {
    match token {
        "unlimited" => LimitValue::Unbounded,
        _ => token
            .parse()
            .map(LimitValue::Count)
            .unwrap_or_else(|_| LimitValue::Unknown(token.to_owned())),
    }
}

/// Parses a `/proc/self/limits` row whose name is `name`.
///
/// ```text
/// Max processes             63325                63325                processes
/// ```
pub fn parse_proc_limit(line: &str, name: &str) -> Option<ProcLimit> {
    let rest = line.strip_prefix(name)?;
    let mut tokens = rest.split_whitespace();
    let soft = parse_limit_token(tokens.next()?);
    let hard = parse_limit_token(tokens.next()?);
    Some(ProcLimit {
        name: name.to_owned(),
        values: SoftHard { soft, hard },
        units: tokens.next().map(str::to_owned),
    })
}

fn rlimit_value(raw: u64) -> LimitValue {
    if raw == RLIM_INFINITY {
        LimitValue::Unbounded
    } else {
        LimitValue::Count(raw)
    }
}

/// Soft and hard limit of `resource` for the current process.
pub fn rlimit(resource: Resource) -> Result<SoftHard, Failure> {
    let (soft, hard) = getrlimit(resource)
        .map_err(|errno| Failure::new(FailureKind::Other, format!("getrlimit: {errno}")))?;
    Ok(SoftHard {
        soft: rlimit_value(soft),
        hard: rlimit_value(hard),
    })
}

/// Outcome of a scoped acquisition.
#[derive(Debug)]
pub struct Acquisition<E> {
    pub requested: usize,
    pub acquired: usize,
    /// The error that stopped acquisition early, if any.
    pub error: Option<E>,
}

/// Acquires up to `count` resources and releases all of them before returning.
///
/// Everything acquired is owned by a local vector, so it is dropped on every exit path: after the
/// last acquisition, on the first failure, and during unwinding.
pub fn acquire_scoped<T, E>(
    count: usize,
    mut acquire: impl FnMut(usize) -> Result<T, E>,
) -> Acquisition<E> {
    let mut held = Vec::with_capacity(count);
    for i in 0..count {
        match acquire(i) {
            Ok(resource) => held.push(resource),
            Err(error) => {
                return Acquisition {
                    requested: count,
                    acquired: held.len(),
                    error: Some(error),
                };
            }
        }
    }
    Acquisition {
        requested: count,
        acquired: held.len(),
        error: None,
    }
}

/// Number of descriptors the empirical check opens: half the soft limit, at most 100.
pub fn descriptor_probe_count(soft: &LimitValue) -> usize {
    match soft {
        LimitValue::Count(n) => usize::try_from(n / 2)
            .unwrap_or(MAX_DESCRIPTOR_PROBE)
            .min(MAX_DESCRIPTOR_PROBE),
        _ => MAX_DESCRIPTOR_PROBE,
    }
}

/// Process limit detector: `/proc/self/limits`, `RLIMIT_NPROC` and the shell's `ulimit -u`.
pub async fn probe_processes(ctx: &ProbeContext) -> Fragment {
    let mut fragment = Fragment::builder(PROCESS_SECTION);

    let path = ctx.path("/proc/self/limits");
    match fsutil::read_lines_matching(&path, |line| {
        PROC_LIMIT_NAMES.iter().any(|name| line.starts_with(name))
    }) {
        Ok(lines) => {
            for line in lines {
                let parsed = PROC_LIMIT_NAMES
                    .iter()
                    .find_map(|name| parse_proc_limit(&line, name));
                match parsed {
                    Some(limit) => {
                        let mut entry = Entry::value(&limit.name, &limit.values);
                        if let Some(units) = &limit.units {
                            entry = entry.with_note(units);
                        }
                        fragment.push(entry);
                    }
                    None => {
                        fragment.push(Entry::failure(
                            "Proc limits",
                            Failure::new(FailureKind::Malformed, line),
                        ));
                    }
                }
            }
        }
        Err(err) => {
            fragment.push(Entry::failure("Proc limits", Failure::from(&err)));
        }
    }

    fragment.push(Entry::from_result(
        "RLIMIT_NPROC",
        rlimit(Resource::RLIMIT_NPROC),
    ));

    let ulimit = command::run_shell("ulimit -u", ULIMIT_TIMEOUT)
        .await
        .map(|out| out.trim().to_owned())
        .map_err(|err| Failure::from(&err));
    fragment.push(Entry::from_result("ulimit -u", ulimit));

    fragment.build()
}

/// Descriptor limit detector: `RLIMIT_NOFILE` and a scoped open of `/dev/null`.
pub fn probe_descriptors() -> Fragment {
    let mut fragment = Fragment::builder(DESCRIPTOR_SECTION);

    let nofile = match rlimit(Resource::RLIMIT_NOFILE) {
        Ok(nofile) => nofile,
        Err(failure) => {
            fragment.push(Entry::failure("RLIMIT_NOFILE", failure));
            return fragment.build();
        }
    };
    fragment.push(Entry::value("RLIMIT_NOFILE", &nofile));

    let count = descriptor_probe_count(&nofile.soft);
    let acquisition = acquire_scoped(count, |_| File::open("/dev/null"));
    let mut entry = Entry::value(
        "Descriptors opened",
        format!("{} of {}", acquisition.acquired, acquisition.requested),
    );
    if let Some(err) = &acquisition.error {
        log::warn!("Opening descriptor {} failed: {err}", acquisition.acquired);
        entry = entry.with_note(format!("stopped early: {err}"));
    }
    fragment.push(entry);

    fragment.build()
}
