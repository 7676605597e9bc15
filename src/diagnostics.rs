//! One-shot OS capability checks: signals, subprocess spawning and thread exhaustion.
//!
//! None of these read pseudo-files. They exercise the live process and are kept apart from the
//! detectors for that reason.

use std::thread;
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::process::Command;

use crate::command;
use crate::context::ProbeContext;
use crate::report::{Entry, Failure, FailureKind, Fragment};

pub const SIGNAL_SECTION: &str = "Signal Handling";
pub const SUBPROCESS_SECTION: &str = "Subprocess Spawning";
pub const THREAD_SECTION: &str = "Thread Exhaustion";

const CHECKED_SIGNALS: [&str; 3] = ["SIGKILL", "SIGTERM", "SIGINT"];
const THREAD_SLEEP: Duration = Duration::from_secs(10);
const THREAD_PROGRESS_EVERY: usize = 100;

/// Reads the shell's own `pgrp` from the fifth field of `/proc/self/stat`.
const PGID_SCRIPT: &str = "read -r pid comm state ppid pgrp rest < /proc/self/stat; echo \"PGID: $pgrp\"";

/// Signal names this platform defines.
pub fn available_signals() -> Vec<&'static str> {
    CHECKED_SIGNALS
        .into_iter()
        .filter(|name| name.parse::<Signal>().is_ok())
        .collect()
}

/// Signal availability and parent-death-signal support.
pub fn probe_signals() -> Fragment {
    let mut fragment = Fragment::builder(SIGNAL_SECTION);
    fragment.push(Entry::value(
        "Available signals",
        available_signals().join(", "),
    ));

    let pdeathsig = nix::sys::prctl::get_pdeathsig()
        .map(|current| match current {
            Some(signal) => format!("AVAILABLE (currently {signal})"),
            None => "AVAILABLE".to_owned(),
        })
        .map_err(|errno| {
            Failure::new(FailureKind::Other, format!("NOT AVAILABLE: {errno}"))
        });
    fragment.push(Entry::from_result("prctl (PDEATHSIG) support", pdeathsig));

    fragment.build()
}

/// Spawns a shell printing its PID, then one in a new process group printing its PGID.
pub async fn probe_subprocesses(ctx: &ProbeContext) -> Fragment {
    let mut fragment = Fragment::builder(SUBPROCESS_SECTION);

    let pid = command::run_shell("echo \"PID: $$\"", ctx.tool_timeout())
        .await
        .map(|out| out.trim().to_owned())
        .map_err(|err| Failure::from(&err));
    fragment.push(Entry::from_result("Subprocess test", pid));

    let mut grouped = Command::new("sh");
    grouped.args(["-c", PGID_SCRIPT]).process_group(0);
    let pgid = command::output(grouped, "sh", ctx.tool_timeout())
        .await
        .map(|out| out.trim().to_owned())
        .map_err(|err| Failure::from(&err));
    fragment.push(Entry::from_result("Process group test", pgid));

    fragment.build()
}

/// How a thread exhaustion run ended.
#[derive(Debug)]
pub struct ThreadExhaustion {
    pub created: usize,
    /// Why spawning stopped. `None` when the ceiling was reached.
    pub failure: Option<std::io::Error>,
}

/// Spawns sleeping threads until creation fails or `ceiling` threads exist.
///
/// The threads are detached and never joined; each exits on its own after its sleep.
pub fn exhaust_threads(ceiling: Option<usize>) -> ThreadExhaustion {
    let mut created = 0;
    loop {
        if ceiling.is_some_and(|max| created >= max) {
            return ThreadExhaustion {
                created,
                failure: None,
            };
        }
        match thread::Builder::new().spawn(|| thread::sleep(THREAD_SLEEP)) {
            Ok(_detached) => {
                created += 1;
                if created % THREAD_PROGRESS_EVERY == 0 {
                    log::info!("Created {created} threads...");
                }
            }
            Err(err) => {
                return ThreadExhaustion {
                    created,
                    failure: Some(err),
                };
            }
        }
    }
}

pub fn probe_threads(ceiling: Option<usize>) -> Fragment {
    let mut fragment = Fragment::builder(THREAD_SECTION);
    let run = exhaust_threads(ceiling);

    let entry = match run.failure {
        Some(err) => Entry::value("Threads created", run.created)
            .with_note(format!("creation failed at {} threads: {err}", run.created)),
        None => Entry::value("Threads created", run.created)
            .with_note("ceiling reached without failure"),
    };
    fragment.push(entry);

    fragment.build()
}
