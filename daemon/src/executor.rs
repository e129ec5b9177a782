//! Process signal delivery (end task, force kill, sampler shutdown)

use serde::Serialize;
use std::io;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
    Stop,
    Cont,
}

impl Signal {
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
            Signal::Stop => libc::SIGSTOP,
            Signal::Cont => libc::SIGCONT,
        }
    }
}

impl FromStr for Signal {
    type Err = io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SIGTERM" | "TERM" | "15" => Ok(Signal::Term),
            "SIGKILL" | "KILL" | "9" => Ok(Signal::Kill),
            "SIGSTOP" | "STOP" | "19" => Ok(Signal::Stop),
            "SIGCONT" | "CONT" | "18" => Ok(Signal::Cont),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unknown signal {:?}", other),
            )),
        }
    }
}

pub fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    if pid <= 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "refusing to signal a process group"));
    }
    let result = unsafe { libc::kill(pid, signal.as_raw()) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Whether `pid` still runs. Zombies count as gone.
pub fn is_alive(pid: u32) -> bool {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if raw <= 0 || unsafe { libc::kill(raw, 0) } != 0 {
        return false;
    }
    // The state field follows the parenthesised command name
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(')')
            .map_or(true, |(_, rest)| !rest.trim_start().starts_with('Z')),
        Err(_) => false,
    }
}

/// Outcome of ending every pid of a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EndTaskReport {
    /// Pids that accepted the first signal.
    pub signalled: usize,
    /// Pids that outlived the grace period and were sent SIGKILL.
    pub escalated: usize,
    pub failed: Vec<u32>,
}

/// Ends every pid: SIGKILL when `force`, otherwise SIGTERM, then SIGKILL for
/// survivors once `grace` has passed.
pub async fn end_task(pids: &[u32], force: bool, grace: Duration) -> EndTaskReport {
    let first = if force { Signal::Kill } else { Signal::Term };
    let mut report = EndTaskReport::default();
    let mut delivered = Vec::with_capacity(pids.len());
    for &pid in pids {
        match send_signal(pid, first) {
            Ok(()) => delivered.push(pid),
            Err(e) => {
                warn!(pid, ?first, "signal failed: {}", e);
                report.failed.push(pid);
            }
        }
    }
    report.signalled = delivered.len();

    if !force && !delivered.is_empty() {
        tokio::time::sleep(grace).await;
        for pid in delivered.into_iter().filter(|pid| is_alive(*pid)) {
            debug!(pid, "still running after SIGTERM, escalating");
            match send_signal(pid, Signal::Kill) {
                Ok(()) => report.escalated += 1,
                // Exited between the check and the kill
                Err(e) if e.raw_os_error() == Some(libc::ESRCH) => {}
                Err(e) => {
                    warn!(pid, "SIGKILL failed: {}", e);
                    report.failed.push(pid);
                }
            }
        }
    }

    info!(
        signalled = report.signalled,
        escalated = report.escalated,
        failed = report.failed.len(),
        force,
        "end task"
    );
    report
}
