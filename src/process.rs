//! Process creation, pipeline wiring and foreground waiting.
//!
//! Every child joins a new process group with itself as leader, which keeps
//! it out of the terminal's controlling group; terminal ownership only ever
//! moves explicitly, through `fg`. Pipelines are wired as N stages joined
//! by N-1 anonymous pipes; each pipe end is owned by exactly one place and
//! closed as soon as that place is finished with it, so end-of-file
//! propagates when either side of a pipe goes away.

use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{Pid, pipe};
use tracing::debug;

use crate::jobs::JobStatus;
use crate::session::Session;
use crate::style::{RED, RESET};

/// Conventional process exit code: 0 for success, non-zero for failure.
pub type ExitCode = i32;

/// Generic failure indicator for spawn/pipe/wait errors.
pub const FAILURE: ExitCode = -1;

/// Ignores SIGINT on the shell process while external commands run, so an
/// interrupt only ever reaches the foreground child's process group.
/// Restores the previous disposition on drop, on every path.
pub struct SigintIgnored {
    prev: SigAction,
}

impl SigintIgnored {
    pub fn install() -> nix::Result<Self> {
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        let prev = unsafe { sigaction(Signal::SIGINT, &ignore)? };
        Ok(Self { prev })
    }
}

impl Drop for SigintIgnored {
    fn drop(&mut self) {
        let _ = unsafe { sigaction(Signal::SIGINT, &self.prev) };
    }
}

/// Spawn one child process for `argv`.
///
/// The child becomes the leader of a fresh process group before exec, and
/// its stdin/stdout are redirected to the given pipe ends when present.
/// The passed descriptors are consumed: the parent's copies close here, so
/// a pipe's lifetime in the parent ends as soon as its stage is spawned.
pub fn spawn_stage(
    argv: &[String],
    stdin: Option<OwnedFd>,
    stdout: Option<OwnedFd>,
) -> io::Result<Pid> {
    let mut command = Command::new(&argv[0]);
    command.args(&argv[1..]);
    command.process_group(0);
    if let Some(fd) = stdin {
        command.stdin(Stdio::from(fd));
    }
    if let Some(fd) = stdout {
        command.stdout(Stdio::from(fd));
    }
    let child = command.spawn()?;
    let pid = Pid::from_raw(child.id() as i32);
    debug!(%pid, cmd = %argv[0], "spawned");
    Ok(pid)
}

/// Run `stages` as a foreground pipeline and return the last stage's exit
/// status, independent of the earlier stages' outcomes.
///
/// A stage that fails to spawn gets a diagnostic and is skipped; its pipe
/// ends are dropped so the neighbouring stage observes end-of-file rather
/// than being aborted. A single stage is simply a plain foreground command.
pub fn run_pipeline(session: &mut Session, stages: &[Vec<String>]) -> Result<ExitCode> {
    let mut pids: Vec<Option<Pid>> = Vec::with_capacity(stages.len());
    let mut prev_read: Option<OwnedFd> = None;

    for (index, stage) in stages.iter().enumerate() {
        let last = index + 1 == stages.len();
        let (next_read, write_end) = if last {
            (None, None)
        } else {
            let (read, write) = pipe().context("pipe")?;
            (Some(read), Some(write))
        };

        if stage.is_empty() {
            println!("{RED}clam: bad syntax: empty pipeline stage{RESET}");
            pids.push(None);
        } else {
            match spawn_stage(stage, prev_read.take(), write_end) {
                Ok(pid) => pids.push(Some(pid)),
                Err(err) => {
                    println!("{RED}{}: {}{RESET}", stage[0], err);
                    pids.push(None);
                }
            }
        }
        prev_read = next_read;
    }
    drop(prev_read);

    let mut status = FAILURE;
    for (stage, pid) in stages.iter().zip(pids) {
        status = match pid {
            Some(pid) => wait_foreground(session, pid, stage.join(" "))?,
            None => FAILURE,
        };
    }
    Ok(status)
}

/// Launch `argv` without waiting and register it as a Running job.
///
/// An empty `argv` (a lone background marker, or a command that expanded
/// to nothing) is a diagnosed soft failure, not a spawn attempt.
pub fn launch_background(session: &mut Session, argv: &[String]) -> Result<ExitCode> {
    if argv.is_empty() {
        println!("{RED}clam: bad syntax: nothing to run in the background{RESET}");
        return Ok(FAILURE);
    }
    match spawn_stage(argv, None, None) {
        Ok(pid) => {
            let number = session
                .jobs
                .register(pid, argv.join(" "), JobStatus::Running);
            println!("[{number}] {pid}");
            Ok(0)
        }
        Err(err) => {
            println!("{RED}{}: {}{RESET}", argv[0], err);
            Ok(FAILURE)
        }
    }
}

/// Block until `pid` exits or is stopped from outside.
///
/// A stopped foreground child is not discarded: it is registered in the
/// job table as Stopped and announced with its new job number.
pub fn wait_foreground(session: &mut Session, pid: Pid, cmd: String) -> Result<ExitCode> {
    match waitpid(pid, Some(WaitPidFlag::WUNTRACED)) {
        Ok(WaitStatus::Exited(_, code)) => Ok(code),
        Ok(WaitStatus::Signaled(_, signal, _)) => Ok(128 + signal as ExitCode),
        Ok(WaitStatus::Stopped(..)) => {
            let number = session.jobs.register(pid, cmd.clone(), JobStatus::Stopped);
            println!("[{number}] Stopped: {cmd}");
            Ok(0)
        }
        Ok(status) => {
            debug!(?status, "unexpected wait status");
            Ok(FAILURE)
        }
        Err(err) => {
            println!("{RED}waitpid: {err}{RESET}");
            Ok(FAILURE)
        }
    }
}
