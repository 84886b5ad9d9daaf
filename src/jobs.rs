//! The job table and foreground/background transfer.
//!
//! A job is the shell's own record of a spawned process group, one process
//! per group. The table is append-only: the number a job is announced with
//! is its 1-based position at creation time and never changes, even after
//! the job finishes. Done jobs stay in the table (numbering stays stable)
//! but are hidden from listings.

use std::io::{self, Write};

use nix::sys::signal::{Signal, killpg};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{Pid, getpgrp, tcsetpgrp};
use thiserror::Error;
use tracing::debug;

use crate::process::ExitCode;

/// User-visible execution state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Stopped,
    Done,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Running => "Running",
            JobStatus::Stopped => "Stopped",
            JobStatus::Done => "Done",
        };
        f.write_str(s)
    }
}

/// One spawned process group tracked by the shell.
#[derive(Debug)]
pub struct Job {
    pub pid: Pid,
    /// Equal to `pid`: every child is the leader of its own group.
    pub pgid: Pid,
    /// The command text the job was launched with.
    pub cmd: String,
    pub status: JobStatus,
}

/// Job-control failures reported to the user.
///
/// Validation errors leave the table untouched; system errors carry the
/// failing operation so the diagnostic names it.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("no such job")]
    NoSuchJob,
    #[error("job has terminated")]
    Terminated,
    #[error("job already in background")]
    AlreadyRunning,
    #[error("{op}: {source}")]
    Sys {
        op: &'static str,
        #[source]
        source: nix::errno::Errno,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Append-only ordered collection of jobs.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: Vec<Job>,
}

impl JobTable {
    /// Record a new job and return its stable 1-based number.
    pub fn register(&mut self, pid: Pid, cmd: String, status: JobStatus) -> usize {
        debug!(%pid, %status, cmd, "registering job");
        self.jobs.push(Job {
            pid,
            pgid: pid,
            cmd,
            status,
        });
        self.jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Look up a job by its user-visible 1-based number.
    pub fn get(&self, number: usize) -> Option<&Job> {
        number.checked_sub(1).and_then(|i| self.jobs.get(i))
    }

    pub fn get_mut(&mut self, number: usize) -> Option<&mut Job> {
        number.checked_sub(1).and_then(|i| self.jobs.get_mut(i))
    }

    /// Non-Done jobs with their stable numbers, in creation order.
    pub fn active(&self) -> impl Iterator<Item = (usize, &Job)> {
        self.jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.status != JobStatus::Done)
            .map(|(i, job)| (i + 1, job))
    }

    /// Number of the most recently stopped job, if any.
    pub fn latest_stopped(&self) -> Option<usize> {
        self.jobs
            .iter()
            .rposition(|job| job.status == JobStatus::Stopped)
            .map(|i| i + 1)
    }

    /// Non-blocking sweep over Running jobs.
    ///
    /// A single `waitpid(WNOHANG | WUNTRACED)` per job reports exits and
    /// stops alike; a reap error also retires the job. Never blocks.
    pub fn refresh(&mut self) {
        for job in &mut self.jobs {
            if job.status != JobStatus::Running {
                continue;
            }
            let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED;
            match waitpid(job.pid, Some(flags)) {
                Ok(WaitStatus::StillAlive) => {}
                Ok(WaitStatus::Stopped(..)) => {
                    debug!(pid = %job.pid, "job stopped");
                    job.status = JobStatus::Stopped;
                }
                Ok(WaitStatus::Continued(..)) => {}
                Ok(_) => {
                    debug!(pid = %job.pid, "job finished");
                    job.status = JobStatus::Done;
                }
                Err(_) => {
                    job.status = JobStatus::Done;
                }
            }
        }
    }
}

/// Restores the terminal's controlling group to the shell on drop, so a
/// foreground transfer that fails partway still hands the terminal back.
struct TerminalHandoff {
    shell_pgid: Pid,
}

impl TerminalHandoff {
    fn begin(job_pgid: Pid) -> Result<Self, JobError> {
        let shell_pgid = getpgrp();
        tcsetpgrp(io::stdin(), job_pgid).map_err(|source| JobError::Sys {
            op: "tcsetpgrp",
            source,
        })?;
        debug!(%job_pgid, "terminal handed to job");
        Ok(Self { shell_pgid })
    }
}

impl Drop for TerminalHandoff {
    fn drop(&mut self) {
        if let Err(err) = tcsetpgrp(io::stdin(), self.shell_pgid) {
            debug!(%err, "failed to reclaim terminal");
        }
    }
}

/// Bring job `number` to the foreground and wait for it to exit or stop.
///
/// Validates the number, hands the terminal to the job's group, continues
/// it if it was stopped, then blocks until the job exits or stops again.
/// The terminal is returned to the shell's group on every exit path.
pub fn foreground(
    table: &mut JobTable,
    number: usize,
    out: &mut dyn Write,
) -> Result<ExitCode, JobError> {
    table.refresh();
    let job = table.get_mut(number).ok_or(JobError::NoSuchJob)?;
    if job.status == JobStatus::Done {
        return Err(JobError::Terminated);
    }

    writeln!(out, "{}", job.cmd)?;
    out.flush()?;

    let _handoff = TerminalHandoff::begin(job.pgid)?;
    if job.status == JobStatus::Stopped {
        killpg(job.pgid, Signal::SIGCONT).map_err(|source| JobError::Sys {
            op: "kill",
            source,
        })?;
    }
    job.status = JobStatus::Running;

    match waitpid(job.pid, Some(WaitPidFlag::WUNTRACED)) {
        Ok(WaitStatus::Stopped(..)) => {
            job.status = JobStatus::Stopped;
            writeln!(out, "\nStopped: {}", job.cmd)?;
            Ok(0)
        }
        Ok(WaitStatus::Exited(_, code)) => {
            job.status = JobStatus::Done;
            Ok(code)
        }
        Ok(WaitStatus::Signaled(_, signal, _)) => {
            job.status = JobStatus::Done;
            Ok(128 + signal as ExitCode)
        }
        Ok(_) => Ok(0),
        Err(source) => Err(JobError::Sys {
            op: "waitpid",
            source,
        }),
    }
}

/// Continue stopped job `number` in the background.
///
/// No terminal transfer takes place; the job must currently be Stopped.
pub fn resume_in_background(
    table: &mut JobTable,
    number: usize,
    out: &mut dyn Write,
) -> Result<ExitCode, JobError> {
    table.refresh();
    let job = table.get_mut(number).ok_or(JobError::NoSuchJob)?;
    match job.status {
        JobStatus::Done => Err(JobError::Terminated),
        JobStatus::Running => Err(JobError::AlreadyRunning),
        JobStatus::Stopped => {
            killpg(job.pgid, Signal::SIGCONT).map_err(|source| JobError::Sys {
                op: "kill",
                source,
            })?;
            job.status = JobStatus::Running;
            writeln!(out, "[{}] {} &", number, job.cmd)?;
            Ok(0)
        }
    }
}
