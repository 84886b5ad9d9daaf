//! Builtin commands and the registry the dispatcher consults.
//!
//! The registry is an ordered list of `(name, handler, description)`
//! entries; the dispatcher matches names exactly, `help` renders the
//! descriptions, and tab completion searches the names. Handlers run
//! in-process, take the whole expanded token sequence (name included) and
//! write through the given sink so tests can capture their output.

use std::io::Write;

use anyhow::Result;

use crate::jobs::{self, JobError};
use crate::process::ExitCode;
use crate::session::Session;
use crate::style::{BOLD, CLEAR_SCREEN, CYAN, MAGENTA, RED, RESET};

pub type Handler = fn(&mut Session, &[String], &mut dyn Write) -> Result<ExitCode>;

pub struct Builtin {
    pub name: &'static str,
    pub run: Handler,
    pub description: &'static str,
}

pub const BUILTINS: &[Builtin] = &[
    Builtin { name: "help", run: help, description: "shows this message" },
    Builtin { name: "cd", run: cd, description: "changes directory" },
    Builtin { name: "exit", run: exit, description: "exits the shell" },
    Builtin { name: "history", run: history, description: "shows history commands" },
    Builtin { name: "echo", run: echo, description: "displays text" },
    Builtin { name: "clear", run: clear, description: "clears the terminal screen" },
    Builtin { name: "alias", run: alias, description: "creates, lists or removes aliases" },
    Builtin { name: "jobs", run: jobs_list, description: "lists background jobs" },
    Builtin { name: "export", run: export, description: "sets environment variables" },
    Builtin { name: "fg", run: fg, description: "brings a job to the foreground" },
    Builtin { name: "bg", run: bg, description: "continues a stopped job in the background" },
];

/// Exact-name lookup in the registry.
pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|builtin| builtin.name == name)
}

fn help(_session: &mut Session, _args: &[String], out: &mut dyn Write) -> Result<ExitCode> {
    writeln!(out, "clam {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(out, "A small interactive Unix shell.")?;
    writeln!(out, "Usage: type a command and press Enter.")?;
    writeln!(out, "Built-in commands:")?;
    for builtin in BUILTINS {
        writeln!(
            out,
            "    {BOLD}{MAGENTA}{}{RESET}: {}",
            builtin.name, builtin.description
        )?;
    }
    Ok(0)
}

fn cd(_session: &mut Session, args: &[String], out: &mut dyn Write) -> Result<ExitCode> {
    match args.len() {
        1 => {
            writeln!(out, "cd: too few arguments!")?;
            writeln!(out, "Usage: cd dest_dir")?;
            Ok(1)
        }
        2 => match std::env::set_current_dir(&args[1]) {
            Ok(()) => Ok(0),
            Err(err) => {
                writeln!(out, "{RED}cd: {err}{RESET}")?;
                Ok(1)
            }
        },
        _ => {
            writeln!(out, "cd: too many arguments!")?;
            Ok(1)
        }
    }
}

fn exit(session: &mut Session, _args: &[String], out: &mut dyn Write) -> Result<ExitCode> {
    writeln!(out, "clam: Exiting...")?;
    session.should_exit = true;
    Ok(session.last_status)
}

fn history(session: &mut Session, _args: &[String], out: &mut dyn Write) -> Result<ExitCode> {
    for (index, line) in session.history.iter().enumerate() {
        writeln!(out, "{:>3} {}", index + 1, line)?;
    }
    Ok(0)
}

fn echo(_session: &mut Session, args: &[String], out: &mut dyn Write) -> Result<ExitCode> {
    writeln!(out, "{}", args[1..].join(" "))?;
    Ok(0)
}

fn clear(_session: &mut Session, _args: &[String], out: &mut dyn Write) -> Result<ExitCode> {
    write!(out, "{CLEAR_SCREEN}")?;
    out.flush()?;
    Ok(0)
}

fn alias(session: &mut Session, args: &[String], out: &mut dyn Write) -> Result<ExitCode> {
    if args.len() == 1 {
        if session.aliases.is_empty() {
            writeln!(out, "No aliases defined")?;
        } else {
            for (name, value) in &session.aliases {
                writeln!(out, "alias {name}='{value}'")?;
            }
        }
        return Ok(0);
    }

    if args[1] == "-r" {
        let Some(name) = args.get(2) else {
            writeln!(out, "Usage: alias -r name")?;
            return Ok(1);
        };
        if session.aliases.remove(name).is_some() {
            writeln!(out, "Alias '{name}' removed")?;
        } else {
            writeln!(out, "No such alias: {name}")?;
        }
        return Ok(0);
    }

    // Re-join so `alias ll=ls -l` works as well as a quoted value.
    let definition = args[1..].join(" ");
    match definition.split_once('=') {
        Some((name, value)) if !name.is_empty() => {
            session
                .aliases
                .insert(name.to_string(), strip_quotes(value).to_string());
            Ok(0)
        }
        _ => {
            writeln!(out, "Invalid alias syntax: {definition}")?;
            writeln!(out, "Usage: alias name=value")?;
            Ok(1)
        }
    }
}

fn jobs_list(session: &mut Session, _args: &[String], out: &mut dyn Write) -> Result<ExitCode> {
    session.jobs.refresh();
    let mut printed_any = false;
    for (number, job) in session.jobs.active() {
        writeln!(out, "[{}] {:<10} {} {}", number, job.status, job.pid, job.cmd)?;
        printed_any = true;
    }
    if !printed_any {
        writeln!(out, "No active jobs")?;
    }
    Ok(0)
}

fn export(_session: &mut Session, args: &[String], out: &mut dyn Write) -> Result<ExitCode> {
    if args.len() == 1 {
        for (name, value) in std::env::vars() {
            writeln!(out, "{name}={value}")?;
        }
        return Ok(0);
    }

    for definition in &args[1..] {
        match definition.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                // The shell is single-threaded; nothing reads the
                // environment concurrently with this write.
                unsafe { std::env::set_var(name, strip_quotes(value)) };
            }
            _ => {
                writeln!(out, "Invalid export syntax: {definition}")?;
                writeln!(out, "Usage: export NAME=VALUE")?;
                return Ok(1);
            }
        }
    }
    Ok(0)
}

fn fg(session: &mut Session, args: &[String], out: &mut dyn Write) -> Result<ExitCode> {
    let number = match args.get(1) {
        Some(arg) => match parse_job_number(arg) {
            Some(number) => number,
            None => {
                writeln!(out, "fg: {arg}: no such job")?;
                return Ok(1);
            }
        },
        None => 1,
    };
    match jobs::foreground(&mut session.jobs, number, out) {
        Ok(code) => Ok(code),
        Err(err) => {
            report_job_error(out, "fg", &err)?;
            Ok(1)
        }
    }
}

fn bg(session: &mut Session, args: &[String], out: &mut dyn Write) -> Result<ExitCode> {
    let number = match args.get(1) {
        Some(arg) => match parse_job_number(arg) {
            Some(number) => number,
            None => {
                writeln!(out, "bg: {arg}: no such job")?;
                return Ok(1);
            }
        },
        None => match session.jobs.latest_stopped() {
            Some(number) => number,
            None => {
                writeln!(out, "bg: no current job")?;
                return Ok(1);
            }
        },
    };
    match jobs::resume_in_background(&mut session.jobs, number, out) {
        Ok(code) => Ok(code),
        Err(err) => {
            report_job_error(out, "bg", &err)?;
            Ok(1)
        }
    }
}

/// Accepts both `3` and the `%3` form.
fn parse_job_number(arg: &str) -> Option<usize> {
    arg.strip_prefix('%').unwrap_or(arg).parse().ok()
}

fn report_job_error(out: &mut dyn Write, command: &str, err: &JobError) -> Result<()> {
    match err {
        JobError::Sys { .. } | JobError::Io(_) => {
            writeln!(out, "{RED}{command}: {err}{RESET}")?;
        }
        _ => writeln!(out, "{command}: {err}")?,
    }
    Ok(())
}

/// Drop one pair of matching surrounding quotes, if present.
fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'\'' || bytes[0] == b'"')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Greeting printed once at startup.
pub fn greet(out: &mut dyn Write) -> Result<()> {
    writeln!(
        out,
        "{BOLD}{CYAN}clam{RESET} version {}",
        env!("CARGO_PKG_VERSION")
    )?;
    writeln!(out, "type \"help\" for more information.")?;
    Ok(())
}
