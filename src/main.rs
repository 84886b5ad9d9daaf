use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use argh::FromArgs;
use nix::libc;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use tracing::debug;

use clam::{Session, builtin, dispatch, editor, style, tokenizer};

#[derive(FromArgs)]
/// An interactive command shell with job control.
struct Cli {
    /// print version information and exit
    #[argh(switch, short = 'v')]
    version: bool,
}

fn main() -> ExitCode {
    let cli: Cli = argh::from_env();
    if cli.version {
        println!("clam {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    match run() {
        Ok(status) => {
            editor::restore_terminal_now();
            ExitCode::from(status.rem_euclid(256) as u8)
        }
        Err(err) => {
            editor::restore_terminal_now();
            eprintln!("clam: {err:#}");
            ExitCode::FAILURE
        }
    }
}

extern "C" fn terminate(_: libc::c_int) {
    editor::restore_terminal_now();
    unsafe { libc::_exit(1) };
}

/// Process-wide signal dispositions for a job-controlling shell.
///
/// SIGTERM and SIGQUIT restore cooked terminal mode before exiting so a
/// kill never leaves the terminal raw. SIGTSTP is ignored: the shell
/// itself must not be suspended by its own foreground children's stop
/// key. SIGTTOU is ignored so the shell can take the terminal back with
/// tcsetpgrp after handing it to a foreground job. SIGINT is managed per
/// edit cycle by the editor and per command by the dispatcher.
fn install_signal_handlers() -> nix::Result<()> {
    let term = SigAction::new(
        SigHandler::Handler(terminate),
        SaFlags::empty(),
        SigSet::empty(),
    );
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    unsafe {
        sigaction(Signal::SIGTERM, &term)?;
        sigaction(Signal::SIGQUIT, &term)?;
        sigaction(Signal::SIGTSTP, &ignore)?;
        sigaction(Signal::SIGTTOU, &ignore)?;
    }
    Ok(())
}

fn run() -> Result<i32> {
    install_signal_handlers().context("failed to install signal handlers")?;

    let mut session = Session::new();
    let mut stdout = io::stdout();
    builtin::greet(&mut stdout)?;

    while !session.should_exit {
        let line = match editor::read_line(&session)? {
            editor::ReadOutcome::Line(line) => line,
            editor::ReadOutcome::Eof => break,
        };

        if !remember(&mut session, &line) {
            continue;
        }

        let tokens = match tokenizer::parse(&line, ' ') {
            Ok(tokens) => tokens,
            Err(err) => {
                writeln!(stdout, "{}clam: {err}{}", style::RED, style::RESET)?;
                session.last_status = 1;
                continue;
            }
        };

        match dispatch::execute(&mut session, tokens) {
            Ok(status) => session.last_status = status,
            Err(err) => {
                writeln!(stdout, "{}clam: {err:#}{}", style::RED, style::RESET)?;
                session.last_status = 1;
            }
        }
        debug!(status = session.last_status, "command finished");
    }

    Ok(session.last_status)
}

/// Record a submitted line in history, exactly as typed.
///
/// Blank lines are discarded without being recorded; returns whether the
/// line is worth dispatching.
fn remember(session: &mut Session, line: &str) -> bool {
    if line.trim().is_empty() {
        return false;
    }
    session.history.push(line.to_string());
    true
}
