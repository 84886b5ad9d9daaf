//! clam, a small interactive Unix shell.
//!
//! The crate is built around a single [`Session`] object that owns all
//! long-lived shell state: command history, the alias table, the job table
//! and the last foreground exit status. One iteration of the interactive
//! loop reads a line through the raw-mode [`editor`], splits it with the
//! quote-aware [`tokenizer`], and hands the tokens to [`dispatch`], which
//! expands aliases and variables, runs builtins in-process, and forwards
//! everything else to the process/job-control layer in [`process`] and
//! [`jobs`].
//!
//! The binary target wires these pieces together; the library exists so the
//! individual layers stay independently testable.

pub mod builtin;
pub mod dispatch;
pub mod editor;
pub mod jobs;
pub mod process;
pub mod session;
pub mod style;
pub mod tokenizer;

pub use process::ExitCode;
pub use session::Session;
