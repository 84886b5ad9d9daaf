//! Long-lived shell state, bundled into one context object.

use std::collections::BTreeMap;

use crate::jobs::JobTable;
use crate::process::ExitCode;

/// Everything the shell keeps alive for its whole run.
///
/// Constructed once at startup and passed by reference into every
/// operation; there are no process-wide mutable statics for session state.
#[derive(Debug, Default)]
pub struct Session {
    /// Raw submitted lines, one entry per non-empty line, in order.
    /// Lines that later fail to parse are recorded too.
    pub history: Vec<String>,
    /// Alias name -> replacement text. Sorted so listings are stable.
    pub aliases: BTreeMap<String, String>,
    /// Background and stopped jobs, append-only, 1-based for display.
    pub jobs: JobTable,
    /// Exit status of the last foreground command; becomes the process
    /// exit status when the shell terminates.
    pub last_status: ExitCode,
    /// Set by the `exit` builtin; the read loop checks it after dispatch.
    pub should_exit: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }
}
