//! ANSI escape sequences used for the prompt and for diagnostics.
//!
//! Presentation only; no other module depends on these being parsed back.

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const RED: &str = "\x1b[31m";
pub const MAGENTA: &str = "\x1b[35m";
pub const CYAN: &str = "\x1b[36m";

/// Clear the whole screen and home the cursor.
pub const CLEAR_SCREEN: &str = "\x1b[2J\x1b[1;1H";
