//! Raw-mode interactive line editing.
//!
//! One call to [`read_line`] owns one edit cycle: it switches the terminal
//! to raw (non-canonical, non-echoing) mode, reads bytes one at a time,
//! feeds them through a key-dispatch state machine, and returns the
//! completed line. Interrupt generation stays enabled in raw mode; the
//! SIGINT handler installed for the cycle only flips an atomic flag, and
//! the actual clear-and-redraw happens back on the read loop once the
//! blocking read returns with EINTR.
//!
//! Redraws are stateless: every state-mutating key clears the terminal
//! line, reprints the prompt and the whole buffer, and repositions the
//! cursor. No incremental diffing.

use std::io::{self, ErrorKind, Read, Write};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use nix::libc;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use nix::sys::termios::{
    ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg, SpecialCharacterIndices, Termios,
    tcgetattr, tcsetattr,
};

use crate::builtin;
use crate::session::Session;
use crate::style::{BOLD, CLEAR_SCREEN, CYAN, MAGENTA, RESET};

const PROMPT: &str = "clam> ";

/// What a completed read-line cycle produced.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Enter was pressed; the line may be empty.
    Line(String),
    /// End-of-input on an empty buffer: the shell should shut down.
    Eof,
}

/// Cooked-mode terminal settings, captured once so asynchronous
/// termination handlers can restore the terminal without any locking.
static COOKED_TERMIOS: OnceLock<libc::termios> = OnceLock::new();

/// Set by the SIGINT handler, consumed by the read loop.
static INTERRUPT_PENDING: AtomicBool = AtomicBool::new(false);

/// Restore cooked mode from a signal handler or exit path. Only uses
/// async-signal-safe operations; a no-op if raw mode was never entered.
pub fn restore_terminal_now() {
    if let Some(saved) = COOKED_TERMIOS.get() {
        unsafe {
            libc::tcsetattr(libc::STDIN_FILENO, libc::TCSAFLUSH, saved);
        }
    }
}

/// Raw terminal mode, held for exactly one read-line cycle.
///
/// Echo, canonical processing and implementation-defined input extensions
/// are disabled; ISIG stays on so the interrupt key still raises SIGINT.
/// Dropping the guard restores the saved settings.
struct RawMode {
    saved: Termios,
}

impl RawMode {
    fn enable() -> nix::Result<Self> {
        let stdin = io::stdin();
        let saved = tcgetattr(&stdin)?;
        COOKED_TERMIOS.get_or_init(|| saved.clone().into());

        let mut raw = saved.clone();
        raw.local_flags &= !(LocalFlags::ECHO | LocalFlags::ICANON | LocalFlags::IEXTEN);
        raw.input_flags &= !(InputFlags::IXON | InputFlags::ICRNL);
        raw.output_flags &= !OutputFlags::OPOST;
        raw.control_flags |= ControlFlags::CS8;
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        tcsetattr(&stdin, SetArg::TCSAFLUSH, &raw)?;
        Ok(Self { saved })
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = tcsetattr(io::stdin(), SetArg::TCSAFLUSH, &self.saved);
    }
}

extern "C" fn note_interrupt(_: libc::c_int) {
    INTERRUPT_PENDING.store(true, Ordering::SeqCst);
}

/// Installs the flag-setting SIGINT handler for the duration of one edit
/// cycle. Registered without SA_RESTART so the blocking terminal read
/// returns EINTR and the loop can react. Previous disposition restored on
/// drop.
struct InterruptWatch {
    prev: SigAction,
}

impl InterruptWatch {
    fn install() -> nix::Result<Self> {
        INTERRUPT_PENDING.store(false, Ordering::SeqCst);
        let action = SigAction::new(
            SigHandler::Handler(note_interrupt),
            SaFlags::empty(),
            SigSet::empty(),
        );
        let prev = unsafe { sigaction(Signal::SIGINT, &action)? };
        Ok(Self { prev })
    }

    fn take() -> bool {
        INTERRUPT_PENDING.swap(false, Ordering::SeqCst)
    }
}

impl Drop for InterruptWatch {
    fn drop(&mut self) {
        let _ = unsafe { sigaction(Signal::SIGINT, &self.prev) };
    }
}

/// A decoded keypress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Key {
    Char(char),
    Enter,
    Tab,
    Backspace,
    Delete,
    Left,
    Right,
    Up,
    Down,
    Home,
    End,
    Interrupt,
    Eof,
    ClearScreen,
    /// Bare escape or an unrecognized escape sequence; a no-op.
    Escape,
}

/// Read and decode one keypress. `Ok(None)` means the input stream itself
/// ended (stdin closed), which is stronger than the Ctrl-D key.
fn read_key(input: &mut dyn Read) -> io::Result<Option<Key>> {
    let mut byte = [0u8; 1];
    if input.read(&mut byte)? == 0 {
        return Ok(None);
    }
    let key = match byte[0] {
        b'\r' | b'\n' => Key::Enter,
        0x03 => Key::Interrupt,
        0x04 => Key::Eof,
        b'\t' => Key::Tab,
        0x0c => Key::ClearScreen,
        0x08 | 0x7f => Key::Backspace,
        0x1b => read_escape_sequence(input)?,
        b if (0x20..0x7f).contains(&b) => Key::Char(b as char),
        _ => Key::Escape,
    };
    Ok(Some(key))
}

/// Bounded secondary read after an escape byte: up to two more bytes,
/// three for the tilde-terminated sequences. Anything unrecognized
/// degrades to `Key::Escape`.
fn read_escape_sequence(input: &mut dyn Read) -> io::Result<Key> {
    let mut seq = [0u8; 2];
    if input.read(&mut seq[..1])? == 0 || seq[0] != b'[' {
        return Ok(Key::Escape);
    }
    if input.read(&mut seq[1..2])? == 0 {
        return Ok(Key::Escape);
    }
    let key = match seq[1] {
        b'A' => Key::Up,
        b'B' => Key::Down,
        b'C' => Key::Right,
        b'D' => Key::Left,
        b'H' => Key::Home,
        b'F' => Key::End,
        b'1'..=b'8' => {
            let mut tail = [0u8; 1];
            if input.read(&mut tail)? == 0 || tail[0] != b'~' {
                return Ok(Key::Escape);
            }
            match seq[1] {
                b'1' | b'7' => Key::Home,
                b'4' | b'8' => Key::End,
                b'3' => Key::Delete,
                _ => Key::Escape,
            }
        }
        _ => Key::Escape,
    };
    Ok(key)
}

/// What the state machine wants the loop to do after a keypress.
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Continue,
    Submit,
    Eof,
}

/// Per-cycle edit state: the mutable buffer, the cursor offset into it,
/// and a history-navigation index. The index ranges over
/// `[0, history.len()]`, where `history.len()` is the live edit slot.
struct LineEditor<'a> {
    session: &'a Session,
    buffer: String,
    cursor: usize,
    history_index: usize,
}

impl<'a> LineEditor<'a> {
    fn new(session: &'a Session) -> Self {
        Self {
            session,
            buffer: String::new(),
            cursor: 0,
            history_index: session.history.len(),
        }
    }

    /// Apply one key to the edit state. Side prints (completion lists,
    /// the interrupt echo, screen clearing) go through `out`; the caller
    /// redraws after every `Step::Continue`.
    fn apply(&mut self, key: Key, out: &mut dyn Write) -> io::Result<Step> {
        match key {
            Key::Enter => return Ok(Step::Submit),
            Key::Char(ch) => {
                self.buffer.insert(self.cursor, ch);
                self.cursor += 1;
            }
            Key::Backspace => {
                if self.cursor > 0 {
                    self.buffer.remove(self.cursor - 1);
                    self.cursor -= 1;
                }
            }
            Key::Delete => {
                if self.cursor < self.buffer.len() {
                    self.buffer.remove(self.cursor);
                }
            }
            Key::Left => self.cursor = self.cursor.saturating_sub(1),
            Key::Right => {
                if self.cursor < self.buffer.len() {
                    self.cursor += 1;
                }
            }
            Key::Home => self.cursor = 0,
            Key::End => self.cursor = self.buffer.len(),
            Key::Up => {
                if self.history_index > 0 {
                    self.history_index -= 1;
                    self.load_history_entry();
                }
            }
            Key::Down => {
                if self.history_index < self.session.history.len() {
                    self.history_index += 1;
                    self.load_history_entry();
                }
            }
            Key::Tab => self.complete(out)?,
            Key::Interrupt => {
                write!(out, "^C\r\n")?;
                self.clear();
            }
            Key::Eof => {
                if self.buffer.is_empty() {
                    return Ok(Step::Eof);
                }
            }
            Key::ClearScreen => write!(out, "{CLEAR_SCREEN}")?,
            Key::Escape => {}
        }
        Ok(Step::Continue)
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
    }

    /// Replace the buffer with the indexed history line, or empty it when
    /// the index sits on the live slot past the newest entry. The cursor
    /// always lands at the end.
    fn load_history_entry(&mut self) {
        match self.session.history.get(self.history_index) {
            Some(line) => self.buffer = line.clone(),
            None => self.buffer.clear(),
        }
        self.cursor = self.buffer.len();
    }

    /// Tab completion over builtin and alias names.
    ///
    /// Completes the word immediately before the cursor. One candidate:
    /// splice the missing suffix in place. Several: list them on a fresh
    /// line (the caller's redraw restores the prompt). None: no-op.
    fn complete(&mut self, out: &mut dyn Write) -> io::Result<()> {
        let head = &self.buffer[..self.cursor];
        let start = head.rfind(' ').map_or(0, |i| i + 1);
        let word = head[start..].to_string();
        if word.is_empty() {
            return Ok(());
        }

        let mut candidates: Vec<&str> = builtin::BUILTINS
            .iter()
            .map(|builtin| builtin.name)
            .filter(|name| name.starts_with(&word))
            .collect();
        candidates.extend(
            self.session
                .aliases
                .keys()
                .map(String::as_str)
                .filter(|name| name.starts_with(&word)),
        );

        match candidates.as_slice() {
            [] => {}
            [only] => {
                let suffix = only[word.len()..].to_string();
                self.buffer.insert_str(self.cursor, &suffix);
                self.cursor += suffix.len();
            }
            many => {
                write!(out, "\r\n")?;
                for candidate in many {
                    write!(out, "{BOLD}{MAGENTA}{candidate}{RESET}  ")?;
                }
                write!(out, "\r\n")?;
            }
        }
        Ok(())
    }

    /// Stateless repaint: clear the line, reprint prompt and buffer, move
    /// the cursor to prompt width plus cursor offset.
    fn refresh(&self, out: &mut dyn Write) -> io::Result<()> {
        write!(out, "\r\x1b[K{BOLD}{CYAN}{PROMPT}{RESET}{}", self.buffer)?;
        write!(out, "\r\x1b[{}C", PROMPT.len() + self.cursor)?;
        out.flush()
    }
}

/// Read one line interactively, with history navigation, completion and
/// line editing. Raw mode and the SIGINT disposition are restored before
/// returning, on every path.
pub fn read_line(session: &Session) -> Result<ReadOutcome> {
    let _raw = RawMode::enable().context("failed to enter raw terminal mode")?;
    let _watch = InterruptWatch::install().context("failed to install interrupt handler")?;

    let mut editor = LineEditor::new(session);
    let mut input = io::stdin().lock();
    let mut out = io::stdout().lock();
    editor.refresh(&mut out)?;

    loop {
        // A SIGINT may land between two reads, not only during one, so the
        // flag is drained before every read rather than only on EINTR.
        if InterruptWatch::take() {
            write!(out, "\r\n")?;
            editor.clear();
            editor.refresh(&mut out)?;
        }

        let key = match read_key(&mut input) {
            Ok(Some(key)) => key,
            Ok(None) => {
                write!(out, "\r\n")?;
                out.flush()?;
                return Ok(ReadOutcome::Eof);
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err).context("terminal read failed"),
        };

        match editor.apply(key, &mut out)? {
            Step::Continue => editor.refresh(&mut out)?,
            Step::Submit => {
                write!(out, "\r\n")?;
                out.flush()?;
                return Ok(ReadOutcome::Line(editor.buffer));
            }
            Step::Eof => {
                write!(out, "exit\r\n")?;
                out.flush()?;
                return Ok(ReadOutcome::Eof);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn key_of(bytes: &[u8]) -> Key {
        read_key(&mut Cursor::new(bytes.to_vec())).unwrap().unwrap()
    }

    #[test]
    fn decodes_plain_and_control_bytes() {
        assert_eq!(key_of(b"a"), Key::Char('a'));
        assert_eq!(key_of(b" "), Key::Char(' '));
        assert_eq!(key_of(b"\r"), Key::Enter);
        assert_eq!(key_of(b"\n"), Key::Enter);
        assert_eq!(key_of(b"\t"), Key::Tab);
        assert_eq!(key_of(&[0x7f]), Key::Backspace);
        assert_eq!(key_of(&[0x08]), Key::Backspace);
        assert_eq!(key_of(&[0x03]), Key::Interrupt);
        assert_eq!(key_of(&[0x04]), Key::Eof);
        assert_eq!(key_of(&[0x0c]), Key::ClearScreen);
    }

    #[test]
    fn decodes_escape_sequences() {
        assert_eq!(key_of(b"\x1b[A"), Key::Up);
        assert_eq!(key_of(b"\x1b[B"), Key::Down);
        assert_eq!(key_of(b"\x1b[C"), Key::Right);
        assert_eq!(key_of(b"\x1b[D"), Key::Left);
        assert_eq!(key_of(b"\x1b[H"), Key::Home);
        assert_eq!(key_of(b"\x1b[F"), Key::End);
        assert_eq!(key_of(b"\x1b[3~"), Key::Delete);
        assert_eq!(key_of(b"\x1b[1~"), Key::Home);
        assert_eq!(key_of(b"\x1b[4~"), Key::End);
    }

    #[test]
    fn unrecognized_escapes_degrade_to_noop() {
        assert_eq!(key_of(b"\x1b"), Key::Escape);
        assert_eq!(key_of(b"\x1bx"), Key::Escape);
        assert_eq!(key_of(b"\x1b[Z"), Key::Escape);
        assert_eq!(key_of(b"\x1b[3x"), Key::Escape);
    }

    #[test]
    fn interrupt_flag_is_latched_until_taken() {
        INTERRUPT_PENDING.store(false, Ordering::SeqCst);
        note_interrupt(nix::libc::SIGINT);
        assert!(InterruptWatch::take());
        // Drained: a second take sees nothing until the next delivery.
        assert!(!InterruptWatch::take());
    }

    #[test]
    fn stream_end_is_distinguished_from_the_eof_key() {
        let mut empty = Cursor::new(Vec::new());
        assert_eq!(read_key(&mut empty).unwrap(), None);
    }

    fn feed(editor: &mut LineEditor<'_>, keys: &[Key]) {
        let mut sink = Vec::new();
        for &key in keys {
            editor.apply(key, &mut sink).unwrap();
        }
    }

    fn type_str(editor: &mut LineEditor<'_>, text: &str) {
        let keys: Vec<Key> = text.chars().map(Key::Char).collect();
        feed(editor, &keys);
    }

    #[test]
    fn inserting_and_cursor_movement() {
        let session = Session::new();
        let mut editor = LineEditor::new(&session);
        type_str(&mut editor, "hello");
        assert_eq!(editor.buffer, "hello");
        assert_eq!(editor.cursor, 5);

        feed(&mut editor, &[Key::Left, Key::Left]);
        assert_eq!(editor.cursor, 3);
        type_str(&mut editor, "X");
        assert_eq!(editor.buffer, "helXlo");

        feed(&mut editor, &[Key::Home]);
        assert_eq!(editor.cursor, 0);
        feed(&mut editor, &[Key::Left]);
        assert_eq!(editor.cursor, 0);
        feed(&mut editor, &[Key::End]);
        assert_eq!(editor.cursor, 6);
        feed(&mut editor, &[Key::Right]);
        assert_eq!(editor.cursor, 6);
    }

    #[test]
    fn backspace_and_delete_have_distinct_targets() {
        let session = Session::new();
        let mut editor = LineEditor::new(&session);
        type_str(&mut editor, "abc");

        feed(&mut editor, &[Key::Left, Key::Backspace]);
        assert_eq!(editor.buffer, "ac");
        assert_eq!(editor.cursor, 1);

        feed(&mut editor, &[Key::Delete]);
        assert_eq!(editor.buffer, "a");

        // Both are no-ops at their respective buffer edges.
        feed(&mut editor, &[Key::Delete]);
        assert_eq!(editor.buffer, "a");
        feed(&mut editor, &[Key::Home, Key::Backspace]);
        assert_eq!(editor.buffer, "a");
    }

    #[test]
    fn history_navigation_clamps_and_returns_to_live_slot() {
        let mut session = Session::new();
        session.history.push("first".into());
        session.history.push("second".into());
        let mut editor = LineEditor::new(&session);
        assert_eq!(editor.history_index, 2);

        feed(&mut editor, &[Key::Up]);
        assert_eq!(editor.buffer, "second");
        assert_eq!(editor.cursor, 6);
        feed(&mut editor, &[Key::Up]);
        assert_eq!(editor.buffer, "first");
        // Clamped at the oldest entry.
        feed(&mut editor, &[Key::Up]);
        assert_eq!(editor.buffer, "first");

        feed(&mut editor, &[Key::Down]);
        assert_eq!(editor.buffer, "second");
        // Past the newest entry sits the empty live slot.
        feed(&mut editor, &[Key::Down]);
        assert_eq!(editor.buffer, "");
        feed(&mut editor, &[Key::Down]);
        assert_eq!(editor.buffer, "");
    }

    #[test]
    fn interrupt_key_clears_without_submitting() {
        let session = Session::new();
        let mut editor = LineEditor::new(&session);
        type_str(&mut editor, "half a comman");
        let mut sink = Vec::new();
        let step = editor.apply(Key::Interrupt, &mut sink).unwrap();
        assert_eq!(step, Step::Continue);
        assert_eq!(editor.buffer, "");
        assert_eq!(editor.cursor, 0);
    }

    #[test]
    fn eof_key_only_acts_on_an_empty_buffer() {
        let session = Session::new();
        let mut editor = LineEditor::new(&session);
        let mut sink = Vec::new();
        type_str(&mut editor, "x");
        assert_eq!(editor.apply(Key::Eof, &mut sink).unwrap(), Step::Continue);
        assert_eq!(editor.buffer, "x");

        feed(&mut editor, &[Key::Backspace]);
        assert_eq!(editor.apply(Key::Eof, &mut sink).unwrap(), Step::Eof);
    }

    #[test]
    fn single_candidate_completion_splices_the_suffix() {
        let mut session = Session::new();
        session.aliases.insert("ll".into(), "ls -l".into());
        let mut editor = LineEditor::new(&session);
        type_str(&mut editor, "l");

        let mut sink = Vec::new();
        editor.apply(Key::Tab, &mut sink).unwrap();
        assert_eq!(editor.buffer, "ll");
        assert_eq!(editor.cursor, 2);
        assert!(sink.is_empty(), "single match must not print candidates");
    }

    #[test]
    fn multiple_candidates_are_listed_and_buffer_unchanged() {
        let session = Session::new();
        let mut editor = LineEditor::new(&session);
        // "e" matches exit, echo and export among the builtins.
        type_str(&mut editor, "e");

        let mut sink = Vec::new();
        editor.apply(Key::Tab, &mut sink).unwrap();
        assert_eq!(editor.buffer, "e");
        assert_eq!(editor.cursor, 1);
        let listing = String::from_utf8(sink).unwrap();
        assert!(listing.contains("exit"));
        assert!(listing.contains("echo"));
        assert!(listing.contains("export"));
    }

    #[test]
    fn completion_applies_to_the_word_before_the_cursor() {
        let session = Session::new();
        let mut editor = LineEditor::new(&session);
        type_str(&mut editor, "echo his");

        let mut sink = Vec::new();
        editor.apply(Key::Tab, &mut sink).unwrap();
        assert_eq!(editor.buffer, "echo history");
        assert_eq!(editor.cursor, 12);
    }

    #[test]
    fn completion_with_no_candidates_is_a_noop() {
        let session = Session::new();
        let mut editor = LineEditor::new(&session);
        type_str(&mut editor, "zzz");
        let mut sink = Vec::new();
        editor.apply(Key::Tab, &mut sink).unwrap();
        assert_eq!(editor.buffer, "zzz");
        assert!(sink.is_empty());
    }

    #[test]
    fn completion_on_empty_word_is_a_noop() {
        let session = Session::new();
        let mut editor = LineEditor::new(&session);
        type_str(&mut editor, "echo ");
        let mut sink = Vec::new();
        editor.apply(Key::Tab, &mut sink).unwrap();
        assert_eq!(editor.buffer, "echo ");
        assert!(sink.is_empty());
    }

    #[test]
    fn enter_submits_even_when_empty() {
        let session = Session::new();
        let mut editor = LineEditor::new(&session);
        let mut sink = Vec::new();
        assert_eq!(editor.apply(Key::Enter, &mut sink).unwrap(), Step::Submit);
    }

    #[test]
    fn refresh_repaints_prompt_buffer_and_cursor() {
        let session = Session::new();
        let mut editor = LineEditor::new(&session);
        type_str(&mut editor, "ab");
        feed(&mut editor, &[Key::Left]);

        let mut out = Vec::new();
        editor.refresh(&mut out).unwrap();
        let painted = String::from_utf8(out).unwrap();
        assert!(painted.starts_with("\r\x1b[K"));
        assert!(painted.contains(PROMPT));
        assert!(painted.contains("ab"));
        // Prompt is 6 columns, cursor offset 1.
        assert!(painted.ends_with("\r\x1b[7C"));
    }
}
