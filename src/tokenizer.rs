//! Quote-aware splitting of an input line into argument strings.
//!
//! The tokenizer knows nothing about pipes or background markers; `|` and
//! `&` come out as ordinary tokens and are reinterpreted by the dispatcher.

use thiserror::Error;

/// Errors produced while splitting a line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenizeError {
    /// A double or single quote was opened but never closed.
    #[error("bad syntax: unmatched quotation marks")]
    UnmatchedQuote,
}

/// Split `input` into tokens on `delimiter`.
///
/// Two independent quote modes are tracked: a quote character toggles its
/// own mode only while the other mode is inactive, and the quote character
/// itself never reaches the output. Inside either mode the delimiter is a
/// literal character. Outside quotes, runs of the delimiter end the current
/// token; empty tokens are never emitted.
///
/// If either quote mode is still open at the end of input the whole parse
/// fails and no tokens are returned, regardless of what was accumulated
/// before the fault.
pub fn parse(input: &str, delimiter: char) -> Result<Vec<String>, TokenizeError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut double_quoted = false;
    let mut single_quoted = false;

    for ch in input.chars() {
        if ch == '"' && !single_quoted {
            double_quoted = !double_quoted;
        } else if ch == '\'' && !double_quoted {
            single_quoted = !single_quoted;
        } else if ch == delimiter && !double_quoted && !single_quoted {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(ch);
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    if double_quoted || single_quoted {
        return Err(TokenizeError::UnmatchedQuote);
    }

    Ok(tokens)
}
