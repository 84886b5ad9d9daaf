//! Turns a token sequence into an executed command.
//!
//! Expansion order matters and is fixed: one alias expansion step (never
//! recursive), then variable references, then the builtin lookup. Only when
//! no builtin matches does the dispatcher look for the background marker
//! and pipe tokens and hand the stages to the process layer.

use anyhow::Result;

use crate::builtin;
use crate::process::{self, ExitCode, SigintIgnored};
use crate::session::Session;
use crate::tokenizer::{self, TokenizeError};

/// Execute one already-tokenized command line.
///
/// Returns the command's exit status; builtins run in-process, everything
/// else is spawned. SIGINT is ignored by the shell itself for the duration
/// of external execution and restored on every path.
pub fn execute(session: &mut Session, tokens: Vec<String>) -> Result<ExitCode> {
    if tokens.is_empty() {
        return Ok(1);
    }

    let mut tokens = expand_alias(session, tokens)?;
    expand_variables(&mut tokens);

    if let Some(builtin) = builtin::lookup(&tokens[0]) {
        let mut stdout = std::io::stdout();
        return (builtin.run)(session, &tokens, &mut stdout);
    }

    let background = strip_background_marker(&mut tokens);
    let stages = split_pipeline(&tokens);

    let _sigint = SigintIgnored::install()?;
    if background && stages.len() == 1 {
        process::launch_background(session, &tokens)
    } else {
        process::run_pipeline(session, &stages)
    }
}

/// Replace the first token by its alias expansion, keeping the remaining
/// tokens of the original invocation after the alias's own tokens.
///
/// A single step only: the expansion result is not consulted again.
fn expand_alias(session: &Session, mut tokens: Vec<String>) -> Result<Vec<String>, TokenizeError> {
    match session.aliases.get(&tokens[0]) {
        Some(replacement) => {
            let mut expanded = tokenizer::parse(replacement, ' ')?;
            expanded.extend(tokens.drain(1..));
            Ok(expanded)
        }
        None => Ok(tokens),
    }
}

/// Replace `$NAME` tokens with the environment value, or an empty string
/// when the variable is unset. A lone `$` stays literal.
fn expand_variables(tokens: &mut [String]) {
    for token in tokens.iter_mut() {
        if let Some(name) = token.strip_prefix('$') {
            if !name.is_empty() {
                *token = std::env::var(name).unwrap_or_default();
            }
        }
    }
}

/// Remove a single trailing `&` token, reporting whether it was present.
fn strip_background_marker(tokens: &mut Vec<String>) -> bool {
    if tokens.last().is_some_and(|t| t == "&") {
        tokens.pop();
        true
    } else {
        false
    }
}

/// Split on every literal `|` token. No pipes means one stage.
fn split_pipeline(tokens: &[String]) -> Vec<Vec<String>> {
    tokens
        .split(|token| token == "|")
        .map(|stage| stage.to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn alias_expansion_splices_and_keeps_trailing_args() {
        let mut session = Session::new();
        session.aliases.insert("ll".into(), "ls -l".into());
        let result = expand_alias(&session, toks(&["ll", "-a", "/tmp"])).unwrap();
        assert_eq!(result, toks(&["ls", "-l", "-a", "/tmp"]));
    }

    #[test]
    fn alias_expansion_is_not_recursive() {
        let mut session = Session::new();
        // An alias whose expansion begins with its own name must not loop.
        session.aliases.insert("ls".into(), "ls --color".into());
        let result = expand_alias(&session, toks(&["ls"])).unwrap();
        assert_eq!(result, toks(&["ls", "--color"]));
    }

    #[test]
    fn non_alias_tokens_pass_through() {
        let session = Session::new();
        let result = expand_alias(&session, toks(&["ls", "-l"])).unwrap();
        assert_eq!(result, toks(&["ls", "-l"]));
    }

    #[test]
    fn unset_variable_expands_to_empty_string_token() {
        let mut tokens = toks(&["echo", "$CLAM_SURELY_UNSET_VARIABLE"]);
        expand_variables(&mut tokens);
        assert_eq!(tokens, toks(&["echo", ""]));
    }

    #[test]
    fn set_variable_expands_to_its_value() {
        unsafe { std::env::set_var("CLAM_DISPATCH_TEST_VAR", "value-1") };
        let mut tokens = toks(&["echo", "$CLAM_DISPATCH_TEST_VAR"]);
        expand_variables(&mut tokens);
        assert_eq!(tokens, toks(&["echo", "value-1"]));
    }

    #[test]
    fn lone_dollar_is_left_alone() {
        let mut tokens = toks(&["echo", "$"]);
        expand_variables(&mut tokens);
        assert_eq!(tokens, toks(&["echo", "$"]));
    }

    #[test]
    fn background_marker_is_stripped_only_at_the_end() {
        let mut tokens = toks(&["sleep", "5", "&"]);
        assert!(strip_background_marker(&mut tokens));
        assert_eq!(tokens, toks(&["sleep", "5"]));

        let mut tokens = toks(&["echo", "&", "x"]);
        assert!(!strip_background_marker(&mut tokens));
        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn pipeline_splitting_generalizes_to_n_stages() {
        assert_eq!(split_pipeline(&toks(&["ls"])).len(), 1);

        let stages = split_pipeline(&toks(&["ls", "|", "wc"]));
        assert_eq!(stages, vec![toks(&["ls"]), toks(&["wc"])]);

        let stages = split_pipeline(&toks(&["a", "|", "b", "|", "c", "-x"]));
        assert_eq!(stages, vec![toks(&["a"]), toks(&["b"]), toks(&["c", "-x"])]);
    }

    #[test]
    fn trailing_pipe_produces_an_empty_stage() {
        let stages = split_pipeline(&toks(&["ls", "|"]));
        assert_eq!(stages.len(), 2);
        assert!(stages[1].is_empty());
    }

    #[test]
    fn empty_token_sequence_is_a_soft_failure() {
        let mut session = Session::new();
        assert_eq!(execute(&mut session, Vec::new()).unwrap(), 1);
    }

    #[test]
    fn lone_background_marker_is_a_soft_failure() {
        let mut session = Session::new();
        let status = execute(&mut session, toks(&["&"])).unwrap();
        assert_eq!(status, process::FAILURE);
        assert!(session.jobs.is_empty());
    }

    #[test]
    fn pipeline_exit_status_comes_from_the_second_stage() {
        let mut session = Session::new();
        let status = execute(&mut session, toks(&["true", "|", "false"])).unwrap();
        assert_eq!(status, 1);
    }
}
