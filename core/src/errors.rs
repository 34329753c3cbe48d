use snafu::Snafu;

use crate::parser::{GrammarError, SyntaxError};

/// Top-level error type for API boundaries.
///
/// Each component reports failure in its own way internally (the parser
/// collects validation errors and keeps a sticky syntax error, the bytecode
/// reader keeps a sticky failure flag); this enum unifies them for callers
/// that want a single error channel.
#[derive(Debug, Snafu)]
pub enum Error {
    /// Grammar validation failed before any input was consumed.
    #[snafu(display("grammar validation failed: {}", first(errors)))]
    Grammar { errors: Vec<GrammarError> },

    /// The input did not match the grammar.
    #[snafu(display("{error}"))]
    Syntax { error: SyntaxError },

    /// A bytecode stream could not be decoded.
    #[snafu(display("bytecode error: {message}"))]
    Bytecode { message: String },
}

fn first(errors: &[GrammarError]) -> String {
    match errors.first() {
        Some(e) => format!("{} ({} total)", e, errors.len()),
        None => "no errors recorded".into(),
    }
}

impl From<Vec<GrammarError>> for Error {
    fn from(errors: Vec<GrammarError>) -> Self {
        Error::Grammar { errors }
    }
}

impl From<SyntaxError> for Error {
    fn from(error: SyntaxError) -> Self {
        Error::Syntax { error }
    }
}
