//! Parser error types.
//!
//! Two categories with different policies: grammar validation errors are
//! collected during `init` (no parse is attempted if any were recorded),
//! and syntax errors are first-error-wins with a sticky flag and no
//! recovery.

use snafu::Snafu;

use super::token::Span;

/// An error found while validating a grammar, before any input is read.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum GrammarError {
    #[snafu(display("reference to undefined rule '{name}'"))]
    UndefinedRule { name: String },

    #[snafu(display("'{name}' is not defined on the stack at this point"))]
    UndefinedName { name: String },

    #[snafu(display("'{name}' expects {expected} arguments, found {found}"))]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[snafu(display("unknown opcode '{name}' in action"))]
    UnknownOpcode { name: String },

    #[snafu(display("let-binding '{name}' on a rule that produces no result"))]
    LetOnEmptyRule { name: String },

    #[snafu(display("alternative in '{context}' does not produce exactly one result"))]
    UnbalancedAlternative { context: String },

    #[snafu(display("empty alternative must be the last in '{context}'"))]
    EmptyAlternative { context: String },

    #[snafu(display("left-recursive iteration in '{context}' must keep one accumulated result"))]
    UnbalancedIteration { context: String },

    #[snafu(display("definition '{name}' does not produce exactly one result"))]
    UnbalancedDefinition { name: String },

    #[snafu(display("node list produced outside append in '{context}'"))]
    MalformedListExpr { context: String },
}

/// The first syntax mismatch hit during a parse.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display("expected {expected}, found '{found}'"))]
pub struct SyntaxError {
    pub expected: String,
    pub found: String,
    pub span: Span,
}
