//! Grammar rules as data.
//!
//! A grammar is a set of [`NamedDefinition`]s whose bodies are trees of
//! [`ParseRule`] combinators. Rules carry the bookkeeping the validator
//! fills in during [`Parser::init`](super::Parser::init): keyword token
//! ids, resolved definition indices, argument stack indices, and frame
//! sizes.

use core::fmt;

use super::ast::{AstNode, UNRESOLVED};

/// Index of a named definition inside the parser's definition vector.
pub(crate) const NO_TARGET: usize = usize::MAX;

/// One grammar combinator.
///
/// Every rule must be initialized (validated) before parsing; the
/// numeric fields below start unresolved and are filled in at init time.
#[derive(Debug)]
pub enum ParseRule {
    /// Matches the empty input. Only meaningful as the last alternative of
    /// an option chain.
    None,
    /// Matches one token by id. Pushes the token substring unless `skip`.
    Token { token_id: u32, skip: bool },
    /// Matches a keyword; resolved to a token id when the keyword is
    /// registered with the lexer at init time. Pushes nothing.
    Keyword { text: String, token_id: u32 },
    /// Matches `first` then `second`. An optional let-name captures
    /// `first`'s result for later reference within the frame.
    Sequence {
        let_name: Option<String>,
        first: Box<ParseRule>,
        second: Box<ParseRule>,
    },
    /// Tries `left` if its FIRST set accepts the lookahead, else `right`.
    Option {
        left: Box<ParseRule>,
        right: Box<ParseRule>,
    },
    /// Left recursion, explicit: parses `base`, then repeats `rest` while
    /// it accepts the lookahead, binding the accumulated result under
    /// `let_name` inside each iteration.
    RecurseLeft {
        let_name: Option<String>,
        base: Box<ParseRule>,
        rest: Box<ParseRule>,
    },
    /// Calls a named definition, passing previously captured results as
    /// arguments. `target` and `arg_indices` are resolved at init time;
    /// `frame_size` is the abstract stack size at the call site.
    Reference {
        name: String,
        arg_names: Vec<String>,
        target: usize,
        arg_indices: Vec<u32>,
        frame_size: u32,
    },
    /// Synthesizes a result by interpreting `body` against the current
    /// frame. `frame_size` is the abstract stack size at this point and
    /// `drop` the number of local slots erased after the result is pushed.
    Action {
        body: AstNode,
        frame_size: u32,
        drop: u32,
    },
}

impl ParseRule {
    pub fn token(token_id: u32) -> ParseRule {
        ParseRule::Token {
            token_id,
            skip: false,
        }
    }

    pub fn token_skip(token_id: u32) -> ParseRule {
        ParseRule::Token {
            token_id,
            skip: true,
        }
    }

    pub fn keyword(text: &str) -> ParseRule {
        ParseRule::Keyword {
            text: text.to_string(),
            token_id: 0,
        }
    }

    pub fn seq(first: ParseRule, second: ParseRule) -> ParseRule {
        ParseRule::Sequence {
            let_name: None,
            first: Box::new(first),
            second: Box::new(second),
        }
    }

    /// A sequence whose first element's result is captured under `name`.
    pub fn seq_named(name: &str, first: ParseRule, second: ParseRule) -> ParseRule {
        ParseRule::Sequence {
            let_name: Some(name.to_string()),
            first: Box::new(first),
            second: Box::new(second),
        }
    }

    pub fn option(left: ParseRule, right: ParseRule) -> ParseRule {
        ParseRule::Option {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn recurse_left(name: &str, base: ParseRule, rest: ParseRule) -> ParseRule {
        ParseRule::RecurseLeft {
            let_name: Some(name.to_string()),
            base: Box::new(base),
            rest: Box::new(rest),
        }
    }

    pub fn reference(name: &str) -> ParseRule {
        ParseRule::Reference {
            name: name.to_string(),
            arg_names: Vec::new(),
            target: NO_TARGET,
            arg_indices: Vec::new(),
            frame_size: UNRESOLVED,
        }
    }

    pub fn reference_with_args(name: &str, args: &[&str]) -> ParseRule {
        ParseRule::Reference {
            name: name.to_string(),
            arg_names: args.iter().map(|s| s.to_string()).collect(),
            target: NO_TARGET,
            arg_indices: Vec::new(),
            frame_size: UNRESOLVED,
        }
    }

    pub fn action(body: AstNode) -> ParseRule {
        ParseRule::Action {
            body,
            frame_size: UNRESOLVED,
            drop: 0,
        }
    }
}

impl Default for ParseRule {
    fn default() -> Self {
        ParseRule::None
    }
}

/// A top-level callable rule. Definitions may refer to each other freely,
/// including mutual recursion; references are resolved by name during
/// init.
#[derive(Debug)]
pub struct NamedDefinition {
    pub name: String,
    pub arg_names: Vec<String>,
    pub body: ParseRule,
}

impl NamedDefinition {
    pub fn new(name: &str, body: ParseRule) -> Self {
        NamedDefinition {
            name: name.to_string(),
            arg_names: Vec::new(),
            body,
        }
    }

    pub fn with_args(name: &str, args: &[&str], body: ParseRule) -> Self {
        NamedDefinition {
            name: name.to_string(),
            arg_names: args.iter().map(|s| s.to_string()).collect(),
            body,
        }
    }
}

impl fmt::Display for ParseRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseRule::None => write!(f, "()"),
            ParseRule::Token { token_id, skip } => {
                if *skip {
                    write!(f, "%skip({token_id})")
                } else {
                    write!(f, "%{token_id}")
                }
            }
            ParseRule::Keyword { text, .. } => write!(f, "\"{text}\""),
            ParseRule::Sequence {
                let_name,
                first,
                second,
            } => {
                match let_name {
                    Some(n) => write!(f, "{first}:{n} {second}")?,
                    None => write!(f, "{first} {second}")?,
                }
                Ok(())
            }
            ParseRule::Option { left, right } => write!(f, "({left} | {right})"),
            ParseRule::RecurseLeft {
                let_name,
                base,
                rest,
            } => match let_name {
                Some(n) => write!(f, "({base} (:{n} {rest})*)"),
                None => write!(f, "({base} ({rest})*)"),
            },
            ParseRule::Reference {
                name, arg_names, ..
            } => {
                if arg_names.is_empty() {
                    write!(f, "{name}")
                } else {
                    write!(f, "{name}({})", arg_names.join(", "))
                }
            }
            ParseRule::Action { body, .. } => write!(f, "{{ {body} }}"),
        }
    }
}

impl fmt::Display for NamedDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.arg_names.is_empty() {
            write!(f, "{} ::= {};", self.name, self.body)
        } else {
            write!(
                f,
                "{}({}) ::= {};",
                self.name,
                self.arg_names.join(", "),
                self.body
            )
        }
    }
}
