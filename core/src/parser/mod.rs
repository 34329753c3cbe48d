//! Table-driven LL(k) parser-combinator engine.
//!
//! Grammar rules are plain data ([`ParseRule`]); the engine interprets them
//! against a [`Lexer`]'s token stream. Parsing maintains a stack of
//! [`ParseResult`] values; grammar actions consume stack slots and mint
//! host AST nodes through an [`AstFactory`]. Before any parse, [`Parser::init`]
//! validates every registered definition with an abstract stack, resolving
//! names to stack indices and computing frame sizes.

mod ast;
mod astack;
pub mod error;
mod grammar;
pub mod lexer;
mod result;
#[allow(clippy::module_inception)]
pub mod parser;
mod token;

pub use ast::AstNode;
pub use astack::AbstractStack;
pub use error::{GrammarError, SyntaxError};
pub use grammar::{NamedDefinition, ParseRule};
pub use lexer::BasicLexer;
pub use parser::{AstFactory, Parser};
pub use result::{ParseResult, ResultStack};
pub use token::{Lexer, Span, Token, TOKEN_EOF, TOKEN_IDENTIFIER, TOKEN_NUMBER, TOKEN_STRING};


#[cfg(test)]
mod lexer_test;

#[cfg(test)]
mod parser_test;
