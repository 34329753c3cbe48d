//! Compiler front-end toolkit.
//!
//! Three cooperating components:
//! - [`parser`]: a table-driven LL(k) combinator engine. Grammar rules are
//!   data; an interpreter runs them against a lexer's token stream and
//!   builds host AST nodes through an [`parser::AstFactory`].
//! - [`til`]: the typed intermediate language — an arena-allocated
//!   expression tree plus an explicit CFG form (basic blocks, phi
//!   arguments, terminators) and a reducer that lowers expression trees
//!   into CFGs by continuation passing.
//! - [`bytecode`]: a compact binary codec for TIL trees and CFGs, built on
//!   a buffered byte stream with variable-byte integers and a shared
//!   opcode/pseudo-opcode tag space.
//!
//! All IR nodes live in a caller-supplied [`bumpalo::Bump`] arena and are
//! released as a unit when the arena is dropped.

pub mod bytecode;
pub mod errors;
pub mod parser;
pub mod til;

pub use errors::Error;
