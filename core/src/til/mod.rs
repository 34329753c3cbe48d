//! The typed intermediate language (TIL).
//!
//! Two forms share one arena-allocated node type [`Expr`]: a purely
//! functional expression tree, and an explicit control-flow form
//! ([`Scfg`]) made of basic blocks with phi arguments and terminators.
//! [`Builder`] is the arena-backed factory for both; [`reducer`] lowers an
//! expression tree into a CFG with a continuation-passing traversal.

mod builder;
mod cfg;
mod expr;
pub mod reducer;

pub use builder::{Builder, CfgError};
pub use cfg::{
    cfgs_equal, BasicBlock, BlockId, PhiArg, Scfg, Terminator, ENTRY_BLOCK, INVALID_BLOCK_ID,
};
pub use expr::{
    exprs_equal, AllocKind, ApplyKind, BaseType, BinaryOpcode, CallingConvention, CastOpcode,
    Expr, ExprKind, ExprRef, Literal, UnaryOpcode, VarKind, INVALID_ID,
};
pub use reducer::{convert_expr_to_cfg, VarContext};

#[cfg(test)]
mod cfg_test;

#[cfg(test)]
mod reducer_test;
