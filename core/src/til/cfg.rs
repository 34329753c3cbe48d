//! The control-flow form: basic blocks, phi arguments, terminators.
//!
//! A finished [`Scfg`] is immutable arena data: blocks reference each
//! other by integer [`BlockId`] rather than owning pointers, so the graph
//! has no cyclic ownership, and every slice lives in the arena (nothing
//! here needs `Drop`). CFGs under construction live inside
//! [`Builder`](super::Builder) and are frozen into this form by
//! `end_cfg`.

use core::fmt;

use super::expr::{exprs_equal, ExprRef};

/// Index of a basic block inside its CFG.
pub type BlockId = u32;

/// Sentinel block id for "no block".
pub const INVALID_BLOCK_ID: BlockId = u32::MAX;

/// The entry block is always block 0 after normal form.
pub const ENTRY_BLOCK: BlockId = 0;

/// One block argument: the `Phi` expression plus one incoming value per
/// predecessor, in predecessor order.
#[derive(Debug, Copy, Clone)]
pub struct PhiArg<'a> {
    pub phi: ExprRef<'a>,
    pub values: &'a [ExprRef<'a>],
}

/// The single terminator of a basic block.
#[derive(Debug, Copy, Clone)]
pub enum Terminator<'a> {
    /// Unconditional jump carrying this edge's phi values; `phi_slot` is
    /// the edge's index in the target's predecessor list.
    Goto { target: BlockId, phi_slot: u32 },
    Branch {
        cond: ExprRef<'a>,
        then_block: BlockId,
        else_block: BlockId,
    },
    Switch {
        scrutinee: ExprRef<'a>,
        cases: &'a [(ExprRef<'a>, BlockId)],
    },
    Return { value: ExprRef<'a> },
}

impl<'a> Terminator<'a> {
    /// Successor blocks in edge order.
    pub fn successors(&self, out: &mut Vec<BlockId>) {
        out.clear();
        match self {
            Terminator::Goto { target, .. } => out.push(*target),
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => {
                out.push(*then_block);
                out.push(*else_block);
            }
            Terminator::Switch { cases, .. } => out.extend(cases.iter().map(|(_, b)| *b)),
            Terminator::Return { .. } => {}
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct BasicBlock<'a> {
    /// This block's id; equal to its index in [`Scfg::blocks`].
    pub id: BlockId,
    pub args: &'a [PhiArg<'a>],
    pub instrs: &'a [ExprRef<'a>],
    pub term: Terminator<'a>,
    /// Predecessors in canonical (ascending id) order; phi values are
    /// indexed identically.
    pub preds: &'a [BlockId],
    /// First instruction id in this block; arguments first, then interior
    /// instructions, densely numbered across the CFG.
    pub first_instr_id: u32,
}

/// A finished control-flow graph in normal form: block ids are dense
/// reverse-postorder from entry, instruction ids are dense and
/// block-contiguous, and every block has exactly one terminator.
#[derive(Debug, Copy, Clone)]
pub struct Scfg<'a> {
    pub blocks: &'a [BasicBlock<'a>],
    pub entry: BlockId,
    pub exit: BlockId,
    pub num_instrs: u32,
}

impl<'a> Scfg<'a> {
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock<'a> {
        &self.blocks[id as usize]
    }

    pub fn entry_block(&self) -> &BasicBlock<'a> {
        self.block(self.entry)
    }

    pub fn exit_block(&self) -> &BasicBlock<'a> {
        self.block(self.exit)
    }
}

/// Structural equality of two CFGs: same shape, ids, phi value order,
/// terminators and instruction payloads.
pub fn cfgs_equal<'a>(a: &Scfg<'a>, b: &Scfg<'a>) -> bool {
    if a.num_blocks() != b.num_blocks()
        || a.entry != b.entry
        || a.exit != b.exit
        || a.num_instrs != b.num_instrs
    {
        return false;
    }
    a.blocks
        .iter()
        .zip(b.blocks.iter())
        .all(|(x, y)| blocks_equal(x, y))
}

fn blocks_equal<'a>(a: &BasicBlock<'a>, b: &BasicBlock<'a>) -> bool {
    if a.id != b.id || a.first_instr_id != b.first_instr_id || a.preds != b.preds {
        return false;
    }
    if a.args.len() != b.args.len() || a.instrs.len() != b.instrs.len() {
        return false;
    }
    let args_ok = a.args.iter().zip(b.args.iter()).all(|(x, y)| {
        x.values.len() == y.values.len()
            && x.values
                .iter()
                .zip(y.values.iter())
                .all(|(v, w)| exprs_equal(v, w))
    });
    let instrs_ok = a
        .instrs
        .iter()
        .zip(b.instrs.iter())
        .all(|(x, y)| exprs_equal(x, y));
    args_ok && instrs_ok && terms_equal(&a.term, &b.term)
}

fn terms_equal<'a>(a: &Terminator<'a>, b: &Terminator<'a>) -> bool {
    match (a, b) {
        (
            Terminator::Goto {
                target: t1,
                phi_slot: s1,
            },
            Terminator::Goto {
                target: t2,
                phi_slot: s2,
            },
        ) => t1 == t2 && s1 == s2,
        (
            Terminator::Branch {
                cond: c1,
                then_block: t1,
                else_block: e1,
            },
            Terminator::Branch {
                cond: c2,
                then_block: t2,
                else_block: e2,
            },
        ) => t1 == t2 && e1 == e2 && exprs_equal(c1, c2),
        (
            Terminator::Switch {
                scrutinee: s1,
                cases: c1,
            },
            Terminator::Switch {
                scrutinee: s2,
                cases: c2,
            },
        ) => {
            exprs_equal(s1, s2)
                && c1.len() == c2.len()
                && c1
                    .iter()
                    .zip(c2.iter())
                    .all(|((v1, b1), (v2, b2))| b1 == b2 && exprs_equal(v1, v2))
        }
        (Terminator::Return { value: v1 }, Terminator::Return { value: v2 }) => {
            exprs_equal(v1, v2)
        }
        _ => false,
    }
}

impl<'a> fmt::Display for Scfg<'a> {
    /// Labeled listing of the whole graph, one block per section.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "cfg: {} blocks, {} instructions, entry B{}, exit B{}",
            self.num_blocks(),
            self.num_instrs,
            self.entry,
            self.exit
        )?;
        for b in self.blocks {
            write!(f, "B{}:", b.id)?;
            if !b.preds.is_empty() {
                let preds: Vec<String> = b.preds.iter().map(|p| format!("B{p}")).collect();
                write!(f, "  ; preds: {}", preds.join(", "))?;
            }
            writeln!(f)?;
            for (i, arg) in b.args.iter().enumerate() {
                let values: Vec<String> = arg.values.iter().map(|v| format!("{v:?}")).collect();
                writeln!(
                    f,
                    "  %{} = phi [{}]",
                    b.first_instr_id + i as u32,
                    values.join(", ")
                )?;
            }
            for instr in b.instrs {
                writeln!(f, "  {instr:?}")?;
            }
            match &b.term {
                Terminator::Goto { target, phi_slot } => {
                    writeln!(f, "  goto B{target} (slot {phi_slot})")?
                }
                Terminator::Branch {
                    cond,
                    then_block,
                    else_block,
                } => writeln!(f, "  branch {cond:?} ? B{then_block} : B{else_block}")?,
                Terminator::Switch { scrutinee, cases } => {
                    let cases: Vec<String> = cases
                        .iter()
                        .map(|(v, b)| format!("{v:?} => B{b}"))
                        .collect();
                    writeln!(f, "  switch {scrutinee:?} [{}]", cases.join(", "))?
                }
                Terminator::Return { value } => writeln!(f, "  return {value:?}")?,
            }
        }
        Ok(())
    }
}
