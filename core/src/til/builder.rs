//! Arena-backed factory for TIL nodes and CFG assembly.
//!
//! The builder owns the CFG under construction (growable block state);
//! `end_cfg` verifies it, computes normal form, and freezes it into
//! immutable arena data. Terminator constructors finish the current block.

use bumpalo::Bump;
use snafu::Snafu;

use super::cfg::{BasicBlock, BlockId, PhiArg, Scfg, Terminator};
use super::expr::{
    AllocKind, ApplyKind, BaseType, BinaryOpcode, CallingConvention, CastOpcode, Expr, ExprKind,
    ExprRef, Literal, UnaryOpcode, VarKind,
};

#[derive(Debug, Snafu)]
pub enum CfgError {
    #[snafu(display("block B{block} has no terminator"))]
    MissingTerminator { block: BlockId },

    #[snafu(display("block B{block} is not the entry and has no predecessors"))]
    NoPredecessors { block: BlockId },

    #[snafu(display("block B{block} has {values} phi values for {preds} predecessors"))]
    PhiMismatch {
        block: BlockId,
        values: usize,
        preds: usize,
    },

    #[snafu(display("exit block is unreachable from the entry"))]
    UnreachableExit,

    #[snafu(display("a block is still open at the end of the CFG"))]
    OpenBlock,
}

struct WipPhi<'a> {
    phi: ExprRef<'a>,
    values: Vec<ExprRef<'a>>,
}

struct WipBlock<'a> {
    args: Vec<WipPhi<'a>>,
    instrs: Vec<ExprRef<'a>>,
    term: Option<Terminator<'a>>,
    preds: Vec<BlockId>,
}

impl<'a> WipBlock<'a> {
    fn new() -> Self {
        WipBlock {
            args: Vec::new(),
            instrs: Vec::new(),
            term: None,
            preds: Vec::new(),
        }
    }
}

struct WipCfg<'a> {
    blocks: Vec<WipBlock<'a>>,
    current: Option<BlockId>,
    exit: BlockId,
}

pub struct Builder<'a> {
    arena: &'a Bump,
    cfg: Option<WipCfg<'a>>,
}

impl<'a> Builder<'a> {
    pub fn new(arena: &'a Bump) -> Self {
        Builder { arena, cfg: None }
    }

    pub fn arena(&self) -> &'a Bump {
        self.arena
    }

    fn alloc(&self, kind: ExprKind<'a>) -> ExprRef<'a> {
        self.arena.alloc(Expr::new(kind))
    }

    /// Copy a string into the arena.
    pub fn intern_str(&self, s: &str) -> &'a str {
        self.arena.alloc_str(s)
    }

    // -----------------------------------------------------------------
    // Node constructors
    // -----------------------------------------------------------------

    pub fn new_literal(&self, lit: Literal<'a>) -> ExprRef<'a> {
        self.alloc(ExprKind::Literal(lit))
    }

    pub fn new_literal_void(&self) -> ExprRef<'a> {
        self.new_literal(Literal::Void)
    }

    pub fn new_variable(&self, decl: ExprRef<'a>) -> ExprRef<'a> {
        debug_assert!(matches!(decl.kind, ExprKind::VarDecl { .. }));
        self.alloc(ExprKind::Variable(decl))
    }

    pub fn new_var_decl(
        &self,
        kind: VarKind,
        name: &str,
        defn: Option<ExprRef<'a>>,
    ) -> ExprRef<'a> {
        self.alloc(ExprKind::VarDecl {
            kind,
            name: self.intern_str(name),
            defn,
            var_index: core::cell::Cell::new(super::expr::INVALID_ID),
        })
    }

    pub fn new_function(&self, param: ExprRef<'a>, body: ExprRef<'a>) -> ExprRef<'a> {
        self.alloc(ExprKind::Function { param, body })
    }

    pub fn new_code(
        &self,
        return_type: Option<ExprRef<'a>>,
        body: Option<ExprRef<'a>>,
        cconv: CallingConvention,
    ) -> ExprRef<'a> {
        self.alloc(ExprKind::Code {
            return_type,
            body,
            cconv,
        })
    }

    pub fn new_field(&self, range: Option<ExprRef<'a>>, body: Option<ExprRef<'a>>) -> ExprRef<'a> {
        self.alloc(ExprKind::Field { range, body })
    }

    pub fn new_slot(&self, name: &str, modifiers: u16, body: ExprRef<'a>) -> ExprRef<'a> {
        self.alloc(ExprKind::Slot {
            name: self.intern_str(name),
            modifiers,
            body,
        })
    }

    pub fn new_record(
        &self,
        slots: &[ExprRef<'a>],
        parent: Option<ExprRef<'a>>,
    ) -> ExprRef<'a> {
        self.alloc(ExprKind::Record {
            slots: self.arena.alloc_slice_copy(slots),
            parent,
        })
    }

    pub fn new_array(
        &self,
        elem_type: Option<ExprRef<'a>>,
        size: Option<ExprRef<'a>>,
        elements: &[ExprRef<'a>],
    ) -> ExprRef<'a> {
        self.alloc(ExprKind::Array {
            elem_type,
            size,
            elements: self.arena.alloc_slice_copy(elements),
        })
    }

    pub fn new_scalar_type(&self, base: BaseType) -> ExprRef<'a> {
        self.alloc(ExprKind::ScalarType(base))
    }

    pub fn new_apply(
        &self,
        func: ExprRef<'a>,
        arg: Option<ExprRef<'a>>,
        kind: ApplyKind,
    ) -> ExprRef<'a> {
        self.alloc(ExprKind::Apply { func, arg, kind })
    }

    pub fn new_project(&self, base: ExprRef<'a>, slot_name: &str) -> ExprRef<'a> {
        self.alloc(ExprKind::Project {
            base,
            slot_name: self.intern_str(slot_name),
        })
    }

    pub fn new_call(&self, target: ExprRef<'a>, result_type: BaseType) -> ExprRef<'a> {
        self.alloc(ExprKind::Call {
            target,
            result_type,
        })
    }

    pub fn new_alloc(&self, init: ExprRef<'a>, kind: AllocKind) -> ExprRef<'a> {
        self.alloc(ExprKind::Alloc { init, kind })
    }

    pub fn new_load(&self, pointer: ExprRef<'a>, result_type: BaseType) -> ExprRef<'a> {
        self.alloc(ExprKind::Load {
            pointer,
            result_type,
        })
    }

    pub fn new_store(&self, dest: ExprRef<'a>, value: ExprRef<'a>) -> ExprRef<'a> {
        self.alloc(ExprKind::Store { dest, value })
    }

    pub fn new_array_index(&self, array: ExprRef<'a>, index: ExprRef<'a>) -> ExprRef<'a> {
        self.alloc(ExprKind::ArrayIndex { array, index })
    }

    pub fn new_array_add(&self, array: ExprRef<'a>, index: ExprRef<'a>) -> ExprRef<'a> {
        self.alloc(ExprKind::ArrayAdd { array, index })
    }

    pub fn new_unary_op(
        &self,
        op: UnaryOpcode,
        operand_type: BaseType,
        operand: ExprRef<'a>,
    ) -> ExprRef<'a> {
        self.alloc(ExprKind::UnaryOp {
            op,
            operand_type,
            operand,
        })
    }

    pub fn new_binary_op(
        &self,
        op: BinaryOpcode,
        operand_type: BaseType,
        lhs: ExprRef<'a>,
        rhs: ExprRef<'a>,
    ) -> ExprRef<'a> {
        self.alloc(ExprKind::BinaryOp {
            op,
            operand_type,
            lhs,
            rhs,
        })
    }

    pub fn new_cast(
        &self,
        op: CastOpcode,
        target_type: BaseType,
        operand: ExprRef<'a>,
    ) -> ExprRef<'a> {
        self.alloc(ExprKind::Cast {
            op,
            target_type,
            operand,
        })
    }

    pub fn new_identifier(&self, name: &str) -> ExprRef<'a> {
        self.alloc(ExprKind::Identifier(self.intern_str(name)))
    }

    pub fn new_let(&self, var_decl: ExprRef<'a>, body: ExprRef<'a>) -> ExprRef<'a> {
        self.alloc(ExprKind::Let { var_decl, body })
    }

    pub fn new_if_then_else(
        &self,
        cond: ExprRef<'a>,
        then_expr: ExprRef<'a>,
        else_expr: ExprRef<'a>,
    ) -> ExprRef<'a> {
        self.alloc(ExprKind::IfThenElse {
            cond,
            then_expr,
            else_expr,
        })
    }

    pub fn new_undefined(&self) -> ExprRef<'a> {
        self.alloc(ExprKind::Undefined)
    }

    /// Wrap a finished CFG as an expression value.
    pub fn new_cfg(&self, cfg: &'a Scfg<'a>) -> ExprRef<'a> {
        self.alloc(ExprKind::Cfg(cfg))
    }

    pub fn new_wildcard(&self) -> ExprRef<'a> {
        self.alloc(ExprKind::Wildcard)
    }

    fn new_phi(&self) -> ExprRef<'a> {
        let phi = self.alloc(ExprKind::Phi);
        phi.in_block.set(true);
        phi
    }

    // -----------------------------------------------------------------
    // CFG assembly
    // -----------------------------------------------------------------

    /// Whether a CFG is being built.
    pub fn in_cfg(&self) -> bool {
        self.cfg.is_some()
    }

    /// Whether a block is currently open for instructions.
    pub fn in_block(&self) -> bool {
        self.cfg.as_ref().is_some_and(|c| c.current.is_some())
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.cfg.as_ref().and_then(|c| c.current)
    }

    /// Begin a new CFG: entry block (made current) plus an exit block with
    /// one phi argument and a preset return of that argument. Returns the
    /// exit block id for use as the outermost continuation.
    pub fn begin_cfg(&mut self) -> BlockId {
        debug_assert!(self.cfg.is_none(), "nested CFG construction");
        let entry = WipBlock::new();
        let mut exit = WipBlock::new();
        let phi = self.new_phi();
        exit.args.push(WipPhi {
            phi,
            values: Vec::new(),
        });
        exit.term = Some(Terminator::Return { value: phi });
        self.cfg = Some(WipCfg {
            blocks: vec![entry, exit],
            current: Some(0),
            exit: 1,
        });
        tracing::trace!("begin cfg");
        1
    }

    fn wip(&mut self) -> &mut WipCfg<'a> {
        self.cfg.as_mut().expect("no CFG under construction")
    }

    /// Create a detached block with `n_args` phi arguments.
    pub fn new_block(&mut self, n_args: usize) -> BlockId {
        let phis: Vec<WipPhi<'a>> = (0..n_args)
            .map(|_| WipPhi {
                phi: self.new_phi(),
                values: Vec::new(),
            })
            .collect();
        let cfg = self.wip();
        let id = cfg.blocks.len() as BlockId;
        let mut block = WipBlock::new();
        block.args = phis;
        cfg.blocks.push(block);
        id
    }

    /// A fresh continuation block: one phi argument.
    pub fn new_continuation(&mut self) -> BlockId {
        self.new_block(1)
    }

    pub fn block_arg_count(&self, id: BlockId) -> usize {
        self.cfg.as_ref().map_or(0, |c| c.blocks[id as usize].args.len())
    }

    /// The `i`-th phi argument of a block.
    pub fn block_arg(&self, id: BlockId, i: usize) -> ExprRef<'a> {
        self.cfg.as_ref().expect("no CFG under construction").blocks[id as usize].args[i].phi
    }

    /// Start filling `id`. Starting the block that is already current is a
    /// no-op; the block must not have been filled before.
    pub fn begin_block(&mut self, id: BlockId) {
        let cfg = self.wip();
        if cfg.current == Some(id) {
            return;
        }
        debug_assert!(cfg.current.is_none(), "previous block still open");
        debug_assert!(
            cfg.blocks[id as usize].instrs.is_empty(),
            "block filled twice"
        );
        tracing::trace!(block = id, "start block");
        cfg.current = Some(id);
    }

    /// Append `e` to the current block unless it is trivial or already
    /// placed. Returns `e`.
    pub fn add_instruction(&mut self, e: ExprRef<'a>) -> ExprRef<'a> {
        if e.is_trivial() || e.in_block() {
            return e;
        }
        let cfg = self.wip();
        let current = cfg.current.expect("no current block");
        cfg.blocks[current as usize].instrs.push(e);
        e.in_block.set(true);
        e
    }

    fn add_predecessor(&mut self, target: BlockId, source: BlockId) -> u32 {
        let block = &mut self.wip().blocks[target as usize];
        block.preds.push(source);
        (block.preds.len() - 1) as u32
    }

    fn finish_block(&mut self, term: Terminator<'a>) {
        let cfg = self.wip();
        let current = cfg.current.expect("no current block to terminate");
        tracing::trace!(block = current, "finish block");
        cfg.blocks[current as usize].term = Some(term);
        cfg.current = None;
    }

    /// Terminate the current block with a goto, passing one value per
    /// target phi argument for this edge.
    pub fn new_goto(&mut self, target: BlockId, values: &[ExprRef<'a>]) {
        let source = self.current_block().expect("no current block");
        let slot = self.add_predecessor(target, source);
        let block = &mut self.wip().blocks[target as usize];
        debug_assert_eq!(
            block.args.len(),
            values.len(),
            "goto value count must match target arguments"
        );
        for (arg, &v) in block.args.iter_mut().zip(values.iter()) {
            arg.values.push(v);
        }
        self.finish_block(Terminator::Goto {
            target,
            phi_slot: slot,
        });
    }

    /// Terminate the current block with a branch to two fresh blocks, each
    /// with the current block as sole predecessor.
    pub fn new_branch(&mut self, cond: ExprRef<'a>) -> (BlockId, BlockId) {
        let then_block = self.new_block(0);
        let else_block = self.new_block(0);
        self.new_branch_to(cond, then_block, else_block);
        (then_block, else_block)
    }

    /// Terminate the current block with a branch to existing blocks.
    pub fn new_branch_to(&mut self, cond: ExprRef<'a>, then_block: BlockId, else_block: BlockId) {
        let source = self.current_block().expect("no current block");
        self.add_predecessor(then_block, source);
        self.add_predecessor(else_block, source);
        self.finish_block(Terminator::Branch {
            cond,
            then_block,
            else_block,
        });
    }

    /// Terminate the current block with a switch.
    pub fn new_switch(&mut self, scrutinee: ExprRef<'a>, cases: &[(ExprRef<'a>, BlockId)]) {
        let source = self.current_block().expect("no current block");
        for &(_, target) in cases {
            self.add_predecessor(target, source);
        }
        let cases = self.arena.alloc_slice_copy(cases);
        self.finish_block(Terminator::Switch { scrutinee, cases });
    }

    /// Terminate the current block with a return.
    pub fn new_return(&mut self, value: ExprRef<'a>) {
        self.finish_block(Terminator::Return { value });
    }

    /// Finish the CFG: verify block structure, compute normal form
    /// (reverse-postorder block ids, dense instruction ids, canonical
    /// predecessor order), and freeze everything into the arena.
    pub fn end_cfg(&mut self) -> Result<&'a Scfg<'a>, CfgError> {
        let cfg = self.cfg.take().expect("no CFG under construction");
        if cfg.current.is_some() {
            return Err(CfgError::OpenBlock);
        }
        let normal = compute_normal_form(self.arena, cfg)?;
        Ok(self.freeze(normal))
    }

    fn freeze(&self, normal: NormalForm<'a>) -> &'a Scfg<'a> {
        let mut blocks: Vec<BasicBlock<'a>> = Vec::with_capacity(normal.blocks.len());
        for (id, wip) in normal.blocks.into_iter().enumerate() {
            let first_instr_id = normal.first_ids[id];
            let args: Vec<PhiArg<'a>> = wip
                .args
                .into_iter()
                .map(|a| PhiArg {
                    phi: a.phi,
                    values: self.arena.alloc_slice_copy(&a.values),
                })
                .collect();
            blocks.push(BasicBlock {
                id: id as BlockId,
                args: self.arena.alloc_slice_copy(&args),
                instrs: self.arena.alloc_slice_copy(&wip.instrs),
                term: wip.term.expect("normal form verified terminators"),
                preds: self.arena.alloc_slice_copy(&wip.preds),
                first_instr_id,
            });
        }
        self.arena.alloc(Scfg {
            blocks: self.arena.alloc_slice_copy(&blocks),
            entry: super::cfg::ENTRY_BLOCK,
            exit: normal.exit,
            num_instrs: normal.num_instrs,
        })
    }
}

struct NormalForm<'a> {
    blocks: Vec<WipBlock<'a>>,
    first_ids: Vec<u32>,
    exit: BlockId,
    num_instrs: u32,
}

/// Renumber blocks in reverse-postorder from the entry, drop unreachable
/// blocks, canonicalize predecessor order, and assign dense instruction
/// ids. Idempotent: running it on an already-normal CFG changes nothing,
/// which is what lets a decoded CFG reproduce its encoded ids.
fn compute_normal_form<'a>(arena: &'a Bump, cfg: WipCfg<'a>) -> Result<NormalForm<'a>, CfgError> {
    let n = cfg.blocks.len();

    for (i, b) in cfg.blocks.iter().enumerate() {
        if b.term.is_none() {
            return Err(CfgError::MissingTerminator {
                block: i as BlockId,
            });
        }
    }

    // Iterative DFS from the entry; post-order reversed gives the new ids.
    let mut postorder: Vec<usize> = Vec::with_capacity(n);
    let mut visited = vec![false; n];
    let mut succs_buf = Vec::new();
    // (block, next successor index)
    let mut stack: Vec<(usize, usize)> = vec![(0, 0)];
    visited[0] = true;
    let mut successors: Vec<Vec<usize>> = Vec::with_capacity(n);
    for b in &cfg.blocks {
        b.term.as_ref().unwrap().successors(&mut succs_buf);
        successors.push(succs_buf.iter().map(|&id| id as usize).collect());
    }
    while let Some(&mut (block, ref mut next)) = stack.last_mut() {
        if *next < successors[block].len() {
            let s = successors[block][*next];
            *next += 1;
            if !visited[s] {
                visited[s] = true;
                stack.push((s, 0));
            }
        } else {
            postorder.push(block);
            stack.pop();
        }
    }

    if !visited[cfg.exit as usize] {
        return Err(CfgError::UnreachableExit);
    }

    // old index -> new id, for reachable blocks.
    let mut new_id = vec![usize::MAX; n];
    let order: Vec<usize> = postorder.into_iter().rev().collect();
    for (new, &old) in order.iter().enumerate() {
        new_id[old] = new;
    }

    // Rebuild in the new order with remapped edges.
    let mut blocks: Vec<WipBlock<'_>> = Vec::with_capacity(order.len());
    let mut old_blocks: Vec<Option<WipBlock<'_>>> = cfg.blocks.into_iter().map(Some).collect();
    for &old in &order {
        let mut b = old_blocks[old].take().unwrap();
        remap_terminator(arena, b.term.as_mut().unwrap(), &new_id);

        // Keep only edges from reachable predecessors, then sort into
        // canonical ascending order, carrying phi values through the same
        // permutation.
        let mut edges: Vec<(BlockId, usize)> = b
            .preds
            .iter()
            .enumerate()
            .filter(|(_, &p)| new_id[p as usize] != usize::MAX)
            .map(|(slot, &p)| (new_id[p as usize] as BlockId, slot))
            .collect();
        edges.sort_by_key(|&(p, _)| p);
        for arg in &mut b.args {
            if arg.values.len() != b.preds.len() {
                return Err(CfgError::PhiMismatch {
                    block: new_id[old] as BlockId,
                    values: arg.values.len(),
                    preds: b.preds.len(),
                });
            }
            arg.values = edges.iter().map(|&(_, slot)| arg.values[slot]).collect();
        }
        b.preds = edges.iter().map(|&(p, _)| p).collect();
        if new_id[old] != 0 && b.preds.is_empty() {
            return Err(CfgError::NoPredecessors {
                block: new_id[old] as BlockId,
            });
        }
        blocks.push(b);
    }

    // Goto slot indices follow the canonical predecessor order.
    for id in 0..blocks.len() {
        for slot in 0..blocks[id].preds.len() {
            let p = blocks[id].preds[slot] as usize;
            if let Some(Terminator::Goto { target, phi_slot }) = blocks[p].term.as_mut() {
                if *target == id as BlockId {
                    *phi_slot = slot as u32;
                }
            }
        }
    }

    // Dense, block-contiguous instruction numbering: arguments first.
    let mut first_ids = Vec::with_capacity(blocks.len());
    let mut next = 0u32;
    for b in &blocks {
        first_ids.push(next);
        for arg in &b.args {
            arg.phi.instr_id.set(next);
            next += 1;
        }
        for instr in &b.instrs {
            instr.instr_id.set(next);
            next += 1;
        }
    }

    Ok(NormalForm {
        blocks,
        first_ids,
        exit: new_id[cfg.exit as usize] as BlockId,
        num_instrs: next,
    })
}

fn remap_terminator<'a>(arena: &'a Bump, term: &mut Terminator<'a>, new_id: &[usize]) {
    match term {
        Terminator::Goto { target, .. } => *target = new_id[*target as usize] as BlockId,
        Terminator::Branch {
            then_block,
            else_block,
            ..
        } => {
            *then_block = new_id[*then_block as usize] as BlockId;
            *else_block = new_id[*else_block as usize] as BlockId;
        }
        Terminator::Switch { cases, .. } => {
            // Case slices are immutable arena data; remap into a fresh
            // slice. Already-canonical ids map to themselves, so this
            // stays idempotent.
            let remapped: Vec<(ExprRef<'a>, BlockId)> = cases
                .iter()
                .map(|&(v, b)| (v, new_id[b as usize] as BlockId))
                .collect();
            *cases = arena.alloc_slice_copy(&remapped);
        }
        Terminator::Return { .. } => {}
    }
}
