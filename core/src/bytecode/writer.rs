//! Post-order serialization of TIL expressions and CFGs.
//!
//! Children are emitted before parents; operands that are numbered
//! instructions (or phi arguments) of the enclosing CFG are emitted as
//! weak references instead of being re-serialized. Variable scopes are
//! bracketed with `EnterScope`/`ExitScope` so the reader can index
//! declarations exactly as the writer did.

use crate::til::{ExprKind, ExprRef, Literal, Scfg, Terminator};

use super::opcode::{Opcode, PseudoOp};
use super::stream::{ByteSink, CodecOptions, StreamWriter};

pub struct BytecodeWriter<S: ByteSink> {
    stream: StreamWriter<S>,
    /// Number of enclosing variable scopes; doubles as the next
    /// declaration's de Bruijn level.
    scope_depth: u32,
}

impl<S: ByteSink> BytecodeWriter<S> {
    pub fn new(sink: S) -> Self {
        BytecodeWriter {
            stream: StreamWriter::new(sink),
            scope_depth: 0,
        }
    }

    pub fn with_options(sink: S, options: &CodecOptions) -> Self {
        BytecodeWriter {
            stream: StreamWriter::with_options(sink, options),
            scope_depth: 0,
        }
    }

    /// Serialize one expression tree (or CFG wrapper).
    pub fn write(&mut self, e: ExprRef<'_>) {
        self.write_expr(e, true);
    }

    /// Serialize a CFG directly.
    pub fn write_cfg(&mut self, cfg: &Scfg<'_>) {
        self.emit_cfg(cfg);
    }

    /// Flush buffered bytes and return the sink.
    pub fn finish(self) -> S {
        self.stream.finish()
    }

    fn pseudo(&mut self, op: PseudoOp) {
        self.stream.write_u8(op.tag());
    }

    fn opcode(&mut self, op: Opcode) {
        self.stream.write_u8(op.tag());
    }

    fn end_atom(&mut self) {
        self.stream.end_atom();
    }

    /// Emit `e`; `strong` is true when this node itself is being defined
    /// (a block instruction or a tree root), false in operand position
    /// where numbered nodes become weak references.
    fn write_expr(&mut self, e: ExprRef<'_>, strong: bool) {
        if !strong {
            if let Some(id) = e.instr_id() {
                self.pseudo(PseudoOp::WeakInstrRef);
                self.stream.write_u32(id);
                self.end_atom();
                return;
            }
        }

        match &e.kind {
            ExprKind::Literal(lit) => {
                self.opcode(Opcode::Literal);
                self.stream.write_u8(lit.base_type().code());
                match *lit {
                    Literal::Void => {}
                    Literal::Bool(v) => self.stream.write_u8(v as u8),
                    Literal::I32(v) => self.stream.write_u32_vbr(v as u32),
                    Literal::I64(v) => self.stream.write_u64_vbr(v as u64),
                    Literal::U32(v) => self.stream.write_u32_vbr(v),
                    Literal::U64(v) => self.stream.write_u64_vbr(v),
                    Literal::F32(v) => self.stream.write_f32(v),
                    Literal::F64(v) => self.stream.write_f64(v),
                    Literal::Str(s) => self.stream.write_str(s),
                }
            }

            ExprKind::Variable(decl) => {
                let index = match &decl.kind {
                    ExprKind::VarDecl { var_index, .. } => var_index.get(),
                    _ => u32::MAX,
                };
                self.opcode(Opcode::Variable);
                self.stream.write_u32(index);
            }

            ExprKind::VarDecl {
                kind,
                name,
                defn,
                var_index,
            } => {
                self.write_opt(*defn);
                self.opcode(Opcode::VarDecl);
                self.stream.write_u8(kind.code());
                self.stream.write_u32(var_index.get());
                self.stream.write_str(name);
            }

            ExprKind::Function { param, body } => {
                self.write_scoped(*param, *body, Opcode::Function);
                return;
            }

            ExprKind::Let { var_decl, body } => {
                self.write_scoped(*var_decl, *body, Opcode::Let);
                return;
            }

            ExprKind::Code {
                return_type,
                body,
                cconv,
            } => {
                self.write_opt(*return_type);
                self.write_opt(*body);
                self.opcode(Opcode::Code);
                self.stream.write_u8(cconv.code());
            }

            ExprKind::Field { range, body } => {
                self.write_opt(*range);
                self.write_opt(*body);
                self.opcode(Opcode::Field);
            }

            ExprKind::Slot {
                name,
                modifiers,
                body,
            } => {
                self.write_expr(body, false);
                self.opcode(Opcode::Slot);
                self.stream.write_u16(*modifiers);
                self.stream.write_str(name);
            }

            ExprKind::Record { slots, parent } => {
                self.write_opt(*parent);
                for slot in slots.iter() {
                    self.write_expr(slot, false);
                }
                self.opcode(Opcode::Record);
                self.stream.write_u32(slots.len() as u32);
            }

            ExprKind::Array {
                elem_type,
                size,
                elements,
            } => {
                self.write_opt(*elem_type);
                self.write_opt(*size);
                for elem in elements.iter() {
                    self.write_expr(elem, false);
                }
                self.opcode(Opcode::Array);
                self.stream.write_u64(elements.len() as u64);
            }

            ExprKind::ScalarType(bt) => {
                self.opcode(Opcode::ScalarType);
                self.stream.write_u8(bt.code());
            }

            ExprKind::Apply { func, arg, kind } => {
                self.write_expr(func, false);
                self.write_opt(*arg);
                self.opcode(Opcode::Apply);
                self.stream.write_u8(kind.code());
            }

            ExprKind::Project { base, slot_name } => {
                self.write_expr(base, false);
                self.opcode(Opcode::Project);
                self.stream.write_str(slot_name);
            }

            ExprKind::Call {
                target,
                result_type,
            } => {
                self.write_expr(target, false);
                self.opcode(Opcode::Call);
                self.stream.write_u8(result_type.code());
            }

            ExprKind::Alloc { init, kind } => {
                self.write_expr(init, false);
                self.opcode(Opcode::Alloc);
                self.stream.write_u8(kind.code());
            }

            ExprKind::Load {
                pointer,
                result_type,
            } => {
                self.write_expr(pointer, false);
                self.opcode(Opcode::Load);
                self.stream.write_u8(result_type.code());
            }

            ExprKind::Store { dest, value } => {
                self.write_expr(dest, false);
                self.write_expr(value, false);
                self.opcode(Opcode::Store);
            }

            ExprKind::ArrayIndex { array, index } => {
                self.write_expr(array, false);
                self.write_expr(index, false);
                self.opcode(Opcode::ArrayIndex);
            }

            ExprKind::ArrayAdd { array, index } => {
                self.write_expr(array, false);
                self.write_expr(index, false);
                self.opcode(Opcode::ArrayAdd);
            }

            ExprKind::UnaryOp {
                op,
                operand_type,
                operand,
            } => {
                self.write_expr(operand, false);
                self.opcode(Opcode::UnaryOp);
                self.stream.write_u8(op.code());
                self.stream.write_u8(operand_type.code());
            }

            ExprKind::BinaryOp {
                op,
                operand_type,
                lhs,
                rhs,
            } => {
                self.write_expr(lhs, false);
                self.write_expr(rhs, false);
                self.opcode(Opcode::BinaryOp);
                self.stream.write_u8(op.code());
                self.stream.write_u8(operand_type.code());
            }

            ExprKind::Cast {
                op,
                target_type,
                operand,
            } => {
                self.write_expr(operand, false);
                self.opcode(Opcode::Cast);
                self.stream.write_u8(op.code());
                self.stream.write_u8(target_type.code());
            }

            // Every phi is serialized in block-argument position; the
            // reader resolves it against the open block.
            ExprKind::Phi => {
                self.opcode(Opcode::Phi);
            }

            ExprKind::Identifier(name) => {
                self.opcode(Opcode::Identifier);
                self.stream.write_str(name);
            }

            ExprKind::IfThenElse {
                cond,
                then_expr,
                else_expr,
            } => {
                self.write_expr(cond, false);
                self.write_expr(then_expr, false);
                self.write_expr(else_expr, false);
                self.opcode(Opcode::IfThenElse);
            }

            ExprKind::Undefined => self.opcode(Opcode::Undefined),
            ExprKind::Wildcard => self.opcode(Opcode::Wildcard),

            ExprKind::Cfg(cfg) => {
                self.emit_cfg(cfg);
                return;
            }
        }
        self.end_atom();
    }

    /// A child slot that may be absent.
    fn write_opt(&mut self, e: Option<ExprRef<'_>>) {
        match e {
            Some(e) => self.write_expr(e, false),
            None => {
                self.pseudo(PseudoOp::Null);
                self.end_atom();
            }
        }
    }

    /// `Function` and `Let` bracket their declaration's body in a
    /// variable scope. The declaration's index is stamped with the
    /// current depth so the reader's scope tracking reproduces it.
    fn write_scoped(&mut self, decl: ExprRef<'_>, body: ExprRef<'_>, op: Opcode) {
        if let ExprKind::VarDecl { var_index, .. } = &decl.kind {
            var_index.set(self.scope_depth);
        }
        self.write_expr(decl, false);
        self.pseudo(PseudoOp::EnterScope);
        self.end_atom();
        self.scope_depth += 1;

        self.write_expr(body, false);

        self.opcode(op);
        self.end_atom();
        self.scope_depth -= 1;
        self.pseudo(PseudoOp::ExitScope);
        self.end_atom();
    }

    fn emit_cfg(&mut self, cfg: &Scfg<'_>) {
        self.pseudo(PseudoOp::EnterCfg);
        self.stream.write_u32(cfg.num_blocks() as u32);
        self.stream.write_u32(cfg.num_instrs);
        self.stream.write_u32(cfg.entry);
        self.stream.write_u32(cfg.exit);
        self.end_atom();

        for block in cfg.blocks {
            self.pseudo(PseudoOp::EnterBlock);
            self.stream.write_u32(block.id);
            self.stream.write_u32(block.first_instr_id);
            self.stream.write_u32(block.args.len() as u32);
            self.end_atom();

            for arg in block.args {
                self.write_expr(arg.phi, true);
                self.pseudo(PseudoOp::BbArgument);
                self.end_atom();
            }

            for instr in block.instrs {
                self.write_expr(instr, true);
                self.pseudo(PseudoOp::BbInstruction);
                self.end_atom();
            }

            match &block.term {
                Terminator::Goto { target, phi_slot } => {
                    let target_block = cfg.block(*target);
                    for arg in target_block.args {
                        self.write_expr(arg.values[*phi_slot as usize], false);
                    }
                    self.opcode(Opcode::Goto);
                    self.stream.write_u32(target_block.args.len() as u32);
                    self.stream.write_u32(*target);
                }
                Terminator::Branch {
                    cond,
                    then_block,
                    else_block,
                } => {
                    self.write_expr(cond, false);
                    self.opcode(Opcode::Branch);
                    self.stream.write_u32(*then_block);
                    self.stream.write_u32(*else_block);
                }
                Terminator::Switch { scrutinee, cases } => {
                    self.write_expr(scrutinee, false);
                    for (value, _) in cases.iter() {
                        self.write_expr(value, false);
                    }
                    self.opcode(Opcode::Switch);
                    self.stream.write_u32(cases.len() as u32);
                    for (_, target) in cases.iter() {
                        self.stream.write_u32(*target);
                    }
                }
                Terminator::Return { value } => {
                    self.write_expr(value, false);
                    self.opcode(Opcode::Return);
                }
            }
            self.end_atom();

            self.opcode(Opcode::BasicBlock);
            self.end_atom();
        }

        self.opcode(Opcode::Scfg);
        self.end_atom();
    }
}
