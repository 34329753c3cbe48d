//! Decoding a bytecode stream back into TIL through the builder.
//!
//! The reader drives a [`Builder`]: expression atoms pop their already-
//! decoded children from a reconstruction stack and push the rebuilt
//! node; CFG framing atoms create blocks (lazily, for forward
//! references) and replay instructions into them. All failures set a
//! sticky error; the first message wins and `read` returns `None`.

use bumpalo::Bump;

use crate::til::{
    AllocKind, ApplyKind, BaseType, BinaryOpcode, BlockId, Builder, CallingConvention, CastOpcode,
    ExprKind, ExprRef, Literal, UnaryOpcode, VarKind,
};

use super::opcode::{Opcode, PseudoOp, Tag};
use super::stream::{ByteSource, CodecOptions, StreamReader};

pub struct BytecodeReader<'a, R: ByteSource> {
    stream: StreamReader<R>,
    builder: Builder<'a>,
    stack: Vec<Option<ExprRef<'a>>>,
    /// Declarations indexed by scope depth (`EnterScope` order).
    vars: Vec<ExprRef<'a>>,
    /// Stream block id -> builder block, stubbed on first reference.
    blocks: Vec<Option<BlockId>>,
    /// Which stream block ids have had their body read.
    entered: Vec<bool>,
    /// Instruction table, pre-sized from the CFG header.
    instrs: Vec<Option<ExprRef<'a>>>,
    next_instr_id: usize,
    current_arg: usize,
    cfg_stack_size: usize,
    in_cfg: bool,
    error: Option<String>,
}

impl<'a, R: ByteSource> BytecodeReader<'a, R> {
    pub fn new(source: R, arena: &'a Bump) -> Self {
        Self::with_options(source, arena, &CodecOptions::default())
    }

    pub fn with_options(source: R, arena: &'a Bump, options: &CodecOptions) -> Self {
        BytecodeReader {
            stream: StreamReader::with_options(source, options),
            builder: Builder::new(arena),
            stack: Vec::new(),
            vars: Vec::new(),
            blocks: Vec::new(),
            entered: Vec::new(),
            instrs: Vec::new(),
            next_instr_id: 0,
            current_arg: 0,
            cfg_stack_size: 0,
            in_cfg: false,
            error: None,
        }
    }

    /// The first failure, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    /// Decode the whole stream. Returns the single reconstructed value,
    /// or `None` on any failure (including leftover or missing values).
    pub fn read(&mut self) -> Option<ExprRef<'a>> {
        while !self.stream.empty() && self.error.is_none() {
            self.read_atom();
            if self.stream.error() {
                self.fail("unexpected end of stream");
            }
        }
        if self.error.is_some() {
            return None;
        }
        if self.in_cfg {
            self.fail("unterminated CFG");
            return None;
        }
        match self.stack.len() {
            0 => {
                self.fail("empty stack at end of stream");
                None
            }
            1 => self.stack[0],
            _ => {
                self.fail("too many values on stack");
                None
            }
        }
    }

    fn fail(&mut self, message: &str) {
        if self.error.is_none() {
            tracing::debug!(message, "bytecode read failed");
            self.error = Some(message.to_string());
        }
        self.stream.set_error();
    }

    // -----------------------------------------------------------------
    // Reconstruction stack
    // -----------------------------------------------------------------

    /// The value `i` slots below the top; `None` only after a failure.
    fn slot(&mut self, i: usize) -> Option<Option<ExprRef<'a>>> {
        if i >= self.stack.len() {
            self.fail("reconstruction stack underflow");
            return None;
        }
        let idx = self.stack.len() - 1 - i;
        Some(self.stack[idx])
    }

    /// A slot that must hold a value.
    fn req(&mut self, i: usize) -> Option<ExprRef<'a>> {
        match self.slot(i)? {
            Some(e) => Some(e),
            None => {
                self.fail("unexpected null value");
                None
            }
        }
    }

    fn drop_n(&mut self, n: usize) {
        if n > self.stack.len() {
            self.fail("reconstruction stack underflow");
            self.stack.clear();
        } else {
            self.stack.truncate(self.stack.len() - n);
        }
    }

    fn push(&mut self, e: Option<ExprRef<'a>>) {
        self.stack.push(e);
    }

    // -----------------------------------------------------------------
    // Atom dispatch
    // -----------------------------------------------------------------

    fn read_atom(&mut self) {
        let byte = self.stream.read_u8();
        if self.stream.error() {
            return;
        }
        match Tag::from_byte(byte) {
            None => self.fail("invalid opcode"),
            Some(Tag::Pseudo(p)) => self.read_pseudo(p),
            Some(Tag::Op(op)) => self.read_op(op),
        }
        self.stream.end_atom();
    }

    fn read_pseudo(&mut self, op: PseudoOp) {
        match op {
            PseudoOp::Null => self.push(None),
            PseudoOp::WeakInstrRef => self.read_weak(),
            PseudoOp::BbArgument => self.read_bb_argument(),
            PseudoOp::BbInstruction => self.read_bb_instruction(),
            PseudoOp::EnterScope => self.enter_scope(),
            PseudoOp::ExitScope => self.exit_scope(),
            PseudoOp::EnterBlock => self.enter_block(),
            PseudoOp::EnterCfg => self.enter_cfg(),
            PseudoOp::Annotation => self.fail("unexpected annotation"),
        }
    }

    fn read_op(&mut self, op: Opcode) {
        match op {
            Opcode::VarDecl => self.read_var_decl(),
            Opcode::Function => self.read_function(),
            Opcode::Code => self.read_code(),
            Opcode::Field => self.read_field(),
            Opcode::Slot => self.read_slot(),
            Opcode::Record => self.read_record(),
            Opcode::Array => self.read_array(),
            Opcode::ScalarType => self.read_scalar_type(),
            Opcode::Literal => self.read_literal(),
            Opcode::Variable => self.read_variable(),
            Opcode::Apply => self.read_apply(),
            Opcode::Project => self.read_project(),
            Opcode::Call => self.read_call(),
            Opcode::Alloc => self.read_alloc(),
            Opcode::Load => self.read_load(),
            Opcode::Store => self.read_store(),
            Opcode::ArrayIndex => self.read_array_index(),
            Opcode::ArrayAdd => self.read_array_add(),
            Opcode::UnaryOp => self.read_unary_op(),
            Opcode::BinaryOp => self.read_binary_op(),
            Opcode::Cast => self.read_cast(),
            Opcode::Phi => self.read_phi(),
            Opcode::Goto => self.read_goto(),
            Opcode::Branch => self.read_branch(),
            Opcode::Switch => self.read_switch(),
            Opcode::Return => self.read_return(),
            Opcode::Undefined => {
                let e = self.builder.new_undefined();
                self.push(Some(e));
            }
            Opcode::Wildcard => {
                let e = self.builder.new_wildcard();
                self.push(Some(e));
            }
            Opcode::Identifier => self.read_identifier(),
            Opcode::Let => self.read_let(),
            Opcode::IfThenElse => self.read_if_then_else(),
            Opcode::BasicBlock => self.read_basic_block(),
            Opcode::Scfg => self.read_scfg(),
        }
    }

    // -----------------------------------------------------------------
    // CFG framing
    // -----------------------------------------------------------------

    fn enter_cfg(&mut self) {
        if self.in_cfg {
            self.fail("nested CFG");
            return;
        }
        let num_blocks = self.stream.read_u32() as usize;
        let num_instrs = self.stream.read_u32() as usize;
        let entry_id = self.stream.read_u32() as usize;
        let exit_id = self.stream.read_u32() as usize;
        if entry_id >= num_blocks || exit_id >= num_blocks {
            self.fail("invalid block ID");
            return;
        }
        let exit = self.builder.begin_cfg();
        self.in_cfg = true;
        self.blocks = vec![None; num_blocks];
        self.entered = vec![false; num_blocks];
        self.instrs = vec![None; num_instrs];
        self.blocks[entry_id] = Some(crate::til::ENTRY_BLOCK);
        self.blocks[exit_id] = Some(exit);
        self.cfg_stack_size = self.stack.len();
    }

    /// Resolve a stream block id, lazily creating a stub for forward
    /// references and verifying the argument count of known blocks.
    fn get_block(&mut self, id: u32, n_args: usize) -> Option<BlockId> {
        if !self.in_cfg {
            self.fail("block reference outside a CFG");
            return None;
        }
        let idx = id as usize;
        if idx >= self.blocks.len() {
            self.fail("invalid block ID");
            return None;
        }
        match self.blocks[idx] {
            Some(block) => {
                if self.builder.block_arg_count(block) != n_args {
                    self.fail("block has wrong number of arguments");
                    return None;
                }
                Some(block)
            }
            None => {
                let block = self.builder.new_block(n_args);
                self.blocks[idx] = Some(block);
                Some(block)
            }
        }
    }

    fn enter_block(&mut self) {
        let id = self.stream.read_u32();
        let first_instr_id = self.stream.read_u32() as usize;
        let n_args = self.stream.read_u32() as usize;
        if !self.in_cfg {
            self.fail("block outside a CFG");
            return;
        }
        if self.stack.len() != self.cfg_stack_size {
            self.fail("corrupted stack at block start");
            return;
        }
        if (id as usize) < self.entered.len() && self.entered[id as usize] {
            self.fail("block defined twice");
            return;
        }
        let Some(block) = self.get_block(id, n_args) else {
            return;
        };
        if self.builder.in_block() && self.builder.current_block() != Some(block) {
            self.fail("previous block not closed");
            return;
        }
        self.entered[id as usize] = true;
        self.builder.begin_block(block);

        // Phi arguments occupy the first instruction ids of the block.
        if first_instr_id + n_args > self.instrs.len() {
            self.fail("invalid instruction ID");
            return;
        }
        self.next_instr_id = first_instr_id;
        for i in 0..n_args {
            self.instrs[self.next_instr_id] = Some(self.builder.block_arg(block, i));
            self.next_instr_id += 1;
        }
        self.current_arg = 0;
    }

    fn read_basic_block(&mut self) {
        if !self.in_cfg {
            self.fail("block end outside a CFG");
            return;
        }
        if self.stack.len() != self.cfg_stack_size {
            self.fail("corrupted stack at block end");
            return;
        }
        // A terminator atom closes the open block; reaching the block
        // end with it still open means the terminator was missing.
        if self.builder.in_block() {
            self.fail("basic block has no terminator");
        }
    }

    fn read_scfg(&mut self) {
        if !self.in_cfg {
            self.fail("CFG end without CFG start");
            return;
        }
        if self.stack.len() != self.cfg_stack_size {
            self.fail("corrupted stack at CFG end");
            return;
        }
        if self.entered.iter().any(|&e| !e) {
            self.fail("failed to read all blocks");
            return;
        }
        // Normal form is deterministic and idempotent, so rebuilding
        // reproduces the ids the writer serialized.
        match self.builder.end_cfg() {
            Ok(cfg) => {
                self.in_cfg = false;
                self.blocks.clear();
                self.entered.clear();
                self.instrs.clear();
                let e = self.builder.new_cfg(cfg);
                self.push(Some(e));
            }
            Err(err) => self.fail(&err.to_string()),
        }
    }

    fn read_weak(&mut self) {
        let id = self.stream.read_u32() as usize;
        match self.instrs.get(id).copied().flatten() {
            Some(e) => self.push(Some(e)),
            None => self.fail("invalid instruction ID"),
        }
    }

    fn read_bb_argument(&mut self) {
        // The argument itself was created with its block; the phi atom
        // pushed it, so just account for it and drop the copy.
        self.current_arg += 1;
        if self.stack.len() <= self.cfg_stack_size {
            self.fail("corrupted stack at block argument");
            return;
        }
        self.drop_n(1);
    }

    fn read_bb_instruction(&mut self) {
        if self.stack.len() <= self.cfg_stack_size {
            self.fail("corrupted stack at instruction");
            return;
        }
        let Some(top) = self.slot(0) else { return };
        let Some(instr) = top else {
            self.fail("expected instruction");
            return;
        };
        if self.next_instr_id >= self.instrs.len() {
            self.fail("invalid instruction ID");
            return;
        }
        self.instrs[self.next_instr_id] = Some(instr);
        self.next_instr_id += 1;
        self.drop_n(1);
    }

    fn read_phi(&mut self) {
        // Phi atoms are only valid in block-argument position, where the
        // argument already exists on the block being read.
        let current = self.builder.current_block();
        match current {
            Some(block) if self.current_arg < self.builder.block_arg_count(block) => {
                let phi = self.builder.block_arg(block, self.current_arg);
                self.push(Some(phi));
            }
            _ => self.fail("phi outside a block argument position"),
        }
    }

    fn read_goto(&mut self) {
        let n_args = self.stream.read_u32() as usize;
        let target_id = self.stream.read_u32();
        let Some(target) = self.get_block(target_id, n_args) else {
            return;
        };
        if self.stack.len() < self.cfg_stack_size + n_args {
            self.fail("corrupted stack at goto");
            return;
        }
        let mut values = Vec::with_capacity(n_args);
        for i in (0..n_args).rev() {
            match self.req(i) {
                Some(v) => values.push(v),
                None => return,
            }
        }
        if !self.builder.in_block() {
            self.fail("terminator outside a block");
            return;
        }
        self.builder.new_goto(target, &values);
        self.drop_n(n_args);
    }

    fn read_branch(&mut self) {
        let then_id = self.stream.read_u32();
        let else_id = self.stream.read_u32();
        let Some(then_block) = self.get_block(then_id, 0) else {
            return;
        };
        let Some(else_block) = self.get_block(else_id, 0) else {
            return;
        };
        let Some(cond) = self.req(0) else { return };
        if !self.builder.in_block() {
            self.fail("terminator outside a block");
            return;
        }
        self.builder.new_branch_to(cond, then_block, else_block);
        self.drop_n(1);
    }

    fn read_switch(&mut self) {
        let n_cases = self.stream.read_u32() as usize;
        let Some(scrutinee) = self.req(n_cases) else {
            return;
        };
        let mut cases = Vec::with_capacity(n_cases);
        for i in 0..n_cases {
            let target_id = self.stream.read_u32();
            let Some(block) = self.get_block(target_id, 0) else {
                return;
            };
            let Some(value) = self.req(n_cases - 1 - i) else {
                return;
            };
            cases.push((value, block));
        }
        if !self.builder.in_block() {
            self.fail("terminator outside a block");
            return;
        }
        self.builder.new_switch(scrutinee, &cases);
        self.drop_n(n_cases + 1);
    }

    fn read_return(&mut self) {
        let Some(value) = self.req(0) else { return };
        if !self.builder.in_block() {
            self.fail("terminator outside a block");
            return;
        }
        self.builder.new_return(value);
        self.drop_n(1);
    }

    // -----------------------------------------------------------------
    // Scopes and variables
    // -----------------------------------------------------------------

    fn enter_scope(&mut self) {
        let Some(top) = self.slot(0) else { return };
        let Some(decl) = top else {
            self.fail("invalid variable declaration");
            return;
        };
        match &decl.kind {
            ExprKind::VarDecl { var_index, .. } if var_index.get() as usize == self.vars.len() => {
                self.vars.push(decl);
            }
            _ => self.fail("invalid variable declaration"),
        }
    }

    fn exit_scope(&mut self) {
        if self.vars.pop().is_none() {
            self.fail("scope underflow");
        }
    }

    fn read_variable(&mut self) {
        let index = self.stream.read_u32() as usize;
        match self.vars.get(index).copied() {
            Some(decl) => {
                let e = self.builder.new_variable(decl);
                self.push(Some(e));
            }
            None => self.fail("invalid variable ID"),
        }
    }

    fn read_var_decl(&mut self) {
        let Some(kind) = VarKind::from_code(self.stream.read_u8()) else {
            self.fail("invalid variable kind");
            return;
        };
        let index = self.stream.read_u32();
        let name = self.stream.read_str(self.builder.arena());
        let Some(defn) = self.slot(0) else { return };
        let e = self.builder.new_var_decl(kind, name, defn);
        if let ExprKind::VarDecl { var_index, .. } = &e.kind {
            var_index.set(index);
        }
        self.drop_n(1);
        self.push(Some(e));
    }

    // -----------------------------------------------------------------
    // Expression atoms
    // -----------------------------------------------------------------

    fn read_literal(&mut self) {
        let Some(base) = BaseType::from_code(self.stream.read_u8()) else {
            self.fail("invalid base type");
            return;
        };
        let lit = match base {
            BaseType::Void => Literal::Void,
            BaseType::Bool => Literal::Bool(self.stream.read_u8() != 0),
            BaseType::I32 => Literal::I32(self.stream.read_u32_vbr() as i32),
            BaseType::I64 => Literal::I64(self.stream.read_u64_vbr() as i64),
            BaseType::U32 => Literal::U32(self.stream.read_u32_vbr()),
            BaseType::U64 => Literal::U64(self.stream.read_u64_vbr()),
            BaseType::F32 => Literal::F32(self.stream.read_f32()),
            BaseType::F64 => Literal::F64(self.stream.read_f64()),
            BaseType::Str => Literal::Str(self.stream.read_str(self.builder.arena())),
        };
        let e = self.builder.new_literal(lit);
        self.push(Some(e));
    }

    fn read_scalar_type(&mut self) {
        let Some(base) = BaseType::from_code(self.stream.read_u8()) else {
            self.fail("invalid base type");
            return;
        };
        let e = self.builder.new_scalar_type(base);
        self.push(Some(e));
    }

    fn read_identifier(&mut self) {
        let name = self.stream.read_str(self.builder.arena());
        let e = self.builder.new_identifier(name);
        self.push(Some(e));
    }

    fn read_function(&mut self) {
        let Some(body) = self.req(0) else { return };
        let Some(param) = self.req(1) else { return };
        if !matches!(param.kind, ExprKind::VarDecl { .. }) {
            self.fail("expected variable declaration");
            return;
        }
        let e = self.builder.new_function(param, body);
        self.drop_n(2);
        self.push(Some(e));
    }

    fn read_let(&mut self) {
        let Some(body) = self.req(0) else { return };
        let Some(decl) = self.req(1) else { return };
        if !matches!(decl.kind, ExprKind::VarDecl { .. }) {
            self.fail("expected variable declaration");
            return;
        }
        let e = self.builder.new_let(decl, body);
        self.drop_n(2);
        self.push(Some(e));
    }

    fn read_code(&mut self) {
        let Some(cconv) = CallingConvention::from_code(self.stream.read_u8()) else {
            self.fail("invalid calling convention");
            return;
        };
        let Some(body) = self.slot(0) else { return };
        let Some(return_type) = self.slot(1) else { return };
        let e = self.builder.new_code(return_type, body, cconv);
        self.drop_n(2);
        self.push(Some(e));
    }

    fn read_field(&mut self) {
        let Some(body) = self.slot(0) else { return };
        let Some(range) = self.slot(1) else { return };
        let e = self.builder.new_field(range, body);
        self.drop_n(2);
        self.push(Some(e));
    }

    fn read_slot(&mut self) {
        let modifiers = self.stream.read_u16();
        let name = self.stream.read_str(self.builder.arena());
        let Some(body) = self.req(0) else { return };
        let e = self.builder.new_slot(name, modifiers, body);
        self.drop_n(1);
        self.push(Some(e));
    }

    fn read_record(&mut self) {
        let n_slots = self.stream.read_u32() as usize;
        if self.stack.len() < n_slots + 1 {
            self.fail("reconstruction stack underflow");
            return;
        }
        let Some(parent) = self.slot(n_slots) else { return };
        let mut slots = Vec::with_capacity(n_slots);
        for i in (0..n_slots).rev() {
            match self.req(i) {
                Some(s) => slots.push(s),
                None => return,
            }
        }
        let e = self.builder.new_record(&slots, parent);
        self.drop_n(n_slots + 1);
        self.push(Some(e));
    }

    fn read_array(&mut self) {
        let n_elems = self.stream.read_u64() as usize;
        if self.stack.len() < n_elems + 2 {
            self.fail("reconstruction stack underflow");
            return;
        }
        let Some(elem_type) = self.slot(n_elems + 1) else {
            return;
        };
        let Some(size) = self.slot(n_elems) else { return };
        let mut elements = Vec::with_capacity(n_elems);
        for i in (0..n_elems).rev() {
            match self.req(i) {
                Some(x) => elements.push(x),
                None => return,
            }
        }
        let e = self.builder.new_array(elem_type, size, &elements);
        self.drop_n(n_elems + 2);
        self.push(Some(e));
    }

    fn read_apply(&mut self) {
        let Some(kind) = ApplyKind::from_code(self.stream.read_u8()) else {
            self.fail("invalid apply kind");
            return;
        };
        let Some(arg) = self.slot(0) else { return };
        let Some(func) = self.req(1) else { return };
        let e = self.builder.new_apply(func, arg, kind);
        self.drop_n(2);
        self.push(Some(e));
    }

    fn read_project(&mut self) {
        let name = self.stream.read_str(self.builder.arena());
        let Some(base) = self.req(0) else { return };
        let e = self.builder.new_project(base, name);
        self.drop_n(1);
        self.push(Some(e));
    }

    fn read_call(&mut self) {
        let Some(base) = BaseType::from_code(self.stream.read_u8()) else {
            self.fail("invalid base type");
            return;
        };
        let Some(target) = self.req(0) else { return };
        let e = self.builder.new_call(target, base);
        self.drop_n(1);
        self.push(Some(e));
    }

    fn read_alloc(&mut self) {
        let Some(kind) = AllocKind::from_code(self.stream.read_u8()) else {
            self.fail("invalid alloc kind");
            return;
        };
        let Some(init) = self.req(0) else { return };
        let e = self.builder.new_alloc(init, kind);
        self.drop_n(1);
        self.push(Some(e));
    }

    fn read_load(&mut self) {
        let Some(base) = BaseType::from_code(self.stream.read_u8()) else {
            self.fail("invalid base type");
            return;
        };
        let Some(pointer) = self.req(0) else { return };
        let e = self.builder.new_load(pointer, base);
        self.drop_n(1);
        self.push(Some(e));
    }

    fn read_store(&mut self) {
        let Some(value) = self.req(0) else { return };
        let Some(dest) = self.req(1) else { return };
        let e = self.builder.new_store(dest, value);
        self.drop_n(2);
        self.push(Some(e));
    }

    fn read_array_index(&mut self) {
        let Some(index) = self.req(0) else { return };
        let Some(array) = self.req(1) else { return };
        let e = self.builder.new_array_index(array, index);
        self.drop_n(2);
        self.push(Some(e));
    }

    fn read_array_add(&mut self) {
        let Some(index) = self.req(0) else { return };
        let Some(array) = self.req(1) else { return };
        let e = self.builder.new_array_add(array, index);
        self.drop_n(2);
        self.push(Some(e));
    }

    fn read_unary_op(&mut self) {
        let Some(op) = UnaryOpcode::from_code(self.stream.read_u8()) else {
            self.fail("invalid unary opcode");
            return;
        };
        let Some(base) = BaseType::from_code(self.stream.read_u8()) else {
            self.fail("invalid base type");
            return;
        };
        let Some(operand) = self.req(0) else { return };
        let e = self.builder.new_unary_op(op, base, operand);
        self.drop_n(1);
        self.push(Some(e));
    }

    fn read_binary_op(&mut self) {
        let Some(op) = BinaryOpcode::from_code(self.stream.read_u8()) else {
            self.fail("invalid binary opcode");
            return;
        };
        let Some(base) = BaseType::from_code(self.stream.read_u8()) else {
            self.fail("invalid base type");
            return;
        };
        let Some(rhs) = self.req(0) else { return };
        let Some(lhs) = self.req(1) else { return };
        let e = self.builder.new_binary_op(op, base, lhs, rhs);
        self.drop_n(2);
        self.push(Some(e));
    }

    fn read_cast(&mut self) {
        let Some(op) = CastOpcode::from_code(self.stream.read_u8()) else {
            self.fail("invalid cast opcode");
            return;
        };
        let Some(base) = BaseType::from_code(self.stream.read_u8()) else {
            self.fail("invalid base type");
            return;
        };
        let Some(operand) = self.req(0) else { return };
        let e = self.builder.new_cast(op, base, operand);
        self.drop_n(1);
        self.push(Some(e));
    }

    fn read_if_then_else(&mut self) {
        let Some(else_expr) = self.req(0) else { return };
        let Some(then_expr) = self.req(1) else { return };
        let Some(cond) = self.req(2) else { return };
        let e = self.builder.new_if_then_else(cond, then_expr, else_expr);
        self.drop_n(3);
        self.push(Some(e));
    }
}
