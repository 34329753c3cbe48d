//! Lowering expression trees into CFG form.
//!
//! The traversal is continuation-passing: every sub-expression is visited
//! with a context that is one of
//! (a) not inside a CFG — rebuild the node and return it,
//! (b) inside a CFG with no continuation — the result becomes an
//!     instruction in the current block,
//! (c) inside a CFG with a continuation block K — the current block is
//!     terminated with a goto to K carrying the result.
//! The context is plain data (an optional continuation block id); no
//! callbacks or coroutines are involved.

use bumpalo::Bump;

use super::builder::Builder;
use super::cfg::{BlockId, Scfg};
use super::expr::{ExprKind, ExprRef};

/// Lexically scoped variable bindings, innermost last.
pub struct VarContext<'a> {
    vars: Vec<ExprRef<'a>>,
}

impl<'a> VarContext<'a> {
    pub fn new() -> Self {
        VarContext { vars: Vec::new() }
    }

    /// Innermost declaration named `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<ExprRef<'a>> {
        self.vars
            .iter()
            .rev()
            .find(|v| v.var_name() == Some(name))
            .copied()
    }

    pub fn push(&mut self, decl: ExprRef<'a>) {
        self.vars.push(decl);
    }

    pub fn pop(&mut self) {
        self.vars.pop();
    }
}

impl<'a> Default for VarContext<'a> {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a purely functional expression tree into a CFG in one
/// traversal. The entry block receives the first instructions; the value
/// of the whole expression flows into the exit block's phi argument.
pub fn convert_expr_to_cfg<'a>(e: ExprRef<'a>, arena: &'a Bump) -> &'a Scfg<'a> {
    let mut reducer = Reducer {
        builder: Builder::new(arena),
        var_ctx: VarContext::new(),
        tree_depth: 0,
    };
    let exit = reducer.builder.begin_cfg();
    reducer.traverse(e, Some(exit));
    reducer
        .builder
        .end_cfg()
        .expect("reduction produced a malformed control-flow graph")
}

struct Reducer<'a> {
    builder: Builder<'a>,
    var_ctx: VarContext<'a>,
    /// Depth of declaration-position subtrees (nested code bodies). While
    /// non-zero the traversal rebuilds trees without touching blocks.
    tree_depth: usize,
}

impl<'a> Reducer<'a> {
    /// Whether results currently flow into CFG blocks.
    fn cfg_mode(&self) -> bool {
        self.tree_depth == 0 && self.builder.in_block()
    }

    /// Visit `e` under `cont`. Returns the rebuilt value, or `None` when
    /// the value was routed to the continuation.
    fn traverse(&mut self, e: ExprRef<'a>, cont: Option<BlockId>) -> Option<ExprRef<'a>> {
        // Branching forms create blocks themselves and dispose of the
        // continuation on every path.
        if let ExprKind::IfThenElse {
            cond,
            then_expr,
            else_expr,
        } = e.kind
        {
            if self.cfg_mode() {
                return self.reduce_if_then_else(cond, then_expr, else_expr, cont);
            }
        }

        let result = self.reduce(e);
        if !self.cfg_mode() {
            return Some(result);
        }
        match cont {
            None => Some(self.builder.add_instruction(result)),
            Some(k) => {
                let n_args = self.builder.block_arg_count(k);
                if n_args > 0 {
                    self.builder.new_goto(k, &[result]);
                } else {
                    self.builder.new_goto(k, &[]);
                }
                None
            }
        }
    }

    /// Visit a sub-expression in operand position: inside a CFG the
    /// result lands in the current block as an instruction.
    fn operand(&mut self, e: ExprRef<'a>) -> ExprRef<'a> {
        self.traverse(e, None)
            .expect("operand traversal cannot consume the continuation")
    }

    /// Visit a sub-expression in declaration position (variable
    /// declarations, nested code bodies): rebuilt, but never inserted as
    /// an instruction.
    fn sub_decl(&mut self, e: ExprRef<'a>) -> ExprRef<'a> {
        self.tree_depth += 1;
        let result = self.reduce(e);
        self.tree_depth -= 1;
        result
    }

    /// Rebuild one node with reduced children.
    fn reduce(&mut self, e: ExprRef<'a>) -> ExprRef<'a> {
        match e.kind {
            // Nodes without sub-expressions are rebuilt as-is.
            ExprKind::Literal(lit) => self.builder.new_literal(lit),
            ExprKind::ScalarType(t) => self.builder.new_scalar_type(t),
            ExprKind::Undefined => self.builder.new_undefined(),
            ExprKind::Wildcard => self.builder.new_wildcard(),
            ExprKind::Phi | ExprKind::Cfg(_) => e,
            ExprKind::Variable(decl) => self.builder.new_variable(decl),

            ExprKind::Identifier(name) => self.reduce_identifier(e, name),

            ExprKind::VarDecl {
                kind, name, defn, ..
            } => {
                let defn = defn.map(|d| self.operand(d));
                self.builder.new_var_decl(kind, name, defn)
            }

            ExprKind::Function { param, body } => {
                let param = self.sub_decl(param);
                let named = param.var_name().is_some_and(|n| !n.is_empty());
                if named {
                    self.var_ctx.push(param);
                }
                let body = self.sub_decl(body);
                if named {
                    self.var_ctx.pop();
                }
                self.builder.new_function(param, body)
            }

            ExprKind::Code {
                return_type,
                body,
                cconv,
            } => {
                let return_type = return_type.map(|r| self.sub_decl(r));
                let body = body.map(|x| self.sub_decl(x));
                self.builder.new_code(return_type, body, cconv)
            }

            ExprKind::Field { range, body } => {
                let range = range.map(|r| self.sub_decl(r));
                let body = body.map(|x| self.sub_decl(x));
                self.builder.new_field(range, body)
            }

            ExprKind::Slot {
                name,
                modifiers,
                body,
            } => {
                let body = self.operand(body);
                self.builder.new_slot(name, modifiers, body)
            }

            ExprKind::Record { slots, parent } => {
                let parent = parent.map(|p| self.operand(p));
                let slots: Vec<ExprRef<'a>> = slots.iter().map(|s| self.operand(s)).collect();
                self.builder.new_record(&slots, parent)
            }

            ExprKind::Array {
                elem_type,
                size,
                elements,
            } => {
                let elem_type = elem_type.map(|t| self.operand(t));
                let size = size.map(|s| self.operand(s));
                let elements: Vec<ExprRef<'a>> =
                    elements.iter().map(|x| self.operand(x)).collect();
                self.builder.new_array(elem_type, size, &elements)
            }

            ExprKind::Apply { func, arg, kind } => {
                let func = self.operand(func);
                let arg = arg.map(|a| self.operand(a));
                self.builder.new_apply(func, arg, kind)
            }

            ExprKind::Project { base, slot_name } => {
                let base = self.operand(base);
                self.builder.new_project(base, slot_name)
            }

            ExprKind::Call {
                target,
                result_type,
            } => {
                let target = self.operand(target);
                self.builder.new_call(target, result_type)
            }

            ExprKind::Alloc { init, kind } => {
                let init = self.operand(init);
                self.builder.new_alloc(init, kind)
            }

            ExprKind::Load {
                pointer,
                result_type,
            } => {
                let pointer = self.operand(pointer);
                self.builder.new_load(pointer, result_type)
            }

            ExprKind::Store { dest, value } => {
                let dest = self.operand(dest);
                let value = self.operand(value);
                self.builder.new_store(dest, value)
            }

            ExprKind::ArrayIndex { array, index } => {
                let array = self.operand(array);
                let index = self.operand(index);
                self.builder.new_array_index(array, index)
            }

            ExprKind::ArrayAdd { array, index } => {
                let array = self.operand(array);
                let index = self.operand(index);
                self.builder.new_array_add(array, index)
            }

            ExprKind::UnaryOp {
                op,
                operand_type,
                operand,
            } => {
                let operand = self.operand(operand);
                self.builder.new_unary_op(op, operand_type, operand)
            }

            ExprKind::BinaryOp {
                op,
                operand_type,
                lhs,
                rhs,
            } => {
                let lhs = self.operand(lhs);
                let rhs = self.operand(rhs);
                self.builder.new_binary_op(op, operand_type, lhs, rhs)
            }

            ExprKind::Cast {
                op,
                target_type,
                operand,
            } => {
                let operand = self.operand(operand);
                self.builder.new_cast(op, target_type, operand)
            }

            ExprKind::Let { var_decl, body } => self.reduce_let(var_decl, body),

            // Reached only outside a CFG; the in-CFG case is intercepted
            // in `traverse`.
            ExprKind::IfThenElse {
                cond,
                then_expr,
                else_expr,
            } => {
                let cond = self.operand(cond);
                let then_expr = self.operand(then_expr);
                let else_expr = self.operand(else_expr);
                self.builder.new_if_then_else(cond, then_expr, else_expr)
            }
        }
    }

    fn reduce_identifier(&mut self, orig: ExprRef<'a>, name: &'a str) -> ExprRef<'a> {
        match self.var_ctx.lookup(name) {
            Some(decl) => {
                if self.cfg_mode() {
                    // Direct SSA operand: the binding's reduced definition
                    // value (lets are eliminated inside a CFG).
                    if let ExprKind::VarDecl {
                        kind: super::expr::VarKind::Let,
                        defn: Some(defn),
                        ..
                    } = decl.kind
                    {
                        return defn;
                    }
                }
                self.builder.new_variable(decl)
            }
            None => {
                tracing::warn!(name, "unresolved identifier");
                orig
            }
        }
    }

    fn reduce_let(&mut self, var_decl: ExprRef<'a>, body: ExprRef<'a>) -> ExprRef<'a> {
        // The declaration's definition is an ordinary operand (inside a
        // CFG it lands in the current block); the declaration node itself
        // is never an instruction.
        let decl = self.reduce(var_decl);
        let named = decl.var_name().is_some_and(|n| !n.is_empty());
        if named {
            self.var_ctx.push(decl);
        }
        let body = self.operand(body);
        if named {
            self.var_ctx.pop();
        }
        if self.cfg_mode() {
            // The binding dissolves into its definition instruction.
            body
        } else {
            self.builder.new_let(decl, body)
        }
    }

    /// Lower a conditional inside a CFG.
    ///
    /// The else branch is processed before the then branch so that the
    /// continuation's phi values accumulate in predecessor-addition
    /// order; each goto records its slot as it is synthesized.
    fn reduce_if_then_else(
        &mut self,
        cond: ExprRef<'a>,
        then_expr: ExprRef<'a>,
        else_expr: ExprRef<'a>,
        cont: Option<BlockId>,
    ) -> Option<ExprRef<'a>> {
        let (k, owns_k) = match cont {
            Some(k) => (k, false),
            None => (self.builder.new_continuation(), true),
        };

        let cond = self.operand(cond);
        let (then_block, else_block) = self.builder.new_branch(cond);

        self.builder.begin_block(else_block);
        self.traverse(else_expr, Some(k));

        self.builder.begin_block(then_block);
        self.traverse(then_expr, Some(k));

        if owns_k {
            // The conditional's value is the continuation's argument.
            self.builder.begin_block(k);
            Some(self.builder.block_arg(k, 0))
        } else {
            // The caller's continuation absorbed both branches; there is
            // no flowing value here.
            None
        }
    }
}
