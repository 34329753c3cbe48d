//! Arena-allocated TIL expression nodes.
//!
//! Nodes own their children as arena references; the whole tree lives as
//! long as the arena. Mutable metadata (instruction numbering, block
//! membership) sits in `Cell`s so nodes themselves never need `&mut`
//! access once allocated, and nothing in the arena requires `Drop`.

use core::cell::Cell;
use core::fmt;

use super::cfg::Scfg;

pub type ExprRef<'a> = &'a Expr<'a>;

/// Sentinel for "no instruction id assigned".
pub const INVALID_ID: u32 = u32::MAX;

/// Scalar base types carried by literals, casts and arithmetic.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BaseType {
    Void,
    Bool,
    I32,
    I64,
    U32,
    U64,
    F32,
    F64,
    Str,
}

impl BaseType {
    pub fn code(self) -> u8 {
        match self {
            BaseType::Void => 0,
            BaseType::Bool => 1,
            BaseType::I32 => 2,
            BaseType::I64 => 3,
            BaseType::U32 => 4,
            BaseType::U64 => 5,
            BaseType::F32 => 6,
            BaseType::F64 => 7,
            BaseType::Str => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<BaseType> {
        Some(match code {
            0 => BaseType::Void,
            1 => BaseType::Bool,
            2 => BaseType::I32,
            3 => BaseType::I64,
            4 => BaseType::U32,
            5 => BaseType::U64,
            6 => BaseType::F32,
            7 => BaseType::F64,
            8 => BaseType::Str,
            _ => return None,
        })
    }
}

/// A literal value together with its base type.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Literal<'a> {
    Void,
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(&'a str),
}

impl<'a> Literal<'a> {
    pub fn base_type(&self) -> BaseType {
        match self {
            Literal::Void => BaseType::Void,
            Literal::Bool(_) => BaseType::Bool,
            Literal::I32(_) => BaseType::I32,
            Literal::I64(_) => BaseType::I64,
            Literal::U32(_) => BaseType::U32,
            Literal::U64(_) => BaseType::U64,
            Literal::F32(_) => BaseType::F32,
            Literal::F64(_) => BaseType::F64,
            Literal::Str(_) => BaseType::Str,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VarKind {
    /// Introduced by a let binding.
    Let,
    /// A function parameter.
    Fun,
    /// The self-parameter of a recursive function.
    SelfFun,
}

impl VarKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<VarKind> {
        Some(match code {
            0 => VarKind::Let,
            1 => VarKind::Fun,
            2 => VarKind::SelfFun,
            _ => return None,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ApplyKind {
    Normal,
    SelfApply,
}

impl ApplyKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<ApplyKind> {
        Some(match code {
            0 => ApplyKind::Normal,
            1 => ApplyKind::SelfApply,
            _ => return None,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AllocKind {
    Stack,
    Heap,
}

impl AllocKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<AllocKind> {
        Some(match code {
            0 => AllocKind::Stack,
            1 => AllocKind::Heap,
            _ => return None,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CallingConvention {
    Default,
    C,
}

impl CallingConvention {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<CallingConvention> {
        Some(match code {
            0 => CallingConvention::Default,
            1 => CallingConvention::C,
            _ => return None,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnaryOpcode {
    Minus,
    BitNot,
    LogicNot,
}

impl UnaryOpcode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<UnaryOpcode> {
        Some(match code {
            0 => UnaryOpcode::Minus,
            1 => UnaryOpcode::BitNot,
            2 => UnaryOpcode::LogicNot,
            _ => return None,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinaryOpcode {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitXor,
    BitOr,
    Eq,
    Neq,
    Lt,
    Leq,
    Gt,
    Geq,
    LogicAnd,
    LogicOr,
}

impl BinaryOpcode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<BinaryOpcode> {
        use BinaryOpcode::*;
        const ALL: [BinaryOpcode; 18] = [
            Add, Sub, Mul, Div, Rem, Shl, Shr, BitAnd, BitXor, BitOr, Eq, Neq, Lt, Leq, Gt, Geq,
            LogicAnd, LogicOr,
        ];
        ALL.get(code as usize).copied()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CastOpcode {
    Extend,
    Truncate,
    IntToFloat,
    FloatToInt,
    BitCast,
}

impl CastOpcode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<CastOpcode> {
        use CastOpcode::*;
        const ALL: [CastOpcode; 5] = [Extend, Truncate, IntToFloat, FloatToInt, BitCast];
        ALL.get(code as usize).copied()
    }
}

/// One TIL node.
///
/// `instr_id` is assigned by CFG normal form (phi arguments and interior
/// instructions get dense ids); `in_block` marks nodes already placed in a
/// basic block so they are never inserted twice.
pub struct Expr<'a> {
    pub kind: ExprKind<'a>,
    pub(crate) instr_id: Cell<u32>,
    pub(crate) in_block: Cell<bool>,
}

#[derive(Debug)]
pub enum ExprKind<'a> {
    Literal(Literal<'a>),
    /// A use of a declared variable.
    Variable(ExprRef<'a>),
    /// A variable declaration. `var_index` is the de Bruijn level used by
    /// the bytecode codec's scope bracketing.
    VarDecl {
        kind: VarKind,
        name: &'a str,
        defn: Option<ExprRef<'a>>,
        var_index: Cell<u32>,
    },
    /// A one-parameter function; multi-parameter functions curry.
    Function {
        param: ExprRef<'a>,
        body: ExprRef<'a>,
    },
    /// A code block with an optional return type annotation.
    Code {
        return_type: Option<ExprRef<'a>>,
        body: Option<ExprRef<'a>>,
        cconv: CallingConvention,
    },
    /// A mutable field with a range annotation.
    Field {
        range: Option<ExprRef<'a>>,
        body: Option<ExprRef<'a>>,
    },
    /// A named record slot.
    Slot {
        name: &'a str,
        modifiers: u16,
        body: ExprRef<'a>,
    },
    Record {
        slots: &'a [ExprRef<'a>],
        parent: Option<ExprRef<'a>>,
    },
    Array {
        elem_type: Option<ExprRef<'a>>,
        size: Option<ExprRef<'a>>,
        elements: &'a [ExprRef<'a>],
    },
    ScalarType(BaseType),
    Apply {
        func: ExprRef<'a>,
        arg: Option<ExprRef<'a>>,
        kind: ApplyKind,
    },
    Project {
        base: ExprRef<'a>,
        slot_name: &'a str,
    },
    Call {
        target: ExprRef<'a>,
        result_type: BaseType,
    },
    Alloc {
        init: ExprRef<'a>,
        kind: AllocKind,
    },
    Load {
        pointer: ExprRef<'a>,
        result_type: BaseType,
    },
    Store {
        dest: ExprRef<'a>,
        value: ExprRef<'a>,
    },
    ArrayIndex {
        array: ExprRef<'a>,
        index: ExprRef<'a>,
    },
    ArrayAdd {
        array: ExprRef<'a>,
        index: ExprRef<'a>,
    },
    UnaryOp {
        op: UnaryOpcode,
        operand_type: BaseType,
        operand: ExprRef<'a>,
    },
    BinaryOp {
        op: BinaryOpcode,
        operand_type: BaseType,
        lhs: ExprRef<'a>,
        rhs: ExprRef<'a>,
    },
    Cast {
        op: CastOpcode,
        target_type: BaseType,
        operand: ExprRef<'a>,
    },
    /// A basic-block argument. Its per-predecessor values live in the
    /// owning block's [`PhiArg`](super::PhiArg), not in the arena.
    Phi,
    /// An unresolved name.
    Identifier(&'a str),
    Let {
        var_decl: ExprRef<'a>,
        body: ExprRef<'a>,
    },
    IfThenElse {
        cond: ExprRef<'a>,
        then_expr: ExprRef<'a>,
        else_expr: ExprRef<'a>,
    },
    Undefined,
    Wildcard,
    /// A finished control-flow graph used as an expression value.
    Cfg(&'a Scfg<'a>),
}

impl<'a> Expr<'a> {
    pub fn new(kind: ExprKind<'a>) -> Self {
        Expr {
            kind,
            instr_id: Cell::new(INVALID_ID),
            in_block: Cell::new(false),
        }
    }

    /// The instruction id assigned by CFG normal form, if any.
    pub fn instr_id(&self) -> Option<u32> {
        match self.instr_id.get() {
            INVALID_ID => None,
            id => Some(id),
        }
    }

    /// Whether this node has been placed in a basic block (as an argument
    /// or interior instruction).
    pub fn in_block(&self) -> bool {
        self.in_block.get()
    }

    /// Trivial nodes are pure values that never become stand-alone
    /// instructions.
    pub fn is_trivial(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Literal(_) | ExprKind::Variable(_) | ExprKind::ScalarType(_)
        )
    }

    /// The declaration's name, for `VarDecl` nodes.
    pub fn var_name(&self) -> Option<&'a str> {
        match self.kind {
            ExprKind::VarDecl { name, .. } => Some(name),
            _ => None,
        }
    }
}

impl<'a> fmt::Debug for Expr<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = self.instr_id() {
            write!(f, "%{id} = ")?;
        }
        self.kind.fmt(f)
    }
}

/// Structural equality of two expressions.
///
/// Instructions and phi arguments compare by their normal-form ids (the
/// graph shape); everything else compares recursively by kind and
/// payload. This is the equality the bytecode round-trip guarantees.
pub fn exprs_equal<'a>(a: ExprRef<'a>, b: ExprRef<'a>) -> bool {
    if core::ptr::eq(a, b) {
        return true;
    }
    match (a.instr_id(), b.instr_id()) {
        (Some(x), Some(y)) if x != y => return false,
        (Some(_), None) | (None, Some(_)) => return false,
        _ => {}
    }
    kinds_equal(a, b)
}

fn opt_equal<'a>(a: Option<ExprRef<'a>>, b: Option<ExprRef<'a>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => exprs_equal(x, y),
        _ => false,
    }
}

fn kinds_equal<'a>(a: ExprRef<'a>, b: ExprRef<'a>) -> bool {
    use ExprKind::*;
    match (&a.kind, &b.kind) {
        (Literal(x), Literal(y)) => x == y,
        (Variable(x), Variable(y)) => exprs_equal(x, y),
        (
            VarDecl {
                kind: k1,
                name: n1,
                defn: d1,
                ..
            },
            VarDecl {
                kind: k2,
                name: n2,
                defn: d2,
                ..
            },
        ) => k1 == k2 && n1 == n2 && opt_equal(*d1, *d2),
        (
            Function {
                param: p1,
                body: b1,
            },
            Function {
                param: p2,
                body: b2,
            },
        ) => exprs_equal(p1, p2) && exprs_equal(b1, b2),
        (
            Code {
                return_type: r1,
                body: b1,
                cconv: c1,
            },
            Code {
                return_type: r2,
                body: b2,
                cconv: c2,
            },
        ) => c1 == c2 && opt_equal(*r1, *r2) && opt_equal(*b1, *b2),
        (
            Field {
                range: r1,
                body: b1,
            },
            Field {
                range: r2,
                body: b2,
            },
        ) => opt_equal(*r1, *r2) && opt_equal(*b1, *b2),
        (
            Slot {
                name: n1,
                modifiers: m1,
                body: b1,
            },
            Slot {
                name: n2,
                modifiers: m2,
                body: b2,
            },
        ) => n1 == n2 && m1 == m2 && exprs_equal(b1, b2),
        (
            Record {
                slots: s1,
                parent: p1,
            },
            Record {
                slots: s2,
                parent: p2,
            },
        ) => {
            s1.len() == s2.len()
                && opt_equal(*p1, *p2)
                && s1.iter().zip(s2.iter()).all(|(x, y)| exprs_equal(x, y))
        }
        (
            Array {
                elem_type: t1,
                size: z1,
                elements: e1,
            },
            Array {
                elem_type: t2,
                size: z2,
                elements: e2,
            },
        ) => {
            e1.len() == e2.len()
                && opt_equal(*t1, *t2)
                && opt_equal(*z1, *z2)
                && e1.iter().zip(e2.iter()).all(|(x, y)| exprs_equal(x, y))
        }
        (ScalarType(x), ScalarType(y)) => x == y,
        (
            Apply {
                func: f1,
                arg: a1,
                kind: k1,
            },
            Apply {
                func: f2,
                arg: a2,
                kind: k2,
            },
        ) => k1 == k2 && exprs_equal(f1, f2) && opt_equal(*a1, *a2),
        (
            Project {
                base: b1,
                slot_name: s1,
            },
            Project {
                base: b2,
                slot_name: s2,
            },
        ) => s1 == s2 && exprs_equal(b1, b2),
        (
            Call {
                target: t1,
                result_type: r1,
            },
            Call {
                target: t2,
                result_type: r2,
            },
        ) => r1 == r2 && exprs_equal(t1, t2),
        (Alloc { init: i1, kind: k1 }, Alloc { init: i2, kind: k2 }) => {
            k1 == k2 && exprs_equal(i1, i2)
        }
        (
            Load {
                pointer: p1,
                result_type: r1,
            },
            Load {
                pointer: p2,
                result_type: r2,
            },
        ) => r1 == r2 && exprs_equal(p1, p2),
        (Store { dest: d1, value: v1 }, Store { dest: d2, value: v2 }) => {
            exprs_equal(d1, d2) && exprs_equal(v1, v2)
        }
        (
            ArrayIndex {
                array: a1,
                index: i1,
            },
            ArrayIndex {
                array: a2,
                index: i2,
            },
        )
        | (
            ArrayAdd {
                array: a1,
                index: i1,
            },
            ArrayAdd {
                array: a2,
                index: i2,
            },
        ) => exprs_equal(a1, a2) && exprs_equal(i1, i2),
        (
            UnaryOp {
                op: o1,
                operand_type: t1,
                operand: e1,
            },
            UnaryOp {
                op: o2,
                operand_type: t2,
                operand: e2,
            },
        ) => o1 == o2 && t1 == t2 && exprs_equal(e1, e2),
        (
            BinaryOp {
                op: o1,
                operand_type: t1,
                lhs: l1,
                rhs: r1,
            },
            BinaryOp {
                op: o2,
                operand_type: t2,
                lhs: l2,
                rhs: r2,
            },
        ) => o1 == o2 && t1 == t2 && exprs_equal(l1, l2) && exprs_equal(r1, r2),
        (
            Cast {
                op: o1,
                target_type: t1,
                operand: e1,
            },
            Cast {
                op: o2,
                target_type: t2,
                operand: e2,
            },
        ) => o1 == o2 && t1 == t2 && exprs_equal(e1, e2),
        (Phi, Phi) => true,
        (Identifier(x), Identifier(y)) => x == y,
        (
            Let {
                var_decl: v1,
                body: b1,
            },
            Let {
                var_decl: v2,
                body: b2,
            },
        ) => exprs_equal(v1, v2) && exprs_equal(b1, b2),
        (
            IfThenElse {
                cond: c1,
                then_expr: t1,
                else_expr: e1,
            },
            IfThenElse {
                cond: c2,
                then_expr: t2,
                else_expr: e2,
            },
        ) => exprs_equal(c1, c2) && exprs_equal(t1, t2) && exprs_equal(e1, e2),
        (Undefined, Undefined) | (Wildcard, Wildcard) => true,
        (Cfg(x), Cfg(y)) => super::cfg::cfgs_equal(x, y),
        _ => false,
    }
}
