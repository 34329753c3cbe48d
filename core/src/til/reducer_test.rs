use bumpalo::Bump;

use super::builder::Builder;
use super::cfg::Terminator;
use super::expr::{BaseType, BinaryOpcode, ExprKind, Literal, VarKind};
use super::reducer::convert_expr_to_cfg;

fn lit_i32<'a>(b: &Builder<'a>, v: i32) -> super::expr::ExprRef<'a> {
    b.new_literal(Literal::I32(v))
}

#[test]
fn test_reduce_literal() {
    let arena = Bump::new();
    let b = Builder::new(&arena);
    let e = lit_i32(&b, 42);

    let cfg = convert_expr_to_cfg(e, &arena);
    assert_eq!(cfg.num_blocks(), 2);
    // The literal flows straight into the exit phi.
    let exit = cfg.exit_block();
    assert!(matches!(
        exit.args[0].values[0].kind,
        ExprKind::Literal(Literal::I32(42))
    ));
}

#[test]
fn test_if_then_else_makes_four_blocks() {
    let arena = Bump::new();
    let b = Builder::new(&arena);
    let e = b.new_if_then_else(
        b.new_literal(Literal::Bool(true)),
        lit_i32(&b, 10),
        lit_i32(&b, 20),
    );

    let cfg = convert_expr_to_cfg(e, &arena);
    assert_eq!(cfg.num_blocks(), 4);

    // Entry branches; the branch carries the reduced condition.
    match cfg.entry_block().term {
        Terminator::Branch { cond, .. } => {
            assert!(matches!(cond.kind, ExprKind::Literal(Literal::Bool(true))))
        }
        _ => panic!("entry must branch"),
    }

    // One phi in the exit, one value per predecessor, in predecessor
    // order: the else edge was added first and keeps the lower block id.
    let exit = cfg.exit_block();
    assert_eq!(exit.preds.len(), 2);
    assert_eq!(exit.args.len(), 1);
    let values = exit.args[0].values;
    assert_eq!(values.len(), 2);
    assert!(matches!(values[0].kind, ExprKind::Literal(Literal::I32(20))));
    assert!(matches!(values[1].kind, ExprKind::Literal(Literal::I32(10))));
}

#[test]
fn test_every_block_has_terminator_and_preds() {
    let arena = Bump::new();
    let b = Builder::new(&arena);
    let inner = b.new_if_then_else(
        b.new_literal(Literal::Bool(false)),
        lit_i32(&b, 1),
        lit_i32(&b, 2),
    );
    let e = b.new_if_then_else(b.new_literal(Literal::Bool(true)), inner, lit_i32(&b, 3));

    let cfg = convert_expr_to_cfg(e, &arena);
    // entry, outer then (branches again), outer else, inner then, inner
    // else, exit.
    assert_eq!(cfg.num_blocks(), 6);
    for block in cfg.blocks {
        if block.id != cfg.entry {
            assert!(!block.preds.is_empty(), "B{} lost its predecessors", block.id);
        }
        for arg in block.args {
            assert_eq!(arg.values.len(), block.preds.len());
        }
    }
    // All three leaves feed the exit phi.
    assert_eq!(cfg.exit_block().preds.len(), 3);
}

#[test]
fn test_let_is_eliminated_inside_cfg() {
    let arena = Bump::new();
    let b = Builder::new(&arena);
    // let x = 1 + 2 in x * x
    let add = b.new_binary_op(BinaryOpcode::Add, BaseType::I32, lit_i32(&b, 1), lit_i32(&b, 2));
    let decl = b.new_var_decl(VarKind::Let, "x", Some(add));
    let body = b.new_binary_op(
        BinaryOpcode::Mul,
        BaseType::I32,
        b.new_identifier("x"),
        b.new_identifier("x"),
    );
    let e = b.new_let(decl, body);

    let cfg = convert_expr_to_cfg(e, &arena);
    assert_eq!(cfg.num_blocks(), 2);

    let entry = cfg.entry_block();
    assert_eq!(entry.instrs.len(), 2);
    // Both multiplicand operands resolve to the add instruction itself.
    match entry.instrs[1].kind {
        ExprKind::BinaryOp { op, lhs, rhs, .. } => {
            assert_eq!(op, BinaryOpcode::Mul);
            assert!(core::ptr::eq(lhs, entry.instrs[0]));
            assert!(core::ptr::eq(rhs, entry.instrs[0]));
        }
        _ => panic!("second instruction must be the multiply"),
    }
}

#[test]
fn test_unresolved_identifier_is_preserved() {
    let arena = Bump::new();
    let b = Builder::new(&arena);
    let e = b.new_identifier("free");

    let cfg = convert_expr_to_cfg(e, &arena);
    let exit = cfg.exit_block();
    assert!(matches!(
        exit.args[0].values[0].kind,
        ExprKind::Identifier("free")
    ));
}

#[test]
fn test_value_of_if_feeds_surrounding_instruction() {
    let arena = Bump::new();
    let b = Builder::new(&arena);
    // (if c then 1 else 2) + 5: the conditional's value is the
    // continuation phi, which the add consumes in the join block.
    let ite = b.new_if_then_else(
        b.new_literal(Literal::Bool(true)),
        lit_i32(&b, 1),
        lit_i32(&b, 2),
    );
    let e = b.new_binary_op(BinaryOpcode::Add, BaseType::I32, ite, lit_i32(&b, 5));

    let cfg = convert_expr_to_cfg(e, &arena);
    // entry, then, else, join (fresh continuation), exit.
    assert_eq!(cfg.num_blocks(), 5);

    // The join block's goto feeds the exit phi with the add, whose lhs
    // is the join's own phi argument.
    let join = cfg
        .blocks
        .iter()
        .find(|blk| !blk.args.is_empty() && blk.id != cfg.exit)
        .expect("a join block with a phi argument");
    assert!(matches!(join.term, Terminator::Goto { .. }));
    let exit = cfg.exit_block();
    let add = exit.args[0].values[0];
    match add.kind {
        ExprKind::BinaryOp { lhs, .. } => assert!(core::ptr::eq(lhs, join.args[0].phi)),
        _ => panic!("exit phi value must be the add"),
    }
}

#[test]
fn test_function_body_stays_a_tree() {
    let arena = Bump::new();
    let b = Builder::new(&arena);
    // \v -> if v then 1 else 2  — the conditional inside the nested
    // function body must not be lowered into the outer CFG.
    let param = b.new_var_decl(VarKind::Fun, "v", None);
    let body = b.new_if_then_else(b.new_identifier("v"), lit_i32(&b, 1), lit_i32(&b, 2));
    let func = b.new_function(param, body);

    let cfg = convert_expr_to_cfg(func, &arena);
    assert_eq!(cfg.num_blocks(), 2);
    assert_eq!(cfg.entry_block().instrs.len(), 0);
    // The function flows to the exit as a single value.
    let reduced = cfg.exit_block().args[0].values[0];
    match reduced.kind {
        ExprKind::Function { body, .. } => {
            // The conditional stayed a tree, with the parameter reference
            // resolved to a variable use.
            match body.kind {
                ExprKind::IfThenElse { cond, .. } => {
                    assert!(matches!(cond.kind, ExprKind::Variable(_)));
                }
                _ => panic!("function body must stay an if-then-else tree"),
            }
        }
        _ => panic!("exit phi value must be the function"),
    }
}
