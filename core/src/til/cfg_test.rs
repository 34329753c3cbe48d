use bumpalo::Bump;

use super::builder::Builder;
use super::cfg::Terminator;
use super::expr::{BaseType, BinaryOpcode, Literal};

#[test]
fn test_straight_line_cfg() {
    let arena = Bump::new();
    let mut b = Builder::new(&arena);
    let exit = b.begin_cfg();

    let one = b.new_literal(Literal::I32(1));
    let two = b.new_literal(Literal::I32(2));
    let sum = b.new_binary_op(BinaryOpcode::Add, BaseType::I32, one, two);
    b.add_instruction(sum);
    b.new_goto(exit, &[sum]);

    let cfg = b.end_cfg().unwrap();
    assert_eq!(cfg.num_blocks(), 2);
    assert_eq!(cfg.entry, 0);
    assert_eq!(cfg.exit, 1);

    let entry = cfg.entry_block();
    assert_eq!(entry.instrs.len(), 1);
    assert!(matches!(entry.term, Terminator::Goto { target: 1, phi_slot: 0 }));

    let exit = cfg.exit_block();
    assert_eq!(exit.preds, &[0]);
    assert_eq!(exit.args.len(), 1);
    assert_eq!(exit.args[0].values.len(), 1);
    assert!(matches!(exit.term, Terminator::Return { .. }));

    // Dense instruction ids: the add in the entry block, then the exit
    // phi.
    assert_eq!(sum.instr_id(), Some(0));
    assert_eq!(exit.first_instr_id, 1);
    assert_eq!(exit.args[0].phi.instr_id(), Some(1));
    assert_eq!(cfg.num_instrs, 2);
}

#[test]
fn test_trivial_values_are_not_instructions() {
    let arena = Bump::new();
    let mut b = Builder::new(&arena);
    let exit = b.begin_cfg();

    let lit = b.new_literal(Literal::I32(7));
    b.add_instruction(lit);
    b.new_goto(exit, &[lit]);

    let cfg = b.end_cfg().unwrap();
    assert_eq!(cfg.entry_block().instrs.len(), 0);
    assert!(lit.instr_id().is_none());
    assert_eq!(cfg.num_instrs, 1); // only the exit phi
}

#[test]
fn test_diamond_normal_form() {
    let arena = Bump::new();
    let mut b = Builder::new(&arena);
    let exit = b.begin_cfg();

    let cond = b.new_literal(Literal::Bool(true));
    let (then_block, else_block) = b.new_branch(cond);

    // Else processed first, as the reducer does.
    let twenty = b.new_literal(Literal::I32(20));
    b.begin_block(else_block);
    b.new_goto(exit, &[twenty]);

    let ten = b.new_literal(Literal::I32(10));
    b.begin_block(then_block);
    b.new_goto(exit, &[ten]);

    let cfg = b.end_cfg().unwrap();
    assert_eq!(cfg.num_blocks(), 4);

    // Reverse-postorder from the entry with then-first successor order
    // numbers the else block 1, the then block 2, the exit 3.
    let entry = cfg.entry_block();
    let (tb, eb) = match entry.term {
        Terminator::Branch {
            then_block,
            else_block,
            ..
        } => (then_block, else_block),
        _ => panic!("entry must end in a branch"),
    };
    assert_eq!((tb, eb), (2, 1));
    assert_eq!(cfg.exit, 3);

    // Canonical predecessor order is ascending block id: else first.
    let exit = cfg.exit_block();
    assert_eq!(exit.preds, &[1, 2]);
    let values = exit.args[0].values;
    assert!(matches!(
        values[0].kind,
        super::expr::ExprKind::Literal(Literal::I32(20))
    ));
    assert!(matches!(
        values[1].kind,
        super::expr::ExprKind::Literal(Literal::I32(10))
    ));

    // Each goto records its slot in the target's predecessor list.
    assert!(matches!(
        cfg.block(1).term,
        Terminator::Goto { target: 3, phi_slot: 0 }
    ));
    assert!(matches!(
        cfg.block(2).term,
        Terminator::Goto { target: 3, phi_slot: 1 }
    ));
}

#[test]
fn test_unreachable_block_is_dropped() {
    let arena = Bump::new();
    let mut b = Builder::new(&arena);
    let exit = b.begin_cfg();
    let lit = b.new_literal(Literal::I32(0));
    b.new_goto(exit, &[lit]);

    // A detached block nothing jumps to.
    let orphan = b.new_block(0);
    b.begin_block(orphan);
    b.new_return(lit);

    let cfg = b.end_cfg().unwrap();
    assert_eq!(cfg.num_blocks(), 2);
}

#[test]
fn test_open_block_is_an_error() {
    let arena = Bump::new();
    let mut b = Builder::new(&arena);
    let _exit = b.begin_cfg();
    // Entry never terminated.
    assert!(b.end_cfg().is_err());
}

#[test]
fn test_switch_terminator() {
    let arena = Bump::new();
    let mut b = Builder::new(&arena);
    let exit = b.begin_cfg();

    let scrutinee = b.new_literal(Literal::I32(1));
    let case_a = b.new_block(0);
    let case_b = b.new_block(0);
    let va = b.new_literal(Literal::I32(1));
    let vb = b.new_literal(Literal::I32(2));
    b.new_switch(scrutinee, &[(va, case_a), (vb, case_b)]);

    b.begin_block(case_a);
    b.new_goto(exit, &[va]);
    b.begin_block(case_b);
    b.new_goto(exit, &[vb]);

    let cfg = b.end_cfg().unwrap();
    assert_eq!(cfg.num_blocks(), 4);
    match cfg.entry_block().term {
        Terminator::Switch { cases, .. } => {
            assert_eq!(cases.len(), 2);
            // Case order follows construction; the first case is
            // explored first, so it finishes earlier in the DFS and
            // lands on the higher reverse-postorder id.
            assert_eq!(cases[0].1, 2);
            assert_eq!(cases[1].1, 1);
        }
        _ => panic!("entry must end in a switch"),
    }
    assert_eq!(cfg.exit_block().preds.len(), 2);
}

#[test]
fn test_display_lists_blocks() {
    let arena = Bump::new();
    let mut b = Builder::new(&arena);
    let exit = b.begin_cfg();
    let lit = b.new_literal(Literal::I32(3));
    b.new_goto(exit, &[lit]);
    let cfg = b.end_cfg().unwrap();

    let text = format!("{cfg}");
    assert!(text.contains("2 blocks"));
    assert!(text.contains("B0:"));
    assert!(text.contains("goto B1"));
    assert!(text.contains("return"));
}
