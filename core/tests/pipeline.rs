//! End-to-end: lex → parse → TIL tree → CFG → bytecode → TIL.

use bumpalo::Bump;
use pretty_assertions::assert_eq;

use tarn_core::bytecode::{BytecodeReader, BytecodeWriter};
use tarn_core::parser::{
    AstFactory, AstNode, BasicLexer, NamedDefinition, ParseResult, ParseRule, Parser, TOKEN_NUMBER,
};
use tarn_core::til::{
    cfgs_equal, convert_expr_to_cfg, exprs_equal, BaseType, BinaryOpcode, Builder, ExprKind,
    ExprRef, Literal, Terminator,
};

/// An AST factory that mints TIL expressions directly.
struct TilFactory<'a> {
    builder: Builder<'a>,
}

impl<'a> TilFactory<'a> {
    fn new(arena: &'a Bump) -> Self {
        TilFactory {
            builder: Builder::new(arena),
        }
    }
}

const OP_NUM: u32 = 0;
const OP_ADD: u32 = 1;
const OP_IF: u32 = 2;

impl<'a> AstFactory for TilFactory<'a> {
    type Node = ExprRef<'a>;

    fn opcode_for(&self, name: &str) -> Option<u32> {
        match name {
            "num" => Some(OP_NUM),
            "add" => Some(OP_ADD),
            "if" => Some(OP_IF),
            _ => None,
        }
    }

    fn make_expr<'s>(
        &mut self,
        opcode: u32,
        args: &mut [ParseResult<'s, ExprRef<'a>>],
    ) -> ParseResult<'s, ExprRef<'a>> {
        match opcode {
            OP_NUM => {
                let text = args[0].token_str().expect("number token");
                let value: i32 = text.parse().expect("numeric literal");
                ParseResult::Node(self.builder.new_literal(Literal::I32(value)))
            }
            OP_ADD => {
                let lhs = args[0].take_node().expect("lhs");
                let rhs = args[1].take_node().expect("rhs");
                ParseResult::Node(self.builder.new_binary_op(
                    BinaryOpcode::Add,
                    BaseType::I32,
                    lhs,
                    rhs,
                ))
            }
            OP_IF => {
                let cond = args[0].take_node().expect("cond");
                let then_expr = args[1].take_node().expect("then");
                let else_expr = args[2].take_node().expect("else");
                ParseResult::Node(
                    self.builder.new_if_then_else(cond, then_expr, else_expr),
                )
            }
            _ => unreachable!("unknown opcode"),
        }
    }
}

/// expr ::= expr "+" term | term;  term ::= NUMBER
/// via the explicit left-recursion combinator.
fn arithmetic_grammar<'s>(source: &'s str, arena: &'s Bump) -> Parser<'s, BasicLexer<'s>, TilFactory<'s>> {
    let mut p = Parser::new(BasicLexer::new(source), TilFactory::new(arena));
    p.add_definition(NamedDefinition::new(
        "term",
        ParseRule::seq_named(
            "n",
            ParseRule::token(TOKEN_NUMBER),
            ParseRule::action(AstNode::construct("num", vec![AstNode::var("n")])),
        ),
    ));
    p.add_definition(NamedDefinition::new(
        "expr",
        ParseRule::recurse_left(
            "x",
            ParseRule::reference("term"),
            ParseRule::seq(
                ParseRule::keyword("+"),
                ParseRule::seq_named(
                    "y",
                    ParseRule::reference("term"),
                    ParseRule::action(AstNode::construct(
                        "add",
                        vec![AstNode::var("x"), AstNode::var("y")],
                    )),
                ),
            ),
        ),
    ));
    p
}

#[test]
fn test_left_recursion_builds_left_leaning_tree() {
    let arena = Bump::new();
    let mut p = arithmetic_grammar("1+2+3", &arena);
    p.init().unwrap();
    let ast = p.parse_named("expr").take_node().unwrap();

    // Add(Add(1, 2), 3)
    match ast.kind {
        ExprKind::BinaryOp { lhs, rhs, .. } => {
            assert!(matches!(rhs.kind, ExprKind::Literal(Literal::I32(3))));
            match lhs.kind {
                ExprKind::BinaryOp { lhs, rhs, .. } => {
                    assert!(matches!(lhs.kind, ExprKind::Literal(Literal::I32(1))));
                    assert!(matches!(rhs.kind, ExprKind::Literal(Literal::I32(2))));
                }
                _ => panic!("left child must be the inner add"),
            }
        }
        _ => panic!("root must be an add"),
    }
}

#[test]
fn test_parse_reduce_and_roundtrip() {
    let arena = Bump::new();
    let mut p = arithmetic_grammar("1+2+3", &arena);
    p.init().unwrap();
    let ast = p.parse_named("expr").take_node().unwrap();

    // Lower to a CFG: straight-line code, so entry and exit only. The
    // inner add becomes an entry instruction; the outer add rides the
    // goto into the exit phi.
    let cfg = convert_expr_to_cfg(ast, &arena);
    assert_eq!(cfg.num_blocks(), 2);
    assert_eq!(cfg.entry_block().instrs.len(), 1);

    // Encode, decode into a fresh arena, compare structurally.
    let mut w = BytecodeWriter::new(Vec::new());
    w.write_cfg(cfg);
    let bytes = w.finish();

    let out_arena = Bump::new();
    let mut r = BytecodeReader::new(bytes.as_slice(), &out_arena);
    let out = r.read().expect("decode must succeed");
    match out.kind {
        ExprKind::Cfg(out_cfg) => assert!(cfgs_equal(cfg, out_cfg)),
        _ => panic!("expected a CFG"),
    }
}

#[test]
fn test_conditional_pipeline() {
    // cond ::= "if" expr "then" expr "else" expr { if(c, t, e) } | expr
    let arena = Bump::new();
    let source = "if 1 then 10 else 20";
    let mut p = arithmetic_grammar(source, &arena);
    p.add_definition(NamedDefinition::new(
        "cond",
        ParseRule::option(
            ParseRule::seq(
                ParseRule::keyword("if"),
                ParseRule::seq_named(
                    "c",
                    ParseRule::reference("expr"),
                    ParseRule::seq(
                        ParseRule::keyword("then"),
                        ParseRule::seq_named(
                            "t",
                            ParseRule::reference("expr"),
                            ParseRule::seq(
                                ParseRule::keyword("else"),
                                ParseRule::seq_named(
                                    "e",
                                    ParseRule::reference("expr"),
                                    ParseRule::action(AstNode::construct(
                                        "if",
                                        vec![
                                            AstNode::var("c"),
                                            AstNode::var("t"),
                                            AstNode::var("e"),
                                        ],
                                    )),
                                ),
                            ),
                        ),
                    ),
                ),
            ),
            ParseRule::reference("expr"),
        ),
    ));
    p.init().unwrap();
    let ast = p.parse_named("cond").take_node().unwrap();
    assert!(matches!(ast.kind, ExprKind::IfThenElse { .. }));

    // Four blocks: entry, then, else, exit; the exit phi sees the else
    // value on the lower-numbered predecessor edge.
    let cfg = convert_expr_to_cfg(ast, &arena);
    assert_eq!(cfg.num_blocks(), 4);
    let exit = cfg.exit_block();
    assert_eq!(exit.args.len(), 1);
    assert!(matches!(
        exit.args[0].values[0].kind,
        ExprKind::Literal(Literal::I32(20))
    ));
    assert!(matches!(
        exit.args[0].values[1].kind,
        ExprKind::Literal(Literal::I32(10))
    ));
    assert!(matches!(cfg.entry_block().term, Terminator::Branch { .. }));

    // Encode and decode: identical shape, ids and phi order.
    let mut w = BytecodeWriter::new(Vec::new());
    w.write_cfg(cfg);
    let bytes = w.finish();
    let out_arena = Bump::new();
    let mut r = BytecodeReader::new(bytes.as_slice(), &out_arena);
    let out = r.read().expect("decode must succeed");
    match out.kind {
        ExprKind::Cfg(out_cfg) => {
            assert!(cfgs_equal(cfg, out_cfg));
        }
        _ => panic!("expected a CFG"),
    }
}

#[test]
fn test_tree_roundtrip_through_bytecode() {
    let arena = Bump::new();
    let mut p = arithmetic_grammar("4+5", &arena);
    p.init().unwrap();
    let ast = p.parse_named("expr").take_node().unwrap();

    let mut w = BytecodeWriter::new(Vec::new());
    w.write(ast);
    let bytes = w.finish();

    let out_arena = Bump::new();
    let mut r = BytecodeReader::new(bytes.as_slice(), &out_arena);
    let out = r.read().expect("decode must succeed");
    assert!(exprs_equal(ast, out));
}
