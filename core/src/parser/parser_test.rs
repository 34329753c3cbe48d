use pretty_assertions::assert_eq;

use super::ast::AstNode;
use super::error::GrammarError;
use super::grammar::{NamedDefinition, ParseRule};
use super::lexer::BasicLexer;
use super::parser::{AstFactory, Parser};
use super::result::ParseResult;
use super::token::{TOKEN_IDENTIFIER, TOKEN_NUMBER};

/// A tiny host AST for exercising the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TestNode {
    Leaf(String),
    Tree(String, Vec<TestNode>),
}

fn leaf(s: &str) -> TestNode {
    TestNode::Leaf(s.to_string())
}

fn tree(op: &str, children: Vec<TestNode>) -> TestNode {
    TestNode::Tree(op.to_string(), children)
}

struct TestFactory {
    ops: Vec<&'static str>,
}

impl TestFactory {
    fn new(ops: &[&'static str]) -> Self {
        TestFactory { ops: ops.to_vec() }
    }
}

impl AstFactory for TestFactory {
    type Node = TestNode;

    fn opcode_for(&self, name: &str) -> Option<u32> {
        self.ops.iter().position(|o| *o == name).map(|i| i as u32)
    }

    fn make_expr<'s>(
        &mut self,
        opcode: u32,
        args: &mut [ParseResult<'s, TestNode>],
    ) -> ParseResult<'s, TestNode> {
        let name = self.ops[opcode as usize].to_string();
        let mut children = Vec::new();
        for a in args {
            match a.take() {
                ParseResult::None => {}
                ParseResult::Token(s) => children.push(TestNode::Leaf(s.to_string())),
                ParseResult::Node(n) => children.push(n),
                ParseResult::List(items) => children.extend(items),
            }
        }
        ParseResult::Node(TestNode::Tree(name, children))
    }
}

fn arith_parser(source: &str) -> Parser<'_, BasicLexer<'_>, TestFactory> {
    // expr ::= expr "+" term | term;  term ::= NUMBER;
    // expressed with the explicit left-recursion combinator.
    let mut p = Parser::new(BasicLexer::new(source), TestFactory::new(&["num", "add"]));
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
fn test_left_recursive_addition() {
    let mut p = arith_parser("1+2+3");
    p.init().unwrap();
    let start = p.find_definition("expr").unwrap();
    let mut result = p.parse(start);
    let ast = result.take_node().unwrap();
    assert_eq!(
        ast,
        tree(
            "add",
            vec![
                tree(
                    "add",
                    vec![tree("num", vec![leaf("1")]), tree("num", vec![leaf("2")])]
                ),
                tree("num", vec![leaf("3")]),
            ]
        )
    );
}

#[test]
fn test_single_term() {
    let mut p = arith_parser("7");
    p.init().unwrap();
    let mut result = p.parse_named("expr");
    assert_eq!(result.take_node().unwrap(), tree("num", vec![leaf("7")]));
}

#[test]
fn test_keyword_action_grammar() {
    // greeting ::= "hello" IDENT { greet(id) }
    let source = "hello world";
    let mut p = Parser::new(BasicLexer::new(source), TestFactory::new(&["greet"]));
    p.add_definition(NamedDefinition::new(
        "greeting",
        ParseRule::seq(
            ParseRule::keyword("hello"),
            ParseRule::seq_named(
                "id",
                ParseRule::token(TOKEN_IDENTIFIER),
                ParseRule::action(AstNode::construct("greet", vec![AstNode::var("id")])),
            ),
        ),
    ));
    p.init().unwrap();
    let mut result = p.parse_named("greeting");
    assert_eq!(
        result.take_node().unwrap(),
        tree("greet", vec![leaf("world")])
    );
    assert!(p.syntax_error().is_none());
}

#[test]
fn test_syntax_error_is_first_and_sticky() {
    let mut p = arith_parser("1+*");
    p.init().unwrap();
    let mut result = p.parse_named("expr");
    assert!(result.take_node().is_none());
    let err = p.syntax_error().unwrap();
    assert_eq!(err.expected, "number");
    // The offending token is the '*' at byte 2.
    assert_eq!(err.span.start, 2);
}

#[test]
fn test_option_dispatches_on_first_set() {
    // value ::= NUMBER { num(n) } | IDENT { id(n) }
    let mk = |src| {
        let mut p = Parser::new(BasicLexer::new(src), TestFactory::new(&["num", "id"]));
        p.add_definition(NamedDefinition::new(
            "value",
            ParseRule::option(
                ParseRule::seq_named(
                    "n",
                    ParseRule::token(TOKEN_NUMBER),
                    ParseRule::action(AstNode::construct("num", vec![AstNode::var("n")])),
                ),
                ParseRule::seq_named(
                    "n",
                    ParseRule::token(TOKEN_IDENTIFIER),
                    ParseRule::action(AstNode::construct("id", vec![AstNode::var("n")])),
                ),
            ),
        ));
        p.init().unwrap();
        p
    };
    let mut p = mk("42");
    assert_eq!(
        p.parse_named("value").take_node().unwrap(),
        tree("num", vec![leaf("42")])
    );
    let mut p = mk("x");
    assert_eq!(
        p.parse_named("value").take_node().unwrap(),
        tree("id", vec![leaf("x")])
    );
}

#[test]
fn test_trailing_empty_alternative_yields_empty_result() {
    // opt ::= ( NUMBER | () ) { wrap(x) }
    let mut p = Parser::new(BasicLexer::new("done"), TestFactory::new(&["wrap"]));
    p.add_definition(NamedDefinition::new(
        "opt",
        ParseRule::seq_named(
            "x",
            ParseRule::option(ParseRule::token(TOKEN_NUMBER), ParseRule::None),
            ParseRule::action(AstNode::construct("wrap", vec![AstNode::var("x")])),
        ),
    ));
    p.init().unwrap();
    let mut result = p.parse_named("opt");
    // The empty alternative contributes no child.
    assert_eq!(result.take_node().unwrap(), tree("wrap", vec![]));
}

#[test]
fn test_list_accumulation() {
    // list ::= item { append([], x) } ( "," item { append(acc, y) } )*
    let mut p = Parser::new(BasicLexer::new("a,b,c"), TestFactory::new(&["items"]));
    let item = |name: &str, next: ParseRule| {
        ParseRule::seq_named(name, ParseRule::token(TOKEN_IDENTIFIER), next)
    };
    p.add_definition(NamedDefinition::new(
        "list",
        ParseRule::seq_named(
            "all",
            ParseRule::recurse_left(
                "acc",
                item(
                    "x",
                    ParseRule::action(AstNode::append(AstNode::empty_list(), AstNode::var("x"))),
                ),
                ParseRule::seq(
                    ParseRule::keyword(","),
                    item(
                        "y",
                        ParseRule::action(AstNode::append(
                            AstNode::var("acc"),
                            AstNode::var("y"),
                        )),
                    ),
                ),
            ),
            ParseRule::action(AstNode::construct("items", vec![AstNode::var("all")])),
        ),
    ));
    p.init().unwrap();
    let mut result = p.parse_named("list");
    assert_eq!(
        result.take_node().unwrap(),
        tree("items", vec![leaf("a"), leaf("b"), leaf("c")])
    );
}

#[test]
fn test_reference_with_arguments() {
    // wrap(v) ::= { pair(v) };  start ::= IDENT wrap(x)
    let mut p = Parser::new(BasicLexer::new("q"), TestFactory::new(&["pair"]));
    p.add_definition(NamedDefinition::with_args(
        "wrap",
        &["v"],
        ParseRule::action(AstNode::construct("pair", vec![AstNode::var("v")])),
    ));
    p.add_definition(NamedDefinition::new(
        "start",
        ParseRule::seq_named(
            "x",
            ParseRule::token(TOKEN_IDENTIFIER),
            ParseRule::seq_named(
                "r",
                ParseRule::reference_with_args("wrap", &["x"]),
                ParseRule::action(AstNode::construct("pair", vec![AstNode::var("r")])),
            ),
        ),
    ));
    p.init().unwrap();
    let mut result = p.parse_named("start");
    assert_eq!(
        result.take_node().unwrap(),
        tree("pair", vec![tree("pair", vec![leaf("q")])])
    );
}

#[test]
fn test_init_rejects_undefined_reference() {
    let mut p = Parser::new(BasicLexer::new(""), TestFactory::new(&[]));
    p.add_definition(NamedDefinition::new("start", ParseRule::reference("ghost")));
    let errors = p.init().unwrap_err();
    assert!(errors.contains(&GrammarError::UndefinedRule {
        name: "ghost".to_string()
    }));
}

#[test]
fn test_init_rejects_undefined_name_in_action() {
    let mut p = Parser::new(BasicLexer::new(""), TestFactory::new(&["f"]));
    p.add_definition(NamedDefinition::new(
        "start",
        ParseRule::seq(
            ParseRule::token_skip(TOKEN_NUMBER),
            ParseRule::action(AstNode::construct("f", vec![AstNode::var("missing")])),
        ),
    ));
    let errors = p.init().unwrap_err();
    assert!(errors.contains(&GrammarError::UndefinedName {
        name: "missing".to_string()
    }));
}

#[test]
fn test_init_rejects_empty_alternative_first() {
    // An alternative that can match empty hides everything after it.
    let mut p = Parser::new(BasicLexer::new(""), TestFactory::new(&[]));
    p.add_definition(NamedDefinition::new(
        "start",
        ParseRule::option(ParseRule::None, ParseRule::token(TOKEN_NUMBER)),
    ));
    let errors = p.init().unwrap_err();
    assert!(errors
        .iter()
        .any(|e| matches!(e, GrammarError::EmptyAlternative { .. })));
}

#[test]
fn test_init_rejects_arity_mismatch() {
    let mut p = Parser::new(BasicLexer::new(""), TestFactory::new(&["f"]));
    p.add_definition(NamedDefinition::with_args(
        "wrap",
        &["a", "b"],
        ParseRule::action(AstNode::construct(
            "f",
            vec![AstNode::var("a"), AstNode::var("b")],
        )),
    ));
    p.add_definition(NamedDefinition::new(
        "start",
        ParseRule::seq_named(
            "x",
            ParseRule::token(TOKEN_IDENTIFIER),
            ParseRule::reference_with_args("wrap", &["x"]),
        ),
    ));
    let errors = p.init().unwrap_err();
    assert!(errors.contains(&GrammarError::ArityMismatch {
        name: "wrap".to_string(),
        expected: 2,
        found: 1
    }));
}

#[test]
fn test_init_collects_multiple_errors() {
    let mut p = Parser::new(BasicLexer::new(""), TestFactory::new(&[]));
    p.add_definition(NamedDefinition::new("a", ParseRule::reference("ghost")));
    p.add_definition(NamedDefinition::new(
        "b",
        ParseRule::action(AstNode::construct("nope", vec![])),
    ));
    let errors = p.init().unwrap_err();
    assert!(errors.len() >= 2);
}

#[test]
fn test_print_syntax_lists_definitions() {
    let p = {
        let mut p = arith_parser("");
        p.init().unwrap();
        p
    };
    let text = p.print_syntax();
    assert!(text.contains("term ::="));
    assert!(text.contains("expr ::="));
}
