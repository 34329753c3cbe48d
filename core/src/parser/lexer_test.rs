use super::lexer::BasicLexer;
use super::token::{Lexer, TOKEN_EOF, TOKEN_IDENTIFIER, TOKEN_NUMBER, TOKEN_STRING};

#[test]
fn test_basic_tokens() {
    let mut lx = BasicLexer::new("foo 42 \"bar\"");
    assert_eq!(lx.look(0).id, TOKEN_IDENTIFIER);
    assert_eq!(lx.look(0).text, "foo");
    assert_eq!(lx.look(1).id, TOKEN_NUMBER);
    assert_eq!(lx.look(1).text, "42");
    assert_eq!(lx.look(2).id, TOKEN_STRING);
    assert_eq!(lx.look(2).text, "bar");
    assert_eq!(lx.look(3).id, TOKEN_EOF);

    lx.consume();
    assert_eq!(lx.look(0).text, "42");
}

#[test]
fn test_eof_is_sticky() {
    let mut lx = BasicLexer::new("x");
    lx.consume();
    assert!(lx.look(0).is_eof());
    assert!(lx.look(5).is_eof());
    lx.consume();
    assert!(lx.look(0).is_eof());
}

#[test]
fn test_keyword_registration() {
    let mut lx = BasicLexer::new("if x if");
    let id = lx.register_keyword("if");
    assert_eq!(lx.register_keyword("if"), id);
    assert_eq!(lx.lookup_token_id("if"), id);
    assert_eq!(lx.lookup_token_id("while"), 0);
    assert_eq!(lx.token_id_string(id), "if");

    assert_eq!(lx.look(0).id, id);
    assert_eq!(lx.look(1).id, TOKEN_IDENTIFIER);
    assert_eq!(lx.look(2).id, id);
}

#[test]
fn test_keyword_applies_to_buffered_lookahead() {
    let mut lx = BasicLexer::new("while x");
    // Buffer the token as an identifier first.
    assert_eq!(lx.look(0).id, TOKEN_IDENTIFIER);
    let id = lx.register_keyword("while");
    assert_eq!(lx.look(0).id, id);
}

#[test]
fn test_punctuation() {
    let mut lx = BasicLexer::new("1+2");
    let plus = lx.register_keyword("+");
    assert_eq!(lx.look(0).id, TOKEN_NUMBER);
    assert_eq!(lx.look(1).id, plus);
    assert_eq!(lx.look(2).id, TOKEN_NUMBER);
}

#[test]
fn test_spans_are_byte_offsets() {
    let mut lx = BasicLexer::new("ab  12");
    let t0 = lx.look(0);
    assert_eq!((t0.span.start, t0.span.end), (0, 2));
    let t1 = lx.look(1);
    assert_eq!((t1.span.start, t1.span.end), (4, 6));
}
