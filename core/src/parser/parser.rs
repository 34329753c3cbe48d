//! The combinator engine: grammar validation and the parse interpreter.

use core::fmt::Write as _;
use core::mem;

use hashbrown::HashMap;
use smallvec::SmallVec;

use super::ast::AstNode;
use super::astack::AbstractStack;
use super::error::{GrammarError, SyntaxError};
use super::grammar::{NamedDefinition, ParseRule, NO_TARGET};
use super::result::{ParseResult, ResultStack};
use super::token::{Lexer, Token};

/// Host-side factory for AST nodes.
///
/// The parser does not know the host's node type; grammar actions call
/// [`AstFactory::make_expr`] to mint one from an opcode and previously
/// parsed results. Opcode names appearing in actions are resolved once,
/// during grammar initialization.
pub trait AstFactory {
    type Node;

    /// Resolve an opcode name used in a grammar action.
    fn opcode_for(&self, name: &str) -> Option<u32>;

    /// Construct a node. `args` holds the action's evaluated arguments;
    /// the factory moves out of them.
    fn make_expr<'s>(
        &mut self,
        opcode: u32,
        args: &mut [ParseResult<'s, Self::Node>],
    ) -> ParseResult<'s, Self::Node>;
}

/// The LL(k) combinator parser.
///
/// Lifecycle: [`Parser::add_definition`] registers top-level rules,
/// [`Parser::init`] validates everything (keywords registered, references
/// resolved, frame sizes computed), then [`Parser::parse`] interprets a
/// start definition against the lexer's token stream.
pub struct Parser<'s, L: Lexer<'s>, F: AstFactory> {
    lexer: L,
    factory: F,
    definitions: Vec<NamedDefinition>,
    by_name: HashMap<String, usize>,
    initialized: bool,
    error: Option<SyntaxError>,
    trace: bool,
    trace_validate: bool,
    _source: core::marker::PhantomData<&'s ()>,
}

impl<'s, L: Lexer<'s>, F: AstFactory> Parser<'s, L, F> {
    pub fn new(lexer: L, factory: F) -> Self {
        Parser {
            lexer,
            factory,
            definitions: Vec::new(),
            by_name: HashMap::new(),
            initialized: false,
            error: None,
            trace: false,
            trace_validate: false,
            _source: core::marker::PhantomData,
        }
    }

    /// Trace rule dispatch during parsing.
    pub fn set_trace(&mut self, on: bool) {
        self.trace = on;
    }

    /// Trace the validation walk during `init`. Independent of
    /// [`Parser::set_trace`].
    pub fn set_trace_validate(&mut self, on: bool) {
        self.trace_validate = on;
    }

    /// Register a top-level definition, returning its index. Definitions
    /// with non-empty names are also indexed by name.
    pub fn add_definition(&mut self, def: NamedDefinition) -> usize {
        let index = self.definitions.len();
        if !def.name.is_empty() {
            self.by_name.insert(def.name.clone(), index);
        }
        self.definitions.push(def);
        index
    }

    pub fn find_definition(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// The first syntax error of the last `parse` call, if any.
    pub fn syntax_error(&self) -> Option<&SyntaxError> {
        self.error.as_ref()
    }

    /// Render every registered definition as grammar text.
    pub fn print_syntax(&self) -> String {
        let mut out = String::new();
        for def in &self.definitions {
            let _ = writeln!(out, "{def}");
        }
        out
    }

    /// Validate every registered definition.
    ///
    /// Registers keywords with the lexer, resolves references to
    /// definition indices and action names to stack indices/opcodes, and
    /// computes frame sizes. All errors are collected so a single run
    /// reports full diagnostic coverage; any error means no parse may be
    /// attempted.
    pub fn init(&mut self) -> Result<(), Vec<GrammarError>> {
        let arg_counts: Vec<usize> = self
            .definitions
            .iter()
            .map(|d| d.arg_names.len())
            .collect();
        let mut errors = Vec::new();

        for i in 0..self.definitions.len() {
            let mut body = mem::take(&mut self.definitions[i].body);
            let name = self.definitions[i].name.clone();
            if self.trace_validate {
                tracing::trace!(definition = %name, "validate");
            }

            let mut stack = AbstractStack::new();
            for arg in &self.definitions[i].arg_names {
                stack.push(arg);
            }
            let saved = stack.enter_block();
            {
                let mut v = Validator {
                    lexer: &mut self.lexer,
                    factory: &self.factory,
                    by_name: &self.by_name,
                    arg_counts: &arg_counts,
                    errors: &mut errors,
                    stack: &mut stack,
                    context: name.clone(),
                    trace: self.trace_validate,
                    _marker: std::marker::PhantomData,
                };
                v.walk(&mut body);
            }
            if stack.local_size() != 1 {
                errors.push(GrammarError::UnbalancedDefinition { name });
            }
            stack.exit_block(saved);
            self.definitions[i].body = body;
        }

        if errors.is_empty() {
            self.initialized = true;
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Parse input starting from definition `start` (which must take no
    /// arguments). Returns the single result left on the stack, or an
    /// empty result on failure; the first syntax error stays queryable via
    /// [`Parser::syntax_error`].
    pub fn parse(&mut self, start: usize) -> ParseResult<'s, F::Node> {
        debug_assert!(self.initialized, "parse before init");
        debug_assert!(
            self.definitions[start].arg_names.is_empty(),
            "start definition must not take arguments"
        );
        self.error = None;

        let mut machine = Machine {
            lexer: &mut self.lexer,
            factory: &mut self.factory,
            defs: &self.definitions,
            stack: ResultStack::new(),
            error: None,
            trace: self.trace,
        };
        let ok = machine.run(&self.definitions[start].body).is_ok();
        self.error = machine.error;

        if !ok {
            return ParseResult::None;
        }
        debug_assert_eq!(machine.stack.len(), 1, "parse must leave one result");
        machine.stack.pop().unwrap_or(ParseResult::None)
    }

    /// Like [`Parser::parse`], starting from a definition by name.
    pub fn parse_named(&mut self, name: &str) -> ParseResult<'s, F::Node> {
        match self.find_definition(name) {
            Some(i) => self.parse(i),
            None => ParseResult::None,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

struct Validator<'v, 's, L: Lexer<'s>, F: AstFactory> {
    lexer: &'v mut L,
    factory: &'v F,
    by_name: &'v HashMap<String, usize>,
    arg_counts: &'v [usize],
    errors: &'v mut Vec<GrammarError>,
    stack: &'v mut AbstractStack,
    context: String,
    trace: bool,
    _marker: std::marker::PhantomData<&'s ()>,
}

impl<'v, 's, L: Lexer<'s>, F: AstFactory> Validator<'v, 's, L, F> {
    /// Walk one rule, mirroring the runtime stack effect on the abstract
    /// stack and filling in the rule's resolved fields.
    fn walk(&mut self, rule: &mut ParseRule) {
        if self.trace {
            tracing::trace!(rule = %rule, size = self.stack.size(), "validate rule");
        }
        match rule {
            ParseRule::None => {}

            ParseRule::Token { skip, .. } => {
                if !*skip {
                    self.stack.push("");
                }
            }

            ParseRule::Keyword { text, token_id } => {
                *token_id = self.lexer.register_keyword(text);
            }

            ParseRule::Sequence {
                let_name,
                first,
                second,
            } => {
                let before = self.stack.local_size();
                self.walk(first);
                if let Some(name) = let_name {
                    if self.stack.local_size() > before {
                        self.stack.name_top(name);
                    } else {
                        self.errors
                            .push(GrammarError::LetOnEmptyRule { name: name.clone() });
                    }
                }
                self.walk(second);
            }

            ParseRule::Option { left, right } => {
                let s0 = self.stack.local_size();
                if matches_empty(left) {
                    self.errors.push(GrammarError::EmptyAlternative {
                        context: self.context.clone(),
                    });
                }
                self.walk(left);
                if self.stack.local_size() != s0 + 1 {
                    self.errors.push(GrammarError::UnbalancedAlternative {
                        context: self.context.clone(),
                    });
                }
                self.stack.rewind(s0);
                match right.as_mut() {
                    // A trailing empty alternative matches nothing and
                    // pushes an empty result at parse time.
                    ParseRule::None => self.stack.push(""),
                    r => {
                        self.walk(r);
                        if self.stack.local_size() != s0 + 1 {
                            self.errors.push(GrammarError::UnbalancedAlternative {
                                context: self.context.clone(),
                            });
                        }
                    }
                }
            }

            ParseRule::RecurseLeft {
                let_name,
                base,
                rest,
            } => {
                let s0 = self.stack.local_size();
                self.walk(base);
                if self.stack.local_size() != s0 + 1 {
                    self.errors.push(GrammarError::UnbalancedIteration {
                        context: self.context.clone(),
                    });
                }
                if let Some(name) = let_name {
                    self.stack.name_top(name);
                }
                // One iteration must consume the accumulator and leave
                // exactly one accumulated result in its place.
                let s1 = self.stack.local_size();
                self.walk(rest);
                if self.stack.local_size() != s1 {
                    self.errors.push(GrammarError::UnbalancedIteration {
                        context: self.context.clone(),
                    });
                }
            }

            ParseRule::Reference {
                name,
                arg_names,
                target,
                arg_indices,
                frame_size,
            } => {
                match self.by_name.get(name) {
                    Some(&t) => {
                        *target = t;
                        let expected = self.arg_counts[t];
                        if expected != arg_names.len() {
                            self.errors.push(GrammarError::ArityMismatch {
                                name: name.clone(),
                                expected,
                                found: arg_names.len(),
                            });
                        }
                    }
                    None => {
                        self.errors
                            .push(GrammarError::UndefinedRule { name: name.clone() });
                        *target = NO_TARGET;
                    }
                }
                arg_indices.clear();
                for arg in arg_names.iter() {
                    match self.stack.index_of(arg) {
                        Some(i) => {
                            arg_indices.push(i);
                            // The argument is moved into the callee frame;
                            // the slot left behind is no longer nameable.
                            self.stack.consume(i);
                        }
                        None => {
                            self.errors
                                .push(GrammarError::UndefinedName { name: arg.clone() });
                            arg_indices.push(0);
                        }
                    }
                }
                *frame_size = self.stack.size() as u32;
                self.stack.push("");
            }

            ParseRule::Action {
                body,
                frame_size,
                drop,
            } => {
                self.resolve_ast(body);
                *frame_size = self.stack.size() as u32;
                *drop = self.stack.local_size() as u32;
                self.stack.rewind(0);
                self.stack.push("");
            }
        }
    }

    fn resolve_ast(&mut self, node: &mut AstNode) {
        match node {
            AstNode::Variable { name, index } => match self.stack.index_of(name) {
                Some(i) => *index = i,
                None => {
                    self.errors
                        .push(GrammarError::UndefinedName { name: name.clone() });
                }
            },
            AstNode::Construct { name, opcode, args } => {
                match self.factory.opcode_for(name) {
                    Some(op) => *opcode = op,
                    None => {
                        self.errors
                            .push(GrammarError::UnknownOpcode { name: name.clone() });
                    }
                }
                for a in args {
                    self.resolve_ast(a);
                }
            }
            AstNode::EmptyList => {}
            AstNode::Append { list, item } => {
                if !matches!(
                    list.as_ref(),
                    AstNode::EmptyList | AstNode::Append { .. } | AstNode::Variable { .. }
                ) {
                    self.errors.push(GrammarError::MalformedListExpr {
                        context: self.context.clone(),
                    });
                }
                self.resolve_ast(list);
                self.resolve_ast(item);
            }
        }
    }
}

/// Whether a rule can match without consuming a token.
fn matches_empty(rule: &ParseRule) -> bool {
    match rule {
        ParseRule::None | ParseRule::Action { .. } => true,
        ParseRule::Token { .. } | ParseRule::Keyword { .. } => false,
        ParseRule::Sequence { first, .. } => matches_empty(first),
        ParseRule::Option { left, right } => matches_empty(left) || matches_empty(right),
        ParseRule::RecurseLeft { base, .. } => matches_empty(base),
        // Conservative: reference cycles make the exact answer costly and
        // a false negative only defers the diagnostic to the referenced
        // definition's own validation.
        ParseRule::Reference { .. } => false,
    }
}

// ---------------------------------------------------------------------------
// Parse interpretation
// ---------------------------------------------------------------------------

/// Sentinel unwinding a failed parse; the error itself is sticky on the
/// machine.
struct ParseFailed;

struct Machine<'p, 's, L: Lexer<'s>, F: AstFactory> {
    lexer: &'p mut L,
    factory: &'p mut F,
    defs: &'p [NamedDefinition],
    stack: ResultStack<'s, F::Node>,
    error: Option<SyntaxError>,
    trace: bool,
}

impl<'p, 's, L: Lexer<'s>, F: AstFactory> Machine<'p, 's, L, F> {
    /// Interpret `rule`. Tail positions (a sequence's second element,
    /// option branches, argument-less reference bodies) iterate in place
    /// of recursing, so native recursion depth is bounded by non-tail
    /// nesting.
    fn run(&mut self, start: &'p ParseRule) -> Result<(), ParseFailed> {
        let mut rule = start;
        loop {
            if self.trace {
                tracing::trace!(rule = %rule, stack = self.stack.len(), "parse rule");
            }
            match rule {
                ParseRule::None => return Ok(()),

                ParseRule::Token { token_id, skip } => {
                    let tok = self.lexer.look(0);
                    if tok.id != *token_id {
                        let expected = self.lexer.token_id_string(*token_id).to_string();
                        return self.syntax_error(expected, tok);
                    }
                    if !*skip {
                        self.stack.push_token(tok.text);
                    }
                    self.lexer.consume();
                    return Ok(());
                }

                ParseRule::Keyword { text, token_id } => {
                    let tok = self.lexer.look(0);
                    if tok.id != *token_id {
                        return self.syntax_error(format!("'{text}'"), tok);
                    }
                    self.lexer.consume();
                    return Ok(());
                }

                ParseRule::Sequence { first, second, .. } => {
                    self.run(first)?;
                    rule = second.as_ref();
                }

                ParseRule::Option { left, right } => {
                    let tok = self.lexer.look(0);
                    if self.accepts(left, &tok) {
                        rule = left.as_ref();
                    } else if matches!(right.as_ref(), ParseRule::None) {
                        // Trailing empty alternative: match nothing, leave
                        // an empty slot so the branch shapes agree.
                        self.stack.push(ParseResult::None);
                        return Ok(());
                    } else if self.accepts(right, &tok) {
                        rule = right.as_ref();
                    } else {
                        let expected = self.expected_string(rule);
                        return self.syntax_error(expected, tok);
                    }
                }

                ParseRule::RecurseLeft { base, rest, .. } => {
                    self.run(base)?;
                    loop {
                        let tok = self.lexer.look(0);
                        if !self.accepts(rest, &tok) {
                            return Ok(());
                        }
                        self.run(rest)?;
                    }
                }

                ParseRule::Reference {
                    target,
                    arg_indices,
                    frame_size,
                    ..
                } => {
                    let def = &self.defs[*target];
                    if arg_indices.is_empty() {
                        rule = &def.body;
                    } else {
                        let base = self.stack.len() - *frame_size as usize;
                        for &i in arg_indices.iter() {
                            self.stack.move_and_push(base + i as usize);
                        }
                        self.run(&def.body)?;
                        // The callee left one result above the moved
                        // argument slots.
                        self.stack.drop_keep(arg_indices.len(), 1);
                        return Ok(());
                    }
                }

                ParseRule::Action {
                    body,
                    frame_size,
                    drop,
                } => {
                    let base = self.stack.len() - *frame_size as usize;
                    let result = self.interpret(body, base)?;
                    self.stack.push(result);
                    self.stack.drop_keep(*drop as usize, 1);
                    return Ok(());
                }
            }
        }
    }

    /// Rule-local FIRST-set test.
    fn accepts(&self, rule: &ParseRule, tok: &Token<'s>) -> bool {
        match rule {
            ParseRule::None | ParseRule::Action { .. } => true,
            ParseRule::Token { token_id, .. } | ParseRule::Keyword { token_id, .. } => {
                tok.id == *token_id
            }
            ParseRule::Sequence { first, .. } => self.accepts(first, tok),
            ParseRule::Option { left, right } => {
                self.accepts(left, tok) || self.accepts(right, tok)
            }
            ParseRule::RecurseLeft { base, .. } => self.accepts(base, tok),
            ParseRule::Reference { target, .. } => self.accepts(&self.defs[*target].body, tok),
        }
    }

    fn interpret(
        &mut self,
        node: &AstNode,
        base: usize,
    ) -> Result<ParseResult<'s, F::Node>, ParseFailed> {
        match node {
            AstNode::Variable { index, .. } => Ok(self.stack.take_at(base + *index as usize)),
            AstNode::Construct { opcode, args, .. } => {
                let mut vals: SmallVec<[ParseResult<'s, F::Node>; 4]> = SmallVec::new();
                for a in args {
                    vals.push(self.interpret(a, base)?);
                }
                Ok(self.factory.make_expr(*opcode, &mut vals))
            }
            AstNode::EmptyList => Ok(ParseResult::List(Vec::new())),
            AstNode::Append { list, item } => {
                let list = self.interpret(list, base)?;
                let mut item = self.interpret(item, base)?;
                match list {
                    ParseResult::List(mut items) => {
                        if let Some(n) = item.take_node() {
                            items.push(n);
                        }
                        Ok(ParseResult::List(items))
                    }
                    other => {
                        debug_assert!(false, "append to a non-list result");
                        Ok(other)
                    }
                }
            }
        }
    }

    /// Human-readable FIRST description for error messages.
    fn expected_string(&self, rule: &ParseRule) -> String {
        match rule {
            ParseRule::None => "nothing".to_string(),
            ParseRule::Token { token_id, .. } => self.lexer.token_id_string(*token_id).to_string(),
            ParseRule::Keyword { text, .. } => format!("'{text}'"),
            ParseRule::Sequence { first, .. } => self.expected_string(first),
            ParseRule::Option { left, right } => format!(
                "{} or {}",
                self.expected_string(left),
                self.expected_string(right)
            ),
            ParseRule::RecurseLeft { base, .. } => self.expected_string(base),
            ParseRule::Reference { name, .. } => name.clone(),
            ParseRule::Action { .. } => "nothing".to_string(),
        }
    }

    /// Record the first syntax error and unwind; later errors are
    /// ignored.
    fn syntax_error(&mut self, expected: String, found: Token<'s>) -> Result<(), ParseFailed> {
        if self.error.is_none() {
            let found_text = if found.is_eof() {
                "end of input".to_string()
            } else {
                found.text.to_string()
            };
            tracing::debug!(expected = %expected, found = %found_text, "syntax error");
            self.error = Some(SyntaxError {
                expected,
                found: found_text,
                span: found.span,
            });
        }
        Err(ParseFailed)
    }
}
