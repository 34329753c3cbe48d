//! A small reference lexer.
//!
//! The parser engine only depends on the [`Lexer`] trait; this
//! implementation exists so the engine is usable without bringing your own
//! tokenizer. It recognizes identifiers, integer literals, double-quoted
//! strings, and single-character punctuation, and keeps a keyword registry
//! so grammar initialization can turn keyword rules into token ids.

use hashbrown::HashMap;

use super::token::{
    Lexer, Span, Token, TOKEN_EOF, TOKEN_FIRST_KEYWORD, TOKEN_IDENTIFIER, TOKEN_NUMBER,
    TOKEN_STRING,
};

/// Byte-offset scanner over a source string with unbounded lookahead.
pub struct BasicLexer<'s> {
    source: &'s str,
    pos: usize,
    /// Tokens scanned ahead of the cursor; index 0 is the next token.
    lookahead: Vec<Token<'s>>,
    /// Registered keyword/punctuation spellings, by id offset.
    keywords: Vec<String>,
    keyword_ids: HashMap<String, u32>,
}

impl<'s> BasicLexer<'s> {
    pub fn new(source: &'s str) -> Self {
        BasicLexer {
            source,
            pos: 0,
            lookahead: Vec::new(),
            keywords: Vec::new(),
            keyword_ids: HashMap::new(),
        }
    }

    fn bytes(&self) -> &'s [u8] {
        self.source.as_bytes()
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.source.len() && self.bytes()[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    /// Scan the next token from the source. Identifier-shaped text that
    /// matches a registered keyword is reported with the keyword's id, as
    /// is registered punctuation.
    fn scan(&mut self) -> Token<'s> {
        self.skip_whitespace();
        let start = self.pos;
        let bytes = self.bytes();
        if start >= bytes.len() {
            return Token::eof(Span::new(start, start));
        }

        let c = bytes[start];
        if c.is_ascii_alphabetic() || c == b'_' {
            let mut end = start + 1;
            while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                end += 1;
            }
            self.pos = end;
            let text = &self.source[start..end];
            let id = match self.keyword_ids.get(text) {
                Some(&id) => id,
                None => TOKEN_IDENTIFIER,
            };
            return Token {
                id,
                text,
                span: Span::new(start, end),
            };
        }

        if c.is_ascii_digit() {
            let mut end = start + 1;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            self.pos = end;
            return Token {
                id: TOKEN_NUMBER,
                text: &self.source[start..end],
                span: Span::new(start, end),
            };
        }

        if c == b'"' {
            let mut end = start + 1;
            while end < bytes.len() && bytes[end] != b'"' {
                end += 1;
            }
            // An unterminated string runs to end of input; the text
            // excludes the quotes either way.
            let close = end.min(bytes.len());
            self.pos = (close + 1).min(bytes.len());
            return Token {
                id: TOKEN_STRING,
                text: &self.source[start + 1..close],
                span: Span::new(start, self.pos),
            };
        }

        // Single-character punctuation. Only registered punctuation gets a
        // meaningful id; anything else is reported with the EOF id so that
        // no grammar rule accepts it and the parser reports a syntax error.
        let end = start + 1;
        self.pos = end;
        let text = &self.source[start..end];
        let id = self.keyword_ids.get(text).copied().unwrap_or(TOKEN_EOF);
        Token {
            id,
            text,
            span: Span::new(start, end),
        }
    }

    fn fill_to(&mut self, i: usize) {
        while self.lookahead.len() <= i {
            let t = self.scan();
            self.lookahead.push(t);
        }
    }
}

impl<'s> Lexer<'s> for BasicLexer<'s> {
    fn look(&mut self, i: usize) -> Token<'s> {
        self.fill_to(i);
        self.lookahead[i]
    }

    fn consume(&mut self) {
        self.fill_to(0);
        self.lookahead.remove(0);
    }

    fn register_keyword(&mut self, text: &str) -> u32 {
        if let Some(&id) = self.keyword_ids.get(text) {
            return id;
        }
        let id = TOKEN_FIRST_KEYWORD + self.keywords.len() as u32;
        self.keywords.push(text.to_string());
        self.keyword_ids.insert(text.to_string(), id);
        // Already-buffered identifier tokens may now be keywords.
        for tok in &mut self.lookahead {
            if tok.id == TOKEN_IDENTIFIER && tok.text == text {
                tok.id = id;
            }
        }
        id
    }

    fn lookup_token_id(&self, text: &str) -> u32 {
        self.keyword_ids.get(text).copied().unwrap_or(0)
    }

    fn token_id_string(&self, id: u32) -> &str {
        match id {
            TOKEN_EOF => "end of input",
            TOKEN_IDENTIFIER => "identifier",
            TOKEN_NUMBER => "number",
            TOKEN_STRING => "string",
            _ => {
                let idx = (id - TOKEN_FIRST_KEYWORD) as usize;
                self.keywords.get(idx).map(|s| s.as_str()).unwrap_or("?")
            }
        }
    }
}
