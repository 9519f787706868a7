//! On-demand scanner: the compiler pulls one token at a time, which lets
//! the scanner track string interpolation state between tokens.

use crate::lexer::token::{Literal, Token, TokenKind};

/// Maximum nesting of `${...}` inside strings.
pub const MAX_STR_INTERP_DEPTH: usize = 8;

/// Longest binary literal, in digits.
const MAX_BIN_DIGITS: usize = 64;

/// Longest hex literal, in digits.
const MAX_HEX_DIGITS: usize = 16;

/// Whether a lexing diagnostic stops the parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexErrorKind {
    Syntax,
    Semantic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub kind: LexErrorKind,
    pub line: u32,
    pub message: String,
}

pub struct Scanner<'a> {
    source: &'a str,
    pos: usize,
    line: u32,
    token_start: usize,
    token_line: u32,
    finished: bool,

    /// Depth of `${` interpolation we're inside; 0 outside of any.
    si_depth: usize,
    /// Unclosed `{` per interpolation depth, so the `}` that ends the
    /// expression can be told apart from one that belongs to it.
    si_open_brace: [u32; MAX_STR_INTERP_DEPTH],
    /// Quote of the string each depth continues into.
    si_quote: [char; MAX_STR_INTERP_DEPTH],
    /// While lexing `"... $name ..."`, where the name ends.
    si_name_end: Option<usize>,
    si_name_quote: char,

    errors: Vec<LexError>,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        let pos = if source.starts_with('\u{feff}') { 3 } else { 0 };
        Self {
            source,
            pos,
            line: 1,
            token_start: pos,
            token_line: 1,
            finished: false,
            si_depth: 0,
            si_open_brace: [0; MAX_STR_INTERP_DEPTH],
            si_quote: ['"'; MAX_STR_INTERP_DEPTH],
            si_name_end: None,
            si_name_quote: '"',
            errors: Vec::new(),
        }
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    /// Diagnostics produced since the last call.
    pub fn take_errors(&mut self) -> Vec<LexError> {
        std::mem::take(&mut self.errors)
    }

    /// Scan every remaining token, up to and including `Eof`.
    pub fn scan_tokens(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        tokens
    }

    /// Scan the next token. Returns `Eof` forever once the source ends.
    pub fn next_token(&mut self) -> Token {
        if self.finished {
            return Token::eof(self.pos, self.line);
        }

        while let Some(c) = self.peek() {
            self.token_start = self.pos;
            self.token_line = self.line;

            // "Hello $name!"
            //             ^ the name ends here, the string continues.
            if let Some(end) = self.si_name_end {
                if self.pos >= end {
                    self.si_name_end = None;
                    let quote = self.si_name_quote;
                    return self.eat_string(quote);
                }
            }

            self.advance();
            match c {
                '{' => {
                    if self.si_depth > 0 {
                        self.si_open_brace[self.si_depth - 1] += 1;
                    }
                    return self.make_token(TokenKind::LBrace);
                }
                '}' => {
                    if self.si_depth > 0 {
                        let depth = self.si_depth - 1;
                        if self.si_open_brace[depth] == 0 {
                            let quote = self.si_quote[depth];
                            self.si_depth -= 1;
                            return self.eat_string(quote);
                        }
                        self.si_open_brace[depth] -= 1;
                    }
                    return self.make_token(TokenKind::RBrace);
                }
                ',' => return self.make_token(TokenKind::Comma),
                ':' => return self.make_token(TokenKind::Colon),
                ';' => return self.make_token(TokenKind::Semicolon),
                '#' => self.skip_line_comment(),
                '(' => return self.make_token(TokenKind::LParen),
                ')' => return self.make_token(TokenKind::RParen),
                '[' => return self.make_token(TokenKind::LBracket),
                ']' => return self.make_token(TokenKind::RBracket),
                '%' => return self.two_char_token('=', TokenKind::Percent, TokenKind::PercentEq),
                '~' => return self.make_token(TokenKind::Tilde),
                '&' => return self.two_char_token('=', TokenKind::Amp, TokenKind::AmpEq),
                '|' => return self.two_char_token('=', TokenKind::Pipe, TokenKind::PipeEq),
                '^' => return self.two_char_token('=', TokenKind::Caret, TokenKind::CaretEq),
                '\n' => return self.make_token(TokenKind::Line),
                ' ' | '\t' | '\r' => {
                    while matches!(self.peek(), Some(' ' | '\t' | '\r')) {
                        self.advance();
                    }
                }
                '.' => {
                    if self.match_char('.') {
                        return self.make_token(TokenKind::DotDot);
                    }
                    if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                        return self.eat_number('.');
                    }
                    return self.make_token(TokenKind::Dot);
                }
                '=' => return self.two_char_token('=', TokenKind::Eq, TokenKind::EqEq),
                '!' => return self.two_char_token('=', TokenKind::Not, TokenKind::NotEq),
                '>' => {
                    if self.match_char('>') {
                        return self.two_char_token(
                            '=',
                            TokenKind::ShiftRight,
                            TokenKind::ShiftRightEq,
                        );
                    }
                    return self.two_char_token('=', TokenKind::Gt, TokenKind::GtEq);
                }
                '<' => {
                    if self.match_char('<') {
                        return self.two_char_token(
                            '=',
                            TokenKind::ShiftLeft,
                            TokenKind::ShiftLeftEq,
                        );
                    }
                    return self.two_char_token('=', TokenKind::Lt, TokenKind::LtEq);
                }
                '+' => return self.two_char_token('=', TokenKind::Plus, TokenKind::PlusEq),
                '-' => {
                    if self.match_char('=') {
                        return self.make_token(TokenKind::MinusEq);
                    }
                    if self.match_char('>') {
                        return self.make_token(TokenKind::Arrow);
                    }
                    return self.make_token(TokenKind::Minus);
                }
                '*' => {
                    if self.match_char('*') {
                        return self.two_char_token(
                            '=',
                            TokenKind::StarStar,
                            TokenKind::StarStarEq,
                        );
                    }
                    return self.two_char_token('=', TokenKind::Star, TokenKind::StarEq);
                }
                '/' => return self.two_char_token('=', TokenKind::Slash, TokenKind::SlashEq),
                '"' => return self.eat_string('"'),
                '\'' => return self.eat_string('\''),
                c if c.is_ascii_digit() => return self.eat_number(c),
                c if is_name_start(c) => return self.eat_name(),
                c => {
                    let message = if (' '..='~').contains(&c) {
                        format!("Invalid character '{}'", c)
                    } else {
                        let mut bytes = [0u8; 4];
                        format!("Invalid byte 0x{:x}", c.encode_utf8(&mut bytes).as_bytes()[0])
                    };
                    self.syntax_error(message);
                    return self.make_token(TokenKind::Error);
                }
            }
        }

        self.token_start = self.pos;
        self.token_line = self.line;
        self.finished = true;
        Token::eof(self.pos, self.line)
    }

    fn eat_name(&mut self) -> Token {
        while self.peek().is_some_and(is_name_char) {
            self.advance();
        }
        let text = &self.source[self.token_start..self.pos];
        let kind = TokenKind::keyword(text).unwrap_or(TokenKind::Name);
        self.make_token(kind)
    }

    /// Lex a number whose first char (`first`) was already consumed.
    fn eat_number(&mut self, first: char) -> Token {
        if first == '0' && matches!(self.peek(), Some('b' | 'B')) {
            self.advance();
            return self.eat_radix_number(2, MAX_BIN_DIGITS, "binary", "Binary");
        }
        if first == '0' && matches!(self.peek(), Some('x' | 'X')) {
            self.advance();
            return self.eat_radix_number(16, MAX_HEX_DIGITS, "hex", "Hex");
        }

        if first == '.' {
            // The point is consumed; the fraction follows.
            self.skip_digits();
        } else {
            self.skip_digits();
            if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
                self.skip_digits();
            }
        }

        if self.match_char('e') || self.match_char('E') {
            if matches!(self.peek(), Some('+' | '-')) {
                self.advance();
            }
            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.syntax_error("Invalid number literal.");
                return self.make_token(TokenKind::Error);
            }
            self.skip_digits();
        }

        let text = &self.source[self.token_start..self.pos];
        let value = match text.parse::<f64>() {
            Ok(value) if value.is_finite() => value,
            _ => {
                let message = format!("Number literal is too large ({}).", text);
                self.semantic_error(message);
                0.0
            }
        };
        self.literal_token(TokenKind::Number, Literal::Number(value))
    }

    fn eat_radix_number(
        &mut self,
        radix: u32,
        max_digits: usize,
        lower: &str,
        title: &str,
    ) -> Token {
        if !self.peek().is_some_and(|c| c.is_digit(radix)) {
            self.syntax_error(format!("Invalid {} literal.", lower));
            return self.make_token(TokenKind::Error);
        }

        let mut value: u64 = 0;
        let mut digits = 0;
        while let Some(digit) = self.peek().and_then(|c| c.to_digit(radix)) {
            self.advance();
            digits += 1;
            if digits > max_digits {
                self.semantic_error(format!("{} literal is too long.", title));
                break;
            }
            value = (value << radix.trailing_zeros()) | digit as u64;
        }
        self.literal_token(TokenKind::Number, Literal::Number(value as f64))
    }

    /// Lex the body of a string after its opening quote (or after the end of
    /// an interpolated name or expression).
    fn eat_string(&mut self, quote: char) -> Token {
        let mut value = String::new();
        let mut kind = TokenKind::String;

        loop {
            let Some(c) = self.advance() else {
                self.syntax_error("Non terminated string.");
                return self.make_token(TokenKind::Error);
            };

            if c == quote {
                break;
            }

            if c == '$' {
                if self.si_depth < MAX_STR_INTERP_DEPTH {
                    kind = TokenKind::StringInterp;
                    if self.peek() == Some('{') {
                        self.advance();
                        self.si_depth += 1;
                        self.si_quote[self.si_depth - 1] = quote;
                        self.si_open_brace[self.si_depth - 1] = 0;
                    } else if self.peek().is_some_and(is_name_start) {
                        let mut end = self.pos;
                        for c in self.source[self.pos..].chars() {
                            if !is_name_char(c) {
                                break;
                            }
                            end += c.len_utf8();
                        }
                        self.si_name_end = Some(end);
                        self.si_name_quote = quote;
                    } else {
                        self.syntax_error("Expected '{' or identifier after '$'.");
                        return self.make_token(TokenKind::Error);
                    }
                } else {
                    self.semantic_error(format!(
                        "Maximum interpolation level reached (can only interpolate upto depth {}).",
                        MAX_STR_INTERP_DEPTH
                    ));
                }
                break;
            }

            if c != '\\' {
                value.push(c);
                continue;
            }

            match self.advance() {
                Some('"') => value.push('"'),
                Some('\'') => value.push('\''),
                Some('\\') => value.push('\\'),
                Some('n') => value.push('\n'),
                Some('r') => value.push('\r'),
                Some('t') => value.push('\t'),
                Some('$') => value.push('$'),
                Some('\n') => {}
                Some('\r') if self.match_char('\n') => {}
                Some('x') => {
                    let high = self.advance().and_then(|c| c.to_digit(16));
                    let Some(high) = high else {
                        self.semantic_error("Invalid hex escape.");
                        continue;
                    };
                    let low = self.advance().and_then(|c| c.to_digit(16));
                    let Some(low) = low else {
                        self.semantic_error("Invalid hex escape.");
                        continue;
                    };
                    if let Some(c) = char::from_u32((high << 4) | low) {
                        value.push(c);
                    }
                }
                None => {
                    self.syntax_error("Non terminated string.");
                    return self.make_token(TokenKind::Error);
                }
                Some(_) => self.semantic_error("Invalid escape character."),
            }
        }

        self.literal_token(kind, Literal::Str(value))
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                return;
            }
            self.advance();
        }
    }

    fn skip_digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        let mut chars = self.source[self.pos..].chars();
        chars.next()?;
        chars.next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn two_char_token(&mut self, second: char, one: TokenKind, two: TokenKind) -> Token {
        if self.match_char(second) {
            self.make_token(two)
        } else {
            self.make_token(one)
        }
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(
            kind,
            self.token_start,
            self.pos - self.token_start,
            self.token_line,
        )
    }

    fn literal_token(&self, kind: TokenKind, literal: Literal) -> Token {
        let mut token = self.make_token(kind);
        token.literal = literal;
        token
    }

    fn syntax_error(&mut self, message: impl Into<String>) {
        self.errors.push(LexError {
            kind: LexErrorKind::Syntax,
            line: self.line,
            message: message.into(),
        });
    }

    fn semantic_error(&mut self, message: impl Into<String>) {
        self.errors.push(LexError {
            kind: LexErrorKind::Semantic,
            line: self.line,
            message: message.into(),
        });
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
