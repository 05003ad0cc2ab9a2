// Expression parser: lexer + Pratt parser producing an immutable AST.

use thiserror::Error;

use crate::ast::{AstNode, Comparator, Slice};
use crate::value::Value;

/// Syntax errors. Every variant that corresponds to a point in the source
/// carries the byte offset of the offending character or token.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("unexpected character '{ch}' at position {position}")]
    UnexpectedCharacter { ch: char, position: usize },

    #[error("unterminated string literal starting at position {position}")]
    UnterminatedString { position: usize },

    #[error("unterminated raw-JSON literal starting at position {position}")]
    UnterminatedLiteral { position: usize },

    #[error("invalid raw-JSON literal at position {position}: {text}")]
    InvalidLiteral { text: String, position: usize },

    #[error("invalid number '{text}' at position {position}")]
    InvalidNumber { text: String, position: usize },

    #[error("invalid escape sequence '{sequence}' at position {position}")]
    InvalidEscape { sequence: String, position: usize },

    #[error("'$' must be followed by a variable name at position {position}")]
    InvalidVariable { position: usize },

    #[error("unexpected token {token} at position {position}")]
    UnexpectedToken { token: String, position: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("expected {expected}, found {found} at position {position}")]
    Expected {
        expected: String,
        found: String,
        position: usize,
    },

    #[error("quoted identifier cannot be used as a function name at position {position}")]
    QuotedIdentifierAsFunction { position: usize },

    #[error("expression nesting too deep at position {position}")]
    NestingTooDeep { position: usize },
}

/// Token kinds for the lexer
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    UnquotedIdentifier(String),
    QuotedIdentifier(String),
    RawString(String),
    /// Backtick-delimited raw JSON literal, decoded at lex time.
    JsonLiteral(Value),
    Number(f64),
    Variable(String),

    Dot,
    Star,
    Comma,
    Colon,
    Ampersand,
    At,
    Lbrace,
    Rbrace,
    Lbracket,
    Rbracket,
    Lparen,
    Rparen,
    /// `[]`
    Flatten,
    /// `[?`
    Filter,
    Pipe,
    Or,
    And,
    Not,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    /// `=` in let bindings
    Assign,

    Eof,
}

impl TokenKind {
    fn describe(&self) -> String {
        match self {
            TokenKind::UnquotedIdentifier(s) => format!("identifier '{}'", s),
            TokenKind::QuotedIdentifier(s) => format!("quoted identifier \"{}\"", s),
            TokenKind::RawString(_) => "string literal".to_string(),
            TokenKind::JsonLiteral(_) => "literal".to_string(),
            TokenKind::Number(n) => format!("number {}", n),
            TokenKind::Variable(s) => format!("variable ${}", s),
            TokenKind::Eof => "end of expression".to_string(),
            other => format!("{:?}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character of the token.
    pub position: usize,
}

/// Lexer for tokenizing expressions
pub struct Lexer {
    chars: Vec<char>,
    /// Byte offset of each element of `chars`.
    offsets: Vec<usize>,
    total_len: usize,
    position: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        let mut chars = Vec::with_capacity(input.len());
        let mut offsets = Vec::with_capacity(input.len());
        for (offset, ch) in input.char_indices() {
            chars.push(ch);
            offsets.push(offset);
        }
        Lexer {
            chars,
            offsets,
            total_len: input.len(),
            position: 0,
        }
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.position + offset).copied()
    }

    fn advance(&mut self) {
        if self.position < self.chars.len() {
            self.position += 1;
        }
    }

    /// Byte offset of the current character (input length at EOF).
    fn offset(&self) -> usize {
        self.offsets
            .get(self.position)
            .copied()
            .unwrap_or(self.total_len)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_identifier(&mut self) -> String {
        let start = self.position;
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }
        self.chars[start..self.position].iter().collect()
    }

    /// Quoted identifier: `"..."` with JSON escape rules.
    fn read_quoted(&mut self) -> Result<String, ParseError> {
        let start_offset = self.offset();
        let mut result = String::new();
        self.advance(); // skip opening quote

        loop {
            match self.current() {
                None => {
                    return Err(ParseError::UnterminatedString {
                        position: start_offset,
                    })
                }
                Some('"') => {
                    self.advance();
                    return Ok(result);
                }
                Some('\\') => {
                    let escape_offset = self.offset();
                    self.advance();
                    match self.current() {
                        None => {
                            return Err(ParseError::UnterminatedString {
                                position: start_offset,
                            })
                        }
                        Some('"') => result.push('"'),
                        Some('\\') => result.push('\\'),
                        Some('/') => result.push('/'),
                        Some('b') => result.push('\u{0008}'),
                        Some('f') => result.push('\u{000C}'),
                        Some('n') => result.push('\n'),
                        Some('r') => result.push('\r'),
                        Some('t') => result.push('\t'),
                        Some('u') => {
                            self.advance();
                            let mut hex = String::new();
                            for _ in 0..4 {
                                match self.current() {
                                    Some(h) if h.is_ascii_hexdigit() => {
                                        hex.push(h);
                                        self.advance();
                                    }
                                    _ => {
                                        return Err(ParseError::InvalidEscape {
                                            sequence: format!("\\u{}", hex),
                                            position: escape_offset,
                                        })
                                    }
                                }
                            }
                            let code = u32::from_str_radix(&hex, 16).map_err(|_| {
                                ParseError::InvalidEscape {
                                    sequence: format!("\\u{}", hex),
                                    position: escape_offset,
                                }
                            })?;
                            match char::from_u32(code) {
                                Some(ch) => result.push(ch),
                                None => {
                                    return Err(ParseError::InvalidEscape {
                                        sequence: format!("\\u{}", hex),
                                        position: escape_offset,
                                    })
                                }
                            }
                            continue; // already past the escape
                        }
                        Some(ch) => {
                            return Err(ParseError::InvalidEscape {
                                sequence: format!("\\{}", ch),
                                position: escape_offset,
                            })
                        }
                    }
                    self.advance();
                }
                Some(ch) => {
                    result.push(ch);
                    self.advance();
                }
            }
        }
    }

    /// Raw string: `'...'`. Only `\'` and `\\` are escapes; every other
    /// backslash is kept literally (so `'/\\w+/g'` carries `\w` through to
    /// the regex builtins).
    fn read_raw_string(&mut self) -> Result<String, ParseError> {
        let start_offset = self.offset();
        let mut result = String::new();
        self.advance(); // skip opening quote

        loop {
            match self.current() {
                None => {
                    return Err(ParseError::UnterminatedString {
                        position: start_offset,
                    })
                }
                Some('\'') => {
                    self.advance();
                    return Ok(result);
                }
                Some('\\') => match self.peek(1) {
                    Some('\'') => {
                        result.push('\'');
                        self.advance();
                        self.advance();
                    }
                    Some('\\') => {
                        result.push('\\');
                        self.advance();
                        self.advance();
                    }
                    _ => {
                        result.push('\\');
                        self.advance();
                    }
                },
                Some(ch) => {
                    result.push(ch);
                    self.advance();
                }
            }
        }
    }

    /// Backtick literal: raw JSON text, decoded eagerly.
    fn read_json_literal(&mut self) -> Result<Value, ParseError> {
        let start_offset = self.offset();
        let mut text = String::new();
        self.advance(); // skip opening backtick

        loop {
            match self.current() {
                None => {
                    return Err(ParseError::UnterminatedLiteral {
                        position: start_offset,
                    })
                }
                Some('\\') if self.peek(1) == Some('`') => {
                    text.push('`');
                    self.advance();
                    self.advance();
                }
                Some('`') => {
                    self.advance();
                    return serde_json::from_str::<Value>(&text).map_err(|_| {
                        ParseError::InvalidLiteral {
                            text,
                            position: start_offset,
                        }
                    });
                }
                Some(ch) => {
                    text.push(ch);
                    self.advance();
                }
            }
        }
    }

    fn read_number(&mut self) -> Result<f64, ParseError> {
        let start = self.position;
        let start_offset = self.offset();

        if self.current() == Some('-') {
            self.advance();
        }

        while self.current().map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
        }

        if self.current() == Some('.') && self.peek(1).map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
            while self.current().map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        if matches!(self.current(), Some('e') | Some('E')) {
            let mut lookahead = 1;
            if matches!(self.peek(1), Some('+') | Some('-')) {
                lookahead = 2;
            }
            if self.peek(lookahead).map_or(false, |c| c.is_ascii_digit()) {
                for _ in 0..=lookahead {
                    self.advance();
                }
                while self.current().map_or(false, |c| c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }

        let text: String = self.chars[start..self.position].iter().collect();
        text.parse().map_err(|_| ParseError::InvalidNumber {
            text,
            position: start_offset,
        })
    }

    pub fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_whitespace();
        let position = self.offset();

        let kind = match self.current() {
            None => TokenKind::Eof,

            Some('"') => TokenKind::QuotedIdentifier(self.read_quoted()?),
            Some('\'') => TokenKind::RawString(self.read_raw_string()?),
            Some('`') => TokenKind::JsonLiteral(self.read_json_literal()?),

            Some(ch) if ch.is_ascii_digit() => TokenKind::Number(self.read_number()?),
            Some('-') if self.peek(1).map_or(false, |c| c.is_ascii_digit()) => {
                TokenKind::Number(self.read_number()?)
            }

            Some('$') => {
                self.advance();
                if self
                    .current()
                    .map_or(false, |c| c.is_alphabetic() || c == '_')
                {
                    TokenKind::Variable(self.read_identifier())
                } else {
                    return Err(ParseError::InvalidVariable { position });
                }
            }

            Some('[') => {
                self.advance();
                match self.current() {
                    Some(']') => {
                        self.advance();
                        TokenKind::Flatten
                    }
                    Some('?') => {
                        self.advance();
                        TokenKind::Filter
                    }
                    _ => TokenKind::Lbracket,
                }
            }

            Some('|') => {
                self.advance();
                if self.current() == Some('|') {
                    self.advance();
                    TokenKind::Or
                } else {
                    TokenKind::Pipe
                }
            }
            Some('&') => {
                self.advance();
                if self.current() == Some('&') {
                    self.advance();
                    TokenKind::And
                } else {
                    TokenKind::Ampersand
                }
            }
            Some('!') => {
                self.advance();
                if self.current() == Some('=') {
                    self.advance();
                    TokenKind::Ne
                } else {
                    TokenKind::Not
                }
            }
            Some('=') => {
                self.advance();
                if self.current() == Some('=') {
                    self.advance();
                    TokenKind::Eq
                } else {
                    TokenKind::Assign
                }
            }
            Some('<') => {
                self.advance();
                if self.current() == Some('=') {
                    self.advance();
                    TokenKind::Lte
                } else {
                    TokenKind::Lt
                }
            }
            Some('>') => {
                self.advance();
                if self.current() == Some('=') {
                    self.advance();
                    TokenKind::Gte
                } else {
                    TokenKind::Gt
                }
            }

            Some('.') => {
                self.advance();
                TokenKind::Dot
            }
            Some('*') => {
                self.advance();
                TokenKind::Star
            }
            Some(',') => {
                self.advance();
                TokenKind::Comma
            }
            Some(':') => {
                self.advance();
                TokenKind::Colon
            }
            Some('@') => {
                self.advance();
                TokenKind::At
            }
            Some(']') => {
                self.advance();
                TokenKind::Rbracket
            }
            Some('{') => {
                self.advance();
                TokenKind::Lbrace
            }
            Some('}') => {
                self.advance();
                TokenKind::Rbrace
            }
            Some('(') => {
                self.advance();
                TokenKind::Lparen
            }
            Some(')') => {
                self.advance();
                TokenKind::Rparen
            }

            Some(ch) if ch.is_alphabetic() || ch == '_' => {
                TokenKind::UnquotedIdentifier(self.read_identifier())
            }

            Some(ch) => return Err(ParseError::UnexpectedCharacter { ch, position }),
        };

        Ok(Token { kind, position })
    }

    /// Tokenize the whole input (the parser needs two tokens of lookahead
    /// for forms like `foo[*]`).
    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }
}

// Binding powers. Anything below PROJECTION_STOP terminates the right-hand
// side of a projection.
const BP_PIPE: u8 = 1;
const BP_OR: u8 = 2;
const BP_AND: u8 = 3;
const BP_COMPARATOR: u8 = 5;
const BP_FLATTEN: u8 = 9;
const PROJECTION_STOP: u8 = 10;
const BP_STAR: u8 = 20;
const BP_FILTER: u8 = 21;
const BP_DOT: u8 = 40;
const BP_NOT: u8 = 45;
const BP_LBRACE: u8 = 50;
const BP_LBRACKET: u8 = 55;
const BP_LPAREN: u8 = 60;

const MAX_NESTING_DEPTH: usize = 100;

/// Pratt parser over the token stream
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl Parser {
    pub fn new(expression: &str) -> Result<Self, ParseError> {
        let tokens = Lexer::new(expression).tokenize()?;
        Ok(Parser {
            tokens,
            position: 0,
            depth: 0,
        })
    }

    fn peek(&self, offset: usize) -> &TokenKind {
        self.tokens
            .get(self.position + offset)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn peek_position(&self) -> usize {
        self.tokens
            .get(self.position)
            .map(|t| t.position)
            .unwrap_or(0)
    }

    fn advance(&mut self) -> Token {
        let token = self
            .tokens
            .get(self.position)
            .cloned()
            .unwrap_or(Token {
                kind: TokenKind::Eof,
                position: self.peek_position(),
            });
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn expect(&mut self, expected: &TokenKind) -> Result<(), ParseError> {
        if std::mem::discriminant(self.peek(0)) == std::mem::discriminant(expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.expected_error(&expected.describe()))
        }
    }

    fn expected_error(&self, expected: &str) -> ParseError {
        ParseError::Expected {
            expected: expected.to_string(),
            found: self.peek(0).describe(),
            position: self.peek_position(),
        }
    }

    fn binding_power(kind: &TokenKind) -> u8 {
        match kind {
            TokenKind::Pipe => BP_PIPE,
            TokenKind::Or => BP_OR,
            TokenKind::And => BP_AND,
            TokenKind::Eq
            | TokenKind::Ne
            | TokenKind::Lt
            | TokenKind::Lte
            | TokenKind::Gt
            | TokenKind::Gte => BP_COMPARATOR,
            TokenKind::Flatten => BP_FLATTEN,
            TokenKind::Star => BP_STAR,
            TokenKind::Filter => BP_FILTER,
            TokenKind::Dot => BP_DOT,
            TokenKind::Not => BP_NOT,
            TokenKind::Lbrace => BP_LBRACE,
            TokenKind::Lbracket => BP_LBRACKET,
            TokenKind::Lparen => BP_LPAREN,
            _ => 0,
        }
    }

    pub fn parse(&mut self) -> Result<AstNode, ParseError> {
        let ast = self.expression(0)?;
        match self.peek(0) {
            TokenKind::Eof => Ok(ast),
            other => Err(ParseError::UnexpectedToken {
                token: other.describe(),
                position: self.peek_position(),
            }),
        }
    }

    fn expression(&mut self, rbp: u8) -> Result<AstNode, ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.depth -= 1;
            return Err(ParseError::NestingTooDeep {
                position: self.peek_position(),
            });
        }
        let result = self.expression_inner(rbp);
        self.depth -= 1;
        result
    }

    fn expression_inner(&mut self, rbp: u8) -> Result<AstNode, ParseError> {
        let mut left = self.nud()?;
        while rbp < Self::binding_power(self.peek(0)) {
            left = self.led(left)?;
        }
        Ok(left)
    }

    /// Parse a token in prefix position.
    fn nud(&mut self) -> Result<AstNode, ParseError> {
        let token = self.advance();
        match token.kind {
            TokenKind::JsonLiteral(value) => Ok(AstNode::Literal(value)),
            TokenKind::RawString(s) => Ok(AstNode::Literal(Value::from(s))),
            TokenKind::Number(n) => Ok(AstNode::Literal(Value::Number(n))),

            TokenKind::UnquotedIdentifier(name) => {
                // `let` is contextual: it only opens a let-expression when
                // followed by a variable, so it stays usable as a field name.
                if name == "let" && matches!(self.peek(0), TokenKind::Variable(_)) {
                    self.parse_let_expression()
                } else {
                    Ok(AstNode::Field(name))
                }
            }

            TokenKind::QuotedIdentifier(name) => {
                if *self.peek(0) == TokenKind::Lparen {
                    return Err(ParseError::QuotedIdentifierAsFunction {
                        position: self.peek_position(),
                    });
                }
                Ok(AstNode::Field(name))
            }

            TokenKind::At => Ok(AstNode::Current),
            TokenKind::Variable(name) => Ok(AstNode::Variable(name)),

            TokenKind::Ampersand => {
                let expr = self.expression(0)?;
                Ok(AstNode::Expref(Box::new(expr)))
            }

            TokenKind::Not => {
                let expr = self.expression(BP_NOT)?;
                Ok(AstNode::Not(Box::new(expr)))
            }

            TokenKind::Lparen => {
                let expr = self.expression(0)?;
                self.expect(&TokenKind::Rparen)?;
                Ok(expr)
            }

            TokenKind::Star => Ok(AstNode::ValueProjection {
                lhs: Box::new(AstNode::Current),
                rhs: Box::new(self.parse_projection_rhs(BP_STAR)?),
            }),

            TokenKind::Flatten => {
                let lhs = AstNode::Flatten(Box::new(AstNode::Current));
                Ok(AstNode::Projection {
                    lhs: Box::new(lhs),
                    rhs: Box::new(self.parse_projection_rhs(BP_FLATTEN)?),
                })
            }

            TokenKind::Filter => self.parse_filter(AstNode::Current),

            TokenKind::Lbrace => self.parse_multi_select_hash(),

            TokenKind::Lbracket => {
                match self.peek(0) {
                    TokenKind::Number(_) | TokenKind::Colon => {
                        let right = self.parse_index_expression()?;
                        self.project_if_slice(AstNode::Current, right)
                    }
                    TokenKind::Star if *self.peek(1) == TokenKind::Rbracket => {
                        self.advance(); // star
                        self.advance(); // rbracket
                        Ok(AstNode::Projection {
                            lhs: Box::new(AstNode::Current),
                            rhs: Box::new(self.parse_projection_rhs(BP_STAR)?),
                        })
                    }
                    _ => self.parse_multi_select_list(),
                }
            }

            other => Err(ParseError::UnexpectedToken {
                token: other.describe(),
                position: token.position,
            }),
        }
    }

    /// Parse a token in infix position.
    fn led(&mut self, left: AstNode) -> Result<AstNode, ParseError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Dot => {
                if *self.peek(0) == TokenKind::Star {
                    self.advance();
                    Ok(AstNode::ValueProjection {
                        lhs: Box::new(left),
                        rhs: Box::new(self.parse_projection_rhs(BP_STAR)?),
                    })
                } else {
                    let rhs = self.parse_dot_rhs(BP_DOT)?;
                    Ok(AstNode::Subexpression {
                        lhs: Box::new(left),
                        rhs: Box::new(rhs),
                    })
                }
            }

            TokenKind::Pipe => Ok(AstNode::Pipe {
                lhs: Box::new(left),
                rhs: Box::new(self.expression(BP_PIPE)?),
            }),

            TokenKind::Or => Ok(AstNode::Or {
                lhs: Box::new(left),
                rhs: Box::new(self.expression(BP_OR)?),
            }),

            TokenKind::And => Ok(AstNode::And {
                lhs: Box::new(left),
                rhs: Box::new(self.expression(BP_AND)?),
            }),

            TokenKind::Eq
            | TokenKind::Ne
            | TokenKind::Lt
            | TokenKind::Lte
            | TokenKind::Gt
            | TokenKind::Gte => {
                let op = match token.kind {
                    TokenKind::Eq => Comparator::Equal,
                    TokenKind::Ne => Comparator::NotEqual,
                    TokenKind::Lt => Comparator::LessThan,
                    TokenKind::Lte => Comparator::LessThanOrEqual,
                    TokenKind::Gt => Comparator::GreaterThan,
                    _ => Comparator::GreaterThanOrEqual,
                };
                Ok(AstNode::Comparison {
                    op,
                    lhs: Box::new(left),
                    rhs: Box::new(self.expression(BP_COMPARATOR)?),
                })
            }

            TokenKind::Flatten => {
                let lhs = AstNode::Flatten(Box::new(left));
                Ok(AstNode::Projection {
                    lhs: Box::new(lhs),
                    rhs: Box::new(self.parse_projection_rhs(BP_FLATTEN)?),
                })
            }

            TokenKind::Filter => self.parse_filter(left),

            TokenKind::Lbracket => match self.peek(0) {
                TokenKind::Star if *self.peek(1) == TokenKind::Rbracket => {
                    self.advance(); // star
                    self.advance(); // rbracket
                    Ok(AstNode::Projection {
                        lhs: Box::new(left),
                        rhs: Box::new(self.parse_projection_rhs(BP_STAR)?),
                    })
                }
                TokenKind::Number(_) | TokenKind::Colon => {
                    let right = self.parse_index_expression()?;
                    self.project_if_slice(left, right)
                }
                _ => Err(self.expected_error("index, slice or '*'")),
            },

            TokenKind::Lparen => {
                let name = match left {
                    AstNode::Field(name) => name,
                    _ => {
                        return Err(ParseError::Expected {
                            expected: "function name".to_string(),
                            found: "expression".to_string(),
                            position: token.position,
                        })
                    }
                };
                let args = if *self.peek(0) == TokenKind::Rparen {
                    Vec::new()
                } else {
                    self.parse_expression_list()?
                };
                self.expect(&TokenKind::Rparen)?;
                Ok(AstNode::Function { name, args })
            }

            other => Err(ParseError::UnexpectedToken {
                token: other.describe(),
                position: token.position,
            }),
        }
    }

    /// `[?condition]rhs` with `left` as the projection base.
    fn parse_filter(&mut self, left: AstNode) -> Result<AstNode, ParseError> {
        let condition = self.expression(0)?;
        self.expect(&TokenKind::Rbracket)?;
        let rhs = self.parse_projection_rhs(BP_FILTER)?;
        Ok(AstNode::FilterProjection {
            lhs: Box::new(left),
            rhs: Box::new(rhs),
            condition: Box::new(condition),
        })
    }

    /// What follows a projection operator: either nothing meaningful
    /// (identity), a chained bracket, or a dotted step.
    fn parse_projection_rhs(&mut self, rbp: u8) -> Result<AstNode, ParseError> {
        match self.peek(0) {
            kind if Self::binding_power(kind) < PROJECTION_STOP => Ok(AstNode::Current),
            TokenKind::Lbracket | TokenKind::Filter | TokenKind::Flatten => self.expression(rbp),
            TokenKind::Dot => {
                self.advance();
                self.parse_dot_rhs(rbp)
            }
            _ => Err(self.expected_error("'.', '[', '[?' or end of projection")),
        }
    }

    /// What may follow a dot: identifier, multi-select list, or
    /// multi-select hash (a star is handled by the caller).
    fn parse_dot_rhs(&mut self, rbp: u8) -> Result<AstNode, ParseError> {
        match self.peek(0) {
            TokenKind::UnquotedIdentifier(_) | TokenKind::QuotedIdentifier(_) => {
                self.expression(rbp)
            }
            TokenKind::Lbracket => {
                self.advance();
                self.parse_multi_select_list()
            }
            TokenKind::Lbrace => {
                self.advance();
                self.parse_multi_select_hash()
            }
            _ => Err(self.expected_error("identifier, '[' or '{' after '.'")),
        }
    }

    /// Comma-separated expression list, shared by multi-select lists and
    /// function call arguments.
    fn parse_expression_list(&mut self) -> Result<Vec<AstNode>, ParseError> {
        let mut expressions = vec![self.expression(0)?];
        while *self.peek(0) == TokenKind::Comma {
            self.advance();
            expressions.push(self.expression(0)?);
        }
        Ok(expressions)
    }

    /// Multi-select list, with the opening bracket already consumed. A bare
    /// `[]` lexes as the flatten token, so the list always has elements.
    fn parse_multi_select_list(&mut self) -> Result<AstNode, ParseError> {
        if *self.peek(0) == TokenKind::Rbracket {
            return Err(self.expected_error("expression"));
        }
        let expressions = self.parse_expression_list()?;
        self.expect(&TokenKind::Rbracket)?;
        Ok(AstNode::MultiSelectList(expressions))
    }

    /// Multi-select hash, with the opening brace already consumed.
    fn parse_multi_select_hash(&mut self) -> Result<AstNode, ParseError> {
        let mut pairs = Vec::new();
        loop {
            let key = match self.advance().kind {
                TokenKind::UnquotedIdentifier(name) | TokenKind::QuotedIdentifier(name) => name,
                _ => return Err(self.expected_error("identifier key")),
            };
            self.expect(&TokenKind::Colon)?;
            let value = self.expression(0)?;
            pairs.push((key, value));
            if *self.peek(0) == TokenKind::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(&TokenKind::Rbrace)?;
        Ok(AstNode::MultiSelectHash(pairs))
    }

    /// Index or slice, with the opening bracket already consumed.
    fn parse_index_expression(&mut self) -> Result<AstNode, ParseError> {
        let mut parts: [Option<i64>; 3] = [None, None, None];
        let mut part = 0usize;
        let mut saw_colon = false;

        loop {
            match self.peek(0) {
                TokenKind::Number(_) => {
                    let token = self.advance();
                    let n = match token.kind {
                        TokenKind::Number(n) => n,
                        _ => unreachable!(),
                    };
                    if n.fract() != 0.0 {
                        return Err(ParseError::InvalidNumber {
                            text: n.to_string(),
                            position: token.position,
                        });
                    }
                    parts[part] = Some(n as i64);
                }
                TokenKind::Colon => {
                    self.advance();
                    saw_colon = true;
                    part += 1;
                    if part > 2 {
                        return Err(self.expected_error("']'"));
                    }
                }
                TokenKind::Rbracket => {
                    self.advance();
                    break;
                }
                _ => return Err(self.expected_error("number, ':' or ']'")),
            }
        }

        if !saw_colon {
            match parts[0] {
                Some(n) => Ok(AstNode::Index(n)),
                None => Err(self.expected_error("index")),
            }
        } else {
            Ok(AstNode::Slice(Slice {
                start: parts[0],
                stop: parts[1],
                step: parts[2],
            }))
        }
    }

    /// An index applies directly; a slice opens a projection.
    fn project_if_slice(&mut self, left: AstNode, right: AstNode) -> Result<AstNode, ParseError> {
        let is_slice = matches!(right, AstNode::Slice(_));
        let inner = AstNode::Subexpression {
            lhs: Box::new(left),
            rhs: Box::new(right),
        };
        if is_slice {
            Ok(AstNode::Projection {
                lhs: Box::new(inner),
                rhs: Box::new(self.parse_projection_rhs(BP_STAR)?),
            })
        } else {
            Ok(inner)
        }
    }

    fn parse_let_expression(&mut self) -> Result<AstNode, ParseError> {
        let mut bindings = Vec::new();
        loop {
            let name = match self.advance().kind {
                TokenKind::Variable(name) => name,
                _ => return Err(self.expected_error("variable")),
            };
            self.expect(&TokenKind::Assign)?;
            let expr = self.expression(0)?;
            bindings.push((name, expr));
            if *self.peek(0) == TokenKind::Comma {
                self.advance();
            } else {
                break;
            }
        }
        match self.peek(0) {
            TokenKind::UnquotedIdentifier(word) if word == "in" => {
                self.advance();
            }
            _ => return Err(self.expected_error("'in'")),
        }
        let body = self.expression(0)?;
        Ok(AstNode::Let {
            bindings,
            body: Box::new(body),
        })
    }
}

/// Parse an expression string into an AST
///
/// This is the main entry point for parsing.
pub fn parse(expression: &str) -> Result<AstNode, ParseError> {
    let mut parser = Parser::new(expression)?;
    parser.parse()
}
