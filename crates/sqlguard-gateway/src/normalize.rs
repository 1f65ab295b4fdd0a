//! Literal-aware SQL lexing and normalization.
//!
//! The normalizer turns raw SQL text into a canonical shape before anything is classified:
//!
//! - comments (`-- ...` and nested `/* ... */`) are dropped
//! - unquoted words are case folded, whitespace collapses to single spaces
//! - `U&"..."` identifiers and `U&'...'` strings are decoded and re-rendered in plain form
//! - the text is split into top-level statements on every `;` outside literals
//!
//! String literals, quoted identifiers and dollar-quoted bodies are kept intact, so a `;` or
//! `--` inside a literal never splits or truncates a statement.

use crate::error::NormalizeError;

/// Lexical category of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Unquoted identifier or keyword, case folded.
    Word,
    /// Double-quoted identifier, Unicode escapes decoded.
    QuotedIdent,
    /// Any string literal form.
    String,
    Number,
    /// Positional parameter (`$1`).
    Param,
    Operator,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Semicolon,
}

/// One lexical token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Text as rendered in the normalized statement.
    pub text: String,
    /// Identifier value: folded word, or decoded quoted identifier.
    pub ident: Option<String>,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            ident: None,
        }
    }

    fn word(text: String) -> Self {
        Self {
            kind: TokenKind::Word,
            ident: Some(text.clone()),
            text,
        }
    }

    fn quoted_ident(value: String) -> Self {
        Self {
            kind: TokenKind::QuotedIdent,
            text: format!("\"{}\"", value.replace('"', "\"\"")),
            ident: Some(value),
        }
    }

    /// Whether this token is the unquoted keyword `keyword` (lowercase).
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text == keyword
    }

    /// Identifier value, lowercased for comparisons against name lists.
    pub fn ident_lower(&self) -> Option<String> {
        self.ident.as_ref().map(|s| s.to_lowercase())
    }
}

/// A single top-level statement in normalized form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedStatement {
    pub tokens: Vec<Token>,
    /// Tokens joined by single spaces.
    pub text: String,
}

impl NormalizedStatement {
    fn from_tokens(tokens: Vec<Token>) -> Self {
        let text = tokens
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Self { tokens, text }
    }

    /// First keyword of the statement.
    pub fn leading_word(&self) -> Option<&str> {
        self.tokens
            .iter()
            .find(|t| t.kind != TokenKind::LParen)
            .filter(|t| t.kind == TokenKind::Word)
            .map(|t| t.text.as_str())
    }
}

/// SQL text split into normalized top-level statements. Empty statements are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSql {
    pub statements: Vec<NormalizedStatement>,
}

/// Normalize raw SQL text.
pub fn normalize(sql: &str) -> Result<NormalizedSql, NormalizeError> {
    let tokens = Lexer::new(sql).tokenize()?;

    let mut statements = Vec::new();
    let mut current = Vec::new();
    for token in tokens {
        if token.kind == TokenKind::Semicolon {
            if !current.is_empty() {
                statements.push(NormalizedStatement::from_tokens(std::mem::take(&mut current)));
            }
        } else {
            current.push(token);
        }
    }
    if !current.is_empty() {
        statements.push(NormalizedStatement::from_tokens(current));
    }

    Ok(NormalizedSql { statements })
}

const OPERATOR_CHARS: &str = "+-*/<>=~!@#%^&|`?:";

/// Whitespace as the Postgres scanner defines it. Other Unicode spaces are ordinary characters.
fn is_sql_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0B' | '\x0C')
}

struct Lexer {
    chars: Vec<(usize, char)>,
    len: usize,
    pos: usize,
}

impl Lexer {
    fn new(src: &str) -> Self {
        Self {
            chars: src.char_indices().collect(),
            len: src.len(),
            pos: 0,
        }
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars.get(self.pos).map(|(o, _)| *o).unwrap_or(self.len)
    }

    fn tokenize(mut self) -> Result<Vec<Token>, NormalizeError> {
        let mut tokens = Vec::new();

        while let Some(c) = self.peek(0) {
            let start = self.offset();
            let next = self.peek(1);

            if c == '\0' {
                return Err(NormalizeError::NulByte { offset: start });
            }
            if is_sql_whitespace(c) {
                self.pos += 1;
                continue;
            }
            if c == '-' && next == Some('-') {
                self.skip_line_comment();
                continue;
            }
            if c == '/' && next == Some('*') {
                self.skip_block_comment()?;
                continue;
            }

            let token = match c {
                '\'' => {
                    let body = self.quoted_body('\'', false)?;
                    Token::new(TokenKind::String, format!("'{}'", body.replace('\'', "''")))
                }
                'e' | 'E' if next == Some('\'') => {
                    self.pos += 1;
                    let raw = self.escape_string_raw()?;
                    Token::new(TokenKind::String, format!("E{}", raw))
                }
                'u' | 'U' if next == Some('&') && matches!(self.peek(2), Some('\'' | '"')) => {
                    self.unicode_literal()?
                }
                'b' | 'B' | 'x' | 'X' | 'n' | 'N' if next == Some('\'') => {
                    self.pos += 1;
                    let body = self.quoted_body('\'', false)?;
                    Token::new(
                        TokenKind::String,
                        format!("{}'{}'", c.to_ascii_uppercase(), body.replace('\'', "''")),
                    )
                }
                '"' => Token::quoted_ident(self.quoted_body('"', true)?),
                '$' => self.dollar()?,
                '(' => self.punct(TokenKind::LParen, "("),
                ')' => self.punct(TokenKind::RParen, ")"),
                '[' => self.punct(TokenKind::LBracket, "["),
                ']' => self.punct(TokenKind::RBracket, "]"),
                ',' => self.punct(TokenKind::Comma, ","),
                ';' => self.punct(TokenKind::Semicolon, ";"),
                '.' if next.is_some_and(|n| n.is_ascii_digit()) => self.number(),
                '.' => self.punct(TokenKind::Dot, "."),
                _ if c.is_ascii_digit() => self.number(),
                _ if c.is_alphabetic() || c == '_' => self.word(),
                _ if OPERATOR_CHARS.contains(c) => self.operator(),
                _ => {
                    self.pos += 1;
                    Token::new(TokenKind::Operator, c.to_string())
                }
            };
            tokens.push(token);
        }

        Ok(tokens)
    }

    fn punct(&mut self, kind: TokenKind, text: &str) -> Token {
        self.pos += 1;
        Token::new(kind, text)
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek(0) {
            self.pos += 1;
            if c == '\n' || c == '\r' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), NormalizeError> {
        let start = self.offset();
        let mut depth = 0usize;
        loop {
            match (self.peek(0), self.peek(1)) {
                (Some('/'), Some('*')) => {
                    depth += 1;
                    self.pos += 2;
                }
                (Some('*'), Some('/')) => {
                    depth -= 1;
                    self.pos += 2;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                (Some(_), _) => self.pos += 1,
                (None, _) => return Err(NormalizeError::UnterminatedComment { offset: start }),
            }
        }
    }

    /// Body of a `quote`-delimited literal with doubled-quote escapes, quotes stripped.
    fn quoted_body(&mut self, quote: char, ident: bool) -> Result<String, NormalizeError> {
        let start = self.offset();
        self.pos += 1;
        let mut body = String::new();
        loop {
            match self.peek(0) {
                Some(c) if c == quote => {
                    if self.peek(1) == Some(quote) {
                        body.push(quote);
                        self.pos += 2;
                    } else {
                        self.pos += 1;
                        return Ok(body);
                    }
                }
                Some(c) => {
                    body.push(c);
                    self.pos += 1;
                }
                None if ident => return Err(NormalizeError::UnterminatedIdentifier { offset: start }),
                None => return Err(NormalizeError::UnterminatedString { offset: start }),
            }
        }
    }

    /// `E'...'` body where backslash escapes the next character. Returned with its quotes.
    fn escape_string_raw(&mut self) -> Result<String, NormalizeError> {
        let start = self.offset();
        let mut raw = String::from("'");
        self.pos += 1;
        loop {
            match self.peek(0) {
                Some('\\') => {
                    raw.push('\\');
                    self.pos += 1;
                    match self.peek(0) {
                        Some(escaped) => {
                            raw.push(escaped);
                            self.pos += 1;
                        }
                        None => return Err(NormalizeError::UnterminatedString { offset: start }),
                    }
                }
                Some('\'') if self.peek(1) == Some('\'') => {
                    raw.push_str("''");
                    self.pos += 2;
                }
                Some('\'') => {
                    raw.push('\'');
                    self.pos += 1;
                    return Ok(raw);
                }
                Some(c) => {
                    raw.push(c);
                    self.pos += 1;
                }
                None => return Err(NormalizeError::UnterminatedString { offset: start }),
            }
        }
    }

    /// `U&'...'` or `U&"..."`, with an optional trailing `UESCAPE 'c'` clause.
    fn unicode_literal(&mut self) -> Result<Token, NormalizeError> {
        let start = self.offset();
        self.pos += 2;
        let quote = self.peek(0).unwrap_or('\'');
        let body = self.quoted_body(quote, quote == '"')?;
        let escape = self.uescape_clause()?.unwrap_or('\\');
        let decoded = decode_unicode_escapes(&body, escape, start)?;

        Ok(if quote == '"' {
            Token::quoted_ident(decoded)
        } else {
            Token::new(TokenKind::String, format!("'{}'", decoded.replace('\'', "''")))
        })
    }

    fn uescape_clause(&mut self) -> Result<Option<char>, NormalizeError> {
        let saved = self.pos;
        while self.peek(0).is_some_and(is_sql_whitespace) {
            self.pos += 1;
        }
        let keyword: String = (0..7).filter_map(|i| self.peek(i)).collect();
        let boundary = self.peek(7).is_none_or(|c| !(c.is_alphanumeric() || c == '_'));
        if !keyword.eq_ignore_ascii_case("uescape") || !boundary {
            self.pos = saved;
            return Ok(None);
        }
        self.pos += 7;
        while self.peek(0).is_some_and(is_sql_whitespace) {
            self.pos += 1;
        }
        let offset = self.offset();
        if self.peek(0) != Some('\'') {
            return Err(NormalizeError::InvalidUnicodeEscape { offset });
        }
        let body = self.quoted_body('\'', false)?;
        let mut chars = body.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if !c.is_ascii_hexdigit() && !"+'\" ".contains(c) => Ok(Some(c)),
            _ => Err(NormalizeError::InvalidUnicodeEscape { offset }),
        }
    }

    fn dollar(&mut self) -> Result<Token, NormalizeError> {
        let start = self.offset();

        if self.peek(1).is_some_and(|c| c.is_ascii_digit()) {
            let mut text = String::from("$");
            self.pos += 1;
            while let Some(c) = self.peek(0).filter(char::is_ascii_digit) {
                text.push(c);
                self.pos += 1;
            }
            return Ok(Token::new(TokenKind::Param, text));
        }

        // $tag$ ... $tag$
        let mut tag_len = 1;
        while let Some(c) = self.peek(tag_len) {
            if c == '$' {
                break;
            }
            let valid = if tag_len == 1 {
                c.is_alphabetic() || c == '_'
            } else {
                c.is_alphanumeric() || c == '_'
            };
            if !valid {
                self.pos += 1;
                return Ok(Token::new(TokenKind::Operator, "$"));
            }
            tag_len += 1;
        }
        if self.peek(tag_len) != Some('$') {
            self.pos += 1;
            return Ok(Token::new(TokenKind::Operator, "$"));
        }

        let delimiter: Vec<char> = (0..=tag_len).filter_map(|i| self.peek(i)).collect();
        self.pos += delimiter.len();
        let mut raw: String = delimiter.iter().collect();
        loop {
            if self.peek(0).is_none() {
                return Err(NormalizeError::UnterminatedDollarQuote { offset: start });
            }
            let closes = delimiter
                .iter()
                .enumerate()
                .all(|(i, c)| self.peek(i) == Some(*c));
            if closes {
                raw.extend(delimiter.iter());
                self.pos += delimiter.len();
                return Ok(Token::new(TokenKind::String, raw));
            }
            if let Some(c) = self.peek(0) {
                raw.push(c);
            }
            self.pos += 1;
        }
    }

    fn number(&mut self) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek(0) {
            let exponent_sign = (c == '+' || c == '-')
                && text.ends_with(['e', 'E'])
                && !text.starts_with("0x")
                && self.peek(1).is_some_and(|n| n.is_ascii_digit());
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || exponent_sign {
                text.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        Token::new(TokenKind::Number, text)
    }

    fn word(&mut self) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek(0) {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                text.extend(c.to_lowercase());
                self.pos += 1;
            } else {
                break;
            }
        }
        Token::word(text)
    }

    fn operator(&mut self) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek(0) {
            if !OPERATOR_CHARS.contains(c) {
                break;
            }
            let next = self.peek(1);
            if !text.is_empty() && ((c == '-' && next == Some('-')) || (c == '/' && next == Some('*'))) {
                break;
            }
            text.push(c);
            self.pos += 1;
        }
        Token::new(TokenKind::Operator, text)
    }
}

fn decode_unicode_escapes(body: &str, escape: char, offset: usize) -> Result<String, NormalizeError> {
    let invalid = || NormalizeError::InvalidUnicodeEscape { offset };
    let chars: Vec<char> = body.chars().collect();
    let mut out = String::with_capacity(body.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c != escape {
            out.push(c);
            i += 1;
            continue;
        }
        if chars.get(i + 1) == Some(&escape) {
            out.push(escape);
            i += 2;
            continue;
        }
        let (start, width) = if chars.get(i + 1) == Some(&'+') {
            (i + 2, 6)
        } else {
            (i + 1, 4)
        };
        let hex: String = chars.get(start..start + width).ok_or_else(invalid)?.iter().collect();
        let code = u32::from_str_radix(&hex, 16).map_err(|_| invalid())?;
        out.push(char::from_u32(code).ok_or_else(invalid)?);
        i = start + width;
    }

    Ok(out)
}
