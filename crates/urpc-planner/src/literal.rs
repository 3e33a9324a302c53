//! Object-literal tokenizer and recursive-descent parser.
//!
//! Model output writes options as loose object literals (`{where: {age:
//! {$gt: 18}}, limit: 10}`) rather than strict JSON. This module turns such
//! text into a `serde_json::Value` without ever evaluating it: only strings,
//! numbers, booleans, null, objects and arrays are accepted.

use serde_json::{Map, Number, Value};
use urpc_core::DecodeError;

/// Identifiers that mark a literal as code. A literal containing any of them
/// as a bare identifier is never parsed structurally.
pub const DENY_LIST: &[&str] = &[
    "function",
    "return",
    "eval",
    "setTimeout",
    "setInterval",
    "require",
    "import",
    "process",
    "__dirname",
    "__filename",
    "global",
    "window",
    "document",
    "console",
];

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Colon,
    Comma,
    Dot,
    Semicolon,
    Arrow,
    Str(String),
    Num(String),
    Ident(String),
}

/// A token and the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

/// Split `input` into tokens.
pub fn tokenize(input: &str) -> Result<Vec<Token>, DecodeError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        let simple = match c {
            '{' => Some(TokenKind::LBrace),
            '}' => Some(TokenKind::RBrace),
            '[' => Some(TokenKind::LBracket),
            ']' => Some(TokenKind::RBracket),
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            ':' => Some(TokenKind::Colon),
            ',' => Some(TokenKind::Comma),
            ';' => Some(TokenKind::Semicolon),
            _ => None,
        };
        if let Some(kind) = simple {
            tokens.push(Token { kind, offset });
            i += 1;
            continue;
        }

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '/' && next == Some('/') {
            while i < chars.len() && chars[i].1 != '\n' {
                i += 1;
            }
            continue;
        }

        if c == '=' && next == Some('>') {
            tokens.push(Token {
                kind: TokenKind::Arrow,
                offset,
            });
            i += 2;
            continue;
        }

        if matches!(c, '"' | '\'' | '`') {
            let (value, end) = read_string(&chars, i)?;
            tokens.push(Token {
                kind: TokenKind::Str(value),
                offset,
            });
            i = end;
            continue;
        }

        let starts_number = c.is_ascii_digit()
            || (matches!(c, '-' | '+') && next.map_or(false, |n| n.is_ascii_digit() || n == '.'))
            || (c == '.' && next.map_or(false, |n| n.is_ascii_digit()) && !follows_operand(&tokens));
        if starts_number {
            let (text, end) = read_number(&chars, i);
            tokens.push(Token {
                kind: TokenKind::Num(text),
                offset,
            });
            i = end;
            continue;
        }

        if c == '.' {
            tokens.push(Token {
                kind: TokenKind::Dot,
                offset,
            });
            i += 1;
            continue;
        }

        if is_ident_start(c) {
            let start = i;
            while i < chars.len() && is_ident_continue(chars[i].1) {
                i += 1;
            }
            let ident: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            tokens.push(Token {
                kind: TokenKind::Ident(ident),
                offset,
            });
            continue;
        }

        return Err(DecodeError::UnexpectedChar { found: c, offset });
    }

    Ok(tokens)
}

fn follows_operand(tokens: &[Token]) -> bool {
    matches!(
        tokens.last().map(|t| &t.kind),
        Some(TokenKind::Ident(_) | TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace)
    )
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Read a quoted string starting at `chars[start]`. Returns the unescaped
/// value and the index just past the closing quote.
fn read_string(chars: &[(usize, char)], start: usize) -> Result<(String, usize), DecodeError> {
    let (offset, quote) = chars[start];
    let mut value = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        let c = chars[i].1;
        if c == quote {
            return Ok((value, i + 1));
        }
        if quote == '`' && c == '$' && chars.get(i + 1).map(|(_, c)| *c) == Some('{') {
            return Err(DecodeError::Disallowed("template interpolation".to_string()));
        }
        if c != '\\' {
            value.push(c);
            i += 1;
            continue;
        }

        let Some(&(_, escaped)) = chars.get(i + 1) else {
            break;
        };
        i += 2;
        match escaped {
            'n' => value.push('\n'),
            't' => value.push('\t'),
            'r' => value.push('\r'),
            'b' => value.push('\u{8}'),
            'f' => value.push('\u{c}'),
            'v' => value.push('\u{b}'),
            '0' => value.push('\0'),
            '\n' => {}
            'u' => {
                let hex: String = chars.iter().skip(i).take(4).map(|(_, c)| *c).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(ch) if hex.len() == 4 => {
                        value.push(ch);
                        i += 4;
                    }
                    _ => value.push('u'),
                }
            }
            other => value.push(other),
        }
    }

    Err(DecodeError::UnterminatedString(offset))
}

fn read_number(chars: &[(usize, char)], start: usize) -> (String, usize) {
    let mut text = String::new();
    let mut i = start;
    if matches!(chars[i].1, '-' | '+') {
        text.push(chars[i].1);
        i += 1;
    }
    while i < chars.len() {
        let c = chars[i].1;
        let exponent_sign = matches!(c, '-' | '+')
            && matches!(text.chars().last(), Some('e' | 'E'))
            && !text.to_ascii_lowercase().contains("0x");
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' || exponent_sign {
            text.push(c);
            i += 1;
        } else {
            break;
        }
    }
    (text, i)
}

/// Convert number text to a JSON number with the same integer/float split
/// `serde_json` uses.
pub fn number_value(text: &str) -> Result<Value, DecodeError> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    let cleaned = cleaned.strip_prefix('+').unwrap_or(&cleaned);
    let (negative, unsigned) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned),
    };

    let radix = match unsigned.get(..2) {
        Some("0x") | Some("0X") => Some(16),
        Some("0o") | Some("0O") => Some(8),
        Some("0b") | Some("0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        let magnitude = i64::from_str_radix(&unsigned[2..], radix)
            .map_err(|_| DecodeError::InvalidNumber(text.to_string()))?;
        return Ok(Value::from(if negative { -magnitude } else { magnitude }));
    }

    if let Ok(n) = cleaned.parse::<i64>() {
        return Ok(Value::from(n));
    }
    if let Ok(n) = cleaned.parse::<u64>() {
        return Ok(Value::from(n));
    }
    let is_decimal = unsigned
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
        && unsigned.chars().any(|c| c.is_ascii_digit());
    if is_decimal {
        if let Some(n) = cleaned.parse::<f64>().ok().and_then(Number::from_f64) {
            return Ok(Value::Number(n));
        }
    }
    Err(DecodeError::InvalidNumber(text.to_string()))
}

/// Fail if any token marks the literal as executable code.
pub fn reject_denied(tokens: &[Token]) -> Result<(), DecodeError> {
    for token in tokens {
        match &token.kind {
            TokenKind::Arrow => return Err(DecodeError::Disallowed("=>".to_string())),
            TokenKind::Ident(name) if DENY_LIST.contains(&name.as_str()) => {
                return Err(DecodeError::Disallowed(name.clone()))
            }
            _ => {}
        }
    }
    Ok(())
}

/// Recursive-descent parser over a token slice.
pub struct LiteralParser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> LiteralParser<'t> {
    pub fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, expected: &str) -> DecodeError {
        match self.peek() {
            Some(token) => DecodeError::UnexpectedToken {
                offset: token.offset,
                expected: expected.to_string(),
            },
            None => DecodeError::UnexpectedEnd(expected.to_string()),
        }
    }

    /// Consume a token of exactly `kind`.
    pub fn expect(&mut self, kind: &TokenKind, expected: &str) -> Result<&'t Token, DecodeError> {
        match self.peek() {
            Some(token) if &token.kind == kind => {
                self.pos += 1;
                Ok(token)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    /// Consume `kind` if it is next.
    pub fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().map(|t| &t.kind) == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn expect_end(&self) -> Result<(), DecodeError> {
        if self.is_at_end() {
            Ok(())
        } else {
            Err(self.unexpected("end of input"))
        }
    }

    pub fn parse_value(&mut self) -> Result<Value, DecodeError> {
        let token = self.advance().ok_or_else(|| DecodeError::UnexpectedEnd("a value".into()))?;
        match &token.kind {
            TokenKind::LBrace => self.parse_object_body(),
            TokenKind::LBracket => self.parse_array_body(),
            TokenKind::Str(s) => Ok(Value::String(s.clone())),
            TokenKind::Num(n) => number_value(n),
            TokenKind::Ident(name) => match name.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" | "undefined" => Ok(Value::Null),
                _ => Err(DecodeError::UnexpectedToken {
                    offset: token.offset,
                    expected: "a literal value".to_string(),
                }),
            },
            _ => Err(DecodeError::UnexpectedToken {
                offset: token.offset,
                expected: "a value".to_string(),
            }),
        }
    }

    /// Parse the remainder of an object whose `{` was already consumed.
    fn parse_object_body(&mut self) -> Result<Value, DecodeError> {
        let mut map = Map::new();
        loop {
            if self.eat(&TokenKind::RBrace) {
                return Ok(Value::Object(map));
            }

            let key = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Ident(name)) => name.clone(),
                Some(TokenKind::Str(s)) => s.clone(),
                Some(TokenKind::Num(n)) => n.clone(),
                _ => return Err(self.unexpected("an object key")),
            };
            self.pos += 1;
            self.expect(&TokenKind::Colon, "':'")?;
            let value = self.parse_value()?;
            map.insert(key, value);

            if !self.eat(&TokenKind::Comma) {
                self.expect(&TokenKind::RBrace, "',' or '}'")?;
                return Ok(Value::Object(map));
            }
        }
    }

    /// Parse the remainder of an array whose `[` was already consumed.
    fn parse_array_body(&mut self) -> Result<Value, DecodeError> {
        let mut items = Vec::new();
        loop {
            if self.eat(&TokenKind::RBracket) {
                return Ok(Value::Array(items));
            }
            items.push(self.parse_value()?);
            if !self.eat(&TokenKind::Comma) {
                self.expect(&TokenKind::RBracket, "',' or ']'")?;
                return Ok(Value::Array(items));
            }
        }
    }
}

/// Parse a complete literal, refusing anything on the deny-list.
pub fn parse_literal(input: &str) -> Result<Value, DecodeError> {
    let tokens = tokenize(input)?;
    reject_denied(&tokens)?;
    let mut parser = LiteralParser::new(&tokens);
    let value = parser.parse_value()?;
    parser.expect_end()?;
    Ok(value)
}

/// Last-resort `key: value, key: value` reader.
///
/// Only one level deep: nested objects and arrays come out mangled.
pub fn parse_flat(input: &str) -> Value {
    let mut map = Map::new();
    for part in strip_braces(input).split(',') {
        let Some((key, value)) = part.split_once(':') else {
            continue;
        };
        let key = unquote(key.trim());
        if key.is_empty() {
            continue;
        }
        map.insert(key.to_string(), coerce_scalar(value.trim()));
    }
    Value::Object(map)
}

/// Returns true if the flat reader would lose structure on `input`.
pub fn looks_nested(input: &str) -> bool {
    strip_braces(input).contains(['{', '['])
}

fn strip_braces(input: &str) -> &str {
    let trimmed = input.trim();
    trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(trimmed)
}

fn unquote(raw: &str) -> &str {
    for quote in ['"', '\'', '`'] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return &raw[1..raw.len() - 1];
        }
    }
    raw
}

fn coerce_scalar(raw: &str) -> Value {
    let unquoted = unquote(raw);
    if unquoted.len() != raw.len() {
        return Value::String(unquoted.to_string());
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" | "undefined" => Value::Null,
        _ => number_value(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}
