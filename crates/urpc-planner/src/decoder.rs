//! Pseudo-code decoder.
//!
//! Turns one `urpc_code` string of the shape
//! `repo({entity: "user", source: "memory"}).findMany({limit: 10})` into a
//! typed call. The grammar is a single production:
//!
//! ```text
//! call    := ["await"] "repo" "(" head ")" ("." ident "(" args ")")+ [";"]
//! head    := object literal with `entity` and `source` keys
//! args    := empty | literal
//! ```
//!
//! The last `.ident(...)` in the chain is the operation. Options go through
//! strict JSON, then the object-literal parser, then the flat reader.

use serde_json::{json, Value};
use tracing::{debug, warn};
use urpc_core::{DecodeError, Operation, RepoTarget};

use crate::literal::{looks_nested, parse_flat, parse_literal};

/// Source used when the pseudo-code names none.
pub const FALLBACK_SOURCE: &str = "memory";

/// Entity used when the pseudo-code names none.
pub const UNKNOWN_ENTITY: &str = "unknown";

/// Method name reported when no call could be found.
pub const UNKNOWN_METHOD: &str = "unknown";

/// Which decoding path produced the options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionsMode {
    /// No arguments; options are `{}`.
    Empty,
    /// Arguments were strict JSON.
    Json,
    /// Arguments were a loose object literal.
    Literal,
    /// Arguments were rejected or malformed and read as flat `key: value` pairs.
    Flat,
}

/// Everything but the options.
#[derive(Debug, Clone, PartialEq)]
pub struct CallHeader {
    /// Raw method name of the final call.
    pub method: String,
    /// `None` when `method` is not in the vocabulary.
    pub operation: Option<Operation>,
    pub entity: String,
    pub source: String,
}

impl CallHeader {
    pub fn target(&self) -> RepoTarget {
        RepoTarget::new(&self.entity, &self.source)
    }

    /// Operation name for reporting, `method` when unknown.
    pub fn operation_name(&self) -> &str {
        self.operation.map(|op| op.as_str()).unwrap_or(self.method.as_str())
    }
}

/// A fully decoded step.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCall {
    pub header: CallHeader,
    pub options: Value,
    pub options_mode: OptionsMode,
}

/// The pieces of a call that matched the grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CallParts<'a> {
    head: &'a str,
    method: &'a str,
    args: &'a str,
}

/// Deterministic, side-effect-free decoder.
#[derive(Debug, Clone)]
pub struct PseudoCodeDecoder {
    fallback_source: String,
}

impl Default for PseudoCodeDecoder {
    fn default() -> Self {
        Self::new(FALLBACK_SOURCE)
    }
}

impl PseudoCodeDecoder {
    pub fn new(fallback_source: impl Into<String>) -> Self {
        Self {
            fallback_source: fallback_source.into(),
        }
    }

    pub fn fallback_source(&self) -> &str {
        &self.fallback_source
    }

    /// Decode operation, target and options.
    pub fn decode(&self, code: &str) -> DecodedCall {
        let (header, args) = self.split(code);
        let (options, options_mode) = match args {
            Some(args) => self.decode_options(args),
            None => (json!({}), OptionsMode::Empty),
        };
        DecodedCall {
            header,
            options,
            options_mode,
        }
    }

    /// Decode operation and target only.
    pub fn decode_header(&self, code: &str) -> CallHeader {
        self.split(code).0
    }

    /// Decode an options argument list.
    pub fn decode_options(&self, args: &str) -> (Value, OptionsMode) {
        let trimmed = args.trim();
        if trimmed.is_empty() {
            return (json!({}), OptionsMode::Empty);
        }

        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return (value, OptionsMode::Json);
        }

        match parse_literal(trimmed) {
            Ok(value) => (value, OptionsMode::Literal),
            Err(err) => {
                if looks_nested(trimmed) {
                    warn!(error = %err, options = %trimmed, "nested options fell back to flat parsing");
                } else {
                    debug!(error = %err, "options fell back to flat parsing");
                }
                (parse_flat(trimmed), OptionsMode::Flat)
            }
        }
    }

    fn split<'a>(&self, code: &'a str) -> (CallHeader, Option<&'a str>) {
        match split_call(code) {
            Ok(parts) => {
                let (entity, source) = self.read_head(parts.head);
                let header = CallHeader {
                    method: parts.method.to_string(),
                    operation: parts.method.parse().ok(),
                    entity,
                    source,
                };
                (header, Some(parts.args))
            }
            Err(err) => {
                debug!(error = %err, "pseudo-code did not match call grammar, scanning leniently");
                self.scan_lenient(code)
            }
        }
    }

    fn read_head(&self, head: &str) -> (String, String) {
        if let Ok(Value::Object(map)) = parse_literal(head) {
            let entity = map
                .get("entity")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or(UNKNOWN_ENTITY);
            let source = map
                .get("source")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or(self.fallback_source.as_str());
            return (entity.to_string(), source.to_string());
        }
        (
            find_quoted_value(head, "entity").unwrap_or_else(|| UNKNOWN_ENTITY.to_string()),
            find_quoted_value(head, "source").unwrap_or_else(|| self.fallback_source.clone()),
        )
    }

    /// Best-effort extraction from text that does not match the grammar.
    fn scan_lenient<'a>(&self, code: &'a str) -> (CallHeader, Option<&'a str>) {
        let entity = find_quoted_value(code, "entity").unwrap_or_else(|| UNKNOWN_ENTITY.to_string());
        let source =
            find_quoted_value(code, "source").unwrap_or_else(|| self.fallback_source.clone());

        let (method, args) = match last_method_call(code) {
            Some((method, open)) => {
                let close = code.rfind(')').filter(|close| *close > open);
                (method, close.map(|close| &code[open + 1..close]))
            }
            None => (UNKNOWN_METHOD, None),
        };

        let header = CallHeader {
            method: method.to_string(),
            operation: method.parse().ok(),
            entity,
            source,
        };
        (header, args)
    }
}

/// Match `code` against the call grammar.
fn split_call(code: &str) -> Result<CallParts<'_>, DecodeError> {
    let mut scanner = Scanner::new(code);
    scanner.skip_ws();
    if scanner.eat_word("await") {
        scanner.skip_ws();
    }
    if !scanner.eat_word("repo") {
        return Err(scanner.unexpected("`repo`"));
    }
    scanner.skip_ws();
    let head = scanner.parenthesized()?;

    let mut last = None;
    loop {
        scanner.skip_ws();
        match scanner.peek() {
            None | Some(';') => break,
            Some('.') => {
                scanner.bump();
                scanner.skip_ws();
                let method = scanner.ident()?;
                scanner.skip_ws();
                let args = scanner.parenthesized()?;
                last = Some((method, args));
            }
            Some(_) => return Err(scanner.unexpected("'.'")),
        }
    }

    scanner.eat(';');
    scanner.skip_ws();
    if scanner.peek().is_some() {
        return Err(scanner.unexpected("end of call"));
    }

    let (method, args) = last.ok_or_else(|| DecodeError::UnexpectedEnd("a method call".into()))?;
    Ok(CallParts { head, method, args })
}

/// Byte length of the `repo(...).method(...)` expression at the start of
/// `text`, if there is one.
pub fn call_prefix_len(text: &str) -> Option<usize> {
    let mut scanner = Scanner::new(text);
    if !scanner.eat_word("repo") {
        return None;
    }
    scanner.skip_ws();
    scanner.parenthesized().ok()?;

    let mut end = None;
    loop {
        scanner.skip_ws();
        if !scanner.eat('.') {
            break;
        }
        scanner.skip_ws();
        if scanner.ident().is_err() {
            break;
        }
        scanner.skip_ws();
        if scanner.parenthesized().is_err() {
            break;
        }
        end = Some(scanner.pos);
    }
    end
}

/// Char-level scanner that knows about quoted strings.
struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().map_or(false, char::is_whitespace) {
            self.bump();
        }
    }

    fn unexpected(&self, expected: &str) -> DecodeError {
        match self.peek() {
            Some(_) => DecodeError::UnexpectedToken {
                offset: self.pos,
                expected: expected.to_string(),
            },
            None => DecodeError::UnexpectedEnd(expected.to_string()),
        }
    }

    /// Consume `word` if it is next and not the prefix of a longer identifier.
    fn eat_word(&mut self, word: &str) -> bool {
        let rest = self.rest();
        if !rest.starts_with(word) {
            return false;
        }
        let boundary = rest[word.len()..]
            .chars()
            .next()
            .map_or(true, |c| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'));
        if boundary {
            self.pos += word.len();
        }
        boundary
    }

    fn ident(&mut self) -> Result<&'a str, DecodeError> {
        let start = self.pos;
        while self
            .peek()
            .map_or(false, |c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        {
            self.bump();
        }
        if self.pos == start {
            return Err(self.unexpected("a method name"));
        }
        Ok(&self.src[start..self.pos])
    }

    /// Consume `( ... )` and return the text between the outermost parens.
    fn parenthesized(&mut self) -> Result<&'a str, DecodeError> {
        if !self.eat('(') {
            return Err(self.unexpected("'('"));
        }
        let start = self.pos;
        let mut depth = 1usize;

        while let Some(c) = self.peek() {
            match c {
                '"' | '\'' | '`' => self.skip_string(c)?,
                '(' => {
                    depth += 1;
                    self.bump();
                }
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        let inner = &self.src[start..self.pos];
                        self.bump();
                        return Ok(inner);
                    }
                    self.bump();
                }
                _ => {
                    self.bump();
                }
            }
        }
        Err(DecodeError::UnexpectedEnd("')'".into()))
    }

    fn skip_string(&mut self, quote: char) -> Result<(), DecodeError> {
        let start = self.pos;
        self.bump();
        while let Some(c) = self.bump() {
            if c == '\\' {
                self.bump();
            } else if c == quote {
                return Ok(());
            }
        }
        Err(DecodeError::UnterminatedString(start))
    }
}

/// Find `key: "value"` (either quote style) anywhere in `text`.
pub fn find_quoted_value(text: &str, key: &str) -> Option<String> {
    let mut search_from = 0;
    while let Some(found) = text[search_from..].find(key) {
        let after_key = search_from + found + key.len();
        search_from = after_key;

        let rest = text[after_key..].trim_start_matches(['"', '\'']).trim_start();
        let Some(rest) = rest.strip_prefix(':') else {
            continue;
        };
        let rest = rest.trim_start();
        let Some(quote) = rest.chars().next().filter(|c| matches!(c, '"' | '\'')) else {
            continue;
        };
        let body = &rest[1..];
        if let Some(end) = body.find(quote) {
            if end > 0 {
                return Some(body[..end].to_string());
            }
        }
    }
    None
}

/// The last `.ident(` in `text`: the identifier and the byte offset of its `(`.
fn last_method_call(text: &str) -> Option<(&str, usize)> {
    let mut found = None;
    for (dot, _) in text.match_indices('.') {
        let after = &text[dot + 1..];
        let len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
            .unwrap_or(after.len());
        if len == 0 {
            continue;
        }
        let ident = &after[..len];
        let tail = &after[len..];
        let ws = tail.len() - tail.trim_start().len();
        if tail.trim_start().starts_with('(') {
            found = Some((ident, dot + 1 + len + ws));
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> PseudoCodeDecoder {
        PseudoCodeDecoder::default()
    }

    #[test]
    fn test_decode_find_many_without_options() {
        let call = decoder().decode(r#"repo({entity: "user", source: "[default]"}).findMany()"#);
        assert_eq!(call.header.operation, Some(Operation::FindMany));
        assert_eq!(call.header.entity, "user");
        assert_eq!(call.header.source, "[default]");
        assert_eq!(call.options, json!({}));
        assert_eq!(call.options_mode, OptionsMode::Empty);
    }

    #[test]
    fn test_create_many_is_not_create() {
        let call = decoder().decode(r#"repo({entity: "post", source: "memory"}).createMany([{"title": "a"}])"#);
        assert_eq!(call.header.operation, Some(Operation::CreateMany));
        assert_eq!(call.options, json!([{"title": "a"}]));

        let call = decoder().decode(r#"repo({entity: "post", source: "memory"}).create({data: {title: "createMany"}})"#);
        assert_eq!(call.header.operation, Some(Operation::Create));
    }

    #[test]
    fn test_json_fast_path_is_exact() {
        let args = r#"{"where": {"age": {"$gt": 18}}, "limit": 10}"#;
        let code = format!(r#"repo({{entity: "user", source: "memory"}}).findMany({args})"#);
        let call = decoder().decode(&code);
        assert_eq!(call.options_mode, OptionsMode::Json);
        assert_eq!(call.options, serde_json::from_str::<Value>(args).unwrap());
    }

    #[test]
    fn test_loose_literal_options() {
        let call = decoder().decode(
            "repo({entity: 'user', source: 'memory'}).findMany({where: {age: {$gt: 18}}, limit: 10})",
        );
        assert_eq!(call.options_mode, OptionsMode::Literal);
        assert_eq!(call.options, json!({"where": {"age": {"$gt": 18}}, "limit": 10}));
    }

    #[test]
    fn test_parens_inside_strings() {
        let call = decoder().decode(
            r#"await repo({entity: "post", source: "memory"}).create({data: {title: "smile :) (ok"}});"#,
        );
        assert_eq!(call.header.operation, Some(Operation::Create));
        assert_eq!(call.options["data"]["title"], "smile :) (ok");
    }

    #[test]
    fn test_denied_options_use_flat_reader() {
        let call = decoder().decode(
            r#"repo({entity: "user", source: "memory"}).update({name: process.env.HOME, active: true})"#,
        );
        assert_eq!(call.options_mode, OptionsMode::Flat);
        assert_eq!(call.options["active"], true);
        assert_eq!(call.options["name"], "process.env.HOME");
    }

    #[test]
    fn test_unknown_operation_sentinel() {
        let call = decoder().decode(r#"repo({entity: "user", source: "memory"}).truncate()"#);
        assert_eq!(call.header.operation, None);
        assert_eq!(call.header.method, "truncate");
        assert_eq!(call.header.operation_name(), "truncate");
    }

    #[test]
    fn test_missing_entity_and_source() {
        let call = decoder().decode("repo({}).findOne({where: {id: 1}})");
        assert_eq!(call.header.entity, UNKNOWN_ENTITY);
        assert_eq!(call.header.source, FALLBACK_SOURCE);

        let custom = PseudoCodeDecoder::new("indexeddb");
        assert_eq!(custom.decode_header("repo({entity: \"a\"}).findOne()").source, "indexeddb");
    }

    #[test]
    fn test_chained_calls_use_last_method() {
        let header = decoder().decode_header(r#"repo({entity: "user", source: "memory"}).where({a: 1}).findMany()"#);
        assert_eq!(header.operation, Some(Operation::FindMany));
    }

    #[test]
    fn test_lenient_scan_of_off_grammar_code() {
        let call = decoder().decode(
            r#"const users = repo({entity: "user", source: "api"}).findMany({limit: 5})"#,
        );
        assert_eq!(call.header.entity, "user");
        assert_eq!(call.header.source, "api");
        assert_eq!(call.header.operation, Some(Operation::FindMany));
        assert_eq!(call.options, json!({"limit": 5}));

        let call = decoder().decode("delete everything please");
        assert_eq!(call.header.method, UNKNOWN_METHOD);
        assert_eq!(call.header.operation, None);
        assert_eq!(call.header.entity, UNKNOWN_ENTITY);
    }

    #[test]
    fn test_find_quoted_value() {
        assert_eq!(find_quoted_value(r#"{ "entity" : 'post' }"#, "entity"), Some("post".into()));
        assert_eq!(find_quoted_value("entity = 1, entity: \"x\"", "entity"), Some("x".into()));
        assert_eq!(find_quoted_value("no match", "entity"), None);
    }
}
