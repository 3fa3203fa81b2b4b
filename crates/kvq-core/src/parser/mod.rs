//! The query parser.
//!
//! A deterministic state machine over the scanner's token stream. Each
//! `(state, token kind)` pair either advances the build of a query or
//! produces a structured error carrying every token seen, so the caller
//! can underline the offender in the original input.

pub mod format;
pub mod scanner;

use std::fmt;

use crate::keyval::{
    DirElement, Directory, Key, KeyValue, Query, TupElement, Tuple, Value, ValueType, Variable,
};
use scanner::{Scanner, TokenKind, CLEAR, DIR_SEP, HEX_START, MAYBE_MORE};

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

/// A parse failure: the full token stream, the index of the offending
/// token, and the underlying cause.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    pub tokens: Vec<Token>,
    pub index: usize,
    pub cause: Cause,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i == self.index {
                f.write_str(" --> ")?;
            }
            f.write_str(&token.text)?;
            if i == self.index {
                f.write_str(" <--invalid-token--- ")?;
            }
        }
        write!(f, ": {}", self.cause)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Cause {
    #[error("unexpected {kind} while parsing {state}")]
    UnexpectedToken {
        state: &'static str,
        kind: &'static str,
    },

    #[error("unexpected escape '{literal}' while parsing {state}")]
    UnknownEscape {
        literal: String,
        state: &'static str,
    },

    #[error("unrecognized data element")]
    UnrecognizedData,

    #[error("unrecognized value type")]
    UnknownValueType,

    #[error("the {group} group of a UUID should contain {expected} characters rather than {actual}")]
    BadUuidGroup {
        group: String,
        expected: usize,
        actual: usize,
    },

    #[error("expected even number of hex digits")]
    OddHexDigits,

    #[error("invalid hex digits")]
    BadHexDigits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    DirHead,
    DirTail,
    DirVarEnd,
    TupleHead,
    TupleTail,
    TupleVarHead,
    TupleVarTail,
    TupleString,
    Separator,
    Value,
    ValueVarHead,
    ValueVarTail,
    Finished,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::Initial => "initial",
            State::DirHead | State::DirTail | State::DirVarEnd => "directory",
            State::TupleHead | State::TupleTail => "tuple",
            State::TupleVarHead | State::TupleVarTail => "variable",
            State::TupleString => "string",
            State::Separator => "query",
            State::Value => "value",
            State::ValueVarHead | State::ValueVarTail => "variable",
            State::Finished => "finished",
        }
    }
}

/// Parses a single query string.
pub fn parse_query(input: &str) -> Result<Query, Error> {
    Parser::new(input).parse()
}

pub struct Parser<'a> {
    scanner: Scanner<'a>,
    tokens: Vec<Token>,
    state: State,
    dir: Vec<DirElement>,
    key_tuple: Tuple,
    value: Value,
    tup: TupBuilder,
    val_tup: bool,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Parser<'a> {
        Parser {
            scanner: Scanner::new(input),
            tokens: Vec::new(),
            state: State::Initial,
            dir: Vec::new(),
            key_tuple: Tuple::default(),
            value: Value::Nil,
            tup: TupBuilder::new(),
            val_tup: false,
        }
    }

    pub fn parse(mut self) -> Result<Query, Error> {
        loop {
            let kind = self.scanner.scan();
            let text = self.scanner.token().to_string();
            self.tokens.push(Token {
                kind,
                text: text.clone(),
            });

            match self.state {
                State::Initial => match kind {
                    TokenKind::DirSep => self.state = State::DirHead,
                    TokenKind::Whitespace | TokenKind::Newline => {}
                    _ => return Err(self.fail(self.unexpected(kind))),
                },

                State::DirHead => match kind {
                    TokenKind::VarStart => self.state = State::DirVarEnd,
                    TokenKind::Escape => {
                        let c = self.check_escape(&text)?;
                        self.dir.push(DirElement::String(c.to_string()));
                        self.state = State::DirTail;
                    }
                    TokenKind::Other => {
                        self.dir.push(DirElement::String(text));
                        self.state = State::DirTail;
                    }
                    _ => return Err(self.fail(self.unexpected(kind))),
                },

                State::DirTail => match kind {
                    TokenKind::DirSep => self.state = State::DirHead,
                    TokenKind::TupStart => {
                        self.tup = TupBuilder::new();
                        self.val_tup = false;
                        self.state = State::TupleHead;
                    }
                    TokenKind::Escape => {
                        let c = self.check_escape(&text)?;
                        if !self.append_to_last_part(&c.to_string()) {
                            return Err(self.fail(self.unexpected(kind)));
                        }
                    }
                    TokenKind::Other => {
                        if !self.append_to_last_part(&text) {
                            return Err(self.fail(self.unexpected(kind)));
                        }
                    }
                    TokenKind::End => return Ok(Query::Directory(Directory(self.dir))),
                    _ => return Err(self.fail(self.unexpected(kind))),
                },

                State::DirVarEnd => match kind {
                    TokenKind::VarEnd => {
                        self.dir.push(DirElement::Variable(Variable::default()));
                        self.state = State::DirTail;
                    }
                    _ => return Err(self.fail(self.unexpected(kind))),
                },

                State::TupleHead => match kind {
                    TokenKind::TupStart => self.tup.start_sub(),
                    TokenKind::TupEnd => self.close_tuple(),
                    TokenKind::VarStart => {
                        self.tup.push(TupElement::Variable(Variable::default()));
                        self.state = State::TupleVarHead;
                    }
                    TokenKind::StrMark => {
                        self.tup.push(TupElement::String(String::new()));
                        self.state = State::TupleString;
                    }
                    TokenKind::Whitespace | TokenKind::Newline => {}
                    TokenKind::Other => {
                        if text == MAYBE_MORE {
                            self.tup.push(TupElement::MaybeMore);
                        } else {
                            match parse_data(&text) {
                                Ok(data) => self.tup.push(data),
                                Err(cause) => return Err(self.fail(cause)),
                            }
                        }
                        self.state = State::TupleTail;
                    }
                    _ => return Err(self.fail(self.unexpected(kind))),
                },

                State::TupleTail => match kind {
                    TokenKind::TupEnd => self.close_tuple(),
                    TokenKind::TupSep => self.state = State::TupleHead,
                    TokenKind::Whitespace | TokenKind::Newline => {}
                    _ => return Err(self.fail(self.unexpected(kind))),
                },

                State::TupleString => match kind {
                    TokenKind::End => return Err(self.fail(self.unexpected(kind))),
                    TokenKind::StrMark => self.state = State::TupleTail,
                    _ => self.tup.push_str(&text),
                },

                State::TupleVarHead => match kind {
                    TokenKind::VarEnd => self.state = State::TupleTail,
                    TokenKind::Other => match ValueType::parse(&text) {
                        Some(t) => {
                            self.tup.push_type(t);
                            self.state = State::TupleVarTail;
                        }
                        None => return Err(self.fail(Cause::UnknownValueType)),
                    },
                    _ => return Err(self.fail(self.unexpected(kind))),
                },

                State::TupleVarTail => match kind {
                    TokenKind::VarEnd => self.state = State::TupleTail,
                    TokenKind::VarSep => self.state = State::TupleVarHead,
                    _ => return Err(self.fail(self.unexpected(kind))),
                },

                State::Separator => match kind {
                    TokenKind::End => {
                        return Ok(Query::Key(Key {
                            directory: Directory(self.dir),
                            tuple: self.key_tuple,
                        }))
                    }
                    TokenKind::KvSep => self.state = State::Value,
                    TokenKind::Whitespace | TokenKind::Newline => {}
                    _ => return Err(self.fail(self.unexpected(kind))),
                },

                State::Value => match kind {
                    TokenKind::TupStart => {
                        self.tup = TupBuilder::new();
                        self.val_tup = true;
                        self.state = State::TupleHead;
                    }
                    TokenKind::VarStart => {
                        self.value = Value::Variable(Variable::default());
                        self.state = State::ValueVarHead;
                    }
                    TokenKind::Whitespace | TokenKind::Newline => {}
                    TokenKind::Other => {
                        if text == CLEAR {
                            self.value = Value::Clear;
                        } else {
                            match parse_data(&text) {
                                // parse_data never yields MaybeMore, so
                                // the value form always exists.
                                Ok(data) => self.value = data.into_value().unwrap(),
                                Err(cause) => return Err(self.fail(cause)),
                            }
                        }
                        self.state = State::Finished;
                    }
                    _ => return Err(self.fail(self.unexpected(kind))),
                },

                State::ValueVarHead => match kind {
                    TokenKind::VarEnd => self.state = State::Finished,
                    TokenKind::Other => match ValueType::parse(&text) {
                        Some(t) => {
                            if let Value::Variable(v) = &mut self.value {
                                v.0.push(t);
                            }
                            self.state = State::ValueVarTail;
                        }
                        None => return Err(self.fail(Cause::UnknownValueType)),
                    },
                    _ => return Err(self.fail(self.unexpected(kind))),
                },

                State::ValueVarTail => match kind {
                    TokenKind::VarEnd => self.state = State::Finished,
                    TokenKind::VarSep => self.state = State::ValueVarHead,
                    _ => return Err(self.fail(self.unexpected(kind))),
                },

                State::Finished => match kind {
                    TokenKind::Whitespace | TokenKind::Newline => {}
                    TokenKind::End => {
                        return Ok(Query::KeyValue(KeyValue {
                            key: Key {
                                directory: Directory(self.dir),
                                tuple: self.key_tuple,
                            },
                            value: self.value,
                        }))
                    }
                    _ => return Err(self.fail(self.unexpected(kind))),
                },
            }
        }
    }

    /// Closes the innermost open tuple. Closing the outermost one hands
    /// the finished tuple to the key or the value, depending on which
    /// side of the separator it started on.
    fn close_tuple(&mut self) {
        if let Some(root) = self.tup.end() {
            if self.val_tup {
                self.value = Value::Tuple(root);
                self.state = State::Finished;
            } else {
                self.key_tuple = root;
                self.state = State::Separator;
            }
        } else {
            self.state = State::TupleTail;
        }
    }

    fn append_to_last_part(&mut self, text: &str) -> bool {
        match self.dir.last_mut() {
            Some(DirElement::String(s)) => {
                s.push_str(text);
                true
            }
            _ => false,
        }
    }

    fn check_escape(&mut self, literal: &str) -> Result<char, Error> {
        match literal.chars().nth(1) {
            Some(c) if c == DIR_SEP => Ok(c),
            _ => {
                let cause = Cause::UnknownEscape {
                    literal: literal.to_string(),
                    state: self.state.name(),
                };
                Err(self.fail(cause))
            }
        }
    }

    fn unexpected(&self, kind: TokenKind) -> Cause {
        Cause::UnexpectedToken {
            state: self.state.name(),
            kind: kind.name(),
        }
    }

    /// Builds the structured error, scanning the rest of the input so the
    /// rendering can show the whole query.
    fn fail(&mut self, cause: Cause) -> Error {
        let index = self.tokens.len() - 1;
        loop {
            let kind = self.scanner.scan();
            if kind == TokenKind::End {
                return Error {
                    tokens: std::mem::take(&mut self.tokens),
                    index,
                    cause,
                };
            }
            self.tokens.push(Token {
                kind,
                text: self.scanner.token().to_string(),
            });
        }
    }
}

struct TupBuilder {
    stack: Vec<Vec<TupElement>>,
}

impl TupBuilder {
    fn new() -> TupBuilder {
        TupBuilder {
            stack: vec![Vec::new()],
        }
    }

    fn start_sub(&mut self) {
        self.stack.push(Vec::new());
    }

    /// Pops one tuple level; returns the root tuple once the outermost
    /// level closes.
    fn end(&mut self) -> Option<Tuple> {
        if self.stack.len() == 1 {
            return Some(Tuple(self.stack.pop().unwrap()));
        }
        let sub = self.stack.pop().unwrap();
        self.push(TupElement::Tuple(Tuple(sub)));
        None
    }

    fn push(&mut self, e: TupElement) {
        self.stack.last_mut().unwrap().push(e);
    }

    fn push_type(&mut self, t: ValueType) {
        if let Some(TupElement::Variable(v)) = self.stack.last_mut().unwrap().last_mut() {
            v.0.push(t);
        }
    }

    fn push_str(&mut self, text: &str) {
        if let Some(TupElement::String(s)) = self.stack.last_mut().unwrap().last_mut() {
            s.push_str(text);
        }
    }
}

/// Recognizes an `Other` literal as data. Attempts, in order: reserved
/// words, hex bytes, UUID, signed int, unsigned int, float. Values that
/// fit a signed 64 parse as `Int` even when written unsigned, so that
/// round-trips through the store are stable.
fn parse_data(token: &str) -> Result<TupElement, Cause> {
    if token == scanner::NIL {
        return Ok(TupElement::Nil);
    }
    if token == scanner::TRUE {
        return Ok(TupElement::Bool(true));
    }
    if token == scanner::FALSE {
        return Ok(TupElement::Bool(false));
    }
    if let Some(digits) = token.strip_prefix(HEX_START) {
        if digits.len() % 2 != 0 {
            return Err(Cause::OddHexDigits);
        }
        return hex::decode(digits)
            .map(TupElement::Bytes)
            .map_err(|_| Cause::BadHexDigits);
    }
    if token.matches('-').count() == 4 {
        return parse_uuid(token);
    }
    if let Ok(i) = token.parse::<i64>() {
        return Ok(TupElement::Int(i));
    }
    if let Ok(u) = token.parse::<u64>() {
        return Ok(TupElement::Uint(u));
    }
    if let Ok(f) = token.parse::<f64>() {
        return Ok(TupElement::Float(f));
    }
    Err(Cause::UnrecognizedData)
}

fn parse_uuid(token: &str) -> Result<TupElement, Cause> {
    let groups: Vec<&str> = token.split('-').collect();
    for (i, expected) in [8usize, 4, 4, 4, 12].iter().enumerate() {
        if groups[i].len() != *expected {
            return Err(Cause::BadUuidGroup {
                group: ordinal(i + 1),
                expected: *expected,
                actual: groups[i].len(),
            });
        }
    }
    let raw = hex::decode(token.replace('-', "")).map_err(|_| Cause::BadHexDigits)?;
    let raw: [u8; 16] = raw.try_into().map_err(|_| Cause::BadHexDigits)?;
    Ok(TupElement::Uuid(uuid::Uuid::from_bytes(raw)))
}

fn ordinal(n: usize) -> String {
    let suffix = match (n % 10, n % 100) {
        (1, 11) | (2, 12) | (3, 13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}
