//! # Token Scanner
//!
//! A single-pass, index-based JSON lexer. The scanner fills a caller-provided
//! slice of [`Token`]s and never allocates; tokens reference the source buffer
//! by byte offsets and form a tree only through their `parent` indices.
//!
//! Object keys own their values: a key token has `size == 1` and its value is
//! the token that follows it. Containers count their direct children in
//! `size` (keys for objects, items for arrays).

use thiserror::Error;

/// Marker for a container whose closing bracket has not been seen yet
pub const UNCLOSED: usize = usize::MAX;

/// Lexical kind of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Object,
    Array,
    /// A quoted string; the span includes both quotes
    String,
    /// Numbers, `true`, `false`, `null` (or any bare word in lenient mode)
    Primitive,
}

/// A half-open byte span of the source buffer plus its place in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    /// Number of direct children
    pub size: usize,
    pub parent: Option<usize>,
}

impl Token {
    /// An unused slot, suitable for pre-sizing token buffers
    pub const EMPTY: Token = Token {
        kind: TokenKind::Primitive,
        start: 0,
        end: UNCLOSED,
        size: 0,
        parent: None,
    };

    fn is_open(&self) -> bool {
        self.end == UNCLOSED
    }

    pub fn is_container(&self) -> bool {
        matches!(self.kind, TokenKind::Object | TokenKind::Array)
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Failure modes of [`scan`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScanError {
    /// The token buffer is too small; retry with a larger one
    #[error("token buffer exhausted")]
    OutOfTokenSlots,
    #[error("invalid character at byte {0}")]
    InvalidCharacter(usize),
    #[error("unexpected end of input")]
    Incomplete,
}

/// How permissive the scanner is about bare words and structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    /// Only JSON literals and numbers are accepted as primitives, keys must be
    /// strings, values must be separated by exactly one comma, and a primitive
    /// must be followed by a delimiter
    #[default]
    Strict,
    /// Any bare word is a primitive and may run to the end of input
    Lenient,
}

/// Scan `src` into `tokens`, returning the number of tokens used.
///
/// The token slice is overwritten from index 0 and can be reused across calls.
pub fn scan(src: &str, tokens: &mut [Token], mode: ScanMode) -> Result<usize, ScanError> {
    let mut state = ScanState {
        tokens,
        next: 0,
        open: None,
        last: Last::Start,
        mode,
    };
    state.run(src.as_bytes())
}

/// Previous structural element, used to enforce separators in strict mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Last {
    Start,
    Open,
    Comma,
    Colon,
    Value,
}

struct ScanState<'t> {
    tokens: &'t mut [Token],
    next: usize,
    open: Option<usize>,
    last: Last,
    mode: ScanMode,
}

impl ScanState<'_> {
    fn strict(&self) -> bool {
        self.mode == ScanMode::Strict
    }

    fn run(&mut self, bytes: &[u8]) -> Result<usize, ScanError> {
        let mut pos = 0;
        while pos < bytes.len() {
            match bytes[pos] {
                b'{' => {
                    self.open_container(TokenKind::Object, pos)?;
                    pos += 1;
                }
                b'[' => {
                    self.open_container(TokenKind::Array, pos)?;
                    pos += 1;
                }
                b'}' => {
                    self.close_container(TokenKind::Object, pos)?;
                    pos += 1;
                }
                b']' => {
                    self.close_container(TokenKind::Array, pos)?;
                    pos += 1;
                }
                b'"' => {
                    self.check_value_position(pos, true)?;
                    let end = scan_string(bytes, pos)?;
                    let index = self.alloc(TokenKind::String, pos, end)?;
                    self.attach(index);
                    self.last = Last::Value;
                    pos = end;
                }
                b'\t' | b'\r' | b'\n' | b' ' => pos += 1,
                b':' => {
                    let key = self.next.checked_sub(1);
                    if self.strict() && !self.is_pending_key(key) {
                        return Err(ScanError::InvalidCharacter(pos));
                    }
                    self.open = key;
                    self.last = Last::Colon;
                    pos += 1;
                }
                b',' => {
                    if self.strict()
                        && (self.has_dangling_key() || self.last != Last::Value || self.open.is_none())
                    {
                        return Err(ScanError::InvalidCharacter(pos));
                    }
                    self.last = Last::Comma;
                    if let Some(open) = self.open {
                        if !self.tokens[open].is_container() {
                            self.open = self.tokens[open].parent;
                        }
                    }
                    pos += 1;
                }
                c => {
                    if self.strict() && !matches!(c, b'-' | b'0'..=b'9' | b't' | b'f' | b'n') {
                        return Err(ScanError::InvalidCharacter(pos));
                    }
                    self.check_value_position(pos, false)?;
                    let end = self.scan_primitive(bytes, pos)?;
                    let index = self.alloc(TokenKind::Primitive, pos, end)?;
                    self.attach(index);
                    self.last = Last::Value;
                    pos = end;
                }
            }
        }

        if self.tokens[..self.next].iter().any(Token::is_open) {
            return Err(ScanError::Incomplete);
        }
        Ok(self.next)
    }

    fn alloc(&mut self, kind: TokenKind, start: usize, end: usize) -> Result<usize, ScanError> {
        let index = self.next;
        let slot = self
            .tokens
            .get_mut(index)
            .ok_or(ScanError::OutOfTokenSlots)?;
        *slot = Token {
            kind,
            start,
            end,
            size: 0,
            parent: None,
        };
        self.next += 1;
        Ok(index)
    }

    fn attach(&mut self, index: usize) {
        if let Some(parent) = self.open {
            self.tokens[parent].size += 1;
            self.tokens[index].parent = Some(parent);
        }
    }

    /// In strict mode, rejects values not preceded by a separator, values that
    /// would become object keys and keys that already hold a value.
    fn check_value_position(&self, pos: usize, is_string: bool) -> Result<(), ScanError> {
        if !self.strict() {
            return Ok(());
        }
        if self.last == Last::Value {
            return Err(ScanError::InvalidCharacter(pos));
        }
        if let Some(open) = self.open {
            let parent = &self.tokens[open];
            let misplaced = match parent.kind {
                TokenKind::Object => !is_string || self.is_pending_key(self.next.checked_sub(1)),
                TokenKind::String => parent.size != 0,
                _ => false,
            };
            if misplaced {
                return Err(ScanError::InvalidCharacter(pos));
            }
        }
        Ok(())
    }

    fn is_pending_key(&self, index: Option<usize>) -> bool {
        index.is_some_and(|i| {
            let token = &self.tokens[i];
            token.kind == TokenKind::String
                && token.size == 0
                && token.parent.is_some()
                && token.parent == self.open
                && self.open.is_some_and(|o| self.tokens[o].kind == TokenKind::Object)
        })
    }

    /// `{"key"}`, `{"key":}` and `{"key",`
    fn has_dangling_key(&self) -> bool {
        match self.open {
            Some(open) if self.tokens[open].kind == TokenKind::String => self.tokens[open].size == 0,
            _ => self.is_pending_key(self.next.checked_sub(1)),
        }
    }

    fn open_container(&mut self, kind: TokenKind, pos: usize) -> Result<(), ScanError> {
        self.check_value_position(pos, false)?;
        let index = self.alloc(kind, pos, UNCLOSED)?;
        self.attach(index);
        self.open = Some(index);
        self.last = Last::Open;
        Ok(())
    }

    fn close_container(&mut self, kind: TokenKind, pos: usize) -> Result<(), ScanError> {
        if self.strict()
            && (self.has_dangling_key() || !matches!(self.last, Last::Value | Last::Open))
        {
            return Err(ScanError::InvalidCharacter(pos));
        }

        let mut index = self
            .next
            .checked_sub(1)
            .ok_or(ScanError::InvalidCharacter(pos))?;
        loop {
            let token = self.tokens[index];
            if token.is_open() {
                if token.kind != kind {
                    return Err(ScanError::InvalidCharacter(pos));
                }
                self.tokens[index].end = pos + 1;
                self.open = token.parent;
                self.last = Last::Value;
                return Ok(());
            }
            index = token.parent.ok_or(ScanError::InvalidCharacter(pos))?;
        }
    }

    fn scan_primitive(&self, bytes: &[u8], start: usize) -> Result<usize, ScanError> {
        let mut pos = start;
        while pos < bytes.len() {
            match bytes[pos] {
                b'\t' | b'\r' | b'\n' | b' ' | b',' | b']' | b'}' => {
                    return self.check_primitive(bytes, start, pos);
                }
                b':' if !self.strict() => return Ok(pos),
                c if !(32..127).contains(&c) => return Err(ScanError::InvalidCharacter(pos)),
                _ => pos += 1,
            }
        }
        if self.strict() {
            Err(ScanError::Incomplete)
        } else {
            Ok(pos)
        }
    }

    fn check_primitive(&self, bytes: &[u8], start: usize, end: usize) -> Result<usize, ScanError> {
        if !self.strict() {
            return Ok(end);
        }
        let word = &bytes[start..end];
        let valid = match word[0] {
            b't' => word == b"true",
            b'f' => word == b"false",
            b'n' => word == b"null",
            _ => is_number(word),
        };
        if valid {
            Ok(end)
        } else {
            Err(ScanError::InvalidCharacter(start))
        }
    }
}

/// `-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?`
fn is_number(word: &[u8]) -> bool {
    fn digits(word: &[u8], pos: &mut usize) -> usize {
        let start = *pos;
        while word.get(*pos).is_some_and(u8::is_ascii_digit) {
            *pos += 1;
        }
        *pos - start
    }

    let mut pos = 0;
    if word.first() == Some(&b'-') {
        pos += 1;
    }
    match word.get(pos) {
        Some(b'0') => pos += 1,
        Some(b'1'..=b'9') => {
            digits(word, &mut pos);
        }
        _ => return false,
    }
    if word.get(pos) == Some(&b'.') {
        pos += 1;
        if digits(word, &mut pos) == 0 {
            return false;
        }
    }
    if matches!(word.get(pos), Some(b'e' | b'E')) {
        pos += 1;
        if matches!(word.get(pos), Some(b'+' | b'-')) {
            pos += 1;
        }
        if digits(word, &mut pos) == 0 {
            return false;
        }
    }
    pos == word.len()
}

/// Scan a quoted string starting at the opening quote; returns the offset one
/// past the closing quote.
fn scan_string(bytes: &[u8], start: usize) -> Result<usize, ScanError> {
    let mut pos = start + 1;
    while pos < bytes.len() {
        match bytes[pos] {
            b'"' => return Ok(pos + 1),
            b'\\' => {
                let escape = *bytes.get(pos + 1).ok_or(ScanError::Incomplete)?;
                match escape {
                    b'"' | b'/' | b'\\' | b'b' | b'f' | b'r' | b'n' | b't' => pos += 2,
                    b'u' => {
                        for offset in 2..6 {
                            let digit = *bytes.get(pos + offset).ok_or(ScanError::Incomplete)?;
                            if !digit.is_ascii_hexdigit() {
                                return Err(ScanError::InvalidCharacter(pos + offset));
                            }
                        }
                        pos += 6;
                    }
                    _ => return Err(ScanError::InvalidCharacter(pos + 1)),
                }
            }
            c if c < 0x20 => return Err(ScanError::InvalidCharacter(pos)),
            _ => pos += 1,
        }
    }
    Err(ScanError::Incomplete)
}
