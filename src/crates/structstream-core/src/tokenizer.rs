//! Incremental UTF-8 JSON tokenizer
//!
//! The tokenizer accepts push writes of text or raw bytes and emits lexical
//! [`Token`]s. It is built for LLM output: every token may arrive split
//! across arbitrarily many writes, including in the middle of a multi-byte
//! UTF-8 code point, an escape sequence, a keyword, or a number literal.
//!
//! # Design properties
//!
//! - **Incremental UTF-8.** At most three trailing bytes are buffered
//!   between writes; pending bytes never surface as replacement characters.
//!   Ending the stream with an incomplete sequence is a lexical error.
//! - **String streaming.** In incremental mode (`stream_strings`), open
//!   string literals are re-emitted as accumulated prefixes with
//!   `partial: true`, coalesced by [`TokenizerOptions::partial_flush_bytes`]
//!   to bound the emission rate. The closing quote always emits the full
//!   value with `partial: false`.
//! - **Terminal error state.** After a lexical error the tokenizer stays in
//!   an error state and silently ignores further writes; the embedding
//!   pipeline decides whether to reset.
//! - **Separator option.** A configured separator string is recognized only
//!   outside strings, numbers, and keywords, and emits [`Token::Separator`]
//!   so concatenated top-level values (JSONL-style streams) can be split.
//!
//! The tokenizer is fully synchronous: `write_*` returns without awaiting.
//!
//! # Example
//!
//! ```rust
//! use structstream_core::tokenizer::{Tokenizer, TokenizerOptions};
//! use structstream_core::token::Token;
//!
//! let mut tok = Tokenizer::new(TokenizerOptions::default());
//! let mut tokens = tok.write_str("{\"na").unwrap();
//! tokens.extend(tok.write_str("me\": tr").unwrap());
//! tokens.extend(tok.write_str("ue}").unwrap());
//! tokens.extend(tok.end().unwrap());
//!
//! assert_eq!(tokens.first(), Some(&Token::LeftBrace));
//! assert!(tokens.contains(&Token::True));
//! assert_eq!(tokens.last(), Some(&Token::RightBrace));
//! ```

use crate::error::StreamingError;
use crate::token::Token;

/// Configuration for the tokenizer.
#[derive(Debug, Clone)]
pub struct TokenizerOptions {
    /// Emit accumulating `partial: true` string prefixes while a string
    /// value is still streaming. When disabled, strings are emitted once,
    /// at completion.
    pub stream_strings: bool,

    /// Accept bare `\n` / `\r` inside string literals (common in LLM
    /// output) instead of failing lexically.
    pub handle_unescaped_newlines: bool,

    /// Document separator for streams that concatenate multiple top-level
    /// JSON values. Recognized only outside strings, numbers, and keywords.
    pub separator: Option<String>,

    /// Minimum number of new string bytes between two partial emissions.
    /// `0` emits on every write that added content.
    pub partial_flush_bytes: usize,
}

impl Default for TokenizerOptions {
    fn default() -> Self {
        Self {
            stream_strings: true,
            handle_unescaped_newlines: true,
            separator: None,
            partial_flush_bytes: 0,
        }
    }
}

/// Escape-sequence progress inside a string literal.
///
/// Surrogate pairs span two `\uXXXX` escapes; the intermediate states keep
/// the high half while the stream delivers the rest, byte by byte if need
/// be.
#[derive(Debug)]
enum Escape {
    None,
    Start,
    Unicode { digits: String },
    LowStart { high: u16 },
    LowU { high: u16 },
    LowUnicode { high: u16, digits: String },
}

#[derive(Debug)]
struct StringState {
    value: String,
    /// Bytes already covered by a partial emission, for coalescing.
    emitted: usize,
    escape: Escape,
}

impl StringState {
    fn new() -> Self {
        Self {
            value: String::new(),
            emitted: 0,
            escape: Escape::None,
        }
    }
}

#[derive(Debug)]
enum Mode {
    Idle,
    InString(StringState),
    InNumber(String),
    InKeyword(String),
    /// Matched this many leading characters of the configured separator.
    InSeparator(usize),
}

/// Incremental JSON tokenizer. See the module docs for the contract.
pub struct Tokenizer {
    opts: TokenizerOptions,
    sep_chars: Vec<char>,
    mode: Mode,
    /// Undecoded trailing bytes of a split UTF-8 code point (at most 3).
    utf8_pending: Vec<u8>,
    /// Decoded-stream byte offset, for error reporting.
    offset: u64,
    failed: bool,
    ended: bool,
}

impl Tokenizer {
    /// Create a tokenizer with the given options.
    pub fn new(opts: TokenizerOptions) -> Self {
        let sep_chars = opts
            .separator
            .as_deref()
            .map(|s| s.chars().collect())
            .unwrap_or_default();
        Self {
            opts,
            sep_chars,
            mode: Mode::Idle,
            utf8_pending: Vec::new(),
            offset: 0,
            failed: false,
            ended: false,
        }
    }

    /// Whether the tokenizer is in its terminal error state.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Push a text chunk. Returns the tokens completed (or partially
    /// emitted) by this write.
    pub fn write_str(&mut self, chunk: &str) -> Result<Vec<Token>, StreamingError> {
        if self.failed || self.ended {
            return Ok(Vec::new());
        }
        if !self.utf8_pending.is_empty() {
            return Err(self.fail(StreamingError::lexical(
                self.offset,
                "text write while a UTF-8 sequence from a byte write is incomplete",
            )));
        }
        let mut out = Vec::new();
        for c in chunk.chars() {
            self.step(c, &mut out)?;
        }
        self.flush_partial(&mut out);
        Ok(out)
    }

    /// Push a byte chunk. Multi-byte code points may straddle writes; up to
    /// three trailing bytes are held back until the sequence completes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<Vec<Token>, StreamingError> {
        if self.failed || self.ended {
            return Ok(Vec::new());
        }
        let mut buf = std::mem::take(&mut self.utf8_pending);
        buf.extend_from_slice(bytes);

        let valid = match std::str::from_utf8(&buf) {
            Ok(_) => buf.len(),
            Err(e) => {
                if e.error_len().is_some() {
                    return Err(self.fail(StreamingError::lexical(
                        self.offset,
                        "invalid UTF-8 in input",
                    )));
                }
                e.valid_up_to()
            }
        };
        let text = std::str::from_utf8(&buf[..valid]).expect("prefix validated by valid_up_to");

        let mut out = Vec::new();
        for c in text.chars() {
            self.step(c, &mut out)?;
        }
        self.utf8_pending = buf[valid..].to_vec();
        self.flush_partial(&mut out);
        Ok(out)
    }

    /// Signal end-of-input. Flushes any pending number/keyword token.
    /// Idempotent: a second call returns no tokens and no error.
    pub fn end(&mut self) -> Result<Vec<Token>, StreamingError> {
        if self.failed || self.ended {
            return Ok(Vec::new());
        }
        self.ended = true;

        if !self.utf8_pending.is_empty() {
            return Err(self.fail(StreamingError::lexical(
                self.offset,
                "incomplete UTF-8 sequence at end of stream",
            )));
        }

        let mut out = Vec::new();
        loop {
            match std::mem::replace(&mut self.mode, Mode::Idle) {
                Mode::Idle => break,
                Mode::InString(_) => {
                    return Err(self.fail(StreamingError::lexical(
                        self.offset,
                        "unterminated string at end of stream",
                    )));
                }
                Mode::InNumber(lexeme) => {
                    let token = self.finalize_number(&lexeme)?;
                    out.push(token);
                }
                Mode::InKeyword(lexeme) => {
                    let token = self.finalize_keyword(&lexeme)?;
                    out.push(token);
                }
                Mode::InSeparator(matched) => {
                    // A half-matched separator at end-of-input degrades to
                    // ordinary characters.
                    let prefix: Vec<char> = self.sep_chars[..matched].to_vec();
                    for ch in prefix {
                        self.dispatch(ch, false, &mut out)?;
                    }
                }
            }
        }
        Ok(out)
    }

    fn fail(&mut self, err: StreamingError) -> StreamingError {
        self.failed = true;
        err
    }

    fn step(&mut self, c: char, out: &mut Vec<Token>) -> Result<(), StreamingError> {
        self.offset += c.len_utf8() as u64;
        self.dispatch(c, true, out)
    }

    /// Route one character through the current mode. `allow_sep` is cleared
    /// while replaying a half-matched separator prefix so the replay cannot
    /// re-enter separator matching.
    fn dispatch(&mut self, c: char, allow_sep: bool, out: &mut Vec<Token>) -> Result<(), StreamingError> {
        match std::mem::replace(&mut self.mode, Mode::Idle) {
            Mode::Idle => self.idle_char(c, allow_sep, out),
            Mode::InString(st) => self.string_char(st, c, out),
            Mode::InNumber(lexeme) => self.number_char(lexeme, c, allow_sep, out),
            Mode::InKeyword(lexeme) => self.keyword_char(lexeme, c, allow_sep, out),
            Mode::InSeparator(matched) => self.separator_char(matched, c, out),
        }
    }

    fn idle_char(&mut self, c: char, allow_sep: bool, out: &mut Vec<Token>) -> Result<(), StreamingError> {
        if allow_sep {
            if let Some(&first) = self.sep_chars.first() {
                if c == first {
                    if self.sep_chars.len() == 1 {
                        out.push(Token::Separator);
                    } else {
                        self.mode = Mode::InSeparator(1);
                    }
                    return Ok(());
                }
            }
        }
        match c {
            ' ' | '\t' | '\n' | '\r' => Ok(()),
            '{' => {
                out.push(Token::LeftBrace);
                Ok(())
            }
            '}' => {
                out.push(Token::RightBrace);
                Ok(())
            }
            '[' => {
                out.push(Token::LeftBracket);
                Ok(())
            }
            ']' => {
                out.push(Token::RightBracket);
                Ok(())
            }
            ':' => {
                out.push(Token::Colon);
                Ok(())
            }
            ',' => {
                out.push(Token::Comma);
                Ok(())
            }
            '"' => {
                self.mode = Mode::InString(StringState::new());
                Ok(())
            }
            '-' | '0'..='9' => {
                self.mode = Mode::InNumber(c.to_string());
                Ok(())
            }
            't' | 'f' | 'n' => {
                self.mode = Mode::InKeyword(c.to_string());
                Ok(())
            }
            _ => Err(self.fail(StreamingError::lexical(
                self.offset,
                format!("unexpected character {:?}", c),
            ))),
        }
    }

    fn string_char(
        &mut self,
        mut st: StringState,
        c: char,
        out: &mut Vec<Token>,
    ) -> Result<(), StreamingError> {
        match std::mem::replace(&mut st.escape, Escape::None) {
            Escape::None => match c {
                '"' => {
                    out.push(Token::Str {
                        value: st.value,
                        partial: false,
                    });
                    return Ok(());
                }
                '\\' => st.escape = Escape::Start,
                '\n' | '\r' if self.opts.handle_unescaped_newlines => st.value.push(c),
                c if (c as u32) < 0x20 => {
                    return Err(self.fail(StreamingError::lexical(
                        self.offset,
                        format!("unescaped control character {:?} in string", c),
                    )));
                }
                c => st.value.push(c),
            },
            Escape::Start => match c {
                '"' => st.value.push('"'),
                '\\' => st.value.push('\\'),
                '/' => st.value.push('/'),
                'b' => st.value.push('\u{0008}'),
                'f' => st.value.push('\u{000C}'),
                'n' => st.value.push('\n'),
                'r' => st.value.push('\r'),
                't' => st.value.push('\t'),
                'u' => {
                    st.escape = Escape::Unicode {
                        digits: String::new(),
                    }
                }
                c => {
                    return Err(self.fail(StreamingError::lexical(
                        self.offset,
                        format!("invalid escape character {:?}", c),
                    )));
                }
            },
            Escape::Unicode { mut digits } => {
                if !c.is_ascii_hexdigit() {
                    return Err(self.fail(StreamingError::lexical(
                        self.offset,
                        format!("invalid unicode escape digit {:?}", c),
                    )));
                }
                digits.push(c);
                if digits.len() < 4 {
                    st.escape = Escape::Unicode { digits };
                } else {
                    let code = u16::from_str_radix(&digits, 16)
                        .map_err(|_| self.fail(StreamingError::lexical(self.offset, "invalid unicode escape")))?;
                    match code {
                        0xD800..=0xDBFF => st.escape = Escape::LowStart { high: code },
                        0xDC00..=0xDFFF => {
                            return Err(self.fail(StreamingError::lexical(
                                self.offset,
                                "unpaired low surrogate in unicode escape",
                            )));
                        }
                        _ => {
                            let decoded = char::from_u32(code as u32).ok_or_else(|| {
                                StreamingError::lexical(self.offset, "invalid unicode escape")
                            })?;
                            st.value.push(decoded);
                        }
                    }
                }
            }
            Escape::LowStart { high } => {
                if c != '\\' {
                    return Err(self.fail(StreamingError::lexical(
                        self.offset,
                        "unpaired high surrogate in unicode escape",
                    )));
                }
                st.escape = Escape::LowU { high };
            }
            Escape::LowU { high } => {
                if c != 'u' {
                    return Err(self.fail(StreamingError::lexical(
                        self.offset,
                        "unpaired high surrogate in unicode escape",
                    )));
                }
                st.escape = Escape::LowUnicode {
                    high,
                    digits: String::new(),
                };
            }
            Escape::LowUnicode { high, mut digits } => {
                if !c.is_ascii_hexdigit() {
                    return Err(self.fail(StreamingError::lexical(
                        self.offset,
                        format!("invalid unicode escape digit {:?}", c),
                    )));
                }
                digits.push(c);
                if digits.len() < 4 {
                    st.escape = Escape::LowUnicode { high, digits };
                } else {
                    let low = u16::from_str_radix(&digits, 16)
                        .map_err(|_| self.fail(StreamingError::lexical(self.offset, "invalid unicode escape")))?;
                    if !(0xDC00..=0xDFFF).contains(&low) {
                        return Err(self.fail(StreamingError::lexical(
                            self.offset,
                            "expected low surrogate in unicode escape",
                        )));
                    }
                    let combined = 0x10000
                        + (((high as u32) - 0xD800) << 10)
                        + ((low as u32) - 0xDC00);
                    let decoded = char::from_u32(combined).ok_or_else(|| {
                        StreamingError::lexical(self.offset, "invalid surrogate pair")
                    })?;
                    st.value.push(decoded);
                }
            }
        }
        self.mode = Mode::InString(st);
        Ok(())
    }

    fn number_char(
        &mut self,
        mut lexeme: String,
        c: char,
        allow_sep: bool,
        out: &mut Vec<Token>,
    ) -> Result<(), StreamingError> {
        if matches!(c, '0'..='9' | '.' | 'e' | 'E' | '+' | '-') {
            lexeme.push(c);
            self.mode = Mode::InNumber(lexeme);
            return Ok(());
        }
        let token = self.finalize_number(&lexeme)?;
        out.push(token);
        self.dispatch(c, allow_sep, out)
    }

    fn keyword_char(
        &mut self,
        mut lexeme: String,
        c: char,
        allow_sep: bool,
        out: &mut Vec<Token>,
    ) -> Result<(), StreamingError> {
        if c.is_ascii_alphabetic() {
            lexeme.push(c);
            if lexeme.len() > 5 {
                return Err(self.fail(StreamingError::lexical(
                    self.offset,
                    format!("invalid keyword {:?}", lexeme),
                )));
            }
            self.mode = Mode::InKeyword(lexeme);
            return Ok(());
        }
        let token = self.finalize_keyword(&lexeme)?;
        out.push(token);
        self.dispatch(c, allow_sep, out)
    }

    fn separator_char(
        &mut self,
        matched: usize,
        c: char,
        out: &mut Vec<Token>,
    ) -> Result<(), StreamingError> {
        if c == self.sep_chars[matched] {
            if matched + 1 == self.sep_chars.len() {
                out.push(Token::Separator);
            } else {
                self.mode = Mode::InSeparator(matched + 1);
            }
            return Ok(());
        }
        // Mismatch: the tentatively consumed prefix degrades to ordinary
        // characters, replayed with separator matching disabled.
        let prefix: Vec<char> = self.sep_chars[..matched].to_vec();
        for ch in prefix {
            self.dispatch(ch, false, out)?;
        }
        self.dispatch(c, true, out)
    }

    fn finalize_number(&mut self, lexeme: &str) -> Result<Token, StreamingError> {
        if !valid_json_number(lexeme) {
            return Err(self.fail(StreamingError::lexical(
                self.offset,
                format!("invalid number literal {:?}", lexeme),
            )));
        }
        let number = if lexeme.bytes().any(|b| matches!(b, b'.' | b'e' | b'E')) {
            lexeme
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
        } else {
            lexeme
                .parse::<i64>()
                .map(serde_json::Number::from)
                .ok()
                .or_else(|| lexeme.parse::<u64>().map(serde_json::Number::from).ok())
                .or_else(|| {
                    lexeme
                        .parse::<f64>()
                        .ok()
                        .and_then(serde_json::Number::from_f64)
                })
        };
        match number {
            Some(n) => Ok(Token::Number(n)),
            None => Err(self.fail(StreamingError::lexical(
                self.offset,
                format!("unrepresentable number literal {:?}", lexeme),
            ))),
        }
    }

    fn finalize_keyword(&mut self, lexeme: &str) -> Result<Token, StreamingError> {
        match lexeme {
            "true" => Ok(Token::True),
            "false" => Ok(Token::False),
            "null" => Ok(Token::Null),
            other => Err(self.fail(StreamingError::lexical(
                self.offset,
                format!("invalid keyword {:?}", other),
            ))),
        }
    }

    /// Emit an accumulated string prefix if incremental mode is on and the
    /// coalescing threshold has been reached since the last emission.
    fn flush_partial(&mut self, out: &mut Vec<Token>) {
        if !self.opts.stream_strings {
            return;
        }
        if let Mode::InString(st) = &mut self.mode {
            if matches!(st.escape, Escape::None) {
                let new = st.value.len().saturating_sub(st.emitted);
                if new > 0 && new >= self.opts.partial_flush_bytes {
                    out.push(Token::Str {
                        value: st.value.clone(),
                        partial: true,
                    });
                    st.emitted = st.value.len();
                }
            }
        }
    }
}

/// Strict JSON number grammar: `-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?`.
fn valid_json_number(s: &str) -> bool {
    let b = s.as_bytes();
    let mut i = 0;
    if i < b.len() && b[i] == b'-' {
        i += 1;
    }
    match b.get(i) {
        Some(b'0') => i += 1,
        Some(d) if d.is_ascii_digit() => {
            while i < b.len() && b[i].is_ascii_digit() {
                i += 1;
            }
        }
        _ => return false,
    }
    if b.get(i) == Some(&b'.') {
        i += 1;
        let start = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return false;
        }
    }
    if matches!(b.get(i), Some(b'e') | Some(b'E')) {
        i += 1;
        if matches!(b.get(i), Some(b'+') | Some(b'-')) {
            i += 1;
        }
        let start = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return false;
        }
    }
    i == b.len()
}
