//! Stateful JSON grammar recognizer
//!
//! The recognizer consumes lexical [`Token`]s and maintains a stack of open
//! containers plus the pending key inside each one. For every token it
//! derives the current [`Path`] and emits a [`ParseEvent`] describing what
//! happened at that path, which the snapshot assembler applies to the stub.
//!
//! # State machine
//!
//! ```text
//! VALUE ──'{'──> KEY          push object frame
//! VALUE ──'['──> VALUE        push array frame, key = 0
//! VALUE ──prim──> COMMA       emit scalar at path
//! KEY ──string──> COLON       pending key := value
//! KEY ──'}'──> COMMA/VALUE    close empty object
//! COLON ──':'──> VALUE
//! COMMA ──','──> KEY | VALUE  object: next key; array: key += 1
//! COMMA ──'}'/']'──> COMMA/VALUE   close container, emit at path
//! VALUE/COMMA + empty stack ──separator──> SEPARATOR
//! any + inadmissible token ──> ERROR (terminal)
//! ```
//!
//! When the stack empties after a completed value, the recognizer enters
//! `SEPARATOR` if a separator is configured (expecting one before the next
//! top-level value) and `ENDED` otherwise.
//!
//! Partial string tokens update the active path but never complete it; a
//! partial string arriving in key position is held until the terminal token
//! carries the full key.

use crate::error::StreamingError;
use crate::path::{Path, PathSegment};
use crate::token::Token;
use serde_json::Value;

/// Recognizer state. `Error` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Expecting a value
    Value,
    /// Expecting an object key (or `}` for an empty object)
    Key,
    /// Expecting `:` after a key
    Colon,
    /// Expecting `,` or a matching closing bracket after a value
    Comma,
    /// Expecting the configured separator before the next top-level value
    Separator,
    /// A complete top-level value was recognized and no separator is configured
    Ended,
    /// A grammatical error occurred
    Error,
}

impl ParserState {
    fn name(self) -> &'static str {
        match self {
            ParserState::Value => "VALUE",
            ParserState::Key => "KEY",
            ParserState::Colon => "COLON",
            ParserState::Comma => "COMMA",
            ParserState::Separator => "SEPARATOR",
            ParserState::Ended => "ENDED",
            ParserState::Error => "ERROR",
        }
    }
}

/// Path-tagged event derived from one token.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    /// An object opened at `path`.
    ObjectBegin {
        /// Location of the new object
        path: Path,
    },
    /// An array opened at `path`.
    ArrayBegin {
        /// Location of the new array
        path: Path,
    },
    /// A terminal primitive (string, number, boolean, null) completed.
    Scalar {
        /// Location of the value
        path: Path,
        /// The completed value
        value: Value,
    },
    /// An accumulating prefix of a still-streaming string value.
    StringPartial {
        /// Location of the value
        path: Path,
        /// Accumulated prefix
        value: String,
    },
    /// An object or array closed. Emitted in close order; the root
    /// container closing emits the empty path.
    ContainerEnd {
        /// Location of the closed container
        path: Path,
    },
}

impl ParseEvent {
    /// The path this event concerns.
    pub fn path(&self) -> &Path {
        match self {
            ParseEvent::ObjectBegin { path }
            | ParseEvent::ArrayBegin { path }
            | ParseEvent::Scalar { path, .. }
            | ParseEvent::StringPartial { path, .. }
            | ParseEvent::ContainerEnd { path } => path,
        }
    }

    /// Whether this event completes the value at its path.
    pub fn is_completion(&self) -> bool {
        matches!(
            self,
            ParseEvent::Scalar { .. } | ParseEvent::ContainerEnd { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerMode {
    Object,
    Array,
}

#[derive(Debug)]
struct Frame {
    mode: ContainerMode,
    /// The key currently being written inside this container. `None` for an
    /// object frame between a `{`/`,` and its next key.
    key: Option<PathSegment>,
    /// Number of member values completed so far.
    items: usize,
}

/// Recognizer configuration.
#[derive(Debug, Clone)]
pub struct ParserOptions {
    /// Require the first token of every top-level value to be `{`.
    pub strict_root: bool,
    /// Whether the embedding tokenizer is configured with a separator; after
    /// a top-level value the recognizer then expects one before the next.
    pub expect_separator: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            strict_root: true,
            expect_separator: false,
        }
    }
}

/// Token-driven grammar recognizer. See the module docs for the transition
/// table.
#[derive(Debug)]
pub struct Parser {
    opts: ParserOptions,
    state: ParserState,
    frames: Vec<Frame>,
}

impl Parser {
    /// Create a recognizer with the given options.
    pub fn new(opts: ParserOptions) -> Self {
        Self {
            opts,
            state: ParserState::Value,
            frames: Vec::new(),
        }
    }

    /// Current recognizer state.
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Current nesting depth (number of open containers).
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Consume one token, producing at most one event.
    pub fn advance(&mut self, token: &Token) -> Result<Option<ParseEvent>, StreamingError> {
        match self.state {
            ParserState::Value => self.on_value(token),
            ParserState::Key => self.on_key(token),
            ParserState::Colon => self.on_colon(token),
            ParserState::Comma => self.on_comma(token),
            ParserState::Separator => self.on_separator(token),
            ParserState::Ended => Err(self.fail("trailing content after complete value", token)),
            ParserState::Error => Err(StreamingError::grammar(
                "ERROR",
                "recognizer already in error state",
            )),
        }
    }

    /// Signal end-of-input. Fails if a container or value is still open.
    pub fn end(&mut self) -> Result<(), StreamingError> {
        if !self.frames.is_empty() {
            let state = self.state.name();
            self.state = ParserState::Error;
            return Err(StreamingError::grammar(
                state,
                "unterminated container at end of stream",
            ));
        }
        match self.state {
            ParserState::Value | ParserState::Separator | ParserState::Ended => Ok(()),
            ParserState::Error => Ok(()),
            _ => {
                let state = self.state.name();
                self.state = ParserState::Error;
                Err(StreamingError::grammar(
                    state,
                    "incomplete value at end of stream",
                ))
            }
        }
    }

    fn fail(&mut self, reason: impl Into<String>, token: &Token) -> StreamingError {
        let state = self.state.name();
        self.state = ParserState::Error;
        StreamingError::grammar(state, format!("{}: unexpected {}", reason.into(), token))
    }

    /// Path of the value currently being written: every frame's pending key.
    fn leaf_path(&self) -> Path {
        self.frames
            .iter()
            .filter_map(|f| f.key.clone())
            .collect()
    }

    /// Path of the innermost open container itself.
    fn container_path(&self) -> Path {
        let n = self.frames.len().saturating_sub(1);
        self.frames[..n]
            .iter()
            .filter_map(|f| f.key.clone())
            .collect()
    }

    fn on_value(&mut self, token: &Token) -> Result<Option<ParseEvent>, StreamingError> {
        if self.frames.is_empty() && self.opts.strict_root {
            if !matches!(token, Token::LeftBrace | Token::Separator) {
                return Err(self.fail("root value must be an object", token));
            }
        }
        match token {
            Token::LeftBrace => {
                let path = self.leaf_path();
                self.frames.push(Frame {
                    mode: ContainerMode::Object,
                    key: None,
                    items: 0,
                });
                self.state = ParserState::Key;
                Ok(Some(ParseEvent::ObjectBegin { path }))
            }
            Token::LeftBracket => {
                let path = self.leaf_path();
                self.frames.push(Frame {
                    mode: ContainerMode::Array,
                    key: Some(PathSegment::Index(0)),
                    items: 0,
                });
                self.state = ParserState::Value;
                Ok(Some(ParseEvent::ArrayBegin { path }))
            }
            Token::Str {
                value,
                partial: true,
            } => Ok(Some(ParseEvent::StringPartial {
                path: self.leaf_path(),
                value: value.clone(),
            })),
            Token::Str {
                value,
                partial: false,
            } => {
                let path = self.leaf_path();
                self.complete_value();
                Ok(Some(ParseEvent::Scalar {
                    path,
                    value: Value::String(value.clone()),
                }))
            }
            Token::Number(n) => {
                let path = self.leaf_path();
                self.complete_value();
                Ok(Some(ParseEvent::Scalar {
                    path,
                    value: Value::Number(n.clone()),
                }))
            }
            Token::True | Token::False => {
                let path = self.leaf_path();
                self.complete_value();
                Ok(Some(ParseEvent::Scalar {
                    path,
                    value: Value::Bool(matches!(token, Token::True)),
                }))
            }
            Token::Null => {
                let path = self.leaf_path();
                self.complete_value();
                Ok(Some(ParseEvent::Scalar {
                    path,
                    value: Value::Null,
                }))
            }
            Token::RightBracket => {
                // Only an immediately-empty array may close from VALUE.
                match self.frames.last() {
                    Some(f) if f.mode == ContainerMode::Array && f.items == 0 => {
                        let path = self.container_path();
                        self.frames.pop();
                        self.complete_value();
                        Ok(Some(ParseEvent::ContainerEnd { path }))
                    }
                    _ => Err(self.fail("expected value", token)),
                }
            }
            Token::Separator if self.frames.is_empty() => {
                // Leading or repeated separators between documents are inert.
                Ok(None)
            }
            other => Err(self.fail("expected value", other)),
        }
    }

    fn on_key(&mut self, token: &Token) -> Result<Option<ParseEvent>, StreamingError> {
        match token {
            Token::Str { partial: true, .. } => {
                // Keys only act once complete.
                Ok(None)
            }
            Token::Str {
                value,
                partial: false,
            } => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.key = Some(PathSegment::Key(value.clone()));
                }
                self.state = ParserState::Colon;
                Ok(None)
            }
            Token::RightBrace => {
                match self.frames.last() {
                    Some(f)
                        if f.mode == ContainerMode::Object
                            && f.items == 0
                            && f.key.is_none() =>
                    {
                        let path = self.container_path();
                        self.frames.pop();
                        self.complete_value();
                        Ok(Some(ParseEvent::ContainerEnd { path }))
                    }
                    _ => Err(self.fail("expected object key", token)),
                }
            }
            other => Err(self.fail("expected object key", other)),
        }
    }

    fn on_colon(&mut self, token: &Token) -> Result<Option<ParseEvent>, StreamingError> {
        match token {
            Token::Colon => {
                self.state = ParserState::Value;
                Ok(None)
            }
            other => Err(self.fail("expected ':'", other)),
        }
    }

    fn on_comma(&mut self, token: &Token) -> Result<Option<ParseEvent>, StreamingError> {
        let mode = match self.frames.last() {
            Some(f) => f.mode,
            None => return Err(self.fail("no open container", token)),
        };
        match (token, mode) {
            (Token::Comma, ContainerMode::Object) => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.key = None;
                }
                self.state = ParserState::Key;
                Ok(None)
            }
            (Token::Comma, ContainerMode::Array) => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.key = Some(PathSegment::Index(frame.items));
                }
                self.state = ParserState::Value;
                Ok(None)
            }
            (Token::RightBrace, ContainerMode::Object)
            | (Token::RightBracket, ContainerMode::Array) => {
                let path = self.container_path();
                self.frames.pop();
                self.complete_value();
                Ok(Some(ParseEvent::ContainerEnd { path }))
            }
            (other, _) => Err(self.fail("expected ',' or closing bracket", other)),
        }
    }

    fn on_separator(&mut self, token: &Token) -> Result<Option<ParseEvent>, StreamingError> {
        match token {
            Token::Separator => {
                self.state = ParserState::Value;
                Ok(None)
            }
            other => Err(self.fail("expected document separator", other)),
        }
    }

    /// Bookkeeping after a value (scalar or closed container) finishes.
    fn complete_value(&mut self) {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.items += 1;
                self.state = ParserState::Comma;
            }
            None => {
                self.state = if self.opts.expect_separator {
                    ParserState::Separator
                } else {
                    ParserState::Ended
                };
            }
        }
    }
}
