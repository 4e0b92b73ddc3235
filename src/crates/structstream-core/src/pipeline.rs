//! The synchronous per-schema pipeline: tokenizer → recognizer → assembler
//!
//! A [`Pipeline`] is the push-driven composition the async engine and the
//! channel dispatcher both build on. Writes are fully synchronous; at most
//! one snapshot is produced per write, and only when the write actually
//! mutated the stub or grew the completed-path ledger. A write carrying
//! several completions yields one snapshot containing all of them, in
//! order — the ledger never loses growth, key/punctuation tokens never
//! produce no-change snapshots.
//!
//! # Validation modes
//!
//! - [`ValidationMode::None`]: `_isValid` is always `true`; the schema is
//!   never consulted during streaming.
//! - [`ValidationMode::OnComplete`]: every time the ledger grows, the
//!   schema runs against the current stub and the verdict is carried
//!   forward on subsequent snapshots. Invalid intermediates are flagged,
//!   never suppressed.
//! - [`ValidationMode::Final`]: one validation when the stream closes. On
//!   success the final snapshot carries the schema-parsed value and
//!   `_isValid: true`; on failure a last `_isValid: false` snapshot is
//!   emitted and the [`SnapshotValidationError`] is surfaced.

use crate::error::{SchemaResolutionError, SnapshotValidationError, StreamingError};
use crate::parser::{Parser, ParserOptions};
use crate::schema::SchemaLike;
use crate::snapshot::{Assembler, AssemblerOptions, SnapshotChunk};
use crate::stub::{build_stub, TypeDefaults};
use crate::token::Token;
use crate::tokenizer::{Tokenizer, TokenizerOptions};
use serde_json::Value;
use std::sync::Arc;

/// When (if ever) the schema validates the accumulated snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// Never validate during streaming
    #[default]
    None,
    /// Validate whenever the completed-path ledger grows
    OnComplete,
    /// Validate once, at end-of-stream
    Final,
}

/// Configuration shared by the engine and per-channel dispatcher pipelines.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Validation policy
    pub validation_mode: ValidationMode,
    /// Fallbacks for primitive fields without a schema-declared default
    pub type_defaults: TypeDefaults,
    /// Partial seed overriding computed defaults at matching paths
    pub default_data: Option<Value>,
    /// Tokenizer configuration (string streaming, separator, newlines)
    pub tokenizer: TokenizerOptions,
    /// Require the root JSON value to be an object
    pub strict_root: bool,
    /// Assembler configuration (auto-unstringify)
    pub assembler: AssemblerOptions,
}

impl PipelineOptions {
    /// Options matching the expected LLM-output contract: strict object
    /// root, incremental strings, lenient newlines.
    pub fn new() -> Self {
        Self {
            strict_root: true,
            ..Self::default()
        }
    }
}

/// Everything `finish` produces: trailing snapshots, plus the validation
/// rejection when `final` mode failed.
#[derive(Debug, Clone)]
pub struct PipelineFinish {
    /// Snapshots flushed at end-of-stream, in order
    pub snapshots: Vec<SnapshotChunk>,
    /// Present when final validation rejected the snapshot
    pub validation: Option<SnapshotValidationError>,
}

/// Push-driven tokenizer → recognizer → assembler composition.
pub struct Pipeline {
    schema: Arc<dyn SchemaLike>,
    mode: ValidationMode,
    tokenizer: Tokenizer,
    parser: Parser,
    assembler: Assembler,
    finish_result: Option<PipelineFinish>,
}

impl Pipeline {
    /// Build a pipeline for `schema`. Fails when the schema is not
    /// object-shaped (raised before any bytes are consumed).
    pub fn new(
        schema: Arc<dyn SchemaLike>,
        opts: PipelineOptions,
    ) -> Result<Self, SchemaResolutionError> {
        let stub = build_stub(&schema, &opts.type_defaults, opts.default_data.as_ref())?;
        // Only `none` mode starts out vacuously valid; the other modes
        // report false until a validation run says otherwise.
        let initial_valid = matches!(opts.validation_mode, ValidationMode::None);
        let parser = Parser::new(ParserOptions {
            strict_root: opts.strict_root,
            expect_separator: opts.tokenizer.separator.is_some(),
        });
        tracing::debug!(mode = ?opts.validation_mode, "pipeline constructed");
        Ok(Self {
            schema,
            mode: opts.validation_mode,
            tokenizer: Tokenizer::new(opts.tokenizer),
            parser,
            assembler: Assembler::new(stub, initial_valid, opts.assembler),
            finish_result: None,
        })
    }

    /// Push a text chunk; returns the snapshot for this write, if the
    /// write changed anything.
    pub fn write_str(&mut self, chunk: &str) -> Result<Option<SnapshotChunk>, StreamingError> {
        let tokens = self.tokenizer.write_str(chunk)?;
        self.apply_tokens(&tokens)?;
        Ok(self.emit_if_changed())
    }

    /// Push a byte chunk; multi-byte UTF-8 may straddle writes.
    pub fn write_bytes(&mut self, chunk: &[u8]) -> Result<Option<SnapshotChunk>, StreamingError> {
        let tokens = self.tokenizer.write_bytes(chunk)?;
        self.apply_tokens(&tokens)?;
        Ok(self.emit_if_changed())
    }

    /// Signal end-of-stream: flushes pending tokens, checks the grammar is
    /// complete, and runs `final`-mode validation. Idempotent — a second
    /// call returns the same result without validating again.
    pub fn finish(&mut self) -> Result<PipelineFinish, StreamingError> {
        if let Some(cached) = &self.finish_result {
            return Ok(cached.clone());
        }
        let tokens = self.tokenizer.end()?;
        self.apply_tokens(&tokens)?;
        self.parser.end()?;

        let mut snapshots = Vec::new();
        if let Some(snap) = self.emit_if_changed() {
            snapshots.push(snap);
        }

        let mut validation = None;
        if matches!(self.mode, ValidationMode::Final) {
            match self.schema.safe_parse(self.assembler.data()) {
                Ok(parsed) => {
                    self.assembler.set_data(parsed);
                    self.assembler.set_valid(true);
                    snapshots.push(self.assembler.take_snapshot());
                }
                Err(issues) => {
                    tracing::debug!(issues = issues.len(), "final validation rejected snapshot");
                    self.assembler.set_valid(false);
                    snapshots.push(self.assembler.take_snapshot());
                    validation = Some(SnapshotValidationError::new(
                        "final snapshot failed schema validation",
                        issues,
                    ));
                }
            }
        }

        let result = PipelineFinish {
            snapshots,
            validation,
        };
        self.finish_result = Some(result.clone());
        Ok(result)
    }

    /// Current stub value (the latest partial object).
    pub fn data(&self) -> &Value {
        self.assembler.data()
    }

    fn apply_tokens(&mut self, tokens: &[Token]) -> Result<(), StreamingError> {
        for token in tokens {
            if let Some(event) = self.parser.advance(token)? {
                self.assembler.apply(&event);
            }
        }
        Ok(())
    }

    fn emit_if_changed(&mut self) -> Option<SnapshotChunk> {
        if !self.assembler.has_changes() {
            return None;
        }
        if matches!(self.mode, ValidationMode::OnComplete) && self.assembler.completions_grew() {
            let valid = self.schema.safe_parse(self.assembler.data()).is_ok();
            if valid != self.assembler.is_valid() {
                tracing::debug!(valid, "on-complete validation verdict changed");
            }
            self.assembler.set_valid(valid);
        }
        Some(self.assembler.take_snapshot())
    }
}
