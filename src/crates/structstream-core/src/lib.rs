//! # structstream-core
//!
//! Streaming structured-JSON engine: extract schema-shaped partial objects
//! from LLM token streams in real time.
//!
//! A client supplies a declarative object schema and an upstream that
//! yields UTF-8 JSON fragments as a model produces them. The engine emits a
//! monotonically growing sequence of partial snapshots, each mirroring the
//! schema's shape, so user interfaces can hydrate fields incrementally
//! instead of waiting for the complete response.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   tokens   ┌────────────┐   events   ┌───────────┐
//! │ Tokenizer│ ─────────> │ Recognizer │ ─────────> │ Assembler │
//! │  (bytes) │            │ (grammar)  │   + paths  │  (stub)   │
//! └──────────┘            └────────────┘            └─────┬─────┘
//!       ▲                                                 │ snapshots
//!       │ chunks                                          ▼
//! ┌─────┴─────┐                                   ┌──────────────┐
//! │ Upstream  │ <──── pull-driven backpressure ── │   Consumer   │
//! │  source   │                                   │ (async iter) │
//! └───────────┘                                   └──────────────┘
//! ```
//!
//! - [`tokenizer`] decodes bytes/text into lexical tokens, incrementally:
//!   multi-byte code points, escapes, keywords, and numbers may straddle
//!   writes.
//! - [`parser`] recognizes the JSON grammar, tracking a container stack and
//!   deriving the path of every token.
//! - [`stub`] pre-builds the schema-shaped skeleton every snapshot starts
//!   from; [`snapshot`] applies recognizer events to it in place and tracks
//!   completion metadata.
//! - [`pipeline`] composes the above with the validation policy;
//!   [`engine`] exposes it as a cold async snapshot stream; [`adapters`]
//!   bridge readers and iterators.
//!
//! # Quick start
//!
//! ```rust
//! use structstream_core::engine::{stream_snapshots, EngineOptions, InputChunk};
//! use structstream_core::pipeline::ValidationMode;
//! use structstream_core::schema::{Schema, SchemaLike};
//! use structstream_core::adapters::iter_chunks;
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let schema: Arc<dyn SchemaLike> = Arc::new(Schema::object([
//!     ("name", Schema::string()),
//!     ("age", Schema::number()),
//! ]));
//!
//! let upstream = iter_chunks(vec!["{\"name\":", "\"Alice\"", ",\"age\": 30}"]);
//! let options = EngineOptions::new().with_validation_mode(ValidationMode::Final);
//!
//! let mut snapshots = stream_snapshots(schema, upstream, options).unwrap();
//! let mut last = None;
//! while let Some(chunk) = snapshots.next().await {
//!     last = Some(chunk.unwrap());
//! }
//! let last = last.unwrap();
//! assert!(last.meta.is_valid);
//! assert_eq!(last.value()["name"], "Alice");
//! # }
//! ```
//!
//! # Snapshot contract
//!
//! - Every schema-declared key is present from the first snapshot,
//!   populated with a default.
//! - Writes are last-write-wins per path; deeper writes never clobber
//!   completed siblings; arrays grow by index in insertion order.
//! - `_completedPaths` is append-only and deduplicated; `_activePath`
//!   tracks the most recent token.
//! - Snapshots are structural clones — later stream progress never mutates
//!   a snapshot already handed to the consumer.

pub mod adapters;
pub mod engine;
pub mod error;
#[cfg(feature = "json-validation")]
pub mod json_schema;
pub mod parser;
pub mod path;
pub mod pipeline;
pub mod schema;
pub mod snapshot;
pub mod stub;
pub mod token;
pub mod tokenizer;

pub use engine::{stream_snapshots, EngineOptions, InputChunk, SnapshotObserver, SnapshotStream};
pub use error::{
    EngineError, Result, SchemaResolutionError, SnapshotValidationError, StreamingError,
};
pub use parser::{ParseEvent, Parser, ParserOptions, ParserState};
pub use path::{Path, PathSegment};
pub use pipeline::{Pipeline, PipelineFinish, PipelineOptions, ValidationMode};
pub use schema::{Schema, SchemaIssue, SchemaKind, SchemaLike};
pub use snapshot::{Assembler, AssemblerOptions, SnapshotChunk, SnapshotMeta};
pub use stub::{build_stub, TypeDefaults};
pub use token::Token;
pub use tokenizer::{Tokenizer, TokenizerOptions};
