//! Per-schema engine entry: a cold, consumer-paced snapshot stream
//!
//! [`stream_snapshots`] wires an upstream of UTF-8 JSON fragments through a
//! [`Pipeline`] and exposes the result as an ordered asynchronous sequence
//! of [`SnapshotChunk`]s. The sequence is cold and pull-driven: upstream
//! reads happen only as the consumer polls, which is also how backpressure
//! propagates — the pipeline never buffers unbounded snapshots.
//!
//! Errors are delivered in-order after any snapshots already emitted, and
//! terminate the sequence. In `final` validation mode a failing validation
//! first emits the last `_isValid: false` snapshot, then surfaces the
//! [`SnapshotValidationError`](crate::error::SnapshotValidationError).
//!
//! # Cancellation
//!
//! Dropping the returned stream cancels everything (the upstream is owned
//! by the stream). For explicit cancellation, hand in a
//! `tokio::sync::watch` receiver via [`EngineOptions::with_cancel`]; once
//! it reads `true`, no further snapshots are emitted and upstream reads
//! cease within one additional pull.
//!
//! # Example
//!
//! ```rust
//! use structstream_core::engine::{stream_snapshots, EngineOptions, InputChunk};
//! use structstream_core::schema::{Schema, SchemaLike};
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
//! let upstream = futures::stream::iter(
//!     vec!["{\"name\":", "\"Alice\"", ",\"age\": 30}"]
//!         .into_iter()
//!         .map(|c| Ok(InputChunk::from(c))),
//! );
//!
//! let mut snapshots = stream_snapshots(schema, upstream, EngineOptions::default()).unwrap();
//! while let Some(chunk) = snapshots.next().await {
//!     let chunk = chunk.unwrap();
//!     println!("{}", chunk.value());
//! }
//! # }
//! ```

use crate::error::{EngineError, SchemaResolutionError};
use crate::pipeline::{Pipeline, PipelineOptions, ValidationMode};
use crate::schema::SchemaLike;
use crate::snapshot::SnapshotChunk;
use crate::stub::TypeDefaults;
use crate::tokenizer::TokenizerOptions;
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;

/// Type alias for the engine's output sequence.
pub type SnapshotStream =
    Pin<Box<dyn Stream<Item = Result<SnapshotChunk, EngineError>> + Send>>;

/// One upstream fragment: text, or raw UTF-8 bytes that may split a
/// multi-byte code point at either edge.
#[derive(Debug, Clone, PartialEq)]
pub enum InputChunk {
    /// Decoded text
    Text(String),
    /// Raw UTF-8 bytes
    Bytes(Vec<u8>),
}

impl InputChunk {
    /// The chunk as raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            InputChunk::Text(s) => s.into_bytes(),
            InputChunk::Bytes(b) => b,
        }
    }
}

impl From<String> for InputChunk {
    fn from(s: String) -> Self {
        InputChunk::Text(s)
    }
}

impl From<&str> for InputChunk {
    fn from(s: &str) -> Self {
        InputChunk::Text(s.to_string())
    }
}

impl From<Vec<u8>> for InputChunk {
    fn from(b: Vec<u8>) -> Self {
        InputChunk::Bytes(b)
    }
}

impl From<&[u8]> for InputChunk {
    fn from(b: &[u8]) -> Self {
        InputChunk::Bytes(b.to_vec())
    }
}

/// Async observer invoked once per emitted snapshot, sequentially: a call
/// must resolve before the next snapshot is delivered.
#[async_trait]
pub trait SnapshotObserver: Send + Sync {
    /// Called with every snapshot before it is yielded downstream.
    /// Returning an error aborts the stream with
    /// [`EngineError::Observer`].
    async fn on_snapshot(&self, chunk: &SnapshotChunk) -> anyhow::Result<()>;
}

/// Engine configuration: an explicit options record rather than a builder
/// chain, with `with_*` conveniences for the common knobs.
#[derive(Clone, Default)]
pub struct EngineOptions {
    /// Pipeline configuration (validation, defaults, tokenizer, assembler)
    pub pipeline: PipelineOptions,
    /// Cancellation signal; `true` stops the stream
    pub cancel: Option<watch::Receiver<bool>>,
    /// Per-snapshot observer
    pub observer: Option<Arc<dyn SnapshotObserver>>,
}

impl EngineOptions {
    /// Default options: strict root, incremental strings, no validation.
    pub fn new() -> Self {
        Self {
            pipeline: PipelineOptions::new(),
            cancel: None,
            observer: None,
        }
    }

    /// Set the validation mode.
    pub fn with_validation_mode(mut self, mode: ValidationMode) -> Self {
        self.pipeline.validation_mode = mode;
        self
    }

    /// Set primitive type defaults for the stub.
    pub fn with_type_defaults(mut self, defaults: TypeDefaults) -> Self {
        self.pipeline.type_defaults = defaults;
        self
    }

    /// Seed the stub with partial default data.
    pub fn with_default_data(mut self, data: Value) -> Self {
        self.pipeline.default_data = Some(data);
        self
    }

    /// Replace the tokenizer configuration.
    pub fn with_tokenizer(mut self, tokenizer: TokenizerOptions) -> Self {
        self.pipeline.tokenizer = tokenizer;
        self
    }

    /// Allow non-object roots (strict root is the default contract).
    pub fn with_strict_root(mut self, strict: bool) -> Self {
        self.pipeline.strict_root = strict;
        self
    }

    /// Attach a cancellation signal.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Attach a per-snapshot observer.
    pub fn with_observer(mut self, observer: Arc<dyn SnapshotObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

impl std::fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineOptions")
            .field("pipeline", &self.pipeline)
            .field("cancel", &self.cancel.is_some())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// Stream schema-shaped partial snapshots from an upstream of JSON
/// fragments.
///
/// Fails immediately (before consuming any input) when the schema is not
/// object-shaped. All later failures arrive through the stream itself.
pub fn stream_snapshots<S>(
    schema: Arc<dyn SchemaLike>,
    upstream: S,
    options: EngineOptions,
) -> Result<SnapshotStream, SchemaResolutionError>
where
    S: Stream<Item = Result<InputChunk, EngineError>> + Send + 'static,
{
    let EngineOptions {
        pipeline: pipeline_opts,
        cancel,
        observer,
    } = options;
    let mut pipeline = Pipeline::new(schema, pipeline_opts)?;

    let stream = async_stream::try_stream! {
        futures::pin_mut!(upstream);
        let mut cancelled = false;

        loop {
            if is_cancelled(&cancel) {
                cancelled = true;
                break;
            }
            let chunk = match upstream.next().await {
                Some(item) => item?,
                None => break,
            };
            let snapshot = match chunk {
                InputChunk::Text(text) => pipeline.write_str(&text),
                InputChunk::Bytes(bytes) => pipeline.write_bytes(&bytes),
            }
            .map_err(EngineError::from)?;

            if let Some(snapshot) = snapshot {
                if is_cancelled(&cancel) {
                    cancelled = true;
                    break;
                }
                notify(&observer, &snapshot).await?;
                yield snapshot;
            }
        }

        if !cancelled {
            let finish = pipeline.finish().map_err(EngineError::from)?;
            for snapshot in finish.snapshots {
                if is_cancelled(&cancel) {
                    cancelled = true;
                    break;
                }
                notify(&observer, &snapshot).await?;
                yield snapshot;
            }
            if !cancelled {
                if let Some(validation) = finish.validation {
                    Err(EngineError::from(validation))?;
                }
            }
        }
        if cancelled {
            tracing::debug!("snapshot stream cancelled");
        }
    };

    Ok(Box::pin(stream))
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
}

async fn notify(
    observer: &Option<Arc<dyn SnapshotObserver>>,
    snapshot: &SnapshotChunk,
) -> Result<(), EngineError> {
    if let Some(observer) = observer {
        observer
            .on_snapshot(snapshot)
            .await
            .map_err(EngineError::Observer)?;
    }
    Ok(())
}
