//! Multi-channel envelope dispatcher
//!
//! Demultiplexes an upstream of [`Envelope`]s into per-channel streaming
//! pipelines and merges their snapshots into a single ordered output
//! sequence. Each channel (logical producer node) gets its own tokenizer →
//! recognizer → assembler pipeline, created lazily on its first observed
//! fragment and driven synchronously inside the dispatch loop — the whole
//! dispatcher runs on one logical task, so per-channel FIFO order and
//! cross-channel arrival order both hold by construction.
//!
//! # Channel resolution
//!
//! The channel tag comes from `langgraph_node`, else from the first tag in
//! `tags` matching a configured schema key, else from the configured
//! `default_node`. Envelopes that resolve to no channel are dropped and,
//! when configured, reported through the missing-node observer — there is
//! no silent cross-channel leakage.
//!
//! # Output shape
//!
//! Every emitted snapshot carries `_type = channel` and a `data[0]` that
//! merges all observed channels: `{ channel → that channel's current
//! partial object }`, in first-observation order. A channel's entry
//! appears as soon as its pipeline exists, default-populated.
//!
//! # Lifecycle and errors
//!
//! A byte-depth counter per channel tracks `{`/`[` openings minus closings
//! outside string literals; when it returns to zero the channel's document
//! is closed, its pipeline finishes (running `final`-mode validation), and
//! — when `release_channels` is set — its state is released. With
//! `fail_fast` the first per-channel error aborts the run; otherwise
//! errors are collected, sibling channels keep streaming, and the recorded
//! errors are yielded after the upstream closes.

use crate::envelope::Envelope;
use futures::stream::{Stream, StreamExt};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use structstream_core::engine::{SnapshotObserver, SnapshotStream};
use structstream_core::error::EngineError;
use structstream_core::pipeline::{Pipeline, PipelineOptions};
use structstream_core::schema::SchemaLike;
use structstream_core::snapshot::SnapshotChunk;
use tokio::sync::watch;

/// Observer invoked once per envelope dropped for lack of a routable tag.
pub type MissingNodeHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Dispatcher configuration.
#[derive(Clone)]
pub struct DispatcherOptions {
    /// Per-channel schemas, keyed by channel tag
    pub schemas: HashMap<String, Arc<dyn SchemaLike>>,
    /// Fallback schema for tags without a dedicated entry
    pub default_schema: Option<Arc<dyn SchemaLike>>,
    /// Tag applied when an envelope carries none
    pub default_node: Option<String>,
    /// Observer for envelopes dropped as unroutable
    pub on_missing_node: Option<MissingNodeHandler>,
    /// Abort the whole run on the first per-channel error
    pub fail_fast: bool,
    /// Release per-channel state when its byte depth returns to zero
    pub release_channels: bool,
    /// Per-channel pipeline configuration
    pub pipeline: PipelineOptions,
    /// Cancellation signal; `true` stops the stream
    pub cancel: Option<watch::Receiver<bool>>,
    /// Per-snapshot observer (merged snapshots)
    pub observer: Option<Arc<dyn SnapshotObserver>>,
}

impl DispatcherOptions {
    /// Options for the given channel schemas; fail-fast off, channels
    /// released on close, strict-root pipelines.
    pub fn new(schemas: HashMap<String, Arc<dyn SchemaLike>>) -> Self {
        Self {
            schemas,
            default_schema: None,
            default_node: None,
            on_missing_node: None,
            fail_fast: false,
            release_channels: true,
            pipeline: PipelineOptions::new(),
            cancel: None,
            observer: None,
        }
    }

    /// Set the fallback schema for unknown tags.
    pub fn with_default_schema(mut self, schema: Arc<dyn SchemaLike>) -> Self {
        self.default_schema = Some(schema);
        self
    }

    /// Set the tag applied when an envelope carries none.
    pub fn with_default_node(mut self, node: impl Into<String>) -> Self {
        self.default_node = Some(node.into());
        self
    }

    /// Observe envelopes dropped for lack of a routable tag.
    pub fn with_missing_node_handler(mut self, handler: MissingNodeHandler) -> Self {
        self.on_missing_node = Some(handler);
        self
    }

    /// Abort the run on the first per-channel error.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Keep per-channel state after its document closes.
    pub fn with_release_channels(mut self, release: bool) -> Self {
        self.release_channels = release;
        self
    }

    /// Replace the per-channel pipeline configuration.
    pub fn with_pipeline(mut self, pipeline: PipelineOptions) -> Self {
        self.pipeline = pipeline;
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

impl std::fmt::Debug for DispatcherOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherOptions")
            .field("schemas", &self.schemas.keys().collect::<Vec<_>>())
            .field("default_schema", &self.default_schema.is_some())
            .field("default_node", &self.default_node)
            .field("fail_fast", &self.fail_fast)
            .field("release_channels", &self.release_channels)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

/// Byte-depth tracker: `{`/`[` openings minus closings, ignoring string
/// contents. Escape state survives chunk boundaries.
#[derive(Debug, Default)]
struct DepthTracker {
    depth: i64,
    in_string: bool,
    escaped: bool,
}

impl DepthTracker {
    fn feed(&mut self, text: &str) {
        for c in text.chars() {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if c == '\\' {
                    self.escaped = true;
                } else if c == '"' {
                    self.in_string = false;
                }
            } else {
                match c {
                    '"' => self.in_string = true,
                    '{' | '[' => self.depth += 1,
                    '}' | ']' => self.depth -= 1,
                    _ => {}
                }
            }
        }
    }
}

struct ChannelState {
    pipeline: Pipeline,
    depth: DepthTracker,
    /// A container character has been seen; preamble stripping is over.
    started: bool,
    finished: bool,
    dead: bool,
}

enum ChannelEvent {
    Snapshots(Vec<SnapshotChunk>),
    Failed(EngineError),
}

impl ChannelState {
    fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            depth: DepthTracker::default(),
            started: false,
            finished: false,
            dead: false,
        }
    }

    /// Feed one envelope's worth of text, returning the snapshots it
    /// produced (including any finish-time snapshots when the document
    /// closed) or the channel's terminal error.
    fn write(&mut self, text: &str, release_on_close: bool) -> (ChannelEvent, bool) {
        let mut text = text;
        if !self.started {
            // First-write coalescence: drop any non-JSON preamble up to
            // the first container character.
            match text.find(|c| c == '{' || c == '[') {
                Some(pos) => {
                    text = &text[pos..];
                    self.started = true;
                }
                None => return (ChannelEvent::Snapshots(Vec::new()), false),
            }
        }
        self.depth.feed(text);

        let mut snapshots = Vec::new();
        match self.pipeline.write_str(text) {
            Ok(Some(snap)) => snapshots.push(snap),
            Ok(None) => {}
            Err(e) => {
                self.dead = true;
                return (ChannelEvent::Failed(e.into()), false);
            }
        }

        let mut release = false;
        if !self.finished && self.depth.depth <= 0 && !self.depth.in_string {
            self.finished = true;
            release = release_on_close;
            match self.pipeline.finish() {
                Ok(finish) => {
                    snapshots.extend(finish.snapshots);
                    if let Some(validation) = finish.validation {
                        self.dead = true;
                        return (ChannelEvent::Failed(validation.into()), release);
                    }
                }
                Err(e) => {
                    self.dead = true;
                    return (ChannelEvent::Failed(e.into()), release);
                }
            }
        }
        (ChannelEvent::Snapshots(snapshots), release)
    }

    /// Finish at upstream close, for channels whose document never closed.
    fn finish(&mut self) -> ChannelEvent {
        if self.finished || self.dead {
            return ChannelEvent::Snapshots(Vec::new());
        }
        self.finished = true;
        match self.pipeline.finish() {
            Ok(finish) => {
                if let Some(validation) = finish.validation {
                    self.dead = true;
                    return ChannelEvent::Failed(validation.into());
                }
                ChannelEvent::Snapshots(finish.snapshots)
            }
            Err(e) => {
                self.dead = true;
                ChannelEvent::Failed(e.into())
            }
        }
    }
}

/// Demultiplex an envelope upstream into per-channel pipelines, merging
/// their snapshots into one ordered, `_type`-tagged output sequence.
pub fn dispatch_envelopes<S>(upstream: S, options: DispatcherOptions) -> SnapshotStream
where
    S: Stream<Item = Result<Envelope, EngineError>> + Send + 'static,
{
    let stream = async_stream::stream! {
        futures::pin_mut!(upstream);

        let mut channels: HashMap<String, ChannelState> = HashMap::new();
        // First-observation order, for the merged object's key order.
        let mut order: Vec<String> = Vec::new();
        // Last seen partial value per channel; survives channel release.
        let mut latest: HashMap<String, Value> = HashMap::new();
        // Per-channel errors collected when fail_fast is off.
        let mut recorded: Vec<EngineError> = Vec::new();
        let mut cancelled = false;

        'main: loop {
            if is_cancelled(&options.cancel) {
                cancelled = true;
                break;
            }
            let envelope = match upstream.next().await {
                Some(Ok(envelope)) => envelope,
                Some(Err(e)) => {
                    // Upstream failure is global, regardless of fail_fast.
                    yield Err(e);
                    return;
                }
                None => break,
            };

            let channel = match resolve_channel(&envelope, &options) {
                Some(channel) => channel,
                None => {
                    tracing::debug!("dropping envelope without routable channel tag");
                    if let Some(handler) = &options.on_missing_node {
                        handler(&envelope);
                    }
                    continue;
                }
            };

            let text = envelope.message().fragment_text();
            if text.is_empty() {
                continue;
            }

            if !channels.contains_key(&channel) {
                let schema = match options
                    .schemas
                    .get(&channel)
                    .or(options.default_schema.as_ref())
                {
                    Some(schema) => schema.clone(),
                    None => {
                        tracing::debug!(channel = channel.as_str(), "no schema for channel");
                        if let Some(handler) = &options.on_missing_node {
                            handler(&envelope);
                        }
                        continue;
                    }
                };
                match Pipeline::new(schema, options.pipeline.clone()) {
                    Ok(pipeline) => {
                        tracing::debug!(channel = channel.as_str(), "channel pipeline created");
                        if !order.contains(&channel) {
                            order.push(channel.clone());
                        }
                        latest.insert(channel.clone(), pipeline.data().clone());
                        channels.insert(channel.clone(), ChannelState::new(pipeline));
                    }
                    Err(e) => {
                        if options.fail_fast {
                            yield Err(e.into());
                            return;
                        }
                        tracing::warn!(channel = channel.as_str(), error = %e, "channel pipeline failed to build");
                        recorded.push(e.into());
                        continue;
                    }
                }
            }

            let state = match channels.get_mut(&channel) {
                Some(state) => state,
                None => continue,
            };
            if state.dead {
                continue;
            }

            let (event, release) = state.write(&text, options.release_channels);
            match event {
                ChannelEvent::Snapshots(snapshots) => {
                    for snapshot in snapshots {
                        latest.insert(channel.clone(), snapshot.value().clone());
                        let merged = merged_chunk(&order, &latest, snapshot, &channel, &envelope);
                        if let Some(observer) = &options.observer {
                            if let Err(e) = observer.on_snapshot(&merged).await {
                                yield Err(EngineError::Observer(e));
                                return;
                            }
                        }
                        yield Ok(merged);
                        if is_cancelled(&options.cancel) {
                            cancelled = true;
                            break 'main;
                        }
                    }
                }
                ChannelEvent::Failed(e) => {
                    if options.fail_fast {
                        yield Err(e);
                        return;
                    }
                    tracing::warn!(channel = channel.as_str(), error = %e, "channel pipeline failed");
                    recorded.push(e);
                }
            }
            if release {
                tracing::debug!(channel = channel.as_str(), "channel released");
                channels.remove(&channel);
            }
        }

        if cancelled {
            tracing::debug!("dispatcher cancelled");
            return;
        }

        // Upstream closed: finish channels whose documents never closed.
        for channel in &order {
            let Some(state) = channels.get_mut(channel) else {
                continue;
            };
            match state.finish() {
                ChannelEvent::Snapshots(snapshots) => {
                    for snapshot in snapshots {
                        latest.insert(channel.clone(), snapshot.value().clone());
                        let mut merged_meta = snapshot.meta.clone();
                        merged_meta.node_type = Some(channel.clone());
                        let merged = SnapshotChunk {
                            data: vec![merged_value(&order, &latest)],
                            meta: merged_meta,
                        };
                        if let Some(observer) = &options.observer {
                            if let Err(e) = observer.on_snapshot(&merged).await {
                                yield Err(EngineError::Observer(e));
                                return;
                            }
                        }
                        yield Ok(merged);
                    }
                }
                ChannelEvent::Failed(e) => {
                    if options.fail_fast {
                        yield Err(e);
                        return;
                    }
                    recorded.push(e);
                }
            }
        }

        // Report collected per-channel errors in-order, after all data.
        for e in recorded {
            yield Err(e);
        }
    };

    Box::pin(stream)
}

/// Channel tag resolution: `langgraph_node`, else the first tag matching a
/// configured schema key, else the default node.
fn resolve_channel(envelope: &Envelope, options: &DispatcherOptions) -> Option<String> {
    let meta = envelope.meta();
    if let Some(node) = &meta.langgraph_node {
        return Some(node.clone());
    }
    if let Some(tags) = &meta.tags {
        if let Some(tag) = tags.iter().find(|t| options.schemas.contains_key(*t)) {
            return Some(tag.clone());
        }
    }
    options.default_node.clone()
}

fn merged_value(order: &[String], latest: &HashMap<String, Value>) -> Value {
    let mut merged = Map::new();
    for name in order {
        if let Some(value) = latest.get(name) {
            merged.insert(name.clone(), value.clone());
        }
    }
    Value::Object(merged)
}

fn merged_chunk(
    order: &[String],
    latest: &HashMap<String, Value>,
    snapshot: SnapshotChunk,
    channel: &str,
    envelope: &Envelope,
) -> SnapshotChunk {
    let mut meta = snapshot.meta;
    meta.node_type = Some(channel.to_string());
    meta.usage = envelope.message().usage_metadata.clone();
    meta.reasoning = envelope.message().reasoning.clone();
    SnapshotChunk {
        data: vec![merged_value(order, latest)],
        meta,
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
}
