//! End-to-end tests for the multi-channel dispatcher
//!
//! These drive realistic envelope sequences — interleaved channels,
//! tool-call fragments, missing tags, per-channel failures — through the
//! full dispatch path and assert on the merged snapshot sequence.

use futures::stream::Stream;
use futures::StreamExt;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use structstream_core::error::EngineError;
use structstream_core::pipeline::{PipelineOptions, ValidationMode};
use structstream_core::schema::{Schema, SchemaLike};
use structstream_core::snapshot::SnapshotChunk;
use structstream_dispatch::{
    dispatch_envelopes, ContentPart, DispatcherOptions, Envelope, EnvelopeMeta, Message,
    ToolArgs,
};

fn two_channel_schemas() -> HashMap<String, Arc<dyn SchemaLike>> {
    let mut schemas: HashMap<String, Arc<dyn SchemaLike>> = HashMap::new();
    schemas.insert(
        "alpha".to_string(),
        Arc::new(Schema::object([("message", Schema::string())])),
    );
    schemas.insert(
        "beta".to_string(),
        Arc::new(Schema::object([("value", Schema::number())])),
    );
    schemas
}

fn envelopes(
    items: Vec<Envelope>,
) -> impl Stream<Item = Result<Envelope, EngineError>> + Send {
    futures::stream::iter(items.into_iter().map(Ok))
}

async fn collect(
    stream: structstream_core::engine::SnapshotStream,
) -> (Vec<SnapshotChunk>, Vec<EngineError>) {
    let mut snapshots = Vec::new();
    let mut errors = Vec::new();
    let mut stream = stream;
    while let Some(item) = stream.next().await {
        match item {
            Ok(snap) => snapshots.push(snap),
            Err(e) => errors.push(e),
        }
    }
    (snapshots, errors)
}

/// Interleaved channels: each channel's fragments assemble independently,
/// and every merged snapshot exposes all observed channels.
#[tokio::test]
async fn test_multi_channel_dispatch() {
    let upstream = envelopes(vec![
        Envelope::text("alpha", "{\"message\": "),
        Envelope::text("beta", "{\"value\":"),
        Envelope::tool_chunk("alpha", "\"hello\"}"),
        Envelope::tool_chunk("beta", "42}"),
    ]);
    let stream = dispatch_envelopes(upstream, DispatcherOptions::new(two_channel_schemas()));
    let (snapshots, errors) = collect(stream).await;

    assert!(errors.is_empty());
    assert_eq!(snapshots.len(), 2);

    let first = &snapshots[0];
    assert_eq!(first.meta.node_type.as_deref(), Some("alpha"));
    assert_eq!(first.value()["alpha"], json!({"message": "hello"}));
    // Beta's pipeline already exists, so its default shape is visible.
    assert_eq!(first.value()["beta"], json!({"value": null}));

    let second = &snapshots[1];
    assert_eq!(second.meta.node_type.as_deref(), Some("beta"));
    assert_eq!(second.value()["alpha"]["message"], "hello");
    assert_eq!(second.value()["beta"]["value"], 42);
}

/// Envelopes without a tag fall back to the configured default node.
#[tokio::test]
async fn test_missing_tag_uses_default_node() {
    let mut schemas: HashMap<String, Arc<dyn SchemaLike>> = HashMap::new();
    schemas.insert(
        "fallback".to_string(),
        Arc::new(Schema::object([("message", Schema::string())])),
    );

    let envelope = Envelope {
        event: None,
        data: (
            Message::text("{\"message\": \"hi\"}"),
            EnvelopeMeta::default(),
        ),
    };
    let options = DispatcherOptions::new(schemas).with_default_node("fallback");
    let (snapshots, errors) = collect(dispatch_envelopes(envelopes(vec![envelope]), options)).await;

    assert!(errors.is_empty());
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].meta.node_type.as_deref(), Some("fallback"));
    assert_eq!(snapshots[0].value()["fallback"]["message"], "hi");
}

/// Without a default node, untagged envelopes are dropped and the
/// missing-node observer fires exactly once per envelope.
#[tokio::test]
async fn test_missing_tag_invokes_observer_and_drops() {
    let dropped = Arc::new(AtomicUsize::new(0));
    let dropped_clone = dropped.clone();

    let envelope = Envelope {
        event: None,
        data: (
            Message::text("{\"message\": \"hi\"}"),
            EnvelopeMeta::default(),
        ),
    };
    let options = DispatcherOptions::new(two_channel_schemas()).with_missing_node_handler(
        Arc::new(move |_env| {
            dropped_clone.fetch_add(1, Ordering::SeqCst);
        }),
    );
    let (snapshots, errors) = collect(dispatch_envelopes(envelopes(vec![envelope]), options)).await;

    assert!(snapshots.is_empty());
    assert!(errors.is_empty());
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
}

/// A tag is taken from `tags` when it matches a configured schema key.
#[tokio::test]
async fn test_tag_resolution_from_tags_list() {
    let envelope = Envelope {
        event: None,
        data: (
            Message::text("{\"message\": \"tagged\"}"),
            EnvelopeMeta {
                langgraph_node: None,
                tags: Some(vec!["seq:1".to_string(), "alpha".to_string()]),
            },
        ),
    };
    let options = DispatcherOptions::new(two_channel_schemas());
    let (snapshots, errors) = collect(dispatch_envelopes(envelopes(vec![envelope]), options)).await;

    assert!(errors.is_empty());
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].meta.node_type.as_deref(), Some("alpha"));
}

/// Unknown tags route to the default schema when one is configured.
#[tokio::test]
async fn test_unknown_tag_uses_default_schema() {
    let options = DispatcherOptions::new(two_channel_schemas())
        .with_default_schema(Arc::new(Schema::object([("note", Schema::string())])));
    let upstream = envelopes(vec![Envelope::text("gamma", "{\"note\": \"n\"}")]);
    let (snapshots, errors) = collect(dispatch_envelopes(upstream, options)).await;

    assert!(errors.is_empty());
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].value()["gamma"]["note"], "n");
}

/// Cross-channel isolation: a grammatical error on one channel leaves the
/// other channel's stub and ledger untouched.
#[tokio::test]
async fn test_channel_error_isolation() {
    let upstream = envelopes(vec![
        Envelope::text("alpha", "{\"message\": "),
        // Beta's stream is grammatically broken after its first write.
        Envelope::text("beta", "{::"),
        Envelope::tool_chunk("alpha", "\"still fine\"}"),
    ]);
    let options = DispatcherOptions::new(two_channel_schemas()).with_fail_fast(false);
    let (snapshots, errors) = collect(dispatch_envelopes(upstream, options)).await;

    // Alpha still completed.
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].value()["alpha"]["message"], "still fine");
    assert_eq!(snapshots[0].value()["beta"], json!({"value": null}));

    // Beta's error is reported after the upstream closed.
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], EngineError::Streaming(_)));
}

/// fail_fast aborts the run on the first channel error.
#[tokio::test]
async fn test_fail_fast_aborts() {
    let upstream = envelopes(vec![
        Envelope::text("beta", "{::"),
        Envelope::text("alpha", "{\"message\": \"never\"}"),
    ]);
    let options = DispatcherOptions::new(two_channel_schemas()).with_fail_fast(true);
    let (snapshots, errors) = collect(dispatch_envelopes(upstream, options)).await;

    assert!(snapshots.is_empty());
    assert_eq!(errors.len(), 1);
}

/// Non-JSON preamble before the first container character is stripped on
/// the channel's first write.
#[tokio::test]
async fn test_preamble_stripped_on_first_write() {
    let upstream = envelopes(vec![Envelope::text(
        "alpha",
        "Sure, here is the JSON you asked for: {\"message\": \"clean\"}",
    )]);
    let options = DispatcherOptions::new(two_channel_schemas());
    let (snapshots, errors) = collect(dispatch_envelopes(upstream, options)).await;

    assert!(errors.is_empty());
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].value()["alpha"]["message"], "clean");
}

/// Indexed fragments inside one envelope are stitched in index order.
#[tokio::test]
async fn test_in_envelope_fragment_ordering() {
    let envelope = Envelope {
        event: None,
        data: (
            Message::parts(vec![
                ContentPart::ToolCallChunk {
                    args: ToolArgs::Text("\"ordered\"}".to_string()),
                    name: None,
                    id: None,
                    index: Some(structstream_dispatch::FragmentIndex::Number(1)),
                },
                ContentPart::Text {
                    text: "{\"message\": ".to_string(),
                    index: Some(structstream_dispatch::FragmentIndex::Number(0)),
                },
            ]),
            EnvelopeMeta {
                langgraph_node: Some("alpha".to_string()),
                tags: None,
            },
        ),
    };
    let options = DispatcherOptions::new(two_channel_schemas());
    let (snapshots, errors) = collect(dispatch_envelopes(envelopes(vec![envelope]), options)).await;

    assert!(errors.is_empty());
    assert_eq!(snapshots[0].value()["alpha"]["message"], "ordered");
}

/// A channel whose document never closes is finished when the upstream
/// closes; final-mode validation then runs.
#[tokio::test]
async fn test_unclosed_channel_finishes_at_upstream_close() {
    let upstream = envelopes(vec![Envelope::text("alpha", "{\"message\": \"partial\"")]);
    let options = DispatcherOptions::new(two_channel_schemas()).with_pipeline(PipelineOptions {
        validation_mode: ValidationMode::Final,
        ..PipelineOptions::new()
    });
    let (_, errors) = collect(dispatch_envelopes(upstream, options)).await;

    // The unterminated container surfaces as a streaming error at close.
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], EngineError::Streaming(_)));
}

/// Released channels start a fresh document on their next fragment.
#[tokio::test]
async fn test_channel_release_and_new_document() {
    let upstream = envelopes(vec![
        Envelope::text("alpha", "{\"message\": \"one\"}"),
        Envelope::text("alpha", "{\"message\": \"two\"}"),
    ]);
    let options = DispatcherOptions::new(two_channel_schemas()).with_release_channels(true);
    let (snapshots, errors) = collect(dispatch_envelopes(upstream, options)).await;

    assert!(errors.is_empty());
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].value()["alpha"]["message"], "one");
    assert_eq!(snapshots[1].value()["alpha"]["message"], "two");
}

/// Usage counters and reasoning text on the message pass through to the
/// snapshot metadata.
#[tokio::test]
async fn test_usage_and_reasoning_passthrough() {
    let mut message = Message::text("{\"message\": \"hi\"}");
    message.usage_metadata = Some(json!({"input_tokens": 12, "output_tokens": 7}));
    message.reasoning = Some("thinking about it".to_string());

    let envelope = Envelope {
        event: None,
        data: (
            message,
            EnvelopeMeta {
                langgraph_node: Some("alpha".to_string()),
                tags: None,
            },
        ),
    };
    let options = DispatcherOptions::new(two_channel_schemas());
    let (snapshots, _) = collect(dispatch_envelopes(envelopes(vec![envelope]), options)).await;

    let meta = &snapshots[0].meta;
    assert_eq!(meta.usage, Some(json!({"input_tokens": 12, "output_tokens": 7})));
    assert_eq!(meta.reasoning.as_deref(), Some("thinking about it"));
}

/// Cancellation stops the merged stream.
#[tokio::test]
async fn test_cancellation() {
    let (tx, rx) = tokio::sync::watch::channel(false);
    let upstream = envelopes(vec![
        Envelope::text("alpha", "{\"message\": \"one\"}"),
        Envelope::text("beta", "{\"value\": 1}"),
    ]);
    let options = DispatcherOptions::new(two_channel_schemas()).with_cancel(rx);
    let mut stream = dispatch_envelopes(upstream, options);

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.meta.node_type.as_deref(), Some("alpha"));

    tx.send(true).unwrap();
    assert!(stream.next().await.is_none());
}
