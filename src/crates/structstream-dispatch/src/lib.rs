//! # structstream-dispatch
//!
//! Multi-channel dispatcher for the structstream engine: demultiplexes a
//! single upstream of LangGraph-style envelopes — interleaved text and
//! tool-call argument fragments tagged by producing node — into per-node
//! streaming pipelines, and merges their schema-shaped snapshots into one
//! ordered output sequence.
//!
//! ```text
//!                      ┌──────────────────────────┐
//!   envelopes          │        Dispatcher        │        snapshots
//! ──────────────────>  │  tag → channel pipeline  │  ──────────────────>
//!  (text / tool-call   │  ┌─────┐ ┌─────┐ ┌─────┐ │   { alpha: {...},
//!   fragments, tagged  │  │alpha│ │beta │ │ ... │ │     beta:  {...} }
//!   by langgraph_node) │  └─────┘ └─────┘ └─────┘ │   tagged `_type`
//!                      └──────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use structstream_dispatch::{dispatch_envelopes, DispatcherOptions, Envelope};
//! use structstream_core::schema::{Schema, SchemaLike};
//! use futures::StreamExt;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut schemas: HashMap<String, Arc<dyn SchemaLike>> = HashMap::new();
//! schemas.insert(
//!     "writer".to_string(),
//!     Arc::new(Schema::object([("message", Schema::string())])),
//! );
//!
//! let envelopes = futures::stream::iter(vec![
//!     Ok(Envelope::text("writer", "{\"message\": ")),
//!     Ok(Envelope::tool_chunk("writer", "\"hello\"}")),
//! ]);
//!
//! let mut snapshots = dispatch_envelopes(envelopes, DispatcherOptions::new(schemas));
//! let chunk = snapshots.next().await.unwrap().unwrap();
//! assert_eq!(chunk.meta.node_type.as_deref(), Some("writer"));
//! assert_eq!(chunk.value()["writer"]["message"], "hello");
//! # }
//! ```

pub mod dispatcher;
pub mod envelope;

pub use dispatcher::{dispatch_envelopes, DispatcherOptions, MissingNodeHandler};
pub use envelope::{
    ContentPart, Envelope, EnvelopeMeta, Fragment, FragmentIndex, Message, MessageContent,
    ToolArgs,
};
