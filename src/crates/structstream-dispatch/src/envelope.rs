//! Envelope wire model for LangGraph-style upstreams
//!
//! An upstream delivers a sequence of envelopes, each carrying a message
//! (free text and/or tool-call argument fragments) plus metadata naming the
//! logical producer. The shapes here deserialize the wire format those
//! producers emit: an optional `event` discriminator and a `data` field
//! holding the `[message, meta]` ordered pair.
//!
//! Fragment ordering inside an envelope follows the declared `index` when
//! present (numeric, or a string with a numeric suffix like `"call_2"`);
//! ties resolve by appearance order, and un-indexed fragments keep
//! appearance order after all indexed ones.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One record of the multi-channel upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Producer event discriminator (e.g. `"messages"`); not interpreted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    /// The `[message, meta]` ordered pair
    pub data: (Message, EnvelopeMeta),
}

impl Envelope {
    /// The message half of the pair.
    pub fn message(&self) -> &Message {
        &self.data.0
    }

    /// The metadata half of the pair.
    pub fn meta(&self) -> &EnvelopeMeta {
        &self.data.1
    }
}

/// The content payload of an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Free text, or an ordered list of parts
    pub content: MessageContent,

    /// Provider usage counters, passed through to snapshot metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<Value>,

    /// Provider auxiliary text (e.g. reasoning), passed through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Message {
    /// Message with plain text content.
    pub fn text(content: impl Into<String>) -> Self {
        Message {
            content: MessageContent::Text(content.into()),
            usage_metadata: None,
            reasoning: None,
        }
    }

    /// Message with part-structured content.
    pub fn parts(parts: Vec<ContentPart>) -> Self {
        Message {
            content: MessageContent::Parts(parts),
            usage_metadata: None,
            reasoning: None,
        }
    }

    /// The envelope's JSON-text fragments in delivery order (see module
    /// docs for the ordering rules).
    pub fn fragments(&self) -> Vec<Fragment> {
        let mut fragments: Vec<Fragment> = match &self.content {
            MessageContent::Text(text) => {
                if text.is_empty() {
                    Vec::new()
                } else {
                    vec![Fragment {
                        text: text.clone(),
                        index: None,
                    }]
                }
            }
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text, index } => Some(Fragment {
                        text: text.clone(),
                        index: index.clone(),
                    }),
                    ContentPart::ToolCallChunk { args, index, .. } => Some(Fragment {
                        // Chunked args are raw JSON text fragments.
                        text: match args {
                            ToolArgs::Text(s) => s.clone(),
                            ToolArgs::Json(v) => v.to_string(),
                        },
                        index: index.clone(),
                    }),
                    ContentPart::ToolCall { args, .. } => Some(Fragment {
                        // Complete args must land as one valid JSON value:
                        // bare strings are quoted, objects stringified.
                        text: match args {
                            ToolArgs::Text(s) => Value::String(s.clone()).to_string(),
                            ToolArgs::Json(v) => v.to_string(),
                        },
                        index: None,
                    }),
                    ContentPart::Unknown => None,
                })
                .filter(|f| !f.text.is_empty())
                .collect(),
        };
        // Stable sort: indexed fragments first in index order, ties and
        // un-indexed fragments keep appearance order.
        fragments.sort_by_key(|f| match f.ordinal() {
            Some(n) => (false, n),
            None => (true, 0),
        });
        fragments
    }

    /// All fragments concatenated in delivery order.
    pub fn fragment_text(&self) -> String {
        self.fragments()
            .into_iter()
            .map(|f| f.text)
            .collect::<Vec<_>>()
            .concat()
    }
}

/// Either plain text or an ordered list of typed parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content
    Text(String),
    /// Part-structured content
    Parts(Vec<ContentPart>),
}

/// One element of part-structured content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    /// Free text fragment
    #[serde(rename = "text")]
    Text {
        /// Fragment text
        text: String,
        /// In-envelope ordering hint
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<FragmentIndex>,
    },

    /// Streaming tool-call argument fragment
    #[serde(rename = "tool_call_chunk")]
    ToolCallChunk {
        /// Argument fragment: raw JSON text, or an object
        args: ToolArgs,
        /// Tool name, when known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Tool-call id, when known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// In-envelope ordering hint
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<FragmentIndex>,
    },

    /// Complete tool call
    #[serde(rename = "tool_call")]
    ToolCall {
        /// Complete arguments: a bare string or an object
        args: ToolArgs,
        /// Tool name
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Tool-call id
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Any part type this dispatcher does not consume
    #[serde(other)]
    Unknown,
}

/// Ordering hint: a number, or a string carrying a numeric suffix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FragmentIndex {
    /// Plain numeric index
    Number(u64),
    /// String index such as `"0"` or `"call_2"`
    Text(String),
}

impl FragmentIndex {
    /// The numeric ordering value, if one can be derived.
    pub fn ordinal(&self) -> Option<u64> {
        match self {
            FragmentIndex::Number(n) => Some(*n),
            FragmentIndex::Text(s) => {
                let digits: String = s
                    .chars()
                    .rev()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                digits.parse().ok()
            }
        }
    }
}

/// Tool-call arguments: raw JSON text or an already-structured value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolArgs {
    /// Raw JSON text (possibly a fragment)
    Text(String),
    /// Structured value
    Json(Value),
}

/// One ordered JSON-text fragment extracted from an envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    /// Raw JSON text to append to the channel's stream
    pub text: String,
    /// Declared ordering hint, if any
    pub index: Option<FragmentIndex>,
}

impl Fragment {
    fn ordinal(&self) -> Option<u64> {
        self.index.as_ref().and_then(FragmentIndex::ordinal)
    }
}

/// Envelope metadata carrying the channel tag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    /// The producing node, the primary channel tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub langgraph_node: Option<String>,

    /// Producer tags; the first one matching a configured schema key may
    /// serve as the channel tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl Envelope {
    /// Convenience constructor for a text envelope from `node`.
    pub fn text(node: impl Into<String>, content: impl Into<String>) -> Self {
        Envelope {
            event: None,
            data: (
                Message::text(content),
                EnvelopeMeta {
                    langgraph_node: Some(node.into()),
                    tags: None,
                },
            ),
        }
    }

    /// Convenience constructor for a tool-call-chunk envelope from `node`.
    pub fn tool_chunk(node: impl Into<String>, args: impl Into<String>) -> Self {
        Envelope {
            event: None,
            data: (
                Message::parts(vec![ContentPart::ToolCallChunk {
                    args: ToolArgs::Text(args.into()),
                    name: None,
                    id: None,
                    index: None,
                }]),
                EnvelopeMeta {
                    langgraph_node: Some(node.into()),
                    tags: None,
                },
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_wire_shape() {
        let raw = json!({
            "event": "messages",
            "data": [
                {"content": "hello"},
                {"langgraph_node": "writer", "tags": ["seq:1"]}
            ]
        });
        let envelope: Envelope = serde_json::from_value(raw).unwrap();
        assert_eq!(envelope.event.as_deref(), Some("messages"));
        assert_eq!(envelope.meta().langgraph_node.as_deref(), Some("writer"));
        assert_eq!(envelope.message().fragment_text(), "hello");
    }

    #[test]
    fn test_part_content_deserializes() {
        let raw = json!({
            "data": [
                {"content": [
                    {"type": "text", "text": "{\"a\":", "index": 0},
                    {"type": "tool_call_chunk", "args": "1}", "index": 1}
                ]},
                {"langgraph_node": "writer"}
            ]
        });
        let envelope: Envelope = serde_json::from_value(raw).unwrap();
        assert_eq!(envelope.message().fragment_text(), "{\"a\":1}");
    }

    #[test]
    fn test_indexed_fragments_reorder() {
        let message = Message::parts(vec![
            ContentPart::Text {
                text: "b".to_string(),
                index: Some(FragmentIndex::Number(1)),
            },
            ContentPart::Text {
                text: "tail".to_string(),
                index: None,
            },
            ContentPart::Text {
                text: "a".to_string(),
                index: Some(FragmentIndex::Number(0)),
            },
        ]);
        // Indexed fragments order by index; un-indexed sort after them.
        assert_eq!(message.fragment_text(), "abtail");
    }

    #[test]
    fn test_numeric_suffixed_string_index() {
        let message = Message::parts(vec![
            ContentPart::Text {
                text: "second".to_string(),
                index: Some(FragmentIndex::Text("call_1".to_string())),
            },
            ContentPart::Text {
                text: "first".to_string(),
                index: Some(FragmentIndex::Text("call_0".to_string())),
            },
        ]);
        assert_eq!(message.fragment_text(), "firstsecond");
    }

    #[test]
    fn test_ties_keep_appearance_order() {
        let message = Message::parts(vec![
            ContentPart::Text {
                text: "x".to_string(),
                index: Some(FragmentIndex::Number(0)),
            },
            ContentPart::Text {
                text: "y".to_string(),
                index: Some(FragmentIndex::Number(0)),
            },
        ]);
        assert_eq!(message.fragment_text(), "xy");
    }

    #[test]
    fn test_tool_call_chunk_object_args_stringified() {
        let message = Message::parts(vec![ContentPart::ToolCallChunk {
            args: ToolArgs::Json(json!({"a": 1})),
            name: None,
            id: None,
            index: None,
        }]);
        assert_eq!(message.fragment_text(), "{\"a\":1}");
    }

    #[test]
    fn test_complete_tool_call_bare_string_quoted() {
        let message = Message::parts(vec![ContentPart::ToolCall {
            args: ToolArgs::Text("hello".to_string()),
            name: Some("emit".to_string()),
            id: None,
        }]);
        assert_eq!(message.fragment_text(), "\"hello\"");
    }

    #[test]
    fn test_unknown_part_types_are_skipped() {
        let raw = json!({
            "data": [
                {"content": [
                    {"type": "image", "url": "https://example.com/x.png"},
                    {"type": "text", "text": "ok"}
                ]},
                {"langgraph_node": "writer"}
            ]
        });
        let envelope: Envelope = serde_json::from_value(raw).unwrap();
        assert_eq!(envelope.message().fragment_text(), "ok");
    }

    #[test]
    fn test_ordinal_parsing() {
        assert_eq!(FragmentIndex::Number(3).ordinal(), Some(3));
        assert_eq!(FragmentIndex::Text("7".to_string()).ordinal(), Some(7));
        assert_eq!(FragmentIndex::Text("call_12".to_string()).ordinal(), Some(12));
        assert_eq!(FragmentIndex::Text("abc".to_string()).ordinal(), None);
    }
}
