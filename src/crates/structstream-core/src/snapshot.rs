//! Snapshot assembly: applying recognizer events to the stub
//!
//! The assembler owns the mutable stub tree and applies [`ParseEvent`]s to
//! it with deep in-place writes, tracking the active path and the
//! append-only completed-path ledger. Emitted [`SnapshotChunk`]s are
//! structural clones of the stub, so consumers get snapshot isolation; the
//! stub itself is owned by exactly one pipeline and never shared.
//!
//! Writes are last-write-wins at a given path; writes to strictly deeper
//! paths never clobber already-completed siblings. Container begin events
//! preserve whatever the stub already holds at a matching-typed slot, which
//! is how schema defaults stay visible until real values arrive.

use crate::parser::ParseEvent;
use crate::path::{Path, PathSegment};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Auxiliary record attached to every snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotMeta {
    /// Path currently being written
    #[serde(rename = "_activePath")]
    pub active_path: Path,

    /// Fully-written paths so far, in completion order
    #[serde(rename = "_completedPaths")]
    pub completed_paths: Vec<Path>,

    /// Validation verdict under the active validation mode
    #[serde(rename = "_isValid")]
    pub is_valid: bool,

    /// Channel/node tag, when the snapshot came through the dispatcher
    #[serde(rename = "_type", skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,

    /// Provider-supplied usage counters, passed through verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,

    /// Provider-supplied auxiliary text (e.g. reasoning), passed through
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// The unit emitted to consumers: the current partial value plus metadata.
///
/// `data` is an ordered sequence of length one holding the partial object;
/// the sequence shape leaves room for providers that emit several
/// alternatives per completion.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotChunk {
    /// One-element sequence containing the partial value
    pub data: Vec<Value>,
    /// Snapshot metadata
    pub meta: SnapshotMeta,
}

impl SnapshotChunk {
    /// The partial value (first and only element of `data`).
    pub fn value(&self) -> &Value {
        &self.data[0]
    }
}

/// Assembler configuration.
#[derive(Debug, Clone)]
pub struct AssemblerOptions {
    /// Re-parse string leaves that look like serialized JSON containers.
    pub auto_unstringify: bool,
    /// Maximum nesting of stringified JSON to unwrap.
    pub max_unstringify_depth: usize,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        Self {
            auto_unstringify: true,
            max_unstringify_depth: 2,
        }
    }
}

/// Applies recognizer events to the stub and publishes snapshots.
#[derive(Debug)]
pub struct Assembler {
    opts: AssemblerOptions,
    stub: Value,
    active_path: Path,
    completed: Vec<Path>,
    completed_set: HashSet<Path>,
    is_valid: bool,
    /// Stub mutated since the last snapshot
    dirty: bool,
    /// Completed-path ledger grew since the last snapshot
    grew: bool,
}

impl Assembler {
    /// Create an assembler over a pre-built stub.
    pub fn new(stub: Value, initial_valid: bool, opts: AssemblerOptions) -> Self {
        Self {
            opts,
            stub,
            active_path: Path::root(),
            completed: Vec::new(),
            completed_set: HashSet::new(),
            is_valid: initial_valid,
            dirty: false,
            grew: false,
        }
    }

    /// Current stub value.
    pub fn data(&self) -> &Value {
        &self.stub
    }

    /// Replace the stub wholesale (used when final validation coerces).
    pub fn set_data(&mut self, value: Value) {
        self.stub = value;
        self.dirty = true;
    }

    /// Completed paths so far, in completion order.
    pub fn completed_paths(&self) -> &[Path] {
        &self.completed
    }

    /// Current validity flag.
    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    /// Update the validity flag carried on subsequent snapshots.
    pub fn set_valid(&mut self, valid: bool) {
        self.is_valid = valid;
    }

    /// Whether the ledger grew since the last snapshot.
    pub fn completions_grew(&self) -> bool {
        self.grew
    }

    /// Whether anything snapshot-worthy happened since the last snapshot.
    pub fn has_changes(&self) -> bool {
        self.dirty || self.grew
    }

    /// Apply one recognizer event.
    pub fn apply(&mut self, event: &ParseEvent) {
        match event {
            ParseEvent::ObjectBegin { path } => {
                self.active_path = path.clone();
                self.ensure_container(path, true);
            }
            ParseEvent::ArrayBegin { path } => {
                self.active_path = path.clone();
                self.ensure_container(path, false);
            }
            ParseEvent::StringPartial { path, value } => {
                self.active_path = path.clone();
                self.write(path, Value::String(value.clone()));
            }
            ParseEvent::Scalar { path, value } => {
                self.active_path = path.clone();
                let value = if self.opts.auto_unstringify {
                    unstringify(value.clone(), self.opts.max_unstringify_depth)
                } else {
                    value.clone()
                };
                self.write(path, value);
                self.complete(path);
            }
            ParseEvent::ContainerEnd { path } => {
                self.active_path = path.clone();
                self.complete(path);
            }
        }
    }

    /// Take a snapshot of the current state, clearing the change flags.
    pub fn take_snapshot(&mut self) -> SnapshotChunk {
        self.dirty = false;
        self.grew = false;
        SnapshotChunk {
            data: vec![self.stub.clone()],
            meta: SnapshotMeta {
                active_path: self.active_path.clone(),
                completed_paths: self.completed.clone(),
                is_valid: self.is_valid,
                node_type: None,
                usage: None,
                reasoning: None,
            },
        }
    }

    fn write(&mut self, path: &Path, value: Value) {
        let slot = resolve_mut(&mut self.stub, path);
        *slot = value;
        self.dirty = true;
    }

    /// Make sure the slot at `path` holds a container of the right kind,
    /// preserving an existing matching container (and its stub defaults).
    fn ensure_container(&mut self, path: &Path, object: bool) {
        let slot = resolve_mut(&mut self.stub, path);
        match (object, &slot) {
            (true, Value::Object(_)) | (false, Value::Array(_)) => {}
            (true, _) => {
                *slot = Value::Object(Map::new());
                self.dirty = true;
            }
            (false, _) => {
                *slot = Value::Array(Vec::new());
                self.dirty = true;
            }
        }
    }

    /// Append to the completed-path ledger; a path completes at most once.
    fn complete(&mut self, path: &Path) {
        if self.completed_set.insert(path.clone()) {
            self.completed.push(path.clone());
            self.grew = true;
        }
    }
}

/// Walk to the slot at `path`, creating intermediate containers: objects
/// for string keys, arrays for integer indices (padded with `null`).
fn resolve_mut<'a>(root: &'a mut Value, path: &Path) -> &'a mut Value {
    let mut current = root;
    for segment in path.segments() {
        current = match segment {
            PathSegment::Key(key) => {
                if !current.is_object() {
                    *current = Value::Object(Map::new());
                }
                match current {
                    Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
                    // Just coerced to an object above.
                    _ => unreachable!("slot coerced to object"),
                }
            }
            PathSegment::Index(index) => {
                if !current.is_array() {
                    *current = Value::Array(Vec::new());
                }
                match current {
                    Value::Array(items) => {
                        while items.len() <= *index {
                            items.push(Value::Null);
                        }
                        &mut items[*index]
                    }
                    // Just coerced to an array above.
                    _ => unreachable!("slot coerced to array"),
                }
            }
        };
    }
    current
}

/// Unwrap a string that is itself serialized JSON, up to `depth` times.
/// Strings that merely look like JSON but fail to parse stay verbatim.
fn unstringify(value: Value, depth: usize) -> Value {
    let mut current = value;
    for _ in 0..depth {
        let parsed = match &current {
            Value::String(s) if looks_like_json(s) => serde_json::from_str::<Value>(s).ok(),
            _ => None,
        };
        match parsed {
            Some(v) => current = v,
            None => break,
        }
    }
    current
}

fn looks_like_json(s: &str) -> bool {
    let t = s.trim();
    (t.starts_with('{') && t.ends_with('}')) || (t.starts_with('[') && t.ends_with(']'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;
    use serde_json::json;

    fn assembler(stub: Value) -> Assembler {
        Assembler::new(stub, true, AssemblerOptions::default())
    }

    #[test]
    fn test_scalar_write_and_completion() {
        let mut asm = assembler(json!({"name": null, "age": null}));
        asm.apply(&ParseEvent::Scalar {
            path: path!["name"],
            value: json!("Alice"),
        });

        assert_eq!(asm.data(), &json!({"name": "Alice", "age": null}));
        assert_eq!(asm.completed_paths(), &[path!["name"]]);
        assert!(asm.has_changes());

        let snap = asm.take_snapshot();
        assert_eq!(snap.value(), &json!({"name": "Alice", "age": null}));
        assert_eq!(snap.meta.active_path, path!["name"]);
        assert!(!asm.has_changes());
    }

    #[test]
    fn test_container_begin_preserves_stub_defaults() {
        let mut asm = assembler(json!({"user": {"name": null, "age": null}}));
        asm.apply(&ParseEvent::ObjectBegin { path: path![] });
        asm.apply(&ParseEvent::ObjectBegin {
            path: path!["user"],
        });
        // The stub's default shape is still intact.
        assert_eq!(asm.data(), &json!({"user": {"name": null, "age": null}}));
        assert!(!asm.has_changes());
    }

    #[test]
    fn test_deeper_writes_do_not_clobber_siblings() {
        let mut asm = assembler(json!({"a": null, "b": null}));
        asm.apply(&ParseEvent::Scalar {
            path: path!["a"],
            value: json!(1),
        });
        asm.apply(&ParseEvent::ObjectBegin { path: path!["b"] });
        asm.apply(&ParseEvent::Scalar {
            path: path!["b", "c"],
            value: json!(2),
        });
        assert_eq!(asm.data(), &json!({"a": 1, "b": {"c": 2}}));
    }

    #[test]
    fn test_same_path_last_write_wins() {
        let mut asm = assembler(json!({"a": null}));
        asm.apply(&ParseEvent::Scalar {
            path: path!["a"],
            value: json!(1),
        });
        asm.apply(&ParseEvent::Scalar {
            path: path!["a"],
            value: json!(2),
        });
        assert_eq!(asm.data(), &json!({"a": 2}));
        // Completion is recorded once.
        assert_eq!(asm.completed_paths(), &[path!["a"]]);
    }

    #[test]
    fn test_array_grows_by_index() {
        let mut asm = assembler(json!({"items": []}));
        asm.apply(&ParseEvent::Scalar {
            path: path!["items", 0],
            value: json!("a"),
        });
        asm.apply(&ParseEvent::Scalar {
            path: path!["items", 2],
            value: json!("c"),
        });
        assert_eq!(asm.data(), &json!({"items": ["a", null, "c"]}));
    }

    #[test]
    fn test_partial_string_updates_without_completion() {
        let mut asm = assembler(json!({"msg": null}));
        asm.apply(&ParseEvent::StringPartial {
            path: path!["msg"],
            value: "hel".to_string(),
        });
        assert_eq!(asm.data(), &json!({"msg": "hel"}));
        assert!(asm.completed_paths().is_empty());
        assert!(asm.has_changes());
        assert!(!asm.completions_grew());
    }

    #[test]
    fn test_auto_unstringify_nested_json() {
        let mut asm = assembler(json!({"payload": null}));
        asm.apply(&ParseEvent::Scalar {
            path: path!["payload"],
            value: json!("{\"a\": 1}"),
        });
        assert_eq!(asm.data(), &json!({"payload": {"a": 1}}));
    }

    #[test]
    fn test_auto_unstringify_double_nested() {
        let mut asm = assembler(json!({"payload": null}));
        asm.apply(&ParseEvent::Scalar {
            path: path!["payload"],
            value: json!("{\"inner\": \"[1, 2]\"}"),
        });
        // Depth 2 unwraps the outer document only; inner strings stay as
        // written by the producer.
        assert_eq!(asm.data(), &json!({"payload": {"inner": "[1, 2]"}}));
    }

    #[test]
    fn test_invalid_json_string_kept_verbatim() {
        let mut asm = assembler(json!({"payload": null}));
        asm.apply(&ParseEvent::Scalar {
            path: path!["payload"],
            value: json!("{not json}"),
        });
        assert_eq!(asm.data(), &json!({"payload": "{not json}"}));
    }

    #[test]
    fn test_unstringify_disabled() {
        let mut asm = Assembler::new(
            json!({"payload": null}),
            true,
            AssemblerOptions {
                auto_unstringify: false,
                ..AssemblerOptions::default()
            },
        );
        asm.apply(&ParseEvent::Scalar {
            path: path!["payload"],
            value: json!("{\"a\": 1}"),
        });
        assert_eq!(asm.data(), &json!({"payload": "{\"a\": 1}"}));
    }

    #[test]
    fn test_snapshot_isolation() {
        let mut asm = assembler(json!({"a": null}));
        asm.apply(&ParseEvent::Scalar {
            path: path!["a"],
            value: json!(1),
        });
        let snap = asm.take_snapshot();
        asm.apply(&ParseEvent::Scalar {
            path: path!["a"],
            value: json!(2),
        });
        // Earlier snapshots are not affected by later writes.
        assert_eq!(snap.value(), &json!({"a": 1}));
    }
}
