//! Schema introspection capability and the built-in declarative schema
//!
//! The engine does not depend on any particular schema library. It requires
//! only the small capability set in [`SchemaLike`]:
//!
//! - recognize object shape and enumerate `{ key → subschema }`
//! - recognize primitive kinds (string, number, boolean)
//! - recognize array-of-T and record/map-of-T
//! - unwrap optional / nullable / refinement wrappers
//! - produce a declared default ([`SchemaLike::default_value`])
//! - validate a value ([`SchemaLike::safe_parse`])
//!
//! [`Schema`] is the built-in implementation: a declarative tree suitable
//! for describing LLM outputs. Any other schema runtime satisfying the
//! capability set can be plugged in behind `Arc<dyn SchemaLike>`; with the
//! `json-validation` feature, `json_schema::JsonSchema` adapts a JSON-Schema
//! document.
//!
//! # Example
//!
//! ```rust
//! use structstream_core::schema::{Schema, SchemaLike};
//! use serde_json::json;
//!
//! let schema = Schema::object([
//!     ("name", Schema::string()),
//!     ("age", Schema::number()),
//!     ("tags", Schema::array(Schema::string())),
//! ]);
//!
//! assert!(schema.safe_parse(&json!({"name": "Ada", "age": 36, "tags": []})).is_ok());
//! assert!(schema.safe_parse(&json!({"name": 1, "age": 36, "tags": []})).is_err());
//! ```

use crate::path::{Path, PathSegment};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Structural classification of a schema node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    /// Fixed-shape object with enumerable entries
    Object,
    /// Homogeneous array; element schema via [`SchemaLike::element`]
    Array,
    /// Open map of string keys; value schema via [`SchemaLike::element`]
    Record,
    /// String primitive
    String,
    /// Number primitive
    Number,
    /// Boolean primitive
    Boolean,
    /// Optional / nullable / refinement wrapper; inner schema via
    /// [`SchemaLike::element`]
    Wrapper,
    /// Anything the engine cannot introspect further
    Opaque,
}

/// One validation problem, with the path of the offending value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaIssue {
    /// Location of the value that failed
    pub path: Path,
    /// Library-native message
    pub message: String,
}

impl SchemaIssue {
    /// Issue at the root path.
    pub fn new(message: impl Into<String>) -> Self {
        SchemaIssue {
            path: Path::root(),
            message: message.into(),
        }
    }

    /// Issue at a specific path.
    pub fn at(path: Path, message: impl Into<String>) -> Self {
        SchemaIssue {
            path,
            message: message.into(),
        }
    }

    fn prefixed(mut self, segment: PathSegment) -> Self {
        let mut segments = vec![segment];
        segments.extend(self.path.segments().iter().cloned());
        self.path = Path::new(segments);
        self
    }
}

/// The introspection capability the engine requires of a schema runtime.
///
/// Implementations must be cheap to clone behind `Arc`; the engine calls
/// the structural methods once at stub-construction time and `safe_parse`
/// per validation attempt.
pub trait SchemaLike: Send + Sync {
    /// Structural classification of this node.
    fn kind(&self) -> SchemaKind;

    /// Object entries in declaration order. Empty unless
    /// [`SchemaLike::kind`] is [`SchemaKind::Object`].
    fn entries(&self) -> Vec<(String, Arc<dyn SchemaLike>)> {
        Vec::new()
    }

    /// Element schema of an array, value schema of a record, or the inner
    /// schema of a wrapper.
    fn element(&self) -> Option<Arc<dyn SchemaLike>> {
        None
    }

    /// The schema-declared default for an absent value, if any.
    fn default_value(&self) -> Option<Value> {
        None
    }

    /// Validate `value`, returning the (possibly coerced) parsed value or
    /// the native issues.
    fn safe_parse(&self, value: &Value) -> Result<Value, Vec<SchemaIssue>>;
}

/// Unwrap optional/nullable/refinement wrappers down to the structural node.
pub fn unwrap_wrappers(schema: Arc<dyn SchemaLike>) -> Arc<dyn SchemaLike> {
    let mut current = schema;
    while current.kind() == SchemaKind::Wrapper {
        match current.element() {
            Some(inner) => current = inner,
            None => break,
        }
    }
    current
}

/// Built-in declarative schema.
///
/// Children are `Arc`-shared so subtrees can be reused across schemas and
/// handed to the engine as `Arc<dyn SchemaLike>` without copying.
#[derive(Clone)]
pub enum Schema {
    /// Fixed-shape object, entries in declaration order
    Object(Vec<(String, Arc<Schema>)>),
    /// Homogeneous array
    Array(Arc<Schema>),
    /// Open string-keyed map
    Record(Arc<Schema>),
    /// String primitive
    String,
    /// Number primitive
    Number,
    /// Boolean primitive
    Boolean,
    /// Value may be absent
    Optional(Arc<Schema>),
    /// Value may be `null`
    Nullable(Arc<Schema>),
    /// Declared default for absent values
    Default(Arc<Schema>, Value),
    /// Predicate refinement over the inner schema
    Refine {
        /// Wrapped schema
        inner: Arc<Schema>,
        /// Predicate over the parsed value
        check: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
        /// Issue message when the predicate rejects
        message: String,
    },
}

impl Schema {
    /// Object schema from `(key, schema)` pairs, preserving order.
    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Schema)>) -> Schema {
        Schema::Object(
            fields
                .into_iter()
                .map(|(k, s)| (k.into(), Arc::new(s)))
                .collect(),
        )
    }

    /// Array-of-`element` schema.
    pub fn array(element: Schema) -> Schema {
        Schema::Array(Arc::new(element))
    }

    /// Record (open map) schema with `value` as the value schema.
    pub fn record(value: Schema) -> Schema {
        Schema::Record(Arc::new(value))
    }

    /// String primitive.
    pub fn string() -> Schema {
        Schema::String
    }

    /// Number primitive.
    pub fn number() -> Schema {
        Schema::Number
    }

    /// Boolean primitive.
    pub fn boolean() -> Schema {
        Schema::Boolean
    }

    /// Mark this schema optional (admits absence).
    pub fn optional(self) -> Schema {
        Schema::Optional(Arc::new(self))
    }

    /// Mark this schema nullable (admits `null`).
    pub fn nullable(self) -> Schema {
        Schema::Nullable(Arc::new(self))
    }

    /// Attach a declared default used when the value is absent.
    pub fn with_default(self, default: impl Into<Value>) -> Schema {
        Schema::Default(Arc::new(self), default.into())
    }

    /// Refine with a predicate; failures produce `message` as the issue.
    pub fn refine(
        self,
        message: impl Into<String>,
        check: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Schema {
        Schema::Refine {
            inner: Arc::new(self),
            check: Arc::new(check),
            message: message.into(),
        }
    }

    /// Whether absence is admissible anywhere in this wrapper chain.
    fn admits_absent(&self) -> bool {
        match self {
            Schema::Optional(_) => true,
            Schema::Default(_, _) => true,
            Schema::Nullable(inner) | Schema::Refine { inner, .. } => inner.admits_absent(),
            _ => false,
        }
    }

    fn parse_object(
        fields: &[(String, Arc<Schema>)],
        value: &Value,
    ) -> Result<Value, Vec<SchemaIssue>> {
        let map = match value {
            Value::Object(map) => map,
            other => {
                return Err(vec![SchemaIssue::new(format!(
                    "expected object, got {}",
                    kind_name(other)
                ))])
            }
        };
        let mut parsed = Map::new();
        let mut issues = Vec::new();
        for (key, sub) in fields {
            match map.get(key) {
                Some(v) => match sub.safe_parse(v) {
                    Ok(data) => {
                        parsed.insert(key.clone(), data);
                    }
                    Err(errs) => issues.extend(
                        errs.into_iter()
                            .map(|i| i.prefixed(PathSegment::Key(key.clone()))),
                    ),
                },
                None => {
                    if let Some(default) = sub.default_value() {
                        parsed.insert(key.clone(), default);
                    } else if !sub.admits_absent() {
                        issues.push(SchemaIssue::at(
                            Path::new(vec![PathSegment::Key(key.clone())]),
                            "required",
                        ));
                    }
                }
            }
        }
        if issues.is_empty() {
            Ok(Value::Object(parsed))
        } else {
            Err(issues)
        }
    }
}

impl SchemaLike for Schema {
    fn kind(&self) -> SchemaKind {
        match self {
            Schema::Object(_) => SchemaKind::Object,
            Schema::Array(_) => SchemaKind::Array,
            Schema::Record(_) => SchemaKind::Record,
            Schema::String => SchemaKind::String,
            Schema::Number => SchemaKind::Number,
            Schema::Boolean => SchemaKind::Boolean,
            Schema::Optional(_)
            | Schema::Nullable(_)
            | Schema::Default(_, _)
            | Schema::Refine { .. } => SchemaKind::Wrapper,
        }
    }

    fn entries(&self) -> Vec<(String, Arc<dyn SchemaLike>)> {
        match self {
            Schema::Object(fields) => fields
                .iter()
                .map(|(k, s)| (k.clone(), s.clone() as Arc<dyn SchemaLike>))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn element(&self) -> Option<Arc<dyn SchemaLike>> {
        match self {
            Schema::Array(elem) | Schema::Record(elem) => Some(elem.clone() as Arc<dyn SchemaLike>),
            Schema::Optional(inner)
            | Schema::Nullable(inner)
            | Schema::Default(inner, _)
            | Schema::Refine { inner, .. } => Some(inner.clone() as Arc<dyn SchemaLike>),
            _ => None,
        }
    }

    fn default_value(&self) -> Option<Value> {
        match self {
            Schema::Default(_, default) => Some(default.clone()),
            Schema::Refine { inner, .. } | Schema::Nullable(inner) => inner.default_value(),
            _ => None,
        }
    }

    fn safe_parse(&self, value: &Value) -> Result<Value, Vec<SchemaIssue>> {
        match self {
            Schema::Object(fields) => Schema::parse_object(fields, value),
            Schema::Array(elem) => match value {
                Value::Array(items) => {
                    let mut parsed = Vec::with_capacity(items.len());
                    let mut issues = Vec::new();
                    for (i, item) in items.iter().enumerate() {
                        match elem.safe_parse(item) {
                            Ok(data) => parsed.push(data),
                            Err(errs) => issues.extend(
                                errs.into_iter().map(|e| e.prefixed(PathSegment::Index(i))),
                            ),
                        }
                    }
                    if issues.is_empty() {
                        Ok(Value::Array(parsed))
                    } else {
                        Err(issues)
                    }
                }
                other => Err(vec![SchemaIssue::new(format!(
                    "expected array, got {}",
                    kind_name(other)
                ))]),
            },
            Schema::Record(elem) => match value {
                Value::Object(map) => {
                    let mut parsed = Map::new();
                    let mut issues = Vec::new();
                    for (key, item) in map {
                        match elem.safe_parse(item) {
                            Ok(data) => {
                                parsed.insert(key.clone(), data);
                            }
                            Err(errs) => issues.extend(
                                errs.into_iter()
                                    .map(|e| e.prefixed(PathSegment::Key(key.clone()))),
                            ),
                        }
                    }
                    if issues.is_empty() {
                        Ok(Value::Object(parsed))
                    } else {
                        Err(issues)
                    }
                }
                other => Err(vec![SchemaIssue::new(format!(
                    "expected record, got {}",
                    kind_name(other)
                ))]),
            },
            Schema::String => match value {
                Value::String(_) => Ok(value.clone()),
                other => Err(vec![SchemaIssue::new(format!(
                    "expected string, got {}",
                    kind_name(other)
                ))]),
            },
            Schema::Number => match value {
                Value::Number(_) => Ok(value.clone()),
                other => Err(vec![SchemaIssue::new(format!(
                    "expected number, got {}",
                    kind_name(other)
                ))]),
            },
            Schema::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                other => Err(vec![SchemaIssue::new(format!(
                    "expected boolean, got {}",
                    kind_name(other)
                ))]),
            },
            Schema::Optional(inner) => inner.safe_parse(value),
            Schema::Nullable(inner) => match value {
                Value::Null => Ok(Value::Null),
                other => inner.safe_parse(other),
            },
            Schema::Default(inner, _) => inner.safe_parse(value),
            Schema::Refine {
                inner,
                check,
                message,
            } => {
                let parsed = inner.safe_parse(value)?;
                if check(&parsed) {
                    Ok(parsed)
                } else {
                    Err(vec![SchemaIssue::new(message.clone())])
                }
            }
        }
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schema::Object(fields) => f
                .debug_map()
                .entries(fields.iter().map(|(k, s)| (k, s)))
                .finish(),
            Schema::Array(elem) => f.debug_tuple("Array").field(elem).finish(),
            Schema::Record(elem) => f.debug_tuple("Record").field(elem).finish(),
            Schema::String => write!(f, "String"),
            Schema::Number => write!(f, "Number"),
            Schema::Boolean => write!(f, "Boolean"),
            Schema::Optional(inner) => f.debug_tuple("Optional").field(inner).finish(),
            Schema::Nullable(inner) => f.debug_tuple("Nullable").field(inner).finish(),
            Schema::Default(inner, d) => f.debug_tuple("Default").field(inner).field(d).finish(),
            Schema::Refine { inner, message, .. } => f
                .debug_struct("Refine")
                .field("inner", inner)
                .field("message", message)
                .finish(),
        }
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;
    use serde_json::json;

    #[test]
    fn test_primitive_parse() {
        assert_eq!(
            Schema::string().safe_parse(&json!("x")).unwrap(),
            json!("x")
        );
        assert!(Schema::string().safe_parse(&json!(1)).is_err());
        assert!(Schema::number().safe_parse(&json!(1.5)).is_ok());
        assert!(Schema::boolean().safe_parse(&json!(true)).is_ok());
    }

    #[test]
    fn test_object_issues_carry_paths() {
        let schema = Schema::object([
            ("name", Schema::string()),
            ("meta", Schema::object([("age", Schema::number())])),
        ]);
        let issues = schema
            .safe_parse(&json!({"name": "x", "meta": {"age": "old"}}))
            .unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, path!["meta", "age"]);
    }

    #[test]
    fn test_missing_required_field() {
        let schema = Schema::object([("name", Schema::string())]);
        let issues = schema.safe_parse(&json!({})).unwrap_err();
        assert_eq!(issues[0].message, "required");
        assert_eq!(issues[0].path, path!["name"]);
    }

    #[test]
    fn test_optional_and_default() {
        let schema = Schema::object([
            ("nick", Schema::string().optional()),
            ("count", Schema::number().with_default(json!(0))),
        ]);
        let parsed = schema.safe_parse(&json!({})).unwrap();
        assert_eq!(parsed, json!({"count": 0}));
    }

    #[test]
    fn test_nullable() {
        let schema = Schema::string().nullable();
        assert_eq!(schema.safe_parse(&json!(null)).unwrap(), json!(null));
        assert_eq!(schema.safe_parse(&json!("x")).unwrap(), json!("x"));
        assert!(schema.safe_parse(&json!(5)).is_err());
    }

    #[test]
    fn test_array_element_issues_are_indexed() {
        let schema = Schema::array(Schema::number());
        let issues = schema.safe_parse(&json!([1, "two", 3])).unwrap_err();
        assert_eq!(issues[0].path, path![1]);
    }

    #[test]
    fn test_record_values() {
        let schema = Schema::record(Schema::number());
        assert!(schema.safe_parse(&json!({"a": 1, "b": 2})).is_ok());
        let issues = schema.safe_parse(&json!({"a": "x"})).unwrap_err();
        assert_eq!(issues[0].path, path!["a"]);
    }

    #[test]
    fn test_refinement() {
        let schema = Schema::number().refine("must be positive", |v| {
            v.as_f64().map(|n| n > 0.0).unwrap_or(false)
        });
        assert!(schema.safe_parse(&json!(3)).is_ok());
        let issues = schema.safe_parse(&json!(-3)).unwrap_err();
        assert_eq!(issues[0].message, "must be positive");
    }

    #[test]
    fn test_unknown_keys_are_stripped() {
        let schema = Schema::object([("a", Schema::number())]);
        let parsed = schema.safe_parse(&json!({"a": 1, "extra": true})).unwrap();
        assert_eq!(parsed, json!({"a": 1}));
    }

    #[test]
    fn test_unwrap_wrappers() {
        let schema: Arc<dyn SchemaLike> = Arc::new(
            Schema::object([("a", Schema::number())])
                .nullable()
                .optional(),
        );
        let unwrapped = unwrap_wrappers(schema);
        assert_eq!(unwrapped.kind(), SchemaKind::Object);
        assert_eq!(unwrapped.entries().len(), 1);
    }
}
