//! Schema stub builder
//!
//! Builds the default-populated skeleton every snapshot starts from: an
//! object whose keys are exactly the schema's declared keys, recursively
//! stubbed, so consumers can bind to the full shape before any bytes have
//! arrived.
//!
//! Default resolution per field, in order:
//!
//! 1. the schema-declared default, if any;
//! 2. by structural kind: string/number/boolean → the configured
//!    [`TypeDefaults`] (each `null` unless overridden), array → `[]`,
//!    object → recursive stub, record → `{}`;
//! 3. wrappers recurse into the unwrapped schema;
//! 4. otherwise `null`.
//!
//! A user-supplied `default_data` seed wins over the computed default at
//! every path it covers.

use crate::error::SchemaResolutionError;
use crate::schema::{unwrap_wrappers, SchemaKind, SchemaLike};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Fallback values for primitive fields with no schema-declared default.
#[derive(Debug, Clone)]
pub struct TypeDefaults {
    /// Default for string-typed fields
    pub string: Value,
    /// Default for number-typed fields
    pub number: Value,
    /// Default for boolean-typed fields
    pub boolean: Value,
}

impl Default for TypeDefaults {
    fn default() -> Self {
        Self {
            string: Value::Null,
            number: Value::Null,
            boolean: Value::Null,
        }
    }
}

/// Build the initial snapshot stub for an object-shaped schema.
///
/// Fails with [`SchemaResolutionError`] when the root schema (after
/// unwrapping) is not object-shaped.
pub fn build_stub(
    schema: &Arc<dyn SchemaLike>,
    defaults: &TypeDefaults,
    default_data: Option<&Value>,
) -> Result<Value, SchemaResolutionError> {
    let root = unwrap_wrappers(schema.clone());
    let mut stub = match root.kind() {
        SchemaKind::Object => object_stub(&root, defaults),
        SchemaKind::Record => Value::Object(Map::new()),
        other => {
            return Err(SchemaResolutionError::new(format!(
                "root schema must be object-shaped, got {:?}",
                other
            )))
        }
    };
    if let Some(seed) = default_data {
        merge_seed(&mut stub, seed);
    }
    Ok(stub)
}

fn object_stub(schema: &Arc<dyn SchemaLike>, defaults: &TypeDefaults) -> Value {
    let mut map = Map::new();
    for (key, sub) in schema.entries() {
        map.insert(key, field_default(&sub, defaults));
    }
    Value::Object(map)
}

fn field_default(schema: &Arc<dyn SchemaLike>, defaults: &TypeDefaults) -> Value {
    if let Some(declared) = schema.default_value() {
        return declared;
    }
    match schema.kind() {
        SchemaKind::String => defaults.string.clone(),
        SchemaKind::Number => defaults.number.clone(),
        SchemaKind::Boolean => defaults.boolean.clone(),
        SchemaKind::Array => Value::Array(Vec::new()),
        SchemaKind::Object => object_stub(schema, defaults),
        SchemaKind::Record => Value::Object(Map::new()),
        SchemaKind::Wrapper => match schema.element() {
            Some(inner) => field_default(&inner, defaults),
            None => Value::Null,
        },
        SchemaKind::Opaque => Value::Null,
    }
}

/// Deep-merge the seed over the stub; seed values win, objects merge
/// key-by-key.
fn merge_seed(stub: &mut Value, seed: &Value) {
    match (stub, seed) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_seed(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, other) => *slot = other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use serde_json::json;

    fn arc(schema: Schema) -> Arc<dyn SchemaLike> {
        Arc::new(schema)
    }

    #[test]
    fn test_every_declared_key_is_present() {
        let schema = arc(Schema::object([
            ("name", Schema::string()),
            ("age", Schema::number()),
            ("tags", Schema::array(Schema::string())),
            ("meta", Schema::object([("active", Schema::boolean())])),
            ("extra", Schema::record(Schema::number())),
        ]));
        let stub = build_stub(&schema, &TypeDefaults::default(), None).unwrap();
        assert_eq!(
            stub,
            json!({
                "name": null,
                "age": null,
                "tags": [],
                "meta": {"active": null},
                "extra": {},
            })
        );
    }

    #[test]
    fn test_declared_defaults_win_over_type_defaults() {
        let schema = arc(Schema::object([(
            "count",
            Schema::number().with_default(json!(7)),
        )]));
        let stub = build_stub(&schema, &TypeDefaults::default(), None).unwrap();
        assert_eq!(stub, json!({"count": 7}));
    }

    #[test]
    fn test_type_defaults_apply() {
        let schema = arc(Schema::object([
            ("name", Schema::string()),
            ("age", Schema::number()),
        ]));
        let defaults = TypeDefaults {
            string: json!(""),
            number: json!(0),
            boolean: Value::Null,
        };
        let stub = build_stub(&schema, &defaults, None).unwrap();
        assert_eq!(stub, json!({"name": "", "age": 0}));
    }

    #[test]
    fn test_wrappers_recurse() {
        let schema = arc(Schema::object([(
            "nested",
            Schema::object([("x", Schema::number())]).nullable().optional(),
        )]));
        let stub = build_stub(&schema, &TypeDefaults::default(), None).unwrap();
        assert_eq!(stub, json!({"nested": {"x": null}}));
    }

    #[test]
    fn test_seed_overrides_matching_paths() {
        let schema = arc(Schema::object([
            ("name", Schema::string()),
            ("meta", Schema::object([("a", Schema::number()), ("b", Schema::number())])),
        ]));
        let seed = json!({"meta": {"a": 1}});
        let stub = build_stub(&schema, &TypeDefaults::default(), Some(&seed)).unwrap();
        assert_eq!(stub, json!({"name": null, "meta": {"a": 1, "b": null}}));
    }

    #[test]
    fn test_wrapped_root_unwraps() {
        let schema = arc(Schema::object([("a", Schema::number())]).nullable());
        let stub = build_stub(&schema, &TypeDefaults::default(), None).unwrap();
        assert_eq!(stub, json!({"a": null}));
    }

    #[test]
    fn test_non_object_root_rejected() {
        let schema = arc(Schema::array(Schema::number()));
        assert!(build_stub(&schema, &TypeDefaults::default(), None).is_err());
    }
}
