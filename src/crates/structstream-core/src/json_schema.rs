//! JSON-Schema adapter for the schema capability interface
//!
//! Available behind the `json-validation` feature. Wraps a JSON-Schema
//! document so it can drive stub construction (via `properties`, `items`,
//! `additionalProperties`, and `default` keywords) and validation (via the
//! `jsonschema` crate).
//!
//! Property subschemas are compiled independently, so documents relying on
//! cross-document `$ref` resolution are out of scope for stub construction;
//! full-document validation still sees the complete schema.

use crate::error::SchemaResolutionError;
use crate::path::{Path, PathSegment};
use crate::schema::{SchemaIssue, SchemaKind, SchemaLike};
use jsonschema::JSONSchema;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A compiled JSON-Schema document implementing [`SchemaLike`].
pub struct JsonSchema {
    document: Value,
    compiled: JSONSchema,
}

impl JsonSchema {
    /// Compile a JSON-Schema document.
    pub fn compile(document: Value) -> Result<Self, SchemaResolutionError> {
        let compiled = JSONSchema::compile(&document)
            .map_err(|e| SchemaResolutionError::new(format!("invalid JSON Schema: {}", e)))?;
        Ok(Self { document, compiled })
    }

    /// The underlying schema document.
    pub fn document(&self) -> &Value {
        &self.document
    }

    fn type_name(&self) -> Option<&str> {
        self.document.get("type").and_then(Value::as_str)
    }

    fn subschema(&self, keyword: &str) -> Option<Arc<dyn SchemaLike>> {
        let sub = self.document.get(keyword)?;
        if !sub.is_object() {
            return None;
        }
        match JsonSchema::compile(sub.clone()) {
            Ok(schema) => Some(Arc::new(schema) as Arc<dyn SchemaLike>),
            Err(e) => {
                tracing::warn!(keyword, error = %e, "skipping uncompilable subschema");
                None
            }
        }
    }
}

impl fmt::Debug for JsonSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchema")
            .field("document", &self.document)
            .finish()
    }
}

impl SchemaLike for JsonSchema {
    fn kind(&self) -> SchemaKind {
        match self.type_name() {
            Some("object") => {
                if self.document.get("properties").is_some() {
                    SchemaKind::Object
                } else if self.document.get("additionalProperties").is_some() {
                    SchemaKind::Record
                } else {
                    SchemaKind::Object
                }
            }
            Some("array") => SchemaKind::Array,
            Some("string") => SchemaKind::String,
            Some("number") | Some("integer") => SchemaKind::Number,
            Some("boolean") => SchemaKind::Boolean,
            _ => SchemaKind::Opaque,
        }
    }

    fn entries(&self) -> Vec<(String, Arc<dyn SchemaLike>)> {
        let properties = match self.document.get("properties").and_then(Value::as_object) {
            Some(map) => map,
            None => return Vec::new(),
        };
        properties
            .iter()
            .filter_map(|(key, sub)| {
                match JsonSchema::compile(sub.clone()) {
                    Ok(schema) => Some((key.clone(), Arc::new(schema) as Arc<dyn SchemaLike>)),
                    Err(e) => {
                        tracing::warn!(key = key.as_str(), error = %e, "skipping uncompilable property schema");
                        None
                    }
                }
            })
            .collect()
    }

    fn element(&self) -> Option<Arc<dyn SchemaLike>> {
        match self.kind() {
            SchemaKind::Array => self.subschema("items"),
            SchemaKind::Record => self.subschema("additionalProperties"),
            _ => None,
        }
    }

    fn default_value(&self) -> Option<Value> {
        self.document.get("default").cloned()
    }

    fn safe_parse(&self, value: &Value) -> Result<Value, Vec<SchemaIssue>> {
        match self.compiled.validate(value) {
            Ok(()) => Ok(value.clone()),
            Err(errors) => Err(errors
                .map(|e| SchemaIssue::at(pointer_to_path(&e.instance_path.to_string()), e.to_string()))
                .collect()),
        }
    }
}

/// Convert a JSON Pointer (`/a/0/b`) into a [`Path`].
fn pointer_to_path(pointer: &str) -> Path {
    pointer
        .split('/')
        .skip(1)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let unescaped = s.replace("~1", "/").replace("~0", "~");
            match unescaped.parse::<usize>() {
                Ok(index) => PathSegment::Index(index),
                Err(_) => PathSegment::Key(unescaped),
            }
        })
        .collect()
}
