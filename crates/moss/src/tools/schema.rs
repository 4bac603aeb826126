//! Translation of JSON schemas into a native validator.
//!
//! Only the shapes tools actually use are understood. Anything else, including
//! composite schemas (`anyOf`, `oneOf`, type unions), becomes [`InputSchema::Any`]
//! so an unfamiliar schema never rejects input the remote side would accept.
use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum InputSchema {
    String,
    Number,
    Integer,
    Boolean,
    Array(Box<InputSchema>),
    Object(ObjectSchema),
    Any,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectSchema {
    pub properties: BTreeMap<String, Property>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub schema: InputSchema,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("{path}: expected {expected}, got {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{path}: required property is missing")]
    MissingProperty { path: String },
}

impl InputSchema {
    pub fn from_json_schema(schema: &Value) -> Self {
        let Some(schema) = schema.as_object() else {
            return InputSchema::Any;
        };

        match schema.get("type").and_then(Value::as_str) {
            Some("string") => InputSchema::String,
            Some("number") => InputSchema::Number,
            Some("integer") => InputSchema::Integer,
            Some("boolean") => InputSchema::Boolean,
            Some("array") => InputSchema::Array(Box::new(
                schema
                    .get("items")
                    .map(InputSchema::from_json_schema)
                    .unwrap_or(InputSchema::Any),
            )),
            Some("object") => InputSchema::Object(ObjectSchema::from_json_schema(schema)),
            None if schema.contains_key("properties") && !schema.contains_key("type") => {
                InputSchema::Object(ObjectSchema::from_json_schema(schema))
            }
            _ => InputSchema::Any,
        }
    }

    pub fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        self.validate_at(value, "$")
    }

    fn validate_at(&self, value: &Value, path: &str) -> Result<(), SchemaError> {
        let mismatch = |expected| SchemaError::TypeMismatch {
            path: path.to_string(),
            expected,
            found: kind_of(value),
        };

        match self {
            InputSchema::Any => Ok(()),
            InputSchema::String if value.is_string() => Ok(()),
            InputSchema::String => Err(mismatch("string")),
            InputSchema::Number if value.is_number() => Ok(()),
            InputSchema::Number => Err(mismatch("number")),
            InputSchema::Integer if is_integral(value) => Ok(()),
            InputSchema::Integer => Err(mismatch("integer")),
            InputSchema::Boolean if value.is_boolean() => Ok(()),
            InputSchema::Boolean => Err(mismatch("boolean")),
            InputSchema::Array(items) => {
                let array = value.as_array().ok_or_else(|| mismatch("array"))?;
                array
                    .iter()
                    .enumerate()
                    .try_for_each(|(index, item)| items.validate_at(item, &format!("{path}[{index}]")))
            }
            InputSchema::Object(object) => {
                let map = value.as_object().ok_or_else(|| mismatch("object"))?;
                object.validate_map(map, path)
            }
        }
    }
}

impl ObjectSchema {
    fn from_json_schema(schema: &Map<String, Value>) -> Self {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let properties = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|properties| {
                properties
                    .iter()
                    .map(|(name, property)| {
                        let property = Property {
                            schema: InputSchema::from_json_schema(property),
                            required: required.contains(&name.as_str()),
                        };
                        (name.clone(), property)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self { properties }
    }

    fn validate_map(&self, map: &Map<String, Value>, path: &str) -> Result<(), SchemaError> {
        for (name, property) in &self.properties {
            let property_path = format!("{path}.{name}");
            match map.get(name) {
                None | Some(Value::Null) if property.required => {
                    return Err(SchemaError::MissingProperty {
                        path: property_path,
                    })
                }
                None | Some(Value::Null) => {}
                Some(value) => property.schema.validate_at(value, &property_path)?,
            }
        }
        Ok(())
    }
}

fn is_integral(value: &Value) -> bool {
    match value {
        Value::Number(number) => {
            number.is_i64()
                || number.is_u64()
                || number.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        _ => false,
    }
}

fn kind_of(value: &Value) -> &'static str {
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
    use serde_json::json;

    fn search_schema() -> InputSchema {
        InputSchema::from_json_schema(&json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "filter": {"anyOf": [{"type": "string"}, {"type": "number"}]}
            }
        }))
    }

    #[test]
    fn test_translation_shape() {
        let InputSchema::Object(object) = search_schema() else {
            panic!("expected an object schema");
        };
        assert!(object.properties["query"].required);
        assert!(!object.properties["limit"].required);
        assert_eq!(object.properties["limit"].schema, InputSchema::Integer);
        assert_eq!(
            object.properties["tags"].schema,
            InputSchema::Array(Box::new(InputSchema::String))
        );
        assert_eq!(object.properties["filter"].schema, InputSchema::Any);
    }

    #[test]
    fn test_unknown_and_missing_types_accept_anything() {
        for schema in [json!({}), json!({"type": "null"}), json!({"type": ["string", "null"]}), json!(true)] {
            let translated = InputSchema::from_json_schema(&schema);
            assert_eq!(translated, InputSchema::Any);
            assert!(translated.validate(&json!({"anything": [1, 2]})).is_ok());
        }
    }

    #[test]
    fn test_optional_fields_may_be_absent_or_null() {
        let schema = search_schema();
        assert!(schema.validate(&json!({"query": "rust"})).is_ok());
        assert!(schema.validate(&json!({"query": "rust", "limit": null})).is_ok());
        assert!(schema
            .validate(&json!({"query": "rust", "unexpected": true}))
            .is_ok());
    }

    #[test]
    fn test_rejections_name_the_path() {
        let schema = search_schema();

        assert_eq!(
            schema.validate(&json!({"limit": 3})),
            Err(SchemaError::MissingProperty {
                path: "$.query".into()
            })
        );
        assert_eq!(
            schema.validate(&json!({"query": "rust", "limit": 2.5})),
            Err(SchemaError::TypeMismatch {
                path: "$.limit".into(),
                expected: "integer",
                found: "number"
            })
        );
        assert_eq!(
            schema.validate(&json!({"query": "rust", "tags": ["a", 1]})),
            Err(SchemaError::TypeMismatch {
                path: "$.tags[1]".into(),
                expected: "string",
                found: "number"
            })
        );
    }

    #[test]
    fn test_integer_accepts_integral_floats() {
        assert!(InputSchema::Integer.validate(&json!(4.0)).is_ok());
        assert!(InputSchema::Number.validate(&json!(4.5)).is_ok());
    }
}
