//! Object Schemas
//!
//! JSON-schema shaped descriptions of what the extraction step must return,
//! plus the validation that decides whether a returned object is usable.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Why an extracted object was rejected
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("expected a JSON object, got {0}")]
    NotAnObject(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("field '{field}' has wrong type, expected {expected}")]
    WrongType { field: String, expected: String },

    #[error("field '{field}' must be one of [{allowed}], got '{value}'")]
    NotAllowed {
        field: String,
        value: String,
        allowed: String,
    },
}

/// Schema for a structured object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSchema {
    /// Schema name (used in logs and sent to the extractor)
    pub name: String,
    /// JSON Schema for the object
    pub parameters: Value,
    /// Required field names
    pub required: Vec<String>,
}

impl ObjectSchema {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
            required: vec![],
        }
    }

    /// Add a string field
    pub fn with_string_field(mut self, name: &str, description: &str, required: bool) -> Self {
        if let Some(props) = self.parameters.get_mut("properties") {
            props[name] = serde_json::json!({
                "type": "string",
                "description": description
            });
        }
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    /// Add a string field restricted to a set of values
    pub fn with_enum_field(mut self, name: &str, description: &str, values: &[String], required: bool) -> Self {
        if let Some(props) = self.parameters.get_mut("properties") {
            props[name] = serde_json::json!({
                "type": "string",
                "description": description,
                "enum": values
            });
        }
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    /// Add an array-of-strings field
    pub fn with_string_list_field(mut self, name: &str, description: &str, required: bool) -> Self {
        if let Some(props) = self.parameters.get_mut("properties") {
            props[name] = serde_json::json!({
                "type": "array",
                "items": { "type": "string" },
                "description": description
            });
        }
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    /// Validate an object against this schema
    ///
    /// Unknown fields are allowed; `null` counts as absent.
    pub fn validate(&self, object: &Value) -> Result<(), ValidationError> {
        let obj = object
            .as_object()
            .ok_or_else(|| ValidationError::NotAnObject(json_kind(object).to_string()))?;

        for req in &self.required {
            if obj.get(req).map_or(true, Value::is_null) {
                return Err(ValidationError::MissingField(req.clone()));
            }
        }

        let Some(props) = self.parameters.get("properties").and_then(Value::as_object) else {
            return Ok(());
        };

        for (name, schema) in props {
            let Some(value) = obj.get(name).filter(|v| !v.is_null()) else {
                continue;
            };

            let expected_type = schema.get("type").and_then(|t| t.as_str());
            let valid = match expected_type {
                Some("string") => value.is_string(),
                Some("integer") => value.is_i64(),
                Some("number") => value.is_number(),
                Some("boolean") => value.is_boolean(),
                Some("array") => value.as_array().map_or(false, |items| {
                    match schema.pointer("/items/type").and_then(|t| t.as_str()) {
                        Some("string") => items.iter().all(Value::is_string),
                        _ => true,
                    }
                }),
                Some("object") => value.is_object(),
                _ => true,
            };
            if !valid {
                return Err(ValidationError::WrongType {
                    field: name.clone(),
                    expected: expected_type.unwrap_or("unknown").to_string(),
                });
            }

            if let (Some(allowed), Some(s)) = (schema.get("enum").and_then(Value::as_array), value.as_str()) {
                if !allowed.iter().any(|a| a.as_str() == Some(s)) {
                    let allowed = allowed
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(", ");
                    return Err(ValidationError::NotAllowed {
                        field: name.clone(),
                        value: s.to_string(),
                        allowed,
                    });
                }
            }
        }

        Ok(())
    }

    /// Format as a JSON Schema document
    pub fn to_json_schema(&self) -> Value {
        serde_json::json!({
            "title": self.name,
            "type": "object",
            "properties": self.parameters.get("properties").cloned().unwrap_or(Value::Object(Default::default())),
            "required": self.required
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
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

    fn actions() -> Vec<String> {
        vec!["CREATE_ISSUE".to_string(), "NOTHING".to_string()]
    }

    #[test]
    fn test_required_fields() {
        let schema = ObjectSchema::new("config")
            .with_string_field("owner", "Owner", true)
            .with_string_field("repo", "Repo", true);

        assert!(schema.validate(&json!({"owner": "acme", "repo": ""})).is_ok());
        assert_eq!(
            schema.validate(&json!({"owner": "acme"})),
            Err(ValidationError::MissingField("repo".to_string()))
        );
        assert_eq!(
            schema.validate(&json!({"owner": "acme", "repo": null})),
            Err(ValidationError::MissingField("repo".to_string()))
        );
    }

    #[test]
    fn test_wrong_type_and_not_object() {
        let schema = ObjectSchema::new("config").with_string_field("owner", "Owner", true);

        assert!(matches!(
            schema.validate(&json!({"owner": 7})),
            Err(ValidationError::WrongType { .. })
        ));
        assert_eq!(
            schema.validate(&json!("acme")),
            Err(ValidationError::NotAnObject("string".to_string()))
        );
    }

    #[test]
    fn test_enum_field() {
        let schema = ObjectSchema::new("decision").with_enum_field("action", "Next action", &actions(), true);

        assert!(schema.validate(&json!({"action": "NOTHING"})).is_ok());
        let err = schema.validate(&json!({"action": "DELETE_REPO"})).unwrap_err();
        assert!(err.to_string().contains("DELETE_REPO"));
    }

    #[test]
    fn test_string_list_field() {
        let schema = ObjectSchema::new("decision").with_string_list_field("labels", "Labels", false);

        assert!(schema.validate(&json!({"labels": ["bug"]})).is_ok());
        assert!(schema.validate(&json!({})).is_ok());
        assert!(schema.validate(&json!({"labels": [1]})).is_err());
    }

    #[test]
    fn test_json_schema_format() {
        let schema = ObjectSchema::new("config").with_string_field("branch", "Branch", true);
        let formatted = schema.to_json_schema();

        assert_eq!(formatted["title"], "config");
        assert!(formatted["required"].as_array().unwrap().contains(&Value::String("branch".to_string())));
    }
}
