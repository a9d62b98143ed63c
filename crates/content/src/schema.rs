//! Named content schemas and lenient validation.
//!
//! Validation here is a recovery step, not a correctness gate: when a
//! model invents extra fields the pipeline strips them and proceeds,
//! favoring a usable result over strict rejection.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Field declarations for one named content shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentSchema {
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

impl ContentSchema {
    pub fn new(required: &[&str], optional: &[&str]) -> Self {
        Self {
            required: required.iter().map(|s| s.to_string()).collect(),
            optional: optional.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn declares(&self, field: &str) -> bool {
        self.required.iter().any(|f| f == field) || self.optional.iter().any(|f| f == field)
    }
}

/// Outcome of validating a value against a named schema.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub success: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn ok() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
        }
    }

    fn failed(errors: Vec<String>) -> Self {
        Self {
            success: false,
            errors,
        }
    }
}

/// Registry mapping schema names to field declarations. The pipeline
/// consumes schemas by name only; their contents come from the caller.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    schemas: HashMap<String, ContentSchema>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: &str, schema: ContentSchema) -> Self {
        self.schemas.insert(name.to_string(), schema);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ContentSchema> {
        self.schemas.get(name)
    }

    /// Check `value` against the named schema: it must be an object
    /// with every required field present; undeclared fields are
    /// reported (they are recoverable via stripping).
    pub fn validate(&self, name: &str, value: &Value) -> ValidationReport {
        let Some(schema) = self.schemas.get(name) else {
            return ValidationReport::failed(vec![format!("unknown schema {name:?}")]);
        };
        let Some(object) = value.as_object() else {
            return ValidationReport::failed(vec![format!(
                "expected an object for schema {name:?}"
            )]);
        };

        let mut errors = Vec::new();
        for field in &schema.required {
            if !object.contains_key(field) {
                errors.push(format!("missing required field {field:?}"));
            }
        }
        for field in object.keys() {
            if !schema.declares(field) {
                errors.push(format!("undeclared field {field:?}"));
            }
        }

        if errors.is_empty() {
            ValidationReport::ok()
        } else {
            ValidationReport::failed(errors)
        }
    }

    /// Return a copy of `value` containing only fields the named schema
    /// declares. Never fails: non-objects and unknown schema names pass
    /// through unchanged.
    pub fn strip_extra_fields(&self, name: &str, value: Value) -> Value {
        let Some(schema) = self.schemas.get(name) else {
            return value;
        };
        let Value::Object(map) = value else {
            return value;
        };

        let (kept, dropped): (Vec<_>, Vec<_>) =
            map.into_iter().partition(|(k, _)| schema.declares(k));
        if !dropped.is_empty() {
            debug!(
                schema = name,
                dropped = dropped.len(),
                "stripped undeclared fields"
            );
        }
        Value::Object(kept.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::new().register(
            "offer",
            ContentSchema::new(&["headline", "body"], &["cta"]),
        )
    }

    #[test]
    fn valid_object_passes() {
        let report = catalog().validate("offer", &json!({"headline": "h", "body": "b"}));
        assert!(report.success);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn missing_required_field_is_reported() {
        let report = catalog().validate("offer", &json!({"headline": "h"}));
        assert!(!report.success);
        assert!(report.errors.iter().any(|e| e.contains("body")));
    }

    #[test]
    fn undeclared_fields_are_reported_but_recoverable() {
        let value = json!({"headline": "h", "body": "b", "invented": true});
        let report = catalog().validate("offer", &value);
        assert!(!report.success);

        let stripped = catalog().strip_extra_fields("offer", value);
        assert_eq!(stripped, json!({"headline": "h", "body": "b"}));
        assert!(catalog().validate("offer", &stripped).success);
    }

    #[test]
    fn stripping_never_fails_for_arbitrary_shapes() {
        let catalog = catalog();
        for value in [
            json!(null),
            json!(42),
            json!("string"),
            json!([1, 2, 3]),
            json!({}),
            json!({"only": "extras", "here": 1}),
        ] {
            // Must not panic regardless of shape.
            let _ = catalog.strip_extra_fields("offer", value.clone());
            let _ = catalog.strip_extra_fields("no-such-schema", value);
        }

        let stripped = catalog.strip_extra_fields("offer", json!({"only": "extras"}));
        assert_eq!(stripped, json!({}));
    }

    #[test]
    fn unknown_schema_fails_validation_but_passes_stripping() {
        let value = json!({"a": 1});
        let report = catalog().validate("missing", &value);
        assert!(!report.success);

        assert_eq!(catalog().strip_extra_fields("missing", value.clone()), value);
    }

    #[test]
    fn optional_fields_are_kept() {
        let value = json!({"headline": "h", "body": "b", "cta": "go"});
        let stripped = catalog().strip_extra_fields("offer", value.clone());
        assert_eq!(stripped, value);
    }
}
