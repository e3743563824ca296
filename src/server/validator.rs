//! JSON-Schema-subset argument validator (C2).
//!
//! Supports the keyword subset a tool `inputSchema` realistically uses:
//! `type`, `required`, `properties`, `additionalProperties`, `enum`,
//! `minLength`/`maxLength`, `pattern`, `minimum`/`maximum`/exclusive variants,
//! `minItems`/`maxItems`, and recursive `items`. Unknown keywords are ignored.

use regex::Regex;
use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn ok() -> Self {
        Self { valid: true, errors: Vec::new(), warnings: Vec::new() }
    }

    fn merge(&mut self, other: ValidationResult) {
        self.valid &= other.valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Validate `value` against `schema`, per P5: failing validation must prevent
/// handler invocation.
pub fn validate(schema: &Value, value: &Value) -> ValidationResult {
    validate_at("$", schema, value)
}

fn validate_at(path: &str, schema: &Value, value: &Value) -> ValidationResult {
    let mut result = ValidationResult::ok();
    let Some(schema_obj) = schema.as_object() else {
        return result;
    };

    if let Some(types) = schema_obj.get("type") {
        let allowed: Vec<&str> = match types {
            Value::String(s) => vec![s.as_str()],
            Value::Array(arr) => arr.iter().filter_map(Value::as_str).collect(),
            _ => vec![],
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| matches_type(t, value)) {
            result.valid = false;
            result.errors.push(format!(
                "{path}: expected type {}, got {}",
                allowed.join("|"),
                type_name(value)
            ));
            return result;
        }
    }

    if let Some(Value::Array(enum_values)) = schema_obj.get("enum") {
        if !enum_values.contains(value) {
            result.valid = false;
            result.errors.push(format!("{path}: value not in enum"));
        }
    }

    match value {
        Value::Object(obj) => {
            if let Some(Value::Array(required)) = schema_obj.get("required") {
                for req in required {
                    if let Some(name) = req.as_str() {
                        if !obj.contains_key(name) {
                            result.valid = false;
                            result.errors.push(format!("{path}: missing required field \"{name}\""));
                        }
                    }
                }
            }
            if let Some(Value::Object(properties)) = schema_obj.get("properties") {
                for (key, sub_schema) in properties {
                    if let Some(sub_value) = obj.get(key) {
                        result.merge(validate_at(&format!("{path}.{key}"), sub_schema, sub_value));
                    }
                }
                if schema_obj.get("additionalProperties") == Some(&Value::Bool(false)) {
                    for key in obj.keys() {
                        if !properties.contains_key(key) {
                            result.valid = false;
                            result.errors.push(format!("{path}: unexpected field \"{key}\""));
                        }
                    }
                }
            }
        }
        Value::String(s) => {
            if let Some(min) = schema_obj.get("minLength").and_then(Value::as_u64) {
                if (s.chars().count() as u64) < min {
                    result.valid = false;
                    result.errors.push(format!("{path}: shorter than minLength {min}"));
                }
            }
            if let Some(max) = schema_obj.get("maxLength").and_then(Value::as_u64) {
                if (s.chars().count() as u64) > max {
                    result.valid = false;
                    result.errors.push(format!("{path}: longer than maxLength {max}"));
                }
            }
            if let Some(pattern) = schema_obj.get("pattern").and_then(Value::as_str) {
                match Regex::new(pattern) {
                    Ok(re) if !re.is_match(s) => {
                        result.valid = false;
                        result.errors.push(format!("{path}: does not match pattern {pattern}"));
                    }
                    Ok(_) => {}
                    Err(_) => result.warnings.push(format!("{path}: invalid pattern {pattern}")),
                }
            }
        }
        Value::Number(n) => {
            let f = n.as_f64().unwrap_or(0.0);
            check_bound(&mut result, path, schema_obj, "minimum", f, |a, b| a >= b);
            check_bound(&mut result, path, schema_obj, "maximum", f, |a, b| a <= b);
            check_bound(&mut result, path, schema_obj, "exclusiveMinimum", f, |a, b| a > b);
            check_bound(&mut result, path, schema_obj, "exclusiveMaximum", f, |a, b| a < b);
        }
        Value::Array(items) => {
            if let Some(min) = schema_obj.get("minItems").and_then(Value::as_u64) {
                if (items.len() as u64) < min {
                    result.valid = false;
                    result.errors.push(format!("{path}: fewer than minItems {min}"));
                }
            }
            if let Some(max) = schema_obj.get("maxItems").and_then(Value::as_u64) {
                if (items.len() as u64) > max {
                    result.valid = false;
                    result.errors.push(format!("{path}: more than maxItems {max}"));
                }
            }
            if let Some(item_schema) = schema_obj.get("items") {
                for (i, item) in items.iter().enumerate() {
                    result.merge(validate_at(&format!("{path}[{i}]"), item_schema, item));
                }
            }
        }
        _ => {}
    }

    result
}

fn check_bound(
    result: &mut ValidationResult,
    path: &str,
    schema_obj: &serde_json::Map<String, Value>,
    key: &str,
    value: f64,
    ok: impl Fn(f64, f64) -> bool,
) {
    if let Some(bound) = schema_obj.get(key).and_then(Value::as_f64) {
        if !ok(value, bound) {
            result.valid = false;
            result.errors.push(format!("{path}: violates {key} {bound}"));
        }
    }
}

fn matches_type(t: &str, value: &Value) -> bool {
    match t {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
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

    fn echo_schema() -> Value {
        json!({
            "type": "object",
            "properties": { "message": { "type": "string" } },
            "required": ["message"]
        })
    }

    #[test]
    fn missing_required_field_fails() {
        let result = validate(&echo_schema(), &json!({}));
        assert!(!result.valid);
        assert!(result.errors[0].contains("message"));
    }

    #[test]
    fn valid_payload_passes() {
        let result = validate(&echo_schema(), &json!({"message": "hi"}));
        assert!(result.valid);
    }

    #[test]
    fn numeric_bounds_enforced() {
        let schema = json!({ "type": "integer", "minimum": 1, "maximum": 10 });
        assert!(!validate(&schema, &json!(0)).valid);
        assert!(validate(&schema, &json!(5)).valid);
        assert!(!validate(&schema, &json!(11)).valid);
    }

    #[test]
    fn nested_array_items_validated() {
        let schema = json!({
            "type": "array",
            "items": { "type": "string" },
            "minItems": 1
        });
        assert!(!validate(&schema, &json!([])).valid);
        assert!(!validate(&schema, &json!([1, 2])).valid);
        assert!(validate(&schema, &json!(["a"])).valid);
    }
}
