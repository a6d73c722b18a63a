//! Input validation against JSON schemas

use crate::error::{GstError, Result};
use serde_json::Value;

/// Validate input against a JSON schema
pub fn validate_input(input: &Value, schema: &Value) -> Result<()> {
    if !input.is_object() && schema.get("type").and_then(|t| t.as_str()) == Some("object") {
        return Err(GstError::Validation("Input must be a JSON object".to_string()));
    }
    
    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field_name in required {
            let field_str = field_name.as_str()
                .ok_or_else(|| GstError::Validation("Invalid schema: required field not a string".to_string()))?;
            
            if input.get(field_str).map_or(true, Value::is_null) {
                return Err(GstError::Validation(
                    format!("Missing required field: {}", field_str)
                ));
            }
        }
    }
    
    if let (Some(properties), Some(input_obj)) = (
        schema.get("properties").and_then(|p| p.as_object()),
        input.as_object(),
    ) {
        for (key, value) in input_obj {
            if let Some(prop_schema) = properties.get(key) {
                validate_type(key, value, prop_schema)?;
            }
        }
    }
    
    Ok(())
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// Validate that a value matches the expected type. `type` may be a single
/// name or a list of accepted names, as in `["number", "null"]`.
fn validate_type(key: &str, value: &Value, schema: &Value) -> Result<()> {
    let accepted: Vec<&str> = match schema.get("type") {
        Some(Value::String(name)) => vec![name.as_str()],
        Some(Value::Array(names)) => names.iter().filter_map(|n| n.as_str()).collect(),
        _ => return Ok(()),
    };
    
    if !accepted.iter().any(|expected| type_matches(value, expected)) {
        return Err(GstError::Validation(
            format!("Type mismatch for '{}': expected {}, got {}", key, accepted.join(" or "), value)
        ));
    }
    
    Ok(())
}
