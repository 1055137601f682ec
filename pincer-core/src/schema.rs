//! The JSON-Schema subset adapter manifests may declare for action inputs:
//! a flat object of typed properties with range/length/enum bounds, an
//! optional `required` list, and an `additionalProperties` switch.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub additional_properties: bool,
}

impl Default for InputSchema {
    fn default() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
            additional_properties: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PropertySchema {
    #[serde(rename_all = "camelCase")]
    String {
        #[serde(skip_serializing_if = "Option::is_none")]
        min_length: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_length: Option<u64>,
        #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
        allowed: Option<Vec<String>>,
    },
    #[serde(rename_all = "camelCase")]
    Integer {
        #[serde(skip_serializing_if = "Option::is_none")]
        minimum: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        maximum: Option<i64>,
        #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
        allowed: Option<Vec<i64>>,
    },
    #[serde(rename_all = "camelCase")]
    Number {
        #[serde(skip_serializing_if = "Option::is_none")]
        minimum: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        maximum: Option<f64>,
    },
    Boolean,
}

/// Parses an `inputSchema` value, appending problems to `errors` with the
/// given path prefix. Returns `None` when the schema is unusable.
pub fn parse_input_schema(prefix: &str, raw: &Value, errors: &mut Vec<String>) -> Option<InputSchema> {
    let Some(obj) = raw.as_object() else {
        errors.push(format!("{prefix} must be an object"));
        return None;
    };

    match obj.get("type") {
        None => {}
        Some(Value::String(kind)) if kind == "object" => {}
        Some(_) => errors.push(format!("{prefix}.type must be \"object\"")),
    }

    let mut schema = InputSchema::default();

    if let Some(raw_props) = obj.get("properties") {
        let Some(props) = raw_props.as_object() else {
            errors.push(format!("{prefix}.properties must be an object"));
            return None;
        };
        for (name, prop) in props {
            if let Some(parsed) =
                parse_property(&format!("{prefix}.properties.{name}"), prop, errors)
            {
                schema.properties.insert(name.clone(), parsed);
            }
        }
    }

    if let Some(raw_required) = obj.get("required") {
        let Some(list) = raw_required.as_array() else {
            errors.push(format!("{prefix}.required must be an array of strings"));
            return None;
        };
        for item in list {
            match item.as_str() {
                Some(name) if schema.properties.contains_key(name) => {
                    schema.required.push(name.to_string());
                }
                Some(name) => errors.push(format!(
                    "{prefix}.required references unknown property {name}"
                )),
                None => errors.push(format!("{prefix}.required must be an array of strings")),
            }
        }
    }

    match obj.get("additionalProperties") {
        None => {}
        Some(Value::Bool(flag)) => schema.additional_properties = *flag,
        Some(_) => errors.push(format!("{prefix}.additionalProperties must be a boolean")),
    }

    Some(schema)
}

fn parse_property(prefix: &str, raw: &Value, errors: &mut Vec<String>) -> Option<PropertySchema> {
    let Some(obj) = raw.as_object() else {
        errors.push(format!("{prefix} must be an object"));
        return None;
    };
    let kind = match obj.get("type").and_then(Value::as_str) {
        Some(kind) => kind,
        None => {
            errors.push(format!("{prefix}.type is required"));
            return None;
        }
    };
    match kind {
        "string" => {
            let min_length = read_u64(obj, "minLength", prefix, errors);
            let max_length = read_u64(obj, "maxLength", prefix, errors);
            if let (Some(min), Some(max)) = (min_length, max_length) {
                if min > max {
                    errors.push(format!("{prefix}.minLength exceeds maxLength"));
                }
            }
            let allowed = match obj.get("enum") {
                None => None,
                Some(Value::Array(items)) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        match item.as_str() {
                            Some(s) => values.push(s.to_string()),
                            None => errors.push(format!("{prefix}.enum must contain strings")),
                        }
                    }
                    Some(values)
                }
                Some(_) => {
                    errors.push(format!("{prefix}.enum must be an array"));
                    None
                }
            };
            Some(PropertySchema::String {
                min_length,
                max_length,
                allowed,
            })
        }
        "integer" => {
            let minimum = read_i64(obj, "minimum", prefix, errors);
            let maximum = read_i64(obj, "maximum", prefix, errors);
            let allowed = match obj.get("enum") {
                None => None,
                Some(Value::Array(items)) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        match item.as_i64() {
                            Some(n) => values.push(n),
                            None => errors.push(format!("{prefix}.enum must contain integers")),
                        }
                    }
                    Some(values)
                }
                Some(_) => {
                    errors.push(format!("{prefix}.enum must be an array"));
                    None
                }
            };
            Some(PropertySchema::Integer {
                minimum,
                maximum,
                allowed,
            })
        }
        "number" => {
            let minimum = read_f64(obj, "minimum", prefix, errors);
            let maximum = read_f64(obj, "maximum", prefix, errors);
            Some(PropertySchema::Number { minimum, maximum })
        }
        "boolean" => Some(PropertySchema::Boolean),
        other => {
            errors.push(format!("{prefix}.type {other} is not supported"));
            None
        }
    }
}

fn read_u64(
    obj: &Map<String, Value>,
    field: &str,
    prefix: &str,
    errors: &mut Vec<String>,
) -> Option<u64> {
    match obj.get(field) {
        None => None,
        Some(value) => match value.as_u64() {
            Some(n) => Some(n),
            None => {
                errors.push(format!("{prefix}.{field} must be a non-negative integer"));
                None
            }
        },
    }
}

fn read_i64(
    obj: &Map<String, Value>,
    field: &str,
    prefix: &str,
    errors: &mut Vec<String>,
) -> Option<i64> {
    match obj.get(field) {
        None => None,
        Some(value) => match value.as_i64() {
            Some(n) => Some(n),
            None => {
                errors.push(format!("{prefix}.{field} must be an integer"));
                None
            }
        },
    }
}

fn read_f64(
    obj: &Map<String, Value>,
    field: &str,
    prefix: &str,
    errors: &mut Vec<String>,
) -> Option<f64> {
    match obj.get(field) {
        None => None,
        Some(value) => match value.as_f64() {
            Some(n) if n.is_finite() => Some(n),
            _ => {
                errors.push(format!("{prefix}.{field} must be a finite number"));
                None
            }
        },
    }
}

/// Validates a runtime `input` object against a schema. Returns every
/// violation, not just the first.
pub fn validate_input(schema: &InputSchema, input: &Map<String, Value>) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    for name in &schema.required {
        if !input.contains_key(name) {
            errors.push(format!("input.{name} is required"));
        }
    }

    for (name, value) in input {
        match schema.properties.get(name) {
            None if schema.additional_properties => {}
            None => errors.push(format!("input.{name} is not an allowed property")),
            Some(property) => check_property(name, property, value, &mut errors),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_property(name: &str, property: &PropertySchema, value: &Value, errors: &mut Vec<String>) {
    match property {
        PropertySchema::String {
            min_length,
            max_length,
            allowed,
        } => {
            let Some(s) = value.as_str() else {
                errors.push(format!("input.{name} must be a string"));
                return;
            };
            let len = s.chars().count() as u64;
            if min_length.is_some_and(|min| len < min) {
                errors.push(format!("input.{name} is shorter than minLength"));
            }
            if max_length.is_some_and(|max| len > max) {
                errors.push(format!("input.{name} is longer than maxLength"));
            }
            if let Some(allowed) = allowed {
                if !allowed.iter().any(|candidate| candidate == s) {
                    errors.push(format!("input.{name} is not one of the allowed values"));
                }
            }
        }
        PropertySchema::Integer {
            minimum,
            maximum,
            allowed,
        } => {
            let Some(n) = as_integer(value) else {
                errors.push(format!("input.{name} must be an integer"));
                return;
            };
            if minimum.is_some_and(|min| n < min) {
                errors.push(format!("input.{name} is below minimum"));
            }
            if maximum.is_some_and(|max| n > max) {
                errors.push(format!("input.{name} is above maximum"));
            }
            if let Some(allowed) = allowed {
                if !allowed.contains(&n) {
                    errors.push(format!("input.{name} is not one of the allowed values"));
                }
            }
        }
        PropertySchema::Number { minimum, maximum } => {
            let Some(n) = value.as_f64().filter(|n| n.is_finite()) else {
                errors.push(format!("input.{name} must be a finite number"));
                return;
            };
            if minimum.is_some_and(|min| n < min) {
                errors.push(format!("input.{name} is below minimum"));
            }
            if maximum.is_some_and(|max| n > max) {
                errors.push(format!("input.{name} is above maximum"));
            }
        }
        PropertySchema::Boolean => {
            if !value.is_boolean() {
                errors.push(format!("input.{name} must be a boolean"));
            }
        }
    }
}

// JSON has no integer type; accept whole-valued numbers the way upstream
// schemas do (10 and 10.0 are the same integer).
fn as_integer(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    let n = value.as_f64()?;
    if n.is_finite() && n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
        Some(n as i64)
    } else {
        None
    }
}
