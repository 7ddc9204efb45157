//! Document validation against a schema.

use serde_json::{Map, Value};

use crate::error::{QuarryError, Result};
use crate::schema::{FieldType, Schema};

/// Validate a document's fields against the schema.
///
/// Strict typing: arrays must be homogeneous and non-nested; optional
/// fields may be missing; everything else must match its declared type.
pub fn validate_document(document: &Map<String, Value>, schema: &Schema) -> Result<()> {
    for field in &schema.fields {
        let value = match document.get(&field.name) {
            Some(value) => value,
            None => {
                if field.optional {
                    continue;
                }
                return Err(QuarryError::bad_request(format!(
                    "Field `{}` has been declared in the schema, but is not found in the document.",
                    field.name
                )));
            }
        };

        validate_value(&field.name, &field.field_type, value)?;
    }

    Ok(())
}

fn validate_value(name: &str, field_type: &FieldType, value: &Value) -> Result<()> {
    match field_type {
        FieldType::String => {
            if !value.is_string() {
                return Err(type_error(name, "a string"));
            }
        }
        FieldType::Int32 => {
            let ok = value.as_i64().is_some_and(|v| i32::try_from(v).is_ok());
            if !ok {
                return Err(type_error(name, "an int32"));
            }
        }
        FieldType::Int64 => {
            if value.as_i64().is_none() {
                return Err(type_error(name, "an int64"));
            }
        }
        FieldType::Float => {
            if !value.is_number() {
                return Err(type_error(name, "a float"));
            }
        }
        FieldType::Bool => {
            if !value.is_boolean() {
                return Err(type_error(name, "a bool"));
            }
        }
        FieldType::Geopoint => {
            let ok = value
                .as_array()
                .is_some_and(|arr| arr.len() == 2 && arr.iter().all(Value::is_number));
            if !ok {
                return Err(QuarryError::bad_request(format!(
                    "Field `{name}` must be a 2 element array: [lat, lng]."
                )));
            }
        }
        FieldType::StringArray => validate_array(name, value, "string", Value::is_string)?,
        FieldType::Int32Array => validate_array(name, value, "int32", |v| {
            v.as_i64().is_some_and(|v| i32::try_from(v).is_ok())
        })?,
        FieldType::Int64Array => {
            validate_array(name, value, "int64", |v| v.as_i64().is_some())?
        }
        FieldType::FloatArray => validate_array(name, value, "float", Value::is_number)?,
        FieldType::BoolArray => validate_array(name, value, "bool", Value::is_boolean)?,
    }

    Ok(())
}

fn validate_array(
    name: &str,
    value: &Value,
    element_type: &str,
    is_valid: impl Fn(&Value) -> bool,
) -> Result<()> {
    let elements = value
        .as_array()
        .ok_or_else(|| QuarryError::bad_request(format!("Field `{name}` must be an array.")))?;

    if !elements.iter().all(&is_valid) {
        return Err(QuarryError::bad_request(format!(
            "Field `{name}` must be an array of {element_type}."
        )));
    }

    Ok(())
}

/// Infer the field type of an unknown scalar JSON value, used by
/// `index_all_fields` auto-registration. Returns `None` for values that
/// cannot be auto-registered (objects, arrays, null).
pub fn infer_field_type(value: &Value) -> Option<FieldType> {
    match value {
        Value::String(_) => Some(FieldType::String),
        Value::Bool(_) => Some(FieldType::Bool),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                Some(FieldType::Int64)
            } else {
                Some(FieldType::Float)
            }
        }
        _ => None,
    }
}

fn type_error(name: &str, expected: &str) -> QuarryError {
    QuarryError::bad_request(format!("Field `{name}` must be {expected}."))
}
