//! Filter expression parsing.
//!
//! Grammar: `expr := clause ("&&" clause)*`;
//! `clause := field ":" ("!"? value_list | range | numeric_op value | geo)`.
//! String values may be backtick-escaped to include commas.

use crate::error::{QuarryError, Result};
use crate::index::geo::GeoPoint;
use crate::index::numeric::{float_sort_key, NumComparator};
use crate::schema::{FieldType, Schema};

/// One parsed condition of a filter clause. A document matches the clause
/// when any of its conditions match; clauses are AND-ed together.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterCondition {
    /// Match documents whose field holds (or, with `exclude`, does not
    /// hold) one of the listed string values.
    StringValues { values: Vec<String>, exclude: bool },
    /// Compare against an encoded numeric value.
    Numeric { comparator: NumComparator, value: i64 },
    /// Closed interval over encoded numeric values.
    NumericRange { from: i64, to: i64 },
    /// Match documents within a radius of a point.
    Geo { reference: GeoPoint, radius_meters: f64 },
}

/// One `field: condition` clause of a filter expression.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    pub field_name: String,
    pub conditions: Vec<FilterCondition>,
}

/// Parse a filter expression against a schema into typed clauses.
pub fn parse_filter(expression: &str, schema: &Schema) -> Result<Vec<FilterClause>> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Ok(Vec::new());
    }

    let mut clauses = Vec::new();

    for raw_clause in expression.split("&&") {
        let raw_clause = raw_clause.trim();
        let (field_name, raw_value) = raw_clause.split_once(':').ok_or_else(|| {
            QuarryError::bad_request(format!("Could not parse the filter query: `{raw_clause}`."))
        })?;
        let field_name = field_name.trim();
        let raw_value = raw_value.trim();

        let field = schema.field(field_name).ok_or_else(|| {
            QuarryError::not_found(format!(
                "Could not find a filter field named `{field_name}` in the schema."
            ))
        })?;

        let conditions = match field.field_type {
            FieldType::String | FieldType::StringArray => parse_string_conditions(raw_value),
            FieldType::Bool | FieldType::BoolArray => parse_bool_conditions(field_name, raw_value)?,
            FieldType::Geopoint => vec![parse_geo_condition(field_name, raw_value)?],
            _ => parse_numeric_conditions(field_name, &field.field_type, raw_value)?,
        };

        clauses.push(FilterClause {
            field_name: field_name.to_string(),
            conditions,
        });
    }

    Ok(clauses)
}

/// Split a comma-separated value list, honoring backtick escapes.
///
/// A value wrapped in backticks may contain commas; a literal backtick is
/// written as `` \` ``.
pub fn split_to_values(input: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut buffer = String::new();
    let mut inside_tick = false;
    let mut prev = '\0';

    for ch in input.chars() {
        match ch {
            '`' => {
                if prev == '\\' {
                    buffer.pop();
                    buffer.push('`');
                } else if inside_tick && !buffer.is_empty() {
                    inside_tick = false;
                } else {
                    inside_tick = true;
                }
            }
            ',' => {
                if inside_tick {
                    buffer.push(',');
                } else {
                    values.push(std::mem::take(&mut buffer));
                }
            }
            _ => buffer.push(ch),
        }
        prev = ch;
    }

    if !buffer.is_empty() {
        values.push(buffer);
    }

    values.into_iter().map(|v| v.trim().to_string()).collect()
}

fn parse_string_conditions(raw_value: &str) -> Vec<FilterCondition> {
    let (exclude, rest) = match raw_value.strip_prefix('!') {
        Some(rest) => (true, rest.trim()),
        None => (false, raw_value),
    };

    vec![FilterCondition::StringValues {
        values: split_to_values(rest),
        exclude,
    }]
}

fn parse_bool_conditions(field_name: &str, raw_value: &str) -> Result<Vec<FilterCondition>> {
    let (exclude, rest) = match raw_value.strip_prefix('!') {
        Some(rest) => (true, rest.trim()),
        None => (false, raw_value),
    };

    let mut conditions = Vec::new();
    for value in split_to_values(rest) {
        let bit = match value.as_str() {
            "true" => 1,
            "false" => 0,
            _ => {
                return Err(QuarryError::bad_request(format!(
                    "Value of filter field `{field_name}`: must be `true` or `false`."
                )));
            }
        };
        // !true is the same as false and vice versa
        let value = if exclude { 1 - bit } else { bit };
        conditions.push(FilterCondition::Numeric {
            comparator: NumComparator::Equals,
            value,
        });
    }
    Ok(conditions)
}

fn parse_numeric_conditions(
    field_name: &str,
    field_type: &FieldType,
    raw_value: &str,
) -> Result<Vec<FilterCondition>> {
    let mut conditions = Vec::new();

    for value in split_to_values(raw_value) {
        if let Some((from, to)) = value.split_once("..") {
            let from = parse_numeric_value(field_name, field_type, from.trim())?;
            let to = parse_numeric_value(field_name, field_type, to.trim())?;
            conditions.push(FilterCondition::NumericRange { from, to });
            continue;
        }

        let (comparator, rest) = extract_num_comparator(field_name, &value)?;
        let encoded = parse_numeric_value(field_name, field_type, rest.trim())?;
        conditions.push(FilterCondition::Numeric {
            comparator,
            value: encoded,
        });
    }

    Ok(conditions)
}

/// Extract the leading comparison operator of a numeric filter value.
/// Two-letter operators are checked before their one-letter prefixes.
fn extract_num_comparator<'a>(
    field_name: &str,
    value: &'a str,
) -> Result<(NumComparator, &'a str)> {
    if let Some(rest) = value.strip_prefix("<=") {
        return Ok((NumComparator::LessThanEquals, rest));
    }
    if let Some(rest) = value.strip_prefix(">=") {
        return Ok((NumComparator::GreaterThanEquals, rest));
    }
    if let Some(rest) = value.strip_prefix('<') {
        return Ok((NumComparator::LessThan, rest));
    }
    if let Some(rest) = value.strip_prefix('>') {
        return Ok((NumComparator::GreaterThan, rest));
    }
    if let Some(rest) = value.strip_prefix('=') {
        return Ok((NumComparator::Equals, rest));
    }

    let first = value.chars().next().unwrap_or('\0');
    if first.is_ascii_digit() || first == '-' {
        return Ok((NumComparator::Equals, value));
    }

    Err(QuarryError::bad_request(format!(
        "Error with filter field `{field_name}`: Numerical field has an invalid comparator."
    )))
}

fn parse_numeric_value(field_name: &str, field_type: &FieldType, text: &str) -> Result<i64> {
    if field_type.is_float() {
        let value: f64 = text.parse().map_err(|_| {
            QuarryError::bad_request(format!(
                "Error with filter field `{field_name}`: Not a float."
            ))
        })?;
        return Ok(float_sort_key(value));
    }

    let value: i64 = text.parse().map_err(|_| {
        QuarryError::bad_request(format!(
            "Error with filter field `{field_name}`: Not an integer."
        ))
    })?;

    if field_type.is_int32() && i32::try_from(value).is_err() {
        return Err(QuarryError::bad_request(format!(
            "Error with filter field `{field_name}`: Not an int32."
        )));
    }

    Ok(value)
}

fn parse_geo_condition(field_name: &str, raw_value: &str) -> Result<FilterCondition> {
    let format_err = || {
        QuarryError::bad_request(format!(
            "Value of filter field `{field_name}`: must be in the `(-44.50, 170.29, 0.75 km)` format."
        ))
    };

    let inner = raw_value
        .trim()
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(format_err)?;

    let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(format_err());
    }

    let lat: f64 = parts[0].parse().map_err(|_| format_err())?;
    let lng: f64 = parts[1].parse().map_err(|_| format_err())?;

    let radius_parts: Vec<&str> = parts[2].split_whitespace().collect();
    if radius_parts.len() != 2 {
        return Err(format_err());
    }
    let magnitude: f64 = radius_parts[0].parse().map_err(|_| format_err())?;
    let radius_meters = match radius_parts[1] {
        "km" => magnitude * 1000.0,
        "mi" => magnitude * 1609.344,
        _ => return Err(format_err()),
    };

    let reference = GeoPoint::new(lat, lng).map_err(|_| format_err())?;

    Ok(FilterCondition::Geo {
        reference,
        radius_meters,
    })
}
