//! Sort clause parsing and resolution.
//!
//! A sort expression is up to three comma-separated clauses of the form
//! `name:ASC|DESC` (order case-insensitive). A geopoint field may carry a
//! reference point: `loc(48.84,2.34):ASC`. The special field `_text_match`
//! names the relevance score.

use crate::error::{QuarryError, Result};
use crate::index::geo::GeoPoint;
use crate::query::split_outside_parens;
use crate::schema::Schema;

/// The field name of the relevance-score pseudo sort field.
pub const TEXT_MATCH_FIELD: &str = "_text_match";

/// Maximum number of sort clauses accepted by a search.
pub const MAX_SORT_CLAUSES: usize = 3;

/// An unresolved sort clause as received on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortClause {
    /// Field name, possibly carrying an embedded geo reference.
    pub name: String,
    /// Requested order, case preserved as received.
    pub order: String,
}

impl SortClause {
    /// Create a clause from its raw parts.
    pub fn new<N: Into<String>, O: Into<String>>(name: N, order: O) -> Self {
        SortClause {
            name: name.into(),
            order: order.into(),
        }
    }
}

/// What a resolved sort clause compares on.
#[derive(Debug, Clone, PartialEq)]
pub enum SortTarget {
    /// A single-valued numeric field's indexed value.
    Field(String),
    /// The text-match relevance score.
    TextMatch,
    /// Squared Euclidean degree distance from a geopoint field to a
    /// reference point.
    GeoDistance { field: String, reference: GeoPoint },
}

/// A validated sort clause.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSort {
    pub target: SortTarget,
    pub descending: bool,
}

/// Parse a wire sort expression (`points:DESC,loc(1.0,2.0):ASC`) into raw
/// clauses. Commas inside geo references do not split.
pub fn parse_sort_expression(expression: &str) -> Result<Vec<SortClause>> {
    let mut clauses = Vec::new();
    for part in split_outside_parens(expression) {
        let (name, order) = part.rsplit_once(':').ok_or_else(|| {
            QuarryError::bad_request("Parameter `sort_by` is malformed.")
        })?;
        clauses.push(SortClause::new(name.trim(), order.trim()));
    }
    Ok(clauses)
}

/// Validate raw clauses against a schema and produce the typed plan.
///
/// An empty clause list falls back to `default_sorting_field:DESC`.
pub fn resolve_sort_clauses(
    clauses: &[SortClause],
    schema: &Schema,
) -> Result<Vec<ResolvedSort>> {
    if clauses.len() > MAX_SORT_CLAUSES {
        return Err(QuarryError::bad_request(
            "Only upto 3 sort_by fields can be specified.",
        ));
    }

    if clauses.is_empty() {
        return Ok(vec![ResolvedSort {
            target: SortTarget::Field(schema.default_sorting_field.clone()),
            descending: true,
        }]);
    }

    clauses.iter().map(|clause| resolve_one(clause, schema)).collect()
}

fn resolve_one(clause: &SortClause, schema: &Schema) -> Result<ResolvedSort> {
    let descending = parse_order(&clause.name, &clause.order)?;

    if clause.name == TEXT_MATCH_FIELD {
        return Ok(ResolvedSort {
            target: SortTarget::TextMatch,
            descending,
        });
    }

    // a geo-sort clause embeds its reference point in the field name
    if let Some(open) = clause.name.find('(') {
        if clause.name.ends_with(')') {
            let field_name = clause.name[..open].trim();
            let field = schema.field(field_name).ok_or_else(|| {
                QuarryError::not_found(format!(
                    "Could not find a field named `{field_name}` in the schema for sorting."
                ))
            })?;

            let format_err = || {
                QuarryError::bad_request(format!(
                    "Geopoint sorting field `{field_name}` must be in the \
                     `field(24.56,10.45):ASC` format."
                ))
            };

            if !field.field_type.is_geopoint() {
                return Err(format_err());
            }

            let inner = &clause.name[open + 1..clause.name.len() - 1];
            let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
            if parts.len() != 2 {
                return Err(format_err());
            }
            let lat: f64 = parts[0].parse().map_err(|_| format_err())?;
            let lng: f64 = parts[1].parse().map_err(|_| format_err())?;
            let reference = GeoPoint::new(lat, lng).map_err(|_| format_err())?;

            return Ok(ResolvedSort {
                target: SortTarget::GeoDistance {
                    field: field_name.to_string(),
                    reference,
                },
                descending,
            });
        }
    }

    let field = schema.field(&clause.name).ok_or_else(|| {
        QuarryError::not_found(format!(
            "Could not find a field named `{}` in the schema for sorting.",
            clause.name
        ))
    })?;

    if !field.field_type.is_single_numeric() {
        return Err(QuarryError::not_found(format!(
            "Could not find a field named `{}` in the schema for sorting.",
            clause.name
        )));
    }

    Ok(ResolvedSort {
        target: SortTarget::Field(clause.name.clone()),
        descending,
    })
}

fn parse_order(name: &str, order: &str) -> Result<bool> {
    match order.to_uppercase().as_str() {
        "ASC" => Ok(false),
        "DESC" => Ok(true),
        _ => Err(QuarryError::bad_request(format!(
            "`{name}`: must be sorted in either ASC or DESC order."
        ))),
    }
}
