//! Schema definition: field types, fields, and collection schemas.

pub mod field;
pub mod validate;

pub use field::{Field, FieldType, DEFAULT_GEO_RESOLUTION, FINEST_GEO_RESOLUTION};
pub use validate::{infer_field_type, validate_document};

use serde::{Deserialize, Serialize};

use crate::error::{QuarryError, Result};

/// An ordered set of fields plus the collection-level indexing options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    /// Declared fields, in declaration order.
    pub fields: Vec<Field>,
    /// The single-valued numeric field used as the implicit sort.
    pub default_sorting_field: String,
    /// When true, unknown scalar JSON fields are auto-registered as optional.
    #[serde(default)]
    pub index_all_fields: bool,
}

impl Schema {
    /// Create a schema after validating the default sorting field.
    pub fn new(
        fields: Vec<Field>,
        default_sorting_field: &str,
        index_all_fields: bool,
    ) -> Result<Self> {
        let schema = Schema {
            fields,
            default_sorting_field: default_sorting_field.to_string(),
            index_all_fields,
        };
        schema.validate_default_sorting_field()?;
        Ok(schema)
    }

    /// Look up a declared field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether a field with this name is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Register an additional field (used by `index_all_fields` auto-discovery).
    pub fn add_field(&mut self, field: Field) {
        if !self.contains(&field.name) {
            self.fields.push(field);
        }
    }

    /// All fields eligible for sorting: single-valued numeric fields.
    pub fn sortable_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.field_type.is_single_numeric())
    }

    fn validate_default_sorting_field(&self) -> Result<()> {
        let name = &self.default_sorting_field;
        let field = self.field(name).ok_or_else(|| {
            QuarryError::bad_request(format!(
                "Default sorting field is defined as `{name}` but is not found in the schema."
            ))
        })?;

        if !field.field_type.is_single_numeric() {
            return Err(QuarryError::bad_request(format!(
                "Default sorting field `{name}` must be a single valued numerical field."
            )));
        }

        if field.optional {
            return Err(QuarryError::bad_request(format!(
                "Default sorting field `{name}` cannot be an optional field."
            )));
        }

        Ok(())
    }
}
