//! Field types for schema definition.

use serde::{Deserialize, Serialize};

/// Default cell resolution for geopoint fields.
pub const DEFAULT_GEO_RESOLUTION: u8 = 7;

/// Finest supported cell resolution for geopoint fields.
pub const FINEST_GEO_RESOLUTION: u8 = 15;

/// The closed set of indexable field types.
///
/// Serialized to the wire strings used in collection meta records
/// (`"string"`, `"int32[]"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "string")]
    String,
    #[serde(rename = "int32")]
    Int32,
    #[serde(rename = "int64")]
    Int64,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "geopoint")]
    Geopoint,
    #[serde(rename = "string[]")]
    StringArray,
    #[serde(rename = "int32[]")]
    Int32Array,
    #[serde(rename = "int64[]")]
    Int64Array,
    #[serde(rename = "float[]")]
    FloatArray,
    #[serde(rename = "bool[]")]
    BoolArray,
}

impl FieldType {
    /// The wire string for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int32 => "int32",
            FieldType::Int64 => "int64",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::Geopoint => "geopoint",
            FieldType::StringArray => "string[]",
            FieldType::Int32Array => "int32[]",
            FieldType::Int64Array => "int64[]",
            FieldType::FloatArray => "float[]",
            FieldType::BoolArray => "bool[]",
        }
    }

    /// Whether this is `string` or `string[]`.
    pub fn is_string(&self) -> bool {
        matches!(self, FieldType::String | FieldType::StringArray)
    }

    /// Whether this is an integer type, scalar or array.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            FieldType::Int32 | FieldType::Int64 | FieldType::Int32Array | FieldType::Int64Array
        )
    }

    /// Whether this is `int32` or `int32[]`.
    pub fn is_int32(&self) -> bool {
        matches!(self, FieldType::Int32 | FieldType::Int32Array)
    }

    /// Whether this is `int64` or `int64[]`.
    pub fn is_int64(&self) -> bool {
        matches!(self, FieldType::Int64 | FieldType::Int64Array)
    }

    /// Whether this is `float` or `float[]`.
    pub fn is_float(&self) -> bool {
        matches!(self, FieldType::Float | FieldType::FloatArray)
    }

    /// Whether this is `bool` or `bool[]`.
    pub fn is_bool(&self) -> bool {
        matches!(self, FieldType::Bool | FieldType::BoolArray)
    }

    /// Whether this is `geopoint`.
    pub fn is_geopoint(&self) -> bool {
        matches!(self, FieldType::Geopoint)
    }

    /// Whether this is any array type.
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            FieldType::StringArray
                | FieldType::Int32Array
                | FieldType::Int64Array
                | FieldType::FloatArray
                | FieldType::BoolArray
        )
    }

    /// Whether this is a scalar numeric type (`int32`, `int64`, `float`),
    /// the only types eligible as a default sorting field.
    pub fn is_single_numeric(&self) -> bool {
        matches!(self, FieldType::Int32 | FieldType::Int64 | FieldType::Float)
    }

    /// Whether values of this type feed the numeric range index.
    pub fn is_numeric_indexed(&self) -> bool {
        self.is_integer() || self.is_float() || self.is_bool()
    }
}

fn default_geo_resolution() -> u8 {
    DEFAULT_GEO_RESOLUTION
}

fn is_default_geo_resolution(res: &u8) -> bool {
    *res == DEFAULT_GEO_RESOLUTION
}

/// A declared field of a collection schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// The field name as it appears in documents.
    pub name: String,
    /// The declared type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether facet counts are maintained for this field.
    #[serde(default)]
    pub facet: bool,
    /// Whether documents may omit this field.
    #[serde(default)]
    pub optional: bool,
    /// Cell resolution for geopoint fields.
    #[serde(
        default = "default_geo_resolution",
        skip_serializing_if = "is_default_geo_resolution"
    )]
    pub geo_resolution: u8,
}

impl Field {
    /// Create a non-facet, required field.
    pub fn new<S: Into<String>>(name: S, field_type: FieldType) -> Self {
        Field {
            name: name.into(),
            field_type,
            facet: false,
            optional: false,
            geo_resolution: DEFAULT_GEO_RESOLUTION,
        }
    }

    /// Set whether this field is faceted.
    pub fn facet(mut self, facet: bool) -> Self {
        self.facet = facet;
        self
    }

    /// Set whether this field is optional.
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// Set the geo cell resolution.
    pub fn geo_resolution(mut self, resolution: u8) -> Self {
        self.geo_resolution = resolution.min(FINEST_GEO_RESOLUTION);
        self
    }

    /// The name under which facet values of this field are indexed.
    ///
    /// Faceted non-string fields maintain a parallel stringified index
    /// under a synthetic `_fstr_` name.
    pub fn faceted_name(&self) -> String {
        if self.facet && !self.field_type.is_string() {
            format!("_fstr_{}", self.name)
        } else {
            self.name.clone()
        }
    }
}
