//! Category specification schemas.
//!
//! A category's fields arrive either as the legacy keyed mapping
//! (`{"rpm": {"label": "RPM", "type": "number"}}`) or as an ordered list
//! (`[{"key": "rpm", "label": "RPM", "type": "number", "display_order": 0}]`).
//! Both normalise into a list of [`SpecificationField`] sorted by display order.
//! Item values are stored as an open JSON object and resolved against the
//! current field list only when displayed.

mod document;
mod field;
mod values;

use thiserror::Error;

pub use document::{migrate_legacy_text, to_legacy_map, FieldBody, SchemaDocument};
pub use field::{FieldKind, SpecificationField};
pub use values::{
    collect_form_values, display_value, legacy_text, ordered_specifications, parse_values,
    parse_values_str, OrderedSpecification, SpecificationValues, FORM_FIELD_PREFIX,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("schema must be an object keyed by field or a list of fields")]
    UnsupportedShape,

    #[error("not valid JSON: {0}")]
    InvalidJson(String),

    #[error("field key must not be empty")]
    EmptyKey,

    #[error("field at position {0} has no key")]
    MissingKey(usize),

    #[error("duplicate field key '{0}'")]
    DuplicateKey(String),

    #[error("field '{key}' has unknown type '{field_type}'")]
    UnknownType { key: String, field_type: String },

    #[error("field '{0}' has min greater than max")]
    InvalidBounds(String),

    #[error("field '{0}' must have a positive step")]
    InvalidStep(String),

    #[error("field '{key}' is malformed: {reason}")]
    MalformedField { key: String, reason: String },

    #[error("specification values must be a JSON object")]
    InvalidValues,
}
