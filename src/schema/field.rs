use serde::ser::{Serialize, SerializeMap, Serializer};

/// Type-specific part of a field definition.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Text,
    Number {
        min: Option<f64>,
        max: Option<f64>,
        step: f64,
    },
    Select {
        options: Vec<String>,
    },
}

impl FieldKind {
    pub const TEXT: &'static str = "text";
    pub const NUMBER: &'static str = "number";
    pub const SELECT: &'static str = "select";

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Text => Self::TEXT,
            FieldKind::Number { .. } => Self::NUMBER,
            FieldKind::Select { .. } => Self::SELECT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpecificationField {
    /// Row id once persisted.
    pub id: Option<i64>,
    pub key: String,
    pub label: String,
    pub placeholder: String,
    pub display_order: i32,
    pub kind: FieldKind,
}

impl SpecificationField {
    pub fn text(key: &str, label: &str, display_order: i32) -> Self {
        Self {
            id: None,
            key: key.to_string(),
            label: label.to_string(),
            placeholder: String::new(),
            display_order,
            kind: FieldKind::Text,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

/// Serialises to the API shape: common members, then `min`/`max`/`step` for
/// number fields and `options` for select fields.
impl Serialize for SpecificationField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("key", &self.key)?;
        map.serialize_entry("label", &self.label)?;
        map.serialize_entry("type", self.type_name())?;
        map.serialize_entry("placeholder", &self.placeholder)?;
        map.serialize_entry("display_order", &self.display_order)?;
        match &self.kind {
            FieldKind::Text => {}
            FieldKind::Number { min, max, step } => {
                map.serialize_entry("min", min)?;
                map.serialize_entry("max", max)?;
                map.serialize_entry("step", step)?;
            }
            FieldKind::Select { options } => {
                map.serialize_entry("options", options)?;
            }
        }
        map.end()
    }
}
