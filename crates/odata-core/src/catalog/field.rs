//! Field definitions for entities.

use serde::{Deserialize, Serialize};

/// A field definition within an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FieldRepr")]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Computed field definition if this is a derived field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed: Option<ComputedField>,
}

/// Computed field definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComputedField {
    /// Materialized: computed and stored on write, fetched like any column.
    Materialized {
        /// Expression to compute the value.
        expression: String,
    },
    /// Virtual: computed on read, never fetched.
    Virtual {
        /// Expression to compute the value.
        expression: String,
    },
}

/// Schema files may list a field by name only.
#[derive(Deserialize)]
#[serde(untagged)]
enum FieldRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        computed: Option<ComputedField>,
    },
}

impl From<FieldRepr> for FieldDef {
    fn from(repr: FieldRepr) -> Self {
        match repr {
            FieldRepr::Name(name) => FieldDef::new(name),
            FieldRepr::Full { name, computed } => FieldDef { name, computed },
        }
    }
}

impl FieldDef {
    /// Create a new stored field.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            computed: None,
        }
    }

    /// Create a materialized computed field.
    pub fn materialized(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::new(name).with_computed(ComputedField::Materialized {
            expression: expression.into(),
        })
    }

    /// Create a virtual (computed on read) field.
    pub fn computed(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::new(name).with_computed(ComputedField::Virtual {
            expression: expression.into(),
        })
    }

    /// Set the computed definition.
    pub fn with_computed(mut self, computed: ComputedField) -> Self {
        self.computed = Some(computed);
        self
    }

    /// Whether the value must be computed after the fetch.
    pub fn is_virtual(&self) -> bool {
        matches!(self.computed, Some(ComputedField::Virtual { .. }))
    }

    /// Whether the value can be fetched from the data source.
    pub fn is_stored(&self) -> bool {
        !self.is_virtual()
    }

    /// The computing expression, for computed fields.
    pub fn expression(&self) -> Option<&str> {
        match &self.computed {
            Some(ComputedField::Materialized { expression })
            | Some(ComputedField::Virtual { expression }) => Some(expression),
            None => None,
        }
    }
}
