//! Model descriptors supplied at registration and the metadata cached from them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::Value;

/// Attribute definition as found in a model's `definition`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDefinition {
    /// Name the value is read from in raw input records
    #[serde(default)]
    pub column_name: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub defaults_to: Option<Value>,
    #[serde(default, rename = "type")]
    pub attribute_type: Option<String>,
}

impl AttributeDefinition {
    /// Column name, falling back to the attribute name
    #[must_use]
    pub fn column<'a>(&'a self, attribute: &'a str) -> &'a str {
        self.column_name.as_deref().unwrap_or(attribute)
    }

    /// Whether a value must be present after default substitution
    #[must_use]
    pub fn is_mandatory(&self) -> bool {
        self.required || self.unique
    }
}

/// Model as handed over by the ORM in `registerDatastore`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub identity: String,
    pub primary_key: String,
    pub definition: BTreeMap<String, AttributeDefinition>,
    pub table_name: String,
}

/// Cached per-model metadata, read-only after registration.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMetadata {
    pub identity: String,
    pub primary_key: String,
    pub attributes: BTreeMap<String, AttributeDefinition>,
    pub collection: String,
}

impl ModelMetadata {
    /// Whether `attribute` is part of the model definition
    #[must_use]
    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.attributes.contains_key(attribute)
    }
}

impl From<ModelDescriptor> for ModelMetadata {
    fn from(model: ModelDescriptor) -> Self {
        Self {
            identity: model.identity,
            primary_key: model.primary_key,
            attributes: model.definition,
            collection: model.table_name,
        }
    }
}
