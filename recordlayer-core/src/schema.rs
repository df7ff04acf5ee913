//! Schema definitions and the validator applied on every write path.
//!
//! A [`SchemaDefinition`] is an ordered list of field rules. Wrapping it in a
//! [`Schema`] builds the one [`SchemaValidator`] used for the schema's whole
//! lifetime. Fields are checked in declaration order and validation stops at
//! the first violation.
//!
//! # Example
//!
//! ```ignore
//! use recordlayer::prelude::*;
//! use bson::doc;
//!
//! let schema = Schema::new(
//!     SchemaDefinition::builder()
//!         .field("name", FieldRule::new(TypeTag::String).required())
//!         .field("age", FieldRule::new(TypeTag::Integer).with_default(0))
//!         .build(),
//! );
//!
//! let record = schema.validate(&doc! { "name": "Alice" }, false)?;
//! assert_eq!(record, doc! { "name": "Alice", "age": 0 });
//! ```
//!
//! Definitions can also be read from JSON, where a bare type name is shorthand
//! for a rule with only a type:
//!
//! ```ignore
//! let definition = SchemaDefinition::from_json(serde_json::json!({
//!     "name": { "type": "string", "required": true },
//!     "age": "integer",
//! }))?;
//! ```

use std::{fmt, sync::Arc};

use bson::Bson;
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{MapAccess, Visitor},
    ser::SerializeMap,
};
use serde_json::Value;

use crate::{
    error::{RecordStoreError, RecordStoreResult, ValidationError},
    record::Record,
    typerule::{TypeTag, conforms},
};

/// Validation rule for a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    /// The type a present, non-null value must conform to.
    #[serde(rename = "type")]
    pub field_type: TypeTag,
    /// Whether the field must be present and non-null on full validation.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    /// Value inserted when the field is absent on full validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Bson>,
}

impl FieldRule {
    /// Creates an optional rule without a default.
    pub fn new(field_type: TypeTag) -> Self {
        Self { field_type, required: false, default: None }
    }

    /// Marks the field as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Sets the value used when the field is missing.
    pub fn with_default(mut self, default: impl Into<Bson>) -> Self {
        self.default = Some(default.into());
        self
    }
}

impl From<TypeTag> for FieldRule {
    fn from(field_type: TypeTag) -> Self {
        FieldRule::new(field_type)
    }
}

/// Either a bare type name or a full rule, as written in configuration.
#[derive(Deserialize)]
#[serde(untagged)]
enum FieldSpec {
    Shorthand(TypeTag),
    Rule(FieldRule),
}

impl From<FieldSpec> for FieldRule {
    fn from(spec: FieldSpec) -> Self {
        match spec {
            FieldSpec::Shorthand(field_type) => FieldRule::new(field_type),
            FieldSpec::Rule(rule) => rule,
        }
    }
}

/// Ordered mapping from field name to [`FieldRule`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDefinition {
    fields: Vec<(String, FieldRule)>,
}

impl SchemaDefinition {
    /// Creates an empty definition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for fluent construction.
    pub fn builder() -> SchemaDefinitionBuilder {
        SchemaDefinitionBuilder::new()
    }

    /// Reads a definition from a JSON object, keeping the object's key order.
    pub fn from_json(value: Value) -> RecordStoreResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| RecordStoreError::Configuration(format!("invalid schema definition: {e}")))
    }

    /// Adds a rule, replacing any earlier rule for the same field in place.
    pub fn insert(&mut self, name: impl Into<String>, rule: impl Into<FieldRule>) {
        let name = name.into();
        let rule = rule.into();

        match self.fields.iter_mut().find(|(field, _)| *field == name) {
            Some((_, existing)) => *existing = rule,
            None => self.fields.push((name, rule)),
        }
    }

    /// Returns the rule declared for `name`.
    pub fn get(&self, name: &str) -> Option<&FieldRule> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, rule)| rule)
    }

    /// Iterates over the rules in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldRule)> {
        self.fields
            .iter()
            .map(|(field, rule)| (field.as_str(), rule))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for SchemaDefinition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (field, rule) in &self.fields {
            map.serialize_entry(field, rule)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SchemaDefinition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DefinitionVisitor;

        impl<'de> Visitor<'de> for DefinitionVisitor {
            type Value = SchemaDefinition;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field names to type names or field rules")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut definition = SchemaDefinition::new();
                while let Some((field, spec)) = access.next_entry::<String, FieldSpec>()? {
                    definition.insert(field, FieldRule::from(spec));
                }
                Ok(definition)
            }
        }

        deserializer.deserialize_map(DefinitionVisitor)
    }
}

/// Fluent builder for [`SchemaDefinition`].
#[derive(Debug, Clone, Default)]
pub struct SchemaDefinitionBuilder {
    definition: SchemaDefinition,
}

impl SchemaDefinitionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a field. Accepts a [`FieldRule`] or a bare [`TypeTag`].
    pub fn field(mut self, name: impl Into<String>, rule: impl Into<FieldRule>) -> Self {
        self.definition.insert(name, rule);
        self
    }

    pub fn build(self) -> SchemaDefinition {
        self.definition
    }
}

/// Applies a [`SchemaDefinition`] to records.
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    definition: SchemaDefinition,
}

impl SchemaValidator {
    pub fn new(definition: SchemaDefinition) -> Self {
        Self { definition }
    }

    pub fn definition(&self) -> &SchemaDefinition {
        &self.definition
    }

    /// Validates `record` and returns a copy with defaults applied.
    ///
    /// For every declared field, in order:
    ///
    /// 1. if the field is absent and a default exists, the default is inserted;
    /// 2. if the field is required and still absent or null, validation fails;
    /// 3. if the value is present and non-null, it must conform to the declared type.
    ///
    /// With `is_partial` set, steps 1 and 2 are skipped. This is the mode used for
    /// update patches. Fields the schema does not mention pass through unchanged.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] encountered.
    pub fn validate(&self, record: &Record, is_partial: bool) -> Result<Record, ValidationError> {
        let mut validated = record.clone();

        for (field, rule) in self.definition.iter() {
            if !is_partial && is_absent(validated.get(field)) {
                if let Some(default) = &rule.default {
                    validated.insert(field, default.clone());
                }
            }

            let value = validated.get(field);

            if !is_partial && rule.required && is_missing(value) {
                return Err(ValidationError::Required { field: field.to_string() });
            }

            if let Some(value) = value.filter(|value| !is_missing(Some(*value))) {
                if rule.field_type != TypeTag::Any && !conforms(value, rule.field_type) {
                    return Err(ValidationError::TypeMismatch {
                        field: field.to_string(),
                        expected: rule.field_type,
                    });
                }
            }
        }

        Ok(validated)
    }
}

fn is_absent(value: Option<&Bson>) -> bool {
    matches!(value, None | Some(Bson::Undefined))
}

fn is_missing(value: Option<&Bson>) -> bool {
    matches!(value, None | Some(Bson::Undefined) | Some(Bson::Null))
}

/// An immutable schema: a definition plus the validator built from it.
///
/// Schemas are shared as `Arc<Schema>` between a record layer and, for
/// schema-aware drivers, the driver itself.
#[derive(Debug, Clone)]
pub struct Schema {
    validator: SchemaValidator,
}

impl Schema {
    pub fn new(definition: SchemaDefinition) -> Self {
        Self { validator: SchemaValidator::new(definition) }
    }

    /// Reads a schema from a JSON object. See [`SchemaDefinition::from_json`].
    pub fn from_json(value: Value) -> RecordStoreResult<Self> {
        Ok(Self::new(SchemaDefinition::from_json(value)?))
    }

    pub fn definition(&self) -> &SchemaDefinition {
        self.validator.definition()
    }

    pub fn validator(&self) -> &SchemaValidator {
        &self.validator
    }

    /// Shorthand for [`SchemaValidator::validate`].
    pub fn validate(&self, record: &Record, is_partial: bool) -> Result<Record, ValidationError> {
        self.validator.validate(record, is_partial)
    }
}

impl From<SchemaDefinition> for Schema {
    fn from(definition: SchemaDefinition) -> Self {
        Schema::new(definition)
    }
}

impl From<SchemaDefinition> for Arc<Schema> {
    fn from(definition: SchemaDefinition) -> Self {
        Arc::new(Schema::new(definition))
    }
}
