//! Document shape definition and validation.
//!
//! Remote documents arrive as untyped JSON. Before a document is allowed
//! anywhere near the local store it is checked against a [`CollectionSchema`],
//! so a schema mismatch on the server side shows up as a skipped document and
//! never as a half-decoded product.

use crate::{error::Result, CollectionName, Error, PRODUCTS};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON shapes a product field may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    /// Any JSON number
    Float,
    Bool,
    /// Milliseconds since the Unix epoch, never negative
    Timestamp,
    Array,
    /// Arbitrary nested JSON
    Json,
}

impl FieldType {
    pub fn name(self) -> &'static str {
        match self {
            FieldType::String => "String",
            FieldType::Int => "Int",
            FieldType::Float => "Float",
            FieldType::Bool => "Bool",
            FieldType::Timestamp => "Timestamp",
            FieldType::Array => "Array",
            FieldType::Json => "Json",
        }
    }

    /// Whether `value` has this shape. `null` is never accepted here.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => false,
            (FieldType::Json, _) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Bool, Value::Bool(_)) => true,
            (FieldType::Array, Value::Array(_)) => true,
            (FieldType::Float, Value::Number(_)) => true,
            (FieldType::Int, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (FieldType::Timestamp, Value::Number(n)) => n.is_u64(),
            _ => false,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Shape reported for a value that failed [`FieldType::accepts`].
fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_u64() => "Int",
        Value::Number(n) if n.is_i64() => "NegativeInt",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// One named field of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Key as it appears in the wire document
    pub name: String,
    pub field_type: FieldType,
    /// Absent and `null` are both treated as missing
    pub required: bool,
}

impl FieldDef {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(name, field_type)
        }
    }

    /// Check this field inside `document`.
    pub fn check(&self, document: &Map<String, Value>) -> Result<()> {
        let value = match document.get(&self.name) {
            Some(Value::Null) | None if self.required => {
                return Err(Error::MissingRequiredField(self.name.clone()))
            }
            Some(Value::Null) | None => return Ok(()),
            Some(value) => value,
        };

        if self.field_type.accepts(value) {
            return Ok(());
        }
        Err(Error::TypeMismatch {
            field: self.name.clone(),
            expected: self.field_type.to_string(),
            got: describe(value).to_string(),
        })
    }
}

/// The known fields of one remote collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    pub name: CollectionName,
    pub fields: Vec<FieldDef>,
}

impl CollectionSchema {
    pub fn new(name: impl Into<CollectionName>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// The product document schema.
    ///
    /// Unlisted fields are allowed and carried through untouched.
    pub fn products() -> Self {
        Self::new(
            PRODUCTS,
            vec![
                FieldDef::required("id", FieldType::String),
                FieldDef::required("name", FieldType::String),
                FieldDef::required("updatedAt", FieldType::Timestamp),
                FieldDef::optional("createdAt", FieldType::Timestamp),
                FieldDef::optional("categoryId", FieldType::String),
                FieldDef::optional("salePrice", FieldType::Float),
                FieldDef::optional("costPrice", FieldType::Float),
                FieldDef::optional("stock", FieldType::Int),
                FieldDef::optional("imageUrl", FieldType::String),
                FieldDef::optional("imagePath", FieldType::String),
                FieldDef::optional("gallery", FieldType::Array),
                FieldDef::optional("variants", FieldType::Array),
                FieldDef::optional("addonGroupIds", FieldType::Array),
            ],
        )
    }

    /// Look up a field definition by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check a wire document against every known field.
    ///
    /// Reports the first offending field in declaration order.
    pub fn validate_payload(&self, payload: &Value) -> Result<()> {
        let Value::Object(document) = payload else {
            return Err(Error::InvalidPayload(format!(
                "{} document must be an object, got {}",
                self.name,
                describe(payload)
            )));
        };
        self.fields.iter().try_for_each(|field| field.check(document))
    }
}
