//! Records, filters and conversions between records and typed values.
//!
//! A [`Record`] is an open BSON document with no fixed shape. A [`Filter`]
//! is a document of field/value pairs a stored record must match; nested
//! documents in a filter match nested documents in the record.

use bson::{Bson, Document, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{RecordStoreError, RecordStoreResult};

/// A dynamically shaped record.
pub type Record = Document;

/// Field set by drivers to the generated record identity.
pub const ID_FIELD: &str = "_id";
/// Field set by drivers to the insertion time.
pub const CREATED_AT_FIELD: &str = "_createdAt";
/// Field set by drivers to the time of the last update.
pub const UPDATED_AT_FIELD: &str = "_updatedAt";

/// Equality filter over record fields.
///
/// Every entry must match for a record to be selected. An empty filter
/// selects every record in the collection.
///
/// # Example
///
/// ```ignore
/// use recordlayer::record::Filter;
/// use bson::doc;
///
/// let filter = Filter::new()
///     .eq("status", "active")
///     .eq("address", doc! { "city": "Oslo" });
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter(Document);

impl Filter {
    /// Creates an empty filter that matches every record.
    pub fn new() -> Self {
        Filter(Document::new())
    }

    /// Adds an equality constraint on `field`.
    ///
    /// Passing a document as `value` matches it against the record's nested
    /// document instead of comparing the two wholesale.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_document(&self) -> &Document {
        &self.0
    }

    pub fn into_document(self) -> Document {
        self.0
    }
}

impl From<Document> for Filter {
    fn from(document: Document) -> Self {
        Filter(document)
    }
}

impl From<Filter> for Document {
    fn from(filter: Filter) -> Self {
        filter.0
    }
}

/// Serializes a value into a [`Record`].
///
/// # Errors
///
/// Returns [`RecordStoreError::Serialization`] if the value does not serialize
/// to a document (for example a bare number or a sequence).
pub fn to_record<T: Serialize>(value: &T) -> RecordStoreResult<Record> {
    match serialize_to_bson(value)? {
        Bson::Document(record) => Ok(record),
        other => Err(RecordStoreError::Serialization(format!(
            "expected a document, found {:?}",
            other.element_type()
        ))),
    }
}

/// Deserializes a [`Record`] into a typed value.
pub fn from_record<T: DeserializeOwned>(record: Record) -> RecordStoreResult<T> {
    Ok(deserialize_from_bson(Bson::Document(record))?)
}
