//! Error types and result types for record layer operations.
//!
//! Validation failures are reported as [`ValidationError`] and carried by
//! [`RecordStoreError::Validation`] once they reach a facade or driver call.
//! Everything else a driver can fail with lives in [`RecordStoreError`] and is
//! propagated to the caller unchanged.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

use crate::typerule::TypeTag;

/// The rule a record violated during schema validation.
///
/// Validation stops at the first violation, so a single error always names
/// exactly one field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field was absent or null after defaults were applied.
    #[error("Validation Error: Field \"{field}\" is required.")]
    Required { field: String },
    /// A present, non-null field did not conform to its declared type.
    #[error("Validation Error: Field \"{field}\" expected type {expected}.")]
    TypeMismatch { field: String, expected: TypeTag },
}

/// The kind of rule that failed, without the field it failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolatedRule {
    Required,
    Type(TypeTag),
}

impl ValidationError {
    /// Returns the name of the offending field.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::Required { field } => field,
            ValidationError::TypeMismatch { field, .. } => field,
        }
    }

    /// Returns the rule that was violated.
    pub fn rule(&self) -> ViolatedRule {
        match self {
            ValidationError::Required { .. } => ViolatedRule::Required,
            ValidationError::TypeMismatch { expected, .. } => ViolatedRule::Type(*expected),
        }
    }
}

/// Represents all possible errors that can occur when interacting with a record store.
#[derive(Error, Debug)]
pub enum RecordStoreError {
    /// The record did not satisfy the active schema.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Serialization/deserialization error when converting between record formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The driver could not establish or use its connection.
    #[error("Connection error: {0}")]
    Connection(String),
    /// Invalid driver or schema configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The driver does not implement an optional capability.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
    /// An unknown error occurred.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// A specialized `Result` type for record store operations.
pub type RecordStoreResult<T> = Result<T, RecordStoreError>;

impl From<BsonError> for RecordStoreError {
    fn from(err: BsonError) -> Self {
        RecordStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for RecordStoreError {
    fn from(err: SerdeJsonError) -> Self {
        RecordStoreError::Serialization(err.to_string())
    }
}
