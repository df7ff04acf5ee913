//! Backend-agnostic, schema-validated record storage.
//!
//! This crate is the core of the recordlayer project and provides:
//!
//! - **Type rules** ([`typerule`]) - The closed set of field types and the checks behind them
//! - **Schemas** ([`schema`]) - Field rules with defaults, required fields and type checks
//! - **Records and filters** ([`record`]) - Dynamic records and equality filters
//! - **Driver abstraction** ([`driver`]) - Traits every storage backend implements
//! - **Driver configuration** ([`config`]) - Collection naming and connection options
//! - **Record layer** ([`layer`]) - Validating facade over a single driver
//! - **Instance pool** ([`pool`]) - Deduplicated record layers keyed by identity
//! - **Error handling** ([`error`]) - Validation and storage error types
//!
//! # Example
//!
//! ```ignore
//! use recordlayer_core::schema::Schema;
//! use bson::doc;
//! use serde_json::json;
//!
//! let schema = Schema::from_json(json!({
//!     "name": { "type": "string", "required": true },
//!     "age": { "type": "number", "default": 0 },
//! }))?;
//!
//! let record = schema.validate(&doc! { "name": "Alice" }, false)?;
//! assert_eq!(record, doc! { "name": "Alice", "age": 0 });
//! ```

#[allow(unused_extern_crates)]
extern crate self as recordlayer_core;

pub mod config;
pub mod driver;
pub mod error;
pub mod layer;
pub mod pool;
pub mod record;
pub mod schema;
pub mod typerule;
