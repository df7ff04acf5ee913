//! Convenient re-exports of commonly used types from recordlayer.
//!
//! ```ignore
//! use recordlayer::prelude::*;
//! ```

pub use recordlayer_core::{
    config::DriverConfig,
    driver::{Dialect, Driver, DriverBuilder, DriverCapabilities},
    error::{RecordStoreError, RecordStoreResult, ValidationError, ViolatedRule},
    layer::RecordLayer,
    pool::{IdentityKey, InstancePool},
    record::{Filter, Record, from_record, to_record},
    schema::{FieldRule, Schema, SchemaDefinition, SchemaValidator},
    typerule::{TypeTag, conforms},
};
