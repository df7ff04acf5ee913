//! Main recordlayer crate providing schema-validated access to record storage.
//!
//! This crate is the primary entry point for users of recordlayer. It
//! re-exports the core types from the sub-crates and gives access to the
//! bundled storage drivers.
//!
//! # Features
//!
//! - **Interchangeable drivers** - Application code talks to a [`layer::RecordLayer`], not to a backend
//! - **Schema validation** - Defaults, required fields and type checks before every write
//! - **Instance pooling** - Equivalent configurations share one record layer and one connection
//!
//! # Quick Start
//!
//! ```ignore
//! use recordlayer::{prelude::*, memory::MemoryDriver};
//! use bson::doc;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> RecordStoreResult<()> {
//!     let schema = Schema::from_json(json!({
//!         "name": { "type": "string", "required": true },
//!         "age": { "type": "integer", "default": 0 },
//!     }))?;
//!
//!     let users = RecordLayer::with_schema(
//!         MemoryDriver::builder().collection("users").build().await?,
//!         schema,
//!     )
//!     .await?;
//!     users.connect().await?;
//!
//!     // Defaults are filled in before the driver sees the record
//!     let alice = users.set(doc! { "name": "Alice" }).await?;
//!     assert_eq!(alice.get_i64("age")?, 0);
//!
//!     // Required fields are enforced
//!     assert!(users.set(doc! { "age": 5 }).await.is_err());
//!
//!     // Updates are validated partially
//!     users.update(doc! { "name": "Alice" }, doc! { "age": 31 }).await?;
//!
//!     users.disconnect().await
//! }
//! ```
//!
//! # Pooling
//!
//! An [`pool::InstancePool`] hands out one shared record layer per driver kind,
//! collection and connection settings. A schema supplied with a later request
//! replaces the pooled layer's schema without reconnecting.
//!
//! ```ignore
//! use recordlayer::{prelude::*, memory::MemoryDriver};
//!
//! let pool = InstancePool::new();
//!
//! let users = pool.acquire(MemoryDriver::builder().collection("users"), None).await?;
//! users.connect().await?;
//!
//! // Same connection settings, other collection: shares the users storage
//! let posts = pool.acquire(MemoryDriver::builder().collection("posts"), None).await?;
//! assert_eq!(posts.is_connected(), Some(true));
//!
//! pool.dispose().await?;
//! ```
//!
//! # Drivers
//!
//! - [`memory`] - In-memory storage for development and testing

pub mod prelude;

pub use recordlayer_core::{config, driver, error, layer, pool, record, schema, typerule};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage driver.
pub mod memory {
    pub use recordlayer_memory::{IdStrategy, MemoryDriver, MemoryDriverBuilder};
}
