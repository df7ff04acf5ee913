//! In-memory storage driver for recordlayer.
//!
//! This crate provides a thread-safe, in-memory implementation of the `Driver`
//! trait. It uses async-aware read-write locks for concurrent access and is
//! meant for development, testing and small deployments.
//!
//! # Features
//!
//! - **Shared storage** - Drivers opened with `table()` share records and the id sequence
//! - **Nested filters** - Filters match nested documents recursively
//! - **Id strategies** - Sequential integers or random UUIDs
//! - **Schema enforcement** - Optionally validates writes with a schema pushed by the record layer
//!
//! # Quick Start
//!
//! ```ignore
//! use recordlayer::{prelude::*, memory::MemoryDriver};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let users = RecordLayer::new(MemoryDriver::builder().collection("users").build().await?);
//!     users.connect().await?;
//!
//!     users.set(doc! { "name": "Alice", "address": { "city": "Oslo" } }).await?;
//!
//!     let found = users.get(doc! { "address": { "city": "Oslo" } }).await?;
//!     assert_eq!(found.len(), 1);
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as recordlayer_memory;

pub mod driver;
pub mod evaluator;

pub use driver::{IdStrategy, MemoryDriver, MemoryDriverBuilder};
