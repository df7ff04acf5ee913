//! Storage driver abstraction for the record layer.
//!
//! This module defines the contract every storage backend implements. A driver
//! is bound to one collection (or table) and performs CRUD operations on it.
//! Optional abilities are declared up front through [`DriverCapabilities`]
//! rather than discovered by probing, so callers can ask a driver whether it
//! supports sibling tables or schema propagation before trying.
//!
//! # Traits
//!
//! - [`Driver`]: the operations a backend performs on its bound collection
//! - [`DriverBuilder`]: factory that describes and creates a driver
//!
//! # Examples
//!
//! ```ignore
//! use recordlayer::driver::{Driver, DriverBuilder};
//! use recordlayer::memory::MemoryDriver;
//! use bson::doc;
//!
//! let driver = MemoryDriver::builder().collection("users").build().await?;
//! driver.connect().await?;
//!
//! let stored = driver.set(doc! { "name": "Alice" }).await?;
//! assert!(stored.contains_key("_id"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    config::DriverConfig,
    error::{RecordStoreError, RecordStoreResult},
    record::{Filter, Record},
    schema::Schema,
};

/// Broad family of the storage behind a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sql,
    #[default]
    NoSql,
}

/// Optional abilities a driver supports beyond the required CRUD operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriverCapabilities {
    /// [`Driver::table`] returns a sibling driver on the same storage.
    pub tables: bool,
    /// [`Driver::set_schema`] accepts a schema and enforces it.
    pub schema: bool,
    /// [`Driver::clear`] empties the bound collection.
    pub clear: bool,
}

impl DriverCapabilities {
    /// A driver that only implements the required operations.
    pub const NONE: DriverCapabilities = DriverCapabilities {
        tables: false,
        schema: false,
        clear: false,
    };

    pub const fn with_tables(mut self) -> Self {
        self.tables = true;
        self
    }

    pub const fn with_schema(mut self) -> Self {
        self.schema = true;
        self
    }

    pub const fn with_clear(mut self) -> Self {
        self.clear = true;
        self
    }
}

/// Abstract interface for storage drivers.
///
/// A driver is bound to a single collection and is shared behind an `Arc`
/// between record layers, so every method takes `&self` and implementations
/// must be thread-safe.
///
/// # Error Handling
///
/// Drivers define their own failures using the [`RecordStoreError`] variants
/// that fit (`Connection`, `Backend`, ...). Record layers and the instance
/// pool pass these errors through unchanged.
#[async_trait]
pub trait Driver: Send + Sync + Debug {
    /// Stable name of the driver implementation, used in pool identity keys.
    fn kind(&self) -> &'static str;

    /// Name of the collection this driver is bound to.
    fn collection(&self) -> &str;

    fn dialect(&self) -> Dialect {
        Dialect::NoSql
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities::NONE
    }

    /// Opens the connection. Calling it on a connected driver is a no-op.
    async fn connect(&self) -> RecordStoreResult<()>;

    /// Closes the connection. Calling it on a disconnected driver is a no-op.
    async fn disconnect(&self) -> RecordStoreResult<()>;

    /// Current connection state, or `None` if the driver does not track it.
    fn is_connected(&self) -> Option<bool> {
        None
    }

    /// Inserts a record.
    ///
    /// The driver assigns the record's identity and creation time and returns
    /// the record as stored.
    async fn set(&self, record: Record) -> RecordStoreResult<Record>;

    /// Returns every record matching `filter`.
    async fn get(&self, filter: &Filter) -> RecordStoreResult<Vec<Record>>;

    /// Returns the first record matching `filter`.
    async fn get_one(&self, filter: &Filter) -> RecordStoreResult<Option<Record>> {
        Ok(self
            .get(filter)
            .await?
            .into_iter()
            .next())
    }

    /// Merges `patch` into every record matching `filter` and stamps the update
    /// time. Returns the number of records touched.
    async fn update(&self, filter: &Filter, patch: Record) -> RecordStoreResult<u64>;

    /// Removes every record matching `filter`. Returns the number removed.
    async fn delete(&self, filter: &Filter) -> RecordStoreResult<u64>;

    async fn exists(&self, filter: &Filter) -> RecordStoreResult<bool> {
        Ok(self.get_one(filter).await?.is_some())
    }

    async fn count(&self, filter: &Filter) -> RecordStoreResult<u64> {
        Ok(self.get(filter).await?.len() as u64)
    }

    /// Returns a driver bound to collection `name` that shares this driver's
    /// connection and storage.
    ///
    /// Only available when [`DriverCapabilities::tables`] is set.
    fn table(&self, name: &str) -> RecordStoreResult<Arc<dyn Driver>> {
        Err(RecordStoreError::Unsupported(format!(
            "{} cannot open table {name}",
            self.kind()
        )))
    }

    /// Hands the active schema to the driver, or removes it with `None`.
    ///
    /// Only available when [`DriverCapabilities::schema`] is set.
    async fn set_schema(&self, _schema: Option<Arc<Schema>>) -> RecordStoreResult<()> {
        Err(RecordStoreError::Unsupported(format!(
            "{} does not accept schemas",
            self.kind()
        )))
    }

    /// Removes every record in the bound collection.
    ///
    /// Only available when [`DriverCapabilities::clear`] is set.
    async fn clear(&self) -> RecordStoreResult<()> {
        Err(RecordStoreError::Unsupported(format!(
            "{} cannot clear collections",
            self.kind()
        )))
    }
}

/// Factory for a [`Driver`].
///
/// Besides building the driver, a builder describes it: its kind, its
/// configuration and the pool key under which equivalent configurations
/// share a connection. The instance pool uses this description to decide
/// whether a driver needs to be built at all.
#[async_trait]
pub trait DriverBuilder: Send {
    type Driver: Driver + 'static;

    /// Same value as [`Driver::kind`] on the built driver.
    fn kind(&self) -> &'static str;

    fn config(&self) -> &DriverConfig;

    /// Key under which drivers with equivalent connection settings are pooled.
    fn pool_key(&self) -> String {
        self.config().connection_signature()
    }

    async fn build(self) -> RecordStoreResult<Self::Driver>;
}
