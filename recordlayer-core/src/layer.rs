//! The caller-facing record layer.
//!
//! A [`RecordLayer`] combines a driver with an optional active schema. Writes
//! are validated against the schema before they reach the driver: inserts
//! with full validation, update patches with partial validation. Everything
//! else is passed straight through.
//!
//! # Example
//!
//! ```ignore
//! use recordlayer::{prelude::*, memory::MemoryDriver};
//! use bson::doc;
//!
//! let users = RecordLayer::with_schema(
//!     MemoryDriver::builder().collection("users").build().await?,
//!     SchemaDefinition::builder()
//!         .field("name", FieldRule::new(TypeTag::String).required())
//!         .build(),
//! )
//! .await?;
//!
//! users.connect().await?;
//! users.set(doc! { "name": "Alice" }).await?;
//! assert_eq!(users.count(doc! {}).await?, 1);
//! ```

use std::sync::Arc;

use mea::rwlock::RwLock;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    driver::Driver,
    error::RecordStoreResult,
    record::{Filter, Record, from_record, to_record},
    schema::Schema,
};

#[derive(Debug)]
pub struct RecordLayer {
    driver: Arc<dyn Driver>,
    schema: RwLock<Option<Arc<Schema>>>,
}

impl RecordLayer {
    /// Creates a record layer without a schema.
    pub fn new(driver: impl Driver + 'static) -> Self {
        Self::from_shared(Arc::new(driver))
    }

    /// Creates a record layer over a driver that may be shared with others.
    pub fn from_shared(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            schema: RwLock::new(None),
        }
    }

    /// Creates a record layer and installs `schema` as its active schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver is schema-aware and rejects the schema.
    pub async fn with_schema(
        driver: impl Driver + 'static,
        schema: impl Into<Arc<Schema>>,
    ) -> RecordStoreResult<Self> {
        let layer = Self::new(driver);
        layer.set_schema(schema).await?;

        Ok(layer)
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn collection(&self) -> &str {
        self.driver.collection()
    }

    /// Returns the active schema.
    pub async fn schema(&self) -> Option<Arc<Schema>> {
        self.schema.read().await.clone()
    }

    /// Replaces the active schema.
    ///
    /// Schema-aware drivers receive the new schema as well. Records already
    /// stored are not revalidated.
    ///
    /// If the driver rejects the schema, the active schema is left unchanged.
    pub async fn set_schema(&self, schema: impl Into<Arc<Schema>>) -> RecordStoreResult<()> {
        self.install_schema(Some(schema.into())).await
    }

    /// Removes the active schema, turning validation off.
    pub async fn clear_schema(&self) -> RecordStoreResult<()> {
        self.install_schema(None).await
    }

    async fn install_schema(&self, schema: Option<Arc<Schema>>) -> RecordStoreResult<()> {
        let mut active = self.schema.write().await;

        if self.driver.capabilities().schema {
            self.driver.set_schema(schema.clone()).await?;
        }

        *active = schema;
        Ok(())
    }

    /// Validates a record against the active schema.
    ///
    /// Without a schema the record is returned unchanged.
    pub async fn validate(&self, record: &Record, is_partial: bool) -> RecordStoreResult<Record> {
        match self.schema().await {
            Some(schema) => Ok(schema.validate(record, is_partial)?),
            None => Ok(record.clone()),
        }
    }

    pub async fn connect(&self) -> RecordStoreResult<()> {
        self.driver.connect().await
    }

    pub async fn disconnect(&self) -> RecordStoreResult<()> {
        self.driver.disconnect().await
    }

    pub fn is_connected(&self) -> Option<bool> {
        self.driver.is_connected()
    }

    /// Validates and inserts a record, returning it as stored.
    pub async fn set(&self, record: Record) -> RecordStoreResult<Record> {
        let record = self.validate(&record, false).await?;
        self.driver.set(record).await
    }

    pub async fn get(&self, filter: impl Into<Filter>) -> RecordStoreResult<Vec<Record>> {
        self.driver.get(&filter.into()).await
    }

    pub async fn get_one(&self, filter: impl Into<Filter>) -> RecordStoreResult<Option<Record>> {
        self.driver.get_one(&filter.into()).await
    }

    /// Validates `patch` partially and applies it to every matching record.
    pub async fn update(&self, filter: impl Into<Filter>, patch: Record) -> RecordStoreResult<u64> {
        let patch = self.validate(&patch, true).await?;
        self.driver.update(&filter.into(), patch).await
    }

    pub async fn delete(&self, filter: impl Into<Filter>) -> RecordStoreResult<u64> {
        self.driver.delete(&filter.into()).await
    }

    pub async fn exists(&self, filter: impl Into<Filter>) -> RecordStoreResult<bool> {
        self.driver.exists(&filter.into()).await
    }

    pub async fn count(&self, filter: impl Into<Filter>) -> RecordStoreResult<u64> {
        self.driver.count(&filter.into()).await
    }

    pub async fn clear(&self) -> RecordStoreResult<()> {
        self.driver.clear().await
    }

    /// Serializes, validates and inserts a typed value.
    pub async fn set_typed<T: Serialize + Sync>(&self, value: &T) -> RecordStoreResult<Record> {
        self.set(to_record(value)?).await
    }

    /// Returns every matching record deserialized as `T`.
    pub async fn get_typed<T: DeserializeOwned>(
        &self,
        filter: impl Into<Filter>,
    ) -> RecordStoreResult<Vec<T>> {
        self.get(filter)
            .await?
            .into_iter()
            .map(from_record::<T>)
            .collect()
    }

    /// Returns a record layer for another collection on the same connection.
    ///
    /// When the driver cannot open sibling tables the new layer reuses the
    /// same driver. The new layer starts with `schema`, or with this layer's
    /// active schema when `schema` is `None`.
    pub async fn table(
        &self,
        name: &str,
        schema: Option<Arc<Schema>>,
    ) -> RecordStoreResult<RecordLayer> {
        let driver = if self.driver.capabilities().tables {
            self.driver.table(name)?
        } else {
            Arc::clone(&self.driver)
        };

        let layer = RecordLayer::from_shared(driver);
        let schema = match schema {
            Some(schema) => Some(schema),
            None => self.schema().await,
        };

        if let Some(schema) = schema {
            layer.set_schema(schema).await?;
        }

        Ok(layer)
    }
}
