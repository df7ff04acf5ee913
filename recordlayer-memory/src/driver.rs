//! In-memory driver implementation.
//!
//! Records live in a map from collection name to a list of records, guarded by
//! an async-aware read-write lock. Drivers opened through [`Driver::table`]
//! share that map and the identity sequence with the driver they came from,
//! so every collection behind one connection draws ids from the same counter.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicI64, Ordering},
};

use async_trait::async_trait;
use bson::Bson;
use chrono::{SecondsFormat, Utc};
use mea::rwlock::RwLock;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use recordlayer_core::{
    config::DriverConfig,
    driver::{Driver, DriverBuilder, DriverCapabilities},
    error::{RecordStoreError, RecordStoreResult},
    record::{CREATED_AT_FIELD, Filter, ID_FIELD, Record, UPDATED_AT_FIELD},
    schema::Schema,
};

use crate::evaluator::matches;

type Collections = std::collections::HashMap<String, Vec<Record>>;

/// How [`MemoryDriver::set`](Driver::set) generates the `_id` of a new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdStrategy {
    /// Sequential 64-bit integers starting at 1, shared by sibling tables.
    #[default]
    Sequence,
    /// Random v4 UUIDs in their hyphenated text form.
    Uuid,
}

impl IdStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdStrategy::Sequence => "sequence",
            IdStrategy::Uuid => "uuid",
        }
    }

    pub fn parse(name: &str) -> Option<IdStrategy> {
        match name.to_ascii_lowercase().as_str() {
            "sequence" => Some(IdStrategy::Sequence),
            "uuid" => Some(IdStrategy::Uuid),
            _ => None,
        }
    }
}

/// Thread-safe in-memory record driver.
///
/// Intended for development and tests. Every read scans the bound
/// collection; there are no indexes.
///
/// When built with [`MemoryDriverBuilder::enforce_schema`], the driver
/// accepts schemas through [`Driver::set_schema`] and validates inserts and
/// update patches itself, in addition to whatever the record layer does.
///
/// # Example
///
/// ```ignore
/// use recordlayer_memory::MemoryDriver;
/// use recordlayer_core::driver::{Driver, DriverBuilder};
/// use bson::doc;
///
/// let users = MemoryDriver::builder().collection("users").build().await?;
/// users.connect().await?;
///
/// let alice = users.set(doc! { "name": "Alice" }).await?;
/// assert_eq!(alice.get_i64("_id")?, 1);
///
/// // Same storage, same id sequence.
/// let posts = users.table("posts")?;
/// let post = posts.set(doc! { "title": "Hello" }).await?;
/// assert_eq!(post.get_i64("_id")?, 2);
/// ```
#[derive(Debug)]
pub struct MemoryDriver {
    collection: String,
    storage: Arc<RwLock<Collections>>,
    sequence: Arc<AtomicI64>,
    connected: AtomicBool,
    id_strategy: IdStrategy,
    enforce_schema: bool,
    schema: RwLock<Option<Arc<Schema>>>,
}

impl MemoryDriver {
    /// Name reported by [`Driver::kind`].
    pub const KIND: &'static str = "MemoryDriver";

    /// Creates an empty, disconnected driver bound to `collection`.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            storage: Arc::new(RwLock::new(Collections::new())),
            sequence: Arc::new(AtomicI64::new(1)),
            connected: AtomicBool::new(false),
            id_strategy: IdStrategy::default(),
            enforce_schema: false,
            schema: RwLock::new(None),
        }
    }

    pub fn builder() -> MemoryDriverBuilder {
        MemoryDriverBuilder::default()
    }

    pub fn id_strategy(&self) -> IdStrategy {
        self.id_strategy
    }

    fn next_id(&self) -> Bson {
        match self.id_strategy {
            IdStrategy::Sequence => Bson::Int64(self.sequence.fetch_add(1, Ordering::SeqCst)),
            IdStrategy::Uuid => Bson::String(Uuid::new_v4().to_string()),
        }
    }

    /// Runs the driver's own schema over `record` when enforcement is on.
    async fn enforce(&self, record: Record, is_partial: bool) -> RecordStoreResult<Record> {
        if !self.enforce_schema {
            return Ok(record);
        }

        match self.schema.read().await.as_ref() {
            Some(schema) => Ok(schema.validate(&record, is_partial)?),
            None => Ok(record),
        }
    }
}

fn timestamp() -> Bson {
    Bson::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[async_trait]
impl Driver for MemoryDriver {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    fn capabilities(&self) -> DriverCapabilities {
        let capabilities = DriverCapabilities::NONE.with_tables().with_clear();

        if self.enforce_schema {
            capabilities.with_schema()
        } else {
            capabilities
        }
    }

    async fn connect(&self) -> RecordStoreResult<()> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            debug!(collection = %self.collection, "memory driver connected");
        }

        Ok(())
    }

    async fn disconnect(&self) -> RecordStoreResult<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            debug!(collection = %self.collection, "memory driver disconnected");
        }

        Ok(())
    }

    fn is_connected(&self) -> Option<bool> {
        Some(self.connected.load(Ordering::SeqCst))
    }

    async fn set(&self, record: Record) -> RecordStoreResult<Record> {
        let record = self.enforce(record, false).await?;

        let mut stored = Record::new();
        stored.insert(ID_FIELD, self.next_id());
        for (field, value) in record {
            stored.insert(field, value);
        }
        stored.insert(CREATED_AT_FIELD, timestamp());

        debug!(
            collection = %self.collection,
            id = %stored.get(ID_FIELD).unwrap_or(&Bson::Null),
            "inserted record"
        );

        self.storage
            .write()
            .await
            .entry(self.collection.clone())
            .or_default()
            .push(stored.clone());

        Ok(stored)
    }

    async fn get(&self, filter: &Filter) -> RecordStoreResult<Vec<Record>> {
        let storage = self.storage.read().await;
        let records = match storage.get(&self.collection) {
            Some(records) => records,
            None => return Ok(vec![]),
        };

        Ok(records
            .iter()
            .filter(|record| matches(record, filter.as_document()))
            .cloned()
            .collect())
    }

    async fn get_one(&self, filter: &Filter) -> RecordStoreResult<Option<Record>> {
        Ok(self
            .storage
            .read()
            .await
            .get(&self.collection)
            .and_then(|records| {
                records
                    .iter()
                    .find(|record| matches(record, filter.as_document()))
                    .cloned()
            }))
    }

    async fn update(&self, filter: &Filter, patch: Record) -> RecordStoreResult<u64> {
        let patch = self.enforce(patch, true).await?;

        let mut storage = self.storage.write().await;
        let records = match storage.get_mut(&self.collection) {
            Some(records) => records,
            None => return Ok(0),
        };

        let mut touched = 0;
        for record in records
            .iter_mut()
            .filter(|record| matches(record, filter.as_document()))
        {
            for (field, value) in &patch {
                record.insert(field.clone(), value.clone());
            }
            record.insert(UPDATED_AT_FIELD, timestamp());
            touched += 1;
        }

        debug!(collection = %self.collection, touched, "updated records");

        Ok(touched)
    }

    async fn delete(&self, filter: &Filter) -> RecordStoreResult<u64> {
        let mut storage = self.storage.write().await;
        let records = match storage.get_mut(&self.collection) {
            Some(records) => records,
            None => return Ok(0),
        };

        let before = records.len();
        records.retain(|record| !matches(record, filter.as_document()));
        let removed = (before - records.len()) as u64;

        debug!(collection = %self.collection, removed, "deleted records");

        Ok(removed)
    }

    async fn exists(&self, filter: &Filter) -> RecordStoreResult<bool> {
        Ok(self
            .storage
            .read()
            .await
            .get(&self.collection)
            .is_some_and(|records| {
                records
                    .iter()
                    .any(|record| matches(record, filter.as_document()))
            }))
    }

    async fn count(&self, filter: &Filter) -> RecordStoreResult<u64> {
        Ok(self
            .storage
            .read()
            .await
            .get(&self.collection)
            .map_or(0, |records| {
                records
                    .iter()
                    .filter(|record| matches(record, filter.as_document()))
                    .count() as u64
            }))
    }

    /// Opens `name` on the same storage. The new driver starts with this
    /// driver's connection state and without a schema.
    fn table(&self, name: &str) -> RecordStoreResult<Arc<dyn Driver>> {
        Ok(Arc::new(MemoryDriver {
            collection: name.to_string(),
            storage: Arc::clone(&self.storage),
            sequence: Arc::clone(&self.sequence),
            connected: AtomicBool::new(self.connected.load(Ordering::SeqCst)),
            id_strategy: self.id_strategy,
            enforce_schema: self.enforce_schema,
            schema: RwLock::new(None),
        }))
    }

    async fn set_schema(&self, schema: Option<Arc<Schema>>) -> RecordStoreResult<()> {
        if !self.enforce_schema {
            return Err(RecordStoreError::Unsupported(
                "memory driver was built without schema enforcement".to_string(),
            ));
        }

        *self.schema.write().await = schema;

        Ok(())
    }

    async fn clear(&self) -> RecordStoreResult<()> {
        if let Some(records) = self.storage.write().await.get_mut(&self.collection) {
            debug!(collection = %self.collection, removed = records.len(), "cleared collection");
            records.clear();
        }

        Ok(())
    }
}

/// Builder for [`MemoryDriver`].
///
/// Options are kept in the [`DriverConfig`], so drivers built with different
/// options never share a pool key. Recognized options are `idStrategy`
/// (`"sequence"` or `"uuid"`) and `enforceSchema` (boolean).
///
/// # Example
///
/// ```ignore
/// use recordlayer_memory::{MemoryDriver, IdStrategy};
///
/// let driver = MemoryDriver::builder()
///     .collection("users")
///     .id_strategy(IdStrategy::Uuid)
///     .enforce_schema(true)
///     .build()
///     .await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryDriverBuilder {
    config: DriverConfig,
}

impl MemoryDriverBuilder {
    pub const ID_STRATEGY_OPTION: &'static str = "idStrategy";
    pub const ENFORCE_SCHEMA_OPTION: &'static str = "enforceSchema";

    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.config = self.config.with_collection(name);
        self
    }

    /// Replaces the whole configuration, including any options already set.
    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.config = self
            .config
            .with_option(Self::ID_STRATEGY_OPTION, strategy.as_str());
        self
    }

    pub fn enforce_schema(mut self, enforce: bool) -> Self {
        self.config = self
            .config
            .with_option(Self::ENFORCE_SCHEMA_OPTION, enforce);
        self
    }

    fn parsed_id_strategy(&self) -> RecordStoreResult<IdStrategy> {
        match self.config.option(Self::ID_STRATEGY_OPTION) {
            None | Some(Value::Null) => Ok(IdStrategy::default()),
            Some(Value::String(name)) => IdStrategy::parse(name).ok_or_else(|| {
                RecordStoreError::Configuration(format!("unknown id strategy: {name}"))
            }),
            Some(other) => Err(RecordStoreError::Configuration(format!(
                "{} must be a string, found {other}",
                Self::ID_STRATEGY_OPTION
            ))),
        }
    }

    fn parsed_enforce_schema(&self) -> RecordStoreResult<bool> {
        match self.config.option(Self::ENFORCE_SCHEMA_OPTION) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(enforce)) => Ok(*enforce),
            Some(other) => Err(RecordStoreError::Configuration(format!(
                "{} must be a boolean, found {other}",
                Self::ENFORCE_SCHEMA_OPTION
            ))),
        }
    }
}

#[async_trait]
impl DriverBuilder for MemoryDriverBuilder {
    type Driver = MemoryDriver;

    fn kind(&self) -> &'static str {
        MemoryDriver::KIND
    }

    fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Builds a disconnected driver with empty storage.
    ///
    /// # Errors
    ///
    /// Returns [`RecordStoreError::Configuration`] if a recognized option has
    /// the wrong type or an unknown value.
    async fn build(self) -> RecordStoreResult<MemoryDriver> {
        let id_strategy = self.parsed_id_strategy()?;
        let enforce_schema = self.parsed_enforce_schema()?;

        Ok(MemoryDriver {
            id_strategy,
            enforce_schema,
            ..MemoryDriver::new(self.config.collection_name())
        })
    }
}
