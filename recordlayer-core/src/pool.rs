//! Keyed registry that deduplicates record layers.
//!
//! An [`InstancePool`] maps an [`IdentityKey`] to one shared [`RecordLayer`].
//! Asking for a layer whose key is already pooled returns the pooled layer,
//! keeping its driver and connection. If the request carries a schema, that
//! schema replaces the pooled layer's active schema first.
//!
//! The pool is an ordinary value: the host creates it once and passes it to
//! whatever needs pooled lookups. Entries are never evicted on their own;
//! call [`InstancePool::clear`] or [`InstancePool::dispose`] to release them.
//!
//! # Example
//!
//! ```ignore
//! use recordlayer::{prelude::*, memory::MemoryDriver};
//!
//! let pool = InstancePool::new();
//!
//! let first = pool.acquire(MemoryDriver::builder().collection("users"), None).await?;
//! let again = pool.acquire(MemoryDriver::builder().collection("users"), None).await?;
//! assert!(Arc::ptr_eq(&first, &again));
//! ```

use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use futures::future::join_all;
use mea::mutex::Mutex;
use tracing::{debug, info};

use crate::{
    driver::DriverBuilder,
    error::RecordStoreResult,
    layer::RecordLayer,
    schema::Schema,
};

/// Identity of a pooled record layer.
///
/// Two requests refer to the same layer when they use the same driver kind,
/// the same collection and the same pool key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    driver: String,
    collection: String,
    pool_key: String,
}

impl IdentityKey {
    pub fn new(
        driver: impl Into<String>,
        collection: impl Into<String>,
        pool_key: impl Into<String>,
    ) -> Self {
        Self {
            driver: driver.into(),
            collection: collection.into(),
            pool_key: pool_key.into(),
        }
    }

    /// Derives the key a builder's driver would be pooled under.
    pub fn for_builder<B: DriverBuilder>(builder: &B) -> Self {
        Self::new(
            builder.kind(),
            builder.config().collection_name(),
            builder.pool_key(),
        )
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn pool_key(&self) -> &str {
        &self.pool_key
    }

    /// Returns `true` if both keys describe the same connection, whatever
    /// collection they target.
    pub fn same_connection(&self, other: &IdentityKey) -> bool {
        self.driver == other.driver && self.pool_key == other.pool_key
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.driver, self.collection, self.pool_key)
    }
}

/// Held while the layer for one key is being created.
type CreationGate = Arc<Mutex<()>>;

#[derive(Debug, Default)]
struct PoolState {
    layers: HashMap<IdentityKey, Arc<RecordLayer>>,
    creating: HashMap<IdentityKey, CreationGate>,
}

impl PoolState {
    /// Drops `gate` from the creation map unless another request still waits on it.
    fn retire_idle_gate(&mut self, key: &IdentityKey, gate: &CreationGate) {
        // One reference in the map, one held by the caller.
        let idle = self
            .creating
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, gate) && Arc::strong_count(gate) == 2);

        if idle {
            self.creating.remove(key);
        }
    }
}

/// Registry of shared record layers.
///
/// The registry lock is only held for map lookups and insertions. Creating a
/// missing layer happens under a per-key gate instead, so concurrent requests
/// for the same key run the factory once and all receive the same layer, while
/// requests for other keys (including ones made from inside a factory) proceed.
/// A factory must not request its own key.
#[derive(Debug, Default)]
pub struct InstancePool {
    state: Mutex<PoolState>,
}

impl InstancePool {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Returns the layer pooled under `key`, creating it with `factory` if needed.
    ///
    /// On a hit, a supplied `schema` replaces the pooled layer's active schema
    /// (and is pushed to schema-aware drivers) before the layer is returned.
    /// On a miss, `schema` is ignored; the factory is responsible for the new
    /// layer's schema.
    ///
    /// # Errors
    ///
    /// Errors from the factory or from schema propagation are returned as-is.
    /// A failed factory leaves nothing registered under `key`.
    pub async fn get_or_create<F, Fut>(
        &self,
        key: IdentityKey,
        factory: F,
        schema: Option<Arc<Schema>>,
    ) -> RecordStoreResult<Arc<RecordLayer>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RecordStoreResult<RecordLayer>>,
    {
        let gate = {
            let mut state = self.state.lock().await;

            if let Some(existing) = state.layers.get(&key).cloned() {
                drop(state);
                return reuse(&key, existing, schema).await;
            }

            Arc::clone(
                state
                    .creating
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        let _creating = gate.lock().await;

        // Another request may have finished creating while we waited.
        if let Some(existing) = self.get(&key).await {
            return reuse(&key, existing, schema).await;
        }

        debug!(identity = %key, "creating pooled record layer");
        let created = factory().await;

        let mut state = self.state.lock().await;
        match created {
            Ok(layer) => {
                let layer = Arc::new(layer);
                state.layers.insert(key.clone(), Arc::clone(&layer));
                if state
                    .creating
                    .get(&key)
                    .is_some_and(|current| Arc::ptr_eq(current, &gate))
                {
                    state.creating.remove(&key);
                }

                Ok(layer)
            }
            Err(err) => {
                state.retire_idle_gate(&key, &gate);
                Err(err)
            }
        }
    }

    /// Returns the pooled layer for the driver `builder` describes, building
    /// the driver only when nothing suitable is pooled yet.
    ///
    /// On a miss, a pooled layer with the same driver kind and pool key but a
    /// different collection is reused as a connection: if its driver supports
    /// sibling tables, the new layer is bound to `driver.table(collection)` and
    /// shares that driver's storage. Otherwise the builder is built.
    ///
    /// The new layer starts with `schema`. On a hit, `schema` replaces the
    /// active schema as in [`InstancePool::get_or_create`].
    pub async fn acquire<B: DriverBuilder>(
        &self,
        builder: B,
        schema: Option<Arc<Schema>>,
    ) -> RecordStoreResult<Arc<RecordLayer>> {
        let key = IdentityKey::for_builder(&builder);
        let open_key = key.clone();
        let initial_schema = schema.clone();

        self.get_or_create(
            key,
            move || self.open(open_key, builder, initial_schema),
            schema,
        )
        .await
    }

    async fn open<B: DriverBuilder>(
        &self,
        key: IdentityKey,
        builder: B,
        schema: Option<Arc<Schema>>,
    ) -> RecordStoreResult<RecordLayer> {
        let sibling = self
            .state
            .lock()
            .await
            .layers
            .iter()
            .find(|(pooled, layer)| {
                pooled.same_connection(&key) && layer.driver().capabilities().tables
            })
            .map(|(_, layer)| Arc::clone(layer));

        let layer = match sibling {
            Some(sibling) => {
                debug!(identity = %key, "opening pooled connection for new collection");
                RecordLayer::from_shared(sibling.driver().table(key.collection())?)
            }
            None => {
                debug!(identity = %key, "building driver for pooled record layer");
                RecordLayer::new(builder.build().await?)
            }
        };

        if let Some(schema) = schema {
            layer.set_schema(schema).await?;
        }

        Ok(layer)
    }

    /// Returns the layer pooled under `key`, if any.
    pub async fn get(&self, key: &IdentityKey) -> Option<Arc<RecordLayer>> {
        self.state
            .lock()
            .await
            .layers
            .get(key)
            .cloned()
    }

    pub async fn contains(&self, key: &IdentityKey) -> bool {
        self.state.lock().await.layers.contains_key(key)
    }

    pub async fn keys(&self) -> Vec<IdentityKey> {
        self.state
            .lock()
            .await
            .layers
            .keys()
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.layers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.layers.is_empty()
    }

    /// Forgets every pooled layer without touching their connections.
    ///
    /// Layers still held elsewhere stay usable.
    pub async fn clear(&self) {
        self.state.lock().await.layers.clear();
    }

    /// Disconnects every pooled layer and empties the pool.
    ///
    /// Every layer is disconnected even when some disconnects fail; the first
    /// failure is returned once all of them have finished.
    pub async fn dispose(&self) -> RecordStoreResult<()> {
        let layers = self
            .state
            .lock()
            .await
            .layers
            .drain()
            .map(|(_, layer)| layer)
            .collect::<Vec<_>>();

        info!(count = layers.len(), "disposing instance pool");

        join_all(layers.iter().map(|layer| layer.disconnect()))
            .await
            .into_iter()
            .collect::<RecordStoreResult<Vec<()>>>()?;

        Ok(())
    }
}

async fn reuse(
    key: &IdentityKey,
    existing: Arc<RecordLayer>,
    schema: Option<Arc<Schema>>,
) -> RecordStoreResult<Arc<RecordLayer>> {
    debug!(identity = %key, "reusing pooled record layer");

    if let Some(schema) = schema {
        existing.set_schema(schema).await?;
        info!(identity = %key, "replaced schema on pooled record layer");
    }

    Ok(existing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DriverConfig,
        driver::{Driver, DriverCapabilities},
        error::RecordStoreError,
        record::{Filter, Record},
        schema::{FieldRule, SchemaDefinition},
        typerule::TypeTag,
    };
    use async_trait::async_trait;
    use bson::doc;
    use std::{
        sync::{
            Mutex as StdMutex,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        time::Duration,
    };

    /// Driver that stores nothing and records the schemas it is handed.
    #[derive(Debug, Default)]
    struct StubDriver {
        collection: String,
        schema_aware: bool,
        refuse_disconnect: bool,
        reject_schemas: AtomicBool,
        connected: AtomicBool,
        schemas: StdMutex<Vec<Option<Arc<Schema>>>>,
    }

    impl StubDriver {
        fn new(collection: &str, schema_aware: bool) -> Self {
            Self {
                collection: collection.to_string(),
                schema_aware,
                ..Default::default()
            }
        }

        fn last_schema(&self) -> Option<Arc<Schema>> {
            self.schemas.lock().unwrap().last().cloned().flatten()
        }
    }

    #[async_trait]
    impl Driver for StubDriver {
        fn kind(&self) -> &'static str {
            "StubDriver"
        }

        fn collection(&self) -> &str {
            &self.collection
        }

        fn capabilities(&self) -> DriverCapabilities {
            if self.schema_aware {
                DriverCapabilities::NONE.with_schema()
            } else {
                DriverCapabilities::NONE
            }
        }

        async fn connect(&self) -> RecordStoreResult<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> RecordStoreResult<()> {
            if self.refuse_disconnect {
                return Err(RecordStoreError::Connection("disconnect refused".to_string()));
            }

            tokio::task::yield_now().await;
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> Option<bool> {
            Some(self.connected.load(Ordering::SeqCst))
        }

        async fn set(&self, record: Record) -> RecordStoreResult<Record> {
            Ok(record)
        }

        async fn get(&self, _filter: &Filter) -> RecordStoreResult<Vec<Record>> {
            Ok(vec![])
        }

        async fn update(&self, _filter: &Filter, _patch: Record) -> RecordStoreResult<u64> {
            Ok(0)
        }

        async fn delete(&self, _filter: &Filter) -> RecordStoreResult<u64> {
            Ok(0)
        }

        async fn set_schema(&self, schema: Option<Arc<Schema>>) -> RecordStoreResult<()> {
            if self.reject_schemas.load(Ordering::SeqCst) {
                return Err(RecordStoreError::Backend("schema rejected".to_string()));
            }

            self.schemas.lock().unwrap().push(schema);
            Ok(())
        }
    }

    struct StubBuilder {
        config: DriverConfig,
        builds: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DriverBuilder for StubBuilder {
        type Driver = StubDriver;

        fn kind(&self) -> &'static str {
            "StubDriver"
        }

        fn config(&self) -> &DriverConfig {
            &self.config
        }

        async fn build(self) -> RecordStoreResult<StubDriver> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(StubDriver::new(self.config.collection_name(), false))
        }
    }

    async fn fresh(collection: &'static str) -> RecordStoreResult<RecordLayer> {
        Ok(RecordLayer::new(StubDriver::new(collection, false)))
    }

    async fn unexpected_factory() -> RecordStoreResult<RecordLayer> {
        Err(RecordStoreError::Unknown("factory ran on a pool hit".to_string()))
    }

    fn key(collection: &str) -> IdentityKey {
        IdentityKey::new("StubDriver", collection, "{}")
    }

    fn name_schema(field_type: TypeTag) -> Arc<Schema> {
        SchemaDefinition::builder()
            .field("name", FieldRule::new(field_type).required())
            .build()
            .into()
    }

    #[tokio::test]
    async fn same_key_returns_same_layer() {
        let pool = InstancePool::new();
        let calls = AtomicUsize::new(0);

        let factory = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            fresh("users").await
        };

        let first = pool.get_or_create(key("users"), factory, None).await.unwrap();
        let second = pool
            .get_or_create(key("users"), unexpected_factory, None)
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn different_collection_is_a_different_entry() {
        let pool = InstancePool::new();

        let users = pool
            .get_or_create(key("users"), || fresh("users"), None)
            .await
            .unwrap();
        let posts = pool
            .get_or_create(key("posts"), || fresh("posts"), None)
            .await
            .unwrap();

        assert!(!Arc::ptr_eq(&users, &posts));
        assert_eq!(pool.len().await, 2);
    }

    #[tokio::test]
    async fn failed_factory_registers_nothing() {
        let pool = InstancePool::new();

        let result = pool
            .get_or_create(
                key("users"),
                || async { Err(RecordStoreError::Connection("refused".to_string())) },
                None,
            )
            .await;

        assert!(matches!(result, Err(RecordStoreError::Connection(ref msg)) if msg == "refused"));
        assert!(!pool.contains(&key("users")).await);
        assert!(pool.state.lock().await.creating.is_empty());

        let layer = pool.get_or_create(key("users"), || fresh("users"), None).await;
        assert!(layer.is_ok());
    }

    #[tokio::test]
    async fn factory_can_use_the_pool_for_other_keys() {
        let pool = InstancePool::new();
        pool.get_or_create(key("users"), || fresh("users"), None)
            .await
            .unwrap();

        let factory = || async {
            assert!(pool.contains(&key("users")).await);
            assert!(!pool.contains(&key("posts")).await);

            match pool.get(&key("users")).await {
                Some(users) => users.table("posts", None).await,
                None => Err(RecordStoreError::Unknown("users layer missing".to_string())),
            }
        };

        let posts = tokio::time::timeout(
            Duration::from_secs(5),
            pool.get_or_create(key("posts"), factory, None),
        )
        .await
        .expect("factory touching the pool must not block")
        .unwrap();

        assert_eq!(posts.collection(), "users");
        assert_eq!(pool.len().await, 2);
    }

    #[tokio::test]
    async fn slow_creation_does_not_block_other_keys() {
        let pool = InstancePool::new();

        let slow = pool.get_or_create(
            key("users"),
            || async {
                // Completes only after the other key has been created.
                while !pool.contains(&key("posts")).await {
                    tokio::task::yield_now().await;
                }
                fresh("users").await
            },
            None,
        );
        let quick = pool.get_or_create(key("posts"), || fresh("posts"), None);

        let (slow, quick) = tokio::time::timeout(Duration::from_secs(5), async {
            futures::join!(slow, quick)
        })
        .await
        .expect("creation of one key must not hold up another");

        assert!(slow.is_ok());
        assert!(quick.is_ok());
    }

    #[tokio::test]
    async fn hit_with_schema_replaces_and_propagates() {
        let pool = InstancePool::new();
        let stub = Arc::new(StubDriver::new("users", true));
        let shared = Arc::clone(&stub);

        let layer = pool
            .get_or_create(
                key("users"),
                || async move { Ok(RecordLayer::from_shared(shared)) },
                None,
            )
            .await
            .unwrap();

        assert!(layer.validate(&doc! {}, false).await.is_ok());

        let schema = name_schema(TypeTag::String);
        let again = pool
            .get_or_create(key("users"), unexpected_factory, Some(Arc::clone(&schema)))
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&layer, &again));
        assert!(Arc::ptr_eq(&layer.schema().await.unwrap(), &schema));
        assert!(Arc::ptr_eq(&stub.last_schema().unwrap(), &schema));
        assert!(layer.validate(&doc! {}, false).await.is_err());
    }

    #[tokio::test]
    async fn hit_with_rejected_schema_keeps_the_previous_one() {
        let pool = InstancePool::new();
        let stub = Arc::new(StubDriver::new("users", true));
        let shared = Arc::clone(&stub);
        let original = name_schema(TypeTag::String);

        let layer = pool
            .get_or_create(
                key("users"),
                || async move { Ok(RecordLayer::from_shared(shared)) },
                None,
            )
            .await
            .unwrap();
        layer.set_schema(Arc::clone(&original)).await.unwrap();

        stub.reject_schemas.store(true, Ordering::SeqCst);
        let replacement = Some(name_schema(TypeTag::Integer));
        let result = pool
            .get_or_create(key("users"), unexpected_factory, replacement)
            .await;

        assert!(matches!(result, Err(RecordStoreError::Backend(_))));
        assert!(Arc::ptr_eq(&layer.schema().await.unwrap(), &original));
        assert!(Arc::ptr_eq(&stub.last_schema().unwrap(), &original));
    }

    #[tokio::test]
    async fn hit_without_schema_keeps_the_active_one() {
        let pool = InstancePool::new();

        let layer = pool
            .get_or_create(
                key("users"),
                || async {
                    let driver = StubDriver::new("users", false);
                    RecordLayer::with_schema(driver, name_schema(TypeTag::String)).await
                },
                None,
            )
            .await
            .unwrap();
        let before = layer.schema().await.unwrap();

        pool.get_or_create(key("users"), unexpected_factory, None)
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&layer.schema().await.unwrap(), &before));
    }

    #[tokio::test]
    async fn concurrent_requests_run_one_factory() {
        let pool = InstancePool::new();
        let calls = AtomicUsize::new(0);

        let request = || {
            pool.get_or_create(
                key("users"),
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    fresh("users").await
                },
                None,
            )
        };

        let layers = futures::future::try_join_all((0..8).map(|_| request()))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(layers.iter().all(|layer| Arc::ptr_eq(layer, &layers[0])));
        assert!(pool.state.lock().await.creating.is_empty());
    }

    #[tokio::test]
    async fn acquire_builds_once_per_identity() {
        let pool = InstancePool::new();
        let builds = Arc::new(AtomicUsize::new(0));

        let builder = |collection: &str| StubBuilder {
            config: DriverConfig::new()
                .with_collection(collection)
                .with_option("host", "localhost"),
            builds: Arc::clone(&builds),
        };

        let first = pool.acquire(builder("users"), None).await.unwrap();
        let second = pool.acquire(builder("users"), None).await.unwrap();
        let third = pool.acquire(builder("posts"), None).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &third));
        // StubDriver has no sibling tables, so a new collection needs a new driver.
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(third.collection(), "posts");
    }

    #[tokio::test]
    async fn dispose_disconnects_and_empties() {
        let pool = InstancePool::new();
        let layer = pool
            .get_or_create(key("users"), || fresh("users"), None)
            .await
            .unwrap();
        layer.connect().await.unwrap();
        assert_eq!(layer.is_connected(), Some(true));

        pool.dispose().await.unwrap();

        assert!(pool.is_empty().await);
        assert_eq!(layer.is_connected(), Some(false));
    }

    #[tokio::test]
    async fn dispose_disconnects_the_rest_when_one_fails() {
        let pool = InstancePool::new();
        let names = ["t0", "t1", "t2", "t3", "t4", "t5"];

        let mut layers = Vec::new();
        for (index, name) in names.into_iter().enumerate() {
            let driver = StubDriver {
                refuse_disconnect: index == 0,
                ..StubDriver::new(name, false)
            };
            let layer = pool
                .get_or_create(key(name), move || async move { Ok(RecordLayer::new(driver)) }, None)
                .await
                .unwrap();
            layer.connect().await.unwrap();
            layers.push(layer);
        }

        let result = pool.dispose().await;

        assert!(matches!(result, Err(RecordStoreError::Connection(_))));
        assert!(pool.is_empty().await);
        assert_eq!(layers[0].is_connected(), Some(true));
        assert!(layers[1..].iter().all(|layer| layer.is_connected() == Some(false)));
    }

    #[tokio::test]
    async fn clear_forgets_entries_but_keeps_layers_usable() {
        let pool = InstancePool::new();
        let layer = pool
            .get_or_create(key("users"), || fresh("users"), None)
            .await
            .unwrap();
        layer.connect().await.unwrap();

        pool.clear().await;

        assert!(pool.is_empty().await);
        assert_eq!(layer.is_connected(), Some(true));

        let replacement = pool
            .get_or_create(key("users"), || fresh("users"), None)
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&layer, &replacement));
    }

    #[test]
    fn identity_key_display_and_connection_sharing() {
        let users = IdentityKey::new("MemoryDriver", "users", "{}");
        let posts = IdentityKey::new("MemoryDriver", "posts", "{}");

        assert_eq!(users.to_string(), "MemoryDriver_users_{}");
        assert!(users.same_connection(&posts));
        assert!(!users.same_connection(&IdentityKey::new("SqlDriver", "users", "{}")));
    }
}
