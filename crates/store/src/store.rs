//! Object store trait and implementations.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use itertools::Itertools;
use tokio::sync::RwLock;

use crate::bus::{WatchBus, WatchEvent, WatchEventType, WatchStream};
use crate::error::{Error, Result};
use crate::resources::StoredObject;
use crate::types::{Kind, LabelSelector, ObjectKey, Uid};
use crate::validation::validate;

/// Trait for versioned object storage backends.
///
/// Every write checks the caller's `resource_version` against the stored
/// one; a mismatch is a [`Error::Conflict`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one object.
    async fn get(&self, kind: Kind, key: &ObjectKey) -> Result<StoredObject>;

    /// List objects of a kind whose labels match `selector`.
    ///
    /// `namespace: None` lists across all namespaces. Order is store-defined.
    async fn list(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<StoredObject>>;

    /// Create an object, returning it with uid and version assigned.
    async fn create(&self, object: StoredObject) -> Result<StoredObject>;

    /// Replace spec and metadata. The stored status is kept.
    async fn update(&self, object: StoredObject) -> Result<StoredObject>;

    /// Replace only the status sub-record.
    async fn update_status(&self, object: StoredObject) -> Result<StoredObject>;

    /// Delete an object. Dependents are garbage-collected by the store.
    async fn delete(&self, kind: Kind, key: &ObjectKey) -> Result<()>;

    /// Subscribe to changes of one kind from now on.
    fn watch(&self, kind: Kind) -> WatchStream;
}

/// Store operations, for fault injection and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

impl StoreOperation {
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Get | Self::List)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::List => "list",
            Self::Create => "create",
            Self::Update => "update",
            Self::UpdateStatus => "update_status",
            Self::Delete => "delete",
        }
    }
}

#[derive(Default)]
struct Objects {
    /// Per-kind objects in insertion order.
    by_kind: HashMap<Kind, Vec<StoredObject>>,
    version: u64,
}

impl Objects {
    fn next_version(&mut self) -> u64 {
        self.version = self.version.saturating_add(1);
        self.version
    }

    fn position(&self, kind: Kind, key: &ObjectKey) -> Option<usize> {
        self.by_kind
            .get(&kind)
            .and_then(|objects| objects.iter().position(|o| &o.key() == key))
    }

    fn find(&self, kind: Kind, key: &ObjectKey) -> Option<&StoredObject> {
        self.by_kind
            .get(&kind)
            .and_then(|objects| objects.iter().find(|o| &o.key() == key))
    }

    fn replace(&mut self, kind: Kind, index: usize, object: StoredObject) {
        if let Some(slot) = self.by_kind.get_mut(&kind).and_then(|o| o.get_mut(index)) {
            *slot = object;
        }
    }

    fn remove(&mut self, kind: Kind, key: &ObjectKey) -> Option<StoredObject> {
        let index = self.position(kind, key)?;
        self.by_kind.get_mut(&kind).map(|objects| objects.remove(index))
    }

    /// Remove every object owned, directly or transitively, by `root`.
    fn collect_garbage(&mut self, root: Uid) -> Vec<StoredObject> {
        let mut removed = Vec::new();
        let mut owners = vec![root];
        while let Some(owner) = owners.pop() {
            for objects in self.by_kind.values_mut() {
                let (orphans, kept): (Vec<_>, Vec<_>) = objects
                    .drain(..)
                    .partition(|o| o.metadata().is_owned_by(owner));
                *objects = kept;
                owners.extend(orphans.iter().filter_map(|o| o.metadata().uid));
                removed.extend(orphans);
            }
        }
        removed
    }
}

/// In-memory store with optimistic concurrency and owner-reference
/// garbage collection.
#[derive(Default)]
pub struct InMemoryStore {
    objects: RwLock<Objects>,
    bus: WatchBus,
    faults: Mutex<Vec<(StoreOperation, String)>>,
    calls: Mutex<HashMap<StoreOperation, usize>>,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new empty store wrapped in an Arc.
    pub fn new_arc() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::new())
    }

    /// Create a store whose watch channels hold at most `capacity` events
    /// per kind. Subscribers falling further behind see [`Error::Lagged`].
    pub fn with_watch_capacity(capacity: usize) -> Self {
        Self {
            bus: WatchBus::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Make the next call of `operation` fail with [`Error::Unavailable`].
    pub fn fail_next(&self, operation: StoreOperation, reason: impl Into<String>) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((operation, reason.into()));
    }

    /// Number of successful calls of `operation`.
    pub fn call_count(&self, operation: StoreOperation) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&operation)
            .copied()
            .unwrap_or(0)
    }

    /// Number of successful writes of any kind.
    pub fn write_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(op, _)| op.is_write())
            .map(|(_, n)| *n)
            .sum()
    }

    /// Number of stored objects of a kind.
    pub async fn count(&self, kind: Kind) -> usize {
        self.objects
            .read()
            .await
            .by_kind
            .get(&kind)
            .map_or(0, Vec::len)
    }

    fn injected_fault(&self, operation: StoreOperation) -> Result<()> {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        match faults.iter().position(|(op, _)| *op == operation) {
            Some(index) => {
                let (_, reason) = faults.remove(index);
                Err(Error::unavailable(operation.as_str(), reason))
            }
            None => Ok(()),
        }
    }

    fn record(&self, operation: StoreOperation) {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        let count = calls.entry(operation).or_insert(0);
        *count = count.saturating_add(1);
    }

    /// Shared version check and write for `update` and `update_status`.
    async fn write_existing(
        &self,
        operation: StoreOperation,
        incoming: StoredObject,
    ) -> Result<StoredObject> {
        self.injected_fault(operation)?;
        let kind = incoming.kind();
        let key = incoming.key();

        let mut objects = self.objects.write().await;
        let index = objects
            .position(kind, &key)
            .ok_or_else(|| Error::not_found(kind, key.clone()))?;
        let current = objects
            .find(kind, &key)
            .cloned()
            .ok_or_else(|| Error::not_found(kind, key.clone()))?;

        let expected = incoming.metadata().resource_version;
        let actual = current.metadata().resource_version;
        if expected != actual {
            return Err(Error::conflict(kind, key, expected, actual));
        }

        let mut stored = match operation {
            StoreOperation::UpdateStatus => current.clone().with_status_of(&incoming)?,
            _ => {
                let merged = incoming.with_status_of(&current)?;
                validate(&merged)?;
                merged
            }
        };
        let meta = stored.metadata_mut();
        meta.uid = current.metadata().uid;
        meta.creation_timestamp = current.metadata().creation_timestamp;
        meta.resource_version = objects.next_version();

        objects.replace(kind, index, stored.clone());
        drop(objects);

        self.record(operation);
        self.bus
            .publish(WatchEvent::new(WatchEventType::Modified, stored.clone()));
        Ok(stored)
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, kind: Kind, key: &ObjectKey) -> Result<StoredObject> {
        self.injected_fault(StoreOperation::Get)?;
        let found = self.objects.read().await.find(kind, key).cloned();
        self.record(StoreOperation::Get);
        found.ok_or_else(|| Error::not_found(kind, key.clone()))
    }

    async fn list(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<StoredObject>> {
        self.injected_fault(StoreOperation::List)?;
        let objects = self.objects.read().await;
        let matching = objects
            .by_kind
            .get(&kind)
            .map(|all| {
                all.iter()
                    .filter(|o| namespace.map_or(true, |ns| o.metadata().namespace == ns))
                    .filter(|o| selector.matches(&o.metadata().labels))
                    .cloned()
                    .collect_vec()
            })
            .unwrap_or_default();
        drop(objects);
        self.record(StoreOperation::List);
        Ok(matching)
    }

    async fn create(&self, mut object: StoredObject) -> Result<StoredObject> {
        self.injected_fault(StoreOperation::Create)?;
        validate(&object)?;
        let kind = object.kind();
        let key = object.key();

        let mut objects = self.objects.write().await;
        if objects.find(kind, &key).is_some() {
            return Err(Error::already_exists(kind, key));
        }
        let version = objects.next_version();
        let meta = object.metadata_mut();
        meta.uid = Some(Uid::new());
        meta.resource_version = version;
        meta.creation_timestamp = Some(Utc::now());
        objects.by_kind.entry(kind).or_default().push(object.clone());
        drop(objects);

        self.record(StoreOperation::Create);
        self.bus
            .publish(WatchEvent::new(WatchEventType::Added, object.clone()));
        Ok(object)
    }

    async fn update(&self, object: StoredObject) -> Result<StoredObject> {
        self.write_existing(StoreOperation::Update, object).await
    }

    async fn update_status(&self, object: StoredObject) -> Result<StoredObject> {
        self.write_existing(StoreOperation::UpdateStatus, object).await
    }

    async fn delete(&self, kind: Kind, key: &ObjectKey) -> Result<()> {
        self.injected_fault(StoreOperation::Delete)?;
        let mut objects = self.objects.write().await;
        let removed = objects
            .remove(kind, key)
            .ok_or_else(|| Error::not_found(kind, key.clone()))?;
        let collected = removed
            .metadata()
            .uid
            .map(|uid| objects.collect_garbage(uid))
            .unwrap_or_default();
        drop(objects);

        self.record(StoreOperation::Delete);
        tracing::debug!(
            kind = %kind,
            key = %key,
            dependents = collected.len(),
            "Deleted object"
        );
        for object in std::iter::once(removed).chain(collected) {
            self.bus
                .publish(WatchEvent::new(WatchEventType::Deleted, object));
        }
        Ok(())
    }

    fn watch(&self, kind: Kind) -> WatchStream {
        self.bus.subscribe(kind)
    }
}

/// A wrapper that adds tracing to an object store.
pub struct TracingStore<S: ObjectStore> {
    inner: S,
}

impl<S: ObjectStore> TracingStore<S> {
    /// Create a new tracing store.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Get the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for TracingStore<S> {
    async fn get(&self, kind: Kind, key: &ObjectKey) -> Result<StoredObject> {
        tracing::trace!(kind = %kind, key = %key, "Getting object");
        self.inner.get(kind, key).await
    }

    async fn list(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<StoredObject>> {
        tracing::trace!(kind = %kind, namespace = ?namespace, selector = ?selector.match_labels, "Listing objects");
        let result = self.inner.list(kind, namespace, selector).await;
        if let Ok(ref objects) = result {
            tracing::trace!(count = objects.len(), "Listed objects");
        }
        result
    }

    async fn create(&self, object: StoredObject) -> Result<StoredObject> {
        tracing::debug!(kind = %object.kind(), key = %object.key(), "Creating object");
        let result = self.inner.create(object).await;
        if let Ok(ref stored) = result {
            tracing::trace!(version = stored.metadata().resource_version, "Object created");
        }
        result
    }

    async fn update(&self, object: StoredObject) -> Result<StoredObject> {
        tracing::debug!(
            kind = %object.kind(),
            key = %object.key(),
            version = object.metadata().resource_version,
            "Updating object"
        );
        self.inner.update(object).await
    }

    async fn update_status(&self, object: StoredObject) -> Result<StoredObject> {
        tracing::debug!(
            kind = %object.kind(),
            key = %object.key(),
            version = object.metadata().resource_version,
            "Updating object status"
        );
        self.inner.update_status(object).await
    }

    async fn delete(&self, kind: Kind, key: &ObjectKey) -> Result<()> {
        tracing::debug!(kind = %kind, key = %key, "Deleting object");
        self.inner.delete(kind, key).await
    }

    fn watch(&self, kind: Kind) -> WatchStream {
        tracing::debug!(kind = %kind, "Opening watch");
        self.inner.watch(kind)
    }
}
