//! Watch multiplexer: turns store change streams into queue keys.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use harbor_store::{
    Kind, LabelSelector, ObjectKey, ObjectStore, WatchEvent, WatchEventType, WatchStream,
};
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::queue::WorkQueue;

/// Maps a change event to the key that should be reconciled, if any.
///
/// Handlers see every event type; a delete must still trigger a pass.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn key_for(&self, event: &WatchEvent) -> Option<ObjectKey>;
}

/// Reconcile the changed object itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnqueueForObject;

#[async_trait]
impl EventHandler for EnqueueForObject {
    async fn key_for(&self, event: &WatchEvent) -> Option<ObjectKey> {
        Some(event.object.key())
    }
}

/// Reconcile the controller owner of the changed object.
///
/// The owner must be of `owner_kind` and must still exist in the store
/// with the referenced uid; events for orphans are dropped.
pub struct EnqueueForOwner {
    owner_kind: Kind,
    store: Arc<dyn ObjectStore>,
}

impl EnqueueForOwner {
    pub fn new(owner_kind: Kind, store: Arc<dyn ObjectStore>) -> Self {
        Self { owner_kind, store }
    }
}

#[async_trait]
impl EventHandler for EnqueueForOwner {
    async fn key_for(&self, event: &WatchEvent) -> Option<ObjectKey> {
        let metadata = event.object.metadata();
        let owner = metadata.controller_owner()?;
        if owner.kind != self.owner_kind {
            trace!(object = %metadata.key(), owner_kind = %owner.kind, "Owner of another kind");
            return None;
        }

        let key = ObjectKey::new(&metadata.namespace, &owner.name);
        match self.store.get(self.owner_kind, &key).await {
            Ok(found) if found.metadata().uid == Some(owner.uid) => Some(key),
            Ok(_) => {
                debug!(owner = %key, "Owner was replaced, ignoring event");
                None
            }
            Err(err) if err.is_not_found() => {
                debug!(owner = %key, "Owner gone, ignoring event");
                None
            }
            Err(err) => {
                // Owner state unknown; let the reconciler decide.
                warn!(owner = %key, error = %err, "Owner lookup failed, enqueueing anyway");
                Some(key)
            }
        }
    }
}

/// Reconcile the object named by a label of the changed object, in the
/// same namespace. Objects without the label are ignored.
#[derive(Debug, Clone)]
pub struct EnqueueForLabel {
    label: String,
}

impl EnqueueForLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

#[async_trait]
impl EventHandler for EnqueueForLabel {
    async fn key_for(&self, event: &WatchEvent) -> Option<ObjectKey> {
        let metadata = event.object.metadata();
        let Some(name) = metadata.labels.get(&self.label) else {
            trace!(object = %metadata.key(), label = %self.label, "Label absent");
            return None;
        };
        Some(ObjectKey::new(&metadata.namespace, name))
    }
}

/// One watched kind and the handler for its events.
#[derive(Clone)]
pub struct WatchSource {
    pub kind: Kind,
    pub handler: Arc<dyn EventHandler>,
}

impl WatchSource {
    pub fn new(kind: Kind, handler: Arc<dyn EventHandler>) -> Self {
        Self { kind, handler }
    }

    /// Watch `kind` and reconcile each changed object.
    pub fn primary(kind: Kind) -> Self {
        Self::new(kind, Arc::new(EnqueueForObject))
    }

    /// Watch `kind` and reconcile the `owner_kind` owner of each changed object.
    pub fn owned(kind: Kind, owner_kind: Kind, store: Arc<dyn ObjectStore>) -> Self {
        Self::new(kind, Arc::new(EnqueueForOwner::new(owner_kind, store)))
    }

    /// Watch `kind` and reconcile the object named by its `label`.
    pub fn labelled(kind: Kind, label: &str) -> Self {
        Self::new(kind, Arc::new(EnqueueForLabel::new(label)))
    }
}

enum Signal {
    Event(WatchEvent),
    Lagged(u64),
    Failed(harbor_store::Error),
    Closed,
}

fn tagged(index: usize, watch: WatchStream) -> BoxStream<'static, (usize, Signal)> {
    watch
        .into_stream()
        .map(move |item| {
            let signal = match item {
                Ok(event) => Signal::Event(event),
                Err(harbor_store::Error::Lagged { skipped, .. }) => Signal::Lagged(skipped),
                Err(err) => Signal::Failed(err),
            };
            (index, signal)
        })
        .chain(stream::once(async move { (index, Signal::Closed) }))
        .boxed()
}

/// Fans several watch streams into one work queue.
pub struct WatchMultiplexer {
    store: Arc<dyn ObjectStore>,
    queue: WorkQueue,
    sources: Vec<WatchSource>,
}

impl WatchMultiplexer {
    pub fn new(store: Arc<dyn ObjectStore>, queue: WorkQueue, sources: Vec<WatchSource>) -> Self {
        Self {
            store,
            queue,
            sources,
        }
    }

    /// Forward events until `shutdown` flips to true.
    ///
    /// Subscriptions are taken before the optional resync so that no change
    /// made during the resync is missed. Returns [`Error::WatchFailed`] if
    /// every stream closes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>, resync: bool) -> Result<()> {
        if self.sources.is_empty() {
            return Err(Error::invalid_config("watch multiplexer has no sources"));
        }

        let mut events = stream::select_all(
            self.sources
                .iter()
                .enumerate()
                .map(|(index, source)| tagged(index, self.store.watch(source.kind))),
        );

        if resync {
            for source in &self.sources {
                self.resync(source).await;
            }
        }

        let mut open = self.sources.len();
        info!(sources = open, "Watch multiplexer started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                next = events.next() => {
                    let Some((index, signal)) = next else {
                        return Err(Error::watch_failed("every watch stream closed"));
                    };
                    let Some(source) = self.sources.get(index) else {
                        continue;
                    };
                    match signal {
                        Signal::Event(event) => self.dispatch(source, &event).await,
                        Signal::Lagged(skipped) => {
                            warn!(kind = %source.kind, skipped, "Watch lagged, resyncing");
                            self.resync(source).await;
                        }
                        Signal::Failed(err) => {
                            warn!(kind = %source.kind, error = %err, "Watch error");
                        }
                        Signal::Closed => {
                            error!(kind = %source.kind, "Watch stream closed");
                            open = open.saturating_sub(1);
                            if open == 0 {
                                return Err(Error::watch_failed("every watch stream closed"));
                            }
                        }
                    }
                }
            }
        }

        info!("Watch multiplexer stopped");
        Ok(())
    }

    async fn dispatch(&self, source: &WatchSource, event: &WatchEvent) {
        if let Some(key) = source.handler.key_for(event).await {
            trace!(
                kind = %source.kind,
                event = ?event.event_type,
                key = %key,
                "Enqueueing"
            );
            self.queue.enqueue(key);
        }
    }

    /// Feed every stored object of the source's kind through its handler.
    pub async fn resync(&self, source: &WatchSource) {
        match self
            .store
            .list(source.kind, None, &LabelSelector::everything())
            .await
        {
            Ok(objects) => {
                let count = objects.len();
                for object in objects {
                    let event = WatchEvent::new(WatchEventType::Added, object);
                    self.dispatch(source, &event).await;
                }
                debug!(kind = %source.kind, count, "Resynced");
            }
            Err(err) => {
                error!(kind = %source.kind, error = %err, "Resync failed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::workload::build_workload;
    use harbor_store::{
        Application, ApplicationContainer, ApplicationContainerPort, ApplicationSpec,
        InMemoryStore, Pod, StoredObject, Uid,
    };
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn app(name: &str) -> StoredObject {
        Application::new(
            "ns",
            name,
            ApplicationSpec {
                containers: vec![ApplicationContainer {
                    name: "nginx".to_string(),
                    image: "nginx:latest".to_string(),
                    ports: vec![ApplicationContainerPort {
                        name: "default".to_string(),
                        host_port: 80,
                        container_port: 80,
                    }],
                    cpu_limit: "test".to_string(),
                    memory_limit: "test".to_string(),
                }],
                replicas: Some(1),
            },
        )
        .into()
    }

    fn multiplexer(store: &Arc<InMemoryStore>) -> (Arc<WatchMultiplexer>, WorkQueue) {
        let queue = WorkQueue::new();
        let sources = vec![
            WatchSource::primary(Kind::Application),
            WatchSource::owned(Kind::Workload, Kind::Application, store.clone()),
        ];
        let mux = WatchMultiplexer::new(store.clone(), queue.clone(), sources);
        (Arc::new(mux), queue)
    }

    /// Holds the first event until released, stalling the multiplexer.
    #[derive(Default)]
    struct Gate {
        armed: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl EventHandler for Gate {
        async fn key_for(&self, event: &WatchEvent) -> Option<ObjectKey> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Some(event.object.key())
        }
    }

    async fn wait_for_len(queue: &WorkQueue, len: usize) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while queue.len() < len {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queue should fill");
    }

    #[tokio::test]
    async fn test_primary_event_enqueues_own_key() {
        let event = WatchEvent::new(WatchEventType::Deleted, app("x"));
        assert_eq!(
            EnqueueForObject.key_for(&event).await,
            Some(ObjectKey::new("ns", "x"))
        );
    }

    #[tokio::test]
    async fn test_owned_event_resolves_live_owner() {
        let store = InMemoryStore::new_arc();
        let stored = store.create(app("x")).await.unwrap().into_application().unwrap();
        let handler = EnqueueForOwner::new(Kind::Application, store.clone());

        let event = WatchEvent::new(WatchEventType::Modified, build_workload(&stored).unwrap().into());
        assert_eq!(handler.key_for(&event).await, Some(ObjectKey::new("ns", "x")));
    }

    #[tokio::test]
    async fn test_owned_event_without_owner_is_ignored() {
        let store = InMemoryStore::new_arc();
        let handler = EnqueueForOwner::new(Kind::Application, store.clone());

        let orphan = WatchEvent::new(
            WatchEventType::Added,
            Pod::new("ns", "x-1", BTreeMap::new()).into(),
        );
        assert_eq!(handler.key_for(&orphan).await, None);
    }

    #[tokio::test]
    async fn test_owned_event_for_missing_or_replaced_owner_is_ignored() {
        let store = InMemoryStore::new_arc();
        let handler = EnqueueForOwner::new(Kind::Application, store.clone());

        let mut stale = Application::new(
            "ns",
            "x",
            ApplicationSpec {
                containers: Vec::new(),
                replicas: None,
            },
        );
        stale.metadata.uid = Some(Uid::new());
        let event = WatchEvent::new(WatchEventType::Deleted, build_workload(&stale).unwrap().into());
        assert_eq!(handler.key_for(&event).await, None, "owner does not exist");

        store.create(app("x")).await.unwrap();
        assert_eq!(handler.key_for(&event).await, None, "owner uid differs");
    }

    #[tokio::test]
    async fn test_owned_event_with_other_owner_kind_is_ignored() {
        let store = InMemoryStore::new_arc();
        let stored = store.create(app("x")).await.unwrap().into_application().unwrap();
        let handler = EnqueueForOwner::new(Kind::Workload, store.clone());

        let event = WatchEvent::new(WatchEventType::Added, build_workload(&stored).unwrap().into());
        assert_eq!(handler.key_for(&event).await, None);
    }

    #[tokio::test]
    async fn test_labelled_event_enqueues_named_application() {
        let handler = EnqueueForLabel::new("owner");
        let labels = BTreeMap::from([
            ("role".to_string(), "application".to_string()),
            ("owner".to_string(), "x".to_string()),
        ]);

        let pod = WatchEvent::new(WatchEventType::Deleted, Pod::new("ns", "x-2", labels).into());
        assert_eq!(handler.key_for(&pod).await, Some(ObjectKey::new("ns", "x")));

        let unlabelled = WatchEvent::new(
            WatchEventType::Added,
            Pod::new("ns", "stray", BTreeMap::new()).into(),
        );
        assert_eq!(handler.key_for(&unlabelled).await, None);
    }

    #[tokio::test]
    async fn test_run_forwards_live_events_and_stops_on_shutdown() {
        let store = InMemoryStore::new_arc();
        let (mux, queue) = multiplexer(&store);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = {
            let mux = mux.clone();
            tokio::spawn(async move { mux.run(stop_rx, false).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stored = store.create(app("x")).await.unwrap().into_application().unwrap();
        store.create(app("y")).await.unwrap();
        wait_for_len(&queue, 2).await;

        // Workload event for x coalesces with the pending key.
        store.create(build_workload(&stored).unwrap().into()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.len(), 2);

        stop_tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("multiplexer should stop")
            .expect("task should not panic");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_run_resyncs_existing_objects_on_start() {
        let store = InMemoryStore::new_arc();
        store.create(app("a")).await.unwrap();
        store.create(app("b")).await.unwrap();
        let (mux, queue) = multiplexer(&store);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { mux.run(stop_rx, true).await });
        wait_for_len(&queue, 2).await;

        assert_eq!(queue.dequeue().await, Some(ObjectKey::new("ns", "a")));
        assert_eq!(queue.dequeue().await, Some(ObjectKey::new("ns", "b")));

        stop_tx.send(true).unwrap();
        let _ = handle.await;
    }

    /// Given a watch channel holding two events and a stalled multiplexer
    /// When five more applications are created meanwhile
    /// Then the lag triggers a resync and every key reaches the queue
    #[tokio::test]
    async fn test_lagged_watch_resyncs_its_kind() {
        let store = Arc::new(InMemoryStore::with_watch_capacity(2));
        let queue = WorkQueue::new();
        let gate = Arc::new(Gate::default());
        gate.armed.store(true, Ordering::SeqCst);
        let mux = WatchMultiplexer::new(
            store.clone(),
            queue.clone(),
            vec![WatchSource::new(Kind::Application, gate.clone())],
        );
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { mux.run(stop_rx, false).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        store.create(app("a0")).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), gate.entered.notified())
            .await
            .expect("multiplexer should pick up the first event");

        for i in 1..=5 {
            store.create(app(&format!("a{i}"))).await.unwrap();
        }
        gate.release.notify_one();
        wait_for_len(&queue, 6).await;

        let mut keys = BTreeSet::new();
        for _ in 0..6 {
            keys.insert(queue.dequeue().await.unwrap().name);
        }
        let expected: BTreeSet<String> = (0..=5).map(|i| format!("a{i}")).collect();
        assert_eq!(keys, expected);

        stop_tx.send(true).unwrap();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_run_without_sources_is_rejected() {
        let store = InMemoryStore::new_arc();
        let mux = WatchMultiplexer::new(store, WorkQueue::new(), Vec::new());
        let (_stop_tx, stop_rx) = watch::channel(false);

        assert!(matches!(
            mux.run(stop_rx, false).await,
            Err(Error::InvalidConfig { .. })
        ));
    }
}
