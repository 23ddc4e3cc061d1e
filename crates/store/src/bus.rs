//! Watch bus: per-kind change notifications.

use std::collections::HashMap;

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{Error, Result};
use crate::resources::StoredObject;
use crate::types::Kind;

/// Default per-kind channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// What happened to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// A change notification carrying the object as of the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub object: StoredObject,
}

impl WatchEvent {
    pub fn new(event_type: WatchEventType, object: StoredObject) -> Self {
        Self { event_type, object }
    }

    pub fn kind(&self) -> Kind {
        self.object.kind()
    }
}

/// Subscription handle for one kind's events.
pub struct WatchStream {
    kind: Kind,
    receiver: broadcast::Receiver<WatchEvent>,
}

impl WatchStream {
    /// Receive the next event.
    ///
    /// A slow subscriber that fell behind gets [`Error::Lagged`] once and
    /// then continues with the oldest retained event.
    pub async fn recv(&mut self) -> Result<WatchEvent> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => Err(Error::Lagged {
                kind: self.kind,
                skipped,
            }),
            Err(broadcast::error::RecvError::Closed) => Err(Error::ChannelClosed),
        }
    }

    /// Adapt into a `Stream`. The stream ends when the bus is dropped.
    pub fn into_stream(self) -> BoxStream<'static, Result<WatchEvent>> {
        stream::unfold(self, |mut watch| async move {
            match watch.recv().await {
                Err(Error::ChannelClosed) => None,
                item => Some((item, watch)),
            }
        })
        .boxed()
    }
}

/// Fan-out of store changes, one broadcast channel per kind.
pub struct WatchBus {
    channels: HashMap<Kind, broadcast::Sender<WatchEvent>>,
}

impl WatchBus {
    /// Create a bus with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus with the given per-kind channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let channels = Kind::ALL
            .into_iter()
            .map(|kind| (kind, broadcast::channel(capacity.max(1)).0))
            .collect();
        Self { channels }
    }

    /// Publish an event to subscribers of its kind.
    ///
    /// Having no subscribers is not an error.
    pub fn publish(&self, event: WatchEvent) {
        let kind = event.kind();
        debug!(
            kind = %kind,
            key = %event.object.key(),
            event_type = ?event.event_type,
            "Publishing watch event"
        );
        if let Some(sender) = self.channels.get(&kind) {
            let _ = sender.send(event);
        }
    }

    /// Subscribe to one kind's events from now on.
    pub fn subscribe(&self, kind: Kind) -> WatchStream {
        let receiver = match self.channels.get(&kind) {
            Some(sender) => sender.subscribe(),
            // Every kind gets a channel at construction.
            None => broadcast::channel(1).1,
        };
        WatchStream { kind, receiver }
    }
}

impl Default for WatchBus {
    fn default() -> Self {
        Self::new()
    }
}
