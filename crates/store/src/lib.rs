//! Versioned object store for Harbor resources.
//!
//! This crate holds the records the reconciler reads and writes:
//!
//! - **Resources**: applications (desired state), the workloads they own,
//!   and the pods an external orchestrator spawns for those workloads
//! - **Object store**: get/list/create/update with optimistic concurrency
//!   via a per-object version token, plus a separate status write path
//! - **Watch bus**: per-kind change notifications
//! - **Garbage collection**: deleting an object removes its dependents
//!   through their owner references
//!
//! # Example
//!
//! ```ignore
//! use harbor_store::{InMemoryStore, Kind, ObjectStore, StoredObject};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryStore::new();
//!     let mut apps = store.watch(Kind::Application);
//!
//!     let created = store.create(StoredObject::from(app)).await.unwrap();
//!
//!     let event = apps.recv().await.unwrap();
//!     println!("{:?} {}", event.event_type, event.object.key());
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod bus;
pub mod error;
pub mod resources;
pub mod store;
pub mod types;
pub mod validation;

// Re-export main types
pub use bus::{WatchBus, WatchEvent, WatchEventType, WatchStream};
pub use error::{Error, Result};
pub use resources::{
    Application, ApplicationContainer, ApplicationContainerPort, ApplicationSpec,
    ApplicationStatus, ContainerDescriptor, ContainerPort, Pod, PodPhase, PodStatus, PodTemplate,
    ResourceRequirements, StoredObject, Workload, WorkloadSpec, WorkloadStatus,
};
pub use store::{InMemoryStore, ObjectStore, StoreOperation, TracingStore};
pub use types::{Kind, LabelSelector, ObjectKey, ObjectMeta, OwnerReference, Uid};
pub use validation::{validate, validate_application};
