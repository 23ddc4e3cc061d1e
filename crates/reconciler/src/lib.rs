//! K8s-style reconciliation of applications into workloads.
//!
//! An application record states what should run. This crate keeps a child
//! workload in line with it and reports what is actually running back
//! into the application's status.
//!
//! # Key Concepts
//!
//! ## Control loop
//!
//! 1. The watch multiplexer turns store changes into application keys
//! 2. The work queue coalesces keys and hands each to one worker at a time
//! 3. The reconciler reads current state and issues at most one write
//! 4. Failures are retried with jittered exponential backoff
//!
//! ## Actions
//!
//! - `CreatedWorkload` - the application had no workload yet
//! - `ScaledWorkload` - the workload's replica target was corrected
//! - `UpdatedStatus` - the projected status differed from the stored one
//! - `Converged` / `PrimaryAbsent` - nothing to write
//!
//! # Example
//!
//! ```ignore
//! use harbor_reconciler::{ControllerRegistration, Manager, ManagerConfig};
//! use harbor_store::InMemoryStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryStore::new_arc();
//!     let manager = Manager::new(store, ManagerConfig::default())
//!         .register(ControllerRegistration::application());
//!
//!     let stopper = manager.stopper();
//!     // stopper.stop() from a signal handler
//!     manager.run().await.ok();
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod backoff;
pub mod controller;
pub mod error;
pub mod manager;
pub mod queue;
pub mod reconciler;
pub mod status;
pub mod types;
pub mod watch;
pub mod workload;

// Re-export main types
pub use backoff::{BackoffPolicy, BackoffTracker};
pub use controller::{application_controller, Controller, ControllerConfig};
pub use error::{Error, Result};
pub use manager::{ControllerRegistration, Manager, ManagerConfig, ManagerStopper};
pub use queue::WorkQueue;
pub use reconciler::{ApplicationReconciler, Reconcile};
pub use status::{project_status, status_changed};
pub use types::{ReconcileAction, ReconcileOutcome, Requeue};
pub use watch::{
    EnqueueForLabel, EnqueueForObject, EnqueueForOwner, EventHandler, WatchMultiplexer,
    WatchSource,
};
pub use workload::{build_workload, labels_for_application, selector_for_application};
