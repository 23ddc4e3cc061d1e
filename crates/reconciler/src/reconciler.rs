//! The application reconciler.
//!
//! One pass reads the application, then its workload, then the pods, and
//! performs at most one write before returning. Every step re-reads from
//! the store, so a pass started from a stale event still acts on current
//! state.

use std::sync::Arc;

use async_trait::async_trait;
use harbor_store::{
    Application, Kind, ObjectKey, ObjectStore, Pod, StoredObject, Workload,
};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::status::{project_status, status_changed};
use crate::types::{ReconcileAction, ReconcileOutcome};
use crate::workload::{build_workload, selector_for_application};

/// Drives one key towards its desired state.
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Run a single reconciliation pass for `key`.
    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome>;
}

/// Reconciles applications against their workloads and pods.
pub struct ApplicationReconciler {
    store: Arc<dyn ObjectStore>,
}

impl ApplicationReconciler {
    /// Create a new reconciler over `store`.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    async fn fetch_application(&self, key: &ObjectKey) -> Result<Option<Application>> {
        match self.store.get(Kind::Application, key).await {
            Ok(object) => Ok(Some(object.into_application()?)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn fetch_workload(&self, key: &ObjectKey) -> Result<Option<Workload>> {
        match self.store.get(Kind::Workload, key).await {
            Ok(object) => Ok(Some(object.into_workload()?)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_pods(&self, app: &Application) -> Result<Vec<Pod>> {
        let selector = selector_for_application(&app.metadata.name);
        let objects = self
            .store
            .list(Kind::Pod, Some(&app.metadata.namespace), &selector)
            .await?;
        objects
            .into_iter()
            .map(|object| object.into_pod().map_err(Error::from))
            .collect()
    }

    async fn create_workload(&self, app: &Application) -> Result<ReconcileOutcome> {
        let workload = build_workload(app)?;
        info!(
            application = %app.key(),
            replicas = ?workload.spec.replicas,
            containers = workload.spec.template.containers.len(),
            "Creating workload"
        );
        self.store.create(StoredObject::Workload(workload)).await?;
        Ok(ReconcileOutcome::done(ReconcileAction::CreatedWorkload))
    }

    async fn scale_workload(
        &self,
        app: &Application,
        mut workload: Workload,
        desired: u32,
    ) -> Result<ReconcileOutcome> {
        let from = workload.spec.replicas;
        info!(
            application = %app.key(),
            from = ?from,
            to = desired,
            "Scaling workload"
        );
        // Only the replica target is touched; the rest of the child spec
        // is left as the store has it.
        workload.spec.replicas = Some(desired);
        self.store.update(StoredObject::Workload(workload)).await?;
        Ok(ReconcileOutcome::requeue(ReconcileAction::ScaledWorkload {
            from,
            to: desired,
        }))
    }

    async fn project(&self, mut app: Application, workload: &Workload) -> Result<ReconcileOutcome> {
        let pods = self.list_pods(&app).await?;
        let projected = project_status(workload, &pods);

        if !status_changed(&app.status, &projected) {
            debug!(application = %app.key(), "Status up to date");
            return Ok(ReconcileOutcome::done(ReconcileAction::Converged));
        }

        info!(
            application = %app.key(),
            replicas = projected.replicas,
            pods = ?projected.pods,
            "Updating application status"
        );
        app.status = projected;
        self.store
            .update_status(StoredObject::Application(app))
            .await?;
        Ok(ReconcileOutcome::done(ReconcileAction::UpdatedStatus))
    }
}

#[async_trait]
impl Reconcile for ApplicationReconciler {
    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome> {
        let Some(app) = self.fetch_application(key).await? else {
            debug!(application = %key, "Application absent, nothing to do");
            return Ok(ReconcileOutcome::done(ReconcileAction::PrimaryAbsent));
        };

        let Some(workload) = self.fetch_workload(key).await? else {
            return self.create_workload(&app).await;
        };

        if let Some(desired) = app.spec.replicas {
            if workload.spec.replicas != Some(desired) {
                return self.scale_workload(&app, workload, desired).await;
            }
        }

        self.project(app, &workload).await
    }
}
