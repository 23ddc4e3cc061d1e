//! Runs a set of explicitly registered controllers over one store.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use harbor_core::OperatorConfig;
use harbor_store::ObjectStore;
use tokio::sync::watch;
use tracing::{error, info};

use crate::backoff::BackoffPolicy;
use crate::controller::{
    application_controller, Controller, ControllerConfig, APPLICATION_CONTROLLER,
};
use crate::error::{Error, Result};

type ControllerFactory = dyn Fn(Arc<dyn ObjectStore>, ControllerConfig) -> Controller + Send + Sync;

/// A controller the manager should run, and how to build it.
pub struct ControllerRegistration {
    name: String,
    factory: Box<ControllerFactory>,
}

impl ControllerRegistration {
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(Arc<dyn ObjectStore>, ControllerConfig) -> Controller + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Box::new(factory),
        }
    }

    /// The application controller.
    pub fn application() -> Self {
        Self::new(APPLICATION_CONTROLLER, application_controller)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn build(&self, store: Arc<dyn ObjectStore>, config: ControllerConfig) -> Controller {
        (self.factory)(store, config)
    }
}

/// Settings applied to every controller the manager builds.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    pub workers: usize,
    pub backoff: BackoffPolicy,
    pub resync_on_start: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let controller = ControllerConfig::default();
        Self {
            workers: controller.workers,
            backoff: controller.backoff,
            resync_on_start: controller.resync_on_start,
        }
    }
}

impl ManagerConfig {
    /// Controller configuration for the controller called `name`.
    pub fn controller_config(&self, name: &str) -> ControllerConfig {
        ControllerConfig::new(name)
            .with_workers(self.workers)
            .with_backoff(self.backoff.clone())
            .with_resync_on_start(self.resync_on_start)
    }
}

impl From<&OperatorConfig> for ManagerConfig {
    fn from(config: &OperatorConfig) -> Self {
        Self {
            workers: config.controller.workers,
            backoff: BackoffPolicy::new(config.backoff.base_delay(), config.backoff.max_delay())
                .with_jitter(config.backoff.jitter_factor),
            resync_on_start: config.controller.resync_on_start,
        }
    }
}

/// Owns the registrations and the shared stop signal.
pub struct Manager {
    store: Arc<dyn ObjectStore>,
    config: ManagerConfig,
    registrations: Vec<ControllerRegistration>,
    stop_tx: watch::Sender<bool>,
}

impl Manager {
    pub fn new(store: Arc<dyn ObjectStore>, config: ManagerConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            store,
            config,
            registrations: Vec::new(),
            stop_tx,
        }
    }

    /// Add a controller.
    #[must_use]
    pub fn register(mut self, registration: ControllerRegistration) -> Self {
        self.registrations.push(registration);
        self
    }

    /// Names of the registered controllers, in registration order.
    pub fn controller_names(&self) -> Vec<&str> {
        self.registrations.iter().map(ControllerRegistration::name).collect()
    }

    /// Get a stopper handle.
    pub fn stopper(&self) -> ManagerStopper {
        ManagerStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }

    /// Stop every controller.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Run every registered controller until stopped.
    ///
    /// If one controller fails the others are stopped too and the first
    /// error is returned.
    pub async fn run(&self) -> Result<()> {
        if self.registrations.is_empty() {
            return Err(Error::invalid_config("no controllers registered"));
        }

        let controllers = self
            .registrations
            .iter()
            .map(|registration| -> Result<Arc<Controller>> {
                let config = self.config.controller_config(registration.name());
                config.validate()?;
                Ok(Arc::new(registration.build(self.store.clone(), config)))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(controllers = ?self.controller_names(), "Starting manager");

        let mut running: FuturesUnordered<_> = controllers
            .into_iter()
            .map(|controller| {
                let shutdown = self.stop_tx.subscribe();
                let name = controller.name().to_string();
                let handle = tokio::spawn(async move { controller.run(shutdown).await });
                async move {
                    let result = match handle.await {
                        Ok(result) => result,
                        Err(err) => Err(Error::task_failed(name.clone(), err.to_string())),
                    };
                    (name, result)
                }
            })
            .collect();

        let mut first_error = None;
        while let Some((name, result)) = running.next().await {
            if let Err(err) = result {
                error!(controller = %name, error = %err, "Controller exited with error, stopping manager");
                self.stop();
                first_error.get_or_insert(err);
            }
        }

        info!("Manager stopped");
        first_error.map_or(Ok(()), Err)
    }
}

/// Handle to stop a running manager.
#[derive(Clone)]
pub struct ManagerStopper {
    stop_tx: watch::Sender<bool>,
}

impl ManagerStopper {
    /// Stop the manager.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use harbor_store::InMemoryStore;
    use std::time::Duration;

    #[test]
    fn test_config_follows_operator_settings() {
        let mut operator = OperatorConfig::default();
        operator.controller.workers = 7;
        operator.backoff.base_delay_ms = 10;
        operator.backoff.max_delay_ms = 500;
        operator.backoff.jitter_factor = 0.0;

        let config = ManagerConfig::from(&operator);
        assert_eq!(config.workers, 7);
        assert_eq!(config.backoff.base_delay, Duration::from_millis(10));
        assert_eq!(config.backoff.max_delay, Duration::from_millis(500));

        let controller = config.controller_config("application");
        assert_eq!(controller.name, "application");
        assert_eq!(controller.workers, 7);
    }

    #[tokio::test]
    async fn test_run_without_registrations_is_rejected() {
        let manager = Manager::new(InMemoryStore::new_arc(), ManagerConfig::default());
        assert!(matches!(manager.run().await, Err(Error::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_registrations_are_kept_in_order() {
        let manager = Manager::new(InMemoryStore::new_arc(), ManagerConfig::default())
            .register(ControllerRegistration::application())
            .register(ControllerRegistration::new("shadow", application_controller));
        assert_eq!(manager.controller_names(), vec!["application", "shadow"]);
    }

    #[tokio::test]
    async fn test_stopper_ends_run() {
        let manager = Arc::new(
            Manager::new(InMemoryStore::new_arc(), ManagerConfig::default())
                .register(ControllerRegistration::application()),
        );
        let stopper = manager.stopper();

        let handle = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.run().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        stopper.stop();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("manager should stop")
            .expect("task should not panic");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_settings_fail_before_start() {
        let config = ManagerConfig {
            workers: 0,
            ..ManagerConfig::default()
        };
        let manager = Manager::new(InMemoryStore::new_arc(), config)
            .register(ControllerRegistration::application());
        assert!(matches!(manager.run().await, Err(Error::InvalidConfig { .. })));
    }
}
