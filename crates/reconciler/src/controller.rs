//! A controller: watch multiplexer, work queue and a pool of workers.

use std::sync::Arc;

use harbor_store::{Kind, ObjectKey, ObjectStore};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::backoff::{BackoffPolicy, BackoffTracker};
use crate::error::{Error, Result};
use crate::queue::WorkQueue;
use crate::reconciler::{ApplicationReconciler, Reconcile};
use crate::types::Requeue;
use crate::watch::{WatchMultiplexer, WatchSource};
use crate::workload::OWNER_LABEL;

/// Name the application controller registers under.
pub const APPLICATION_CONTROLLER: &str = "application";

/// Configuration for one controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Used in logs and spans.
    pub name: String,
    /// Number of concurrent workers.
    pub workers: usize,
    /// Retry policy for failed reconciliations.
    pub backoff: BackoffPolicy,
    /// List every watched kind on start and enqueue what is found.
    pub resync_on_start: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: APPLICATION_CONTROLLER.to_string(),
            workers: 2,
            backoff: BackoffPolicy::default(),
            resync_on_start: true,
        }
    }
}

impl ControllerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_resync_on_start(mut self, resync: bool) -> Self {
        self.resync_on_start = resync;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config(format!(
                "controller '{}' needs at least one worker",
                self.name
            )));
        }
        if self.backoff.base_delay > self.backoff.max_delay {
            return Err(Error::invalid_config(format!(
                "controller '{}' base delay exceeds max delay",
                self.name
            )));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter_factor) {
            return Err(Error::invalid_config(format!(
                "controller '{}' jitter factor must be within [0, 1]",
                self.name
            )));
        }
        Ok(())
    }
}

/// State shared by every worker of a controller.
#[derive(Clone)]
struct Worker {
    controller: Arc<str>,
    queue: WorkQueue,
    reconciler: Arc<dyn Reconcile>,
    backoff: Arc<BackoffTracker>,
}

impl Worker {
    async fn run(self, id: usize) {
        debug!(controller = %self.controller, worker = id, "Worker started");
        while self.process_next().await {}
        debug!(controller = %self.controller, worker = id, "Worker stopped");
    }

    async fn process_next(&self) -> bool {
        let Some(key) = self.queue.dequeue().await else {
            return false;
        };
        let span = info_span!("reconcile", controller = %self.controller, key = %key);
        self.process(&key).instrument(span).await;
        self.queue.done(&key);
        true
    }

    async fn process(&self, key: &ObjectKey) {
        match self.reconciler.reconcile(key).await {
            Ok(outcome) => {
                self.backoff.forget(key);
                debug!(action = %outcome.action.description(key), "Reconciled");
                match outcome.requeue {
                    Requeue::None => {}
                    Requeue::Immediate => self.queue.enqueue(key.clone()),
                    Requeue::After(delay) => self.queue.requeue_after(key.clone(), delay),
                }
            }
            Err(err) if err.is_conflict() => {
                let delay = self.backoff.policy().base_delay;
                warn!(
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Conflicting write, requeueing"
                );
                self.queue.requeue_after(key.clone(), delay);
            }
            Err(err) => {
                let delay = self.backoff.next_delay(key);
                error!(
                    error = %err,
                    failures = self.backoff.failures(key),
                    delay_ms = delay.as_millis() as u64,
                    "Reconciliation failed"
                );
                self.queue.requeue_after(key.clone(), delay);
            }
        }
    }
}

/// Runs one reconciler against the keys its watch sources produce.
pub struct Controller {
    config: ControllerConfig,
    worker: Worker,
    multiplexer: Arc<WatchMultiplexer>,
}

impl Controller {
    pub fn new(
        config: ControllerConfig,
        store: Arc<dyn ObjectStore>,
        reconciler: Arc<dyn Reconcile>,
        sources: Vec<WatchSource>,
    ) -> Self {
        let queue = WorkQueue::new();
        let worker = Worker {
            controller: Arc::from(config.name.as_str()),
            queue: queue.clone(),
            reconciler,
            backoff: Arc::new(BackoffTracker::new(config.backoff.clone())),
        };
        let multiplexer = Arc::new(WatchMultiplexer::new(store, queue, sources));
        Self {
            config,
            worker,
            multiplexer,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.worker.queue
    }

    pub fn backoff(&self) -> &BackoffTracker {
        &self.worker.backoff
    }

    /// Reconcile one key from the queue on the calling task.
    ///
    /// Returns `false` once the queue has shut down.
    pub async fn process_next(&self) -> bool {
        self.worker.process_next().await
    }

    /// Run the watch multiplexer and the worker pool until `shutdown` is set.
    ///
    /// In-flight reconciliations finish before this returns. Keys still
    /// pending are dropped; the next start resyncs them from the store.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.config.validate()?;
        info!(
            controller = %self.config.name,
            workers = self.config.workers,
            "Starting controller"
        );

        let watcher = {
            let multiplexer = self.multiplexer.clone();
            let resync = self.config.resync_on_start;
            tokio::spawn(async move { multiplexer.run(shutdown, resync).await })
        };

        let workers: Vec<_> = (0..self.config.workers)
            .map(|id| tokio::spawn(self.worker.clone().run(id)))
            .collect();

        let result = match watcher.await {
            Ok(result) => result,
            Err(err) => Err(Error::task_failed(
                format!("{} watcher", self.config.name),
                err.to_string(),
            )),
        };

        self.worker.queue.shutdown();
        for handle in workers {
            if let Err(err) = handle.await {
                error!(controller = %self.config.name, error = %err, "Worker task failed");
            }
        }

        match &result {
            Ok(()) => info!(controller = %self.config.name, "Controller stopped"),
            Err(err) => error!(controller = %self.config.name, error = %err, "Controller failed"),
        }
        result
    }
}

/// The controller that reconciles applications into workloads.
///
/// Watches applications directly, workloads through their owner, and pods
/// through the owner label the status projection selects them by.
pub fn application_controller(store: Arc<dyn ObjectStore>, config: ControllerConfig) -> Controller {
    let sources = vec![
        WatchSource::primary(Kind::Application),
        WatchSource::owned(Kind::Workload, Kind::Application, store.clone()),
        WatchSource::labelled(Kind::Pod, OWNER_LABEL),
    ];
    let reconciler = Arc::new(ApplicationReconciler::new(store.clone()));
    Controller::new(config, store, reconciler, sources)
}
