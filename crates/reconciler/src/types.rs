//! Core types for the reconciler.

use std::time::Duration;

use harbor_store::ObjectKey;
use serde::{Deserialize, Serialize};

/// What a single reconciliation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileAction {
    /// The application is gone; nothing to do.
    PrimaryAbsent,
    /// Created the missing workload.
    CreatedWorkload,
    /// Corrected the workload's replica target.
    ScaledWorkload { from: Option<u32>, to: u32 },
    /// Wrote a new projected status.
    UpdatedStatus,
    /// Observed state already matched; no writes.
    Converged,
}

impl ReconcileAction {
    /// Get a description of the action.
    pub fn description(&self, key: &ObjectKey) -> String {
        match self {
            Self::PrimaryAbsent => format!("application {key} absent"),
            Self::CreatedWorkload => format!("create workload {key}"),
            Self::ScaledWorkload { from, to } => match from {
                Some(from) => format!("scale workload {key} from {from} to {to}"),
                None => format!("scale workload {key} to {to}"),
            },
            Self::UpdatedStatus => format!("update status of {key}"),
            Self::Converged => format!("{key} converged"),
        }
    }
}

/// When the key should be looked at again, independent of watch events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Requeue {
    /// Only a future watch event re-triggers the key.
    #[default]
    None,
    /// Put the key straight back on the queue.
    Immediate,
    /// Put the key back after a delay.
    After(Duration),
}

/// Result of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub action: ReconcileAction,
    pub requeue: Requeue,
}

impl ReconcileOutcome {
    /// Finished; wait for the next event.
    pub fn done(action: ReconcileAction) -> Self {
        Self {
            action,
            requeue: Requeue::None,
        }
    }

    /// Finished this step; look again right away.
    pub fn requeue(action: ReconcileAction) -> Self {
        Self {
            action,
            requeue: Requeue::Immediate,
        }
    }

    /// Finished this step; look again after `delay`.
    pub fn requeue_after(action: ReconcileAction, delay: Duration) -> Self {
        Self {
            action,
            requeue: Requeue::After(delay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile_action_description() {
        let key = ObjectKey::new("ns", "x");
        let action = ReconcileAction::ScaledWorkload {
            from: Some(1),
            to: 3,
        };
        assert!(action.description(&key).contains("scale"));
        assert!(action.description(&key).contains("ns/x"));
    }

    #[test]
    fn test_action_serialization() {
        let action = ReconcileAction::ScaledWorkload { from: None, to: 2 };
        let json = serde_json::to_string(&action).ok();
        assert_eq!(
            json.as_deref(),
            Some(r#"{"ScaledWorkload":{"from":null,"to":2}}"#)
        );
        let back: Option<ReconcileAction> =
            json.and_then(|json| serde_json::from_str(&json).ok());
        assert_eq!(back, Some(action));
    }

    #[test]
    fn test_outcome_constructors() {
        assert_eq!(ReconcileOutcome::done(ReconcileAction::Converged).requeue, Requeue::None);
        assert_eq!(
            ReconcileOutcome::requeue(ReconcileAction::CreatedWorkload).requeue,
            Requeue::Immediate
        );
        assert_eq!(
            ReconcileOutcome::requeue_after(ReconcileAction::Converged, Duration::from_secs(1))
                .requeue,
            Requeue::After(Duration::from_secs(1))
        );
    }
}
