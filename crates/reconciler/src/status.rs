//! Projection of observed state onto an application's status.

use harbor_store::{ApplicationStatus, Pod, Workload};
use itertools::Itertools;

/// The status an application should report for `workload` and the pods
/// currently matching its labels.
///
/// Pod names keep the order the store listed them in.
pub fn project_status(workload: &Workload, pods: &[Pod]) -> ApplicationStatus {
    ApplicationStatus {
        replicas: workload.status.replicas,
        pods: pods
            .iter()
            .map(|pod| pod.metadata.name.clone())
            .collect_vec(),
    }
}

/// Whether writing `projected` would change `current`.
///
/// Order matters: a reordered pod list counts as a change.
pub fn status_changed(current: &ApplicationStatus, projected: &ApplicationStatus) -> bool {
    current != projected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::labels_for_application;
    use harbor_store::{LabelSelector, ObjectMeta, PodTemplate, WorkloadSpec, WorkloadStatus};

    fn workload(observed: u32) -> Workload {
        Workload {
            metadata: ObjectMeta::new("ns", "x"),
            spec: WorkloadSpec {
                replicas: Some(2),
                selector: LabelSelector::everything(),
                template: PodTemplate::default(),
            },
            status: WorkloadStatus { replicas: observed },
        }
    }

    fn pods(names: &[&str]) -> Vec<Pod> {
        names
            .iter()
            .map(|name| Pod::new("ns", *name, labels_for_application("x")))
            .collect()
    }

    #[test]
    fn test_projection_copies_observed_replicas_and_pod_names() {
        let status = project_status(&workload(2), &pods(&["x-1", "x-2"]));
        assert_eq!(
            status,
            ApplicationStatus {
                replicas: 2,
                pods: vec!["x-1".to_string(), "x-2".to_string()],
            }
        );
    }

    #[test]
    fn test_projection_preserves_list_order() {
        let status = project_status(&workload(2), &pods(&["b", "a"]));
        assert_eq!(status.pods, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_observed_replicas_win_over_target() {
        let status = project_status(&workload(0), &[]);
        assert_eq!(status.replicas, 0);
        assert!(status.pods.is_empty());
    }

    #[test]
    fn test_status_changed() {
        let current = project_status(&workload(2), &pods(&["a", "b"]));
        assert!(!status_changed(&current, &current.clone()));
        assert!(status_changed(&current, &project_status(&workload(2), &pods(&["b", "a"]))));
        assert!(status_changed(&current, &project_status(&workload(3), &pods(&["a", "b"]))));
    }
}
