//! Builds the workload an application owns.

use std::collections::BTreeMap;

use harbor_store::{
    Application, ApplicationContainer, ContainerDescriptor, ContainerPort, Kind, LabelSelector,
    ObjectMeta, OwnerReference, PodTemplate, ResourceRequirements, Workload, WorkloadSpec,
    WorkloadStatus,
};
use itertools::Itertools;

use crate::error::{Error, Result};

/// Label marking pods of application workloads.
pub const ROLE_LABEL: &str = "role";
/// Value of [`ROLE_LABEL`] on application pods.
pub const ROLE_VALUE: &str = "application";
/// Label carrying the owning application's name.
pub const OWNER_LABEL: &str = "owner";

/// Resource-limit key for cpu.
pub const CPU_RESOURCE: &str = "cpu";
/// Resource-limit key for memory.
pub const MEMORY_RESOURCE: &str = "memory";

/// Labels identifying the pods of application `name`.
pub fn labels_for_application(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (ROLE_LABEL.to_string(), ROLE_VALUE.to_string()),
        (OWNER_LABEL.to_string(), name.to_string()),
    ])
}

/// Selector recovering the pods of application `name`.
pub fn selector_for_application(name: &str) -> LabelSelector {
    LabelSelector::from_labels(labels_for_application(name))
}

/// Controller owner reference pointing at `app`.
///
/// `app` must have been read from the store so that its uid is known.
///
/// # Errors
///
/// [`Error::OwnerUidMissing`] if `app` carries no uid.
pub fn owner_reference(app: &Application) -> Result<OwnerReference> {
    let uid = app
        .metadata
        .uid
        .ok_or_else(|| Error::owner_uid_missing(app.key()))?;
    Ok(OwnerReference {
        kind: Kind::Application,
        name: app.metadata.name.clone(),
        uid,
        controller: true,
        block_owner_deletion: true,
    })
}

/// The workload `app` should own, with the owner reference already set.
///
/// # Errors
///
/// Fails rather than build an unowned workload when `app` has no uid.
pub fn build_workload(app: &Application) -> Result<Workload> {
    let owner = owner_reference(app)?;
    let labels = labels_for_application(&app.metadata.name);

    let mut metadata = ObjectMeta::new(&app.metadata.namespace, &app.metadata.name)
        .with_labels(labels.clone());
    metadata.owner_references.push(owner);

    Ok(Workload {
        metadata,
        spec: WorkloadSpec {
            replicas: app.spec.replicas,
            selector: LabelSelector::from_labels(labels.clone()),
            template: PodTemplate {
                labels,
                containers: app.spec.containers.iter().map(build_container).collect_vec(),
            },
        },
        status: WorkloadStatus::default(),
    })
}

fn build_container(container: &ApplicationContainer) -> ContainerDescriptor {
    let ports = container
        .ports
        .iter()
        .map(|port| ContainerPort {
            name: port.name.clone(),
            host_port: port.host_port,
            container_port: port.container_port,
        })
        .collect_vec();

    let limits = BTreeMap::from([
        (CPU_RESOURCE.to_string(), container.cpu_limit.clone()),
        (MEMORY_RESOURCE.to_string(), container.memory_limit.clone()),
    ]);

    ContainerDescriptor {
        name: container.name.clone(),
        image: container.image.clone(),
        ports,
        resources: ResourceRequirements { limits },
    }
}
