//! Resource definitions: applications, the workloads they own, and pods.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Kind, ObjectKey, ObjectMeta};

// --- Application ---

/// A named port exposed by an application container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationContainerPort {
    pub name: String,
    pub host_port: u32,
    pub container_port: u32,
}

/// One container of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationContainer {
    pub name: String,
    pub image: String,
    pub ports: Vec<ApplicationContainerPort>,
    pub cpu_limit: String,
    pub memory_limit: String,
}

/// Desired state of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSpec {
    pub containers: Vec<ApplicationContainer>,
    /// `None` leaves the replica count unmanaged.
    #[serde(default)]
    pub replicas: Option<u32>,
}

/// Observed state of an application, derived from its workload and pods.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationStatus {
    pub replicas: u32,
    #[serde(default)]
    pub pods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub metadata: ObjectMeta,
    pub spec: ApplicationSpec,
    #[serde(default)]
    pub status: ApplicationStatus,
}

impl Application {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: ApplicationSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: ApplicationStatus::default(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }
}

// --- Workload ---

/// A port on a runtime container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPort {
    pub name: String,
    pub host_port: u32,
    pub container_port: u32,
}

/// Resource constraints of a runtime container, keyed by resource name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
}

/// Runtime container as the orchestrator consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    pub name: String,
    pub image: String,
    pub ports: Vec<ContainerPort>,
    #[serde(default)]
    pub resources: ResourceRequirements,
}

/// Template the orchestrator stamps pods from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodTemplate {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub containers: Vec<ContainerDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    #[serde(default)]
    pub replicas: Option<u32>,
    pub selector: crate::types::LabelSelector,
    pub template: PodTemplate,
}

/// Written by the orchestrator as it converges on the replica target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    pub replicas: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub metadata: ObjectMeta,
    pub spec: WorkloadSpec,
    #[serde(default)]
    pub status: WorkloadStatus,
}

impl Workload {
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }
}

// --- Pod ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodStatus {
    pub phase: PodPhase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: PodStatus,
}

impl Pod {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, labels: BTreeMap<String, String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name).with_labels(labels),
            status: PodStatus::default(),
        }
    }
}

// --- Type-tagged envelope ---

/// Any object the store can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StoredObject {
    Application(Application),
    Workload(Workload),
    Pod(Pod),
}

impl StoredObject {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Application(_) => Kind::Application,
            Self::Workload(_) => Kind::Workload,
            Self::Pod(_) => Kind::Pod,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Application(app) => &app.metadata,
            Self::Workload(workload) => &workload.metadata,
            Self::Pod(pod) => &pod.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Application(app) => &mut app.metadata,
            Self::Workload(workload) => &mut workload.metadata,
            Self::Pod(pod) => &mut pod.metadata,
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata().key()
    }

    /// Copy `other`'s status sub-record into `self`, keeping everything else.
    ///
    /// Fails when the two objects are of different kinds.
    pub fn with_status_of(self, other: &StoredObject) -> Result<Self> {
        match (self, other) {
            (Self::Application(mut app), Self::Application(src)) => {
                app.status = src.status.clone();
                Ok(Self::Application(app))
            }
            (Self::Workload(mut workload), Self::Workload(src)) => {
                workload.status = src.status.clone();
                Ok(Self::Workload(workload))
            }
            (Self::Pod(mut pod), Self::Pod(src)) => {
                pod.status = src.status.clone();
                Ok(Self::Pod(pod))
            }
            (this, _) => Err(Error::unexpected_kind(this.kind(), other.kind())),
        }
    }

    pub fn into_application(self) -> Result<Application> {
        match self {
            Self::Application(app) => Ok(app),
            other => Err(Error::unexpected_kind(Kind::Application, other.kind())),
        }
    }

    pub fn into_workload(self) -> Result<Workload> {
        match self {
            Self::Workload(workload) => Ok(workload),
            other => Err(Error::unexpected_kind(Kind::Workload, other.kind())),
        }
    }

    pub fn into_pod(self) -> Result<Pod> {
        match self {
            Self::Pod(pod) => Ok(pod),
            other => Err(Error::unexpected_kind(Kind::Pod, other.kind())),
        }
    }
}

impl From<Application> for StoredObject {
    fn from(app: Application) -> Self {
        Self::Application(app)
    }
}

impl From<Workload> for StoredObject {
    fn from(workload: Workload) -> Self {
        Self::Workload(workload)
    }
}

impl From<Pod> for StoredObject {
    fn from(pod: Pod) -> Self {
        Self::Pod(pod)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nginx_spec(replicas: Option<u32>) -> ApplicationSpec {
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
            replicas,
        }
    }

    #[test]
    fn test_missing_replicas_deserializes_as_unspecified() {
        let spec: Option<ApplicationSpec> = serde_json::from_value(json!({
            "containers": [{
                "name": "nginx",
                "image": "nginx:latest",
                "ports": [{"name": "default", "host_port": 80, "container_port": 80}],
                "cpu_limit": "test",
                "memory_limit": "test"
            }]
        }))
        .ok();

        assert_eq!(spec, Some(nginx_spec(None)));
    }

    #[test]
    fn test_envelope_is_tagged_by_kind() {
        let object = StoredObject::from(Application::new("ns", "x", nginx_spec(Some(2))));
        let value = serde_json::to_value(&object).unwrap_or_default();

        assert_eq!(value.get("kind"), Some(&json!("Application")));
        assert_eq!(object.kind(), Kind::Application);
    }

    #[test]
    fn test_with_status_of_rejects_kind_mismatch() {
        let app = StoredObject::from(Application::new("ns", "x", nginx_spec(None)));
        let pod = StoredObject::from(Pod::new("ns", "x-1", BTreeMap::new()));

        assert!(app.with_status_of(&pod).is_err());
    }

    #[test]
    fn test_with_status_of_keeps_spec() {
        let mut observed = Application::new("ns", "x", nginx_spec(Some(1)));
        observed.status.replicas = 4;
        let incoming = StoredObject::from(Application::new("ns", "x", nginx_spec(Some(3))));

        let merged = incoming
            .with_status_of(&StoredObject::from(observed))
            .and_then(StoredObject::into_application);

        assert_eq!(merged.as_ref().map(|a| a.spec.replicas), Ok(Some(3)));
        assert_eq!(merged.map(|a| a.status.replicas), Ok(4));
    }
}
