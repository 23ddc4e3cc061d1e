//! Identity and metadata types shared by every stored resource.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier assigned by the store when an object is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(Ulid);

impl Uid {
    /// Create a new random uid.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Create from a ULID.
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Get the inner ULID.
    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for Uid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kinds of resources the store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    /// User-authored desired state.
    Application,
    /// Child workload owned by an application.
    Workload,
    /// Runtime pod spawned by the orchestrator.
    Pod,
}

impl Kind {
    /// All kinds, in a stable order.
    pub const ALL: [Kind; 3] = [Kind::Application, Kind::Workload, Kind::Pod];

    /// Kind name as recorded in owner references.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Application => "Application",
            Self::Workload => "Workload",
            Self::Pod => "Pod",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespace and name of one object; the unit of reconciliation work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Back-reference from a dependent object to the object that owns it.
///
/// The store's garbage collector deletes dependents whose owner is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: Kind,
    pub name: String,
    pub uid: Uid,
    /// Marks the managing owner; at most one reference should set this.
    #[serde(default)]
    pub controller: bool,
    #[serde(default)]
    pub block_owner_deletion: bool,
}

/// Metadata carried by every stored object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    /// Assigned on create; `None` for objects not yet stored.
    #[serde(default)]
    pub uid: Option<Uid>,
    /// Optimistic-concurrency version token. Zero until stored.
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Metadata for a new, not yet stored object.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: None,
            resource_version: 0,
            labels: BTreeMap::new(),
            owner_references: Vec::new(),
            creation_timestamp: None,
        }
    }

    /// Builder-style label setter.
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// The key identifying this object.
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    /// The owner reference flagged as controller, if any.
    pub fn controller_owner(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|owner| owner.controller)
    }

    /// Whether any owner reference points at `uid`.
    pub fn is_owned_by(&self, uid: Uid) -> bool {
        self.owner_references.iter().any(|owner| owner.uid == uid)
    }
}

/// Equality-based label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Selector matching every object.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn from_labels(match_labels: BTreeMap<String, String>) -> Self {
        Self { match_labels }
    }

    /// True when every selector pair is present in `labels`.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_object_key_display() {
        assert_eq!(ObjectKey::new("ns", "x").to_string(), "ns/x");
    }

    #[test]
    fn test_selector_requires_every_pair() {
        let selector = LabelSelector::from_labels(labels(&[("role", "application"), ("owner", "x")]));

        assert!(selector.matches(&labels(&[("role", "application"), ("owner", "x"), ("extra", "1")])));
        assert!(!selector.matches(&labels(&[("role", "application"), ("owner", "y")])));
        assert!(!selector.matches(&labels(&[("role", "application")])));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        assert!(LabelSelector::everything().matches(&BTreeMap::new()));
    }

    #[test]
    fn test_controller_owner_lookup() {
        let uid = Uid::new();
        let mut meta = ObjectMeta::new("ns", "x");
        meta.owner_references.push(OwnerReference {
            kind: Kind::Application,
            name: "x".to_string(),
            uid,
            controller: true,
            block_owner_deletion: true,
        });

        assert_eq!(meta.controller_owner().map(|o| o.uid), Some(uid));
        assert!(meta.is_owned_by(uid));
        assert!(!meta.is_owned_by(Uid::new()));
    }
}
