//! Property-based tests for the in-memory object store.
//!
//! Properties verified:
//! - Every successful write bumps the version; a stale token always conflicts
//! - Listing by selector returns exactly the matching objects, in insertion order
//! - Deleting an owner removes every transitive dependent

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;

use harbor_store::{
    Application, ApplicationContainer, ApplicationContainerPort, ApplicationSpec, InMemoryStore,
    Kind, LabelSelector, ObjectKey, ObjectStore, OwnerReference, Pod, StoredObject,
};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime creation should succeed")
}

fn application(name: &str, replicas: u32) -> StoredObject {
    Application::new(
        "ns",
        name,
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
            replicas: Some(replicas),
        },
    )
    .into()
}

fn labelled_pod(name: &str, owner: &str) -> StoredObject {
    let labels = BTreeMap::from([
        ("role".to_string(), "application".to_string()),
        ("owner".to_string(), owner.to_string()),
    ]);
    Pod::new("ns", name, labels).into()
}

fn owned_by(mut object: StoredObject, owner: &StoredObject) -> StoredObject {
    let reference = OwnerReference {
        kind: owner.kind(),
        name: owner.metadata().name.clone(),
        uid: owner.metadata().uid.expect("owner should be stored"),
        controller: true,
        block_owner_deletion: true,
    };
    object.metadata_mut().owner_references.push(reference);
    object
}

proptest! {
    #[test]
    fn prop_stale_version_always_conflicts(replicas in prop::collection::vec(0u32..10, 1..20)) {
        let rt = runtime();
        rt.block_on(async {
            let store = InMemoryStore::new();
            let mut current = store.create(application("x", 1)).await.unwrap();

            for target in replicas {
                let stale = current.clone();
                let mut next = current.clone().into_application().unwrap();
                next.spec.replicas = Some(target);

                let written = store.update(next.into()).await.unwrap();
                prop_assert!(
                    written.metadata().resource_version > stale.metadata().resource_version
                );

                let err = store.update(stale).await.unwrap_err();
                prop_assert!(err.is_conflict());
                current = written;
            }
            Ok(())
        })?;
    }

    #[test]
    fn prop_list_returns_matching_objects_in_insertion_order(
        owners in prop::collection::vec(prop::sample::select(vec!["x", "y", "z"]), 0..30)
    ) {
        let rt = runtime();
        rt.block_on(async {
            let store = InMemoryStore::new();
            for (index, owner) in owners.iter().enumerate() {
                store
                    .create(labelled_pod(&format!("pod-{index}"), owner))
                    .await
                    .unwrap();
            }

            let selector = LabelSelector::from_labels(BTreeMap::from([
                ("role".to_string(), "application".to_string()),
                ("owner".to_string(), "x".to_string()),
            ]));
            let listed: Vec<String> = store
                .list(Kind::Pod, Some("ns"), &selector)
                .await
                .unwrap()
                .into_iter()
                .map(|object| object.metadata().name.clone())
                .collect();

            let expected: Vec<String> = owners
                .iter()
                .enumerate()
                .filter(|(_, owner)| **owner == "x")
                .map(|(index, _)| format!("pod-{index}"))
                .collect();
            prop_assert_eq!(listed, expected);
            Ok(())
        })?;
    }

    #[test]
    fn prop_delete_collects_every_dependent(pods in 0usize..10) {
        let rt = runtime();
        rt.block_on(async {
            let store = InMemoryStore::new();
            let app = store.create(application("x", 1)).await.unwrap();
            let bystander = store.create(application("y", 1)).await.unwrap();

            let mut workload_owner = application("x-child", 1);
            workload_owner = owned_by(workload_owner, &app);
            let child = store.create(workload_owner).await.unwrap();
            for index in 0..pods {
                let pod = owned_by(labelled_pod(&format!("x-{index}"), "x"), &child);
                store.create(pod).await.unwrap();
            }
            store
                .create(owned_by(labelled_pod("y-0", "y"), &bystander))
                .await
                .unwrap();

            store.delete(Kind::Application, &ObjectKey::new("ns", "x")).await.unwrap();

            prop_assert_eq!(store.count(Kind::Application).await, 1);
            prop_assert_eq!(store.count(Kind::Pod).await, 1);
            Ok(())
        })?;
    }
}
