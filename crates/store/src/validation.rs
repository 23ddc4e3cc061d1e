//! Schema checks applied at the store's write boundary.
//!
//! Records that reach the reconciler have already passed these checks.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::resources::{Application, ApplicationContainer, ApplicationContainerPort, StoredObject};

/// Longest accepted port name.
pub const MAX_PORT_NAME_LEN: usize = 15;
/// Longest accepted cpu or memory limit string.
pub const MAX_LIMIT_LEN: usize = 15;
const PORT_RANGE: std::ops::RangeInclusive<u32> = 1..=65535;

/// Validate any object before it is written.
///
/// Only applications carry user-authored schema; other kinds pass through.
pub fn validate(object: &StoredObject) -> Result<()> {
    if object.metadata().name.is_empty() {
        return Err(Error::validation("metadata.name must not be empty"));
    }
    match object {
        StoredObject::Application(app) => validate_application(app),
        StoredObject::Workload(_) | StoredObject::Pod(_) => Ok(()),
    }
}

/// Validate an application spec.
pub fn validate_application(app: &Application) -> Result<()> {
    let containers = &app.spec.containers;
    if containers.is_empty() {
        return Err(Error::validation("spec.containers must not be empty"));
    }

    let mut seen = HashSet::new();
    for container in containers {
        validate_container(container)?;
        if !seen.insert(container.name.as_str()) {
            return Err(Error::validation(format!(
                "duplicate container name '{}'",
                container.name
            )));
        }
    }
    Ok(())
}

fn validate_container(container: &ApplicationContainer) -> Result<()> {
    if container.name.is_empty() {
        return Err(Error::validation("container name must not be empty"));
    }
    if container.image.is_empty() {
        return Err(Error::validation(format!(
            "container '{}': image must not be empty",
            container.name
        )));
    }
    if container.ports.is_empty() {
        return Err(Error::validation(format!(
            "container '{}': at least one port is required",
            container.name
        )));
    }
    for port in &container.ports {
        validate_port(&container.name, port)?;
    }
    bounded("cpu_limit", &container.name, &container.cpu_limit, MAX_LIMIT_LEN)?;
    bounded(
        "memory_limit",
        &container.name,
        &container.memory_limit,
        MAX_LIMIT_LEN,
    )
}

fn validate_port(container: &str, port: &ApplicationContainerPort) -> Result<()> {
    bounded("port name", container, &port.name, MAX_PORT_NAME_LEN)?;
    for (field, value) in [("host_port", port.host_port), ("container_port", port.container_port)] {
        if !PORT_RANGE.contains(&value) {
            return Err(Error::validation(format!(
                "container '{container}': {field} {value} outside 1..=65535"
            )));
        }
    }
    Ok(())
}

fn bounded(field: &str, container: &str, value: &str, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len == 0 || len > max {
        return Err(Error::validation(format!(
            "container '{container}': {field} must be 1..={max} characters, got {len}"
        )));
    }
    Ok(())
}
