//! Container identity derivation
//!
//! A container name is derived from the configured template and is the
//! only key used to find an existing container, so it must be stable
//! across restarts and unique per user.

use crate::{CoreError, Result};
use lxdspawn_provider::ContainerName;

/// LXD instance names are hostnames
const MAX_NAME_LEN: usize = 63;

/// Derive the container name for a user from a name template
pub fn derive_identity(template: &str, username: &str) -> Result<ContainerName> {
    let name = lxdspawn_config::expand_name_template(template, username)?;
    validate_container_name(&name)?;
    Ok(ContainerName::new(name))
}

/// Check that a name is usable as an LXD instance name
pub fn validate_container_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| CoreError::InvalidIdentity {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name is longer than 63 characters"));
    }
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(invalid("name must start with a letter"));
    }
    if name.ends_with('-') {
        return Err(invalid("name must not end with '-'"));
    }
    if let Some(c) = name.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '-') {
        return Err(invalid(&format!("character '{}' is not allowed", c)));
    }
    Ok(())
}
