//! Strongly-typed identifiers for PLUM entities
//!
//! Deployment ids are UUID-based; plugin identity is a `(name, version)`
//! pair validated to be DNS-label safe at construction.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a deployment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentId(Uuid);

impl DeploymentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deploy:{}", self.0)
    }
}

/// Errors raised when constructing a [`PluginKey`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PluginKeyError {
    /// Name is empty.
    #[error("plugin name is empty")]
    EmptyName,

    /// Name is longer than a DNS label allows.
    #[error("plugin name {0:?} exceeds 63 characters")]
    NameTooLong(String),

    /// Name contains characters outside `[a-z0-9-]` or has a leading or
    /// trailing hyphen.
    #[error("plugin name {0:?} is not a valid DNS label")]
    InvalidName(String),
}

/// Immutable identity of a plugin: a DNS-label-safe name plus a version
///
/// Identity never changes once a deployment is admitted; a new version of
/// the same plugin is a distinct key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginKey {
    name: String,
    version: semver::Version,
}

impl PluginKey {
    /// Create a plugin key, validating the name as a DNS label.
    pub fn new(name: impl Into<String>, version: semver::Version) -> Result<Self, PluginKeyError> {
        let name = name.into();

        if name.is_empty() {
            return Err(PluginKeyError::EmptyName);
        }
        if name.len() > 63 {
            return Err(PluginKeyError::NameTooLong(name));
        }

        let label_safe = name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
        if !label_safe || name.starts_with('-') || name.ends_with('-') {
            return Err(PluginKeyError::InvalidName(name));
        }

        Ok(Self { name, version })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &semver::Version {
        &self.version
    }
}

impl fmt::Display for PluginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Name of a target region
///
/// Order is significant when a deployment rolls out sequentially.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region(String);

impl Region {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Region {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> semver::Version {
        semver::Version::parse(s).unwrap()
    }

    #[test]
    fn test_deployment_id_generation() {
        let id1 = DeploymentId::generate();
        let id2 = DeploymentId::generate();
        assert_ne!(id1, id2);
        assert!(format!("{}", id1).starts_with("deploy:"));
    }

    #[test]
    fn test_plugin_key_display() {
        let key = PluginKey::new("payments", v("1.2.3")).unwrap();
        assert_eq!(format!("{}", key), "payments@1.2.3");
    }

    #[test]
    fn test_plugin_key_rejects_bad_names() {
        assert_eq!(
            PluginKey::new("", v("1.0.0")),
            Err(PluginKeyError::EmptyName)
        );
        assert!(matches!(
            PluginKey::new("Payments", v("1.0.0")),
            Err(PluginKeyError::InvalidName(_))
        ));
        assert!(matches!(
            PluginKey::new("-edge", v("1.0.0")),
            Err(PluginKeyError::InvalidName(_))
        ));
        assert!(matches!(
            PluginKey::new("a".repeat(64), v("1.0.0")),
            Err(PluginKeyError::NameTooLong(_))
        ));
    }
}
