//! Installed-package records.
//!
//! Every import leaves a [`PackageInfo`] naming the objects it installed
//! and a content hash of each as installed. Ownership checks during
//! validation and "modified since install" warnings read these records.

pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::repository::StoredObject;

pub use store::PackageStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PackageStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

/// One object installed by a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageElement {
    pub type_code: String,
    pub source_id: String,
    pub target_id: String,
    pub name: String,
    /// Content hash of the object right after install.
    pub baseline: String,
}

impl PackageElement {
    pub fn from_installed(source_id: &str, object: &StoredObject) -> Self {
        Self {
            type_code: object.type_code.clone(),
            source_id: source_id.to_string(),
            target_id: object.id.clone(),
            name: object.name.clone(),
            baseline: object.content_hash(),
        }
    }

    /// True when `current` no longer matches the recorded baseline.
    pub fn is_modified(&self, current: &StoredObject) -> bool {
        current.content_hash() != self.baseline
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: PackageStatus,
    pub archive_log_id: String,
    pub source_server: String,
    pub installed_at: DateTime<Utc>,
    #[serde(default)]
    pub elements: Vec<PackageElement>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub communities: Vec<String>,
}

impl PackageInfo {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        archive_log_id: impl Into<String>,
        source_server: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            status: PackageStatus::Pending,
            archive_log_id: archive_log_id.into(),
            source_server: source_server.into(),
            installed_at: Utc::now(),
            elements: Vec::new(),
            depends_on: Vec::new(),
            communities: Vec::new(),
        }
    }

    pub fn element(&self, type_code: &str, target_id: &str) -> Option<&PackageElement> {
        self.elements
            .iter()
            .find(|e| e.type_code == type_code && e.target_id == target_id)
    }

    /// Record an installed object, replacing an earlier entry for the same target.
    pub fn add_element(&mut self, element: PackageElement) {
        match self
            .elements
            .iter_mut()
            .find(|e| e.type_code == element.type_code && e.target_id == element.target_id)
        {
            Some(existing) => *existing = element,
            None => self.elements.push(element),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn modification_is_detected_by_content_hash() {
        let object = StoredObject::new("Acl", "40", "editors").with_body(json!({"read": true}));
        let element = PackageElement::from_installed("1", &object);
        assert!(!element.is_modified(&object));

        let edited = object.clone().with_body(json!({"read": false}));
        assert!(element.is_modified(&edited));
    }

    #[test]
    fn add_element_replaces_same_target() {
        let mut info = PackageInfo::new("articles", "1.0.0", "log", "src");
        let a = StoredObject::new("Acl", "40", "editors");
        info.add_element(PackageElement::from_installed("1", &a));
        info.add_element(PackageElement::from_installed(
            "1",
            &a.clone().with_body(json!({"x": 1})),
        ));
        assert_eq!(info.elements.len(), 1);
        assert!(info.element("Acl", "40").is_some());
    }
}
