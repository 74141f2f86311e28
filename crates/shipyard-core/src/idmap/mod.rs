//! Source-to-target identifier translation.
//!
//! One [`IdMap`] exists per source server. Each [`IdMapping`] records how a
//! source object id translates to the target server: either to an existing
//! target id, or as a new object that will receive a fresh id on install.

pub mod mapper;
pub mod store;

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};

pub use mapper::prepare_mappings;
pub use store::IdMapStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapping {
    pub type_code: String,
    pub source_id: String,
    pub source_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
    #[serde(default)]
    pub is_new_object: bool,
}

impl IdMapping {
    /// Mapping to an object that already exists on the target.
    pub fn existing(
        type_code: impl Into<String>,
        source_id: impl Into<String>,
        source_name: impl Into<String>,
        target_id: impl Into<String>,
        target_name: impl Into<String>,
    ) -> Self {
        Self {
            type_code: type_code.into(),
            source_id: source_id.into(),
            source_name: source_name.into(),
            target_id: Some(target_id.into()),
            target_name: Some(target_name.into()),
            is_new_object: false,
        }
    }

    /// Mapping for an object that will be created on the target.
    pub fn new_object(
        type_code: impl Into<String>,
        source_id: impl Into<String>,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            type_code: type_code.into(),
            source_id: source_id.into(),
            source_name: source_name.into(),
            target_id: None,
            target_name: None,
            is_new_object: true,
        }
    }

    /// A saved mapping needs a target id or the new-object flag.
    pub fn is_complete(&self) -> bool {
        self.target_id.is_some() || self.is_new_object
    }

    fn matches(&self, type_code: &str, source_id: &str) -> bool {
        self.type_code == type_code && self.source_id == source_id
    }
}

/// Ordered identifier mappings for one source server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMap {
    pub source_server: String,
    #[serde(default)]
    pub mappings: Vec<IdMapping>,
}

impl IdMap {
    pub fn new(source_server: impl Into<String>) -> Self {
        Self {
            source_server: source_server.into(),
            mappings: Vec::new(),
        }
    }

    pub fn get(&self, type_code: &str, source_id: &str) -> Option<&IdMapping> {
        self.mappings
            .iter()
            .find(|mapping| mapping.matches(type_code, source_id))
    }

    /// Target id for a source id, when one has been assigned.
    pub fn target_id(&self, type_code: &str, source_id: &str) -> Option<&str> {
        self.get(type_code, source_id)
            .and_then(|mapping| mapping.target_id.as_deref())
    }

    /// Insert or replace the mapping for `(type_code, source_id)`, keeping its position.
    pub fn add_mapping(&mut self, mapping: IdMapping) {
        match self
            .mappings
            .iter_mut()
            .find(|existing| existing.matches(&mapping.type_code, &mapping.source_id))
        {
            Some(existing) => *existing = mapping,
            None => self.mappings.push(mapping),
        }
    }

    pub fn remove(&mut self, type_code: &str, source_id: &str) -> Option<IdMapping> {
        let index = self
            .mappings
            .iter()
            .position(|mapping| mapping.matches(type_code, source_id))?;
        Some(self.mappings.remove(index))
    }

    /// Record the id an installed object received on the target.
    pub fn record_installed(
        &mut self,
        type_code: &str,
        source_id: &str,
        source_name: &str,
        target_id: &str,
        target_name: &str,
    ) {
        self.add_mapping(IdMapping::existing(
            type_code,
            source_id,
            source_name,
            target_id,
            target_name,
        ));
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Reject maps holding a mapping with neither target id nor new-object flag.
    pub fn validate(&self) -> Result<()> {
        if let Some(incomplete) = self.mappings.iter().find(|m| !m.is_complete()) {
            return Err(DeployError::IncompleteMapping {
                server: self.source_server.clone(),
                type_code: incomplete.type_code.clone(),
                source_id: incomplete.source_id.clone(),
            });
        }
        Ok(())
    }
}
