//! Literal identifier locations inside object payloads.
//!
//! An object body may embed ids of other objects as plain literals. Each
//! such location is recorded as an [`IdTypeMapping`] keyed by its structural
//! context (a JSON pointer). Once an operator assigns the location a type,
//! the literal can be translated through the [`crate::idmap::IdMap`] on
//! install, and referenced objects can be discovered as auto-dependencies.

pub mod handler;
pub mod store;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::DependencyKey;

pub use handler::{IdTypeHandler, JsonIdTypeHandler, TransformedObject};
pub use store::IdTypeStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IdType {
    /// Discovered but not yet classified.
    #[default]
    Undefined,
    /// Not an object id (a count, a port, ...); left untouched.
    Ignore,
    /// Id of an object of `type_code`; translated through the id map.
    Reference { type_code: String },
}

impl IdType {
    pub fn reference(type_code: impl Into<String>) -> Self {
        Self::Reference {
            type_code: type_code.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTypeMapping {
    /// JSON pointer to the literal inside the object body.
    pub context: String,
    /// Literal value found at `context`.
    pub value: String,
    #[serde(default)]
    pub id_type: IdType,
}

impl IdTypeMapping {
    pub fn undefined(context: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            value: value.into(),
            id_type: IdType::Undefined,
        }
    }
}

/// All literal-id locations of one dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyIdTypes {
    pub key: DependencyKey,
    #[serde(default)]
    pub mappings: Vec<IdTypeMapping>,
}

impl DependencyIdTypes {
    pub fn new(key: DependencyKey) -> Self {
        Self {
            key,
            mappings: Vec::new(),
        }
    }

    pub fn get(&self, context: &str) -> Option<&IdTypeMapping> {
        self.mappings.iter().find(|m| m.context == context)
    }

    /// Assign a type to the location at `context`. Returns false if unknown.
    pub fn set_type(&mut self, context: &str, id_type: IdType) -> bool {
        match self.mappings.iter_mut().find(|m| m.context == context) {
            Some(mapping) => {
                mapping.id_type = id_type;
                true
            }
            None => false,
        }
    }

    /// True once no location remains undefined.
    pub fn is_complete(&self) -> bool {
        self.mappings
            .iter()
            .all(|m| m.id_type != IdType::Undefined)
    }

    pub fn undefined(&self) -> impl Iterator<Item = &IdTypeMapping> {
        self.mappings
            .iter()
            .filter(|m| m.id_type == IdType::Undefined)
    }

    /// Referenced objects as dependency keys, in location order.
    pub fn references(&self) -> impl Iterator<Item = DependencyKey> + '_ {
        self.mappings.iter().filter_map(|m| match &m.id_type {
            IdType::Reference { type_code } => Some(DependencyKey::new(type_code, &m.value)),
            _ => None,
        })
    }

    /// Reconcile with the locations found in the live object.
    ///
    /// Locations are matched by structural context. Unchanged locations keep
    /// their assigned type; locations whose literal changed are removed and
    /// reinserted with the new value, carrying the assigned type over;
    /// locations no longer present are pruned; new ones are appended as
    /// undefined.
    pub fn fixup_mappings(&mut self, discovered: &DependencyIdTypes) {
        let live: HashMap<&str, &str> = discovered
            .mappings
            .iter()
            .map(|m| (m.context.as_str(), m.value.as_str()))
            .collect();

        let mut carried: HashMap<String, IdType> = HashMap::new();
        self.mappings.retain(|existing| match live.get(existing.context.as_str()) {
            Some(value) if *value == existing.value => true,
            Some(_) => {
                carried.insert(existing.context.clone(), existing.id_type.clone());
                false
            }
            None => false,
        });

        for found in &discovered.mappings {
            if self.get(&found.context).is_some() {
                continue;
            }
            let id_type = carried.remove(&found.context).unwrap_or_default();
            self.mappings.push(IdTypeMapping {
                context: found.context.clone(),
                value: found.value.clone(),
                id_type,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> DependencyKey {
        DependencyKey::new("ContentType", "301")
    }

    fn discovered(pairs: &[(&str, &str)]) -> DependencyIdTypes {
        let mut types = DependencyIdTypes::new(key());
        for (context, value) in pairs {
            types
                .mappings
                .push(IdTypeMapping::undefined(*context, *value));
        }
        types
    }

    #[test]
    fn fixup_preserves_assigned_types() {
        let mut existing = discovered(&[("/workflowid", "5")]);
        existing.set_type("/workflowid", IdType::reference("Workflow"));

        existing.fixup_mappings(&discovered(&[("/workflowid", "5"), ("/aclid", "9")]));

        assert_eq!(existing.mappings.len(), 2);
        assert_eq!(
            existing.get("/workflowid").unwrap().id_type,
            IdType::reference("Workflow")
        );
        assert_eq!(existing.get("/aclid").unwrap().id_type, IdType::Undefined);
    }

    #[test]
    fn fixup_prunes_vanished_locations() {
        let mut existing = discovered(&[("/a/id", "1"), ("/b/id", "2")]);
        existing.fixup_mappings(&discovered(&[("/b/id", "2")]));
        assert_eq!(existing.mappings.len(), 1);
        assert!(existing.get("/a/id").is_none());
    }

    #[test]
    fn fixup_reinserts_changed_value_at_same_context() {
        let mut existing = discovered(&[("/workflowid", "5"), ("/aclid", "9")]);
        existing.set_type("/workflowid", IdType::reference("Workflow"));

        existing.fixup_mappings(&discovered(&[("/workflowid", "6"), ("/aclid", "9")]));

        assert_eq!(existing.mappings.len(), 2);
        // Reinserted at the end with the new literal.
        assert_eq!(existing.mappings[1].context, "/workflowid");
        assert_eq!(existing.mappings[1].value, "6");
        assert_eq!(existing.mappings[1].id_type, IdType::reference("Workflow"));
    }

    #[test]
    fn fixup_is_idempotent() {
        let live = discovered(&[("/x/id", "1"), ("/y/id", "2")]);
        let mut once = DependencyIdTypes::new(key());
        once.fixup_mappings(&live);
        let mut twice = once.clone();
        twice.fixup_mappings(&live);
        assert_eq!(once, twice);
    }

    #[test]
    fn references_only_lists_typed_locations() {
        let mut types = discovered(&[("/workflowid", "5"), ("/count_id", "3")]);
        types.set_type("/workflowid", IdType::reference("Workflow"));
        types.set_type("/count_id", IdType::Ignore);

        let refs: Vec<_> = types.references().collect();
        assert_eq!(refs, vec![DependencyKey::new("Workflow", "5")]);
        assert!(types.is_complete());
    }
}
