//! Boundary to the CMS object store.
//!
//! The engine never reads schema rows itself; it asks an [`ObjectStore`]
//! for typed objects. [`FsObjectStore`] keeps objects as JSON documents on
//! disk and backs the CLI; tests use in-memory implementations.

pub mod cached;
pub mod fs;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::types::{DependencyKey, DependencyKind};

pub use cached::{CachedObjectStore, SchemaCache};
pub use fs::FsObjectStore;

/// Declared reference from one object to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub type_code: String,
    pub id: String,
    #[serde(default)]
    pub kind: DependencyKind,
}

impl ObjectRef {
    pub fn new(type_code: impl Into<String>, id: impl Into<String>, kind: DependencyKind) -> Self {
        Self {
            type_code: type_code.into(),
            id: id.into(),
            kind,
        }
    }

    pub fn key(&self) -> DependencyKey {
        DependencyKey::new(&self.type_code, &self.id)
    }
}

/// A design-time object as held by the object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub type_code: String,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub body: Value,
    #[serde(default)]
    pub references: Vec<ObjectRef>,
}

impl StoredObject {
    pub fn new(type_code: impl Into<String>, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_code: type_code.into(),
            id: id.into(),
            name: name.into(),
            body: Value::Object(Map::new()),
            references: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_reference(mut self, reference: ObjectRef) -> Self {
        self.references.push(reference);
        self
    }

    pub fn key(&self) -> DependencyKey {
        DependencyKey::new(&self.type_code, &self.id)
    }

    /// Content hash of name, body and references; ignores the id so a copy
    /// installed under a new id hashes the same as its source.
    pub fn content_hash(&self) -> String {
        let value = serde_json::json!({
            "name": self.name,
            "body": self.body,
            "references": self.references,
        });
        hash_json(&value)
    }
}

/// Narrow interface the engine uses to read and write CMS objects.
pub trait ObjectStore: Send + Sync + fmt::Debug {
    fn load(&self, type_code: &str, id: &str) -> Result<Option<StoredObject>>;

    fn list(&self, type_code: &str) -> Result<Vec<StoredObject>>;

    fn save(&self, object: &StoredObject) -> Result<()>;

    /// Allocate a fresh id for a new object of `type_code`.
    fn next_id(&self, type_code: &str) -> Result<String>;

    fn find_by_name(&self, type_code: &str, name: &str) -> Result<Option<StoredObject>> {
        Ok(self
            .list(type_code)?
            .into_iter()
            .find(|object| object.name == name))
    }

    /// Drop any server-side object cache after structural changes.
    fn flush_cache(&self) {}
}

/// Deterministic blake3 hash of a JSON value with keys sorted.
pub fn hash_json(value: &Value) -> String {
    let normalized = normalize_json(value);
    let bytes = serde_json::to_vec(&normalized).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

fn normalize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            let mut normalized = Map::new();
            for key in keys {
                if let Some(child) = map.get(key) {
                    normalized.insert(key.clone(), normalize_json(child));
                }
            }
            Value::Object(normalized)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_json).collect()),
        _ => value.clone(),
    }
}
