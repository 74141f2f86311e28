//! Discovery and translation of literal ids in JSON object bodies.

use std::fmt;

use serde_json::Value;

use crate::error::{DeployError, Result};
use crate::idmap::IdMap;
use crate::repository::StoredObject;

use super::{DependencyIdTypes, IdType, IdTypeMapping};

/// Result of [`IdTypeHandler::transform_ids`].
///
/// The caller persists `id_types`; the handler never writes it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedObject {
    pub object: StoredObject,
    pub id_types: DependencyIdTypes,
}

pub trait IdTypeHandler: Send + Sync + fmt::Debug {
    /// Every literal-id location in `object`, each initially undefined.
    fn id_types(&self, object: &StoredObject) -> DependencyIdTypes;

    /// Rewrite typed literals through `id_map`.
    ///
    /// Returns the rewritten object together with id types whose values now
    /// hold the target-local ids.
    fn transform_ids(
        &self,
        object: &StoredObject,
        id_types: &DependencyIdTypes,
        id_map: &IdMap,
    ) -> Result<TransformedObject>;
}

/// Finds ids in JSON bodies: integers or all-digit strings under a property
/// whose name ends in `id`, and elements of arrays under a name ending in `ids`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonIdTypeHandler;

impl JsonIdTypeHandler {
    pub fn new() -> Self {
        Self
    }
}

impl IdTypeHandler for JsonIdTypeHandler {
    fn id_types(&self, object: &StoredObject) -> DependencyIdTypes {
        let mut types = DependencyIdTypes::new(object.key());
        collect_locations(&object.body, "", &mut types.mappings);
        types
    }

    fn transform_ids(
        &self,
        object: &StoredObject,
        id_types: &DependencyIdTypes,
        id_map: &IdMap,
    ) -> Result<TransformedObject> {
        if id_types.key != object.key() {
            return Err(DeployError::contract(format!(
                "id types for {} applied to {}",
                id_types.key,
                object.key()
            )));
        }

        let mut transformed = object.clone();
        let mut updated = id_types.clone();

        for mapping in &mut updated.mappings {
            let IdType::Reference { type_code } = &mapping.id_type else {
                continue;
            };
            let Some(target_id) = id_map.target_id(type_code, &mapping.value) else {
                continue;
            };
            let Some(slot) = transformed.body.pointer_mut(&mapping.context) else {
                tracing::warn!(
                    key = %object.key(),
                    context = %mapping.context,
                    "id location no longer present"
                );
                continue;
            };
            if literal(slot).as_deref() != Some(mapping.value.as_str()) {
                continue;
            }
            *slot = replacement(slot, target_id);
            mapping.value = target_id.to_string();
        }

        Ok(TransformedObject {
            object: transformed,
            id_types: updated,
        })
    }
}

fn collect_locations(value: &Value, pointer: &str, out: &mut Vec<IdTypeMapping>) {
    match value {
        Value::Object(map) => {
            for (name, child) in map {
                let child_pointer = format!("{}/{}", pointer, escape_pointer_token(name));
                let lower = name.to_ascii_lowercase();
                if lower.ends_with("ids")
                    && let Value::Array(items) = child
                {
                    for (index, item) in items.iter().enumerate() {
                        if let Some(id) = literal(item) {
                            out.push(IdTypeMapping::undefined(
                                format!("{}/{}", child_pointer, index),
                                id,
                            ));
                        }
                    }
                    continue;
                }
                if lower.ends_with("id")
                    && let Some(id) = literal(child)
                {
                    out.push(IdTypeMapping::undefined(child_pointer, id));
                    continue;
                }
                collect_locations(child, &child_pointer, out);
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_locations(item, &format!("{}/{}", pointer, index), out);
            }
        }
        _ => {}
    }
}

/// Id literal held by `value`: a non-negative integer or an all-digit string.
fn literal(value: &Value) -> Option<String> {
    match value {
        Value::Number(number) => number.as_u64().map(|n| n.to_string()),
        Value::String(text) if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) => {
            Some(text.clone())
        }
        _ => None,
    }
}

/// Keep the literal's JSON representation when substituting the target id.
fn replacement(current: &Value, target_id: &str) -> Value {
    match (current, target_id.parse::<u64>()) {
        (Value::Number(_), Ok(n)) => Value::from(n),
        _ => Value::String(target_id.to_string()),
    }
}

fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}
