//! Mapping preparation ahead of validation and install.

use std::collections::HashSet;

use crate::dependency::TreeContext;
use crate::error::Result;
use crate::registry::DependencyTypeRegistry;
use crate::repository::ObjectStore;

use super::{IdMap, IdMapping};

/// Fill `id_map` for every id-mapping dependency in `tree`.
///
/// Existing complete mappings are kept while their target still exists.
/// An unmapped dependency found on the target by name maps to that object;
/// otherwise an included dependency is marked as a new object. Anything
/// else stays unmapped, since it is neither packaged nor present.
/// Returns the number of mappings added or changed.
pub fn prepare_mappings(
    registry: &DependencyTypeRegistry,
    target: &dyn ObjectStore,
    tree: &TreeContext,
    id_map: &mut IdMap,
) -> Result<usize> {
    let mut seen = HashSet::new();
    let mut changed = 0;

    for dependency in tree.roots().flat_map(|root| root.walk()) {
        let key = dependency.key();
        if !seen.insert(key.clone()) {
            continue;
        }
        if !registry.get(&dependency.type_code)?.flags().supports_id_mapping {
            continue;
        }

        if let Some(mapping) = id_map.get(&dependency.type_code, &dependency.id) {
            let still_valid = match mapping.target_id.as_deref() {
                Some(target_id) => target.load(&dependency.type_code, target_id)?.is_some(),
                None => mapping.is_new_object,
            };
            if still_valid {
                continue;
            }
        }

        let mapping = match target.find_by_name(&dependency.type_code, &dependency.display_name)? {
            Some(existing) => IdMapping::existing(
                &dependency.type_code,
                &dependency.id,
                &dependency.display_name,
                existing.id,
                existing.name,
            ),
            None if tree.is_included(&key) => {
                IdMapping::new_object(&dependency.type_code, &dependency.id, &dependency.display_name)
            }
            None => {
                if id_map.remove(&dependency.type_code, &dependency.id).is_some() {
                    changed += 1;
                }
                continue;
            }
        };
        tracing::debug!(
            key = %key,
            target = ?mapping.target_id,
            new_object = mapping.is_new_object,
            "prepared id mapping"
        );
        id_map.add_mapping(mapping);
        changed += 1;
    }
    Ok(changed)
}
