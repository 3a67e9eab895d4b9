//! Template resolution - merges a template's ancestor chain into one member list

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::definition::{DefinitionKind, InheritanceMode, Member};

use super::error::DefinitionError;
use super::registry::{DefId, TemplateRegistry};

/// Merge `incoming` into `members`: replace an entry with the same key in
/// place, otherwise append.
pub fn merge_members(members: &mut Vec<Member>, incoming: &[Member]) {
    for entry in incoming {
        match members.iter_mut().find(|m| m.key == entry.key) {
            Some(existing) => *existing = entry.clone(),
            None => members.push(entry.clone()),
        }
    }
}

/// Resolve a template without caching
///
/// Ancestors are merged root first. An explicitly inherited level records a
/// sentinel entry naming its parent just before its own members.
pub fn resolve_template(
    registry: &TemplateRegistry,
    kind: DefinitionKind,
    name: &str,
) -> Result<Vec<Member>, DefinitionError> {
    let chain = registry.ancestor_chain(kind, name)?;
    let mut members = Vec::new();
    for template in chain.iter().rev() {
        if template.inheritance == InheritanceMode::Explicit {
            if let Some(parent) = &template.parent {
                merge_members(&mut members, &[Member::inherit_marker(parent)]);
            }
        }
        merge_members(&mut members, &template.members);
    }
    Ok(members)
}

/// Caching template resolver
///
/// Results are cached per definition handle. Templates are immutable once
/// inserted, so an entry only goes stale when its definition is removed or
/// the registry is cleared; the owner calls [`TemplateResolver::evict`] or
/// [`TemplateResolver::clear`] then.
#[derive(Debug)]
pub struct TemplateResolver {
    cache: Mutex<HashMap<DefId, Arc<Vec<Member>>>>,
    enabled: bool,
}

impl TemplateResolver {
    pub fn new(enabled: bool) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            enabled,
        }
    }

    /// Resolve a template's fully merged member list
    pub fn resolve(
        &self,
        registry: &TemplateRegistry,
        kind: DefinitionKind,
        name: &str,
    ) -> Result<Arc<Vec<Member>>, DefinitionError> {
        let key = crate::definition::DefinitionKey::template(kind, name);
        let id = registry
            .id_of(&key)
            .ok_or_else(|| DefinitionError::not_found(key.clone()))?;

        if self.enabled {
            let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = cache.get(&id) {
                tracing::debug!(template = %key, "resolution cache hit");
                return Ok(Arc::clone(hit));
            }
        }

        let members = Arc::new(resolve_template(registry, kind, name)?);
        tracing::debug!(template = %key, members = members.len(), "resolved template");
        if self.enabled {
            self.cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id, Arc::clone(&members));
        }
        Ok(members)
    }

    /// Drop the cached result of one definition
    pub fn evict(&self, id: DefId) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    pub fn clear(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::TemplateDefinition;
    use pretty_assertions::assert_eq;

    fn style(name: &str) -> TemplateDefinition {
        TemplateDefinition::new(DefinitionKind::StyleGroup, name)
    }

    fn registry_with_chain() -> TemplateRegistry {
        let mut registry = TemplateRegistry::new();
        registry
            .insert_template(
                style("Base")
                    .with_member(Member::new("color", "black"))
                    .with_member(Member::new("font", "serif")),
            )
            .unwrap();
        registry
            .insert_template(
                style("Mid")
                    .with_parent("Base")
                    .with_member(Member::new("margin", "0"))
                    .with_member(Member::new("color", "grey")),
            )
            .unwrap();
        registry
            .insert_template(
                style("Leaf")
                    .with_parent("Mid")
                    .with_member(Member::new("color", "red")),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_override_keeps_ancestor_position() {
        let registry = registry_with_chain();
        let members = resolve_template(&registry, DefinitionKind::StyleGroup, "Leaf").unwrap();
        assert_eq!(
            members,
            vec![
                Member::new("color", "red"),
                Member::new("font", "serif"),
                Member::new("margin", "0"),
            ]
        );
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let registry = registry_with_chain();
        let a = resolve_template(&registry, DefinitionKind::StyleGroup, "Leaf").unwrap();
        let b = resolve_template(&registry, DefinitionKind::StyleGroup, "Leaf").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_explicit_inheritance_records_sentinel() {
        let mut registry = TemplateRegistry::new();
        registry
            .insert_template(style("Base").with_member(Member::new("color", "black")))
            .unwrap();
        registry
            .insert_template(
                style("Child")
                    .inherits("Base")
                    .with_member(Member::new("size", "10")),
            )
            .unwrap();
        let members = resolve_template(&registry, DefinitionKind::StyleGroup, "Child").unwrap();
        assert_eq!(
            members,
            vec![
                Member::new("color", "black"),
                Member::inherit_marker("Base"),
                Member::new("size", "10"),
            ]
        );
    }

    #[test]
    fn test_missing_template() {
        let registry = TemplateRegistry::new();
        let resolver = TemplateResolver::new(true);
        let err = resolver
            .resolve(&registry, DefinitionKind::Element, "Nope")
            .unwrap_err();
        assert!(matches!(err, DefinitionError::NotFound { .. }));
    }

    #[test]
    fn test_cache_reuses_result() {
        let registry = registry_with_chain();
        let resolver = TemplateResolver::new(true);
        let first = resolver.resolve(&registry, DefinitionKind::StyleGroup, "Leaf").unwrap();
        let second = resolver.resolve(&registry, DefinitionKind::StyleGroup, "Leaf").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.cached_len(), 1);
        resolver.clear();
        assert_eq!(resolver.cached_len(), 0);
    }

    #[test]
    fn test_cache_disabled() {
        let registry = registry_with_chain();
        let resolver = TemplateResolver::new(false);
        resolver.resolve(&registry, DefinitionKind::StyleGroup, "Leaf").unwrap();
        assert_eq!(resolver.cached_len(), 0);
    }
}
