//! Definition registry for storing templates, customs and constraint rules

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::constraint::{ConstraintError, ConstraintSet, TypeCategory};
use crate::definition::{
    CustomDefinition, Declaration, Definition, DefinitionClass, DefinitionKey, DefinitionKind,
    Operation, TemplateDefinition,
};

use super::error::DefinitionError;

/// Handle of a stored definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefId(u32);

impl DefId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
struct Slot {
    def: Definition,
    /// Handle of the parent template, once it has been inserted
    parent: Option<DefId>,
}

/// Errors from inserting a declaration of any kind
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InsertError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Constraint(#[from] ConstraintError),
}

/// Registry owning every template, custom and constraint rule of a compilation unit
///
/// Definitions live in an arena and are addressed by [`DefId`]. Parent and
/// base references are stored by name so declarations may arrive in any
/// order; the handle link is patched in when the referenced template is
/// inserted.
#[derive(Debug, Default, Clone)]
pub struct TemplateRegistry {
    slots: Vec<Option<Slot>>,
    index: HashMap<DefinitionKey, DefId>,
    /// Parent key -> definitions referencing it as parent or base
    dependents: HashMap<DefinitionKey, Vec<DefId>>,
    constraints: ConstraintSet,
}

impl TemplateRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert any declaration record
    pub fn insert(&mut self, decl: Declaration) -> Result<(), InsertError> {
        match decl {
            Declaration::Template(def) => {
                self.insert_template(def)?;
            }
            Declaration::Custom(def) => {
                self.insert_custom(def)?;
            }
            Declaration::Constraint(rule) => {
                tracing::debug!(rule = %rule.name, scope = %rule.scope, "registered constraint");
                self.constraints.add(rule)?;
            }
        }
        Ok(())
    }

    /// Insert a template; the store is unchanged on failure
    pub fn insert_template(&mut self, def: TemplateDefinition) -> Result<DefId, DefinitionError> {
        if def.name.is_empty() {
            return Err(DefinitionError::invalid_operation(
                "<unnamed template>",
                "template name is empty",
                def.span.clone(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(repeated) = def.members.iter().find(|m| !seen.insert(m.key.as_str())) {
            return Err(DefinitionError::invalid_operation(
                def.name.clone(),
                format!("member '{}' is declared more than once", repeated.key),
                def.span.clone(),
            ));
        }
        self.insert_definition(Definition::Template(def))
    }

    /// Insert a custom; the store is unchanged on failure
    pub fn insert_custom(&mut self, def: CustomDefinition) -> Result<DefId, DefinitionError> {
        if def.name.is_empty() {
            return Err(DefinitionError::invalid_operation(
                "<unnamed custom>",
                "custom name is empty",
                def.span.clone(),
            ));
        }
        if def.kind != DefinitionKind::StyleGroup
            && def.operations.iter().any(|op| matches!(op, Operation::Unvalued))
        {
            return Err(DefinitionError::invalid_operation(
                def.name.clone(),
                format!("unvalued is only allowed on style groups, not on a {}", def.kind),
                def.span.clone(),
            ));
        }
        if def.base.is_none() && def.deletes_inheritance() {
            return Err(DefinitionError::invalid_operation(
                def.name.clone(),
                "delete inheritance requires a base template",
                def.span.clone(),
            ));
        }
        self.insert_definition(Definition::Custom(def))
    }

    fn insert_definition(&mut self, def: Definition) -> Result<DefId, DefinitionError> {
        let key = def.key();
        if self.index.contains_key(&key) {
            return Err(DefinitionError::DuplicateName {
                key,
                span: def.span().cloned(),
            });
        }

        let parent_key = def.parent_key();
        if let Some(parent_key) = &parent_key {
            self.check_cycle(&key, parent_key, def.span())?;
        }

        // Validation done; mutate
        let id = DefId(self.slots.len() as u32);
        let parent = parent_key.as_ref().and_then(|k| self.index.get(k).copied());
        if let Some(parent_key) = parent_key {
            self.dependents.entry(parent_key).or_default().push(id);
        }
        if let Some(waiting) = self.dependents.get(&key) {
            for child in waiting.clone() {
                if let Some(slot) = self.slots[child.index()].as_mut() {
                    slot.parent = Some(id);
                }
            }
        }
        tracing::debug!(definition = %key, parent = ?parent, "registered definition");
        self.index.insert(key, id);
        self.slots.push(Some(Slot { def, parent }));
        Ok(id)
    }

    /// Walk the existing chain from `parent_key`; reaching `key` means a cycle
    fn check_cycle(
        &self,
        key: &DefinitionKey,
        parent_key: &DefinitionKey,
        span: Option<&crate::definition::Span>,
    ) -> Result<(), DefinitionError> {
        let mut chain = vec![key.to_string()];
        let mut visited = HashSet::new();
        let mut current = parent_key.clone();
        loop {
            chain.push(current.to_string());
            if &current == key {
                return Err(DefinitionError::cyclic(chain, span.cloned()));
            }
            if !visited.insert(current.clone()) {
                // Pre-existing loop not through `key`; insertion never creates one
                return Err(DefinitionError::cyclic(chain, span.cloned()));
            }
            let next = self
                .index
                .get(&current)
                .and_then(|id| self.slot(*id))
                .and_then(|slot| slot.def.parent_key());
            match next {
                Some(next) => current = next,
                None => return Ok(()),
            }
        }
    }

    fn slot(&self, id: DefId) -> Option<&Slot> {
        self.slots.get(id.index()).and_then(|s| s.as_ref())
    }

    /// Look up a handle by key
    pub fn id_of(&self, key: &DefinitionKey) -> Option<DefId> {
        self.index.get(key).copied()
    }

    /// Get a definition by handle
    pub fn get_by_id(&self, id: DefId) -> Option<&Definition> {
        self.slot(id).map(|s| &s.def)
    }

    /// Get a definition by key
    pub fn get(&self, key: &DefinitionKey) -> Result<&Definition, DefinitionError> {
        self.id_of(key)
            .and_then(|id| self.get_by_id(id))
            .ok_or_else(|| DefinitionError::not_found(key.clone()))
    }

    /// Get a template by kind and name
    pub fn template(&self, kind: DefinitionKind, name: &str) -> Result<&TemplateDefinition, DefinitionError> {
        match self.get(&DefinitionKey::template(kind, name))? {
            Definition::Template(t) => Ok(t),
            Definition::Custom(_) => Err(DefinitionError::not_found(DefinitionKey::template(kind, name))),
        }
    }

    /// Get a custom by kind and name
    pub fn custom(&self, kind: DefinitionKind, name: &str) -> Result<&CustomDefinition, DefinitionError> {
        match self.get(&DefinitionKey::custom(kind, name))? {
            Definition::Custom(c) => Ok(c),
            Definition::Template(_) => Err(DefinitionError::not_found(DefinitionKey::custom(kind, name))),
        }
    }

    /// Check if a definition exists
    pub fn contains(&self, key: &DefinitionKey) -> bool {
        self.index.contains_key(key)
    }

    /// Kinds under which a template with this name exists
    pub fn template_kinds(&self, name: &str) -> Vec<DefinitionKind> {
        DefinitionKind::ALL
            .into_iter()
            .filter(|kind| self.contains(&DefinitionKey::template(*kind, name)))
            .collect()
    }

    /// Ordered chain from the named template up to its root, leaf first
    pub fn ancestor_chain(
        &self,
        kind: DefinitionKind,
        name: &str,
    ) -> Result<Vec<&TemplateDefinition>, DefinitionError> {
        let key = DefinitionKey::template(kind, name);
        let mut id = self.id_of(&key).ok_or_else(|| DefinitionError::not_found(key.clone()))?;
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        loop {
            if !seen.insert(id) {
                let mut names: Vec<String> = chain
                    .iter()
                    .map(|t: &&TemplateDefinition| t.key().to_string())
                    .collect();
                if let Some(def) = self.get_by_id(id) {
                    names.push(def.key().to_string());
                }
                return Err(DefinitionError::cyclic(names, None));
            }
            let slot = self.slot(id).ok_or_else(|| DefinitionError::not_found(key.clone()))?;
            let Definition::Template(template) = &slot.def else {
                return Err(DefinitionError::not_found(key));
            };
            chain.push(template);
            match (&template.parent, slot.parent) {
                (None, _) => break,
                (Some(_), Some(parent)) => id = parent,
                (Some(_), None) => {
                    // Declared parent never inserted
                    let missing = template.parent_key().unwrap_or_else(|| key.clone());
                    return Err(DefinitionError::not_found(missing));
                }
            }
        }
        Ok(chain)
    }

    /// Definitions referencing `key` as parent or base
    pub fn dependents(&self, key: &DefinitionKey) -> Vec<&Definition> {
        self.dependents
            .get(key)
            .map(|ids| ids.iter().filter_map(|id| self.get_by_id(*id)).collect())
            .unwrap_or_default()
    }

    /// Remove a definition that nothing depends on
    pub fn remove(&mut self, key: &DefinitionKey) -> Result<Definition, DefinitionError> {
        let id = self
            .id_of(key)
            .ok_or_else(|| DefinitionError::not_found(key.clone()))?;
        if let Some(deps) = self.dependents.get(key).filter(|d| !d.is_empty()) {
            let dependents = deps
                .iter()
                .filter_map(|d| self.get_by_id(*d))
                .map(|d| d.key().to_string())
                .collect();
            return Err(DefinitionError::HasDependents {
                key: key.clone(),
                dependents,
            });
        }

        let slot = self.slots[id.index()]
            .take()
            .ok_or_else(|| DefinitionError::not_found(key.clone()))?;
        self.index.remove(key);
        self.dependents.remove(key);
        if let Some(parent_key) = slot.def.parent_key() {
            if let Some(children) = self.dependents.get_mut(&parent_key) {
                children.retain(|c| *c != id);
                if children.is_empty() {
                    self.dependents.remove(&parent_key);
                }
            }
        }
        tracing::debug!(definition = %key, "removed definition");
        Ok(slot.def)
    }

    /// All stored definitions in insertion order
    pub fn definitions(&self) -> impl Iterator<Item = &Definition> {
        self.slots.iter().filter_map(|s| s.as_ref().map(|s| &s.def))
    }

    /// Number of stored definitions
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Categories a target name denotes, for type constraints
    pub fn categories_of(&self, name: &str) -> Vec<TypeCategory> {
        let mut categories = Vec::new();
        for kind in DefinitionKind::ALL {
            if self.contains(&DefinitionKey::template(kind, name)) {
                categories.push(TypeCategory::Template(Some(kind)));
            }
            if self.contains(&DefinitionKey::custom(kind, name)) {
                categories.push(TypeCategory::Custom(Some(kind)));
            }
        }
        if categories.is_empty() {
            categories.push(TypeCategory::Html);
        }
        categories
    }

    /// Every parent/base reference that names a template never inserted
    pub fn check_references(&self) -> Vec<DefinitionError> {
        let mut errors = Vec::new();
        for slot in self.slots.iter().flatten() {
            if let (Some(parent_key), None) = (slot.def.parent_key(), slot.parent) {
                let found_elsewhere = self.template_kinds(&parent_key.name);
                match (&slot.def, found_elsewhere.first()) {
                    (Definition::Custom(c), Some(found)) => errors.push(DefinitionError::KindMismatch {
                        custom: c.name.clone(),
                        base: parent_key.name.clone(),
                        expected: c.kind,
                        found: *found,
                    }),
                    _ => errors.push(DefinitionError::not_found(parent_key)),
                }
            }
        }
        errors
    }

    /// Each definition with its direct parent or base, by display name
    pub fn dependency_graph(&self) -> BTreeMap<String, Vec<String>> {
        self.definitions()
            .map(|def| {
                let parents = def
                    .parent_key()
                    .map(|k| vec![k.to_string()])
                    .unwrap_or_default();
                (def.key().to_string(), parents)
            })
            .collect()
    }

    /// Names of all definitions of a class and kind
    pub fn names(&self, class: DefinitionClass, kind: DefinitionKind) -> Vec<&str> {
        self.definitions()
            .filter(|d| {
                let k = d.key();
                k.class == class && k.kind == kind
            })
            .map(|d| d.name())
            .collect()
    }

    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    pub fn constraints_mut(&mut self) -> &mut ConstraintSet {
        &mut self.constraints
    }

    /// Drop every definition and rule
    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.dependents.clear();
        self.constraints.clear();
    }
}
