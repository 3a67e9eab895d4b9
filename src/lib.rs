//! Stencil - definition resolution and constraint engine for a templating compiler
//!
//! This library stores template and custom declarations, resolves template
//! inheritance, replays custom specialization operations into concrete
//! member lists, and checks usages against constraint rules.
//!
//! # Example
//!
//! ```rust
//! use stencil::{DefinitionKind, Engine, EngineConfig, Member, TemplateDefinition};
//!
//! let engine = Engine::new(EngineConfig::default());
//! engine
//!     .insert(TemplateDefinition::new(DefinitionKind::StyleGroup, "Theme")
//!         .with_member(Member::new("color", "red"))
//!         .into())
//!     .unwrap();
//!
//! let members = engine.resolve(DefinitionKind::StyleGroup, "Theme").unwrap();
//! assert_eq!(members[0].value(), Some("red"));
//! ```

pub mod config;
pub mod constraint;
pub mod declarations;
pub mod definition;
pub mod error;
pub mod template;

pub use config::{ConfigError, EngineConfig, ViolationPolicy};
pub use constraint::{
    Comparison, Condition, ConstraintError, ConstraintRule, ConstraintScope, ConstraintSet,
    RuleType, Target, TypeCategory, Violation,
};
pub use declarations::{parse_manifest, Manifest};
pub use definition::{
    Bindings, CustomDefinition, Declaration, Definition, DefinitionClass, DefinitionKey,
    DefinitionKind, InheritanceMode, InsertPosition, Instance, Member, MemberValue, Operation,
    ParamType, ParamValue, Parameter, TemplateDefinition,
};
pub use error::DeclarationError;
pub use template::{DefinitionError, InsertError, TemplateRegistry, TemplateResolver};

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

/// Errors surfaced by the engine façade
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Constraint(#[from] ConstraintError),

    #[error(transparent)]
    Insert(#[from] InsertError),

    #[error(transparent)]
    Declaration(#[from] DeclarationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Violations found by a check under [`ViolationPolicy::Abort`]
    #[error("constraint violations: {}", format_violations(.0))]
    ConstraintViolation(Vec<Violation>),
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Registry plus resolution cache behind one handle
///
/// Reads (resolution, specialization, validation) share a read lock and may
/// run concurrently; insertion and removal take the write lock.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    registry: RwLock<TemplateRegistry>,
    resolver: TemplateResolver,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let resolver = TemplateResolver::new(config.cache_resolutions);
        Self {
            config,
            registry: RwLock::new(TemplateRegistry::new()),
            resolver,
        }
    }

    /// Build an engine from a declaration manifest
    ///
    /// `config` wins over the manifest's `[engine]` table; without either the
    /// defaults apply.
    pub fn from_manifest(
        source: &str,
        config: Option<EngineConfig>,
    ) -> Result<Self, DeclarationError> {
        let manifest = parse_manifest(source)?;
        let config = config.or(manifest.config).unwrap_or_default();
        let engine = Self::new(config);
        engine.load(manifest.declarations)?;
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, TemplateRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TemplateRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the registry under the read lock
    pub fn with_registry<R>(&self, f: impl FnOnce(&TemplateRegistry) -> R) -> R {
        f(&self.read())
    }

    /// Run `f` against the registry under the write lock
    ///
    /// The resolution cache is dropped afterwards since `f` may change any
    /// definition.
    pub fn with_registry_mut<R>(&self, f: impl FnOnce(&mut TemplateRegistry) -> R) -> R {
        let result = f(&mut self.write());
        self.resolver.clear();
        result
    }

    /// Insert one declaration
    pub fn insert(&self, decl: Declaration) -> Result<(), InsertError> {
        self.write().insert(decl)
    }

    /// Insert declarations in order, stopping at the first rejection
    ///
    /// Returns the number inserted. Declarations before the rejected one stay
    /// in the registry.
    pub fn load(&self, declarations: Vec<Declaration>) -> Result<usize, DeclarationError> {
        let mut registry = self.write();
        let mut inserted = 0;
        for decl in declarations {
            let declaration = decl.describe();
            let span = decl.span().cloned();
            registry
                .insert(decl)
                .map_err(|source| DeclarationError::Rejected {
                    declaration,
                    span,
                    source,
                })?;
            inserted += 1;
        }
        tracing::info!(declarations = inserted, "loaded declarations");
        Ok(inserted)
    }

    /// Parse a manifest and insert its declarations
    pub fn load_declarations(&self, source: &str) -> Result<usize, DeclarationError> {
        let manifest = parse_manifest(source)?;
        if manifest.config.is_some() {
            tracing::warn!("[engine] table ignored; engine is already configured");
        }
        self.load(manifest.declarations)
    }

    /// Remove a definition nothing depends on
    pub fn remove(&self, key: &DefinitionKey) -> Result<Definition, DefinitionError> {
        let mut registry = self.write();
        let id = registry.id_of(key);
        let removed = registry.remove(key)?;
        if let Some(id) = id {
            self.resolver.evict(id);
        }
        Ok(removed)
    }

    /// Drop every definition, constraint and cached resolution
    pub fn clear(&self) {
        let mut registry = self.write();
        registry.clear();
        self.resolver.clear();
    }

    /// Fully merged member list of a template
    pub fn resolve(
        &self,
        kind: DefinitionKind,
        name: &str,
    ) -> Result<Arc<Vec<Member>>, DefinitionError> {
        self.resolver.resolve(&self.read(), kind, name)
    }

    /// Materialize a custom under an instance name
    pub fn specialize(
        &self,
        kind: DefinitionKind,
        custom: &str,
        instance: &str,
        bindings: &Bindings,
    ) -> Result<Instance, DefinitionError> {
        template::specialize(
            &self.read(),
            &self.resolver,
            &self.config,
            kind,
            custom,
            instance,
            bindings,
        )
    }

    /// Materialize a template under an instance name
    pub fn instantiate(
        &self,
        kind: DefinitionKind,
        template_name: &str,
        instance: &str,
        bindings: &Bindings,
    ) -> Result<Instance, DefinitionError> {
        template::instantiate(
            &self.read(),
            &self.resolver,
            &self.config,
            kind,
            template_name,
            instance,
            bindings,
        )
    }

    /// Every violation a usage produces
    pub fn validate(&self, target: &Target) -> Vec<Violation> {
        constraint::validate(&self.read(), target)
    }

    /// Validate and apply the configured violation policy
    pub fn check(&self, target: &Target) -> Result<Vec<Violation>, EngineError> {
        let violations = self.validate(target);
        for violation in &violations {
            tracing::warn!(
                rule = %violation.rule_name,
                target = %violation.target_name,
                suggestion = violation.suggestion(),
                "{}",
                violation
            );
        }
        match self.config.violation_policy {
            ViolationPolicy::Abort if !violations.is_empty() => {
                Err(EngineError::ConstraintViolation(violations))
            }
            _ => Ok(violations),
        }
    }

    pub fn enable_constraint(&self, name: &str) -> Result<(), ConstraintError> {
        self.write().constraints_mut().enable(name)
    }

    pub fn disable_constraint(&self, name: &str) -> Result<(), ConstraintError> {
        self.write().constraints_mut().disable(name)
    }

    /// Change when a rule is evaluated relative to the others of its scope
    pub fn set_constraint_priority(&self, name: &str, priority: i32) -> Result<(), ConstraintError> {
        self.write().constraints_mut().set_priority(name, priority)
    }

    /// Dangling parent and base references, after all declarations are in
    pub fn check_references(&self) -> Vec<DefinitionError> {
        self.read().check_references()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn theme() -> Declaration {
        TemplateDefinition::new(DefinitionKind::StyleGroup, "Theme")
            .with_member(Member::new("color", "red"))
            .with_member(Member::new("size", "10"))
            .into()
    }

    #[test]
    fn test_resolve_is_cached() {
        let engine = Engine::default();
        engine.insert(theme()).unwrap();
        let first = engine.resolve(DefinitionKind::StyleGroup, "Theme").unwrap();
        let second = engine.resolve(DefinitionKind::StyleGroup, "Theme").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_remove_evicts_cache() {
        let engine = Engine::default();
        engine.insert(theme()).unwrap();
        engine.resolve(DefinitionKind::StyleGroup, "Theme").unwrap();
        engine
            .remove(&DefinitionKey::template(DefinitionKind::StyleGroup, "Theme"))
            .unwrap();
        let err = engine.resolve(DefinitionKind::StyleGroup, "Theme").unwrap_err();
        assert!(matches!(err, DefinitionError::NotFound { .. }));
    }

    #[test]
    fn test_check_abort_policy() {
        let engine =
            Engine::new(EngineConfig::new().with_violation_policy(ViolationPolicy::Abort));
        engine
            .insert(ConstraintRule::precise("no_span", ConstraintScope::Element, "span").into())
            .unwrap();
        let target = Target::new(ConstraintScope::Element, "span");
        let err = engine.check(&target).unwrap_err();
        assert!(matches!(err, EngineError::ConstraintViolation(ref v) if v.len() == 1));
        assert!(engine
            .check(&Target::new(ConstraintScope::Element, "div"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_check_report_policy() {
        let engine = Engine::default();
        engine
            .insert(ConstraintRule::precise("no_span", ConstraintScope::Element, "span").into())
            .unwrap();
        let violations = engine
            .check(&Target::new(ConstraintScope::Element, "span"))
            .unwrap();
        assert_eq!(violations.len(), 1);

        engine.disable_constraint("no_span").unwrap();
        assert!(engine
            .validate(&Target::new(ConstraintScope::Element, "span"))
            .is_empty());
    }

    #[test]
    fn test_load_reports_rejected_declaration() {
        let engine = Engine::default();
        let err = engine.load(vec![theme(), theme()]).unwrap_err();
        assert!(matches!(err, DeclarationError::Rejected { .. }));
        assert_eq!(engine.with_registry(|r| r.len()), 1);
    }

    #[test]
    fn test_clear() {
        let engine = Engine::default();
        engine.insert(theme()).unwrap();
        engine.resolve(DefinitionKind::StyleGroup, "Theme").unwrap();
        engine.clear();
        assert!(engine.with_registry(|r| r.is_empty()));
    }
}
