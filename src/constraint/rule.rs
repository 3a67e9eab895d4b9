//! Constraint rules and the rule set that manages them

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::cmp::Reverse;
use std::fmt;

use thiserror::Error;

use crate::definition::{DefinitionKind, Span};

/// Errors from constraint rule management
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstraintError {
    #[error("duplicate constraint: {name}")]
    DuplicateName { name: String, span: Option<Span> },

    #[error("constraint not found: {name}")]
    NotFound { name: String },

    #[error("invalid constraint name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
}

/// Kind of construct a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstraintScope {
    Element,
    Attribute,
    Style,
    Template,
    Custom,
    Import,
    Namespace,
}

impl ConstraintScope {
    pub const ALL: [ConstraintScope; 7] = [
        ConstraintScope::Element,
        ConstraintScope::Attribute,
        ConstraintScope::Style,
        ConstraintScope::Template,
        ConstraintScope::Custom,
        ConstraintScope::Import,
        ConstraintScope::Namespace,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            ConstraintScope::Element => "element",
            ConstraintScope::Attribute => "attribute",
            ConstraintScope::Style => "style",
            ConstraintScope::Template => "template",
            ConstraintScope::Custom => "custom",
            ConstraintScope::Import => "import",
            ConstraintScope::Namespace => "namespace",
        }
    }

    pub fn from_keyword(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|scope| scope.keyword() == s)
    }
}

impl fmt::Display for ConstraintScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Category of a target, as derived from the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCategory {
    /// A plain construct not produced from any definition
    Html,
    /// Produced from a template; `None` matches any kind
    Template(Option<DefinitionKind>),
    /// Produced from a custom; `None` matches any kind
    Custom(Option<DefinitionKind>),
}

impl TypeCategory {
    /// Whether a rule expecting `self` accepts a target of category `actual`
    pub fn matches(&self, actual: &TypeCategory) -> bool {
        match (self, actual) {
            (TypeCategory::Html, TypeCategory::Html) => true,
            (TypeCategory::Template(None), TypeCategory::Template(_)) => true,
            (TypeCategory::Custom(None), TypeCategory::Custom(_)) => true,
            (TypeCategory::Template(Some(a)), TypeCategory::Template(Some(b)))
            | (TypeCategory::Custom(Some(a)), TypeCategory::Custom(Some(b))) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for TypeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeCategory::Html => write!(f, "@Html"),
            TypeCategory::Template(None) => write!(f, "[Template]"),
            TypeCategory::Custom(None) => write!(f, "[Custom]"),
            TypeCategory::Template(Some(kind)) => write!(f, "[Template] {}", kind),
            TypeCategory::Custom(Some(kind)) => write!(f, "[Custom] {}", kind),
        }
    }
}

/// Matching strategy of a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleType {
    /// Matches one exact target name
    Precise(String),
    /// Matches targets of the given category
    Type(TypeCategory),
    /// Matches every target of the scope
    Global,
}

/// Discriminant of [`RuleType`], for counting and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleKind {
    Precise,
    Type,
    Global,
}

impl RuleType {
    pub fn kind(&self) -> RuleKind {
        match self {
            RuleType::Precise(_) => RuleKind::Precise,
            RuleType::Type(_) => RuleKind::Type,
            RuleType::Global => RuleKind::Global,
        }
    }
}

/// Comparison operator of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    In,
    NotIn,
}

impl Comparison {
    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
            Comparison::Lt => "<",
            Comparison::Gt => ">",
            Comparison::Le => "<=",
            Comparison::Ge => ">=",
            Comparison::In => "in",
            Comparison::NotIn => "not_in",
        }
    }

    pub fn from_symbol(s: &str) -> Option<Self> {
        match s {
            "==" => Some(Comparison::Eq),
            "!=" => Some(Comparison::Ne),
            "<" => Some(Comparison::Lt),
            ">" => Some(Comparison::Gt),
            "<=" => Some(Comparison::Le),
            ">=" => Some(Comparison::Ge),
            "in" => Some(Comparison::In),
            "not_in" => Some(Comparison::NotIn),
            _ => None,
        }
    }
}

/// One `(attribute, operator, expected)` test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub attribute: String,
    pub op: Comparison,
    pub expected: String,
}

impl Condition {
    pub fn new(attribute: impl Into<String>, op: Comparison, expected: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            op,
            expected: expected.into(),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.attribute, self.op.symbol(), self.expected)
    }
}

/// A constraint declaration
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintRule {
    pub name: String,
    pub rule_type: RuleType,
    pub scope: ConstraintScope,
    /// ANDed conditions under which a matched usage is allowed
    pub conditions: Vec<Condition>,
    /// Target names exempt from the rule
    pub exceptions: BTreeSet<String>,
    pub enabled: bool,
    /// Higher priorities are evaluated first
    pub priority: i32,
    pub span: Option<Span>,
}

impl ConstraintRule {
    pub fn new(name: impl Into<String>, rule_type: RuleType, scope: ConstraintScope) -> Self {
        Self {
            name: name.into(),
            rule_type,
            scope,
            conditions: Vec::new(),
            exceptions: BTreeSet::new(),
            enabled: true,
            priority: 0,
            span: None,
        }
    }

    pub fn precise(name: impl Into<String>, scope: ConstraintScope, target: impl Into<String>) -> Self {
        Self::new(name, RuleType::Precise(target.into()), scope)
    }

    pub fn of_type(name: impl Into<String>, scope: ConstraintScope, category: TypeCategory) -> Self {
        Self::new(name, RuleType::Type(category), scope)
    }

    pub fn global(name: impl Into<String>, scope: ConstraintScope) -> Self {
        Self::new(name, RuleType::Global, scope)
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_exception(mut self, name: impl Into<String>) -> Self {
        self.exceptions.insert(name.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleType::Precise(target) => write!(f, "precise {}", target),
            RuleType::Type(category) => write!(f, "type {}", category),
            RuleType::Global => write!(f, "global"),
        }
    }
}

/// One-line textual form, as produced by [`ConstraintSet::export`]
impl fmt::Display for ConstraintRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "constraint {} [{}] {}", self.name, self.scope, self.rule_type)?;
        if !self.conditions.is_empty() {
            let conditions: Vec<String> = self.conditions.iter().map(|c| c.to_string()).collect();
            write!(f, " unless {}", conditions.join(" and "))?;
        }
        if !self.exceptions.is_empty() {
            let exceptions: Vec<&str> = self.exceptions.iter().map(String::as_str).collect();
            write!(f, " except {}", exceptions.join(", "))?;
        }
        if self.priority != 0 {
            write!(f, " priority {}", self.priority)?;
        }
        if !self.enabled {
            write!(f, " disabled")?;
        }
        write!(f, ";")
    }
}

/// Check that a rule name is usable as a `use` directive target
fn validate_rule_name(name: &str) -> Result<(), ConstraintError> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    if !valid_start {
        return Err(ConstraintError::InvalidName {
            name: name.to_string(),
            reason: "must start with a letter or underscore".to_string(),
        });
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-')) {
        return Err(ConstraintError::InvalidName {
            name: name.to_string(),
            reason: format!("unexpected character '{}'", bad),
        });
    }
    Ok(())
}

/// The active constraint rules, in declaration order
#[derive(Debug, Default, Clone)]
pub struct ConstraintSet {
    rules: Vec<ConstraintRule>,
    index: HashMap<String, usize>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule; fails on an invalid or duplicate name
    pub fn add(&mut self, rule: ConstraintRule) -> Result<(), ConstraintError> {
        validate_rule_name(&rule.name)?;
        if self.index.contains_key(&rule.name) {
            return Err(ConstraintError::DuplicateName {
                name: rule.name,
                span: rule.span,
            });
        }
        self.index.insert(rule.name.clone(), self.rules.len());
        self.rules.push(rule);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<ConstraintRule, ConstraintError> {
        let idx = self.index.remove(name).ok_or_else(|| ConstraintError::NotFound {
            name: name.to_string(),
        })?;
        let rule = self.rules.remove(idx);
        for slot in self.index.values_mut() {
            if *slot > idx {
                *slot -= 1;
            }
        }
        Ok(rule)
    }

    pub fn get(&self, name: &str) -> Option<&ConstraintRule> {
        self.index.get(name).map(|&i| &self.rules[i])
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut ConstraintRule, ConstraintError> {
        match self.index.get(name) {
            Some(&i) => Ok(&mut self.rules[i]),
            None => Err(ConstraintError::NotFound {
                name: name.to_string(),
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn enable(&mut self, name: &str) -> Result<(), ConstraintError> {
        self.get_mut(name)?.enabled = true;
        Ok(())
    }

    pub fn disable(&mut self, name: &str) -> Result<(), ConstraintError> {
        self.get_mut(name)?.enabled = false;
        Ok(())
    }

    /// Add an exception; returns false if it was already present
    pub fn add_exception(&mut self, name: &str, target: impl Into<String>) -> Result<bool, ConstraintError> {
        Ok(self.get_mut(name)?.exceptions.insert(target.into()))
    }

    /// Remove an exception; returns false if it was not present
    pub fn remove_exception(&mut self, name: &str, target: &str) -> Result<bool, ConstraintError> {
        Ok(self.get_mut(name)?.exceptions.remove(target))
    }

    pub fn has_exception(&self, name: &str, target: &str) -> bool {
        self.get(name)
            .map(|r| r.exceptions.contains(target))
            .unwrap_or(false)
    }

    /// All rules in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &ConstraintRule> {
        self.rules.iter()
    }

    /// Enabled rules of a scope, highest priority first, then in declaration order
    pub fn active_in(&self, scope: ConstraintScope) -> impl Iterator<Item = &ConstraintRule> {
        let mut active: Vec<&ConstraintRule> = self
            .rules
            .iter()
            .filter(|r| r.enabled && r.scope == scope)
            .collect();
        active.sort_by_key(|r| Reverse(r.priority));
        active.into_iter()
    }

    pub fn set_priority(&mut self, name: &str, priority: i32) -> Result<(), ConstraintError> {
        self.get_mut(name)?.priority = priority;
        Ok(())
    }

    pub fn priority(&self, name: &str) -> Option<i32> {
        self.get(name).map(|r| r.priority)
    }

    fn export_where(&self, keep: impl Fn(&ConstraintRule) -> bool) -> String {
        self.rules
            .iter()
            .filter(|r| keep(r))
            .map(|r| format!("{}\n", r))
            .collect()
    }

    /// Every rule, one line each, in declaration order
    pub fn export(&self) -> String {
        self.export_where(|_| true)
    }

    pub fn export_scope(&self, scope: ConstraintScope) -> String {
        self.export_where(|r| r.scope == scope)
    }

    pub fn export_kind(&self, kind: RuleKind) -> String {
        self.export_where(|r| r.rule_type.kind() == kind)
    }

    pub fn names_in_scope(&self, scope: ConstraintScope) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.scope == scope)
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn names_of_kind(&self, kind: RuleKind) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.rule_type.kind() == kind)
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.rules.iter().filter(|r| r.enabled).count()
    }

    pub fn count_by_scope(&self) -> BTreeMap<ConstraintScope, usize> {
        let mut counts = BTreeMap::new();
        for rule in &self.rules {
            *counts.entry(rule.scope).or_insert(0) += 1;
        }
        counts
    }

    pub fn count_by_kind(&self) -> BTreeMap<RuleKind, usize> {
        let mut counts = BTreeMap::new();
        for rule in &self.rules {
            *counts.entry(rule.rule_type.kind()).or_insert(0) += 1;
        }
        counts
    }

    pub fn clear(&mut self) {
        self.rules.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> ConstraintSet {
        let mut set = ConstraintSet::new();
        set.add(ConstraintRule::precise("no_span", ConstraintScope::Element, "span"))
            .unwrap();
        set.add(ConstraintRule::global("no_imports", ConstraintScope::Import))
            .unwrap();
        set.add(
            ConstraintRule::of_type(
                "no_templates",
                ConstraintScope::Element,
                TypeCategory::Template(None),
            )
            .disabled(),
        )
        .unwrap();
        set
    }

    #[test]
    fn test_duplicate_rule() {
        let mut set = sample_set();
        let err = set
            .add(ConstraintRule::global("no_span", ConstraintScope::Style))
            .unwrap_err();
        assert!(matches!(err, ConstraintError::DuplicateName { .. }));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_invalid_rule_name() {
        let mut set = ConstraintSet::new();
        let err = set
            .add(ConstraintRule::global("9lives", ConstraintScope::Element))
            .unwrap_err();
        assert!(matches!(err, ConstraintError::InvalidName { .. }));
        assert!(set
            .add(ConstraintRule::global("has space", ConstraintScope::Element))
            .is_err());
    }

    #[test]
    fn test_remove_keeps_order_and_index() {
        let mut set = sample_set();
        set.remove("no_span").unwrap();
        let names: Vec<&str> = set.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["no_imports", "no_templates"]);
        assert_eq!(set.get("no_templates").map(|r| r.scope), Some(ConstraintScope::Element));
        assert!(matches!(set.remove("no_span"), Err(ConstraintError::NotFound { .. })));
    }

    #[test]
    fn test_enable_disable_and_counts() {
        let mut set = sample_set();
        assert_eq!(set.active_count(), 2);
        set.enable("no_templates").unwrap();
        assert_eq!(set.active_count(), 3);
        set.disable("no_span").unwrap();
        assert_eq!(set.active_in(ConstraintScope::Element).count(), 1);
        assert_eq!(set.count_by_scope().get(&ConstraintScope::Element), Some(&2));
        assert_eq!(set.count_by_kind().get(&RuleKind::Global), Some(&1));
        assert_eq!(set.names_of_kind(RuleKind::Precise), vec!["no_span"]);
        assert_eq!(set.names_in_scope(ConstraintScope::Import), vec!["no_imports"]);
    }

    #[test]
    fn test_exceptions() {
        let mut set = sample_set();
        assert!(set.add_exception("no_imports", "core").unwrap());
        assert!(!set.add_exception("no_imports", "core").unwrap());
        assert!(set.has_exception("no_imports", "core"));
        assert!(set.remove_exception("no_imports", "core").unwrap());
        assert!(!set.has_exception("no_imports", "core"));
        assert!(set.add_exception("missing", "x").is_err());
    }

    #[test]
    fn test_active_in_orders_by_priority() {
        let mut set = ConstraintSet::new();
        for (name, priority) in [("low", -1), ("first", 0), ("urgent", 10), ("second", 0)] {
            set.add(ConstraintRule::global(name, ConstraintScope::Style).with_priority(priority))
                .unwrap();
        }
        let order: Vec<&str> = set
            .active_in(ConstraintScope::Style)
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(order, vec!["urgent", "first", "second", "low"]);

        set.set_priority("low", 20).unwrap();
        assert_eq!(set.priority("low"), Some(20));
        assert_eq!(
            set.active_in(ConstraintScope::Style).next().map(|r| r.name.as_str()),
            Some("low")
        );
        assert!(set.set_priority("missing", 1).is_err());
    }

    #[test]
    fn test_export() {
        let mut set = sample_set();
        set.add(
            ConstraintRule::global("narrow", ConstraintScope::Element)
                .with_condition(Condition::new("width", Comparison::Le, "800"))
                .with_exception("footer")
                .with_priority(5),
        )
        .unwrap();
        insta::assert_snapshot!(set.export(), @r"
        constraint no_span [element] precise span;
        constraint no_imports [import] global;
        constraint no_templates [element] type [Template] disabled;
        constraint narrow [element] global unless width <= 800 except footer priority 5;
        ");
        assert_eq!(
            set.export_scope(ConstraintScope::Import),
            "constraint no_imports [import] global;\n"
        );
        assert_eq!(set.export_kind(RuleKind::Precise), "constraint no_span [element] precise span;\n");
    }

    #[test]
    fn test_category_matching() {
        let any_template = TypeCategory::Template(None);
        let style_template = TypeCategory::Template(Some(DefinitionKind::StyleGroup));
        assert!(any_template.matches(&style_template));
        assert!(style_template.matches(&style_template));
        assert!(!style_template.matches(&TypeCategory::Template(Some(DefinitionKind::Element))));
        assert!(!any_template.matches(&TypeCategory::Custom(Some(DefinitionKind::StyleGroup))));
        assert!(TypeCategory::Html.matches(&TypeCategory::Html));
    }
}
