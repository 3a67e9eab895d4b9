//! Constraint validation - decides whether a proposed usage is permitted

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use crate::template::TemplateRegistry;

use super::rule::{Comparison, Condition, ConstraintRule, ConstraintScope, RuleType};

/// A proposed usage of a construct
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scope: ConstraintScope,
    pub name: String,
    /// Attribute snapshot conditions are evaluated against
    pub attributes: HashMap<String, String>,
}

impl Target {
    pub fn new(scope: ConstraintScope, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// A usage forbidden by a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub rule_name: String,
    pub scope: ConstraintScope,
    pub target_name: String,
    /// First condition that did not hold; `None` for an unconditional ban
    pub failed_condition: Option<Condition>,
}

impl Violation {
    /// Hint for the author, by scope
    pub fn suggestion(&self) -> &'static str {
        match self.scope {
            ConstraintScope::Element => "check the element and its attributes",
            ConstraintScope::Attribute => "check the attribute value and format",
            ConstraintScope::Style => "check the style definition and its properties",
            ConstraintScope::Template => "check the template usage and its parameters",
            ConstraintScope::Custom => "check the custom usage and its parameters",
            ConstraintScope::Import => "remove the import or add it to the rule's exceptions",
            ConstraintScope::Namespace => "use a namespace the rule allows",
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failed_condition {
            Some(cond) => write!(
                f,
                "constraint '{}' violated by {} '{}': requires {}",
                self.rule_name, self.scope, self.target_name, cond
            ),
            None => write!(
                f,
                "constraint '{}' forbids {} '{}'",
                self.rule_name, self.scope, self.target_name
            ),
        }
    }
}

/// Whether `rule` applies to `target` at all
fn rule_matches(rule: &ConstraintRule, target: &Target, registry: &TemplateRegistry) -> bool {
    if rule.exceptions.contains(&target.name) {
        return false;
    }
    match &rule.rule_type {
        RuleType::Precise(name) => name == &target.name,
        RuleType::Type(expected) => registry
            .categories_of(&target.name)
            .iter()
            .any(|actual| expected.matches(actual)),
        RuleType::Global => true,
    }
}

/// Order two attribute values; `None` when either side is a non-finite number
fn compare(actual: &str, expected: &str) -> Option<Ordering> {
    let number = |s: &str| s.trim().parse::<f64>().ok();
    match (number(actual), number(expected)) {
        (Some(a), Some(b)) if a.is_finite() && b.is_finite() => a.partial_cmp(&b),
        (Some(a), _) if !a.is_finite() => None,
        (_, Some(b)) if !b.is_finite() => None,
        _ => Some(actual.cmp(expected)),
    }
}

fn in_list(actual: &str, list: &str) -> bool {
    list.split(',').any(|item| item.trim() == actual)
}

/// Evaluate one condition; a missing attribute never satisfies it
pub fn evaluate_condition(condition: &Condition, attributes: &HashMap<String, String>) -> bool {
    let Some(actual) = attributes.get(&condition.attribute) else {
        return false;
    };
    let expected = condition.expected.as_str();
    match condition.op {
        Comparison::Eq => compare(actual, expected) == Some(Ordering::Equal),
        Comparison::Ne => compare(actual, expected) != Some(Ordering::Equal),
        Comparison::Lt => compare(actual, expected) == Some(Ordering::Less),
        Comparison::Gt => compare(actual, expected) == Some(Ordering::Greater),
        Comparison::Le => matches!(
            compare(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Comparison::Ge => matches!(
            compare(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Comparison::In => in_list(actual, expected),
        Comparison::NotIn => !in_list(actual, expected),
    }
}

/// Check a usage against every enabled rule of its scope
///
/// Returns every violation, highest rule priority first and otherwise in rule
/// declaration order; an empty list means
/// the usage is allowed.
pub fn validate(registry: &TemplateRegistry, target: &Target) -> Vec<Violation> {
    let mut violations = Vec::new();
    for rule in registry.constraints().active_in(target.scope) {
        if !rule_matches(rule, target, registry) {
            continue;
        }
        let failed = if rule.conditions.is_empty() {
            Some(None)
        } else {
            rule.conditions
                .iter()
                .find(|c| !evaluate_condition(c, &target.attributes))
                .map(|c| Some(c.clone()))
        };
        if let Some(failed_condition) = failed {
            violations.push(Violation {
                rule_name: rule.name.clone(),
                scope: target.scope,
                target_name: target.name.clone(),
                failed_condition,
            });
        }
    }
    if !violations.is_empty() {
        tracing::debug!(
            scope = %target.scope,
            target = %target.name,
            count = violations.len(),
            "constraint violations"
        );
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::TypeCategory;
    use crate::definition::{DefinitionKind, TemplateDefinition};

    fn registry_with(rules: Vec<ConstraintRule>) -> TemplateRegistry {
        let mut registry = TemplateRegistry::new();
        for rule in rules {
            registry.constraints_mut().add(rule).unwrap();
        }
        registry
    }

    #[test]
    fn test_global_with_exception() {
        let registry = registry_with(vec![
            ConstraintRule::global("no_elements", ConstraintScope::Element).with_exception("footer"),
        ]);
        for name in ["div", "span", "header"] {
            let violations = validate(&registry, &Target::new(ConstraintScope::Element, name));
            assert_eq!(violations.len(), 1, "{} should be rejected", name);
        }
        let footer = Target::new(ConstraintScope::Element, "footer").with_attribute("class", "x");
        assert!(validate(&registry, &footer).is_empty());
    }

    #[test]
    fn test_precise_only_matches_name() {
        let registry = registry_with(vec![ConstraintRule::precise(
            "no_span",
            ConstraintScope::Element,
            "span",
        )]);
        assert!(validate(&registry, &Target::new(ConstraintScope::Element, "div")).is_empty());
        assert_eq!(
            validate(&registry, &Target::new(ConstraintScope::Element, "span")).len(),
            1
        );
        // Scope must match too
        assert!(validate(&registry, &Target::new(ConstraintScope::Style, "span")).is_empty());
    }

    #[test]
    fn test_conditions_are_anded() {
        let registry = registry_with(vec![ConstraintRule::precise(
            "sized_images",
            ConstraintScope::Element,
            "img",
        )
        .with_condition(Condition::new("width", Comparison::Le, "800"))
        .with_condition(Condition::new("alt", Comparison::Ne, ""))]);

        let ok = Target::new(ConstraintScope::Element, "img")
            .with_attribute("width", "640")
            .with_attribute("alt", "logo");
        assert!(validate(&registry, &ok).is_empty());

        let too_wide = Target::new(ConstraintScope::Element, "img")
            .with_attribute("width", "1024")
            .with_attribute("alt", "logo");
        let violations = validate(&registry, &too_wide);
        assert_eq!(
            violations[0].failed_condition,
            Some(Condition::new("width", Comparison::Le, "800"))
        );

        let missing = Target::new(ConstraintScope::Element, "img").with_attribute("width", "10");
        assert_eq!(
            validate(&registry, &missing)[0].failed_condition,
            Some(Condition::new("alt", Comparison::Ne, ""))
        );
    }

    #[test]
    fn test_type_rule_uses_registry_category() {
        let mut registry = registry_with(vec![ConstraintRule::of_type(
            "no_style_templates",
            ConstraintScope::Template,
            TypeCategory::Template(Some(DefinitionKind::StyleGroup)),
        )]);
        registry
            .insert_template(TemplateDefinition::new(DefinitionKind::StyleGroup, "Theme"))
            .unwrap();
        registry
            .insert_template(TemplateDefinition::new(DefinitionKind::Element, "Card"))
            .unwrap();
        assert_eq!(
            validate(&registry, &Target::new(ConstraintScope::Template, "Theme")).len(),
            1
        );
        assert!(validate(&registry, &Target::new(ConstraintScope::Template, "Card")).is_empty());
    }

    #[test]
    fn test_html_category() {
        let registry = registry_with(vec![ConstraintRule::of_type(
            "no_raw_html",
            ConstraintScope::Element,
            TypeCategory::Html,
        )]);
        assert_eq!(
            validate(&registry, &Target::new(ConstraintScope::Element, "div")).len(),
            1
        );
    }

    #[test]
    fn test_disabled_rules_skipped() {
        let mut registry = registry_with(vec![ConstraintRule::global(
            "no_imports",
            ConstraintScope::Import,
        )]);
        let target = Target::new(ConstraintScope::Import, "lib.cmod");
        assert_eq!(validate(&registry, &target).len(), 1);
        registry.constraints_mut().disable("no_imports").unwrap();
        assert!(validate(&registry, &target).is_empty());
    }

    #[test]
    fn test_all_violations_reported() {
        let registry = registry_with(vec![
            ConstraintRule::global("first", ConstraintScope::Attribute),
            ConstraintRule::precise("second", ConstraintScope::Attribute, "onclick"),
        ]);
        let violations = validate(&registry, &Target::new(ConstraintScope::Attribute, "onclick"));
        let names: Vec<&str> = violations.iter().map(|v| v.rule_name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_comparisons() {
        let mut attrs = HashMap::new();
        attrs.insert("n".to_string(), "9".to_string());
        attrs.insert("mode".to_string(), "dark".to_string());
        let check = |attr: &str, op, expected: &str| {
            evaluate_condition(&Condition::new(attr, op, expected), &attrs)
        };
        // numeric, not lexicographic
        assert!(check("n", Comparison::Lt, "10"));
        assert!(check("n", Comparison::Ge, "9.0"));
        assert!(check("n", Comparison::Eq, "9"));
        assert!(check("mode", Comparison::In, "light, dark"));
        assert!(check("mode", Comparison::NotIn, "light,auto"));
        assert!(!check("mode", Comparison::Gt, "zebra"));
        assert!(!check("absent", Comparison::Ne, "x"));
    }

    #[test]
    fn test_non_finite_numbers_never_order() {
        for value in ["NaN", "inf", "-inf", "infinity"] {
            let mut attrs = HashMap::new();
            attrs.insert("width".to_string(), value.to_string());
            let check = |op| evaluate_condition(&Condition::new("width", op, "800"), &attrs);
            assert!(!check(Comparison::Le), "{} <= 800", value);
            assert!(!check(Comparison::Ge), "{} >= 800", value);
            assert!(!check(Comparison::Eq), "{} == 800", value);
            assert!(!check(Comparison::Lt), "{} < 800", value);
            assert!(!check(Comparison::Gt), "{} > 800", value);
            assert!(check(Comparison::Ne), "{} != 800", value);
        }
    }

    #[test]
    fn test_nan_width_violates_limit() {
        let registry = registry_with(vec![ConstraintRule::global("narrow", ConstraintScope::Element)
            .with_condition(Condition::new("width", Comparison::Le, "800"))]);
        let target = Target::new(ConstraintScope::Element, "div").with_attribute("width", "NaN");
        assert_eq!(validate(&registry, &target).len(), 1);
    }

    #[test]
    fn test_violation_display() {
        let v = Violation {
            rule_name: "no_span".into(),
            scope: ConstraintScope::Element,
            target_name: "span".into(),
            failed_condition: None,
        };
        insta::assert_snapshot!(v.to_string(), @"constraint 'no_span' forbids element 'span'");
        let v = Violation {
            failed_condition: Some(Condition::new("width", Comparison::Le, "800")),
            ..v
        };
        insta::assert_snapshot!(v.to_string(), @"constraint 'no_span' violated by element 'span': requires width <= 800");
        assert!(!v.suggestion().is_empty());
    }
}
