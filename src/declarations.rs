//! Declaration manifests
//!
//! A manifest is a TOML document listing template, custom and constraint
//! records. Tables of different kinds may be interleaved freely. It is how declarations reach the
//! engine when no upstream parser is attached (the CLI, tests, fixtures).
//!
//! ```toml
//! [[template]]
//! name = "Theme"
//! kind = "style"
//! members = [{ key = "color", value = "{{color}}" }, { key = "size", value = "10" }]
//! parameters = [{ name = "color", default = "red" }]
//!
//! [[custom]]
//! name = "Primary"
//! kind = "style"
//! base = "Theme"
//! operations = [
//!     { op = "delete", key = "size" },
//!     { op = "insert", key = "weight", value = "bold", position = "after", anchor = "color" },
//! ]
//!
//! [[constraint]]
//! name = "no_span"
//! scope = "element"
//! type = "precise"
//! target = "span"
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use toml::Spanned;

use crate::config::EngineConfig;
use crate::constraint::{
    Comparison, Condition, ConstraintRule, ConstraintScope, RuleType, TypeCategory,
};
use crate::definition::{
    CustomDefinition, Declaration, DefinitionKind, InheritanceMode, InsertPosition, Member,
    Operation, ParamType, ParamValue, Parameter, Span, TemplateDefinition,
};
use crate::error::DeclarationError;

/// Parsed manifest: optional engine settings plus records in manifest order
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub config: Option<EngineConfig>,
    pub declarations: Vec<Declaration>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    engine: Option<EngineConfig>,
    #[serde(default)]
    template: Vec<RawTemplate>,
    #[serde(default)]
    custom: Vec<RawCustom>,
    #[serde(default)]
    constraint: Vec<RawConstraint>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTemplate {
    name: Spanned<String>,
    kind: String,
    parent: Option<String>,
    inheritance: Option<String>,
    #[serde(default)]
    parameters: Vec<RawParameter>,
    #[serde(default)]
    members: Vec<RawMember>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCustom {
    name: Spanned<String>,
    kind: String,
    base: Option<String>,
    #[serde(default)]
    parameters: Vec<RawParameter>,
    #[serde(default)]
    operations: Vec<RawOperation>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawParameter {
    name: String,
    #[serde(rename = "type")]
    param_type: Option<String>,
    default: Option<RawValue>,
    #[serde(default)]
    required: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Str(String),
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

impl From<RawValue> for ParamValue {
    fn from(raw: RawValue) -> Self {
        match raw {
            RawValue::Str(s) => ParamValue::Str(s),
            RawValue::List(items) => ParamValue::List(items),
            RawValue::Map(map) => ParamValue::Map(map),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMember {
    key: String,
    value: Option<String>,
}

impl From<RawMember> for Member {
    fn from(raw: RawMember) -> Self {
        match raw.value {
            Some(value) => Member::new(raw.key, value),
            None => Member::unvalued(raw.key),
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
enum RawOperation {
    Add {
        key: String,
        value: Option<String>,
    },
    Insert {
        key: String,
        value: Option<String>,
        position: String,
        anchor: Option<String>,
    },
    Delete {
        key: String,
    },
    Unvalued,
    DeleteInheritance,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConstraint {
    name: Spanned<String>,
    scope: String,
    #[serde(rename = "type")]
    rule_type: String,
    target: Option<String>,
    category: Option<String>,
    #[serde(default)]
    conditions: Vec<RawCondition>,
    #[serde(default)]
    exceptions: BTreeSet<String>,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    #[serde(default)]
    priority: i32,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCondition {
    attribute: String,
    op: String,
    value: String,
}

fn parse_kind(kind: &str, span: &Span) -> Result<DefinitionKind, DeclarationError> {
    DefinitionKind::from_keyword(kind).ok_or_else(|| {
        DeclarationError::invalid(
            Some(span.clone()),
            format!("unknown kind '{}' (expected style, element or var)", kind),
        )
    })
}

fn parse_parameter(raw: RawParameter, span: &Span) -> Result<Parameter, DeclarationError> {
    let default: Option<ParamValue> = raw.default.map(ParamValue::from);
    let param_type = match raw.param_type.as_deref() {
        Some("string") => ParamType::String,
        Some("list") => ParamType::StringList,
        Some("map") => ParamType::StringMap,
        Some(other) => {
            return Err(DeclarationError::invalid(
                Some(span.clone()),
                format!(
                    "unknown type '{}' for parameter {} (expected string, list or map)",
                    other, raw.name
                ),
            ))
        }
        None => default
            .as_ref()
            .map(ParamValue::param_type)
            .unwrap_or(ParamType::String),
    };
    Ok(Parameter {
        name: raw.name,
        param_type,
        default,
        required: raw.required,
    })
}

fn parse_operation(raw: RawOperation, span: &Span) -> Result<Operation, DeclarationError> {
    let member = |key: String, value: Option<String>| match value {
        Some(value) => Member::new(key, value),
        None => Member::unvalued(key),
    };
    Ok(match raw {
        RawOperation::Add { key, value } => Operation::Add(member(key, value)),
        RawOperation::Delete { key } => Operation::Delete(key),
        RawOperation::Unvalued => Operation::Unvalued,
        RawOperation::DeleteInheritance => Operation::DeleteInheritance,
        RawOperation::Insert {
            key,
            value,
            position,
            anchor,
        } => {
            let anchored = |anchor: Option<String>| {
                anchor.ok_or_else(|| {
                    DeclarationError::invalid(
                        Some(span.clone()),
                        format!("insert of '{}' at '{}' needs an anchor", key, position),
                    )
                })
            };
            let position = match position.as_str() {
                "before" => InsertPosition::Before(anchored(anchor)?),
                "after" => InsertPosition::After(anchored(anchor)?),
                "replace" => InsertPosition::Replace(anchored(anchor)?),
                "top" => InsertPosition::AtTop,
                "bottom" => InsertPosition::AtBottom,
                other => {
                    return Err(DeclarationError::invalid(
                        Some(span.clone()),
                        format!(
                            "unknown insert position '{}' (expected before, after, replace, top or bottom)",
                            other
                        ),
                    ))
                }
            };
            Operation::Insert {
                member: member(key, value),
                position,
            }
        }
    })
}

/// Parse a category such as `html`, `template`, `custom:style`
fn parse_category(category: &str, span: &Span) -> Result<TypeCategory, DeclarationError> {
    let (class, kind) = match category.split_once(':') {
        Some((class, kind)) => (class, Some(parse_kind(kind, span)?)),
        None => (category, None),
    };
    match (class, kind) {
        ("html", None) => Ok(TypeCategory::Html),
        ("template", kind) => Ok(TypeCategory::Template(kind)),
        ("custom", kind) => Ok(TypeCategory::Custom(kind)),
        _ => Err(DeclarationError::invalid(
            Some(span.clone()),
            format!(
                "unknown category '{}' (expected html, template[:kind] or custom[:kind])",
                category
            ),
        )),
    }
}

fn convert_template(raw: RawTemplate) -> Result<TemplateDefinition, DeclarationError> {
    let span = raw.name.span();
    let kind = parse_kind(&raw.kind, &span)?;
    let inheritance = match raw.inheritance.as_deref() {
        None | Some("compositional") => InheritanceMode::Compositional,
        Some("explicit") => InheritanceMode::Explicit,
        Some(other) => {
            return Err(DeclarationError::invalid(
                Some(span),
                format!(
                    "unknown inheritance mode '{}' (expected compositional or explicit)",
                    other
                ),
            ))
        }
    };
    let parameters = raw
        .parameters
        .into_iter()
        .map(|p| parse_parameter(p, &span))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TemplateDefinition {
        name: raw.name.into_inner(),
        kind,
        parameters,
        members: raw.members.into_iter().map(Member::from).collect(),
        parent: raw.parent,
        inheritance,
        span: Some(span),
    })
}

fn convert_custom(raw: RawCustom) -> Result<CustomDefinition, DeclarationError> {
    let span = raw.name.span();
    let kind = parse_kind(&raw.kind, &span)?;
    let parameters = raw
        .parameters
        .into_iter()
        .map(|p| parse_parameter(p, &span))
        .collect::<Result<Vec<_>, _>>()?;
    let operations = raw
        .operations
        .into_iter()
        .map(|op| parse_operation(op, &span))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CustomDefinition {
        name: raw.name.into_inner(),
        kind,
        base: raw.base,
        parameters,
        operations,
        span: Some(span),
    })
}

fn convert_constraint(raw: RawConstraint) -> Result<ConstraintRule, DeclarationError> {
    let span = raw.name.span();
    let scope = ConstraintScope::from_keyword(&raw.scope).ok_or_else(|| {
        DeclarationError::invalid(Some(span.clone()), format!("unknown scope '{}'", raw.scope))
    })?;
    let rule_type = match raw.rule_type.as_str() {
        "precise" => RuleType::Precise(raw.target.ok_or_else(|| {
            DeclarationError::invalid(Some(span.clone()), "precise constraint needs a target")
        })?),
        "type" => {
            let category = raw.category.ok_or_else(|| {
                DeclarationError::invalid(Some(span.clone()), "type constraint needs a category")
            })?;
            RuleType::Type(parse_category(&category, &span)?)
        }
        "global" => RuleType::Global,
        other => {
            return Err(DeclarationError::invalid(
                Some(span),
                format!("unknown constraint type '{}' (expected precise, type or global)", other),
            ))
        }
    };
    let conditions = raw
        .conditions
        .into_iter()
        .map(|c| {
            let op = Comparison::from_symbol(&c.op).ok_or_else(|| {
                DeclarationError::invalid(
                    Some(span.clone()),
                    format!("unknown comparison operator '{}'", c.op),
                )
            })?;
            Ok(Condition::new(c.attribute, op, c.value))
        })
        .collect::<Result<Vec<_>, DeclarationError>>()?;
    Ok(ConstraintRule {
        name: raw.name.into_inner(),
        rule_type,
        scope,
        conditions,
        exceptions: raw.exceptions,
        enabled: raw.enabled,
        priority: raw.priority,
        span: Some(span),
    })
}

/// Parse a manifest into declaration records
///
/// Records are returned in the order they appear in the source, whatever
/// their table. Nothing is inserted anywhere.
pub fn parse_manifest(source: &str) -> Result<Manifest, DeclarationError> {
    let raw: RawManifest = toml::from_str(source)?;
    let mut declarations = Vec::new();
    for template in raw.template {
        declarations.push(Declaration::Template(convert_template(template)?));
    }
    for custom in raw.custom {
        declarations.push(Declaration::Custom(convert_custom(custom)?));
    }
    for constraint in raw.constraint {
        declarations.push(Declaration::Constraint(convert_constraint(constraint)?));
    }
    // Every parsed record carries its name span; the sort is stable
    declarations.sort_by_key(|d| d.span().map_or(usize::MAX, |span| span.start));
    Ok(Manifest {
        config: raw.engine,
        declarations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_template_with_parameters() {
        let manifest = parse_manifest(
            r#"
            [[template]]
            name = "Theme"
            kind = "style"
            inheritance = "explicit"
            parent = "Base"
            members = [{ key = "color", value = "{{color}}" }, { key = "border" }]
            parameters = [
                { name = "color", default = "red" },
                { name = "fonts", default = ["Arial", "serif"] },
                { name = "extra", type = "map", required = true },
            ]
            "#,
        )
        .unwrap();
        let Declaration::Template(t) = &manifest.declarations[0] else {
            panic!("Expected template");
        };
        assert_eq!(t.name, "Theme");
        assert_eq!(t.inheritance, InheritanceMode::Explicit);
        assert_eq!(t.members, vec![Member::new("color", "{{color}}"), Member::unvalued("border")]);
        assert_eq!(t.parameters[1].param_type, ParamType::StringList);
        assert_eq!(t.parameters[2].param_type, ParamType::StringMap);
        assert!(t.parameters[2].required);
        assert!(t.span.is_some());
    }

    #[test]
    fn test_records_keep_source_order() {
        let manifest = parse_manifest(
            r#"
            [[constraint]]
            name = "first_rule"
            scope = "element"
            type = "global"

            [[custom]]
            name = "Primary"
            kind = "style"
            base = "Theme"

            [[template]]
            name = "Theme"
            kind = "style"

            [[constraint]]
            name = "last_rule"
            scope = "style"
            type = "global"
            priority = 3
            "#,
        )
        .unwrap();
        let order: Vec<String> = manifest.declarations.iter().map(|d| d.describe()).collect();
        assert_eq!(
            order,
            vec![
                "constraint first_rule",
                "custom Primary",
                "template Theme",
                "constraint last_rule",
            ]
        );
        let Declaration::Constraint(last) = &manifest.declarations[3] else {
            panic!("Expected constraint");
        };
        assert_eq!(last.priority, 3);
    }

    #[test]
    fn test_parse_custom_operations() {
        let manifest = parse_manifest(
            r#"
            [[custom]]
            name = "Primary"
            kind = "style"
            base = "Theme"
            operations = [
                { op = "delete", key = "color" },
                { op = "add", key = "color", value = "blue" },
                { op = "insert", key = "w", value = "bold", position = "before", anchor = "color" },
                { op = "insert", key = "z", value = "1", position = "top" },
                { op = "unvalued" },
                { op = "delete-inheritance" },
            ]
            "#,
        )
        .unwrap();
        let Declaration::Custom(c) = &manifest.declarations[0] else {
            panic!("Expected custom");
        };
        assert_eq!(
            c.operations,
            vec![
                Operation::Delete("color".into()),
                Operation::Add(Member::new("color", "blue")),
                Operation::Insert {
                    member: Member::new("w", "bold"),
                    position: InsertPosition::Before("color".into()),
                },
                Operation::Insert {
                    member: Member::new("z", "1"),
                    position: InsertPosition::AtTop,
                },
                Operation::Unvalued,
                Operation::DeleteInheritance,
            ]
        );
    }

    #[test]
    fn test_parse_constraints() {
        let manifest = parse_manifest(
            r#"
            [[constraint]]
            name = "no_style_templates"
            scope = "template"
            type = "type"
            category = "template:style"

            [[constraint]]
            name = "sized"
            scope = "element"
            type = "global"
            exceptions = ["footer"]
            enabled = false
            conditions = [{ attribute = "width", op = "<=", value = "800" }]
            "#,
        )
        .unwrap();
        let Declaration::Constraint(first) = &manifest.declarations[0] else {
            panic!("Expected constraint");
        };
        assert_eq!(
            first.rule_type,
            RuleType::Type(TypeCategory::Template(Some(DefinitionKind::StyleGroup)))
        );
        let Declaration::Constraint(second) = &manifest.declarations[1] else {
            panic!("Expected constraint");
        };
        assert!(!second.enabled);
        assert!(second.exceptions.contains("footer"));
        assert_eq!(second.conditions[0], Condition::new("width", Comparison::Le, "800"));
    }

    #[test]
    fn test_engine_table() {
        let manifest = parse_manifest("[engine]\nstrict-bindings = true\n").unwrap();
        assert_eq!(manifest.config.map(|c| c.strict_bindings), Some(true));
        assert!(manifest.declarations.is_empty());
    }

    #[test]
    fn test_unknown_kind_has_span() {
        let source = "[[template]]\nname = \"X\"\nkind = \"blob\"\n";
        let err = parse_manifest(source).unwrap_err();
        assert!(matches!(err, DeclarationError::Invalid { .. }));
        let span = err.span().cloned().unwrap();
        assert!(source[span].contains('X'));
    }

    #[test]
    fn test_insert_without_anchor() {
        let err = parse_manifest(
            r#"
            [[custom]]
            name = "C"
            kind = "element"
            operations = [{ op = "insert", key = "div", value = "<div/>", position = "after" }]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("needs an anchor"));
    }

    #[test]
    fn test_syntax_error() {
        let err = parse_manifest("[[template]\nname = ").unwrap_err();
        assert!(matches!(err, DeclarationError::Syntax { .. }));
    }
}
