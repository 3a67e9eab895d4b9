//! Data model for templates, customs and their members

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::constraint::ConstraintRule;

/// Byte range in declaration source text
pub type Span = std::ops::Range<usize>;

/// Key prefix used by explicit-inheritance sentinel entries
pub const INHERIT_KEY_PREFIX: &str = "@inherit ";

/// What a template or custom produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DefinitionKind {
    /// Property `key: value` pairs
    StyleGroup,
    /// Literal child constructs
    Element,
    /// `name -> value` pairs
    VariableGroup,
}

impl DefinitionKind {
    pub const ALL: [DefinitionKind; 3] = [
        DefinitionKind::StyleGroup,
        DefinitionKind::Element,
        DefinitionKind::VariableGroup,
    ];

    /// Keyword used in manifests and on the command line
    pub fn keyword(self) -> &'static str {
        match self {
            DefinitionKind::StyleGroup => "style",
            DefinitionKind::Element => "element",
            DefinitionKind::VariableGroup => "var",
        }
    }

    /// Parse a kind keyword (`style`, `element`, `var`)
    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "style" | "style-group" => Some(DefinitionKind::StyleGroup),
            "element" => Some(DefinitionKind::Element),
            "var" | "variable-group" => Some(DefinitionKind::VariableGroup),
            _ => None,
        }
    }
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionKind::StyleGroup => write!(f, "style group"),
            DefinitionKind::Element => write!(f, "element"),
            DefinitionKind::VariableGroup => write!(f, "variable group"),
        }
    }
}

/// Whether a definition is a template or a custom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DefinitionClass {
    Template,
    Custom,
}

impl fmt::Display for DefinitionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionClass::Template => write!(f, "template"),
            DefinitionClass::Custom => write!(f, "custom"),
        }
    }
}

/// Registry key of a definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefinitionKey {
    pub class: DefinitionClass,
    pub kind: DefinitionKind,
    pub name: String,
}

impl DefinitionKey {
    pub fn template(kind: DefinitionKind, name: impl Into<String>) -> Self {
        Self {
            class: DefinitionClass::Template,
            kind,
            name: name.into(),
        }
    }

    pub fn custom(kind: DefinitionKind, name: impl Into<String>) -> Self {
        Self {
            class: DefinitionClass::Custom,
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for DefinitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.class, self.name)
    }
}

/// Declared type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    StringList,
    StringMap,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::String => write!(f, "string"),
            ParamType::StringList => write!(f, "list of strings"),
            ParamType::StringMap => write!(f, "map of strings"),
        }
    }
}

/// A literal parameter value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Str(String),
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

impl ParamValue {
    pub fn str(s: impl Into<String>) -> Self {
        ParamValue::Str(s.into())
    }

    /// Declared type this value satisfies
    pub fn param_type(&self) -> ParamType {
        match self {
            ParamValue::Str(_) => ParamType::String,
            ParamValue::List(_) => ParamType::StringList,
            ParamValue::Map(_) => ParamType::StringMap,
        }
    }

    /// Text substituted for a placeholder bound to this value
    pub fn render(&self, list_separator: &str) -> String {
        match self {
            ParamValue::Str(s) => s.clone(),
            ParamValue::List(items) => items.join(list_separator),
            ParamValue::Map(map) => map
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v))
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

/// Parameter binding supplied at a use-site
pub type Bindings = HashMap<String, ParamValue>;

/// A declared template or custom parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub param_type: ParamType,
    pub default: Option<ParamValue>,
    pub required: bool,
}

impl Parameter {
    /// An optional string parameter without a default
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: ParamType::String,
            default: None,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_type(mut self, param_type: ParamType) -> Self {
        self.param_type = param_type;
        self
    }

    pub fn with_default(mut self, value: impl Into<ParamValue>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Value half of a member entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberValue {
    /// Concrete value, possibly containing `{{param}}` placeholders
    Value(String),
    /// Key declared without a value; supplied by the call site
    Unvalued,
    /// Explicit-inheritance sentinel naming the parent template
    Inherit(String),
}

/// One ordered entry of a template, custom or instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub key: String,
    pub value: MemberValue,
}

impl Member {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: MemberValue::Value(value.into()),
        }
    }

    pub fn unvalued(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: MemberValue::Unvalued,
        }
    }

    /// Sentinel recording an explicit inheritance from `parent`
    pub fn inherit_marker(parent: &str) -> Self {
        Self {
            key: format!("{}{}", INHERIT_KEY_PREFIX, parent),
            value: MemberValue::Inherit(parent.to_string()),
        }
    }

    /// Concrete value, if any
    pub fn value(&self) -> Option<&str> {
        match &self.value {
            MemberValue::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_inherit_marker(&self) -> bool {
        matches!(self.value, MemberValue::Inherit(_))
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            MemberValue::Value(v) => write!(f, "{}: {}", self.key, v),
            MemberValue::Unvalued => write!(f, "{}", self.key),
            MemberValue::Inherit(parent) => write!(f, "inherit {}", parent),
        }
    }
}

/// How a template pulls in its parent's content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InheritanceMode {
    /// Parent content merged transparently
    #[default]
    Compositional,
    /// Parent named through a visible `inherit` entry
    Explicit,
}

/// A stored template declaration
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateDefinition {
    pub name: String,
    pub kind: DefinitionKind,
    pub parameters: Vec<Parameter>,
    pub members: Vec<Member>,
    pub parent: Option<String>,
    pub inheritance: InheritanceMode,
    /// Location of the declaration, when the parser provides one
    pub span: Option<Span>,
}

impl TemplateDefinition {
    pub fn new(kind: DefinitionKind, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            parameters: Vec::new(),
            members: Vec::new(),
            parent: None,
            inheritance: InheritanceMode::Compositional,
            span: None,
        }
    }

    pub fn with_member(mut self, member: Member) -> Self {
        self.members.push(member);
        self
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Inherit compositionally from `parent`
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Inherit explicitly from `parent`
    pub fn inherits(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self.inheritance = InheritanceMode::Explicit;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn key(&self) -> DefinitionKey {
        DefinitionKey::template(self.kind, self.name.clone())
    }

    pub fn parent_key(&self) -> Option<DefinitionKey> {
        self.parent
            .as_ref()
            .map(|p| DefinitionKey::template(self.kind, p.clone()))
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Placement of an inserted entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertPosition {
    Before(String),
    After(String),
    /// Replace the anchor entry in place
    Replace(String),
    AtTop,
    AtBottom,
}

impl InsertPosition {
    pub fn anchor(&self) -> Option<&str> {
        match self {
            InsertPosition::Before(a) | InsertPosition::After(a) | InsertPosition::Replace(a) => {
                Some(a)
            }
            InsertPosition::AtTop | InsertPosition::AtBottom => None,
        }
    }
}

/// One step of a custom's operation log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Overwrite an entry in place, or append it
    Add(Member),
    Insert {
        member: Member,
        position: InsertPosition,
    },
    /// Remove the entry with this key, if present
    Delete(String),
    /// Strip values from every entry of the result (style groups only)
    Unvalued,
    /// Use only the base template's own members
    DeleteInheritance,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Add(m) => write!(f, "add {}", m.key),
            Operation::Insert { member, position } => match position {
                InsertPosition::Before(a) => write!(f, "insert {} before {}", member.key, a),
                InsertPosition::After(a) => write!(f, "insert {} after {}", member.key, a),
                InsertPosition::Replace(a) => write!(f, "insert {} replacing {}", member.key, a),
                InsertPosition::AtTop => write!(f, "insert {} at top", member.key),
                InsertPosition::AtBottom => write!(f, "insert {} at bottom", member.key),
            },
            Operation::Delete(key) => write!(f, "delete {}", key),
            Operation::Unvalued => write!(f, "unvalued"),
            Operation::DeleteInheritance => write!(f, "delete inheritance"),
        }
    }
}

/// A stored custom declaration
#[derive(Debug, Clone, PartialEq)]
pub struct CustomDefinition {
    pub name: String,
    pub kind: DefinitionKind,
    pub base: Option<String>,
    pub parameters: Vec<Parameter>,
    pub operations: Vec<Operation>,
    pub span: Option<Span>,
}

impl CustomDefinition {
    pub fn new(kind: DefinitionKind, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            base: None,
            parameters: Vec::new(),
            operations: Vec::new(),
            span: None,
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_operation(mut self, op: Operation) -> Self {
        self.operations.push(op);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn key(&self) -> DefinitionKey {
        DefinitionKey::custom(self.kind, self.name.clone())
    }

    pub fn base_key(&self) -> Option<DefinitionKey> {
        self.base
            .as_ref()
            .map(|b| DefinitionKey::template(self.kind, b.clone()))
    }

    pub fn deletes_inheritance(&self) -> bool {
        self.operations
            .iter()
            .any(|op| matches!(op, Operation::DeleteInheritance))
    }
}

/// A stored template or custom
#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    Template(TemplateDefinition),
    Custom(CustomDefinition),
}

impl Definition {
    pub fn key(&self) -> DefinitionKey {
        match self {
            Definition::Template(t) => t.key(),
            Definition::Custom(c) => c.key(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Definition::Template(t) => &t.name,
            Definition::Custom(c) => &c.name,
        }
    }

    /// Key of the parent template or custom base
    pub fn parent_key(&self) -> Option<DefinitionKey> {
        match self {
            Definition::Template(t) => t.parent_key(),
            Definition::Custom(c) => c.base_key(),
        }
    }

    pub fn span(&self) -> Option<&Span> {
        match self {
            Definition::Template(t) => t.span.as_ref(),
            Definition::Custom(c) => c.span.as_ref(),
        }
    }
}

/// Any record the upstream parser submits for insertion
#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Template(TemplateDefinition),
    Custom(CustomDefinition),
    Constraint(ConstraintRule),
}

impl Declaration {
    /// Location of the declaration, when the parser provides one
    pub fn span(&self) -> Option<&Span> {
        match self {
            Declaration::Template(t) => t.span.as_ref(),
            Declaration::Custom(c) => c.span.as_ref(),
            Declaration::Constraint(r) => r.span.as_ref(),
        }
    }

    /// Display name used in diagnostics
    pub fn describe(&self) -> String {
        match self {
            Declaration::Template(t) => t.key().to_string(),
            Declaration::Custom(c) => c.key().to_string(),
            Declaration::Constraint(r) => format!("constraint {}", r.name),
        }
    }
}

impl From<TemplateDefinition> for Declaration {
    fn from(def: TemplateDefinition) -> Self {
        Declaration::Template(def)
    }
}

impl From<CustomDefinition> for Declaration {
    fn from(def: CustomDefinition) -> Self {
        Declaration::Custom(def)
    }
}

impl From<ConstraintRule> for Declaration {
    fn from(rule: ConstraintRule) -> Self {
        Declaration::Constraint(rule)
    }
}

/// A materialized template or custom, tagged with its instance name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub name: String,
    pub source: DefinitionKey,
    pub members: Vec<Member>,
    /// Set when an `Unvalued` operation stripped the group's values
    pub unvalued: bool,
}

impl Instance {
    pub fn get(&self, key: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.key == key)
    }

    /// Supply values for unvalued keys; returns the keys still unvalued
    pub fn fill_unvalued(&mut self, values: &HashMap<String, String>) -> Vec<String> {
        for member in &mut self.members {
            if member.value == MemberValue::Unvalued {
                if let Some(v) = values.get(&member.key) {
                    member.value = MemberValue::Value(v.clone());
                }
            }
        }
        for key in values.keys() {
            if self.get(key).is_none() {
                tracing::debug!(instance = %self.name, key = %key, "fill value for unknown key ignored");
            }
        }
        self.members
            .iter()
            .filter(|m| m.value == MemberValue::Unvalued)
            .map(|m| m.key.clone())
            .collect()
    }
}
