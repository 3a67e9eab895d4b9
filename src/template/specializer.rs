//! Custom specialization - replays a custom's operation log over its base
//! template and binds parameters for one instance

use std::collections::HashMap;

use crate::config::EngineConfig;
use crate::definition::{
    Bindings, CustomDefinition, DefinitionKey, DefinitionKind, InsertPosition, Instance, Member,
    MemberValue, Operation, Parameter, ParamValue,
};

use super::error::DefinitionError;
use super::registry::TemplateRegistry;
use super::resolver::{merge_members, TemplateResolver};

/// Working state of an operation replay
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Replay {
    pub members: Vec<Member>,
    /// Set once an `Unvalued` operation has been applied
    pub unvalued: bool,
}

impl Replay {
    pub fn new(members: Vec<Member>) -> Self {
        Self {
            members,
            unvalued: false,
        }
    }

    fn position_of(&self, key: &str) -> Option<usize> {
        self.members.iter().position(|m| m.key == key)
    }

    /// Apply one operation; `index` is its position in the log
    pub fn apply(&mut self, op: &Operation, index: usize, custom: &str) -> Result<(), DefinitionError> {
        tracing::trace!(custom, index, op = %op, "applying operation");
        match op {
            Operation::Add(member) => merge_members(&mut self.members, std::slice::from_ref(member)),
            Operation::Insert { member, position } => self.insert(member, position, index, custom)?,
            Operation::Delete(key) => match self.position_of(key) {
                Some(i) => {
                    self.members.remove(i);
                }
                None => tracing::debug!(custom, key = %key, "delete of absent entry ignored"),
            },
            Operation::Unvalued => self.unvalued = true,
            Operation::DeleteInheritance => self.members.retain(|m| !m.is_inherit_marker()),
        }
        Ok(())
    }

    fn insert(
        &mut self,
        member: &Member,
        position: &InsertPosition,
        index: usize,
        custom: &str,
    ) -> Result<(), DefinitionError> {
        let anchor = match position.anchor() {
            Some(anchor) => Some(self.position_of(anchor).ok_or_else(|| {
                DefinitionError::AnchorNotFound {
                    custom: custom.to_string(),
                    anchor: anchor.to_string(),
                    index,
                }
            })?),
            None => None,
        };

        let mut anchor = match anchor {
            Some(at) if self.members[at].key == member.key => {
                // Inserting an entry relative to itself rewrites it in place
                self.members[at] = member.clone();
                return Ok(());
            }
            other => other,
        };

        // Keys stay unique: an existing entry moves to the new position
        if let Some(existing) = self.position_of(&member.key) {
            self.members.remove(existing);
            if let Some(at) = anchor.as_mut() {
                if existing < *at {
                    *at -= 1;
                }
            }
        }

        match (position, anchor) {
            (InsertPosition::AtTop, _) => self.members.insert(0, member.clone()),
            (InsertPosition::AtBottom, _) => self.members.push(member.clone()),
            (InsertPosition::Before(_), Some(at)) => self.members.insert(at, member.clone()),
            (InsertPosition::After(_), Some(at)) => self.members.insert(at + 1, member.clone()),
            (InsertPosition::Replace(_), Some(at)) => self.members[at] = member.clone(),
            // Anchored positions always found their anchor above
            (_, None) => self.members.push(member.clone()),
        }
        Ok(())
    }

    /// Strip values from every concrete entry
    fn strip_values(&mut self) {
        for member in &mut self.members {
            if matches!(member.value, MemberValue::Value(_)) {
                member.value = MemberValue::Unvalued;
            }
        }
    }
}

/// Replay a custom's operations over its base members
pub fn replay_operations(
    custom: &CustomDefinition,
    base: Vec<Member>,
) -> Result<Replay, DefinitionError> {
    let mut replay = Replay::new(base);
    for (index, op) in custom.operations.iter().enumerate() {
        replay.apply(op, index, &custom.name)?;
    }
    if replay.unvalued {
        replay.strip_values();
    }
    Ok(replay)
}

/// Fetch the base template of a custom, distinguishing a kind mismatch
fn base_members(
    registry: &TemplateRegistry,
    resolver: &TemplateResolver,
    custom: &CustomDefinition,
    base: &str,
) -> Result<(Vec<Member>, Vec<Parameter>), DefinitionError> {
    let template = match registry.template(custom.kind, base) {
        Ok(template) => template,
        Err(err) => {
            return match registry.template_kinds(base).first() {
                Some(found) => Err(DefinitionError::KindMismatch {
                    custom: custom.name.clone(),
                    base: base.to_string(),
                    expected: custom.kind,
                    found: *found,
                }),
                None => Err(err),
            };
        }
    };

    if custom.deletes_inheritance() {
        return Ok((template.members.clone(), template.parameters.clone()));
    }

    let members = resolver.resolve(registry, custom.kind, base)?;
    let mut parameters = Vec::new();
    for ancestor in registry.ancestor_chain(custom.kind, base)?.iter().rev() {
        merge_parameters(&mut parameters, &ancestor.parameters);
    }
    Ok(((*members).clone(), parameters))
}

fn merge_parameters(parameters: &mut Vec<Parameter>, incoming: &[Parameter]) {
    for param in incoming {
        match parameters.iter_mut().find(|p| p.name == param.name) {
            Some(existing) => *existing = param.clone(),
            None => parameters.push(param.clone()),
        }
    }
}

/// Produce the resolved member list of one custom instance
pub fn specialize(
    registry: &TemplateRegistry,
    resolver: &TemplateResolver,
    config: &EngineConfig,
    kind: DefinitionKind,
    custom_name: &str,
    instance_name: &str,
    bindings: &Bindings,
) -> Result<Instance, DefinitionError> {
    let custom = registry.custom(kind, custom_name)?;

    let (base, mut parameters) = match &custom.base {
        Some(base) => base_members(registry, resolver, custom, base)?,
        None => (Vec::new(), Vec::new()),
    };
    merge_parameters(&mut parameters, &custom.parameters);

    let mut replay = replay_operations(custom, base)?;
    let values = bind_parameters(&custom.name, &parameters, bindings, config)?;
    substitute_members(&mut replay.members, &values, &custom.name);

    tracing::debug!(
        custom = %custom.name,
        instance = instance_name,
        members = replay.members.len(),
        "specialized custom"
    );
    Ok(Instance {
        name: instance_name.to_string(),
        source: custom.key(),
        members: replay.members,
        unvalued: replay.unvalued,
    })
}

/// Produce the member list of one template instance
pub fn instantiate(
    registry: &TemplateRegistry,
    resolver: &TemplateResolver,
    config: &EngineConfig,
    kind: DefinitionKind,
    template_name: &str,
    instance_name: &str,
    bindings: &Bindings,
) -> Result<Instance, DefinitionError> {
    let members = resolver.resolve(registry, kind, template_name)?;
    let mut parameters = Vec::new();
    for ancestor in registry.ancestor_chain(kind, template_name)?.iter().rev() {
        merge_parameters(&mut parameters, &ancestor.parameters);
    }

    let mut members = (*members).clone();
    let values = bind_parameters(template_name, &parameters, bindings, config)?;
    substitute_members(&mut members, &values, template_name);

    Ok(Instance {
        name: instance_name.to_string(),
        source: DefinitionKey::template(kind, template_name),
        members,
        unvalued: false,
    })
}

/// Compute the text bound to each placeholder name
///
/// Declared parameters take their binding, then their default; a required
/// parameter with neither is an error and an optional one renders empty.
/// Bindings for undeclared names are rejected in strict mode and otherwise
/// still usable by placeholders.
pub fn bind_parameters(
    definition: &str,
    parameters: &[Parameter],
    bindings: &Bindings,
    config: &EngineConfig,
) -> Result<HashMap<String, String>, DefinitionError> {
    let mut values = HashMap::new();

    let mut undeclared: Vec<&String> = bindings
        .keys()
        .filter(|name| !parameters.iter().any(|p| &p.name == *name))
        .collect();
    undeclared.sort();
    for name in undeclared {
        if config.strict_bindings {
            return Err(DefinitionError::UnknownParameter {
                definition: definition.to_string(),
                param: name.clone(),
            });
        }
        tracing::debug!(definition, param = %name, "binding for undeclared parameter");
        if let Some(value) = bindings.get(name) {
            values.insert(name.clone(), value.render(&config.list_separator));
        }
    }

    for param in parameters {
        let value: Option<&ParamValue> = bindings.get(&param.name).or(param.default.as_ref());
        match value {
            Some(value) => {
                if value.param_type() != param.param_type {
                    return Err(DefinitionError::InvalidParameterType {
                        definition: definition.to_string(),
                        param: param.name.clone(),
                        expected: param.param_type,
                        found: value.param_type(),
                    });
                }
                values.insert(param.name.clone(), value.render(&config.list_separator));
            }
            None if param.required => {
                return Err(DefinitionError::missing_parameter(definition, &param.name));
            }
            None => {
                values.insert(param.name.clone(), String::new());
            }
        }
    }
    Ok(values)
}

fn substitute_members(members: &mut [Member], values: &HashMap<String, String>, definition: &str) {
    for member in members {
        if let MemberValue::Value(text) = &member.value {
            if text.contains("{{") {
                member.value = MemberValue::Value(substitute_placeholders(text, values, definition));
            }
        }
    }
}

/// Replace every `{{name}}` in `text`; unknown names are left verbatim
pub fn substitute_placeholders(
    text: &str,
    values: &HashMap<String, String>,
    definition: &str,
) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            // Unterminated placeholder
            out.push_str(&rest[start..]);
            return out;
        };
        let name = after[..end].trim();
        match values.get(name) {
            Some(value) => out.push_str(value),
            None => {
                tracing::warn!(definition, placeholder = name, "unresolved placeholder");
                out.push_str(&rest[start..start + 2 + end + 2]);
            }
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}
