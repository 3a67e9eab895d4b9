//! Error types for definition storage, resolution and specialization

use thiserror::Error;

use crate::definition::{DefinitionKey, DefinitionKind, ParamType, Span};

/// Errors that can occur while storing, resolving or specializing definitions
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DefinitionError {
    /// A definition with the same class, kind and name already exists
    #[error("duplicate definition: {key}")]
    DuplicateName { key: DefinitionKey, span: Option<Span> },

    /// Following parent/base references leads back to the definition
    #[error("cyclic inheritance: {}", chain.join(" -> "))]
    CyclicInheritance { chain: Vec<String>, span: Option<Span> },

    /// Definition not found in the registry
    #[error("{key} not found")]
    NotFound { key: DefinitionKey },

    /// Definition is still referenced as a parent or base
    #[error("cannot remove {key}: still referenced by {}", dependents.join(", "))]
    HasDependents {
        key: DefinitionKey,
        dependents: Vec<String>,
    },

    /// Base template exists, but under a different kind
    #[error("{custom} is a {expected} but base template {base} is a {found}")]
    KindMismatch {
        custom: String,
        base: String,
        expected: DefinitionKind,
        found: DefinitionKind,
    },

    /// Operation not permitted for this definition
    #[error("invalid operation in {definition}: {reason}")]
    InvalidOperation {
        definition: String,
        reason: String,
        span: Option<Span>,
    },

    /// Insert anchor absent at that point of the operation replay
    #[error("anchor '{anchor}' not found in {custom} (operation {index})")]
    AnchorNotFound {
        custom: String,
        anchor: String,
        index: usize,
    },

    /// Required parameter without binding or default
    #[error("missing required parameter: {param} for {definition}")]
    MissingParameter { definition: String, param: String },

    /// Bound value does not match the declared parameter type
    #[error("invalid value for parameter {param} of {definition}: expected {expected}, found {found}")]
    InvalidParameterType {
        definition: String,
        param: String,
        expected: ParamType,
        found: ParamType,
    },

    /// Binding names a parameter that is not declared (strict mode)
    #[error("unknown parameter {param} for {definition}")]
    UnknownParameter { definition: String, param: String },
}

impl DefinitionError {
    /// Create a not found error
    pub fn not_found(key: DefinitionKey) -> Self {
        Self::NotFound { key }
    }

    /// Create a cyclic inheritance error from a chain of display names
    pub fn cyclic(chain: Vec<String>, span: Option<Span>) -> Self {
        Self::CyclicInheritance { chain, span }
    }

    /// Create an invalid operation error
    pub fn invalid_operation(
        definition: impl Into<String>,
        reason: impl Into<String>,
        span: Option<Span>,
    ) -> Self {
        Self::InvalidOperation {
            definition: definition.into(),
            reason: reason.into(),
            span,
        }
    }

    /// Create a missing parameter error
    pub fn missing_parameter(definition: impl Into<String>, param: impl Into<String>) -> Self {
        Self::MissingParameter {
            definition: definition.into(),
            param: param.into(),
        }
    }

    /// Get the source span if available
    pub fn span(&self) -> Option<&Span> {
        match self {
            Self::DuplicateName { span, .. }
            | Self::CyclicInheritance { span, .. }
            | Self::InvalidOperation { span, .. } => span.as_ref(),
            _ => None,
        }
    }

    /// Name of the definition the error is about
    pub fn subject(&self) -> &str {
        match self {
            Self::DuplicateName { key, .. }
            | Self::NotFound { key }
            | Self::HasDependents { key, .. } => &key.name,
            Self::CyclicInheritance { chain, .. } => chain.first().map(String::as_str).unwrap_or(""),
            Self::KindMismatch { custom, .. } => custom,
            Self::InvalidOperation { definition, .. }
            | Self::MissingParameter { definition, .. }
            | Self::InvalidParameterType { definition, .. }
            | Self::UnknownParameter { definition, .. } => definition,
            Self::AnchorNotFound { custom, .. } => custom,
        }
    }
}
