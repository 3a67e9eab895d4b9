//! Error types for loading declaration manifests

use ariadne::{Color, Label, Report, ReportKind, Source};
use thiserror::Error;

use crate::definition::Span;
use crate::template::InsertError;

#[derive(Error, Debug)]
pub enum DeclarationError {
    /// Manifest is not valid TOML or does not have the expected shape
    #[error("invalid declaration manifest: {message}")]
    Syntax { span: Option<Span>, message: String },

    /// A record has an invalid field value
    #[error("{message}")]
    Invalid { span: Option<Span>, message: String },

    /// The registry rejected a well-formed record
    #[error("{declaration}: {source}")]
    Rejected {
        declaration: String,
        span: Option<Span>,
        #[source]
        source: InsertError,
    },
}

impl From<toml::de::Error> for DeclarationError {
    fn from(err: toml::de::Error) -> Self {
        DeclarationError::Syntax {
            span: err.span(),
            message: err.message().to_string(),
        }
    }
}

impl DeclarationError {
    pub fn invalid(span: Option<Span>, message: impl Into<String>) -> Self {
        DeclarationError::Invalid {
            span,
            message: message.into(),
        }
    }

    /// Get the source span if available
    pub fn span(&self) -> Option<&Span> {
        match self {
            DeclarationError::Syntax { span, .. }
            | DeclarationError::Invalid { span, .. }
            | DeclarationError::Rejected { span, .. } => span.as_ref(),
        }
    }

    /// Format the error with source context using ariadne
    pub fn format(&self, source: &str, filename: &str) -> String {
        let Some(span) = self.span() else {
            return format!("Error: {}", self);
        };
        let label_message = match self {
            DeclarationError::Syntax { message, .. } | DeclarationError::Invalid { message, .. } => {
                message.clone()
            }
            DeclarationError::Rejected { source, .. } => source.to_string(),
        };

        let mut buf = Vec::new();
        let written = Report::build(ReportKind::Error, filename, span.start)
            .with_message(self.to_string())
            .with_label(
                Label::new((filename, span.clone()))
                    .with_message(label_message)
                    .with_color(Color::Red),
            )
            .finish()
            .write((filename, Source::from(source)), &mut buf);
        match written {
            Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
            Err(_) => format!("Error: {}", self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{DefinitionKey, DefinitionKind};
    use crate::template::DefinitionError;

    #[test]
    fn test_format_includes_source_line() {
        let source = "[[template]]\nname = \"Theme\"\n";
        let err = DeclarationError::Rejected {
            declaration: "template Theme".to_string(),
            span: Some(20..27),
            source: InsertError::Definition(DefinitionError::DuplicateName {
                key: DefinitionKey::template(DefinitionKind::StyleGroup, "Theme"),
                span: Some(20..27),
            }),
        };
        let out = err.format(source, "decls.toml");
        assert!(out.contains("duplicate definition: template Theme"));
    }

    #[test]
    fn test_format_without_span() {
        let err = DeclarationError::invalid(None, "unknown kind 'blob'");
        assert_eq!(err.format("", "decls.toml"), "Error: unknown kind 'blob'");
    }
}
