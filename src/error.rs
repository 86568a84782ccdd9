//! Error types for facetgen
//!
//! Three families, matching where a problem is discovered:
//! - declaration and resolution faults surface while a [`GenerationModel`]
//!   is built and are isolated per declaration
//! - [`MappingError`] is raised while a conversion runs
//! - everything else (IO, parse, render) is plumbing
//!
//! Depth truncation and cycle breaking are successful outcomes, never errors.
//!
//! [`GenerationModel`]: crate::model::GenerationModel

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// facetgen errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Manifest parse error: {0}")]
    ManifestParse(String),

    #[error("Type parse error: {0}")]
    TypeParse(String),

    /// Malformed or contradictory directives on one facet declaration
    #[error("Declaration fault in facet '{facet}': {message}")]
    Declaration { facet: String, message: String },

    /// A nested binding that cannot be satisfied by the referenced facet
    #[error("Resolution fault in facet '{facet}': {message}")]
    Resolution { facet: String, message: String },

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error("CEL parse error: {0}")]
    CelParse(String),

    #[error("CEL evaluation error: {0}")]
    CelEval(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_norway::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn declaration(facet: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Declaration {
            facet: facet.into(),
            message: message.into(),
        }
    }

    pub fn resolution(facet: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Resolution {
            facet: facet.into(),
            message: message.into(),
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

/// Cause text for a required value that was missing at conversion time
pub const ABSENT_NESTED_VALUE: &str = "required nested value was absent";

/// Run-time mapping faults
///
/// Every variant names the facet member that failed so a caller never has to
/// decode a bare null fault.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MappingError {
    #[error("member '{member}' ({path}): {cause}")]
    Absent {
        member: String,
        path: String,
        cause: String,
    },

    #[error("member '{member}': expression `{expression}` failed: {message}")]
    Expression {
        member: String,
        expression: String,
        message: String,
    },

    #[error("member '{member}': expected {expected}, found {found}")]
    TypeMismatch {
        member: String,
        expected: String,
        found: String,
    },

    #[error("hook '{hook}' is not registered")]
    MissingHook { hook: String },

    #[error("hook '{hook}' failed: {message}")]
    Hook { hook: String, message: String },

    #[error("facet '{facet}' generates no reverse conversion")]
    ReverseUnavailable { facet: String },

    #[error("facet '{facet}' is not part of this model")]
    UnknownFacet { facet: String },
}

impl MappingError {
    pub fn absent(member: impl Into<String>, path: impl Into<String>) -> Self {
        MappingError::Absent {
            member: member.into(),
            path: path.into(),
            cause: ABSENT_NESTED_VALUE.to_string(),
        }
    }

    /// Member the fault is attributed to, when there is one
    pub fn member(&self) -> Option<&str> {
        match self {
            MappingError::Absent { member, .. }
            | MappingError::Expression { member, .. }
            | MappingError::TypeMismatch { member, .. } => Some(member),
            MappingError::MissingHook { .. }
            | MappingError::Hook { .. }
            | MappingError::ReverseUnavailable { .. }
            | MappingError::UnknownFacet { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_carries_member_and_cause() {
        let err = MappingError::absent("city", "address.city");
        assert_eq!(err.member(), Some("city"));
        let text = err.to_string();
        assert!(text.contains("city"));
        assert!(text.contains(ABSENT_NESTED_VALUE));
    }

    #[test]
    fn test_declaration_display() {
        let err = Error::declaration("PersonDto", "unknown source type 'Persn'");
        assert_eq!(
            err.to_string(),
            "Declaration fault in facet 'PersonDto': unknown source type 'Persn'"
        );
    }
}
