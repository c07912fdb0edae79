//! Domain-level errors (no external dependencies)

use thiserror::Error;

/// Domain errors represent violations of the form/formula model.
///
/// An indeterminate formula result is not an error; it is a `None` value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("unknown operator '{operator}' in formula '{expression}'")]
    UnknownOperator {
        operator: String,
        expression: String,
    },

    #[error("empty formula expression at {0}")]
    EmptyFormula(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("node {0} is not a container")]
    NotAContainer(String),

    #[error("node {0} is not an array")]
    NotAnArray(String),

    #[error("duplicate key '{key}' under {parent}")]
    DuplicateKey { parent: String, key: String },

    #[error("cycle detected in formula graph: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    #[error("invalid form document: {0}")]
    InvalidDocument(String),
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
