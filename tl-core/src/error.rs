//! Error types for the TL interpreter

use crate::ast::SourceLocation;
use thiserror::Error;

/// The kind of name that was looked up and not found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    /// A tensor binding.
    Tensor,
    /// A relation (Datalog predicate).
    Relation,
    /// An interned label.
    Label,
}

impl std::fmt::Display for NameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NameKind::Tensor => write!(f, "tensor"),
            NameKind::Relation => write!(f, "relation"),
            NameKind::Label => write!(f, "label"),
        }
    }
}

/// Main error type for TL operations.
#[derive(Error, Debug)]
pub enum TLError {
    /// A lexing or parsing error; carries the offending location.
    #[error("parse error at {loc}: {message}")]
    Parse {
        /// Location of the offending token.
        loc: SourceLocation,
        /// Human-readable description.
        message: String,
    },

    /// A tensor, relation, or label was expected to already exist.
    #[error("missing {kind}: {name}")]
    MissingName {
        /// What kind of name was missing.
        kind: NameKind,
        /// The name that was looked up.
        name: String,
    },

    /// Non-rectangular list literal, bad normalized index, out-of-range
    /// dimension, or any other shape/semantics violation.
    #[error("shape error: {0}")]
    Shape(String),

    /// Cyclic dependency among virtual-indexed equations in one group.
    #[error("cyclic dependency in virtual-index expansion: {0}")]
    Cyclic(String),

    /// No learnable parameters, missing target tensor, or a malformed
    /// learning directive argument.
    #[error("learning error: {0}")]
    Learning(String),

    /// Could not open or parse a flat-file tensor dump.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No executor applies to an equation shape. This is a programmer
    /// error (an unreachable dispatch state), not a data error.
    #[error("no executor applies to equation: {0}")]
    NoExecutor(String),
}

impl TLError {
    /// Build a [`TLError::Parse`] at the given location.
    pub fn parse(loc: SourceLocation, message: impl Into<String>) -> Self {
        TLError::Parse {
            loc,
            message: message.into(),
        }
    }

    /// Build a [`TLError::MissingName`].
    pub fn missing(kind: NameKind, name: impl Into<String>) -> Self {
        TLError::MissingName {
            kind,
            name: name.into(),
        }
    }
}

/// Result type alias for TL operations.
pub type Result<T> = std::result::Result<T, TLError>;
