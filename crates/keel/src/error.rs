//! Error types for keel operations.

use crate::domain::IssueId;
use crate::id_generation::IdGenerationError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The error type for keel operations.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JSONL file handling failed.
    #[error("JSONL error: {0}")]
    Jsonl(#[from] keel_jsonl::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No `.keel` directory was found.
    #[error("Not a keel workspace (no .keel directory found from {0})")]
    NotInitialized(PathBuf),

    /// Issue not found.
    #[error("Issue not found: {0}")]
    IssueNotFound(IssueId),

    /// Some other referenced entity (parent, peer, dependency) is absent.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// What kind of thing was looked up
        entity: &'static str,
        /// The lookup key
        key: String,
    },

    /// Duplicate ID, duplicate edge or duplicate external reference.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Adding the edge would close a cycle in the blocking subgraph.
    #[error("Circular dependency: {from} -> {to} would create a cycle")]
    CircularDependency {
        /// Dependent side of the rejected edge
        from: IssueId,
        /// Dependency side of the rejected edge
        to: IssueId,
    },

    /// Hierarchical ID would exceed the maximum depth.
    #[error("Cannot allocate a child of {parent}: maximum hierarchy depth {max_depth} reached")]
    DepthExceeded {
        /// The parent that is already at maximum depth
        parent: IssueId,
        /// Maximum number of dotted segments
        max_depth: usize,
    },

    /// A record or file could not be parsed.
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    /// Backend unreachable or locked.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Operation not applicable to the active backend.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Invalid priority value.
    #[error("Invalid priority: {0} (must be 0-4)")]
    InvalidPriority(u8),

    /// Input failed validation.
    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Coarse classification of [`Error`] values.
///
/// Callers branch on the kind rather than on individual variants when
/// deciding whether to retry, skip a record, or report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Referenced issue, parent, dependency or peer absent
    NotFound,
    /// Duplicate ID, edge or external reference
    Conflict,
    /// Hierarchy too deep
    DepthExceeded,
    /// Unparseable record or file; recoverable by skipping
    Corrupt,
    /// Backend unreachable or locked
    Unavailable,
    /// Not applicable to the current backend
    Unsupported,
    /// Rejected input
    Invalid,
    /// Filesystem failure
    Io,
}

impl Error {
    /// Classifies this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IssueNotFound(_) | Self::NotFound { .. } | Self::NotInitialized(_) => {
                ErrorKind::NotFound
            }
            Self::Conflict(_) | Self::CircularDependency { .. } => ErrorKind::Conflict,
            Self::DepthExceeded { .. } => ErrorKind::DepthExceeded,
            Self::Json(_) | Self::Corrupt(_) => ErrorKind::Corrupt,
            Self::Jsonl(e) => match e {
                keel_jsonl::Error::Io(_) => ErrorKind::Io,
                _ => ErrorKind::Corrupt,
            },
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Config(_) | Self::InvalidPriority(_) | Self::Validation(_) => ErrorKind::Invalid,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

impl From<IdGenerationError> for Error {
    fn from(e: IdGenerationError) -> Self {
        match e {
            IdGenerationError::ParentNotFound(parent) => Self::NotFound {
                entity: "parent issue",
                key: parent,
            },
            IdGenerationError::DepthExceeded { parent, max_depth } => Self::DepthExceeded {
                parent: IssueId::new(parent),
                max_depth,
            },
            IdGenerationError::CollisionExhausted { .. } => Self::Conflict(e.to_string()),
            IdGenerationError::InvalidPrefix(_) => Self::Validation(e.to_string()),
        }
    }
}

/// A specialized Result type for keel operations.
pub type Result<T> = std::result::Result<T, Error>;
