use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use crate::{domain::PathError, storage::migrator::CascadeError};

/// Errors surfaced by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A single requested resource does not exist.
    #[error("{} does not exist", .0.display())]
    NotFound(PathBuf),

    /// A document exists but is not valid JSON for its schema.
    #[error("malformed document {}: {source}", path.display())]
    Corrupt {
        /// The offending document.
        path: PathBuf,
        /// The parser error.
        source: serde_json::Error,
    },

    /// A request was rejected before any I/O took place.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Reading, writing or deleting failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The path the operation targeted.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },

    /// A caller-supplied name or path would escape the root.
    #[error(transparent)]
    Path(#[from] PathError),

    /// Some questions could not be rewritten during a topic cascade.
    #[error(transparent)]
    Cascade(#[from] CascadeError),
}

impl StoreError {
    /// Wrap an I/O error, promoting [`io::ErrorKind::NotFound`] to
    /// [`StoreError::NotFound`].
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    /// The category of the error, as reported to clients.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Corrupt { .. } => ErrorKind::Corrupt,
            Self::Validation(_) | Self::Path(_) => ErrorKind::Validation,
            Self::Io { .. } | Self::Cascade(_) => ErrorKind::Io,
        }
    }
}

/// Client-facing error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Missing file or directory.
    NotFound,
    /// Malformed document.
    Corrupt,
    /// Rejected request payload.
    Validation,
    /// Write, delete or mkdir failure.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotFound => "notFound",
            Self::Corrupt => "corrupt",
            Self::Validation => "validation",
            Self::Io => "io",
        })
    }
}
