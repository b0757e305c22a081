use std::io;
use std::path::PathBuf;

/// Errors produced by the audit trail.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// I/O error while appending to or reading the log.
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The bundled schema did not compile.
    #[error("schema compilation error: {0}")]
    SchemaCompilation(String),

    /// An event failed schema validation.
    #[error("event does not match the merge event schema: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),
}

impl AuditError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the audit crate.
pub type AuditResult<T> = std::result::Result<T, AuditError>;
