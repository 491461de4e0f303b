//! Engine-level error taxonomy.
//!
//! Collaborator traits return `anyhow::Result`; component boundaries wrap
//! those failures into `EngineError::Dependency` with the failing step's
//! name so callers see engine vocabulary, never storage internals.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Caller-supplied input is malformed (empty ids, dimension mismatch,
    /// out-of-range parameters).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced entity, memory, or document does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The operation would violate a graph invariant (duplicate merge,
    /// illegal self-loop, bad status transition).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A required collaborator call failed or timed out.
    #[error("dependency step '{step}' failed: {source}")]
    Dependency {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    /// The request-scoped cancellation token fired or the request deadline
    /// elapsed before completion.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn dependency(step: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Dependency {
            step: step.into(),
            source,
        }
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_use_engine_vocabulary() {
        let err = EngineError::not_found("entity", "ent-000042");
        assert_eq!(err.to_string(), "entity not found: ent-000042");

        let err = EngineError::dependency("vector search", anyhow::anyhow!("socket closed"));
        assert!(err.to_string().contains("vector search"));
    }

    #[test]
    fn dependency_preserves_source_chain() {
        let err = EngineError::dependency("embedding", anyhow::anyhow!("model unavailable"));
        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("model unavailable"));
    }
}
