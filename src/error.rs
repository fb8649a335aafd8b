//! Error types shared across the demolition pipeline.
//!
//! None of these cross the orchestrator boundary: `DemolitionController`
//! turns them into poll results and log lines.

use std::path::PathBuf;

use crate::scene::EntityId;

/// Failure reported by a fragmentation engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// The platform or engine cannot produce meshes at all. Terminal.
    #[error("fragmentation is not supported on this platform")]
    Unsupported,
    #[error("invalid source mesh: {0}")]
    InvalidSource(String),
    #[error("fragment index {index} out of range (amount {amount})")]
    IndexOutOfRange { index: usize, amount: usize },
}

/// Scheduling flow-control signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("a fragmentation job is already in progress")]
    Busy,
}

/// Failure reported by the cluster demolition collaborator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClusterError {
    #[error("cluster {0:?} has no pieces")]
    Empty(EntityId),
    #[error("cluster {0:?} is not initialized")]
    NotInitialized(EntityId),
    #[error("cluster demolition failed: {0}")]
    Collaborator(String),
}

/// Registration of a scene entity with the controller failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegisterError {
    #[error("entity {0:?} does not exist in the scene")]
    MissingEntity(EntityId),
    #[error("entity {0:?} is already registered")]
    AlreadyRegistered(EntityId),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("unsupported config extension: {0}")]
    UnsupportedFormat(String),
}
