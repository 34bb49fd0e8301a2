//! Error types for the Jellyfin stack
//!
//! Resolution of configuration values never fails. Everything here is either
//! a structural problem detected while building the graph, or a failure
//! reported back by the cluster or the database while submitting it.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid desired-state graph: {0}")]
    GraphError(String),

    #[error("Failed to submit {node}: {source}")]
    SubmissionFailed {
        node: String,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Wrap an orchestrator failure with the id of the node being submitted
    pub fn submission(node: impl Into<String>, source: Error) -> Self {
        Error::SubmissionFailed {
            node: node.into(),
            source: Box::new(source),
        }
    }
}
