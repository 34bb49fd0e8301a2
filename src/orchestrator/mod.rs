//! Submission of an assembled graph
//!
//! An [`Orchestrator`] accepts one node at a time. [`submit`] walks the
//! handle's order, so every node is offered only after all of its
//! dependencies were accepted, and stops at the first failure.

mod cluster;
mod manifest;
mod postgres;

pub use cluster::ClusterOrchestrator;
pub use manifest::{render_node, ManifestRenderer};
pub use postgres::PostgresProvisioner;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::error::{Error, Result};
use crate::graph::{Node, NodeId, SubmissionHandle};

#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Accept a node whose dependencies have all been accepted
    async fn accept(&self, node: &Node) -> Result<()>;
}

/// Nodes accepted by a successful submission, in order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubmissionReport {
    pub accepted: Vec<NodeId>,
}

#[instrument(skip_all, fields(nodes = handle.len()))]
pub async fn submit(
    handle: &SubmissionHandle,
    orchestrator: &dyn Orchestrator,
) -> Result<SubmissionReport> {
    let mut report = SubmissionReport::default();
    for node in handle.order() {
        info!("Submitting {} {}", node.entity.kind(), node.id);
        orchestrator
            .accept(node)
            .await
            .map_err(|e| Error::submission(node.id.as_str(), e))?;
        report.accepted.push(node.id.clone());
    }
    info!("Submitted {} nodes", report.accepted.len());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{assemble, Dependency, Entity};
    use k8s_openapi::api::core::v1::PersistentVolume;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl Orchestrator for Recorder {
        async fn accept(&self, node: &Node) -> Result<()> {
            if self.fail_on == Some(node.id.as_str()) {
                return Err(Error::ConfigError("unreachable".to_string()));
            }
            self.seen.lock().unwrap().push(node.id.to_string());
            Ok(())
        }
    }

    fn handle() -> SubmissionHandle {
        let node = |id: &str| Node::new(id, Entity::Volume(PersistentVolume::default()));
        assemble(
            vec![node("claim"), node("volume"), node("app")],
            vec![
                Dependency::new("claim", "volume"),
                Dependency::new("app", "claim"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_submit_in_dependency_order() {
        let recorder = Recorder::default();
        let report = tokio_test::block_on(submit(&handle(), &recorder)).unwrap();
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["volume", "claim", "app"]);
        assert_eq!(report.accepted.len(), 3);
    }

    #[test]
    fn test_submit_stops_at_first_failure() {
        let recorder = Recorder {
            fail_on: Some("claim"),
            ..Default::default()
        };
        let err = tokio_test::block_on(submit(&handle(), &recorder)).unwrap_err();
        assert!(matches!(err, Error::SubmissionFailed { ref node, .. } if node == "claim"));
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["volume"]);
    }
}
