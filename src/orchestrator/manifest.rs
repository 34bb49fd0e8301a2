//! Render the graph as multi-document YAML instead of applying it

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use super::Orchestrator;
use crate::error::{Error, Result};
use crate::graph::{Entity, Node};
use crate::resources::release::ReleaseManifests;

/// Kubernetes manifests for one node. Provider and database nodes have no
/// Kubernetes representation and render to nothing.
pub fn render_node(node: &Node) -> Result<Vec<String>> {
    let docs = match &node.entity {
        Entity::Namespace(ns) => vec![to_yaml(ns)?],
        Entity::Volume(pv) => vec![to_yaml(pv)?],
        Entity::Claim(pvc) => vec![to_yaml(pvc)?],
        Entity::Secret(bundle) => vec![to_yaml(&bundle.to_secret())?],
        Entity::Release(release) => match release.render()? {
            ReleaseManifests::Chart(chart) => vec![to_yaml(&chart)?],
            ReleaseManifests::Direct {
                deployment,
                service,
            } => {
                let mut docs = vec![to_yaml(&deployment)?];
                if let Some(service) = service {
                    docs.push(to_yaml(&service)?);
                }
                docs
            }
        },
        Entity::Provider(_) | Entity::Database(_) => {
            debug!("{} {} has no manifest", node.entity.kind(), node.id);
            Vec::new()
        }
    };
    Ok(docs)
}

fn to_yaml<T: Serialize>(object: &T) -> Result<String> {
    serde_yaml::to_string(object).map_err(Error::from)
}

/// Orchestrator that collects manifests in submission order
#[derive(Debug, Default)]
pub struct ManifestRenderer {
    documents: Mutex<Vec<String>>,
}

impl ManifestRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// All collected documents joined into one YAML stream
    pub fn into_yaml(self) -> String {
        let documents = self
            .documents
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        documents
            .iter()
            .map(|doc| format!("---\n{doc}"))
            .collect()
    }
}

#[async_trait]
impl Orchestrator for ManifestRenderer {
    async fn accept(&self, node: &Node) -> Result<()> {
        let docs = render_node(node)?;
        if let Entity::Database(db) = &node.entity {
            info!(
                "Database {} (owner {}) is provisioned through {}, not rendered",
                db.name, db.owner, db.provider
            );
        }
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(docs);
        Ok(())
    }
}
