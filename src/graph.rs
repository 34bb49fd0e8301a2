//! Desired-state graph
//!
//! Nodes are resource descriptors, edges read "dependent must wait for
//! dependency". [`assemble`] checks the graph is well formed and fixes a
//! deterministic submission order; [`export`] derives the outputs downstream
//! stacks consume.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use k8s_openapi::api::core::v1::{Namespace, PersistentVolume, PersistentVolumeClaim};
use kube::ResourceExt;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::resources::database::{DatabaseDescriptor, ProviderHandle};
use crate::resources::release::ApplicationRelease;
use crate::resources::secrets::SecretBundle;

/// Logical id of a node, unique within a graph
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Clone, Debug)]
pub enum Entity {
    Namespace(Namespace),
    Volume(PersistentVolume),
    Claim(PersistentVolumeClaim),
    Secret(SecretBundle),
    Provider(ProviderHandle),
    Database(DatabaseDescriptor),
    Release(ApplicationRelease),
}

impl Entity {
    pub fn kind(&self) -> &'static str {
        match self {
            Entity::Namespace(_) => "Namespace",
            Entity::Volume(_) => "PersistentVolume",
            Entity::Claim(_) => "PersistentVolumeClaim",
            Entity::Secret(_) => "Secret",
            Entity::Provider(_) => "PostgresProvider",
            Entity::Database(_) => "PostgresDatabase",
            Entity::Release(r) if r.is_packaged() => "HelmChart",
            Entity::Release(_) => "Deployment",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub entity: Entity,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, entity: Entity) -> Self {
        Self {
            id: id.into(),
            entity,
        }
    }
}

/// `dependent` must not be submitted before `dependency` is accepted
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Dependency {
    pub dependent: NodeId,
    pub dependency: NodeId,
}

impl Dependency {
    pub fn new(dependent: impl Into<NodeId>, dependency: impl Into<NodeId>) -> Self {
        Self {
            dependent: dependent.into(),
            dependency: dependency.into(),
        }
    }
}

/// A validated graph with its nodes in submission order
#[derive(Clone, Debug)]
pub struct SubmissionHandle {
    nodes: Vec<Node>,
    dependencies: BTreeSet<Dependency>,
}

impl SubmissionHandle {
    /// Nodes in submission order
    pub fn order(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id.as_str() == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id.as_str() == id)
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter()
    }

    pub fn dependencies_of<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a NodeId> + 'a {
        self.dependencies
            .iter()
            .filter(move |d| d.dependent.as_str() == id)
            .map(|d| &d.dependency)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Validate `nodes` and `dependencies` and compute the submission order.
///
/// Ties between independent nodes are broken by their position in `nodes`,
/// so identical inputs always produce the identical order.
pub fn assemble(nodes: Vec<Node>, dependencies: Vec<Dependency>) -> Result<SubmissionHandle> {
    let mut index: HashMap<NodeId, usize> = HashMap::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        if index.insert(node.id.clone(), i).is_some() {
            return Err(Error::GraphError(format!("duplicate node id '{}'", node.id)));
        }
    }

    let mut edges: BTreeSet<Dependency> = BTreeSet::new();
    for dep in dependencies {
        for end in [&dep.dependent, &dep.dependency] {
            if !index.contains_key(end) {
                return Err(Error::GraphError(format!(
                    "dependency {} -> {} names unknown node '{}'",
                    dep.dependent, dep.dependency, end
                )));
            }
        }
        if dep.dependent == dep.dependency {
            return Err(Error::GraphError(format!("'{}' depends on itself", dep.dependent)));
        }
        edges.insert(dep);
    }

    // A database is only submitted through a provider that is part of the same graph.
    for node in &nodes {
        if let Entity::Database(db) = &node.entity {
            let provider_id = NodeId::new(db.provider.clone());
            let provider = index.get(&provider_id).map(|&i| &nodes[i].entity);
            match provider {
                Some(Entity::Provider(p)) if !p.host().is_empty() => {
                    edges.insert(Dependency::new(node.id.clone(), provider_id));
                }
                Some(Entity::Provider(_)) => {
                    return Err(Error::GraphError(format!(
                        "database '{}' uses provider '{}' with an empty host",
                        node.id, db.provider
                    )));
                }
                _ => {
                    return Err(Error::GraphError(format!(
                        "database '{}' has no provider '{}' in the graph",
                        node.id, db.provider
                    )));
                }
            }
        }
    }

    let order = topological_order(&nodes, &index, &edges)?;
    debug!(
        order = ?order.iter().map(|&i| nodes[i].id.as_str()).collect::<Vec<_>>(),
        "computed submission order"
    );

    let mut slots: Vec<Option<Node>> = nodes.into_iter().map(Some).collect();
    let ordered: Vec<Node> = order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect();

    info!(
        "Assembled desired-state graph: {} nodes, {} dependencies",
        ordered.len(),
        edges.len()
    );

    Ok(SubmissionHandle {
        nodes: ordered,
        dependencies: edges,
    })
}

fn topological_order(
    nodes: &[Node],
    index: &HashMap<NodeId, usize>,
    edges: &BTreeSet<Dependency>,
) -> Result<Vec<usize>> {
    let mut pending = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for edge in edges {
        let dependent = index[&edge.dependent];
        let dependency = index[&edge.dependency];
        pending[dependent] += 1;
        dependents[dependency].push(dependent);
    }

    let mut ready: BTreeSet<usize> = (0..nodes.len()).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependent in &dependents[next] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck: Vec<&str> = (0..nodes.len())
            .filter(|&i| pending[i] > 0)
            .map(|i| nodes[i].id.as_str())
            .collect();
        return Err(Error::GraphError(format!(
            "dependency cycle between: {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}

/// A named output; `Unset` serializes as `null`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OutputValue {
    Set(String),
    Unset,
}

impl From<Option<&str>> for OutputValue {
    fn from(value: Option<&str>) -> Self {
        match value {
            Some(v) => OutputValue::Set(v.to_string()),
            None => OutputValue::Unset,
        }
    }
}

impl fmt::Display for OutputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputValue::Set(v) => f.write_str(v),
            OutputValue::Unset => f.write_str("<unset>"),
        }
    }
}

/// Outputs exported once the graph has been submitted
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutputSet {
    pub namespace: OutputValue,
    pub services: BTreeMap<String, OutputValue>,
}

pub fn export(handle: &SubmissionHandle) -> OutputSet {
    let namespace = handle
        .order()
        .find_map(|n| match &n.entity {
            Entity::Namespace(ns) => Some(ns.name_any()),
            _ => None,
        })
        .map(OutputValue::Set)
        .unwrap_or(OutputValue::Unset);

    let services = handle
        .order()
        .filter_map(|n| match &n.entity {
            Entity::Release(release) => Some((
                release.name.clone(),
                OutputValue::from(release.service_name()),
            )),
            _ => None,
        })
        .collect();

    OutputSet {
        namespace,
        services,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::database::{build_database, build_provider, ProviderParams, SslMode};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn namespace(name: &str) -> Node {
        Node::new(
            "namespace",
            Entity::Namespace(Namespace {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
    }

    fn volume(id: &str) -> Node {
        Node::new(id, Entity::Volume(PersistentVolume::default()))
    }

    fn provider(host: &str) -> ProviderHandle {
        build_provider(ProviderParams {
            id: "postgres-provider".to_string(),
            host: host.to_string(),
            port: 5432,
            username: "postgres".to_string(),
            password: "pw".to_string(),
            sslmode: SslMode::Disable,
        })
    }

    #[test]
    fn test_dependency_comes_first() {
        let handle = assemble(
            vec![volume("claim"), volume("volume")],
            vec![Dependency::new("claim", "volume")],
        )
        .unwrap();
        let order: Vec<_> = handle.order().map(|n| n.id.as_str()).collect();
        assert_eq!(order, vec!["volume", "claim"]);
    }

    #[test]
    fn test_independent_nodes_keep_input_order() {
        let handle = assemble(vec![volume("b"), volume("a"), volume("c")], vec![]).unwrap();
        let order: Vec<_> = handle.order().map(|n| n.id.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = assemble(vec![volume("a"), volume("a")], vec![]).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_unknown_endpoint_rejected() {
        let err = assemble(vec![volume("a")], vec![Dependency::new("a", "ghost")]).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_cycle_rejected() {
        let err = assemble(
            vec![volume("a"), volume("b"), volume("c")],
            vec![Dependency::new("a", "b"), Dependency::new("b", "a")],
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid desired-state graph: dependency cycle between: a, b"
        );
    }

    #[test]
    fn test_self_dependency_rejected() {
        assert!(assemble(vec![volume("a")], vec![Dependency::new("a", "a")]).is_err());
    }

    #[test]
    fn test_database_requires_provider() {
        let p = provider("localhost");
        let db = build_database("jfstat", "postgres", &p);
        let err = assemble(vec![Node::new("db", Entity::Database(db))], vec![]).unwrap_err();
        assert!(matches!(err, Error::GraphError(_)));
    }

    #[test]
    fn test_database_rejects_empty_provider_host() {
        let p = provider("");
        let db = build_database("jfstat", "postgres", &p);
        let err = assemble(
            vec![
                Node::new("postgres-provider", Entity::Provider(p)),
                Node::new("db", Entity::Database(db)),
            ],
            vec![],
        )
        .unwrap_err();
        assert!(err.to_string().contains("empty host"));
    }

    #[test]
    fn test_database_edge_added_implicitly() {
        let p = provider("localhost");
        let db = build_database("jfstat", "postgres", &p);
        let handle = assemble(
            vec![
                Node::new("db", Entity::Database(db)),
                Node::new("postgres-provider", Entity::Provider(p)),
            ],
            vec![],
        )
        .unwrap();
        assert!(handle.position("postgres-provider") < handle.position("db"));
        assert_eq!(
            handle.dependencies_of("db").collect::<Vec<_>>(),
            vec![&NodeId::new("postgres-provider")]
        );
    }

    #[test]
    fn test_export_without_releases() {
        let handle = assemble(vec![namespace("media")], vec![]).unwrap();
        let outputs = export(&handle);
        assert_eq!(outputs.namespace, OutputValue::Set("media".to_string()));
        assert!(outputs.services.is_empty());
    }

    #[test]
    fn test_unset_serializes_as_null() {
        let outputs = OutputSet {
            namespace: OutputValue::Set("jellyfin".to_string()),
            services: BTreeMap::from([("jellystat".to_string(), OutputValue::Unset)]),
        };
        let json = serde_json::to_value(&outputs).unwrap();
        assert_eq!(json["namespace"], "jellyfin");
        assert!(json["services"]["jellystat"].is_null());
    }
}
