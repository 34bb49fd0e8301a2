//! Resource builders
//!
//! Each builder turns resolved settings into an immutable descriptor. None of
//! them talk to the cluster or the database; submission happens later, in
//! dependency order, through an [`Orchestrator`](crate::orchestrator::Orchestrator).

pub mod database;
pub mod release;
pub mod secrets;
pub mod storage;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Field manager used for server-side apply and the `managed-by` label
pub const MANAGER: &str = "jellyfin-stack";

pub(crate) fn standard_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), app.to_string()),
        ("app.kubernetes.io/instance".to_string(), app.to_string()),
        ("app.kubernetes.io/part-of".to_string(), "jellyfin".to_string()),
        ("app.kubernetes.io/managed-by".to_string(), MANAGER.to_string()),
    ])
}

/// Object metadata for a namespaced resource
pub(crate) fn namespaced_meta(name: &str, namespace: &str, app: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(standard_labels(app)),
        ..Default::default()
    }
}

/// Object metadata for a cluster-scoped resource
pub(crate) fn cluster_meta(name: &str, app: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        labels: Some(standard_labels(app)),
        ..Default::default()
    }
}
