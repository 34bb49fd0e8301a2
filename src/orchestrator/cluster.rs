//! Apply the graph to a live cluster
//!
//! Kubernetes objects go through server-side apply with a fixed field
//! manager, so re-running the same graph converges instead of conflicting.
//! The database node is handed to the [`PostgresProvisioner`].

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    Namespace, PersistentVolume, PersistentVolumeClaim, Secret, Service,
};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, Patch, PatchParams},
    client::Client,
    Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, instrument};

use super::{Orchestrator, PostgresProvisioner};
use crate::crd::HelmChart;
use crate::error::{Error, Result};
use crate::graph::{Entity, Node};
use crate::resources::release::ReleaseManifests;
use crate::resources::MANAGER;

pub struct ClusterOrchestrator {
    client: Client,
    postgres: PostgresProvisioner,
    dry_run: bool,
}

impl ClusterOrchestrator {
    pub fn new(client: Client, dry_run: bool) -> Self {
        Self {
            client,
            postgres: PostgresProvisioner::new(dry_run),
            dry_run,
        }
    }

    async fn apply_cluster<K>(&self, object: &K) -> Result<()>
    where
        K: Resource + Clone + DeserializeOwned + Serialize + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        self.apply(&api, object).await
    }

    async fn apply_namespaced<K>(&self, object: &K) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let namespace = object.namespace().ok_or_else(|| {
            Error::GraphError(format!("{} has no namespace", object.name_any()))
        })?;
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        self.apply(&api, object).await
    }

    async fn apply<K>(&self, api: &Api<K>, object: &K) -> Result<()>
    where
        K: Resource + Clone + DeserializeOwned + Serialize + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let kind = K::kind(&Default::default()).to_string();
        let name = object
            .meta()
            .name
            .clone()
            .ok_or_else(|| Error::GraphError(format!("{kind} without a name")))?;

        if self.dry_run {
            info!("Dry Run: Would apply {} {}", kind, name);
            return Ok(());
        }

        api.patch(&name, &PatchParams::apply(MANAGER).force(), &Patch::Apply(object))
            .await
            .map_err(Error::KubeError)?;
        info!("{} {} applied", kind, name);
        Ok(())
    }
}

#[async_trait]
impl Orchestrator for ClusterOrchestrator {
    #[instrument(skip(self, node), fields(id = %node.id, kind = node.entity.kind()))]
    async fn accept(&self, node: &Node) -> Result<()> {
        match &node.entity {
            Entity::Namespace(ns) => self.apply_cluster::<Namespace>(ns).await,
            Entity::Volume(pv) => self.apply_cluster::<PersistentVolume>(pv).await,
            Entity::Claim(pvc) => self.apply_namespaced::<PersistentVolumeClaim>(pvc).await,
            Entity::Secret(bundle) => {
                self.apply_namespaced::<Secret>(&bundle.to_secret()).await
            }
            Entity::Provider(provider) => {
                self.postgres.register(provider);
                Ok(())
            }
            Entity::Database(db) => self.postgres.ensure_database(db).await,
            Entity::Release(release) => match release.render()? {
                ReleaseManifests::Chart(chart) => {
                    self.apply_namespaced::<HelmChart>(&chart).await
                }
                ReleaseManifests::Direct {
                    deployment,
                    service,
                } => {
                    self.apply_namespaced::<Deployment>(&deployment).await?;
                    if let Some(service) = service {
                        self.apply_namespaced::<Service>(&service).await?;
                    }
                    Ok(())
                }
            },
        }
    }
}
