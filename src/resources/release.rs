//! Application releases
//!
//! A release is either a packaged Helm chart, installed by the cluster's
//! helm-controller, or a direct container image rendered as a `Deployment`
//! plus an optional `Service`. Environment values are either literals or
//! references into a secret; references are passed through untouched and are
//! only ever dereferenced by the kubelet.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec,
    ResourceRequirements as K8sResources, SecretKeySelector, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_json::json;

use super::{namespaced_meta, standard_labels};
use crate::crd::{HelmChart, HelmChartSpec};
use crate::error::Result;

/// Chart version that means "whatever the repository publishes last"
pub const LATEST: &str = "latest";

/// Releases are reached from the LAN through the cluster's load balancer
pub const LOAD_BALANCER: &str = "LoadBalancer";

/// Value of a container environment variable
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnvBinding {
    Literal(String),
    SecretRef { secret: String, key: String },
}

impl EnvBinding {
    pub fn literal(value: impl Into<String>) -> Self {
        EnvBinding::Literal(value.into())
    }

    pub fn is_secret_ref(&self) -> bool {
        matches!(self, EnvBinding::SecretRef { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvVarBinding {
    pub name: String,
    pub binding: EnvBinding,
}

impl EnvVarBinding {
    pub fn new(name: impl Into<String>, binding: EnvBinding) -> Self {
        Self {
            name: name.into(),
            binding,
        }
    }

    fn to_env_var(&self) -> EnvVar {
        match &self.binding {
            EnvBinding::Literal(value) => EnvVar {
                name: self.name.clone(),
                value: Some(value.clone()),
                ..Default::default()
            },
            EnvBinding::SecretRef { secret, key } => EnvVar {
                name: self.name.clone(),
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: Some(secret.clone()),
                        key: key.clone(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortBinding {
    pub name: String,
    pub container_port: i32,
    pub service_port: i32,
}

impl PortBinding {
    pub fn new(name: impl Into<String>, container_port: i32, service_port: i32) -> Self {
        Self {
            name: name.into(),
            container_port,
            service_port,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceSpec {
    pub cpu: String,
    pub memory: String,
}

impl ResourceSpec {
    pub fn new(cpu: &str, memory: &str) -> Self {
        Self {
            cpu: cpu.to_string(),
            memory: memory.to_string(),
        }
    }

    fn to_quantities(&self) -> BTreeMap<String, Quantity> {
        BTreeMap::from([
            ("cpu".to_string(), Quantity(self.cpu.clone())),
            ("memory".to_string(), Quantity(self.memory.clone())),
        ])
    }
}

/// Request/limit pair for the release's main container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRequirements {
    pub requests: ResourceSpec,
    pub limits: ResourceSpec,
}

/// Container image split into repository and tag
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

/// Tag part of an image reference, ignoring registry ports and digests.
///
/// `registry.lan:5000/jellyfin/jellyfin:10.10.3` yields `10.10.3`;
/// `jellyfin/jellyfin` yields `None`.
pub fn image_tag(reference: &str) -> Option<&str> {
    let without_digest = reference.split('@').next().unwrap_or(reference);
    let last_segment = without_digest.rsplit('/').next().unwrap_or(without_digest);
    last_segment
        .split_once(':')
        .map(|(_, tag)| tag)
        .filter(|tag| !tag.is_empty())
}

/// A pre-existing claim mounted into a chart's pods
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimMount {
    /// Key under the chart's `persistence` values
    pub volume: String,
    pub claim: String,
    pub mount_path: String,
    pub sub_path: Option<String>,
}

/// A chart-managed config volume provisioned from a storage class
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigVolume {
    pub storage_class: String,
    pub size: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReleaseSource {
    Chart {
        repo: String,
        chart: String,
        version: String,
        image: ImageRef,
    },
    Image {
        reference: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseTarget {
    pub name: String,
    pub namespace: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChartRef {
    pub repo: String,
    pub chart: String,
    pub version: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChartValues {
    pub image: ImageRef,
    pub port: PortBinding,
    pub config_volume: Option<ConfigVolume>,
    pub mounts: Vec<ClaimMount>,
    pub resources: ResourceRequirements,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectOptions {
    pub resources: ResourceRequirements,
}

/// A composed application release
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplicationRelease {
    pub name: String,
    pub namespace: String,
    pub source: ReleaseSource,
    pub ports: Vec<PortBinding>,
    pub env: Vec<EnvVarBinding>,
    pub resources: ResourceRequirements,
    pub config_volume: Option<ConfigVolume>,
    pub mounts: Vec<ClaimMount>,
}

/// Kubernetes objects a release renders to
#[derive(Clone, Debug)]
pub enum ReleaseManifests {
    Chart(HelmChart),
    Direct {
        deployment: Deployment,
        service: Option<Service>,
    },
}

pub fn compose_packaged_release(
    target: ReleaseTarget,
    chart: ChartRef,
    values: ChartValues,
) -> ApplicationRelease {
    ApplicationRelease {
        name: target.name,
        namespace: target.namespace,
        source: ReleaseSource::Chart {
            repo: chart.repo,
            chart: chart.chart,
            version: chart.version,
            image: values.image,
        },
        ports: vec![values.port],
        env: Vec::new(),
        resources: values.resources,
        config_volume: values.config_volume,
        mounts: values.mounts,
    }
}

pub fn compose_direct_release(
    target: ReleaseTarget,
    image: &str,
    env: Vec<EnvVarBinding>,
    ports: Vec<PortBinding>,
    options: DirectOptions,
) -> ApplicationRelease {
    ApplicationRelease {
        name: target.name,
        namespace: target.namespace,
        source: ReleaseSource::Image {
            reference: image.to_string(),
        },
        ports,
        env,
        resources: options.resources,
        config_volume: None,
        mounts: Vec::new(),
    }
}

impl ApplicationRelease {
    pub fn is_packaged(&self) -> bool {
        matches!(self.source, ReleaseSource::Chart { .. })
    }

    /// Name of the exposed service, if the release exposes one.
    ///
    /// A chart release is addressed by its release name; a direct release
    /// only has a service when it declares ports.
    pub fn service_name(&self) -> Option<&str> {
        match self.source {
            ReleaseSource::Chart { .. } => Some(&self.name),
            ReleaseSource::Image { .. } if !self.ports.is_empty() => Some(&self.name),
            ReleaseSource::Image { .. } => None,
        }
    }

    /// Secrets referenced by env bindings, as (secret, key) pairs
    pub fn secret_refs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().filter_map(|e| match &e.binding {
            EnvBinding::SecretRef { secret, key } => Some((secret.as_str(), key.as_str())),
            EnvBinding::Literal(_) => None,
        })
    }

    pub fn render(&self) -> Result<ReleaseManifests> {
        match &self.source {
            ReleaseSource::Chart {
                repo,
                chart,
                version,
                image,
            } => {
                let values = serde_yaml::to_string(&self.chart_values(image))?;
                let mut helm_chart = HelmChart::new(
                    &self.name,
                    HelmChartSpec {
                        chart: chart.clone(),
                        repo: Some(repo.clone()),
                        version: (version != LATEST).then(|| version.clone()),
                        target_namespace: Some(self.namespace.clone()),
                        create_namespace: false,
                        values_content: Some(values),
                    },
                );
                helm_chart.metadata.namespace = Some(self.namespace.clone());
                helm_chart.metadata.labels = Some(standard_labels(&self.name));
                Ok(ReleaseManifests::Chart(helm_chart))
            }
            ReleaseSource::Image { reference } => Ok(ReleaseManifests::Direct {
                deployment: self.build_deployment(reference),
                service: self.build_service(),
            }),
        }
    }

    fn chart_values(&self, image: &ImageRef) -> serde_json::Value {
        let mut persistence = serde_json::Map::new();
        if let Some(config) = &self.config_volume {
            persistence.insert(
                "config".to_string(),
                json!({
                    "enabled": true,
                    "type": "pvc",
                    "storageClass": config.storage_class,
                    "size": config.size,
                }),
            );
        }
        for mount in &self.mounts {
            let mut entry = json!({
                "enabled": true,
                "type": "pvc",
                "existingClaim": mount.claim,
                "mountPath": mount.mount_path,
            });
            if let Some(sub_path) = &mount.sub_path {
                entry["subPath"] = json!(sub_path);
            }
            persistence.insert(mount.volume.clone(), entry);
        }

        let ports: serde_json::Map<String, serde_json::Value> = self
            .ports
            .iter()
            .map(|p| (p.name.clone(), json!({ "port": p.service_port })))
            .collect();

        json!({
            "image": {
                "repository": image.repository,
                "tag": image.tag,
            },
            "service": {
                "main": {
                    "type": LOAD_BALANCER,
                    "ports": ports,
                },
            },
            "persistence": persistence,
            "resources": {
                "requests": {
                    "cpu": self.resources.requests.cpu,
                    "memory": self.resources.requests.memory,
                },
                "limits": {
                    "cpu": self.resources.limits.cpu,
                    "memory": self.resources.limits.memory,
                },
            },
        })
    }

    fn build_deployment(&self, image: &str) -> Deployment {
        let labels = standard_labels(&self.name);

        let container = Container {
            name: self.name.clone(),
            image: Some(image.to_string()),
            ports: (!self.ports.is_empty()).then(|| {
                self.ports
                    .iter()
                    .map(|p| ContainerPort {
                        name: Some(p.name.clone()),
                        container_port: p.container_port,
                        ..Default::default()
                    })
                    .collect()
            }),
            env: Some(self.env.iter().map(EnvVarBinding::to_env_var).collect()),
            resources: Some(K8sResources {
                requests: Some(self.resources.requests.to_quantities()),
                limits: Some(self.resources.limits.to_quantities()),
                ..Default::default()
            }),
            ..Default::default()
        };

        Deployment {
            metadata: namespaced_meta(&self.name, &self.namespace, &self.name),
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }

    fn build_service(&self) -> Option<Service> {
        let name = self.service_name()?;
        let labels = standard_labels(&self.name);
        let ports = self
            .ports
            .iter()
            .map(|p| ServicePort {
                name: Some(p.name.clone()),
                port: p.service_port,
                target_port: Some(IntOrString::Int(p.container_port)),
                ..Default::default()
            })
            .collect();

        Some(Service {
            metadata: namespaced_meta(name, &self.namespace, &self.name),
            spec: Some(ServiceSpec {
                selector: Some(labels),
                ports: Some(ports),
                type_: Some(LOAD_BALANCER.to_string()),
                ..Default::default()
            }),
            status: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resources() -> ResourceRequirements {
        ResourceRequirements {
            requests: ResourceSpec::new("100m", "256Mi"),
            limits: ResourceSpec::new("500m", "512Mi"),
        }
    }

    fn target(name: &str) -> ReleaseTarget {
        ReleaseTarget {
            name: name.to_string(),
            namespace: "jellyfin".to_string(),
        }
    }

    fn direct(ports: Vec<PortBinding>) -> ApplicationRelease {
        compose_direct_release(
            target("jellystat"),
            "cyfershepard/jellystat:latest",
            vec![
                EnvVarBinding::new("POSTGRES_USER", EnvBinding::literal("postgres")),
                EnvVarBinding::new(
                    "POSTGRES_PASSWORD",
                    EnvBinding::SecretRef {
                        secret: "jellystat-secret".to_string(),
                        key: "postgres-password".to_string(),
                    },
                ),
            ],
            ports,
            DirectOptions {
                resources: resources(),
            },
        )
    }

    fn packaged(version: &str) -> ApplicationRelease {
        compose_packaged_release(
            target("jellyfin"),
            ChartRef {
                repo: "https://jellyfin.github.io/jellyfin-helm".to_string(),
                chart: "jellyfin".to_string(),
                version: version.to_string(),
            },
            ChartValues {
                image: ImageRef {
                    repository: "jellyfin/jellyfin".to_string(),
                    tag: "10.10.3".to_string(),
                },
                port: PortBinding::new("http", 8096, 8096),
                config_volume: Some(ConfigVolume {
                    storage_class: "truenas-hdd-mirror-nfs".to_string(),
                    size: "2Gi".to_string(),
                }),
                mounts: vec![ClaimMount {
                    volume: "media".to_string(),
                    claim: "media".to_string(),
                    mount_path: "/media".to_string(),
                    sub_path: Some("media".to_string()),
                }],
                resources: resources(),
            },
        )
    }

    #[test]
    fn test_image_tag() {
        assert_eq!(image_tag("jellyfin/jellyfin:10.9.11"), Some("10.9.11"));
        assert_eq!(image_tag("jellyfin/jellyfin"), None);
        assert_eq!(image_tag("registry.lan:5000/jellyfin/jellyfin"), None);
        assert_eq!(
            image_tag("registry.lan:5000/jellyfin/jellyfin:10.10.3"),
            Some("10.10.3")
        );
        assert_eq!(image_tag("jellyfin/jellyfin:10.10.3@sha256:abc"), Some("10.10.3"));
        assert_eq!(image_tag("jellyfin/jellyfin:"), None);
    }

    #[test]
    fn test_secret_ref_renders_value_from() {
        let release = direct(vec![PortBinding::new("http", 3000, 3000)]);
        let ReleaseManifests::Direct { deployment, .. } = release.render().unwrap() else {
            panic!("expected a direct release");
        };
        let container = &deployment.spec.unwrap().template.spec.unwrap().containers[0];
        let env = container.env.as_ref().unwrap();

        assert_eq!(env[0].value.as_deref(), Some("postgres"));

        let password = &env[1];
        assert!(password.value.is_none());
        let selector = password
            .value_from
            .as_ref()
            .unwrap()
            .secret_key_ref
            .as_ref()
            .unwrap();
        assert_eq!(selector.name.as_deref(), Some("jellystat-secret"));
        assert_eq!(selector.key, "postgres-password");
    }

    #[test]
    fn test_direct_release_service() {
        let release = direct(vec![PortBinding::new("http", 3000, 3000)]);
        assert_eq!(release.service_name(), Some("jellystat"));

        let ReleaseManifests::Direct { service, .. } = release.render().unwrap() else {
            panic!("expected a direct release");
        };
        let spec = service.unwrap().spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 3000);
        assert_eq!(port.target_port, Some(IntOrString::Int(3000)));
    }

    #[test]
    fn test_direct_release_without_ports_has_no_service() {
        let release = direct(Vec::new());
        assert_eq!(release.service_name(), None);
        let ReleaseManifests::Direct { service, .. } = release.render().unwrap() else {
            panic!("expected a direct release");
        };
        assert!(service.is_none());
    }

    #[test]
    fn test_secret_refs() {
        let release = direct(Vec::new());
        let refs: Vec<_> = release.secret_refs().collect();
        assert_eq!(refs, vec![("jellystat-secret", "postgres-password")]);
    }

    #[test]
    fn test_chart_values() {
        let release = packaged("1.5.0");
        let ReleaseManifests::Chart(chart) = release.render().unwrap() else {
            panic!("expected a chart release");
        };
        assert_eq!(chart.metadata.name.as_deref(), Some("jellyfin"));
        assert_eq!(chart.spec.version.as_deref(), Some("1.5.0"));
        assert_eq!(chart.spec.target_namespace.as_deref(), Some("jellyfin"));

        let values: serde_json::Value =
            serde_yaml::from_str(chart.spec.values_content.as_deref().unwrap()).unwrap();
        assert_eq!(values["image"]["tag"], "10.10.3");
        assert_eq!(values["service"]["main"]["type"], "LoadBalancer");
        assert_eq!(values["service"]["main"]["ports"]["http"]["port"], 8096);
        assert_eq!(values["persistence"]["media"]["existingClaim"], "media");
        assert_eq!(values["persistence"]["media"]["subPath"], "media");
        assert_eq!(
            values["persistence"]["config"]["storageClass"],
            "truenas-hdd-mirror-nfs"
        );
        assert_eq!(values["resources"]["limits"]["memory"], "512Mi");
    }

    #[test]
    fn test_latest_chart_version_is_unpinned() {
        let ReleaseManifests::Chart(chart) = packaged(LATEST).render().unwrap() else {
            panic!("expected a chart release");
        };
        assert!(chart.spec.version.is_none());
    }
}
