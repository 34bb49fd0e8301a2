//! The Jellyfin media stack
//!
//! Wires the builders together: an NFS media volume shared with the servarr
//! stack, the claim Jellyfin mounts it through, the Jellystat database and
//! its credentials, the Jellyfin Helm release and the Jellystat app.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use tracing::{info, instrument};

use crate::config::{keys, ConfigContext};
use crate::error::Result;
use crate::graph::{self, Dependency, Entity, Node, SubmissionHandle};
use crate::resources::cluster_meta;
use crate::resources::database::{build_database, build_provider, ProviderParams, SslMode};
use crate::resources::release::{
    compose_direct_release, compose_packaged_release, image_tag, ChartRef, ChartValues,
    ClaimMount, ConfigVolume, DirectOptions, EnvBinding, EnvVarBinding, ImageRef, PortBinding,
    ReleaseTarget, ResourceRequirements, ResourceSpec, LATEST,
};
use crate::resources::secrets::build_secret;
use crate::resources::storage::{build_claim, build_volume, ClaimParams, VolumeParams};

pub const DEFAULT_NAMESPACE: &str = "jellyfin";
pub const DEFAULT_MEDIA_SIZE: &str = "500Gi";
pub const DEFAULT_STORAGE_CLASS: &str = "truenas-hdd-stripe-nfs";
pub const DEFAULT_CONFIG_STORAGE_CLASS: &str = "truenas-hdd-mirror-nfs";
pub const DEFAULT_CONFIG_SIZE: &str = "2Gi";
pub const DEFAULT_NFS_HOST: &str = "localhost";
pub const DEFAULT_NFS_PATH_MEDIA: &str = "/path/to/media";
pub const DEFAULT_POSTGRES_HOST: &str = "localhost";
pub const DEFAULT_POSTGRES_PORT: &str = "5432";
pub const DEFAULT_POSTGRES_SSLMODE: &str = "disable";
pub const DEFAULT_POSTGRES_USER: &str = "postgres";
pub const DEFAULT_POSTGRES_PASSWORD: &str = "defaultpassword";
pub const DEFAULT_JWT_SECRET: &str = "change-me-please";
pub const DEFAULT_JELLYFIN_TAG: &str = "10.10.3";
pub const DEFAULT_JELLYFIN_IMAGE: &str = "jellyfin/jellyfin:10.10.3";
pub const DEFAULT_JELLYSTAT_IMAGE: &str = "cyfershepard/jellystat:latest";

pub const JELLYFIN_CHART_REPO: &str = "https://jellyfin.github.io/jellyfin-helm";
pub const JELLYFIN_IMAGE_REPOSITORY: &str = "jellyfin/jellyfin";
pub const JELLYSTAT_DATABASE_NAME: &str = "jfstat";

pub const POSTGRES_PASSWORD_KEY: &str = "postgres-password";
pub const JWT_SECRET_KEY: &str = "jwt-secret";

/// Node ids of the stack's graph
pub mod ids {
    pub const NAMESPACE: &str = "jellyfin-namespace";
    pub const MEDIA_PV: &str = "jellyfin-media-pv";
    pub const MEDIA_PVC: &str = "media";
    pub const POSTGRES_PROVIDER: &str = "postgres-provider";
    pub const JELLYSTAT_DATABASE: &str = "jellystat-database";
    pub const JELLYSTAT_SECRET: &str = "jellystat-secret";
    pub const JELLYFIN: &str = "jellyfin";
    pub const JELLYSTAT: &str = "jellystat";
}

/// Unassembled nodes and edges of the stack
#[derive(Clone, Debug)]
pub struct Stack {
    pub nodes: Vec<Node>,
    pub dependencies: Vec<Dependency>,
}

#[instrument(skip(ctx))]
pub fn build_stack(ctx: &ConfigContext) -> Result<Stack> {
    let namespace = ctx.resolve(keys::NAMESPACE, DEFAULT_NAMESPACE).into_string();
    let media_size = ctx.resolve(keys::MEDIA_SIZE, DEFAULT_MEDIA_SIZE);
    let storage_class = ctx
        .resolve(keys::STORAGE_CLASS, DEFAULT_STORAGE_CLASS)
        .into_string();

    let ns = Namespace {
        metadata: cluster_meta(&namespace, "jellyfin"),
        ..Default::default()
    };

    // Same NFS share as servarr, through a volume of Jellyfin's own.
    let media_pv = build_volume(&VolumeParams {
        name: ids::MEDIA_PV.to_string(),
        capacity: media_size.quantity(),
        storage_class: storage_class.clone(),
        nfs_server: ctx.resolve(keys::TRUENAS_HOST, DEFAULT_NFS_HOST).into_string(),
        nfs_path: ctx
            .resolve(keys::TRUENAS_NFS_PATH_MEDIA, DEFAULT_NFS_PATH_MEDIA)
            .into_string(),
    });
    let media_pvc = build_claim(
        &media_pv,
        &ClaimParams {
            name: ids::MEDIA_PVC.to_string(),
            namespace: namespace.clone(),
            storage_class,
            capacity: media_size.quantity(),
        },
    );

    let postgres_host = ctx.resolve(keys::POSTGRES_HOST, DEFAULT_POSTGRES_HOST);
    let postgres_port = ctx.resolve(keys::POSTGRES_PORT, DEFAULT_POSTGRES_PORT);
    let postgres_user = ctx
        .resolve(keys::POSTGRES_USER, DEFAULT_POSTGRES_USER)
        .into_string();
    let postgres_password = ctx
        .resolve(keys::POSTGRES_PASSWORD, DEFAULT_POSTGRES_PASSWORD)
        .into_string();

    let provider = build_provider(ProviderParams {
        id: ids::POSTGRES_PROVIDER.to_string(),
        host: postgres_host.as_str().to_string(),
        port: postgres_port.parse(keys::POSTGRES_PORT)?,
        username: postgres_user.clone(),
        password: postgres_password.clone(),
        sslmode: ctx
            .resolve(keys::POSTGRES_SSLMODE, DEFAULT_POSTGRES_SSLMODE)
            .parse::<SslMode>(keys::POSTGRES_SSLMODE)?,
    });
    let database = build_database(JELLYSTAT_DATABASE_NAME, &postgres_user, &provider);

    let secret = build_secret(
        ids::JELLYSTAT_SECRET,
        &namespace,
        BTreeMap::from([
            (POSTGRES_PASSWORD_KEY.to_string(), postgres_password),
            (
                JWT_SECRET_KEY.to_string(),
                ctx.resolve(keys::JELLYSTAT_JWT_SECRET, DEFAULT_JWT_SECRET)
                    .into_string(),
            ),
        ]),
    );

    // Only the tag of JELLYFIN_IMAGE is used; the chart pins the repository.
    let jellyfin_image = ctx.resolve(keys::JELLYFIN_IMAGE, DEFAULT_JELLYFIN_IMAGE);
    let jellyfin_tag = image_tag(jellyfin_image.as_str())
        .unwrap_or(DEFAULT_JELLYFIN_TAG)
        .to_string();

    let jellyfin = compose_packaged_release(
        ReleaseTarget {
            name: ids::JELLYFIN.to_string(),
            namespace: namespace.clone(),
        },
        ChartRef {
            repo: JELLYFIN_CHART_REPO.to_string(),
            chart: "jellyfin".to_string(),
            version: ctx
                .resolve(keys::JELLYFIN_HELM_VERSION, LATEST)
                .into_string(),
        },
        ChartValues {
            image: ImageRef {
                repository: JELLYFIN_IMAGE_REPOSITORY.to_string(),
                tag: jellyfin_tag,
            },
            port: PortBinding::new("http", 8096, 8096),
            config_volume: Some(ConfigVolume {
                storage_class: ctx
                    .resolve(keys::CONFIG_STORAGE_CLASS, DEFAULT_CONFIG_STORAGE_CLASS)
                    .into_string(),
                size: ctx.resolve(keys::CONFIG_SIZE, DEFAULT_CONFIG_SIZE).into_string(),
            }),
            mounts: vec![ClaimMount {
                volume: "media".to_string(),
                claim: media_pvc.name_any(),
                mount_path: "/media".to_string(),
                sub_path: Some("media".to_string()),
            }],
            resources: ResourceRequirements {
                requests: ResourceSpec::new("500m", "1Gi"),
                limits: ResourceSpec::new("2", "4Gi"),
            },
        },
    );

    let secret_handle = secret.handle().clone();
    let jellystat_image = ctx.resolve(keys::JELLYSTAT_IMAGE, DEFAULT_JELLYSTAT_IMAGE);
    let jellystat = compose_direct_release(
        ReleaseTarget {
            name: ids::JELLYSTAT.to_string(),
            namespace: namespace.clone(),
        },
        jellystat_image.as_str(),
        vec![
            EnvVarBinding::new("POSTGRES_USER", EnvBinding::literal(postgres_user)),
            EnvVarBinding::new(
                "POSTGRES_PASSWORD",
                secret_handle.key_ref(POSTGRES_PASSWORD_KEY),
            ),
            EnvVarBinding::new("POSTGRES_IP", EnvBinding::literal(postgres_host.as_str())),
            EnvVarBinding::new("POSTGRES_PORT", EnvBinding::literal(postgres_port.as_str())),
            EnvVarBinding::new(
                "POSTGRES_DATABASE",
                EnvBinding::literal(JELLYSTAT_DATABASE_NAME),
            ),
            EnvVarBinding::new("JWT_SECRET", secret_handle.key_ref(JWT_SECRET_KEY)),
        ],
        vec![PortBinding::new("http", 3000, 3000)],
        DirectOptions {
            resources: ResourceRequirements {
                requests: ResourceSpec::new("100m", "256Mi"),
                limits: ResourceSpec::new("500m", "512Mi"),
            },
        },
    );

    info!(
        "Built stack for namespace {} ({} database on {}, sslmode={})",
        namespace,
        JELLYSTAT_DATABASE_NAME,
        provider.host(),
        provider.sslmode()
    );

    let nodes = vec![
        Node::new(ids::NAMESPACE, Entity::Namespace(ns)),
        Node::new(ids::MEDIA_PV, Entity::Volume(media_pv)),
        Node::new(ids::MEDIA_PVC, Entity::Claim(media_pvc)),
        Node::new(ids::POSTGRES_PROVIDER, Entity::Provider(provider)),
        Node::new(ids::JELLYSTAT_DATABASE, Entity::Database(database)),
        Node::new(ids::JELLYSTAT_SECRET, Entity::Secret(secret)),
        Node::new(ids::JELLYFIN, Entity::Release(jellyfin)),
        Node::new(ids::JELLYSTAT, Entity::Release(jellystat)),
    ];

    let dependencies = vec![
        Dependency::new(ids::MEDIA_PVC, ids::MEDIA_PV),
        Dependency::new(ids::MEDIA_PVC, ids::NAMESPACE),
        Dependency::new(ids::JELLYSTAT_DATABASE, ids::POSTGRES_PROVIDER),
        Dependency::new(ids::JELLYSTAT_SECRET, ids::NAMESPACE),
        Dependency::new(ids::JELLYFIN, ids::NAMESPACE),
        Dependency::new(ids::JELLYFIN, ids::MEDIA_PVC),
        Dependency::new(ids::JELLYSTAT, ids::NAMESPACE),
        Dependency::new(ids::JELLYSTAT, ids::JELLYSTAT_SECRET),
        Dependency::new(ids::JELLYSTAT, ids::JELLYSTAT_DATABASE),
    ];

    Ok(Stack {
        nodes,
        dependencies,
    })
}

/// Build and assemble the stack in one step
pub fn assemble_stack(ctx: &ConfigContext) -> Result<SubmissionHandle> {
    let stack = build_stack(ctx)?;
    graph::assemble(stack.nodes, stack.dependencies)
}
