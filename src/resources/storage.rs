//! NFS media volume and the claim bound to it
//!
//! The volume is cluster scoped and points at the TrueNAS media share. The
//! claim lives in the stack namespace and names the volume explicitly, so the
//! binding never goes through dynamic provisioning.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    NFSVolumeSource, PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;

use super::{cluster_meta, namespaced_meta};

pub const READ_WRITE_MANY: &str = "ReadWriteMany";

/// The media share outlives the stack; deleting the claim never wipes it.
pub const RECLAIM_RETAIN: &str = "Retain";

#[derive(Clone, Debug, PartialEq)]
pub struct VolumeParams {
    pub name: String,
    pub capacity: Quantity,
    pub storage_class: String,
    pub nfs_server: String,
    pub nfs_path: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClaimParams {
    pub name: String,
    pub namespace: String,
    pub storage_class: String,
    pub capacity: Quantity,
}

pub fn build_volume(params: &VolumeParams) -> PersistentVolume {
    PersistentVolume {
        metadata: cluster_meta(&params.name, "jellyfin"),
        spec: Some(PersistentVolumeSpec {
            capacity: Some(BTreeMap::from([(
                "storage".to_string(),
                params.capacity.clone(),
            )])),
            access_modes: Some(vec![READ_WRITE_MANY.to_string()]),
            persistent_volume_reclaim_policy: Some(RECLAIM_RETAIN.to_string()),
            storage_class_name: Some(params.storage_class.clone()),
            nfs: Some(NFSVolumeSource {
                server: params.nfs_server.clone(),
                path: params.nfs_path.clone(),
                read_only: None,
            }),
            ..Default::default()
        }),
        status: None,
    }
}

/// Build a claim that binds to `volume` by name.
pub fn build_claim(volume: &PersistentVolume, params: &ClaimParams) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: namespaced_meta(&params.name, &params.namespace, "jellyfin"),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![READ_WRITE_MANY.to_string()]),
            storage_class_name: Some(params.storage_class.clone()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    params.capacity.clone(),
                )])),
                ..Default::default()
            }),
            volume_name: Some(volume.name_any()),
            ..Default::default()
        }),
        status: None,
    }
}

/// Name of the volume a claim is bound to, if any
pub fn bound_volume_name(claim: &PersistentVolumeClaim) -> Option<&str> {
    claim.spec.as_ref()?.volume_name.as_deref()
}
