use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Helm release managed by the cluster's helm-controller (k3s / RKE2).
///
/// The controller installs `chart` from `repo` into `targetNamespace` under a
/// release named after this object.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "helm.cattle.io",
    version = "v1",
    kind = "HelmChart",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HelmChartSpec {
    pub chart: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,

    /// Chart version; the latest published version when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,

    #[serde(default)]
    pub create_namespace: bool,

    /// Chart values as a YAML document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values_content: Option<String>,
}
