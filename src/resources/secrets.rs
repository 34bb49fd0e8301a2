//! Secret bundles consumed by reference
//!
//! A bundle owns its values; everything downstream only ever sees a
//! [`SecretHandle`] and the [`EnvBinding::SecretRef`]s it hands out.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::Secret;

use super::namespaced_meta;
use super::release::EnvBinding;

/// Name and namespace of a bundle, usable without access to its values
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretHandle {
    pub name: String,
    pub namespace: String,
}

impl SecretHandle {
    /// Env binding that resolves `key` from this secret at runtime
    pub fn key_ref(&self, key: &str) -> EnvBinding {
        EnvBinding::SecretRef {
            secret: self.name.clone(),
            key: key.to_string(),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SecretBundle {
    handle: SecretHandle,
    data: BTreeMap<String, String>,
}

impl SecretBundle {
    pub fn handle(&self) -> &SecretHandle {
        &self.handle
    }

    pub fn name(&self) -> &str {
        &self.handle.name
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Raw value of `key`, for the manifest renderer and tests only
    pub fn value(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    /// Render as a `v1/Secret` carrying the values as `stringData`
    pub fn to_secret(&self) -> Secret {
        Secret {
            metadata: namespaced_meta(&self.handle.name, &self.handle.namespace, "jellystat"),
            string_data: Some(self.data.clone()),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        }
    }
}

impl fmt::Debug for SecretBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBundle")
            .field("name", &self.handle.name)
            .field("namespace", &self.handle.namespace)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub fn build_secret(
    name: &str,
    namespace: &str,
    data: BTreeMap<String, String>,
) -> SecretBundle {
    SecretBundle {
        handle: SecretHandle {
            name: name.to_string(),
            namespace: namespace.to_string(),
        },
        data,
    }
}
