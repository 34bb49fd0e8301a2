//! Configuration resolution
//!
//! Every setting is resolved from three tiers, highest precedence first:
//!
//! 1. the stack config store (`jellyfin:<name>` entries of a stack YAML file)
//! 2. the process environment, captured once into an [`Environment`] snapshot
//! 3. the default supplied by the caller
//!
//! Both inputs are injected through [`ConfigContext`], so resolution is a pure
//! function of its arguments and never fails. Empty strings count as absent.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Project prefix for stack config entries
pub const PROJECT: &str = "jellyfin";

/// A named setting: its stack config name and, optionally, the environment
/// variable that can override it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Key {
    pub name: &'static str,
    pub env: Option<&'static str>,
    /// Sensitive values are never logged.
    pub sensitive: bool,
}

impl Key {
    pub const fn config(name: &'static str) -> Self {
        Self {
            name,
            env: None,
            sensitive: false,
        }
    }

    pub const fn with_env(name: &'static str, env: &'static str) -> Self {
        Self {
            name,
            env: Some(env),
            sensitive: false,
        }
    }

    pub const fn secret(name: &'static str, env: &'static str) -> Self {
        Self {
            name,
            env: Some(env),
            sensitive: true,
        }
    }
}

/// Settings read by the stack
pub mod keys {
    use super::Key;

    pub const NAMESPACE: Key = Key::config("namespace");
    pub const MEDIA_SIZE: Key = Key::config("mediaSize");
    pub const STORAGE_CLASS: Key = Key::config("storageClass");
    pub const CONFIG_STORAGE_CLASS: Key = Key::config("configStorageClass");
    pub const CONFIG_SIZE: Key = Key::config("configSize");

    pub const TRUENAS_HOST: Key = Key::with_env("truenasHost", "TRUENAS_HOST");
    pub const TRUENAS_NFS_PATH_MEDIA: Key =
        Key::with_env("truenasNfsPathMedia", "TRUENAS_NFS_PATH_MEDIA");

    pub const POSTGRES_HOST: Key = Key::with_env("postgresHost", "POSTGRES_HOST");
    pub const POSTGRES_PORT: Key = Key::with_env("postgresPort", "POSTGRES_PORT");
    pub const POSTGRES_SSLMODE: Key = Key::with_env("postgresSslMode", "POSTGRES_SSLMODE");
    pub const POSTGRES_USER: Key = Key::with_env("postgresUser", "POSTGRES_USER");
    pub const POSTGRES_PASSWORD: Key = Key::secret("postgresPassword", "POSTGRES_PASSWORD");
    pub const JELLYSTAT_JWT_SECRET: Key =
        Key::secret("jellystatJwtSecret", "JELLYSTAT_JWT_SECRET");

    pub const JELLYFIN_HELM_VERSION: Key =
        Key::with_env("jellyfinHelmVersion", "JELLYFIN_HELM_VERSION");
    pub const JELLYFIN_IMAGE: Key = Key::with_env("jellyfinImage", "JELLYFIN_IMAGE");
    pub const JELLYSTAT_IMAGE: Key = Key::with_env("jellystatImage", "JELLYSTAT_IMAGE");
}

/// Which tier a resolved value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provenance {
    Config,
    Environment,
    Default,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Config => write!(f, "config"),
            Provenance::Environment => write!(f, "environment"),
            Provenance::Default => write!(f, "default"),
        }
    }
}

/// A resolved scalar together with the tier it came from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigValue {
    value: String,
    provenance: Provenance,
}

impl ConfigValue {
    pub fn new(value: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            value: value.into(),
            provenance,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn into_string(self) -> String {
        self.value
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// The value as a Kubernetes quantity (e.g. `500Gi`)
    pub fn quantity(&self) -> Quantity {
        Quantity(self.value.clone())
    }

    /// Parse the value, naming the setting in the error
    pub fn parse<T>(&self, key: Key) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.value.parse::<T>().map_err(|e| {
            Error::ConfigError(format!(
                "{} ({}) is not valid: {}",
                key.name, self.provenance, e
            ))
        })
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

#[derive(Deserialize)]
struct StackFile {
    #[serde(default)]
    config: Option<BTreeMap<String, serde_yaml::Value>>,
}

/// Explicit configuration entries, keyed `project:name`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigStore {
    project: String,
    entries: BTreeMap<String, String>,
}

impl ConfigStore {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Add an entry; unqualified names are placed under the store's project.
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = self.qualify(key.into());
        self.entries.insert(key, value.into());
        self
    }

    /// Parse a stack file of the form `config: { "jellyfin:namespace": media }`.
    pub fn from_yaml_str(project: impl Into<String>, content: &str) -> Result<Self> {
        let mut store = Self::new(project);
        if content.trim().is_empty() {
            return Ok(store);
        }

        let file: StackFile = serde_yaml::from_str(content)?;
        for (key, value) in file.config.unwrap_or_default() {
            let value = match value {
                // `key:` with nothing after it, same as an empty string
                serde_yaml::Value::Null => continue,
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Mapping(m) if m.contains_key("secure") => {
                    return Err(Error::ConfigError(format!(
                        "{key} is an encrypted value; pass it through the environment instead"
                    )));
                }
                _ => {
                    return Err(Error::ConfigError(format!(
                        "{key} must be a string, number or boolean"
                    )));
                }
            };
            let key = store.qualify(key);
            store.entries.insert(key, value);
        }
        Ok(store)
    }

    pub fn from_file(project: impl Into<String>, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(project, &content)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&format!("{}:{}", self.project, name))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn qualify(&self, key: String) -> String {
        if key.contains(':') {
            key
        } else {
            format!("{}:{}", self.project, key)
        }
    }
}

/// Read-only snapshot of environment variables
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Capture the current process environment
    pub fn from_process() -> Self {
        std::env::vars().collect()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

// Only variable names; values may be credentials.
impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.vars.keys()).finish()
    }
}

/// Injected inputs of the resolver
#[derive(Clone, Debug, Default)]
pub struct ConfigContext {
    store: ConfigStore,
    env: Environment,
}

impl ConfigContext {
    pub fn new(store: ConfigStore, env: Environment) -> Self {
        Self { store, env }
    }

    /// Resolve `key`: config store entry, else environment variable, else `default`.
    pub fn resolve(&self, key: Key, default: &str) -> ConfigValue {
        let resolved = if let Some(value) = self.store.get(key.name) {
            ConfigValue::new(value, Provenance::Config)
        } else if let Some(value) = key.env.and_then(|name| self.env.get(name)) {
            ConfigValue::new(value, Provenance::Environment)
        } else {
            ConfigValue::new(default, Provenance::Default)
        };

        if key.sensitive {
            if resolved.provenance() == Provenance::Default {
                warn!(
                    "{} is using its built-in default; set {} before deploying anywhere that matters",
                    key.name,
                    key.env.unwrap_or(key.name)
                );
            } else {
                debug!(key = key.name, source = %resolved.provenance(), "resolved sensitive setting");
            }
        } else {
            debug!(key = key.name, source = %resolved.provenance(), value = %resolved, "resolved setting");
        }

        resolved
    }
}
