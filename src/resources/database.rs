//! PostgreSQL provider connection and the Jellystat database

use std::fmt;

use crate::error::{Error, Result};

/// TLS policy for the provider connection.
///
/// `Disable` is the default for the in-cluster homelab server; it is not a
/// recommendation for anything reachable from outside.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SslMode {
    #[default]
    Disable,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SslMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "disable" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(Error::ConfigError(format!("unknown sslmode '{other}'"))),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ProviderParams {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub sslmode: SslMode,
}

/// Connection parameters for the PostgreSQL server that owns the database
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderHandle {
    id: String,
    host: String,
    port: u16,
    username: String,
    password: String,
    sslmode: SslMode,
}

impl ProviderHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn sslmode(&self) -> SslMode {
        self.sslmode
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("sslmode", &self.sslmode)
            .finish()
    }
}

pub fn build_provider(params: ProviderParams) -> ProviderHandle {
    ProviderHandle {
        id: params.id,
        host: params.host,
        port: params.port,
        username: params.username,
        password: params.password,
        sslmode: params.sslmode,
    }
}

/// A database created on, and scoped to, a provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseDescriptor {
    pub name: String,
    pub owner: String,
    pub provider: String,
}

pub fn build_database(name: &str, owner: &str, provider: &ProviderHandle) -> DatabaseDescriptor {
    DatabaseDescriptor {
        name: name.to_string(),
        owner: owner.to_string(),
        provider: provider.id().to_string(),
    }
}
