//! Database provisioning through a PostgreSQL provider connection

use std::collections::BTreeMap;
use std::sync::Mutex;

use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::Connection;
use tracing::{info, instrument};

use crate::error::{Error, Result};
use crate::resources::database::{DatabaseDescriptor, ProviderHandle, SslMode};

/// Maintenance database used to issue `CREATE DATABASE`
const MAINTENANCE_DATABASE: &str = "postgres";

/// Creates databases on providers accepted earlier in the same submission
#[derive(Debug, Default)]
pub struct PostgresProvisioner {
    providers: Mutex<BTreeMap<String, ProviderHandle>>,
    dry_run: bool,
}

impl PostgresProvisioner {
    pub fn new(dry_run: bool) -> Self {
        Self {
            providers: Mutex::default(),
            dry_run,
        }
    }

    /// Record a provider; no connection is opened until a database needs it.
    pub fn register(&self, provider: &ProviderHandle) {
        info!(
            "Registered PostgreSQL provider {} ({}:{}, sslmode={})",
            provider.id(),
            provider.host(),
            provider.port(),
            provider.sslmode().as_str()
        );
        self.providers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(provider.id().to_string(), provider.clone());
    }

    fn provider(&self, id: &str) -> Result<ProviderHandle> {
        self.providers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| Error::GraphError(format!("provider '{id}' was not accepted")))
    }

    /// Create the database unless it already exists
    #[instrument(skip(self, db), fields(database = %db.name, provider = %db.provider))]
    pub async fn ensure_database(&self, db: &DatabaseDescriptor) -> Result<()> {
        let provider = self.provider(&db.provider)?;

        if self.dry_run {
            info!(
                "Dry Run: Would create database {} owned by {} on {}",
                db.name,
                db.owner,
                provider.host()
            );
            return Ok(());
        }

        let mut conn = PgConnection::connect_with(&connect_options(&provider)).await?;

        let exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM pg_database WHERE datname = $1")
                .bind(&db.name)
                .fetch_optional(&mut conn)
                .await?;

        if exists.is_some() {
            info!("Database {} already exists", db.name);
        } else {
            let statement = create_database_statement(db);
            sqlx::query(&statement).execute(&mut conn).await?;
            info!("Created database {} owned by {}", db.name, db.owner);
        }

        conn.close().await?;
        Ok(())
    }
}

fn connect_options(provider: &ProviderHandle) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(provider.host())
        .port(provider.port())
        .username(provider.username())
        .password(provider.password())
        .database(MAINTENANCE_DATABASE)
        .ssl_mode(pg_ssl_mode(provider.sslmode()))
}

fn pg_ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyCa => PgSslMode::VerifyCa,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn create_database_statement(db: &DatabaseDescriptor) -> String {
    format!(
        "CREATE DATABASE {} OWNER {}",
        quote_ident(&db.name),
        quote_ident(&db.owner)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::database::{build_database, build_provider, ProviderParams};

    fn provider() -> ProviderHandle {
        build_provider(ProviderParams {
            id: "postgres-provider".to_string(),
            host: "db.lan".to_string(),
            port: 5433,
            username: "postgres".to_string(),
            password: "pw".to_string(),
            sslmode: SslMode::Disable,
        })
    }

    #[test]
    fn test_create_database_statement_quotes_identifiers() {
        let db = build_database("jfstat", "jelly\"stat", &provider());
        assert_eq!(
            create_database_statement(&db),
            r#"CREATE DATABASE "jfstat" OWNER "jelly""stat""#
        );
    }

    #[test]
    fn test_ssl_mode_mapping() {
        assert!(matches!(pg_ssl_mode(SslMode::Disable), PgSslMode::Disable));
        assert!(matches!(pg_ssl_mode(SslMode::VerifyFull), PgSslMode::VerifyFull));
    }

    #[test]
    fn test_unregistered_provider_is_an_error() {
        let provisioner = PostgresProvisioner::new(true);
        let db = build_database("jfstat", "postgres", &provider());
        let err = tokio_test::block_on(provisioner.ensure_database(&db)).unwrap_err();
        assert!(err.to_string().contains("postgres-provider"));
    }

    #[test]
    fn test_dry_run_does_not_connect() {
        let provisioner = PostgresProvisioner::new(true);
        let p = provider();
        provisioner.register(&p);
        let db = build_database("jfstat", "postgres", &p);
        tokio_test::block_on(provisioner.ensure_database(&db)).unwrap();
    }
}
