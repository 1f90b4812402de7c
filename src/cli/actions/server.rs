use crate::{
    api,
    auth::{Argon2Hasher, AuthConfig, AuthState, TokenConfig, TokenService},
    catalog::{Catalog, MemoryCatalog, PgCatalog},
    cli::{commands::MEMORY_DSN, telemetry},
    rbac::{
        seed,
        store::{MemoryStore, PgStore, Store},
    },
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

const MAX_DB_CONNECTIONS: u32 = 5;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub token_secret: SecretString,
    pub token_issuer: String,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
    pub production: bool,
    pub seed_defaults: bool,
    pub bootstrap_admin: Option<String>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the token configuration is rejected, the store cannot be
/// opened or seeded, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let tokens = TokenService::new(
        TokenConfig::new(args.token_secret)
            .with_issuer(args.token_issuer)
            .with_access_ttl_seconds(args.access_ttl_seconds)
            .with_refresh_ttl_seconds(args.refresh_ttl_seconds),
    )
    .context("Invalid token configuration")?;

    let (store, catalog) = open_stores(&args.dsn).await?;
    let auth_state = AuthState::new(
        AuthConfig::new().with_production(args.production),
        tokens,
        Arc::new(Argon2Hasher::new()),
        store.clone(),
    );

    if args.seed_defaults {
        seed::ensure_defaults(store.as_ref(), auth_state.authorizer())
            .await
            .context("Failed to seed default roles and permissions")?;
        info!("Default roles and permissions in place");
    }

    if let Some(email) = &args.bootstrap_admin {
        seed::bootstrap_admin(store.as_ref(), auth_state.authorizer(), email)
            .await
            .context("Failed to bootstrap admin")?;
    }

    let result = api::new(args.port, Arc::new(auth_state), catalog).await;
    telemetry::shutdown_tracer();
    result
}

async fn open_stores(dsn: &str) -> Result<(Arc<dyn Store>, Arc<dyn Catalog>)> {
    if dsn == MEMORY_DSN {
        warn!("Using the in-memory store, nothing survives a restart");
        return Ok((Arc::new(MemoryStore::new()), Arc::new(MemoryCatalog::new())));
    }

    let store = PgStore::connect(dsn, MAX_DB_CONNECTIONS).await?;
    store.ensure_schema().await?;
    let catalog = PgCatalog::new(store.pool().clone());
    Ok((Arc::new(store), Arc::new(catalog)))
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(&args.dsn)),
        ("token_issuer", args.token_issuer.clone()),
        ("access_ttl_seconds", args.access_ttl_seconds.to_string()),
        ("refresh_ttl_seconds", args.refresh_ttl_seconds.to_string()),
        ("production", args.production.to_string()),
        ("seed_defaults", args.seed_defaults.to_string()),
        (
            "bootstrap_admin",
            args.bootstrap_admin
                .clone()
                .unwrap_or_else(|| "none".to_string()),
        ),
    ];

    let width = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} ({})\n\nStartup configuration:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        message.push_str(&format!("\n  {key:<width$} {value}"));
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    if dsn == MEMORY_DSN {
        return dsn.to_string();
    }
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_dsn() {
        assert_eq!(
            redact_dsn("postgres://user:hunter2@db:5432/custodian"),
            "postgres://user:REDACTED@db:5432/custodian"
        );
        assert_eq!(
            redact_dsn("postgres://db:5432/custodian"),
            "postgres://db:5432/custodian"
        );
        assert_eq!(redact_dsn(MEMORY_DSN), MEMORY_DSN);
        assert_eq!(redact_dsn("not a url"), "invalid-dsn");
    }

    #[test]
    fn test_short_commit() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit("unknown"), "unknown");
        assert_eq!(short_commit("abc"), "abc");
    }

    #[tokio::test]
    async fn test_memory_dsn_opens_memory_stores() -> Result<()> {
        let (store, catalog) = open_stores(MEMORY_DSN).await?;
        assert!(store.roles().await?.is_empty());
        assert!(catalog.products().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_weak_secret_is_rejected_before_serving() {
        let args = Args {
            port: 0,
            dsn: MEMORY_DSN.to_string(),
            token_secret: SecretString::from("short".to_string()),
            token_issuer: "custodian".to_string(),
            access_ttl_seconds: 900,
            refresh_ttl_seconds: 604_800,
            production: false,
            seed_defaults: false,
            bootstrap_admin: None,
        };
        let err = execute(args).await.err().map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("Invalid token configuration"));
    }
}
