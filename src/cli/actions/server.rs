use crate::{
    cli::telemetry,
    onboard::{
        self,
        store::{MemoryStore, PgStore, Store},
        AccountService, ApiConfig,
    },
};
use anyhow::{anyhow, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub db_max_connections: u32,
    pub otp_ttl_seconds: u32,
    pub expose_otp: bool,
    pub admin_token: Option<SecretString>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the store cannot be reached or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    info!(
        port = args.port,
        dsn = %redact_dsn(args.dsn.expose_secret()),
        db_max_connections = args.db_max_connections,
        otp_ttl_seconds = args.otp_ttl_seconds,
        expose_otp = args.expose_otp,
        admin_token_set = args.admin_token.is_some(),
        "Startup configuration"
    );

    let store = connect(args.dsn.expose_secret(), args.db_max_connections).await?;

    let service = AccountService::new(store)
        .with_otp_ttl(chrono::Duration::seconds(i64::from(args.otp_ttl_seconds)));

    let config = ApiConfig {
        expose_otp: args.expose_otp,
        admin_token: args.admin_token,
    };

    let result = onboard::new(args.port, service, config).await;

    telemetry::shutdown_tracer();

    result
}

/// Open the store named by `dsn`: `memory://` or `postgres://`.
async fn connect(dsn: &str, max_connections: u32) -> Result<Arc<dyn Store>> {
    let url = Url::parse(dsn).context("Invalid DSN")?;

    match url.scheme() {
        "memory" => {
            info!("Using in-memory store, data is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
        "postgres" | "postgresql" => {
            let pool = PgPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(5))
                .connect(dsn)
                .await
                .context("Failed to connect to database")?;

            let store = PgStore::new(pool);
            store.apply_schema().await?;

            info!("Database schema ready");

            Ok(Arc::new(store))
        }
        scheme => Err(anyhow!("Unsupported DSN scheme: {scheme}")),
    }
}

fn redact_dsn(dsn: &str) -> String {
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
