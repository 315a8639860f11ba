use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::config::Config;

#[tracing::instrument(name = "Initialize database pool", skip(config))]
pub async fn init_db(config: &Config) -> anyhow::Result<PgPool> {
    tracing::info!(
        max_connections = config.database_max_connections,
        "Connecting to Postgres"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(config.database_url.expose_secret())
        .await?;

    tracing::debug!("Running pending migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database ready");

    Ok(pool)
}
