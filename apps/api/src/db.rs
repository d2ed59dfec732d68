use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Creates and returns a PostgreSQL connection pool for the job store.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    info!("PostgreSQL connection pool established");
    Ok(pool)
}

/// Pool for an aggregation source. Connects on first use, so an unreachable
/// source degrades that source only instead of failing startup.
pub fn source_pool(name: &str, database_url: Option<&str>) -> Option<PgPool> {
    let url = database_url?;
    match PgPoolOptions::new().max_connections(4).connect_lazy(url) {
        Ok(pool) => {
            info!(source = name, "aggregation source configured");
            Some(pool)
        }
        Err(e) => {
            tracing::warn!(source = name, error = %e, "invalid aggregation source URL, skipping");
            None
        }
    }
}
