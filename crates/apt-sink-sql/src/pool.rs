//! Connection pool setup for the MySQL-backed event store.

use sqlx::mysql::MySqlPoolOptions;
use sqlx::{MySql, Pool};
use std::env;

pub type DbPool = Pool<MySql>;

pub async fn init_db() -> Result<DbPool, sqlx::Error> {
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set in .env file");

    tracing::info!("connecting to event store");

    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await?;

    tracing::info!("event store connection established");
    Ok(pool)
}

pub async fn test_connection(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").fetch_one(pool).await?;
    tracing::info!("event store connection test passed");
    Ok(())
}
