//! Database connection pool, migrations, and health check.
//!
//! One pool is shared by every flag context in the process; contexts hold
//! the [`Db`] behind an `Arc`.

pub mod flags;

use crate::error::{Error, Result};
use crate::model::EntityId;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database handle. Owns the connection pool.
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Register an entity. Returns false if it already existed.
    pub async fn create_entity(&self, entity: &EntityId) -> Result<bool> {
        let rows = sqlx::query("INSERT INTO entities (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(entity.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows > 0)
    }

    pub async fn entity_exists(&self, entity: &EntityId) -> Result<bool> {
        let row: (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM entities WHERE id = $1)")
            .bind(entity.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}
