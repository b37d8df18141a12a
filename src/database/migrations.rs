//! # Database Migrations
//!
//! Schema migrations live in `migrations/` using the
//! `YYYYMMDDHHMMSS_description.sql` naming convention and are embedded into
//! the binary at compile time. sqlx tracks applied versions in
//! `_sqlx_migrations` and serializes concurrent runners with an advisory lock,
//! so several workers starting at once apply each migration exactly once.

use sqlx::migrate::Migrator;
use sqlx::PgPool;
use tracing::info;

use crate::error::Result;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Manages database schema migrations.
pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Run all outstanding migrations in order
    pub async fn run_all(pool: &PgPool) -> Result<()> {
        MIGRATOR.run(pool).await?;
        info!(
            known_migrations = MIGRATOR.iter().count(),
            "Database migrations up to date"
        );
        Ok(())
    }

    /// Versions embedded in this build, oldest first
    pub fn versions() -> Vec<i64> {
        MIGRATOR.iter().map(|migration| migration.version).collect()
    }
}
