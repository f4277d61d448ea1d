//! Embedded schema migrations.

use sqlx::PgPool;
use tracing::info;

use jobhub_core::error::{AppError, ErrorKind};

/// Apply every migration under `migrations/` that has not run yet.
pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    let migrator = sqlx::migrate!("../../migrations");
    info!(available = migrator.iter().count(), "Applying scheduler migrations");

    migrator.run(pool).await.map_err(|e| {
        AppError::with_source(
            ErrorKind::Database,
            format!("Failed to run migrations: {e}"),
            e,
        )
    })?;

    info!("Scheduler schema is up to date");
    Ok(())
}
