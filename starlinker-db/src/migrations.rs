use crate::error::StoreError;
use diesel::{Connection, SqliteConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::info;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Runs any pending migrations against `database_path`. SQLite's database
/// file is process-local, so unlike the teacher's Postgres advisory lock
/// (needed to coordinate concurrent deployments against one shared
/// database) there is no cross-process lock to take here.
pub fn run_migrations(database_path: &str) -> Result<(), StoreError> {
    let mut conn = SqliteConnection::establish(database_path).map_err(StoreError::Connect)?;
    info!("running any pending migrations");
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(StoreError::Migration)?;
    info!("migrations finished");
    Ok(())
}
